//! 전송 통계
//!
//! 엔진이 보고한 진행 상황을 누적해서 단조 증가 진행률과 처리율을 계산한다.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::engine::EngineProgress;

/// 진행 상황 샘플
#[derive(Debug, Clone, Copy)]
struct ProgressSample {
    timestamp: Instant,
    transferred: u64,
}

/// 관찰자에게 보고하는 진행률
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// 엔진이 진행률을 보고하지 않음
    Indeterminate,
    /// 0.0 ~ 1.0
    Determinate(f64),
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Progress::Indeterminate => None,
            Progress::Determinate(f) => Some(*f),
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Indeterminate => write!(f, "--"),
            Progress::Determinate(v) => write!(f, "{:.1}%", v * 100.0),
        }
    }
}

/// 전송 1회의 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전체 바이트 (메타데이터 기준, 모르면 0)
    pub total_bytes: u64,

    /// 엔진이 보고한 전송 바이트
    pub transferred_bytes: u64,

    /// 파일 수
    pub file_count: usize,

    /// 진행률 보고 횟수
    pub progress_reports: u64,

    /// 지금까지 보고한 최대 진행률
    best_fraction: Option<f64>,

    /// 최근 샘플
    samples: VecDeque<ProgressSample>,

    /// 샘플 윈도우 크기
    window_size: usize,
}

impl TransferStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
            transferred_bytes: 0,
            file_count: 0,
            progress_reports: 0,
            best_fraction: None,
            samples: VecDeque::with_capacity(window_size),
            window_size: window_size.max(2),
        }
    }

    /// 시작 시각을 지정해서 생성
    pub fn starting_at(start_time: Instant) -> Self {
        Self {
            start_time,
            ..Self::default()
        }
    }

    /// 페이로드 크기 설정
    pub fn set_payload(&mut self, total_bytes: u64, file_count: usize) {
        self.total_bytes = total_bytes;
        self.file_count = file_count;
    }

    /// 엔진 진행 상황 기록 후 보고할 진행률 반환
    ///
    /// 보고값은 단조 증가. 한번 확정 진행률을 보고했으면 이후 엔진이 침묵해도
    /// 마지막 값을 유지한다.
    pub fn record(&mut self, progress: Option<EngineProgress>) -> Progress {
        if let Some(p) = progress {
            let now = Instant::now();
            if self.samples.len() >= self.window_size {
                self.samples.pop_front();
            }
            self.samples.push_back(ProgressSample {
                timestamp: now,
                transferred: p.transferred,
            });

            self.transferred_bytes = self.transferred_bytes.max(p.transferred);
            if p.total > 0 {
                self.total_bytes = p.total;
            }

            if let Some(fraction) = p.fraction() {
                let best = self.best_fraction.map_or(fraction, |b| b.max(fraction));
                self.best_fraction = Some(best);
            }
        }

        self.progress_reports += 1;
        self.current()
    }

    /// 완료 시 진행률을 1.0 으로 고정
    pub fn mark_complete(&mut self) -> Progress {
        self.best_fraction = Some(1.0);
        if self.total_bytes > 0 {
            self.transferred_bytes = self.total_bytes;
        }
        Progress::Determinate(1.0)
    }

    /// 현재 보고 진행률
    pub fn current(&self) -> Progress {
        match self.best_fraction {
            Some(f) => Progress::Determinate(f),
            None => Progress::Indeterminate,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 경과 초 (기록용, 내림)
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// 최근 윈도우 기준 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        let first = match self.samples.front() {
            Some(s) => *s,
            None => return 0.0,
        };
        let last = match self.samples.back() {
            Some(s) => *s,
            None => return 0.0,
        };

        let duration = last.timestamp.duration_since(first.timestamp);
        if duration.is_zero() {
            return 0.0;
        }

        last.transferred.saturating_sub(first.transferred) as f64 / duration.as_secs_f64()
    }

    /// 남은 시간 추정
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.throughput();
        if rate <= 0.0 || self.total_bytes == 0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.transferred_bytes);
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Progress: {} | Bytes: {}/{} | Throughput: {}/s | Files: {}",
            self.elapsed().as_secs_f64(),
            self.current(),
            format_size(self.transferred_bytes),
            format_size(self.total_bytes),
            format_size(self.throughput() as u64),
            self.file_count,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(16)
    }
}

/// 바이트 수를 사람이 읽는 형태로 (1024 단위)
pub fn format_size(size: u64) -> String {
    const UNIT: u64 = 1024;
    if size < UNIT {
        return format!("{} B", size);
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = size / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let unit = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", size as f64 / div as f64, unit)
}
