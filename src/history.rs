//! 전송 히스토리
//!
//! - 메모리 캐시가 기준, 모든 변경은 백엔드에 write-through
//! - 최대 기록 수 초과 시 가장 오래된 것부터 제거 (FIFO)
//! - 변경은 사본에 먼저 적용하고 저장 성공 시에만 캐시에 반영
//!   (저장 실패가 캐시를 오염시키지 않음)

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::storage::{HistoryBackend, HistoryDocument, DOCUMENT_VERSION};
use crate::{Error, Result};

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Direction::Send => "send",
            Direction::Receive => "receive",
        })
    }
}

/// 기록 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::InProgress)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordStatus::InProgress => "in_progress",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// 전송 기록 1건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// 비어 있으면 `add` 에서 부여
    #[serde(default)]
    pub id: String,

    pub direction: Direction,

    /// 대표 파일 이름
    pub file_name: String,

    /// 크기 라벨 ("1.5 MB", 수신 대기 중이면 "unknown")
    pub file_size: String,

    /// 전송 코드
    pub code: String,

    pub status: RecordStatus,

    pub created_at: DateTime<Utc>,

    /// 소요 시간 (초)
    #[serde(default)]
    pub duration_secs: u64,

    /// 출처 라벨
    #[serde(default)]
    pub origin: String,

    #[serde(default)]
    pub file_count: usize,
}

impl HistoryRecord {
    /// 진행 중 상태의 새 기록 (ID 없음)
    pub fn new(
        direction: Direction,
        file_name: impl Into<String>,
        file_size: impl Into<String>,
        code: impl Into<String>,
        origin: impl Into<String>,
        file_count: usize,
    ) -> Self {
        Self {
            id: String::new(),
            direction,
            file_name: file_name.into(),
            file_size: file_size.into(),
            code: code.into(),
            status: RecordStatus::InProgress,
            created_at: Utc::now(),
            duration_secs: 0,
            origin: origin.into(),
            file_count,
        }
    }
}

/// 상태별 집계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub cancelled: usize,
}

/// 저장 용량 정보
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub record_count: usize,
    /// 직렬화된 레코드 바이트 합
    pub total_bytes: u64,
}

/// 캐시 상태
#[derive(Debug, Clone, Default)]
struct HistoryInner {
    cache: HashMap<String, HistoryRecord>,
    /// 삽입 순서 (오래된 것부터)
    keys: Vec<String>,
    id_counter: u64,
}

impl HistoryInner {
    fn from_document(document: HistoryDocument, max_records: usize) -> Self {
        let mut inner = Self {
            id_counter: document.id_counter,
            ..Self::default()
        };
        for record in document.records {
            if record.id.is_empty() || inner.cache.contains_key(&record.id) {
                warn!("잘못된 기록 무시: id={:?}", record.id);
                continue;
            }
            inner.keys.push(record.id.clone());
            inner.cache.insert(record.id.clone(), record);
        }
        inner.evict_overflow(max_records);
        inner
    }

    fn to_document(&self) -> HistoryDocument {
        HistoryDocument {
            version: DOCUMENT_VERSION,
            id_counter: self.id_counter,
            records: self
                .keys
                .iter()
                .filter_map(|id| self.cache.get(id).cloned())
                .collect(),
        }
    }

    fn next_id(&mut self) -> String {
        loop {
            self.id_counter += 1;
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let id = format!("record_{}_{}", self.id_counter, nanos);
            if !self.cache.contains_key(&id) {
                return id;
            }
        }
    }

    /// 기록 추가 후 ID 반환
    fn push(&mut self, mut record: HistoryRecord, max_records: usize) -> String {
        if record.id.is_empty() || self.cache.contains_key(&record.id) {
            record.id = self.next_id();
        }
        let id = record.id.clone();
        self.keys.push(id.clone());
        self.cache.insert(id.clone(), record);
        self.evict_overflow(max_records);
        id
    }

    fn evict_overflow(&mut self, max_records: usize) {
        while self.keys.len() > max_records {
            let oldest = self.keys.remove(0);
            self.cache.remove(&oldest);
            debug!("오래된 기록 제거: {}", oldest);
        }
    }

    fn newest_first(&self) -> Vec<HistoryRecord> {
        self.keys
            .iter()
            .rev()
            .filter_map(|id| self.cache.get(id).cloned())
            .collect()
    }
}

/// 히스토리 저장소
pub struct HistoryStore {
    inner: RwLock<HistoryInner>,
    backend: Box<dyn HistoryBackend>,
    max_records: usize,
}

impl HistoryStore {
    /// 백엔드에서 로드해서 열기
    ///
    /// 로드 실패(손상된 파일 등)는 경고 후 빈 저장소로 시작한다.
    pub fn open(backend: impl HistoryBackend + 'static, max_records: usize) -> Self {
        let max_records = max_records.max(1);
        let inner = match backend.load() {
            Ok(Some(document)) => HistoryInner::from_document(document, max_records),
            Ok(None) => HistoryInner::default(),
            Err(e) => {
                warn!("히스토리 로드 실패 ({}), 빈 상태로 시작: {}", backend.describe(), e);
                HistoryInner::default()
            }
        };

        info!("히스토리 {}건 로드: {}", inner.keys.len(), backend.describe());

        Self {
            inner: RwLock::new(inner),
            backend: Box::new(backend),
            max_records,
        }
    }

    /// 최대 기록 수
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// 사본에 변경을 적용하고 저장 성공 시 반영
    ///
    /// 저장은 호출한 스레드에서 동기로 한다. 문서 크기는 `max_records` 로 묶여 있다.
    fn commit<T>(&self, mutate: impl FnOnce(&mut HistoryInner) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.write();
        let mut staged = inner.clone();
        let value = mutate(&mut staged)?;

        if let Err(e) = self.backend.save(&staged.to_document()) {
            error!("히스토리 저장 실패 ({}): {}", self.backend.describe(), e);
            return Err(match e {
                Error::Storage(_) => e,
                other => Error::Storage(other.to_string()),
            });
        }

        *inner = staged;
        Ok(value)
    }

    /// 기록 추가
    pub fn add(&self, record: HistoryRecord) -> Result<String> {
        let max_records = self.max_records;
        let id = self.commit(|inner| Ok(inner.push(record, max_records)))?;
        debug!("기록 추가: {}", id);
        Ok(id)
    }

    /// 기록 수정
    ///
    /// ID 는 변경할 수 없다 (mutator 가 바꿔도 복원).
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut HistoryRecord),
    {
        self.commit(|inner| {
            let record = inner
                .cache
                .get_mut(id)
                .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
            mutator(record);
            record.id = id.to_string();
            Ok(())
        })
    }

    /// 진행 중인 기록을 종료 상태로 (이미 종료됐으면 false)
    pub fn finish(&self, id: &str, status: RecordStatus, duration_secs: u64) -> Result<bool> {
        let mut applied = false;
        self.update(id, |record| {
            if record.status.is_terminal() || !status.is_terminal() {
                return;
            }
            record.status = status;
            record.duration_secs = duration_secs;
            applied = true;
        })?;
        Ok(applied)
    }

    /// 단건 조회
    pub fn get(&self, id: &str) -> Option<HistoryRecord> {
        self.inner.read().cache.get(id).cloned()
    }

    /// 전체 (최신순)
    pub fn get_all(&self) -> Vec<HistoryRecord> {
        self.inner.read().newest_first()
    }

    /// 최신 `limit` 건
    pub fn get_recent(&self, limit: usize) -> Vec<HistoryRecord> {
        let mut all = self.get_all();
        all.truncate(limit);
        all
    }

    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 기록 삭제
    pub fn delete(&self, id: &str) -> Result<()> {
        self.commit(|inner| {
            if inner.cache.remove(id).is_none() {
                return Err(Error::NotFound { id: id.to_string() });
            }
            inner.keys.retain(|key| key != id);
            Ok(())
        })?;
        debug!("기록 삭제: {}", id);
        Ok(())
    }

    /// 전체 삭제 및 카운터 초기화
    pub fn clear(&self) -> Result<()> {
        self.commit(|inner| {
            *inner = HistoryInner::default();
            Ok(())
        })?;
        info!("히스토리 전체 삭제");
        Ok(())
    }

    /// JSON 으로 내보내기 (최신순)
    pub fn export(&self) -> Result<String> {
        let records = self.get_all();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// JSON 가져오기
    ///
    /// 기존 기록을 모두 대체한다. 내보낸 순서(최신순)를 유지하도록 오래된 것부터
    /// 다시 추가하고, 저장은 한 번에 한다. 실패하면 기존 상태 그대로.
    pub fn import(&self, json: &str) -> Result<usize> {
        let records: Vec<HistoryRecord> =
            serde_json::from_str(json).map_err(|e| Error::Parse(format!("가져오기 실패: {}", e)))?;

        let max_records = self.max_records;
        let count = self.commit(|inner| {
            *inner = HistoryInner::default();
            for record in records.into_iter().rev() {
                inner.push(record, max_records);
            }
            Ok(inner.keys.len())
        })?;

        info!("히스토리 {}건 가져옴", count);
        Ok(count)
    }

    /// 상태별 집계
    pub fn stats(&self) -> HistoryStats {
        let inner = self.inner.read();
        let mut stats = HistoryStats {
            total: inner.cache.len(),
            ..HistoryStats::default()
        };
        for record in inner.cache.values() {
            match record.status {
                RecordStatus::Completed => stats.completed += 1,
                RecordStatus::Failed => stats.failed += 1,
                RecordStatus::InProgress => stats.in_progress += 1,
                RecordStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// 저장 용량 정보
    pub fn storage_info(&self) -> StorageInfo {
        let inner = self.inner.read();
        let total_bytes = inner
            .cache
            .iter()
            .filter_map(|(id, record)| {
                serde_json::to_vec(record)
                    .ok()
                    .map(|bytes| (bytes.len() + id.len()) as u64)
            })
            .sum();
        StorageInfo {
            record_count: inner.cache.len(),
            total_bytes,
        }
    }
}
