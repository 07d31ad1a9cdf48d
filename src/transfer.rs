//! 전송 상태 머신 공용 부분
//!
//! 송신/수신 시도 하나마다 `TransferShared` 인스턴스 하나. 종료 상태로의 전이는
//! 한 번만 일어나고 (먼저 도착한 쪽이 이김), 그때 히스토리 기록도 같이 확정된다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineClient;
use crate::history::{Direction, HistoryStore, RecordStatus};
use crate::session::SessionManager;
use crate::stats::{Progress, TransferStats};
use crate::{Error, Result};

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// 송신: 입력 준비
    Preparing,
    /// 송신: 수신자 연결 대기
    Waiting,
    /// 수신: 송신자에 연결 중
    Connecting,
    Sending,
    Receiving,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }

    /// 종료 상태에 대응하는 기록 상태
    pub fn record_status(&self) -> RecordStatus {
        match self {
            TransferState::Completed => RecordStatus::Completed,
            TransferState::Failed => RecordStatus::Failed,
            TransferState::Cancelled => RecordStatus::Cancelled,
            _ => RecordStatus::InProgress,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Preparing => "preparing",
            TransferState::Waiting => "waiting",
            TransferState::Connecting => "connecting",
            TransferState::Sending => "sending",
            TransferState::Receiving => "receiving",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// 관찰자에게 전달되는 상태 변화
#[derive(Debug, Clone, PartialEq)]
pub struct TransferUpdate {
    pub transfer_id: String,
    pub direction: Direction,
    pub state: TransferState,
    pub progress: Progress,
    pub message: Option<String>,
    /// 취소 요청됨, 엔진 호출 반환 대기 중
    pub cancel_pending: bool,
}

/// 전송 관찰자
///
/// 백그라운드 태스크에서 호출된다. UI 스레드로 넘겨야 하면 `ChannelObserver` 사용.
pub trait TransferObserver: Send + Sync {
    fn on_update(&self, update: &TransferUpdate);
}

impl<F> TransferObserver for F
where
    F: Fn(&TransferUpdate) + Send + Sync,
{
    fn on_update(&self, update: &TransferUpdate) {
        self(update)
    }
}

/// 아무것도 하지 않는 관찰자
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_update(&self, _update: &TransferUpdate) {}
}

/// mpsc 채널로 업데이트를 넘기는 관찰자
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferUpdate>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransferObserver for ChannelObserver {
    fn on_update(&self, update: &TransferUpdate) {
        // 수신측이 사라졌으면 버림
        let _ = self.tx.send(update.clone());
    }
}

/// `cancel()` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    /// 취소 완료 (백그라운드 작업까지 끝남)
    Cancelled,
    /// 취소 요청됨, 백그라운드 작업이 아직 끝나지 않음
    Pending,
    /// 이미 종료됨
    AlreadyTerminal(TransferState),
}

/// 전송 1회의 공유 상태
pub(crate) struct TransferShared {
    pub(crate) id: String,
    pub(crate) direction: Direction,
    pub(crate) code: String,
    pub(crate) history_id: Option<String>,
    state: Mutex<TransferState>,
    stats: Mutex<TransferStats>,
    cancel_requested: AtomicBool,
    /// 백그라운드 작업이 끝나기 전까지 true
    busy: AtomicBool,
    /// 엔진 호출에 전달되는 세션 스코프
    token: CancellationToken,
    session: Arc<SessionManager>,
    history: Arc<HistoryStore>,
    observer: Arc<dyn TransferObserver>,
    settled_tx: watch::Sender<bool>,
    text_file: Option<PathBuf>,
}

pub(crate) struct TransferParts {
    pub id: String,
    pub direction: Direction,
    pub code: String,
    pub history_id: Option<String>,
    pub initial: TransferState,
    /// 시도 시작 시각 (클라이언트 생성 전)
    pub started_at: Instant,
    /// 이 시도 전용 세션
    pub session: Arc<SessionManager>,
    pub history: Arc<HistoryStore>,
    pub observer: Arc<dyn TransferObserver>,
    pub text_file: Option<PathBuf>,
}

impl TransferShared {
    pub(crate) fn new(parts: TransferParts) -> (Arc<Self>, watch::Receiver<bool>) {
        let (settled_tx, settled_rx) = watch::channel(false);
        let token = parts.session.cancellation_token();
        let shared = Arc::new(Self {
            id: parts.id,
            direction: parts.direction,
            code: parts.code,
            history_id: parts.history_id,
            state: Mutex::new(parts.initial),
            stats: Mutex::new(TransferStats::starting_at(parts.started_at)),
            cancel_requested: AtomicBool::new(false),
            busy: AtomicBool::new(true),
            token,
            session: parts.session,
            history: parts.history,
            observer: parts.observer,
            settled_tx,
            text_file: parts.text_file,
        });
        (shared, settled_rx)
    }

    pub(crate) fn state(&self) -> TransferState {
        *self.state.lock()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 다음 단계로 진행해도 되는지. 취소 요청됐거나 이미 종료됐으면 `Error::Cancelled`
    pub(crate) fn proceed(&self) -> Result<()> {
        if self.cancel_requested() || self.is_terminal() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub(crate) fn set_payload(&self, total_bytes: u64, file_count: usize) {
        self.stats.lock().set_payload(total_bytes, file_count);
    }

    fn emit(&self, state: TransferState, progress: Progress, message: Option<String>, cancel_pending: bool) {
        self.observer.on_update(&TransferUpdate {
            transfer_id: self.id.clone(),
            direction: self.direction,
            state,
            progress,
            message,
            cancel_pending,
        });
    }

    /// 처음 상태를 관찰자에게 알림
    pub(crate) fn announce(&self, message: Option<String>) {
        let state = self.state();
        let progress = self.stats.lock().current();
        self.emit(state, progress, message, false);
    }

    /// 비종료 상태로 전이 (이미 종료됐거나 취소 요청됐으면 무시)
    pub(crate) fn advance(&self, next: TransferState, message: Option<String>) -> bool {
        debug_assert!(!next.is_terminal());
        {
            let mut state = self.state.lock();
            if state.is_terminal() || self.cancel_requested() {
                return false;
            }
            *state = next;
        }
        debug!("[{}] → {}", self.id, next);
        let progress = self.stats.lock().current();
        self.emit(next, progress, message, false);
        true
    }

    /// 종료 상태로 전이
    ///
    /// 처음 호출만 적용되고 true 를 반환한다. 히스토리 기록도 여기서 확정.
    pub(crate) fn finish(&self, outcome: TransferState, message: Option<String>) -> bool {
        debug_assert!(outcome.is_terminal());
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = outcome;
        }

        let (progress, elapsed, summary) = {
            let mut stats = self.stats.lock();
            let progress = if outcome == TransferState::Completed {
                stats.mark_complete()
            } else {
                stats.current()
            };
            (progress, stats.elapsed_secs(), stats.summary())
        };

        if let Some(history_id) = &self.history_id {
            if let Err(e) = self.history.finish(history_id, outcome.record_status(), elapsed) {
                warn!("[{}] 기록 확정 실패: {}", self.id, e);
            }
        }

        match outcome {
            TransferState::Failed => warn!(
                "[{}] {} 실패: {}",
                self.id,
                self.direction,
                message.as_deref().unwrap_or("-")
            ),
            _ => info!("[{}] {} {}: {}", self.id, self.direction, outcome, summary),
        }

        self.emit(outcome, progress, message, false);
        true
    }

    /// 엔진 호출 결과로 종료
    ///
    /// 호출 전에 취소가 요청됐으면 엔진이 성공을 반환해도 취소로 본다.
    pub(crate) fn finish_with(&self, result: &Result<()>) -> TransferState {
        let outcome = if self.cancel_requested() {
            TransferState::Cancelled
        } else {
            match result {
                Ok(()) => TransferState::Completed,
                Err(_) if self.token.is_cancelled() => TransferState::Cancelled,
                Err(e) if e.is_cancelled() => TransferState::Cancelled,
                Err(_) => TransferState::Failed,
            }
        };

        let message = match (outcome, result) {
            (TransferState::Failed, Err(e)) => Some(e.to_string()),
            _ => None,
        };
        self.finish(outcome, message);
        self.state()
    }

    /// 취소 요청
    pub(crate) fn cancel(&self) -> CancelStatus {
        let state = self.state();
        if state.is_terminal() {
            return CancelStatus::AlreadyTerminal(state);
        }

        let first = !self.cancel_requested.swap(true, Ordering::SeqCst);
        if first {
            // 세션은 이 시도 전용이라 다른 전송에 영향 없음
            self.session.cancel();
            self.token.cancel();
            self.session.log(&format!("전송 취소 요청: {}", self.id));
        }

        if self.busy.load(Ordering::SeqCst) {
            if first {
                let progress = self.stats.lock().current();
                self.emit(state, progress, Some("cancel requested".into()), true);
            }
            let now = self.state();
            if now.is_terminal() {
                return CancelStatus::AlreadyTerminal(now);
            }
            return CancelStatus::Pending;
        }

        if self.finish(TransferState::Cancelled, None) {
            CancelStatus::Cancelled
        } else {
            CancelStatus::AlreadyTerminal(self.state())
        }
    }

    /// 엔진 진행 상황 폴링 후 보고
    pub(crate) fn poll_progress(&self, client: &dyn EngineClient) {
        let state = self.state();
        if state.is_terminal() {
            return;
        }
        let (progress, eta) = {
            let mut stats = self.stats.lock();
            let progress = stats.record(client.progress());
            (progress, stats.eta())
        };
        debug!("[{}] progress {} eta {:?}", self.id, progress, eta);
        self.emit(state, progress, None, self.cancel_requested());
    }

    /// 백그라운드 작업 종료 표시
    ///
    /// 이후의 cancel 은 더 기다릴 작업이 없으므로 바로 확정된다.
    pub(crate) fn settle(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.settled_tx.send_replace(true);
    }
}

/// 엔진 호출을 진행률 폴링과 함께 실행
///
/// 호출이 반환할 때까지 `interval` 마다 `client.progress()` 를 보고한다.
pub(crate) async fn drive_engine_call<F>(
    shared: &TransferShared,
    client: &dyn EngineClient,
    interval: Duration,
    call: F,
) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::pin!(call);

    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = &mut call => return result,
            _ = ticker.tick() => shared.poll_progress(client),
        }
    }
}

/// 실행 중인 전송 핸들
#[derive(Clone)]
pub struct TransferHandle {
    pub(crate) shared: Arc<TransferShared>,
    pub(crate) settled: watch::Receiver<bool>,
}

impl TransferHandle {
    /// 전송 ID
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// 전송 코드
    pub fn code(&self) -> &str {
        &self.shared.code
    }

    /// 히스토리 기록 ID (기록 저장에 실패했으면 None)
    pub fn history_id(&self) -> Option<&str> {
        self.shared.history_id.as_deref()
    }

    pub fn state(&self) -> TransferState {
        self.shared.state()
    }

    pub fn progress(&self) -> Progress {
        self.shared.stats.lock().current()
    }

    /// 텍스트 송신 시 임시 파일 경로
    pub fn text_file(&self) -> Option<&Path> {
        self.shared.text_file.as_deref()
    }

    /// 취소
    pub fn cancel(&self) -> CancelStatus {
        self.shared.cancel()
    }

    /// 이 시도 전용 세션
    pub fn session(&self) -> &SessionManager {
        &self.shared.session
    }

    /// 취소 후 백그라운드 작업이 끝날 때까지 대기
    ///
    /// `Pending` 을 기다려서 `Cancelled` 또는 `AlreadyTerminal` 로 확정한다.
    pub async fn cancel_and_wait(&self) -> CancelStatus {
        match self.cancel() {
            CancelStatus::Pending => match self.wait().await {
                TransferState::Cancelled => CancelStatus::Cancelled,
                other => CancelStatus::AlreadyTerminal(other),
            },
            status => status,
        }
    }

    /// 백그라운드 작업이 끝날 때까지 대기 후 최종 상태 반환
    pub async fn wait(&self) -> TransferState {
        let mut settled = self.settled.clone();
        let _ = settled.wait_for(|done| *done).await;
        self.shared.state()
    }

    /// 백그라운드 작업 종료 여부
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("id", &self.shared.id)
            .field("direction", &self.shared.direction)
            .field("code", &self.shared.code)
            .field("state", &self.state())
            .finish()
    }
}

/// 엔진 에러를 동기 반환용으로 변환
pub(crate) fn as_configuration_error(error: Error) -> Error {
    match error {
        Error::Configuration(_) | Error::Validation(_) => error,
        other => Error::Configuration(other.to_string()),
    }
}
