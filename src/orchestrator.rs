//! 전송 오케스트레이터
//!
//! 송신/수신 시도마다 새 상태 머신과 전용 세션을 만들고 백그라운드 태스크로 돌린다.
//! 시도마다 취소 스코프가 따로라서 한 전송을 취소해도 다른 전송은 그대로 간다.
//! 검증/설정 에러는 동기로 반환하고, 전송 중 에러는 관찰자와 기록 상태로만 알린다.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::code::{generate_code, normalize_code};
use crate::config::{Config, TransferSettings};
use crate::engine::{EngineOptions, TransferEngine};
use crate::history::{Direction, HistoryRecord, HistoryStore, RecordStatus};
use crate::receiver::{
    prepare_save_dir, run_receive, ReceiveJob, PLACEHOLDER_NAME, PLACEHOLDER_SIZE, RECEIVER_ORIGIN,
};
use crate::sender::{prepare_payload, run_send, SendJob, SendPayload};
use crate::session::SessionManager;
use crate::transfer::{
    as_configuration_error, CancelStatus, TransferHandle, TransferObserver, TransferParts,
    TransferShared, TransferState,
};
use crate::Result;

/// 전송 오케스트레이터
pub struct TransferOrchestrator {
    config: Config,
    engine: Arc<dyn TransferEngine>,
    history: Arc<HistoryStore>,

    /// 실행 중인 전송
    active: Arc<DashMap<String, TransferHandle>>,

    next_transfer_id: AtomicU64,
}

impl TransferOrchestrator {
    pub fn new(
        config: Config,
        engine: Arc<dyn TransferEngine>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            config,
            engine,
            history,
            active: Arc::new(DashMap::new()),
            next_transfer_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.config.progress_interval_ms)
    }

    fn next_id(&self) -> String {
        format!("transfer_{}", self.next_transfer_id.fetch_add(1, Ordering::SeqCst))
    }

    /// 기록 추가 (실패하면 기록 없이 진행)
    fn add_record(&self, record: HistoryRecord) -> Option<String> {
        match self.history.add(record) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("히스토리 기록 실패, 기록 없이 진행: {}", e);
                None
            }
        }
    }

    fn new_session(&self) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(self.engine.clone()))
    }

    fn mark_failed(&self, history_id: Option<&str>) {
        if let Some(id) = history_id {
            if let Err(e) = self.history.finish(id, RecordStatus::Failed, 0) {
                warn!("기록 실패 처리 불가 {}: {}", id, e);
            }
        }
    }

    /// 송신 시작
    ///
    /// 검증 실패는 `Error::Validation` (부작용 없음), 엔진이 옵션을 거부하면
    /// 기록을 failed 로 남기고 `Error::Configuration`.
    pub async fn start_send(
        &self,
        payload: SendPayload,
        settings: &TransferSettings,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferHandle> {
        let started_at = Instant::now();
        payload.validate()?;
        settings.validate()?;

        let code = generate_code();
        let prepared = prepare_payload(&payload)?;

        let history_id = self.add_record(HistoryRecord::new(
            Direction::Send,
            prepared.label.name.clone(),
            prepared.label.size.clone(),
            code.clone(),
            self.config.origin_label.clone(),
            prepared.label.count,
        ));

        let session = self.new_session();
        let options = EngineOptions::sender(&code, settings);
        let client = match session.create_client(options).await {
            Ok(client) => client,
            Err(e) => {
                prepared.cleanup();
                self.mark_failed(history_id.as_deref());
                return Err(as_configuration_error(e));
            }
        };

        let id = self.next_id();
        let (shared, settled) = TransferShared::new(TransferParts {
            id: id.clone(),
            direction: Direction::Send,
            code: code.clone(),
            history_id,
            initial: TransferState::Preparing,
            started_at,
            session: session.clone(),
            history: self.history.clone(),
            observer,
            text_file: prepared.text_path(),
        });
        let handle = TransferHandle {
            shared: shared.clone(),
            settled,
        };

        info!("[{}] 송신 시작: {} ({}), code={}", id, prepared.label.name, prepared.label.size, code);
        shared.announce(Some(format!("code: {}", code)));

        self.active.insert(id.clone(), handle.clone());
        let active = self.active.clone();
        let job = SendJob {
            shared: shared.clone(),
            engine: self.engine.clone(),
            client,
            payload: prepared,
            settings: settings.clone(),
            progress_interval: self.progress_interval(),
        };

        tokio::spawn(async move {
            run_send(job).await;
            session.close();
            active.remove(&id);
            shared.settle();
        });

        Ok(handle)
    }

    /// 기본 설정으로 송신
    pub async fn send(
        &self,
        payload: SendPayload,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferHandle> {
        let settings = self.config.transfer.clone();
        self.start_send(payload, &settings, observer).await
    }

    /// 수신 시작
    ///
    /// `save_path` 가 None 이면 `default_save_path()`.
    pub async fn start_receive(
        &self,
        code: &str,
        save_path: Option<PathBuf>,
        settings: &TransferSettings,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferHandle> {
        let started_at = Instant::now();
        let code = normalize_code(code)?;
        settings.validate()?;
        let save_dir = prepare_save_dir(save_path)?;

        let history_id = self.add_record(HistoryRecord::new(
            Direction::Receive,
            PLACEHOLDER_NAME,
            PLACEHOLDER_SIZE,
            code.clone(),
            RECEIVER_ORIGIN,
            0,
        ));

        let session = self.new_session();
        let options = EngineOptions::receiver(&code, save_dir.clone(), settings);
        let client = match session.create_client(options).await {
            Ok(client) => client,
            Err(e) => {
                self.mark_failed(history_id.as_deref());
                return Err(as_configuration_error(e));
            }
        };

        let id = self.next_id();
        let (shared, settled) = TransferShared::new(TransferParts {
            id: id.clone(),
            direction: Direction::Receive,
            code: code.clone(),
            history_id,
            initial: TransferState::Connecting,
            started_at,
            session: session.clone(),
            history: self.history.clone(),
            observer,
            text_file: None,
        });
        let handle = TransferHandle {
            shared: shared.clone(),
            settled,
        };

        info!("[{}] 수신 시작: code={}, save_dir={}", id, code, save_dir.display());
        shared.announce(Some("connecting to sender".into()));

        self.active.insert(id.clone(), handle.clone());
        let active = self.active.clone();
        let job = ReceiveJob {
            shared: shared.clone(),
            client,
            progress_interval: self.progress_interval(),
        };

        tokio::spawn(async move {
            run_receive(job).await;
            session.close();
            active.remove(&id);
            shared.settle();
        });

        Ok(handle)
    }

    /// 기본 설정으로 수신
    pub async fn receive(
        &self,
        code: &str,
        save_path: Option<PathBuf>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferHandle> {
        let settings = self.config.transfer.clone();
        self.start_receive(code, save_path, &settings, observer).await
    }

    /// 실행 중인 전송 조회
    pub fn get(&self, transfer_id: &str) -> Option<TransferHandle> {
        self.active.get(transfer_id).map(|entry| entry.value().clone())
    }

    /// 실행 중인 전송 목록
    pub fn active_transfers(&self) -> Vec<TransferHandle> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 실행 중인 전송 모두 취소
    pub fn cancel_all(&self) -> Vec<(String, CancelStatus)> {
        let handles = self.active_transfers();
        if !handles.is_empty() {
            info!("전송 {}건 취소", handles.len());
        }
        handles
            .into_iter()
            .map(|handle| (handle.id().to_string(), handle.cancel()))
            .collect()
    }

    /// 모든 전송 취소 후 백그라운드 작업이 끝날 때까지 대기
    pub async fn shutdown(&self) {
        let handles = self.active_transfers();
        self.cancel_all();
        for handle in handles {
            handle.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineClient, EngineProgress, TransferSummary};
    use crate::stats::Progress;
    use crate::storage::MemoryBackend;
    use crate::testing::{MockEngine, MockOutcome};
    use crate::transfer::{ChannelObserver, NoopObserver, TransferUpdate};
    use crate::Error;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: Arc<MockEngine>,
        backend: Arc<MemoryBackend>,
        orchestrator: TransferOrchestrator,
        dir: tempfile::TempDir,
        save_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let mut config = Config::default();
        config.progress_interval_ms = 5;

        let engine = Arc::new(MockEngine::new());
        let backend = Arc::new(MemoryBackend::new());
        let history = Arc::new(HistoryStore::open(backend.clone(), 50));
        let orchestrator = TransferOrchestrator::new(config, engine.clone(), history);

        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("incoming");

        Fixture {
            engine,
            backend,
            orchestrator,
            dir,
            save_dir,
        }
    }

    fn sample_file(fx: &Fixture, name: &str, len: usize) -> PathBuf {
        let path = fx.dir.path().join(name);
        std::fs::write(&path, vec![7u8; len]).unwrap();
        path
    }

    fn drain(rx: &mut UnboundedReceiver<TransferUpdate>) -> Vec<TransferUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn states(updates: &[TransferUpdate]) -> Vec<TransferState> {
        let mut seen: Vec<TransferState> = Vec::new();
        for u in updates {
            if seen.last() != Some(&u.state) {
                seen.push(u.state);
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_send_without_payload_creates_no_record() {
        let fx = fixture();
        let result = fx
            .orchestrator
            .send(SendPayload::Files(Vec::new()), Arc::new(NoopObserver))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let result = fx
            .orchestrator
            .send(SendPayload::Text("   ".into()), Arc::new(NoopObserver))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        assert!(fx.orchestrator.history().is_empty());
        assert_eq!(fx.engine.created_count(), 0);
    }

    #[tokio::test]
    async fn test_receive_empty_code() {
        let fx = fixture();
        let result = fx
            .orchestrator
            .receive("", Some(fx.save_dir.clone()), Arc::new(NoopObserver))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let result = fx
            .orchestrator
            .receive(" \t ", Some(fx.save_dir.clone()), Arc::new(NoopObserver))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(fx.orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_send_file_completes() {
        let fx = fixture();
        let file = sample_file(&fx, "report.pdf", 2048);
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .send(SendPayload::Files(vec![file]), Arc::new(observer))
            .await
            .unwrap();

        assert_eq!(handle.code().split('-').count(), 3);
        assert_eq!(handle.wait().await, TransferState::Completed);

        let updates = drain(&mut rx);
        assert_eq!(
            states(&updates),
            vec![
                TransferState::Preparing,
                TransferState::Waiting,
                TransferState::Sending,
                TransferState::Completed
            ]
        );
        assert_eq!(updates.last().unwrap().progress, Progress::Determinate(1.0));

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.file_name, "report.pdf");
        assert_eq!(record.file_size, "2.0 KB");
        assert_eq!(record.code, handle.code());
        assert_eq!(record.direction, Direction::Send);

        let sent = fx.engine.last_client().unwrap().sent_files().unwrap();
        assert_eq!(sent.total_size(), 2048);
        assert!(fx.orchestrator.active_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_send_uses_sender_options() {
        let fx = fixture();
        let mut settings = TransferSettings::default();
        settings.compress = true;
        settings.curve = "p384".into();

        let handle = fx
            .orchestrator
            .start_send(SendPayload::Text("hi".into()), &settings, Arc::new(NoopObserver))
            .await
            .unwrap();
        handle.wait().await;

        let client = fx.engine.last_client().unwrap();
        let options = client.options();
        assert!(options.is_sender());
        assert!(options.no_prompt);
        assert!(options.compress);
        assert_eq!(options.curve, "p384");
        assert_eq!(options.shared_secret, handle.code());
    }

    #[tokio::test]
    async fn test_text_temp_file_removed_after_success() {
        let fx = fixture();
        let handle = fx
            .orchestrator
            .send(SendPayload::Text("secret note".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        let path = handle.text_file().unwrap().to_path_buf();

        assert_eq!(handle.wait().await, TransferState::Completed);
        assert!(!path.exists());

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.file_name, "text");
        assert_eq!(record.file_count, 1);
    }

    #[tokio::test]
    async fn test_text_temp_file_removed_after_failure() {
        let fx = fixture();
        fx.engine.set_outcome(MockOutcome::Fail("relay unreachable".into()));
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .send(SendPayload::Text("note".into()), Arc::new(observer))
            .await
            .unwrap();
        let path = handle.text_file().unwrap().to_path_buf();

        assert_eq!(handle.wait().await, TransferState::Failed);
        assert!(!path.exists());

        let last = drain(&mut rx).pop().unwrap();
        assert_eq!(last.state, TransferState::Failed);
        assert!(last.message.unwrap().contains("relay unreachable"));

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn test_text_temp_file_removed_after_cancel() {
        let fx = fixture();
        fx.engine.hold_transfers();

        let handle = fx
            .orchestrator
            .send(SendPayload::Text("note".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        let path = handle.text_file().unwrap().to_path_buf();
        fx.engine.transfer_started().await;

        handle.cancel();
        assert_eq!(handle.wait().await, TransferState::Cancelled);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_create_rejection_marks_record_failed() {
        let fx = fixture();
        fx.engine.reject_next_create("unsupported curve");
        let file = sample_file(&fx, "a.bin", 10);

        let result = fx
            .orchestrator
            .send(SendPayload::Files(vec![file]), Arc::new(NoopObserver))
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));

        let records = fx.orchestrator.history().get_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Failed);
        assert!(fx.orchestrator.active_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejection_removes_text_file() {
        let fx = fixture();
        fx.engine.reject_next_create("unsupported curve");
        let marker = generate_code();

        let result = fx
            .orchestrator
            .send(SendPayload::Text(marker.clone()), Arc::new(NoopObserver))
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));

        let leftover = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(crate::sender::TEXT_FILE_PREFIX)
            })
            .any(|entry| std::fs::read_to_string(entry.path()).ok().as_deref() == Some(marker.as_str()));
        assert!(!leftover);

        let records = fx.orchestrator.history().get_all();
        assert_eq!(records[0].status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_during_metadata_scan_is_pending() {
        let fx = fixture();
        fx.engine.set_scan_delay(Duration::from_millis(200));

        let text_path: Arc<parking_lot::Mutex<Option<PathBuf>>> = Arc::default();
        let file_at_terminal: Arc<parking_lot::Mutex<Option<bool>>> = Arc::default();
        let observer = {
            let text_path = text_path.clone();
            let file_at_terminal = file_at_terminal.clone();
            move |update: &TransferUpdate| {
                if update.state.is_terminal() {
                    let exists = text_path.lock().as_ref().map(|p| p.exists());
                    *file_at_terminal.lock() = exists;
                }
            }
        };

        let handle = fx
            .orchestrator
            .send(SendPayload::Text("scan me".into()), Arc::new(observer))
            .await
            .unwrap();
        let path = handle.text_file().unwrap().to_path_buf();
        *text_path.lock() = Some(path.clone());
        fx.engine.scan_started().await;

        assert_eq!(handle.cancel(), CancelStatus::Pending);
        assert!(!handle.state().is_terminal());
        assert!(!handle.is_settled());
        assert!(path.exists());

        assert_eq!(handle.wait().await, TransferState::Cancelled);
        assert!(!path.exists());
        assert_eq!(*file_at_terminal.lock(), Some(false));
        assert_eq!(fx.engine.last_client().unwrap().calls(), 0);

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_leaves_concurrent_transfer_running() {
        let fx = fixture();
        fx.engine.hold_transfers();

        let first = fx
            .orchestrator
            .send(SendPayload::Text("first".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        fx.engine.transfer_started().await;

        let second = fx
            .orchestrator
            .send(SendPayload::Text("second".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        fx.engine.transfer_started().await;

        assert_eq!(first.cancel_and_wait().await, CancelStatus::Cancelled);
        assert!(!second.session().is_cancelled());
        assert_eq!(second.state(), TransferState::Sending);

        fx.engine.release();
        assert_eq!(second.wait().await, TransferState::Completed);

        let history = fx.orchestrator.history();
        assert_eq!(
            history.get(first.history_id().unwrap()).unwrap().status,
            RecordStatus::Cancelled
        );
        assert_eq!(
            history.get(second.history_id().unwrap()).unwrap().status,
            RecordStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_transfers() {
        let fx = fixture();
        fx.engine.hold_transfers();

        let handle = fx
            .orchestrator
            .receive("calmriver-boldlamp-1234", Some(fx.save_dir.clone()), Arc::new(NoopObserver))
            .await
            .unwrap();
        fx.engine.transfer_started().await;

        fx.orchestrator.shutdown().await;
        assert!(handle.is_settled());
        assert_eq!(handle.state(), TransferState::Cancelled);
        assert!(handle.session().client().is_none());
        assert!(fx.orchestrator.active_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_double_cancel_is_cancelled_once() {
        let fx = fixture();
        fx.engine.hold_transfers();
        let file = sample_file(&fx, "big.iso", 4096);
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .send(SendPayload::Files(vec![file]), Arc::new(observer))
            .await
            .unwrap();
        fx.engine.transfer_started().await;

        let first = handle.cancel();
        let second = handle.cancel();
        assert_ne!(first, CancelStatus::AlreadyTerminal(TransferState::Completed));
        assert!(matches!(
            second,
            CancelStatus::Pending | CancelStatus::AlreadyTerminal(TransferState::Cancelled)
        ));

        assert_eq!(handle.wait().await, TransferState::Cancelled);
        assert_eq!(
            handle.cancel(),
            CancelStatus::AlreadyTerminal(TransferState::Cancelled)
        );

        let updates = drain(&mut rx);
        let cancelled = updates
            .iter()
            .filter(|u| u.state == TransferState::Cancelled)
            .count();
        assert_eq!(cancelled, 1);

        let records = fx.orchestrator.history().get_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Cancelled);
        assert_eq!(fx.orchestrator.history().stats().cancelled, 1);
        assert!(fx.engine.last_client().unwrap().saw_cancel());
    }

    #[tokio::test]
    async fn test_cancel_pending_until_engine_returns() {
        let fx = fixture();
        fx.engine.hold_transfers();
        fx.engine.ignore_cancellation();
        let file = sample_file(&fx, "a.bin", 10);
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .send(SendPayload::Files(vec![file]), Arc::new(observer))
            .await
            .unwrap();
        fx.engine.transfer_started().await;

        assert_eq!(handle.cancel(), CancelStatus::Pending);
        assert_eq!(handle.state(), TransferState::Sending);
        assert!(handle.session().is_cancelled());

        let pending: Vec<_> = drain(&mut rx).into_iter().filter(|u| u.cancel_pending).collect();
        assert!(!pending.is_empty());
        assert!(pending.iter().all(|u| !u.state.is_terminal()));

        // 엔진이 성공으로 반환해도 결과는 취소
        fx.engine.release();
        assert_eq!(handle.wait().await, TransferState::Cancelled);
        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let fx = fixture();
        fx.engine.script_progress(
            vec![
                EngineProgress { transferred: 20, total: 100 },
                EngineProgress { transferred: 50, total: 100 },
                EngineProgress { transferred: 30, total: 100 },
                EngineProgress { transferred: 90, total: 100 },
            ],
            Duration::from_millis(20),
        );
        let file = sample_file(&fx, "a.bin", 100);
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .send(SendPayload::Files(vec![file]), Arc::new(observer))
            .await
            .unwrap();
        assert_eq!(handle.wait().await, TransferState::Completed);

        let fractions: Vec<f64> = drain(&mut rx)
            .iter()
            .filter_map(|u| u.progress.fraction())
            .collect();
        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_silent_engine_reports_indeterminate() {
        let fx = fixture();
        fx.engine.set_delay(Duration::from_millis(40));
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .receive("calmriver-boldlamp-1234", Some(fx.save_dir.clone()), Arc::new(observer))
            .await
            .unwrap();
        assert_eq!(handle.wait().await, TransferState::Completed);

        let updates = drain(&mut rx);
        let (last, rest) = updates.split_last().unwrap();
        assert_eq!(last.progress, Progress::Determinate(1.0));
        assert!(rest.iter().all(|u| u.progress == Progress::Indeterminate));
    }

    #[tokio::test]
    async fn test_receive_refines_placeholder_record() {
        let fx = fixture();
        fx.engine.set_summary(TransferSummary {
            primary_name: "photos.zip".into(),
            total_size: 3 * 1024 * 1024,
            file_count: 12,
        });
        let (observer, mut rx) = ChannelObserver::new();

        let handle = fx
            .orchestrator
            .receive("  calmriver-boldlamp-1234\n", Some(fx.save_dir.clone()), Arc::new(observer))
            .await
            .unwrap();
        assert_eq!(handle.code(), "calmriver-boldlamp-1234");

        let placeholder = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(placeholder.direction, Direction::Receive);

        assert_eq!(handle.wait().await, TransferState::Completed);
        assert_eq!(
            states(&drain(&mut rx)),
            vec![TransferState::Connecting, TransferState::Receiving, TransferState::Completed]
        );

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.file_name, "photos.zip");
        assert_eq!(record.file_size, "3.0 MB");
        assert_eq!(record.file_count, 12);

        let options = fx.engine.last_client().unwrap().options().clone();
        assert!(!options.is_sender());
        assert_eq!(options.save_dir.as_deref(), Some(fx.save_dir.as_path()));
        assert!(fx.save_dir.is_dir());
    }

    #[tokio::test]
    async fn test_receive_keeps_placeholder_without_summary() {
        let fx = fixture();
        let handle = fx
            .orchestrator
            .receive("calmriver-boldlamp-1234", Some(fx.save_dir.clone()), Arc::new(NoopObserver))
            .await
            .unwrap();
        assert_eq!(handle.wait().await, TransferState::Completed);

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.file_name, PLACEHOLDER_NAME);
        assert_eq!(record.file_size, PLACEHOLDER_SIZE);
        assert_eq!(record.origin, RECEIVER_ORIGIN);
    }

    #[tokio::test]
    async fn test_receive_failure() {
        let fx = fixture();
        fx.engine.set_outcome(MockOutcome::Fail("room not ready".into()));

        let handle = fx
            .orchestrator
            .receive("calmriver-boldlamp-1234", Some(fx.save_dir.clone()), Arc::new(NoopObserver))
            .await
            .unwrap();
        assert_eq!(handle.wait().await, TransferState::Failed);

        let record = fx.orchestrator.history().get(handle.history_id().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_block_transfer() {
        let fx = fixture();
        fx.backend.set_fail_writes(true);

        let handle = fx
            .orchestrator
            .send(SendPayload::Text("note".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        assert!(handle.history_id().is_none());
        assert_eq!(handle.wait().await, TransferState::Completed);
        assert!(fx.orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let fx = fixture();
        fx.engine.hold_transfers();

        let handle = fx
            .orchestrator
            .receive("calmriver-boldlamp-1234", Some(fx.save_dir.clone()), Arc::new(NoopObserver))
            .await
            .unwrap();
        fx.engine.transfer_started().await;
        assert!(fx.orchestrator.get(handle.id()).is_some());

        let results = fx.orchestrator.cancel_all();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, handle.id());

        assert_eq!(handle.wait().await, TransferState::Cancelled);
        assert!(fx.orchestrator.active_transfers().is_empty());
        assert!(fx.orchestrator.cancel_all().is_empty());
    }

    #[tokio::test]
    async fn test_session_reusable_after_cancel() {
        let fx = fixture();
        fx.engine.hold_transfers();

        let first = fx
            .orchestrator
            .send(SendPayload::Text("one".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        fx.engine.transfer_started().await;
        first.cancel();
        assert_eq!(first.wait().await, TransferState::Cancelled);

        fx.engine.release();
        let second = fx
            .orchestrator
            .send(SendPayload::Text("two".into()), Arc::new(NoopObserver))
            .await
            .unwrap();
        assert_eq!(second.wait().await, TransferState::Completed);
        assert_ne!(first.code(), second.code());
    }
}
