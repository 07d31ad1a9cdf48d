//! 테스트용 인프로세스 엔진
//!
//! 네트워크 없이 전송 흐름을 재현한다. 결과, 지연, 취소 준수 여부,
//! 진행률 스크립트를 생성 전에 설정하면 이후 만들어지는 클라이언트에 적용된다.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    scan_paths, EngineClient, EngineOptions, EngineProgress, FilesInfo, TransferEngine,
    TransferSummary,
};
use crate::{Error, Result};

/// 전송 호출 결과
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    Succeed,
    /// `Error::Network` 로 실패
    Fail(String),
}

/// 클라이언트 동작 설정
#[derive(Debug, Clone)]
struct MockBehavior {
    outcome: MockOutcome,
    honor_cancel: bool,
    delay: Duration,
    /// 설정되면 release 될 때까지 전송 호출이 반환하지 않음
    gate: Option<CancellationToken>,
    progress_script: Vec<EngineProgress>,
    progress_step: Duration,
    summary: Option<TransferSummary>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            outcome: MockOutcome::Succeed,
            honor_cancel: true,
            delay: Duration::ZERO,
            gate: None,
            progress_script: Vec::new(),
            progress_step: Duration::from_millis(10),
            summary: None,
        }
    }
}

/// 모의 엔진
#[derive(Debug, Default)]
pub struct MockEngine {
    behavior: Mutex<MockBehavior>,
    reject_next: Mutex<Option<String>>,
    clients: Mutex<Vec<Arc<MockClient>>>,
    next_client_id: AtomicU64,
    started: Arc<Notify>,
    /// 메타데이터 수집 지연 (취소 토큰을 받지 않음)
    scan_delay: Mutex<Duration>,
    scan_started: Notify,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 생성 1회를 `Error::Configuration` 으로 거부
    pub fn reject_next_create(&self, reason: &str) {
        *self.reject_next.lock() = Some(reason.to_string());
    }

    /// 전송 호출 결과 설정
    pub fn set_outcome(&self, outcome: MockOutcome) {
        self.behavior.lock().outcome = outcome;
    }

    /// 전송 호출이 취소 토큰을 무시하도록
    pub fn ignore_cancellation(&self) {
        self.behavior.lock().honor_cancel = false;
    }

    /// 전송 호출 지연
    pub fn set_delay(&self, delay: Duration) {
        self.behavior.lock().delay = delay;
    }

    /// `release()` 전까지 전송 호출을 붙잡아 둠
    pub fn hold_transfers(&self) {
        self.behavior.lock().gate = Some(CancellationToken::new());
    }

    /// 붙잡아 둔 전송 호출 해제
    pub fn release(&self) {
        if let Some(gate) = self.behavior.lock().gate.as_ref() {
            gate.cancel();
        }
    }

    /// 전송 중 순서대로 보고할 진행 상황
    pub fn script_progress(&self, script: Vec<EngineProgress>, step: Duration) {
        let mut behavior = self.behavior.lock();
        behavior.progress_script = script;
        behavior.progress_step = step;
    }

    /// 수신 완료 후 보고할 요약
    pub fn set_summary(&self, summary: TransferSummary) {
        self.behavior.lock().summary = Some(summary);
    }

    /// 생성된 클라이언트 수
    pub fn created_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// 마지막으로 생성된 클라이언트
    pub fn last_client(&self) -> Option<Arc<MockClient>> {
        self.clients.lock().last().cloned()
    }

    /// 전송 호출이 시작될 때까지 대기
    pub async fn transfer_started(&self) {
        self.started.notified().await;
    }

    /// `files_info` 지연
    pub fn set_scan_delay(&self, delay: Duration) {
        *self.scan_delay.lock() = delay;
    }

    /// `files_info` 호출이 시작될 때까지 대기
    pub async fn scan_started(&self) {
        self.scan_started.notified().await;
    }
}

#[async_trait]
impl TransferEngine for MockEngine {
    async fn create(&self, options: EngineOptions) -> Result<Arc<dyn EngineClient>> {
        if let Some(reason) = self.reject_next.lock().take() {
            return Err(Error::Configuration(reason));
        }

        let client = Arc::new(MockClient {
            id: self.next_client_id.fetch_add(1, Ordering::SeqCst),
            options,
            behavior: self.behavior.lock().clone(),
            progress: Mutex::new(None),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(None),
            cancel_seen: Mutex::new(false),
            started: self.started.clone(),
        });
        self.clients.lock().push(client.clone());
        Ok(client)
    }

    async fn files_info(
        &self,
        paths: &[PathBuf],
        compress: bool,
        recurse: bool,
        exclude: &[String],
    ) -> Result<FilesInfo> {
        self.scan_started.notify_one();
        let delay = *self.scan_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        scan_paths(paths, compress, recurse, exclude)
    }
}

/// 모의 클라이언트
#[derive(Debug)]
pub struct MockClient {
    id: u64,
    options: EngineOptions,
    behavior: MockBehavior,
    progress: Mutex<Option<EngineProgress>>,
    calls: AtomicUsize,
    sent: Mutex<Option<FilesInfo>>,
    cancel_seen: Mutex<bool>,
    started: Arc<Notify>,
}

impl MockClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// send/receive 호출 횟수
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 마지막 send 에 전달된 메타데이터
    pub fn sent_files(&self) -> Option<FilesInfo> {
        self.sent.lock().clone()
    }

    /// 호출이 취소 신호를 보고 반환했는지
    pub fn saw_cancel(&self) -> bool {
        *self.cancel_seen.lock()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        for step in &self.behavior.progress_script {
            *self.progress.lock() = Some(*step);
            self.pause(self.behavior.progress_step, &cancel).await?;
        }

        self.pause(self.behavior.delay, &cancel).await?;

        match &self.behavior.outcome {
            MockOutcome::Succeed => Ok(()),
            MockOutcome::Fail(reason) => Err(Error::Network(reason.clone())),
        }
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        let wait = async {
            if !duration.is_zero() {
                tokio::time::sleep(duration).await;
            }
            if let Some(gate) = &self.behavior.gate {
                gate.cancelled().await;
            }
        };

        if !self.behavior.honor_cancel {
            wait.await;
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                *self.cancel_seen.lock() = true;
                Err(Error::Cancelled)
            }
            _ = wait => Ok(()),
        }
    }
}

#[async_trait]
impl EngineClient for MockClient {
    fn options(&self) -> &EngineOptions {
        &self.options
    }

    async fn send(&self, files: &FilesInfo, cancel: CancellationToken) -> Result<()> {
        *self.sent.lock() = Some(files.clone());
        self.run(cancel).await
    }

    async fn receive(&self, cancel: CancellationToken) -> Result<()> {
        self.run(cancel).await
    }

    fn progress(&self) -> Option<EngineProgress> {
        *self.progress.lock()
    }

    fn summary(&self) -> Option<TransferSummary> {
        if self.calls() == 0 {
            return None;
        }
        self.behavior.summary.clone()
    }
}
