//! 세션 관리자
//!
//! - 취소 스코프(`CancellationToken`) 하나와 활성 엔진 클라이언트 하나를 소유
//! - 클라이언트 생성은 비동기 뮤텍스로 직렬화, 핸들 슬롯은 락으로 보호
//! - cancel/close 는 멱등, 블로킹 없음

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{EngineClient, EngineOptions, TransferEngine};
use crate::Result;

/// 전송 세션
pub struct SessionManager {
    /// 전송 엔진
    engine: Arc<dyn TransferEngine>,

    /// 현재 취소 스코프
    token: RwLock<CancellationToken>,

    /// 활성 클라이언트 핸들
    client: RwLock<Option<Arc<dyn EngineClient>>>,

    /// 클라이언트 생성 직렬화
    create_lock: tokio::sync::Mutex<()>,

    /// 성공한 생성 횟수
    generation: AtomicU64,
}

impl SessionManager {
    /// 새 세션 (클라이언트 없음)
    pub fn new(engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            engine,
            token: RwLock::new(CancellationToken::new()),
            client: RwLock::new(None),
            create_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// 엔진 클라이언트 생성
    ///
    /// 성공하면 이전 핸들을 교체한다. 실패하면 이전 핸들은 그대로 두고
    /// 엔진 에러를 반환한다. 스코프가 이미 취소된 상태였다면 새 스코프로 교체한다.
    pub async fn create_client(&self, options: EngineOptions) -> Result<Arc<dyn EngineClient>> {
        let _guard = self.create_lock.lock().await;

        let role = options.role;
        let client = match self.engine.create(options).await {
            Ok(client) => client,
            Err(e) => {
                warn!("클라이언트 생성 실패 ({:?}): {}", role, e);
                return Err(e);
            }
        };

        {
            let mut token = self.token.write();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }

        *self.client.write() = Some(client.clone());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!("엔진 클라이언트 생성: role={:?}, generation={}", role, generation);
        Ok(client)
    }

    /// 활성 클라이언트 (생성 전이거나 close 이후면 None)
    pub fn client(&self) -> Option<Arc<dyn EngineClient>> {
        self.client.read().clone()
    }

    /// 현재 취소 스코프
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.read().clone()
    }

    /// 취소 여부
    pub fn is_cancelled(&self) -> bool {
        self.token.read().is_cancelled()
    }

    /// 취소 신호 (멱등)
    pub fn cancel(&self) {
        let token = self.token.read();
        if !token.is_cancelled() {
            token.cancel();
            info!("세션 취소");
        }
    }

    /// 취소 후 핸들 정리 (멱등)
    pub fn close(&self) {
        self.cancel();
        if self.client.write().take().is_some() {
            info!("세션 종료: 클라이언트 해제");
        }
    }

    /// 성공한 클라이언트 생성 횟수
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 진단 로그
    pub fn log(&self, message: &str) {
        info!(target: "croclink::session", "{}", message);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.token.get_mut().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferSettings;
    use crate::testing::MockEngine;
    use crate::Error;
    use std::collections::HashSet;

    fn options() -> EngineOptions {
        EngineOptions::sender("calmriver-boldlamp-1234", &TransferSettings::default())
    }

    #[tokio::test]
    async fn test_new_session_has_no_client() {
        let session = SessionManager::new(Arc::new(MockEngine::new()));
        assert!(session.client().is_none());
        assert!(!session.is_cancelled());
        assert_eq!(session.generation(), 0);
    }

    #[tokio::test]
    async fn test_create_replaces_previous_client() {
        let engine = Arc::new(MockEngine::new());
        let session = SessionManager::new(engine.clone());

        let first = session.create_client(options()).await.unwrap();
        let second = session.create_client(options()).await.unwrap();

        let current = session.client().unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
        assert_eq!(session.generation(), 2);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_previous_client() {
        let engine = Arc::new(MockEngine::new());
        let session = SessionManager::new(engine.clone());

        let first = session.create_client(options()).await.unwrap();

        engine.reject_next_create("unsupported curve");
        let result = session.create_client(options()).await;
        assert!(matches!(result, Err(Error::Configuration(_))));

        assert!(Arc::ptr_eq(&session.client().unwrap(), &first));
        assert_eq!(session.generation(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = SessionManager::new(Arc::new(MockEngine::new()));
        session.create_client(options()).await.unwrap();
        let token = session.cancellation_token();

        session.close();
        assert!(token.is_cancelled());
        assert!(session.is_cancelled());
        assert!(session.client().is_none());

        session.close();
        session.close();
        session.cancel();
        assert!(session.client().is_none());
    }

    #[tokio::test]
    async fn test_session_reusable_after_close() {
        let session = SessionManager::new(Arc::new(MockEngine::new()));
        session.create_client(options()).await.unwrap();
        session.close();

        session.create_client(options()).await.unwrap();
        assert!(session.client().is_some());
        assert!(!session.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_create_leaves_one_handle() {
        let engine = Arc::new(MockEngine::new());
        let session = Arc::new(SessionManager::new(engine.clone()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                session.create_client(options()).await.unwrap()
            }));
        }

        let mut created = Vec::new();
        for task in tasks {
            created.push(task.await.unwrap());
        }

        let current = session.client().unwrap();
        let matches = created.iter().filter(|c| Arc::ptr_eq(c, &current)).count();
        assert_eq!(matches, 1);
        assert_eq!(session.generation(), 16);

        let ids: HashSet<_> = created.iter().map(|c| Arc::as_ptr(c) as *const () as usize).collect();
        assert_eq!(ids.len(), 16);

        // 다음 쓰기 전까지 안정적
        assert!(Arc::ptr_eq(&session.client().unwrap(), &current));
    }

    #[test]
    fn test_log_does_not_panic() {
        let session = SessionManager::new(Arc::new(MockEngine::new()));
        session.log("");
        session.log("전송 시작");
    }
}
