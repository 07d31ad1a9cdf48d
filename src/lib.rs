//! # croclink
//!
//! 코드 기반 P2P 파일/텍스트 전송의 세션 및 전송 수명주기 관리
//!
//! ## 구성
//! - **SessionManager**: 취소 스코프 하나와 활성 엔진 클라이언트 하나를 소유
//! - **TransferOrchestrator**: 송신/수신 시도마다 상태 머신을 만들어 백그라운드로 실행
//! - **HistoryStore**: 최대 개수가 정해진 영속 전송 기록
//! - **TransferEngine**: 암호화 전송을 수행하는 외부 엔진 인터페이스
//!
//! 관찰자(`TransferObserver`)는 상태/진행률 변화를 백그라운드 태스크에서 받는다.

pub mod code;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod storage;
pub mod transfer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use code::{generate_code, normalize_code};
pub use config::{Config, TransferSettings};
pub use engine::{EngineClient, EngineOptions, EngineProgress, FilesInfo, Role, TransferEngine, TransferSummary};
pub use error::{Error, Result};
pub use history::{Direction, HistoryRecord, HistoryStats, HistoryStore, RecordStatus, StorageInfo};
pub use orchestrator::TransferOrchestrator;
pub use receiver::default_save_path;
pub use sender::SendPayload;
pub use session::SessionManager;
pub use stats::{format_size, Progress, TransferStats};
pub use storage::{HistoryBackend, JsonFileBackend, MemoryBackend};
pub use transfer::{
    CancelStatus, ChannelObserver, NoopObserver, TransferHandle, TransferObserver, TransferState,
    TransferUpdate,
};

/// 히스토리 최대 기록 수
pub const DEFAULT_MAX_RECORDS: usize = 500;

/// 진행률 폴링 주기 (밀리초)
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// 기본 릴레이 주소
pub const DEFAULT_RELAY_ADDRESS: &str = "croc.schollz.com";

/// 기본 릴레이 비밀번호
pub const DEFAULT_RELAY_PASSWORD: &str = "pass123";

/// 기본 릴레이 포트
pub const DEFAULT_RELAY_PORTS: &[&str] = &["9009", "9010", "9011", "9012", "9013"];
