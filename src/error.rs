//! 에러 타입 정의

use thiserror::Error;

/// Croclink 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("입력 값 오류: {0}")]
    Validation(String),

    #[error("엔진 설정 거부: {0}")]
    Configuration(String),

    #[error("네트워크 에러: {0}")]
    Network(String),

    #[error("저장소 에러: {0}")]
    Storage(String),

    #[error("기록 없음: id={id}")]
    NotFound { id: String },

    #[error("파싱 에러: {0}")]
    Parse(String),

    #[error("사용자에 의해 취소됨")]
    Cancelled,

    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("설정 파일 파싱 에러: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("설정 파일 직렬화 에러: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// 사용자 취소로 인한 결과인지
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
