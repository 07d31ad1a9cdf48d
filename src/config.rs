//! 설정
//!
//! 전송 옵션(릴레이, 로컬 전송, 압축, 해시/커브)과 히스토리/진행률 설정.
//! TOML 파일로 저장/로드할 수 있다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, DEFAULT_MAX_RECORDS, DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_RELAY_ADDRESS,
    DEFAULT_RELAY_PASSWORD, DEFAULT_RELAY_PORTS,
};

/// 엔진이 지원하는 해시 알고리즘
pub const HASH_ALGORITHMS: &[&str] = &["xxhash", "imohash", "md5", "highway"];

/// 엔진이 지원하는 PAKE 커브
pub const CURVES: &[&str] = &["p256", "p384", "p521", "siec"];

/// 전송 1회에 적용되는 엔진 옵션
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// 릴레이 주소
    pub relay_address: String,

    /// 릴레이 포트 목록
    pub relay_ports: Vec<String>,

    /// 릴레이 비밀번호
    pub relay_password: String,

    /// 로컬 네트워크 전송만 사용
    pub only_local: bool,

    /// 로컬 네트워크 전송 비활성화
    pub disable_local: bool,

    /// 폴더 자동 압축
    pub compress: bool,

    /// 해시 알고리즘 (`HASH_ALGORITHMS` 중 하나)
    pub hash_algorithm: String,

    /// PAKE 커브 (`CURVES` 중 하나)
    pub curve: String,

    /// 수신 시 기존 파일 덮어쓰기
    pub overwrite: bool,

    /// 송신 시 제외할 패턴
    pub exclude_patterns: Vec<String>,

    /// 엔진 디버그 로그
    pub debug: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            relay_address: DEFAULT_RELAY_ADDRESS.to_string(),
            relay_ports: DEFAULT_RELAY_PORTS.iter().map(|p| p.to_string()).collect(),
            relay_password: DEFAULT_RELAY_PASSWORD.to_string(),
            only_local: false,
            disable_local: false,
            compress: false,
            hash_algorithm: "xxhash".to_string(),
            curve: "p256".to_string(),
            overwrite: false,
            exclude_patterns: Vec::new(),
            debug: false,
        }
    }
}

impl TransferSettings {
    /// 옵션 검증
    ///
    /// 엔진에 넘기기 전에 걸러낼 수 있는 조합만 확인한다.
    pub fn validate(&self) -> Result<()> {
        if self.only_local && self.disable_local {
            return Err(Error::Configuration(
                "only_local 과 disable_local 은 동시에 켤 수 없음".into(),
            ));
        }
        if !self.only_local && self.relay_address.trim().is_empty() {
            return Err(Error::Configuration("릴레이 주소가 비어 있음".into()));
        }
        if !self.only_local && self.relay_ports.is_empty() {
            return Err(Error::Configuration("릴레이 포트가 비어 있음".into()));
        }
        for port in &self.relay_ports {
            if port.parse::<u16>().is_err() {
                return Err(Error::Configuration(format!("유효하지 않은 포트: {}", port)));
            }
        }
        if !HASH_ALGORITHMS.contains(&self.hash_algorithm.as_str()) {
            return Err(Error::Configuration(format!(
                "지원하지 않는 해시 알고리즘: {}",
                self.hash_algorithm
            )));
        }
        if !CURVES.contains(&self.curve.as_str()) {
            return Err(Error::Configuration(format!("지원하지 않는 커브: {}", self.curve)));
        }
        Ok(())
    }
}

/// Croclink 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 기본 전송 옵션
    pub transfer: TransferSettings,

    /// 진행률 폴링 주기 (밀리초)
    pub progress_interval_ms: u64,

    /// 히스토리 최대 기록 수
    pub history_max_records: usize,

    /// 히스토리 파일 경로 (None 이면 사용자 설정 디렉토리)
    pub history_path: Option<PathBuf>,

    /// 송신 기록에 남길 출처 라벨
    pub origin_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer: TransferSettings::default(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            history_max_records: DEFAULT_MAX_RECORDS,
            history_path: None,
            origin_label: "Croclink".to_string(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬 네트워크 전용 설정
    pub fn local_only() -> Self {
        let mut config = Self::default();
        config.transfer.only_local = true;
        config.transfer.disable_local = false;
        config
    }

    /// 릴레이 전용 설정 (로컬 탐색 없음)
    pub fn relay_only() -> Self {
        let mut config = Self::default();
        config.transfer.disable_local = true;
        config
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        self.transfer.validate()?;
        if self.progress_interval_ms == 0 {
            return Err(Error::Configuration("progress_interval_ms 는 0보다 커야 함".into()));
        }
        if self.history_max_records == 0 {
            return Err(Error::Configuration("history_max_records 는 0보다 커야 함".into()));
        }
        Ok(())
    }

    /// 히스토리 파일 경로
    pub fn history_file(&self) -> PathBuf {
        match &self.history_path {
            Some(path) => path.clone(),
            None => default_data_dir().join("history.json"),
        }
    }

    /// TOML 파일에서 로드
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 파일이 있으면 로드, 없으면 기본값
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// TOML 파일로 저장
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// 애플리케이션 데이터 디렉토리
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("croclink")
}

/// 기본 설정 파일 경로
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}
