//! 전송 엔진 인터페이스
//!
//! 실제 암호화 전송(PAKE 핸드셰이크, 릴레이 프로토콜)은 외부 엔진이 담당한다.
//! 이 모듈은 엔진을 호출하는 쪽에서 필요한 표면만 정의한다.
//!
//! - `TransferEngine::create`: 옵션으로 클라이언트 생성
//! - `EngineClient::send` / `receive`: 전송 전체 동안 블로킹되는 호출
//! - `TransferEngine::files_info`: 송신 페이로드 메타데이터 수집

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TransferSettings;
use crate::{Error, Result};

/// 엔진 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

/// 엔진 생성 옵션
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub role: Role,
    pub shared_secret: String,
    pub relay_address: String,
    pub relay_ports: Vec<String>,
    pub relay_password: String,
    pub only_local: bool,
    pub disable_local: bool,
    pub compress: bool,
    pub hash_algorithm: String,
    pub curve: String,
    pub overwrite: bool,
    pub exclude_patterns: Vec<String>,
    pub debug: bool,
    /// 확인 프롬프트 생략 (항상 true 로 생성됨)
    pub no_prompt: bool,
    /// 수신 파일 저장 디렉토리 (수신자만)
    pub save_dir: Option<PathBuf>,
}

impl EngineOptions {
    /// 송신자 옵션
    pub fn sender(shared_secret: &str, settings: &TransferSettings) -> Self {
        Self::build(Role::Sender, shared_secret, settings, None)
    }

    /// 수신자 옵션
    pub fn receiver(shared_secret: &str, save_dir: PathBuf, settings: &TransferSettings) -> Self {
        let mut options = Self::build(Role::Receiver, shared_secret, settings, Some(save_dir));
        // 수신측에서는 압축/제외 패턴이 의미 없음
        options.compress = false;
        options.exclude_patterns.clear();
        options
    }

    fn build(
        role: Role,
        shared_secret: &str,
        settings: &TransferSettings,
        save_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            role,
            shared_secret: shared_secret.to_string(),
            relay_address: settings.relay_address.clone(),
            relay_ports: settings.relay_ports.clone(),
            relay_password: settings.relay_password.clone(),
            only_local: settings.only_local,
            disable_local: settings.disable_local,
            compress: settings.compress,
            hash_algorithm: settings.hash_algorithm.clone(),
            curve: settings.curve.clone(),
            overwrite: settings.overwrite,
            exclude_patterns: settings.exclude_patterns.clone(),
            debug: settings.debug,
            no_prompt: true,
            save_dir,
        }
    }

    pub fn is_sender(&self) -> bool {
        self.role == Role::Sender
    }
}

/// 송신 파일 하나의 메타데이터
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// 파일 이름
    pub name: String,

    /// 원본 경로
    pub source: PathBuf,

    /// 수신측에서 재구성할 상대 폴더 (루트면 ".")
    pub remote_folder: String,

    /// 크기 (바이트)
    pub size: u64,

    /// 수정 시각
    pub modified: Option<SystemTime>,

    /// 압축 대상 폴더 여부
    pub compressed: bool,
}

/// `files_info` 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesInfo {
    pub files: Vec<FileInfo>,
    pub empty_folders: Vec<PathBuf>,
    pub folder_count: usize,
}

impl FilesInfo {
    /// 전체 바이트 수
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn merge(&mut self, other: FilesInfo) {
        self.files.extend(other.files);
        self.empty_folders.extend(other.empty_folders);
        self.folder_count += other.folder_count;
    }
}

/// 엔진이 보고하는 진행 상황
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProgress {
    pub transferred: u64,
    pub total: u64,
}

impl EngineProgress {
    /// 0.0 ~ 1.0 비율 (전체 크기를 모르면 None)
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.transferred as f64 / self.total as f64).clamp(0.0, 1.0))
    }
}

/// 수신 완료 후 엔진이 알려주는 페이로드 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub primary_name: String,
    pub total_size: u64,
    pub file_count: usize,
}

/// 엔진 클라이언트 핸들
///
/// `send`/`receive` 는 전송이 끝날 때까지 반환하지 않는다. 전달된 토큰을
/// 관찰하는지는 엔진 구현에 달려 있다.
#[async_trait]
pub trait EngineClient: Send + Sync + fmt::Debug {
    /// 생성에 사용된 옵션
    fn options(&self) -> &EngineOptions;

    /// 송신 (수신자 연결 대기 포함)
    async fn send(&self, files: &FilesInfo, cancel: CancellationToken) -> Result<()>;

    /// 수신
    async fn receive(&self, cancel: CancellationToken) -> Result<()>;

    /// 현재 진행 상황 (엔진이 보고하지 않으면 None)
    fn progress(&self) -> Option<EngineProgress> {
        None
    }

    /// 수신 페이로드 요약 (알 수 없으면 None)
    fn summary(&self) -> Option<TransferSummary> {
        None
    }
}

/// 전송 엔진
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// 클라이언트 생성. 옵션 거부 시 `Error::Configuration`
    async fn create(&self, options: EngineOptions) -> Result<Arc<dyn EngineClient>>;

    /// 송신 페이로드 메타데이터 수집
    async fn files_info(
        &self,
        paths: &[PathBuf],
        compress: bool,
        recurse: bool,
        exclude: &[String],
    ) -> Result<FilesInfo> {
        let paths = paths.to_vec();
        let exclude = exclude.to_vec();
        tokio::task::spawn_blocking(move || scan_paths(&paths, compress, recurse, &exclude))
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

/// 경로 목록을 훑어서 메타데이터 수집
///
/// - 디렉토리는 하위 파일로 펼친다 (`compress` 면 하나의 압축 항목)
/// - `recurse` 가 false 면 디렉토리 바로 아래 파일만 포함
/// - `exclude` 는 입력 루트 기준 상대 경로에 대한 대소문자 무시 부분 문자열 매칭
pub fn scan_paths(
    paths: &[PathBuf],
    compress: bool,
    recurse: bool,
    exclude: &[String],
) -> Result<FilesInfo> {
    if paths.is_empty() {
        return Err(Error::Validation("전송할 경로가 없음".into()));
    }

    let exclude: Vec<String> = exclude.iter().map(|p| p.to_lowercase()).collect();

    let parts = paths
        .par_iter()
        .map(|path| scan_one(path, compress, recurse, &exclude))
        .collect::<Result<Vec<_>>>()?;

    let mut info = FilesInfo::default();
    for part in parts {
        info.merge(part);
    }

    debug!(
        "메타데이터 수집: {} 파일, {} 빈 폴더, {} 폴더, {} bytes",
        info.files.len(),
        info.empty_folders.len(),
        info.folder_count,
        info.total_size()
    );

    Ok(info)
}

fn is_excluded(path: &Path, exclude: &[String]) -> bool {
    if exclude.is_empty() {
        return false;
    }
    let lowered = path.to_string_lossy().to_lowercase();
    exclude.iter().any(|pattern| lowered.contains(pattern.as_str()))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn scan_one(path: &Path, compress: bool, recurse: bool, exclude: &[String]) -> Result<FilesInfo> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| Error::Validation(format!("경로 접근 불가 {}: {}", path.display(), e)))?;

    let mut info = FilesInfo::default();

    if metadata.is_file() {
        if !is_excluded(Path::new(&file_name_of(path)), exclude) {
            info.files.push(FileInfo {
                name: file_name_of(path),
                source: path.to_path_buf(),
                remote_folder: ".".to_string(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
                compressed: false,
            });
        }
        return Ok(info);
    }

    let root_name = file_name_of(path);

    if compress {
        // 압축은 엔진이 수행, 여기서는 원본 크기 합계만 계산
        let mut walked = FilesInfo::default();
        walk_dir(path, Path::new(&root_name), true, exclude, &mut walked)?;
        info.files.push(FileInfo {
            name: format!("{}.zip", root_name),
            source: path.to_path_buf(),
            remote_folder: ".".to_string(),
            size: walked.total_size(),
            modified: metadata.modified().ok(),
            compressed: true,
        });
        return Ok(info);
    }

    info.folder_count += 1;
    walk_dir(path, Path::new(&root_name), recurse, exclude, &mut info)?;
    Ok(info)
}

fn walk_dir(
    dir: &Path,
    remote: &Path,
    recurse: bool,
    exclude: &[String],
    info: &mut FilesInfo,
) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    if entries.is_empty() {
        info.empty_folders.push(remote.to_path_buf());
        return Ok(());
    }

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_excluded(&remote.join(&name), exclude) {
            continue;
        }
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            info.folder_count += 1;
            if recurse {
                walk_dir(&path, &remote.join(&name), recurse, exclude, info)?;
            }
        } else {
            info.files.push(FileInfo {
                name,
                source: path.clone(),
                remote_folder: remote.to_string_lossy().into_owned(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
                compressed: false,
            });
        }
    }

    Ok(())
}
