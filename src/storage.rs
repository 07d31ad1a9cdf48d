//! 히스토리 저장소 백엔드
//!
//! 히스토리 전체를 JSON 문서 하나로 저장한다. 레코드 배열의 순서가 곧
//! 삽입 순서(키 시퀀스)이고, ID 카운터도 같은 문서에 들어간다.
//! 파일 백엔드는 임시 파일에 쓴 뒤 rename 으로 교체하므로 중간에 죽어도
//! 이전 문서 아니면 새 문서 둘 중 하나만 남는다.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::history::HistoryRecord;
use crate::{Error, Result};

/// 저장 문서 포맷 버전
pub const DOCUMENT_VERSION: u32 = 1;

/// 저장 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub version: u32,
    pub id_counter: u64,
    /// 오래된 것부터
    pub records: Vec<HistoryRecord>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            id_counter: 0,
            records: Vec::new(),
        }
    }
}

/// 히스토리 백엔드
pub trait HistoryBackend: Send + Sync {
    /// 저장된 문서 로드 (없으면 None)
    fn load(&self) -> Result<Option<HistoryDocument>>;

    /// 문서 전체 저장
    fn save(&self, document: &HistoryDocument) -> Result<()>;

    /// 로그용 설명
    fn describe(&self) -> String;
}

/// JSON 파일 백엔드
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<HistoryDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("{} 읽기 실패: {}", self.path.display(), e)))?;
        let document: HistoryDocument = serde_json::from_str(&content)
            .map_err(|e| Error::Parse(format!("{} 파싱 실패: {}", self.path.display(), e)))?;
        Ok(Some(document))
    }

    fn save(&self, document: &HistoryDocument) -> Result<()> {
        let content = serde_json::to_vec_pretty(document)
            .map_err(|e| Error::Storage(format!("직렬화 실패: {}", e)))?;
        atomic_write(&self.path, &content)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// 임시 파일에 쓰고 rename 으로 교체
///
/// rename 실패 시 임시 파일은 지운다. 상위 디렉토리는 없으면 만든다.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("디렉토리 생성 실패 {}: {}", parent.display(), e))
            })?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");

    if let Err(e) = std::fs::write(&tmp_path, content) {
        error!(path = %tmp_path.display(), error = %e, "임시 파일 쓰기 실패");
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::Storage(format!("{} 쓰기 실패: {}", tmp_path.display(), e)));
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        error!(from = %tmp_path.display(), to = %path.display(), error = %e, "rename 실패");
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::Storage(format!("{} 교체 실패: {}", path.display(), e)));
    }

    debug!("{} 저장 완료 ({} bytes)", path.display(), content.len());
    Ok(())
}

/// 메모리 백엔드
///
/// 쓰기 실패를 주입할 수 있다.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<Option<HistoryDocument>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이후 쓰기를 실패시킴
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 성공한 저장 횟수
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// 마지막으로 저장된 문서
    pub fn snapshot(&self) -> Option<HistoryDocument> {
        self.document.lock().clone()
    }
}

impl HistoryBackend for MemoryBackend {
    fn load(&self) -> Result<Option<HistoryDocument>> {
        Ok(self.document.lock().clone())
    }

    fn save(&self, document: &HistoryDocument) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("메모리 백엔드 쓰기 실패 (주입)".into()));
        }
        *self.document.lock() = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl<T: HistoryBackend + ?Sized> HistoryBackend for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<HistoryDocument>> {
        (**self).load()
    }

    fn save(&self, document: &HistoryDocument) -> Result<()> {
        (**self).save(document)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
