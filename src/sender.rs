//! 송신 경로
//!
//! Preparing → Waiting → Sending → {Completed, Failed, Cancelled}
//!
//! - 텍스트는 임시 파일로 만들어서 파일처럼 보냄 (모든 종료 경로에서 삭제)
//! - 메타데이터 수집 후 기록의 크기/파일 수를 갱신
//! - Sending 전이는 엔진 send 호출 시점 (수신자 대기도 그 호출 안에서 일어남)

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::TransferSettings;
use crate::engine::{EngineClient, TransferEngine};
use crate::stats::format_size;
use crate::transfer::{drive_engine_call, TransferShared, TransferState};
use crate::{Error, Result};

/// 임시 텍스트 파일 접두사
pub const TEXT_FILE_PREFIX: &str = "croclink-text-";

/// 텍스트 송신 시 기록에 남는 이름
pub const TEXT_RECORD_NAME: &str = "text";

/// 송신 페이로드
#[derive(Debug, Clone, PartialEq)]
pub enum SendPayload {
    /// 파일/디렉토리 경로
    Files(Vec<PathBuf>),
    /// 인라인 텍스트
    Text(String),
}

impl SendPayload {
    /// UI 입력 두 개에서 페이로드 선택
    ///
    /// 둘 중 정확히 하나만 비어 있지 않아야 한다.
    pub fn from_inputs(paths: Vec<PathBuf>, text: &str) -> Result<Self> {
        let has_text = !text.trim().is_empty();
        match (paths.is_empty(), has_text) {
            (false, false) => Ok(SendPayload::Files(paths)),
            (true, true) => Ok(SendPayload::Text(text.to_string())),
            (true, false) => Err(Error::Validation("보낼 파일이나 텍스트가 없음".into())),
            (false, true) => Err(Error::Validation("파일과 텍스트를 동시에 보낼 수 없음".into())),
        }
    }

    /// 부작용 없이 검증
    pub fn validate(&self) -> Result<()> {
        match self {
            SendPayload::Files(paths) => {
                if paths.is_empty() {
                    return Err(Error::Validation("보낼 파일이 없음".into()));
                }
                if let Some(missing) = paths.iter().find(|p| !p.exists()) {
                    return Err(Error::Validation(format!("파일 없음: {}", missing.display())));
                }
                Ok(())
            }
            SendPayload::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::Validation("보낼 텍스트가 비어 있음".into()));
                }
                Ok(())
            }
        }
    }
}

/// 기록용 페이로드 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PayloadLabel {
    pub name: String,
    pub size: String,
    pub count: usize,
}

/// 전송 준비가 끝난 페이로드
#[derive(Debug)]
pub(crate) struct PreparedPayload {
    pub paths: Vec<PathBuf>,
    pub text_file: Option<NamedTempFile>,
    pub label: PayloadLabel,
}

impl PreparedPayload {
    pub fn text_path(&self) -> Option<PathBuf> {
        self.text_file.as_ref().map(|f| f.path().to_path_buf())
    }

    /// 임시 텍스트 파일 삭제
    pub fn cleanup(self) {
        if let Some(file) = self.text_file {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!("텍스트 임시 파일 삭제: {}", path.display()),
                Err(e) => warn!("임시 파일 삭제 실패 {}: {}", path.display(), e),
            }
        }
    }
}

/// 텍스트를 임시 파일로 쓰고 기록용 요약 계산
pub(crate) fn prepare_payload(payload: &SendPayload) -> Result<PreparedPayload> {
    match payload {
        SendPayload::Files(paths) => Ok(PreparedPayload {
            label: label_for_paths(paths),
            paths: paths.clone(),
            text_file: None,
        }),
        SendPayload::Text(text) => {
            let mut file = tempfile::Builder::new()
                .prefix(TEXT_FILE_PREFIX)
                .suffix(".txt")
                .tempfile()?;
            file.write_all(text.as_bytes())?;
            file.flush()?;
            debug!("텍스트 임시 파일: {}", file.path().display());

            Ok(PreparedPayload {
                paths: vec![file.path().to_path_buf()],
                text_file: Some(file),
                label: PayloadLabel {
                    name: TEXT_RECORD_NAME.to_string(),
                    size: format_size(text.len() as u64),
                    count: 1,
                },
            })
        }
    }
}

/// stat 기준 요약 (접근 불가 경로는 크기 합에서 제외)
fn label_for_paths(paths: &[PathBuf]) -> PayloadLabel {
    let total: u64 = paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    let name = match paths {
        [single] => display_name(single),
        _ => format!("{} files", paths.len()),
    };

    PayloadLabel {
        name,
        size: format_size(total),
        count: paths.len(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// 송신 백그라운드 작업
pub(crate) struct SendJob {
    pub shared: Arc<TransferShared>,
    pub engine: Arc<dyn TransferEngine>,
    pub client: Arc<dyn EngineClient>,
    pub payload: PreparedPayload,
    pub settings: TransferSettings,
    pub progress_interval: Duration,
}

pub(crate) async fn run_send(job: SendJob) {
    let SendJob {
        shared,
        engine,
        client,
        payload,
        settings,
        progress_interval,
    } = job;

    let result = send_inner(
        &shared,
        engine.as_ref(),
        client.as_ref(),
        &payload.paths,
        &settings,
        progress_interval,
    )
    .await;

    // 종료 상태를 알리기 전에 임시 파일부터 정리
    payload.cleanup();
    shared.finish_with(&result);
}

async fn send_inner(
    shared: &TransferShared,
    engine: &dyn TransferEngine,
    client: &dyn EngineClient,
    paths: &[PathBuf],
    settings: &TransferSettings,
    progress_interval: Duration,
) -> Result<()> {
    shared.proceed()?;
    shared.advance(
        TransferState::Waiting,
        Some(format!("waiting for receiver, code: {}", shared.code)),
    );

    // 취소 토큰을 받지 않는 호출이라 반환할 때까지 기다린다
    let files = engine
        .files_info(paths, settings.compress, true, &settings.exclude_patterns)
        .await?;
    shared.proceed()?;

    let total = files.total_size();
    let count = files.file_count();
    shared.set_payload(total, count);

    if let Some(history_id) = &shared.history_id {
        let refined = shared.history().update(history_id, |record| {
            record.file_size = format_size(total);
            record.file_count = count;
        });
        if let Err(e) = refined {
            warn!("[{}] 기록 갱신 실패: {}", shared.id, e);
        }
    }

    shared.advance(TransferState::Sending, Some(format!("sending {} file(s)", count)));

    drive_engine_call(
        shared,
        client,
        progress_interval,
        client.send(&files, shared.token()),
    )
    .await
}
