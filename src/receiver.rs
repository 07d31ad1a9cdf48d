//! 수신 경로
//!
//! Connecting → Receiving → {Completed, Failed, Cancelled}
//!
//! - 시작 시 파일 정보를 모르므로 자리표시자 기록을 남김
//! - 엔진이 요약을 주면 완료 시 기록을 갱신

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::EngineClient;
use crate::stats::format_size;
use crate::transfer::{drive_engine_call, TransferShared, TransferState};
use crate::{Error, Result};

/// 수신 대기 중 기록 이름
pub const PLACEHOLDER_NAME: &str = "waiting for file info";

/// 수신 대기 중 크기 라벨
pub const PLACEHOLDER_SIZE: &str = "unknown";

/// 수신 기록 출처 라벨
pub const RECEIVER_ORIGIN: &str = "receiver";

/// 기본 저장 경로
///
/// `~/Downloads` 가 있으면 그곳, 없으면 홈, 홈도 모르면 시스템 임시 디렉토리.
pub fn default_save_path() -> PathBuf {
    resolve_save_path(dirs::home_dir().as_deref())
}

pub fn resolve_save_path(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => {
            let downloads = home.join("Downloads");
            if downloads.is_dir() {
                downloads
            } else {
                home.to_path_buf()
            }
        }
        None => std::env::temp_dir(),
    }
}

/// 저장 디렉토리 준비 (없으면 생성)
pub(crate) fn prepare_save_dir(save_path: Option<PathBuf>) -> Result<PathBuf> {
    let dir = save_path.unwrap_or_else(default_save_path);
    if dir.exists() {
        if !dir.is_dir() {
            return Err(Error::Validation(format!(
                "저장 경로가 디렉토리가 아님: {}",
                dir.display()
            )));
        }
        return Ok(dir);
    }
    std::fs::create_dir_all(&dir)?;
    debug!("저장 디렉토리 생성: {}", dir.display());
    Ok(dir)
}

/// 수신 백그라운드 작업
pub(crate) struct ReceiveJob {
    pub shared: Arc<TransferShared>,
    pub client: Arc<dyn EngineClient>,
    pub progress_interval: Duration,
}

pub(crate) async fn run_receive(job: ReceiveJob) {
    let ReceiveJob {
        shared,
        client,
        progress_interval,
    } = job;

    let result = match shared.proceed() {
        Ok(()) => {
            shared.advance(TransferState::Receiving, Some("receiving".into()));
            drive_engine_call(
                &shared,
                client.as_ref(),
                progress_interval,
                client.receive(shared.token()),
            )
            .await
        }
        Err(e) => Err(e),
    };

    if result.is_ok() && !shared.cancel_requested() {
        refine_record(&shared, client.as_ref());
    }

    shared.finish_with(&result);
}

/// 엔진 요약으로 자리표시자 기록 갱신
fn refine_record(shared: &TransferShared, client: &dyn EngineClient) {
    let (Some(summary), Some(history_id)) = (client.summary(), shared.history_id.as_ref()) else {
        return;
    };

    shared.set_payload(summary.total_size, summary.file_count);

    let refined = shared.history().update(history_id, |record| {
        record.file_name = summary.primary_name.clone();
        record.file_size = format_size(summary.total_size);
        record.file_count = summary.file_count;
    });
    if let Err(e) = refined {
        warn!("[{}] 수신 기록 갱신 실패: {}", shared.id, e);
    }
}
