//! Collaborator hooks called around an orchestration
//!
//! - `cleanup_inputs` - 성공한 작업의 입력 정리
//! - `prepare_viewer` - 포인트 클라우드가 생성되면 뷰어 데이터 준비

use crate::task::Task;
use async_trait::async_trait;
use odmq_foundation::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Hooks implemented outside the scheduler core
#[async_trait]
pub trait TaskHooks: Send + Sync {
    /// Remove inputs of a successfully processed task
    async fn cleanup_inputs(&self, task: &Task) -> Result<()>;

    /// Prepare viewer data for a produced point cloud
    async fn prepare_viewer(&self, project_path: &Path, point_cloud: &Path) -> Result<()>;
}

/// Does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl TaskHooks for NoopHooks {
    async fn cleanup_inputs(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    async fn prepare_viewer(&self, _project_path: &Path, _point_cloud: &Path) -> Result<()> {
        Ok(())
    }
}

/// Filesystem hooks
///
/// - cleanup: `<project>/images/` 와 `<project>/*.tmp` 삭제
/// - viewer: PATH 에 `PotreeConverter` 가 있으면 `<project>/viewer` 로 변환
#[derive(Debug, Clone)]
pub struct FsHooks {
    converter: String,
}

impl Default for FsHooks {
    fn default() -> Self {
        Self {
            converter: "PotreeConverter".to_string(),
        }
    }
}

impl FsHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_converter(mut self, binary: impl Into<String>) -> Self {
        self.converter = binary.into();
        self
    }

    fn tmp_files(project: &Path) -> Vec<PathBuf> {
        let pattern = project.join("*.tmp");
        match glob::glob(&pattern.to_string_lossy()) {
            Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
            Err(e) => {
                warn!("Invalid cleanup pattern {}: {}", pattern.display(), e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TaskHooks for FsHooks {
    async fn cleanup_inputs(&self, task: &Task) -> Result<()> {
        let project = &task.project_path;

        let images = project.join("images");
        if tokio::fs::try_exists(&images).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&images).await?;
            debug!("Removed {}", images.display());
        }

        for path in Self::tmp_files(project) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }

        info!("Cleaned up inputs of {}", task.task_id.short());
        Ok(())
    }

    async fn prepare_viewer(&self, project_path: &Path, point_cloud: &Path) -> Result<()> {
        let converter = match which::which(&self.converter) {
            Ok(path) => path,
            Err(_) => {
                debug!("{} not on PATH, skipping viewer", self.converter);
                return Ok(());
            }
        };

        let viewer_dir = project_path.join("viewer");
        tokio::fs::create_dir_all(&viewer_dir).await?;

        let status = Command::new(&converter)
            .arg("-i")
            .arg(point_cloud)
            .arg("-o")
            .arg(&viewer_dir)
            .args(["--generate-page", "index.html"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(Error::tool_failure(
                format!("{} exited with {}", self.converter, status),
                status.code(),
            ));
        }

        info!("Viewer prepared in {}", viewer_dir.display());
        Ok(())
    }
}
