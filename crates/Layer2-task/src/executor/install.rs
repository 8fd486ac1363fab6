//! External tool discovery and on-demand installation
//!
//! 탐색 순서: 설정된 경로 → 후보 경로 → PATH (`which`).
//! 찾지 못하면 git clone 으로 1회만 설치를 시도하고 결과를 캐시한다.

use odmq_foundation::{Error, Result, ToolConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Resolves the tool binary, installing it at most once
#[derive(Debug)]
pub struct ToolLocator {
    config: ToolConfig,
    resolved: OnceCell<std::result::Result<PathBuf, String>>,
}

impl ToolLocator {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config,
            resolved: OnceCell::new(),
        }
    }

    /// Find an existing executable without installing
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.tool_path {
            if is_executable(path) {
                return Some(path.clone());
            }
            warn!("Configured tool path {} is not executable", path.display());
        }

        if let Some(path) = self
            .config
            .candidate_paths
            .iter()
            .find(|p| is_executable(p))
        {
            return Some(path.clone());
        }

        which::which(&self.config.binary_name).ok()
    }

    /// Resolve the tool, installing on first use if needed
    ///
    /// 동시 호출은 하나의 탐색/설치 결과를 공유한다.
    pub async fn resolve(&self) -> Result<PathBuf> {
        let resolved = self
            .resolved
            .get_or_init(|| async {
                if let Some(path) = self.locate() {
                    info!("Using processing tool {}", path.display());
                    return Ok(path);
                }
                if !self.config.auto_install {
                    return Err(format!(
                        "{} not found and installation is disabled",
                        self.config.binary_name
                    ));
                }
                warn!(
                    "{} not found, installing into {}",
                    self.config.binary_name,
                    self.config.install_dir.display()
                );
                self.install().await.map_err(|e| e.to_string())
            })
            .await;

        resolved
            .clone()
            .map_err(Error::ExternalToolUnavailable)
    }

    async fn install(&self) -> Result<PathBuf> {
        let dir = &self.config.install_dir;
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = Command::new("git")
            .arg("clone")
            .arg(&self.config.install_repo)
            .arg(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::ExternalToolUnavailable(format!("git clone failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalToolUnavailable(format!(
                "git clone exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let entry = self.config.installed_entry();
        if !entry.is_file() {
            return Err(Error::ExternalToolUnavailable(format!(
                "installed tree has no {}",
                entry.display()
            )));
        }
        make_executable(&entry)?;
        info!("Installed processing tool at {}", entry.display());
        Ok(entry)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
