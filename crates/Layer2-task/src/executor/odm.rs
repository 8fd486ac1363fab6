//! ODM executor - runs the photogrammetry CLI for one task instance
//!
//! Features:
//! - Isolated `output_<inst>` / `temp_<inst>` directories, cwd + TMPDIR in temp
//! - Real-time stdout/stderr streaming into a per-attempt log file
//! - Progress parsing, reported to the runner over a channel
//! - Artifact collection, viewer preparation, temp cleanup on success

use crate::executor::artifacts::collect_artifacts;
use crate::executor::install::ToolLocator;
use crate::executor::options::{build_command_args, merge_options};
use crate::executor::{Executor, ProgressEvent, ProgressSender, RunOutcome, RunRequest};
use crate::hooks::TaskHooks;
use crate::log::{log_file_path, LogEntry, TaskLog};
use crate::progress::{ProgressParser, ProgressTracker};
use async_trait::async_trait;
use odmq_foundation::{Error, Result, ToolConfig};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Output line channel capacity
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Executor backed by the external photogrammetry CLI
pub struct OdmExecutor {
    locator: ToolLocator,
    parser: ProgressParser,
    config: ToolConfig,
    hooks: Arc<dyn TaskHooks>,
}

impl OdmExecutor {
    pub fn new(config: ToolConfig, hooks: Arc<dyn TaskHooks>) -> Result<Self> {
        Ok(Self {
            locator: ToolLocator::new(config.clone()),
            parser: ProgressParser::new()?,
            config,
            hooks,
        })
    }

    async fn run(
        &self,
        tool: PathBuf,
        request: &RunRequest,
        log: &mut TaskLog,
        progress: &ProgressSender,
    ) -> Result<RunOutcome> {
        let options = merge_options(&self.config.default_options, &request.options);
        let args = build_command_args(
            &request.project_name,
            &request.input_path,
            &request.work.output,
            &request.work.temp,
            &options,
        );

        log.push_system(format!("{} {}", tool.display(), args.join(" ")))
            .await?;
        info!(
            task = %request.task_label,
            instance = %request.instance_id,
            "Starting {}",
            tool.display()
        );

        let mut child = Command::new(&tool)
            .args(&args)
            .current_dir(&request.work.temp)
            .env("TMPDIR", &request.work.temp)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::tool_failure(format!("Failed to spawn {}: {}", tool.display(), e), None)
            })?;

        // Spawn log readers
        let (line_tx, mut line_rx) = mpsc::channel::<LogEntry>(LINE_CHANNEL_CAPACITY);

        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if tx.send(LogEntry::stdout(line)).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if tx.send(LogEntry::stderr(line)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(line_tx);

        let mut tracker = ProgressTracker::new();
        while let Some(entry) = line_rx.recv().await {
            log.push(&entry).await?;
            if let Some(value) = self.parser.parse(&entry.content) {
                let before = tracker.current();
                let current = tracker.record(value);
                if current > before {
                    let _ = progress.send(ProgressEvent::Progress {
                        value: current,
                        message: entry.content.trim().to_string(),
                    });
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            Error::tool_failure(format!("Failed to wait for process: {}", e), None)
        })?;
        let exit_code = status.code();

        if !status.success() {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            log.push_system(format!("Process exited with code {}", code))
                .await?;
            let tail = log.tail();
            let message = if tail.is_empty() {
                format!("Processing tool exited with code {}", code)
            } else {
                format!(
                    "Processing tool exited with code {}: {}",
                    code,
                    tail.join(" | ")
                )
            };
            return Err(Error::tool_failure(message, exit_code));
        }

        let results = collect_artifacts(&request.work.output);
        debug!(
            task = %request.task_label,
            "Collected {} artifacts",
            results.len()
        );

        if let Some(point_cloud) = results.get("point_cloud") {
            if let Err(e) = self
                .hooks
                .prepare_viewer(&request.project_path, point_cloud)
                .await
            {
                warn!(task = %request.task_label, "Viewer preparation failed: {}", e);
                log.push_system(format!("Viewer preparation failed: {}", e))
                    .await?;
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&request.work.temp).await {
            warn!(
                "Failed to remove temp dir {}: {}",
                request.work.temp.display(),
                e
            );
        }

        let message = format!(
            "Processing completed (instance {})",
            request.instance_id
        );
        log.push_system(&message).await?;

        Ok(RunOutcome {
            results,
            log_path: Some(log.path().to_path_buf()),
            message,
        })
    }
}

#[async_trait]
impl Executor for OdmExecutor {
    async fn execute(&self, request: &RunRequest, progress: ProgressSender) -> Result<RunOutcome> {
        let tool = self.locator.resolve().await?;

        tokio::fs::create_dir_all(&request.work.output).await?;
        tokio::fs::create_dir_all(&request.work.temp).await?;

        let log_path = log_file_path(&request.project_path, &request.instance_id);
        let mut log = TaskLog::create(&log_path)
            .await?
            .with_tail_lines(self.config.failure_tail_lines);
        let _ = progress.send(ProgressEvent::LogOpened(log_path.clone()));

        let result = self.run(tool, request, &mut log, &progress).await;

        if let Err(e) = &result {
            // 실패 원인을 로그 파일에도 남긴다 (파일은 보존)
            let _ = log.push_system(format!("Failed: {}", e)).await;
        }
        if let Err(e) = log.close().await {
            warn!("Failed to flush log {}: {}", log_path.display(), e);
        }

        result
    }

    fn is_available(&self) -> bool {
        self.locator.locate().is_some() || self.config.auto_install
    }

    fn name(&self) -> &'static str {
        "odm"
    }
}
