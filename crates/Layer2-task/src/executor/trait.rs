//! Executor trait

use crate::task::{Task, WorkPaths};
use async_trait::async_trait;
use odmq_foundation::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Events streamed from a running orchestration to the task runner
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Log file for this attempt was created
    LogOpened(PathBuf),

    /// A line carried a parseable progress value (already monotonic)
    Progress { value: u8, message: String },
}

/// Sender half handed to `Executor::execute`
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Everything an executor needs to run one task instance
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_label: String,
    pub instance_id: String,
    pub project_name: String,
    pub project_path: PathBuf,
    pub input_path: PathBuf,
    pub work: WorkPaths,
    pub options: Map<String, Value>,
}

impl RunRequest {
    /// Build from a task that has already been started
    pub fn from_task(task: &Task) -> Result<Self> {
        let (instance_id, work) = match (&task.instance_id, &task.work_path) {
            (Some(inst), Some(work)) => (inst.clone(), work.clone()),
            _ => {
                return Err(Error::InvalidTransition(format!(
                    "{} has no instance assigned",
                    task.task_id.short()
                )))
            }
        };
        Ok(Self {
            task_label: task.task_id.short(),
            instance_id,
            project_name: task.project_name(),
            project_path: task.project_path.clone(),
            input_path: task.input_path.clone(),
            work,
            options: task.options.clone(),
        })
    }
}

/// Successful orchestration result
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Artifact kind → path
    pub results: BTreeMap<String, PathBuf>,

    /// Log file of the attempt
    pub log_path: Option<PathBuf>,

    /// Human-readable summary
    pub message: String,
}

/// Executor trait - implement to add new execution backends
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one task instance to completion
    ///
    /// Failures are returned as errors; the caller records them on the task.
    async fn execute(&self, request: &RunRequest, progress: ProgressSender) -> Result<RunOutcome>;

    /// Check if the executor is available
    fn is_available(&self) -> bool;

    /// Get executor name
    fn name(&self) -> &'static str;
}
