//! Task definition and types

use crate::state::TaskState;
use chrono::{DateTime, Utc};
use odmq_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used in logs (`task-1a2b3c4d`)
    pub fn short(&self) -> String {
        format!("task-{}", &self.0.simple().to_string()[..8])
    }

    /// Instance id derived from the id (`inst_1a2b3c4d`)
    ///
    /// `full` 이면 uuid 전체를 사용한다 (앞 8자리 충돌 시).
    pub fn instance_id(&self, full: bool) -> String {
        let hex = self.0.simple().to_string();
        if full {
            format!("inst_{}", hex)
        } else {
            format!("inst_{}", &hex[..8])
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("Invalid task id '{}': {}", s, e)))
    }
}

/// Isolated per-instance directories under the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPaths {
    pub output: PathBuf,
    pub temp: PathBuf,
}

impl WorkPaths {
    /// `<project>/output_<inst>` and `<project>/temp_<inst>`
    pub fn for_instance(project: &Path, instance_id: &str) -> Self {
        Self {
            output: project.join(format!("output_{}", instance_id)),
            temp: project.join(format!("temp_{}", instance_id)),
        }
    }
}

/// A photogrammetry job tracked by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub task_id: TaskId,

    /// Caller's job reference
    pub job_id: String,

    /// Caller's owner reference (used for cancel authorization)
    pub owner_id: String,

    /// Caller's tenant reference
    pub tenant_id: String,

    /// Directory of input images
    pub input_path: PathBuf,

    /// Project directory holding instance dirs and logs
    pub project_path: PathBuf,

    /// Set once the task starts running
    #[serde(default)]
    pub work_path: Option<WorkPaths>,

    /// Caller options, merged over defaults by the orchestrator
    #[serde(default)]
    pub options: Map<String, Value>,

    /// Higher dispatches first
    #[serde(default)]
    pub priority: i32,

    /// Current state
    pub status: TaskState,

    /// 0-100, advisory
    #[serde(default)]
    pub progress: u8,

    /// Assigned on dispatch, unique per task (`inst_<id prefix>`)
    #[serde(default)]
    pub instance_id: Option<String>,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task started executing
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set only on Failed
    #[serde(default)]
    pub error_message: Option<String>,

    /// Artifact kind → path, set on Completed
    #[serde(default)]
    pub results: BTreeMap<String, PathBuf>,

    /// Log file of the execution attempt
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Submission sequence, breaks (priority, created_at) ties
    #[serde(default)]
    pub seq: u64,
}

impl Task {
    /// Create a queued task from a submission
    pub fn new(request: SubmitRequest, project_path: PathBuf, seq: u64) -> Self {
        Self {
            task_id: TaskId::new(),
            job_id: request.job_id,
            owner_id: request.owner_id,
            tenant_id: request.tenant_id,
            input_path: request.input_path,
            project_path,
            work_path: None,
            options: request.options,
            priority: request.priority,
            status: TaskState::Queued,
            progress: 0,
            instance_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            results: BTreeMap::new(),
            log_path: None,
            seq,
        }
    }

    /// Dispatch order key: priority desc, then created_at, then seq
    pub fn sort_key(&self) -> (Reverse<i32>, DateTime<Utc>, u64) {
        (Reverse(self.priority), self.created_at, self.seq)
    }

    fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "{} cannot move from {} to {}",
                self.task_id.short(),
                self.status,
                next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Mark task as running on an instance
    pub fn start(&mut self, instance_id: impl Into<String>) -> Result<()> {
        self.transition(TaskState::Running)?;
        let instance_id = instance_id.into();
        self.work_path = Some(WorkPaths::for_instance(&self.project_path, &instance_id));
        self.instance_id = Some(instance_id);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark task as completed successfully
    pub fn complete(&mut self, results: BTreeMap<String, PathBuf>) -> Result<()> {
        self.transition(TaskState::Completed)?;
        self.results = results;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark task as failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskState::Failed)?;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark task as cancelled
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TaskState::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Raise progress; lower or equal values are ignored
    pub fn update_progress(&mut self, value: u8) -> bool {
        let value = value.min(100);
        if self.status.is_running() && value > self.progress {
            self.progress = value;
            true
        } else {
            false
        }
    }

    /// Display name passed to the external tool (`<project dir>_<inst>`)
    pub fn project_name(&self) -> String {
        let base = self
            .project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.job_id.clone());
        match &self.instance_id {
            Some(inst) => format!("{}_{}", base, inst),
            None => base,
        }
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

// ============================================================================
// Submission
// ============================================================================

/// Parameters of a new task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub job_id: String,
    pub owner_id: String,
    pub tenant_id: String,
    pub input_path: PathBuf,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub priority: i32,
}

impl SubmitRequest {
    pub fn new(
        job_id: impl Into<String>,
        owner_id: impl Into<String>,
        tenant_id: impl Into<String>,
        input_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id: owner_id.into(),
            tenant_id: tenant_id.into(),
            input_path: input_path.into(),
            ..Default::default()
        }
    }

    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options.extend(options);
        self
    }
}

// ============================================================================
// Status view
// ============================================================================

/// Task snapshot returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,

    /// 1-based position in the pending list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,

    /// Advisory wait estimate for pending tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_wait_secs: Option<u64>,
}

impl TaskView {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            queue_position: None,
            estimated_wait_secs: None,
        }
    }

    pub fn pending(task: Task, position: usize, wait: Duration) -> Self {
        Self {
            task,
            queue_position: Some(position),
            estimated_wait_secs: Some(wait.as_secs()),
        }
    }

    pub fn status(&self) -> TaskState {
        self.task.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task::new(
            SubmitRequest::new("job-1", "owner-a", "tenant-x", "/data/in"),
            PathBuf::from("/data/projects/tenant-x/job-1"),
            0,
        )
    }

    #[test]
    fn test_lifecycle_sets_timestamps_once() {
        let mut task = sample();
        assert_eq!(task.status, TaskState::Queued);

        task.start("inst_1").unwrap();
        let started = task.started_at;
        assert!(started.is_some());
        assert_eq!(
            task.work_path.as_ref().unwrap().output,
            PathBuf::from("/data/projects/tenant-x/job-1/output_inst_1")
        );

        task.complete(BTreeMap::new()).unwrap();
        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());

        // 종료 상태 이후 전이는 거부
        assert!(matches!(task.fail("late"), Err(Error::InvalidTransition(_))));
        assert_eq!(task.started_at, started);
        assert!(task.error_message.is_none());
    }

    #[test]
    fn test_cancel_only_from_queued() {
        let mut task = sample();
        task.start("inst_1").unwrap();
        assert!(task.cancel().is_err());
        assert_eq!(task.status, TaskState::Running);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut task = sample();
        assert!(!task.update_progress(30));
        task.start("inst_1").unwrap();
        assert!(task.update_progress(30));
        assert!(!task.update_progress(10));
        assert_eq!(task.progress, 30);
        task.update_progress(250);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_sort_key_priority_then_age() {
        let low = sample();
        let mut high = sample();
        high.priority = 5;
        assert!(high.sort_key() < low.sort_key());
    }

    #[test]
    fn test_task_id_parse_and_short() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.short().starts_with("task-"));
        assert_eq!(id.short().len(), 13);
        assert!("nope".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_instance_id_follows_task_id() {
        let id = TaskId::new();
        let hex = id.0.simple().to_string();
        assert_eq!(id.instance_id(false), format!("inst_{}", &hex[..8]));
        assert_eq!(id.instance_id(true), format!("inst_{}", hex));
        assert_ne!(TaskId::new().instance_id(false), id.instance_id(false));
    }

    #[test]
    fn test_project_name_includes_instance() {
        let mut task = sample();
        assert_eq!(task.project_name(), "job-1");
        task.start("inst_2").unwrap();
        assert_eq!(task.project_name(), "job-1_inst_2");
    }
}
