//! Task runner - moves a dispatched task from Queued to a terminal state
//!
//! - 인스턴스 ID 할당 (`inst_<id prefix>`, 작업마다 고유)
//! - 진행률 이벤트를 받아 메모리 레코드와 상태 파일을 함께 갱신 (유일한 writer)
//! - 종료 시 running → completed 이동, 캐시 정리, 스냅샷 저장

use crate::executor::{ProgressEvent, RunOutcome, RunRequest};
use crate::manager::Shared;
use crate::state::TaskState;
use crate::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use odmq_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// A task was admitted
    Started(TaskId),
    /// No free slot
    Busy,
    /// Nothing pending
    Idle,
}

// ============================================================================
// Completed cache
// ============================================================================

/// Terminal tasks in completion order, evicted in batches
#[derive(Debug)]
pub(crate) struct CompletedCache {
    order: VecDeque<TaskId>,
    tasks: HashMap<TaskId, Task>,
    max: usize,
    batch: usize,
}

impl CompletedCache {
    pub(crate) fn new(max: usize, batch: usize) -> Self {
        Self {
            order: VecDeque::new(),
            tasks: HashMap::new(),
            max,
            batch: batch.max(1),
        }
    }

    /// Insert a terminal task; returns the number of evicted entries
    pub(crate) fn insert(&mut self, task: Task) -> usize {
        let id = task.task_id;
        if self.tasks.insert(id, task).is_none() {
            self.order.push_back(id);
        }

        if self.tasks.len() <= self.max {
            return 0;
        }
        let evict = self.batch.min(self.order.len());
        for old in self.order.drain(..evict) {
            self.tasks.remove(&old);
        }
        debug!("Evicted {} completed tasks", evict);
        evict
    }

    pub(crate) fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Oldest first
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Newest `n` entries, oldest first
    pub(crate) fn tail(&self, n: usize) -> Vec<Task> {
        let skip = self.order.len().saturating_sub(n);
        self.order
            .iter()
            .skip(skip)
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }
}

// ============================================================================
// Status artifact
// ============================================================================

/// `<project>/processing_status_<inst>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusArtifact {
    pub status: TaskState,
    pub message: String,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
}

impl StatusArtifact {
    pub fn new(status: TaskState, message: impl Into<String>, progress: u8) -> Self {
        Self {
            status,
            message: message.into(),
            progress,
            timestamp: Utc::now(),
        }
    }

    pub fn path(project: &Path, instance_id: &str) -> PathBuf {
        project.join(format!("processing_status_{}.json", instance_id))
    }

    /// Atomic write (temp file + rename)
    pub async fn write(&self, project: &Path, instance_id: &str) -> Result<()> {
        let path = Self::path(project, instance_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::create_dir_all(project).await?;
        let content = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

async fn write_artifact(task_label: &str, project: &Path, instance_id: &str, artifact: StatusArtifact) {
    if let Err(e) = artifact.write(project, instance_id).await {
        warn!(task = %task_label, "Failed to write status artifact: {}", e);
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Per-task instance id (`inst_<id prefix>`)
///
/// 앞 8자리가 실행 중인 작업이나 기존 출력 디렉토리와 겹치면 uuid 전체를 쓴다.
pub(crate) fn allocate_instance(task: &Task, running: &HashMap<TaskId, Task>) -> String {
    let used: HashSet<&str> = running
        .values()
        .filter_map(|t| t.instance_id.as_deref())
        .collect();
    let candidate = task.task_id.instance_id(false);
    let output = task.project_path.join(format!("output_{}", candidate));
    if used.contains(candidate.as_str()) || output.exists() {
        return task.task_id.instance_id(true);
    }
    candidate
}

/// Admit the next pending task if a slot is free
///
/// pending 에서 꺼내 running 에 넣는 것까지 한 번의 잠금 안에서 처리한다.
pub(crate) async fn dispatch_next(shared: &Arc<Shared>) -> Result<Dispatch> {
    let (task, snapshot) = {
        let mut c = shared.lock_all().await;
        let max_concurrent = shared.limits().max_concurrent;
        if c.running.len() >= max_concurrent {
            return Ok(Dispatch::Busy);
        }
        if c.pending.is_empty() {
            return Ok(Dispatch::Idle);
        }

        let mut task = c.pending.remove(0);
        let instance_id = allocate_instance(&task, &c.running);
        if let Err(e) = task.start(instance_id) {
            c.pending.insert(0, task);
            return Err(e);
        }
        c.running.insert(task.task_id, task.clone());
        let snapshot = shared.snapshot(&c);
        (task, snapshot)
    };

    info!(
        task = %task.task_id.short(),
        instance = task.instance_id.as_deref().unwrap_or("-"),
        priority = task.priority,
        "Dispatched task"
    );
    shared.persist(snapshot).await;

    let task_id = task.task_id;
    tokio::spawn(run_orchestration(Arc::clone(shared), task));
    Ok(Dispatch::Started(task_id))
}

// ============================================================================
// Orchestration
// ============================================================================

/// Drive one running task to a terminal state
pub(crate) async fn run_orchestration(shared: Arc<Shared>, task: Task) {
    let task_id = task.task_id;
    let label = task_id.short();

    let request = match RunRequest::from_task(&task) {
        Ok(r) => r,
        Err(e) => {
            error!(task = %label, "Setup failed: {}", e);
            finalize(&shared, task_id, Err(e)).await;
            return;
        }
    };

    write_artifact(
        &label,
        &request.project_path,
        &request.instance_id,
        StatusArtifact::new(
            TaskState::Running,
            format!("Processing started (instance {})", request.instance_id),
            0,
        ),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let executor = Arc::clone(&shared.executor);
    let run_request = request.clone();
    let handle = tokio::spawn(async move { executor.execute(&run_request, tx).await });

    // 실행이 끝나면 sender 가 drop 되어 루프가 종료된다
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::LogOpened(path) => {
                let mut running = shared.running.lock().await;
                if let Some(t) = running.get_mut(&task_id) {
                    t.log_path = Some(path);
                }
            }
            ProgressEvent::Progress { value, message } => {
                let updated = {
                    let mut running = shared.running.lock().await;
                    running
                        .get_mut(&task_id)
                        .map(|t| (t.update_progress(value), t.progress))
                };
                if let Some((true, progress)) = updated {
                    debug!(task = %label, progress, "Progress");
                    write_artifact(
                        &label,
                        &request.project_path,
                        &request.instance_id,
                        StatusArtifact::new(TaskState::Running, message, progress),
                    )
                    .await;
                }
            }
        }
    }

    let outcome = match handle.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let panic = join_err.into_panic();
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(task = %label, "Orchestration panicked: {}", detail);
            Err(Error::Internal(format!("Processing panicked: {}", detail)))
        }
        Err(join_err) => Err(Error::Internal(format!(
            "Processing was aborted: {}",
            join_err
        ))),
    };

    if outcome.is_ok() {
        if let Err(e) = shared.hooks.cleanup_inputs(&task).await {
            warn!(task = %label, "Input cleanup failed: {}", e);
        }
    }

    // 인스턴스가 반환되기 전에 최종 상태 파일을 기록
    let (status, message, progress) = match &outcome {
        Ok(o) => (TaskState::Completed, o.message.clone(), 100),
        Err(e) => {
            let current = shared
                .running
                .lock()
                .await
                .get(&task_id)
                .map_or(0, |t| t.progress);
            (TaskState::Failed, e.to_string(), current)
        }
    };
    write_artifact(
        &label,
        &request.project_path,
        &request.instance_id,
        StatusArtifact::new(status, message, progress),
    )
    .await;

    finalize(&shared, task_id, outcome).await;
}

/// Move a running task into the completed cache and persist
pub(crate) async fn finalize(shared: &Arc<Shared>, task_id: TaskId, outcome: Result<RunOutcome>) {
    let snapshot = {
        let mut c = shared.lock_all().await;
        let Some(mut task) = c.running.remove(&task_id) else {
            warn!(task = %task_id.short(), "Finished task is not in the running set");
            return;
        };

        let applied = match outcome {
            Ok(outcome) => {
                if outcome.log_path.is_some() {
                    task.log_path = outcome.log_path;
                }
                task.complete(outcome.results)
            }
            Err(e) => task.fail(e.to_string()),
        };
        if let Err(e) = applied {
            error!(task = %task_id.short(), "Cannot finalize task: {}", e);
        }

        match task.status {
            TaskState::Completed => info!(
                task = %task_id.short(),
                artifacts = task.results.len(),
                "Task completed"
            ),
            _ => warn!(
                task = %task_id.short(),
                error = task.error_message.as_deref().unwrap_or(""),
                "Task failed"
            ),
        }

        c.completed.insert(task);
        shared.snapshot(&c)
    };

    shared.persist(snapshot).await;
    shared.wake.notify_one();
}
