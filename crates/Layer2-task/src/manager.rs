//! Queue Manager - bounded-concurrency scheduling of processing tasks
//!
//! Features:
//! - Pending list ordered by (priority desc, created_at, submission seq)
//! - Capacity limits adjustable at runtime
//! - Single dispatch loop, orchestrations run as independent tasks
//! - Snapshot persistence and restart recovery
//!
//! 잠금 순서는 항상 pending → running → completed (`lock_all`).

use crate::executor::Executor;
use crate::hooks::TaskHooks;
use crate::runner::{self, CompletedCache, Dispatch};
use crate::state::TaskState;
use crate::store::{QueueSnapshot, SnapshotStore};
use crate::task::{SubmitRequest, Task, TaskId, TaskView};
use chrono::Utc;
use odmq_foundation::{validate_limits, Error, QueueConfig, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// Shared state
// ============================================================================

/// Runtime-adjustable limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Limits {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

/// State shared by the manager, the dispatch loop and running orchestrations
pub(crate) struct Shared {
    pub(crate) pending: Mutex<Vec<Task>>,
    pub(crate) running: Mutex<HashMap<TaskId, Task>>,
    pub(crate) completed: Mutex<CompletedCache>,
    limits: RwLock<Limits>,
    pub(crate) config: QueueConfig,
    generation: AtomicU64,
    seq: AtomicU64,
    store: Arc<dyn SnapshotStore>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) hooks: Arc<dyn TaskHooks>,
    pub(crate) wake: Notify,
}

/// All three collections locked in order
pub(crate) struct Collections<'a> {
    pub pending: MutexGuard<'a, Vec<Task>>,
    pub running: MutexGuard<'a, HashMap<TaskId, Task>>,
    pub completed: MutexGuard<'a, CompletedCache>,
}

impl Collections<'_> {
    /// Whether the id is in any of the three collections
    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.pending.iter().any(|t| t.task_id == *id)
            || self.running.contains_key(id)
            || self.completed.contains(id)
    }
}

impl Shared {
    pub(crate) async fn lock_all(&self) -> Collections<'_> {
        let pending = self.pending.lock().await;
        let running = self.running.lock().await;
        let completed = self.completed.lock().await;
        Collections {
            pending,
            running,
            completed,
        }
    }

    pub(crate) fn limits(&self) -> Limits {
        *self.limits.read()
    }

    /// Capture a snapshot; must be called with the collections locked
    pub(crate) fn snapshot(&self, c: &Collections<'_>) -> QueueSnapshot {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        QueueSnapshot {
            generation,
            saved_at: Some(Utc::now()),
            pending: c.pending.clone(),
            running: c.running.values().cloned().collect(),
            completed: c.completed.tail(self.config.snapshot_completed_tail),
        }
    }

    /// Write a snapshot on the blocking pool; failures are logged
    pub(crate) async fn persist(&self, snapshot: QueueSnapshot) {
        let store = Arc::clone(&self.store);
        let generation = snapshot.generation;
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(true)) => debug!(generation, "Queue snapshot saved"),
            Ok(Ok(false)) => debug!(generation, "Queue snapshot superseded"),
            Ok(Err(e)) => error!(generation, "Failed to save queue snapshot: {}", e),
            Err(e) => error!(generation, "Snapshot writer panicked: {}", e),
        }
    }

    /// Advisory wait for the pending task at 1-based `position`
    pub(crate) fn estimate_wait(&self, position: usize, running: usize) -> Duration {
        estimate_wait(
            position,
            running,
            self.limits().max_concurrent,
            self.config.average_job_duration(),
        )
    }

    fn pending_view(&self, c: &Collections<'_>, index: usize) -> TaskView {
        let position = index + 1;
        TaskView::pending(
            c.pending[index].clone(),
            position,
            self.estimate_wait(position, c.running.len()),
        )
    }
}

/// `0` if the task fits into a free slot, otherwise whole batches of average duration
pub fn estimate_wait(
    position: usize,
    running: usize,
    max_concurrent: usize,
    average: Duration,
) -> Duration {
    let max_concurrent = max_concurrent.max(1);
    let free = max_concurrent.saturating_sub(running);
    if position <= free {
        return Duration::ZERO;
    }
    let batches = (position - free).div_ceil(max_concurrent);
    average * batches as u32
}

// ============================================================================
// Info
// ============================================================================

/// Queue overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub pending_count: usize,
    pub running_count: usize,
    pub completed_count: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    /// Next pending tasks in dispatch order
    pub next: Vec<TaskView>,
}

// ============================================================================
// Queue Manager
// ============================================================================

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Queue Manager - owns pending/running/completed collections and the dispatch loop
#[derive(Clone)]
pub struct QueueManager {
    shared: Arc<Shared>,
    lifecycle: Arc<parking_lot::Mutex<Lifecycle>>,
}

impl QueueManager {
    /// Create a manager; nothing runs until `start`
    pub fn new(
        config: QueueConfig,
        executor: Arc<dyn Executor>,
        store: Arc<dyn SnapshotStore>,
        hooks: Arc<dyn TaskHooks>,
    ) -> Result<Self> {
        config.validate()?;
        let limits = Limits {
            max_concurrent: config.effective_max_concurrent(),
            max_queue_size: config.max_queue_size,
        };
        let completed =
            CompletedCache::new(config.completed_cache_max, config.completed_evict_batch);

        Ok(Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(Vec::new()),
                running: Mutex::new(HashMap::new()),
                completed: Mutex::new(completed),
                limits: RwLock::new(limits),
                config,
                generation: AtomicU64::new(0),
                seq: AtomicU64::new(0),
                store,
                executor,
                hooks,
                wake: Notify::new(),
            }),
            lifecycle: Arc::new(parking_lot::Mutex::new(Lifecycle::default())),
        })
    }

    // ========================================================================
    // Submit / Query
    // ========================================================================

    /// Submit a new task
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId> {
        if request.owner_id.is_empty() {
            return Err(Error::InvalidInput("owner_id is required".to_string()));
        }
        if request.input_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("input_path is required".to_string()));
        }

        let project_path = request.project_path.clone().unwrap_or_else(|| {
            self.shared
                .config
                .projects_root_or_default()
                .join(&request.tenant_id)
                .join(&request.job_id)
        });

        let (task_id, position, snapshot) = {
            let mut c = self.shared.lock_all().await;
            let max = self.shared.limits().max_queue_size;
            if c.pending.len() >= max {
                return Err(Error::QueueFull { max });
            }

            let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst);
            let task = Task::new(request, project_path, seq);
            let task_id = task.task_id;
            let key = task.sort_key();
            let index = c.pending.partition_point(|t| t.sort_key() <= key);
            c.pending.insert(index, task);
            (task_id, index + 1, self.shared.snapshot(&c))
        };

        info!(task = %task_id.short(), position, "Task submitted");
        self.shared.persist(snapshot).await;
        self.shared.wake.notify_one();
        Ok(task_id)
    }

    /// Look up a task: running, then pending, then completed
    pub async fn status(&self, task_id: TaskId) -> Result<TaskView> {
        let c = self.shared.lock_all().await;

        if let Some(task) = c.running.get(&task_id) {
            return Ok(TaskView::new(task.clone()));
        }
        if let Some(index) = c.pending.iter().position(|t| t.task_id == task_id) {
            return Ok(self.shared.pending_view(&c, index));
        }
        if let Some(task) = c.completed.get(&task_id) {
            return Ok(TaskView::new(task.clone()));
        }
        Err(Error::TaskNotFound(task_id.to_string()))
    }

    /// All tasks of one owner, newest first
    pub async fn tasks_for_owner(&self, owner_id: &str) -> Vec<TaskView> {
        let c = self.shared.lock_all().await;

        let mut views: Vec<TaskView> = c
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.owner_id == owner_id)
            .map(|(i, _)| self.shared.pending_view(&c, i))
            .collect();
        views.extend(
            c.running
                .values()
                .chain(c.completed.iter())
                .filter(|t| t.owner_id == owner_id)
                .cloned()
                .map(TaskView::new),
        );
        views.sort_by(|a, b| b.task.created_at.cmp(&a.task.created_at));
        views
    }

    /// Queue overview with a preview of the next pending tasks
    pub async fn info(&self) -> QueueInfo {
        let c = self.shared.lock_all().await;
        let limits = self.shared.limits();
        let preview = self.shared.config.preview_size.min(c.pending.len());

        QueueInfo {
            pending_count: c.pending.len(),
            running_count: c.running.len(),
            completed_count: c.completed.len(),
            max_concurrent: limits.max_concurrent,
            max_queue_size: limits.max_queue_size,
            next: (0..preview)
                .map(|i| self.shared.pending_view(&c, i))
                .collect(),
        }
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Cancel a queued task owned by `owner_id`
    ///
    /// Returns `false` for every task that is not cancellable by this owner.
    pub async fn cancel(&self, task_id: TaskId, owner_id: &str) -> Result<bool> {
        match self.try_cancel(task_id, owner_id).await {
            Ok(()) => Ok(true),
            Err(Error::TaskNotFound(_)) | Err(Error::InvalidTransition(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Like `cancel`, with the reason on failure
    pub async fn try_cancel(&self, task_id: TaskId, owner_id: &str) -> Result<()> {
        let snapshot = {
            let mut c = self.shared.lock_all().await;

            if let Some(index) = c.pending.iter().position(|t| t.task_id == task_id) {
                if c.pending[index].owner_id != owner_id {
                    return Err(Error::InvalidTransition(format!(
                        "{} is not owned by {}",
                        task_id.short(),
                        owner_id
                    )));
                }
                let mut task = c.pending.remove(index);
                if let Err(e) = task.cancel() {
                    c.pending.insert(index, task);
                    return Err(e);
                }
                c.completed.insert(task);
                self.shared.snapshot(&c)
            } else if c.running.contains_key(&task_id) {
                return Err(Error::InvalidTransition(format!(
                    "{} is running and cannot be cancelled",
                    task_id.short()
                )));
            } else if let Some(task) = c.completed.get(&task_id) {
                return Err(Error::InvalidTransition(format!(
                    "{} is already {}",
                    task_id.short(),
                    task.status
                )));
            } else {
                return Err(Error::TaskNotFound(task_id.to_string()));
            }
        };

        info!(task = %task_id.short(), "Task cancelled");
        self.shared.persist(snapshot).await;
        Ok(())
    }

    // ========================================================================
    // Limits
    // ========================================================================

    /// Change limits at runtime (concurrency 1-10, queue size 10-200)
    ///
    /// 이미 대기 중인 작업은 새 큐 크기보다 많아도 유지된다.
    pub fn set_limits(&self, max_concurrent: usize, max_queue_size: usize) -> Result<()> {
        validate_limits(max_concurrent, max_queue_size)?;
        {
            let mut limits = self.shared.limits.write();
            limits.max_concurrent = max_concurrent;
            limits.max_queue_size = max_queue_size;
        }
        info!(max_concurrent, max_queue_size, "Queue limits updated");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Current (max_concurrent, max_queue_size)
    pub fn limits(&self) -> (usize, usize) {
        let l = self.shared.limits();
        (l.max_concurrent, l.max_queue_size)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_started(&self) -> bool {
        self.lifecycle.lock().handle.is_some()
    }

    /// Load persisted state and launch the dispatch loop
    pub async fn start(&self) -> Result<()> {
        if self.is_started() {
            debug!("Queue manager already started");
            return Ok(());
        }

        let loaded = self.load_snapshot().await;
        let snapshot = self.recover(loaded).await;
        self.shared.persist(snapshot).await;

        let (tx, rx) = watch::channel(false);
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.handle.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        lifecycle.handle = Some(tokio::spawn(dispatch_loop(shared, rx)));
        lifecycle.shutdown = Some(tx);

        let limits = self.shared.limits();
        info!(
            max_concurrent = limits.max_concurrent,
            executor = self.shared.executor.name(),
            "Queue manager started"
        );
        Ok(())
    }

    /// Stop the dispatch loop and flush state
    ///
    /// 실행 중인 작업은 중단되지 않고 끝까지 실행된 뒤 스스로 상태를 저장한다.
    pub async fn stop(&self) -> Result<()> {
        let (shutdown, handle) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.shutdown.take(), lifecycle.handle.take())
        };

        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Dispatch loop ended abnormally: {}", e);
            }
        }

        self.flush().await;
        info!("Queue manager stopped");
        Ok(())
    }

    /// Persist the current state now
    pub async fn flush(&self) {
        let snapshot = {
            let c = self.shared.lock_all().await;
            self.shared.snapshot(&c)
        };
        self.shared.persist(snapshot).await;
    }

    async fn load_snapshot(&self) -> Option<QueueSnapshot> {
        let store = Arc::clone(&self.shared.store);
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!("Ignoring unreadable queue snapshot: {}", e);
                None
            }
            Err(e) => {
                warn!("Snapshot loader panicked: {}", e);
                None
            }
        }
    }

    /// Merge a loaded snapshot; tasks persisted as running become failed
    async fn recover(&self, loaded: Option<QueueSnapshot>) -> QueueSnapshot {
        let mut c = self.shared.lock_all().await;

        if let Some(snapshot) = loaded {
            self.shared
                .generation
                .fetch_max(snapshot.generation, Ordering::SeqCst);

            let max_seq = snapshot
                .pending
                .iter()
                .chain(&snapshot.running)
                .chain(&snapshot.completed)
                .map(|t| t.seq + 1)
                .max()
                .unwrap_or(0);
            self.shared.seq.fetch_max(max_seq, Ordering::SeqCst);

            let mut completed = snapshot.completed;
            completed.sort_by_key(|t| t.completed_at);
            for task in completed {
                if !c.contains(&task.task_id) {
                    c.completed.insert(task);
                }
            }

            let mut interrupted = 0;
            for mut task in snapshot.running {
                if c.contains(&task.task_id) {
                    continue;
                }
                // running 목록에 있던 작업은 상태와 무관하게 running 으로 취급
                task.status = TaskState::Running;
                if let Err(e) = task.fail(Error::InterruptedByRestart.to_string()) {
                    error!(task = %task.task_id.short(), "Recovery failed: {}", e);
                    continue;
                }
                warn!(task = %task.task_id.short(), "Task interrupted by restart");
                c.completed.insert(task);
                interrupted += 1;
            }

            let mut restored = 0;
            for task in snapshot.pending {
                if c.contains(&task.task_id) || task.status != TaskState::Queued {
                    continue;
                }
                c.pending.push(task);
                restored += 1;
            }
            c.pending.sort_by_key(|t| t.sort_key());

            info!(restored, interrupted, "Recovered queue state");
        }

        self.shared.snapshot(&c)
    }
}

// ============================================================================
// Dispatch loop
// ============================================================================

async fn dispatch_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!("Dispatch loop running");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match runner::dispatch_next(&shared).await {
            Ok(Dispatch::Started(_)) => continue,
            Ok(Dispatch::Busy) => shared.config.busy_interval(),
            Ok(Dispatch::Idle) => shared.config.idle_interval(),
            Err(e) => {
                error!("Dispatch failed: {}", e);
                shared.config.busy_interval()
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shared.wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Dispatch loop exited");
}
