//! 큐 통합 테스트 - 실제 QueueManager 와 스텁 executor
//!
//! `cargo test -p odmq-task --test queue_test`

use async_trait::async_trait;
use odmq_foundation::{Error, QueueConfig, Result};
use odmq_task::{
    Executor, MemorySnapshotStore, NoopHooks, ProgressEvent, ProgressSender, QueueManager,
    QueueSnapshot, RunOutcome, RunRequest, SnapshotStore, StatusArtifact, SubmitRequest, Task,
    TaskId, TaskState,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ============================================================================
// Stub executors
// ============================================================================

/// Blocks every run until the test releases a permit
struct GateExecutor {
    gate: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    progress: Vec<u8>,
}

impl GateExecutor {
    fn new() -> Arc<Self> {
        Self::with_progress(Vec::new())
    }

    fn with_progress(progress: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            progress,
        })
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for GateExecutor {
    async fn execute(&self, request: &RunRequest, progress: ProgressSender) -> Result<RunOutcome> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(job_name(&request.project_path));

        for value in &self.progress {
            let _ = progress.send(ProgressEvent::Progress {
                value: *value,
                message: format!("{}%", value),
            });
        }

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        permit.forget();
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut results = BTreeMap::new();
        results.insert(
            "orthophoto".to_string(),
            request.work.output.join("orthophoto.tif"),
        );
        Ok(RunOutcome {
            results,
            log_path: None,
            message: "done".to_string(),
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "gate"
    }
}

/// Fails or panics immediately
struct BrokenExecutor {
    panic: bool,
}

#[async_trait]
impl Executor for BrokenExecutor {
    async fn execute(&self, _request: &RunRequest, _progress: ProgressSender) -> Result<RunOutcome> {
        if self.panic {
            panic!("orchestration exploded");
        }
        Err(Error::tool_failure("Processing tool exited with code 2: bad input", Some(2)))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn job_name(project: &Path) -> String {
    project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn config(max_concurrent: usize, max_queue: usize) -> QueueConfig {
    QueueConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_max_queue_size(max_queue)
        .with_intervals(Duration::from_millis(20), Duration::from_millis(20))
}

fn manager_with(
    cfg: QueueConfig,
    executor: Arc<dyn Executor>,
    store: Arc<MemorySnapshotStore>,
) -> QueueManager {
    QueueManager::new(cfg, executor, store, Arc::new(NoopHooks)).unwrap()
}

fn request(temp: &TempDir, job: &str, owner: &str, priority: i32) -> SubmitRequest {
    SubmitRequest::new(job, owner, "tenant", temp.path().join("images"))
        .with_project_path(temp.path().join(job))
        .with_priority(priority)
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_status(m: &QueueManager, id: TaskId, status: TaskState) {
    wait_for(&format!("{} to be {}", id, status), || async move {
        m.status(id)
            .await
            .map(|v| v.status() == status)
            .unwrap_or(false)
    })
    .await;
}

fn read_artifact(path: &Path) -> Option<StatusArtifact> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn occurrences(snapshot: &QueueSnapshot, id: TaskId) -> usize {
    snapshot
        .pending
        .iter()
        .chain(&snapshot.running)
        .chain(&snapshot.completed)
        .filter(|t| t.task_id == id)
        .count()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_capacity_never_exceeded() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::new();
    let store = Arc::new(MemorySnapshotStore::new());
    let m = manager_with(config(2, 10), exec.clone(), store);

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(m.submit(request(&temp, &format!("job-{}", i), "o", 0)).await.unwrap());
    }
    m.start().await.unwrap();

    let mref = &m;
    wait_for("two running", || async move { mref.info().await.running_count == 2 }).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let info = m.info().await;
    assert_eq!(info.running_count, 2);
    assert_eq!(info.pending_count, 4);

    exec.release(6);
    for id in &ids {
        wait_status(&m, *id, TaskState::Completed).await;
    }
    assert_eq!(exec.peak(), 2);
    assert_eq!(exec.started().len(), 6);
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_each_task_in_exactly_one_collection() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::new();
    let store = Arc::new(MemorySnapshotStore::new());
    let m = manager_with(config(1, 10), exec.clone(), store.clone());

    let a = m.submit(request(&temp, "a", "o", 0)).await.unwrap();
    let b = m.submit(request(&temp, "b", "o", 0)).await.unwrap();
    let c = m.submit(request(&temp, "c", "o", 0)).await.unwrap();
    m.start().await.unwrap();
    wait_status(&m, a, TaskState::Running).await;
    m.cancel(c, "o").await.unwrap();

    let snapshot = store.latest().unwrap();
    for id in [a, b, c] {
        assert_eq!(occurrences(&snapshot, id), 1, "task {}", id);
    }
    assert_eq!(snapshot.running.len(), 1);
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(snapshot.completed.len(), 1);

    exec.release(2);
    wait_status(&m, b, TaskState::Completed).await;
    m.stop().await.unwrap();

    let snapshot = store.latest().unwrap();
    for id in [a, b, c] {
        assert_eq!(occurrences(&snapshot, id), 1, "task {}", id);
    }
}

#[tokio::test]
async fn test_priority_then_fifo_order() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::new();
    let m = manager_with(config(1, 10), exec.clone(), Arc::new(MemorySnapshotStore::new()));

    let a = m.submit(request(&temp, "A", "o", 1)).await.unwrap();
    let b = m.submit(request(&temp, "B", "o", 5)).await.unwrap();
    let c = m.submit(request(&temp, "C", "o", 1)).await.unwrap();

    let preview: Vec<TaskId> = m.info().await.next.iter().map(|v| v.task.task_id).collect();
    assert_eq!(preview, vec![b, a, c]);

    m.start().await.unwrap();
    exec.release(3);
    wait_status(&m, c, TaskState::Completed).await;

    assert_eq!(exec.started(), vec!["B", "A", "C"]);
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_scope() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::new();
    let m = manager_with(config(1, 10), exec.clone(), Arc::new(MemorySnapshotStore::new()));

    let running = m.submit(request(&temp, "x", "alice", 0)).await.unwrap();
    let queued = m.submit(request(&temp, "y", "alice", 0)).await.unwrap();
    m.start().await.unwrap();
    wait_status(&m, running, TaskState::Running).await;

    // 실행 중인 작업은 취소 불가
    assert!(!m.cancel(running, "alice").await.unwrap());
    // 다른 소유자의 작업은 취소 불가
    assert!(!m.cancel(queued, "bob").await.unwrap());
    assert_eq!(m.status(queued).await.unwrap().status(), TaskState::Queued);

    assert!(m.cancel(queued, "alice").await.unwrap());
    let view = m.status(queued).await.unwrap();
    assert_eq!(view.status(), TaskState::Cancelled);
    assert!(view.task.completed_at.is_some());
    assert_eq!(m.info().await.pending_count, 0);

    exec.release(1);
    wait_status(&m, running, TaskState::Completed).await;
    // 취소된 작업은 실행되지 않는다
    assert_eq!(exec.started(), vec!["x"]);
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_running_task_failed_after_restart() {
    let temp = TempDir::new().unwrap();

    let mut orphan = Task::new(request(&temp, "orphan", "o", 0), temp.path().join("orphan"), 0);
    orphan.start("inst_1").unwrap();
    let waiting = Task::new(request(&temp, "waiting", "o", 0), temp.path().join("waiting"), 1);
    let orphan_id = orphan.task_id;
    let waiting_id = waiting.task_id;

    let store = Arc::new(MemorySnapshotStore::with_snapshot(QueueSnapshot {
        generation: 41,
        pending: vec![waiting],
        running: vec![orphan],
        ..Default::default()
    }));
    let exec = GateExecutor::new();
    let m = manager_with(config(1, 10), exec.clone(), store.clone());
    m.start().await.unwrap();

    let view = m.status(orphan_id).await.unwrap();
    assert_eq!(view.status(), TaskState::Failed);
    assert!(view
        .task
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("restart"));

    // 대기 중이던 작업은 정상적으로 실행된다
    wait_status(&m, waiting_id, TaskState::Running).await;
    assert_eq!(exec.started(), vec!["waiting"]);
    assert!(store.latest().unwrap().generation > 41);

    exec.release(1);
    wait_status(&m, waiting_id, TaskState::Completed).await;
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_with_json_store() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");

    let exec = GateExecutor::new();
    let first = QueueManager::new(
        config(1, 10),
        exec.clone(),
        Arc::new(odmq_task::JsonSnapshotStore::new(&data)),
        Arc::new(NoopHooks),
    )
    .unwrap();
    let id = first.submit(request(&temp, "job", "o", 0)).await.unwrap();
    first.start().await.unwrap();
    wait_status(&first, id, TaskState::Running).await;
    // 상태 변경 후 스냅샷은 잠금 밖에서 기록된다
    let data_ref = &data;
    wait_for("running task on disk", || async move {
        odmq_task::JsonSnapshotStore::new(data_ref)
            .load()
            .ok()
            .flatten()
            .map(|s| s.running.len() == 1)
            .unwrap_or(false)
    })
    .await;

    // 비정상 종료를 흉내: stop 없이 새 매니저가 같은 파일을 읽는다
    let second = QueueManager::new(
        config(1, 10),
        GateExecutor::new(),
        Arc::new(odmq_task::JsonSnapshotStore::new(&data)),
        Arc::new(NoopHooks),
    )
    .unwrap();
    second.start().await.unwrap();

    let view = second.status(id).await.unwrap();
    assert_eq!(view.status(), TaskState::Failed);
    assert_eq!(
        view.task.error_message.as_deref(),
        Some("Processing interrupted by restart")
    );
    second.stop().await.unwrap();
    first.stop().await.unwrap();
}

#[tokio::test]
async fn test_progress_is_monotonic_and_mirrored_to_status_file() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::with_progress(vec![10, 5, 40]);
    let m = manager_with(config(1, 10), exec.clone(), Arc::new(MemorySnapshotStore::new()));

    let id = m.submit(request(&temp, "job", "o", 0)).await.unwrap();
    m.start().await.unwrap();
    wait_status(&m, id, TaskState::Running).await;
    let instance = m.status(id).await.unwrap().task.instance_id.unwrap();
    assert_eq!(instance, id.instance_id(false));

    // 상태 파일은 메모리 진행률 다음에 기록된다
    let artifact_path = StatusArtifact::path(&temp.path().join("job"), &instance);
    let path_ref = &artifact_path;
    wait_for("status file at 40", || async move {
        read_artifact(path_ref).map(|a| a.progress == 40).unwrap_or(false)
    })
    .await;

    let artifact = read_artifact(&artifact_path).unwrap();
    assert_eq!(artifact.status, TaskState::Running);
    assert_eq!(m.status(id).await.unwrap().task.progress, 40);

    exec.release(1);
    wait_status(&m, id, TaskState::Completed).await;
    let view = m.status(id).await.unwrap();
    assert_eq!(view.task.progress, 100);
    assert!(view.task.results.contains_key("orthophoto"));

    // 최종 상태 파일은 완료 집합으로 옮겨지기 전에 기록된다
    let artifact = read_artifact(&artifact_path).unwrap();
    assert_eq!(artifact.status, TaskState::Completed);
    assert_eq!(artifact.progress, 100);
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_next_task_on_same_project_keeps_its_own_status_file() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::new();
    let m = manager_with(config(1, 10), exec.clone(), Arc::new(MemorySnapshotStore::new()));

    let first = m.submit(request(&temp, "job", "o", 0)).await.unwrap();
    let second = m.submit(request(&temp, "job", "o", 0)).await.unwrap();
    m.start().await.unwrap();
    wait_status(&m, first, TaskState::Running).await;

    // 첫 작업이 끝나면 같은 프로젝트의 다음 작업이 바로 실행된다
    exec.release(1);
    wait_status(&m, second, TaskState::Running).await;

    let project = temp.path().join("job");
    let first_inst = m.status(first).await.unwrap().task.instance_id.unwrap();
    let second_inst = m.status(second).await.unwrap().task.instance_id.unwrap();
    assert_ne!(first_inst, second_inst);

    let second_path = StatusArtifact::path(&project, &second_inst);
    let sref = &second_path;
    wait_for("second status file", || async move { read_artifact(sref).is_some() }).await;

    let first_artifact = read_artifact(&StatusArtifact::path(&project, &first_inst)).unwrap();
    assert_eq!(first_artifact.status, TaskState::Completed);
    let second_artifact = read_artifact(&second_path).unwrap();
    assert_eq!(second_artifact.status, TaskState::Running);
    assert_eq!(second_artifact.progress, 0);

    exec.release(1);
    wait_status(&m, second, TaskState::Completed).await;
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_full_queue_rejects_and_leaves_pending_unchanged() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemorySnapshotStore::new());
    let m = manager_with(config(1, 10), GateExecutor::new(), store.clone());

    for i in 0..10 {
        m.submit(request(&temp, &format!("job-{}", i), "o", 0)).await.unwrap();
    }
    let before: Vec<TaskId> = store
        .latest()
        .unwrap()
        .pending
        .iter()
        .map(|t| t.task_id)
        .collect();

    let err = m.submit(request(&temp, "extra", "o", 9)).await.unwrap_err();
    assert!(matches!(err, Error::QueueFull { max: 10 }));
    assert!(err.is_user_facing());

    let after: Vec<TaskId> = store
        .latest()
        .unwrap()
        .pending
        .iter()
        .map(|t| t.task_id)
        .collect();
    assert_eq!(before, after);
    assert_eq!(m.info().await.pending_count, 10);
}

#[tokio::test]
async fn test_failures_are_recorded_not_raised() {
    let temp = TempDir::new().unwrap();
    let m = manager_with(
        config(2, 10),
        Arc::new(BrokenExecutor { panic: false }),
        Arc::new(MemorySnapshotStore::new()),
    );
    let id = m.submit(request(&temp, "bad", "o", 0)).await.unwrap();
    m.start().await.unwrap();
    wait_status(&m, id, TaskState::Failed).await;

    let view = m.status(id).await.unwrap();
    assert!(view
        .task
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("code 2"));
    assert!(view.task.results.is_empty());
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_orchestration_becomes_failed() {
    let temp = TempDir::new().unwrap();
    let m = manager_with(
        config(1, 10),
        Arc::new(BrokenExecutor { panic: true }),
        Arc::new(MemorySnapshotStore::new()),
    );
    let first = m.submit(request(&temp, "p1", "o", 0)).await.unwrap();
    let second = m.submit(request(&temp, "p2", "o", 0)).await.unwrap();
    m.start().await.unwrap();

    // 패닉 후에도 슬롯이 반환되어 다음 작업이 진행된다
    wait_status(&m, first, TaskState::Failed).await;
    wait_status(&m, second, TaskState::Failed).await;
    let view = m.status(first).await.unwrap();
    assert!(view
        .task
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("orchestration exploded"));
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_raising_limits_admits_more_tasks() {
    let temp = TempDir::new().unwrap();
    let exec = GateExecutor::new();
    let m = manager_with(config(1, 10), exec.clone(), Arc::new(MemorySnapshotStore::new()));

    for i in 0..3 {
        m.submit(request(&temp, &format!("job-{}", i), "o", 0)).await.unwrap();
    }
    m.start().await.unwrap();
    let mref = &m;
    wait_for("one running", || async move { mref.info().await.running_count == 1 }).await;

    m.set_limits(3, 10).unwrap();
    wait_for("three running", || async move { mref.info().await.running_count == 3 }).await;

    // 실행 중인 작업의 인스턴스 ID 는 작업 ID 에서 파생되어 서로 다르다
    let views = m.tasks_for_owner("o").await;
    let mut instances: Vec<String> = views
        .iter()
        .filter_map(|v| v.task.instance_id.clone())
        .collect();
    for v in &views {
        assert_eq!(v.task.instance_id, Some(v.task.task_id.instance_id(false)));
    }
    instances.sort();
    instances.dedup();
    assert_eq!(instances.len(), 3);

    exec.release(3);
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_tasks_for_owner_newest_first() {
    let temp = TempDir::new().unwrap();
    let m = manager_with(config(1, 10), GateExecutor::new(), Arc::new(MemorySnapshotStore::new()));

    let first = m.submit(request(&temp, "one", "alice", 0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    m.submit(request(&temp, "other", "bob", 0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = m.submit(request(&temp, "two", "alice", 0)).await.unwrap();

    let views = m.tasks_for_owner("alice").await;
    let ids: Vec<TaskId> = views.iter().map(|v| v.task.task_id).collect();
    assert_eq!(ids, vec![second, first]);
    assert!(views.iter().all(|v| v.queue_position.is_some()));
}

#[tokio::test]
async fn test_start_is_idempotent_and_status_unknown_id() {
    let m = manager_with(config(1, 10), GateExecutor::new(), Arc::new(MemorySnapshotStore::new()));
    m.start().await.unwrap();
    m.start().await.unwrap();
    assert!(m.is_started());

    let err = m.status(TaskId::new()).await.unwrap_err();
    assert!(matches!(err, Error::TaskNotFound(_)));

    m.stop().await.unwrap();
    assert!(!m.is_started());
}
