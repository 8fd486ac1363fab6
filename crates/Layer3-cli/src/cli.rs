//! Non-interactive CLI commands

use anyhow::{bail, Context};
use odmq_foundation::{validate_limits, OdmqConfig};
use odmq_task::{
    FsHooks, JsonSnapshotStore, OdmExecutor, QueueManager, SnapshotStore, SubmitRequest, Task,
    TaskId, TaskState, TaskView,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 상태 확인 주기
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tenant used for tasks submitted from the command line
const CLI_TENANT: &str = "local";

/// Parse `key=value` pairs; values are read as JSON when possible
pub fn parse_options(raw: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut options = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("Invalid option '{}', expected key=value", item);
        };
        let key = key.trim().trim_start_matches("--");
        if key.is_empty() {
            bail!("Invalid option '{}', empty key", item);
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        options.insert(key.to_string(), value);
    }
    Ok(options)
}

/// Submit one task and print progress until it is finished
pub async fn run_once(
    project: PathBuf,
    images: PathBuf,
    options: Map<String, Value>,
    priority: i32,
    max_concurrent: Option<usize>,
) -> anyhow::Result<()> {
    if !images.is_dir() {
        bail!("Images directory {} does not exist", images.display());
    }

    let mut config = OdmqConfig::load().context("Failed to load configuration")?;
    if let Some(max) = max_concurrent {
        validate_limits(max, config.queue.max_queue_size)?;
        config.queue.max_concurrent_jobs = Some(max);
    }

    let hooks = Arc::new(FsHooks::new());
    let executor = Arc::new(OdmExecutor::new(config.tool.clone(), hooks.clone())?);
    let store = Arc::new(JsonSnapshotStore::new(config.queue.data_dir_or_default()));
    let manager = QueueManager::new(config.queue.clone(), executor, store, hooks)?;
    manager.start().await?;

    let job_id = project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    let owner = std::env::var("USER").unwrap_or_else(|_| "local".to_string());

    let request = SubmitRequest::new(&job_id, owner, CLI_TENANT, images)
        .with_project_path(project)
        .with_priority(priority)
        .with_options(options);
    let task_id = manager.submit(request).await?;
    println!("Submitted {} ({})", task_id.short(), job_id);

    let view = tokio::select! {
        view = follow(&manager, task_id) => view?,
        _ = tokio::signal::ctrl_c() => {
            manager.stop().await?;
            bail!("Interrupted; {} is left in the queue state", task_id.short());
        }
    };
    manager.stop().await?;

    print_result(&view);
    if view.status() != TaskState::Completed {
        bail!("Task {} {}", task_id.short(), view.status());
    }
    Ok(())
}

async fn follow(manager: &QueueManager, task_id: TaskId) -> anyhow::Result<TaskView> {
    let mut last: Option<(TaskState, u8, Option<usize>)> = None;
    loop {
        let view = manager.status(task_id).await?;
        let current = (view.status(), view.task.progress, view.queue_position);
        if last != Some(current) {
            match view.status() {
                TaskState::Queued => println!(
                    "{} queued at position {} (~{}s wait)",
                    TaskState::Queued.symbol(),
                    view.queue_position.unwrap_or(0),
                    view.estimated_wait_secs.unwrap_or(0)
                ),
                state => println!("{} {} {}%", state.symbol(), state, view.task.progress),
            }
            last = Some(current);
        }
        if view.status().is_terminal() {
            return Ok(view);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_result(view: &TaskView) {
    let task = &view.task;
    if let Some(duration) = task.duration() {
        println!("\nFinished in {}s", duration.as_secs());
    }
    if let Some(error) = &task.error_message {
        println!("Error: {}", error);
    }
    for (kind, path) in &task.results {
        println!("  {:<12} {}", kind, path.display());
    }
    if let Some(log) = &task.log_path {
        println!("Log: {}", log.display());
    }
}

/// Print the persisted queue state
pub fn show_queue() -> anyhow::Result<()> {
    let config = OdmqConfig::load().context("Failed to load configuration")?;
    let store = JsonSnapshotStore::new(config.queue.data_dir_or_default());

    let Some(snapshot) = store.load()? else {
        println!("No queue state at {}", store.path().display());
        return Ok(());
    };

    println!("\n📋 Processing Queue\n");
    println!(
        "Pending: {}  Running: {}  Completed (recent): {}",
        snapshot.pending.len(),
        snapshot.running.len(),
        snapshot.completed.len()
    );
    if let Some(saved) = snapshot.saved_at {
        println!("Saved:   {}", saved.format("%Y-%m-%d %H:%M:%S"));
    }

    if !snapshot.running.is_empty() {
        println!("\nRunning");
        print_header();
        for task in &snapshot.running {
            print_row(task);
        }
    }

    if !snapshot.pending.is_empty() {
        println!("\nNext");
        print_header();
        for task in snapshot.pending.iter().take(config.queue.preview_size) {
            print_row(task);
        }
    }
    println!();
    Ok(())
}

fn print_header() {
    println!(
        "{:<15} {:<3} {:<20} {:<10} {:<8} {:<9}",
        "ID", "", "Job", "Instance", "Priority", "Progress"
    );
    println!("{}", "-".repeat(70));
}

fn print_row(task: &Task) {
    let job = if task.job_id.chars().count() > 18 {
        format!("{}...", task.job_id.chars().take(15).collect::<String>())
    } else {
        task.job_id.clone()
    };
    println!(
        "{:<15} {:<3} {:<20} {:<10} {:<8} {:>3}%",
        task.task_id.short(),
        task.status.symbol(),
        job,
        task.instance_id.as_deref().unwrap_or("-"),
        task.priority,
        task.progress
    );
}

/// Validate limits and write them to `.odmq/config.json`
pub fn save_limits(max_concurrent: usize, max_queue_size: usize) -> anyhow::Result<()> {
    validate_limits(max_concurrent, max_queue_size)?;

    let mut config = OdmqConfig::load_project()?;
    config.queue.max_concurrent_jobs = Some(max_concurrent);
    config.queue.max_queue_size = max_queue_size;
    config.save_project()?;

    println!(
        "✓ Limits saved: max_concurrent={}, max_queue_size={}",
        max_concurrent, max_queue_size
    );
    Ok(())
}
