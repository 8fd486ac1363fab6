//! # odmq-task
//!
//! Bounded-concurrency scheduling of photogrammetry processing tasks.
//!
//! ## Features
//!
//! - Priority-ordered pending queue with runtime-adjustable limits
//! - Dispatch loop that never blocks on running work
//! - External CLI orchestration in isolated per-instance directories
//! - Progress parsing and per-task status/log files
//! - Snapshot persistence with restart recovery
//!
//! ```text
//! submit ─▶ pending ─dispatch─▶ running ─executor─▶ completed
//!                                  │                    ▲
//!                                  └── progress events ─┘
//! ```

pub mod executor;
pub mod hooks;
pub mod log;
pub mod manager;
pub mod progress;
pub mod runner;
pub mod state;
pub mod store;
pub mod task;

// Queue
pub use manager::{estimate_wait, QueueInfo, QueueManager};
pub use runner::StatusArtifact;
pub use state::TaskState;
pub use task::{SubmitRequest, Task, TaskId, TaskView, WorkPaths};

// Execution
pub use executor::{
    collect_artifacts, default_options, Executor, OdmExecutor, ProgressEvent, ProgressSender,
    RunOutcome, RunRequest, ToolLocator,
};
pub use hooks::{FsHooks, NoopHooks, TaskHooks};
pub use progress::{ProgressParser, ProgressTracker};

// Logs
pub use log::{LogEntry, LogLevel, TaskLog};

// Persistence
pub use store::{
    JsonSnapshotStore, MemorySnapshotStore, QueueSnapshot, SnapshotStore, QUEUE_SNAPSHOT_FILE,
};
