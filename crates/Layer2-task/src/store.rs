//! Queue snapshot persistence
//!
//! - `JsonSnapshotStore` - `processing_queue.json` via foundation `JsonStore`
//! - `MemorySnapshotStore` - 테스트/임베딩용
//!
//! 스냅샷마다 generation 번호가 있고, 이미 저장된 것보다 오래된 스냅샷은 버린다.

use crate::task::Task;
use chrono::{DateTime, Utc};
use odmq_foundation::{JsonStore, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// 스냅샷 파일명
pub const QUEUE_SNAPSHOT_FILE: &str = "processing_queue.json";

/// Durable view of the three task collections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Monotonic counter assigned under the queue locks
    #[serde(default)]
    pub generation: u64,

    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub pending: Vec<Task>,

    #[serde(default)]
    pub running: Vec<Task>,

    /// Newest completed tasks only
    #[serde(default)]
    pub completed: Vec<Task>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty() && self.completed.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.pending.len() + self.running.len() + self.completed.len()
    }
}

/// Snapshot backend
///
/// 호출은 blocking 스레드에서 이루어진다.
pub trait SnapshotStore: Send + Sync {
    /// Load the last snapshot, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<QueueSnapshot>>;

    /// Persist a snapshot; returns `false` when it was older than the last write
    fn save(&self, snapshot: &QueueSnapshot) -> Result<bool>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// JSON file store
// ============================================================================

/// `processing_queue.json` in a data directory
pub struct JsonSnapshotStore {
    store: JsonStore,
    last_generation: Mutex<Option<u64>>,
}

impl JsonSnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(data_dir),
            last_generation: Mutex::new(None),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.store.file_path(QUEUE_SNAPSHOT_FILE)
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Result<Option<QueueSnapshot>> {
        let snapshot = self.store.load_optional::<QueueSnapshot>(QUEUE_SNAPSHOT_FILE)?;
        if let Some(s) = &snapshot {
            let mut last = self.last_generation.lock();
            *last = Some(last.map_or(s.generation, |g| g.max(s.generation)));
        }
        Ok(snapshot)
    }

    fn save(&self, snapshot: &QueueSnapshot) -> Result<bool> {
        // 쓰기 전체를 잠금 안에서 수행해 순서를 보장
        let mut last = self.last_generation.lock();
        if matches!(*last, Some(g) if snapshot.generation <= g) {
            debug!(
                "Skipping stale snapshot generation {} (last {:?})",
                snapshot.generation, *last
            );
            return Ok(false);
        }
        self.store.save(QUEUE_SNAPSHOT_FILE, snapshot)?;
        *last = Some(snapshot.generation);
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps the last snapshot in memory
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<Option<QueueSnapshot>>,
    writes: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed with a snapshot (e.g. to simulate a restart)
    pub fn with_snapshot(snapshot: QueueSnapshot) -> Self {
        Self {
            inner: Mutex::new(Some(snapshot)),
            writes: Mutex::new(0),
        }
    }

    pub fn latest(&self) -> Option<QueueSnapshot> {
        self.inner.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<QueueSnapshot>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, snapshot: &QueueSnapshot) -> Result<bool> {
        let mut inner = self.inner.lock();
        if matches!(&*inner, Some(prev) if snapshot.generation <= prev.generation) {
            return Ok(false);
        }
        *inner = Some(snapshot.clone());
        *self.writes.lock() += 1;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SubmitRequest;
    use tempfile::TempDir;

    fn snapshot(generation: u64, pending: usize) -> QueueSnapshot {
        QueueSnapshot {
            generation,
            saved_at: Some(Utc::now()),
            pending: (0..pending)
                .map(|i| {
                    Task::new(
                        SubmitRequest::new(format!("job-{}", i), "o", "t", "/in"),
                        PathBuf::from("/p"),
                        i as u64,
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_json_store_roundtrip_and_stale_skip() {
        let temp = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(temp.path());
        assert!(store.load().unwrap().is_none());

        assert!(store.save(&snapshot(2, 2)).unwrap());
        // 오래된 generation 은 파일을 덮어쓰지 않는다
        assert!(!store.save(&snapshot(1, 5)).unwrap());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.generation, 2);
        assert_eq!(loaded.pending.len(), 2);
        assert!(store.path().ends_with(QUEUE_SNAPSHOT_FILE));
    }

    #[test]
    fn test_json_store_generation_survives_reopen() {
        let temp = TempDir::new().unwrap();
        JsonSnapshotStore::new(temp.path())
            .save(&snapshot(7, 1))
            .unwrap();

        let reopened = JsonSnapshotStore::new(temp.path());
        reopened.load().unwrap();
        assert!(!reopened.save(&snapshot(3, 0)).unwrap());
        assert!(reopened.save(&snapshot(8, 0)).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(QUEUE_SNAPSHOT_FILE), "garbage").unwrap();
        let store = JsonSnapshotStore::new(temp.path());
        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        assert!(store.save(&snapshot(1, 1)).unwrap());
        assert!(!store.save(&snapshot(1, 3)).unwrap());
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.latest().unwrap().task_count(), 1);
    }
}
