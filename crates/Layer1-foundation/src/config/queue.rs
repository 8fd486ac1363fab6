//! Queue Configuration - 동시 실행 수, 큐 크기, 디스패치 주기
//!
//! 런타임 변경 가능한 한도(`max_concurrent_jobs`, `max_queue_size`)와
//! 완료 캐시/스냅샷 크기를 정의합니다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// 동시 실행 인스턴스 수 환경 변수
pub const MAX_INSTANCES_ENV: &str = "ODMQ_MAX_INSTANCES";

/// 허용되는 동시 실행 수 범위
pub const MAX_CONCURRENCY_RANGE: RangeInclusive<usize> = 1..=10;

/// 허용되는 큐 크기 범위
pub const MAX_QUEUE_SIZE_RANGE: RangeInclusive<usize> = 10..=200;

/// 큐 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// 최대 동시 실행 수 (None이면 환경 변수 / CPU 수로 결정)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<usize>,

    /// 최대 대기열 크기
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// 슬롯이 없을 때 재확인 주기 (ms)
    #[serde(default = "default_busy_interval_ms")]
    pub busy_interval_ms: u64,

    /// 대기 작업이 없을 때 재확인 주기 (ms)
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    /// 예상 대기 시간 계산용 평균 작업 시간 (초)
    #[serde(default = "default_average_job_secs")]
    pub average_job_secs: u64,

    /// 완료 캐시 최대 크기
    #[serde(default = "default_completed_cache_max")]
    pub completed_cache_max: usize,

    /// 한 번에 제거할 완료 항목 수
    #[serde(default = "default_completed_evict_batch")]
    pub completed_evict_batch: usize,

    /// 스냅샷에 포함할 최근 완료 항목 수
    #[serde(default = "default_snapshot_completed_tail")]
    pub snapshot_completed_tail: usize,

    /// Info 미리보기 개수
    #[serde(default = "default_preview_size")]
    pub preview_size: usize,

    /// 스냅샷 저장 디렉토리
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// 프로젝트 루트 (`<root>/<tenant>/<job>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects_root: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: None,
            max_queue_size: default_max_queue_size(),
            busy_interval_ms: default_busy_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            average_job_secs: default_average_job_secs(),
            completed_cache_max: default_completed_cache_max(),
            completed_evict_batch: default_completed_evict_batch(),
            snapshot_completed_tail: default_snapshot_completed_tail(),
            preview_size: default_preview_size(),
            data_dir: None,
            projects_root: None,
        }
    }
}

impl QueueConfig {
    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = Some(max);
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    pub fn with_intervals(mut self, busy: Duration, idle: Duration) -> Self {
        self.busy_interval_ms = busy.as_millis() as u64;
        self.idle_interval_ms = idle.as_millis() as u64;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_projects_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.projects_root = Some(dir.into());
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// 실제 적용될 동시 실행 수
    pub fn effective_max_concurrent(&self) -> usize {
        self.max_concurrent_jobs.unwrap_or_else(default_concurrency)
    }

    pub fn busy_interval(&self) -> Duration {
        Duration::from_millis(self.busy_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn average_job_duration(&self) -> Duration {
        Duration::from_secs(self.average_job_secs)
    }

    /// 스냅샷 디렉토리 (미지정 시 `./data`)
    pub fn data_dir_or_default(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    /// 프로젝트 루트 (미지정 시 `./data/projects`)
    pub fn projects_root_or_default(&self) -> PathBuf {
        self.projects_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("data").join("projects"))
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// 한도 범위 검증
    pub fn validate(&self) -> Result<()> {
        validate_limits(self.effective_max_concurrent(), self.max_queue_size)?;
        if self.completed_evict_batch == 0 {
            return Err(Error::Config(
                "completedEvictBatch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn merge(&mut self, other: QueueConfig) {
        if other.max_concurrent_jobs.is_some() {
            self.max_concurrent_jobs = other.max_concurrent_jobs;
        }
        if other.max_queue_size != default_max_queue_size() {
            self.max_queue_size = other.max_queue_size;
        }
        if other.busy_interval_ms != default_busy_interval_ms() {
            self.busy_interval_ms = other.busy_interval_ms;
        }
        if other.idle_interval_ms != default_idle_interval_ms() {
            self.idle_interval_ms = other.idle_interval_ms;
        }
        if other.average_job_secs != default_average_job_secs() {
            self.average_job_secs = other.average_job_secs;
        }
        if other.completed_cache_max != default_completed_cache_max() {
            self.completed_cache_max = other.completed_cache_max;
        }
        if other.completed_evict_batch != default_completed_evict_batch() {
            self.completed_evict_batch = other.completed_evict_batch;
        }
        if other.snapshot_completed_tail != default_snapshot_completed_tail() {
            self.snapshot_completed_tail = other.snapshot_completed_tail;
        }
        if other.preview_size != default_preview_size() {
            self.preview_size = other.preview_size;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.projects_root.is_some() {
            self.projects_root = other.projects_root;
        }
    }
}

/// 동시 실행 수와 큐 크기가 허용 범위 안인지 확인
pub fn validate_limits(max_concurrent: usize, max_queue_size: usize) -> Result<()> {
    if !MAX_CONCURRENCY_RANGE.contains(&max_concurrent) {
        return Err(Error::InvalidLimits(format!(
            "max_concurrent_jobs must be between {} and {} (got {})",
            MAX_CONCURRENCY_RANGE.start(),
            MAX_CONCURRENCY_RANGE.end(),
            max_concurrent
        )));
    }
    if !MAX_QUEUE_SIZE_RANGE.contains(&max_queue_size) {
        return Err(Error::InvalidLimits(format!(
            "max_queue_size must be between {} and {} (got {})",
            MAX_QUEUE_SIZE_RANGE.start(),
            MAX_QUEUE_SIZE_RANGE.end(),
            max_queue_size
        )));
    }
    Ok(())
}

/// 기본 동시 실행 수
///
/// `ODMQ_MAX_INSTANCES` (숫자만) → CPU 수 / 2 (최대 8) 순서. 결과는 1..=10 으로 고정.
pub fn default_concurrency() -> usize {
    let env = std::env::var(MAX_INSTANCES_ENV).ok();
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    concurrency_from(env.as_deref(), cpus)
}

fn concurrency_from(env: Option<&str>, cpus: usize) -> usize {
    let value = match env {
        Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => {
            v.parse::<usize>().unwrap_or(1)
        }
        _ => (cpus / 2).clamp(1, 8),
    };
    value.clamp(*MAX_CONCURRENCY_RANGE.start(), *MAX_CONCURRENCY_RANGE.end())
}

// ============================================================================
// Helpers
// ============================================================================

fn default_max_queue_size() -> usize {
    50
}

fn default_busy_interval_ms() -> u64 {
    5_000
}

fn default_idle_interval_ms() -> u64 {
    2_000
}

fn default_average_job_secs() -> u64 {
    12 * 60
}

fn default_completed_cache_max() -> usize {
    1000
}

fn default_completed_evict_batch() -> usize {
    100
}

fn default_snapshot_completed_tail() -> usize {
    100
}

fn default_preview_size() -> usize {
    5
}
