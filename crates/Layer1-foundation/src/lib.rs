//! # odmq-foundation
//!
//! Foundation layer for odmq:
//! - Error: 중앙 에러 타입 및 `Result` alias
//! - Storage: JsonStore (설정, 큐 스냅샷)
//! - Config: 통합 설정 (OdmqConfig, QueueConfig, ToolConfig)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    default_concurrency, validate_limits, OdmqConfig, QueueConfig, ToolConfig,
    MAX_CONCURRENCY_RANGE, MAX_INSTANCES_ENV, MAX_QUEUE_SIZE_RANGE, ODMQ_CONFIG_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{JsonStore, APP_DIR_NAME};
