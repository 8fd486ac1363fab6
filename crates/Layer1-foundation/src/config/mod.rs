//! Config - 통합 설정 관리
//!
//! - `queue.rs` - QueueConfig 큐 한도 및 스케줄링 주기
//! - `tool.rs` - ToolConfig 외부 CLI 도구 탐색/설치
//! - `odmq.rs` - OdmqConfig 통합 설정 (글로벌 + 프로젝트 병합)

mod odmq;
mod queue;
mod tool;

pub use odmq::{OdmqConfig, ODMQ_CONFIG_FILE};
pub use queue::{
    default_concurrency, validate_limits, QueueConfig, MAX_CONCURRENCY_RANGE, MAX_INSTANCES_ENV,
    MAX_QUEUE_SIZE_RANGE,
};
pub use tool::ToolConfig;
