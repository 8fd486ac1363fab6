//! Storage module for odmq
//!
//! - `json`: JSON - 범용 파일 저장/로드 (설정, 큐 스냅샷)

mod json;

// JSON Storage (범용)
pub use json::{JsonStore, APP_DIR_NAME};
