//! Error types for odmq
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// odmq 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid limits: {0}")]
    InvalidLimits(String),

    // ========================================================================
    // 큐 관련
    // ========================================================================
    #[error("Queue is full (max {max} tasks)")]
    QueueFull { max: usize },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Processing interrupted by restart")]
    InterruptedByRestart,

    // ========================================================================
    // 외부 도구 관련
    // ========================================================================
    #[error("External tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    #[error("External tool failed: {message}")]
    ExternalToolFailure {
        message: String,
        exit_code: Option<i32>,
    },

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 호출자에게 동기적으로 반환되는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::QueueFull { .. }
                | Error::TaskNotFound(_)
                | Error::InvalidTransition(_)
                | Error::InvalidLimits(_)
                | Error::InvalidInput(_)
        )
    }

    /// External tool failure helper
    pub fn tool_failure(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Error::ExternalToolFailure {
            message: message.into(),
            exit_code,
        }
    }
}
