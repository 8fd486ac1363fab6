//! Task executors
//!
//! - `OdmExecutor` - 외부 사진측량 CLI 를 인스턴스별 디렉토리에서 실행
//! - `ToolLocator` - 도구 탐색 및 1회 설치
//! - `options` - 기본 옵션 병합 및 명령줄 변환
//! - `artifacts` - 결과물 수집

pub mod artifacts;
pub mod install;
pub mod odm;
pub mod options;
pub mod r#trait;

pub use artifacts::{collect_artifacts, ARTIFACT_PATTERNS};
pub use install::ToolLocator;
pub use odm::OdmExecutor;
pub use options::{build_command_args, default_options, merge_options, render_options};
pub use r#trait::{Executor, ProgressEvent, ProgressSender, RunOutcome, RunRequest};
