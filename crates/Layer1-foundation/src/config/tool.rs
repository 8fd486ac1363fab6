//! Tool Configuration - 외부 사진측량 CLI 탐색 및 설치 설정

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// 외부 도구 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// 명시적 도구 경로 (최우선)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_path: Option<PathBuf>,

    /// 순서대로 확인할 후보 경로
    #[serde(default = "default_candidate_paths")]
    pub candidate_paths: Vec<PathBuf>,

    /// PATH 에서 찾을 바이너리 이름
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// 도구가 없을 때 설치 시도 여부
    #[serde(default = "default_true")]
    pub auto_install: bool,

    /// 설치용 git 저장소
    #[serde(default = "default_install_repo")]
    pub install_repo: String,

    /// 설치 디렉토리
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// 실패 메시지에 포함할 마지막 출력 줄 수
    #[serde(default = "default_failure_tail_lines")]
    pub failure_tail_lines: usize,

    /// 기본 옵션 덮어쓰기 (작업 옵션보다 우선순위 낮음)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub default_options: Map<String, Value>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            candidate_paths: default_candidate_paths(),
            binary_name: default_binary_name(),
            auto_install: true,
            install_repo: default_install_repo(),
            install_dir: default_install_dir(),
            failure_tail_lines: default_failure_tail_lines(),
            default_options: Map::new(),
        }
    }
}

impl ToolConfig {
    pub fn with_tool_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tool_path = Some(path.into());
        self
    }

    pub fn without_install(mut self) -> Self {
        self.auto_install = false;
        self
    }

    /// 설치 후 실행할 진입 스크립트 경로
    pub fn installed_entry(&self) -> PathBuf {
        self.install_dir.join(&self.binary_name)
    }

    pub(crate) fn merge(&mut self, other: ToolConfig) {
        if other.tool_path.is_some() {
            self.tool_path = other.tool_path;
        }
        if other.candidate_paths != default_candidate_paths() {
            self.candidate_paths = other.candidate_paths;
        }
        if other.binary_name != default_binary_name() {
            self.binary_name = other.binary_name;
        }
        if !other.auto_install {
            self.auto_install = false;
        }
        if other.install_repo != default_install_repo() {
            self.install_repo = other.install_repo;
        }
        if other.install_dir != default_install_dir() {
            self.install_dir = other.install_dir;
        }
        if other.failure_tail_lines != default_failure_tail_lines() {
            self.failure_tail_lines = other.failure_tail_lines;
        }
        self.default_options.extend(other.default_options);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_candidate_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin/webodm.sh"),
        PathBuf::from("/opt/webodm/webodm.sh"),
        PathBuf::from("./webodm/webodm.sh"),
    ]
}

fn default_binary_name() -> String {
    "webodm.sh".to_string()
}

fn default_install_repo() -> String {
    "https://github.com/OpenDroneMap/WebODM.git".to_string()
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/opt/webodm")
}

fn default_failure_tail_lines() -> usize {
    5
}

fn default_true() -> bool {
    true
}
