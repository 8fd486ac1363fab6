//! Odmq Config - 통합 설정
//!
//! 글로벌(`~/.config/odmq/config.json`) 설정 위에 프로젝트(`.odmq/config.json`)
//! 설정을 병합합니다.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{QueueConfig, ToolConfig};

/// 설정 파일명
pub const ODMQ_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Odmq Config (통합)
// ============================================================================

/// odmq 통합 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OdmqConfig {
    /// 버전 (마이그레이션용)
    #[serde(default = "default_version")]
    pub version: u32,

    /// 큐 설정
    #[serde(default)]
    pub queue: QueueConfig,

    /// 외부 도구 설정
    #[serde(default)]
    pub tool: ToolConfig,
}

impl Default for OdmqConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            queue: QueueConfig::default(),
            tool: ToolConfig::default(),
        }
    }
}

impl OdmqConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let global = JsonStore::global().ok();
        let project = JsonStore::current_project().ok();
        Self::load_from(global.as_ref(), project.as_ref())
    }

    /// 지정된 저장소에서 병합 로드 (project 가 우선)
    pub fn load_from(global: Option<&JsonStore>, project: Option<&JsonStore>) -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Some(store) = global {
            if let Some(global_config) = store.load_optional::<OdmqConfig>(ODMQ_CONFIG_FILE)? {
                debug!("Loaded global config from {}", store.base_dir().display());
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Some(store) = project {
            if let Some(project_config) = store.load_optional::<OdmqConfig>(ODMQ_CONFIG_FILE)? {
                debug!("Loaded project config from {}", store.base_dir().display());
                config.merge(project_config);
            }
        }

        config.queue.validate()?;
        Ok(config)
    }

    /// 프로젝트 설정만 로드
    pub fn load_project() -> Result<Self> {
        let store = JsonStore::current_project()?;
        Ok(store.load_or_default(ODMQ_CONFIG_FILE))
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        let store = JsonStore::current_project()?;
        self.save_to(&store)
    }

    pub fn save_to(&self, store: &JsonStore) -> Result<()> {
        store.save(ODMQ_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: OdmqConfig) {
        self.queue.merge(other.queue);
        self.tool.merge(other.tool);
    }
}

fn default_version() -> u32 {
    1
}
