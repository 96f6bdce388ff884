use std::path::PathBuf;

use domain_packaging::model::entity::WrapperOptions;
use serde::{Deserialize, Serialize};

/// Project-side settings the packaging core needs; how these get parsed from
/// files or the environment is the calling tool's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// "none" disables template-existence checks.
    #[serde(default = "ProjectConfig::default_project_type")]
    pub project_type: String,
    /// Directory holding the job templates.
    #[serde(default = "ProjectConfig::default_project_dir")]
    pub project_dir: PathBuf,
    /// Local scratch directory where rendered scripts are written before
    /// staging.
    #[serde(default = "ProjectConfig::default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(default = "Default::default")]
    pub wrapper: WrapperConfig,
}

/// Package-level overrides for thread-family wrappers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperConfig {
    #[serde(default = "Default::default")]
    pub queue: Option<String>,
    #[serde(default = "Default::default")]
    pub export: Option<String>,
    #[serde(default = "Default::default")]
    pub dependency: Option<String>,
    #[serde(default = "WrapperConfig::default_method")]
    pub method: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_type: Self::default_project_type(),
            project_dir: Self::default_project_dir(),
            tmp_dir: Self::default_tmp_dir(),
            wrapper: Default::default(),
        }
    }
}

impl ProjectConfig {
    pub fn default_project_type() -> String {
        "none".to_string()
    }
    pub fn default_project_dir() -> PathBuf {
        ".".into()
    }
    pub fn default_tmp_dir() -> PathBuf {
        "tmp".into()
    }
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            queue: None,
            export: None,
            dependency: None,
            method: Self::default_method(),
        }
    }
}

impl WrapperConfig {
    pub fn default_method() -> String {
        "wrap".to_string()
    }
}

impl From<&WrapperConfig> for WrapperOptions {
    fn from(config: &WrapperConfig) -> Self {
        WrapperOptions {
            queue: config.queue.clone().filter(|q| !q.eq_ignore_ascii_case("none")),
            export: config.export.clone(),
            dependency: config.dependency.clone(),
            method: Some(config.method.clone()),
        }
    }
}
