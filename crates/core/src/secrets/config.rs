use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where startup parameters are read from.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecretsBackend {
    /// Environment variables (`/assetflow/db/path` -> `ASSETFLOW_PARAM_DB_PATH`).
    #[default]
    Env,
    /// A TOML file of `name = value` pairs.
    File,
}

/// Secrets / parameter collaborator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub backend: SecretsBackend,
    /// Environment variable prefix for the env backend.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Parameter file for the file backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_prefix() -> String {
    "ASSETFLOW_PARAM_".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretsBackend::default(),
            prefix: default_prefix(),
            path: None,
        }
    }
}
