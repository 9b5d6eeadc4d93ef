use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::queue::QueueConfig;
use crate::secrets::{SecretsBackend, SecretsConfig};
use crate::storage::StorageConfig;
use crate::trigger::TriggerConfig;
use crate::workflow::WorkflowConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("assetflow.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub workflow: WorkflowConfig,
    pub queue: QueueConfig,
    pub trigger: TriggerConfig,
    pub secrets: SanitizedSecretsConfig,
    /// Whether the ingest endpoint requires a token.
    pub ingest_token_configured: bool,
}

/// Secrets backend description without any fetched values.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSecretsConfig {
    pub backend: String,
    pub file_configured: bool,
}

impl SanitizedConfig {
    /// Build a sanitized view, recording whether a token was resolved at startup.
    pub fn new(config: &Config, ingest_token_configured: bool) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            workflow: config.workflow.clone(),
            queue: config.queue.clone(),
            trigger: config.trigger.clone(),
            secrets: SanitizedSecretsConfig {
                backend: match config.secrets.backend {
                    SecretsBackend::Env => "env".to_string(),
                    SecretsBackend::File => "file".to_string(),
                },
                file_configured: config.secrets.path.is_some(),
            },
            ingest_token_configured,
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self::new(config, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[storage]
root = "/srv/assets"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/srv/assets"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "assetflow.db");
        assert_eq!(config.workflow.max_attempts, 3);
        assert_eq!(config.queue.max_receive_count, 3);
        assert_eq!(config.queue.visibility_timeout_secs, 300);
    }

    #[test]
    fn test_deserialize_missing_storage_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/flow.sqlite"

[storage]
root = "/srv/assets"
read_timeout_secs = 5

[workflow]
max_attempts = 5
backoff_base_ms = 100
backoff_cap_ms = 1000

[queue]
name = "features"
visibility_timeout_secs = 60
max_receive_count = 4

[trigger]
start_attempts = 2
skip_prefixes = ["tmp/"]

[secrets]
backend = "file"
path = "/etc/assetflow/params.toml"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path.to_str().unwrap(), "/data/flow.sqlite");
        assert_eq!(config.storage.read_timeout_secs, 5);
        assert_eq!(config.workflow.max_attempts, 5);
        assert_eq!(config.queue.name, "features");
        assert_eq!(config.queue.max_receive_count, 4);
        assert_eq!(config.trigger.skip_prefixes, vec!["tmp/".to_string()]);
        assert_eq!(config.secrets.backend, SecretsBackend::File);
    }

    #[test]
    fn test_sanitized_config() {
        let config: Config = toml::from_str(
            r#"
[storage]
root = "/srv/assets"
"#,
        )
        .unwrap();

        let sanitized = SanitizedConfig::new(&config, true);
        assert_eq!(sanitized.secrets.backend, "env");
        assert!(!sanitized.secrets.file_configured);
        assert!(sanitized.ingest_token_configured);
        assert_eq!(sanitized.server.port, 8080);

        let json = serde_json::to_value(&sanitized).unwrap();
        assert!(json.get("secrets").is_some());
    }
}
