//! Read-only parameter collaborator, fetched once at startup.

mod config;
mod env;
mod file;
mod traits;

pub use config::*;
pub use env::*;
pub use file::*;
pub use traits::*;

use std::path::PathBuf;

/// Database path override.
pub const PARAM_DB_PATH: &str = "db/path";
/// Token required on the ingest endpoint when set.
pub const PARAM_INGEST_TOKEN: &str = "ingest/token";

/// Factory function to create a parameter store from config
pub fn create_parameter_store(
    config: &SecretsConfig,
) -> Result<Box<dyn ParameterStore>, SecretsError> {
    match config.backend {
        SecretsBackend::Env => Ok(Box::new(EnvParameterStore::new(config.prefix.clone()))),
        SecretsBackend::File => {
            let path = config.path.as_ref().ok_or_else(|| {
                SecretsError::ConfigurationError(
                    "secrets.path must be set when using the file backend".to_string(),
                )
            })?;
            Ok(Box::new(FileParameterStore::load(path)?))
        }
    }
}

/// Parameters the service reads at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupParameters {
    pub db_path: Option<PathBuf>,
    pub ingest_token: Option<String>,
}

impl StartupParameters {
    pub fn fetch(store: &dyn ParameterStore) -> Result<Self, SecretsError> {
        Ok(Self {
            db_path: store.get(PARAM_DB_PATH)?.map(PathBuf::from),
            ingest_token: store
                .get(PARAM_INGEST_TOKEN)?
                .filter(|token| !token.is_empty()),
        })
    }
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
