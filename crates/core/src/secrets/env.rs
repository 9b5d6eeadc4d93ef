//! Environment variable parameter backend.

use super::{normalize_name, ParameterStore, SecretsError};

/// Reads parameters from environment variables.
///
/// `db/path` with prefix `ASSETFLOW_PARAM_` is read from `ASSETFLOW_PARAM_DB_PATH`.
pub struct EnvParameterStore {
    prefix: String,
}

impl EnvParameterStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable holding the named parameter.
    pub fn variable_name(&self, name: &str) -> String {
        let suffix: String = normalize_name(name)
            .chars()
            .map(|c| match c {
                '/' | '-' | '.' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl ParameterStore for EnvParameterStore {
    fn get(&self, name: &str) -> Result<Option<String>, SecretsError> {
        let variable = self.variable_name(name);
        match std::env::var(&variable) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretsError::InvalidValue {
                name: name.to_string(),
            }),
        }
    }

    fn backend_name(&self) -> &'static str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name() {
        let store = EnvParameterStore::new("ASSETFLOW_PARAM_");
        assert_eq!(
            store.variable_name("/assetflow/db/path"),
            "ASSETFLOW_PARAM_DB_PATH"
        );
        assert_eq!(
            store.variable_name("ingest/token"),
            "ASSETFLOW_PARAM_INGEST_TOKEN"
        );
        assert_eq!(store.variable_name("a-b.c"), "ASSETFLOW_PARAM_A_B_C");
    }

    #[test]
    fn test_get_reads_environment() {
        let store = EnvParameterStore::new("ASSETFLOW_TEST_ENV_STORE_");
        std::env::set_var("ASSETFLOW_TEST_ENV_STORE_DB_PATH", "/var/lib/assetflow.db");

        assert_eq!(
            store.get("/assetflow/db/path").unwrap().as_deref(),
            Some("/var/lib/assetflow.db")
        );
        assert_eq!(store.get("ingest/token").unwrap(), None);
    }
}
