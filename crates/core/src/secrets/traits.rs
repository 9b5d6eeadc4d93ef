use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Failed to read parameter file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse parameter file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Parameter {name} is not valid UTF-8")]
    InvalidValue { name: String },
}

/// Read-only key-value source of connection parameters.
///
/// Names are hierarchical (`db/path`); a leading `/assetflow/` namespace is
/// accepted and ignored.
pub trait ParameterStore: Send + Sync {
    /// Fetch one parameter, `None` when it is not set.
    fn get(&self, name: &str) -> Result<Option<String>, SecretsError>;

    /// Name of this backend
    fn backend_name(&self) -> &'static str;
}

/// Canonical form of a parameter name: no leading slash or `assetflow/` namespace.
pub fn normalize_name(name: &str) -> &str {
    let name = name.trim_start_matches('/');
    name.strip_prefix("assetflow/").unwrap_or(name)
}
