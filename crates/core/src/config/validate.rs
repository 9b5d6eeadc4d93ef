use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Storage section exists (enforced by serde)
/// - Server port is not 0
/// - Retry and redrive bounds are positive
/// - Backoff base does not exceed its cap
/// - Queue has a name
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.workflow.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "workflow.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.workflow.backoff_base_ms > config.workflow.backoff_cap_ms {
        return Err(ConfigError::ValidationError(format!(
            "workflow.backoff_base_ms ({}) exceeds workflow.backoff_cap_ms ({})",
            config.workflow.backoff_base_ms, config.workflow.backoff_cap_ms
        )));
    }

    if config.workflow.lease_secs == 0 {
        return Err(ConfigError::ValidationError(
            "workflow.lease_secs must be at least 1".to_string(),
        ));
    }

    if config.queue.max_receive_count == 0 {
        return Err(ConfigError::ValidationError(
            "queue.max_receive_count must be at least 1".to_string(),
        ));
    }

    if config.queue.name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "queue.name cannot be empty".to_string(),
        ));
    }

    if config.trigger.start_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "trigger.start_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}
