//! Configuration validation.
//!
//! Semantic checks on top of what serde already guarantees syntactically.
//! Returns all validation errors, not just the first, so a bad config can
//! be fixed in one pass.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a valid socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("limits.max_header_bytes must be greater than zero")]
    MaxHeaderBytes,

    #[error("firewall.rules_file must not be empty")]
    RulesFile,
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }
    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::MaxHeaderBytes);
    }
    if config.firewall.rules_file.as_os_str().is_empty() {
        errors.push(ValidationError::RulesFile);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
