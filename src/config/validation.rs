//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, limits, the path prefix and the trusted-client header
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;
use axum::http::{HeaderName, HeaderValue};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    let prefix = &config.router.path_prefix;
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        errors.push(ValidationError::new(
            "router.path_prefix",
            "must start with '/' and must not end with '/'",
        ));
    }
    if config.router.server_name.trim().is_empty() {
        errors.push(ValidationError::new("router.server_name", "must not be empty"));
    }
    if HeaderName::try_from(config.router.trusted_client_header.as_str()).is_err() {
        errors.push(ValidationError::new(
            "router.trusted_client_header",
            format!("'{}' is not a valid header name", config.router.trusted_client_header),
        ));
    }
    if HeaderValue::from_str(&config.router.trusted_client_value).is_err() {
        errors.push(ValidationError::new(
            "router.trusted_client_value",
            "is not a valid header value",
        ));
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    if config.auth.users.iter().any(|u| u.trim().is_empty()) {
        errors.push(ValidationError::new("auth.users", "user names must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.listener.max_connections = 0;
        config.router.path_prefix = "wiki/".into();
        config.router.trusted_client_header = "bad header".into();
        config.security.max_body_size = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.max_connections",
                "router.path_prefix",
                "router.trusted_client_header",
                "security.max_body_size",
            ]
        );
    }

    #[test]
    fn prefix_rules() {
        let mut config = ServerConfig::default();
        config.router.path_prefix = "/wiki".into();
        assert!(validate_config(&config).is_ok());
        config.router.path_prefix = "/wiki/".into();
        assert!(validate_config(&config).is_err());
    }
}
