//! Configuration validation.
//!
//! Serde handles syntax; this module checks the semantic rules and returns
//! every violation rather than stopping at the first.

use std::fmt;

use crate::config::schema::{CorsPolicy, GatewayConfig};

/// A single semantic problem in a configuration.
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bind.trim().is_empty() {
        errors.push(ValidationError::new("bind", "must not be empty"));
    }

    match (&config.key, &config.cert) {
        (Some(_), None) => errors.push(ValidationError::new("cert", "key given without cert")),
        (None, Some(_)) => errors.push(ValidationError::new("key", "cert given without key")),
        _ => {}
    }

    if config.body_parser_limit.0 == 0 {
        errors.push(ValidationError::new("body_parser_limit", "must be greater than zero"));
    }

    if !config.socket_io_path.starts_with('/') {
        errors.push(ValidationError::new("socket_io_path", "must start with '/'"));
    }

    if config.bridge.timeout_ms == 0 {
        errors.push(ValidationError::new("bridge.timeout_ms", "must be greater than zero"));
    }

    if let CorsPolicy::List(origins) = &config.cors {
        if origins.iter().any(|o| o.trim().is_empty()) {
            errors.push(ValidationError::new("cors", "origin list contains an empty entry"));
        }
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
    use crate::config::schema::ByteSize;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let config = GatewayConfig {
            bind: " ".into(),
            key: Some("key.pem".into()),
            body_parser_limit: ByteSize(0),
            socket_io_path: "socket.io".into(),
            ..GatewayConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["bind", "cert", "body_parser_limit", "socket_io_path"]);
    }

    #[test]
    fn rejects_empty_cors_entry() {
        let config = GatewayConfig {
            cors: CorsPolicy::List(vec!["https://a.example".into(), "".into()]),
            ..GatewayConfig::default()
        };
        assert_eq!(validate_config(&config).unwrap_err()[0].field, "cors");
    }
}
