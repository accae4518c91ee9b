//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer sizes, timeouts, backlog, ports)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function over the options snapshot
//! - Runs before a server binds or a client connects

use std::fmt;

use crate::config::schema::{ClientOptions, ConnectionOptions, ServerOptions};
use crate::net::framing::DUPLEX_HEADER_LEN;

/// Largest buffer a 32-bit signed length field can describe.
pub const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

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

fn check_connection(options: &ConnectionOptions, errors: &mut Vec<ValidationError>) {
    let minimum = if options.duplex { DUPLEX_HEADER_LEN + 1 } else { 1 };

    for (field, size) in [
        ("recv_buffer_size", options.recv_buffer_size),
        ("send_buffer_size", options.send_buffer_size),
    ] {
        if size < minimum {
            errors.push(ValidationError::new(
                field,
                format!("must be at least {minimum} bytes, got {size}"),
            ));
        } else if size > MAX_BUFFER_SIZE {
            errors.push(ValidationError::new(
                field,
                format!("must be at most {MAX_BUFFER_SIZE} bytes, got {size}"),
            ));
        }
    }

    if options.duplex && options.duplex_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "duplex_timeout_ms",
            "must be greater than zero when duplex is enabled",
        ));
    }
}

pub fn validate_server(options: &ServerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_connection(&options.connection, &mut errors);

    if options.backlog == 0 {
        errors.push(ValidationError::new("backlog", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_client(options: &ClientOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_connection(&options.connection, &mut errors);

    let endpoint = options.connection.endpoint;
    if endpoint.port() == 0 {
        errors.push(ValidationError::new("endpoint", "client endpoint needs a port"));
    }
    if endpoint.ip().is_unspecified() {
        errors.push(ValidationError::new(
            "endpoint",
            format!("cannot connect to unspecified address {}", endpoint.ip()),
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
    fn defaults_are_valid_for_server() {
        assert!(validate_server(&ServerOptions::default()).is_ok());
    }

    #[test]
    fn default_client_needs_an_endpoint() {
        let errors = validate_client(&ClientOptions::default()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.field == "endpoint"));
    }

    #[test]
    fn duplex_buffers_must_fit_the_header() {
        let mut options = ServerOptions::default();
        options.connection.duplex = true;
        options.connection.recv_buffer_size = DUPLEX_HEADER_LEN;
        options.connection.duplex_timeout_ms = 0;
        options.backlog = 0;

        let errors = validate_server(&options).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["recv_buffer_size", "duplex_timeout_ms", "backlog"]);
    }
}
