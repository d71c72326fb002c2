//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, buffer sizes sane)
//! - Reject unknown log levels
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use crate::config::schema::EngineConfig;

/// Smallest response head limit accepted.
const MIN_HEAD_SIZE: usize = 1024;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `limiter.limit`.
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint, collecting all violations.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.limiter.limit == 0 {
        errors.push(ValidationError {
            field: "limiter.limit",
            message: "must be at least 1".into(),
        });
    }

    if config.client.write_high_water == 0 {
        errors.push(ValidationError {
            field: "client.write_high_water",
            message: "must be greater than 0".into(),
        });
    }

    if config.client.max_head_size < MIN_HEAD_SIZE {
        errors.push(ValidationError {
            field: "client.max_head_size",
            message: format!("must be at least {} bytes", MIN_HEAD_SIZE),
        });
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError {
            field: "observability.log_level",
            message: format!("unknown level {:?}", config.observability.log_level),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
