//! Configuration validation for the fund-manager tools.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{BacktestSettings, Config, DatabaseConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.database.validate() {
            errors.push(e);
        }

        if let Err(e) = self.backtest.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if self.backtest.trade_log_path == self.database.path {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "backtest.trade_log_path and database.path both point at {}",
                    self.database.path.display()
                ),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::MissingField {
                field: "database.path".into(),
            });
        }
        Ok(())
    }
}

impl Validate for BacktestSettings {
    fn validate(&self) -> ValidationResult<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "backtest.initial_capital".into(),
                reason: format!("must be a positive amount, got {}", self.initial_capital),
            });
        }

        if self.top_n == 0 {
            return Err(ValidationError::InvalidValue {
                field: "backtest.top_n".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.trailing_months == 0 {
            return Err(ValidationError::InvalidValue {
                field: "backtest.trailing_months".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.end_date < self.start_date {
            return Err(ValidationError::InvalidValue {
                field: "backtest.end_date".into(),
                reason: format!(
                    "{} is before start date {}",
                    self.end_date, self.start_date
                ),
            });
        }

        if self.universe.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "backtest.universe".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
