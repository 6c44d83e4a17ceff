//! Backtest run errors.

use thiserror::Error;

/// Errors that abort a backtest run.
///
/// Data gaps (a failed ranking, a missing price) never appear here; they are
/// absorbed per period and recorded in the result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BacktestError {
    #[error("Invalid backtest configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Backtest cancelled before period {period}")]
    Cancelled { period: u32 },

    #[error("Backtest worker failed: {0}")]
    Worker(String),
}

impl BacktestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<BacktestError> for fund_common::Error {
    fn from(err: BacktestError) -> Self {
        match err {
            BacktestError::InvalidConfiguration(msg) => fund_common::Error::InvalidInput(msg),
            other => fund_common::Error::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BacktestError::InvalidConfiguration("top_n must be at least 1".into());
        assert!(err.to_string().contains("top_n"));
        assert_eq!(
            BacktestError::Cancelled { period: 3 }.to_string(),
            "Backtest cancelled before period 3"
        );
    }

    #[test]
    fn test_into_common_error() {
        let err: fund_common::Error = BacktestError::InvalidConfiguration("bad".into()).into();
        assert_eq!(err.exit_code(), 2);

        let err: fund_common::Error = BacktestError::Cancelled { period: 0 }.into();
        assert_eq!(err.exit_code(), 1);
    }
}
