//! Momentum rotation backtesting.
//!
//! Simulates a monthly top-N rebalance over historical rankings and prices,
//! producing a trade log, an equity curve and summary metrics.

mod engine;
mod error;
pub mod metrics;
mod position;
pub mod report;
mod sweep;

pub use engine::{BacktestConfig, BacktestEngine, BacktestResult, EquityPoint, PortfolioSnapshot};
pub use error::BacktestError;
pub use metrics::BacktestMetrics;
pub use position::{ExitReason, Position, TradeLog};
pub use report::BacktestReport;
pub use sweep::{grid, run_sweep, SweepOutcome};
