//! Backtest performance metrics.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::position::TradeLog;

/// Largest peak-to-trough decline as a fraction of the running peak.
///
/// Zero for empty and single-point curves, and for non-decreasing curves.
/// Capped at 1.0: a curve that falls below zero has lost everything.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };

    let mut peak = first;
    let mut max_dd: f64 = 0.0;
    for &v in values {
        if v > peak {
            peak = v;
        }
        if peak > 0.0 {
            let dd = (peak - v) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd.min(1.0)
}

/// Compound annual growth rate over `months`.
///
/// Returns 0.0 when `initial` is not positive or `months` is not positive,
/// and -1.0 (total loss) when `final_equity` is not positive.
pub fn compute_cagr(initial: f64, final_equity: f64, months: i64) -> f64 {
    if initial <= 0.0 || months <= 0 {
        return 0.0;
    }
    if final_equity <= 0.0 {
        return -1.0;
    }
    (final_equity / initial).powf(12.0 / months as f64) - 1.0
}

/// Whole calendar months from `start` to `end` (negative if `end` < `start`).
pub fn whole_months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut months = (end.year() as i64 - start.year() as i64) * 12
        + (end.month() as i64 - start.month() as i64);
    if months > 0 && end.day() < start.day() {
        months -= 1;
    } else if months < 0 && end.day() > start.day() {
        months += 1;
    }
    months
}

/// Summary statistics derived from a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// Total number of trades
    pub total_trades: usize,
    /// Trades with profit > 0
    pub winning_trades: usize,
    /// winning / total (fraction, 0 when no trades)
    pub win_rate: f64,
    /// Mean profit per trade (0 when no trades)
    pub average_profit: f64,
    /// Sum of realized profit
    pub net_profit: f64,
    /// Equity after the horizon close
    pub final_equity: f64,
    /// Max drawdown of the equity curve (fraction)
    pub max_drawdown: f64,
    /// Compound annual growth rate (fraction)
    pub cagr: f64,
    /// Whole months between start and end date
    pub total_months: i64,
    /// Mean holding period (days)
    pub avg_days_held: f64,
    /// Trades that used the zero-price sentinel on either side
    pub unpriced_trades: usize,
}

impl BacktestMetrics {
    /// Calculate metrics from the trade log and equity values.
    pub fn compute(
        trades: &[TradeLog],
        equity: &[f64],
        initial_capital: f64,
        final_equity: f64,
        total_months: i64,
    ) -> Self {
        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count();
        let net_profit: f64 = trades.iter().map(|t| t.profit).sum();

        let (win_rate, average_profit, avg_days_held) = if total_trades > 0 {
            (
                winning_trades as f64 / total_trades as f64,
                net_profit / total_trades as f64,
                trades.iter().map(|t| t.days_held as f64).sum::<f64>() / total_trades as f64,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        Self {
            total_trades,
            winning_trades,
            win_rate,
            average_profit,
            net_profit,
            final_equity,
            max_drawdown: max_drawdown(equity),
            cagr: compute_cagr(initial_capital, final_equity, total_months),
            total_months,
            avg_days_held,
            unpriced_trades: trades.iter().filter(|t| t.has_unavailable_price()).count(),
        }
    }

    /// Total return relative to `initial_capital`, in percent.
    pub fn total_return_pct(&self, initial_capital: f64) -> f64 {
        if initial_capital > 0.0 {
            self.net_profit / initial_capital * 100.0
        } else {
            0.0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
