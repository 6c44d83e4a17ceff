//! Open positions and completed round trips.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Dropped out of the ranked set at a rebalance
    Rotation,
    /// Still held when the simulation horizon ended
    HorizonEnd,
}

/// An open holding of one symbol.
///
/// Sized from a fixed slot (initial capital / top-N), never from current
/// equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_date: NaiveDate,
    /// Entry close; 0.0 when the price lookup failed
    pub entry_price: f64,
    /// Whole units bought
    pub quantity: u64,
    /// quantity × entry_price
    pub amount_used: f64,
    /// False when `entry_price` is the zero sentinel rather than an observed close
    pub entry_priced: bool,
}

impl Position {
    /// Units affordable with `slot_allocation` at `price`.
    ///
    /// Zero for a missing, zero, negative or non-finite price.
    pub fn quantity_for(slot_allocation: f64, price: f64) -> u64 {
        if !(price.is_finite() && price > 0.0) || !(slot_allocation > 0.0) {
            return 0;
        }
        (slot_allocation / price).floor() as u64
    }

    /// Open a position. `entry_price` is `None` when no close was available.
    pub fn open(
        symbol: impl Into<String>,
        entry_date: NaiveDate,
        entry_price: Option<f64>,
        slot_allocation: f64,
    ) -> Self {
        let price = entry_price.unwrap_or(0.0);
        let quantity = Self::quantity_for(slot_allocation, price);

        Self {
            symbol: symbol.into(),
            entry_date,
            entry_price: price,
            quantity,
            amount_used: quantity as f64 * price,
            entry_priced: entry_price.is_some(),
        }
    }

    /// Profit if closed at `price`.
    pub fn profit_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity as f64
    }

    /// Close the position into an immutable trade record.
    pub fn close(self, exit_date: NaiveDate, exit_price: Option<f64>, reason: ExitReason) -> TradeLog {
        let price = exit_price.unwrap_or(0.0);
        let profit = self.profit_at(price);
        let profit_pct = if self.amount_used > 0.0 {
            profit / self.amount_used * 100.0
        } else {
            0.0
        };

        TradeLog {
            days_held: (exit_date - self.entry_date).num_days(),
            symbol: self.symbol,
            entry_date: self.entry_date,
            exit_date,
            entry_price: self.entry_price,
            exit_price: price,
            quantity: self.quantity,
            amount_used: self.amount_used,
            profit,
            profit_pct,
            max_drawdown: None,
            entry_priced: self.entry_priced,
            exit_priced: exit_price.is_some(),
            exit_reason: reason,
        }
    }
}

/// One completed (or horizon-closed) round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLog {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u64,
    pub amount_used: f64,
    /// (exit − entry) × quantity
    pub profit: f64,
    /// profit / amount_used × 100, 0 when nothing was deployed
    pub profit_pct: f64,
    pub days_held: i64,
    /// Running-peak drawdown of the close series over the holding window
    #[serde(default)]
    pub max_drawdown: Option<f64>,
    pub entry_priced: bool,
    pub exit_priced: bool,
    pub exit_reason: ExitReason,
}

impl TradeLog {
    pub fn is_winner(&self) -> bool {
        self.profit > 0.0
    }

    /// True when either side used the zero-price sentinel.
    pub fn has_unavailable_price(&self) -> bool {
        !(self.entry_priced && self.exit_priced)
    }
}
