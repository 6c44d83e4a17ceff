//! Monthly momentum rotation engine.
//!
//! Each period the engine asks the ranking source for the top-N symbols by
//! trailing return, buys the newcomers with a fixed slot of the initial
//! capital, sells whatever dropped out, and books the realized profit into
//! equity. Positions still open at the end are closed at the horizon date.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use fund_common::config::BacktestSettings;
use fund_common::logging::{generate_run_id, short_run_id};

use super::error::BacktestError;
use super::metrics::{self, BacktestMetrics};
use super::position::{ExitReason, Position, TradeLog};
use crate::data::{PriceHistoryProvider, RankingSource, UniverseFilter};

// ============================================================================
// Configuration
// ============================================================================

/// Backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// First rebalance date
    pub start_date: NaiveDate,
    /// Horizon end; also the date open positions are closed at
    pub end_date: NaiveDate,
    /// Trailing return window for ranking (months)
    pub trailing_months: u32,
    /// Number of equal slots
    pub top_n: usize,
    /// Which tiers are eligible
    pub universe: UniverseFilter,
    /// Starting capital, also the basis for slot sizing
    pub initial_capital: f64,
    /// Compute per-position drawdown from the close series
    pub position_drawdown: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2025, 2, 19).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
            trailing_months: 12,
            top_n: 10,
            universe: UniverseFilter::All,
            initial_capital: 1_000_000.0,
            position_drawdown: false,
        }
    }
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            ..Default::default()
        }
    }

    /// Horizon spanning `periods` monthly rebalances starting at `start_date`.
    pub fn with_periods(start_date: NaiveDate, periods: u32) -> Result<Self, BacktestError> {
        if periods == 0 {
            return Err(BacktestError::InvalidConfiguration(
                "period count must be at least 1".into(),
            ));
        }
        let end_date = start_date
            .checked_add_months(Months::new(periods - 1))
            .ok_or_else(|| BacktestError::InvalidConfiguration("period count overflows the calendar".into()))?;
        Ok(Self::new(start_date, end_date))
    }

    /// Build from the `backtest` section of the config file.
    pub fn from_settings(settings: &BacktestSettings) -> Result<Self, BacktestError> {
        let universe = settings
            .universe
            .parse::<UniverseFilter>()
            .map_err(BacktestError::InvalidConfiguration)?;

        Ok(Self {
            start_date: settings.start_date,
            end_date: settings.end_date,
            trailing_months: settings.trailing_months,
            top_n: settings.top_n,
            universe,
            initial_capital: settings.initial_capital,
            position_drawdown: settings.position_drawdown,
        })
    }

    pub fn top_n(mut self, n: usize) -> Self {
        self.top_n = n;
        self
    }

    pub fn trailing_months(mut self, months: u32) -> Self {
        self.trailing_months = months;
        self
    }

    pub fn universe(mut self, universe: UniverseFilter) -> Self {
        self.universe = universe;
        self
    }

    pub fn initial_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn position_drawdown(mut self, enabled: bool) -> Self {
        self.position_drawdown = enabled;
        self
    }

    /// Reject configurations the simulation cannot run.
    pub fn validate(&self) -> Result<(), BacktestError> {
        let invalid = |msg: String| -> Result<(), BacktestError> { Err(BacktestError::InvalidConfiguration(msg)) };

        if self.top_n == 0 {
            return invalid("top_n must be at least 1".into());
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return invalid(format!("initial capital must be positive, got {}", self.initial_capital));
        }
        if self.trailing_months == 0 {
            return invalid("trailing window must be at least 1 month".into());
        }
        if self.end_date < self.start_date {
            return invalid(format!(
                "end date {} is before start date {}",
                self.end_date, self.start_date
            ));
        }
        if let UniverseFilter::Tiers(tiers) = &self.universe {
            if tiers.is_empty() {
                return invalid("universe has no tiers".into());
            }
        }
        Ok(())
    }

    /// Fixed capital per slot.
    pub fn slot_allocation(&self) -> f64 {
        self.initial_capital / self.top_n as f64
    }

    /// Rebalance date of period `k`, or `None` once past the horizon.
    ///
    /// Always offset from `start_date`, so a month-end start clamps per month
    /// without drifting (Jan 31 -> Feb 29 -> Mar 31).
    pub fn period_date(&self, k: u32) -> Option<NaiveDate> {
        self.start_date
            .checked_add_months(Months::new(k))
            .filter(|d| *d <= self.end_date)
    }

    /// Number of rebalance periods in the horizon.
    pub fn period_count(&self) -> u32 {
        let mut k = 0;
        while self.period_date(k).is_some() {
            k += 1;
        }
        k
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// One point of the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Period index; horizon-close points carry the period count
    pub period: u32,
    pub date: NaiveDate,
    pub equity: f64,
}

/// Holdings after a rebalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    /// Ranked order
    pub symbols: Vec<String>,
}

/// Backtest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Correlates this run's log lines
    pub run_id: String,
    /// Configuration used
    pub config: BacktestConfig,
    /// Performance metrics
    pub metrics: BacktestMetrics,
    /// Round trips ordered by entry date
    pub trades: Vec<TradeLog>,
    /// One point per processed period, then one per horizon close
    pub equity_curve: Vec<EquityPoint>,
    /// Realized profit of each processed period over initial capital
    pub period_returns: Vec<f64>,
    /// Holdings after each processed period
    pub portfolio_log: Vec<PortfolioSnapshot>,
    /// Dates whose ranking failed
    pub skipped_periods: Vec<NaiveDate>,
}

impl BacktestResult {
    /// Equity values in curve order.
    pub fn equity_values(&self) -> Vec<f64> {
        self.equity_curve.iter().map(|p| p.equity).collect()
    }

    /// Equity after all positions are closed.
    pub fn final_equity(&self) -> f64 {
        self.metrics.final_equity
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct RunState {
    equity: f64,
    positions: BTreeMap<String, Position>,
    trades: Vec<TradeLog>,
    equity_curve: Vec<EquityPoint>,
    period_returns: Vec<f64>,
    portfolio_log: Vec<PortfolioSnapshot>,
    skipped_periods: Vec<NaiveDate>,
}

/// Backtest engine
pub struct BacktestEngine {
    ranking: Arc<dyn RankingSource>,
    prices: Arc<dyn PriceHistoryProvider>,
}

impl BacktestEngine {
    /// Create a new backtest engine
    pub fn new(ranking: Arc<dyn RankingSource>, prices: Arc<dyn PriceHistoryProvider>) -> Self {
        Self { ranking, prices }
    }

    /// Engine backed by a single store that both ranks and prices.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RankingSource + PriceHistoryProvider + 'static,
    {
        Self {
            ranking: store.clone(),
            prices: store,
        }
    }

    /// Run backtest
    pub async fn run(&self, config: &BacktestConfig) -> Result<BacktestResult, BacktestError> {
        let never = AtomicBool::new(false);
        self.run_with_cancel(config, &never).await
    }

    /// Run backtest, checking `cancel` before each period.
    ///
    /// Cancellation discards the partial result.
    pub async fn run_with_cancel(
        &self,
        config: &BacktestConfig,
        cancel: &AtomicBool,
    ) -> Result<BacktestResult, BacktestError> {
        config.validate()?;

        let run_id = generate_run_id();
        let span = tracing::info_span!("backtest", run_id = short_run_id(&run_id));

        let periods = config.period_count();

        async {
            info!(
                start = %config.start_date,
                end = %config.end_date,
                top_n = config.top_n,
                trailing_months = config.trailing_months,
                universe = %config.universe,
                capital = config.initial_capital,
                periods,
                "Starting backtest"
            );

            let mut state = RunState {
                equity: config.initial_capital,
                equity_curve: Vec::with_capacity(periods as usize),
                period_returns: Vec::with_capacity(periods as usize),
                portfolio_log: Vec::with_capacity(periods as usize),
                ..Default::default()
            };

            let mut period = 0u32;
            while let Some(date) = config.period_date(period) {
                if cancel.load(Ordering::Relaxed) {
                    warn!(period, date = %date, "Backtest cancelled");
                    return Err(BacktestError::Cancelled { period });
                }
                self.process_period(config, &mut state, period, date).await;
                period += 1;
            }

            self.close_at_horizon(config, &mut state, period).await;

            state.trades.sort_by_key(|t| t.entry_date);

            let equity_values: Vec<f64> = state.equity_curve.iter().map(|p| p.equity).collect();
            let metrics = BacktestMetrics::compute(
                &state.trades,
                &equity_values,
                config.initial_capital,
                state.equity,
                metrics::whole_months_between(config.start_date, config.end_date),
            );

            info!(
                periods = period,
                skipped = state.skipped_periods.len(),
                trades = metrics.total_trades,
                final_equity = metrics.final_equity,
                cagr = metrics.cagr,
                max_drawdown = metrics.max_drawdown,
                "Backtest complete"
            );

            Ok(BacktestResult {
                run_id: run_id.clone(),
                config: config.clone(),
                metrics,
                trades: state.trades,
                equity_curve: state.equity_curve,
                period_returns: state.period_returns,
                portfolio_log: state.portfolio_log,
                skipped_periods: state.skipped_periods,
            })
        }
        .instrument(span)
        .await
    }

    async fn process_period(&self, config: &BacktestConfig, state: &mut RunState, period: u32, date: NaiveDate) {
        let ranked = match self
            .ranking
            .rank_top_n(date, config.trailing_months, &config.universe, config.top_n)
            .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(period, date = %date, kind = e.kind(), error = %e, "Ranking failed, skipping period");
                state.skipped_periods.push(date);
                return;
            }
        };

        // Duplicates collapse to their first occurrence
        let mut seen = HashSet::new();
        let mut selected: Vec<String> = ranked
            .into_iter()
            .map(|r| r.symbol)
            .filter(|s| seen.insert(s.clone()))
            .collect();
        if selected.len() > config.top_n {
            debug!(period, returned = selected.len(), "Ranking returned more than top_n, truncating");
            selected.truncate(config.top_n);
        }

        let slot = config.slot_allocation();
        for symbol in &selected {
            if state.positions.contains_key(symbol) {
                continue;
            }
            let price = self.lookup_close(symbol, date, "entry").await;
            let position = Position::open(symbol.clone(), date, price, slot);
            debug!(
                symbol = %symbol,
                date = %date,
                price = position.entry_price,
                quantity = position.quantity,
                "Entered position"
            );
            state.positions.insert(symbol.clone(), position);
        }

        let exiting: Vec<String> = state
            .positions
            .keys()
            .filter(|s| !selected.contains(s))
            .cloned()
            .collect();

        let mut realized = 0.0;
        for symbol in exiting {
            if let Some(position) = state.positions.remove(&symbol) {
                let trade = self.close_position(config, position, date, ExitReason::Rotation).await;
                realized += trade.profit;
                state.trades.push(trade);
            }
        }

        state.equity += realized;
        state.equity_curve.push(EquityPoint {
            period,
            date,
            equity: state.equity,
        });
        state.period_returns.push(realized / config.initial_capital);
        state.portfolio_log.push(PortfolioSnapshot {
            date,
            symbols: selected,
        });

        debug!(period, date = %date, realized, equity = state.equity, "Period processed");
    }

    /// Close every remaining position at the horizon end.
    async fn close_at_horizon(&self, config: &BacktestConfig, state: &mut RunState, period: u32) {
        let date = config.end_date;
        for (_, position) in std::mem::take(&mut state.positions) {
            let trade = self.close_position(config, position, date, ExitReason::HorizonEnd).await;
            state.equity += trade.profit;
            state.equity_curve.push(EquityPoint {
                period,
                date,
                equity: state.equity,
            });
            state.trades.push(trade);
        }
    }

    async fn close_position(
        &self,
        config: &BacktestConfig,
        position: Position,
        date: NaiveDate,
        reason: ExitReason,
    ) -> TradeLog {
        let price = self.lookup_close(&position.symbol, date, "exit").await;
        let mut trade = position.close(date, price, reason);

        if config.position_drawdown {
            trade.max_drawdown = self.holding_drawdown(&trade).await;
        }

        debug!(
            symbol = %trade.symbol,
            date = %date,
            reason = ?reason,
            profit = trade.profit,
            "Closed position"
        );
        trade
    }

    /// Close price, or `None` (zero sentinel) when it cannot be found.
    async fn lookup_close(&self, symbol: &str, date: NaiveDate, side: &'static str) -> Option<f64> {
        match self.prices.latest_close(symbol, date).await {
            Ok(price) => Some(price),
            Err(e) if e.is_data_gap() => {
                warn!(symbol, date = %date, side, "No close on or before date, using zero");
                None
            }
            Err(e) => {
                warn!(symbol, date = %date, side, kind = e.kind(), error = %e, "Price lookup failed, using zero");
                None
            }
        }
    }

    async fn holding_drawdown(&self, trade: &TradeLog) -> Option<f64> {
        match self
            .prices
            .price_series(&trade.symbol, trade.entry_date, trade.exit_date)
            .await
        {
            Ok(series) => {
                let closes: Vec<f64> = series.iter().map(|p| p.close).collect();
                Some(metrics::max_drawdown(&closes))
            }
            Err(e) => {
                warn!(symbol = %trade.symbol, error = %e, "Price series unavailable, drawdown not computed");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
