//! Integration tests for the momentum rotation engine.
//!
//! The engine is driven by scripted collaborators so every period's ranking
//! and every price is known up front.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use fund_backtest::backtest::{
    metrics, run_sweep, BacktestConfig, BacktestEngine, BacktestError, ExitReason, TradeLog,
};
use fund_backtest::data::{
    PriceBar, PriceHistoryProvider, PricePoint, ProviderError, RankedSymbol, RankingSource, Security,
    UniverseFilter,
};
use fund_backtest::LocalStorage;

// ============================================================================
// Mock Collaborators
// ============================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Ranking scripted per date. `None` injects a failure; unscripted dates rank nothing.
#[derive(Default)]
struct ScriptedRanking {
    script: HashMap<NaiveDate, Option<Vec<&'static str>>>,
    calls: AtomicU32,
    /// Raised on the first call, to simulate an external cancel
    cancel_on_call: Option<Arc<AtomicBool>>,
}

impl ScriptedRanking {
    fn new() -> Self {
        Self::default()
    }

    fn rank(mut self, as_of: NaiveDate, symbols: &[&'static str]) -> Self {
        self.script.insert(as_of, Some(symbols.to_vec()));
        self
    }

    fn fail(mut self, as_of: NaiveDate) -> Self {
        self.script.insert(as_of, None);
        self
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RankingSource for ScriptedRanking {
    async fn rank_top_n(
        &self,
        as_of: NaiveDate,
        _trailing_months: u32,
        _universe: &UniverseFilter,
        limit: usize,
    ) -> Result<Vec<RankedSymbol>, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(flag) = &self.cancel_on_call {
            flag.store(true, Ordering::Relaxed);
        }

        match self.script.get(&as_of) {
            Some(Some(symbols)) => Ok(symbols
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, s)| RankedSymbol::new(*s, 1.0 - i as f64 * 0.1))
                .collect()),
            Some(None) => Err(ProviderError::RankingUnavailable {
                as_of,
                reason: "injected failure".into(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Close prices per symbol; lookups take the newest bar on or before the date
/// unless `exact` is set.
#[derive(Default)]
struct PriceTable {
    closes: HashMap<String, BTreeMap<NaiveDate, f64>>,
    exact: bool,
}

impl PriceTable {
    fn new() -> Self {
        Self::default()
    }

    /// Only bars dated exactly on the lookup date count.
    fn exact_dates(mut self) -> Self {
        self.exact = true;
        self
    }

    fn close(mut self, symbol: &str, on: NaiveDate, price: f64) -> Self {
        self.closes.entry(symbol.to_string()).or_default().insert(on, price);
        self
    }
}

#[async_trait]
impl PriceHistoryProvider for PriceTable {
    async fn latest_close(&self, symbol: &str, as_of: NaiveDate) -> Result<f64, ProviderError> {
        self.closes
            .get(symbol)
            .and_then(|series| {
                if self.exact {
                    series.get(&as_of).copied()
                } else {
                    series.range(..=as_of).next_back().map(|(_, close)| *close)
                }
            })
            .ok_or_else(|| ProviderError::PriceUnavailable {
                symbol: symbol.to_string(),
                as_of,
            })
    }

    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, ProviderError> {
        let series = self
            .closes
            .get(symbol)
            .ok_or_else(|| ProviderError::Storage(format!("unknown symbol {}", symbol)))?;
        Ok(series
            .range(start..=end)
            .map(|(d, c)| PricePoint { date: *d, close: *c })
            .collect())
    }
}

fn engine(ranking: ScriptedRanking, prices: PriceTable) -> BacktestEngine {
    BacktestEngine::new(Arc::new(ranking), Arc::new(prices))
}

fn trades_for<'a>(trades: &'a [TradeLog], symbol: &str) -> Vec<&'a TradeLog> {
    trades.iter().filter(|t| t.symbol == symbol).collect()
}

// ============================================================================
// Rotation Scenarios
// ============================================================================

#[tokio::test]
async fn test_two_period_rotation() {
    let jan = date(2024, 1, 1);
    let feb = date(2024, 2, 1);

    let ranking = ScriptedRanking::new().rank(jan, &["A", "B"]).rank(feb, &["A", "C"]);
    let prices = PriceTable::new()
        .close("A", jan, 100.0)
        .close("B", jan, 200.0)
        .close("B", feb, 220.0)
        .close("C", feb, 50.0);

    let config = BacktestConfig::with_periods(jan, 2).unwrap().top_n(2).initial_capital(1_000_000.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    let b = trades_for(&result.trades, "B");
    assert_eq!(b.len(), 1);
    let b = b[0];
    assert_eq!(b.exit_reason, ExitReason::Rotation);
    assert_eq!(b.quantity, 2500);
    assert_eq!(b.entry_price, 200.0);
    assert_eq!(b.exit_price, 220.0);
    assert_eq!(b.profit, 50_000.0);
    assert_eq!(b.profit_pct, 10.0);
    assert_eq!(b.days_held, 31);

    assert_eq!(result.equity_curve[0].equity, 1_000_000.0);
    assert_eq!(result.equity_curve[1].equity, 1_050_000.0);
    assert_eq!(result.period_returns, vec![0.0, 0.05]);

    // A and C are still held at the horizon
    let a = trades_for(&result.trades, "A");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].quantity, 5000);
    assert_eq!(a[0].exit_reason, ExitReason::HorizonEnd);
    assert_eq!(trades_for(&result.trades, "C").len(), 1);
    assert_eq!(result.trades.len(), 3);

    assert_eq!(result.portfolio_log[1].symbols, vec!["A".to_string(), "C".to_string()]);
    assert_eq!(result.metrics.final_equity, 1_050_000.0);
    assert_eq!(result.metrics.net_profit, 50_000.0);
    assert_eq!(result.metrics.winning_trades, 1);
}

#[tokio::test]
async fn test_ranking_failure_skips_period() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);
    let p3 = date(2024, 3, 1);

    let ranking = ScriptedRanking::new().rank(p1, &["A", "B"]).fail(p2).rank(p3, &[]);
    let prices = PriceTable::new()
        .close("A", p1, 10.0)
        .close("B", p1, 20.0)
        .close("A", p3, 12.0)
        .close("B", p3, 18.0);

    let config = BacktestConfig::with_periods(p1, 3).unwrap().top_n(2).initial_capital(1000.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    let dates: Vec<NaiveDate> = result.equity_curve.iter().map(|p| p.date).collect();
    assert_eq!(dates, vec![p1, p3]);
    assert_eq!(result.skipped_periods, vec![p2]);
    assert_eq!(result.portfolio_log.len(), 2);

    // Positions opened in period 1 survived the skip and closed in period 3
    assert_eq!(result.trades.len(), 2);
    for trade in &result.trades {
        assert_eq!(trade.entry_date, p1);
        assert_eq!(trade.exit_date, p3);
        assert_ne!(trade.exit_date, p2);
    }

    // A: 50 × (12 − 10) = 100, B: 25 × (18 − 20) = −50
    assert_eq!(result.equity_curve[1].equity, 1050.0);
}

#[tokio::test]
async fn test_horizon_close_recorded_once() {
    let start = date(2024, 1, 1);
    let end = date(2024, 3, 15);

    let ranking = ScriptedRanking::new()
        .rank(date(2024, 1, 1), &["A"])
        .rank(date(2024, 2, 1), &["A"])
        .rank(date(2024, 3, 1), &["A"]);
    let prices = PriceTable::new().close("A", start, 40.0).close("A", date(2024, 3, 14), 50.0);

    let config = BacktestConfig::new(start, end).top_n(1).initial_capital(1000.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    assert_eq!(result.trades.len(), 1);
    let a = &result.trades[0];
    assert_eq!(a.exit_date, end);
    assert_eq!(a.exit_reason, ExitReason::HorizonEnd);
    assert_eq!(a.exit_price, 50.0);
    assert_eq!(a.profit, 250.0);
    assert!(a.entry_date < a.exit_date);

    // Three periods plus one horizon-close increment
    assert_eq!(result.equity_curve.len(), 4);
    assert_eq!(result.equity_curve[3].date, end);
    assert_eq!(result.equity_curve[3].equity, 1250.0);
    assert_eq!(result.metrics.final_equity, 1250.0);
}

#[tokio::test]
async fn test_missing_price_is_flagged_not_fatal() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);

    let ranking = ScriptedRanking::new().rank(p1, &["GAP", "ZERO"]).rank(p2, &[]);
    // GAP has no data at all; ZERO genuinely closes at 0.0 on exit
    let prices = PriceTable::new().close("ZERO", p1, 10.0).close("ZERO", p2, 0.0);

    let config = BacktestConfig::with_periods(p1, 2).unwrap().top_n(2).initial_capital(1000.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    assert_eq!(result.trades.len(), 2);

    let gap = trades_for(&result.trades, "GAP")[0];
    assert_eq!(gap.entry_price, 0.0);
    assert_eq!(gap.quantity, 0);
    assert_eq!(gap.profit, 0.0);
    assert_eq!(gap.profit_pct, 0.0);
    assert!(!gap.entry_priced);
    assert!(!gap.exit_priced);

    let zero = trades_for(&result.trades, "ZERO")[0];
    assert_eq!(zero.exit_price, 0.0);
    assert!(zero.entry_priced && zero.exit_priced);
    assert_eq!(zero.profit, -500.0);

    assert_eq!(result.metrics.unpriced_trades, 1);
}

#[tokio::test]
async fn test_fixed_slot_sizing() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);

    let ranking = ScriptedRanking::new()
        .rank(p1, &["A", "B", "C"])
        .rank(p2, &["D", "E", "F"]);
    let prices = PriceTable::new()
        .close("A", p1, 333.33)
        .close("B", p1, 7.0)
        .close("C", p1, 123_456.0)
        .close("A", p2, 500.0)
        .close("B", p2, 14.0)
        .close("C", p2, 123_456.0)
        .close("D", p2, 1.0)
        .close("E", p2, 1.0)
        .close("F", p2, 1.0);

    let config = BacktestConfig::with_periods(p1, 2).unwrap().top_n(3).initial_capital(100_000.0);
    let slot = config.slot_allocation();
    let result = engine(ranking, prices).run(&config).await.unwrap();

    for trade in &result.trades {
        assert_eq!(trade.quantity, (slot / trade.entry_price).floor() as u64);
        assert!(trade.amount_used <= slot);
        assert_eq!(trade.profit, (trade.exit_price - trade.entry_price) * trade.quantity as f64);
    }

    // Slots for D, E, F are sized from initial capital, not the grown equity
    let d = trades_for(&result.trades, "D")[0];
    assert_eq!(d.quantity, 33_333);
    assert!(result.equity_curve[1].equity > config.initial_capital);

    // C is too expensive for one slot
    assert_eq!(trades_for(&result.trades, "C")[0].quantity, 0);
}

#[tokio::test]
async fn test_duplicate_ranked_symbols_collapse() {
    let p1 = date(2024, 1, 1);

    let ranking = ScriptedRanking::new().rank(p1, &["A", "A", "B"]);
    let prices = PriceTable::new().close("A", p1, 10.0).close("B", p1, 10.0);

    let config = BacktestConfig::with_periods(p1, 1).unwrap().top_n(3).initial_capital(900.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    assert_eq!(result.portfolio_log[0].symbols, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(trades_for(&result.trades, "A").len(), 1);
}

#[tokio::test]
async fn test_trades_sorted_by_entry_date() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);
    let p3 = date(2024, 3, 1);

    let ranking = ScriptedRanking::new()
        .rank(p1, &["A"])
        .rank(p2, &["B"])
        .rank(p3, &["C"]);
    let prices = PriceTable::new().close("A", p1, 1.0).close("B", p1, 1.0).close("C", p1, 1.0);

    let config = BacktestConfig::with_periods(p1, 3).unwrap().top_n(1).initial_capital(100.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    let entries: Vec<NaiveDate> = result.trades.iter().map(|t| t.entry_date).collect();
    assert_eq!(entries, vec![p1, p2, p3]);
}

// ============================================================================
// Configuration & Control
// ============================================================================

#[tokio::test]
async fn test_invalid_configuration_fails_before_any_period() {
    let ranking = Arc::new(ScriptedRanking::new());
    let engine = BacktestEngine::new(ranking.clone(), Arc::new(PriceTable::new()));

    let cases = [
        BacktestConfig::default().top_n(0),
        BacktestConfig::default().initial_capital(0.0),
        BacktestConfig::default().initial_capital(-5.0),
        BacktestConfig::new(date(2024, 6, 1), date(2024, 1, 1)),
    ];

    for config in cases {
        let err = engine.run(&config).await.unwrap_err();
        assert!(matches!(err, BacktestError::InvalidConfiguration(_)));
    }
    assert_eq!(ranking.call_count(), 0);
}

#[tokio::test]
async fn test_cancellation_between_periods() {
    let cancel = Arc::new(AtomicBool::new(false));
    let ranking = ScriptedRanking {
        cancel_on_call: Some(cancel.clone()),
        ..ScriptedRanking::new()
    };
    let ranking = Arc::new(ranking);
    let engine = BacktestEngine::new(ranking.clone(), Arc::new(PriceTable::new()));

    let config = BacktestConfig::with_periods(date(2024, 1, 1), 6).unwrap();
    let err = engine.run_with_cancel(&config, &cancel).await.unwrap_err();

    assert_eq!(err, BacktestError::Cancelled { period: 1 });
    assert!(err.is_cancelled());
    assert_eq!(ranking.call_count(), 1);
}

#[tokio::test]
async fn test_position_drawdown() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);

    let ranking = ScriptedRanking::new().rank(p1, &["A"]).rank(p2, &[]);
    let prices = PriceTable::new()
        .close("A", p1, 100.0)
        .close("A", date(2024, 1, 10), 120.0)
        .close("A", date(2024, 1, 20), 90.0)
        .close("A", p2, 110.0);

    let base = BacktestConfig::with_periods(p1, 2).unwrap().top_n(1).initial_capital(1000.0);

    let result = engine(ranking, prices).run(&base.clone().position_drawdown(true)).await.unwrap();
    let dd = result.trades[0].max_drawdown.unwrap();
    assert!((dd - 0.25).abs() < 1e-12);

    let ranking = ScriptedRanking::new().rank(p1, &["A"]).rank(p2, &[]);
    let prices = PriceTable::new().close("A", p1, 100.0);
    let result = engine(ranking, prices).run(&base).await.unwrap();
    assert_eq!(result.trades[0].max_drawdown, None);
}

#[tokio::test]
async fn test_summary_metrics() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);
    let p3 = date(2024, 3, 1);

    let ranking = ScriptedRanking::new()
        .rank(p1, &["A", "B"])
        .rank(p2, &["C", "D"])
        .rank(p3, &[]);
    let prices = PriceTable::new()
        .close("A", p1, 10.0)
        .close("B", p1, 10.0)
        .close("A", p2, 12.0)
        .close("B", p2, 9.0)
        .close("C", p2, 10.0)
        .close("D", p2, 10.0)
        .close("C", p3, 7.0)
        .close("D", p3, 8.0);

    let config = BacktestConfig::with_periods(p1, 3).unwrap().top_n(2).initial_capital(1000.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    // 50 units each slot: A +100, B −50, C −150, D −100
    assert_eq!(result.equity_values(), vec![1000.0, 1050.0, 800.0]);
    assert_eq!(result.metrics.total_trades, 4);
    assert_eq!(result.metrics.winning_trades, 1);
    assert_eq!(result.metrics.win_rate, 0.25);
    assert_eq!(result.metrics.average_profit, -50.0);
    assert_eq!(result.metrics.net_profit, -200.0);
    assert!((result.metrics.max_drawdown - 250.0 / 1050.0).abs() < 1e-12);

    let expected_cagr = metrics::compute_cagr(1000.0, 800.0, 2);
    assert!((result.metrics.cagr - expected_cagr).abs() < 1e-9);
}

#[tokio::test]
async fn test_unpriced_exits_driving_equity_negative() {
    let symbols = ["S0", "S1", "S2", "S3", "S4", "S5"];
    let start = date(2024, 1, 1);

    let mut ranking = ScriptedRanking::new();
    let mut prices = PriceTable::new().exact_dates();
    for (k, symbol) in symbols.iter().enumerate() {
        let on = date(2024, 1 + k as u32, 1);
        ranking = ranking.rank(on, &[*symbol]);
        prices = prices.close(symbol, on, 10.0);
    }

    let config = BacktestConfig::with_periods(start, 6).unwrap().top_n(1).initial_capital(1000.0);
    let result = engine(ranking, prices).run(&config).await.unwrap();

    // Every rotation exit is unpriced: 100 units lost at 10 each
    assert_eq!(
        result.equity_values(),
        vec![1000.0, 0.0, -1000.0, -2000.0, -3000.0, -4000.0, -4000.0]
    );
    assert_eq!(result.metrics.final_equity, -4000.0);
    assert_eq!(result.metrics.cagr, -1.0);
    assert_eq!(result.metrics.max_drawdown, 1.0);
    assert_eq!(result.metrics.unpriced_trades, 5);

    let report = fund_backtest::BacktestReport::generate(&result);
    assert!(!report.text_report.contains("NaN"));
    assert!(serde_json::to_string(&result).unwrap().contains("\"cagr\":-1.0"));
}

#[tokio::test]
async fn test_empty_run_has_zero_metrics() {
    let config = BacktestConfig::with_periods(date(2024, 1, 1), 3).unwrap();
    let result = engine(ScriptedRanking::new(), PriceTable::new()).run(&config).await.unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.metrics.win_rate, 0.0);
    assert_eq!(result.metrics.average_profit, 0.0);
    assert_eq!(result.metrics.max_drawdown, 0.0);
    assert_eq!(result.metrics.cagr, 0.0);
    assert_eq!(result.equity_curve.len(), 3);
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test]
async fn test_sweep_preserves_input_order() {
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);

    let ranking = ScriptedRanking::new().rank(p1, &["A", "B"]).rank(p2, &[]);
    let prices = PriceTable::new()
        .close("A", p1, 10.0)
        .close("B", p1, 10.0)
        .close("A", p2, 20.0)
        .close("B", p2, 10.0);
    let engine = Arc::new(engine(ranking, prices));

    let base = BacktestConfig::with_periods(p1, 2).unwrap().initial_capital(1000.0);
    let configs = vec![base.clone().top_n(1), base.clone().top_n(2), base.top_n(0)];

    let outcomes = run_sweep(engine, configs).await;
    assert_eq!(outcomes.len(), 3);

    // top 1 holds A only: 100 units × 10
    let first = outcomes[0].result.as_ref().unwrap();
    assert_eq!(outcomes[0].config.top_n, 1);
    assert_eq!(first.metrics.net_profit, 1000.0);

    // top 2 splits the capital: 50 units of A × 10
    let second = outcomes[1].result.as_ref().unwrap();
    assert_eq!(second.metrics.net_profit, 500.0);
    assert_ne!(first.run_id, second.run_id);

    assert!(matches!(
        outcomes[2].result,
        Err(BacktestError::InvalidConfiguration(_))
    ));
}

// ============================================================================
// SQLite End-to-End
// ============================================================================

fn bar(symbol: &str, on: NaiveDate, close: f64) -> PriceBar {
    PriceBar {
        symbol: symbol.to_string(),
        date: on,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000,
    }
}

#[tokio::test]
async fn test_local_storage_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::open(dir.path().join("prices.db")).unwrap());

    storage
        .save_securities(&[
            Security::new("FAST", "Fast Movers", "mid"),
            Security::new("SLOW", "Slow Growth", "mid"),
            Security::new("BIG", "Big Caps", "large"),
        ])
        .await
        .unwrap();

    // Base prices a year back, then a diverging path
    let base = date(2023, 1, 1);
    let p1 = date(2024, 1, 1);
    let p2 = date(2024, 2, 1);
    storage
        .save_prices(&[
            bar("FAST", base, 10.0),
            bar("SLOW", base, 10.0),
            bar("BIG", base, 10.0),
            bar("FAST", p1, 30.0),
            bar("SLOW", p1, 11.0),
            bar("BIG", p1, 50.0),
            bar("FAST", p2, 33.0),
            bar("SLOW", p2, 12.0),
            bar("BIG", p2, 55.0),
        ])
        .await
        .unwrap();

    let config = BacktestConfig::with_periods(p1, 2)
        .unwrap()
        .top_n(1)
        .trailing_months(12)
        .universe("mid".parse().unwrap())
        .initial_capital(3000.0);

    let engine = BacktestEngine::from_store(storage.clone());
    let result = engine.run(&config).await.unwrap();

    // BIG is outside the universe; FAST outranks SLOW and is held throughout
    assert_eq!(result.trades.len(), 1);
    let fast = &result.trades[0];
    assert_eq!(fast.symbol, "FAST");
    assert_eq!(fast.quantity, 100);
    assert_eq!(fast.exit_reason, ExitReason::HorizonEnd);
    assert!((fast.profit - 300.0).abs() < 1e-9);

    let csv_path = dir.path().join("trades.csv");
    fund_backtest::backtest::report::export_trade_log(&csv_path, &result.trades).unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert!(csv.contains("FAST,2024-01-01,2024-02-01,30.00,33.00,300.00,10.00,31,100,3000.00"));
}
