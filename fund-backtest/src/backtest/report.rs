//! Backtest report generation and export.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use super::engine::BacktestResult;
use super::position::TradeLog;
use crate::data::RankedSymbol;

/// Trade log CSV header.
pub const TRADE_LOG_HEADER: [&str; 10] = [
    "Symbol",
    "EntryDate",
    "ExitDate",
    "EntryPrice",
    "ExitPrice",
    "Profit",
    "ProfitPct",
    "DaysHeld",
    "Quantity",
    "AmountUsed",
];

/// Backtest report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Report title
    pub title: String,
    /// Test period
    pub period: String,
    /// Summary statistics
    pub summary: ReportSummary,
    /// Text report (formatted)
    pub text_report: String,
}

/// Report summary section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub net_profit: f64,
    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate_pct: f64,
    pub average_profit: f64,
    pub avg_days_held: f64,
    pub unpriced_trades: usize,
    pub skipped_periods: usize,
}

impl BacktestReport {
    /// Generate a report from backtest results
    pub fn generate(result: &BacktestResult) -> Self {
        let config = &result.config;
        let metrics = &result.metrics;

        let summary = ReportSummary {
            initial_capital: config.initial_capital,
            final_equity: result.final_equity(),
            net_profit: metrics.net_profit,
            total_return_pct: metrics.total_return_pct(config.initial_capital),
            cagr_pct: metrics.cagr * 100.0,
            max_drawdown_pct: metrics.max_drawdown * 100.0,
            total_trades: metrics.total_trades,
            winning_trades: metrics.winning_trades,
            win_rate_pct: metrics.win_rate * 100.0,
            average_profit: metrics.average_profit,
            avg_days_held: metrics.avg_days_held,
            unpriced_trades: metrics.unpriced_trades,
            skipped_periods: result.skipped_periods.len(),
        };

        let title = format!("Momentum Top-{} Backtest", config.top_n);
        let period = format!("{} to {}", config.start_date, config.end_date);
        let text_report = Self::format_text_report(&title, &period, result, &summary);

        Self {
            title,
            period,
            summary,
            text_report,
        }
    }

    /// Format as text report
    fn format_text_report(title: &str, period: &str, result: &BacktestResult, summary: &ReportSummary) -> String {
        let config = &result.config;
        let mut report = String::new();

        report.push_str("═══════════════════════════════════════════════════════════════\n");
        report.push_str(&format!("  {}\n", title));
        report.push_str("═══════════════════════════════════════════════════════════════\n\n");

        report.push_str(&format!("Period:    {}\n", period));
        report.push_str(&format!("Universe:  {}\n", config.universe));
        report.push_str(&format!("Ranking:   {}-month trailing return\n\n", config.trailing_months));

        report.push_str("Returns\n");
        report.push_str("───────────────────────────────────────────────────────────────\n");
        report.push_str(&format!("  Initial capital:  {:>16.2}\n", summary.initial_capital));
        report.push_str(&format!("  Final equity:     {:>16.2}\n", summary.final_equity));
        report.push_str(&format!("  Net profit:       {:>16.2}\n", summary.net_profit));
        report.push_str(&format!("  Total return:     {:>15.2}%\n", summary.total_return_pct));
        report.push_str(&format!("  CAGR:             {:>15.2}%\n", summary.cagr_pct));
        report.push_str(&format!("  Max drawdown:     {:>15.2}%\n\n", summary.max_drawdown_pct));

        report.push_str("Trades\n");
        report.push_str("───────────────────────────────────────────────────────────────\n");
        report.push_str(&format!("  Total trades:     {:>16}\n", summary.total_trades));
        report.push_str(&format!("  Winning trades:   {:>16}\n", summary.winning_trades));
        report.push_str(&format!("  Win rate:         {:>15.2}%\n", summary.win_rate_pct));
        report.push_str(&format!("  Average profit:   {:>16.2}\n", summary.average_profit));
        report.push_str(&format!("  Avg days held:    {:>16.1}\n", summary.avg_days_held));

        if summary.unpriced_trades > 0 || summary.skipped_periods > 0 {
            report.push_str("\nData gaps\n");
            report.push_str("───────────────────────────────────────────────────────────────\n");
            report.push_str(&format!("  Unpriced trades:  {:>16}\n", summary.unpriced_trades));
            report.push_str(&format!("  Skipped periods:  {:>16}\n", summary.skipped_periods));
            for date in &result.skipped_periods {
                report.push_str(&format!("    - {}\n", date));
            }
        }

        if !result.trades.is_empty() {
            report.push_str("\nBest / worst trades\n");
            report.push_str("───────────────────────────────────────────────────────────────\n");

            let best = result.trades.iter().max_by(|a, b| a.profit.total_cmp(&b.profit));
            let worst = result.trades.iter().min_by(|a, b| a.profit.total_cmp(&b.profit));
            for (label, trade) in [("Best", best), ("Worst", worst)] {
                if let Some(t) = trade {
                    report.push_str(&format!(
                        "  {:<6} {:<12} {} -> {}  {:>14.2} ({:+.2}%)\n",
                        label, t.symbol, t.entry_date, t.exit_date, t.profit, t.profit_pct
                    ));
                }
            }
        }

        report.push_str("\n═══════════════════════════════════════════════════════════════\n");
        report
    }
}

// ============================================================================
// Export
// ============================================================================

fn trade_row(trade: &TradeLog) -> [String; 10] {
    [
        trade.symbol.clone(),
        trade.entry_date.format("%Y-%m-%d").to_string(),
        trade.exit_date.format("%Y-%m-%d").to_string(),
        format!("{:.2}", trade.entry_price),
        format!("{:.2}", trade.exit_price),
        format!("{:.2}", trade.profit),
        format!("{:.2}", trade.profit_pct),
        trade.days_held.to_string(),
        trade.quantity.to_string(),
        format!("{:.2}", trade.amount_used),
    ]
}

/// Write the trade log as CSV to any writer.
pub fn write_trade_log<W: Write>(writer: W, trades: &[TradeLog]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(TRADE_LOG_HEADER)?;
    for trade in trades {
        wtr.write_record(trade_row(trade))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Export the trade log to a CSV file.
pub fn export_trade_log(path: &Path, trades: &[TradeLog]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create trade log {}", path.display()))?;
    write_trade_log(file, trades)?;
    tracing::info!(path = %path.display(), trades = trades.len(), "Exported trade log");
    Ok(())
}

/// Write a ranked list as `Symbol,TrailingReturn` CSV.
pub fn write_ranked_list<W: Write>(writer: W, ranked: &[RankedSymbol]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Symbol", "TrailingReturn"])?;
    for r in ranked {
        wtr.write_record([r.symbol.clone(), format!("{:.6}", r.trailing_return)])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Export a ranked list to a CSV file.
pub fn export_ranked_list(path: &Path, ranked: &[RankedSymbol]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create ranked list {}", path.display()))?;
    write_ranked_list(file, ranked)
}

/// Export the full result as pretty JSON.
pub fn export_result_json(path: &Path, result: &BacktestResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize backtest result")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), run_id = %result.run_id, "Exported backtest result");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::engine::{BacktestConfig, EquityPoint};
    use crate::backtest::metrics::BacktestMetrics;
    use crate::backtest::position::{ExitReason, Position};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_winning_trade() -> TradeLog {
        Position::open("INFY", date(2024, 1, 1), Some(200.0), 500_000.0).close(
            date(2024, 2, 1),
            Some(220.0),
            ExitReason::Rotation,
        )
    }

    fn make_losing_trade() -> TradeLog {
        Position::open("TCS", date(2024, 1, 1), Some(300.0), 500_000.0).close(
            date(2024, 3, 1),
            Some(290.5),
            ExitReason::HorizonEnd,
        )
    }

    fn make_result() -> BacktestResult {
        let config = BacktestConfig::new(date(2024, 1, 1), date(2024, 3, 1)).top_n(2);
        let trades = vec![make_winning_trade(), make_losing_trade()];
        let equity = vec![1_000_000.0, 1_050_000.0, 1_034_183.0];
        let final_equity = 1_000_000.0 + trades.iter().map(|t| t.profit).sum::<f64>();
        let metrics = BacktestMetrics::compute(&trades, &equity, config.initial_capital, final_equity, 2);

        BacktestResult {
            run_id: "test-run".into(),
            equity_curve: equity
                .iter()
                .enumerate()
                .map(|(i, e)| EquityPoint {
                    period: i as u32,
                    date: date(2024, 1 + i as u32, 1),
                    equity: *e,
                })
                .collect(),
            period_returns: vec![0.0, 0.05],
            portfolio_log: Vec::new(),
            skipped_periods: vec![date(2024, 2, 1)],
            config,
            metrics,
            trades,
        }
    }

    #[test]
    fn test_trade_log_csv_format() {
        let mut buf = Vec::new();
        write_trade_log(&mut buf, &[make_winning_trade(), make_losing_trade()]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Symbol,EntryDate,ExitDate,EntryPrice,ExitPrice,Profit,ProfitPct,DaysHeld,Quantity,AmountUsed"
        );
        assert_eq!(lines[1], "INFY,2024-01-01,2024-02-01,200.00,220.00,50000.00,10.00,31,2500,500000.00");
        // 1666 units at 300 → 499800.00 deployed, -9.5 per unit
        assert_eq!(lines[2], "TCS,2024-01-01,2024-03-01,300.00,290.50,-15827.00,-3.17,60,1666,499800.00");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_trade_log_empty_has_header() {
        let mut buf = Vec::new();
        write_trade_log(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_ranked_list_csv() {
        let mut buf = Vec::new();
        write_ranked_list(&mut buf, &[RankedSymbol::new("BBB", 1.0), RankedSymbol::new("AAA", 0.5)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "Symbol,TrailingReturn\nBBB,1.000000\nAAA,0.500000\n");
    }

    #[test]
    fn test_generate_report() {
        let result = make_result();
        let report = BacktestReport::generate(&result);

        assert_eq!(report.summary.total_trades, 2);
        assert_eq!(report.summary.winning_trades, 1);
        assert!((report.summary.win_rate_pct - 50.0).abs() < 1e-9);
        assert_eq!(report.summary.skipped_periods, 1);
        assert!(report.text_report.contains("Momentum Top-2 Backtest"));
        assert!(report.text_report.contains("2024-01-01 to 2024-03-01"));
        assert!(report.text_report.contains("Skipped periods"));
        assert!(report.text_report.contains("INFY"));
    }

    #[test]
    fn test_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = make_result();

        let csv_path = dir.path().join("trades.csv");
        export_trade_log(&csv_path, &result.trades).unwrap();
        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv.starts_with("Symbol,EntryDate"));

        let json_path = dir.path().join("result.json");
        export_result_json(&json_path, &result).unwrap();
        let parsed: BacktestResult = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.trades.len(), 2);
        assert_eq!(parsed.run_id, "test-run");
    }
}
