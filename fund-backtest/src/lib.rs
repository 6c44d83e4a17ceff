//! Fund Backtest Library
//!
//! Simulates a monthly momentum rotation: on every rebalance date buy the
//! top-N securities by trailing return with equal fixed slots, sell what
//! dropped out of the ranking, and report the resulting equity curve and
//! trade log.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    fund-backtest                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌──────────────┐   │
//! │  │  CSV Import     │→ │  LocalStorage   │→ │  Backtest    │   │
//! │  │  (securities,   │  │  (SQLite,       │  │  Engine      │   │
//! │  │   daily bars)   │  │   ranking)      │  │              │   │
//! │  └─────────────────┘  └─────────────────┘  └──────┬───────┘   │
//! │                                                   ↓           │
//! │                              Metrics · Report · CSV/JSON      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine only depends on the `RankingSource` and
//! `PriceHistoryProvider` traits, so any store (or a test mock) can drive it.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod backtest;
pub mod data;

pub use backtest::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestMetrics, BacktestReport, BacktestResult,
    TradeLog,
};
pub use data::{LocalStorage, PriceHistoryProvider, ProviderError, RankingSource, UniverseFilter};
