//! Local price store using SQLite.
//!
//! Provides persistent storage for:
//! - The security catalog (symbol, name, tier, listing status)
//! - Daily OHLCV bars
//!
//! The store is opened explicitly by the caller and handed to the engine;
//! it implements every collaborator trait the engine consumes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::provider::{PriceHistoryProvider, ProviderError, RankingSource, SecurityCatalog};
use super::{PriceBar, PricePoint, RankedSymbol, Security, UniverseFilter};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Security catalog
CREATE TABLE IF NOT EXISTS securities (
    symbol TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    tier TEXT NOT NULL,
    industry TEXT,
    isin TEXT,
    listed INTEGER NOT NULL DEFAULT 1,
    fno INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_securities_tier
ON securities(tier);

-- Daily bars
CREATE TABLE IF NOT EXISTS daily_prices (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (symbol, date)
);

CREATE INDEX IF NOT EXISTS idx_daily_prices_symbol_date
ON daily_prices(symbol, date DESC);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Configuration
// ============================================================================

/// Local storage configuration
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Database file path
    pub db_path: PathBuf,
    /// Use an in-memory database instead of `db_path`
    pub in_memory: bool,
}

impl LocalStorageConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            in_memory: false,
        }
    }

    pub fn memory() -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            in_memory: true,
        }
    }
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self::file(fund_common::config::config_dir().join("prices.db"))
    }
}

// ============================================================================
// Local Storage
// ============================================================================

/// SQLite-backed security catalog and price history.
pub struct LocalStorage {
    /// rusqlite::Connection is Send but not Sync, so it lives behind a Mutex
    db: Arc<Mutex<Connection>>,
    config: LocalStorageConfig,
}

impl LocalStorage {
    /// Open (or create) the database described by `config`.
    pub fn new(config: LocalStorageConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory().context("Failed to open in-memory database")?
        } else {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let conn = Connection::open(&config.db_path)
                .context("Failed to open local storage database")?;

            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
                .context("Failed to set database pragmas")?;
            conn
        };

        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(db_path = %config.db_path.display(), "Initialized local storage");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Open a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(LocalStorageConfig::file(path.as_ref()))
    }

    /// Open a throwaway in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::new(LocalStorageConfig::memory())
    }

    /// Get the database path
    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    // ========================================================================
    // Security Catalog Operations
    // ========================================================================

    /// Insert or replace securities, returning the number written.
    pub async fn save_securities(&self, securities: &[Security]) -> Result<usize> {
        if securities.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO securities
                (symbol, name, tier, industry, isin, listed, fno, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)
                "#,
            )?;
            for sec in securities {
                count += stmt.execute(params![
                    sec.symbol,
                    sec.name,
                    sec.tier.to_lowercase(),
                    sec.industry,
                    sec.isin,
                    sec.listed,
                    sec.fno,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count, "Saved securities to local storage");
        Ok(count)
    }

    /// Get one security by symbol.
    pub async fn get_security(&self, symbol: &str) -> Result<Option<Security>> {
        let db = self.db.lock().await;
        let sec = db
            .query_row(
                "SELECT symbol, name, tier, industry, isin, listed, fno
                 FROM securities WHERE symbol = ?1",
                params![symbol],
                Self::row_to_security,
            )
            .optional()?;
        Ok(sec)
    }

    /// List listed securities in the universe, ordered by symbol.
    pub async fn list_securities(&self, universe: &UniverseFilter) -> Result<Vec<Security>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT symbol, name, tier, industry, isin, listed, fno
             FROM securities WHERE listed = 1 ORDER BY symbol",
        )?;
        let securities = stmt
            .query_map([], Self::row_to_security)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|s| universe.matches(&s.tier))
            .collect();
        Ok(securities)
    }

    /// Mark a security as delisted so it drops out of rankings.
    pub async fn set_listed(&self, symbol: &str, listed: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE securities SET listed = ?2, updated_at = CURRENT_TIMESTAMP WHERE symbol = ?1",
            params![symbol, listed],
        )?;
        Ok(changed > 0)
    }

    fn row_to_security(row: &rusqlite::Row) -> rusqlite::Result<Security> {
        Ok(Security {
            symbol: row.get(0)?,
            name: row.get(1)?,
            tier: row.get(2)?,
            industry: row.get(3)?,
            isin: row.get(4)?,
            listed: row.get(5)?,
            fno: row.get(6)?,
        })
    }

    // ========================================================================
    // Price Operations
    // ========================================================================

    /// Insert or replace daily bars, returning the number written.
    pub async fn save_prices(&self, bars: &[PriceBar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO daily_prices
                (symbol, date, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for bar in bars {
                count += stmt.execute(params![
                    bar.symbol,
                    bar.date.format(DATE_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                ])?;
            }
        }
        tx.commit()?;

        debug!(symbol = %bars[0].symbol, count, "Saved daily prices to local storage");
        Ok(count)
    }

    /// Close of the newest bar on or before `as_of`, if any.
    pub async fn close_on_or_before(&self, symbol: &str, as_of: NaiveDate) -> Result<Option<f64>> {
        let db = self.db.lock().await;
        let close = db
            .query_row(
                "SELECT close FROM daily_prices
                 WHERE symbol = ?1 AND date <= ?2
                 ORDER BY date DESC LIMIT 1",
                params![symbol, as_of.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(close)
    }

    /// Closes in `[start, end]`, oldest first.
    pub async fn closes_between(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT date, close FROM daily_prices
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC",
        )?;
        let points = stmt
            .query_map(
                params![
                    symbol,
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    let date: String = row.get(0)?;
                    Ok(PricePoint {
                        date: parse_date(&date, 0)?,
                        close: row.get(1)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }

    /// Rank listed securities in the universe by trailing return.
    ///
    /// The return compares the latest close on or before `as_of` with the
    /// latest close on or before `as_of - trailing_months`. Securities missing
    /// either price, or with a non-positive base price, are left out.
    pub async fn rank_by_trailing_return(
        &self,
        as_of: NaiveDate,
        trailing_months: u32,
        universe: &UniverseFilter,
        limit: usize,
    ) -> Result<Vec<RankedSymbol>> {
        let base = as_of
            .checked_sub_months(Months::new(trailing_months))
            .with_context(|| format!("{} minus {} months is out of range", as_of, trailing_months))?;

        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            r#"
            SELECT s.symbol, s.tier,
                (SELECT p.close FROM daily_prices p
                 WHERE p.symbol = s.symbol AND p.date <= ?1
                 ORDER BY p.date DESC LIMIT 1) AS end_close,
                (SELECT p.close FROM daily_prices p
                 WHERE p.symbol = s.symbol AND p.date <= ?2
                 ORDER BY p.date DESC LIMIT 1) AS base_close
            FROM securities s
            WHERE s.listed = 1
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![
                    as_of.format(DATE_FORMAT).to_string(),
                    base.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut ranked: Vec<RankedSymbol> = rows
            .into_iter()
            .filter(|(_, tier, _, _)| universe.matches(tier))
            .filter_map(|(symbol, _, end_close, base_close)| match (end_close, base_close) {
                (Some(end), Some(base)) if base > 0.0 => {
                    Some(RankedSymbol::new(symbol, end / base - 1.0))
                }
                _ => None,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.trailing_return
                .total_cmp(&a.trailing_return)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranked.truncate(limit);

        debug!(%as_of, %universe, trailing_months, returned = ranked.len(), "Ranked securities");
        Ok(ranked)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Get storage statistics
    pub async fn get_stats(&self) -> Result<LocalStorageStats> {
        let db = self.db.lock().await;

        let security_count: i64 = db.query_row("SELECT COUNT(*) FROM securities", [], |r| r.get(0))?;
        let bar_count: i64 = db.query_row("SELECT COUNT(*) FROM daily_prices", [], |r| r.get(0))?;
        let priced_symbols: i64 =
            db.query_row("SELECT COUNT(DISTINCT symbol) FROM daily_prices", [], |r| r.get(0))?;
        let (first_date, last_date): (Option<String>, Option<String>) = db.query_row(
            "SELECT MIN(date), MAX(date) FROM daily_prices",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        Ok(LocalStorageStats {
            security_count: security_count as u64,
            bar_count: bar_count as u64,
            priced_symbols: priced_symbols as u64,
            first_date: first_date.and_then(|d| d.parse().ok()),
            last_date: last_date.and_then(|d| d.parse().ok()),
        })
    }
}

fn parse_date(value: &str, column: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// Collaborator Implementations
// ============================================================================

#[async_trait]
impl RankingSource for LocalStorage {
    async fn rank_top_n(
        &self,
        as_of: NaiveDate,
        trailing_months: u32,
        universe: &UniverseFilter,
        limit: usize,
    ) -> Result<Vec<RankedSymbol>, ProviderError> {
        self.rank_by_trailing_return(as_of, trailing_months, universe, limit)
            .await
            .map_err(|e| ProviderError::RankingUnavailable {
                as_of,
                reason: format!("{:#}", e),
            })
    }
}

#[async_trait]
impl PriceHistoryProvider for LocalStorage {
    async fn latest_close(&self, symbol: &str, as_of: NaiveDate) -> Result<f64, ProviderError> {
        match self.close_on_or_before(symbol, as_of).await {
            Ok(Some(close)) => Ok(close),
            Ok(None) => Err(ProviderError::PriceUnavailable {
                symbol: symbol.to_string(),
                as_of,
            }),
            Err(e) => Err(ProviderError::Storage(format!("{:#}", e))),
        }
    }

    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, ProviderError> {
        self.closes_between(symbol, start, end)
            .await
            .map_err(|e| ProviderError::Storage(format!("{:#}", e)))
    }
}

#[async_trait]
impl SecurityCatalog for LocalStorage {
    async fn list_securities(&self, universe: &UniverseFilter) -> Result<Vec<Security>, ProviderError> {
        LocalStorage::list_securities(self, universe)
            .await
            .map_err(|e| ProviderError::Storage(format!("{:#}", e)))
    }

    async fn get_security(&self, symbol: &str) -> Result<Option<Security>, ProviderError> {
        LocalStorage::get_security(self, symbol)
            .await
            .map_err(|e| ProviderError::Storage(format!("{:#}", e)))
    }
}

/// Statistics about local storage
#[derive(Debug, Clone)]
pub struct LocalStorageStats {
    pub security_count: u64,
    pub bar_count: u64,
    pub priced_symbols: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

impl std::fmt::Display for LocalStorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LocalStorage: {} securities, {} daily bars across {} symbols",
            self.security_count, self.bar_count, self.priced_symbols
        )?;
        if let (Some(first), Some(last)) = (self.first_date, self.last_date) {
            write!(f, " ({} to {})", first, last)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
