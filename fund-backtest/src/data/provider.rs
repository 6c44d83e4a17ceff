//! Collaborator interfaces consumed by the backtest engine.
//!
//! The engine never touches storage directly. It asks a `RankingSource` for
//! the candidates of each period and a `PriceHistoryProvider` for entry and
//! exit prices. `LocalStorage` implements all of these, tests use mocks.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use super::{PricePoint, RankedSymbol, Security, UniverseFilter};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors raised by data collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The ranked list could not be produced for this date
    RankingUnavailable { as_of: NaiveDate, reason: String },
    /// No close exists for the symbol at or before the date
    PriceUnavailable { symbol: String, as_of: NaiveDate },
    /// Underlying storage/transport failure
    Storage(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RankingUnavailable { as_of, reason } => {
                write!(f, "Ranking unavailable as of {}: {}", as_of, reason)
            }
            Self::PriceUnavailable { symbol, as_of } => {
                write!(f, "No price for {} on or before {}", symbol, as_of)
            }
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// True when the data simply does not exist (as opposed to a failure
    /// reaching the store).
    pub fn is_data_gap(&self) -> bool {
        matches!(self, Self::PriceUnavailable { .. })
    }

    /// Short operation label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RankingUnavailable { .. } => "ranking_unavailable",
            Self::PriceUnavailable { .. } => "price_unavailable",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<rusqlite::Error> for ProviderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Produces the ranked candidate list for a rebalance date.
#[async_trait]
pub trait RankingSource: Send + Sync {
    /// Return at most `limit` symbols from `universe`, ordered by descending
    /// trailing return over `trailing_months` ending at `as_of`.
    async fn rank_top_n(
        &self,
        as_of: NaiveDate,
        trailing_months: u32,
        universe: &UniverseFilter,
        limit: usize,
    ) -> Result<Vec<RankedSymbol>, ProviderError>;
}

/// Historical closing prices.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Close of the newest bar on or before `as_of`.
    async fn latest_close(&self, symbol: &str, as_of: NaiveDate) -> Result<f64, ProviderError>;

    /// Closes between `start` and `end` inclusive, oldest first.
    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, ProviderError>;
}

/// Static security identity.
#[async_trait]
pub trait SecurityCatalog: Send + Sync {
    /// All listed securities belonging to the universe, ordered by symbol.
    async fn list_securities(&self, universe: &UniverseFilter) -> Result<Vec<Security>, ProviderError>;

    /// Look up one security by symbol.
    async fn get_security(&self, symbol: &str) -> Result<Option<Security>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================
