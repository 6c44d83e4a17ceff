//! Market data module for the momentum backtester.
//!
//! Defines the records exchanged with the engine's collaborators (the
//! security catalog, the price history provider and the ranking source)
//! together with a SQLite-backed store and CSV ingestion.

pub mod import;
pub mod local_storage;
mod provider;

pub use import::{import_price_dir, parse_price_csv, parse_security_csv, ImportReport};
pub use local_storage::{LocalStorage, LocalStorageConfig, LocalStorageStats};
pub use provider::{PriceHistoryProvider, ProviderError, RankingSource, SecurityCatalog};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Core Data Types
// ============================================================================

/// Static identity of a listed instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    /// Exchange symbol (e.g., "INFY")
    pub symbol: String,
    /// Company name
    pub name: String,
    /// Classification tier ("large", "mid", "small", "micro", "index")
    pub tier: String,
    /// Industry
    #[serde(default)]
    pub industry: Option<String>,
    /// ISIN code
    #[serde(default)]
    pub isin: Option<String>,
    /// Currently listed and tradable
    #[serde(default = "default_listed")]
    pub listed: bool,
    /// Has futures & options contracts
    #[serde(default)]
    pub fno: bool,
}

fn default_listed() -> bool {
    true
}

impl Security {
    /// Create a listed security with only the required fields.
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            tier: tier.into(),
            industry: None,
            isin: None,
            listed: true,
            fno: false,
        }
    }
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// A dated closing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// A candidate returned by the ranking source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSymbol {
    pub symbol: String,
    /// Trailing return as a fraction (0.25 = +25%)
    pub trailing_return: f64,
}

impl RankedSymbol {
    pub fn new(symbol: impl Into<String>, trailing_return: f64) -> Self {
        Self {
            symbol: symbol.into(),
            trailing_return,
        }
    }
}

// ============================================================================
// Universe Filter
// ============================================================================

/// Which securities the ranking source may pick from.
///
/// Parsed from `"all"` or a comma-separated tier list such as `"mid,small,micro"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UniverseFilter {
    /// Every listed security
    All,
    /// Only securities whose tier is in the list (lowercase, deduplicated)
    Tiers(Vec<String>),
}

impl UniverseFilter {
    /// Check whether a security tier belongs to the universe.
    pub fn matches(&self, tier: &str) -> bool {
        match self {
            Self::All => true,
            Self::Tiers(tiers) => tiers.iter().any(|t| t.eq_ignore_ascii_case(tier)),
        }
    }
}

impl Default for UniverseFilter {
    fn default() -> Self {
        Self::All
    }
}

impl FromStr for UniverseFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let mut tiers: Vec<String> = Vec::new();
        for part in trimmed.split(',') {
            let tier = part.trim().to_lowercase();
            if tier.is_empty() {
                continue;
            }
            if tier == "all" {
                return Ok(Self::All);
            }
            if !tiers.contains(&tier) {
                tiers.push(tier);
            }
        }

        if tiers.is_empty() {
            Err(format!("empty universe filter: {:?}", s))
        } else {
            Ok(Self::Tiers(tiers))
        }
    }
}

impl TryFrom<String> for UniverseFilter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UniverseFilter> for String {
    fn from(value: UniverseFilter) -> Self {
        value.to_string()
    }
}

impl fmt::Display for UniverseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Tiers(tiers) => write!(f, "{}", tiers.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_parse_all() {
        assert_eq!("all".parse::<UniverseFilter>().unwrap(), UniverseFilter::All);
        assert_eq!(" ALL ".parse::<UniverseFilter>().unwrap(), UniverseFilter::All);
        assert_eq!("mid,all".parse::<UniverseFilter>().unwrap(), UniverseFilter::All);
    }

    #[test]
    fn test_universe_parse_tiers() {
        let filter: UniverseFilter = "Mid, small,,micro,mid".parse().unwrap();
        assert_eq!(
            filter,
            UniverseFilter::Tiers(vec!["mid".into(), "small".into(), "micro".into()])
        );
        assert_eq!(filter.to_string(), "mid,small,micro");
        assert!(filter.matches("SMALL"));
        assert!(!filter.matches("large"));
    }

    #[test]
    fn test_universe_parse_empty() {
        assert!(" , ".parse::<UniverseFilter>().is_err());
    }

    #[test]
    fn test_universe_serde_as_string() {
        let filter = UniverseFilter::Tiers(vec!["large".into()]);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, "\"large\"");
        let back: UniverseFilter = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(back, UniverseFilter::All);
    }

    #[test]
    fn test_security_defaults() {
        let sec: Security =
            serde_json::from_str(r#"{"symbol":"INFY","name":"Infosys","tier":"large"}"#).unwrap();
        assert!(sec.listed);
        assert!(!sec.fno);
        assert_eq!(sec, Security::new("INFY", "Infosys", "large"));
    }
}
