//! CSV ingestion for the security catalog and daily prices.
//!
//! Security lists are exchange downloads with a header row and the columns
//! `name, industry, symbol, series, isin`; the tier comes from the caller.
//! Price files hold `date,open,high,low,close,volume` rows, one file per
//! symbol named `<symbol lowercase>.csv`. Malformed rows are logged and
//! skipped, never fatal.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use super::{LocalStorage, PriceBar, Security, UniverseFilter};

/// Outcome of an import run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Files read
    pub files: usize,
    /// Records written to storage
    pub imported: usize,
    /// Rows rejected as malformed
    pub skipped: usize,
    /// Symbols for which no file was found
    pub missing: Vec<String>,
}

impl ImportReport {
    fn merge(&mut self, other: ImportReport) {
        self.files += other.files;
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.missing.extend(other.missing);
    }
}

impl std::fmt::Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files, {} imported, {} skipped, {} missing",
            self.files,
            self.imported,
            self.skipped,
            self.missing.len()
        )
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse an exchange security list. The first row is a header.
pub fn parse_security_csv<R: Read>(
    reader: R,
    tier: &str,
    fno_symbols: &HashSet<String>,
) -> Result<(Vec<Security>, usize)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut securities = Vec::new();
    let mut skipped = 0;

    for (idx, record) in rdr.records().enumerate() {
        let record = record.context("Failed to read security list row")?;
        if record.len() < 3 || record[2].is_empty() {
            warn!(row = idx + 1, "Skipping malformed security row");
            skipped += 1;
            continue;
        }

        let symbol = record[2].to_string();
        let non_empty = |i: usize| record.get(i).filter(|v| !v.is_empty()).map(String::from);

        securities.push(Security {
            fno: fno_symbols.contains(&symbol),
            name: record[0].to_string(),
            industry: non_empty(1),
            isin: non_empty(4),
            tier: tier.to_lowercase(),
            listed: true,
            symbol,
        });
    }

    Ok((securities, skipped))
}

/// Parse an F&O list, taking the symbol from the second column.
pub fn parse_fno_symbols<R: Read>(reader: R) -> Result<HashSet<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut symbols = HashSet::new();
    for record in rdr.records() {
        let record = record.context("Failed to read F&O list row")?;
        if let Some(symbol) = record.get(1).map(str::trim).filter(|s| !s.is_empty()) {
            symbols.insert(symbol.to_string());
        }
    }
    Ok(symbols)
}

/// Parse a daily price file for one symbol.
///
/// A leading `date` header is optional. Returns the bars and the number of
/// rows skipped.
pub fn parse_price_csv<R: Read>(reader: R, symbol: &str) -> Result<(Vec<PriceBar>, usize)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();
    let mut skipped = 0;

    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read price row for {}", symbol))?;

        if idx == 0 && record.get(0).is_some_and(|v| v.eq_ignore_ascii_case("date")) {
            continue;
        }

        match parse_price_row(&record, symbol) {
            Some(bar) => bars.push(bar),
            None => {
                warn!(symbol, row = idx + 1, record = ?record, "Skipping malformed price row");
                skipped += 1;
            }
        }
    }

    Ok((bars, skipped))
}

fn parse_price_row(record: &csv::StringRecord, symbol: &str) -> Option<PriceBar> {
    if record.len() < 6 {
        return None;
    }

    let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d").ok()?;
    let num = |i: usize| record[i].parse::<f64>().ok().filter(|v| v.is_finite());
    let volume = record[5]
        .parse::<i64>()
        .ok()
        .or_else(|| record[5].parse::<f64>().ok().map(|v| v as i64))?;

    Some(PriceBar {
        symbol: symbol.to_string(),
        date,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume,
    })
}

// ============================================================================
// Storage Import
// ============================================================================

/// Import a security list file into storage.
pub async fn import_securities_file(
    storage: &LocalStorage,
    path: &Path,
    tier: &str,
    fno_path: Option<&Path>,
) -> Result<ImportReport> {
    let fno_symbols = match fno_path {
        Some(p) => {
            let file = std::fs::File::open(p)
                .with_context(|| format!("Failed to open F&O list {}", p.display()))?;
            parse_fno_symbols(file)?
        }
        None => HashSet::new(),
    };

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open security list {}", path.display()))?;
    let (securities, skipped) = parse_security_csv(file, tier, &fno_symbols)?;
    let imported = storage.save_securities(&securities).await?;

    info!(path = %path.display(), tier, imported, skipped, "Imported security list");

    Ok(ImportReport {
        files: 1,
        imported,
        skipped,
        missing: Vec::new(),
    })
}

/// Import one price file for `symbol`.
pub async fn import_price_file(storage: &LocalStorage, path: &Path, symbol: &str) -> Result<ImportReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open price file {}", path.display()))?;
    let (bars, skipped) = parse_price_csv(file, symbol)?;

    if bars.is_empty() {
        warn!(symbol, path = %path.display(), "No valid rows in price file");
    }
    let imported = storage.save_prices(&bars).await?;

    Ok(ImportReport {
        files: 1,
        imported,
        skipped,
        missing: Vec::new(),
    })
}

/// Import `<dir>/<symbol lowercase>.csv` for every catalogued security.
///
/// A file that fails to parse is logged and the import moves on.
pub async fn import_price_dir(storage: &LocalStorage, dir: &Path) -> Result<ImportReport> {
    let securities = storage.list_securities(&UniverseFilter::All).await?;
    let mut report = ImportReport::default();

    info!(dir = %dir.display(), securities = securities.len(), "Importing daily prices");

    for (i, sec) in securities.iter().enumerate() {
        let path = dir.join(format!("{}.csv", sec.symbol.to_lowercase()));
        if !path.exists() {
            warn!(symbol = %sec.symbol, path = %path.display(), "Price file not found");
            report.missing.push(sec.symbol.clone());
            continue;
        }

        match import_price_file(storage, &path, &sec.symbol).await {
            Ok(r) => {
                tracing::debug!(
                    symbol = %sec.symbol,
                    index = i + 1,
                    total = securities.len(),
                    imported = r.imported,
                    "Imported price file"
                );
                report.merge(r);
            }
            Err(e) => warn!(symbol = %sec.symbol, error = %format!("{:#}", e), "Price import failed"),
        }
    }

    info!(%report, "Daily price import finished");
    Ok(report)
}

// ============================================================================
// Tests
// ============================================================================
