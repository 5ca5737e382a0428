//! Loading daily price series from CSV.

use crate::error::{BacktestError, Result};
use crate::types::{PricePoint, PriceSeries};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Raw CSV row. Prices are kept as text so they parse exactly into `Decimal`.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Price", alias = "close", alias = "Close", alias = "c")]
    price: String,
}

/// CSV source options.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Explicit date format, e.g. `%d/%m/%Y`. Common formats are tried when unset.
    pub date_format: Option<String>,
    /// Without headers, columns are read as `date,price` by position.
    pub has_headers: bool,
    pub delimiter: u8,
    /// Skip unparseable rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: b',',
            skip_invalid: false,
        }
    }
}

/// Parse a date, trying the explicit format first and then common layouts.
/// Timestamps with a time part are truncated to their date.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%b-%Y",
        "%d %b %Y",
        "%b %d, %Y",
    ];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }

    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt.date_naive());
        }
    }

    Err(BacktestError::DataError(format!(
        "Could not parse date: '{}'",
        s
    )))
}

/// Parse a price exactly. Scientific notation is accepted.
pub fn parse_price(s: &str) -> Result<Decimal> {
    let s = s.trim();
    let price = Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| BacktestError::DataError(format!("Could not parse price: '{}'", s)))?;
    if price <= Decimal::ZERO {
        return Err(BacktestError::DataError(format!(
            "Price must be positive, got {}",
            price
        )));
    }
    Ok(price)
}

/// Load a daily price series from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<PriceSeries> {
    let path = path.as_ref();
    info!("Loading prices from: {}", path.display());
    let file = std::fs::File::open(path)?;
    load_csv_from_reader(file, config)
}

/// Load a daily price series from any CSV reader.
///
/// Rows are sorted by date. When a date appears more than once the first row
/// wins and the rest are dropped with a warning.
pub fn load_csv_from_reader<R: Read>(source: R, config: &DataConfig) -> Result<PriceSeries> {
    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(config.delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut points = Vec::new();
    let mut skipped = 0;

    for (idx, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row_num = idx + 1;
        let parsed = result
            .map_err(BacktestError::from)
            .and_then(|row| {
                let date = parse_date(&row.date, config.date_format.as_deref())?;
                let price = parse_price(&row.price)?;
                Ok(PricePoint::new(date, price))
            });

        match parsed {
            Ok(point) => points.push(point),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
            }
            Err(e) => {
                return Err(BacktestError::DataError(format!("row {}: {}", row_num, e)));
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    points.sort_by_key(|p| p.date);
    let original_len = points.len();
    points.dedup_by_key(|p| p.date);
    if points.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - points.len());
    }

    if points.is_empty() {
        return Err(BacktestError::DataError("no price rows found".to_string()));
    }

    let series = PriceSeries::new(points)?;
    info!(
        "Loaded {} prices from {} to {}",
        series.len(),
        series.first().map(|p| p.date.to_string()).unwrap_or_default(),
        series.last().map(|p| p.date.to_string()).unwrap_or_default()
    );
    Ok(series)
}

/// A run of calendar days with no observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGap {
    /// Last observed date before the gap.
    pub start: NaiveDate,
    /// First observed date after the gap.
    pub end: NaiveDate,
    pub missing_days: i64,
}

/// Find calendar-day gaps between consecutive observations.
pub fn detect_gaps(series: &PriceSeries) -> Vec<DataGap> {
    series
        .points()
        .windows(2)
        .filter_map(|w| {
            let missing_days = (w[1].date - w[0].date).num_days() - 1;
            (missing_days > 0).then(|| DataGap {
                start: w[0].date,
                end: w[1].date,
                missing_days,
            })
        })
        .collect()
}

/// Dates in `[start, end]` that have no observation.
pub fn missing_dates(series: &PriceSeries, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| series.price_on(*d).is_none())
        .collect()
}

/// Quick description of a loaded series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub points: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub gaps: usize,
    pub missing_days: i64,
}

impl SeriesSummary {
    pub fn from_series(series: &PriceSeries) -> Option<Self> {
        let first = series.first()?;
        let last = series.last()?;
        let gaps = detect_gaps(series);
        Some(Self {
            points: series.len(),
            first_date: first.date,
            last_date: last.date,
            min_price: series.iter().map(|p| p.price).min()?,
            max_price: series.iter().map(|p| p.price).max()?,
            gaps: gaps.len(),
            missing_days: gaps.iter().map(|g| g.missing_days).sum(),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.gaps == 0
    }
}
