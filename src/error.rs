//! Error types for the DCA backtest engine.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the backtest engine.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid plan: {field}: {reason}")]
    InvalidPlan { field: String, reason: String },

    #[error("Missing price data for {date}")]
    MissingPriceData { date: NaiveDate },

    #[error("Negative holdings on {date}: held {held}, sell requested {requested}")]
    NegativeHoldings {
        date: NaiveDate,
        held: Decimal,
        requested: Decimal,
    },

    #[error("Cannot compute metrics on an empty portfolio timeline")]
    EmptyTimeline,

    #[error("Invalid backtester state: {0}")]
    InvalidState(String),

    #[error("Invalid price series: {0}")]
    InvalidPriceSeries(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BacktestError {
    /// Shorthand for building an [`BacktestError::InvalidPlan`].
    pub fn invalid_plan(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BacktestError::InvalidPlan {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable short name of the error kind, for presentation layers.
    pub fn kind(&self) -> &'static str {
        match self {
            BacktestError::InvalidPlan { .. } => "invalid_plan",
            BacktestError::MissingPriceData { .. } => "missing_price_data",
            BacktestError::NegativeHoldings { .. } => "negative_holdings",
            BacktestError::EmptyTimeline => "empty_timeline",
            BacktestError::InvalidState(_) => "invalid_state",
            BacktestError::InvalidPriceSeries(_) => "invalid_price_series",
            BacktestError::DataError(_) => "data",
            BacktestError::CsvError(_) => "csv",
            BacktestError::IoError(_) => "io",
            BacktestError::TomlError(_) | BacktestError::TomlSerializeError(_) => "toml",
            BacktestError::JsonError(_) => "json",
        }
    }

    /// The simulated date the error refers to, when there is one.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            BacktestError::MissingPriceData { date }
            | BacktestError::NegativeHoldings { date, .. } => Some(*date),
            _ => None,
        }
    }
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_plan_message() {
        let err = BacktestError::invalid_plan("base_contribution", "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid plan: base_contribution: must be positive"
        );
        assert_eq!(err.kind(), "invalid_plan");
        assert!(err.date().is_none());
    }

    #[test]
    fn test_missing_price_carries_date() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let err = BacktestError::MissingPriceData { date };
        assert_eq!(err.kind(), "missing_price_data");
        assert_eq!(err.date(), Some(date));
        assert!(err.to_string().contains("2024-02-29"));
    }
}
