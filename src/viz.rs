//! Terminal charts for backtest timelines.
//!
//! Sparklines compress a daily timeline into a fixed number of block
//! characters, which is enough to eyeball how a plan's portfolio value grew
//! against the cash put into it.

use crate::engine::BacktestResult;
use rust_decimal::prelude::ToPrimitive;
use std::fmt::Write;

/// Block characters from lowest to highest.
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone)]
pub struct SparklineConfig {
    /// Maximum width in characters.
    pub width: usize,
    /// Fixed lower bound. Defaults to the minimum of the data.
    pub min_value: Option<f64>,
    /// Fixed upper bound. Defaults to the maximum of the data.
    pub max_value: Option<f64>,
}

impl Default for SparklineConfig {
    fn default() -> Self {
        Self {
            width: 40,
            min_value: None,
            max_value: None,
        }
    }
}

/// Render `values` as a sparkline at most `width` characters wide.
pub fn sparkline(values: &[f64], width: usize) -> String {
    sparkline_with_config(
        values,
        &SparklineConfig {
            width,
            ..Default::default()
        },
    )
}

pub fn sparkline_with_config(values: &[f64], config: &SparklineConfig) -> String {
    if values.is_empty() || config.width == 0 {
        return String::new();
    }

    let sampled = downsample(values, config.width);
    let lo = config
        .min_value
        .unwrap_or_else(|| sampled.iter().copied().fold(f64::INFINITY, f64::min));
    let hi = config
        .max_value
        .unwrap_or_else(|| sampled.iter().copied().fold(f64::NEG_INFINITY, f64::max));
    let range = hi - lo;

    sampled
        .iter()
        .map(|&v| {
            let level = if range > 0.0 {
                ((v - lo) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            SPARKLINE_CHARS[((level * 7.0).round() as usize).min(7)]
        })
        .collect()
}

/// Average consecutive buckets so the output has at most `target_len` points.
fn downsample(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() <= target_len {
        return values.to_vec();
    }

    let bucket = values.len() as f64 / target_len as f64;
    (0..target_len)
        .filter_map(|i| {
            let start = (i as f64 * bucket).floor() as usize;
            let end = (((i + 1) as f64 * bucket).ceil() as usize).min(values.len());
            (start < end).then(|| values[start..end].iter().sum::<f64>() / (end - start) as f64)
        })
        .collect()
}

/// Sparkline of market value plus realized proceeds over the run.
pub fn value_sparkline(result: &BacktestResult, width: usize) -> String {
    let values: Vec<f64> = result
        .timeline
        .iter()
        .map(|s| s.total_value().to_f64().unwrap_or(0.0))
        .collect();
    sparkline(&values, width)
}

/// Sparkline of cumulative cash invested, on the same scale as `value_sparkline`
/// when rendered through [`value_vs_invested`].
pub fn invested_sparkline(result: &BacktestResult, width: usize) -> String {
    let values: Vec<f64> = result
        .timeline
        .iter()
        .map(|s| s.cash_invested_cumulative.to_f64().unwrap_or(0.0))
        .collect();
    sparkline(&values, width)
}

/// Two aligned sparklines sharing one scale: portfolio value and cash invested.
pub fn value_vs_invested(result: &BacktestResult, width: usize) -> String {
    let value: Vec<f64> = result
        .timeline
        .iter()
        .map(|s| s.total_value().to_f64().unwrap_or(0.0))
        .collect();
    let invested: Vec<f64> = result
        .timeline
        .iter()
        .map(|s| s.cash_invested_cumulative.to_f64().unwrap_or(0.0))
        .collect();

    let config = SparklineConfig {
        width,
        min_value: Some(0.0),
        max_value: value
            .iter()
            .chain(invested.iter())
            .copied()
            .reduce(f64::max),
    };

    let mut out = String::new();
    let _ = writeln!(out, "Value    {}", sparkline_with_config(&value, &config));
    let _ = write!(out, "Invested {}", sparkline_with_config(&invested, &config));
    out
}

/// One-line summary: asset, sparkline and headline returns.
pub fn result_summary(result: &BacktestResult, width: usize) -> String {
    let m = &result.metrics;
    format!(
        "{} {} ROI {} APY {} DD {:.1}%",
        result.plan.asset,
        value_sparkline(result, width),
        format_pct(m.roi_pct),
        format_pct(m.apy_pct),
        m.max_drawdown_pct
    )
}

fn format_pct(value: f64) -> String {
    if value >= 0.0 {
        format!("+{:.1}%", value)
    } else {
        format!("{:.1}%", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{run_backtest, BacktestConfig};
    use crate::plan::{Frequency, InvestmentPlan};
    use crate::types::PriceSeries;
    use chrono::{Days, NaiveDate};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn rising_result(days: u64) -> BacktestResult {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let prices = PriceSeries::from_pairs((0..days).map(|i| {
            (
                start.checked_add_days(Days::new(i)).unwrap(),
                Decimal::from(100 + i),
            )
        }))
        .unwrap();
        let end = start.checked_add_days(Days::new(days - 1)).unwrap();
        let plan = InvestmentPlan::new("ETH", dec!(10), Frequency::Daily, start, end);
        run_backtest(&plan, &prices, &BacktestConfig::default()).unwrap()
    }

    #[test]
    fn test_sparkline_empty() {
        assert!(sparkline(&[], 10).is_empty());
        assert!(sparkline(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn test_sparkline_extremes() {
        let values: Vec<f64> = (0..8).map(f64::from).collect();
        let chars: Vec<char> = sparkline(&values, 8).chars().collect();
        assert_eq!(chars.len(), 8);
        assert_eq!(chars[0], SPARKLINE_CHARS[0]);
        assert_eq!(chars[7], SPARKLINE_CHARS[7]);
    }

    #[test]
    fn test_sparkline_constant_is_mid_level() {
        assert!(sparkline(&[5.0; 6], 6).chars().all(|c| c == SPARKLINE_CHARS[4]));
    }

    #[test]
    fn test_downsample() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let sampled = downsample(&values, 10);
        assert_eq!(sampled.len(), 10);
        assert!(sampled[0] < 10.0);
        assert!(sampled[9] > 90.0);
        assert_eq!(downsample(&values[..3], 10).len(), 3);
    }

    #[test]
    fn test_value_sparkline_width() {
        let result = rising_result(90);
        assert_eq!(value_sparkline(&result, 30).chars().count(), 30);
        assert_eq!(invested_sparkline(&result, 30).chars().count(), 30);
    }

    #[test]
    fn test_value_vs_invested_has_two_rows() {
        let result = rising_result(20);
        let chart = value_vs_invested(&result, 20);
        let lines: Vec<_> = chart.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Value"));
        assert!(lines[1].starts_with("Invested"));
    }

    #[test]
    fn test_result_summary() {
        let result = rising_result(10);
        let summary = result_summary(&result, 10);
        assert!(summary.starts_with("ETH "));
        assert!(summary.contains("ROI +"));
    }
}
