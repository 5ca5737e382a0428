//! Performance analytics and reporting.

use crate::engine::BacktestResult;
use crate::error::{BacktestError, Result};
use crate::types::{PortfolioSnapshot, Trade, TradeReason};
use colored::Colorize;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::{builder::Builder, settings::Style};

/// Calendar days per year used for annualization.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Decimal places kept on the final value before comparing it with invested cash.
/// Quantities are `usd / price` at full precision, so revaluing them can be
/// off by a few units in the 28th digit.
pub const VALUATION_DP: u32 = 10;

/// Summary statistics of a completed backtest.
///
/// Percentages are expressed in percent (12.5 means 12.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// Return on invested cash. Zero when nothing was invested.
    pub roi_pct: f64,
    /// False when nothing was bought and ROI has no meaningful value.
    pub roi_defined: bool,
    /// Compound annualized return over `days_elapsed`.
    pub apy_pct: f64,
    /// Annualized standard deviation of daily market-value changes.
    pub volatility_pct: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough decline of the held position's market value, as
    /// a positive number. Realized proceeds are not part of this series, so a
    /// full stop-loss exit reads as a 100% drawdown.
    pub max_drawdown_pct: f64,
    pub total_invested: Decimal,
    /// Market value at the end plus realized proceeds.
    pub final_value: Decimal,
    pub final_market_value: Decimal,
    pub realized_proceeds: Decimal,
    pub days_elapsed: i64,
    pub number_of_trades: usize,
    pub scheduled_buys: usize,
    pub dip_buys: usize,
    pub sells: usize,
}

impl BacktestMetrics {
    /// Named numeric view of the headline metrics.
    pub fn to_pairs(&self) -> BTreeMap<&'static str, f64> {
        let mut map = BTreeMap::new();
        map.insert("roi_pct", self.roi_pct);
        map.insert("apy_pct", self.apy_pct);
        map.insert("volatility_pct", self.volatility_pct);
        map.insert("sharpe_ratio", self.sharpe_ratio);
        map.insert("max_drawdown_pct", self.max_drawdown_pct);
        map.insert("total_invested", to_f64(self.total_invested));
        map.insert("final_value", to_f64(self.final_value));
        map.insert("days_elapsed", self.days_elapsed as f64);
        map.insert("number_of_trades", self.number_of_trades as f64);
        map
    }

    /// Look up a headline metric by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.to_pairs().get(name).copied()
    }
}

/// Computes [`BacktestMetrics`] from a timeline and trade log.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCalculator {
    risk_free_daily_rate: f64,
}

impl MetricsCalculator {
    pub fn new(risk_free_daily_rate: f64) -> Self {
        Self {
            risk_free_daily_rate,
        }
    }

    pub fn calculate(
        &self,
        timeline: &[PortfolioSnapshot],
        trades: &[Trade],
    ) -> Result<BacktestMetrics> {
        let (first, last) = match (timeline.first(), timeline.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(BacktestError::EmptyTimeline),
        };

        let total_invested: Decimal = trades
            .iter()
            .filter(|t| t.is_buy())
            .map(|t| t.usd_amount)
            .sum();
        let final_value = last.total_value();
        let days_elapsed = (last.date - first.date).num_days();

        let roi_defined = total_invested > Decimal::ZERO;
        let (roi_pct, apy_pct) = if roi_defined {
            let ratio = final_value.round_dp(VALUATION_DP) / total_invested;
            (
                to_f64((ratio - Decimal::ONE) * Decimal::ONE_HUNDRED),
                annualized_return(to_f64(ratio), days_elapsed),
            )
        } else {
            (0.0, 0.0)
        };

        let values: Vec<f64> = timeline.iter().map(|s| to_f64(s.market_value)).collect();
        let returns = daily_returns(&values);

        let count = |reason: TradeReason| trades.iter().filter(|t| t.reason == reason).count();

        Ok(BacktestMetrics {
            roi_pct,
            roi_defined,
            apy_pct,
            volatility_pct: calculate_volatility(&returns),
            sharpe_ratio: calculate_sharpe(&returns, self.risk_free_daily_rate),
            max_drawdown_pct: max_drawdown(&values),
            total_invested,
            final_value,
            final_market_value: last.market_value,
            realized_proceeds: last.realized_proceeds_cumulative,
            days_elapsed,
            number_of_trades: trades.len(),
            scheduled_buys: count(TradeReason::Scheduled),
            dip_buys: count(TradeReason::DipBuy),
            sells: trades.iter().filter(|t| t.is_sell()).count(),
        })
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Compound annual growth in percent for a value `ratio` reached after `days`.
pub fn annualized_return(ratio: f64, days: i64) -> f64 {
    if days <= 0 {
        return 0.0;
    }
    if ratio <= 0.0 {
        return -100.0;
    }
    (ratio.powf(DAYS_PER_YEAR / days as f64) - 1.0) * 100.0
}

/// Fractional day-over-day changes. Days following a zero value are skipped.
pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn mean_and_std(returns: &[f64]) -> (f64, f64) {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Annualized volatility in percent (population standard deviation).
pub fn calculate_volatility(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let (_, std) = mean_and_std(returns);
    std * DAYS_PER_YEAR.sqrt() * 100.0
}

/// Annualized Sharpe ratio. Zero when returns have no dispersion.
pub fn calculate_sharpe(returns: &[f64], risk_free_daily_rate: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let (mean, std) = mean_and_std(returns);
    if std == 0.0 {
        return 0.0;
    }
    (mean - risk_free_daily_rate) / std * DAYS_PER_YEAR.sqrt()
}

/// Maximum peak-to-trough decline in percent.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &value in values {
        peak = peak.max(value);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak * 100.0);
        }
    }
    max_dd
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a results report to stdout.
    pub fn print_report(result: &BacktestResult) {
        let plan = &result.plan;
        let m = &result.metrics;

        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " DCA BACKTEST RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Plan".bold().underline());
        println!("  Asset:           {}", plan.asset);
        println!(
            "  Contribution:    ${} {}",
            plan.base_contribution, plan.frequency
        );
        println!("  Period:          {} to {}", plan.start_date, plan.end_date);
        if plan.dip_buy.enabled {
            println!(
                "  Dip Buying:      {}% drop, {}x",
                plan.dip_buy.threshold_pct, plan.dip_buy.multiplier
            );
        }
        println!("  Sell Strategy:   {}", plan.sell_strategy.name());
        println!();

        println!("{}", "Performance".bold().underline());
        println!("  Total Invested:  ${:>12.2}", m.total_invested);
        println!(
            "  Final Value:     ${:>12.2}  {}",
            m.final_value,
            Self::format_pct_change(m.roi_pct)
        );
        println!("  Market Value:    ${:>12.2}", m.final_market_value);
        println!("  Realized:        ${:>12.2}", m.realized_proceeds);
        if m.roi_defined {
            println!("  ROI:             {:>12.2}%", m.roi_pct);
        } else {
            println!("  ROI:             {:>13}", "n/a");
        }
        println!("  APY:             {:>12.2}%", m.apy_pct);
        println!();

        println!("{}", "Risk Metrics".bold().underline());
        println!("  Max Drawdown:    {:>12.2}%", -m.max_drawdown_pct);
        println!("  Volatility:      {:>12.2}%", m.volatility_pct);
        println!("  Sharpe Ratio:    {:>12.2}", m.sharpe_ratio);
        println!();

        println!("{}", "Activity".bold().underline());
        println!("  Days:            {:>12}", m.days_elapsed);
        println!("  Total Trades:    {:>12}", m.number_of_trades);
        println!("  Scheduled Buys:  {:>12}", m.scheduled_buys);
        println!("  Dip Buys:        {:>12}", m.dip_buys);
        println!("  Sells:           {:>12}", m.sells);
        let carried = result.carried_forward_days();
        if carried > 0 {
            println!(
                "  {}",
                format!("{} days used carried-forward prices", carried).yellow()
            );
        }
        println!();

        println!("{}", "═".repeat(60).blue());
    }

    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// Print labelled results side by side, e.g. the output of a sweep.
    pub fn print_table(results: &[(String, &BacktestResult)]) {
        let mut builder = Builder::new();
        builder.push_record([
            "Run", "Invested", "Final", "ROI %", "APY %", "Max DD %", "Sharpe", "Trades",
        ]);

        for (label, result) in results {
            let m = &result.metrics;
            builder.push_record([
                label.clone(),
                format!("{:.2}", m.total_invested),
                format!("{:.2}", m.final_value),
                format!("{:.2}", m.roi_pct),
                format!("{:.2}", m.apy_pct),
                format!("{:.2}", -m.max_drawdown_pct),
                format!("{:.2}", m.sharpe_ratio),
                m.number_of_trades.to_string(),
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
    }

    /// Export results to JSON.
    pub fn to_json(result: &BacktestResult) -> Result<String> {
        Ok(serde_json::to_string_pretty(result)?)
    }

    /// Export the headline metrics as one CSV line.
    pub fn to_csv_line(result: &BacktestResult) -> String {
        let plan = &result.plan;
        let m = &result.metrics;
        format!(
            "{},{},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.4},{:.2},{}",
            plan.asset,
            plan.frequency,
            plan.sell_strategy.name(),
            plan.start_date,
            plan.end_date,
            m.total_invested,
            m.final_value,
            m.roi_pct,
            m.apy_pct,
            m.volatility_pct,
            m.sharpe_ratio,
            m.max_drawdown_pct,
            m.number_of_trades
        )
    }

    pub fn csv_header() -> &'static str {
        "asset,frequency,sell_strategy,start_date,end_date,total_invested,final_value,roi_pct,apy_pct,volatility_pct,sharpe_ratio,max_drawdown_pct,number_of_trades"
    }

    /// Serialize the trade log as CSV.
    pub fn trades_to_csv(trades: &[Trade]) -> Result<String> {
        Self::records_to_csv(trades)
    }

    /// Serialize the daily timeline as CSV.
    pub fn timeline_to_csv(timeline: &[PortfolioSnapshot]) -> Result<String> {
        Self::records_to_csv(timeline)
    }

    fn records_to_csv<T: Serialize>(records: &[T]) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| BacktestError::DataError(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| BacktestError::DataError(e.to_string()))
    }
}

/// Trade report generator.
pub struct TradeReport;

impl TradeReport {
    /// Print individual trades. A `limit` of zero prints all of them.
    pub fn print_trades(trades: &[Trade], limit: usize) {
        if trades.is_empty() {
            println!("No trades.");
            return;
        }

        let display_trades = if limit > 0 && limit < trades.len() {
            &trades[..limit]
        } else {
            trades
        };

        let mut builder = Builder::new();
        builder.push_record(["#", "Date", "Side", "Reason", "Price", "USD", "Qty"]);

        for (i, trade) in display_trades.iter().enumerate() {
            let side = if trade.is_buy() {
                trade.kind.to_string().green().to_string()
            } else {
                trade.kind.to_string().red().to_string()
            };
            builder.push_record([
                (i + 1).to_string(),
                trade.date.to_string(),
                side,
                trade.reason.to_string(),
                format!("{:.2}", trade.price),
                format!("{:.2}", trade.usd_amount),
                format!("{:.6}", trade.quantity()),
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);

        if limit > 0 && limit < trades.len() {
            println!("... and {} more trades", trades.len() - limit);
        }
    }
}
