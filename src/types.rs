//! Core data types for the backtest engine.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single daily price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: Decimal,
}

impl PricePoint {
    /// Create a new price point.
    pub fn new(date: NaiveDate, price: Decimal) -> Self {
        Self { date, price }
    }

    /// Validate that the price is strictly positive.
    pub fn validate(&self) -> bool {
        self.price > Decimal::ZERO
    }
}

/// Immutable, strictly date-ordered price history for one asset.
///
/// Gaps between dates are allowed; the backtester's missing data policy
/// decides how they are handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PricePoint>", into = "Vec<PricePoint>")]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series, rejecting non-positive prices and unsorted or duplicate dates.
    pub fn new(points: Vec<PricePoint>) -> Result<Self> {
        for point in &points {
            if !point.validate() {
                return Err(BacktestError::InvalidPriceSeries(format!(
                    "non-positive price {} on {}",
                    point.price, point.date
                )));
            }
        }

        if let Some(w) = points.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(BacktestError::InvalidPriceSeries(format!(
                "dates must be strictly increasing: {} followed by {}",
                w[0].date, w[1].date
            )));
        }

        Ok(Self { points })
    }

    /// Build a series from `(date, price)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (NaiveDate, Decimal)>) -> Result<Self> {
        Self::new(
            pairs
                .into_iter()
                .map(|(date, price)| PricePoint::new(date, price))
                .collect(),
        )
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PricePoint> {
        self.points.iter()
    }

    /// Price observed exactly on `date`.
    pub fn price_on(&self, date: NaiveDate) -> Option<Decimal> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].price)
    }

    /// Most recent observation on or before `date`.
    pub fn last_on_or_before(&self, date: NaiveDate) -> Option<&PricePoint> {
        let idx = self.points.partition_point(|p| p.date <= date);
        idx.checked_sub(1).map(|i| &self.points[i])
    }
}

impl TryFrom<Vec<PricePoint>> for PriceSeries {
    type Error = BacktestError;

    fn try_from(points: Vec<PricePoint>) -> Result<Self> {
        PriceSeries::new(points)
    }
}

impl From<PriceSeries> for Vec<PricePoint> {
    fn from(series: PriceSeries) -> Self {
        series.points
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Buy,
    Sell,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Buy => write!(f, "BUY"),
            TradeKind::Sell => write!(f, "SELL"),
        }
    }
}

/// Why a trade was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    /// Regular contribution due on the schedule.
    Scheduled,
    /// Supplemental buy triggered by a drawdown.
    DipBuy,
    ProfitTaking,
    Rebalance,
    StopLoss,
}

impl TradeReason {
    /// Direction implied by the reason.
    pub fn kind(&self) -> TradeKind {
        match self {
            TradeReason::Scheduled | TradeReason::DipBuy => TradeKind::Buy,
            TradeReason::ProfitTaking | TradeReason::Rebalance | TradeReason::StopLoss => {
                TradeKind::Sell
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeReason::Scheduled => "scheduled",
            TradeReason::DipBuy => "dip_buy",
            TradeReason::ProfitTaking => "profit_taking",
            TradeReason::Rebalance => "rebalance",
            TradeReason::StopLoss => "stop_loss",
        }
    }
}

impl fmt::Display for TradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An executed trade. Never modified once appended to the trade log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub kind: TradeKind,
    pub reason: TradeReason,
    pub price: Decimal,
    /// USD spent (buys) or received (sells). Always positive.
    pub usd_amount: Decimal,
    /// Signed change in held quantity: positive for buys, negative for sells.
    pub asset_quantity_delta: Decimal,
}

impl Trade {
    /// Buy `usd_amount` worth of the asset at `price`.
    pub fn buy(date: NaiveDate, reason: TradeReason, price: Decimal, usd_amount: Decimal) -> Self {
        Self {
            date,
            kind: TradeKind::Buy,
            reason,
            price,
            usd_amount,
            asset_quantity_delta: usd_amount / price,
        }
    }

    /// Sell `quantity` units of the asset at `price`.
    pub fn sell(date: NaiveDate, reason: TradeReason, price: Decimal, quantity: Decimal) -> Self {
        Self {
            date,
            kind: TradeKind::Sell,
            reason,
            price,
            usd_amount: quantity * price,
            asset_quantity_delta: -quantity,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self.kind, TradeKind::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self.kind, TradeKind::Sell)
    }

    /// Absolute quantity traded.
    pub fn quantity(&self) -> Decimal {
        self.asset_quantity_delta.abs()
    }
}

/// Whether a snapshot's price was observed or filled from an earlier day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    #[default]
    Observed,
    CarriedForward,
}

/// End-of-day portfolio state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub price: Decimal,
    pub price_source: PriceSource,
    pub cash_invested_cumulative: Decimal,
    pub asset_quantity_held: Decimal,
    /// `asset_quantity_held * price`.
    pub market_value: Decimal,
    /// USD received from all sells so far.
    pub realized_proceeds_cumulative: Decimal,
}

impl PortfolioSnapshot {
    /// Market value plus realized proceeds.
    pub fn total_value(&self) -> Decimal {
        self.market_value + self.realized_proceeds_cumulative
    }

    pub fn is_carried_forward(&self) -> bool {
        matches!(self.price_source, PriceSource::CarriedForward)
    }
}

/// Trades in execution order.
pub type TradeLog = Vec<Trade>;

/// One snapshot per simulated day, in date order.
pub type PortfolioTimeline = Vec<PortfolioSnapshot>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_series_validation() {
        let ok = PriceSeries::from_pairs([(day(1), dec!(100)), (day(3), dec!(101))]);
        assert!(ok.is_ok());

        let unsorted = PriceSeries::from_pairs([(day(3), dec!(100)), (day(1), dec!(101))]);
        assert!(matches!(
            unsorted,
            Err(BacktestError::InvalidPriceSeries(_))
        ));

        let duplicate = PriceSeries::from_pairs([(day(1), dec!(100)), (day(1), dec!(101))]);
        assert!(duplicate.is_err());

        let zero = PriceSeries::from_pairs([(day(1), dec!(0))]);
        assert!(zero.is_err());
    }

    #[test]
    fn test_series_lookup() {
        let series =
            PriceSeries::from_pairs([(day(1), dec!(100)), (day(3), dec!(103)), (day(6), dec!(99))])
                .unwrap();

        assert_eq!(series.price_on(day(3)), Some(dec!(103)));
        assert_eq!(series.price_on(day(2)), None);
        assert_eq!(series.last_on_or_before(day(5)).unwrap().price, dec!(103));
        assert_eq!(series.last_on_or_before(day(6)).unwrap().price, dec!(99));
        assert!(series
            .last_on_or_before(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap())
            .is_none());
    }

    #[test]
    fn test_series_serde_rejects_unsorted() {
        let json = r#"[{"date":"2024-01-02","price":"1"},{"date":"2024-01-01","price":"2"}]"#;
        let parsed: std::result::Result<PriceSeries, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_trade_constructors() {
        let buy = Trade::buy(day(1), TradeReason::Scheduled, dec!(50), dec!(100));
        assert!(buy.is_buy());
        assert_eq!(buy.asset_quantity_delta, dec!(2));

        let sell = Trade::sell(day(2), TradeReason::ProfitTaking, dec!(60), dec!(0.5));
        assert!(sell.is_sell());
        assert_eq!(sell.usd_amount, dec!(30));
        assert_eq!(sell.asset_quantity_delta, dec!(-0.5));
        assert_eq!(sell.quantity(), dec!(0.5));
    }

    #[test]
    fn test_reason_kind() {
        assert_eq!(TradeReason::DipBuy.kind(), TradeKind::Buy);
        assert_eq!(TradeReason::StopLoss.kind(), TradeKind::Sell);
        assert_eq!(TradeReason::Rebalance.to_string(), "rebalance");
    }
}
