//! Investment plan definition and validation.
//!
//! An [`InvestmentPlan`] describes the strategy to simulate: how much to
//! contribute and how often, when to add a supplemental dip buy, and which
//! sell strategy to apply. Plans are validated once before a run starts and
//! are never modified by the engine.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contribution cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
        }
    }
}

/// Dip-buy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DipBuyConfig {
    pub enabled: bool,
    /// Drawdown from the trailing high, in percent, that triggers a dip buy.
    pub threshold_pct: Decimal,
    /// Multiplier applied to the base contribution for a dip buy.
    pub multiplier: Decimal,
    /// Calendar days in the trailing window used for the reference high.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Re-arm the trigger after this many days even if price has not recovered.
    #[serde(default)]
    pub cooldown_days: Option<u32>,
}

fn default_lookback_days() -> u32 {
    DipBuyConfig::DEFAULT_LOOKBACK_DAYS
}

impl DipBuyConfig {
    pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

    /// Enabled dip buying with the default 30-day lookback and no cooldown.
    pub fn new(threshold_pct: Decimal, multiplier: Decimal) -> Self {
        Self {
            enabled: true,
            threshold_pct,
            multiplier,
            lookback_days: Self::DEFAULT_LOOKBACK_DAYS,
            cooldown_days: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(dec!(10), dec!(2))
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_cooldown_days(mut self, days: u32) -> Self {
        self.cooldown_days = Some(days);
        self
    }
}

impl Default for DipBuyConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Sell strategy with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SellStrategy {
    /// Never sell.
    #[default]
    None,
    /// Sell a fraction of holdings once unrealized gain reaches the target.
    ProfitTaking {
        profit_target_pct: Decimal,
        #[serde(default = "default_sell_fraction_pct")]
        sell_fraction_pct: Decimal,
    },
    /// Every `interval_days`, trim market value back to a target share of cumulative invested.
    Rebalancing {
        interval_days: u32,
        target_allocation_pct: Decimal,
    },
    /// Liquidate the whole position once unrealized loss reaches the limit.
    StopLoss {
        stop_loss_pct: Decimal,
        /// When false, no buys happen after the stop fires.
        #[serde(default)]
        allow_reentry: bool,
    },
}

fn default_sell_fraction_pct() -> Decimal {
    dec!(25)
}

impl SellStrategy {
    pub fn profit_taking(profit_target_pct: Decimal, sell_fraction_pct: Decimal) -> Self {
        SellStrategy::ProfitTaking {
            profit_target_pct,
            sell_fraction_pct,
        }
    }

    pub fn rebalancing(interval_days: u32, target_allocation_pct: Decimal) -> Self {
        SellStrategy::Rebalancing {
            interval_days,
            target_allocation_pct,
        }
    }

    pub fn stop_loss(stop_loss_pct: Decimal) -> Self {
        SellStrategy::StopLoss {
            stop_loss_pct,
            allow_reentry: false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SellStrategy::None => "none",
            SellStrategy::ProfitTaking { .. } => "profit_taking",
            SellStrategy::Rebalancing { .. } => "rebalancing",
            SellStrategy::StopLoss { .. } => "stop_loss",
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            SellStrategy::None => Ok(()),
            SellStrategy::ProfitTaking {
                profit_target_pct,
                sell_fraction_pct,
            } => {
                require_positive("sell.profit_target_pct", profit_target_pct)?;
                require_pct_range("sell.sell_fraction_pct", sell_fraction_pct)
            }
            SellStrategy::Rebalancing {
                interval_days,
                target_allocation_pct,
            } => {
                if interval_days == 0 {
                    return Err(BacktestError::invalid_plan(
                        "sell.interval_days",
                        "must be at least 1",
                    ));
                }
                require_positive("sell.target_allocation_pct", target_allocation_pct)
            }
            SellStrategy::StopLoss { stop_loss_pct, .. } => {
                require_pct_range("sell.stop_loss_pct", stop_loss_pct)
            }
        }
    }
}

/// A complete DCA strategy to backtest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentPlan {
    /// Asset identifier, e.g. `BTC`.
    pub asset: String,
    /// USD invested on every scheduled date.
    pub base_contribution: Decimal,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub dip_buy: DipBuyConfig,
    #[serde(default)]
    pub sell_strategy: SellStrategy,
    /// Minimum days between two profit-taking or rebalancing sells.
    #[serde(default)]
    pub sell_cooldown_days: u32,
}

impl InvestmentPlan {
    /// Plain DCA plan with no dip buying and no sells.
    pub fn new(
        asset: impl Into<String>,
        base_contribution: Decimal,
        frequency: Frequency,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            asset: asset.into(),
            base_contribution,
            frequency,
            start_date,
            end_date,
            dip_buy: DipBuyConfig::disabled(),
            sell_strategy: SellStrategy::None,
            sell_cooldown_days: 0,
        }
    }

    pub fn with_dip_buy(mut self, dip_buy: DipBuyConfig) -> Self {
        self.dip_buy = dip_buy;
        self
    }

    pub fn with_sell_strategy(mut self, strategy: SellStrategy) -> Self {
        self.sell_strategy = strategy;
        self
    }

    pub fn with_sell_cooldown_days(mut self, days: u32) -> Self {
        self.sell_cooldown_days = days;
        self
    }

    /// Validate and return the plan.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Check every range and consistency constraint on the plan.
    pub fn validate(&self) -> Result<()> {
        if self.asset.trim().is_empty() {
            return Err(BacktestError::invalid_plan("asset", "must not be empty"));
        }

        require_positive("base_contribution", self.base_contribution)?;

        if self.start_date > self.end_date {
            return Err(BacktestError::invalid_plan(
                "start_date",
                format!(
                    "start date {} is after end date {}",
                    self.start_date, self.end_date
                ),
            ));
        }

        require_pct_range("dip_buy.threshold_pct", self.dip_buy.threshold_pct)?;
        require_positive("dip_buy.multiplier", self.dip_buy.multiplier)?;
        if self.dip_buy.lookback_days == 0 {
            return Err(BacktestError::invalid_plan(
                "dip_buy.lookback_days",
                "must be at least 1",
            ));
        }

        self.sell_strategy.validate()
    }

    /// USD spent on a triggered dip buy.
    pub fn dip_contribution(&self) -> Decimal {
        self.base_contribution * self.dip_buy.multiplier
    }

    /// Number of simulated days, inclusive of both ends.
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

fn require_positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(BacktestError::invalid_plan(
            field,
            format!("must be positive, got {}", value),
        ));
    }
    Ok(())
}

fn require_pct_range(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(BacktestError::invalid_plan(
            field,
            format!("must be in (0, 100], got {}", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn base_plan() -> InvestmentPlan {
        InvestmentPlan::new(
            "BTC",
            dec!(100),
            Frequency::Weekly,
            date(2024, 1, 1),
            date(2024, 6, 30),
        )
    }

    fn invalid_field(plan: &InvestmentPlan) -> String {
        match plan.validate() {
            Err(BacktestError::InvalidPlan { field, .. }) => field,
            other => panic!("expected InvalidPlan, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_plan() {
        assert!(base_plan().validate().is_ok());
        assert_eq!(base_plan().duration_days(), 182);
    }

    #[test]
    fn test_rejects_bad_amounts_and_dates() {
        let mut plan = base_plan();
        plan.base_contribution = Decimal::ZERO;
        assert_eq!(invalid_field(&plan), "base_contribution");

        let mut plan = base_plan();
        plan.start_date = date(2024, 7, 1);
        assert_eq!(invalid_field(&plan), "start_date");

        let mut plan = base_plan();
        plan.asset = "  ".to_string();
        assert_eq!(invalid_field(&plan), "asset");
    }

    #[test]
    fn test_rejects_bad_dip_params() {
        let plan = base_plan().with_dip_buy(DipBuyConfig::new(dec!(0), dec!(2)));
        assert_eq!(invalid_field(&plan), "dip_buy.threshold_pct");

        let plan = base_plan().with_dip_buy(DipBuyConfig::new(dec!(100.5), dec!(2)));
        assert_eq!(invalid_field(&plan), "dip_buy.threshold_pct");

        let plan = base_plan().with_dip_buy(DipBuyConfig::new(dec!(10), dec!(-1)));
        assert_eq!(invalid_field(&plan), "dip_buy.multiplier");

        let plan = base_plan().with_dip_buy(DipBuyConfig::new(dec!(10), dec!(2)).with_lookback_days(0));
        assert_eq!(invalid_field(&plan), "dip_buy.lookback_days");
    }

    #[test]
    fn test_rejects_bad_sell_params() {
        let plan = base_plan().with_sell_strategy(SellStrategy::stop_loss(dec!(0)));
        assert_eq!(invalid_field(&plan), "sell.stop_loss_pct");

        let plan = base_plan().with_sell_strategy(SellStrategy::profit_taking(dec!(20), dec!(150)));
        assert_eq!(invalid_field(&plan), "sell.sell_fraction_pct");

        let plan = base_plan().with_sell_strategy(SellStrategy::rebalancing(0, dec!(100)));
        assert_eq!(invalid_field(&plan), "sell.interval_days");

        let plan = base_plan().with_sell_strategy(SellStrategy::stop_loss(dec!(100)));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_dip_contribution() {
        let plan = base_plan().with_dip_buy(DipBuyConfig::new(dec!(10), dec!(2.5)));
        assert_eq!(plan.dip_contribution(), dec!(250));
    }

    #[test]
    fn test_sell_strategy_serde_tag() {
        let json = serde_json::to_string(&SellStrategy::stop_loss(dec!(20))).unwrap();
        assert!(json.contains("\"type\":\"stop_loss\""));

        let parsed: SellStrategy =
            serde_json::from_str(r#"{"type":"profit_taking","profit_target_pct":"30"}"#).unwrap();
        assert_eq!(parsed, SellStrategy::profit_taking(dec!(30), dec!(25)));
    }
}
