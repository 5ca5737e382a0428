//! Plan files.
//!
//! A plan file is a TOML document holding everything needed to reproduce a
//! backtest: the plan itself, where the prices come from and engine options.

use crate::data::DataConfig;
use crate::engine::{BacktestConfig, MissingDataPolicy};
use crate::error::{BacktestError, Result};
use crate::plan::{DipBuyConfig, Frequency, InvestmentPlan, SellStrategy};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete backtest description loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub plan: PlanSettings,
    #[serde(default)]
    pub dip_buy: DipBuySettings,
    #[serde(default)]
    pub sell: SellSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSettings {
    #[serde(default = "default_asset")]
    pub asset: String,
    #[serde(default = "default_contribution")]
    pub base_contribution: Decimal,
    #[serde(default)]
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub sell_cooldown_days: u32,
}

fn default_asset() -> String {
    "BTC".to_string()
}

fn default_contribution() -> Decimal {
    dec!(100)
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            asset: default_asset(),
            base_contribution: default_contribution(),
            frequency: Frequency::Weekly,
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap_or_default(),
            sell_cooldown_days: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DipBuySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: Decimal,
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub cooldown_days: Option<u32>,
}

fn default_threshold_pct() -> Decimal {
    dec!(10)
}

fn default_multiplier() -> Decimal {
    dec!(2)
}

fn default_lookback_days() -> u32 {
    DipBuyConfig::DEFAULT_LOOKBACK_DAYS
}

impl Default for DipBuySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_pct: default_threshold_pct(),
            multiplier: default_multiplier(),
            lookback_days: default_lookback_days(),
            cooldown_days: None,
        }
    }
}

impl DipBuySettings {
    pub fn to_config(&self) -> DipBuyConfig {
        DipBuyConfig {
            enabled: self.enabled,
            threshold_pct: self.threshold_pct,
            multiplier: self.multiplier,
            lookback_days: self.lookback_days,
            cooldown_days: self.cooldown_days,
        }
    }
}

/// Sell strategy name plus a flat bag of its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellSettings {
    /// One of `none`, `profit_taking`, `rebalancing`, `stop_loss`.
    #[serde(default = "default_sell_strategy")]
    pub strategy: String,
    pub profit_target_pct: Option<Decimal>,
    pub sell_fraction_pct: Option<Decimal>,
    pub interval_days: Option<u32>,
    pub target_allocation_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub allow_reentry: Option<bool>,
}

fn default_sell_strategy() -> String {
    "none".to_string()
}

impl Default for SellSettings {
    fn default() -> Self {
        Self {
            strategy: default_sell_strategy(),
            profit_target_pct: None,
            sell_fraction_pct: None,
            interval_days: None,
            target_allocation_pct: None,
            stop_loss_pct: None,
            allow_reentry: None,
        }
    }
}

impl SellSettings {
    fn has_params(&self) -> bool {
        self.profit_target_pct.is_some()
            || self.sell_fraction_pct.is_some()
            || self.interval_days.is_some()
            || self.target_allocation_pct.is_some()
            || self.stop_loss_pct.is_some()
            || self.allow_reentry.is_some()
    }

    /// Build the typed strategy, requiring exactly the parameters it needs.
    pub fn to_strategy(&self) -> Result<SellStrategy> {
        match self.strategy.to_lowercase().as_str() {
            "none" => {
                if self.has_params() {
                    return Err(BacktestError::invalid_plan(
                        "sell",
                        "parameters given but strategy is none",
                    ));
                }
                Ok(SellStrategy::None)
            }
            "profit_taking" => Ok(SellStrategy::ProfitTaking {
                profit_target_pct: required("sell.profit_target_pct", self.profit_target_pct)?,
                sell_fraction_pct: self.sell_fraction_pct.unwrap_or(dec!(25)),
            }),
            "rebalancing" => Ok(SellStrategy::Rebalancing {
                interval_days: required("sell.interval_days", self.interval_days)?,
                target_allocation_pct: required(
                    "sell.target_allocation_pct",
                    self.target_allocation_pct,
                )?,
            }),
            "stop_loss" => Ok(SellStrategy::StopLoss {
                stop_loss_pct: required("sell.stop_loss_pct", self.stop_loss_pct)?,
                allow_reentry: self.allow_reentry.unwrap_or(false),
            }),
            other => Err(BacktestError::invalid_plan(
                "sell.strategy",
                format!("unknown sell strategy '{}'", other),
            )),
        }
    }
}

fn required<T>(field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| BacktestError::invalid_plan(field, "required by the sell strategy"))
}

/// Where prices come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    pub path: Option<PathBuf>,
    pub date_format: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub skip_invalid: bool,
}

fn default_delimiter() -> char {
    ','
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: None,
            date_format: None,
            delimiter: ',',
            skip_invalid: false,
        }
    }
}

impl DataSettings {
    pub fn to_data_config(&self) -> Result<DataConfig> {
        let delimiter = u8::try_from(self.delimiter).map_err(|_| {
            BacktestError::DataError(format!(
                "delimiter '{}' is not a single-byte character",
                self.delimiter
            ))
        })?;
        Ok(DataConfig {
            date_format: self.date_format.clone(),
            delimiter,
            skip_invalid: self.skip_invalid,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default)]
    pub missing_data: MissingDataPolicy,
    #[serde(default)]
    pub risk_free_daily_rate: f64,
    #[serde(default)]
    pub show_progress: bool,
}

impl PlanFile {
    /// Load a plan file from TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading plan from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let file: PlanFile = toml::from_str(&content)?;
        Ok(file)
    }

    /// Save the plan file as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Build and validate the investment plan.
    pub fn to_plan(&self) -> Result<InvestmentPlan> {
        let p = &self.plan;
        InvestmentPlan::new(
            p.asset.clone(),
            p.base_contribution,
            p.frequency,
            p.start_date,
            p.end_date,
        )
        .with_dip_buy(self.dip_buy.to_config())
        .with_sell_strategy(self.sell.to_strategy()?)
        .with_sell_cooldown_days(p.sell_cooldown_days)
        .validated()
    }

    pub fn to_backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            missing_data: self.backtest.missing_data,
            risk_free_daily_rate: self.backtest.risk_free_daily_rate,
            show_progress: self.backtest.show_progress,
        }
    }

    /// Example plan file content.
    pub fn example() -> String {
        r#"# DCA backtest plan

[plan]
asset = "BTC"
base_contribution = 100.0
frequency = "weekly"        # daily | weekly | monthly
start_date = "2022-01-01"
end_date = "2023-12-31"
sell_cooldown_days = 0

[dip_buy]
enabled = true
threshold_pct = 10.0        # drop from the trailing high
multiplier = 2.0            # dip buy = multiplier x base_contribution
lookback_days = 30
# cooldown_days = 14

[sell]
strategy = "none"           # none | profit_taking | rebalancing | stop_loss
# profit_target_pct = 50.0
# sell_fraction_pct = 25.0
# interval_days = 90
# target_allocation_pct = 100.0
# stop_loss_pct = 30.0
# allow_reentry = false

[data]
path = "data/btc.csv"
# date_format = "%Y-%m-%d"
delimiter = ","
skip_invalid = false

[backtest]
missing_data = "fail"       # fail | carry_forward
risk_free_daily_rate = 0.0
show_progress = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_file() {
        let file = PlanFile::default();
        assert_eq!(file.plan.asset, "BTC");
        assert_eq!(file.sell.strategy, "none");
        let plan = file.to_plan().unwrap();
        assert_eq!(plan.frequency, Frequency::Weekly);
        assert_eq!(plan.sell_strategy, SellStrategy::None);
    }

    #[test]
    fn test_load_file() {
        let toml_content = r#"
[plan]
asset = "ETH"
base_contribution = 250
frequency = "monthly"
start_date = "2021-03-01"
end_date = "2021-12-31"

[dip_buy]
enabled = true
threshold_pct = 15
multiplier = 3

[sell]
strategy = "stop_loss"
stop_loss_pct = 20

[backtest]
missing_data = "carry_forward"
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let loaded = PlanFile::load(file.path()).unwrap();
        let plan = loaded.to_plan().unwrap();
        assert_eq!(plan.asset, "ETH");
        assert_eq!(plan.base_contribution, dec!(250));
        assert_eq!(plan.frequency, Frequency::Monthly);
        assert!(plan.dip_buy.enabled);
        assert_eq!(plan.dip_buy.threshold_pct, dec!(15));
        assert_eq!(plan.dip_buy.lookback_days, 30);
        assert_eq!(plan.sell_strategy, SellStrategy::stop_loss(dec!(20)));
        assert_eq!(
            loaded.to_backtest_config().missing_data,
            MissingDataPolicy::CarryForward
        );
    }

    #[test]
    fn test_sell_params_required() {
        let sell = SellSettings {
            strategy: "rebalancing".to_string(),
            interval_days: Some(30),
            ..Default::default()
        };
        let err = sell.to_strategy().unwrap_err();
        assert!(
            matches!(err, BacktestError::InvalidPlan { ref field, .. } if field == "sell.target_allocation_pct")
        );
    }

    #[test]
    fn test_sell_params_rejected_for_none() {
        let sell = SellSettings {
            stop_loss_pct: Some(dec!(10)),
            ..Default::default()
        };
        assert!(sell.to_strategy().is_err());
    }

    #[test]
    fn test_unknown_sell_strategy() {
        let sell = SellSettings {
            strategy: "trailing".to_string(),
            ..Default::default()
        };
        assert!(sell.to_strategy().is_err());
    }

    #[test]
    fn test_profit_taking_fraction_default() {
        let sell = SellSettings {
            strategy: "profit_taking".to_string(),
            profit_target_pct: Some(dec!(40)),
            ..Default::default()
        };
        assert_eq!(
            sell.to_strategy().unwrap(),
            SellStrategy::profit_taking(dec!(40), dec!(25))
        );
    }

    #[test]
    fn test_invalid_plan_values_rejected() {
        let mut file = PlanFile::default();
        file.plan.base_contribution = Decimal::ZERO;
        assert!(matches!(
            file.to_plan(),
            Err(BacktestError::InvalidPlan { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let mut original = PlanFile::default();
        original.sell = SellSettings {
            strategy: "profit_taking".to_string(),
            profit_target_pct: Some(dec!(50)),
            sell_fraction_pct: Some(dec!(10)),
            ..Default::default()
        };
        let file = NamedTempFile::new().unwrap();
        original.save(file.path()).unwrap();

        let loaded = PlanFile::load(file.path()).unwrap();
        assert_eq!(loaded.to_plan().unwrap(), original.to_plan().unwrap());
    }

    #[test]
    fn test_example_parses() {
        let file: PlanFile = toml::from_str(&PlanFile::example()).unwrap();
        assert_eq!(file.plan.asset, "BTC");
        assert!(file.dip_buy.enabled);
        let plan = file.to_plan().unwrap();
        assert_eq!(plan.start_date, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(file.data.path, Some(PathBuf::from("data/btc.csv")));
    }

    #[test]
    fn test_data_settings_delimiter() {
        let settings = DataSettings {
            delimiter: ';',
            ..Default::default()
        };
        assert_eq!(settings.to_data_config().unwrap().delimiter, b';');

        let wide = DataSettings {
            delimiter: '→',
            ..Default::default()
        };
        assert!(wide.to_data_config().is_err());
    }
}
