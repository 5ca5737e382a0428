//! DCA Backtest - a deterministic dollar-cost-averaging simulator.
//!
//! # Overview
//!
//! Given an [`InvestmentPlan`] and a daily [`PriceSeries`], the engine walks
//! every calendar day of the plan and produces the executed trades, a daily
//! portfolio timeline and summary metrics:
//!
//! - **Scheduled contributions**: daily, weekly or monthly buys of a fixed USD amount
//! - **Dip buying**: one supplemental buy per drawdown from the trailing high
//! - **Sell strategies**: profit-taking, periodic rebalancing or a stop-loss
//! - **Exact money math**: amounts and quantities are `rust_decimal::Decimal`
//! - **Metrics**: ROI, APY, volatility, Sharpe ratio and max drawdown
//! - **Sweeps**: parallel parameter grids over one price series
//! - **Plan files**: TOML descriptions for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use dca_backtest::{
//!     data::{load_csv, DataConfig},
//!     engine::{BacktestConfig, Backtester},
//!     plan::{DipBuyConfig, Frequency, InvestmentPlan},
//! };
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//!
//! let prices = load_csv("data/btc.csv", &DataConfig::default()).unwrap();
//!
//! let plan = InvestmentPlan::new(
//!     "BTC",
//!     dec!(100),
//!     Frequency::Weekly,
//!     NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
//! )
//! .with_dip_buy(DipBuyConfig::new(dec!(10), dec!(2)));
//!
//! let mut backtester = Backtester::with_config(plan, prices, BacktestConfig::default());
//! let result = backtester.run().unwrap();
//!
//! println!("ROI: {:.2}%", result.metrics.roi_pct);
//! println!("APY: {:.2}%", result.metrics.apy_pct);
//! ```
//!
//! # Modules
//!
//! - [`types`]: Prices, trades and portfolio snapshots
//! - [`plan`]: Investment plan definition and validation
//! - [`schedule`]: Contribution date generation
//! - [`dip`]: Dip-buy evaluation
//! - [`sell`]: Sell strategy evaluation
//! - [`engine`]: The day-by-day backtester
//! - [`analytics`]: Metrics and report formatting
//! - [`data`]: CSV price loading and gap detection
//! - [`config`]: TOML plan files
//! - [`sweep`]: Parallel parameter sweeps
//! - [`viz`]: Terminal sparklines

pub mod analytics;
pub mod config;
pub mod data;
pub mod dip;
pub mod engine;
pub mod error;
pub mod plan;
pub mod schedule;
pub mod sell;
pub mod sweep;
pub mod types;
pub mod viz;

pub use analytics::{BacktestMetrics, MetricsCalculator, ResultFormatter, TradeReport};
pub use config::PlanFile;
pub use data::{detect_gaps, load_csv, load_csv_from_reader, DataConfig, DataGap};
pub use dip::{DipBuyEvaluator, DipState};
pub use engine::{
    run_backtest, BacktestConfig, BacktestResult, BacktestState, Backtester, MissingDataPolicy,
};
pub use error::{BacktestError, Result};
pub use plan::{DipBuyConfig, Frequency, InvestmentPlan, SellStrategy};
pub use schedule::ScheduleGenerator;
pub use sell::{SellState, SellStrategyEvaluator};
pub use sweep::{RankBy, SweepRunner};
pub use types::{
    PortfolioSnapshot, PortfolioTimeline, PricePoint, PriceSeries, PriceSource, Trade, TradeKind,
    TradeLog, TradeReason,
};
pub use viz::{sparkline, sparkline_with_config, SparklineConfig};
