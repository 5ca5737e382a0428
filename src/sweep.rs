//! Parallel parameter sweeps.
//!
//! A sweep runs many plan variants against the same price series. Each run is
//! an independent [`Backtester`], so the variants are spread over the rayon
//! thread pool; results come back in input order.

use crate::engine::{BacktestConfig, BacktestResult, Backtester};
use crate::error::Result;
use crate::plan::{DipBuyConfig, Frequency, InvestmentPlan};
use crate::types::PriceSeries;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::{info, warn};

/// Runs plan variants against one price series.
pub struct SweepRunner {
    prices: PriceSeries,
    config: BacktestConfig,
}

impl SweepRunner {
    pub fn new(prices: PriceSeries, config: BacktestConfig) -> Self {
        Self { prices, config }
    }

    /// Build a plan for every parameter set and backtest them in parallel.
    ///
    /// Variants whose plan cannot be built or whose run fails are logged and
    /// left out of the output.
    pub fn run<P, F>(&self, params: Vec<P>, plan_factory: F) -> Vec<(P, BacktestResult)>
    where
        P: Clone + Send + Sync,
        F: Fn(&P) -> Result<InvestmentPlan> + Send + Sync,
    {
        info!("Sweeping {} plan variants", params.len());

        let progress = if self.config.show_progress {
            let pb = ProgressBar::new(params.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let results: Vec<(P, BacktestResult)> = params
            .par_iter()
            .filter_map(|param| {
                let outcome = plan_factory(param).and_then(|plan| {
                    Backtester::with_config(plan, self.prices.clone(), self.config.clone()).run()
                });
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
                match outcome {
                    Ok(result) => Some((param.clone(), result)),
                    Err(e) => {
                        warn!("Sweep run failed: {}", e);
                        None
                    }
                }
            })
            .collect();

        if let Some(pb) = progress {
            pb.finish_with_message("done");
        }

        info!("{} of {} variants completed", results.len(), params.len());
        results
    }
}

/// One point in a dip-buying grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DipSweepParams {
    pub frequency: Frequency,
    /// `None` runs the variant without dip buying.
    pub threshold_pct: Option<Decimal>,
    pub multiplier: Decimal,
}

impl DipSweepParams {
    /// Apply these parameters on top of `base`.
    pub fn apply(&self, base: &InvestmentPlan) -> InvestmentPlan {
        let mut plan = base.clone();
        plan.frequency = self.frequency;
        plan.dip_buy = match self.threshold_pct {
            Some(threshold) => DipBuyConfig {
                enabled: true,
                threshold_pct: threshold,
                multiplier: self.multiplier,
                ..base.dip_buy.clone()
            },
            None => DipBuyConfig {
                enabled: false,
                ..base.dip_buy.clone()
            },
        };
        plan
    }
}

impl fmt::Display for DipSweepParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.threshold_pct {
            Some(t) => write!(f, "{} dip {}% x{}", self.frequency, t, self.multiplier),
            None => write!(f, "{} no dip", self.frequency),
        }
    }
}

/// Every combination of frequency, threshold and multiplier, plus one
/// no-dip baseline per frequency.
pub fn dip_grid(
    frequencies: &[Frequency],
    thresholds: &[Decimal],
    multipliers: &[Decimal],
) -> Vec<DipSweepParams> {
    frequencies
        .iter()
        .flat_map(|&frequency| {
            let baseline = DipSweepParams {
                frequency,
                threshold_pct: None,
                multiplier: Decimal::ONE,
            };
            std::iter::once(baseline).chain(thresholds.iter().flat_map(move |&threshold| {
                multipliers.iter().map(move |&multiplier| DipSweepParams {
                    frequency,
                    threshold_pct: Some(threshold),
                    multiplier,
                })
            }))
        })
        .collect()
}

/// Metric used to rank sweep results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    Roi,
    Apy,
    Sharpe,
    /// Lower is better.
    MaxDrawdown,
}

impl RankBy {
    fn score(&self, result: &BacktestResult) -> f64 {
        let m = &result.metrics;
        match self {
            RankBy::Roi => m.roi_pct,
            RankBy::Apy => m.apy_pct,
            RankBy::Sharpe => m.sharpe_ratio,
            RankBy::MaxDrawdown => -m.max_drawdown_pct,
        }
    }
}

/// Sort results best first.
pub fn rank<P>(results: &mut [(P, BacktestResult)], by: RankBy) {
    results.sort_by(|a, b| {
        by.score(&b.1)
            .partial_cmp(&by.score(&a.1))
            .unwrap_or(Ordering::Equal)
    });
}

/// The best result by the given metric.
pub fn best_by<P>(results: &[(P, BacktestResult)], by: RankBy) -> Option<&(P, BacktestResult)> {
    results.iter().max_by(|a, b| {
        by.score(&a.1)
            .partial_cmp(&by.score(&b.1))
            .unwrap_or(Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BacktestError;
    use chrono::{Days, NaiveDate};
    use rust_decimal_macros::dec;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn v_shaped_prices() -> PriceSeries {
        let prices = [100, 95, 90, 80, 70, 75, 85, 95, 105, 110];
        PriceSeries::from_pairs(
            prices
                .iter()
                .enumerate()
                .map(|(i, &p)| (start() + Days::new(i as u64), Decimal::from(p))),
        )
        .unwrap()
    }

    fn base_plan() -> InvestmentPlan {
        InvestmentPlan::new(
            "BTC",
            dec!(100),
            Frequency::Daily,
            start(),
            start() + Days::new(9),
        )
    }

    #[test]
    fn test_grid_size() {
        let grid = dip_grid(
            &[Frequency::Daily, Frequency::Weekly],
            &[dec!(10), dec!(20)],
            &[dec!(2), dec!(3), dec!(4)],
        );
        assert_eq!(grid.len(), 2 * (1 + 2 * 3));
        assert_eq!(grid[0].threshold_pct, None);
    }

    #[test]
    fn test_apply_params() {
        let params = DipSweepParams {
            frequency: Frequency::Weekly,
            threshold_pct: Some(dec!(15)),
            multiplier: dec!(3),
        };
        let plan = params.apply(&base_plan());
        assert_eq!(plan.frequency, Frequency::Weekly);
        assert!(plan.dip_buy.enabled);
        assert_eq!(plan.dip_contribution(), dec!(300));
        assert_eq!(params.to_string(), "weekly dip 15% x3");
    }

    #[test]
    fn test_sweep_preserves_order_and_skips_failures() {
        let runner = SweepRunner::new(v_shaped_prices(), BacktestConfig::default());
        let base = base_plan();
        let results = runner.run(vec![1u32, 2, 3], |&n| {
            if n == 2 {
                return Err(BacktestError::invalid_plan("test", "rejected"));
            }
            let mut plan = base.clone();
            plan.base_contribution = Decimal::from(n * 100);
            Ok(plan)
        });

        let keys: Vec<u32> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(keys, vec![1, 3]);
        assert_eq!(results[1].1.metrics.total_invested, dec!(3000));
    }

    #[test]
    fn test_dip_variants_outperform_in_v_shape() {
        let runner = SweepRunner::new(v_shaped_prices(), BacktestConfig::default());
        let base = base_plan();
        let grid = dip_grid(&[Frequency::Daily], &[dec!(20)], &[dec!(5)]);
        let mut results = runner.run(grid, |p| Ok(p.apply(&base)));
        assert_eq!(results.len(), 2);

        rank(&mut results, RankBy::Roi);
        assert_eq!(results[0].0.threshold_pct, Some(dec!(20)));
        let best = best_by(&results, RankBy::Roi).unwrap();
        assert_eq!(best.0, results[0].0);
    }
}
