//! Backtest execution engine.

use crate::analytics::{BacktestMetrics, MetricsCalculator};
use crate::dip::{DipBuyEvaluator, DipState};
use crate::error::{BacktestError, Result};
use crate::plan::InvestmentPlan;
use crate::schedule::ScheduleGenerator;
use crate::sell::{SellContext, SellState, SellStrategyEvaluator};
use crate::types::{
    PortfolioSnapshot, PortfolioTimeline, PriceSeries, PriceSource, Trade, TradeLog, TradeReason,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// How to handle simulated days that have no price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
    /// Abort the run with [`BacktestError::MissingPriceData`].
    #[default]
    Fail,
    /// Reuse the most recent earlier price and flag the snapshot.
    CarryForward,
}

/// Engine options that are not part of the strategy itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub missing_data: MissingDataPolicy,
    /// Daily risk-free rate used by the Sharpe ratio (as a decimal fraction).
    #[serde(default)]
    pub risk_free_daily_rate: f64,
    /// Show a progress bar during parameter sweeps.
    #[serde(default)]
    pub show_progress: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            missing_data: MissingDataPolicy::Fail,
            risk_free_daily_rate: 0.0,
            show_progress: false,
        }
    }
}

/// Results from a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Plan that produced this result.
    pub plan: InvestmentPlan,
    /// Every executed trade, in execution order.
    pub trades: TradeLog,
    /// One snapshot per simulated day.
    pub timeline: PortfolioTimeline,
    pub metrics: BacktestMetrics,
}

impl BacktestResult {
    pub fn trades_by_reason(&self, reason: TradeReason) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(move |t| t.reason == reason)
    }

    /// Number of snapshots whose price was carried forward.
    pub fn carried_forward_days(&self) -> usize {
        self.timeline.iter().filter(|s| s.is_carried_forward()).count()
    }
}

/// Lifecycle of a [`Backtester`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacktestState {
    Initialized,
    Running,
    Completed,
    /// Terminal state after any validation or simulation error.
    Invalid,
}

impl fmt::Display for BacktestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestState::Initialized => write!(f, "initialized"),
            BacktestState::Running => write!(f, "running"),
            BacktestState::Completed => write!(f, "completed"),
            BacktestState::Invalid => write!(f, "invalid"),
        }
    }
}

/// Holdings and cash flow accumulated during a run.
#[derive(Debug, Clone, Copy, Default)]
struct Holdings {
    quantity: Decimal,
    invested: Decimal,
    proceeds: Decimal,
}

/// Runs one plan against one price series.
pub struct Backtester {
    plan: InvestmentPlan,
    prices: PriceSeries,
    config: BacktestConfig,
    state: BacktestState,
}

impl Backtester {
    /// Create a backtester with the default configuration.
    pub fn new(plan: InvestmentPlan, prices: PriceSeries) -> Self {
        Self::with_config(plan, prices, BacktestConfig::default())
    }

    pub fn with_config(plan: InvestmentPlan, prices: PriceSeries, config: BacktestConfig) -> Self {
        Self {
            plan,
            prices,
            config,
            state: BacktestState::Initialized,
        }
    }

    pub fn state(&self) -> BacktestState {
        self.state
    }

    pub fn plan(&self) -> &InvestmentPlan {
        &self.plan
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the simulation. Can only be called once per backtester.
    ///
    /// Either the complete result is returned or an error; a failed run never
    /// yields partial trades or snapshots.
    pub fn run(&mut self) -> Result<BacktestResult> {
        if self.state != BacktestState::Initialized {
            return Err(BacktestError::InvalidState(format!(
                "backtester is {}, expected initialized",
                self.state
            )));
        }

        let outcome = self
            .plan
            .validate()
            .and_then(|_| ScheduleGenerator::for_plan(&self.plan))
            .and_then(|schedule| {
                self.state = BacktestState::Running;
                self.simulate(&schedule)
            });

        match outcome {
            Ok(result) => {
                self.state = BacktestState::Completed;
                Ok(result)
            }
            Err(e) => {
                self.state = BacktestState::Invalid;
                Err(e)
            }
        }
    }

    fn simulate(&self, schedule: &ScheduleGenerator) -> Result<BacktestResult> {
        let plan = &self.plan;
        info!(
            "Running DCA backtest: {} {} {} from {} to {} ({} days)",
            plan.asset,
            plan.frequency,
            plan.base_contribution,
            plan.start_date,
            plan.end_date,
            plan.duration_days()
        );

        let dip = DipBuyEvaluator::new(plan);
        let sell = SellStrategyEvaluator::new(plan);
        let mut dip_state = DipState::default();
        let mut sell_state = SellState::new(plan.start_date);

        let mut holdings = Holdings::default();
        let mut trades: TradeLog = Vec::new();
        let mut timeline: PortfolioTimeline =
            Vec::with_capacity(usize::try_from(plan.duration_days()).unwrap_or_default());
        let mut due_dates = schedule.iter().peekable();

        for date in plan.start_date.iter_days().take_while(|d| *d <= plan.end_date) {
            let (price, price_source) = self.price_for(date)?;

            while due_dates.next_if(|due| *due < date).is_some() {}
            let scheduled = due_dates.next_if_eq(&date).is_some();

            if scheduled && !sell.halts_buys(&sell_state) {
                let trade = Trade::buy(date, TradeReason::Scheduled, price, plan.base_contribution);
                Self::apply_buy(&mut holdings, &sell, &mut sell_state, &trade);
                trades.push(trade);
            }

            if let Some(signal) = dip.step(&mut dip_state, date, price) {
                if !sell.halts_buys(&sell_state) {
                    debug!(
                        "Dip of {:.2}% from {} on {}",
                        signal.drawdown_pct, signal.reference_price, date
                    );
                    let trade = Trade::buy(date, TradeReason::DipBuy, price, signal.usd_amount);
                    Self::apply_buy(&mut holdings, &sell, &mut sell_state, &trade);
                    trades.push(trade);
                }
            }

            let ctx = SellContext {
                date,
                price,
                quantity_held: holdings.quantity,
                cash_invested_cumulative: holdings.invested,
            };
            let executed = match sell.evaluate(&ctx, &sell_state) {
                Some(order) if order.quantity > Decimal::ZERO => {
                    if order.quantity > holdings.quantity {
                        return Err(BacktestError::NegativeHoldings {
                            date,
                            held: holdings.quantity,
                            requested: order.quantity,
                        });
                    }
                    let trade = Trade::sell(date, order.reason, price, order.quantity);
                    holdings.quantity += trade.asset_quantity_delta;
                    holdings.proceeds += trade.usd_amount;
                    debug!("Trade executed: {:?}", trade);
                    Some(trade)
                }
                _ => None,
            };
            sell.settle(&ctx, &mut sell_state, executed.as_ref());
            if let Some(trade) = executed {
                trades.push(trade);
            }

            timeline.push(PortfolioSnapshot {
                date,
                price,
                price_source,
                cash_invested_cumulative: holdings.invested,
                asset_quantity_held: holdings.quantity,
                market_value: holdings.quantity * price,
                realized_proceeds_cumulative: holdings.proceeds,
            });
        }

        let carried = timeline.iter().filter(|s| s.is_carried_forward()).count();
        if carried > 0 {
            warn!("{} of {} days used carried-forward prices", carried, timeline.len());
        }

        let metrics = MetricsCalculator::new(self.config.risk_free_daily_rate)
            .calculate(&timeline, &trades)?;

        info!(
            "Backtest complete: {} trades, {:.2}% ROI, {:.2}% APY, {:.2}% max DD",
            trades.len(),
            metrics.roi_pct,
            metrics.apy_pct,
            metrics.max_drawdown_pct
        );

        Ok(BacktestResult {
            plan: plan.clone(),
            trades,
            timeline,
            metrics,
        })
    }

    fn apply_buy(
        holdings: &mut Holdings,
        sell: &SellStrategyEvaluator,
        sell_state: &mut SellState,
        trade: &Trade,
    ) {
        holdings.quantity += trade.asset_quantity_delta;
        holdings.invested += trade.usd_amount;
        sell.record_buy(sell_state, trade.usd_amount);
        debug!("Trade executed: {:?}", trade);
    }

    fn price_for(&self, date: NaiveDate) -> Result<(Decimal, PriceSource)> {
        if let Some(price) = self.prices.price_on(date) {
            return Ok((price, PriceSource::Observed));
        }

        match self.config.missing_data {
            MissingDataPolicy::Fail => Err(BacktestError::MissingPriceData { date }),
            MissingDataPolicy::CarryForward => {
                let point = self
                    .prices
                    .last_on_or_before(date)
                    .ok_or(BacktestError::MissingPriceData { date })?;
                debug!("Carrying forward {} from {} to {}", point.price, point.date, date);
                Ok((point.price, PriceSource::CarriedForward))
            }
        }
    }
}

/// Run a single backtest with the given configuration.
pub fn run_backtest(
    plan: &InvestmentPlan,
    prices: &PriceSeries,
    config: &BacktestConfig,
) -> Result<BacktestResult> {
    Backtester::with_config(plan.clone(), prices.clone(), config.clone()).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DipBuyConfig, Frequency, SellStrategy};
    use chrono::Days;
    use rust_decimal_macros::dec;

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .checked_add_days(Days::new(n))
            .unwrap()
    }

    fn series(prices: &[Decimal]) -> PriceSeries {
        PriceSeries::from_pairs(prices.iter().enumerate().map(|(i, &p)| (day(i as u64), p)))
            .unwrap()
    }

    fn daily_plan(days: u64) -> InvestmentPlan {
        InvestmentPlan::new("BTC", dec!(100), Frequency::Daily, day(0), day(days - 1))
    }

    #[test]
    fn test_state_transitions() {
        let mut bt = Backtester::new(daily_plan(3), series(&[dec!(10), dec!(20), dec!(40)]));
        assert_eq!(bt.state(), BacktestState::Initialized);

        let result = bt.run().unwrap();
        assert_eq!(bt.state(), BacktestState::Completed);
        assert_eq!(result.trades.len(), 3);
        assert_eq!(result.timeline.len(), 3);

        assert!(matches!(bt.run(), Err(BacktestError::InvalidState(_))));
    }

    #[test]
    fn test_invalid_plan_is_terminal() {
        let mut plan = daily_plan(3);
        plan.base_contribution = dec!(-5);
        let mut bt = Backtester::new(plan, series(&[dec!(10), dec!(20), dec!(40)]));
        assert!(matches!(bt.run(), Err(BacktestError::InvalidPlan { .. })));
        assert_eq!(bt.state(), BacktestState::Invalid);
    }

    #[test]
    fn test_holdings_accumulate() {
        let mut bt = Backtester::new(daily_plan(3), series(&[dec!(10), dec!(20), dec!(50)]));
        let result = bt.run().unwrap();
        let last = result.timeline.last().unwrap();
        // 10 + 5 + 2 units
        assert_eq!(last.asset_quantity_held, dec!(17));
        assert_eq!(last.cash_invested_cumulative, dec!(300));
        assert_eq!(last.market_value, dec!(850));
        assert_eq!(result.metrics.total_invested, dec!(300));
    }

    #[test]
    fn test_missing_price_fails_by_default() {
        let prices = PriceSeries::from_pairs([(day(0), dec!(10)), (day(2), dec!(12))]).unwrap();
        let mut bt = Backtester::new(daily_plan(3), prices);
        let err = bt.run().unwrap_err();
        assert!(matches!(err, BacktestError::MissingPriceData { date } if date == day(1)));
        assert_eq!(bt.state(), BacktestState::Invalid);
    }

    #[test]
    fn test_carry_forward_flags_snapshots() {
        let prices = PriceSeries::from_pairs([(day(0), dec!(10)), (day(2), dec!(12))]).unwrap();
        let config = BacktestConfig {
            missing_data: MissingDataPolicy::CarryForward,
            ..Default::default()
        };
        let result = run_backtest(&daily_plan(3), &prices, &config).unwrap();

        assert_eq!(result.carried_forward_days(), 1);
        let filled = &result.timeline[1];
        assert_eq!(filled.price, dec!(10));
        assert_eq!(filled.price_source, PriceSource::CarriedForward);
        assert_eq!(result.timeline[2].price_source, PriceSource::Observed);
        assert_eq!(result.trades[1].price, dec!(10));
    }

    #[test]
    fn test_carry_forward_needs_an_earlier_price() {
        let prices = PriceSeries::from_pairs([(day(1), dec!(10)), (day(2), dec!(12))]).unwrap();
        let config = BacktestConfig {
            missing_data: MissingDataPolicy::CarryForward,
            ..Default::default()
        };
        let err = run_backtest(&daily_plan(3), &prices, &config).unwrap_err();
        assert_eq!(err.date(), Some(day(0)));
    }

    #[test]
    fn test_carry_forward_from_before_start() {
        let prices = PriceSeries::from_pairs([(day(0), dec!(10)), (day(5), dec!(12))]).unwrap();
        let plan = InvestmentPlan::new("BTC", dec!(100), Frequency::Daily, day(2), day(5));
        let config = BacktestConfig {
            missing_data: MissingDataPolicy::CarryForward,
            ..Default::default()
        };
        let result = run_backtest(&plan, &prices, &config).unwrap();
        assert_eq!(result.timeline.len(), 4);
        assert_eq!(result.carried_forward_days(), 3);
    }

    #[test]
    fn test_weekly_schedule_buys() {
        let prices: Vec<Decimal> = (0..15).map(|i| Decimal::from(100 + i)).collect();
        let plan = InvestmentPlan::new("BTC", dec!(50), Frequency::Weekly, day(0), day(14));
        let result = run_backtest(&plan, &series(&prices), &BacktestConfig::default()).unwrap();
        let dates: Vec<_> = result.trades.iter().map(|t| t.date).collect();
        assert_eq!(dates, vec![day(0), day(7), day(14)]);
    }

    #[test]
    fn test_dip_and_scheduled_same_day() {
        let plan = daily_plan(3).with_dip_buy(DipBuyConfig::new(dec!(10), dec!(3)));
        let result = run_backtest(
            &plan,
            &series(&[dec!(100), dec!(100), dec!(80)]),
            &BacktestConfig::default(),
        )
        .unwrap();

        let day_two: Vec<_> = result.trades.iter().filter(|t| t.date == day(2)).collect();
        assert_eq!(day_two.len(), 2);
        assert_eq!(day_two[0].reason, TradeReason::Scheduled);
        assert_eq!(day_two[1].reason, TradeReason::DipBuy);
        assert_eq!(day_two[1].usd_amount, dec!(300));
        assert_eq!(result.metrics.dip_buys, 1);
    }

    #[test]
    fn test_profit_taking_records_proceeds() {
        let plan = daily_plan(3).with_sell_strategy(SellStrategy::profit_taking(dec!(50), dec!(50)));
        let result = run_backtest(
            &plan,
            &series(&[dec!(10), dec!(10), dec!(40)]),
            &BacktestConfig::default(),
        )
        .unwrap();

        let sells: Vec<_> = result.trades_by_reason(TradeReason::ProfitTaking).collect();
        assert_eq!(sells.len(), 1);
        // 20 + 2.5 units held before the sell; half is sold at 40.
        assert_eq!(sells[0].quantity(), dec!(11.25));
        let last = result.timeline.last().unwrap();
        assert_eq!(last.realized_proceeds_cumulative, dec!(450));
        assert_eq!(result.metrics.final_value, last.market_value + dec!(450));
    }
}
