//! Sell strategy evaluation.
//!
//! Each [`SellStrategy`] variant is evaluated as a pure function of its
//! parameters, the day's [`SellContext`] and the explicit [`SellState`]
//! carried across days. State transitions happen only in
//! [`SellStrategyEvaluator::settle`], after the engine has executed (or
//! skipped) the proposed sell.

use crate::plan::{InvestmentPlan, SellStrategy};
use crate::types::{Trade, TradeReason};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot-derived inputs for one day's sell decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellContext {
    pub date: NaiveDate,
    pub price: Decimal,
    pub quantity_held: Decimal,
    pub cash_invested_cumulative: Decimal,
}

impl SellContext {
    pub fn market_value(&self) -> Decimal {
        self.quantity_held * self.price
    }
}

/// Per-run sell tracking state. Owned by the backtester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellState {
    /// Basis for unrealized gain/loss; grows with buys, reset by sells.
    pub cost_basis: Decimal,
    /// Date of the last rebalance check (start date before the first one).
    pub last_rebalance_check: NaiveDate,
    pub last_sell_date: Option<NaiveDate>,
    pub stop_loss_triggered: bool,
}

impl SellState {
    pub fn new(start_date: NaiveDate) -> Self {
        Self {
            cost_basis: Decimal::ZERO,
            last_rebalance_check: start_date,
            last_sell_date: None,
            stop_loss_triggered: false,
        }
    }
}

/// A sell the engine should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellOrder {
    pub reason: TradeReason,
    pub quantity: Decimal,
}

/// Dispatches the plan's sell strategy.
#[derive(Debug, Clone)]
pub struct SellStrategyEvaluator {
    strategy: SellStrategy,
    cooldown_days: u32,
}

impl SellStrategyEvaluator {
    pub fn new(plan: &InvestmentPlan) -> Self {
        Self {
            strategy: plan.sell_strategy.clone(),
            cooldown_days: plan.sell_cooldown_days,
        }
    }

    pub fn strategy(&self) -> &SellStrategy {
        &self.strategy
    }

    /// Whether buys are suspended for the rest of the run.
    pub fn halts_buys(&self, state: &SellState) -> bool {
        match self.strategy {
            SellStrategy::StopLoss { allow_reentry, .. } => {
                state.stop_loss_triggered && !allow_reentry
            }
            _ => false,
        }
    }

    /// Propose a sell for the day, if any. Does not modify state.
    pub fn evaluate(&self, ctx: &SellContext, state: &SellState) -> Option<SellOrder> {
        if ctx.quantity_held <= Decimal::ZERO {
            return None;
        }

        match self.strategy {
            SellStrategy::None => None,
            SellStrategy::ProfitTaking {
                profit_target_pct,
                sell_fraction_pct,
            } => {
                if self.in_cooldown(ctx.date, state) {
                    return None;
                }
                profit_taking(ctx, state, profit_target_pct, sell_fraction_pct)
            }
            SellStrategy::Rebalancing {
                interval_days,
                target_allocation_pct,
            } => {
                if !rebalance_due(ctx.date, state, interval_days) || self.in_cooldown(ctx.date, state)
                {
                    return None;
                }
                rebalance(ctx, target_allocation_pct)
            }
            SellStrategy::StopLoss { stop_loss_pct, .. } => stop_loss(ctx, state, stop_loss_pct),
        }
    }

    /// Record a buy against the cost basis.
    pub fn record_buy(&self, state: &mut SellState, usd_amount: Decimal) {
        state.cost_basis += usd_amount;
    }

    /// Apply the day's transitions once the proposed sell (if any) has executed.
    pub fn settle(&self, ctx: &SellContext, state: &mut SellState, executed: Option<&Trade>) {
        if let SellStrategy::Rebalancing { interval_days, .. } = self.strategy {
            if rebalance_due(ctx.date, state, interval_days) {
                state.last_rebalance_check = ctx.date;
            }
        }

        let Some(trade) = executed else {
            return;
        };

        state.last_sell_date = Some(trade.date);
        let remaining = ctx.quantity_held - trade.quantity();
        match trade.reason {
            TradeReason::ProfitTaking => {
                state.cost_basis = remaining * ctx.price;
            }
            TradeReason::Rebalance => {
                if ctx.quantity_held > Decimal::ZERO {
                    state.cost_basis = state.cost_basis * remaining / ctx.quantity_held;
                }
            }
            TradeReason::StopLoss => {
                state.cost_basis = Decimal::ZERO;
                state.stop_loss_triggered = true;
            }
            TradeReason::Scheduled | TradeReason::DipBuy => {}
        }
    }

    fn in_cooldown(&self, date: NaiveDate, state: &SellState) -> bool {
        self.cooldown_days > 0
            && state
                .last_sell_date
                .is_some_and(|last| (date - last).num_days() < i64::from(self.cooldown_days))
    }
}

/// Unrealized gain in percent against the cost basis.
pub fn unrealized_pct(ctx: &SellContext, state: &SellState) -> Option<Decimal> {
    if state.cost_basis <= Decimal::ZERO {
        return None;
    }
    Some((ctx.market_value() - state.cost_basis) / state.cost_basis * Decimal::ONE_HUNDRED)
}

fn profit_taking(
    ctx: &SellContext,
    state: &SellState,
    profit_target_pct: Decimal,
    sell_fraction_pct: Decimal,
) -> Option<SellOrder> {
    let gain = unrealized_pct(ctx, state)?;
    if gain < profit_target_pct {
        return None;
    }
    Some(SellOrder {
        reason: TradeReason::ProfitTaking,
        quantity: ctx.quantity_held * sell_fraction_pct / Decimal::ONE_HUNDRED,
    })
}

fn rebalance_due(date: NaiveDate, state: &SellState, interval_days: u32) -> bool {
    (date - state.last_rebalance_check).num_days() >= i64::from(interval_days)
}

fn rebalance(ctx: &SellContext, target_allocation_pct: Decimal) -> Option<SellOrder> {
    let target = ctx.cash_invested_cumulative * target_allocation_pct / Decimal::ONE_HUNDRED;
    let excess = ctx.market_value() - target;
    if excess <= Decimal::ZERO {
        return None;
    }
    Some(SellOrder {
        reason: TradeReason::Rebalance,
        quantity: (excess / ctx.price).min(ctx.quantity_held),
    })
}

fn stop_loss(ctx: &SellContext, state: &SellState, stop_loss_pct: Decimal) -> Option<SellOrder> {
    let change = unrealized_pct(ctx, state)?;
    if change > -stop_loss_pct {
        return None;
    }
    Some(SellOrder {
        reason: TradeReason::StopLoss,
        quantity: ctx.quantity_held,
    })
}
