//! Drawdown-triggered supplemental buys.
//!
//! The reference price is the highest price seen in the trailing
//! `lookback_days` calendar days, ending the day before the evaluated day.
//! A dip buy fires once per drawdown episode. The episode ends when price
//! recovers to the reference or, if configured, when the cooldown elapses.

use crate::plan::{DipBuyConfig, InvestmentPlan};
use crate::types::PricePoint;
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-run dip tracking state. Owned by the backtester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DipState {
    window: VecDeque<PricePoint>,
    episode_fired: bool,
    last_dip_date: Option<NaiveDate>,
}

impl DipState {
    /// Whether a dip buy has fired in the current, still-open episode.
    pub fn episode_fired(&self) -> bool {
        self.episode_fired
    }

    pub fn last_dip_date(&self) -> Option<NaiveDate> {
        self.last_dip_date
    }
}

/// A triggered dip buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DipSignal {
    pub reference_price: Decimal,
    pub drawdown_pct: Decimal,
    pub usd_amount: Decimal,
}

/// Decides whether a supplemental buy should fire on a given day.
#[derive(Debug, Clone)]
pub struct DipBuyEvaluator {
    config: DipBuyConfig,
    usd_amount: Decimal,
}

impl DipBuyEvaluator {
    pub fn new(plan: &InvestmentPlan) -> Self {
        Self {
            config: plan.dip_buy.clone(),
            usd_amount: plan.dip_contribution(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Highest price in the trailing window ending the day before `date`.
    pub fn reference_price(&self, state: &DipState, date: NaiveDate) -> Option<Decimal> {
        let window_start = self.window_start(date);
        state
            .window
            .iter()
            .filter(|p| p.date < date && window_start.map_or(true, |start| p.date >= start))
            .map(|p| p.price)
            .max()
    }

    /// Percentage decline of `price` from `reference`.
    pub fn drawdown_pct(reference: Decimal, price: Decimal) -> Decimal {
        (reference - price) / reference * Decimal::ONE_HUNDRED
    }

    /// Evaluate `date`, update the episode state and record the day's price.
    ///
    /// Must be called exactly once per simulated day, in date order, even when
    /// dip buying is disabled, so the trailing window stays complete.
    pub fn step(&self, state: &mut DipState, date: NaiveDate, price: Decimal) -> Option<DipSignal> {
        if let Some(start) = self.window_start(date) {
            while state.window.front().is_some_and(|p| p.date < start) {
                state.window.pop_front();
            }
        }

        let signal = self
            .reference_price(state, date)
            .and_then(|reference| self.decide(state, date, reference, price));

        state.window.push_back(PricePoint::new(date, price));
        signal
    }

    fn decide(
        &self,
        state: &mut DipState,
        date: NaiveDate,
        reference: Decimal,
        price: Decimal,
    ) -> Option<DipSignal> {
        if state.episode_fired {
            let recovered = price >= reference;
            let cooled_down = match (self.config.cooldown_days, state.last_dip_date) {
                (Some(days), Some(last)) => (date - last).num_days() >= i64::from(days),
                _ => false,
            };
            if recovered || cooled_down {
                state.episode_fired = false;
            }
        }

        if !self.config.enabled || state.episode_fired {
            return None;
        }

        let drawdown_pct = Self::drawdown_pct(reference, price);
        if drawdown_pct < self.config.threshold_pct {
            return None;
        }

        state.episode_fired = true;
        state.last_dip_date = Some(date);
        Some(DipSignal {
            reference_price: reference,
            drawdown_pct,
            usd_amount: self.usd_amount,
        })
    }

    fn window_start(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.checked_sub_days(Days::new(u64::from(self.config.lookback_days)))
    }
}
