//! Contribution schedule generation.

use crate::error::{BacktestError, Result};
use crate::plan::{Frequency, InvestmentPlan};
use chrono::{Datelike, Days, Months, NaiveDate};

/// Produces the dates on which a scheduled contribution is due.
///
/// Dates start at `start`, advance by the cadence unit and never pass `end`.
/// Monthly steps are taken from the anchor date, so a schedule starting on
/// Jan 31 yields Feb 29 (or 28) and then Mar 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleGenerator {
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
}

impl ScheduleGenerator {
    pub fn new(start: NaiveDate, end: NaiveDate, frequency: Frequency) -> Result<Self> {
        if start > end {
            return Err(BacktestError::invalid_plan(
                "start_date",
                format!("start date {} is after end date {}", start, end),
            ));
        }
        Ok(Self {
            start,
            end,
            frequency,
        })
    }

    pub fn for_plan(plan: &InvestmentPlan) -> Result<Self> {
        Self::new(plan.start_date, plan.end_date, plan.frequency)
    }

    /// A fresh iterator over the due dates. Each call restarts from `start`.
    pub fn iter(&self) -> Schedule {
        Schedule {
            generator: *self,
            step: 0,
        }
    }

    /// Whether a scheduled contribution is due on `date`.
    pub fn is_due(&self, date: NaiveDate) -> bool {
        if date < self.start || date > self.end {
            return false;
        }

        match self.frequency {
            Frequency::Daily => true,
            Frequency::Weekly => (date - self.start).num_days() % 7 == 0,
            Frequency::Monthly => {
                let months = (date.year() - self.start.year()) * 12 + date.month() as i32
                    - self.start.month() as i32;
                u32::try_from(months)
                    .ok()
                    .and_then(|m| self.nth(m))
                    .is_some_and(|due| due == date)
            }
        }
    }

    fn nth(&self, step: u32) -> Option<NaiveDate> {
        match self.frequency {
            Frequency::Daily => self.start.checked_add_days(Days::new(u64::from(step))),
            Frequency::Weekly => self.start.checked_add_days(Days::new(u64::from(step) * 7)),
            Frequency::Monthly => self.start.checked_add_months(Months::new(step)),
        }
    }
}

impl IntoIterator for &ScheduleGenerator {
    type Item = NaiveDate;
    type IntoIter = Schedule;

    fn into_iter(self) -> Schedule {
        self.iter()
    }
}

/// Lazy iterator over due dates.
#[derive(Debug, Clone)]
pub struct Schedule {
    generator: ScheduleGenerator,
    step: u32,
}

impl Iterator for Schedule {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let date = self.generator.nth(self.step)?;
        if date > self.generator.end {
            return None;
        }
        self.step += 1;
        Some(date)
    }
}
