//! Sub-day schedule boundaries
//!
//! An [`IntraDayDate`] is a calendar day plus the effort already consumed
//! within that day. It is the unit of every task start/end and of every
//! allocation boundary. A [`PartialDay`] is the slice of a day that lies
//! inside such boundaries.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::effort::EffortDuration;

#[derive(Debug, Error, PartialEq)]
pub enum DateError {
    #[error("Invalid date '{0}': expected 'YYYY-MM-DD' or 'YYYY-MM-DD+<effort>' (e.g. 2024-01-15+4h)")]
    InvalidDate(String),
}

/// A day plus an effort offset within that day, ordered by `(date, effort)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IntraDayDate {
    date: NaiveDate,
    effort: EffortDuration,
}

impl IntraDayDate {
    pub fn start_of_day(date: NaiveDate) -> Self {
        Self {
            date,
            effort: EffortDuration::zero(),
        }
    }

    pub fn create(date: NaiveDate, effort: EffortDuration) -> Self {
        Self { date, effort }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn effort(&self) -> EffortDuration {
        self.effort
    }

    pub fn is_start_of_day(&self) -> bool {
        self.effort.is_zero()
    }

    pub fn next_day_at_start(&self) -> Self {
        Self::start_of_day(self.date + Duration::days(1))
    }

    pub fn previous_day_at_start(&self) -> Self {
        Self::start_of_day(self.date - Duration::days(1))
    }

    /// Last day touched by an interval ending here
    pub fn last_touched_day(&self) -> NaiveDate {
        if self.is_start_of_day() {
            self.date - Duration::days(1)
        } else {
            self.date
        }
    }

    /// Whole days from `self` to `end`, counting a partially used end day as one
    pub fn days_until(&self, end: &IntraDayDate) -> i64 {
        let end_day = if end.is_start_of_day() {
            end.date
        } else {
            end.date + Duration::days(1)
        };
        (end_day - self.date).num_days()
    }

    /// Linear position in seconds given a nominal working-day length
    ///
    /// Offsets at or beyond the day length collapse onto the next day start, so
    /// positions of equal instants compare equal.
    pub fn to_position(&self, day_length: EffortDuration) -> i64 {
        let day = day_length.as_seconds().max(1) as i64;
        let offset = self.effort.as_seconds().min(day as u64) as i64;
        days_from_epoch(self.date) * day + offset
    }

    /// Inverse of [`to_position`](Self::to_position)
    pub fn from_position(position: i64, day_length: EffortDuration) -> Self {
        let day = day_length.as_seconds().max(1) as i64;
        let days = position.div_euclid(day);
        let offset = position.rem_euclid(day);
        Self {
            date: epoch() + Duration::days(days),
            effort: EffortDuration::seconds(offset as u64),
        }
    }

    /// Normalizes an offset that reached the full day length to the next day start
    pub fn normalized(self, day_length: EffortDuration) -> Self {
        if !day_length.is_zero() && self.effort >= day_length {
            self.next_day_at_start()
        } else {
            self
        }
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_num_days_from_ce_opt(1).unwrap_or(NaiveDate::MIN)
}

fn days_from_epoch(date: NaiveDate) -> i64 {
    (date - epoch()).num_days()
}

impl fmt::Display for IntraDayDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.effort.is_zero() {
            write!(f, "{}", self.date)
        } else {
            write!(f, "{}+{}", self.date, self.effort)
        }
    }
}

impl FromStr for IntraDayDate {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DateError::InvalidDate(s.to_string());
        let text = s.trim();
        let (date_part, effort_part) = match text.split_once('+') {
            Some((date, effort)) => (date, Some(effort)),
            None => (text, None),
        };

        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| invalid())?;
        let effort = match effort_part {
            Some(effort) => effort.parse().map_err(|_| invalid())?,
            None => EffortDuration::zero(),
        };
        Ok(Self { date, effort })
    }
}

impl TryFrom<String> for IntraDayDate {
    type Error = DateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IntraDayDate> for String {
    fn from(date: IntraDayDate) -> Self {
        date.to_string()
    }
}

impl From<NaiveDate> for IntraDayDate {
    fn from(date: NaiveDate) -> Self {
        Self::start_of_day(date)
    }
}

/// The fraction of a single day that falls inside some interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDay {
    date: NaiveDate,
    start: EffortDuration,
    end: Option<EffortDuration>,
}

impl PartialDay {
    pub fn whole(date: NaiveDate) -> Self {
        Self {
            date,
            start: EffortDuration::zero(),
            end: None,
        }
    }

    pub fn starting_at(date: NaiveDate, start: EffortDuration) -> Self {
        Self { date, start, end: None }
    }

    pub fn ending_at(date: NaiveDate, end: EffortDuration) -> Self {
        Self {
            date,
            start: EffortDuration::zero(),
            end: Some(end),
        }
    }

    /// Slice of `date` covered by the interval `[start, end)`
    pub fn within(date: NaiveDate, start: &IntraDayDate, end: &IntraDayDate) -> Self {
        let from = if date == start.date() {
            start.effort()
        } else {
            EffortDuration::zero()
        };
        let until = if date == end.date() {
            Some(end.effort())
        } else {
            None
        };
        Self {
            date,
            start: from,
            end: until,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn start(&self) -> EffortDuration {
        self.start
    }

    pub fn end(&self) -> Option<EffortDuration> {
        self.end
    }

    pub fn is_whole(&self) -> bool {
        self.start.is_zero() && self.end.is_none()
    }

    /// Portion of a working day of `full` length that this slice covers
    pub fn limit_working_day(&self, full: EffortDuration) -> EffortDuration {
        let end = self.end.map_or(full, |end| end.min(full));
        end.saturating_sub(self.start)
    }

    /// Offset at which this slice ends given a working day of `full` length
    pub fn end_offset(&self, full: EffortDuration) -> EffortDuration {
        self.end.map_or(full, |end| end.min(full))
    }
}
