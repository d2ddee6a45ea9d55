//! Calendars and capacity
//!
//! A [`Calendar`] answers two questions for the allocator: how much effort a
//! single full-time resource can give on a (partial) day, and whether a day
//! is usable at all. [`WorkCalendar`] is the stock implementation: weekly
//! hours with per-date exceptions, an [`AvailabilityTimeline`] and an
//! overtime policy.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeMap;

use super::date::PartialDay;
use super::effort::{EffortDuration, ResourcesPerDay};

/// Standard effort of a day plus how far it may be exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub standard: EffortDuration,
    /// `None` means the day is over-assignable without limit
    pub allowed_extra: Option<EffortDuration>,
}

impl Capacity {
    pub fn unlimited(standard: EffortDuration) -> Self {
        Self {
            standard,
            allowed_extra: None,
        }
    }

    pub fn limited(standard: EffortDuration, extra: EffortDuration) -> Self {
        Self {
            standard,
            allowed_extra: Some(extra),
        }
    }

    /// Clamps `amount` to what this capacity allows
    pub fn limit(&self, amount: EffortDuration) -> EffortDuration {
        match self.allowed_extra {
            None => amount,
            Some(extra) => amount.min(self.standard + extra),
        }
    }
}

/// Capacity provider consumed by the allocator
pub trait Calendar {
    /// Standard capacity of one full-time resource on the given slice of a day
    fn capacity_on(&self, day: &PartialDay) -> EffortDuration;

    /// Standard capacity of the whole day and its overtime allowance
    fn capacity_with_overtime(&self, date: NaiveDate) -> Capacity;

    fn availability(&self) -> &AvailabilityTimeline;

    fn is_usable(&self, date: NaiveDate) -> bool {
        self.availability().is_valid(date) && !self.capacity_on(&PartialDay::whole(date)).is_zero()
    }

    /// Effort offered on `day` at the given ratio, bounded by the overtime policy
    fn as_duration_on(&self, day: &PartialDay, rpd: ResourcesPerDay) -> EffortDuration {
        if !self.availability().is_valid(day.date()) {
            return EffortDuration::zero();
        }
        let standard = self.capacity_on(day);
        let wanted = rpd.as_duration_given_working_day_of(standard);
        let whole = self.capacity_with_overtime(day.date());
        let allowance = Capacity {
            standard,
            allowed_extra: whole.allowed_extra,
        };
        allowance.limit(wanted)
    }
}

/// Which days are usable at all, as a set of invalid intervals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityTimeline {
    /// `[from, until)` ranges; `None` is unbounded on that side
    invalid: Vec<(Option<NaiveDate>, Option<NaiveDate>)>,
}

impl AvailabilityTimeline {
    pub fn all_valid() -> Self {
        Self::default()
    }

    /// Every day strictly before `date` is invalid
    pub fn invalid_until(date: NaiveDate) -> Self {
        Self {
            invalid: vec![(None, Some(date))],
        }
    }

    /// `date` and every day after it are invalid
    pub fn invalid_from(date: NaiveDate) -> Self {
        Self {
            invalid: vec![(Some(date), None)],
        }
    }

    pub fn invalid_at(date: NaiveDate) -> Self {
        Self {
            invalid: vec![(Some(date), Some(date + Duration::days(1)))],
        }
    }

    /// Days in `[from, until)` are invalid
    pub fn invalid_between(from: NaiveDate, until: NaiveDate) -> Self {
        Self {
            invalid: vec![(Some(from), Some(until))],
        }
    }

    /// Valid only where both timelines are valid
    pub fn and(&self, other: &AvailabilityTimeline) -> Self {
        let mut invalid = self.invalid.clone();
        invalid.extend(other.invalid.iter().copied());
        Self { invalid }
    }

    pub fn is_valid(&self, date: NaiveDate) -> bool {
        !self.invalid.iter().any(|(from, until)| {
            from.map_or(true, |from| date >= from) && until.map_or(true, |until| date < until)
        })
    }

    /// First day from which nothing is valid anymore, if any
    pub fn valid_until(&self) -> Option<NaiveDate> {
        self.invalid
            .iter()
            .filter_map(|(from, until)| match (from, until) {
                (Some(from), None) => Some(*from),
                _ => None,
            })
            .min()
    }

    /// First day before which nothing is valid, if any
    pub fn valid_from(&self) -> Option<NaiveDate> {
        self.invalid
            .iter()
            .filter_map(|(from, until)| match (from, until) {
                (None, Some(until)) => Some(*until),
                _ => None,
            })
            .max()
    }
}

/// How far a resource may be assigned beyond its standard day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overtime {
    #[default]
    Unlimited,
    Limited(EffortDuration),
}

/// Weekly working hours with dated exceptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkCalendar {
    /// Hours per weekday, Monday first
    weekly: [EffortDuration; 7],
    exceptions: BTreeMap<NaiveDate, EffortDuration>,
    availability: AvailabilityTimeline,
    overtime: Overtime,
}

impl Default for WorkCalendar {
    fn default() -> Self {
        Self::same_hours_every_day(EffortDuration::hours(8))
    }
}

impl WorkCalendar {
    /// Every day of the week works the same hours
    pub fn same_hours_every_day(hours: EffortDuration) -> Self {
        Self {
            weekly: [hours; 7],
            exceptions: BTreeMap::new(),
            availability: AvailabilityTimeline::all_valid(),
            overtime: Overtime::Unlimited,
        }
    }

    /// Works `hours` on the given weekdays and nothing on the others
    pub fn working_days(hours: EffortDuration, days: &[Weekday]) -> Self {
        let mut calendar = Self::same_hours_every_day(EffortDuration::zero());
        for day in days {
            calendar.weekly[day.num_days_from_monday() as usize] = hours;
        }
        calendar
    }

    pub fn with_weekday(mut self, day: Weekday, hours: EffortDuration) -> Self {
        self.weekly[day.num_days_from_monday() as usize] = hours;
        self
    }

    /// Overrides the hours of a single date; zero makes it a holiday
    pub fn with_exception(mut self, date: NaiveDate, hours: EffortDuration) -> Self {
        self.exceptions.insert(date, hours);
        self
    }

    pub fn with_availability(mut self, availability: AvailabilityTimeline) -> Self {
        self.availability = self.availability.and(&availability);
        self
    }

    pub fn with_overtime(mut self, overtime: Overtime) -> Self {
        self.overtime = overtime;
        self
    }

    /// Standard hours of the whole day, ignoring availability
    pub fn hours_on(&self, date: NaiveDate) -> EffortDuration {
        self.exceptions
            .get(&date)
            .copied()
            .unwrap_or(self.weekly[date.weekday().num_days_from_monday() as usize])
    }
}

impl Calendar for WorkCalendar {
    fn capacity_on(&self, day: &PartialDay) -> EffortDuration {
        if !self.availability.is_valid(day.date()) {
            return EffortDuration::zero();
        }
        day.limit_working_day(self.hours_on(day.date()))
    }

    fn capacity_with_overtime(&self, date: NaiveDate) -> Capacity {
        let standard = if self.availability.is_valid(date) {
            self.hours_on(date)
        } else {
            EffortDuration::zero()
        };
        match self.overtime {
            Overtime::Unlimited => Capacity::unlimited(standard),
            Overtime::Limited(extra) => Capacity::limited(standard, extra),
        }
    }

    fn availability(&self) -> &AvailabilityTimeline {
        &self.availability
    }
}
