//! Effort arithmetic
//!
//! [`EffortDuration`] is an amount of work independent of calendar days,
//! stored with second granularity. [`ResourcesPerDay`] is the full-time
//! equivalent ratio applied to a day's capacity, stored as fixed point with
//! four decimal places.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;
use thiserror::Error;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3600;

#[derive(Debug, Error, PartialEq)]
pub enum EffortError {
    #[error("Invalid effort duration: '{0}' (expected e.g. '8h', '7h30m', '45m')")]
    InvalidDuration(String),

    #[error("Invalid resources per day: {0} (must be a finite, non-negative number)")]
    InvalidRatio(f64),
}

/// A non-negative amount of work time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EffortDuration(u64);

impl EffortDuration {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn hours(hours: u64) -> Self {
        Self(hours.saturating_mul(SECONDS_PER_HOUR))
    }

    pub const fn minutes(minutes: u64) -> Self {
        Self(minutes.saturating_mul(SECONDS_PER_MINUTE))
    }

    pub const fn seconds(seconds: u64) -> Self {
        Self(seconds)
    }

    pub const fn as_seconds(&self) -> u64 {
        self.0
    }

    pub fn as_hours_f64(&self) -> f64 {
        self.0 as f64 / SECONDS_PER_HOUR as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Subtraction bounded at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `self * numerator / denominator`, rounded up to the next second.
    ///
    /// Returns zero when the denominator is zero.
    pub fn scale_ceil(self, numerator: Self, denominator: Self) -> Self {
        if denominator.0 == 0 {
            return Self::zero();
        }
        let product = self.0 as u128 * numerator.0 as u128;
        let den = denominator.0 as u128;
        Self(product.div_ceil(den) as u64)
    }
}

impl Add for EffortDuration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for EffortDuration {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

/// Saturates at zero, effort is never negative
impl Sub for EffortDuration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl Sum for EffortDuration {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

impl<'a> Sum<&'a EffortDuration> for EffortDuration {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for EffortDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.0 / SECONDS_PER_HOUR;
        let minutes = (self.0 % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
        let seconds = self.0 % SECONDS_PER_MINUTE;

        if hours > 0 || (minutes == 0 && seconds == 0) {
            write!(f, "{}h", hours)?;
        }
        if minutes > 0 {
            write!(f, "{}m", minutes)?;
        }
        if seconds > 0 {
            write!(f, "{}s", seconds)?;
        }
        Ok(())
    }
}

impl FromStr for EffortDuration {
    type Err = EffortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EffortError::InvalidDuration(s.to_string());
        let text = s.trim();
        if text.is_empty() {
            return Err(invalid());
        }

        let mut total = 0u64;
        let mut digits = String::new();
        for c in text.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            if c.is_whitespace() {
                continue;
            }
            let unit = match c {
                'h' => SECONDS_PER_HOUR,
                'm' => SECONDS_PER_MINUTE,
                's' => 1,
                _ => return Err(invalid()),
            };
            total = accumulate(total, &digits, unit).ok_or_else(invalid)?;
            digits.clear();
        }

        // A bare number means hours
        if !digits.is_empty() {
            total = accumulate(total, &digits, SECONDS_PER_HOUR).ok_or_else(invalid)?;
        }

        Ok(Self(total))
    }
}

/// Adds `digits` counted in `unit` seconds; `None` on bad digits or overflow
fn accumulate(total: u64, digits: &str, unit: u64) -> Option<u64> {
    let amount: u64 = digits.parse().ok()?;
    amount.checked_mul(unit).and_then(|seconds| total.checked_add(seconds))
}

impl TryFrom<String> for EffortDuration {
    type Error = EffortError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EffortDuration> for String {
    fn from(effort: EffortDuration) -> Self {
        effort.to_string()
    }
}

/// Full-time equivalents working on a task per calendar day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ResourcesPerDay(u32);

impl ResourcesPerDay {
    /// Fixed-point units per full-time equivalent
    pub const SCALE: u32 = 10_000;

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn amount(ftes: u32) -> Self {
        Self(ftes * Self::SCALE)
    }

    /// Builds a ratio from fixed-point units (`10_000` = 1.0)
    pub const fn from_units(units: u32) -> Self {
        Self(units)
    }

    /// Rounds to four decimal places
    pub fn from_decimal(value: f64) -> Result<Self, EffortError> {
        if !value.is_finite() || value < 0.0 {
            return Err(EffortError::InvalidRatio(value));
        }
        let units = (value * Self::SCALE as f64).round();
        if units > u32::MAX as f64 {
            return Err(EffortError::InvalidRatio(value));
        }
        Ok(Self(units as u32))
    }

    pub fn units(&self) -> u32 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Effort offered in a working day of the given length, to the nearest second
    pub fn as_duration_given_working_day_of(&self, working_day: EffortDuration) -> EffortDuration {
        let scale = Self::SCALE as u128;
        let product = working_day.as_seconds() as u128 * self.0 as u128;
        EffortDuration::seconds(((product + scale / 2) / scale) as u64)
    }

    /// Ratio that `worked` represents over `workable`, rounded half-up
    pub fn calculate_from(worked: EffortDuration, workable: EffortDuration) -> Self {
        if workable.is_zero() {
            return Self::zero();
        }
        let num = worked.as_seconds() as u128 * Self::SCALE as u128;
        let den = workable.as_seconds() as u128;
        let units = (2 * num + den) / (2 * den);
        Self(units.min(u32::MAX as u128) as u32)
    }
}

impl fmt::Display for ResourcesPerDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let fraction = self.0 % Self::SCALE;
        if fraction == 0 {
            write!(f, "{}", whole)
        } else {
            let digits = format!("{:04}", fraction);
            write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
        }
    }
}

impl TryFrom<f64> for ResourcesPerDay {
    type Error = EffortError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_decimal(value)
    }
}

impl From<ResourcesPerDay> for f64 {
    fn from(rpd: ResourcesPerDay) -> Self {
        rpd.as_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_arithmetic() {
        let eight = EffortDuration::hours(8);
        let three = EffortDuration::hours(3);

        assert_eq!(eight + three, EffortDuration::hours(11));
        assert_eq!(three - eight, EffortDuration::zero());
        assert_eq!(eight - three, EffortDuration::hours(5));
        assert_eq!(
            vec![eight, three, EffortDuration::minutes(30)].iter().sum::<EffortDuration>(),
            EffortDuration::minutes(11 * 60 + 30)
        );
        assert!(three < eight);
    }

    #[test]
    fn effort_display_and_parse() {
        assert_eq!(EffortDuration::hours(8).to_string(), "8h");
        assert_eq!(EffortDuration::minutes(450).to_string(), "7h30m");
        assert_eq!(EffortDuration::minutes(45).to_string(), "45m");
        assert_eq!(EffortDuration::zero().to_string(), "0h");

        assert_eq!("7h30m".parse::<EffortDuration>().unwrap(), EffortDuration::minutes(450));
        assert_eq!("7h 30m".parse::<EffortDuration>().unwrap(), EffortDuration::minutes(450));
        assert_eq!("12".parse::<EffortDuration>().unwrap(), EffortDuration::hours(12));
        assert!("8x".parse::<EffortDuration>().is_err());
        assert!("".parse::<EffortDuration>().is_err());
    }

    #[test]
    fn oversized_effort_rejected() {
        let err = "9999999999999999h".parse::<EffortDuration>().unwrap_err();
        assert!(matches!(err, EffortError::InvalidDuration(_)));
        assert!("18446744073709551615".parse::<EffortDuration>().is_err());
        assert!("5124095576030431h 1h".parse::<EffortDuration>().is_err());
        assert_eq!(EffortDuration::hours(u64::MAX).as_seconds(), u64::MAX);
    }

    #[test]
    fn scale_ceil_rounds_up() {
        let eight = EffortDuration::hours(8);
        assert_eq!(
            eight.scale_ceil(EffortDuration::hours(4), EffortDuration::hours(16)),
            EffortDuration::hours(2)
        );
        assert_eq!(
            EffortDuration::seconds(10).scale_ceil(EffortDuration::seconds(1), EffortDuration::seconds(3)),
            EffortDuration::seconds(4)
        );
        assert_eq!(eight.scale_ceil(eight, EffortDuration::zero()), EffortDuration::zero());
    }

    #[test]
    fn resources_per_day_applied_to_a_day() {
        let eight = EffortDuration::hours(8);
        assert_eq!(ResourcesPerDay::amount(2).as_duration_given_working_day_of(eight), EffortDuration::hours(16));
        assert_eq!(
            ResourcesPerDay::from_decimal(0.5).unwrap().as_duration_given_working_day_of(eight),
            EffortDuration::hours(4)
        );
        assert_eq!(ResourcesPerDay::zero().as_duration_given_working_day_of(eight), EffortDuration::zero());
    }

    #[test]
    fn resources_per_day_back_computed() {
        let rpd = ResourcesPerDay::calculate_from(EffortDuration::hours(30), EffortDuration::hours(15));
        assert_eq!(rpd, ResourcesPerDay::amount(2));

        // 10 / 3 = 3.33333.. rounds to four decimals
        let rpd = ResourcesPerDay::calculate_from(EffortDuration::hours(10), EffortDuration::hours(3));
        assert_eq!(rpd.units(), 33_333);

        // 2 / 3 = 0.66666.. rounds half-up
        let rpd = ResourcesPerDay::calculate_from(EffortDuration::hours(2), EffortDuration::hours(3));
        assert_eq!(rpd.units(), 6_667);

        assert!(ResourcesPerDay::calculate_from(EffortDuration::hours(2), EffortDuration::zero()).is_zero());
    }

    #[test]
    fn resources_per_day_decimal_conversion() {
        assert_eq!(ResourcesPerDay::from_decimal(1.25).unwrap().to_string(), "1.25");
        assert_eq!(ResourcesPerDay::amount(3).to_string(), "3");
        assert!(ResourcesPerDay::from_decimal(-1.0).is_err());
        assert!(ResourcesPerDay::from_decimal(f64::NAN).is_err());

        let parsed: ResourcesPerDay = serde_json::from_str("0.5").unwrap();
        assert_eq!(parsed.units(), 5_000);
    }
}
