//! Recurrence rules for repeating tasks.
//!
//! Patterns are stored as `{ "type": ..., "value": ... }`. Older documents
//! carry free-form strings such as `"weekly"` or `"every-n-days:3"`; those
//! are accepted by [`FromStr`] and by deserialization, and are always written
//! back in the structured form.

use crate::{error::Result, Error};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of a recurrence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecurrenceUnit {
    Days,
    Weeks,
    Months,
    Years,
    /// Monthly on a fixed day, clamped to short months
    DayOfMonth,
}

/// How often a task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecurrencePattern {
    #[serde(rename = "type")]
    pub unit: RecurrenceUnit,
    pub value: u32,
}

impl RecurrencePattern {
    /// Build a pattern, rejecting zero intervals and impossible days.
    pub fn new(unit: RecurrenceUnit, value: u32) -> Result<Self> {
        let valid = match unit {
            RecurrenceUnit::DayOfMonth => (1..=31).contains(&value),
            _ => value > 0,
        };
        if !valid {
            return Err(Error::InvalidRecurrence(format!("{unit:?} {value}")));
        }
        Ok(Self { unit, value })
    }

    pub fn days(n: u32) -> Result<Self> {
        Self::new(RecurrenceUnit::Days, n)
    }

    pub fn weeks(n: u32) -> Result<Self> {
        Self::new(RecurrenceUnit::Weeks, n)
    }

    pub fn months(n: u32) -> Result<Self> {
        Self::new(RecurrenceUnit::Months, n)
    }

    /// The date after `from` on which the task is due again.
    ///
    /// Month arithmetic clamps to the last day of the target month.
    pub fn next_date(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self.unit {
            RecurrenceUnit::Days => from.checked_add_days(Days::new(self.value.into())),
            RecurrenceUnit::Weeks => from.checked_add_days(Days::new(u64::from(self.value) * 7)),
            RecurrenceUnit::Months => from.checked_add_months(Months::new(self.value)),
            RecurrenceUnit::Years => from.checked_add_months(Months::new(self.value.checked_mul(12)?)),
            RecurrenceUnit::DayOfMonth => {
                let month = NaiveDate::from_ymd_opt(from.year(), from.month(), 1)?
                    .checked_add_months(Months::new(1))?;
                let day = self.value.min(days_in_month(month)?);
                month.with_day(day)
            }
        }
    }
}

fn days_in_month(first: NaiveDate) -> Option<u32> {
    let next = first.checked_add_months(Months::new(1))?;
    Some(next.signed_duration_since(first).num_days() as u32)
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.unit, self.value) {
            (RecurrenceUnit::Days, 1) => f.write_str("daily"),
            (RecurrenceUnit::Weeks, 1) => f.write_str("weekly"),
            (RecurrenceUnit::Months, 1) => f.write_str("monthly"),
            (RecurrenceUnit::Years, 1) => f.write_str("yearly"),
            (RecurrenceUnit::Days, n) => write!(f, "every {n} days"),
            (RecurrenceUnit::Weeks, n) => write!(f, "every {n} weeks"),
            (RecurrenceUnit::Months, n) => write!(f, "every {n} months"),
            (RecurrenceUnit::Years, n) => write!(f, "every {n} years"),
            (RecurrenceUnit::DayOfMonth, n) => write!(f, "monthly on day {n}"),
        }
    }
}

impl FromStr for RecurrencePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRecurrence(s.to_string());
        let number = |n: &str| n.trim().parse::<u32>().map_err(|_| invalid());

        let s = s.trim();
        match s {
            "daily" => return Self::days(1),
            "weekly" => return Self::weeks(1),
            "monthly" => return Self::months(1),
            "yearly" => return Self::new(RecurrenceUnit::Years, 1),
            _ => {}
        }

        if let Some(n) = s.strip_prefix("every-n-days:") {
            return Self::days(number(n)?);
        }
        if let Some(n) = s.strip_prefix("every-n-weeks:") {
            return Self::weeks(number(n)?);
        }
        if let Some(day) = s.strip_prefix("monthly:") {
            return Self::new(RecurrenceUnit::DayOfMonth, number(day)?);
        }
        if let Some(rest) = s.strip_prefix("every") {
            // everyNdays, everyNweeks, everyNmonths
            let split = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
            let (n, unit) = rest.split_at(split);
            let unit = match unit {
                "days" => RecurrenceUnit::Days,
                "weeks" => RecurrenceUnit::Weeks,
                "months" => RecurrenceUnit::Months,
                _ => return Err(invalid()),
            };
            return Self::new(unit, number(n)?);
        }

        Err(invalid())
    }
}

impl<'de> Deserialize<'de> for RecurrencePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Structured {
                #[serde(rename = "type")]
                unit: RecurrenceUnit,
                value: u32,
            },
            Legacy(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Structured { unit, value } => {
                RecurrencePattern::new(unit, value).map_err(serde::de::Error::custom)
            }
            Repr::Legacy(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
