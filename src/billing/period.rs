use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static PERIOD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("static period pattern"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid billing period `{0}`, expected YYYY-MM")]
pub struct PeriodParseError(pub String);

/// key: billing-period -> calendar month, rendered as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodParseError> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(PeriodParseError(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// Period containing `at`.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Calendar month before the one containing `at`.
    pub fn previous_to(at: DateTime<Utc>) -> Self {
        Self::containing(at).previous()
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingPeriod {
    type Err = PeriodParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = PERIOD_PATTERN
            .captures(value)
            .ok_or_else(|| PeriodParseError(value.to_string()))?;
        let year = captures[1]
            .parse::<i32>()
            .map_err(|_| PeriodParseError(value.to_string()))?;
        let month = captures[2]
            .parse::<u32>()
            .map_err(|_| PeriodParseError(value.to_string()))?;
        Self::new(year, month).map_err(|_| PeriodParseError(value.to_string()))
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = PeriodParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingPeriod> for String {
    fn from(period: BillingPeriod) -> Self {
        period.to_string()
    }
}

/// Adds `days` business days (Monday to Friday, no holiday calendar), keeping the time of day.
pub fn add_business_days(start: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let mut cursor = start;
    let mut added = 0;
    while added < days {
        cursor += Duration::days(1);
        if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
            added += 1;
        }
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_and_renders_periods() {
        let period: BillingPeriod = "2026-01".parse().unwrap();
        assert_eq!(period.year(), 2026);
        assert_eq!(period.month(), 1);
        assert_eq!(period.to_string(), "2026-01");
    }

    #[test]
    fn rejects_malformed_periods() {
        for raw in ["2026-1", "2026-13", "2026-00", "26-01", "2026/01", "2026-01-01", ""] {
            assert!(raw.parse::<BillingPeriod>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn previous_wraps_year() {
        let january = BillingPeriod::new(2026, 1).unwrap();
        assert_eq!(january.previous().to_string(), "2025-12");

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(BillingPeriod::previous_to(now).to_string(), "2026-02");
    }

    #[test]
    fn serde_uses_string_form() {
        let period = BillingPeriod::new(2025, 11).unwrap();
        assert_eq!(serde_json::to_string(&period).unwrap(), "\"2025-11\"");
        let parsed: BillingPeriod = serde_json::from_str("\"2025-11\"").unwrap();
        assert_eq!(parsed, period);
        assert!(serde_json::from_str::<BillingPeriod>("\"2025-1\"").is_err());
    }

    #[test]
    fn friday_upload_is_due_wednesday() {
        // 2026-01-09 is a Friday.
        let friday = Utc.with_ymd_and_hms(2026, 1, 9, 15, 30, 0).unwrap();
        let due = add_business_days(friday, 3);
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 1, 14, 15, 30, 0).unwrap());
        assert_eq!(due.weekday(), Weekday::Wed);
    }

    #[test]
    fn weekend_upload_counts_from_monday() {
        let saturday = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        let due = add_business_days(saturday, 3);
        assert_eq!(due.weekday(), Weekday::Wed);
        assert_eq!(due.day(), 14);

        let monday = Utc.with_ymd_and_hms(2026, 1, 12, 9, 0, 0).unwrap();
        assert_eq!(add_business_days(monday, 3).weekday(), Weekday::Thu);
    }
}
