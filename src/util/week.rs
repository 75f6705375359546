use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, Duration, OffsetDateTime, Weekday};

static WEEK_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{2})$").expect("week key regex should compile"));

/// An ISO-8601 week, rendered as `YYYY-Www`.
/// Charts and weekly submissions are bucketed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeekKey {
    year: i32,
    week: u8,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid week key {0:?}, expected YYYY-Www")]
pub struct InvalidWeekKey(pub String);

impl WeekKey {
    #[must_use]
    pub fn containing(at: OffsetDateTime) -> Self {
        let (year, week, _) = at.to_iso_week_date();
        Self { year, week }
    }

    #[must_use]
    pub fn current() -> Self {
        Self::containing(OffsetDateTime::now_utc())
    }

    /// Monday 00:00 UTC of this week.
    #[must_use]
    pub fn start(&self) -> OffsetDateTime {
        // Construction validated the week, so this can only fail for weeks we never build.
        Date::from_iso_week_date(self.year, self.week, Weekday::Monday)
            .map_or(OffsetDateTime::UNIX_EPOCH, |date| date.midnight().assume_utc())
    }

    /// Monday 00:00 UTC of the following week (exclusive bound).
    #[must_use]
    pub fn end(&self) -> OffsetDateTime {
        self.start() + Duration::weeks(1)
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

impl FromStr for WeekKey {
    type Err = InvalidWeekKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidWeekKey(s.to_owned());
        let captures = WEEK_KEY_REGEX.captures(s).ok_or_else(invalid)?;
        let year: i32 = captures[1].parse().map_err(|_| invalid())?;
        let week: u8 = captures[2].parse().map_err(|_| invalid())?;
        // Rejects week 53 in years that only have 52
        Date::from_iso_week_date(year, week, Weekday::Monday).map_err(|_| invalid())?;
        Ok(Self { year, week })
    }
}

impl Serialize for WeekKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WeekKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn formats_with_padding() {
        let key = WeekKey::containing(datetime!(2026-01-07 12:00 UTC));
        assert_eq!(key.to_string(), "2026-W02");
    }

    #[test]
    fn iso_year_differs_from_calendar_year() {
        // 2024-12-30 is a Monday that belongs to ISO week 1 of 2025
        let key = WeekKey::containing(datetime!(2024-12-30 08:00 UTC));
        assert_eq!(key.to_string(), "2025-W01");
    }

    #[test]
    fn bounds_span_monday_to_monday() {
        let key: WeekKey = "2026-W42".parse().unwrap();
        assert_eq!(key.start(), datetime!(2026-10-12 00:00 UTC));
        assert_eq!(key.end(), datetime!(2026-10-19 00:00 UTC));
        assert_eq!(WeekKey::containing(key.start()), key);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("2026-42".parse::<WeekKey>().is_err());
        assert!("2026-W7".parse::<WeekKey>().is_err());
        assert!("2026-W00".parse::<WeekKey>().is_err());
        // 2026 has 53 ISO weeks, 2025 does not
        assert!("2026-W53".parse::<WeekKey>().is_ok());
        assert!("2025-W53".parse::<WeekKey>().is_err());
    }

    #[test]
    fn deserializes_from_json_string() {
        let key: WeekKey = serde_json::from_str("\"2026-W05\"").unwrap();
        assert_eq!(key.to_string(), "2026-W05");
    }
}
