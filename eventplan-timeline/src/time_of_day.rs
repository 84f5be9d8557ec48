//! Helpers for the wall-clock times of day timelines are planned in.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Timelike};
use eventplan_core::errors::{PlannerError, Result};

pub const MINUTES_PER_DAY: i64 = 24 * 60;

const TIME_FORMATS: [&str; 3] = ["%H:%M", "%H:%M:%S", "%H:%M:%S%.f"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses `HH:MM`, `HH:MM:SS` or a full datetime, keeping only the time of day.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    let value = raw.trim();

    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(value, format) {
            return Ok(time);
        }
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.naive_local().time());
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(datetime.time());
        }
    }

    Err(PlannerError::invalid(format!("invalid time value '{raw}'")))
}

/// Adds minutes to a time of day, wrapping past midnight.
///
/// Any offset is accepted; whole days are dropped before the addition.
pub fn add_minutes(time: NaiveTime, minutes: i64) -> NaiveTime {
    let within_day = minutes.rem_euclid(MINUTES_PER_DAY);
    time.overflowing_add_signed(Duration::minutes(within_day)).0
}

/// Minutes elapsed since midnight.
pub fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Minutes from `start` to `end`, reading an earlier `end` as the next day.
pub fn minutes_between(start: NaiveTime, end: NaiveTime) -> i64 {
    let delta = (end - start).num_minutes();
    if delta < 0 {
        delta + MINUTES_PER_DAY
    } else {
        delta
    }
}

/// Serde adapter accepting any format understood by [`parse_time_of_day`].
pub mod flexible {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(de::Error::custom)
    }
}

/// Optional variant of [`flexible`]; pair with `#[serde(default)]`.
pub mod flexible_option {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_some(&time.format("%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| super::parse_time_of_day(&value).map_err(de::Error::custom))
            .transpose()
    }
}
