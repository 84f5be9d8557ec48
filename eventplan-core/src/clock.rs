use chrono::{Duration, FixedOffset, NaiveDateTime, NaiveTime, Offset, Utc};
use parking_lot::Mutex;

/// Source of the planner's wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn time_of_day(&self) -> NaiveTime {
        self.now().time()
    }
}

/// Reads the system clock shifted into the configured offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Manually driven clock for tests and offline tools.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            current: Mutex::new(at),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.current.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, 12)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(at(23, 30));
        clock.advance(Duration::minutes(45));
        assert_eq!(clock.time_of_day(), NaiveTime::from_hms_opt(0, 15, 0).unwrap());

        clock.set(at(9, 0));
        assert_eq!(clock.now(), at(9, 0));
    }

    #[test]
    fn system_clock_applies_offset() {
        let utc = SystemClock::utc().now();
        let shifted = SystemClock::with_offset_minutes(120).now();
        let delta = (shifted - utc).num_minutes();
        assert!((119..=121).contains(&delta), "delta was {delta}");
    }
}
