//! Exchange-local wall clock

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use std::sync::Mutex;

/// Offset of the exchange calendar from UTC (China Standard Time).
const EXCHANGE_UTC_OFFSET_SECS: i32 = 8 * 60 * 60;

pub fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub trait Clock: Send + Sync {
    /// Current exchange-local time.
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeClock;

impl Clock for ExchangeClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&exchange_offset()).naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
