//! Injectable notion of "today".
//!
//! Scheduling and timeline filtering read the date only through a [`Clock`],
//! so tests can pin the calendar day.

use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current date and time
pub trait Clock {
    fn today(&self) -> NaiveDate;
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock; "today" is the local calendar day
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock. Clones share the same date.
#[derive(Clone, Debug)]
pub struct FixedClock {
    today: Arc<Mutex<NaiveDate>>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Arc::new(Mutex::new(today)),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *self.lock() = day;
    }

    pub fn advance_days(&self, days: u64) {
        let mut today = self.lock();
        if let Some(next) = today.checked_add_days(Days::new(days)) {
            *today = next;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDate> {
        // A poisoned date is still a valid date.
        self.today.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.lock()
    }

    fn now(&self) -> DateTime<Utc> {
        self.today()
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now)
    }
}
