//! Time sources
//!
//! Records carry a wall-clock string for display and a millisecond epoch
//! timestamp for ordering. The scheduler only ever sees the millisecond value.

use std::cell::Cell;
use std::rc::Rc;

use chrono::{Local, TimeZone};

pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Display form of `now_ms` in local time.
    fn wall_clock(&self) -> String {
        format_wall_clock(self.now_ms())
    }

    /// `YYYY-MM-DD` of `now_ms`, used in artifact filenames.
    fn date_stamp(&self) -> String {
        format_date_stamp(self.now_ms())
    }
}

/// The local system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Local::now().timestamp_millis().max(0) as u64
    }
}

/// Hand-driven clock for tests and replay tools.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

pub fn format_wall_clock(ms: u64) -> String {
    match Local.timestamp_millis_opt(ms as i64).single() {
        Some(time) => time.format("%Y. %-m. %-d. %H:%M:%S").to_string(),
        None => String::new(),
    }
}

pub fn format_date_stamp(ms: u64) -> String {
    match chrono::DateTime::from_timestamp_millis(ms as i64) {
        Some(time) => time.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}
