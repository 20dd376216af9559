//! Dataset timestamps and the fixed-stride cursor that walks them.
//!
//! Uses Howard Hinnant's civil-day algorithms for date conversion (no chrono
//! dependency). All instants are naive minutes since the Unix epoch.

use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{DATASET_END, DATASET_START, STEP_MINUTES};
use crate::error::TimestampError;

const MINUTES_PER_DAY: i64 = 1440;

/// `YYYYMMDDHHMM00` key for one dataset instant.
///
/// Zero-padded so that lexicographic order equals chronological order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(String);

impl Timestamp {
    /// Validate and wrap a 14-digit timestamp string.
    pub fn parse(s: &str) -> Result<Self, TimestampError> {
        to_minutes(s)?;
        Ok(Self(s.to_string()))
    }

    /// Encode minutes since the Unix epoch.
    pub fn from_minutes(minutes: i64) -> Self {
        let days = minutes.div_euclid(MINUTES_PER_DAY);
        let time_of_day = minutes.rem_euclid(MINUTES_PER_DAY);
        let (y, m, d) = civil_from_days(days);
        Self(format!(
            "{y:04}{m:02}{d:02}{:02}{:02}00",
            time_of_day / 60,
            time_of_day % 60
        ))
    }

    /// Minutes since the Unix epoch.
    pub fn minutes(&self) -> i64 {
        // Every Timestamp was validated on construction.
        to_minutes(&self.0).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = TimestampError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        to_minutes(&s)?;
        Ok(Self(s))
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl AsRef<str> for Timestamp {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn to_minutes(s: &str) -> Result<i64, TimestampError> {
    if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError::Malformed(s.to_string()));
    }
    let field = |range: std::ops::Range<usize>| -> i64 {
        s[range].parse().unwrap_or_default()
    };
    let (y, m, d) = (field(0..4), field(4..6), field(6..8));
    let (hh, mm, ss) = (field(8..10), field(10..12), field(12..14));

    if !(1..=12).contains(&m) || d < 1 || d > days_in_month(y, m) || hh > 23 || mm > 59 {
        return Err(TimestampError::OutOfRange(s.to_string()));
    }
    if ss != 0 {
        return Err(TimestampError::OutOfRange(s.to_string()));
    }
    Ok(epoch_minutes(y, m, d, hh, mm))
}

fn days_in_month(y: i64, m: i64) -> i64 {
    match m {
        2 if (y % 4 == 0 && y % 100 != 0) || y % 400 == 0 => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Minutes since the Unix epoch for a naive civil date-time.
pub const fn epoch_minutes(y: i64, m: i64, d: i64, hh: i64, mm: i64) -> i64 {
    days_from_civil(y, m, d) * MINUTES_PER_DAY + hh * 60 + mm
}

/// Howard Hinnant's days_from_civil: (year, month, day) → Unix epoch days.
const fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Walks a bounded window at a fixed stride, yielding one `Timestamp` per step.
///
/// Yields the current instant and then advances; returns `None` once the
/// current instant reaches the end instant, which is never itself yielded.
/// Not restartable: build a fresh cursor to walk the window again.
#[derive(Clone, Debug)]
pub struct TemporalCursor {
    current: i64,
    end: i64,
    step: i64,
}

impl TemporalCursor {
    /// Cursor over `[start, end)` advancing `step_minutes` per call.
    pub fn new(start: &Timestamp, end: &Timestamp, step_minutes: u32) -> Self {
        Self {
            current: start.minutes(),
            end: end.minutes(),
            step: i64::from(step_minutes.max(1)),
        }
    }

    /// The dataset's one-week window at the standard 15-minute stride.
    pub fn dataset() -> Self {
        Self {
            current: DATASET_START,
            end: DATASET_END,
            step: STEP_MINUTES,
        }
    }

    /// Timestamps still to be yielded.
    pub fn remaining(&self) -> usize {
        if self.current >= self.end {
            return 0;
        }
        ((self.end - self.current + self.step - 1) / self.step) as usize
    }

    pub fn is_exhausted(&self) -> bool {
        // `>=` also terminates windows whose stride overshoots the end.
        self.current >= self.end
    }
}

impl Default for TemporalCursor {
    fn default() -> Self {
        Self::dataset()
    }
}

impl Iterator for TemporalCursor {
    type Item = Timestamp;

    fn next(&mut self) -> Option<Timestamp> {
        if self.is_exhausted() {
            return None;
        }
        let ts = Timestamp::from_minutes(self.current);
        self.current += self.step;
        Some(ts)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for TemporalCursor {}

impl FusedIterator for TemporalCursor {}
