//! ISO-8601 millisecond timestamps and the clock abstraction the engine
//! threads explicitly (§4.6/§9: `now` is a parameter, never process-wide
//! state). A hand-rolled civil-calendar conversion is used instead of
//! pulling in a date/time crate — the teacher's stack never reaches for one,
//! and the conversion this system needs (UTC-only, no calendar arithmetic
//! beyond days-since-epoch) is small enough to keep self-contained.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// An ISO-8601 UTC timestamp with millisecond precision, e.g.
/// `2025-01-01T00:00:00.000Z`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn from_millis_epoch(millis: i64) -> Self {
        Timestamp(format_millis(millis))
    }

    /// Parse the canonical `YYYY-MM-DDTHH:MM:SS.mmmZ` form produced by this
    /// module. Not a general-purpose RFC 3339 parser.
    pub fn parse(s: &str) -> Result<Self, String> {
        parse_millis(s)?;
        Ok(Timestamp(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_millis_epoch(&self) -> i64 {
        parse_millis(&self.0).expect("Timestamp always holds a parseable string")
    }

    /// Truncate to second precision (`.000Z`), used before hashing for
    /// fields spec.md calls out as second-precision ("some derived
    /// timestamps are normalized to second precision before hashing").
    pub fn truncate_to_seconds(&self) -> Self {
        let millis = self.to_millis_epoch();
        let truncated = millis - millis.rem_euclid(1000);
        Timestamp::from_millis_epoch(truncated)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Threaded explicitly through `EngineOptions`; never read from global state.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock, backed by the system wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64;
        Timestamp::from_millis_epoch(millis)
    }
}

/// A clock that advances by a fixed step on every call. Used by tests that
/// need byte-identical replay across runs (spec §8's deterministic scenario
/// clock: "starting at 2025-01-01T00:00:00.000Z advancing by 1 ms").
pub struct DeterministicClock {
    cursor: AtomicI64,
    step_millis: i64,
}

impl DeterministicClock {
    pub fn starting_at(start_millis: i64) -> Self {
        DeterministicClock {
            cursor: AtomicI64::new(start_millis),
            step_millis: 1,
        }
    }

    pub fn starting_at_with_step(start_millis: i64, step_millis: i64) -> Self {
        DeterministicClock {
            cursor: AtomicI64::new(start_millis),
            step_millis,
        }
    }
}

impl Clock for DeterministicClock {
    fn now(&self) -> Timestamp {
        let millis = self.cursor.fetch_add(self.step_millis, Ordering::SeqCst);
        Timestamp::from_millis_epoch(millis)
    }
}

const DAYS_PER_400Y: i64 = 146097;
const DOE_UNIX_EPOCH_OFFSET_DAYS: i64 = 719468; // days from 0000-03-01 to 1970-01-01

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + DOE_UNIX_EPOCH_OFFSET_DAYS;
    let era = if z >= 0 { z } else { z - DAYS_PER_400Y + 1 } / DAYS_PER_400Y;
    let doe = (z - era * DAYS_PER_400Y) as i64; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365; // [0, 399]
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32; // [1, 31]
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32; // [1, 12]
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64; // [0, 399]
    let mp = if m > 2 { m - 3 } else { m + 9 } as i64; // [0, 11]
    let doy = (153 * mp + 2) / 5 + d as i64 - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * DAYS_PER_400Y + doe - DOE_UNIX_EPOCH_OFFSET_DAYS
}

fn format_millis(millis: i64) -> String {
    let days = millis.div_euclid(86_400_000);
    let ms_of_day = millis.rem_euclid(86_400_000);
    let (y, m, d) = civil_from_days(days);
    let hours = ms_of_day / 3_600_000;
    let minutes = (ms_of_day / 60_000) % 60;
    let seconds = (ms_of_day / 1000) % 60;
    let ms = ms_of_day % 1000;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        y, m, d, hours, minutes, seconds, ms
    )
}

fn parse_millis(s: &str) -> Result<i64, String> {
    let err = || format!("not a canonical ISO-8601 millisecond timestamp: {s}");
    let s = s.strip_suffix('Z').ok_or_else(err)?;
    let (date, time) = s.split_once('T').ok_or_else(err)?;
    let mut date_parts = date.splitn(3, '-');
    let y: i64 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let m: u32 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let d: u32 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let (hms, ms) = time.split_once('.').ok_or_else(err)?;
    let mut hms_parts = hms.splitn(3, ':');
    let hh: i64 = hms_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let mm: i64 = hms_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let ss: i64 = hms_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let millis: i64 = ms.parse().map_err(|_| err())?;
    let days = days_from_civil(y, m, d);
    Ok(days * 86_400_000 + hh * 3_600_000 + mm * 60_000 + ss * 1000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_start() {
        let ts = Timestamp::from_millis_epoch(0);
        assert_eq!(ts.as_str(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn round_trips_through_parse() {
        let ts = Timestamp::from_millis_epoch(1_735_689_600_123);
        let parsed = Timestamp::parse(ts.as_str()).unwrap();
        assert_eq!(ts, parsed);
        assert_eq!(parsed.to_millis_epoch(), 1_735_689_600_123);
    }

    #[test]
    fn deterministic_clock_advances_by_one_millisecond() {
        let clock = DeterministicClock::starting_at(1_735_689_600_000);
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a.as_str(), "2025-01-01T00:00:00.000Z");
        assert_eq!(b.as_str(), "2025-01-01T00:00:00.001Z");
    }

    #[test]
    fn truncates_to_seconds() {
        let ts = Timestamp::from_millis_epoch(1_735_689_600_789);
        assert_eq!(ts.truncate_to_seconds().as_str(), "2025-01-01T00:00:00.000Z");
    }
}
