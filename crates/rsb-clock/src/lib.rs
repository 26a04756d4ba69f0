//! Time sources and timezone-aware schedule math.
//!
//! Everything that asks "what time is it" goes through [`Clock`] so tests can
//! substitute a manual clock and drive schedule logic deterministically.
//! Wall time is always UTC; local time appears only inside
//! [`next_scheduled_fire`], which converts a configured HH:MM in an IANA
//! timezone back to a UTC instant.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Wall + monotonic time source.
pub trait Clock: Send + Sync {
    /// Current wall time, UTC.
    fn now_utc(&self) -> DateTime<Utc>;
    /// Monotonic instant for measuring durations.
    fn monotonic(&self) -> Instant;
}

/// Production clock backed by the system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Settable clock for tests. Monotonic time is anchored at construction and
/// advances together with the wall time.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    anchor: Instant,
    anchor_wall: DateTime<Utc>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            anchor: Instant::now(),
            anchor_wall: now,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn monotonic(&self) -> Instant {
        let elapsed = self.now_utc() - self.anchor_wall;
        self.anchor + elapsed.to_std().unwrap_or_default()
    }
}

/// Compute the next UTC instant at which a daily HH:MM schedule in `tz`
/// fires, strictly after `after`.
///
/// `weekdays` restricts firing days; `None` means every day. Around DST
/// transitions an ambiguous local time resolves to the earlier offset and a
/// skipped local time rolls forward to the next valid day.
pub fn next_scheduled_fire(
    after: DateTime<Utc>,
    hour: u32,
    minute: u32,
    tz: Tz,
    weekdays: Option<&[Weekday]>,
) -> DateTime<Utc> {
    let local_after = after.with_timezone(&tz);
    let mut day = local_after.date_naive();

    // Look ahead at most two weeks; a weekday mask always matches within one.
    for _ in 0..15 {
        if weekday_allowed(day.weekday(), weekdays) {
            if let Some(naive) = day.and_hms_opt(hour, minute, 0) {
                if let Some(local) = tz.from_local_datetime(&naive).earliest() {
                    let utc = local.with_timezone(&Utc);
                    if utc > after {
                        return utc;
                    }
                }
            }
        }
        day = day.succ_opt().expect("date overflow");
    }

    // Unreachable with a non-empty mask; fall back to one day out.
    after + Duration::days(1)
}

fn weekday_allowed(day: Weekday, mask: Option<&[Weekday]>) -> bool {
    match mask {
        None => true,
        Some(days) => days.contains(&day),
    }
}

/// Parse a comma-separated weekday list (`"mon,tue,fri"`, case-insensitive).
/// Empty input yields `None` (every day).
pub fn parse_weekday_mask(raw: &str) -> Result<Option<Vec<Weekday>>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let mut out = Vec::new();
    for part in raw.split(',') {
        let day = match part.trim().to_ascii_lowercase().as_str() {
            "mon" | "monday" => Weekday::Mon,
            "tue" | "tuesday" => Weekday::Tue,
            "wed" | "wednesday" => Weekday::Wed,
            "thu" | "thursday" => Weekday::Thu,
            "fri" | "friday" => Weekday::Fri,
            "sat" | "saturday" => Weekday::Sat,
            "sun" | "sunday" => Weekday::Sun,
            other => return Err(format!("unknown weekday: '{other}'")),
        };
        if !out.contains(&day) {
            out.push(day);
        }
    }
    Ok(Some(out))
}
