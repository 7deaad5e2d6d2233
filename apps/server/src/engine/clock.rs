use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

// ── Time of day ──

/// Wall-clock time of day, stored as minutes since midnight.
///
/// Serialized as a 24-hour `"HH:MM"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self(hour * 60 + minute))
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    pub fn hour(self) -> u32 {
        self.0 / 60
    }

    pub fn minute(self) -> u32 {
        self.0 % 60
    }

    /// The half-open interval `[self, self + duration)`. May run past
    /// midnight; the end saturates instead of wrapping, so a positive
    /// duration never yields an empty interval.
    pub fn span(self, duration_minutes: u32) -> Interval {
        Interval {
            start: self.0,
            end: self.0.saturating_add(duration_minutes),
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day '{0}', expected HH:MM")]
pub struct ParseTimeError(String);

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(err)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(err());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        TimeOfDay::from_hm(hour, minute).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Intervals ──

/// Half-open range of minutes since midnight: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    /// `[a1,a2)` and `[b1,b2)` overlap iff `a1 < b2 && b1 < a2`.
    /// Back-to-back intervals do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Ends on or before `closing`.
    pub fn ends_by(&self, closing: TimeOfDay) -> bool {
        self.end <= closing.minutes()
    }
}

// ── Studio clock ──

/// The studio's wall clock. "Today" for availability is the calendar date
/// at the studio's UTC offset, not the server's.
#[derive(Debug, Clone, Copy)]
pub struct StudioClock {
    offset: FixedOffset,
    pinned: Option<NaiveDateTime>,
}

impl StudioClock {
    /// Falls back to UTC when `hours` is not a valid offset.
    pub fn with_utc_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| {
            tracing::warn!(hours, "invalid studio UTC offset, using UTC");
            FixedOffset::east_opt(0).expect("zero offset is valid")
        });
        Self {
            offset,
            pinned: None,
        }
    }

    /// A clock frozen at a given studio-local instant.
    pub fn pinned(at: NaiveDateTime) -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
            pinned: Some(at),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.pinned
            .unwrap_or_else(|| Utc::now().with_timezone(&self.offset).naive_local())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    pub fn time_now(&self) -> TimeOfDay {
        let now = self.now();
        TimeOfDay::from_hm(now.hour(), now.minute()).unwrap_or(TimeOfDay(0))
    }
}
