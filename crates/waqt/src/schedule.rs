//! Next-prayer determination.
//!
//! Everything here is a pure function of a [`RawTimetable`] and a time of day,
//! so it can be tested without a network or a clock.

use chrono::{NaiveTime, Timelike};
use serde::{Serialize, Serializer};

use crate::timetable::RawTimetable;

/// Minutes in one day.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// The six daily timings, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Prayer {
    /// Dawn prayer.
    Fajr,
    /// Sunrise (not a prayer, but part of the daily schedule).
    Sunrise,
    /// Midday prayer.
    Dhuhr,
    /// Afternoon prayer.
    Asr,
    /// Sunset prayer.
    Maghrib,
    /// Night prayer.
    Isha,
}

impl Prayer {
    /// All timings in canonical order.
    pub const ALL: [Self; 6] = [
        Self::Fajr,
        Self::Sunrise,
        Self::Dhuhr,
        Self::Asr,
        Self::Maghrib,
        Self::Isha,
    ];

    /// The provider's key for this timing.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fajr => "Fajr",
            Self::Sunrise => "Sunrise",
            Self::Dhuhr => "Dhuhr",
            Self::Asr => "Asr",
            Self::Maghrib => "Maghrib",
            Self::Isha => "Isha",
        }
    }

    /// Arabic display name.
    #[must_use]
    pub const fn arabic_name(self) -> &'static str {
        match self {
            Self::Fajr => "الفجر",
            Self::Sunrise => "الشروق",
            Self::Dhuhr => "الظهر",
            Self::Asr => "العصر",
            Self::Maghrib => "المغرب",
            Self::Isha => "العشاء",
        }
    }

    /// Position in canonical order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Prayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the published schedule.
///
/// `time_remaining` is `Some` exactly when `is_next` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrayerEntry {
    /// Which timing this row describes.
    #[serde(rename = "name")]
    pub prayer: Prayer,
    /// Arabic display name.
    pub arabic_name: &'static str,
    /// Time of day, serialized as `HH:MM`.
    #[serde(serialize_with = "serialize_hhmm")]
    pub time: NaiveTime,
    /// Whether this is the upcoming timing.
    pub is_next: bool,
    /// Countdown such as `"1h 12m"`, only on the upcoming timing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<String>,
}

impl PrayerEntry {
    /// The time formatted as `HH:MM`.
    #[must_use]
    pub fn time_label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }
}

fn serialize_hhmm<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format("%H:%M"))
}

/// Minutes elapsed since midnight, ignoring seconds.
#[must_use]
pub fn minutes_since_midnight(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Minutes from `now` until the next occurrence of `target`.
///
/// A target at or before `now` is taken to be tomorrow's, so the result is
/// always in `1..=1440`.
#[must_use]
pub fn minutes_until(now: NaiveTime, target: NaiveTime) -> i64 {
    let diff = minutes_since_midnight(target) - minutes_since_midnight(now);
    if diff <= 0 {
        diff + MINUTES_PER_DAY
    } else {
        diff
    }
}

/// Render a minute count as `"{h}h {m}m"`.
#[must_use]
pub fn format_remaining(minutes: i64) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// The timing that comes next after `now`.
///
/// The first timing in canonical order strictly later than `now` wins; after
/// Isha the schedule wraps to Fajr.
#[must_use]
pub fn next_prayer(table: &RawTimetable, now: NaiveTime) -> Prayer {
    let now_minutes = minutes_since_midnight(now);
    Prayer::ALL
        .into_iter()
        .find(|prayer| minutes_since_midnight(table.time(*prayer)) > now_minutes)
        .unwrap_or(Prayer::Fajr)
}

/// Build the six-entry schedule for `now`.
///
/// Entries are in canonical order with exactly one flagged as next.
#[must_use]
pub fn compute_next_prayer(table: &RawTimetable, now: NaiveTime) -> Vec<PrayerEntry> {
    let next = next_prayer(table, now);
    let remaining = format_remaining(minutes_until(now, table.time(next)));

    Prayer::ALL
        .into_iter()
        .map(|prayer| {
            let is_next = prayer == next;
            PrayerEntry {
                prayer,
                arabic_name: prayer.arabic_name(),
                time: table.time(prayer),
                is_next,
                time_remaining: is_next.then(|| remaining.clone()),
            }
        })
        .collect()
}
