//! `waqt` - Know which prayer is next, and in how long
//!
//! This library fetches the day's prayer timetable for the user's location,
//! works out the upcoming prayer with a countdown, and keeps that view current
//! through a periodic refresh.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod location;
pub mod logging;
pub mod schedule;
pub mod service;
pub mod timetable;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use location::{Coordinates, Location, LocationProvider, StaticLocator};
pub use logging::init_logging;
pub use schedule::{compute_next_prayer, Prayer, PrayerEntry};
pub use service::{
    PrayerScheduleService, RefreshOutcome, ScheduleHandle, ScheduleSnapshot, ScheduleState,
};
pub use timetable::{AladhanClient, CalculationMethod, RawTimetable, TimetableProvider};
