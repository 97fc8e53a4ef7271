//! Daily prayer timetables and the provider that serves them.
//!
//! A [`TimetableProvider`] turns `(coordinates, date, method)` into a
//! [`RawTimetable`]. [`AladhanClient`] is the HTTP implementation used in
//! production.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http;
use crate::location::Coordinates;
use crate::schedule::Prayer;

/// Date format used in provider URLs and on the command line.
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// Calculation convention used by the provider.
///
/// Accepts either the snake_case name or the provider's numeric id when
/// parsed from configuration or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "MethodRepr")]
pub enum CalculationMethod {
    /// Shia Ithna-Ashari, Leva Institute, Qum.
    Jafari,
    /// University of Islamic Sciences, Karachi.
    Karachi,
    /// Islamic Society of North America.
    Isna,
    /// Muslim World League.
    MuslimWorldLeague,
    /// Umm al-Qura University, Makkah.
    #[default]
    UmmAlQura,
    /// Egyptian General Authority of Survey.
    Egyptian,
    /// Institute of Geophysics, University of Tehran.
    Tehran,
    /// Gulf Region.
    Gulf,
    /// Kuwait.
    Kuwait,
    /// Qatar.
    Qatar,
    /// Majlis Ugama Islam Singapura.
    Singapore,
    /// Union des Organisations Islamiques de France.
    France,
    /// Diyanet İşleri Başkanlığı, Turkey.
    Turkey,
    /// Spiritual Administration of Muslims of Russia.
    Russia,
    /// Moonsighting Committee Worldwide.
    Moonsighting,
    /// Dubai.
    Dubai,
}

impl CalculationMethod {
    /// Every supported method, ordered by provider id.
    pub const ALL: [Self; 16] = [
        Self::Jafari,
        Self::Karachi,
        Self::Isna,
        Self::MuslimWorldLeague,
        Self::UmmAlQura,
        Self::Egyptian,
        Self::Tehran,
        Self::Gulf,
        Self::Kuwait,
        Self::Qatar,
        Self::Singapore,
        Self::France,
        Self::Turkey,
        Self::Russia,
        Self::Moonsighting,
        Self::Dubai,
    ];

    /// The provider's numeric identifier.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Jafari => 0,
            Self::Karachi => 1,
            Self::Isna => 2,
            Self::MuslimWorldLeague => 3,
            Self::UmmAlQura => 4,
            Self::Egyptian => 5,
            Self::Tehran => 7,
            Self::Gulf => 8,
            Self::Kuwait => 9,
            Self::Qatar => 10,
            Self::Singapore => 11,
            Self::France => 12,
            Self::Turkey => 13,
            Self::Russia => 14,
            Self::Moonsighting => 15,
            Self::Dubai => 16,
        }
    }

    /// Configuration key (`umm_al_qura`, `isna`, ...).
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Jafari => "jafari",
            Self::Karachi => "karachi",
            Self::Isna => "isna",
            Self::MuslimWorldLeague => "muslim_world_league",
            Self::UmmAlQura => "umm_al_qura",
            Self::Egyptian => "egyptian",
            Self::Tehran => "tehran",
            Self::Gulf => "gulf",
            Self::Kuwait => "kuwait",
            Self::Qatar => "qatar",
            Self::Singapore => "singapore",
            Self::France => "france",
            Self::Turkey => "turkey",
            Self::Russia => "russia",
            Self::Moonsighting => "moonsighting",
            Self::Dubai => "dubai",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Jafari => "Shia Ithna-Ashari, Leva Institute, Qum",
            Self::Karachi => "University of Islamic Sciences, Karachi",
            Self::Isna => "Islamic Society of North America",
            Self::MuslimWorldLeague => "Muslim World League",
            Self::UmmAlQura => "Umm al-Qura, Makkah",
            Self::Egyptian => "Egyptian General Authority of Survey",
            Self::Tehran => "Institute of Geophysics, University of Tehran",
            Self::Gulf => "Gulf Region",
            Self::Kuwait => "Kuwait",
            Self::Qatar => "Qatar",
            Self::Singapore => "Majlis Ugama Islam Singapura",
            Self::France => "Union des Organisations Islamiques de France",
            Self::Turkey => "Diyanet İşleri Başkanlığı, Turkey",
            Self::Russia => "Spiritual Administration of Muslims of Russia",
            Self::Moonsighting => "Moonsighting Committee Worldwide",
            Self::Dubai => "Dubai",
        }
    }

    /// Look up a method by provider id.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.id() == id)
    }
}

impl std::fmt::Display for CalculationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CalculationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let found = match s.parse::<u8>() {
            Ok(id) => Self::from_id(id),
            Err(_) => {
                let key = s.to_ascii_lowercase().replace('-', "_");
                Self::ALL.into_iter().find(|method| method.key() == key)
            }
        };
        found.ok_or_else(|| Error::ConfigValidation {
            message: format!("unknown calculation method '{s}' (see `waqt methods`)"),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MethodRepr {
    Id(u8),
    Name(String),
}

impl TryFrom<MethodRepr> for CalculationMethod {
    type Error = String;

    fn try_from(repr: MethodRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            MethodRepr::Id(id) => Self::from_id(id).ok_or_else(|| format!("unknown method id {id}")),
            MethodRepr::Name(name) => name.parse().map_err(|e: Error| e.to_string()),
        }
    }
}

/// Parse a `DD-MM-YYYY` date.
///
/// # Errors
///
/// Returns [`Error::InvalidDate`] if the text is not a valid date.
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| Error::InvalidDate {
        input: input.to_string(),
        expected: "DD-MM-YYYY",
    })
}

/// Format a date as `DD-MM-YYYY`.
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse an `HH:MM` time, ignoring any trailing suffix such as `" (+03)"`.
///
/// # Errors
///
/// Returns [`Error::InvalidDate`] if no `HH:MM` prefix can be read.
pub fn parse_time(input: &str) -> Result<NaiveTime> {
    let token = input.split_whitespace().next().unwrap_or_default();
    NaiveTime::parse_from_str(token, "%H:%M").map_err(|_| Error::InvalidDate {
        input: input.to_string(),
        expected: "HH:MM",
    })
}

/// One day's canonical timings for a location and method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawTimetable {
    date: NaiveDate,
    method: CalculationMethod,
    times: [NaiveTime; 6],
}

impl RawTimetable {
    /// Create a timetable from times given in canonical order.
    #[must_use]
    pub fn new(date: NaiveDate, method: CalculationMethod, times: [NaiveTime; 6]) -> Self {
        Self {
            date,
            method,
            times,
        }
    }

    /// Build a timetable from the provider's key → `"HH:MM"` mapping.
    ///
    /// Keys other than the six canonical ones are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimetableFetchFailed`] if a canonical key is missing or
    /// its value is not a time.
    pub fn from_timings(
        date: NaiveDate,
        method: CalculationMethod,
        timings: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut times = [NaiveTime::MIN; 6];
        for prayer in Prayer::ALL {
            let raw = timings.get(prayer.name()).ok_or_else(|| {
                Error::timetable_fetch(format!("timetable is missing {}", prayer.name()))
            })?;
            times[prayer.index()] = parse_time(raw).map_err(|_| {
                Error::timetable_fetch(format!("unreadable {} time '{raw}'", prayer.name()))
            })?;
        }
        Ok(Self::new(date, method, times))
    }

    /// The calendar date this timetable is for.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// The calculation method used.
    #[must_use]
    pub fn method(&self) -> CalculationMethod {
        self.method
    }

    /// The time of one timing.
    #[must_use]
    pub fn time(&self, prayer: Prayer) -> NaiveTime {
        self.times[prayer.index()]
    }
}

/// A source of daily prayer timetables.
#[async_trait]
pub trait TimetableProvider: Send + Sync {
    /// Short provider name for logging.
    fn name(&self) -> &'static str;

    /// Fetch the timetable for one date at one position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimetableFetchFailed`] on transport errors, non-success
    /// HTTP statuses and payloads missing a canonical timing.
    async fn fetch_timetable(
        &self,
        coordinates: Coordinates,
        date: NaiveDate,
        method: CalculationMethod,
    ) -> Result<RawTimetable>;
}

#[derive(Debug, Deserialize)]
struct TimingsResponse {
    data: TimingsData,
}

#[derive(Debug, Deserialize)]
struct TimingsData {
    timings: HashMap<String, String>,
}

/// HTTP client for the Aladhan timings API.
#[derive(Debug, Clone)]
pub struct AladhanClient {
    base_url: String,
    client: reqwest::Client,
}

impl AladhanClient {
    /// Public Aladhan endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.aladhan.com";

    /// Create a client for `base_url` with the given request timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(base_url, http::build_client(http::USER_AGENT, timeout))
    }

    /// Create a client around an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn timings_url(&self, date: NaiveDate) -> String {
        format!("{}/v1/timings/{}", self.base_url, format_date(date))
    }
}

#[async_trait]
impl TimetableProvider for AladhanClient {
    fn name(&self) -> &'static str {
        "aladhan"
    }

    async fn fetch_timetable(
        &self,
        coordinates: Coordinates,
        date: NaiveDate,
        method: CalculationMethod,
    ) -> Result<RawTimetable> {
        let url = self.timings_url(date);
        debug!(%url, method = method.id(), "Requesting prayer timetable");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("latitude", coordinates.latitude().to_string()),
                ("longitude", coordinates.longitude().to_string()),
                ("method", method.id().to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::timetable_fetch(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::timetable_status(
                format!("request to {url} returned {status}"),
                status.as_u16(),
            ));
        }

        let body: TimingsResponse = resp
            .json()
            .await
            .map_err(|e| Error::timetable_fetch(format!("invalid timetable from {url}: {e}")))?;

        RawTimetable::from_timings(date, method, &body.data.timings)
    }
}
