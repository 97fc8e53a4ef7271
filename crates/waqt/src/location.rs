//! Position acquisition and place naming.
//!
//! A [`LocationProvider`] is the host's one-shot "where am I" capability. A
//! [`Geocoder`] turns a position into a place label; its failures are never
//! fatal.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http;

/// Label used when no place name can be determined.
pub const DEFAULT_LOCATION_NAME: &str = "Current Location";

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    /// Create coordinates, rejecting non-finite or out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinates`] if latitude is outside
    /// `[-90, 90]` or longitude outside `[-180, 180]`.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if valid {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(Error::InvalidCoordinates {
                latitude,
                longitude,
            })
        }
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// A position together with its display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    /// Where the user is.
    pub coordinates: Coordinates,
    /// Place label such as `"Makkah, Saudi Arabia"`.
    pub name: String,
}

/// The host's location capability.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Request a single position fix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LocationUnavailable`] if the capability is denied or
    /// unsupported.
    async fn current_position(&self) -> Result<Coordinates>;
}

/// A location provider backed by fixed coordinates.
///
/// This is the command-line host's capability: coordinates come from the
/// configuration file or `--lat/--lon`.
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    coordinates: Option<Coordinates>,
}

impl StaticLocator {
    /// A locator that always reports `coordinates`.
    #[must_use]
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates: Some(coordinates),
        }
    }

    /// A locator with no position, which always fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// A locator for optional coordinates.
    #[must_use]
    pub fn from_option(coordinates: Option<Coordinates>) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl LocationProvider for StaticLocator {
    async fn current_position(&self) -> Result<Coordinates> {
        self.coordinates.ok_or_else(|| {
            Error::location_unavailable(
                "no coordinates configured; pass --lat and --lon or set \
                 [location] latitude and longitude in the config file",
            )
        })
    }
}

/// Reverse geocoding: position to place label.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Describe `coordinates` as `"{city}, {country}"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GeocodeFailed`] on any failure.
    async fn reverse(&self, coordinates: Coordinates) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Address,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
}

impl Address {
    fn label(&self) -> String {
        let city = self
            .city
            .as_deref()
            .or(self.town.as_deref())
            .or(self.village.as_deref())
            .unwrap_or("Unknown City");
        let country = self.country.as_deref().unwrap_or("Unknown Country");
        format!("{city}, {country}")
    }
}

/// Reverse geocoder for the Nominatim (OpenStreetMap) API.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimGeocoder {
    /// Public Nominatim endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://nominatim.openstreetmap.org";

    /// Create a geocoder. Nominatim's usage policy requires an identifying
    /// `user_agent`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, user_agent: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http::build_client(user_agent, timeout),
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, coordinates: Coordinates) -> Result<String> {
        let url = format!("{}/reverse", self.base_url);
        debug!(%url, %coordinates, "Reverse geocoding position");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("format", "json".to_string()),
                ("lat", coordinates.latitude().to_string()),
                ("lon", coordinates.longitude().to_string()),
                ("zoom", "10".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::geocode_failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::geocode_failed(format!("{url} returned {status}")));
        }

        let body: ReverseResponse = resp
            .json()
            .await
            .map_err(|e| Error::geocode_failed(format!("invalid response: {e}")))?;
        Ok(body.address.label())
    }
}
