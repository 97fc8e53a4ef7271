//! Configuration management for waqt.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http;
use crate::location::{Coordinates, NominatimGeocoder};
use crate::timetable::{AladhanClient, CalculationMethod};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "waqt";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `WAQT_`, sections separated by
///    `__`, e.g. `WAQT_TIMETABLE__METHOD=isna`)
/// 2. TOML config file at `~/.config/waqt/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the user is.
    pub location: LocationConfig,
    /// Timetable provider settings.
    pub timetable: TimetableConfig,
    /// Reverse geocoding settings.
    pub geocoding: GeocodingConfig,
    /// Periodic refresh settings.
    pub refresh: RefreshConfig,
}

/// Location-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Latitude in degrees. Must be set together with `longitude`.
    pub latitude: Option<f64>,
    /// Longitude in degrees. Must be set together with `latitude`.
    pub longitude: Option<f64>,
    /// Fixed place label; when set, reverse geocoding is skipped.
    pub name: Option<String>,
}

/// Timetable provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimetableConfig {
    /// Base URL of the Aladhan-compatible API.
    pub base_url: String,
    /// Calculation method, by name or numeric id.
    pub method: CalculationMethod,
    /// Upper bound on a single fetch, in seconds.
    pub timeout_secs: u64,
}

/// Reverse geocoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Look up a place name for the position.
    pub enabled: bool,
    /// Base URL of the Nominatim-compatible API.
    pub base_url: String,
    /// `User-Agent` header sent to the geocoder.
    pub user_agent: String,
}

/// Refresh configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between periodic refreshes.
    pub interval_secs: u64,
}

impl Default for TimetableConfig {
    fn default() -> Self {
        Self {
            base_url: AladhanClient::DEFAULT_BASE_URL.to_string(),
            method: CalculationMethod::default(),
            timeout_secs: 10,
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: NominatimGeocoder::DEFAULT_BASE_URL.to_string(),
            user_agent: http::USER_AGENT.to_string(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("WAQT_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.coordinates()?;

        if self.timetable.timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "timetable.timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.refresh.interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "refresh.interval_secs must be greater than 0".to_string(),
            });
        }

        for (key, url) in [
            ("timetable.base_url", &self.timetable.base_url),
            ("geocoding.base_url", &self.geocoding.base_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                return Err(Error::ConfigValidation {
                    message: format!("{key} is not a valid URL: {url}"),
                });
            }
        }

        Ok(())
    }

    /// The configured position, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if only one of latitude/longitude is set or the pair
    /// is out of range.
    pub fn coordinates(&self) -> Result<Option<Coordinates>> {
        match (self.location.latitude, self.location.longitude) {
            (Some(latitude), Some(longitude)) => {
                Coordinates::new(latitude, longitude).map(Some).map_err(|e| {
                    Error::ConfigValidation {
                        message: e.to_string(),
                    }
                })
            }
            (None, None) => Ok(None),
            _ => Err(Error::ConfigValidation {
                message: "location.latitude and location.longitude must be set together"
                    .to_string(),
            }),
        }
    }

    /// Get the fetch timeout as a Duration.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timetable.timeout_secs)
    }

    /// Get the refresh interval as a Duration.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.location.latitude.is_none());
        assert!(config.location.name.is_none());
        assert_eq!(config.timetable.method, CalculationMethod::UmmAlQura);
        assert_eq!(config.timetable.timeout_secs, 10);
        assert_eq!(config.timetable.base_url, "https://api.aladhan.com");
        assert!(config.geocoding.enabled);
        assert_eq!(config.refresh.interval_secs, 60);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_half_coordinates() {
        let mut config = Config::default();
        config.location.latitude = Some(21.4);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("set together"));
    }

    #[test]
    fn test_validate_out_of_range_coordinates() {
        let mut config = Config::default();
        config.location.latitude = Some(100.0);
        config.location.longitude = Some(39.8);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.timetable.timeout_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeout_secs"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.refresh.interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("interval_secs"));
    }

    #[test]
    fn test_validate_bad_url() {
        let mut config = Config::default();
        config.geocoding.base_url = "not a url".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("geocoding.base_url"));
    }

    #[test]
    fn test_coordinates() {
        let mut config = Config::default();
        assert_eq!(config.coordinates().unwrap(), None);

        config.location.latitude = Some(21.4225);
        config.location.longitude = Some(39.8262);
        let c = config.coordinates().unwrap().unwrap();
        assert!((c.latitude() - 21.4225).abs() < f64::EPSILON);
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("waqt"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[location]
latitude = 24.4672
longitude = 39.6111
name = "Madinah"

[timetable]
method = "muslim_world_league"
timeout_secs = 5

[refresh]
interval_secs = 120
"#
        )
        .unwrap();

        let config = Config::load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.location.name.as_deref(), Some("Madinah"));
        assert_eq!(config.timetable.method, CalculationMethod::MuslimWorldLeague);
        assert_eq!(config.timetable.timeout_secs, 5);
        assert_eq!(config.refresh.interval_secs, 120);
        // Untouched sections keep their defaults
        assert!(config.geocoding.enabled);
    }

    #[test]
    fn test_load_method_by_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timetable]\nmethod = 2").unwrap();

        let config = Config::load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.timetable.method, CalculationMethod::Isna);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[refresh]\ninterval_secs = 0").unwrap();

        assert!(Config::load_from(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("umm_al_qura"));
        assert!(json.contains("interval_secs"));
    }
}
