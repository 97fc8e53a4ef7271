//! Error types for waqt.
//!
//! This module defines all error types used throughout the waqt crate,
//! providing detailed context for debugging and user-friendly error messages.

use thiserror::Error;

/// The main error type for waqt operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Location Errors ===
    /// The host could not provide a position fix (denied or unsupported).
    #[error("location unavailable: {reason}")]
    LocationUnavailable {
        /// Why no position could be obtained, phrased for the user.
        reason: String,
    },

    /// Reverse geocoding of the position failed.
    #[error("reverse geocoding failed: {reason}")]
    GeocodeFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// A latitude/longitude pair was out of range or not finite.
    #[error("invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    // === Timetable Errors ===
    /// The timetable provider could not deliver a usable timetable.
    #[error("failed to fetch prayer timetable: {message}")]
    TimetableFetchFailed {
        /// Description of what went wrong.
        message: String,
        /// HTTP status returned by the provider, if the request got that far.
        status: Option<u16>,
    },

    /// A manual refresh was requested while another refresh is outstanding.
    #[error("a refresh is already in progress")]
    RefreshInProgress,

    /// A date or time argument could not be parsed.
    #[error("invalid date or time '{input}': expected {expected}")]
    InvalidDate {
        /// The text that failed to parse.
        input: String,
        /// The expected format.
        expected: &'static str,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system or terminal operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for waqt operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a location unavailable error.
    #[must_use]
    pub fn location_unavailable(reason: impl Into<String>) -> Self {
        Self::LocationUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a geocoding error.
    #[must_use]
    pub fn geocode_failed(reason: impl Into<String>) -> Self {
        Self::GeocodeFailed {
            reason: reason.into(),
        }
    }

    /// Create a timetable fetch error without an HTTP status.
    #[must_use]
    pub fn timetable_fetch(message: impl Into<String>) -> Self {
        Self::TimetableFetchFailed {
            message: message.into(),
            status: None,
        }
    }

    /// Create a timetable fetch error for a non-success HTTP status.
    #[must_use]
    pub fn timetable_status(message: impl Into<String>, status: u16) -> Self {
        Self::TimetableFetchFailed {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means no position could be obtained.
    #[must_use]
    pub fn is_location_unavailable(&self) -> bool {
        matches!(self, Self::LocationUnavailable { .. })
    }

    /// Check if this error is a timetable fetch failure.
    #[must_use]
    pub fn is_timetable_fetch_failed(&self) -> bool {
        matches!(self, Self::TimetableFetchFailed { .. })
    }

    /// HTTP status carried by a timetable fetch failure.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::TimetableFetchFailed { status, .. } => *status,
            _ => None,
        }
    }
}
