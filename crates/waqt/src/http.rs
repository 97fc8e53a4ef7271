//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::Client;

/// `User-Agent` sent to the timetable and geocoding services.
pub const USER_AGENT: &str = concat!("waqt/", env!("CARGO_PKG_VERSION"));

/// Build a client with a request timeout and user agent.
#[must_use]
pub fn build_client(user_agent: &str, timeout: Duration) -> Client {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}
