//! Feed adapters
//!
//! Each adapter fetches one upstream API with `reqwest` and normalizes the
//! JSON, CSV or XML payload into [`Record`](crate::types::Record)s.
//! Malformed items are skipped with a warning; a failed request fails only
//! that source.

pub mod calendar;
pub mod geocode;
pub mod nws;
pub mod solar;
pub mod spots;
pub mod usgs;
pub mod weather;

pub use calendar::{CalendarEvent, CalendarSource};
pub use geocode::{AlertLocation, HttpGeocoder, LocationRequest};
pub use nws::{AlertFilter, NwsQuery, NwsSource};
pub use solar::{SolarMode, SolarSource, TropoQuery};
pub use spots::{PotaSource, SotaSource};
pub use usgs::UsgsSource;
pub use weather::{WeatherLocation, WeatherSource};

use crate::pipeline::source::FetchError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Shared HTTP client for every feed.
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
}

impl FeedClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<Value, FetchError> {
        let mut req = self.http.get(url).query(query);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        debug!(url, "GET");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!(url, "GET");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(resp.text().await?)
    }
}

// ============================================================================
// JSON helpers
// ============================================================================

/// String field, `""` when absent or not a string.
pub(crate) fn str_field<'a>(obj: &'a Value, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Numeric field that some APIs send as a string.
pub(crate) fn f64_field(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Naive `YYYY-MM-DDTHH:MM:SS` UTC timestamps (POTA, SOTA), tolerating
/// fractional seconds and a trailing `Z`.
pub(crate) fn parse_naive_utc(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
