//! USGS FDSN earthquake catalogue (GeoJSON)

use super::{f64_field, str_field, FeedClient};
use crate::geo::GeoPoint;
use crate::pipeline::dedup::quake_key;
use crate::pipeline::source::{FetchError, RecordSource};
use crate::types::{Category, Record, Severity, Source};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

/// Recent earthquakes within a server-side search radius.
pub struct UsgsSource {
    pub client: FeedClient,
    pub url: String,
    pub center: GeoPoint,
    pub search_radius_km: f64,
    pub min_magnitude: f64,
    pub lookback_hours: u32,
    /// Upper bound on features requested
    pub limit: usize,
}

#[async_trait]
impl RecordSource for UsgsSource {
    fn name(&self) -> &str {
        "USGS"
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let end = Utc::now();
        let start = end - Duration::hours(i64::from(self.lookback_hours));
        let fmt = "%Y-%m-%dT%H:%M:%S";
        let query = [
            ("format", "geojson".to_string()),
            ("starttime", start.format(fmt).to_string()),
            ("endtime", end.format(fmt).to_string()),
            ("minmagnitude", self.min_magnitude.to_string()),
            ("latitude", self.center.lat.to_string()),
            ("longitude", self.center.lon.to_string()),
            ("maxradiuskm", self.search_radius_km.to_string()),
            ("orderby", "time".to_string()),
            ("limit", self.limit.to_string()),
        ];
        let body = self.client.get_json(&self.url, &query, &[]).await?;
        parse_quakes(&body)
    }
}

/// Normalize a USGS GeoJSON `FeatureCollection`.
///
/// Features without a time are skipped. Features without coordinates are
/// kept without a location and left to the ring filter.
pub fn parse_quakes(body: &Value) -> Result<Vec<Record>, FetchError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode("USGS response has no features array".into()))?;

    let mut records = Vec::with_capacity(features.len());
    for feature in features {
        let props = feature.get("properties").unwrap_or(&Value::Null);
        let id = str_field(feature, "id");
        let Some(time) = props
            .get("time")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        else {
            warn!(id, "Skipping quake without a valid time");
            continue;
        };
        let mag = f64_field(props, "mag").unwrap_or(0.0);

        let coords: Vec<f64> = feature
            .pointer("/geometry/coordinates")
            .and_then(Value::as_array)
            .map(|c| c.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        let identity = match coords.as_slice() {
            [lon, lat, ..] => quake_key(*lat, *lon, mag, time),
            _ => id.to_string(),
        };

        let place = match str_field(props, "place") {
            "" => "Unknown location",
            p => p,
        };
        let mut record = Record::new(identity, Source::Usgs, Category::Quake, time)
            .with_severity(Severity::from_magnitude(mag))
            .with_field("mag", format!("{mag:.1}"))
            .with_field("place", place)
            .with_field("url", str_field(props, "url"))
            .with_field("id", id);
        if let [lon, lat, rest @ ..] = coords.as_slice() {
            record = record.with_location(*lat, *lon);
            if let Some(depth) = rest.first() {
                record = record.with_field("depth_km", format!("{depth:.1}"));
            }
        }
        records.push(record);
    }
    Ok(records)
}
