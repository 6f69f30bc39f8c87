//! National Weather Service active alerts
//!
//! Two queries feed the alert run: alerts for the station's own point, and
//! every alert for the surrounding area. Point alerts without geometry are
//! still relevant and pass the ring filter by source policy; area alerts
//! must carry a polygon.

use super::{str_field, FeedClient};
use crate::config::defaults;
use crate::geo::{self, GeoPoint};
use crate::pipeline::source::{FetchError, RecordSource};
use crate::types::{Category, Record, Severity, Source};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

const GEO_JSON: &str = "application/geo+json";

#[derive(Debug, Clone, PartialEq)]
pub enum NwsQuery {
    Point(GeoPoint),
    /// Area (state) code such as `"CA"`
    Area(String),
}

impl NwsQuery {
    fn source(&self) -> Source {
        match self {
            Self::Point(_) => Source::NwsPoint,
            Self::Area(_) => Source::NwsArea,
        }
    }

    fn params(&self) -> [(&'static str, String); 1] {
        match self {
            Self::Point(p) => [("point", format!("{:.4},{:.4}", p.lat, p.lon))],
            Self::Area(area) => [("area", area.clone())],
        }
    }
}

/// Severity, event-type and SKYWARN filters applied at the adapter.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub min_severity: Option<Severity>,
    /// Case-insensitive substrings of the event name
    pub event_types: Vec<String>,
    pub skywarn_only: bool,
}

impl AlertFilter {
    pub fn admits(&self, event: &str, severity: Severity) -> bool {
        if self.min_severity.is_some_and(|min| severity < min) {
            return false;
        }
        let event = event.to_lowercase();
        if !self.event_types.is_empty()
            && !self
                .event_types
                .iter()
                .any(|kw| event.contains(&kw.to_lowercase()))
        {
            return false;
        }
        if self.skywarn_only && !defaults::SKYWARN_EVENTS.contains(&event.as_str()) {
            return false;
        }
        true
    }
}

pub struct NwsSource {
    pub client: FeedClient,
    pub url: String,
    pub user_agent: String,
    pub query: NwsQuery,
    pub filter: AlertFilter,
}

#[async_trait]
impl RecordSource for NwsSource {
    fn name(&self) -> &str {
        match self.query {
            NwsQuery::Point(_) => "NWS-point",
            NwsQuery::Area(_) => "NWS-area",
        }
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let headers = [
            ("User-Agent", self.user_agent.as_str()),
            ("Accept", GEO_JSON),
        ];
        let body = self
            .client
            .get_json(&self.url, &self.query.params(), &headers)
            .await?;
        parse_alerts(&body, self.query.source(), &self.filter)
    }
}

/// Representative point of an alert polygon.
///
/// GeoJSON rings are `[lon, lat]` pairs; a MultiPolygon uses its first
/// polygon's outer ring.
pub fn alert_centroid(geometry: &Value) -> Option<GeoPoint> {
    let ring = match str_field(geometry, "type") {
        "Polygon" => geometry.pointer("/coordinates/0")?,
        "MultiPolygon" => geometry.pointer("/coordinates/0/0")?,
        _ => return None,
    };
    let points: Vec<(f64, f64)> = ring
        .as_array()?
        .iter()
        .filter_map(|pair| {
            let lon = pair.get(0)?.as_f64()?;
            let lat = pair.get(1)?.as_f64()?;
            Some((lat, lon))
        })
        .collect();
    geo::centroid(&points)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Normalize an NWS alert `FeatureCollection`, applying `filter`.
pub fn parse_alerts(
    body: &Value,
    source: Source,
    filter: &AlertFilter,
) -> Result<Vec<Record>, FetchError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode("NWS response has no features array".into()))?;

    let mut records = Vec::with_capacity(features.len());
    for feature in features {
        let props = feature.get("properties").unwrap_or(&Value::Null);
        let id = match str_field(props, "id") {
            "" => str_field(feature, "id"),
            id => id,
        };
        if id.is_empty() {
            continue;
        }
        let event = str_field(props, "event");
        let severity = Severity::from_cap(str_field(props, "severity"));
        if !filter.admits(event, severity) {
            debug!(id, event, %severity, "Alert filtered out");
            continue;
        }

        let time = parse_time(str_field(props, "sent"))
            .or_else(|| parse_time(str_field(props, "effective")))
            .unwrap_or_else(Utc::now);
        let expires = match str_field(props, "expires") {
            "" => str_field(props, "ends"),
            e => e,
        };

        let mut record = Record::new(id, source, Category::Alert, time)
            .with_severity(severity)
            .with_field("event", event)
            .with_field("area", str_field(props, "areaDesc"))
            .with_field("expires", expires)
            .with_field("headline", str_field(props, "headline"));
        if let Some(center) = feature.get("geometry").and_then(alert_centroid) {
            record.location = Some(center);
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(id: &str, event: &str, severity: &str, geometry: Value) -> Value {
        json!({
            "id": format!("https://api.weather.gov/alerts/{id}"),
            "geometry": geometry,
            "properties": {
                "id": id,
                "event": event,
                "severity": severity,
                "areaDesc": "Santa Clara County, CA",
                "sent": "2025-03-01T20:00:00-08:00",
                "expires": "2025-03-01T23:45:00Z"
            }
        })
    }

    #[test]
    fn centroid_of_polygon_and_multipolygon() {
        let square = json!([[-122.0, 37.0], [-121.0, 37.0], [-121.0, 38.0], [-122.0, 38.0]]);
        let p = alert_centroid(&json!({"type": "Polygon", "coordinates": [square]})).unwrap();
        assert!((p.lat - 37.5).abs() < 1e-9);
        assert!((p.lon + 121.5).abs() < 1e-9);

        let multi = json!({"type": "MultiPolygon", "coordinates": [[square]]});
        assert_eq!(alert_centroid(&multi), Some(p));
        assert_eq!(alert_centroid(&json!({"type": "Point", "coordinates": [0.0, 0.0]})), None);
    }

    #[test]
    fn parses_alert_fields() {
        let body = json!({"features": [feature("urn:1", "Flood Warning", "Severe", Value::Null)]});
        let records = parse_alerts(&body, Source::NwsPoint, &AlertFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.identity, "urn:1");
        assert_eq!(r.source, Source::NwsPoint);
        assert_eq!(r.severity, Some(Severity::Severe));
        assert_eq!(r.field("expires"), "2025-03-01T23:45:00Z");
        assert!(r.location.is_none());
        assert_eq!(r.timestamp.to_rfc3339(), "2025-03-02T04:00:00+00:00");
    }

    #[test]
    fn filters() {
        let body = json!({"features": [
            feature("a", "Flood Warning", "Severe", Value::Null),
            feature("b", "Wind Advisory", "Minor", Value::Null),
            feature("c", "Tornado Warning", "Extreme", Value::Null),
            feature("d", "Heat Advisory", "Moderate", Value::Null)
        ]});
        let ids = |f: AlertFilter| -> Vec<String> {
            parse_alerts(&body, Source::NwsArea, &f)
                .unwrap()
                .into_iter()
                .map(|r| r.identity)
                .collect()
        };

        let severe = AlertFilter {
            min_severity: Some(Severity::Severe),
            ..AlertFilter::default()
        };
        assert_eq!(ids(severe), vec!["a", "c"]);

        let advisories = AlertFilter {
            event_types: vec!["advisory".into()],
            ..AlertFilter::default()
        };
        assert_eq!(ids(advisories), vec!["b", "d"]);

        let skywarn = AlertFilter {
            skywarn_only: true,
            ..AlertFilter::default()
        };
        assert_eq!(ids(skywarn), vec!["a", "c"]);
    }
}
