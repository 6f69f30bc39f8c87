//! Alert-run location lookups
//!
//! A US zip code resolves to coordinates and a state through Zippopotam.us.
//! A bare coordinate gets its state from the NWS `/points` endpoint. The
//! state is what the NWS area query needs.

use super::{f64_field, str_field, FeedClient};
use crate::geo::GeoPoint;
use crate::pipeline::source::FetchError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

/// Radius used when only a state is given: every alert in the state.
pub const STATE_WIDE_RADIUS: f64 = 9999.0;

/// Where an alert run is centred.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertLocation {
    pub center: GeoPoint,
    /// NWS area code ("CA")
    pub state: String,
    /// Shown in the all-clear message
    pub place: String,
}

/// What the operator asked for on the command line.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LocationRequest {
    #[default]
    Station,
    Zip(String),
    Point {
        center: GeoPoint,
        state: Option<String>,
    },
    State(String),
}

impl LocationRequest {
    /// Zip wins, then coordinates (with an optional state), then a bare
    /// state. Nothing given means the station.
    pub fn from_options(
        zip: Option<String>,
        point: Option<GeoPoint>,
        state: Option<String>,
    ) -> Self {
        match (zip, point, state) {
            (Some(zip), _, _) => Self::Zip(zip),
            (None, Some(center), state) => Self::Point { center, state },
            (None, None, Some(state)) => Self::State(state),
            (None, None, None) => Self::Station,
        }
    }

    /// State-only runs cover the whole state unless a radius was given.
    pub fn default_radius(&self) -> Option<f64> {
        match self {
            Self::State(_) => Some(STATE_WIDE_RADIUS),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("could not resolve zip code '{zip}': {source}")]
    Zip { zip: String, source: FetchError },

    #[error("could not determine the state for {lat:.4},{lon:.4}; pass --state")]
    UnknownState { lat: f64, lon: f64 },
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn zip(&self, zip: &str) -> Result<AlertLocation, FetchError>;

    async fn state_at(&self, point: GeoPoint) -> Result<Option<String>, FetchError>;
}

/// Zippopotam.us for zips, NWS `/points` for states.
pub struct HttpGeocoder {
    pub client: FeedClient,
    pub zip_url: String,
    pub points_url: String,
    pub user_agent: String,
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn zip(&self, zip: &str) -> Result<AlertLocation, FetchError> {
        let url = format!("{}/{}", self.zip_url.trim_end_matches('/'), zip.trim());
        let body = self.client.get_json(&url, &[], &[]).await?;
        parse_zip_place(&body)
    }

    async fn state_at(&self, point: GeoPoint) -> Result<Option<String>, FetchError> {
        let url = format!(
            "{}/{:.4},{:.4}",
            self.points_url.trim_end_matches('/'),
            point.lat,
            point.lon
        );
        let headers = [
            ("User-Agent", self.user_agent.as_str()),
            ("Accept", "application/geo+json"),
        ];
        let body = self.client.get_json(&url, &[], &headers).await?;
        Ok(parse_point_state(&body))
    }
}

/// First place of a Zippopotam.us answer.
pub fn parse_zip_place(body: &Value) -> Result<AlertLocation, FetchError> {
    let place = body
        .pointer("/places/0")
        .ok_or_else(|| FetchError::Decode("zip lookup returned no places".into()))?;
    let lat = f64_field(place, "latitude");
    let lon = f64_field(place, "longitude");
    let (Some(lat), Some(lon)) = (lat, lon) else {
        return Err(FetchError::Decode("zip place has no coordinates".into()));
    };
    let center = GeoPoint::new(lat, lon).map_err(|e| FetchError::Decode(e.to_string()))?;
    let state = str_field(place, "state abbreviation").to_uppercase();
    let name = str_field(place, "place name");
    let place = if state.is_empty() {
        name.to_string()
    } else {
        format!("{name}, {state}")
    };
    Ok(AlertLocation {
        center,
        state,
        place,
    })
}

/// `properties.relativeLocation.properties.state` of a `/points` answer.
pub fn parse_point_state(body: &Value) -> Option<String> {
    body.pointer("/properties/relativeLocation/properties/state")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

/// Turn a request into a concrete location, falling back to `station`.
pub async fn resolve(
    request: &LocationRequest,
    station: &AlertLocation,
    geocoder: &dyn Geocoder,
) -> Result<AlertLocation, LocationError> {
    let location = match request {
        LocationRequest::Station => station.clone(),
        LocationRequest::Zip(zip) => {
            geocoder
                .zip(zip)
                .await
                .map_err(|source| LocationError::Zip {
                    zip: zip.clone(),
                    source,
                })?
        }
        LocationRequest::Point { center, state } => {
            let state = match state {
                Some(s) => Some(s.trim().to_uppercase()),
                None => geocoder.state_at(*center).await.unwrap_or_else(|e| {
                    warn!(error = %e, "NWS point lookup failed");
                    None
                }),
            };
            let Some(state) = state else {
                return Err(LocationError::UnknownState {
                    lat: center.lat,
                    lon: center.lon,
                });
            };
            AlertLocation {
                center: *center,
                state,
                place: format!("{:.4}, {:.4}", center.lat, center.lon),
            }
        }
        LocationRequest::State(state) => {
            let state = state.trim().to_uppercase();
            AlertLocation {
                center: station.center,
                place: state.clone(),
                state,
            }
        }
    };
    info!(place = %location.place, state = %location.state, "Alert location resolved");
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn station() -> AlertLocation {
        AlertLocation {
            center: GeoPoint::new(37.3382, -121.8863).unwrap(),
            state: "CA".into(),
            place: "San Jose, CA".into(),
        }
    }

    struct Canned {
        state: Option<&'static str>,
    }

    #[async_trait]
    impl Geocoder for Canned {
        async fn zip(&self, zip: &str) -> Result<AlertLocation, FetchError> {
            if zip == "95125" {
                parse_zip_place(&json!({"places": [{
                    "place name": "San Jose",
                    "state abbreviation": "CA",
                    "latitude": "37.2962",
                    "longitude": "-121.8939"
                }]}))
            } else {
                Err(FetchError::Decode("zip lookup returned no places".into()))
            }
        }

        async fn state_at(&self, _point: GeoPoint) -> Result<Option<String>, FetchError> {
            Ok(self.state.map(str::to_string))
        }
    }

    #[test]
    fn zip_answer() {
        let body = json!({
            "post code": "95125",
            "places": [{
                "place name": "San Jose",
                "state abbreviation": "CA",
                "latitude": "37.2962",
                "longitude": "-121.8939"
            }]
        });
        let loc = parse_zip_place(&body).unwrap();
        assert_eq!(loc.state, "CA");
        assert_eq!(loc.place, "San Jose, CA");
        assert!((loc.center.lat - 37.2962).abs() < 1e-9);
        assert!(parse_zip_place(&json!({"places": []})).is_err());
        assert!(parse_zip_place(&json!({})).is_err());
    }

    #[test]
    fn points_answer() {
        let body = json!({"properties": {"relativeLocation": {"properties": {
            "city": "San Jose", "state": "CA"
        }}}});
        assert_eq!(parse_point_state(&body).as_deref(), Some("CA"));
        assert_eq!(parse_point_state(&json!({"properties": {}})), None);
    }

    #[test]
    fn request_precedence() {
        let here = GeoPoint::new(37.0, -122.0).unwrap();
        assert_eq!(
            LocationRequest::from_options(Some("95125".into()), Some(here), Some("NV".into())),
            LocationRequest::Zip("95125".into())
        );
        assert_eq!(
            LocationRequest::from_options(None, Some(here), Some("NV".into())),
            LocationRequest::Point {
                center: here,
                state: Some("NV".into())
            }
        );
        assert_eq!(
            LocationRequest::from_options(None, None, Some("NV".into())),
            LocationRequest::State("NV".into())
        );
        assert_eq!(LocationRequest::from_options(None, None, None), LocationRequest::Station);
    }

    #[tokio::test]
    async fn resolution_order() {
        let geo = Canned { state: Some("NV") };

        let here = resolve(&LocationRequest::Station, &station(), &geo).await.unwrap();
        assert_eq!(here, station());

        let zip = resolve(&LocationRequest::Zip("95125".into()), &station(), &geo)
            .await
            .unwrap();
        assert_eq!(zip.place, "San Jose, CA");

        let reno = GeoPoint::new(39.5296, -119.8138).unwrap();
        let looked_up = LocationRequest::Point {
            center: reno,
            state: None,
        };
        let loc = resolve(&looked_up, &station(), &geo).await.unwrap();
        assert_eq!(loc.state, "NV");
        assert_eq!(loc.place, "39.5296, -119.8138");

        let given = LocationRequest::Point {
            center: reno,
            state: Some("ca".into()),
        };
        assert_eq!(resolve(&given, &station(), &geo).await.unwrap().state, "CA");

        let state = LocationRequest::State("tx".into());
        assert_eq!(state.default_radius(), Some(STATE_WIDE_RADIUS));
        let loc = resolve(&state, &station(), &geo).await.unwrap();
        assert_eq!((loc.state.as_str(), loc.place.as_str()), ("TX", "TX"));
    }

    #[tokio::test]
    async fn unresolvable_locations_fail() {
        let geo = Canned { state: None };
        let nowhere = LocationRequest::Point {
            center: GeoPoint::new(0.0, 0.0).unwrap(),
            state: None,
        };
        assert!(matches!(
            resolve(&nowhere, &station(), &geo).await,
            Err(LocationError::UnknownState { .. })
        ));
        assert!(matches!(
            resolve(&LocationRequest::Zip("00000".into()), &station(), &geo).await,
            Err(LocationError::Zip { .. })
        ));
    }
}
