//! Weather Underground reports
//!
//! Two kinds of location produce the same report:
//! - a personal weather station: live observations, plus today's forecast
//!   at the station's own coordinates for the high, low, rain and sky
//! - a city: forecast only, with the daypart temperature standing in for
//!   the current reading
//!
//! A location that fails is skipped. The source fails only when every
//! location did.

use super::{f64_field, FeedClient};
use crate::geo::{compass_point_16, GeoPoint};
use crate::pipeline::source::{FetchError, RecordSource};
use crate::types::{Category, Record, Source};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

/// Longest sky condition kept whole; longer ones are cut to 22 + `...`.
const CONDITION_MAX_CHARS: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherLocation {
    Station { id: String, label: String },
    City { name: String, center: GeoPoint },
}

impl WeatherLocation {
    pub fn label(&self) -> &str {
        match self {
            Self::Station { label, .. } => label,
            Self::City { name, .. } => name,
        }
    }
}

/// One location's report. `None` renders as `--`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherReport {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub humidity: Option<f64>,
    pub precip_chance: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Sixteen-point compass, `---` when unknown
    pub wind_dir: String,
    pub wind_gust: Option<f64>,
    pub condition: String,
    pub location: Option<GeoPoint>,
}

/// Today's part of a 5-day daily forecast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyForecast {
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_dir_deg: Option<f64>,
    pub precip_chance: Option<f64>,
    pub condition: String,
    pub daypart_temp: Option<f64>,
    pub heat_index: Option<f64>,
    pub wind_chill: Option<f64>,
}

pub fn compass(degrees: Option<f64>) -> String {
    degrees
        .filter(|d| d.is_finite())
        .map_or_else(|| "---".to_string(), |d| compass_point_16(d).to_string())
}

fn shorten_condition(raw: &str) -> String {
    let raw = raw.trim();
    if raw.chars().count() > CONDITION_MAX_CHARS {
        let mut out: String = raw.chars().take(CONDITION_MAX_CHARS - 3).collect();
        out.push_str("...");
        out
    } else {
        raw.to_string()
    }
}

/// First element of a forecast array field.
fn first(body: &Value, key: &str) -> Option<f64> {
    body.get(key)?.get(0)?.as_f64()
}

/// Parse `v3/wx/forecast/daily/5day`.
///
/// The first daypart is today; once the day part has passed its name is
/// null and tonight (index 1) is used instead.
pub fn parse_forecast(body: &Value) -> Result<DailyForecast, FetchError> {
    if !body.is_object() {
        return Err(FetchError::Decode("forecast is not a JSON object".into()));
    }
    let daypart = match body.get("daypart") {
        Some(Value::Array(parts)) => parts.first().unwrap_or(&Value::Null),
        Some(part) => part,
        None => &Value::Null,
    };
    let idx = match daypart.pointer("/daypartName/0") {
        Some(Value::Null) => 1,
        _ => 0,
    };
    let part = |key: &str| daypart.get(key)?.get(idx)?.as_f64();

    Ok(DailyForecast {
        high: first(body, "temperatureMax").or_else(|| first(body, "calendarDayTemperatureMax")),
        low: first(body, "temperatureMin"),
        humidity: part("relativeHumidity"),
        wind_speed: part("windSpeed"),
        wind_dir_deg: part("windDirection"),
        precip_chance: part("precipChance"),
        condition: daypart
            .get("wxPhraseLong")
            .and_then(|v| v.get(idx))
            .and_then(Value::as_str)
            .map(shorten_condition)
            .unwrap_or_default(),
        daypart_temp: part("temperature"),
        heat_index: part("temperatureHeatIndex"),
        wind_chill: part("temperatureWindChill"),
    })
}

/// Parse `v2/pws/observations/current` into the observed half of a report.
pub fn parse_observation(body: &Value) -> Result<WeatherReport, FetchError> {
    let obs = body
        .pointer("/observations/0")
        .ok_or_else(|| FetchError::Decode("station returned no observations (offline?)".into()))?;
    let imperial = obs.get("imperial").unwrap_or(&Value::Null);
    let location = match (f64_field(obs, "lat"), f64_field(obs, "lon")) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon).ok(),
        _ => None,
    };
    Ok(WeatherReport {
        temp: f64_field(imperial, "temp"),
        feels_like: f64_field(imperial, "heatIndex").or_else(|| f64_field(imperial, "windChill")),
        humidity: f64_field(obs, "humidity"),
        wind_speed: f64_field(imperial, "windSpeed"),
        wind_dir: compass(f64_field(obs, "winddir")),
        wind_gust: f64_field(imperial, "windGust"),
        location,
        ..WeatherReport::default()
    })
}

impl WeatherReport {
    /// Fill the forecast half of a station report.
    #[must_use]
    pub fn with_forecast(mut self, forecast: &DailyForecast) -> Self {
        self.high = forecast.high;
        self.low = forecast.low;
        self.precip_chance = forecast.precip_chance;
        self.condition = forecast.condition.clone();
        self
    }

    /// City report built from the forecast alone.
    pub fn from_forecast(forecast: &DailyForecast, center: GeoPoint) -> Self {
        Self {
            temp: forecast.daypart_temp,
            feels_like: forecast
                .heat_index
                .or(forecast.wind_chill)
                .or(forecast.daypart_temp),
            high: forecast.high,
            low: forecast.low,
            humidity: forecast.humidity,
            precip_chance: forecast.precip_chance,
            wind_speed: forecast.wind_speed,
            wind_dir: compass(forecast.wind_dir_deg),
            wind_gust: None,
            condition: forecast.condition.clone(),
            location: Some(center),
        }
    }

    pub fn into_record(self, label: &str) -> Record {
        let mut record = Record::new(
            format!("wx:{}", label.to_lowercase()),
            Source::Weather,
            Category::Weather,
            Utc::now(),
        )
        .with_field("label", label)
        .with_field("wind_dir", self.wind_dir)
        .with_field("condition", self.condition);
        for (key, value) in [
            ("temp", self.temp),
            ("feels_like", self.feels_like),
            ("high", self.high),
            ("low", self.low),
            ("humidity", self.humidity),
            ("precip_chance", self.precip_chance),
            ("wind_speed", self.wind_speed),
            ("wind_gust", self.wind_gust),
        ] {
            if let Some(v) = value {
                record = record.with_field(key, v.to_string());
            }
        }
        record.location = self.location;
        record
    }
}

// ============================================================================
// Source
// ============================================================================

pub struct WeatherSource {
    pub client: FeedClient,
    pub api_key: String,
    pub observation_url: String,
    pub forecast_url: String,
    pub locations: Vec<WeatherLocation>,
}

impl WeatherSource {
    async fn forecast(&self, at: GeoPoint) -> Result<DailyForecast, FetchError> {
        let query = [
            ("geocode", format!("{},{}", at.lat, at.lon)),
            ("format", "json".to_string()),
            ("units", "e".to_string()),
            ("language", "en-US".to_string()),
            ("apiKey", self.api_key.clone()),
        ];
        let body = self.client.get_json(&self.forecast_url, &query, &[]).await?;
        parse_forecast(&body)
    }

    async fn station(&self, id: &str) -> Result<WeatherReport, FetchError> {
        let query = [
            ("stationId", id.to_string()),
            ("format", "json".to_string()),
            ("units", "e".to_string()),
            ("numericPrecision", "decimal".to_string()),
            ("apiKey", self.api_key.clone()),
        ];
        let body = self
            .client
            .get_json(&self.observation_url, &query, &[])
            .await?;
        let observed = parse_observation(&body)?;
        let Some(at) = observed.location else {
            return Ok(observed);
        };
        match self.forecast(at).await {
            Ok(forecast) => Ok(observed.with_forecast(&forecast)),
            Err(e) => {
                warn!(station = id, error = %e, "Forecast unavailable, sending observations only");
                Ok(observed)
            }
        }
    }

    async fn report(&self, location: &WeatherLocation) -> Result<WeatherReport, FetchError> {
        match location {
            WeatherLocation::Station { id, .. } => self.station(id).await,
            WeatherLocation::City { center, .. } => {
                let forecast = self.forecast(*center).await?;
                Ok(WeatherReport::from_forecast(&forecast, *center))
            }
        }
    }
}

#[async_trait]
impl RecordSource for WeatherSource {
    fn name(&self) -> &str {
        "WeatherUnderground"
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let mut records = Vec::with_capacity(self.locations.len());
        let mut last_error = None;
        for location in &self.locations {
            match self.report(location).await {
                Ok(report) => {
                    info!(location = location.label(), "Weather report fetched");
                    records.push(report.into_record(location.label()));
                }
                Err(e) => {
                    warn!(location = location.label(), error = %e, "Skipping weather location");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if records.is_empty() => Err(e),
            _ => Ok(records),
        }
    }
}
