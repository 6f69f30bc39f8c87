//! Activator spots: Parks on the Air and Summits on the Air
//!
//! Both feeds key records by normalized callsign so an operator activating
//! a summit inside a park collapses to one broadcast.

use super::{f64_field, parse_naive_utc, str_field, FeedClient};
use crate::pipeline::dedup::callsign_key;
use crate::pipeline::source::{FetchError, RecordSource};
use crate::types::{band_for, parse_frequency_mhz, BandSelection, Record, Source};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Frequency as text whether the API sent a number or a string.
fn frequency_text(obj: &Value) -> String {
    match obj.get("frequency") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn with_frequency(record: Record, freq_mhz: Option<f64>) -> Record {
    match freq_mhz {
        Some(f) => record.with_field("freq_mhz", f.to_string()),
        None => record,
    }
}

// ============================================================================
// POTA
// ============================================================================

pub struct PotaSource {
    pub client: FeedClient,
    pub url: String,
    pub band: BandSelection,
}

#[async_trait]
impl RecordSource for PotaSource {
    fn name(&self) -> &str {
        "POTA"
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let body = self.client.get_json(&self.url, &[], &[]).await?;
        parse_pota(&body, self.band)
    }
}

/// Normalize the POTA activator spot list.
///
/// Spots marked QRT (activator signing off) and spots outside `band` are
/// dropped here.
pub fn parse_pota(body: &Value, band: BandSelection) -> Result<Vec<Record>, FetchError> {
    let spots = body
        .as_array()
        .ok_or_else(|| FetchError::Decode("POTA response is not a list".into()))?;

    let mut records = Vec::new();
    for s in spots {
        let call = str_field(s, "activator");
        if call.is_empty() {
            continue;
        }
        if str_field(s, "comments").to_lowercase().contains("qrt") {
            debug!(call, "Skipping QRT spot");
            continue;
        }
        let freq = parse_frequency_mhz(&frequency_text(s));
        let category = band_for(freq);
        if !band.admits(category) {
            continue;
        }
        let time = parse_naive_utc(str_field(s, "spotTime")).unwrap_or_else(Utc::now);
        let grid = match str_field(s, "grid6") {
            "" => str_field(s, "grid4"),
            g => g,
        };

        let mut record = Record::new(callsign_key(call), Source::Pota, category, time)
            .with_field("callsign", call)
            .with_field("reference", str_field(s, "reference"))
            .with_field("name", str_field(s, "name"))
            .with_field("mode", str_field(s, "mode"))
            .with_field("grid", grid);
        record = with_frequency(record, freq);
        if let (Some(lat), Some(lon)) = (f64_field(s, "latitude"), f64_field(s, "longitude")) {
            record = record.with_location(lat, lon);
        }
        records.push(record);
    }
    Ok(records)
}

// ============================================================================
// SOTA
// ============================================================================

/// Summit coordinates from the SOTA summit database.
#[derive(Debug, Clone, PartialEq)]
pub struct Summit {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
}

pub struct SotaSource {
    pub client: FeedClient,
    pub spots_url: String,
    pub summit_url: String,
    pub lookback_hours: u32,
    /// Association prefixes worth a summit lookup ("W6", "VE", ...)
    pub associations: Vec<String>,
    pub band: BandSelection,
    /// `"W6/CT-006"` -> summit, `None` for failed lookups
    summits: Mutex<HashMap<String, Option<Summit>>>,
}

impl SotaSource {
    pub fn new(
        client: FeedClient,
        spots_url: &str,
        summit_url: &str,
        lookback_hours: u32,
        associations: Vec<String>,
        band: BandSelection,
    ) -> Self {
        Self {
            client,
            spots_url: spots_url.trim_end_matches('/').to_string(),
            summit_url: summit_url.trim_end_matches('/').to_string(),
            lookback_hours,
            associations,
            band,
            summits: Mutex::new(HashMap::new()),
        }
    }

    async fn summit(&self, association: &str, code: &str) -> Option<Summit> {
        let reference = format!("{association}/{code}");
        if let Some(cached) = self.summits.lock().await.get(&reference) {
            return cached.clone();
        }

        let url = format!("{}/{reference}", self.summit_url);
        let summit = match self.client.get_json(&url, &[], &[]).await {
            Ok(body) => parse_summit(&body),
            Err(e) => {
                warn!(summit = %reference, error = %e, "Summit lookup failed");
                None
            }
        };
        self.summits.lock().await.insert(reference, summit.clone());
        summit
    }
}

#[async_trait]
impl RecordSource for SotaSource {
    fn name(&self) -> &str {
        "SOTA"
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let url = format!("{}/-{}/all", self.spots_url, self.lookback_hours);
        let body = self.client.get_json(&url, &[], &[]).await?;
        let candidates = sota_candidates(&body, &self.associations)?;
        info!(count = candidates.len(), "SOTA spots in nearby associations");

        let mut records = Vec::with_capacity(candidates.len());
        for spot in candidates {
            let association = str_field(spot, "associationCode");
            let code = str_field(spot, "summitCode");
            match self.summit(association, code).await {
                Some(summit) => {
                    if let Some(record) = sota_record(spot, &summit, self.band) {
                        records.push(record);
                    }
                }
                None => debug!(association, code, "No coordinates for summit, skipping"),
            }
        }
        Ok(records)
    }
}

/// Spots in one of `associations` with a complete summit reference.
pub fn sota_candidates<'a>(
    body: &'a Value,
    associations: &[String],
) -> Result<Vec<&'a Value>, FetchError> {
    let spots = body
        .as_array()
        .ok_or_else(|| FetchError::Decode("SOTA response is not a list".into()))?;
    Ok(spots
        .iter()
        .filter(|s| {
            let assoc = str_field(s, "associationCode");
            !assoc.is_empty()
                && !str_field(s, "summitCode").is_empty()
                && associations.iter().any(|a| assoc.starts_with(a.as_str()))
        })
        .collect())
}

pub fn parse_summit(body: &Value) -> Option<Summit> {
    Some(Summit {
        lat: f64_field(body, "latitude")?,
        lon: f64_field(body, "longitude")?,
        name: str_field(body, "name").to_string(),
    })
}

/// One SOTA spot placed on its summit, `None` if outside `band`.
pub fn sota_record(spot: &Value, summit: &Summit, band: BandSelection) -> Option<Record> {
    let call = str_field(spot, "activatorCallsign");
    let freq = parse_frequency_mhz(&frequency_text(spot));
    let category = band_for(freq);
    if call.is_empty() || !band.admits(category) {
        return None;
    }
    let time = parse_naive_utc(str_field(spot, "timeStamp")).unwrap_or_else(Utc::now);
    let reference = format!(
        "{}/{}",
        str_field(spot, "associationCode"),
        str_field(spot, "summitCode")
    );
    let record = Record::new(callsign_key(call), Source::Sota, category, time)
        .with_location(summit.lat, summit.lon)
        .with_field("callsign", call)
        .with_field("reference", reference)
        .with_field("name", summit.name.as_str())
        .with_field("mode", str_field(spot, "mode"));
    Some(with_frequency(record, freq))
}
