//! Normalized record model shared by every feed.
//!
//! Feed adapters turn their raw payloads into [`Record`]s at the pipeline
//! boundary; everything downstream (dedup, ring filter, encoder) works on this
//! one shape.

use crate::geo::GeoPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Source
// ============================================================================

/// Which feed produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// USGS FDSN earthquake catalogue
    Usgs,
    /// Parks on the Air activator spots
    Pota,
    /// Summits on the Air spots
    Sota,
    /// NWS alerts returned for the station's own point
    NwsPoint,
    /// NWS alerts returned for the whole area (state)
    NwsArea,
    /// Scheduled events from the calendar sheet
    Calendar,
    /// HamQSL solar indices and band conditions, plus the local tropo index
    Solar,
    /// Weather Underground station observations and city forecasts
    Weather,
}

impl Source {
    /// Built-in trust policy for records arriving without coordinates.
    ///
    /// Point-query alerts already matched the station location upstream, and
    /// calendar events and propagation reports are not geographic at all.
    /// Everything else must prove where it is.
    pub fn missing_location_policy(self) -> MissingLocationPolicy {
        match self {
            Self::NwsPoint | Self::Calendar | Self::Solar | Self::Weather => {
                MissingLocationPolicy::Include
            }
            Self::Usgs | Self::Pota | Self::Sota | Self::NwsArea => MissingLocationPolicy::Exclude,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Usgs => "USGS",
            Self::Pota => "POTA",
            Self::Sota => "SOTA",
            Self::NwsPoint => "NWS-point",
            Self::NwsArea => "NWS-area",
            Self::Calendar => "calendar",
            Self::Solar => "solar",
            Self::Weather => "WX",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the ring filter does with a record that has no location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingLocationPolicy {
    Include,
    Exclude,
}

// ============================================================================
// Category
// ============================================================================

/// Discriminant used to pick a radius band and a sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Quake,
    /// Spot on 1–30 MHz
    Hf,
    /// Spot on 30 MHz and up
    Vhf,
    Alert,
    Event,
    /// Propagation report (indices, band conditions, VHF, tropo, space weather)
    Solar,
    /// Weather report for one configured location
    Weather,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quake => "quake",
            Self::Hf => "hf",
            Self::Vhf => "vhf",
            Self::Alert => "alert",
            Self::Event => "event",
            Self::Solar => "solar",
            Self::Weather => "weather",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Ordinal severity, lowest first so `Ord` ranks `Extreme` highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Unknown,
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl Severity {
    /// Parse the NWS CAP severity vocabulary (case-insensitive).
    pub fn from_cap(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "extreme" => Self::Extreme,
            "severe" => Self::Severe,
            "moderate" => Self::Moderate,
            "minor" => Self::Minor,
            _ => Self::Unknown,
        }
    }

    /// Map an earthquake magnitude onto the same scale.
    pub fn from_magnitude(mag: f64) -> Self {
        if mag >= 5.0 {
            Self::Extreme
        } else if mag >= 4.0 {
            Self::Severe
        } else if mag >= 3.0 {
            Self::Moderate
        } else {
            Self::Minor
        }
    }

    /// Colour marker used by message templates.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Extreme => "🔴",
            Self::Severe => "🟠",
            Self::Moderate => "🟡",
            Self::Minor => "🟢",
            Self::Unknown => "⚪",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Record
// ============================================================================

/// One normalized feed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Normalized identity key (see `pipeline::dedup` for the key builders)
    pub identity: String,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    /// Raw coordinates as reported. Not validated until the ring filter.
    pub location: Option<GeoPoint>,
    pub category: Category,
    pub severity: Option<Severity>,
    /// Feed-specific display fields consumed by templates
    pub fields: BTreeMap<String, String>,
    /// Distance from the filter center, in the filter's unit. Set by the ring filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Bearing from the filter center in degrees. Set by the ring filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
}

impl Record {
    pub fn new(
        identity: impl Into<String>,
        source: Source,
        category: Category,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: identity.into(),
            source,
            timestamp,
            location: None,
            category,
            severity: None,
            fields: BTreeMap::new(),
            distance: None,
            bearing: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.location = Some(GeoPoint { lat, lon });
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Field value, or `""` when absent.
    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map_or("", String::as_str)
    }

    /// Parse a numeric field, `None` when absent or malformed.
    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// A rendered, size-bounded payload addressed to a logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub channel_key: String,
    pub body: String,
    /// Short human label for logs ("POTA K6ABC", "Quake 1")
    pub label: String,
}

impl Message {
    pub fn byte_len(&self) -> usize {
        self.body.len()
    }
}

// ============================================================================
// Frequency bands
// ============================================================================

/// Upper edge of HF (MHz, exclusive).
pub const HF_UPPER_MHZ: f64 = 30.0;

/// Parse a spotted frequency into MHz.
///
/// POTA reports kHz ("14307", "146520.0"), SOTA reports MHz ("14.062").
/// Anything above 1000 is taken as kHz.
pub fn parse_frequency_mhz(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some(if value > 1000.0 { value / 1000.0 } else { value })
}

/// Band category for a frequency. Unknown frequencies count as HF so they
/// get the wider radius.
pub fn band_for(freq_mhz: Option<f64>) -> Category {
    match freq_mhz {
        Some(f) if f >= HF_UPPER_MHZ => Category::Vhf,
        _ => Category::Hf,
    }
}

/// Which spot bands a run broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandSelection {
    #[default]
    All,
    Hf,
    Vhf,
}

impl BandSelection {
    pub fn admits(self, category: Category) -> bool {
        match self {
            Self::All => true,
            Self::Hf => category == Category::Hf,
            Self::Vhf => category == Category::Vhf,
        }
    }
}

impl std::str::FromStr for BandSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "hf" => Ok(Self::Hf),
            "vhf" | "uhf" => Ok(Self::Vhf),
            other => Err(format!("unknown band '{other}' (expected all, hf or vhf)")),
        }
    }
}

/// Compact frequency for display: `146.5`, `14.062`, `7.2`, `?`.
pub fn freq_display(freq_mhz: Option<f64>) -> String {
    match freq_mhz {
        None => "?".to_string(),
        Some(f) if f >= 100.0 => format!("{f:.1}"),
        Some(f) => {
            let s = format!("{f:.3}");
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    }
}
