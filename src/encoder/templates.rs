//! Per-feed message layouts
//!
//! Each template returns its renderings richest first; the encoder keeps the
//! first one under the byte ceiling. Field names match what the feed
//! adapters in `crate::feeds` put into [`Record::fields`].

use super::Template;
use crate::feeds::solar::HF_BAND_PAIRS;
use crate::geo::{compass_point, DistanceUnit};
use crate::types::{freq_display, Record, Severity};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// IANA zone for rendered times. The abbreviation (`%Z`) follows daylight
/// saving, so a July timestamp in `America/Los_Angeles` renders as PDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayZone {
    tz: Tz,
}

impl DisplayZone {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Zone by IANA name ("America/Los_Angeles").
    pub fn named(name: &str) -> Result<Self, String> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|e| format!("unknown time zone '{name}': {e}"))
    }

    pub fn utc() -> Self {
        Self::new(Tz::UTC)
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn local(&self, t: DateTime<Utc>) -> DateTime<Tz> {
        t.with_timezone(&self.tz)
    }
}

/// Shorten a string to `max_chars` characters, ending in `...` when cut.
fn shorten(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

// ============================================================================
// Earthquakes
// ============================================================================

/// ```text
/// EARTHQUAKE
/// 🟡 M3.3 - 5 km SW of Ridgemark
/// 46.5mi from SJC | Depth: 5.0mi
/// Feb 11 03:34 PST
/// ```
#[derive(Debug, Clone)]
pub struct QuakeTemplate {
    pub zone: DisplayZone,
    pub center_label: String,
    pub unit: DistanceUnit,
    /// Suffixes removed from USGS place names (", CA")
    pub strip_place_suffixes: Vec<String>,
}

impl QuakeTemplate {
    fn place(&self, record: &Record) -> String {
        let mut place = record.field("place").to_string();
        for suffix in &self.strip_place_suffixes {
            place = place.replace(suffix.as_str(), "");
        }
        if place.trim().is_empty() {
            "Unknown location".to_string()
        } else {
            place.trim().to_string()
        }
    }
}

impl Template for QuakeTemplate {
    fn render(&self, record: &Record) -> Vec<String> {
        let mag = record.field_f64("mag").unwrap_or(0.0);
        let marker = Severity::from_magnitude(mag).marker();
        let place = self.place(record);
        let depth = record
            .field_f64("depth_km")
            .map(|km| self.unit.from_km(km))
            .unwrap_or(0.0);
        let u = self.unit.suffix();
        let when = self
            .zone
            .local(record.timestamp)
            .format("%b %d %H:%M %Z")
            .to_string();

        let mut out = Vec::with_capacity(3);
        if let Some(dist) = record.distance {
            out.push(format!(
                "EARTHQUAKE\n{marker} M{mag:.1} - {place}\n\
                 {dist:.1}{u} from {} | Depth: {depth:.1}{u}\n{when}",
                self.center_label
            ));
        }
        out.push(format!(
            "EARTHQUAKE\n{marker} M{mag:.1} - {place}\nDepth: {depth:.1}{u}\n{when}"
        ));
        let short = shorten(&place, 40);
        out.push(format!(
            "EARTHQUAKE\n{marker} M{mag:.1} - {short}\nDepth: {depth:.1}{u}\n{when}"
        ));
        out
    }

    fn label(&self, record: &Record) -> String {
        format!("Quake M{:.1}", record.field_f64("mag").unwrap_or(0.0))
    }
}

// ============================================================================
// Activator spots
// ============================================================================

/// ```text
/// POTA
/// K-1234
/// Call: K6ABC
/// SSB 14.25
/// 18:05 PST
/// 42mi NE of SJC
/// ```
#[derive(Debug, Clone)]
pub struct SpotTemplate {
    pub zone: DisplayZone,
    pub center_label: String,
    pub unit: DistanceUnit,
}

impl Template for SpotTemplate {
    fn render(&self, record: &Record) -> Vec<String> {
        let program = record.source.label();
        let reference = record.field("reference");
        let call = record.field("callsign");
        let mode = match record.field("mode") {
            "" => "?",
            m => m,
        };
        let freq = freq_display(record.field_f64("freq_mhz"));
        let when = self.zone.local(record.timestamp).format("%H:%M %Z").to_string();
        let whereabouts = record.distance.map(|d| {
            let dir = record.bearing.map_or("", compass_point);
            format!("{d:.0}{} {dir} of {}", self.unit.suffix(), self.center_label)
        });

        let mut full = format!("{program}\n{reference}\nCall: {call}\n{mode} {freq}\n{when}");
        let mut compact = format!("{program} {reference}\n{call} {mode} {freq}\n{when}");
        if let Some(w) = whereabouts {
            full.push('\n');
            full.push_str(&w);
            compact.push('\n');
            compact.push_str(&w);
        }
        vec![full, compact]
    }

    fn label(&self, record: &Record) -> String {
        format!("{} {}", record.source.label(), record.field("callsign"))
    }
}

// ============================================================================
// Weather alerts
// ============================================================================

const EVENT_ABBREVIATIONS: &[(&str, &str)] = &[
    ("Warning", "Wrn"),
    ("Watch", "Wtch"),
    ("Advisory", "Adv"),
    ("Statement", "Stmt"),
    ("Severe ", "Svr "),
    ("Thunderstorm", "T-Storm"),
    ("Special Weather ", "Spc WX "),
];

/// ```text
/// ⚠️ SKYWARN
/// 🟠 Svr T-Storm Wrn
/// Santa Clara County, CA
/// Until 3:45 PM PST
/// 12mi
/// ```
#[derive(Debug, Clone)]
pub struct AlertTemplate {
    pub zone: DisplayZone,
    pub unit: DistanceUnit,
}

impl AlertTemplate {
    fn short_event(event: &str) -> String {
        let mut out = if event.is_empty() {
            "Weather Alert".to_string()
        } else {
            event.to_string()
        };
        for (long, short) in EVENT_ABBREVIATIONS {
            out = out.replace(long, short);
        }
        out
    }

    fn area(record: &Record) -> String {
        let area = record.field("area");
        if area.chars().count() > 45 {
            let first = area.split(';').next().unwrap_or("").trim();
            return shorten(first, 45);
        }
        area.to_string()
    }

    fn expires(&self, record: &Record) -> Option<String> {
        let raw = record.field("expires");
        let t = DateTime::parse_from_rfc3339(raw).ok()?;
        Some(format!(
            "Until {}",
            t.with_timezone(&self.zone.tz()).format("%-I:%M %p %Z")
        ))
    }
}

impl AlertTemplate {
    /// Broadcast when a run finds nothing, if the operator asked for it.
    ///
    /// ```text
    /// ⚠️ SKYWARN
    /// ✅ No active alerts
    /// San Jose, CA
    /// Radius: 50mi
    /// ```
    pub fn all_clear(&self, place: &str, radius: f64) -> String {
        format!(
            "⚠️ SKYWARN\n✅ No active alerts\n{place}\nRadius: {radius:.0}{}",
            self.unit.suffix()
        )
    }
}

impl Template for AlertTemplate {
    fn render(&self, record: &Record) -> Vec<String> {
        let marker = record.severity.unwrap_or_default().marker();
        let event = Self::short_event(record.field("event"));
        let area = Self::area(record);
        let expires = self.expires(record);

        let mut full = vec!["⚠️ SKYWARN".to_string(), format!("{marker} {event}")];
        let mut compact = full.clone();
        if !area.is_empty() {
            full.push(area.clone());
            compact.push(shorten(&area, 30));
        }
        if let Some(exp) = expires {
            full.push(exp.clone());
            compact.push(exp);
        }
        if let Some(d) = record.distance.filter(|d| *d > 0.0) {
            full.push(format!("{d:.0}{}", self.unit.suffix()));
        }
        vec![full.join("\n"), compact.join("\n")]
    }

    fn label(&self, record: &Record) -> String {
        format!("Alert {}", record.field("event"))
    }
}

// ============================================================================
// Calendar events
// ============================================================================

/// ```text
/// EVENT TOMORROW:
/// Club Meeting
/// Tue Mar 04 @ 7:00 PM
/// Monthly meeting at the EOC
/// ```
///
/// The description is the last line so encoder truncation eats it first.
#[derive(Debug, Clone)]
pub struct EventTemplate {
    pub zone: DisplayZone,
    /// Lead time of the window being announced (hours)
    pub window_hours: u32,
}

impl EventTemplate {
    pub fn prefix(window_hours: u32) -> String {
        match window_hours {
            24 => "TOMORROW".to_string(),
            2 => "IN 2 HOURS".to_string(),
            h => format!("IN {h}H"),
        }
    }
}

impl Template for EventTemplate {
    fn render(&self, record: &Record) -> Vec<String> {
        let local = self.zone.local(record.timestamp);
        let prefix = Self::prefix(self.window_hours);
        let name = record.field("name");
        let head = format!(
            "EVENT {prefix}:\n{name}\n{} @ {}",
            local.format("%a %b %d"),
            local.format("%-I:%M %p")
        );
        match record.field("description").trim() {
            "" => vec![head],
            desc => vec![format!("{head}\n{desc}")],
        }
    }

    fn label(&self, record: &Record) -> String {
        format!("{} ({}h)", record.field("name"), self.window_hours)
    }
}

// ============================================================================
// Propagation
// ============================================================================

/// One message per solar record `kind`:
///
/// ```text
/// ☀️ SOLAR:          📡 BANDS D/N:      🔭 VHF:
/// SFI=185            80/40 = ✅/✅      Es=Band Closed
/// SN=85              30/20 = ✅/🟡      Aurora=Band Closed
/// A=5                17/15 = 🟡/❌      Meteor=Perseids+14d ❌
/// K=2                12/10 = ❌/❌
/// Xray=B1.2
/// Wind=425.1km/s     🌊 TROPO SJC:      💥🔆💫 ALERT: Geomag=G2(K=6+)
/// Bt=-3.0nT          Idx=6/10
/// [10 Feb 1800z] ✅  dT=+12F@925mb
///                    Pres=1022mb
///                    ✅ Likely
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SolarTemplate;

impl SolarTemplate {
    fn indices(record: &Record) -> Vec<String> {
        let f = |k: &str| record.field(k);
        let head = format!(
            "☀️ SOLAR:\nSFI={}\nSN={}\nA={}\nK={}\nXray={}",
            f("sfi"),
            f("sn"),
            f("a"),
            f("k"),
            f("xray")
        );
        let tail = format!("[{}] {}", f("stamp"), f("icon"));
        vec![
            format!("{head}\nWind={}km/s\nBt={}nT\n{tail}", f("wind"), f("bt")),
            format!("{head}\n{tail}"),
        ]
    }

    fn bands(record: &Record) -> String {
        let mut lines = Vec::with_capacity(9);
        if record.field("layout") == "single" {
            lines.push("📡 HF BANDS:".to_string());
            for (_, pair) in HF_BAND_PAIRS {
                let day = record.field(&format!("{pair}:day"));
                lines.extend(pair.split('/').map(|band| format!("{band} = {day}")));
            }
        } else {
            lines.push("📡 BANDS D/N:".to_string());
            for (_, pair) in HF_BAND_PAIRS {
                lines.push(format!(
                    "{pair} = {}/{}",
                    record.field(&format!("{pair}:day")),
                    record.field(&format!("{pair}:night"))
                ));
            }
        }
        lines.join("\n")
    }
}

impl Template for SolarTemplate {
    fn render(&self, record: &Record) -> Vec<String> {
        let f = |k: &str| record.field(k);
        match f("kind") {
            "indices" => Self::indices(record),
            "bands" => vec![Self::bands(record)],
            "vhf" => vec![format!(
                "🔭 VHF:\nEs={}\nAurora={}\nMeteor={} {}",
                f("es"),
                f("aurora"),
                f("meteor"),
                f("icon")
            )],
            "tropo" => vec![format!(
                "🌊 TROPO {}:\nIdx={}/10\ndT={}F@925mb\nPres={}mb\n{} {}",
                f("site"),
                f("index"),
                f("dt"),
                f("pres"),
                f("icon"),
                f("label")
            )],
            "alert" => vec![format!("💥🔆💫 ALERT: {}", f("text"))],
            _ => Vec::new(),
        }
    }

    fn label(&self, record: &Record) -> String {
        format!("Solar {}", record.field("kind"))
    }
}

// ============================================================================
// Weather reports
// ============================================================================

/// ```text
/// WX Willow Glen
/// Temp 58F Feels 56F
/// Hi 63F Lo 44F
/// Hum 65% Rain 20%
/// Wind 5mph NW G10
/// Partly Cloudy
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherTemplate;

impl WeatherTemplate {
    /// Whole numbers without a fraction, `--` when missing.
    fn value(record: &Record, key: &str, suffix: &str) -> String {
        match record.field_f64(key) {
            Some(v) if v.fract() == 0.0 => format!("{v:.0}{suffix}"),
            Some(v) => format!("{v}{suffix}"),
            None => "--".to_string(),
        }
    }
}

impl Template for WeatherTemplate {
    fn render(&self, record: &Record) -> Vec<String> {
        let v = |key: &str, suffix: &str| Self::value(record, key, suffix);
        let gust = match record.field_f64("wind_gust") {
            Some(g) if g > 0.0 => format!(" G{}", v("wind_gust", "")),
            _ => String::new(),
        };
        let dir = match record.field("wind_dir") {
            "" => "---",
            d => d,
        };
        vec![format!(
            "WX {}\nTemp {} Feels {}\nHi {} Lo {}\nHum {} Rain {}\nWind {} {dir}{gust}\n{}",
            record.field("label"),
            v("temp", "F"),
            v("feels_like", "F"),
            v("high", "F"),
            v("low", "F"),
            v("humidity", "%"),
            v("precip_chance", "%"),
            v("wind_speed", "mph"),
            record.field("condition")
        )]
    }

    fn label(&self, record: &Record) -> String {
        format!("WX {}", record.field("label"))
    }
}
