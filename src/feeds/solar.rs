//! HF/VHF propagation report
//!
//! Solar indices and band conditions come from the HamQSL (N0NBH) XML feed.
//! The optional tropospheric ducting index is computed from Open-Meteo
//! pressure-level temperatures over the station.
//!
//! One run yields a short series of records, each rendered as one message
//! by [`SolarTemplate`](crate::encoder::templates::SolarTemplate):
//!
//! | kind      | when                                  |
//! |-----------|---------------------------------------|
//! | `indices` | always (not in HF-bands-only mode)    |
//! | `bands`   | always                                |
//! | `vhf`     | with VHF                              |
//! | `tropo`   | with VHF, when Open-Meteo answered    |
//! | `alert`   | K ≥ 4, an R-scale flare or an S event |

use super::FeedClient;
use crate::geo::GeoPoint;
use crate::pipeline::source::{FetchError, RecordSource};
use crate::types::{Category, Record, Source};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// HamQSL band-pair names and their display labels.
pub const HF_BAND_PAIRS: [(&str, &str); 4] = [
    ("80m-40m", "80/40"),
    ("30m-20m", "30/20"),
    ("17m-15m", "17/15"),
    ("12m-10m", "12/10"),
];

/// Major meteor shower peaks (name, month, day).
pub const METEOR_SHOWERS: [(&str, u32, u32); 9] = [
    ("Quadrantids", 1, 4),
    ("Lyrids", 4, 23),
    ("Eta Aquarids", 5, 6),
    ("Perseids", 8, 12),
    ("Draconids", 10, 8),
    ("Orionids", 10, 22),
    ("Leonids", 11, 17),
    ("Geminids", 12, 14),
    ("Ursids", 12, 22),
];

/// Which messages a solar run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolarMode {
    /// Indices and band conditions
    #[default]
    Standard,
    /// Standard plus VHF status and the tropo index
    WithVhf,
    /// Per-band day conditions only
    HfBandsOnly,
}

// ============================================================================
// HamQSL XML
// ============================================================================

/// Parsed `<solardata>` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolarReport {
    /// Scalar children of `<solardata>` by lowercase tag
    pub values: BTreeMap<String, String>,
    /// `(band name, time)` → condition word
    pub bands: BTreeMap<(String, String), String>,
    /// `(phenomenon name, location)` → status
    pub vhf: BTreeMap<(String, String), String>,
}

impl SolarReport {
    /// Value of a scalar tag, `"?"` when absent or empty.
    pub fn value(&self, tag: &str) -> &str {
        match self.values.get(tag).map(String::as_str) {
            Some(v) if !v.is_empty() => v,
            _ => "?",
        }
    }

    pub fn k_index(&self) -> i32 {
        self.value("kindex").parse().unwrap_or(0)
    }

    /// `updated` as a UTC instant ("10 Feb 2026 1800 GMT").
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.value("updated").trim_end_matches("GMT").trim();
        NaiveDateTime::parse_from_str(raw, "%d %b %Y %H%M")
            .ok()
            .map(|t| t.and_utc())
    }

    pub fn band(&self, name: &str, time: &str) -> &str {
        self.bands
            .get(&(name.to_string(), time.to_string()))
            .map_or("", String::as_str)
    }

    /// First phenomenon whose name contains `needle`, preferring `location`.
    fn phenomenon(&self, needle: &str, location: &str) -> Option<&str> {
        let matching = || {
            self.vhf
                .iter()
                .filter(move |((name, _), v)| name.to_lowercase().contains(needle) && !v.is_empty())
        };
        matching()
            .find(|((_, loc), _)| loc == location)
            .or_else(|| matching().next())
            .map(|(_, v)| v.as_str())
    }

    pub fn aurora(&self) -> String {
        if let Some(v) = self.phenomenon("aurora", "northern_hemi") {
            return v.to_string();
        }
        match self.value("aurora") {
            "?" => "No".to_string(),
            v => v.to_string(),
        }
    }

    pub fn sporadic_e(&self) -> String {
        self.phenomenon("e-skip", "north_america")
            .or_else(|| self.phenomenon("es", "north_america"))
            .unwrap_or("?")
            .to_string()
    }

    fn absorb(&mut self, path: &[String], attrs: &(String, String), value: String) {
        match path {
            [.., parent, leaf] if parent == "calculatedconditions" && leaf == "band" => {
                self.bands.insert(attrs.clone(), value);
            }
            [.., parent, leaf] if parent == "calculatedvhfconditions" && leaf == "phenomenon" => {
                self.vhf.insert(attrs.clone(), value);
            }
            [.., parent, leaf] if parent == "solardata" => {
                self.values.insert(leaf.clone(), value);
            }
            _ => {}
        }
    }
}

fn xml_error(e: impl std::fmt::Display) -> FetchError {
    FetchError::Decode(format!("solar XML: {e}"))
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<String, FetchError> {
    match element.try_get_attribute(key).map_err(xml_error)? {
        Some(attr) => Ok(attr.unescape_value().map_err(xml_error)?.trim().to_string()),
        None => Ok(String::new()),
    }
}

/// Parse the HamQSL `solarxml.php` document. Tag names are matched
/// case-insensitively.
pub fn parse_solar_xml(text: &str) -> Result<SolarReport, FetchError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut report = SolarReport::default();
    let mut path: Vec<String> = Vec::new();
    let mut attrs = (String::new(), String::new());
    let mut seen_solardata = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                match name.as_str() {
                    "solardata" => seen_solardata = true,
                    "band" => attrs = (attribute(&e, "name")?, attribute(&e, "time")?),
                    "phenomenon" => attrs = (attribute(&e, "name")?, attribute(&e, "location")?),
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape().map_err(xml_error)?.trim().to_string();
                report.absorb(&path, &attrs, value);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(xml_error(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            Ok(_) => {}
        }
    }

    if !seen_solardata {
        return Err(FetchError::Decode("solar XML has no <solardata>".into()));
    }
    debug!(
        values = report.values.len(),
        bands = report.bands.len(),
        vhf = report.vhf.len(),
        "Parsed solar data"
    );
    Ok(report)
}

// ============================================================================
// NOAA space-weather scales
// ============================================================================

/// Geomagnetic storm scale from the planetary K index.
pub fn g_scale(k: i32) -> Option<&'static str> {
    match k {
        9.. => Some("G5"),
        8 => Some("G4"),
        7 => Some("G3"),
        6 => Some("G2"),
        5 => Some("G1"),
        _ => None,
    }
}

/// Class letter and magnitude of an X-ray flux reading ("M5.1").
fn xray_class(xray: &str) -> Option<(char, f64)> {
    let xray = xray.trim().to_ascii_uppercase();
    let class = xray.chars().next().filter(|c| "ABCMX".contains(*c))?;
    let magnitude = xray[1..].parse().unwrap_or(0.0);
    Some((class, magnitude))
}

/// Radio blackout scale from the X-ray flare class.
pub fn r_scale(xray: &str) -> Option<&'static str> {
    match xray_class(xray)? {
        ('X', v) if v >= 20.0 => Some("R5"),
        ('X', v) if v >= 10.0 => Some("R4"),
        ('X', _) => Some("R3"),
        ('M', v) if v >= 5.0 => Some("R2"),
        ('M', _) => Some("R1"),
        _ => None,
    }
}

/// Solar radiation storm scale from the proton flux (pfu).
pub fn s_scale(proton_flux: &str) -> Option<&'static str> {
    let pfu: f64 = proton_flux.trim().parse().ok()?;
    [
        (100_000.0, "S5"),
        (10_000.0, "S4"),
        (1_000.0, "S3"),
        (100.0, "S2"),
        (10.0, "S1"),
    ]
    .into_iter()
    .find(|(threshold, _)| pfu >= *threshold)
    .map(|(_, scale)| scale)
}

/// Overall HF outlook marker for the indices message.
pub fn geomagnetic_icon(k: i32, xray: &str) -> &'static str {
    match xray_class(xray) {
        _ if k >= 5 => "❌",
        Some(('X', _)) => "❌",
        Some(('M', v)) if v >= 5.0 => "❌",
        _ if k >= 3 => "🟡",
        Some(('M' | 'C', _)) => "🟡",
        _ => "✅",
    }
}

/// Band condition word → marker.
pub fn condition_icon(word: &str) -> &'static str {
    match word {
        "Excellent" => "⭐",
        "Good" => "✅",
        "Fair" => "🟡",
        "Poor" => "❌",
        _ => "?",
    }
}

/// Parts of the space-weather alert, empty when nothing warrants one.
pub fn alert_parts(report: &SolarReport) -> Vec<String> {
    let k = report.k_index();
    let xray = report.value("xray");
    let g = g_scale(k);
    let r = r_scale(xray);
    let s = s_scale(report.value("protonflux"));
    if k < 4 && r.is_none() && s.is_none() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    match g {
        Some(g) => parts.push(format!("Geomag={g}(K={k}+)")),
        None if k == 4 => parts.push("Geomag=Active(K=4)".to_string()),
        None => {}
    }
    match r {
        Some(r) => parts.push(format!("Flare={xray}({r})")),
        None if matches!(xray_class(xray), Some(('M' | 'X' | 'C', _))) => {
            parts.push(format!("Flare={xray}"));
        }
        None => {}
    }
    if let Some(s) = s {
        parts.push(format!("Proton={s}"));
    }
    if let Ok(wind) = report.value("solarwind").parse::<f64>() {
        if wind >= 500.0 {
            parts.push(format!("Wind={wind:.0}km/s"));
        }
    }
    parts
}

/// "10 Feb 2026 1800 GMT" → "10 Feb 1800z".
pub fn short_stamp(raw: &str) -> String {
    let parts: Vec<&str> = raw.trim_end_matches("GMT").split_whitespace().collect();
    match parts.as_slice() {
        [day, month, _year, time, ..] => format!("{day} {month} {time}z"),
        _ => raw.chars().take(15).collect(),
    }
}

// ============================================================================
// Meteor showers
// ============================================================================

/// Shower whose peak is nearest `today`, with days to the peak (negative
/// once past). Peaks in the neighbouring years are considered too.
pub fn nearest_meteor_shower(today: NaiveDate) -> Option<(&'static str, i64)> {
    let mut best: Option<(&'static str, i64)> = None;
    for (name, month, day) in METEOR_SHOWERS {
        for offset in [0, 1, -1] {
            let Some(peak) = NaiveDate::from_ymd_opt(today.year() + offset, month, day) else {
                continue;
            };
            let delta = (peak - today).num_days();
            if best.map_or(true, |(_, b)| delta.abs() < b.abs()) {
                best = Some((name, delta));
            }
        }
    }
    best
}

/// "Perseids(Active!)" within two days of the peak, else "Perseids+14d".
pub fn meteor_label(name: &str, delta: i64) -> String {
    if delta.abs() <= 2 {
        format!("{name}(Active!)")
    } else if delta > 0 {
        format!("{name}+{delta}d")
    } else {
        format!("{name}{delta}d")
    }
}

// ============================================================================
// Tropospheric ducting
// ============================================================================

/// Expected °F drop from the surface to 925 hPa (~2500 ft).
const NORMAL_LAPSE_925: i64 = 14;
/// Expected °F drop from the surface to 850 hPa (~5000 ft).
const NORMAL_LAPSE_850: i64 = 27;

/// Current surface and pressure-level readings, °F and hPa, rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TropoSample {
    pub t2m: i64,
    pub rh2m: i64,
    pub pres: i64,
    pub t925: i64,
    pub t850: i64,
    pub rh925: i64,
}

impl TropoSample {
    /// Inversion at 925 hPa: °F warmer than the standard lapse rate predicts.
    pub fn inversion_925(&self) -> i64 {
        NORMAL_LAPSE_925 - (self.t2m - self.t925)
    }

    pub fn inversion_850(&self) -> i64 {
        NORMAL_LAPSE_850 - (self.t2m - self.t850)
    }

    /// 0–10 ducting index and its label.
    pub fn index(&self) -> (u8, &'static str) {
        let mut score: u8 = match self.inversion_925() {
            i64::MIN..=0 => 0,
            1..=4 => 2,
            5..=9 => 4,
            10..=17 => 6,
            _ => 8,
        };
        if self.inversion_850() > 10 {
            score = (score + 1).min(10);
        }
        if self.pres >= 1022 {
            score = (score + 1).min(10);
        } else if self.pres >= 1018 && score == 0 {
            score = 1;
        }
        let label = match score {
            0 => "None",
            1 | 2 => "Marginal",
            3 | 4 => "Possible",
            5 | 6 => "Likely",
            7 | 8 => "Strong",
            _ => "Exceptional",
        };
        (score, label)
    }
}

/// Higher index, better DX.
pub fn tropo_icon(index: u8) -> &'static str {
    match index {
        6.. => "✅",
        3..=5 => "🟡",
        _ => "❌",
    }
}

#[allow(clippy::cast_possible_truncation)]
fn whole(v: f64) -> i64 {
    v.round() as i64
}

/// Read an Open-Meteo forecast, taking hourly values at `hour_key`
/// (`YYYY-MM-DDTHH:00` local) or the first hour when it is missing.
pub fn parse_tropo(body: &Value, hour_key: &str) -> Result<TropoSample, FetchError> {
    let idx = body
        .pointer("/hourly/time")
        .and_then(Value::as_array)
        .and_then(|times| times.iter().position(|t| t.as_str() == Some(hour_key)))
        .unwrap_or(0);
    let read = |pointer: String| {
        body.pointer(&pointer)
            .and_then(Value::as_f64)
            .map(whole)
            .ok_or_else(|| FetchError::Decode(format!("Open-Meteo response has no {pointer}")))
    };
    Ok(TropoSample {
        t2m: read("/current/temperature_2m".into())?,
        rh2m: read("/current/relative_humidity_2m".into())?,
        pres: read("/current/surface_pressure".into())?,
        t925: read(format!("/hourly/temperature_925hPa/{idx}"))?,
        t850: read(format!("/hourly/temperature_850hPa/{idx}"))?,
        rh925: read(format!("/hourly/relative_humidity_925hPa/{idx}"))?,
    })
}

// ============================================================================
// Records
// ============================================================================

/// Turn one report into the run's message records, in send order.
pub fn solar_records(
    report: &SolarReport,
    tropo: Option<&TropoSample>,
    mode: SolarMode,
    today: NaiveDate,
    site: &str,
) -> Vec<Record> {
    let updated = report.value("updated");
    let timestamp = report.updated_at().unwrap_or_else(Utc::now);
    let record = |kind: &str| {
        Record::new(format!("solar:{kind}:{updated}"), Source::Solar, Category::Solar, timestamp)
            .with_field("kind", kind)
    };

    let mut bands = record("bands");
    for (name, label) in HF_BAND_PAIRS {
        bands = bands
            .with_field(&format!("{label}:day"), condition_icon(report.band(name, "day")))
            .with_field(&format!("{label}:night"), condition_icon(report.band(name, "night")));
    }
    if mode == SolarMode::HfBandsOnly {
        return vec![bands.with_field("layout", "single")];
    }

    let k = report.k_index();
    let xray = report.value("xray");
    let indices = record("indices")
        .with_field("sfi", report.value("solarflux"))
        .with_field("sn", report.value("sunspots"))
        .with_field("a", report.value("aindex"))
        .with_field("k", report.value("kindex"))
        .with_field("xray", xray)
        .with_field("wind", report.value("solarwind"))
        .with_field("bt", report.value("magneticfield"))
        .with_field("stamp", short_stamp(updated))
        .with_field("icon", geomagnetic_icon(k, xray));
    let mut out = vec![indices, bands.with_field("layout", "pairs")];

    if mode == SolarMode::WithVhf {
        let aurora = report.aurora();
        let es = report.sporadic_e();
        let (meteor, meteor_active) = match nearest_meteor_shower(today) {
            Some((name, delta)) => (meteor_label(name, delta), delta.abs() <= 2),
            None => ("None".to_string(), false),
        };
        let aurora_active = !matches!(
            aurora.to_lowercase().as_str(),
            "no aurora" | "no" | "inactive" | "none" | "?" | "band closed"
        );
        let es_lower = es.to_lowercase();
        let es_open = es_lower.contains("open") || es_lower.contains("active");
        let icon = if aurora_active || es_open || meteor_active {
            "✅"
        } else {
            "❌"
        };
        out.push(
            record("vhf")
                .with_field("es", es)
                .with_field("aurora", aurora)
                .with_field("meteor", meteor)
                .with_field("icon", icon),
        );

        if let Some(sample) = tropo {
            let (index, label) = sample.index();
            let dt = sample.inversion_925();
            out.push(
                record("tropo")
                    .with_field("site", site)
                    .with_field("index", index.to_string())
                    .with_field("label", label)
                    .with_field("dt", format!("{dt:+}"))
                    .with_field("pres", sample.pres.to_string())
                    .with_field("icon", tropo_icon(index)),
            );
        }
    }

    let parts = alert_parts(report);
    if !parts.is_empty() {
        out.push(record("alert").with_field("text", parts.join(" ")));
    }
    out
}

// ============================================================================
// Source
// ============================================================================

/// Open-Meteo query for the tropo index.
#[derive(Debug, Clone)]
pub struct TropoQuery {
    pub url: String,
    pub center: GeoPoint,
    /// Short site label for the message ("SJC")
    pub site: String,
    pub tz: Tz,
}

pub struct SolarSource {
    pub client: FeedClient,
    pub url: String,
    pub mode: SolarMode,
    pub tropo: TropoQuery,
}

impl SolarSource {
    async fn fetch_tropo(&self) -> Result<TropoSample, FetchError> {
        let t = &self.tropo;
        let query = [
            ("latitude", t.center.lat.to_string()),
            ("longitude", t.center.lon.to_string()),
            (
                "current",
                "temperature_2m,relative_humidity_2m,surface_pressure".to_string(),
            ),
            (
                "hourly",
                "temperature_925hPa,temperature_850hPa,relative_humidity_925hPa".to_string(),
            ),
            ("temperature_unit", "fahrenheit".to_string()),
            ("timezone", t.tz.name().to_string()),
            ("forecast_days", "1".to_string()),
        ];
        let body = self.client.get_json(&t.url, &query, &[]).await?;
        let hour_key = Utc::now()
            .with_timezone(&t.tz)
            .format("%Y-%m-%dT%H:00")
            .to_string();
        parse_tropo(&body, &hour_key)
    }
}

#[async_trait]
impl RecordSource for SolarSource {
    fn name(&self) -> &str {
        "HamQSL"
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let text = self.client.get_text(&self.url).await?;
        let report = parse_solar_xml(&text)?;

        let tropo = if self.mode == SolarMode::WithVhf {
            match self.fetch_tropo().await {
                Ok(sample) => Some(sample),
                Err(e) => {
                    warn!(error = %e, "Tropo data unavailable, sending without it");
                    None
                }
            }
        } else {
            None
        };

        let today = Utc::now().with_timezone(&self.tropo.tz).date_naive();
        Ok(solar_records(
            &report,
            tropo.as_ref(),
            self.mode,
            today,
            &self.tropo.site,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const QUIET_DAY: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<solar>
  <solardata>
    <source url="http://www.hamqsl.com/solar.html">N0NBH</source>
    <updated> 10 Feb 2026 1800 GMT</updated>
    <solarflux>185</solarflux>
    <aindex> 5</aindex>
    <kindex> 2</kindex>
    <xray>B1.2</xray>
    <sunspots>85</sunspots>
    <protonflux>0.4</protonflux>
    <solarwind>425.1</solarwind>
    <magneticfield>-3.0</magneticfield>
    <aurora>1</aurora>
    <calculatedconditions>
      <band name="80m-40m" time="day">Good</band>
      <band name="30m-20m" time="day">Good</band>
      <band name="17m-15m" time="day">Fair</band>
      <band name="12m-10m" time="day">Poor</band>
      <band name="80m-40m" time="night">Good</band>
      <band name="30m-20m" time="night">Fair</band>
      <band name="17m-15m" time="night">Poor</band>
      <band name="12m-10m" time="night">Poor</band>
    </calculatedconditions>
    <calculatedvhfconditions>
      <phenomenon name="vhf-aurora" location="northern_hemi">Band Closed</phenomenon>
      <phenomenon name="E-Skip" location="europe">50MHz ES</phenomenon>
      <phenomenon name="E-Skip" location="north_america">Band Closed</phenomenon>
    </calculatedvhfconditions>
  </solardata>
</solar>"#;

    fn quiet() -> SolarReport {
        parse_solar_xml(QUIET_DAY).unwrap()
    }

    fn stormy() -> SolarReport {
        let mut report = quiet();
        for (tag, value) in [
            ("kindex", "6"),
            ("xray", "M5.1"),
            ("solarwind", "650.4"),
        ] {
            report.values.insert(tag.into(), value.into());
        }
        report
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_hamqsl_document() {
        let r = quiet();
        assert_eq!(r.value("solarflux"), "185");
        assert_eq!(r.k_index(), 2);
        assert_eq!(r.value("missing"), "?");
        assert_eq!(r.band("17m-15m", "day"), "Fair");
        assert_eq!(r.band("30m-20m", "night"), "Fair");
        assert_eq!(r.aurora(), "Band Closed");
        assert_eq!(r.sporadic_e(), "Band Closed");
        assert_eq!(r.updated_at().unwrap().to_rfc3339(), "2026-02-10T18:00:00+00:00");
    }

    #[test]
    fn document_without_solardata_is_rejected() {
        assert!(parse_solar_xml("<solar><other/></solar>").is_err());
        assert!(parse_solar_xml("<solar></wrong>").is_err());
    }

    #[test]
    fn noaa_scales() {
        assert_eq!(g_scale(4), None);
        assert_eq!(g_scale(5), Some("G1"));
        assert_eq!(g_scale(9), Some("G5"));
        assert_eq!(r_scale("M1.2"), Some("R1"));
        assert_eq!(r_scale("M5.1"), Some("R2"));
        assert_eq!(r_scale("X1.0"), Some("R3"));
        assert_eq!(r_scale("X12"), Some("R4"));
        assert_eq!(r_scale("x25"), Some("R5"));
        assert_eq!(r_scale("C3.4"), None);
        assert_eq!(r_scale("?"), None);
        assert_eq!(s_scale("12"), Some("S1"));
        assert_eq!(s_scale("150000"), Some("S5"));
        assert_eq!(s_scale("0.4"), None);
        assert_eq!(s_scale("?"), None);
    }

    #[test]
    fn outlook_icon() {
        assert_eq!(geomagnetic_icon(2, "B1.2"), "✅");
        assert_eq!(geomagnetic_icon(3, "B1.2"), "🟡");
        assert_eq!(geomagnetic_icon(1, "C2.0"), "🟡");
        assert_eq!(geomagnetic_icon(1, "M6.0"), "❌");
        assert_eq!(geomagnetic_icon(5, "A0.0"), "❌");
    }

    #[test]
    fn quiet_day_has_no_alert() {
        assert!(alert_parts(&quiet()).is_empty());
    }

    #[test]
    fn storm_alert_lists_every_trigger() {
        assert_eq!(
            alert_parts(&stormy()).join(" "),
            "Geomag=G2(K=6+) Flare=M5.1(R2) Wind=650km/s"
        );

        let mut active = quiet();
        active.values.insert("kindex".into(), "4".into());
        active.values.insert("xray".into(), "C2.0".into());
        assert_eq!(alert_parts(&active).join(" "), "Geomag=Active(K=4) Flare=C2.0");
    }

    #[test]
    fn meteor_showers_wrap_the_year() {
        assert_eq!(nearest_meteor_shower(date(2025, 8, 10)), Some(("Perseids", 2)));
        assert_eq!(nearest_meteor_shower(date(2025, 8, 1)), Some(("Perseids", 11)));
        assert_eq!(nearest_meteor_shower(date(2025, 12, 31)), Some(("Quadrantids", 4)));
        assert_eq!(meteor_label("Perseids", 2), "Perseids(Active!)");
        assert_eq!(meteor_label("Perseids", 14), "Perseids+14d");
        assert_eq!(meteor_label("Perseids", -5), "Perseids-5d");
    }

    #[test]
    fn tropo_index_scoring() {
        let strong = TropoSample {
            t2m: 60,
            rh2m: 80,
            pres: 1023,
            t925: 62,
            t850: 55,
            rh925: 40,
        };
        assert_eq!(strong.inversion_925(), 16);
        assert_eq!(strong.index(), (8, "Strong"));
        assert_eq!(tropo_icon(8), "✅");

        let flat = TropoSample {
            t2m: 70,
            t925: 56,
            t850: 43,
            pres: 1019,
            ..strong
        };
        assert_eq!(flat.index(), (1, "Marginal"));
        assert_eq!(tropo_icon(1), "❌");
    }

    #[test]
    fn open_meteo_answer_uses_current_hour() {
        let body = json!({
            "current": {
                "temperature_2m": 59.6,
                "relative_humidity_2m": 81,
                "surface_pressure": 1021.4
            },
            "hourly": {
                "time": ["2025-06-01T00:00", "2025-06-01T01:00"],
                "temperature_925hPa": [50.0, 61.7],
                "temperature_850hPa": [40.0, 54.9],
                "relative_humidity_925hPa": [30, 42]
            }
        });
        let s = parse_tropo(&body, "2025-06-01T01:00").unwrap();
        assert_eq!((s.t2m, s.pres, s.t925, s.t850, s.rh925), (60, 1021, 62, 55, 42));
        let first = parse_tropo(&body, "2030-01-01T00:00").unwrap();
        assert_eq!(first.t925, 50);
        assert!(parse_tropo(&json!({"current": {}}), "x").is_err());
    }

    #[test]
    fn standard_run_records() {
        let records = solar_records(&quiet(), None, SolarMode::Standard, date(2026, 2, 10), "SJC");
        let kinds: Vec<&str> = records.iter().map(|r| r.field("kind")).collect();
        assert_eq!(kinds, vec!["indices", "bands"]);
        assert_eq!(records[0].field("stamp"), "10 Feb 1800z");
        assert_eq!(records[0].field("icon"), "✅");
        assert_eq!(records[1].field("17/15:day"), "🟡");
        assert_eq!(records[1].field("layout"), "pairs");
        assert!(records.iter().all(|r| r.category == Category::Solar && r.location.is_none()));
    }

    #[test]
    fn vhf_run_adds_status_tropo_and_alert() {
        let sample = TropoSample {
            t2m: 60,
            rh2m: 80,
            pres: 1023,
            t925: 62,
            t850: 55,
            rh925: 40,
        };
        let records = solar_records(
            &stormy(),
            Some(&sample),
            SolarMode::WithVhf,
            date(2025, 8, 11),
            "SJC",
        );
        let kinds: Vec<&str> = records.iter().map(|r| r.field("kind")).collect();
        assert_eq!(kinds, vec!["indices", "bands", "vhf", "tropo", "alert"]);
        assert_eq!(records[2].field("meteor"), "Perseids(Active!)");
        assert_eq!(records[2].field("icon"), "✅");
        assert_eq!(records[3].field("dt"), "+16");
        assert_eq!(records[3].field("index"), "8");
    }

    #[test]
    fn hf_bands_only_run() {
        let today = date(2026, 2, 10);
        let records = solar_records(&stormy(), None, SolarMode::HfBandsOnly, today, "SJC");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("kind"), "bands");
        assert_eq!(records[0].field("layout"), "single");
    }
}
