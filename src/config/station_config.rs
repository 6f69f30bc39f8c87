//! Station configuration - every operator-tunable value as TOML
//!
//! Each section implements `Default` with the values from
//! [`super::defaults`], so a missing file or a missing section behaves
//! exactly like the built-in configuration.

use super::defaults;
use crate::encoder::templates::DisplayZone;
use crate::feeds::weather::WeatherLocation;
use crate::feeds::AlertLocation;
use crate::geo::{DistanceUnit, GeoPoint};
use crate::pipeline::ring_filter::RadiusBand;
use crate::storage::{JsonFileStateBackend, SledStateBackend, StateBackend, StateError};
use crate::transport::ble::BleTarget;
use crate::transport::channels::{normalize_key, ChannelSecret};
use crate::types::{BandSelection, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "MESHCAST_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "meshcast.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one broadcasting station.
///
/// Load with `StationConfig::load()` which searches:
/// 1. `$MESHCAST_CONFIG`
/// 2. `./meshcast.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub station: StationSection,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub feeds: FeedsConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station: StationSection::default(),
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            channels: default_channels(),
            state: StateConfig::default(),
            feeds: FeedsConfig::default(),
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig {
        key: defaults::PUBLIC_CHANNEL_KEY.to_string(),
        name: defaults::PUBLIC_CHANNEL_NAME.to_string(),
        secret: Some(defaults::PUBLIC_CHANNEL_SECRET.to_string()),
        hashtag: None,
    }]
}

impl StationConfig {
    /// Load configuration using the standard search order:
    /// 1. `$MESHCAST_CONFIG` environment variable
    /// 2. `./meshcast.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// A file that is named or present but unreadable or invalid is an
    /// error; only the absence of any file falls back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var_os(CONFIG_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::load_from(env.as_deref(), Path::new(LOCAL_CONFIG_FILE))
    }

    /// [`load`](Self::load) with the two candidate paths given explicitly.
    pub fn load_from(env_path: Option<&Path>, local: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = env_path {
            let config = Self::load_from_file(path)?;
            info!(
                path = %path.display(),
                station = %config.station.label,
                "Loaded config from MESHCAST_CONFIG"
            );
            return Ok(config);
        }
        if local.exists() {
            let config = Self::load_from_file(local)?;
            info!(path = %local.display(), station = %config.station.label, "Loaded config");
            return Ok(config);
        }
        info!("No meshcast.toml found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys only produce warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = self.station.center().validate() {
            errors.push(format!("station: {e}"));
        }
        if let Err(e) = DisplayZone::named(&self.station.timezone) {
            errors.push(format!("station.timezone: {e}"));
        }

        // Transport
        let t = &self.transport;
        if t.connect_attempts == 0 {
            errors.push("transport.connect_attempts must be >= 1".to_string());
        }
        if t.response_timeout_secs == 0 {
            errors.push("transport.response_timeout_secs must be > 0".to_string());
        }
        if t.connect_timeout_secs == 0 {
            errors.push("transport.connect_timeout_secs must be > 0".to_string());
        }
        if t.baud_rate == 0 {
            errors.push("transport.baud_rate must be > 0".to_string());
        }
        match t.kind {
            TransportKind::Serial => {}
            TransportKind::Tcp if t.host.trim().is_empty() => {
                errors.push("transport.host is required for the tcp transport".to_string());
            }
            TransportKind::Tcp => {}
            TransportKind::Ble => {
                if let Err(e) = BleTarget::parse(&t.ble_address, &t.ble_name) {
                    errors.push(format!("transport.ble_address: {e}"));
                }
                if let Some(pin) = &t.ble_pin {
                    if pin.len() != 6 || !pin.bytes().all(|b| b.is_ascii_digit()) {
                        errors.push("transport.ble_pin must be 6 digits".to_string());
                    }
                }
            }
        }

        // Retry
        let r = &self.retry;
        if r.max_attempts == 0 {
            errors.push("retry.max_attempts must be >= 1".to_string());
        }
        if !r.multiplier.is_finite() || r.multiplier < 1.0 {
            errors.push(format!("retry.multiplier ({}) must be >= 1.0", r.multiplier));
        }
        if r.max_delay_ms < r.base_delay_ms {
            errors.push(format!(
                "retry.max_delay_ms ({}) must be >= base_delay_ms ({})",
                r.max_delay_ms, r.base_delay_ms
            ));
        }

        // Channels
        let mut keys = HashSet::new();
        for (i, ch) in self.channels.iter().enumerate() {
            let key = normalize_key(&ch.key);
            if key.is_empty() {
                errors.push(format!("channels[{i}]: key must not be empty"));
                continue;
            }
            if !keys.insert(key.clone()) {
                errors.push(format!("channels[{i}]: duplicate key '{key}'"));
            }
            if let Err(reason) = ch.secret() {
                errors.push(format!("channels[{i}] ({key}): {reason}"));
            }
            if ch.secret.is_none() && ch.hashtag.is_none() && ch.name.trim().is_empty() {
                errors.push(format!(
                    "channels[{i}] ({key}): needs a secret, a hashtag or a name"
                ));
            }
        }

        // State
        if self.state.retention_days < 0 {
            errors.push("state.retention_days must be >= 0".to_string());
        }
        if self.state.fire_tolerance_minutes.is_some_and(|m| m < 0) {
            errors.push("state.fire_tolerance_minutes must be >= 0".to_string());
        }

        // Feeds
        let f = &self.feeds;
        Self::check_band(&f.quakes.radius, "feeds.quakes.radius", &mut errors);
        Self::check_band(&f.spots.hf, "feeds.spots.hf", &mut errors);
        Self::check_band(&f.spots.vhf, "feeds.spots.vhf", &mut errors);
        Self::check_band(&f.alerts.radius, "feeds.alerts.radius", &mut errors);
        if f.alerts.zip.as_deref().is_some_and(|z| z.trim().is_empty()) {
            errors.push("feeds.alerts.zip must not be empty when set".to_string());
        }
        for (i, city) in f.weather.cities.iter().enumerate() {
            if let Err(e) = city.center().validate() {
                errors.push(format!("feeds.weather.cities[{i}] ({}): {e}", city.name));
            }
        }
        for (name, limit) in [
            ("quakes", f.quakes.limit),
            ("spots", f.spots.limit),
            ("alerts", f.alerts.limit),
            ("solar", f.solar.limit),
            ("weather", f.weather.limit),
        ] {
            if limit == 0 {
                errors.push(format!("feeds.{name}.limit must be >= 1"));
            }
        }
        for (name, delay) in [
            ("quakes", f.quakes.delay_secs),
            ("spots", f.spots.delay_secs),
            ("alerts", f.alerts.delay_secs),
            ("solar", f.solar.delay_secs),
            ("weather", f.weather.delay_secs),
            ("calendar", f.calendar.delay_secs),
        ] {
            if !delay.is_finite() || delay < 0.0 {
                errors.push(format!("feeds.{name}.delay_secs must be >= 0"));
            }
        }
        if f.calendar.windows_hours.is_empty() || f.calendar.windows_hours.contains(&0) {
            errors.push("feeds.calendar.windows_hours must be non-empty and > 0".to_string());
        }
        for (name, channel) in [
            ("quakes", &f.quakes.channel),
            ("spots", &f.spots.channel),
            ("alerts", &f.alerts.channel),
            ("solar", &f.solar.channel),
            ("weather", &f.weather.channel),
            ("calendar", &f.calendar.default_channel),
        ] {
            if !keys.is_empty() && !keys.contains(&normalize_key(channel)) {
                errors.push(format!(
                    "feeds.{name}: channel '{channel}' is not configured in [[channels]]"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_band(band: &RadiusBand, name: &str, errors: &mut Vec<String>) {
        if let Some(problem) = band.problem() {
            errors.push(format!("{name}: {problem}"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            Self::Parse(path, e) => write!(f, "Config parse error ({}): {}", path.display(), e),
            Self::Serialize(e) => write!(f, "Config serialization error: {e}"),
            Self::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Station
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSection {
    /// Short center label for messages ("SJC")
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Unit for every radius in this file and for displayed distances
    pub unit: DistanceUnit,
    /// IANA zone name; abbreviations follow daylight saving
    pub timezone: String,
    /// Place name for alert all-clear messages
    pub place: String,
    /// NWS area code for the station
    pub state: String,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            label: defaults::CENTER_LABEL.to_string(),
            latitude: defaults::CENTER_LAT,
            longitude: defaults::CENTER_LON,
            unit: DistanceUnit::Miles,
            timezone: defaults::TIMEZONE.to_string(),
            place: defaults::CENTER_PLACE.to_string(),
            state: defaults::NWS_AREA.to_string(),
        }
    }
}

impl StationSection {
    /// Center point, not yet validated.
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lon: self.longitude,
        }
    }

    /// Falls back to UTC for a name `validate` would have rejected.
    pub fn display_zone(&self) -> DisplayZone {
        DisplayZone::named(&self.timezone).unwrap_or_else(|_| DisplayZone::utc())
    }

    /// Where alert runs are centred when no location is given.
    pub fn alert_location(&self) -> AlertLocation {
        AlertLocation {
            center: self.center(),
            state: self.state.trim().to_uppercase(),
            place: self.place.clone(),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// USB serial companion radio
    #[default]
    Serial,
    /// Bluetooth LE companion radio
    #[serde(alias = "wireless")]
    Ble,
    /// Companion radio reached over its TCP bridge
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub serial_path: PathBuf,
    pub baud_rate: u32,
    /// Radio MAC; empty means the first radio advertising `ble_name`
    pub ble_address: String,
    pub ble_name: String,
    /// Bonding PIN, entered in the system pairing agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_pin: Option<String>,
    pub host: String,
    pub port: u16,
    /// Also bounds the BLE scan
    pub connect_timeout_secs: u64,
    pub response_timeout_secs: u64,
    pub connect_attempts: u32,
    pub settle_delay_ms: u64,
    pub app_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Serial,
            serial_path: PathBuf::from(defaults::SERIAL_PATH),
            baud_rate: defaults::BAUD_RATE,
            ble_address: String::new(),
            ble_name: defaults::BLE_NAME.to_string(),
            ble_pin: None,
            host: String::new(),
            port: defaults::TCP_PORT,
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            response_timeout_secs: defaults::RESPONSE_TIMEOUT_SECS,
            connect_attempts: defaults::CONNECT_ATTEMPTS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            app_name: defaults::APP_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            multiplier: defaults::RETRY_MULTIPLIER,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

// ============================================================================
// Channels
// ============================================================================

/// One `[[channels]]` entry.
///
/// The secret comes from `secret` (32 hex chars) or, for public hashtag
/// channels, is derived from `hashtag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtag: Option<String>,
}

impl ChannelConfig {
    pub fn new(key: &str, name: &str, secret_hex: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            secret: Some(secret_hex.to_string()),
            hashtag: None,
        }
    }

    /// Configured secret, `None` when only a name is given.
    pub fn secret(&self) -> Result<Option<ChannelSecret>, String> {
        match (&self.secret, &self.hashtag) {
            (Some(_), Some(_)) => Err("set either secret or hashtag, not both".to_string()),
            (Some(hex), None) => ChannelSecret::from_hex(hex).map(Some),
            (None, Some(tag)) => Ok(Some(ChannelSecret::from_hashtag(tag))),
            (None, None) => Ok(None),
        }
    }
}

// ============================================================================
// Notification state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Json,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackendKind,
    pub path: PathBuf,
    pub retention_days: i64,
    /// Skip a reminder whose window opened longer ago than this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fire_tolerance_minutes: Option<i64>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackendKind::Json,
            path: PathBuf::from(defaults::STATE_PATH),
            retention_days: defaults::STATE_RETENTION_DAYS,
            fire_tolerance_minutes: None,
        }
    }
}

impl StateConfig {
    pub fn open_backend(&self) -> Result<Box<dyn StateBackend>, StateError> {
        Ok(match self.backend {
            StateBackendKind::Json => Box::new(JsonFileStateBackend::new(&self.path)),
            StateBackendKind::Sled => Box::new(SledStateBackend::open(&self.path)?),
        })
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn fire_tolerance(&self) -> Option<chrono::Duration> {
        self.fire_tolerance_minutes.map(chrono::Duration::minutes)
    }
}

// ============================================================================
// Feeds
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub quakes: QuakeFeedConfig,
    #[serde(default)]
    pub spots: SpotFeedConfig,
    #[serde(default)]
    pub alerts: AlertFeedConfig,
    #[serde(default)]
    pub solar: SolarFeedConfig,
    #[serde(default)]
    pub weather: WeatherFeedConfig,
    #[serde(default)]
    pub calendar: CalendarFeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuakeFeedConfig {
    pub url: String,
    pub search_radius_km: f64,
    pub min_magnitude: f64,
    pub lookback_hours: u32,
    pub radius: RadiusBand,
    pub limit: usize,
    pub delay_secs: f64,
    pub channel: String,
    /// Removed from USGS place names (", CA")
    pub strip_place_suffixes: Vec<String>,
}

impl Default for QuakeFeedConfig {
    fn default() -> Self {
        Self {
            url: defaults::USGS_URL.to_string(),
            search_radius_km: defaults::QUAKE_SEARCH_RADIUS_KM,
            min_magnitude: defaults::QUAKE_MIN_MAGNITUDE,
            lookback_hours: defaults::QUAKE_LOOKBACK_HOURS,
            radius: RadiusBand::within(defaults::QUAKE_MAX_RADIUS),
            limit: defaults::QUAKE_LIMIT,
            delay_secs: defaults::MESSAGE_DELAY_SECS,
            channel: defaults::PUBLIC_CHANNEL_KEY.to_string(),
            strip_place_suffixes: vec![", CA".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotFeedConfig {
    pub pota_url: String,
    pub sota_spots_url: String,
    pub sota_summit_url: String,
    pub sota_lookback_hours: u32,
    pub sota_associations: Vec<String>,
    pub hf: RadiusBand,
    pub vhf: RadiusBand,
    pub band: BandSelection,
    pub limit: usize,
    pub delay_secs: f64,
    pub channel: String,
}

impl Default for SpotFeedConfig {
    fn default() -> Self {
        Self {
            pota_url: defaults::POTA_SPOTS_URL.to_string(),
            sota_spots_url: defaults::SOTA_SPOTS_URL.to_string(),
            sota_summit_url: defaults::SOTA_SUMMIT_URL.to_string(),
            sota_lookback_hours: defaults::SOTA_LOOKBACK_HOURS,
            sota_associations: defaults::SOTA_ASSOCIATIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            hf: RadiusBand::within(defaults::HF_MAX_RADIUS),
            vhf: RadiusBand::within(defaults::VHF_MAX_RADIUS),
            band: BandSelection::All,
            limit: defaults::SPOT_LIMIT,
            delay_secs: defaults::MESSAGE_DELAY_SECS,
            channel: defaults::PUBLIC_CHANNEL_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFeedConfig {
    pub url: String,
    pub points_url: String,
    pub zip_url: String,
    pub user_agent: String,
    /// Center runs on this zip instead of the station
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    pub radius: RadiusBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
    /// Keep only events whose name contains one of these (case-insensitive)
    pub event_types: Vec<String>,
    pub skywarn_only: bool,
    /// Broadcast "No active alerts" when a run finds nothing
    pub send_clear: bool,
    pub limit: usize,
    pub delay_secs: f64,
    pub channel: String,
}

impl Default for AlertFeedConfig {
    fn default() -> Self {
        Self {
            url: defaults::NWS_ALERTS_URL.to_string(),
            points_url: defaults::NWS_POINTS_URL.to_string(),
            zip_url: defaults::ZIP_LOOKUP_URL.to_string(),
            user_agent: defaults::NWS_USER_AGENT.to_string(),
            zip: None,
            radius: RadiusBand::within(defaults::ALERT_MAX_RADIUS),
            min_severity: None,
            event_types: Vec::new(),
            skywarn_only: false,
            send_clear: false,
            limit: defaults::ALERT_LIMIT,
            delay_secs: defaults::MESSAGE_DELAY_SECS,
            channel: defaults::PUBLIC_CHANNEL_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarFeedConfig {
    /// HamQSL solar XML
    pub url: String,
    /// Open-Meteo forecast endpoint for the tropo index
    pub tropo_url: String,
    /// Add the VHF and tropo messages to every run
    pub vhf: bool,
    pub limit: usize,
    pub delay_secs: f64,
    pub channel: String,
}

impl Default for SolarFeedConfig {
    fn default() -> Self {
        Self {
            url: defaults::HAMQSL_URL.to_string(),
            tropo_url: defaults::OPEN_METEO_URL.to_string(),
            vhf: false,
            limit: defaults::SOLAR_LIMIT,
            delay_secs: defaults::MESSAGE_DELAY_SECS,
            channel: defaults::PUBLIC_CHANNEL_KEY.to_string(),
        }
    }
}

/// Weather Underground personal weather station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherStationConfig {
    pub id: String,
    /// Message heading; the station id when empty
    #[serde(default)]
    pub label: String,
}

/// Forecast-only location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCityConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl WeatherCityConfig {
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lon: self.longitude,
        }
    }
}

/// Which configured weather locations a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherSelection {
    /// Station ids to keep, all when empty (case-insensitive)
    pub station_ids: Vec<String>,
    /// City names to keep, all when empty (case-insensitive)
    pub city_names: Vec<String>,
    pub stations: bool,
    pub cities: bool,
}

impl WeatherSelection {
    pub fn all() -> Self {
        Self {
            stations: true,
            cities: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherFeedConfig {
    /// Weather Underground API key; `MESHCAST_WU_API_KEY` overrides it
    pub api_key: String,
    pub observation_url: String,
    pub forecast_url: String,
    pub stations: Vec<WeatherStationConfig>,
    pub cities: Vec<WeatherCityConfig>,
    pub limit: usize,
    pub delay_secs: f64,
    pub channel: String,
}

impl Default for WeatherFeedConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            observation_url: defaults::WU_OBSERVATION_URL.to_string(),
            forecast_url: defaults::WU_FORECAST_URL.to_string(),
            stations: Vec::new(),
            cities: Vec::new(),
            limit: defaults::WEATHER_LIMIT,
            delay_secs: defaults::MESSAGE_DELAY_SECS,
            channel: defaults::PUBLIC_CHANNEL_KEY.to_string(),
        }
    }
}

impl WeatherFeedConfig {
    /// Stations first, then cities, each in file order.
    pub fn locations(&self, selection: &WeatherSelection) -> Vec<WeatherLocation> {
        let wanted = |filter: &[String], name: &str| {
            filter.is_empty() || filter.iter().any(|f| f.trim().eq_ignore_ascii_case(name))
        };
        let stations = self
            .stations
            .iter()
            .filter(|_| selection.stations)
            .filter(|s| wanted(&selection.station_ids, &s.id))
            .map(|s| WeatherLocation::Station {
                id: s.id.clone(),
                label: if s.label.trim().is_empty() {
                    s.id.clone()
                } else {
                    s.label.clone()
                },
            });
        let cities = self
            .cities
            .iter()
            .filter(|_| selection.cities)
            .filter(|c| wanted(&selection.city_names, &c.name))
            .map(|c| WeatherLocation::City {
                name: c.name.clone(),
                center: c.center(),
            });
        stations.chain(cities).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarFeedConfig {
    /// Published CSV export of the events sheet
    pub csv_url: String,
    /// Used when an event row lists no channels
    pub default_channel: String,
    pub windows_hours: Vec<u32>,
    pub delay_secs: f64,
}

impl Default for CalendarFeedConfig {
    fn default() -> Self {
        Self {
            csv_url: String::new(),
            default_channel: defaults::PUBLIC_CHANNEL_KEY.to_string(),
            windows_hours: defaults::NOTIFICATION_WINDOWS_HOURS.to_vec(),
            delay_secs: defaults::CALENDAR_MESSAGE_DELAY_SECS,
        }
    }
}
