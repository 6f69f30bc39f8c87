//! System-wide default constants.
//!
//! Every value here is also the built-in default of the matching
//! `meshcast.toml` field. Grouped by subsystem for easy discovery.

// ============================================================================
// Station
// ============================================================================

/// Default center point: San Jose, CA (grid CM97bg).
pub const CENTER_LAT: f64 = 37.3382;
pub const CENTER_LON: f64 = -121.8863;

/// Short label used in "42mi NE of SJC".
pub const CENTER_LABEL: &str = "SJC";

/// IANA zone for message timestamps and calendar rows.
pub const TIMEZONE: &str = "America/Los_Angeles";

/// Shown in the alert all-clear message.
pub const CENTER_PLACE: &str = "San Jose, CA";

// ============================================================================
// Transport
// ============================================================================

pub const SERIAL_PATH: &str = "/dev/ttyACM0";
pub const BAUD_RATE: u32 = 115_200;

/// TCP port of the companion radio's network bridge.
pub const TCP_PORT: u16 = 5000;

/// Advertised name prefix matched when no BLE address is configured.
pub const BLE_NAME: &str = "MeshCore";

pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Upper bound on waiting for any single radio reply (seconds).
pub const RESPONSE_TIMEOUT_SECS: u64 = 10;

pub const CONNECT_ATTEMPTS: u32 = 3;

/// Pause after the handshake before the first command (ms).
pub const SETTLE_DELAY_MS: u64 = 2_000;

/// Channel slots scanned on the radio.
pub const MAX_CHANNEL_SLOTS: u8 = 16;

pub const APP_NAME: &str = "meshcast";

// ============================================================================
// Retry
// ============================================================================

pub const RETRY_MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 2_000;
pub const RETRY_MULTIPLIER: f64 = 2.0;
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

// ============================================================================
// Channels
// ============================================================================

pub const PUBLIC_CHANNEL_KEY: &str = "public";
pub const PUBLIC_CHANNEL_NAME: &str = "Public";

/// Well-known secret of the MeshCore public channel.
pub const PUBLIC_CHANNEL_SECRET: &str = "8b3387e9c5cdea6ac9e5edbaa115cd72";

// ============================================================================
// Notification state
// ============================================================================

pub const STATE_PATH: &str = "meshcast_state.json";

/// Entries are purged this many days after their event.
pub const STATE_RETENTION_DAYS: i64 = 7;

/// Reminder lead times (hours before the event).
pub const NOTIFICATION_WINDOWS_HOURS: [u32; 2] = [24, 2];

// ============================================================================
// Feeds
// ============================================================================

/// HTTP timeout for feed requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// Seconds between successive broadcasts.
pub const MESSAGE_DELAY_SECS: f64 = 5.0;

/// Calendar reminders go out to several channels back to back.
pub const CALENDAR_MESSAGE_DELAY_SECS: f64 = 3.0;

pub const USGS_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";

/// Server-side search radius for the USGS query (100 mi).
pub const QUAKE_SEARCH_RADIUS_KM: f64 = 160.93;
pub const QUAKE_MIN_MAGNITUDE: f64 = 2.5;
pub const QUAKE_LOOKBACK_HOURS: u32 = 24;
pub const QUAKE_MAX_RADIUS: f64 = 100.0;
pub const QUAKE_LIMIT: usize = 10;

pub const POTA_SPOTS_URL: &str = "https://api.pota.app/spot/activator";
pub const SOTA_SPOTS_URL: &str = "https://api2.sota.org.uk/api/spots";
pub const SOTA_SUMMIT_URL: &str = "https://api2.sota.org.uk/api/summits";

/// SOTA spot lookback (hours).
pub const SOTA_LOOKBACK_HOURS: u32 = 2;

/// SOTA association prefixes worth a summit lookup.
pub const SOTA_ASSOCIATIONS: &[&str] = &[
    "W6", "W7", "W5", "W0", "W1", "W2", "W3", "W4", "W8", "W9", "VE", "XE",
];

pub const HF_MAX_RADIUS: f64 = 1000.0;
pub const VHF_MAX_RADIUS: f64 = 100.0;
pub const SPOT_LIMIT: usize = 10;

pub const NWS_ALERTS_URL: &str = "https://api.weather.gov/alerts/active";

/// NWS rejects requests without an identifying User-Agent.
pub const NWS_USER_AGENT: &str = "(meshcast alert broadcaster, ops@example.org)";
pub const NWS_AREA: &str = "CA";
pub const NWS_POINTS_URL: &str = "https://api.weather.gov/points";
pub const ZIP_LOOKUP_URL: &str = "https://api.zippopotam.us/us";
pub const ALERT_MAX_RADIUS: f64 = 50.0;
pub const ALERT_LIMIT: usize = 10;

/// Event types broadcast when `skywarn_only` is set.
pub const SKYWARN_EVENTS: &[&str] = &[
    "tornado warning",
    "tornado watch",
    "severe thunderstorm warning",
    "severe thunderstorm watch",
    "flash flood warning",
    "flash flood watch",
    "flood warning",
    "flood watch",
    "flood advisory",
    "special weather statement",
    "severe weather statement",
    "tornado emergency",
    "particularly dangerous situation",
];

pub const HAMQSL_URL: &str = "https://www.hamqsl.com/solarxml.php";
pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const SOLAR_LIMIT: usize = 6;

pub const WU_OBSERVATION_URL: &str = "https://api.weather.com/v2/pws/observations/current";
pub const WU_FORECAST_URL: &str = "https://api.weather.com/v3/wx/forecast/daily/5day";
pub const WEATHER_LIMIT: usize = 10;

/// Calendar CSV datetime column format (local time).
pub const CALENDAR_DATETIME_FORMAT: &str = "%Y-%m-%d %H%M";
