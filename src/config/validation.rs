//! Config validation: unknown-key detection with Levenshtein suggestions
//! and plausibility checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use super::StationConfig;
use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Dotted key paths accepted in `meshcast.toml`.
///
/// Maintained by hand alongside station_config.rs. Entries of
/// `[[channels]]` share the `channels.*` paths.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [station]
        "station",
        "station.label",
        "station.latitude",
        "station.longitude",
        "station.unit",
        "station.timezone",
        "station.place",
        "station.state",
        // [transport]
        "transport",
        "transport.kind",
        "transport.serial_path",
        "transport.baud_rate",
        "transport.ble_address",
        "transport.ble_name",
        "transport.ble_pin",
        "transport.host",
        "transport.port",
        "transport.connect_timeout_secs",
        "transport.response_timeout_secs",
        "transport.connect_attempts",
        "transport.settle_delay_ms",
        "transport.app_name",
        // [retry]
        "retry",
        "retry.max_attempts",
        "retry.base_delay_ms",
        "retry.multiplier",
        "retry.max_delay_ms",
        // [[channels]]
        "channels",
        "channels.key",
        "channels.name",
        "channels.secret",
        "channels.hashtag",
        // [state]
        "state",
        "state.backend",
        "state.path",
        "state.retention_days",
        "state.fire_tolerance_minutes",
        // [feeds]
        "feeds",
        // [feeds.quakes]
        "feeds.quakes",
        "feeds.quakes.url",
        "feeds.quakes.search_radius_km",
        "feeds.quakes.min_magnitude",
        "feeds.quakes.lookback_hours",
        "feeds.quakes.radius",
        "feeds.quakes.radius.min",
        "feeds.quakes.radius.max",
        "feeds.quakes.limit",
        "feeds.quakes.delay_secs",
        "feeds.quakes.channel",
        "feeds.quakes.strip_place_suffixes",
        // [feeds.spots]
        "feeds.spots",
        "feeds.spots.pota_url",
        "feeds.spots.sota_spots_url",
        "feeds.spots.sota_summit_url",
        "feeds.spots.sota_lookback_hours",
        "feeds.spots.sota_associations",
        "feeds.spots.hf",
        "feeds.spots.hf.min",
        "feeds.spots.hf.max",
        "feeds.spots.vhf",
        "feeds.spots.vhf.min",
        "feeds.spots.vhf.max",
        "feeds.spots.band",
        "feeds.spots.limit",
        "feeds.spots.delay_secs",
        "feeds.spots.channel",
        // [feeds.alerts]
        "feeds.alerts",
        "feeds.alerts.url",
        "feeds.alerts.points_url",
        "feeds.alerts.zip_url",
        "feeds.alerts.user_agent",
        "feeds.alerts.zip",
        "feeds.alerts.radius",
        "feeds.alerts.radius.min",
        "feeds.alerts.radius.max",
        "feeds.alerts.min_severity",
        "feeds.alerts.event_types",
        "feeds.alerts.skywarn_only",
        "feeds.alerts.send_clear",
        "feeds.alerts.limit",
        "feeds.alerts.delay_secs",
        "feeds.alerts.channel",
        // [feeds.solar]
        "feeds.solar",
        "feeds.solar.url",
        "feeds.solar.tropo_url",
        "feeds.solar.vhf",
        "feeds.solar.limit",
        "feeds.solar.delay_secs",
        "feeds.solar.channel",
        // [feeds.weather]
        "feeds.weather",
        "feeds.weather.api_key",
        "feeds.weather.observation_url",
        "feeds.weather.forecast_url",
        "feeds.weather.stations",
        "feeds.weather.stations.id",
        "feeds.weather.stations.label",
        "feeds.weather.cities",
        "feeds.weather.cities.name",
        "feeds.weather.cities.latitude",
        "feeds.weather.cities.longitude",
        "feeds.weather.limit",
        "feeds.weather.delay_secs",
        "feeds.weather.channel",
        // [feeds.calendar]
        "feeds.calendar",
        "feeds.calendar.csv_url",
        "feeds.calendar.default_channel",
        "feeds.calendar.windows_hours",
        "feeds.calendar.delay_secs",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields
/// `["a", "a.b", "a.c"]`. Tables inside arrays are walked under the
/// array's own path.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        for nested in walk_toml_keys(item, &path) {
                            if !keys.contains(&nested) {
                                keys.push(nested);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every key in `raw_toml` that the config does not know.
///
/// Parse errors return no warnings; serde reports them afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Plausibility
// ============================================================================

/// Radii beyond half the Earth's circumference in miles admit everything.
const MAX_USEFUL_RADIUS: f64 = 12_500.0;

/// Pauses longer than this make a run take many minutes.
const SLOW_DELAY_SECS: f64 = 60.0;

/// Values that parse and validate but are probably mistakes.
pub fn validate_plausibility(config: &StationConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let f = &config.feeds;

    for (field, band) in [
        ("feeds.quakes.radius", &f.quakes.radius),
        ("feeds.spots.hf", &f.spots.hf),
        ("feeds.spots.vhf", &f.spots.vhf),
        ("feeds.alerts.radius", &f.alerts.radius),
    ] {
        if band.max > MAX_USEFUL_RADIUS {
            warnings.push(ValidationWarning {
                field: field.to_string(),
                message: format!("{field}.max = {} admits every location on Earth", band.max),
                suggestion: None,
            });
        }
    }

    for (field, delay) in [
        ("feeds.quakes.delay_secs", f.quakes.delay_secs),
        ("feeds.spots.delay_secs", f.spots.delay_secs),
        ("feeds.alerts.delay_secs", f.alerts.delay_secs),
        ("feeds.solar.delay_secs", f.solar.delay_secs),
        ("feeds.weather.delay_secs", f.weather.delay_secs),
        ("feeds.calendar.delay_secs", f.calendar.delay_secs),
    ] {
        if delay > SLOW_DELAY_SECS {
            warnings.push(ValidationWarning {
                field: field.to_string(),
                message: format!("{field} = {delay} is unusually long"),
                suggestion: None,
            });
        }
    }

    let w = &f.weather;
    if (!w.stations.is_empty() || !w.cities.is_empty()) && w.api_key.trim().is_empty() {
        warnings.push(ValidationWarning {
            field: "feeds.weather.api_key".to_string(),
            message: "feeds.weather.api_key is empty, the weather command needs \
                      MESHCAST_WU_API_KEY"
                .to_string(),
            suggestion: None,
        });
    }

    if config.feeds.calendar.csv_url.trim().is_empty() {
        warnings.push(ValidationWarning {
            field: "feeds.calendar.csv_url".to_string(),
            message: "feeds.calendar.csv_url is empty, the calendar command will fail".to_string(),
            suggestion: None,
        });
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("retry", "retry"), 0);
        assert_eq!(levenshtein("lattitude", "latitude"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [feeds.spots]
            hf = { min = 0.0, max = 500.0 }
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"feeds".to_string()));
        assert!(keys.contains(&"feeds.spots".to_string()));
        assert!(keys.contains(&"feeds.spots.hf.max".to_string()));
    }

    #[test]
    fn test_walk_toml_keys_array_of_tables() {
        let toml: toml::Value = r#"
            [[channels]]
            key = "public"
            [[channels]]
            key = "sjc"
            hashtag = "sjc"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert_eq!(keys.iter().filter(|k| *k == "channels.key").count(), 1);
        assert!(keys.contains(&"channels.hashtag".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys(
            r#"
[station]
lattitude = 37.0
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some("station.latitude"));
        assert!(warnings[0].to_string().contains("did you mean 'station.latitude'"));
    }

    #[test]
    fn test_typo_inside_channel_entry() {
        let warnings = validate_unknown_keys(
            r#"
[[channels]]
key = "public"
secrett = "8b3387e9c5cdea6ac9e5edbaa115cd72"
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some("channels.secret"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let warnings = validate_unknown_keys(
            r#"
[station]
label = "SJC"
unit = "kilometers"

[transport]
kind = "tcp"
host = "192.168.1.20"

[[channels]]
key = "public"
name = "Public"

[feeds.alerts]
radius = { max = 40.0 }
skywarn_only = true
send_clear = true

[feeds.solar]
vhf = true

[[feeds.weather.stations]]
id = "KCASANJO823"
label = "Willow Glen"

[[feeds.weather.cities]]
name = "Santa Cruz"
latitude = 36.9741
longitude = -122.0308
"#,
        );
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_default_config_keys_are_all_known() {
        let text = StationConfig::default().to_toml().unwrap();
        let warnings = validate_unknown_keys(&text);
        assert!(warnings.is_empty(), "unlisted keys: {warnings:?}");
    }

    #[test]
    fn test_plausibility_flags_huge_radius() {
        let mut config = StationConfig::default();
        config.feeds.spots.hf.max = 50_000.0;
        let warnings = validate_plausibility(&config);
        assert!(warnings.iter().any(|w| w.field == "feeds.spots.hf"));
    }

    #[test]
    fn test_plausibility_flags_weather_without_key() {
        let mut config = StationConfig::default();
        config.feeds.weather.cities.push(crate::config::WeatherCityConfig {
            name: "Santa Cruz".to_string(),
            latitude: 36.9741,
            longitude: -122.0308,
        });
        let warnings = validate_plausibility(&config);
        assert!(warnings.iter().any(|w| w.field == "feeds.weather.api_key"));
    }

    #[test]
    fn test_plausibility_defaults_only_warn_about_calendar_url() {
        let warnings = validate_plausibility(&StationConfig::default());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "feeds.calendar.csv_url");
    }
}
