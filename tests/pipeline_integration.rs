//! Pipeline Integration Tests
//!
//! Drives the public API end to end against the simulated radio: records in,
//! frames out. No network and no hardware.

use chrono::{TimeZone, Utc};
use meshcast::config::ChannelConfig;
use meshcast::encoder::templates::{DisplayZone, QuakeTemplate, SpotTemplate};
use meshcast::encoder::{MessageEncoder, MAX_MESSAGE_BYTES};
use meshcast::geo::{DistanceUnit, GeoPoint};
use meshcast::pipeline::source::StaticSource;
use meshcast::pipeline::{
    dedupe_records, GeoFilterSpec, Orchestrator, RadiusBand, RecordSource, RunConfig, SortOrder,
};
use meshcast::transport::{
    ChannelDirectory, ChannelError, ChannelSecret, MatchKind, RetryPolicy, SessionOptions,
    SimulatedRadio, TransportSession,
};
use meshcast::types::{Category, Record, Source};
use std::time::Duration;

const ALPHA_HEX: &str = "0123456789abcdef0123456789abcdef";
const OTHER_HEX: &str = "fedcba9876543210fedcba9876543210";

fn fast_options() -> SessionOptions {
    SessionOptions {
        connect_attempts: 2,
        response_timeout: Duration::from_millis(50),
        settle_delay: Duration::ZERO,
        app_name: "integration".to_string(),
        retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
    }
}

fn directory() -> ChannelDirectory {
    ChannelDirectory::new(&[ChannelConfig::new("alpha", "Alpha", ALPHA_HEX)]).unwrap()
}

fn center() -> GeoPoint {
    GeoPoint::new(37.3382, -121.8863).unwrap()
}

fn quake(identity: &str, lat: f64, lon: f64, mag: &str, minute: u32) -> Record {
    Record::new(
        identity,
        Source::Usgs,
        Category::Quake,
        Utc.with_ymd_and_hms(2025, 2, 11, 11, minute, 0).unwrap(),
    )
    .with_location(lat, lon)
    .with_field("mag", mag)
    .with_field("place", "5 km SW of Ridgemark, CA")
}

fn quake_template() -> QuakeTemplate {
    QuakeTemplate {
        zone: DisplayZone::new(chrono_tz::America::Los_Angeles),
        center_label: "SJC".to_string(),
        unit: DistanceUnit::Miles,
        strip_place_suffixes: vec![", CA".to_string()],
    }
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[tokio::test]
async fn five_raw_records_become_one_message() {
    let radio = SimulatedRadio::with_channels(&[(
        "Alpha Channel",
        ChannelSecret::from_hex(ALPHA_HEX).unwrap(),
    )]);
    let orch = Orchestrator::new(
        Box::new(radio.clone()),
        fast_options(),
        directory(),
        MessageEncoder::default(),
    );

    // Three reports of one quake (two stale duplicates), one far away, one
    // with a latitude off the globe.
    let sources: Vec<Box<dyn RecordSource>> = vec![
        Box::new(StaticSource::new(
            "feed-a",
            vec![
                quake("nc1", 36.78, -121.41, "3.3", 34),
                quake("nc1", 36.78, -121.41, "3.1", 30),
            ],
        )),
        Box::new(StaticSource::new(
            "feed-b",
            vec![
                quake("nc1", 36.78, -121.41, "3.2", 32),
                quake("ak9", 61.2, -149.9, "4.0", 10),
                quake("bad", 95.0, -121.0, "2.9", 5),
            ],
        )),
    ];
    let config = RunConfig {
        dry_run: false,
        channel_key: "alpha".to_string(),
        limit: 10,
        inter_message_delay: Duration::ZERO,
        center: center(),
        filter: GeoFilterSpec::default().with_band(Category::Quake, RadiusBand::within(100.0)),
        unit: DistanceUnit::Miles,
        sort: SortOrder::Strongest,
        all_clear: None,
    };

    let report = orch.run(&sources, &quake_template(), &config).await.unwrap();
    assert_eq!(report.fetched, 5);
    assert_eq!(report.deduped, 3);
    assert_eq!(report.filtered, 1);
    assert_eq!(report.encoded, 1);
    assert_eq!(report.sent, 1);

    let delivered = radio.delivered();
    assert_eq!(delivered.len(), 1);
    let (slot, body) = &delivered[0];
    assert_eq!(*slot, 0);
    assert!(body.contains("M3.3"), "newest report wins: {body}");
    assert!(body.len() <= MAX_MESSAGE_BYTES);
    assert_eq!(radio.lock().open_links, 0, "session released");
}

#[tokio::test]
async fn dry_run_renders_without_a_radio() {
    // No channel slots at all: a real send would fail to resolve.
    let radio = SimulatedRadio::new();
    let orch = Orchestrator::new(
        Box::new(radio.clone()),
        fast_options(),
        directory(),
        MessageEncoder::default(),
    );
    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(StaticSource::new(
        "feed",
        vec![quake("nc1", 36.78, -121.41, "3.3", 34)],
    ))];
    let config = RunConfig {
        dry_run: true,
        channel_key: "alpha".to_string(),
        limit: 5,
        inter_message_delay: Duration::from_secs(30),
        center: center(),
        filter: GeoFilterSpec::default(),
        unit: DistanceUnit::Miles,
        sort: SortOrder::Strongest,
        all_clear: None,
    };
    let report = orch.run(&sources, &quake_template(), &config).await.unwrap();
    assert_eq!(report.messages.len(), 1);
    assert!(report.messages[0].body.starts_with("EARTHQUAKE"));
    assert_eq!(radio.lock().opens, 0);
}

#[tokio::test]
async fn cross_feed_spots_collapse_by_callsign() {
    let t = |m| Utc.with_ymd_and_hms(2025, 6, 1, 2, m, 0).unwrap();
    let pota = Record::new("K6ABC", Source::Pota, Category::Hf, t(5))
        .with_location(37.18, -121.55)
        .with_field("callsign", "K6ABC/P");
    let sota = Record::new("K6ABC", Source::Sota, Category::Hf, t(9))
        .with_location(37.34, -121.64)
        .with_field("callsign", "K6ABC");
    let out = dedupe_records(vec![pota, sota]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].source, Source::Sota);

    let radio =
        SimulatedRadio::with_channels(&[("Alpha", ChannelSecret::from_hex(ALPHA_HEX).unwrap())]);
    let orch = Orchestrator::new(
        Box::new(radio.clone()),
        fast_options(),
        directory(),
        MessageEncoder::default(),
    );
    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(StaticSource::new("spots", out))];
    let template = SpotTemplate {
        zone: DisplayZone::new(chrono_tz::America::Los_Angeles),
        center_label: "SJC".to_string(),
        unit: DistanceUnit::Miles,
    };
    let config = RunConfig {
        dry_run: false,
        channel_key: "Alpha".to_string(),
        limit: 10,
        inter_message_delay: Duration::ZERO,
        center: center(),
        filter: GeoFilterSpec::default().with_band(Category::Hf, RadiusBand::within(1000.0)),
        unit: DistanceUnit::Miles,
        sort: SortOrder::Nearest,
        all_clear: None,
    };
    let report = orch.run(&sources, &template, &config).await.unwrap();
    assert_eq!(report.sent, 1);
    assert!(radio.delivered()[0].1.starts_with("SOTA"));
}

// ============================================================================
// Channel resolution against live slots
// ============================================================================

#[tokio::test]
async fn channel_resolves_by_secret_under_a_different_name() {
    let radio = SimulatedRadio::with_channels(&[
        ("Public", ChannelSecret::from_hex(OTHER_HEX).unwrap()),
        ("Alpha Channel", ChannelSecret::from_hex(ALPHA_HEX).unwrap()),
    ]);
    let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();
    let live = session.list_channels().await.unwrap();
    session.disconnect().await;

    let address = directory().resolve("alpha", &live).unwrap();
    assert_eq!(address.index, 1);
    assert_eq!(address.live_name, "Alpha Channel");
    assert_eq!(address.matched_by, MatchKind::Secret);
}

#[tokio::test]
async fn channel_without_secret_or_name_match_is_not_found() {
    let radio =
        SimulatedRadio::with_channels(&[("Public", ChannelSecret::from_hex(OTHER_HEX).unwrap())]);
    let mut session =
        tokio_test::assert_ok!(TransportSession::connect(&radio, fast_options()).await);
    let live = session.list_channels().await.unwrap();
    session.disconnect().await;

    let err = directory().resolve("alpha", &live).unwrap_err();
    assert!(matches!(err, ChannelError::ChannelNotFound { .. }));
}
