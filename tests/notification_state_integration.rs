//! Notification State Integration Tests
//!
//! Event reminders across simulated process restarts, with the ledger on
//! disk in a temp directory.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use meshcast::config::ChannelConfig;
use meshcast::encoder::templates::DisplayZone;
use meshcast::encoder::MessageEncoder;
use meshcast::feeds::calendar::{parse_events, CalendarEvent};
use meshcast::pipeline::source::StaticSource;
use meshcast::pipeline::{CalendarRunConfig, Orchestrator, RecordSource};
use meshcast::storage::{
    JsonFileStateBackend, NotificationStateStore, NotificationWindow, SledStateBackend,
    StateBackend,
};
use meshcast::transport::{
    ChannelDirectory, ChannelSecret, RetryPolicy, SessionOptions, SimulatedRadio,
};
use std::path::Path;
use std::time::Duration;

const PUBLIC_HEX: &str = "8b3387e9c5cdea6ac9e5edbaa115cd72";
const CLUB_HEX: &str = "c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1";

const SHEET: &str = "EventDatetime,EventName,Description,Channels\n\
    2025-03-04 1900,Club Meeting,Monthly meeting at the EOC,\"public, club\"\n\
    2025-03-09 0900,Swap Meet,,\n";

fn pacific() -> Tz {
    chrono_tz::America::Los_Angeles
}

fn radio() -> SimulatedRadio {
    SimulatedRadio::with_channels(&[
        ("Public", ChannelSecret::from_hex(PUBLIC_HEX).unwrap()),
        ("Club", ChannelSecret::from_hex(CLUB_HEX).unwrap()),
    ])
}

fn orchestrator(radio: &SimulatedRadio) -> Orchestrator {
    let directory = ChannelDirectory::new(&[
        ChannelConfig::new("public", "Public", PUBLIC_HEX),
        ChannelConfig::new("club", "Club", CLUB_HEX),
    ])
    .unwrap();
    Orchestrator::new(
        Box::new(radio.clone()),
        SessionOptions {
            connect_attempts: 1,
            response_timeout: Duration::from_millis(50),
            settle_delay: Duration::ZERO,
            app_name: "integration".to_string(),
            retry: RetryPolicy::fixed(1, Duration::from_millis(1)),
        },
        directory,
        MessageEncoder::default(),
    )
}

fn sources() -> Vec<Box<dyn RecordSource>> {
    let records = parse_events(SHEET, pacific())
        .unwrap()
        .into_iter()
        .map(CalendarEvent::into_record)
        .collect();
    vec![Box::new(StaticSource::new("calendar", records))]
}

fn run_config() -> CalendarRunConfig {
    CalendarRunConfig {
        dry_run: false,
        channel_override: None,
        default_channel: "public".to_string(),
        windows: NotificationWindow::DEFAULTS.to_vec(),
        fire_tolerance: None,
        inter_message_delay: Duration::ZERO,
        zone: DisplayZone::new(pacific()),
    }
}

fn json_store(path: &Path, now: DateTime<Utc>) -> NotificationStateStore {
    NotificationStateStore::load(
        Box::new(JsonFileStateBackend::new(path)),
        now,
        ChronoDuration::days(7),
    )
    .unwrap()
}

/// Club Meeting is 2025-03-05T03:00Z.
fn meeting_minus(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 5, 3, 0, 0).unwrap() - ChronoDuration::hours(hours)
}

#[tokio::test]
async fn each_window_fires_once_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let radio = radio();
    let orch = orchestrator(&radio);

    // Day-before window: both listed channels.
    let now = meeting_minus(23);
    let mut store = json_store(&path, now);
    let report = orch.run_calendar(&sources(), &mut store, &run_config(), now).await.unwrap();
    assert_eq!(report.sent, 2);
    drop(store);

    // Restart 15 minutes later: nothing new.
    let now = meeting_minus(23) + ChronoDuration::minutes(15);
    let mut store = json_store(&path, now);
    let report = orch.run_calendar(&sources(), &mut store, &run_config(), now).await.unwrap();
    assert_eq!(report.sent, 0);
    drop(store);

    // Two-hour window.
    let now = meeting_minus(1);
    let mut store = json_store(&path, now);
    let report = orch.run_calendar(&sources(), &mut store, &run_config(), now).await.unwrap();
    assert_eq!(report.sent, 2);
    drop(store);

    let delivered = radio.delivered();
    assert_eq!(delivered.len(), 4);
    assert!(delivered[0].1.starts_with("EVENT TOMORROW:"));
    assert!(delivered[2].1.starts_with("EVENT IN 2 HOURS:"));
    assert_eq!(
        delivered.iter().map(|(slot, _)| *slot).collect::<Vec<_>>(),
        vec![0, 1, 0, 1]
    );

    // After the event passes nothing fires, and retention eventually purges it.
    let later = meeting_minus(-24 * 8);
    let store = json_store(&path, later);
    assert!(store.is_empty());
}

#[tokio::test]
async fn channel_override_and_default_channel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let radio = radio();
    let orch = orchestrator(&radio);

    // Swap Meet lists no channels: default routing. 09:00 on 9 March is
    // already daylight time.
    let swap_meet = Utc.with_ymd_and_hms(2025, 3, 9, 16, 0, 0).unwrap();
    let now = swap_meet - ChronoDuration::hours(20);
    let mut store = json_store(&path, now);
    let report = orch.run_calendar(&sources(), &mut store, &run_config(), now).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(radio.delivered()[0].0, 0);

    // Override routes everything to one channel.
    let now = swap_meet - ChronoDuration::hours(1);
    let config = CalendarRunConfig {
        channel_override: Some("Club".to_string()),
        ..run_config()
    };
    let report = orch.run_calendar(&sources(), &mut store, &config, now).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(radio.delivered()[1].0, 1);
}

#[test]
fn sled_and_json_backends_agree() {
    let dir = tempfile::tempdir().unwrap();
    let now = meeting_minus(23);
    let backends: Vec<Box<dyn StateBackend>> = vec![
        Box::new(JsonFileStateBackend::new(dir.path().join("state.json"))),
        Box::new(SledStateBackend::open(dir.path().join("state.sled")).unwrap()),
    ];

    for backend in backends {
        let name = backend.backend_name();
        let mut store =
            NotificationStateStore::load(backend, now, ChronoDuration::days(7)).unwrap();
        assert!(store.is_due("meeting", NotificationWindow::DAY_BEFORE, now, meeting_minus(0)));
        store.mark_sent("meeting", meeting_minus(0), NotificationWindow::DAY_BEFORE, now);
        store.mark_sent("meeting", meeting_minus(0), NotificationWindow::DAY_BEFORE, now);
        assert!(!store.is_due("meeting", NotificationWindow::DAY_BEFORE, now, meeting_minus(0)));
        store.save().unwrap();
        assert_eq!(store.len(), 1, "{name}");
    }

    // Reopen both from disk.
    let json = NotificationStateStore::load(
        Box::new(JsonFileStateBackend::new(dir.path().join("state.json"))),
        now,
        ChronoDuration::days(7),
    )
    .unwrap();
    let sled = NotificationStateStore::load(
        Box::new(SledStateBackend::open(dir.path().join("state.sled")).unwrap()),
        now,
        ChronoDuration::days(7),
    )
    .unwrap();
    for store in [json, sled] {
        assert!(store.is_sent("meeting", NotificationWindow::DAY_BEFORE));
        assert!(!store.is_sent("meeting", NotificationWindow::TWO_HOURS));
    }
}
