//! Scheduled events from a published spreadsheet CSV
//!
//! Expected header: `EventDatetime,EventName,Description,Channels`.
//! `EventDatetime` is wall time in the station's zone (`2025-03-04 1900`);
//! `Channels` is a comma-separated list of channel keys. Quoted fields may
//! span lines, as spreadsheet exports of multi-line cells do.

use super::FeedClient;
use crate::config::defaults::CALENDAR_DATETIME_FORMAT;
use crate::pipeline::source::{FetchError, RecordSource};
use crate::transport::normalize_key;
use crate::types::{Category, Record, Source};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

const COL_DATETIME: &str = "EventDatetime";
const COL_NAME: &str = "EventName";
const COL_DESCRIPTION: &str = "Description";
const COL_CHANNELS: &str = "Channels";

/// One row of the events sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub instant: DateTime<Utc>,
    pub name: String,
    pub description: String,
    /// Normalized channel keys as listed, possibly empty
    pub channels: Vec<String>,
}

impl CalendarEvent {
    /// Stable ledger key: event instant plus name.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.instant.to_rfc3339(), self.name)
    }

    pub fn into_record(self) -> Record {
        Record::new(self.identity(), Source::Calendar, Category::Event, self.instant)
            .with_field("name", self.name)
            .with_field("description", self.description)
            .with_field("channels", self.channels.join(","))
    }
}

/// Channel keys listed on a record, or `default` when none are.
pub fn event_channels(record: &Record, default: &str) -> Vec<String> {
    let listed: Vec<String> = record
        .field("channels")
        .split(',')
        .map(normalize_key)
        .filter(|k| !k.is_empty())
        .collect();
    if listed.is_empty() {
        vec![normalize_key(default)]
    } else {
        listed
    }
}

pub struct CalendarSource {
    pub client: FeedClient,
    pub csv_url: String,
    /// Zone of the sheet's wall-clock times
    pub tz: Tz,
}

#[async_trait]
impl RecordSource for CalendarSource {
    fn name(&self) -> &str {
        "calendar"
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        if self.csv_url.trim().is_empty() {
            return Err(FetchError::Decode(
                "feeds.calendar.csv_url is not configured".into(),
            ));
        }
        let text = self.client.get_text(&self.csv_url).await?;
        Ok(parse_events(&text, self.tz)?
            .into_iter()
            .map(CalendarEvent::into_record)
            .collect())
    }
}

// ============================================================================
// CSV parsing
// ============================================================================

fn decode_error(e: &csv::Error) -> FetchError {
    FetchError::Decode(format!("calendar CSV: {e}"))
}

/// Parse the events sheet. Rows with a bad datetime or no name are skipped,
/// as are times that fall in a daylight-saving gap.
pub fn parse_events(text: &str, tz: Tz) -> Result<Vec<CalendarEvent>, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let header = reader.headers().map_err(|e| decode_error(&e))?.clone();
    if header.is_empty() {
        return Err(FetchError::Decode("calendar CSV is empty".into()));
    }
    let column = |name: &str| header.iter().position(|h| h == name);
    let (Some(dt_col), Some(name_col)) = (column(COL_DATETIME), column(COL_NAME)) else {
        return Err(FetchError::Decode(format!(
            "calendar CSV needs {COL_DATETIME} and {COL_NAME} columns"
        )));
    };
    let desc_col = column(COL_DESCRIPTION);
    let chan_col = column(COL_CHANNELS);

    let mut events = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "Skipping malformed calendar row");
                continue;
            }
        };
        let line = row.position().map_or(0, csv::Position::line);
        let get = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or("").to_string();

        let raw_dt = get(Some(dt_col));
        let Some(instant) = NaiveDateTime::parse_from_str(&raw_dt, CALENDAR_DATETIME_FORMAT)
            .ok()
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        else {
            warn!(line, value = %raw_dt, "Skipping event with unusable datetime");
            continue;
        };
        let name = get(Some(name_col));
        if name.is_empty() {
            warn!(line, "Skipping event without a name");
            continue;
        }
        let channels = get(chan_col)
            .split(',')
            .map(normalize_key)
            .filter(|k| !k.is_empty())
            .collect();

        events.push(CalendarEvent {
            instant: instant.with_timezone(&Utc),
            name,
            description: get(desc_col),
            channels,
        });
    }
    Ok(events)
}

/// Events in `[now, now + days]`, soonest first.
pub fn upcoming(records: &[Record], now: DateTime<Utc>, days: i64) -> Vec<&Record> {
    let cutoff = now + Duration::days(days);
    let mut out: Vec<&Record> = records
        .iter()
        .filter(|r| r.timestamp >= now && r.timestamp <= cutoff)
        .collect();
    out.sort_by_key(|r| r.timestamp);
    out
}
