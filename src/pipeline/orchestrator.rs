//! Pipeline Orchestrator - one fetch-to-radio pass per invocation
//!
//! ```text
//! STEP 1: Fetch      every source; a failed source contributes nothing
//! STEP 2: Dedupe     one record per identity, newest wins
//! STEP 3: Filter     ring filter around the station center
//! STEP 4: Rank       category sort order, then the limit
//! STEP 5: Encode     template -> <=135-byte payload
//! STEP 6: Deliver    one radio session, paced sends, per-message retry
//! ```
//!
//! Calendar runs replace STEP 3-4 with notification-window gating and mark
//! the ledger only after a confirmed send.
//!
//! Only a failed connection (or an unwritable state store) fails a run.
//! Everything else is counted in the [`RunReport`] and logged.

use super::dedup::dedupe_records;
use super::ring_filter::{self, GeoFilterSpec};
use super::source::{self, RecordSource};
use super::PipelineError;
use crate::encoder::templates::{DisplayZone, EventTemplate};
use crate::encoder::{MessageEncoder, Template};
use crate::feeds::calendar::event_channels;
use crate::geo::{DistanceUnit, GeoPoint};
use crate::storage::{NotificationStateStore, NotificationWindow};
use crate::transport::{
    normalize_key, with_session, ChannelAddress, ChannelDirectory, ChannelError, ChannelSlot,
    Connector, SessionOptions, TransportSession,
};
use crate::types::{Message, Record};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// Run configuration
// ============================================================================

/// Ranking applied after filtering, before the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Nearest first, then newest (spots)
    #[default]
    Nearest,
    /// Highest magnitude first, then newest (quakes)
    Strongest,
    /// Highest severity first, then nearest (alerts)
    MostSevere,
    /// Earliest timestamp first (events)
    Soonest,
    /// Keep source order
    Unsorted,
}

impl SortOrder {
    fn compare(self, a: &Record, b: &Record) -> Ordering {
        let nearest = |a: &Record, b: &Record| {
            a.distance
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.distance.unwrap_or(f64::INFINITY))
        };
        match self {
            Self::Nearest => nearest(a, b).then_with(|| b.timestamp.cmp(&a.timestamp)),
            Self::Strongest => {
                let mag = |r: &Record| r.field_f64("mag").unwrap_or(0.0);
                mag(b)
                    .total_cmp(&mag(a))
                    .then_with(|| b.timestamp.cmp(&a.timestamp))
            }
            Self::MostSevere => b.severity.cmp(&a.severity).then_with(|| nearest(a, b)),
            Self::Soonest => a.timestamp.cmp(&b.timestamp),
            Self::Unsorted => Ordering::Equal,
        }
    }

    pub fn sort(self, records: &mut [Record]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

/// Per-invocation parameters for a feed run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Skip the radio entirely; everything else runs
    pub dry_run: bool,
    pub channel_key: String,
    pub limit: usize,
    pub inter_message_delay: Duration,
    pub center: GeoPoint,
    pub filter: GeoFilterSpec,
    pub unit: DistanceUnit,
    pub sort: SortOrder,
    /// Sent instead when nothing passes the filter and every source answered
    pub all_clear: Option<String>,
}

/// Per-invocation parameters for a calendar run.
#[derive(Debug, Clone)]
pub struct CalendarRunConfig {
    pub dry_run: bool,
    /// Send every reminder here instead of the event's own channels
    pub channel_override: Option<String>,
    /// Used for events that list no channels
    pub default_channel: String,
    pub windows: Vec<NotificationWindow>,
    /// Skip windows that opened longer ago than this
    pub fire_tolerance: Option<chrono::Duration>,
    pub inter_message_delay: Duration,
    pub zone: DisplayZone,
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub fetched: usize,
    pub deduped: usize,
    pub filtered: usize,
    pub encoded: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub messages: Vec<Message>,
    pub failed_sources: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct DeliveryTally {
    sent: usize,
    failed: usize,
}

/// One calendar reminder: the event, the window being announced and the
/// longer windows it supersedes.
struct Reminder {
    event_id: String,
    instant: DateTime<Utc>,
    windows: Vec<NotificationWindow>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    connector: Box<dyn Connector>,
    options: SessionOptions,
    directory: ChannelDirectory,
    encoder: MessageEncoder,
}

impl Orchestrator {
    pub fn new(
        connector: Box<dyn Connector>,
        options: SessionOptions,
        directory: ChannelDirectory,
        encoder: MessageEncoder,
    ) -> Self {
        Self {
            connector,
            options,
            directory,
            encoder,
        }
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.directory
    }

    /// Fetch, dedupe, filter, rank, encode and deliver one feed run.
    ///
    /// A run with nothing to send returns `Ok` without touching the radio.
    pub async fn run(
        &self,
        sources: &[Box<dyn RecordSource>],
        template: &dyn Template,
        config: &RunConfig,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();

        // STEP 1
        let (records, failed_sources) = source::collect(sources).await;
        report.fetched = records.len();
        report.failed_sources = failed_sources;

        // STEP 2
        let records = dedupe_records(records);
        report.deduped = records.len();

        // STEP 3
        let (mut records, stats) =
            ring_filter::filter(records, config.center, &config.filter, config.unit)?;
        report.filtered = records.len();
        debug!(?stats, "Ring filter applied");

        // STEP 4
        config.sort.sort(&mut records);
        records.truncate(config.limit);

        // STEP 5
        for record in &records {
            match self.encoder.encode(record, template) {
                Ok(body) => report.messages.push(Message {
                    channel_key: config.channel_key.clone(),
                    body,
                    label: template.label(record),
                }),
                Err(e) => {
                    warn!(
                        identity = %record.identity,
                        error = %e,
                        "Dropping record that encoded empty"
                    );
                    report.skipped += 1;
                }
            }
        }
        if records.is_empty() {
            if let Some(text) = &config.all_clear {
                self.push_all_clear(&mut report, text, &config.channel_key);
            }
        }
        report.encoded = report.messages.len();

        info!(
            fetched = report.fetched,
            deduped = report.deduped,
            filtered = report.filtered,
            encoded = report.encoded,
            "Pipeline ready to deliver"
        );

        // STEP 6
        if config.dry_run {
            Self::preview(&report.messages);
            return Ok(report);
        }
        let tally = self
            .deliver(&report.messages, config.inter_message_delay, &mut |_| Ok(()))
            .await?;
        report.sent = tally.sent;
        report.failed = tally.failed;
        Ok(report)
    }

    /// Queue the all-clear text, unless a source failed: an outage must not
    /// read as "no active alerts".
    fn push_all_clear(&self, report: &mut RunReport, text: &str, channel_key: &str) {
        if !report.failed_sources.is_empty() {
            warn!(failed = ?report.failed_sources, "Withholding all-clear after source failure");
            return;
        }
        match self.encoder.encode_text(text) {
            Ok(body) => report.messages.push(Message {
                channel_key: channel_key.to_string(),
                body,
                label: "All clear".to_string(),
            }),
            Err(e) => warn!(error = %e, "All-clear text encoded empty"),
        }
    }

    /// Broadcast calendar reminders whose window is due.
    ///
    /// When several windows of one event are due together only the shortest
    /// lead is announced; the longer ones are marked with it. The ledger is
    /// saved after every confirmed send.
    pub async fn run_calendar(
        &self,
        sources: &[Box<dyn RecordSource>],
        store: &mut NotificationStateStore,
        config: &CalendarRunConfig,
        now: DateTime<Utc>,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();
        let (records, failed_sources) = source::collect(sources).await;
        report.fetched = records.len();
        report.failed_sources = failed_sources;

        let mut records = dedupe_records(records);
        report.deduped = records.len();
        SortOrder::Soonest.sort(&mut records);

        let mut reminders: Vec<Reminder> = Vec::new();
        // message index -> reminder index
        let mut owner: Vec<usize> = Vec::new();

        for record in &records {
            let Some(window) = self.due_windows(store, config, record, now) else {
                continue;
            };
            report.filtered += 1;
            let (announce, superseded) = window;

            let channels = self.route(record, config);
            if channels.is_empty() {
                warn!(event = %record.identity, "Event has no configured channel, skipping");
                report.skipped += 1;
                continue;
            }

            let template = EventTemplate {
                zone: config.zone.clone(),
                window_hours: announce.lead_hours(),
            };
            let body = match self.encoder.encode(record, &template) {
                Ok(body) => body,
                Err(e) => {
                    warn!(
                        event = %record.identity,
                        error = %e,
                        "Dropping event that encoded empty"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let reminder_idx = reminders.len();
            let mut windows = superseded;
            windows.push(announce);
            reminders.push(Reminder {
                event_id: record.identity.clone(),
                instant: record.timestamp,
                windows,
            });
            for channel in channels {
                owner.push(reminder_idx);
                report.messages.push(Message {
                    channel_key: channel,
                    body: body.clone(),
                    label: template.label(record),
                });
            }
        }
        report.encoded = report.messages.len();
        info!(
            events = report.deduped,
            due = report.filtered,
            messages = report.encoded,
            "Calendar reminders ready"
        );

        if config.dry_run {
            Self::preview(&report.messages);
            return Ok(report);
        }

        let mut mark = |idx: usize| -> Result<(), PipelineError> {
            let reminder = &reminders[owner[idx]];
            for window in &reminder.windows {
                store.mark_sent(&reminder.event_id, reminder.instant, *window, now);
            }
            store.save()?;
            Ok(())
        };
        let tally = self
            .deliver(&report.messages, config.inter_message_delay, &mut mark)
            .await?;
        store.save()?;

        report.sent = tally.sent;
        report.failed = tally.failed;
        Ok(report)
    }

    /// Due windows for one event: the one to announce plus any longer
    /// windows it supersedes. `None` when nothing is due.
    fn due_windows(
        &self,
        store: &NotificationStateStore,
        config: &CalendarRunConfig,
        record: &Record,
        now: DateTime<Utc>,
    ) -> Option<(NotificationWindow, Vec<NotificationWindow>)> {
        let mut due: Vec<NotificationWindow> = config
            .windows
            .iter()
            .copied()
            .filter(|w| store.is_due(&record.identity, *w, now, record.timestamp))
            .filter(|w| match config.fire_tolerance {
                Some(tolerance) if now - w.threshold(record.timestamp) > tolerance => {
                    debug!(
                        event = %record.identity,
                        window = %w,
                        "Window opened too long ago, skipping"
                    );
                    false
                }
                _ => true,
            })
            .collect();
        due.sort();
        if due.is_empty() {
            return None;
        }
        let announce = due.remove(0);
        Some((announce, due))
    }

    fn route(&self, record: &Record, config: &CalendarRunConfig) -> Vec<String> {
        if let Some(channel) = &config.channel_override {
            return vec![normalize_key(channel)];
        }
        event_channels(record, &config.default_channel)
            .into_iter()
            .filter(|key| {
                let known = self.directory.contains(key);
                if !known {
                    warn!(event = %record.identity, channel = %key, "Dropping unknown channel");
                }
                known
            })
            .collect()
    }

    /// Deliver a single free-text message.
    pub async fn send_text(
        &self,
        channel_key: &str,
        text: &str,
        dry_run: bool,
    ) -> Result<RunReport, PipelineError> {
        if !self.directory.contains(channel_key) {
            return Err(ChannelError::UnknownKey {
                key: channel_key.to_string(),
                known: self.directory.keys().collect::<Vec<_>>().join(", "),
            }
            .into());
        }
        let body = self.encoder.encode_text(text)?;
        let mut report = RunReport {
            encoded: 1,
            messages: vec![Message {
                channel_key: channel_key.to_string(),
                body,
                label: "text".to_string(),
            }],
            ..RunReport::default()
        };
        if dry_run {
            Self::preview(&report.messages);
            return Ok(report);
        }
        let tally = self
            .deliver(&report.messages, Duration::ZERO, &mut |_| Ok(()))
            .await?;
        report.sent = tally.sent;
        report.failed = tally.failed;
        Ok(report)
    }

    /// Live channel slots, each with the configured key it matches by secret.
    pub async fn list_channels(
        &self,
    ) -> Result<Vec<(ChannelSlot, Option<String>)>, PipelineError> {
        let slots = with_session(
            self.connector.as_ref(),
            self.options.clone(),
            |mut session| async move {
                let slots = session.list_channels().await;
                (session, slots)
            },
        )
        .await??;
        Ok(slots
            .into_iter()
            .map(|slot| {
                let key = self.directory.key_for_slot(&slot).map(str::to_string);
                (slot, key)
            })
            .collect())
    }

    fn preview(messages: &[Message]) {
        for (i, message) in messages.iter().enumerate() {
            info!(
                n = i + 1,
                channel = %message.channel_key,
                label = %message.label,
                bytes = message.body.len(),
                "[dry run] would send:\n{}",
                message.body
            );
        }
    }

    // ------------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------------

    /// Send `messages` over one session. `on_sent` runs after each confirmed
    /// delivery with the message index.
    async fn deliver(
        &self,
        messages: &[Message],
        delay: Duration,
        on_sent: &mut dyn FnMut(usize) -> Result<(), PipelineError>,
    ) -> Result<DeliveryTally, PipelineError> {
        let mut tally = DeliveryTally::default();

        // Unknown keys never need the radio.
        let mut pending: Vec<usize> = Vec::with_capacity(messages.len());
        for (i, message) in messages.iter().enumerate() {
            if self.directory.contains(&message.channel_key) {
                pending.push(i);
            } else {
                warn!(
                    channel = %message.channel_key,
                    label = %message.label,
                    "Channel key not configured, message dropped"
                );
                tally.failed += 1;
            }
        }
        if pending.is_empty() {
            return Ok(tally);
        }

        let directory = &self.directory;
        let sent = with_session(
            self.connector.as_ref(),
            self.options.clone(),
            |mut session| async move {
                let outcome =
                    Self::deliver_on(&mut session, directory, messages, &pending, delay, on_sent)
                        .await;
                (session, outcome)
            },
        )
        .await??;

        tally.sent += sent.sent;
        tally.failed += sent.failed;
        Ok(tally)
    }

    async fn deliver_on(
        session: &mut TransportSession,
        directory: &ChannelDirectory,
        messages: &[Message],
        pending: &[usize],
        delay: Duration,
        on_sent: &mut dyn FnMut(usize) -> Result<(), PipelineError>,
    ) -> Result<DeliveryTally, PipelineError> {
        let live = session.list_channels().await?;
        let mut addresses: HashMap<String, Result<ChannelAddress, ChannelError>> = HashMap::new();
        let mut tally = DeliveryTally::default();

        for (n, &idx) in pending.iter().enumerate() {
            let message = &messages[idx];
            if n > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let resolved = addresses
                .entry(normalize_key(&message.channel_key))
                .or_insert_with(|| directory.resolve(&message.channel_key, &live));
            let address = match resolved {
                Ok(address) => address.clone(),
                Err(e) => {
                    error!(
                        channel = %message.channel_key,
                        label = %message.label,
                        error = %e,
                        "Cannot resolve channel"
                    );
                    tally.failed += 1;
                    continue;
                }
            };

            match session.send(&address, &message.body).await {
                Ok(()) => {
                    info!(
                        channel = %address.key,
                        slot = address.index,
                        label = %message.label,
                        "Sent {}/{}",
                        n + 1,
                        pending.len()
                    );
                    tally.sent += 1;
                    on_sent(idx)?;
                }
                Err(e) if e.is_connection_failure() => return Err(e.into()),
                Err(e) => {
                    warn!(label = %message.label, error = %e, "Message not delivered");
                    tally.failed += 1;
                }
            }
        }

        Ok(tally)
    }
}
