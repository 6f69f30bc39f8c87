//! Notification ledger for time-windowed event reminders.
//!
//! Records which lead-time windows have already been broadcast for each
//! scheduled event so that every `(event, window)` pair goes out at most
//! once, across process restarts.
//!
//! Lifecycle per run: `load` (purges stale entries) → `is_due` /
//! `mark_sent` in memory → `save` through the backend. The calendar run
//! saves after every confirmed send.

use super::backend::{StateBackend, StateError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Entries are kept this long past their event instant (days).
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Lead time before an event at which a reminder becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationWindow {
    hours: u32,
}

impl NotificationWindow {
    pub const DAY_BEFORE: Self = Self { hours: 24 };
    pub const TWO_HOURS: Self = Self { hours: 2 };

    /// Default reminder schedule, longest lead first.
    pub const DEFAULTS: [Self; 2] = [Self::DAY_BEFORE, Self::TWO_HOURS];

    pub const fn hours(hours: u32) -> Self {
        Self { hours }
    }

    pub fn lead_hours(self) -> u32 {
        self.hours
    }

    pub fn lead(self) -> Duration {
        Duration::hours(i64::from(self.hours))
    }

    /// Instant at which this window opens for an event.
    pub fn threshold(self, event_instant: DateTime<Utc>) -> DateTime<Utc> {
        event_instant - self.lead()
    }
}

impl fmt::Display for NotificationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours)
    }
}

/// Ledger entry for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub event_instant: DateTime<Utc>,
    #[serde(default)]
    pub windows_sent: BTreeSet<NotificationWindow>,
    pub created_at: DateTime<Utc>,
}

impl NotificationEntry {
    pub fn new(event_instant: DateTime<Utc>, created_at: DateTime<Utc>) -> Self {
        Self {
            event_instant,
            windows_sent: BTreeSet::new(),
            created_at,
        }
    }
}

/// Persisted form: event ID → entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationState {
    #[serde(default)]
    pub entries: BTreeMap<String, NotificationEntry>,
}

/// In-memory ledger bound to a backend.
pub struct NotificationStateStore {
    state: NotificationState,
    backend: Box<dyn StateBackend>,
    dirty: bool,
}

impl NotificationStateStore {
    /// Load from `backend` and drop entries older than `retention` past their event.
    pub fn load(
        backend: Box<dyn StateBackend>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<Self, StateError> {
        let state = backend.load()?.unwrap_or_default();
        info!(
            backend = backend.backend_name(),
            entries = state.entries.len(),
            "Loaded notification state"
        );
        let mut store = Self {
            state,
            backend,
            dirty: false,
        };
        store.purge_expired(now, retention);
        Ok(store)
    }

    /// True iff the window has opened, the event is still ahead, and the
    /// pair has not been sent yet.
    pub fn is_due(
        &self,
        event_id: &str,
        window: NotificationWindow,
        now: DateTime<Utc>,
        event_instant: DateTime<Utc>,
    ) -> bool {
        if event_instant <= now {
            return false;
        }
        if now < window.threshold(event_instant) {
            return false;
        }
        !self.is_sent(event_id, window)
    }

    pub fn is_sent(&self, event_id: &str, window: NotificationWindow) -> bool {
        self.state
            .entries
            .get(event_id)
            .is_some_and(|e| e.windows_sent.contains(&window))
    }

    /// Record `(event_id, window)` as sent. Repeated calls change nothing.
    pub fn mark_sent(
        &mut self,
        event_id: &str,
        event_instant: DateTime<Utc>,
        window: NotificationWindow,
        now: DateTime<Utc>,
    ) {
        let entry = self
            .state
            .entries
            .entry(event_id.to_string())
            .or_insert_with(|| NotificationEntry::new(event_instant, now));
        if entry.windows_sent.insert(window) {
            debug!(event = %event_id, window = %window, "Marked notification sent");
            self.dirty = true;
        }
    }

    /// Remove entries whose event instant is older than `now - retention`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        let before = self.state.entries.len();
        self.state.entries.retain(|_, e| e.event_instant >= cutoff);
        let removed = before - self.state.entries.len();
        if removed > 0 {
            info!(removed, "Purged expired notification records");
            self.dirty = true;
        }
        removed
    }

    /// Persist through the backend if anything changed since the last save.
    pub fn save(&mut self) -> Result<(), StateError> {
        if !self.dirty {
            return Ok(());
        }
        self.backend.save(&self.state)?;
        self.dirty = false;
        Ok(())
    }

    /// Forget everything, in memory and in the backend.
    pub fn reset(&mut self) -> Result<(), StateError> {
        self.state.entries.clear();
        self.backend.clear()?;
        self.dirty = false;
        Ok(())
    }

    pub fn sent_windows(&self, event_id: &str) -> Option<&BTreeSet<NotificationWindow>> {
        self.state.entries.get(event_id).map(|e| &e.windows_sent)
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryStateBackend;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 10, h, m, 0).unwrap()
    }

    fn event() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 11, 18, 0, 0).unwrap()
    }

    fn store(backend: &MemoryStateBackend, now: DateTime<Utc>) -> NotificationStateStore {
        NotificationStateStore::load(
            Box::new(backend.clone()),
            now,
            Duration::days(DEFAULT_RETENTION_DAYS),
        )
        .unwrap()
    }

    #[test]
    fn not_due_before_threshold() {
        let s = store(&MemoryStateBackend::new(), t(0, 0));
        // Threshold for 24h window is 2030-06-10 18:00
        assert!(!s.is_due("ev", NotificationWindow::DAY_BEFORE, t(17, 59), event()));
        assert!(s.is_due("ev", NotificationWindow::DAY_BEFORE, t(18, 0), event()));
        assert!(s.is_due("ev", NotificationWindow::DAY_BEFORE, t(23, 0), event()));
    }

    #[test]
    fn never_due_for_past_events() {
        let s = store(&MemoryStateBackend::new(), t(0, 0));
        let past = t(1, 0);
        assert!(!s.is_due("ev", NotificationWindow::TWO_HOURS, t(2, 0), past));
        assert!(!s.is_due("ev", NotificationWindow::TWO_HOURS, past, past));
    }

    #[test]
    fn mark_sent_then_not_due() {
        let mut s = store(&MemoryStateBackend::new(), t(0, 0));
        let now = t(18, 5);
        assert!(s.is_due("ev", NotificationWindow::DAY_BEFORE, now, event()));
        s.mark_sent("ev", event(), NotificationWindow::DAY_BEFORE, now);
        assert!(!s.is_due("ev", NotificationWindow::DAY_BEFORE, now, event()));
        // Other window unaffected
        let later = event() - Duration::minutes(90);
        assert!(s.is_due("ev", NotificationWindow::TWO_HOURS, later, event()));
    }

    #[test]
    fn mark_sent_is_idempotent() {
        let mut s = store(&MemoryStateBackend::new(), t(0, 0));
        s.mark_sent("ev", event(), NotificationWindow::DAY_BEFORE, t(18, 5));
        s.save().unwrap();
        assert!(!s.is_dirty());
        s.mark_sent("ev", event(), NotificationWindow::DAY_BEFORE, t(19, 0));
        assert!(!s.is_dirty());
        assert_eq!(s.sent_windows("ev").unwrap().len(), 1);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn survives_restart() {
        let backend = MemoryStateBackend::new();
        let now = t(18, 5);
        {
            let mut s = store(&backend, now);
            s.mark_sent("ev", event(), NotificationWindow::DAY_BEFORE, now);
            s.save().unwrap();
        }
        let reloaded = store(&backend, now);
        assert!(!reloaded.is_due("ev", NotificationWindow::DAY_BEFORE, now, event()));
    }

    #[test]
    fn purge_removes_old_events_only() {
        let backend = MemoryStateBackend::new();
        let mut s = store(&backend, t(0, 0));
        let old_event = event() - Duration::days(30);
        s.mark_sent("old", old_event, NotificationWindow::TWO_HOURS, old_event);
        s.mark_sent("new", event(), NotificationWindow::DAY_BEFORE, t(18, 0));
        let removed = s.purge_expired(event(), Duration::days(7));
        assert_eq!(removed, 1);
        assert!(s.sent_windows("old").is_none());
        assert!(s.sent_windows("new").is_some());
    }

    #[test]
    fn purge_on_load() {
        let backend = MemoryStateBackend::new();
        {
            let mut s = store(&backend, t(0, 0));
            s.mark_sent("ev", event(), NotificationWindow::DAY_BEFORE, t(18, 0));
            s.save().unwrap();
        }
        let much_later = event() + Duration::days(8);
        let s = store(&backend, much_later);
        assert!(s.is_empty());
        assert!(s.is_dirty());
    }

    #[test]
    fn reset_clears_backend() {
        let backend = MemoryStateBackend::new();
        let mut s = store(&backend, t(0, 0));
        s.mark_sent("ev", event(), NotificationWindow::DAY_BEFORE, t(18, 0));
        s.save().unwrap();
        s.reset().unwrap();
        assert!(s.is_empty());
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn window_serializes_as_hours() {
        let json = serde_json::to_string(&NotificationWindow::DAY_BEFORE).unwrap();
        assert_eq!(json, "24");
        assert_eq!(NotificationWindow::TWO_HOURS.to_string(), "2h");
    }
}
