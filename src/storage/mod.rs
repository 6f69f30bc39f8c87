//! Persistent notification state
//!
//! The ledger of which event reminders have gone out, and the backends that
//! keep it between runs.

pub mod backend;
pub mod notification_state;

pub use backend::{
    JsonFileStateBackend, MemoryStateBackend, SledStateBackend, StateBackend, StateError,
};
pub use notification_state::{
    NotificationEntry, NotificationState, NotificationStateStore, NotificationWindow,
    DEFAULT_RETENTION_DAYS,
};
