//! Radio transport: framing, links, channel lookup and the send session.

pub mod ble;
pub mod channels;
pub mod codec;
pub mod link;
pub mod session;

pub use channels::{
    normalize_key, ChannelAddress, ChannelDirectory, ChannelError, ChannelSecret, ChannelSlot,
    MatchKind,
};
pub use link::{Connector, Link, LinkConnector, SimulatedRadio};
pub use session::{with_session, RetryPolicy, SessionOptions, SessionState, TransportSession};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish a session. Fatal for the whole run.
    #[error("connection failed after {attempts} attempt(s): {reason}")]
    ConnectionError { attempts: u32, reason: String },

    /// A message could not be delivered after all retries.
    #[error("delivery to '{channel}' failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed {
        channel: String,
        attempts: u32,
        reason: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("radio rejected {command} (code {code:?})")]
    Rejected {
        command: &'static str,
        code: Option<u8>,
    },

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// Connection-level failures abort the run; everything else is per message.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionError { .. })
    }

    /// Whether this is the response timeout of the named command.
    pub fn is_timeout_of(&self, command: &str) -> bool {
        matches!(self, Self::Timeout { operation, .. } if *operation == command)
    }
}
