//! Broadcast Pipeline Module
//!
//! ```text
//! sources ─► dedup ─► ring_filter ─► rank/limit ─► encoder ─► transport
//!  (feeds)                                                 (one session)
//! ```
//!
//! [`source`] is the seam every feed adapter plugs into; [`orchestrator`]
//! drives one run end to end.

pub mod dedup;
pub mod orchestrator;
pub mod ring_filter;
pub mod source;

pub use dedup::{callsign_key, dedupe, dedupe_records, quake_key};
pub use orchestrator::{CalendarRunConfig, Orchestrator, RunConfig, RunReport, SortOrder};
pub use ring_filter::{GeoFilterSpec, RadiusBand, RingFilterStats};
pub use source::{collect, FetchError, RecordSource};

use crate::encoder::EncodeError;
use crate::geo::GeoError;
use crate::storage::StateError;
use crate::transport::{ChannelError, TransportError};
use thiserror::Error;

/// Anything that can stop or degrade a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The station center itself is not a valid coordinate.
    #[error("invalid station center: {0}")]
    InvalidCenter(#[from] GeoError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("notification state: {0}")]
    State(#[from] StateError),
}

impl PipelineError {
    /// True when the run cannot continue at all.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connection_failure(),
            Self::InvalidCenter(_) | Self::State(_) => true,
            Self::Fetch(_) | Self::Channel(_) | Self::Encode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        let refused = PipelineError::from(TransportError::ConnectionError {
            attempts: 3,
            reason: "refused".into(),
        });
        assert!(refused.is_fatal());

        let undelivered = PipelineError::from(TransportError::DeliveryFailed {
            channel: "public".into(),
            attempts: 3,
            reason: "ERR".into(),
        });
        assert!(!undelivered.is_fatal());

        let missing = PipelineError::from(ChannelError::ChannelNotFound {
            key: "sjc".into(),
            name: "SJC".into(),
        });
        assert!(!missing.is_fatal());
        let bad_center = GeoError::InvalidCoordinate { lat: 91.0, lon: 0.0 };
        assert!(PipelineError::from(bad_center).is_fatal());
    }
}
