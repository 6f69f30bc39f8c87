//! meshcast: situational-awareness broadcasts for MeshCore radio networks
//!
//! Pulls earthquakes, activator spots, weather alerts and scheduled events
//! from public feeds, keeps what is relevant to one station, and sends it
//! as short channel messages through a companion radio.
//!
//! ## Architecture
//!
//! - **Feeds**: `reqwest` adapters that normalize upstream payloads into [`types::Record`]s
//! - **Pipeline**: dedup, ring filter, ranking and the [`pipeline::Orchestrator`]
//! - **Encoder**: per-feed templates under the 135-byte payload limit
//! - **Transport**: companion-protocol framing over serial or TCP, channel lookup by secret
//! - **Storage**: notification ledger so each event reminder goes out once

pub mod config;
pub mod encoder;
pub mod feeds;
pub mod geo;
pub mod pipeline;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, StationConfig};

// Re-export the record model
pub use types::{BandSelection, Category, Message, Record, Severity, Source};

// Re-export pipeline entry points
pub use pipeline::{Orchestrator, PipelineError, RunConfig, RunReport};

// Re-export transport
pub use transport::{ChannelDirectory, TransportError, TransportSession};
