//! Station Configuration Module
//!
//! Every operator-tunable value (center point, radio link, channels,
//! feed endpoints and radii) loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `MESHCAST_CONFIG` environment variable (path to TOML file)
//! 2. `meshcast.toml` in the current working directory
//! 3. Built-in defaults from [`defaults`]
//!
//! The CLI loads one `StationConfig` at startup and passes the pieces each
//! component needs; there is no global.

pub mod defaults;
mod station_config;
pub mod validation;

pub use station_config::*;
