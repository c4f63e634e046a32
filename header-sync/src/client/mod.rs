//! Client-facing configuration.

pub mod config;

pub use config::{ChainParams, Network, SyncConfig};
