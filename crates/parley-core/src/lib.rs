//! parley-core — shared wire format and configuration.
//! All other Parley crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{Handshake, Presence};
