//! parley-services — connection handles and the session registry shared by
//! the broker's per-connection tasks.

pub mod connection;
pub mod registry;

pub use connection::{Connection, ConnectionReader};
pub use registry::{SessionEntry, SessionRegistry, SharedRegistry};
