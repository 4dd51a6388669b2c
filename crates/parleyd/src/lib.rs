//! parleyd — rendezvous relay broker.
//!
//! Participants connect, name themselves and the peer they want, and the
//! broker forwards newline-delimited text between the pair.

pub mod session;

pub use session::listener::SessionListener;
