//! # cairn-transport: Message transports for `Cairn`
//!
//! Two interchangeable implementations of the [`Connection`] contract carry
//! protocol messages between analysis participants:
//!
//! - [`LoopbackConnection`] — a non-blocking, `mio`-driven transport with
//!   one event-loop listener per participant and a dedicated sender thread
//!   per peer. Messages travel as length-delimited JSON frames over
//!   persistent TCP streams. Used when all participants run in one process
//!   or one directly addressable machine pool.
//! - [`ClassicConnection`] — a blocking transport: one accept thread per
//!   participant, one handler thread per inbound connection reading a
//!   single message to end-of-stream. Every outbound send opens a fresh
//!   connection and retries connect failures up to a bounded count before
//!   escalating to a fatal error.
//! - [`ChannelConnection`] — a purely in-memory loopback for
//!   single-process runs and tests.
//!
//! The transports promise an at-least-once delivery *attempt* per message
//! and nothing about ordering or de-duplication; stale messages are
//! filtered at the receiver via block-version checks, not here.

mod channel;
mod classic;
mod config;
mod connection;
mod error;
mod loopback;
mod queue;
mod retry;

#[cfg(test)]
mod tests;

pub use channel::ChannelConnection;
pub use classic::ClassicConnection;
pub use config::TransportConfig;
pub use connection::Connection;
pub use error::TransportError;
pub use loopback::LoopbackConnection;
pub use retry::connect_with_retry;
