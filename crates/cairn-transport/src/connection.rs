//! The connection contract shared by all transports.

use std::time::Duration;

use cairn_wire::Message;

use crate::TransportError;

/// An ordered channel between analysis participants.
///
/// Opened once per scheduler run and closed exactly once at shutdown.
/// `write` broadcasts to every peer; delivery is attempted at least once
/// per message, with no de-duplication and no cross-pair ordering
/// guarantee.
pub trait Connection: Send + Sync {
    /// Receives the next message, blocking until one is available.
    ///
    /// Returns [`TransportError::Closed`] once the connection has been
    /// closed and the queue drained.
    fn read(&self) -> Result<Message, TransportError>;

    /// Receives the next message, or `None` if the queue stays empty for
    /// the full timeout.
    ///
    /// The scheduler uses the timeout variant to detect quiescence without
    /// busy-waiting.
    fn read_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError>;

    /// Broadcasts a message to all peers.
    fn write(&self, message: &Message) -> Result<(), TransportError>;

    /// Closes the connection, releasing all sockets and threads.
    ///
    /// Idempotent; later calls are no-ops.
    fn close(&self);
}
