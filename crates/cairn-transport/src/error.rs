//! Transport error types.

use std::net::SocketAddr;

use cairn_wire::WireError;

/// Errors from the message transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying OS I/O error.
    #[error("transport I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Message could not be encoded or decoded.
    #[error("wire error: {source}")]
    Wire {
        #[from]
        source: WireError,
    },

    /// Binding the local listener failed.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// All bounded connect attempts to a peer failed.
    ///
    /// Non-recoverable: the caller must stop the run rather than drop the
    /// message silently.
    #[error("connecting to {addr} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        addr: SocketAddr,
        attempts: u32,
        source: std::io::Error,
    },

    /// A peer's sender shut down after an unrecoverable send failure;
    /// messages for that peer are no longer accepted.
    #[error("peer {addr} is unreachable, no longer accepting messages for it")]
    PeerUnavailable { addr: SocketAddr },

    /// The connection was closed.
    #[error("connection closed")]
    Closed,
}
