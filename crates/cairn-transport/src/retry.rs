//! Bounded connect retry shared by the socket transports.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::TransportError;

/// Connects to `addr`, retrying up to `retries` additional times with
/// `delay` between attempts.
///
/// Peers start in no particular order, so early connect refusals are
/// expected and absorbed here. Once the budget is spent the last I/O error
/// escalates as [`TransportError::RetriesExhausted`]; the run must stop
/// rather than silently drop the message.
pub fn connect_with_retry(
    addr: SocketAddr,
    retries: u32,
    delay: Duration,
) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for attempt in 0..=retries {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                if attempt > 0 {
                    tracing::debug!(%addr, attempt, "connected after retry");
                }
                return Ok(stream);
            }
            Err(error) => {
                tracing::trace!(%addr, attempt, %error, "connect attempt failed");
                last_error = Some(error);
                if attempt < retries {
                    std::thread::sleep(delay);
                }
            }
        }
    }
    Err(TransportError::RetriesExhausted {
        addr,
        attempts: retries + 1,
        source: last_error
            .unwrap_or_else(|| std::io::Error::other("no connect attempt was made")),
    })
}
