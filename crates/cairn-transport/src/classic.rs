//! Blocking socket transport: one connection per message.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cairn_wire::{ErrorNotice, Message, MessageBody};

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::error::TransportError;
use crate::queue::InboundQueue;
use crate::retry::connect_with_retry;

/// The blocking transport.
///
/// A single accept thread hands every inbound connection to a short-lived
/// handler thread that reads exactly one message to end-of-stream. Outbound
/// writes open a fresh connection per peer and message, retrying connect
/// failures up to the configured budget. Simple and robust; the loopback
/// transport exists for runs where per-message connections cost too much.
pub struct ClassicConnection {
    shared: Arc<Shared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    local_addr: SocketAddr,
    peers: Mutex<Vec<SocketAddr>>,
    connect_retries: u32,
    retry_delay: Duration,
    inbound: InboundQueue,
    closing: AtomicBool,
}

impl ClassicConnection {
    /// Binds the listener and starts accepting.
    pub fn open(config: &TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind).map_err(|source| TransportError::Bind {
            addr: config.bind,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            local_addr,
            peers: Mutex::new(config.peers.clone()),
            connect_retries: config.connect_retries,
            retry_delay: config.retry_delay,
            inbound: InboundQueue::new(),
            closing: AtomicBool::new(false),
        });

        let accept_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("classic-accept-{local_addr}"))
                .spawn(move || accept_loop(&listener, &shared))?
        };

        tracing::debug!(%local_addr, peers = config.peers.len(), "classic transport listening");
        Ok(Self {
            shared,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    /// The address the listener actually bound, after ephemeral-port
    /// resolution.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Registers another broadcast target after the connection was opened.
    ///
    /// Needed when peers bind ephemeral ports and learn each other's
    /// addresses only once everyone is listening.
    pub fn connect_peer(&self, addr: SocketAddr) {
        self.shared.lock_peers().push(addr);
    }
}

impl Connection for ClassicConnection {
    fn read(&self) -> Result<Message, TransportError> {
        self.shared.inbound.pop().ok_or(TransportError::Closed)
    }

    fn read_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        self.shared
            .inbound
            .pop_timeout(timeout)
            .map_err(|_| TransportError::Closed)
    }

    fn write(&self, message: &Message) -> Result<(), TransportError> {
        let bytes = message.to_json()?;
        let peers = self.shared.lock_peers().clone();
        for peer in peers {
            let started = Instant::now();
            let mut stream = connect_with_retry(
                peer,
                self.shared.connect_retries,
                self.shared.retry_delay,
            )?;
            stream.write_all(&bytes)?;
            stream.shutdown(std::net::Shutdown::Write)?;
            tracing::trace!(
                %peer,
                message = message.name(),
                bytes = bytes.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "sent message"
            );
        }
        Ok(())
    }

    fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        // The accept thread is parked in accept(); a throwaway connection
        // to ourselves wakes it so it can observe the closing flag.
        let _ = TcpStream::connect(self.shared.local_addr);
        if let Some(handle) = self
            .accept_thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        self.shared.inbound.close();
        tracing::debug!(local_addr = %self.shared.local_addr, "classic transport closed");
    }
}

impl Drop for ClassicConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn lock_peers(&self) -> std::sync::MutexGuard<'_, Vec<SocketAddr>> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn accept_loop(listener: &TcpListener, shared: &Arc<Shared>) {
    loop {
        match listener.accept() {
            Ok((stream, remote)) => {
                if shared.closing.load(Ordering::SeqCst) {
                    return;
                }
                let shared = Arc::clone(shared);
                let spawned = std::thread::Builder::new()
                    .name(format!("classic-handler-{remote}"))
                    .spawn(move || handle_inbound(stream, &shared));
                if let Err(error) = spawned {
                    tracing::warn!(%remote, %error, "failed to spawn handler thread");
                }
            }
            Err(error) => {
                if shared.closing.load(Ordering::SeqCst) {
                    return;
                }
                tracing::warn!(%error, "accept failed");
            }
        }
    }
}

/// Reads exactly one message from an inbound connection.
///
/// Malformed bytes do not kill the run silently: they become an `Error`
/// message on the same queue so the scheduler decides what to do.
fn handle_inbound(mut stream: TcpStream, shared: &Shared) {
    let mut bytes = Vec::new();
    let result = stream
        .read_to_end(&mut bytes)
        .map_err(TransportError::from)
        .and_then(|_| Message::from_json(&bytes).map_err(TransportError::from));
    match result {
        Ok(message) => {
            tracing::trace!(message = message.name(), bytes = bytes.len(), "received message");
            shared.inbound.push(message);
        }
        Err(error) => {
            tracing::warn!(%error, "failed to read inbound message");
            shared.inbound.push(Message::new(MessageBody::Error(ErrorNotice {
                origin: shared.local_addr.to_string(),
                cause: error.to_string(),
            })));
        }
    }
}
