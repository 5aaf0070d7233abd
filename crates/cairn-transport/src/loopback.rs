//! Non-blocking socket transport with persistent connections.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use cairn_wire::{ErrorNotice, Message, MessageBody};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::error::TransportError;
use crate::queue::{InboundQueue, OutboundQueue, PushResult};
use crate::retry::connect_with_retry;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: Token = Token(2);

/// How long a writer sleeps before re-trying a full outbound queue.
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(1);

/// How long an idle sender thread sleeps before re-checking its queue.
const SENDER_IDLE_PAUSE: Duration = Duration::from_millis(2);

/// The non-blocking transport.
///
/// One `mio` event loop owns the listener and every inbound connection;
/// messages travel as length-delimited JSON frames over persistent TCP
/// streams. Each peer gets a dedicated sender thread draining a bounded
/// frame queue, so a slow peer backpressures its writer instead of growing
/// memory without bound.
pub struct LoopbackConnection {
    shared: Arc<Shared>,
    waker: Waker,
    event_thread: Mutex<Option<JoinHandle<()>>>,
    senders: Mutex<Vec<PeerSender>>,
}

struct Shared {
    local_addr: SocketAddr,
    connect_retries: u32,
    retry_delay: Duration,
    buffer_size: usize,
    outbound_queue_capacity: usize,
    inbound: InboundQueue,
    closing: AtomicBool,
}

struct PeerSender {
    addr: SocketAddr,
    queue: Arc<OutboundQueue>,
    handle: Option<JoinHandle<()>>,
}

impl LoopbackConnection {
    /// Binds the listener, starts the event loop, and spawns a sender
    /// thread per configured peer.
    pub fn open(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut listener = TcpListener::bind(config.bind).map_err(|source| TransportError::Bind {
            addr: config.bind,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        let shared = Arc::new(Shared {
            local_addr,
            connect_retries: config.connect_retries,
            retry_delay: config.retry_delay,
            buffer_size: config.buffer_size,
            outbound_queue_capacity: config.outbound_queue_capacity,
            inbound: InboundQueue::new(),
            closing: AtomicBool::new(false),
        });

        let event_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("loopback-events-{local_addr}"))
                .spawn(move || event_loop(poll, listener, &shared))?
        };

        let connection = Self {
            shared,
            waker,
            event_thread: Mutex::new(Some(event_thread)),
            senders: Mutex::new(Vec::new()),
        };
        for peer in &config.peers {
            connection.connect_peer(*peer)?;
        }
        tracing::debug!(%local_addr, peers = config.peers.len(), "loopback transport listening");
        Ok(connection)
    }

    /// The address the listener actually bound, after ephemeral-port
    /// resolution.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Registers another broadcast target and starts its sender thread.
    ///
    /// The TCP connection itself is opened lazily by the sender thread on
    /// the first frame, with the configured retry budget.
    pub fn connect_peer(&self, addr: SocketAddr) -> Result<(), TransportError> {
        let queue = Arc::new(OutboundQueue::new(self.shared.outbound_queue_capacity));
        let handle = {
            let queue = Arc::clone(&queue);
            let shared = Arc::clone(&self.shared);
            std::thread::Builder::new()
                .name(format!("loopback-sender-{addr}"))
                .spawn(move || sender_loop(addr, &queue, &shared))?
        };
        self.lock_senders().push(PeerSender {
            addr,
            queue,
            handle: Some(handle),
        });
        Ok(())
    }

    fn lock_senders(&self) -> std::sync::MutexGuard<'_, Vec<PeerSender>> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Connection for LoopbackConnection {
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
        let mut buf = BytesMut::new();
        message.encode_frame(&mut buf)?;
        let frame = buf.freeze();

        let senders = self.lock_senders();
        for sender in senders.iter() {
            let mut frame = frame.clone();
            loop {
                match sender.queue.push(frame) {
                    PushResult::Pushed => break,
                    PushResult::Closed => {
                        // The sender thread died and already reported the
                        // failure in-band; fail fast rather than wait for a
                        // drain that will never happen.
                        return Err(TransportError::PeerUnavailable { addr: sender.addr });
                    }
                    PushResult::Backpressure => {
                        if self.shared.closing.load(Ordering::SeqCst) {
                            return Err(TransportError::Closed);
                        }
                        tracing::trace!(peer = %sender.addr, "outbound queue full, backing off");
                        std::thread::sleep(BACKPRESSURE_PAUSE);
                        frame = self.frame_for_retry(message)?;
                    }
                }
            }
        }
        tracing::trace!(
            message = message.name(),
            bytes = frame.len(),
            peers = senders.len(),
            "queued message"
        );
        Ok(())
    }

    fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(error) = self.waker.wake() {
            tracing::warn!(%error, "failed to wake event loop");
        }
        if let Some(handle) = self
            .event_thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        for sender in self.lock_senders().iter_mut() {
            if let Some(handle) = sender.handle.take() {
                let _ = handle.join();
            }
        }
        self.shared.inbound.close();
        tracing::debug!(local_addr = %self.shared.local_addr, "loopback transport closed");
    }
}

impl LoopbackConnection {
    // Bytes::clone is cheap, but after a failed push the rejected frame was
    // consumed by the queue API; re-encode rather than hold two copies.
    fn frame_for_retry(&self, message: &Message) -> Result<Bytes, TransportError> {
        let mut buf = BytesMut::new();
        message.encode_frame(&mut buf)?;
        Ok(buf.freeze())
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Event loop (inbound)
// ============================================================================

struct InboundConnection {
    stream: TcpStream,
    buffer: BytesMut,
    remote: SocketAddr,
}

fn event_loop(mut poll: Poll, mut listener: TcpListener, shared: &Arc<Shared>) {
    let mut events = Events::with_capacity(128);
    let mut connections: HashMap<Token, InboundConnection> = HashMap::new();
    let mut next_token = FIRST_CONNECTION;

    loop {
        if let Err(error) = poll.poll(&mut events, None) {
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            report_fatal(shared, &error.to_string());
            return;
        }
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }

        for event in &events {
            match event.token() {
                LISTENER => {
                    accept_ready(&poll, &mut listener, &mut connections, &mut next_token, shared);
                }
                WAKER => {}
                token => {
                    if let Some(mut conn) = connections.remove(&token) {
                        if drain_readable(&mut conn, shared) {
                            connections.insert(token, conn);
                        } else {
                            let _ = poll.registry().deregister(&mut conn.stream);
                            tracing::trace!(remote = %conn.remote, "inbound connection closed");
                        }
                    }
                }
            }
        }
    }
}

fn accept_ready(
    poll: &Poll,
    listener: &mut TcpListener,
    connections: &mut HashMap<Token, InboundConnection>,
    next_token: &mut Token,
    shared: &Arc<Shared>,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, remote)) => {
                let token = *next_token;
                *next_token = Token(next_token.0 + 1);
                if let Err(error) = poll.registry().register(&mut stream, token, Interest::READABLE)
                {
                    tracing::warn!(%remote, %error, "failed to register inbound connection");
                    continue;
                }
                connections.insert(
                    token,
                    InboundConnection {
                        stream,
                        buffer: BytesMut::with_capacity(shared.buffer_size),
                        remote,
                    },
                );
                tracing::trace!(%remote, "accepted inbound connection");
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                tracing::warn!(%error, "accept failed");
                return;
            }
        }
    }
}

/// Reads everything currently available on a connection and decodes any
/// complete frames. Returns `false` once the peer hung up or the stream
/// went bad.
fn drain_readable(conn: &mut InboundConnection, shared: &Shared) -> bool {
    let mut chunk = [0u8; 8192];
    loop {
        match conn.stream.read(&mut chunk) {
            Ok(0) => return false,
            Ok(n) => {
                conn.buffer.extend_from_slice(&chunk[..n]);
                loop {
                    match Message::decode_frame(&mut conn.buffer) {
                        Ok(Some(message)) => {
                            tracing::trace!(
                                remote = %conn.remote,
                                message = message.name(),
                                "received message"
                            );
                            shared.inbound.push(message);
                        }
                        Ok(None) => break,
                        Err(error) => {
                            // A framing error desynchronizes the stream;
                            // drop the connection and let the scheduler
                            // decide whether the run survives.
                            report_fatal(shared, &error.to_string());
                            return false;
                        }
                    }
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return true,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                tracing::warn!(remote = %conn.remote, %error, "read failed");
                return false;
            }
        }
    }
}

fn report_fatal(shared: &Shared, cause: &str) {
    tracing::warn!(cause, "transport failure");
    shared.inbound.push(Message::new(MessageBody::Error(ErrorNotice {
        origin: shared.local_addr.to_string(),
        cause: cause.to_string(),
    })));
}

// ============================================================================
// Sender threads (outbound)
// ============================================================================

fn sender_loop(addr: SocketAddr, queue: &OutboundQueue, shared: &Shared) {
    let mut stream: Option<std::net::TcpStream> = None;
    loop {
        let Some(frame) = queue.pop() else {
            if shared.closing.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(SENDER_IDLE_PAUSE);
            continue;
        };
        if let Err(error) = send_frame(addr, &mut stream, &frame, shared) {
            report_fatal(shared, &error.to_string());
            queue.close();
            return;
        }
    }
}

fn send_frame(
    addr: SocketAddr,
    stream: &mut Option<std::net::TcpStream>,
    frame: &Bytes,
    shared: &Shared,
) -> Result<(), TransportError> {
    if stream.is_none() {
        *stream = Some(connect_with_retry(
            addr,
            shared.connect_retries,
            shared.retry_delay,
        )?);
        tracing::trace!(peer = %addr, "outbound connection established");
    }
    let connected = stream.as_mut().ok_or(TransportError::Closed)?;
    match connected.write_all(frame) {
        Ok(()) => Ok(()),
        Err(error) => {
            // The persistent connection went away; reconnect once and
            // replay the frame before giving up.
            tracing::debug!(peer = %addr, %error, "write failed, reconnecting");
            let mut fresh = connect_with_retry(addr, shared.connect_retries, shared.retry_delay)?;
            fresh.write_all(frame)?;
            *stream = Some(fresh);
            Ok(())
        }
    }
}
