//! In-memory transport for single-process runs and tests.

use std::sync::Arc;
use std::time::Duration;

use cairn_wire::Message;

use crate::connection::Connection;
use crate::error::TransportError;
use crate::queue::InboundQueue;

/// A purely in-memory connection that delivers every written message back
/// to its own inbound queue.
///
/// When scheduler and workers share one process they also share one
/// `ChannelConnection`; the write side is the worker's completion channel
/// and the read side is the scheduler's event source. Cloning yields
/// another handle to the same queue.
#[derive(Clone)]
pub struct ChannelConnection {
    queue: Arc<InboundQueue>,
}

impl ChannelConnection {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(InboundQueue::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Default for ChannelConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for ChannelConnection {
    fn read(&self) -> Result<Message, TransportError> {
        self.queue.pop().ok_or(TransportError::Closed)
    }

    fn read_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        self.queue
            .pop_timeout(timeout)
            .map_err(|_| TransportError::Closed)
    }

    fn write(&self, message: &Message) -> Result<(), TransportError> {
        if self.queue.push(message.clone()) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn close(&self) {
        self.queue.close();
    }
}
