//! Queues shared between transport threads and the scheduler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cairn_wire::Message;
use crossbeam_queue::ArrayQueue;

/// Blocking inbound queue feeding decoded messages to the scheduler.
///
/// Listener threads push, the scheduler thread pops. Closing wakes every
/// blocked reader; messages already queued are still drained before
/// readers observe the closed state.
pub struct InboundQueue {
    inner: Mutex<InboundState>,
    ready: Condvar,
}

struct InboundState {
    messages: VecDeque<Message>,
    closed: bool,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InboundState {
                messages: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueues a message. Returns `false` if the queue is closed and the
    /// message was dropped.
    pub fn push(&self, message: Message) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.messages.push_back(message);
        self.ready.notify_one();
        true
    }

    /// Blocks until a message is available or the queue is closed and
    /// drained. `None` means closed.
    pub fn pop(&self) -> Option<Message> {
        let mut state = self.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            if state.closed {
                return None;
            }
            state = self.wait(state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed with the queue empty;
    /// `Err(Closed)` means the queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Message>, Closed> {
        let mut state = self.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Ok(Some(message));
            }
            if state.closed {
                return Err(Closed);
            }
            let (next, result) = self
                .ready
                .wait_timeout(state, timeout)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
            if result.timed_out() {
                return match state.messages.pop_front() {
                    Some(message) => Ok(Some(message)),
                    None if state.closed => Err(Closed),
                    None => Ok(None),
                };
            }
        }
    }

    /// Closes the queue and wakes all blocked readers.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InboundState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(
        &self,
        guard: std::sync::MutexGuard<'a, InboundState>,
    ) -> std::sync::MutexGuard<'a, InboundState> {
        self.ready
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker for a closed [`InboundQueue`].
#[derive(Debug, PartialEq, Eq)]
pub struct Closed;

/// Result of pushing onto a [`OutboundQueue`].
#[derive(Debug, PartialEq, Eq)]
pub enum PushResult {
    Pushed,
    /// The queue is full; the frame was not enqueued.
    Backpressure,
    /// The queue is closed; nothing will ever drain it again.
    Closed,
}

/// Bounded lock-free queue of encoded frames awaiting a peer sender thread.
///
/// Capacity is fixed at construction. A full queue surfaces as
/// [`PushResult::Backpressure`] so the writer can block and retry instead
/// of buffering without bound. A sender thread that dies closes its queue,
/// turning every later push into [`PushResult::Closed`] so writers fail
/// fast instead of waiting on a drain that will never happen.
pub struct OutboundQueue {
    frames: ArrayQueue<Bytes>,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: ArrayQueue::new(capacity),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, frame: Bytes) -> PushResult {
        if self.closed.load(Ordering::Acquire) {
            return PushResult::Closed;
        }
        match self.frames.push(frame) {
            Ok(()) => PushResult::Pushed,
            Err(_rejected) => PushResult::Backpressure,
        }
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.frames.pop()
    }

    /// Closes the queue and discards everything still buffered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        while self.frames.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cairn_types::{BlockId, Location};
    use cairn_wire::{Message, MessageBody, TaskCompletion, TaskKind, TaskResult, TaskStatus};

    use super::*;

    fn completion(block: &str) -> Message {
        Message::new(MessageBody::TaskCompletion(TaskCompletion {
            block: BlockId::from(block),
            block_entry: Location::new(0),
            kind: TaskKind::Forward,
            version: cairn_types::BlockVersion::new(1),
            status: TaskStatus::Completed,
            result: TaskResult::None,
        }))
    }

    #[test]
    fn inbound_delivers_in_fifo_order() {
        let queue = InboundQueue::new();
        assert!(queue.push(completion("B1")));
        assert!(queue.push(completion("B2")));
        assert_eq!(queue.pop().unwrap().body.block().unwrap().as_str(), "B1");
        assert_eq!(queue.pop().unwrap().body.block().unwrap().as_str(), "B2");
    }

    #[test]
    fn inbound_drains_queued_messages_after_close() {
        let queue = InboundQueue::new();
        assert!(queue.push(completion("B1")));
        queue.close();
        assert!(!queue.push(completion("B2")));
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn inbound_pop_timeout_reports_empty_and_closed() {
        let queue = InboundQueue::new();
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), Ok(None));
        queue.close();
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), Err(Closed));
    }

    #[test]
    fn inbound_close_wakes_blocked_reader() {
        let queue = Arc::new(InboundQueue::new());
        let reader = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(reader.join().unwrap().is_none());
    }

    #[test]
    fn outbound_reports_backpressure_when_full() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push(Bytes::from_static(b"a")), PushResult::Pushed);
        assert_eq!(queue.push(Bytes::from_static(b"b")), PushResult::Pushed);
        assert_eq!(
            queue.push(Bytes::from_static(b"c")),
            PushResult::Backpressure
        );
        assert_eq!(queue.pop().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(queue.push(Bytes::from_static(b"c")), PushResult::Pushed);
    }

    #[test]
    fn outbound_close_discards_frames_and_rejects_pushes() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push(Bytes::from_static(b"a")), PushResult::Pushed);
        queue.close();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.push(Bytes::from_static(b"b")), PushResult::Closed);
    }
}
