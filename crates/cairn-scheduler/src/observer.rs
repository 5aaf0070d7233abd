//! Best-effort message observation.

use std::sync::atomic::{AtomicU64, Ordering};

use cairn_wire::{Message, MessageBody};

/// Sees every message the scheduler dispatches.
///
/// Observation is best-effort and read-only; implementations must never
/// block the dispatch loop.
pub trait MessageObserver: Send + Sync {
    fn observe(&self, message: &Message);
}

/// An observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl MessageObserver for NoopObserver {
    fn observe(&self, _message: &Message) {}
}

/// Per-kind message counters.
#[derive(Debug, Default)]
pub struct CountingObserver {
    forward_requests: AtomicU64,
    backward_requests: AtomicU64,
    continuations: AtomicU64,
    completions: AtomicU64,
    entry_violations: AtomicU64,
    errors: AtomicU64,
}

/// A snapshot of [`CountingObserver`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageStats {
    pub forward_requests: u64,
    pub backward_requests: u64,
    pub continuations: u64,
    pub completions: u64,
    pub entry_violations: u64,
    pub errors: u64,
}

impl MessageStats {
    pub fn total(&self) -> u64 {
        self.forward_requests
            + self.backward_requests
            + self.continuations
            + self.completions
            + self.entry_violations
            + self.errors
    }
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MessageStats {
        MessageStats {
            forward_requests: self.forward_requests.load(Ordering::Relaxed),
            backward_requests: self.backward_requests.load(Ordering::Relaxed),
            continuations: self.continuations.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            entry_violations: self.entry_violations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl MessageObserver for CountingObserver {
    fn observe(&self, message: &Message) {
        let counter = match &message.body {
            MessageBody::ForwardAnalysisRequest(_) => &self.forward_requests,
            MessageBody::BackwardAnalysisRequest(_) => &self.backward_requests,
            MessageBody::BackwardAnalysisContinuation(_) => &self.continuations,
            MessageBody::TaskCompletion(_) => &self.completions,
            MessageBody::ErrorReachedProgramEntry(_) => &self.entry_violations,
            MessageBody::Error(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
