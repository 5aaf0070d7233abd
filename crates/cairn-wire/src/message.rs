//! Protocol messages.
//!
//! This module defines all messages exchanged by the distributed
//! block-summary protocol:
//!
//! ## Requests
//! - [`ForwardAnalysisRequest`] — Scheduler → Worker: analyze a block under a
//!   precondition established by a predecessor at a known version
//! - [`BackwardAnalysisRequest`] — Scheduler → Worker: propagate a violation
//!   condition upstream through a block
//! - [`BackwardAnalysisContinuation`] — Scheduler → Worker: resume a
//!   suspended backward search from an opaque checkpoint
//!
//! ## Results
//! - [`TaskCompletion`] — Worker → Scheduler: a task finished, with its
//!   summary, violation, condition, or suspension
//! - [`ErrorReachedProgramEntry`] — a violation condition reached a block
//!   with no predecessor: the program is unsafe
//! - [`ErrorNotice`] — transport- or worker-level failure; fatal for the run
//!
//! Messages are immutable once constructed. The only ordering rule in the
//! protocol is receiver-side staleness filtering on
//! [`ForwardAnalysisRequest::expected_version`].

use cairn_types::{BlockId, BlockVersion, ErrorOrigin, ErrorPath, Location, Timestamp};
use serde::{Deserialize, Serialize};

use crate::Payload;

// ============================================================================
// Message
// ============================================================================

/// A protocol message: a construction timestamp plus the typed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// When the message was built, nanoseconds since the epoch.
    pub timestamp: Timestamp,

    /// The message body.
    pub body: MessageBody,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(body: MessageBody) -> Self {
        Self {
            timestamp: Timestamp::now(),
            body,
        }
    }

    /// Creates a message with an explicit timestamp.
    pub fn with_timestamp(timestamp: Timestamp, body: MessageBody) -> Self {
        Self { timestamp, body }
    }

    /// Returns a human-readable name for the message type.
    pub fn name(&self) -> &'static str {
        self.body.name()
    }
}

/// The body of a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Analyze a block assuming a predecessor's summary as precondition.
    ForwardAnalysisRequest(ForwardAnalysisRequest),

    /// Propagate a violation condition upstream through a block.
    BackwardAnalysisRequest(BackwardAnalysisRequest),

    /// Resume a suspended backward search.
    BackwardAnalysisContinuation(BackwardAnalysisContinuation),

    /// A worker task finished.
    TaskCompletion(TaskCompletion),

    /// A violation condition reached a block with no predecessor.
    ErrorReachedProgramEntry(ErrorReachedProgramEntry),

    /// Transport- or worker-level failure.
    Error(ErrorNotice),
}

impl MessageBody {
    /// Returns a human-readable name for the message type.
    pub fn name(&self) -> &'static str {
        match self {
            MessageBody::ForwardAnalysisRequest(_) => "ForwardAnalysisRequest",
            MessageBody::BackwardAnalysisRequest(_) => "BackwardAnalysisRequest",
            MessageBody::BackwardAnalysisContinuation(_) => "BackwardAnalysisContinuation",
            MessageBody::TaskCompletion(_) => "TaskCompletion",
            MessageBody::ErrorReachedProgramEntry(_) => "ErrorReachedProgramEntry",
            MessageBody::Error(_) => "Error",
        }
    }

    /// The block this message is about, if it names one.
    pub fn block(&self) -> Option<&BlockId> {
        match self {
            MessageBody::ForwardAnalysisRequest(m) => Some(&m.target),
            MessageBody::BackwardAnalysisRequest(m) => Some(&m.block),
            MessageBody::BackwardAnalysisContinuation(m) => Some(&m.block),
            MessageBody::TaskCompletion(m) => Some(&m.block),
            MessageBody::ErrorReachedProgramEntry(m) => Some(m.origin.block()),
            MessageBody::Error(_) => None,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// "Analyze `target` assuming `precondition` was valid when `predecessor`
/// was at version `expected_version`."
///
/// `predecessor == None` marks an entry-block seed request with no
/// precondition (equivalent to "true"). A request whose `expected_version`
/// is strictly less than the predecessor's current version is stale and is
/// discarded by the receiver without effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAnalysisRequest {
    /// The block whose summary produced this precondition.
    pub predecessor: Option<BlockId>,

    /// The predecessor's version when the precondition was computed.
    pub expected_version: BlockVersion,

    /// The block to analyze.
    pub target: BlockId,

    /// Entry location of the target block.
    pub target_entry: Location,

    /// The serialized precondition; `None` for seed requests.
    pub precondition: Option<Payload>,
}

/// "Compute, inside `block` starting at `start_location`, whether
/// `condition` can reach the violation identified by `error_origin`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackwardAnalysisRequest {
    /// The block to search.
    pub block: BlockId,

    /// The violation being propagated.
    pub error_origin: ErrorOrigin,

    /// Where inside `block` the backward search starts.
    pub start_location: Location,

    /// The downstream block the condition came from; `None` when the
    /// violation was discovered inside `block` itself.
    pub source: Option<BlockId>,

    /// The condition accumulated so far; `None` at the violation itself.
    pub condition: Option<Payload>,
}

/// Resumes a previously suspended backward search.
///
/// The checkpoint is an opaque worker snapshot; the scheduler replays it
/// once new forward information for the block has arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackwardAnalysisContinuation {
    /// The block whose backward search is resumed.
    pub block: BlockId,

    /// The violation being propagated.
    pub error_origin: ErrorOrigin,

    /// The suspended worker state.
    pub checkpoint: WorkerCheckpoint,
}

/// An opaque, serializable snapshot of a suspended backward search.
///
/// Contents are produced and consumed only by the sequential analysis; the
/// protocol transports them unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerCheckpoint {
    /// The suspended partial state, keyed like any other payload.
    pub data: Payload,
}

impl WorkerCheckpoint {
    pub fn new(data: Payload) -> Self {
        Self { data }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Which kind of task a completion reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Forward summary computation.
    Forward,
    /// Backward condition propagation (including continuations).
    Backward,
}

/// Whether the task ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// The task ran to completion and its result is valid.
    Completed,
    /// The task observed the shutdown signal and stopped early; its result
    /// carries no information and only drains the outstanding-task count.
    Aborted,
}

/// A worker finished; carries enough for idle/convergence bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    /// The block the task ran on.
    pub block: BlockId,

    /// Entry location of that block.
    pub block_entry: Location,

    /// Forward or backward.
    pub kind: TaskKind,

    /// The block version the task ran against.
    pub version: BlockVersion,

    /// Completed or aborted.
    pub status: TaskStatus,

    /// What the task produced.
    pub result: TaskResult,
}

/// The outcome carried by a [`TaskCompletion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResult {
    /// Forward analysis finished without reaching a violation.
    ForwardSummary {
        /// The serialized exit summary of the block.
        summary: Payload,
    },

    /// Forward analysis reached a violation inside the block.
    ForwardViolation {
        /// The concrete path from block entry to the violation.
        error_path: ErrorPath,
    },

    /// Backward search produced a condition that reaches the violation.
    BackwardCondition {
        origin: ErrorOrigin,
        condition: Payload,
    },

    /// Backward search proved the path infeasible; the propagation branch
    /// ends here. An expected negative result, not an error.
    BackwardInfeasible { origin: ErrorOrigin },

    /// Backward search must wait for new forward information; resume from
    /// the checkpoint once it arrives.
    BackwardSuspended {
        origin: ErrorOrigin,
        checkpoint: WorkerCheckpoint,
    },

    /// The task was aborted before producing a result.
    None,
}

/// A violation condition was propagated to a block with no predecessor:
/// the program is unsafe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReachedProgramEntry {
    /// The violation that was confirmed.
    pub origin: ErrorOrigin,

    /// The entry-reaching condition, when one was materialized.
    pub condition: Option<Payload>,
}

/// Transport- or worker-level failure.
///
/// Routed through the same queue as every other message so the scheduler
/// has one place that decides run-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Which participant observed the failure.
    pub origin: String,

    /// Human-readable cause.
    pub cause: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn origin() -> ErrorOrigin {
        ErrorOrigin::new(BlockId::from("B2"), Location::new(30))
    }

    #[test_case(MessageBody::Error(ErrorNotice { origin: "t".into(), cause: "c".into() }), "Error")]
    #[test_case(
        MessageBody::ErrorReachedProgramEntry(ErrorReachedProgramEntry {
            origin: origin(),
            condition: None,
        }),
        "ErrorReachedProgramEntry"
    )]
    fn body_names(body: MessageBody, expected: &str) {
        assert_eq!(body.name(), expected);
    }

    #[test]
    fn error_notice_names_no_block() {
        let body = MessageBody::Error(ErrorNotice {
            origin: "transport".into(),
            cause: "boom".into(),
        });
        assert!(body.block().is_none());
    }

    #[test]
    fn forward_request_names_target_block() {
        let body = MessageBody::ForwardAnalysisRequest(ForwardAnalysisRequest {
            predecessor: None,
            expected_version: BlockVersion::ZERO,
            target: BlockId::from("B0"),
            target_entry: Location::new(0),
            precondition: None,
        });
        assert_eq!(body.block(), Some(&BlockId::from("B0")));
    }
}
