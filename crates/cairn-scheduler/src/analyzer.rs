//! The sequential analysis collaborator.
//!
//! The fixpoint algorithm that analyzes the interior of one block lives
//! outside this crate. The scheduler consumes it through [`BlockAnalyzer`]:
//! an opaque "run block" operation returning a summary and an optional
//! counterexample path, plus the backward direction for violation
//! propagation.

use cairn_types::{BlockNode, ErrorPath, Location};
use cairn_wire::{Payload, WorkerCheckpoint};

/// The result of analyzing one block forward under a precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOutcome {
    /// The abstract state established at the block's exits.
    pub summary: Payload,

    /// A concrete path to a violation inside the block, if one was reached.
    pub error_path: Option<ErrorPath>,
}

/// The result of one backward propagation step through a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackwardOutcome {
    /// A condition at the block's entry that still reaches the violation.
    Condition(Payload),

    /// The path is infeasible; this propagation branch ends.
    Infeasible,

    /// The search needs forward information that does not exist yet; resume
    /// from the checkpoint once it arrives.
    Suspended(WorkerCheckpoint),
}

/// A failure inside the sequential analysis.
///
/// Fatal for the run: the worker converts it into an `Error` message and
/// the scheduler reports a failed verdict.
#[derive(Debug, Clone, thiserror::Error)]
#[error("block analysis failed: {cause}")]
pub struct AnalyzerError {
    pub cause: String,
}

impl AnalyzerError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// The sequential per-block analysis.
///
/// Implementations must be idempotent from the protocol's point of view:
/// replaying the same block with the same precondition yields an equal
/// summary. Long-running implementations should poll the run's shutdown
/// signal at their own checkpoints.
pub trait BlockAnalyzer: Send + Sync {
    /// Analyzes `block` forward from its entry under `precondition`
    /// (`None` means "true").
    fn run_block(
        &self,
        block: &BlockNode,
        precondition: Option<&Payload>,
    ) -> Result<ForwardOutcome, AnalyzerError>;

    /// Propagates a violation condition backward through `block`, starting
    /// at `start` (an exit of the block, or the violation location itself).
    fn run_backward(
        &self,
        block: &BlockNode,
        start: Location,
        condition: Option<&Payload>,
    ) -> Result<BackwardOutcome, AnalyzerError>;

    /// Resumes a suspended backward search from an opaque checkpoint.
    fn resume_backward(
        &self,
        block: &BlockNode,
        checkpoint: &WorkerCheckpoint,
    ) -> Result<BackwardOutcome, AnalyzerError>;
}
