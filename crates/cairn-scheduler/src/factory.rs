//! Message construction with structural validation.
//!
//! Every message the scheduler or a worker emits is built here. The
//! constructors check their structural preconditions with `assert!` and
//! panic on violation: an ill-formed message cannot be retried safely, so
//! construction bugs fail fast instead of poisoning the queue.

use std::sync::Arc;

use cairn_types::{BlockGraph, BlockId, BlockNode, BlockVersion, ErrorOrigin, ErrorPath, Location};
use cairn_wire::{
    BackwardAnalysisContinuation, BackwardAnalysisRequest, ErrorNotice, ErrorReachedProgramEntry,
    ForwardAnalysisRequest, Message, MessageBody, Payload, TaskCompletion, TaskKind, TaskResult,
    TaskStatus, WorkerCheckpoint,
};

/// Builds well-formed protocol messages bound to the block graph.
///
/// Stateless apart from the shared read-only graph; cloning is cheap.
#[derive(Clone)]
pub struct MessageFactory {
    graph: Arc<BlockGraph>,
}

impl MessageFactory {
    pub fn new(graph: Arc<BlockGraph>) -> Self {
        Self { graph }
    }

    /// A seed request for an entry block: no predecessor, no precondition.
    pub fn seed_request(&self, block: &BlockNode) -> Message {
        assert!(
            block.is_entry_block(),
            "seed requests are only valid for blocks without predecessors"
        );
        Message::new(MessageBody::ForwardAnalysisRequest(ForwardAnalysisRequest {
            predecessor: None,
            expected_version: BlockVersion::ZERO,
            target: block.id().clone(),
            target_entry: block.entry(),
            precondition: None,
        }))
    }

    /// A forward request to `target` carrying `predecessor`'s summary at its
    /// current version.
    pub fn forward_request(
        &self,
        predecessor: &BlockNode,
        version: BlockVersion,
        target: &BlockId,
        precondition: Payload,
    ) -> Message {
        assert!(
            predecessor.successors().contains(target),
            "forward request along an edge the graph does not contain"
        );
        let target = self.node(target);
        Message::new(MessageBody::ForwardAnalysisRequest(ForwardAnalysisRequest {
            predecessor: Some(predecessor.id().clone()),
            expected_version: version,
            target: target.id().clone(),
            target_entry: target.entry(),
            precondition: Some(precondition),
        }))
    }

    /// A backward request into `block`, starting at `start_location`.
    pub fn backward_request(
        &self,
        block: &BlockNode,
        error_origin: ErrorOrigin,
        start_location: Location,
        source: Option<&BlockId>,
        condition: Option<Payload>,
    ) -> Message {
        assert!(
            block.contains(start_location),
            "backward start location {start_location} lies outside block {}",
            block.id()
        );
        if let Some(source) = source {
            assert!(
                block.successors().contains(source),
                "backward request from a block the graph does not list as successor"
            );
        }
        Message::new(MessageBody::BackwardAnalysisRequest(BackwardAnalysisRequest {
            block: block.id().clone(),
            error_origin,
            start_location,
            source: source.cloned(),
            condition,
        }))
    }

    /// A continuation resuming a suspended backward search.
    pub fn continuation(
        &self,
        block: &BlockId,
        error_origin: ErrorOrigin,
        checkpoint: WorkerCheckpoint,
    ) -> Message {
        assert!(
            self.graph.contains(block),
            "continuation for a block the graph does not contain"
        );
        Message::new(MessageBody::BackwardAnalysisContinuation(
            BackwardAnalysisContinuation {
                block: block.clone(),
                error_origin,
                checkpoint,
            },
        ))
    }

    /// A completion for a finished (or aborted) worker task.
    pub fn task_completion(
        &self,
        block: &BlockNode,
        kind: TaskKind,
        version: BlockVersion,
        status: TaskStatus,
        result: TaskResult,
    ) -> Message {
        if let TaskResult::ForwardViolation { error_path } = &result {
            assert!(
                block.contains(error_path.end_location()),
                "violation location {} lies outside block {}",
                error_path.end_location(),
                block.id()
            );
        }
        Message::new(MessageBody::TaskCompletion(TaskCompletion {
            block: block.id().clone(),
            block_entry: block.entry(),
            kind,
            version,
            status,
            result,
        }))
    }

    /// The unsafe verdict carrier: a condition reached a block with no
    /// predecessor.
    pub fn error_reached_entry(
        &self,
        origin: ErrorOrigin,
        condition: Option<Payload>,
    ) -> Message {
        Message::new(MessageBody::ErrorReachedProgramEntry(ErrorReachedProgramEntry {
            origin,
            condition,
        }))
    }

    /// A fatal failure notice.
    pub fn error(&self, origin: impl Into<String>, cause: impl Into<String>) -> Message {
        Message::new(MessageBody::Error(ErrorNotice {
            origin: origin.into(),
            cause: cause.into(),
        }))
    }

    /// A backward request for a violation just discovered inside `block`.
    pub fn violation_backward_request(&self, block: &BlockNode, error_path: &ErrorPath) -> Message {
        let location = error_path.end_location();
        let origin = ErrorOrigin::new(block.id().clone(), location);
        self.backward_request(block, origin, location, None, None)
    }

    fn node(&self, id: &BlockId) -> &BlockNode {
        self.graph
            .get(id)
            .unwrap_or_else(|| panic!("block {id} is not in the graph"))
    }
}
