//! The single-consumer dispatch loop.
//!
//! Exactly one thread dequeues and dispatches messages, so block-version
//! updates and convergence bookkeeping never race. Workers communicate
//! with this loop only through messages; the loop's sole blocking point is
//! the timed read on the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cairn_exchange::{CompositeExchange, Proceed};
use cairn_transport::{Connection, TransportError};
use cairn_types::{BlockGraph, BlockId, BlockNode, BlockVersion, ErrorOrigin};
use cairn_wire::{
    BackwardAnalysisContinuation, BackwardAnalysisRequest, ErrorNotice, ForwardAnalysisRequest,
    Message, MessageBody, Payload, TaskCompletion, TaskResult, TaskStatus,
};

use crate::analyzer::BlockAnalyzer;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::factory::MessageFactory;
use crate::observer::{MessageObserver, NoopObserver};
use crate::progress::{Acceptance, ProgressTable};
use crate::worker::WorkerPool;

/// The terminal outcome of a scheduler run.
///
/// Exactly one verdict is produced per run; there is no partial mode. A
/// failed run discards all summaries computed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The message channel went quiescent with no violation: the program is
    /// safe.
    Converged,

    /// A violation condition reached a block with no predecessor: the
    /// program is unsafe.
    ViolationConfirmed {
        origin: ErrorOrigin,
        condition: Option<Payload>,
    },

    /// A transport or worker failure ended the run.
    Failed { cause: String },
}

/// The scheduler: seeds entry blocks, dispatches every message, owns the
/// per-block (version, precondition) table, and reports the verdict.
pub struct Scheduler {
    graph: Arc<BlockGraph>,
    exchange: Arc<CompositeExchange>,
    connection: Arc<dyn Connection>,
    observer: Arc<dyn MessageObserver>,
    factory: MessageFactory,
    pool: WorkerPool,
    progress: ProgressTable,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
    outstanding: usize,
}

impl Scheduler {
    pub fn new(
        graph: Arc<BlockGraph>,
        analyzer: Arc<dyn BlockAnalyzer>,
        exchange: Arc<CompositeExchange>,
        connection: Arc<dyn Connection>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let factory = MessageFactory::new(Arc::clone(&graph));
        let pool = WorkerPool::new(
            config.worker_threads,
            Arc::clone(&shutdown),
            analyzer,
            factory.clone(),
            Arc::clone(&connection),
        )?;
        let progress = ProgressTable::new(&graph);
        Ok(Self {
            graph,
            exchange,
            connection,
            observer: Arc::new(NoopObserver),
            factory,
            pool,
            progress,
            config,
            shutdown,
            outstanding: 0,
        })
    }

    /// Installs a message observer. Best-effort, read-only, must not block.
    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The run's shutdown signal. Raising it stops new requests and drains
    /// in-flight completions.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the analysis to its verdict. Consumes the scheduler: the
    /// connection is closed exactly once on the way out.
    pub fn run(mut self) -> Result<Verdict, SchedulerError> {
        self.seed()?;

        let mut idle_passes = 0;
        let verdict = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break Verdict::Failed {
                    cause: "shutdown requested".to_string(),
                };
            }
            match self.connection.read_timeout(self.config.idle_timeout) {
                Ok(Some(message)) => {
                    idle_passes = 0;
                    self.observer.observe(&message);
                    match self.dispatch(message) {
                        Ok(Some(verdict)) => break verdict,
                        Ok(None) => {}
                        Err(error) => {
                            break Verdict::Failed {
                                cause: error.to_string(),
                            };
                        }
                    }
                }
                Ok(None) => {
                    if self.outstanding == 0 {
                        idle_passes += 1;
                        if idle_passes >= self.config.idle_passes {
                            break Verdict::Converged;
                        }
                    } else {
                        idle_passes = 0;
                    }
                }
                Err(error) => {
                    break Verdict::Failed {
                        cause: error.to_string(),
                    };
                }
            }
        };

        Ok(self.finish(verdict))
    }

    /// One forward request per block without predecessors.
    fn seed(&mut self) -> Result<(), SchedulerError> {
        for block in self.graph.entry_blocks() {
            let message = self.factory.seed_request(block);
            tracing::debug!(block = %block.id(), "seeding entry block");
            self.connection.write(&message)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(message = message.name()))]
    pub(crate) fn dispatch(&mut self, message: Message) -> Result<Option<Verdict>, SchedulerError> {
        match message.body {
            MessageBody::ForwardAnalysisRequest(request) => {
                self.on_forward_request(request)?;
                Ok(None)
            }
            MessageBody::BackwardAnalysisRequest(request) => {
                self.on_backward_request(request)?;
                Ok(None)
            }
            MessageBody::BackwardAnalysisContinuation(continuation) => {
                self.on_continuation(continuation)?;
                Ok(None)
            }
            MessageBody::TaskCompletion(completion) => self.on_completion(completion),
            MessageBody::ErrorReachedProgramEntry(reached) => {
                tracing::info!(origin = %reached.origin.block(), "violation reached program entry");
                Ok(Some(Verdict::ViolationConfirmed {
                    origin: reached.origin,
                    condition: reached.condition,
                }))
            }
            MessageBody::Error(notice) => Ok(Some(self.on_error(notice))),
        }
    }

    fn on_forward_request(&mut self, request: ForwardAnalysisRequest) -> Result<(), SchedulerError> {
        if self
            .progress
            .is_stale(request.predecessor.as_ref(), request.expected_version)
        {
            tracing::trace!(
                target = %request.target,
                expected = %request.expected_version,
                "discarding stale forward request"
            );
            return Ok(());
        }
        let block = self.node(&request.target)?.clone();

        if let Some(precondition) = &request.precondition {
            let known = Payload::new();
            let known = self.progress.precondition(&request.target).unwrap_or(&known);
            let current = self.exchange.deserialize(known, block.entry());
            if self.exchange.proceed(precondition, &current) == Proceed::Stop {
                tracing::trace!(target = %request.target, "proceed filter stopped forward request");
                return Ok(());
            }
        }

        match self.progress.accept(&request.target, request.precondition.as_ref()) {
            Acceptance::Redundant => {
                tracing::trace!(target = %request.target, "discarding redundant precondition");
            }
            Acceptance::Accepted(version) => {
                tracing::debug!(target = %request.target, %version, "starting forward task");
                self.outstanding += 1;
                self.pool.spawn_forward(block, version, request.precondition);
            }
        }
        Ok(())
    }

    fn on_backward_request(&mut self, request: BackwardAnalysisRequest) -> Result<(), SchedulerError> {
        let block = self.node(&request.block)?.clone();
        let version = self.progress.version(&request.block);
        tracing::debug!(block = %request.block, start = %request.start_location, "starting backward task");
        self.outstanding += 1;
        self.pool.spawn_backward(
            block,
            version,
            request.error_origin,
            request.start_location,
            request.condition,
        );
        Ok(())
    }

    fn on_continuation(
        &mut self,
        continuation: BackwardAnalysisContinuation,
    ) -> Result<(), SchedulerError> {
        let block = self.node(&continuation.block)?.clone();
        let version = self.progress.version(&continuation.block);
        tracing::debug!(block = %continuation.block, "resuming suspended backward task");
        self.outstanding += 1;
        self.pool.spawn_continuation(
            block,
            version,
            continuation.error_origin,
            continuation.checkpoint,
        );
        Ok(())
    }

    fn on_completion(
        &mut self,
        completion: TaskCompletion,
    ) -> Result<Option<Verdict>, SchedulerError> {
        self.outstanding = self.outstanding.saturating_sub(1);
        if completion.status == TaskStatus::Aborted {
            tracing::trace!(block = %completion.block, "task aborted during shutdown");
            return Ok(None);
        }

        match completion.result {
            TaskResult::ForwardSummary { summary } => {
                self.on_forward_summary(&completion.block, completion.version, summary)?;
            }
            TaskResult::ForwardViolation { error_path } => {
                let block = self.node(&completion.block)?;
                tracing::info!(
                    block = %completion.block,
                    location = %error_path.end_location(),
                    "violation discovered, starting backward propagation"
                );
                let message = self.factory.violation_backward_request(block, &error_path);
                self.connection.write(&message)?;
            }
            TaskResult::BackwardCondition { origin, condition } => {
                self.on_backward_condition(&completion.block, origin, condition)?;
            }
            TaskResult::BackwardInfeasible { origin } => {
                tracing::debug!(
                    block = %completion.block,
                    origin = %origin.block(),
                    "backward path infeasible, branch ends"
                );
            }
            TaskResult::BackwardSuspended { origin, checkpoint } => {
                tracing::debug!(block = %completion.block, "parking suspended backward search");
                self.progress.park(BackwardAnalysisContinuation {
                    block: completion.block.clone(),
                    error_origin: origin,
                    checkpoint,
                });
            }
            TaskResult::None => {}
        }
        Ok(None)
    }

    /// Fans a fresh summary out to every successor and replays parked
    /// continuations that were waiting for forward progress on this block.
    fn on_forward_summary(
        &mut self,
        block_id: &BlockId,
        version: BlockVersion,
        summary: Payload,
    ) -> Result<(), SchedulerError> {
        if version < self.progress.version(block_id) {
            // A newer precondition was accepted while this task ran; its
            // own completion will fan out at the newer version.
            tracing::trace!(block = %block_id, %version, "dropping outdated summary");
            return Ok(());
        }
        let block = self.node(block_id)?.clone();
        self.progress.record_summary(block_id, summary.clone());

        for successor in block.successors() {
            let message = self
                .factory
                .forward_request(&block, version, successor, summary.clone());
            self.connection.write(&message)?;
        }
        for continuation in self.progress.take_parked(block_id) {
            let message = self.factory.continuation(
                &continuation.block,
                continuation.error_origin,
                continuation.checkpoint,
            );
            self.connection.write(&message)?;
        }
        Ok(())
    }

    /// A backward condition arrived at a block's entry: push it upstream,
    /// or confirm the violation when there is no upstream.
    fn on_backward_condition(
        &mut self,
        block_id: &BlockId,
        origin: ErrorOrigin,
        condition: Payload,
    ) -> Result<(), SchedulerError> {
        let block = self.node(block_id)?.clone();
        if block.predecessors().is_empty() {
            let message = self
                .factory
                .error_reached_entry(origin, Some(condition));
            self.connection.write(&message)?;
            return Ok(());
        }
        for predecessor in block.predecessors() {
            let predecessor = self.node(predecessor)?;
            let message = self.factory.backward_request(
                predecessor,
                origin.clone(),
                block.entry(),
                Some(block_id),
                Some(condition.clone()),
            );
            self.connection.write(&message)?;
        }
        Ok(())
    }

    fn on_error(&self, notice: ErrorNotice) -> Verdict {
        tracing::error!(origin = %notice.origin, cause = %notice.cause, "fatal error reported");
        Verdict::Failed {
            cause: format!("{}: {}", notice.origin, notice.cause),
        }
    }

    /// Stops new work, drains in-flight completions within the grace
    /// period, closes the connection, and reports the verdict exactly once.
    fn finish(mut self, verdict: Verdict) -> Verdict {
        self.shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.outstanding > 0 && Instant::now() < deadline {
            match self.connection.read_timeout(self.config.idle_timeout) {
                Ok(Some(message)) => {
                    if matches!(message.body, MessageBody::TaskCompletion(_)) {
                        self.outstanding = self.outstanding.saturating_sub(1);
                    }
                }
                Ok(None) => {}
                Err(TransportError::Closed) => break,
                Err(error) => {
                    tracing::warn!(%error, "read failed while draining");
                    break;
                }
            }
        }
        if self.outstanding > 0 {
            tracing::warn!(
                outstanding = self.outstanding,
                "grace period expired with tasks still outstanding"
            );
        }

        self.connection.close();
        match &verdict {
            Verdict::Converged => tracing::info!("analysis converged, program is safe"),
            Verdict::ViolationConfirmed { origin, .. } => {
                tracing::info!(block = %origin.block(), location = %origin.location(), "violation confirmed");
            }
            Verdict::Failed { cause } => tracing::error!(%cause, "analysis failed"),
        }
        verdict
    }

    fn node(&self, id: &BlockId) -> Result<&BlockNode, SchedulerError> {
        self.graph.get(id).ok_or_else(|| SchedulerError::UnknownBlock {
            block: id.clone(),
        })
    }
}
