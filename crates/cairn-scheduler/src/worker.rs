//! Worker task life cycle on a rayon pool.
//!
//! Workers communicate with the scheduler only through messages: every job
//! ends by writing exactly one `TaskCompletion` back through the
//! connection, including jobs that failed (which precede it with an
//! `Error` notice) and jobs that observed the shutdown signal and stopped
//! early. That single rule keeps the scheduler's outstanding-task count
//! honest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cairn_types::{BlockNode, BlockVersion, ErrorOrigin, Location};
use cairn_transport::Connection;
use cairn_wire::{Message, Payload, TaskKind, TaskResult, TaskStatus, WorkerCheckpoint};

use crate::analyzer::{BackwardOutcome, BlockAnalyzer};
use crate::error::SchedulerError;
use crate::factory::MessageFactory;

/// Spawns per-block analysis jobs and reports their completions.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    shutdown: Arc<AtomicBool>,
    analyzer: Arc<dyn BlockAnalyzer>,
    factory: MessageFactory,
    connection: Arc<dyn Connection>,
}

impl WorkerPool {
    /// Builds the pool. `threads == 0` lets rayon pick one per core.
    pub fn new(
        threads: usize,
        shutdown: Arc<AtomicBool>,
        analyzer: Arc<dyn BlockAnalyzer>,
        factory: MessageFactory,
        connection: Arc<dyn Connection>,
    ) -> Result<Self, SchedulerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cairn-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            shutdown,
            analyzer,
            factory,
            connection,
        })
    }

    /// Runs a forward analysis of `block` under `precondition`.
    pub fn spawn_forward(&self, block: BlockNode, version: BlockVersion, precondition: Option<Payload>) {
        let job = self.job(block, TaskKind::Forward, version);
        self.pool.spawn(move || {
            job.run(|analyzer, block| {
                let outcome = analyzer.run_block(block, precondition.as_ref())?;
                Ok(match outcome.error_path {
                    Some(error_path) => TaskResult::ForwardViolation { error_path },
                    None => TaskResult::ForwardSummary {
                        summary: outcome.summary,
                    },
                })
            });
        });
    }

    /// Runs one backward propagation step through `block`.
    pub fn spawn_backward(
        &self,
        block: BlockNode,
        version: BlockVersion,
        origin: ErrorOrigin,
        start: Location,
        condition: Option<Payload>,
    ) {
        let job = self.job(block, TaskKind::Backward, version);
        self.pool.spawn(move || {
            job.run(|analyzer, block| {
                let outcome = analyzer.run_backward(block, start, condition.as_ref())?;
                Ok(backward_result(origin, outcome))
            });
        });
    }

    /// Resumes a suspended backward search.
    pub fn spawn_continuation(
        &self,
        block: BlockNode,
        version: BlockVersion,
        origin: ErrorOrigin,
        checkpoint: WorkerCheckpoint,
    ) {
        let job = self.job(block, TaskKind::Backward, version);
        self.pool.spawn(move || {
            job.run(|analyzer, block| {
                let outcome = analyzer.resume_backward(block, &checkpoint)?;
                Ok(backward_result(origin, outcome))
            });
        });
    }

    fn job(&self, block: BlockNode, kind: TaskKind, version: BlockVersion) -> Job {
        Job {
            block,
            kind,
            version,
            shutdown: Arc::clone(&self.shutdown),
            analyzer: Arc::clone(&self.analyzer),
            factory: self.factory.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

fn backward_result(origin: ErrorOrigin, outcome: BackwardOutcome) -> TaskResult {
    match outcome {
        BackwardOutcome::Condition(condition) => TaskResult::BackwardCondition { origin, condition },
        BackwardOutcome::Infeasible => TaskResult::BackwardInfeasible { origin },
        BackwardOutcome::Suspended(checkpoint) => {
            TaskResult::BackwardSuspended { origin, checkpoint }
        }
    }
}

/// Everything one pool job needs, captured by value.
struct Job {
    block: BlockNode,
    kind: TaskKind,
    version: BlockVersion,
    shutdown: Arc<AtomicBool>,
    analyzer: Arc<dyn BlockAnalyzer>,
    factory: MessageFactory,
    connection: Arc<dyn Connection>,
}

impl Job {
    fn run<F>(self, work: F)
    where
        F: FnOnce(
            &dyn BlockAnalyzer,
            &BlockNode,
        ) -> Result<TaskResult, crate::analyzer::AnalyzerError>,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            self.send(self.factory.task_completion(
                &self.block,
                self.kind,
                self.version,
                TaskStatus::Aborted,
                TaskResult::None,
            ));
            return;
        }

        tracing::debug!(block = %self.block.id(), version = %self.version, kind = ?self.kind, "task started");
        match work(self.analyzer.as_ref(), &self.block) {
            Ok(result) => {
                self.send(self.factory.task_completion(
                    &self.block,
                    self.kind,
                    self.version,
                    TaskStatus::Completed,
                    result,
                ));
            }
            Err(error) => {
                tracing::warn!(block = %self.block.id(), %error, "task failed");
                self.send(self.factory.error(self.block.id().to_string(), error.to_string()));
                // The failure notice is not a completion; report one so the
                // scheduler's outstanding-task count still drains.
                self.send(self.factory.task_completion(
                    &self.block,
                    self.kind,
                    self.version,
                    TaskStatus::Aborted,
                    TaskResult::None,
                ));
            }
        }
    }

    fn send(&self, message: Message) {
        if let Err(error) = self.connection.write(&message) {
            tracing::warn!(%error, message = message.name(), "failed to report task result");
        }
    }
}
