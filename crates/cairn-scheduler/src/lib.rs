//! # cairn-scheduler: The dispatch loop and worker life cycle
//!
//! The scheduler is the protocol's single consumer: one thread reads
//! messages off the connection and dispatches them, so the per-block
//! (version, precondition) table and the convergence bookkeeping never
//! race. Worker tasks run as rayon pool jobs and talk back exclusively
//! through `TaskCompletion` messages.
//!
//! A run ends in exactly one [`Verdict`]:
//!
//! - [`Verdict::Converged`] — the channel went quiescent with no violation,
//! - [`Verdict::ViolationConfirmed`] — a violation condition was propagated
//!   all the way to a block with no predecessor,
//! - [`Verdict::Failed`] — a transport or worker failure; all partial
//!   summaries are discarded.
//!
//! External collaborators plug in through two traits: [`BlockAnalyzer`]
//! (the sequential fixpoint algorithm inside one block) and
//! [`MessageObserver`] (best-effort visibility into the message flow).

mod analyzer;
mod config;
mod error;
mod factory;
mod observer;
mod progress;
mod scheduler;
mod worker;


pub use analyzer::{AnalyzerError, BackwardOutcome, BlockAnalyzer, ForwardOutcome};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use factory::MessageFactory;
pub use observer::{CountingObserver, MessageObserver, MessageStats, NoopObserver};
pub use scheduler::{Scheduler, Verdict};
