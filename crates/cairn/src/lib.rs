//! # Cairn
//!
//! Distributed block-summary reachability analysis.
//!
//! Cairn splits a whole-program abstract-interpretation run into
//! independently running per-block workers that exchange typed messages
//! carrying serialized abstract states. Asynchronous message exchange, not
//! shared memory, decides whether the program is safe, unsafe, or whether
//! analysis must continue.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            Cairn                               │
//! │  ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐ │
//! │  │ BlockGraph│ → │ Scheduler │ ↔ │ Connection│ ↔ │  Workers  │ │
//! │  │ (static)  │   │(dispatch) │   │ (messages)│   │ (rayon)   │ │
//! │  └──────────┘   └───────────┘   └───────────┘   └───────────┘ │
//! │        serialized states cross block boundaries as Payloads    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler seeds one forward request per entry block; each worker's
//! completion triggers new messages (summaries fan out forward, violation
//! conditions propagate backward) until the channel is quiescent (safe), a
//! condition reaches a block with no predecessor (unsafe), or a fatal
//! error arrives (failed).
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use cairn::{Analysis, Verdict};
//!
//! let analysis = Analysis::new(graph, analyzer)
//!     .with_exchange(exchange)
//!     .with_config(config);
//!
//! match analysis.run()? {
//!     Verdict::Converged => println!("safe"),
//!     Verdict::ViolationConfirmed { origin, .. } => println!("unsafe at {origin:?}"),
//!     Verdict::Failed { cause } => println!("failed: {cause}"),
//! }
//! ```

mod analysis;

pub use analysis::Analysis;

// Re-export core types
pub use cairn_types::{
    BlockGraph, BlockGraphError, BlockId, BlockNode, BlockVersion, CfaEdge, EdgeKind, ErrorOrigin,
    ErrorPath, ErrorPathError, Location, Timestamp,
};

// Re-export the wire protocol
pub use cairn_wire::{
    Envelope, Fragment, Message, MessageBody, Payload, TaskKind, TaskResult, TaskStatus, WireError,
    WorkerCheckpoint,
};

// Re-export exchange operators
pub use cairn_exchange::{
    ComponentExchange, CompositeExchange, DynExchange, Proceed, ViolationConditionOperator,
};

// Re-export transports
pub use cairn_transport::{
    ChannelConnection, ClassicConnection, Connection, LoopbackConnection, TransportConfig,
    TransportError,
};

// Re-export the scheduler surface
pub use cairn_scheduler::{
    AnalyzerError, BackwardOutcome, BlockAnalyzer, CountingObserver, ForwardOutcome,
    MessageObserver, MessageStats, NoopObserver, Scheduler, SchedulerConfig, SchedulerError,
    Verdict,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct SafeAnalyzer;

    impl BlockAnalyzer for SafeAnalyzer {
        fn run_block(
            &self,
            _block: &BlockNode,
            _precondition: Option<&Payload>,
        ) -> Result<ForwardOutcome, AnalyzerError> {
            Ok(ForwardOutcome {
                summary: Payload::new(),
                error_path: None,
            })
        }

        fn run_backward(
            &self,
            _block: &BlockNode,
            _start: Location,
            _condition: Option<&Payload>,
        ) -> Result<BackwardOutcome, AnalyzerError> {
            Ok(BackwardOutcome::Infeasible)
        }

        fn resume_backward(
            &self,
            _block: &BlockNode,
            _checkpoint: &WorkerCheckpoint,
        ) -> Result<BackwardOutcome, AnalyzerError> {
            Ok(BackwardOutcome::Infeasible)
        }
    }

    #[test]
    fn default_analysis_converges_on_a_safe_graph() {
        let graph = Arc::new(
            BlockGraph::new(vec![
                BlockNode::new(
                    BlockId::from("B0"),
                    Location::new(0),
                    [Location::new(10)],
                    [],
                    vec![],
                    vec![BlockId::from("B1")],
                ),
                BlockNode::new(
                    BlockId::from("B1"),
                    Location::new(10),
                    [Location::new(20)],
                    [],
                    vec![BlockId::from("B0")],
                    vec![],
                ),
            ])
            .unwrap(),
        );

        let verdict = Analysis::new(graph, Arc::new(SafeAnalyzer)).run().unwrap();
        assert_eq!(verdict, Verdict::Converged);
    }
}
