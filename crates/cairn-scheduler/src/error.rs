//! Scheduler error types.

use cairn_types::BlockId;
use cairn_transport::TransportError;

/// Errors that abort a scheduler run before a verdict is reached.
///
/// Analysis-level failures do not appear here: they travel as `Error`
/// messages through the normal queue and surface as
/// [`Verdict::Failed`](crate::Verdict::Failed).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The connection failed outside the normal message flow.
    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    /// The rayon worker pool could not be built.
    #[error("failed to build worker pool: {source}")]
    Pool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },

    /// A message referenced a block the graph does not contain.
    #[error("message references unknown block {block}")]
    UnknownBlock { block: BlockId },
}
