//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size; `0` lets rayon pick one thread per core.
    pub worker_threads: usize,

    /// How long one read on the connection waits before the pass counts as
    /// idle.
    pub idle_timeout: Duration,

    /// Consecutive idle passes with zero outstanding tasks required before
    /// the run counts as converged. More than one pass absorbs messages
    /// still in flight on a socket transport.
    pub idle_passes: u32,

    /// How long shutdown waits for outstanding tasks to drain before giving
    /// up on them.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            idle_timeout: Duration::from_millis(50),
            idle_passes: 2,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
