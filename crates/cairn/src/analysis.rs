//! The top-level run builder.

use std::sync::Arc;

use cairn_exchange::CompositeExchange;
use cairn_scheduler::{
    BlockAnalyzer, MessageObserver, Scheduler, SchedulerConfig, SchedulerError, Verdict,
};
use cairn_transport::{ChannelConnection, Connection};
use cairn_types::BlockGraph;

/// Wires a block graph, a sequential analyzer, exchange operators, and a
/// transport into one runnable analysis.
///
/// Defaults: an empty composite exchange (no component filters), the
/// in-memory [`ChannelConnection`], and [`SchedulerConfig::default`].
pub struct Analysis {
    graph: Arc<BlockGraph>,
    analyzer: Arc<dyn BlockAnalyzer>,
    exchange: Arc<CompositeExchange>,
    connection: Arc<dyn Connection>,
    config: SchedulerConfig,
    observer: Option<Arc<dyn MessageObserver>>,
}

impl Analysis {
    pub fn new(graph: Arc<BlockGraph>, analyzer: Arc<dyn BlockAnalyzer>) -> Self {
        Self {
            graph,
            analyzer,
            exchange: Arc::new(CompositeExchange::new(Vec::new())),
            connection: Arc::new(ChannelConnection::new()),
            config: SchedulerConfig::default(),
            observer: None,
        }
    }

    /// The component exchange operators of the product analysis.
    pub fn with_exchange(mut self, exchange: Arc<CompositeExchange>) -> Self {
        self.exchange = exchange;
        self
    }

    /// The transport carrying protocol messages. Defaults to the in-memory
    /// channel; pass a loopback or classic connection for distributed runs.
    pub fn with_connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs the analysis to its verdict.
    pub fn run(self) -> Result<Verdict, SchedulerError> {
        let mut scheduler = Scheduler::new(
            self.graph,
            self.analyzer,
            self.exchange,
            self.connection,
            self.config,
        )?;
        if let Some(observer) = self.observer {
            scheduler = scheduler.with_observer(observer);
        }
        scheduler.run()
    }
}
