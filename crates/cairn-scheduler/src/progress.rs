//! Per-block version and precondition bookkeeping.
//!
//! The only mutable shared state in the protocol. It is owned exclusively
//! by the scheduler and mutated only from the dispatch loop; workers see a
//! (version, precondition) snapshot taken at task start.

use std::collections::BTreeMap;

use cairn_types::{BlockGraph, BlockId, BlockVersion};
use cairn_wire::{BackwardAnalysisContinuation, Payload};

/// What the scheduler decided to do with an incoming precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// New information: the version was bumped and a task should run.
    Accepted(BlockVersion),
    /// The precondition equals the most recently accepted one; replaying it
    /// would recompute the same summary.
    Redundant,
}

/// Mutable bookkeeping for one block.
#[derive(Debug, Default)]
struct BlockProgress {
    version: BlockVersion,
    precondition: Option<Payload>,
    summary: Option<Payload>,
    parked: Vec<BackwardAnalysisContinuation>,
}

/// The scheduler's (version, precondition) table, one row per block.
pub struct ProgressTable {
    rows: BTreeMap<BlockId, BlockProgress>,
}

impl ProgressTable {
    /// One zeroed row per graph block.
    pub fn new(graph: &BlockGraph) -> Self {
        Self {
            rows: graph
                .blocks()
                .map(|block| (block.id().clone(), BlockProgress::default()))
                .collect(),
        }
    }

    /// The block's current version. Unknown blocks are at version zero.
    pub fn version(&self, block: &BlockId) -> BlockVersion {
        self.rows.get(block).map_or(BlockVersion::ZERO, |row| row.version)
    }

    /// Whether a forward request is stale: its expected version is strictly
    /// older than the predecessor's current version.
    pub fn is_stale(&self, predecessor: Option<&BlockId>, expected: BlockVersion) -> bool {
        match predecessor {
            Some(block) => expected < self.version(block),
            None => false,
        }
    }

    /// Considers a precondition for a block.
    ///
    /// A precondition equal to the last accepted one is redundant and does
    /// not bump the version; the very first request for a block (seed
    /// included) is always accepted.
    pub fn accept(&mut self, block: &BlockId, precondition: Option<&Payload>) -> Acceptance {
        let row = self.rows.entry(block.clone()).or_default();
        if row.version > BlockVersion::ZERO && row.precondition.as_ref() == precondition {
            return Acceptance::Redundant;
        }
        row.version = row.version.next();
        row.precondition = precondition.cloned();
        Acceptance::Accepted(row.version)
    }

    /// Records the latest forward summary of a block.
    pub fn record_summary(&mut self, block: &BlockId, summary: Payload) {
        self.rows.entry(block.clone()).or_default().summary = Some(summary);
    }

    /// The most recent forward summary of a block.
    pub fn summary(&self, block: &BlockId) -> Option<&Payload> {
        self.rows.get(block).and_then(|row| row.summary.as_ref())
    }

    /// The most recently accepted precondition of a block.
    pub fn precondition(&self, block: &BlockId) -> Option<&Payload> {
        self.rows.get(block).and_then(|row| row.precondition.as_ref())
    }

    /// Parks a suspended backward search until new forward information for
    /// its block arrives.
    pub fn park(&mut self, continuation: BackwardAnalysisContinuation) {
        self.rows
            .entry(continuation.block.clone())
            .or_default()
            .parked
            .push(continuation);
    }

    /// Takes every continuation parked on a block, for replay.
    pub fn take_parked(&mut self, block: &BlockId) -> Vec<BackwardAnalysisContinuation> {
        self.rows
            .get_mut(block)
            .map(|row| std::mem::take(&mut row.parked))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use cairn_types::{BlockNode, Location};

    use super::*;

    fn graph() -> BlockGraph {
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
        .unwrap()
    }

    fn payload(key: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert_fragment("values", [(key.to_string(), "1".to_string())].into());
        payload
    }

    #[test]
    fn accept_bumps_version_per_new_precondition() {
        let mut table = ProgressTable::new(&graph());
        let b1 = BlockId::from("B1");

        assert_eq!(
            table.accept(&b1, Some(&payload("x"))),
            Acceptance::Accepted(BlockVersion::new(1))
        );
        assert_eq!(
            table.accept(&b1, Some(&payload("y"))),
            Acceptance::Accepted(BlockVersion::new(2))
        );
        assert_eq!(table.version(&b1), BlockVersion::new(2));
    }

    #[test]
    fn repeated_precondition_is_redundant() {
        let mut table = ProgressTable::new(&graph());
        let b1 = BlockId::from("B1");

        table.accept(&b1, Some(&payload("x")));
        assert_eq!(table.accept(&b1, Some(&payload("x"))), Acceptance::Redundant);
        assert_eq!(table.version(&b1), BlockVersion::new(1));
    }

    #[test]
    fn first_seed_with_no_precondition_is_accepted() {
        let mut table = ProgressTable::new(&graph());
        let b0 = BlockId::from("B0");

        assert_eq!(
            table.accept(&b0, None),
            Acceptance::Accepted(BlockVersion::new(1))
        );
        assert_eq!(table.accept(&b0, None), Acceptance::Redundant);
    }

    #[test]
    fn staleness_compares_against_current_version() {
        let mut table = ProgressTable::new(&graph());
        let b0 = BlockId::from("B0");

        table.accept(&b0, None);
        table.accept(&b0, Some(&payload("x")));
        let current = table.version(&b0);

        assert!(table.is_stale(Some(&b0), BlockVersion::new(1)));
        assert!(!table.is_stale(Some(&b0), current));
        assert!(!table.is_stale(None, BlockVersion::ZERO));
    }

    #[test]
    fn parked_continuations_replay_once() {
        let mut table = ProgressTable::new(&graph());
        let b1 = BlockId::from("B1");
        table.park(BackwardAnalysisContinuation {
            block: b1.clone(),
            error_origin: cairn_types::ErrorOrigin::new(b1.clone(), Location::new(20)),
            checkpoint: cairn_wire::WorkerCheckpoint::default(),
        });

        assert_eq!(table.take_parked(&b1).len(), 1);
        assert!(table.take_parked(&b1).is_empty());
    }
}
