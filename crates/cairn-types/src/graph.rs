//! Block graph types.
//!
//! The decomposition step cuts the control-flow graph into blocks, each a
//! contiguous region with one entry location and one or more exit locations.
//! Blocks on either side of a cut share the boundary node: a successor's
//! entry location is always one of its predecessor's exit locations. The
//! graph is a DAG and is validated once at construction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{BlockId, Location};

/// One block of the decomposed control-flow graph.
///
/// Immutable after construction. The per-block (version, precondition) pair
/// is owned exclusively by the scheduler and never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNode {
    id: BlockId,
    entry: Location,
    exits: BTreeSet<Location>,
    locations: BTreeSet<Location>,
    predecessors: Vec<BlockId>,
    successors: Vec<BlockId>,
}

impl BlockNode {
    /// Creates a new block.
    ///
    /// The entry and all exits are added to `locations` implicitly, so the
    /// membership test in [`BlockNode::contains`] always covers the block
    /// boundary.
    pub fn new(
        id: BlockId,
        entry: Location,
        exits: impl IntoIterator<Item = Location>,
        locations: impl IntoIterator<Item = Location>,
        predecessors: Vec<BlockId>,
        successors: Vec<BlockId>,
    ) -> Self {
        let exits: BTreeSet<Location> = exits.into_iter().collect();
        let mut locations: BTreeSet<Location> = locations.into_iter().collect();
        locations.insert(entry);
        locations.extend(exits.iter().copied());

        Self {
            id,
            entry,
            exits,
            locations,
            predecessors,
            successors,
        }
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    /// The single entry location of the block.
    pub fn entry(&self) -> Location {
        self.entry
    }

    /// The exit locations of the block.
    pub fn exits(&self) -> &BTreeSet<Location> {
        &self.exits
    }

    /// Ordered list of predecessor blocks.
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Ordered list of successor blocks.
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Returns true if the location lies inside this block (boundary included).
    pub fn contains(&self, location: Location) -> bool {
        self.locations.contains(&location)
    }

    /// Returns true if this block has no predecessor (program entry).
    pub fn is_entry_block(&self) -> bool {
        self.predecessors.is_empty()
    }
}

/// Errors detected while validating a block graph.
#[derive(Debug, thiserror::Error)]
pub enum BlockGraphError {
    /// The graph contains no blocks.
    #[error("block graph is empty")]
    Empty,

    /// Two blocks share the same ID.
    #[error("duplicate block id: {0}")]
    DuplicateBlock(BlockId),

    /// A predecessor or successor list references a block that does not exist.
    #[error("block {block} references unknown block {reference}")]
    UnknownReference { block: BlockId, reference: BlockId },

    /// Predecessor and successor lists disagree.
    #[error("block {from} lists {to} as successor, but {to} does not list {from} as predecessor")]
    InconsistentEdge { from: BlockId, to: BlockId },

    /// A successor's entry location is not an exit of its predecessor.
    #[error("block {from} → {to}: entry {entry} is not an exit location of {from}")]
    UnalignedBoundary {
        from: BlockId,
        to: BlockId,
        entry: Location,
    },

    /// The graph contains a cycle.
    #[error("block graph contains a cycle involving {0}")]
    Cyclic(BlockId),
}

/// The decomposed control-flow graph: a validated DAG of blocks.
///
/// Read-only after construction; the scheduler and all workers share one
/// instance behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGraph {
    blocks: BTreeMap<BlockId, BlockNode>,
}

impl BlockGraph {
    /// Builds and validates a block graph.
    ///
    /// Validation checks, in order: non-emptiness, unique IDs, edge
    /// references, predecessor/successor consistency, boundary alignment
    /// (a successor's entry must be an exit of the predecessor), and
    /// acyclicity.
    pub fn new(nodes: impl IntoIterator<Item = BlockNode>) -> Result<Self, BlockGraphError> {
        let mut blocks = BTreeMap::new();
        for node in nodes {
            let id = node.id().clone();
            if blocks.insert(id.clone(), node).is_some() {
                return Err(BlockGraphError::DuplicateBlock(id));
            }
        }
        if blocks.is_empty() {
            return Err(BlockGraphError::Empty);
        }

        let graph = Self { blocks };
        graph.check_edges()?;
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_edges(&self) -> Result<(), BlockGraphError> {
        for (id, block) in &self.blocks {
            for succ_id in block.successors() {
                let succ = self.blocks.get(succ_id).ok_or_else(|| {
                    BlockGraphError::UnknownReference {
                        block: id.clone(),
                        reference: succ_id.clone(),
                    }
                })?;
                if !succ.predecessors().contains(id) {
                    return Err(BlockGraphError::InconsistentEdge {
                        from: id.clone(),
                        to: succ_id.clone(),
                    });
                }
                if !block.exits().contains(&succ.entry()) {
                    return Err(BlockGraphError::UnalignedBoundary {
                        from: id.clone(),
                        to: succ_id.clone(),
                        entry: succ.entry(),
                    });
                }
            }
            for pred_id in block.predecessors() {
                let pred = self.blocks.get(pred_id).ok_or_else(|| {
                    BlockGraphError::UnknownReference {
                        block: id.clone(),
                        reference: pred_id.clone(),
                    }
                })?;
                if !pred.successors().contains(id) {
                    return Err(BlockGraphError::InconsistentEdge {
                        from: pred_id.clone(),
                        to: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm; any block left with nonzero in-degree sits on a cycle.
    fn check_acyclic(&self) -> Result<(), BlockGraphError> {
        let mut in_degree: BTreeMap<&BlockId, usize> = self
            .blocks
            .iter()
            .map(|(id, b)| (id, b.predecessors().len()))
            .collect();

        let mut queue: VecDeque<&BlockId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for succ in self.blocks[id].successors() {
                let d = in_degree.get_mut(succ).expect("edge references validated");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(succ);
                }
            }
        }

        if visited != self.blocks.len() {
            let on_cycle = in_degree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(id, _)| (*id).clone())
                .expect("unvisited block must have nonzero in-degree");
            return Err(BlockGraphError::Cyclic(on_cycle));
        }
        Ok(())
    }

    /// Looks up a block by ID.
    pub fn get(&self, id: &BlockId) -> Option<&BlockNode> {
        self.blocks.get(id)
    }

    /// Returns true if the graph contains the block.
    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    /// Iterates over all blocks in ID order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockNode> {
        self.blocks.values()
    }

    /// The blocks with no predecessor, i.e. the seeds of a forward analysis.
    pub fn entry_blocks(&self) -> impl Iterator<Item = &BlockNode> {
        self.blocks.values().filter(|b| b.is_entry_block())
    }

    /// Number of blocks in the graph.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(
        id: &str,
        entry: u64,
        exits: &[u64],
        preds: &[&str],
        succs: &[&str],
    ) -> BlockNode {
        BlockNode::new(
            BlockId::from(id),
            Location::new(entry),
            exits.iter().map(|&n| Location::new(n)),
            [],
            preds.iter().map(|&p| BlockId::from(p)).collect(),
            succs.iter().map(|&s| BlockId::from(s)).collect(),
        )
    }

    /// entry(B0) → B1 → B2, boundary nodes shared.
    fn chain() -> Vec<BlockNode> {
        vec![
            block("B0", 0, &[10], &[], &["B1"]),
            block("B1", 10, &[20], &["B0"], &["B2"]),
            block("B2", 20, &[30], &["B1"], &[]),
        ]
    }

    #[test]
    fn valid_chain_has_one_entry_block() {
        let graph = BlockGraph::new(chain()).unwrap();
        let entries: Vec<_> = graph.entry_blocks().map(|b| b.id().as_str()).collect();
        assert_eq!(entries, vec!["B0"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn boundary_locations_belong_to_both_blocks() {
        let graph = BlockGraph::new(chain()).unwrap();
        let b0 = graph.get(&BlockId::from("B0")).unwrap();
        let b1 = graph.get(&BlockId::from("B1")).unwrap();

        // N10 is B0's exit and B1's entry; both contain it.
        assert!(b0.contains(Location::new(10)));
        assert!(b1.contains(Location::new(10)));
    }

    #[test]
    fn empty_graph_rejected() {
        assert!(matches!(
            BlockGraph::new(Vec::new()),
            Err(BlockGraphError::Empty)
        ));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let nodes = vec![
            block("B0", 0, &[10], &[], &[]),
            block("B0", 10, &[20], &[], &[]),
        ];
        assert!(matches!(
            BlockGraph::new(nodes),
            Err(BlockGraphError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn unknown_successor_rejected() {
        let nodes = vec![block("B0", 0, &[10], &[], &["B9"])];
        assert!(matches!(
            BlockGraph::new(nodes),
            Err(BlockGraphError::UnknownReference { .. })
        ));
    }

    #[test]
    fn one_sided_edge_rejected() {
        let nodes = vec![
            block("B0", 0, &[10], &[], &["B1"]),
            // B1 does not list B0 as predecessor.
            block("B1", 10, &[20], &[], &[]),
        ];
        assert!(matches!(
            BlockGraph::new(nodes),
            Err(BlockGraphError::InconsistentEdge { .. })
        ));
    }

    #[test]
    fn unaligned_boundary_rejected() {
        let nodes = vec![
            block("B0", 0, &[10], &[], &["B1"]),
            // B1's entry N11 is not an exit of B0.
            block("B1", 11, &[20], &["B0"], &[]),
        ];
        assert!(matches!(
            BlockGraph::new(nodes),
            Err(BlockGraphError::UnalignedBoundary { .. })
        ));
    }

    #[test]
    fn cycle_rejected() {
        let nodes = vec![
            block("B0", 0, &[10], &["B1"], &["B1"]),
            block("B1", 10, &[0], &["B0"], &["B0"]),
        ];
        assert!(matches!(
            BlockGraph::new(nodes),
            Err(BlockGraphError::Cyclic(_))
        ));
    }

    #[test]
    fn diamond_is_valid() {
        let nodes = vec![
            block("B0", 0, &[10, 11], &[], &["B1", "B2"]),
            block("B1", 10, &[20], &["B0"], &["B3"]),
            block("B2", 11, &[20], &["B0"], &["B3"]),
            block("B3", 20, &[30], &["B1", "B2"], &[]),
        ];
        let graph = BlockGraph::new(nodes).unwrap();
        assert_eq!(graph.entry_blocks().count(), 1);
        assert_eq!(graph.len(), 4);
    }
}
