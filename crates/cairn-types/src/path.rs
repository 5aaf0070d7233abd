//! Counterexample path types.
//!
//! When the sequential analysis of a block reaches a specification
//! violation, it reports the concrete edge sequence from the block entry to
//! the violating location. Condition operators walk this path *backward* to
//! accumulate the weakest condition that still reaches the error.

use serde::{Deserialize, Serialize};

use crate::{BlockId, Location};

/// Classification of a CFA edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// An assignment or other ordinary statement.
    Statement,
    /// A branch condition.
    Assume,
    /// A function call edge.
    FunctionCall,
    /// A function return edge.
    FunctionReturn,
    /// An administrative edge introduced by the block decomposition.
    ///
    /// Ghost edges carry no program semantics; backward transfers skip them
    /// rather than transferring over them.
    Ghost,
}

/// One concrete edge of a counterexample path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfaEdge {
    predecessor: Location,
    successor: Location,
    kind: EdgeKind,
    label: String,
}

impl CfaEdge {
    pub fn new(
        predecessor: Location,
        successor: Location,
        kind: EdgeKind,
        label: impl Into<String>,
    ) -> Self {
        Self {
            predecessor,
            successor,
            kind,
            label: label.into(),
        }
    }

    pub fn predecessor(&self) -> Location {
        self.predecessor
    }

    pub fn successor(&self) -> Location {
        self.successor
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// The raw statement or condition text of the edge.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true if this is a bookkeeping edge with no program semantics.
    pub fn is_ghost(&self) -> bool {
        self.kind == EdgeKind::Ghost
    }
}

/// Rejection of an ill-formed counterexample path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorPathError {
    #[error("error path must contain at least one edge")]
    Empty,

    #[error("error path edges must be connected: {from} is followed by an edge from {to}")]
    Disconnected { from: Location, to: Location },
}

/// A counterexample path: a non-empty, connected edge sequence.
///
/// Deserialization revalidates the invariants, so a path arriving off the
/// wire is either well formed or rejected before anything walks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawErrorPath")]
pub struct ErrorPath {
    edges: Vec<CfaEdge>,
}

#[derive(Deserialize)]
struct RawErrorPath {
    edges: Vec<CfaEdge>,
}

impl TryFrom<RawErrorPath> for ErrorPath {
    type Error = ErrorPathError;

    fn try_from(raw: RawErrorPath) -> Result<Self, Self::Error> {
        Self::try_new(raw.edges)
    }
}

impl ErrorPath {
    /// Creates a path from an edge sequence.
    ///
    /// # Panics
    ///
    /// Panics if the sequence is empty or not connected. An ill-formed path
    /// built locally is a programming error in the sequential analysis, not
    /// a recoverable condition; untrusted edge sequences go through
    /// [`ErrorPath::try_new`] instead.
    pub fn new(edges: Vec<CfaEdge>) -> Self {
        match Self::try_new(edges) {
            Ok(path) => path,
            Err(error) => panic!("{error}"),
        }
    }

    /// Validates an edge sequence into a path.
    pub fn try_new(edges: Vec<CfaEdge>) -> Result<Self, ErrorPathError> {
        if edges.is_empty() {
            return Err(ErrorPathError::Empty);
        }
        for pair in edges.windows(2) {
            if pair[0].successor() != pair[1].predecessor() {
                return Err(ErrorPathError::Disconnected {
                    from: pair[0].successor(),
                    to: pair[1].predecessor(),
                });
            }
        }
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[CfaEdge] {
        &self.edges
    }

    /// The first location of the path.
    pub fn start_location(&self) -> Location {
        self.edges[0].predecessor()
    }

    /// The last location of the path, i.e. the violating location.
    pub fn end_location(&self) -> Location {
        self.edges[self.edges.len() - 1].successor()
    }

    /// Iterates the edges from the violation back to the path start.
    pub fn iter_backward(&self) -> impl Iterator<Item = &CfaEdge> {
        self.edges.iter().rev()
    }
}

/// Identifies a discovered specification violation.
///
/// Carried on every backward message so the scheduler can attribute each
/// propagated condition to the violation it originated from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorOrigin {
    block: BlockId,
    location: Location,
}

impl ErrorOrigin {
    pub fn new(block: BlockId, location: Location) -> Self {
        Self { block, location }
    }

    /// The block whose analysis discovered the violation.
    pub fn block(&self) -> &BlockId {
        &self.block
    }

    /// The violating CFA location.
    pub fn location(&self) -> Location {
        self.location
    }
}
