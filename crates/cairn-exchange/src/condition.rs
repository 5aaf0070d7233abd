//! Violation condition operators (backward propagation).
//!
//! When a block's forward analysis reaches a violation, the resulting
//! counterexample path is walked *backward*, edge by edge, accumulating the
//! weakest condition under which the error is still reachable. The
//! composite applies each component's reverse transfer independently under
//! its own namespace.

use cairn_types::{CfaEdge, ErrorPath};
use cairn_wire::{Fragment, Payload};

/// The reverse transfer relation of one component analysis.
pub trait BackwardTransfer: Send + Sync {
    /// The payload namespace this component reads and writes.
    fn namespace(&self) -> &str;

    /// Applies the component's transfer relation in reverse over one edge.
    ///
    /// Returns `None` when the backward transfer has no successor state,
    /// i.e. the path is infeasible at this step and the caller must stop
    /// propagating. Ghost edges are skipped by the caller and never reach
    /// this method.
    fn apply_backward(&self, edge: &CfaEdge, condition: &Fragment) -> Option<Fragment>;
}

/// Computes the condition under which an error path stays reachable.
pub trait ViolationConditionOperator: Send + Sync {
    /// Walks `path` backward from its end location to its start.
    ///
    /// `previous` seeds the terminal state, so a condition partially
    /// computed in a deeper block can be continued by its predecessor.
    /// Returns `None` when the path is infeasible at some step.
    fn compute_violation_condition(
        &self,
        path: &ErrorPath,
        previous: Option<&Payload>,
    ) -> Option<Payload>;
}

/// The composite condition operator of a product analysis.
pub struct CompositeConditionOperator {
    components: Vec<Box<dyn BackwardTransfer>>,
}

impl CompositeConditionOperator {
    pub fn new(components: Vec<Box<dyn BackwardTransfer>>) -> Self {
        Self { components }
    }
}

impl ViolationConditionOperator for CompositeConditionOperator {
    fn compute_violation_condition(
        &self,
        path: &ErrorPath,
        previous: Option<&Payload>,
    ) -> Option<Payload> {
        let mut condition = previous.cloned().unwrap_or_default();

        for edge in path.iter_backward() {
            // Ghost edges exist only for block-graph bookkeeping.
            if edge.is_ghost() {
                continue;
            }
            for component in &self.components {
                let current = condition
                    .fragment(component.namespace())
                    .cloned()
                    .unwrap_or_default();
                match component.apply_backward(edge, &current) {
                    Some(next) => condition.insert_fragment(component.namespace(), next),
                    None => {
                        tracing::debug!(
                            component = component.namespace(),
                            edge = edge.label(),
                            "backward transfer infeasible, dropping propagation branch"
                        );
                        return None;
                    }
                }
            }
        }

        Some(condition)
    }
}
