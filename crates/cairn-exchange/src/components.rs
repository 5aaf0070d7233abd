//! Built-in component analyses.
//!
//! Two small concrete domains live here: a callstack component and a
//! constant-value component. They are real members of the default product
//! analysis and double as the reference implementations of the exchange
//! contract. Heavyweight domains (predicates, intervals) plug in through
//! the same traits from their own crates.

use std::collections::BTreeMap;

use cairn_types::{CfaEdge, EdgeKind, Location};
use cairn_wire::{Fragment, Payload};

use crate::condition::BackwardTransfer;
use crate::exchange::{ComponentExchange, Proceed};

const CALLSTACK_NAMESPACE: &str = "callstack";
const VALUES_NAMESPACE: &str = "values";

const KEY_FRAMES: &str = "frames";
const FRAME_SEPARATOR: char = '/';

// ============================================================================
// Callstack component
// ============================================================================

/// Abstract state of the callstack component: the stack of open calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackState {
    frames: Vec<String>,
    location: Location,
}

impl CallstackState {
    pub fn new(frames: Vec<String>, location: Location) -> Self {
        Self { frames, location }
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn location(&self) -> Location {
        self.location
    }
}

/// Exchange operators of the callstack component.
///
/// Serializes the open call frames as a single separator-joined key. An
/// empty stack serializes to an empty fragment, which the receiving side
/// reads back as the initial state.
#[derive(Debug, Default)]
pub struct CallstackExchange;

impl CallstackExchange {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentExchange for CallstackExchange {
    type State = CallstackState;

    fn namespace(&self) -> &str {
        CALLSTACK_NAMESPACE
    }

    fn initial(&self, location: Location) -> CallstackState {
        CallstackState::new(Vec::new(), location)
    }

    fn serialize(&self, state: &CallstackState) -> Fragment {
        let mut fragment = Fragment::new();
        if !state.frames.is_empty() {
            fragment.insert(
                KEY_FRAMES.to_string(),
                state.frames.join(&FRAME_SEPARATOR.to_string()),
            );
        }
        fragment
    }

    fn deserialize(&self, fragment: Option<&Fragment>, location: Location) -> CallstackState {
        let frames = fragment
            .and_then(|f| f.get(KEY_FRAMES))
            .map(|joined| {
                joined
                    .split(FRAME_SEPARATOR)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        CallstackState::new(frames, location)
    }
}

// ============================================================================
// Constant-value component
// ============================================================================

/// Abstract state of the constant-value component: variables with a single
/// known value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMapState {
    values: BTreeMap<String, String>,
    location: Location,
}

impl ValueMapState {
    pub fn new(values: BTreeMap<String, String>, location: Location) -> Self {
        Self { values, location }
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn location(&self) -> Location {
        self.location
    }
}

/// Exchange operators of the constant-value component.
///
/// The fragment is the variable map itself. The proceed filter rejects an
/// incoming precondition that is byte-identical to the current one: the
/// component has already analyzed under it and re-running the block cannot
/// produce a new summary.
#[derive(Debug, Default)]
pub struct ValueMapExchange;

impl ValueMapExchange {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentExchange for ValueMapExchange {
    type State = ValueMapState;

    fn namespace(&self) -> &str {
        VALUES_NAMESPACE
    }

    fn initial(&self, location: Location) -> ValueMapState {
        ValueMapState::new(BTreeMap::new(), location)
    }

    fn serialize(&self, state: &ValueMapState) -> Fragment {
        state.values.clone()
    }

    fn deserialize(&self, fragment: Option<&Fragment>, location: Location) -> ValueMapState {
        ValueMapState::new(fragment.cloned().unwrap_or_default(), location)
    }

    fn proceed(&self, incoming: &Payload, current: &ValueMapState) -> Proceed {
        match incoming.fragment(VALUES_NAMESPACE) {
            Some(fragment) if !fragment.is_empty() && *fragment == current.values => Proceed::Stop,
            _ => Proceed::Continue,
        }
    }
}

// ============================================================================
// Always-proceed adapter
// ============================================================================

/// Wraps a component and disables its proceed filter.
///
/// The trivial "always proceed" behavior is a valid filter for every
/// component; this adapter forces it where a component's own filter is
/// unwanted (e.g. while diagnosing a convergence problem).
#[derive(Debug)]
pub struct AlwaysProceed<E>(pub E);

impl<E: ComponentExchange> ComponentExchange for AlwaysProceed<E> {
    type State = E::State;

    fn namespace(&self) -> &str {
        self.0.namespace()
    }

    fn initial(&self, location: Location) -> Self::State {
        self.0.initial(location)
    }

    fn serialize(&self, state: &Self::State) -> Fragment {
        self.0.serialize(state)
    }

    fn deserialize(&self, fragment: Option<&Fragment>, location: Location) -> Self::State {
        self.0.deserialize(fragment, location)
    }

    fn proceed(&self, _incoming: &Payload, _current: &Self::State) -> Proceed {
        Proceed::Continue
    }
}

// ============================================================================
// Backward transfer of the constant-value component
// ============================================================================

/// Reverse transfer of the constant-value component.
///
/// Understands two edge shapes: assignments `x = c` and assumptions
/// `x == c`. Walking backward over an assignment discharges the variable's
/// required value (or proves the path infeasible if the requirement
/// disagrees); an assumption adds a requirement (or conflicts with one).
#[derive(Debug, Default)]
pub struct ValueBackwardTransfer;

impl ValueBackwardTransfer {
    pub fn new() -> Self {
        Self
    }
}

impl BackwardTransfer for ValueBackwardTransfer {
    fn namespace(&self) -> &str {
        VALUES_NAMESPACE
    }

    fn apply_backward(&self, edge: &CfaEdge, condition: &Fragment) -> Option<Fragment> {
        match parse_label(edge) {
            Some(Stmt::Assign { var, value }) => {
                match condition.get(&var) {
                    // The condition needs a different value than the one
                    // assigned here: infeasible.
                    Some(required) if *required != value => None,
                    _ => {
                        let mut next = condition.clone();
                        next.remove(&var);
                        Some(next)
                    }
                }
            }
            Some(Stmt::Assume { var, value }) => match condition.get(&var) {
                Some(required) if *required != value => None,
                _ => {
                    let mut next = condition.clone();
                    next.insert(var, value);
                    Some(next)
                }
            },
            None => Some(condition.clone()),
        }
    }
}

enum Stmt {
    Assign { var: String, value: String },
    Assume { var: String, value: String },
}

fn parse_label(edge: &CfaEdge) -> Option<Stmt> {
    let label = edge.label().trim();
    match edge.kind() {
        EdgeKind::Assume => {
            let (var, value) = label.split_once("==")?;
            Some(Stmt::Assume {
                var: var.trim().to_string(),
                value: value.trim().to_string(),
            })
        }
        EdgeKind::Statement => {
            let (var, value) = label.split_once('=')?;
            Some(Stmt::Assign {
                var: var.trim().to_string(),
                value: value.trim().to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn fragment(pairs: &[(&str, &str)]) -> Fragment {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn callstack_round_trip() {
        let exchange = CallstackExchange::new();
        let loc = Location::new(3);
        let state = CallstackState::new(vec!["main".into(), "f".into()], loc);

        let frag = exchange.serialize(&state);
        assert_eq!(exchange.deserialize(Some(&frag), loc), state);
    }

    #[test]
    fn empty_callstack_serializes_to_empty_fragment() {
        let exchange = CallstackExchange::new();
        let loc = Location::new(3);
        let frag = exchange.serialize(&exchange.initial(loc));
        assert!(frag.is_empty());
        // And reads back as the initial state.
        assert_eq!(exchange.deserialize(Some(&frag), loc), exchange.initial(loc));
    }

    #[test]
    fn value_map_missing_fragment_is_initial() {
        let exchange = ValueMapExchange::new();
        let loc = Location::new(9);
        assert_eq!(exchange.deserialize(None, loc), exchange.initial(loc));
    }

    #[test]
    fn value_map_proceed_stops_on_identical_precondition() {
        let exchange = ValueMapExchange::new();
        let loc = Location::new(9);
        let state = ValueMapState::new(
            fragment(&[("x", "1")]).into_iter().collect(),
            loc,
        );

        let mut same = Payload::new();
        same.insert_fragment(VALUES_NAMESPACE, fragment(&[("x", "1")]));
        assert_eq!(exchange.proceed(&same, &state), Proceed::Stop);

        let mut different = Payload::new();
        different.insert_fragment(VALUES_NAMESPACE, fragment(&[("x", "2")]));
        assert_eq!(exchange.proceed(&different, &state), Proceed::Continue);
    }

    #[test]
    fn always_proceed_overrides_filter() {
        let exchange = AlwaysProceed(ValueMapExchange::new());
        let loc = Location::new(9);
        let state = exchange.deserialize(Some(&fragment(&[("x", "1")])), loc);

        let mut same = Payload::new();
        same.insert_fragment(VALUES_NAMESPACE, fragment(&[("x", "1")]));
        assert_eq!(exchange.proceed(&same, &state), Proceed::Continue);
    }

    fn edge(kind: EdgeKind, label: &str) -> CfaEdge {
        CfaEdge::new(Location::new(1), Location::new(2), kind, label)
    }

    #[test_case(EdgeKind::Assume, "x == 1", &[("x", "1")] ; "assume adds requirement")]
    #[test_case(EdgeKind::Statement, "y = 2", &[] ; "assignment discharges unseen var")]
    fn backward_transfer_feasible(kind: EdgeKind, label: &str, expected: &[(&str, &str)]) {
        let transfer = ValueBackwardTransfer::new();
        let result = transfer.apply_backward(&edge(kind, label), &Fragment::new());
        assert_eq!(result, Some(fragment(expected)));
    }

    #[test]
    fn backward_transfer_detects_conflict() {
        let transfer = ValueBackwardTransfer::new();
        // Condition requires x == 2, but this edge assigns x = 1.
        let result =
            transfer.apply_backward(&edge(EdgeKind::Statement, "x = 1"), &fragment(&[("x", "2")]));
        assert_eq!(result, None);
    }

    #[test]
    fn backward_transfer_discharges_satisfied_requirement() {
        let transfer = ValueBackwardTransfer::new();
        let result =
            transfer.apply_backward(&edge(EdgeKind::Statement, "x = 2"), &fragment(&[("x", "2")]));
        // Requirement met by the assignment; the variable drops out.
        assert_eq!(result, Some(Fragment::new()));
    }
}
