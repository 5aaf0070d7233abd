//! The serialize/deserialize/proceed contract and its composite.

use std::any::Any;
use std::fmt;

use cairn_types::Location;
use cairn_wire::{Fragment, PROTOCOL_NAMESPACE, Payload};

// ============================================================================
// Proceed decision
// ============================================================================

/// Outcome of a component's proceed filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proceed {
    /// The component accepts the incoming precondition; run the analysis.
    Continue,
    /// The incoming precondition adds nothing for this component; skip.
    Stop,
}

// ============================================================================
// Per-component contract
// ============================================================================

/// The exchange operators of one component analysis.
///
/// `serialize` must be a pure, deterministic function of the state; an
/// omitted key tells the receiving side to fall back to the component's
/// initial value. `deserialize` must never fail: a missing or blank fragment
/// yields `initial(location)`.
pub trait ComponentExchange: Send + Sync + 'static {
    /// The component's abstract state.
    type State: Clone + fmt::Debug + PartialEq + Send + 'static;

    /// The payload namespace this component reads and writes.
    fn namespace(&self) -> &str;

    /// The component's initial state at a location.
    fn initial(&self, location: Location) -> Self::State;

    /// Serializes a state into a wire fragment.
    fn serialize(&self, state: &Self::State) -> Fragment;

    /// Reconstructs a state from a fragment, falling back to
    /// [`ComponentExchange::initial`] when the fragment is missing or blank.
    fn deserialize(&self, fragment: Option<&Fragment>, location: Location) -> Self::State;

    /// Cheap filter over an incoming precondition.
    ///
    /// The default accepts everything; a component overrides this only when
    /// it can reject a precondition without re-running its transfer relation.
    fn proceed(&self, incoming: &Payload, current: &Self::State) -> Proceed {
        let _ = (incoming, current);
        Proceed::Continue
    }
}

// ============================================================================
// Erased layer
// ============================================================================

/// A component state with its static type erased.
///
/// Pairs the owning component's namespace with the boxed state so the
/// composite can route states back to their components.
pub struct ComponentState {
    namespace: String,
    state: Box<dyn ErasedState>,
}

impl ComponentState {
    /// The namespace of the component this state belongs to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Downcasts to the concrete state type.
    pub fn downcast_ref<S: 'static>(&self) -> Option<&S> {
        self.state.as_any().downcast_ref::<S>()
    }
}

impl Clone for ComponentState {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            state: self.state.clone_box(),
        }
    }
}

impl fmt::Debug for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentState")
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .finish()
    }
}

impl PartialEq for ComponentState {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.state.eq_erased(other.state.as_any())
    }
}

trait ErasedState: fmt::Debug + Send {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn ErasedState>;
    fn eq_erased(&self, other: &dyn Any) -> bool;
}

impl<S: Clone + fmt::Debug + PartialEq + Send + 'static> ErasedState for S {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn ErasedState> {
        Box::new(self.clone())
    }

    fn eq_erased(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<S>() == Some(self)
    }
}

/// Object-safe form of [`ComponentExchange`], used by the composite.
pub trait DynExchange: Send + Sync {
    fn namespace(&self) -> &str;
    fn initial(&self, location: Location) -> ComponentState;
    fn serialize(&self, state: &ComponentState) -> Fragment;
    fn deserialize(&self, payload: &Payload, location: Location) -> ComponentState;
    fn proceed(&self, incoming: &Payload, current: &ComponentState) -> Proceed;
}

impl<E: ComponentExchange> DynExchange for E {
    fn namespace(&self) -> &str {
        ComponentExchange::namespace(self)
    }

    fn initial(&self, location: Location) -> ComponentState {
        ComponentState {
            namespace: ComponentExchange::namespace(self).to_string(),
            state: Box::new(ComponentExchange::initial(self, location)),
        }
    }

    fn serialize(&self, state: &ComponentState) -> Fragment {
        ComponentExchange::serialize(self, self.concrete(state))
    }

    fn deserialize(&self, payload: &Payload, location: Location) -> ComponentState {
        let fragment = payload.fragment(ComponentExchange::namespace(self));
        ComponentState {
            namespace: ComponentExchange::namespace(self).to_string(),
            state: Box::new(ComponentExchange::deserialize(self, fragment, location)),
        }
    }

    fn proceed(&self, incoming: &Payload, current: &ComponentState) -> Proceed {
        ComponentExchange::proceed(self, incoming, self.concrete(current))
    }
}

trait Concrete: ComponentExchange {
    /// Routing a state to the wrong component is a programming-contract
    /// error: fail fast rather than exchange a wrong-typed state.
    fn concrete<'a>(&self, state: &'a ComponentState) -> &'a Self::State {
        assert_eq!(
            state.namespace(),
            ComponentExchange::namespace(self),
            "component state routed to the wrong exchange operator"
        );
        state
            .downcast_ref::<Self::State>()
            .expect("state type must match the component that produced it")
    }
}

impl<E: ComponentExchange> Concrete for E {}

// ============================================================================
// Composite
// ============================================================================

/// The states of all components of a product analysis, in component order.
pub type CompositeState = Vec<ComponentState>;

/// The composite exchange operator of a product analysis.
///
/// Running serialize/deserialize over all components and concatenating the
/// fragments under their distinct namespaces yields the composite operator.
pub struct CompositeExchange {
    components: Vec<Box<dyn DynExchange>>,
}

impl CompositeExchange {
    /// Builds a composite from component operators.
    ///
    /// # Panics
    ///
    /// Panics if two components claim the same namespace or a component
    /// claims the reserved protocol namespace; either would make the
    /// composite order-dependent.
    pub fn new(components: Vec<Box<dyn DynExchange>>) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        for component in &components {
            let ns = component.namespace();
            assert_ne!(
                ns, PROTOCOL_NAMESPACE,
                "component namespace collides with the reserved protocol namespace"
            );
            assert!(seen.insert(ns.to_string()), "duplicate component namespace: {ns}");
        }
        Self { components }
    }

    /// The component operators, in composition order.
    pub fn components(&self) -> &[Box<dyn DynExchange>] {
        &self.components
    }

    /// The composite initial state at a location.
    pub fn initial(&self, location: Location) -> CompositeState {
        self.components.iter().map(|c| c.initial(location)).collect()
    }

    /// Serializes a composite state into a payload, one namespace per
    /// component.
    pub fn serialize(&self, states: &CompositeState) -> Payload {
        let mut payload = Payload::new();
        for (component, state) in self.components.iter().zip(states) {
            payload.insert_fragment(component.namespace(), component.serialize(state));
        }
        payload
    }

    /// Deserializes every component's state from a payload.
    ///
    /// Components with no fragment in the payload fall back to their initial
    /// state at `location`; this never fails.
    pub fn deserialize(&self, payload: &Payload, location: Location) -> CompositeState {
        self.components
            .iter()
            .map(|c| c.deserialize(payload, location))
            .collect()
    }

    /// Runs every component's proceed filter; a single `Stop` stops.
    pub fn proceed(&self, incoming: &Payload, current: &CompositeState) -> Proceed {
        for (component, state) in self.components.iter().zip(current) {
            if component.proceed(incoming, state) == Proceed::Stop {
                tracing::debug!(
                    component = component.namespace(),
                    "proceed filter rejected incoming precondition"
                );
                return Proceed::Stop;
            }
        }
        Proceed::Continue
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::components::{CallstackExchange, ValueMapExchange};

    fn composite() -> CompositeExchange {
        CompositeExchange::new(vec![
            Box::new(CallstackExchange::new()),
            Box::new(ValueMapExchange::new()),
        ])
    }

    #[test]
    fn empty_payload_deserializes_to_initial() {
        let composite = composite();
        let loc = Location::new(5);
        assert_eq!(
            composite.deserialize(&Payload::new(), loc),
            composite.initial(loc)
        );
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let composite = composite();
        let loc = Location::new(5);

        let mut payload = Payload::new();
        payload.insert_fragment(
            "callstack",
            [("frames".to_string(), "main/f".to_string())].into(),
        );
        payload.insert_fragment("values", [("x".to_string(), "1".to_string())].into());

        let states = composite.deserialize(&payload, loc);
        assert_eq!(composite.serialize(&states), payload);
    }

    #[test]
    fn composition_is_order_independent() {
        let loc = Location::new(5);
        let mut payload = Payload::new();
        payload.insert_fragment("values", [("x".to_string(), "1".to_string())].into());
        payload.insert_fragment(
            "callstack",
            [("frames".to_string(), "main".to_string())].into(),
        );

        let forward = composite();
        let reversed = CompositeExchange::new(vec![
            Box::new(ValueMapExchange::new()),
            Box::new(CallstackExchange::new()),
        ]);

        // The serialized payloads agree regardless of component order.
        assert_eq!(
            forward.serialize(&forward.deserialize(&payload, loc)),
            reversed.serialize(&reversed.deserialize(&payload, loc)),
        );
    }

    #[test]
    fn missing_namespace_does_not_disturb_others() {
        let composite = composite();
        let loc = Location::new(5);

        // Only the values component is present.
        let mut payload = Payload::new();
        payload.insert_fragment("values", [("x".to_string(), "7".to_string())].into());

        let states = composite.deserialize(&payload, loc);
        let full = composite.serialize(&states);

        // values survived; callstack fell back to its initial fragment.
        assert_eq!(full.fragment("values"), payload.fragment("values"));
        let initial_callstack = composite.initial(loc);
        assert_eq!(
            states[0].downcast_ref::<crate::components::CallstackState>(),
            initial_callstack[0].downcast_ref::<crate::components::CallstackState>(),
        );
    }

    proptest! {
        #[test]
        fn order_independence_holds_for_arbitrary_payloads(
            values in proptest::collection::btree_map("[a-z]{1,6}", "[0-9]{1,4}", 0..5),
            frames in "[a-z/]{0,12}",
        ) {
            let mut payload = Payload::new();
            payload.insert_fragment("values", values.into_iter().collect());
            payload.insert_fragment(
                "callstack",
                [("frames".to_string(), frames)].into(),
            );

            let loc = Location::new(3);
            let forward = composite();
            let reversed = CompositeExchange::new(vec![
                Box::new(ValueMapExchange::new()),
                Box::new(CallstackExchange::new()),
            ]);
            prop_assert_eq!(
                forward.serialize(&forward.deserialize(&payload, loc)),
                reversed.serialize(&reversed.deserialize(&payload, loc)),
            );
        }
    }

    #[test]
    #[should_panic(expected = "duplicate component namespace")]
    fn duplicate_namespaces_rejected() {
        let _ = CompositeExchange::new(vec![
            Box::new(ValueMapExchange::new()),
            Box::new(ValueMapExchange::new()),
        ]);
    }

    #[test]
    #[should_panic(expected = "routed to the wrong exchange operator")]
    fn cross_component_state_rejected() {
        let callstack = CallstackExchange::new();
        let values = ValueMapExchange::new();
        let state = DynExchange::initial(&values, Location::new(0));
        let _ = DynExchange::serialize(&callstack, &state);
    }
}
