//! # cairn-exchange: Component state exchange operators
//!
//! A product analysis composes several component abstract domains. When a
//! serialized state crosses a block boundary, each component must be able to
//!
//! 1. **serialize** its abstract state into a wire [`Fragment`],
//! 2. **deserialize** a fragment (possibly missing or blank) back into a
//!    state at a target location, and
//! 3. **proceed**-filter an incoming precondition cheaply, before the full
//!    forward analysis is paid for.
//!
//! Components never see each other's namespaces, so the composite of these
//! operators is associative and order-independent.
//!
//! The module also carries the backward direction: condition operators walk
//! a counterexample path in reverse to accumulate the weakest violation
//! condition (see [`condition`]).

mod components;
mod condition;
mod exchange;

pub use components::{
    AlwaysProceed, CallstackExchange, CallstackState, ValueBackwardTransfer, ValueMapExchange,
    ValueMapState,
};
pub use condition::{BackwardTransfer, CompositeConditionOperator, ViolationConditionOperator};
pub use exchange::{
    ComponentExchange, ComponentState, CompositeExchange, CompositeState, DynExchange, Proceed,
};
