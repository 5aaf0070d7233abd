//! Serialized abstract states.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The namespace reserved for protocol-level fields in the wire envelope.
///
/// Component analyses must not use this namespace. The `@` prefix keeps it
/// out of the identifier space of any component class name.
pub const PROTOCOL_NAMESPACE: &str = "@protocol";

/// One component's serialized state: string keys to string values.
///
/// An omitted key is equivalent to "use the component's initial value" on
/// the receiving side, so fragments never need to be complete.
pub type Fragment = BTreeMap<String, String>;

/// A serialized composite abstract state.
///
/// Maps a component identifier to that component's [`Fragment`]. Each
/// component reads only its own namespace, so the presence or absence of
/// other components' entries never breaks round-tripping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Fragment>);

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fragment for a component namespace, if present.
    pub fn fragment(&self, namespace: &str) -> Option<&Fragment> {
        self.0.get(namespace)
    }

    /// Inserts or replaces a component's fragment.
    pub fn insert_fragment(&mut self, namespace: impl Into<String>, fragment: Fragment) {
        self.0.insert(namespace.into(), fragment);
    }

    /// Removes and returns a component's fragment.
    pub fn remove_fragment(&mut self, namespace: &str) -> Option<Fragment> {
        self.0.remove(namespace)
    }

    /// Merges another payload into this one.
    ///
    /// Namespaces present in `other` replace those in `self`. Composition of
    /// component fragments is order-independent because distinct components
    /// use distinct namespaces; overlap only happens when re-merging a
    /// component's own newer fragment.
    pub fn merge(&mut self, other: Payload) {
        self.0.extend(other.0);
    }

    /// Iterates over `(namespace, fragment)` pairs in namespace order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Fragment)> {
        self.0.iter()
    }

    /// The component namespaces present in this payload.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, Fragment)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Fragment)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fragment(pairs: &[(&str, &str)]) -> Fragment {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn foreign_namespaces_are_invisible() {
        let mut payload = Payload::new();
        payload.insert_fragment("callstack", fragment(&[("frames", "main")]));
        payload.insert_fragment("values", fragment(&[("x", "1")]));

        // Removing one component's fragment leaves the other untouched.
        payload.remove_fragment("callstack");
        assert_eq!(payload.fragment("values"), Some(&fragment(&[("x", "1")])));
        assert_eq!(payload.fragment("callstack"), None);
    }

    #[test]
    fn merge_is_namespace_wise() {
        let mut a = Payload::new();
        a.insert_fragment("values", fragment(&[("x", "1")]));

        let mut b = Payload::new();
        b.insert_fragment("callstack", fragment(&[("frames", "main")]));

        a.merge(b);
        assert_eq!(a.len(), 2);
    }

    proptest! {
        #[test]
        fn json_round_trip(
            entries in proptest::collection::btree_map(
                "[a-z]{1,8}",
                proptest::collection::btree_map("[a-zA-Z0-9_.]{0,12}", ".{0,20}", 0..4),
                0..4,
            )
        ) {
            let payload: Payload = entries
                .into_iter()
                .map(|(ns, frag)| (ns, frag.into_iter().collect::<Fragment>()))
                .collect();

            let json = serde_json::to_string(&payload).unwrap();
            let back: Payload = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, payload);
        }
    }
}
