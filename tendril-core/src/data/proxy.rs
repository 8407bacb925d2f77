//! Deep Reactive Wrapping
//!
//! [`reactive`] turns a composite value into one whose writes invoke an
//! effect. It marks the root node and every composite node reachable from it
//! (eagerly, before returning), then hands back the same handle. Since writes
//! only happen through [`Node::set`], [`Node::delete`] and [`Node::push`],
//! the handle *is* the interception wrapper: every path to a marked node sees
//! the same behavior.
//!
//! # Write Contract
//!
//! On a marked node:
//!
//! - `set` of a value that is the same (see [`Data::same`]) as the current
//!   entry is rejected and returns `false`. This is what keeps a computed
//!   value from looping forever when it writes back what is already stored.
//! - A composite value being stored is wrapped with the node's effect first.
//! - After a real change the effect runs once, with no node lock held.
//! - `delete` always succeeds and always runs the effect.
//!
//! Unmarked nodes follow the same storage rules but run no effect.

use super::tagging::{can_be_reactive, mark_as_reactive};
use super::{Body, Data, Effect, Key, Node};

/// Most `Null` slots a single out-of-range array write may pad in.
pub const MAX_ARRAY_GAP: usize = 1 << 16;

/// Deep-wrap `value` so that writes anywhere inside it invoke `effect`.
///
/// Scalars and already-reactive nodes are returned unchanged. A node that is
/// already reactive keeps the effect it was first wrapped with.
pub fn reactive(value: Data, effect: Effect) -> Data {
    if !can_be_reactive(&value) {
        return value;
    }
    if let Data::Composite(node) = &value {
        mark_as_reactive(node, &effect);
        for child in node.composite_children() {
            reactive(Data::Composite(child), effect.clone());
        }
    }
    value
}

impl Node {
    /// Write one entry.
    ///
    /// Returns `false` when the write was rejected: the new value is the same
    /// as the stored one, or the key is not a valid index on an array. Writing
    /// past the end of an array pads the gap with `Null`, up to
    /// [`MAX_ARRAY_GAP`] slots; farther writes are rejected.
    pub fn set(&self, key: impl Into<Key>, value: Data) -> bool {
        let key = key.into();
        if self.get(key.clone()).is_some_and(|old| old.same(&value)) {
            return false;
        }

        let effect = self.effect();
        let value = match &effect {
            Some(effect) => reactive(value, effect.clone()),
            None => value,
        };

        {
            let mut body = self.inner.body.write();
            match &mut *body {
                Body::Object(map) => {
                    let field = key.into_field();
                    if map.get(&field).is_some_and(|old| old.same(&value)) {
                        return false;
                    }
                    map.insert(field, value);
                }
                Body::Array(items) => {
                    let Some(index) = key.as_index() else {
                        tracing::trace!(?key, "rejected non-index write to array");
                        return false;
                    };
                    if index >= items.len() {
                        if index - items.len() > MAX_ARRAY_GAP {
                            tracing::trace!(index, len = items.len(), "rejected array write past gap limit");
                            return false;
                        }
                        items.resize(index + 1, Data::Null);
                    } else if items[index].same(&value) {
                        return false;
                    }
                    items[index] = value;
                }
            }
        }

        if let Some(effect) = effect {
            effect();
        }
        true
    }

    /// Remove one entry.
    ///
    /// Object fields are removed (later fields keep their order). Array slots
    /// are cleared to `Null` so indices do not shift. Always succeeds.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        {
            let mut body = self.inner.body.write();
            match &mut *body {
                Body::Object(map) => {
                    map.shift_remove(&key.into_field());
                }
                Body::Array(items) => {
                    if let Some(slot) = key.as_index().and_then(|i| items.get_mut(i)) {
                        *slot = Data::Null;
                    }
                }
            }
        }

        if let Some(effect) = self.effect() {
            effect();
        }
        true
    }

    /// Append to an array as a single write.
    ///
    /// Returns `false` (and does nothing) on an object node.
    pub fn push(&self, value: Data) -> bool {
        let effect = self.effect();
        let value = match &effect {
            Some(effect) => reactive(value, effect.clone()),
            None => value,
        };

        {
            let mut body = self.inner.body.write();
            match &mut *body {
                Body::Array(items) => items.push(value),
                Body::Object(_) => return false,
            }
        }

        if let Some(effect) = effect {
            effect();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::is_reactive;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting_effect() -> (Effect, Arc<AtomicI32>) {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let effect: Effect = Arc::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        (effect, calls)
    }

    fn node(data: &Data) -> &Node {
        data.as_node().expect("composite")
    }

    #[test]
    fn scalars_pass_through() {
        let (effect, calls) = counting_effect();
        let value = reactive(Data::from(3), effect);
        assert!(value.same(&Data::from(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_write_runs_effect_once() {
        let (effect, calls) = counting_effect();
        let state = reactive(
            Data::object_from([("a", Data::object_from([("b", Data::from(1))]))]),
            effect,
        );

        let a = state.get("a").unwrap();
        assert!(node(&a).set("b", Data::from(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The nested object stays reactive for other keys too.
        let a = state.get("a").unwrap();
        assert!(is_reactive(&a));
        assert!(node(&a).set("c", Data::from(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn same_value_write_is_rejected() {
        let (effect, calls) = counting_effect();
        let state = reactive(Data::object_from([("n", Data::from(1))]), effect);

        assert!(!node(&state).set("n", Data::from(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(node(&state).set("n", Data::from(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stored_composites_are_wrapped() {
        let (effect, calls) = counting_effect();
        let state = reactive(Data::object(), effect);

        let child = Data::object();
        assert!(node(&state).set("child", child.clone()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(is_reactive(&child));

        node(&child).set("x", Data::from(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delete_always_runs_effect() {
        let (effect, calls) = counting_effect();
        let state = reactive(Data::object_from([("a", Data::from(1))]), effect);

        assert!(node(&state).delete("a"));
        assert!(node(&state).delete("missing"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(node(&state).is_empty());
    }

    #[test]
    fn wrapping_twice_returns_same_handle() {
        let (first, _) = counting_effect();
        let (second, second_calls) = counting_effect();

        let once = reactive(Data::object_from([("k", Data::from(1))]), first);
        let twice = reactive(once.clone(), second);

        assert!(once.same(&twice));
        assert_eq!(node(&twice).keys(), vec![Key::Field("k".into())]);

        node(&twice).set("k", Data::from(2));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cyclic_data_is_wrapped_once() {
        let (effect, calls) = counting_effect();
        let root = Node::object();
        root.set("me", Data::Composite(root.clone()));

        let state = reactive(Data::Composite(root.clone()), effect);
        assert!(is_reactive(&state));

        root.set("x", Data::from(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn array_writes() {
        let (effect, calls) = counting_effect();
        let list = reactive(Data::array(), effect);
        let list = node(&list);

        assert!(list.push(Data::from("a")));
        assert!(list.set(2usize, Data::from("c")));
        assert_eq!(list.len(), 3);
        assert!(list.get(1usize).unwrap().is_null());
        assert!(!list.set("length", Data::from(0)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(list.delete(0usize));
        assert_eq!(list.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn far_array_writes_are_rejected() {
        let (effect, calls) = counting_effect();
        let list = reactive(Data::array_from([Data::from(1)]), effect);
        let list = node(&list);

        assert!(!list.set(usize::MAX, Data::from(2)));
        assert!(!list.set("99999999999999", Data::from(2)));
        assert!(!list.set(MAX_ARRAY_GAP + 2, Data::from(2)));
        assert_eq!(list.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(list.set(MAX_ARRAY_GAP + 1, Data::from(2)));
        assert_eq!(list.len(), MAX_ARRAY_GAP + 2);
    }

    #[test]
    fn signed_index_names_are_not_array_keys() {
        let (effect, calls) = counting_effect();
        let list = reactive(Data::array_from([Data::from(1), Data::from(2)]), effect);
        let list = node(&list);

        assert!(!list.set("+1", Data::from(9)));
        assert!(list.get("+1").is_none());
        assert!(list.set("1", Data::from(9)));
        assert!(list.get(1usize).unwrap().same(&Data::from(9)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
