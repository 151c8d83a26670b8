// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap-allocated object (record) — the prototype-based `object` type.
//!
//! `spec.md` §3 describes the property map as "a lock-free hash table
//! stored in an atomic pointer", which matters for a multi-context heap
//! where one context publishes a map another observes concurrently
//! (`spec.md` §5's "acquire/release... where an object is being published").
//! Within a single context, access is sequential, so this crate uses a
//! plain ordered map; the publish-once, read-many pattern the real
//! implementation optimises for is preserved at the API level (properties
//! are looked up by name, never iterated in allocation order).

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::value::Value;

/// A property's stored value: either an ordinary value, or a getter/setter
/// pair that the interpreter must invoke as calls (`spec.md` §4.3 `SET`/
/// `GET`: "Setter dispatch is signalled by the property engine returning a
/// 'setter' sentinel error... re-driven as a call"). This crate expresses
/// that directly as a variant rather than a sentinel error, per the
/// redesign note in `spec.md` §9.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropValue {
    Plain(Value),
    Dynamic { getter: Value, setter: Value },
}

/// Opaque native finalizer hook, invoked by `Context::unload`/on explicit
/// object disposal (the real GC would invoke it on collection; this crate
/// has no collector — see DESIGN.md).
pub type NativeFinalizer = fn(private_data: u64);

/// A prototype-based record.
#[derive(Clone, Debug, Default)]
pub struct KObject {
    properties: BTreeMap<String, PropValue>,
    /// `Value::Bad` denotes "no prototype" (chain terminator).
    pub prototype: Value,
    /// Opaque tag identifying the native class backing this instance, if
    /// any (`spec.md` §3: "optional private-data class tag for
    /// native-backed objects").
    pub private_class_tag: Option<u64>,
    pub finalizer: Option<NativeFinalizer>,
}

impl KObject {
    #[must_use]
    pub fn new() -> Self {
        Self {
            properties: BTreeMap::new(),
            prototype: Value::Bad,
            private_class_tag: None,
            finalizer: None,
        }
    }

    #[must_use]
    pub fn with_prototype(prototype: Value) -> Self {
        Self {
            prototype,
            ..Self::new()
        }
    }

    /// Own-property lookup (shallow), used by `HAS_SH_PROP8`.
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<PropValue> {
        self.properties.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: PropValue) {
        self.properties.insert(String::from(name), value);
    }

    /// Returns the removed value, if the property existed.
    pub fn delete(&mut self, name: &str) -> Option<PropValue> {
        self.properties.remove(name)
    }

    #[must_use]
    pub fn has_own(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod kobject_test {
    use super::*;

    #[test]
    fn own_lookup_misses_prototype_chain() {
        let mut obj = KObject::new();
        obj.set("x", PropValue::Plain(Value::Int(1)));
        assert_eq!(obj.get_own("x"), Some(PropValue::Plain(Value::Int(1))));
        assert_eq!(obj.get_own("y"), None);
    }

    #[test]
    fn delete_removes_property() {
        let mut obj = KObject::new();
        obj.set("x", PropValue::Plain(Value::Int(1)));
        assert!(obj.delete("x").is_some());
        assert!(!obj.has_own("x"));
    }

    #[test]
    fn dynamic_property_round_trips() {
        let mut obj = KObject::new();
        obj.set(
            "p",
            PropValue::Dynamic {
                getter: Value::Int(1),
                setter: Value::Int(2),
            },
        );
        match obj.get_own("p") {
            Some(PropValue::Dynamic { getter, setter }) => {
                assert_eq!(getter, Value::Int(1));
                assert_eq!(setter, Value::Int(2));
            }
            _ => panic!("expected dynamic property"),
        }
    }
}
