//! The per-field merge registry a `Sample` class carries. Built-in fields
//! (`files`, `meta`, `fail_reason`, `processed`) have fixed rules baked into
//! [`crate::sample::merge_samples`]; user mixins register additional rules
//! here for fields living in [`crate::sample::Sample::extra`].

use std::collections::HashMap;

use cellophane_container::Value;

/// A pure, associative binary merge function over two field values.
pub type MergeFn = fn(&Value, &Value) -> Value;

/// Maps mixin-contributed field names to their merge function. Built once
/// at program start (static composition, per the engine's design notes) and
/// shared read-only thereafter — there is no runtime registration path.
#[derive(Clone, Default)]
pub struct MergeRegistry {
    fields: HashMap<&'static str, MergeFn>,
}

impl MergeRegistry {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    pub fn register(&mut self, field: &'static str, f: MergeFn) {
        self.fields.insert(field, f);
    }

    pub fn get(&self, field: &str) -> Option<MergeFn> {
        self.fields.get(field).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_right(_a: &Value, b: &Value) -> Value {
        b.clone()
    }

    #[test]
    fn unregistered_field_returns_none() {
        let registry = MergeRegistry::new();
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn registered_field_is_retrievable() {
        let mut registry = MergeRegistry::new();
        registry.register("priority", take_right);
        let f = registry.get("priority").expect("registered");
        assert_eq!(f(&Value::Int(1), &Value::Int(2)), Value::Int(2));
    }
}
