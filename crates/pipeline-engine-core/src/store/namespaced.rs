//! Per-node namespaced view over the shared state.
//!
//! Two concerns collide in one shared mapping: per-node outputs, which must
//! not collide by name when two nodes both write `output`, and cross-cutting
//! execution metadata, which must stay global. The proxy resolves this by
//! routing ordinary writes into `values[node_id]` and letting special keys
//! through to the root, without node authors having to know which keys are
//! "global".

use serde_json::{Map, Value};

use super::{is_special_key, SharedState};

/// A node-scoped view of the shared state.
///
/// - reads check the node's namespace first, then fall back to the root;
/// - writes to ordinary keys land in `values[node_id]`;
/// - special keys (`__…__` / `_pflow_…`) read and write the root directly.
///
/// When namespacing is disabled for the workflow every access goes to the
/// root.
pub struct NamespacedStore<'a> {
    shared: &'a mut SharedState,
    node_id: String,
    enabled: bool,
}

impl<'a> NamespacedStore<'a> {
    pub fn new(shared: &'a mut SharedState, node_id: &str, enabled: bool) -> Self {
        Self {
            shared,
            node_id: node_id.to_string(),
            enabled,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The underlying root state. Composition nodes need it to run child
    /// flows; ordinary nodes should not.
    pub fn root(&self) -> &SharedState {
        self.shared
    }

    /// Mutable access to the underlying root state.
    pub fn root_mut(&mut self) -> &mut SharedState {
        self.shared
    }

    fn namespace(&self) -> Option<&Map<String, Value>> {
        self.shared.values.get(&self.node_id).and_then(Value::as_object)
    }

    fn namespace_mut(&mut self) -> &mut Map<String, Value> {
        let entry = self
            .shared
            .values
            .entry(self.node_id.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut().expect("namespace entry is an object")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if is_special_key(key) || !self.enabled {
            return self.shared.values.get(key);
        }
        self.namespace()
            .and_then(|ns| ns.get(key))
            .or_else(|| self.shared.values.get(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if is_special_key(&key) || !self.enabled {
            self.shared.values.insert(key, value);
        } else {
            self.namespace_mut().insert(key, value);
        }
    }

    /// Inserts `value` only when `key` is absent; returns the value now
    /// stored under the key.
    pub fn set_default(&mut self, key: &str, value: Value) -> &Value {
        if self.get(key).is_none() {
            self.insert(key.to_string(), value);
        }
        self.get(key).expect("key was just ensured")
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if is_special_key(key) || !self.enabled {
            return self.shared.values.remove(key);
        }
        let from_namespace = self
            .shared
            .values
            .get_mut(&self.node_id)
            .and_then(Value::as_object_mut)
            .and_then(|ns| ns.remove(key));
        from_namespace.or_else(|| self.shared.values.remove(key))
    }
}
