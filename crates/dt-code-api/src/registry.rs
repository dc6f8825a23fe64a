//! Process-wide keyed store (spec.md §4.1).
//!
//! `Registry` is a type-erased `(group, key) -> value` map: the erasure
//! is `Arc<dyn Any + Send + Sync>` rather than a byte buffer, since
//! values never leave the process. `dashmap::DashMap` gives concurrent-safe
//! groups without an explicit outer lock.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dt_common::CoreError;

type AnyValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    groups: DashMap<String, DashMap<String, AnyValue>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_map(&self, group: &str) -> dashmap::mapref::one::Ref<'_, String, DashMap<String, AnyValue>> {
        if !self.groups.contains_key(group) {
            self.groups.entry(group.to_string()).or_default();
        }
        self.groups.get(group).expect("group just ensured")
    }

    /// Insert or replace `(group, key)`.
    pub fn set<V: Any + Send + Sync>(&self, group: &str, key: &str, value: V) {
        let map = self.group_map(group);
        map.insert(key.to_string(), Arc::new(value));
    }

    /// Fetch a typed value. Fails with `NotFound` if the key is absent, or
    /// `RuntimeError` if present under a different type (a programmer error --
    /// each group is only ever populated with one concrete type).
    pub fn get<V: Any + Send + Sync + Clone>(&self, group: &str, key: &str) -> Result<V, CoreError> {
        let map = self.group_map(group);
        let entry = map
            .get(key)
            .ok_or_else(|| CoreError::NotFound(format!("{group}/{key}")))?;
        entry
            .downcast_ref::<V>()
            .cloned()
            .ok_or_else(|| CoreError::RuntimeError(format!("type mismatch for {group}/{key}")))
    }

    /// Like [`get`](Self::get) but returns `default` instead of failing when absent.
    pub fn get_or<V: Any + Send + Sync + Clone>(&self, group: &str, key: &str, default: V) -> V {
        self.get(group, key).unwrap_or(default)
    }

    pub fn has(&self, group: &str, key: &str) -> bool {
        self.groups
            .get(group)
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    /// Idempotent.
    pub fn remove(&self, group: &str, key: &str) {
        if let Some(map) = self.groups.get(group) {
            map.remove(key);
        }
    }

    /// Snapshot of `(key, value)` pairs in `group` at call time. Values
    /// observed through the returned `Arc`s may still be mutated by
    /// concurrent writers if `V` itself has interior mutability (as `Module`
    /// does) -- only the key set is frozen, per spec.md §4.1.
    pub fn group_snapshot<V: Any + Send + Sync + Clone>(&self, group: &str) -> Vec<(String, V)> {
        let Some(map) = self.groups.get(group) else {
            return Vec::new();
        };
        let keys: Vec<String> = map.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| map.get(&k).and_then(|v| v.downcast_ref::<V>().cloned()).map(|v| (k, v)))
            .collect()
    }
}
