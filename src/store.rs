//! Process-wide store shared with macro bodies.
//!
//! Macros use this as a side channel: a multi-map they can append to while
//! expanding (collected style rules, route tables, etc.) and that later build
//! steps can drain. Keys accumulate values in insertion order.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::ast::Value;

lazy_static! {
    static ref GLOBAL: Store = Store::new();
}

/// The process-wide store handle.
pub fn global() -> &'static Store {
    &GLOBAL
}

#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<HashMap<String, Vec<Value>>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn push(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.entry(key.to_string()).or_default().push(value);
    }

    pub fn get(&self, key: &str) -> Vec<Value> {
        let inner = self.inner.lock().unwrap();
        inner.get(key).cloned().unwrap_or_default()
    }

    /// Remove and return all values for a key.
    pub fn drain(&self, key: &str) -> Vec<Value> {
        let mut inner = self.inner.lock().unwrap();
        inner.remove(key).unwrap_or_default()
    }

    /// Stable snapshot of the whole store, sorted by key. This is what the
    /// sidecar receives with each macro invocation.
    pub fn snapshot(&self) -> Vec<(String, Vec<Value>)> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<(String, Vec<Value>)> = inner
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Merge appends returned by a macro invocation.
    pub fn merge(&self, appends: Vec<(String, Value)>) {
        let mut inner = self.inner.lock().unwrap();
        for (key, value) in appends {
            inner.entry(key).or_default().push(value);
        }
    }

    /// Test isolation.
    pub fn reset(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get_drain() {
        let store = Store::new();
        store.push("css", Value::String(".a{}".to_string()));
        store.push("css", Value::String(".b{}".to_string()));
        assert_eq!(store.get("css").len(), 2);
        assert_eq!(store.drain("css").len(), 2);
        assert!(store.get("css").is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let store = Store::new();
        store.push("z", Value::Number(1.0));
        store.push("a", Value::Number(2.0));
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].0, "a");
        assert_eq!(snapshot[1].0, "z");
    }
}
