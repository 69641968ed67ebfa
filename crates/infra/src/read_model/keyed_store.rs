use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::RwLock;

/// Key/value store abstraction for disposable read models.
///
/// Rows are upserted by natural key and only ever removed wholesale by
/// `clear` during an administrative rebuild. Implementations must tolerate
/// being fully rebuilt from the event log at any time.
pub trait ReadStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    fn list(&self) -> Vec<V>;
    /// Remove every row (rebuild support).
    fn clear(&self);
}

impl<K, V, S> ReadStore<K, V> for Arc<S>
where
    S: ReadStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug)]
pub struct InMemoryReadStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryReadStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReadStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ReadStore<K, V> for InMemoryReadStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, value);
        }
    }

    fn list(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_overwrites_by_key() {
        let store = InMemoryReadStore::<String, u64>::new();
        store.upsert("AST-001".to_string(), 1);
        store.upsert("AST-001".to_string(), 2);
        store.upsert("AST-002".to_string(), 3);

        assert_eq!(store.get(&"AST-001".to_string()), Some(2));
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn clear_removes_everything() {
        let store = InMemoryReadStore::<String, u64>::new();
        store.upsert("AST-001".to_string(), 1);
        store.clear();

        assert!(store.get(&"AST-001".to_string()).is_none());
        assert!(store.list().is_empty());
    }
}
