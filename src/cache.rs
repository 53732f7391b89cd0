use std::collections::{BTreeMap, HashMap};

/// Two-level keyed store: `id -> name -> value`.
///
/// A collection for an `id` exists only while it holds at least one entry,
/// removing the last name also removes the id.
#[derive(Debug, Clone)]
pub struct ObjectCache<V> {
    map: HashMap<Box<str>, BTreeMap<Box<str>, V>>,
}

impl<V> Default for ObjectCache<V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<V> ObjectCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: &str, name: &str, value: V) {
        self.map
            .entry(id.into())
            .or_default()
            .insert(name.into(), value);
    }

    pub fn get(&self, id: &str, name: &str) -> Option<&V> {
        self.map.get(id)?.get(name)
    }

    pub fn get_mut(&mut self, id: &str, name: &str) -> Option<&mut V> {
        self.map.get_mut(id)?.get_mut(name)
    }

    /// Removes one entry, pruning the id once it has nothing left.
    pub fn delete(&mut self, id: &str, name: &str) -> Option<V> {
        let names = self.map.get_mut(id)?;
        let value = names.remove(name);

        if names.is_empty() {
            self.map.remove(id);
        }

        value
    }

    /// Removes every entry stored under `id`.
    pub fn delete_all(&mut self, id: &str) -> Vec<(Box<str>, V)> {
        self.map
            .remove(id)
            .map(|names| names.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn entries(&self, id: &str) -> Vec<(&str, &V)> {
        match self.map.get(id) {
            Some(names) => names.iter().map(|(k, v)| (k.as_ref(), v)).collect(),
            None => Vec::new(),
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    /// Number of ids holding at least one entry.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut cache = ObjectCache::new();
        cache.set("node1", "color", 1);
        cache.set("node1", "size", 2);

        assert_eq!(cache.get("node1", "color"), Some(&1));
        assert_eq!(cache.get("node1", "size"), Some(&2));
        assert_eq!(cache.get("node1", "missing"), None);
        assert_eq!(cache.get("missing", "color"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut cache = ObjectCache::new();
        cache.set("node1", "color", 1);
        cache.set("node1", "color", 3);

        assert_eq!(cache.get("node1", "color"), Some(&3));
        assert_eq!(cache.entries("node1").len(), 1);
    }

    #[test]
    fn test_delete_last_prunes_id() {
        let mut cache = ObjectCache::new();
        cache.set("node1", "color", 1);
        cache.set("node1", "size", 2);

        assert_eq!(cache.delete("node1", "color"), Some(1));
        assert!(cache.contains_id("node1"));

        assert_eq!(cache.delete("node1", "size"), Some(2));
        assert!(!cache.contains_id("node1"));
        assert!(cache.entries("node1").is_empty());
        assert_eq!(cache.get("node1", "size"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut cache: ObjectCache<i32> = ObjectCache::new();
        assert_eq!(cache.delete("node1", "color"), None);

        cache.set("node1", "color", 1);
        assert_eq!(cache.delete("node1", "size"), None);
        assert_eq!(cache.get("node1", "color"), Some(&1));
    }

    #[test]
    fn test_entries() {
        let mut cache = ObjectCache::new();
        cache.set("node1", "b", 2);
        cache.set("node1", "a", 1);
        cache.set("node2", "c", 3);

        let entries = cache.entries("node1");
        assert_eq!(entries, vec![("a", &1), ("b", &2)]);
        assert!(cache.entries("node3").is_empty());
    }

    #[test]
    fn test_delete_all() {
        let mut cache = ObjectCache::new();
        cache.set("node1", "a", 1);
        cache.set("node1", "b", 2);
        cache.set("node2", "a", 3);

        let removed = cache.delete_all("node1");
        assert_eq!(removed.len(), 2);
        assert!(!cache.contains_id("node1"));
        assert_eq!(cache.len(), 1);
    }
}
