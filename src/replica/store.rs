use std::collections::HashMap;

/// In-memory key→value table owned by exactly one replica. It carries no
/// lock of its own; the owning replica's state lock guards every access.
#[derive(Debug, Default)]
pub(crate) struct KeyValueStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore {
    pub(crate) fn new() -> Self {
        KeyValueStore {
            entries: HashMap::new(),
        }
    }

    /// Insert or overwrite. Empty strings are legitimate keys and values.
    pub(crate) fn put(&mut self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    /// Detached full copy. Mutating the store afterwards does not affect a
    /// snapshot already taken.
    pub(crate) fn snapshot(&self) -> HashMap<String, String> {
        self.entries.clone()
    }

    /// Wholesale overwrite: keys absent from `snapshot` are dropped. A
    /// full-state push never merges.
    pub(crate) fn replace(&mut self, snapshot: HashMap<String, String>) {
        self.entries = snapshot;
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_last_put() {
        let mut store = KeyValueStore::new();

        store.put("a".into(), "1".into());
        store.put("a".into(), "2".into());

        assert_eq!(Some("2".to_owned()), store.get("a"));
    }

    #[test]
    fn get_of_missing_key_is_none() {
        let store = KeyValueStore::new();

        assert_eq!(None, store.get("nope"));
    }

    #[test]
    fn empty_string_is_a_value_not_absence() {
        let mut store = KeyValueStore::new();

        store.put("a".into(), "".into());

        assert_eq!(Some(String::new()), store.get("a"));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let mut store = KeyValueStore::new();
        store.put("a".into(), "1".into());

        let snapshot = store.snapshot();
        store.put("b".into(), "2".into());

        assert_eq!(1, snapshot.len());
        assert_eq!(Some("1"), snapshot.get("a").map(String::as_str));
    }

    #[test]
    fn replace_drops_keys_missing_from_snapshot() {
        let mut store = KeyValueStore::new();
        store.put("a".into(), "1".into());
        store.put("b".into(), "2".into());

        let mut incoming = HashMap::new();
        incoming.insert("c".to_owned(), "3".to_owned());
        store.replace(incoming);

        assert_eq!(None, store.get("a"));
        assert_eq!(None, store.get("b"));
        assert_eq!(Some("3".to_owned()), store.get("c"));
        assert_eq!(1, store.len());
    }

    #[test]
    fn replace_with_empty_snapshot_clears_store() {
        let mut store = KeyValueStore::new();
        store.put("a".into(), "1".into());

        store.replace(HashMap::new());

        assert_eq!(0, store.len());
    }
}
