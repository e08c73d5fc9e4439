use std::collections::HashMap;
use std::hash::Hash;

/// Insertion-ordered collection of uniquely keyed values.
///
/// Lookup goes through a key → position index; removal shifts later entries
/// and re-indexes them so iteration order always matches insertion order.
#[derive(Debug, Clone)]
pub struct KeyIndexVec<K, V> {
    items: Vec<(K, V)>,
    idx_by_key: HashMap<K, usize>,
}

impl<K, V> Default for KeyIndexVec<K, V> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            idx_by_key: HashMap::new(),
        }
    }
}

impl<K, V> KeyIndexVec<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Append a value under a new key.
    ///
    /// Returns the value back if the key is already present.
    pub fn push(&mut self, key: K, value: V) -> Result<(), V> {
        if self.idx_by_key.contains_key(&key) {
            return Err(value);
        }
        self.idx_by_key.insert(key.clone(), self.items.len());
        self.items.push((key, value));
        Ok(())
    }

    pub fn remove_by_key(&mut self, key: &K) -> Option<V> {
        let idx = self.idx_by_key.remove(key)?;
        let (removed_key, removed) = self.items.remove(idx);
        assert!(removed_key == *key);

        for (pos, (k, _)) in self.items.iter().enumerate().skip(idx) {
            self.idx_by_key.insert(k.clone(), pos);
        }

        Some(removed)
    }

    /// Keep only entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.items.retain(|(k, v)| keep(k, v));
        self.idx_by_key.clear();
        for (pos, (k, _)) in self.items.iter().enumerate() {
            self.idx_by_key.insert(k.clone(), pos);
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.idx_by_key.clear();
    }

    pub fn by_key(&self, key: &K) -> Option<&V> {
        self.idx_by_key.get(key).map(|&idx| &self.items[idx].1)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.idx_by_key.contains_key(key)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&K, &V)> {
        self.items.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl ExactSizeIterator<Item = &K> {
        self.items.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.items.len(), self.idx_by_key.len());
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_order_and_rejects_duplicates() {
        let mut vec = KeyIndexVec::default();
        assert!(vec.push("b", 2).is_ok());
        assert!(vec.push("a", 1).is_ok());
        assert_eq!(vec.push("b", 3), Err(3));

        let keys: Vec<_> = vec.keys().copied().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(vec.by_key(&"b"), Some(&2));
    }

    #[test]
    fn test_remove_reindexes_tail() {
        let mut vec = KeyIndexVec::default();
        for (i, k) in ["x", "y", "z"].into_iter().enumerate() {
            vec.push(k, i).unwrap();
        }
        assert_eq!(vec.remove_by_key(&"x"), Some(0));
        assert_eq!(vec.remove_by_key(&"x"), None);
        assert_eq!(vec.by_key(&"z"), Some(&2));
        assert_eq!(vec.len(), 2);
    }

    #[test]
    fn test_retain() {
        let mut vec = KeyIndexVec::default();
        for i in 0..6u32 {
            vec.push(i, i * 10).unwrap();
        }
        vec.retain(|k, _| k % 2 == 0);
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.by_key(&4), Some(&40));
        assert!(!vec.contains_key(&3));
    }
}
