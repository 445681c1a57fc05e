//! Insertion-ordered keyed table.

use std::collections::BTreeMap;

/// A keyed table that iterates in insertion order.
///
/// Replacing a row keeps its original position, so re-merging an object
/// does not reorder it relative to its siblings.
#[derive(Debug, Clone)]
pub struct Table<K, T> {
    rows: BTreeMap<u64, (K, T)>,
    index: BTreeMap<K, u64>,
    next_seq: u64,
}

impl<K, T> Default for Table<K, T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            index: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Ord + Clone, T> Table<K, T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the row for `key`.
    pub fn get(&self, key: &K) -> Option<&T> {
        let seq = self.index.get(key)?;
        self.rows.get(seq).map(|(_, row)| row)
    }

    /// Returns the row for `key` mutably.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        let seq = self.index.get(key)?;
        self.rows.get_mut(seq).map(|(_, row)| row)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or replaces a row, returning the previous one.
    pub fn insert(&mut self, key: K, row: T) -> Option<T> {
        if let Some(seq) = self.index.get(&key) {
            return self
                .rows
                .insert(*seq, (key, row))
                .map(|(_, previous)| previous);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(key.clone(), seq);
        self.rows.insert(seq, (key, row));
        None
    }

    /// Removes and returns the row for `key`.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let seq = self.index.remove(key)?;
        self.rows.remove(&seq).map(|(_, row)| row)
    }

    /// Iterates rows in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values().map(|(_, row)| row)
    }

    /// Iterates rows mutably in insertion order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.rows.values_mut().map(|(_, row)| row)
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.rows.values().map(|(key, _)| key)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut table = Table::new();
        table.insert("c", 3);
        table.insert("a", 1);
        table.insert("b", 2);
        assert_eq!(table.values().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn replace_keeps_position() {
        let mut table = Table::new();
        table.insert("a", 1);
        table.insert("b", 2);
        assert_eq!(table.insert("a", 10), Some(1));
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(table.get(&"a"), Some(&10));
    }

    #[test]
    fn remove_row() {
        let mut table = Table::new();
        table.insert("a", 1);
        assert_eq!(table.remove(&"a"), Some(1));
        assert!(table.is_empty());
        assert_eq!(table.remove(&"a"), None);
    }
}
