//! Range table module.
//!
//! This module contains the bucketed table the registry keeps its
//! views in. Identifiers are grouped into fixed-size buckets so that
//! lookups stay O(1) and ranges can be walked bucket by bucket.

use std::collections::{BTreeSet, HashMap};

use super::ViewId;

pub const BUCKET_SIZE: ViewId = 256;

#[derive(Debug)]
pub struct RangeTable<T> {
    buckets: HashMap<ViewId, Vec<Option<T>>>,
    keys: BTreeSet<ViewId>,
    len: usize,
}

impl<T> Default for RangeTable<T> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            keys: BTreeSet::new(),
            len: 0,
        }
    }
}

impl<T> RangeTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn split(id: ViewId) -> (ViewId, usize) {
        (id / BUCKET_SIZE, (id % BUCKET_SIZE) as usize)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: ViewId) -> Option<&T> {
        let (key, slot) = Self::split(id);
        self.buckets.get(&key)?.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ViewId) -> Option<&mut T> {
        let (key, slot) = Self::split(id);
        self.buckets.get_mut(&key)?.get_mut(slot)?.as_mut()
    }

    pub fn contains(&self, id: ViewId) -> bool {
        self.get(id).is_some()
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, id: ViewId, value: T) -> Option<T> {
        let (key, slot) = Self::split(id);
        let bucket = self.buckets.entry(key).or_insert_with(|| {
            let mut bucket = Vec::with_capacity(BUCKET_SIZE as usize);
            bucket.resize_with(BUCKET_SIZE as usize, || None);
            bucket
        });
        self.keys.insert(key);

        let prev = bucket[slot].replace(value);
        if prev.is_none() {
            self.len += 1;
        }
        prev
    }

    pub fn remove(&mut self, id: ViewId) -> Option<T> {
        let (key, slot) = Self::split(id);
        let bucket = self.buckets.get_mut(&key)?;
        let prev = bucket.get_mut(slot)?.take();

        if prev.is_some() {
            self.len -= 1;
            if bucket.iter().all(Option::is_none) {
                self.buckets.remove(&key);
                self.keys.remove(&key);
            }
        }

        prev
    }

    /// Gets the next occupied identifier of the range `[start, end)`
    /// after the cursor. A cursor of -1 starts the walk. The cursor is
    /// moved to the returned identifier, so the walk never goes back
    /// and tolerates insertions made meanwhile.
    pub fn get_range(&self, start: ViewId, end: ViewId, cursor: &mut i64) -> Option<ViewId> {
        let from = if *cursor < 0 {
            start as i64
        } else {
            (*cursor + 1).max(start as i64)
        };
        if from >= end as i64 {
            return None;
        }
        let from = from as ViewId;

        let first_key = from / BUCKET_SIZE;
        for key in self.keys.range(first_key..) {
            let base = key * BUCKET_SIZE;
            if base >= end {
                break;
            }

            let bucket = match self.buckets.get(key) {
                Some(bucket) => bucket,
                None => continue,
            };

            let first_slot = if *key == first_key {
                (from % BUCKET_SIZE) as usize
            } else {
                0
            };

            for (slot, value) in bucket.iter().enumerate().skip(first_slot) {
                let id = base + slot as ViewId;
                if id >= end {
                    return None;
                }
                if value.is_some() {
                    *cursor = id as i64;
                    return Some(id);
                }
            }
        }

        None
    }

    /// Lists the occupied identifiers in ascending order.
    pub fn ids(&self) -> Vec<ViewId> {
        let mut ids = Vec::with_capacity(self.len);
        for key in &self.keys {
            if let Some(bucket) = self.buckets.get(key) {
                ids.extend(
                    bucket
                        .iter()
                        .enumerate()
                        .filter(|(_, value)| value.is_some())
                        .map(|(slot, _)| key * BUCKET_SIZE + slot as ViewId),
                );
            }
        }
        ids
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.keys
            .iter()
            .filter_map(|key| self.buckets.get(key))
            .flat_map(|bucket| bucket.iter().flatten())
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.buckets
            .values_mut()
            .flat_map(|bucket| bucket.iter_mut().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut table = RangeTable::new();
        assert!(table.insert(3, "a").is_none());
        assert_eq!(Some("a"), table.insert(3, "b"));
        assert_eq!(1, table.len());
        assert_eq!(Some(&"b"), table.get(3));
        assert_eq!(Some("b"), table.remove(3));
        assert!(table.is_empty());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn range_walk() {
        let mut table = RangeTable::new();
        for id in [1, 5, 300, 1_000, 300_001] {
            table.insert(id, id);
        }

        let mut cursor = -1;
        let mut found = vec![];
        while let Some(id) = table.get_range(1, 1_000, &mut cursor) {
            found.push(id);
        }
        assert_eq!(vec![1, 5, 300], found);
        assert_eq!(vec![1, 5, 300, 1_000, 300_001], table.ids());
    }

    #[test]
    fn range_walk_tolerates_insertions() {
        let mut table = RangeTable::new();
        table.insert(300_000, 0);

        let mut cursor = -1;
        assert_eq!(Some(300_000), table.get_range(300_000, 400_000, &mut cursor));
        table.insert(300_001, 1);
        table.insert(350_000, 2);
        assert_eq!(Some(300_001), table.get_range(300_000, 400_000, &mut cursor));
        assert_eq!(Some(350_000), table.get_range(300_000, 400_000, &mut cursor));
        assert_eq!(None, table.get_range(300_000, 400_000, &mut cursor));
    }
}
