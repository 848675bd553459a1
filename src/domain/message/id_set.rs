// mailbase-lib, a Rust library for local mail storage and indexing.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Ordered id set module.
//!
//! This module contains the sorted, deduplicated container of message
//! identifiers every view is backed by.

use serde::Serialize;
use std::{collections::TryReserveError, iter::FromIterator, ops, slice};

use super::{Error, MessageId, Result};

/// Represents a sorted set of message identifiers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct OrderedIdSet(Vec<MessageId>);

impl OrderedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the position of the first element greater than or
    /// equal to the given id.
    fn lower_bound(&self, id: MessageId) -> usize {
        self.0.partition_point(|cur| *cur < id)
    }

    /// Inserts the given id. Returns `false` when the id was already
    /// part of the set.
    pub fn insert(&mut self, id: MessageId) -> Result<bool> {
        let pos = self.lower_bound(id);
        if self.0.get(pos) == Some(&id) {
            return Ok(false);
        }

        self.0
            .try_reserve(1)
            .map_err(|err: TryReserveError| Error::AllocError(err, self.0.len() + 1))?;
        self.0.insert(pos, id);
        Ok(true)
    }

    /// Removes the given id. Returns `false` when the id was not part
    /// of the set.
    pub fn remove(&mut self, id: MessageId) -> bool {
        let start = self.lower_bound(id);
        let end = start + self.0[start..].partition_point(|cur| *cur == id);
        if start == end {
            return false;
        }
        self.0.drain(start..end);
        true
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Iterates over the ids in ascending order.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.0.iter())
    }

    pub fn first(&self) -> Option<MessageId> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<MessageId> {
        self.0.last().copied()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    /// Counts the ids present in both sets. The smaller set drives
    /// the iteration.
    pub fn intersection_len(&self, other: &Self) -> usize {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().filter(|id| large.contains(*id)).count()
    }

    pub fn to_vec(&self) -> Vec<MessageId> {
        self.0.clone()
    }
}

impl ops::Deref for OrderedIdSet {
    type Target = [MessageId];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Iterator over an [`OrderedIdSet`], in ascending order.
#[derive(Clone, Debug)]
pub struct Iter<'a>(slice::Iter<'a, MessageId>);

impl<'a> Iterator for Iter<'a> {
    type Item = MessageId;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<'a> DoubleEndedIterator for Iter<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0.next_back().copied()
    }
}

impl<'a> IntoIterator for &'a OrderedIdSet {
    type Item = MessageId;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<MessageId> for OrderedIdSet {
    fn from_iter<T: IntoIterator<Item = MessageId>>(iter: T) -> Self {
        let mut ids: Vec<MessageId> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::OrderedIdSet;

    #[test]
    fn insert_keeps_order_and_uniqueness() {
        let mut set = OrderedIdSet::new();
        assert!(set.insert(5).unwrap());
        assert!(set.insert(1).unwrap());
        assert!(set.insert(3).unwrap());
        assert!(!set.insert(3).unwrap());
        assert_eq!(vec![1, 3, 5], set.iter().collect::<Vec<_>>());
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut set = OrderedIdSet::from_iter([1, 2, 3]);
        assert!(!set.remove(4));
        assert!(set.remove(2));
        assert!(!set.contains(2));
        assert_eq!(2, set.len());
    }

    #[test]
    fn iteration_is_restartable() {
        let set = OrderedIdSet::from_iter([9, 4, 4, 7]);
        let first: Vec<_> = set.iter().collect();
        let second: Vec<_> = set.iter().collect();
        assert_eq!(vec![4, 7, 9], first);
        assert_eq!(first, second);
    }

    #[test]
    fn intersection_len_uses_both_orders() {
        let small = OrderedIdSet::from_iter([2, 4]);
        let large = OrderedIdSet::from_iter([1, 2, 3, 4, 5]);
        assert_eq!(2, small.intersection_len(&large));
        assert_eq!(2, large.intersection_len(&small));
    }
}
