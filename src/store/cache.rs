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

//! Sort cache module.
//!
//! This module keeps the per-message values needed to sort, thread
//! and deduplicate messages without reading records back.

use std::collections::HashMap;

use crate::{MessageFlags, MessageId, MessageRecord};

/// Represents the sort orders the store can compare messages with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SortBy {
    Id,
    SentDate,
    ThreadedSentDate,
    ThreadedSentDateDescending,
    Size,
    Flags,
    Status,
    Attachment,
    From,
    To,
    Subject,
    AccountId,
    Parent,
    MessageIdHash,
}

impl SortBy {
    const ALL: [SortBy; 14] = [
        SortBy::Id,
        SortBy::SentDate,
        SortBy::ThreadedSentDate,
        SortBy::ThreadedSentDateDescending,
        SortBy::Size,
        SortBy::Flags,
        SortBy::Status,
        SortBy::Attachment,
        SortBy::From,
        SortBy::To,
        SortBy::Subject,
        SortBy::AccountId,
        SortBy::Parent,
        SortBy::MessageIdHash,
    ];

    pub fn to_i64(self) -> i64 {
        Self::ALL.iter().position(|sort| *sort == self).unwrap_or(0) as i64
    }

    /// Parses a stored sort order, falling back to the sent date.
    pub fn from_i64(value: i64) -> Self {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or(SortBy::SentDate)
    }
}

/// Represents one sort cache entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreItem {
    pub id: MessageId,
    pub parent_id: MessageId,
    pub sent_date: i64,
    /// Represents the most recent sent date of the sub-thread rooted
    /// at this message.
    pub child_sent_date: i64,
    pub thread_root_id: MessageId,
    pub size: u32,
    pub flags: MessageFlags,
    /// Represents the duplicate master, 0 when the message has no
    /// duplicate.
    pub master_id: MessageId,
    pub account_id: u16,
}

impl StoreItem {
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            parent_id: record.parent_id,
            sent_date: record.sent_time,
            child_sent_date: record.sent_time,
            thread_root_id: 0,
            size: record.size,
            flags: record.flags,
            master_id: 0,
            account_id: record.account_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct SortCache {
    items: HashMap<MessageId, StoreItem>,
}

impl SortCache {
    /// Gets the cached item, or an item filled with zeros when the
    /// message is unknown.
    pub fn get(&self, id: MessageId) -> StoreItem {
        self.items.get(&id).copied().unwrap_or_default()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn update(&mut self, item: StoreItem) {
        self.items.insert(item.id, item);
    }

    pub fn remove(&mut self, id: MessageId) -> Option<StoreItem> {
        self.items.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear()
    }

    pub fn ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.items.keys().copied()
    }

    /// Walks up the parent chain and returns the thread root. Cycles
    /// stop the walk at the message already visited.
    pub fn thread_root(&self, id: MessageId) -> MessageId {
        let mut root = id;
        let mut steps = 0;
        loop {
            let parent = self.get(root).parent_id;
            if parent == 0 || parent == id || !self.contains(parent) || steps > self.items.len() {
                return root;
            }
            root = parent;
            steps += 1;
        }
    }

    /// Propagates the sent date of the given message to the child
    /// sent date of its ancestors.
    pub fn propagate_child_sent_date(&mut self, id: MessageId) {
        let sent_date = self.get(id).sent_date;
        let mut current = self.get(id).parent_id;
        let mut steps = 0;
        while current != 0 && current != id && steps <= self.items.len() {
            match self.items.get_mut(&current) {
                Some(item) if item.child_sent_date < sent_date => {
                    item.child_sent_date = sent_date;
                    current = item.parent_id;
                }
                _ => break,
            }
            steps += 1;
        }
    }
}

/// Compares the masked flags of two messages.
pub fn compare_flag_range(a: MessageFlags, b: MessageFlags, range: MessageFlags) -> i64 {
    (a & range).bits() as i64 - (b & range).bits() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: MessageId, parent_id: MessageId, sent_date: i64) -> StoreItem {
        StoreItem {
            id,
            parent_id,
            sent_date,
            child_sent_date: sent_date,
            ..StoreItem::default()
        }
    }

    #[test]
    fn thread_root_and_child_dates() {
        let mut cache = SortCache::default();
        cache.update(item(1, 0, 10));
        cache.update(item(2, 1, 20));
        cache.update(item(3, 2, 30));
        cache.propagate_child_sent_date(3);

        assert_eq!(1, cache.thread_root(3));
        assert_eq!(30, cache.get(1).child_sent_date);
        assert_eq!(30, cache.get(2).child_sent_date);
    }

    #[test]
    fn thread_root_survives_cycles() {
        let mut cache = SortCache::default();
        cache.update(item(1, 2, 10));
        cache.update(item(2, 1, 20));
        let root = cache.thread_root(1);
        assert!(root == 1 || root == 2);
    }
}
