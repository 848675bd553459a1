//! Duplicate table module.
//!
//! This module links messages sharing the same Message-ID header. Every
//! group has exactly one master, which is the first member of the
//! group.

use log::trace;
use std::collections::HashMap;

use super::MessageId;

#[derive(Debug, Default)]
pub struct DuplicateTable {
    groups: HashMap<MessageId, Vec<MessageId>>,
}

impl DuplicateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given id to the group owned by master, creating the
    /// group if needed.
    pub fn add_duplicate(&mut self, master: MessageId, id: MessageId) {
        let group = self.groups.entry(master).or_insert_with(|| vec![master]);
        if !group.contains(&id) {
            trace!("message {} is a duplicate of {}", id, master);
            group.push(id);
        }
    }

    /// Removes the given id from the group owned by master and
    /// returns the master of the remaining group, or 0 when the group
    /// no longer holds duplicates.
    pub fn remove_duplicate(&mut self, master: MessageId, id: MessageId) -> MessageId {
        let mut group = match self.groups.remove(&master) {
            Some(group) => group,
            None => return 0,
        };

        group.retain(|member| *member != id);
        if group.len() < 2 {
            return 0;
        }

        let new_master = group[0];
        self.groups.insert(new_master, group);
        new_master
    }

    /// Returns every member of the group owned by master, master
    /// included.
    pub fn duplicates(&self, master: MessageId) -> Option<&[MessageId]> {
        self.groups.get(&master).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::DuplicateTable;

    #[test]
    fn remove_master_reelects_next() {
        let mut table = DuplicateTable::new();
        table.add_duplicate(1, 2);
        table.add_duplicate(1, 3);

        assert_eq!(2, table.remove_duplicate(1, 1));
        assert_eq!(Some(&[2, 3][..]), table.duplicates(2));
        assert_eq!(None, table.duplicates(1));
    }

    #[test]
    fn remove_last_duplicate_clears_group() {
        let mut table = DuplicateTable::new();
        table.add_duplicate(1, 2);

        assert_eq!(0, table.remove_duplicate(1, 1));
        assert!(table.is_empty());
    }

    #[test]
    fn remove_non_master_keeps_master() {
        let mut table = DuplicateTable::new();
        table.add_duplicate(4, 6);
        table.add_duplicate(4, 8);

        assert_eq!(4, table.remove_duplicate(4, 6));
        assert_eq!(Some(&[4, 8][..]), table.duplicates(4));
    }
}
