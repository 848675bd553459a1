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

//! Message store module.
//!
//! This module contains the store owning the persistent record of
//! every message, its Message-ID secondary index, the sort cache and
//! the duplicate table.

use chrono::Utc;
use log::{debug, info, trace, warn};
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::{
    message_id_hash, DuplicateTable, EngineConfig, MessageFlags, MessageId, MessageRecord,
    OrderedIdSet,
};

use super::{
    body::BodyStore,
    cache::{compare_flag_range, SortBy, SortCache, StoreItem},
    storage::{Storage, META_NEXT_ID, META_VERSION},
    threads::{compare_strings, normalize_message_id, parse_references, StringField},
    Error, Result,
};

pub const STORE_DB_NAME: &str = "store.sqlite";
pub const STORE_VERSION: i64 = 1;

/// Represents the notifications emitted by the store. They are
/// collected and handed over to the owner of the store, which
/// dispatches them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreEvent {
    /// A record became available while loading the store.
    MessageAvailable { id: MessageId, read: bool },
    /// A record was added or changed.
    MessageChanged(MessageId),
    /// A record was physically erased.
    MessageRemoved(MessageId),
    /// A record flagged as permanently removed was found while
    /// loading and needs to be removed again.
    PermanentlyRemoved(MessageId),
    /// A record needs to be indexed again.
    NeedsReindexing(MessageId),
    /// The bulk load reached the end of the storage.
    AllMessagesAvailable,
}

/// Represents the progress of the bulk load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadProgress {
    /// More blocks are left, the last loaded id is given.
    Partial(MessageId),
    Done,
}

pub struct Store {
    storage: Mutex<Storage>,
    bodies: Mutex<Box<dyn BodyStore>>,
    cache: SortCache,
    duplicates: DuplicateTable,
    children: HashMap<MessageId, OrderedIdSet>,
    deleted: VecDeque<MessageId>,
    deleted_set: HashSet<MessageId>,
    next_id: MessageId,
    loaded: bool,
    load_cursor: MessageId,
    load_block_size: usize,
    split_thread_on_subject_change: bool,
    needs_reindexing: bool,
    events: Vec<StoreEvent>,
}

impl Store {
    /// Opens the store located in the given directory. The caches
    /// are empty until [`Store::load_step`] walked the whole storage.
    pub fn open<P>(config: &EngineConfig, dir: P, bodies: Box<dyn BodyStore>) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let storage = Storage::open(dir.as_ref().join(STORE_DB_NAME))?;

        let next_id = storage.read_meta(META_NEXT_ID)?.unwrap_or(1).max(1) as MessageId;
        let version = storage.read_meta(META_VERSION)?.unwrap_or(0);
        if version != STORE_VERSION {
            storage.write_meta(META_VERSION, STORE_VERSION)?;
        }

        info!("store opened (version {}, next id {})", version, next_id);

        Ok(Self {
            storage: Mutex::new(storage),
            bodies: Mutex::new(bodies),
            cache: SortCache::default(),
            duplicates: DuplicateTable::new(),
            children: HashMap::new(),
            deleted: VecDeque::new(),
            deleted_set: HashSet::new(),
            next_id,
            loaded: false,
            load_cursor: 0,
            load_block_size: config.load_block_size(),
            split_thread_on_subject_change: config.split_thread_on_subject_change,
            needs_reindexing: version == 0 && next_id > 1,
            events: Vec::new(),
        })
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bodies(&self) -> MutexGuard<'_, Box<dyn BodyStore>> {
        self.bodies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Checks if the bulk load reached the end of the storage.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_split_thread_on_subject_change(&mut self, split: bool) {
        self.split_thread_on_subject_change = split;
    }

    /// Requests every loaded message to be announced for indexing
    /// again.
    pub fn set_needs_reindexing(&mut self, needs_reindexing: bool) {
        self.needs_reindexing = needs_reindexing;
    }

    /// Takes the pending notifications.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }

    /// Reads the next block of records, rebuilds their cache entries
    /// and announces them one by one.
    pub fn load_step(&mut self) -> Result<LoadProgress> {
        if self.loaded {
            return Ok(LoadProgress::Done);
        }

        let block = self
            .storage()
            .read_block(self.load_cursor, self.load_block_size)?;
        trace!(
            "loaded block of {} records after id {}",
            block.len(),
            self.load_cursor
        );

        let block_len = block.len();
        for record in block {
            let id = record.id;
            self.load_cursor = id;
            self.next_id = self.next_id.max(id + 1);

            if let Err(err) = self.update_cache(&record) {
                warn!("cannot cache message {}, skipping it: {}", id, err);
                continue;
            }

            if record.is_flag_set(MessageFlags::PERMANENTLY_REMOVED) {
                self.events.push(StoreEvent::PermanentlyRemoved(id));
                continue;
            }

            self.events.push(StoreEvent::MessageAvailable {
                id,
                read: record.is_flag_set(MessageFlags::IS_READ),
            });

            if self.needs_reindexing || record.is_flag_set(MessageFlags::IS_WAITING_FOR_INDEXING) {
                self.events.push(StoreEvent::NeedsReindexing(id));
            }
        }

        if block_len < self.load_block_size {
            self.loaded = true;
            self.needs_reindexing = false;
            self.storage().write_meta(META_NEXT_ID, self.next_id as i64)?;
            self.events.push(StoreEvent::AllMessagesAvailable);
            info!("all {} messages available", self.cache.len());
            return Ok(LoadProgress::Done);
        }

        Ok(LoadProgress::Partial(self.load_cursor))
    }

    /// Adds or re-saves a message. A record without id gets the next
    /// free identifier, which needs the bulk load to be done.
    pub fn add_message(&mut self, mut record: MessageRecord) -> Result<MessageId> {
        if record.id == 0 {
            if !self.loaded {
                return Err(Error::StoreUnavailableError);
            }

            self.resolve_thread_parent(&mut record)?;

            let now = Utc::now().timestamp();
            if record.recv_time == 0 {
                record.recv_time = now;
            }
            if record.sent_time == 0 {
                record.sent_time = now;
            }

            record.id = self.next_id;
            self.next_id += 1;
            debug!("adding message {}", record.id);
        } else {
            if self.deleted_set.contains(&record.id) {
                return Err(Error::FindMessageError(record.id));
            }
            self.next_id = self.next_id.max(record.id + 1);
            debug!("saving message {}", record.id);
        }

        {
            let storage = self.storage();
            storage.write_record(&record)?;
            if let Some(hash) = message_id_hash(normalize_message_id(&record.message_id)) {
                storage.insert_message_id(hash, record.id)?;
            }
        }

        self.update_cache(&record)?;
        self.events.push(StoreEvent::MessageChanged(record.id));

        Ok(record.id)
    }

    fn check_live(&self, id: MessageId) -> Result<()> {
        if id == 0 || self.deleted_set.contains(&id) || !self.cache.contains(id) {
            return Err(Error::FindMessageError(id));
        }
        Ok(())
    }

    /// Checks if the given id resolves to a live record.
    pub fn contains(&self, id: MessageId) -> bool {
        self.check_live(id).is_ok()
    }

    pub fn get_record(&self, id: MessageId) -> Result<MessageRecord> {
        self.check_live(id)?;
        self.storage()
            .read_record(id)?
            .ok_or(Error::FindMessageError(id))
    }

    pub fn get_item(&self, id: MessageId) -> Option<StoreItem> {
        self.check_live(id).ok().map(|_| self.cache.get(id))
    }

    pub fn get_flags(&self, id: MessageId) -> Result<MessageFlags> {
        self.check_live(id)?;
        Ok(self.cache.get(id).flags)
    }

    pub fn get_account_id(&self, id: MessageId) -> Result<u16> {
        self.check_live(id)?;
        Ok(self.cache.get(id).account_id)
    }

    /// Sets all flags of a message. Returns `false` without any I/O
    /// when the flags did not change.
    pub fn set_flags(&mut self, id: MessageId, flags: MessageFlags) -> Result<bool> {
        self.check_live(id)?;

        let mut item = self.cache.get(id);
        if item.flags == flags {
            return Ok(false);
        }

        self.storage().write_flags(id, flags)?;
        item.flags = flags;
        self.cache.update(item);
        self.events.push(StoreEvent::MessageChanged(id));

        Ok(true)
    }

    pub fn set_flag(&mut self, id: MessageId, flag: MessageFlags, value: bool) -> Result<bool> {
        let mut flags = self.get_flags(id)?;
        flags.set(flag, value);
        self.set_flags(id, flags)
    }

    /// Marks an outgoing message as sent.
    pub fn message_sent(&mut self, id: MessageId) -> Result<bool> {
        self.set_flag(id, MessageFlags::IS_SENT, true)
    }

    /// Finds the message matching the given Message-ID. Duplicates
    /// resolve to their master.
    pub fn find_by_message_id(&self, message_id: &str) -> Result<Option<MessageId>> {
        let message_id = normalize_message_id(message_id);
        let hash = match message_id_hash(message_id) {
            Some(hash) => hash,
            None => return Ok(None),
        };

        let storage = self.storage();
        let mut found = None;
        for id in storage.find_message_ids(hash)? {
            if !self.cache.contains(id) || self.deleted_set.contains(&id) {
                continue;
            }
            if let Some(record) = storage.read_record(id)? {
                if normalize_message_id(&record.message_id) == message_id {
                    found = Some(id);
                    break;
                }
            }
        }

        Ok(found.map(|id| self.find_duplicate_master(id)))
    }

    /// Resolves the thread parent of a new message from its
    /// References header, falling back to In-Reply-To. References are
    /// tried from the most recent one backward.
    pub fn resolve_thread_parent(&self, record: &mut MessageRecord) -> Result<()> {
        let mut references = parse_references(&record.headers.references);
        if references.is_empty() {
            references = parse_references(&record.headers.in_reply_to);
        }

        let mut parent = None;
        for reference in references.iter().rev() {
            if let Some(id) = self.find_by_message_id(reference)? {
                if id != record.id {
                    parent = Some(id);
                    break;
                }
            }
        }

        let parent = match parent {
            Some(parent) => parent,
            None => return Ok(()),
        };

        if self.split_thread_on_subject_change {
            let parent_subject = self.get_record(parent)?.subject;
            let ord = compare_strings(
                &record.subject,
                &parent_subject,
                StringField::Subject,
                true,
            );
            if ord != Ordering::Equal {
                debug!(
                    "subject of message {} changed, not threading it under {}",
                    record.id, parent
                );
                return Ok(());
            }
        }

        trace!("message {} is a reply to {}", record.id, parent);
        record.parent_id = parent;
        Ok(())
    }

    /// Queues a message for removal. The record is erased by the next
    /// [`Store::flush`].
    pub fn remove_message(&mut self, id: MessageId) -> Result<()> {
        if id == 0 {
            return Err(Error::FindMessageError(id));
        }
        if self.deleted_set.insert(id) {
            trace!("queuing message {} for removal", id);
            self.deleted.push_back(id);
        }
        Ok(())
    }

    pub fn is_removal_pending(&self, id: MessageId) -> bool {
        self.deleted_set.contains(&id)
    }

    /// Commits the pending mutations and erases the queued messages.
    pub fn flush(&mut self) -> Result<()> {
        let deleted: Vec<MessageId> = self.deleted.drain(..).collect();
        let next_id = self.next_id;
        let mut erased = Vec::with_capacity(deleted.len());

        let res = {
            let storage = self.storage();
            storage.begin()?;
            let res = (|| -> Result<()> {
                for id in &deleted {
                    let record = match storage.read_record(*id)? {
                        Some(record) => record,
                        None => continue,
                    };
                    if let Some(hash) = message_id_hash(normalize_message_id(&record.message_id)) {
                        storage.delete_message_id(hash, *id)?;
                    }
                    storage.delete_record(*id)?;
                    erased.push(record);
                }
                storage.write_meta(META_NEXT_ID, next_id as i64)?;
                Ok(())
            })();

            match res {
                Ok(()) => storage.commit(),
                Err(err) => {
                    warn!("cannot flush store, rolling back: {}", err);
                    storage.rollback()?;
                    Err(err)
                }
            }
        };

        if let Err(err) = res {
            self.deleted.extend(deleted);
            return Err(err);
        }

        for record in erased {
            self.remove_from_cache(record.id);
            if !record.body.is_none() {
                if let Err(err) = self.bodies().remove_message(record.body) {
                    warn!("cannot remove raw message {}: {}", record.id, err);
                }
            }
            self.deleted_set.remove(&record.id);
            self.events.push(StoreEvent::MessageRemoved(record.id));
        }
        self.deleted_set.retain(|id| self.deleted.contains(id));

        debug!("store flushed");
        Ok(())
    }

    /// Returns the duplicate master of a message, or the message
    /// itself when it has no duplicate.
    pub fn find_duplicate_master(&self, id: MessageId) -> MessageId {
        match self.cache.get(id).master_id {
            0 => id,
            master => master,
        }
    }

    /// Returns all the members of the duplicate group of a message,
    /// master first.
    pub fn duplicates(&self, id: MessageId) -> Vec<MessageId> {
        let master = self.find_duplicate_master(id);
        self.duplicates
            .duplicates(master)
            .map(<[MessageId]>::to_vec)
            .unwrap_or_else(|| vec![id])
    }

    pub fn last_id(&self) -> MessageId {
        self.next_id - 1
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn parent_id(&self, id: MessageId) -> MessageId {
        self.cache.get(id).parent_id
    }

    pub fn thread_root(&self, id: MessageId) -> MessageId {
        self.cache.thread_root(id)
    }

    pub fn children_ids(&self, id: MessageId) -> OrderedIdSet {
        self.children.get(&id).cloned().unwrap_or_default()
    }

    /// Lists every message of the thread the given message belongs
    /// to.
    pub fn thread_ids(&self, id: MessageId) -> OrderedIdSet {
        let root = self.cache.thread_root(id);
        let mut thread = OrderedIdSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            if let Ok(true) = thread.insert(current) {
                if let Some(children) = self.children.get(&current) {
                    queue.extend(children.iter());
                }
            }
        }
        thread
    }

    /// Reads the raw message through the body storage.
    pub fn get_message_data(&self, id: MessageId) -> Result<Vec<u8>> {
        let record = self.get_record(id)?;
        Ok(self.bodies().get_message(record.body)?)
    }

    /// Stores the raw message and records its handle.
    pub fn set_raw_message(&mut self, id: MessageId, raw: &[u8]) -> Result<()> {
        let mut record = self.get_record(id)?;
        let handle = self.bodies().add_message(id, raw)?;
        record.body = handle;
        record.size = raw.len() as u32;
        self.storage().write_record(&record)?;
        self.update_cache(&record)?;
        Ok(())
    }

    /// Compares two messages. Equal values are ordered by id.
    pub fn compare_messages(&self, a: MessageId, b: MessageId, sort_by: SortBy) -> Ordering {
        let ord = match sort_by {
            SortBy::Id => Ordering::Equal,
            SortBy::SentDate
            | SortBy::ThreadedSentDate
            | SortBy::ThreadedSentDateDescending
            | SortBy::Size
            | SortBy::Flags
            | SortBy::Status
            | SortBy::Attachment => self.compare_with_sort_cache(a, b, sort_by),
            SortBy::From | SortBy::To | SortBy::Subject => {
                let (a_rec, b_rec) = match (self.get_record(a), self.get_record(b)) {
                    (Ok(a_rec), Ok(b_rec)) => (a_rec, b_rec),
                    _ => return a.cmp(&b),
                };
                let feed = a_rec.is_flag_set(MessageFlags::IS_NEWSFEED_MESSAGE)
                    || b_rec.is_flag_set(MessageFlags::IS_NEWSFEED_MESSAGE);
                match sort_by {
                    SortBy::From => compare_strings(&a_rec.from, &b_rec.from, StringField::From, true),
                    SortBy::To => compare_strings(&a_rec.to, &b_rec.to, StringField::To, true),
                    _ => compare_strings(
                        &a_rec.subject,
                        &b_rec.subject,
                        StringField::Subject,
                        !feed,
                    ),
                }
            }
            SortBy::AccountId => self
                .cache
                .get(a)
                .account_id
                .cmp(&self.cache.get(b).account_id),
            SortBy::Parent => self.cache.get(a).parent_id.cmp(&self.cache.get(b).parent_id),
            SortBy::MessageIdHash => {
                let hash = |id| {
                    self.get_record(id)
                        .ok()
                        .and_then(|record| message_id_hash(normalize_message_id(&record.message_id)))
                };
                hash(a).cmp(&hash(b))
            }
        };

        ord.then(a.cmp(&b))
    }

    fn compare_with_sort_cache(&self, a: MessageId, b: MessageId, sort_by: SortBy) -> Ordering {
        let one = self.cache.get(a);
        let two = self.cache.get(b);

        match sort_by {
            SortBy::SentDate => one.sent_date.cmp(&two.sent_date),
            SortBy::ThreadedSentDate => one.child_sent_date.cmp(&two.child_sent_date),
            SortBy::ThreadedSentDateDescending => {
                if one.thread_root_id == two.thread_root_id {
                    two.sent_date.cmp(&one.sent_date)
                } else {
                    one.child_sent_date.cmp(&two.child_sent_date)
                }
            }
            SortBy::Size => one.size.cmp(&two.size),
            SortBy::Flags => one.flags.bits().cmp(&two.flags.bits()),
            SortBy::Status => {
                let flagged = |item: &StoreItem| item.flags.contains(MessageFlags::IS_FLAGGED);
                if flagged(&one) != flagged(&two) {
                    return if flagged(&one) {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    };
                }
                compare_flag_range(one.flags, two.flags, MessageFlags::STATUS)
                    .cmp(&0)
                    .then_with(|| {
                        let unread = |item: &StoreItem| !item.flags.contains(MessageFlags::IS_READ);
                        unread(&one).cmp(&unread(&two))
                    })
            }
            SortBy::Attachment => {
                compare_flag_range(one.flags, two.flags, MessageFlags::ATTACHMENTS).cmp(&0)
            }
            _ => Ordering::Equal,
        }
    }

    /// Drops every record. The store is empty and loaded afterwards.
    pub fn reinit(&mut self) -> Result<()> {
        warn!("clearing the store");
        self.storage().clear()?;
        self.cache.clear();
        self.duplicates.clear();
        self.children.clear();
        self.deleted.clear();
        self.deleted_set.clear();
        self.loaded = true;
        Ok(())
    }

    fn update_cache(&mut self, record: &MessageRecord) -> Result<()> {
        let previous = self.cache.get(record.id);
        let mut item = StoreItem::from_record(record);
        item.master_id = previous.master_id;
        item.child_sent_date = item.child_sent_date.max(previous.child_sent_date);

        if previous.parent_id != record.parent_id && previous.parent_id != 0 {
            if let Some(children) = self.children.get_mut(&previous.parent_id) {
                children.remove(record.id);
            }
        }
        if record.parent_id != 0 {
            self.children
                .entry(record.parent_id)
                .or_default()
                .insert(record.id)?;
        }

        if item.master_id == 0 {
            self.add_to_duplicate_table(&mut item, &record.message_id)?;
        }

        self.cache.update(item);
        let root = self.cache.thread_root(record.id);
        item.thread_root_id = root;
        self.cache.update(item);
        self.cache.propagate_child_sent_date(record.id);

        Ok(())
    }

    fn add_to_duplicate_table(&mut self, item: &mut StoreItem, message_id: &str) -> Result<()> {
        let message_id = normalize_message_id(message_id);
        let hash = match message_id_hash(message_id) {
            Some(hash) => hash,
            None => return Ok(()),
        };

        let candidates = self.storage().find_message_ids(hash)?;
        for candidate in candidates {
            if candidate == item.id || !self.cache.contains(candidate) {
                continue;
            }

            let found = match self.storage().read_record(candidate)? {
                Some(record) => record.message_id,
                None => continue,
            };
            if normalize_message_id(&found) != message_id {
                continue;
            }

            let mut dupe = self.cache.get(candidate);
            if dupe.master_id != 0 {
                item.master_id = dupe.master_id;
            } else {
                dupe.master_id = dupe.id;
                item.master_id = dupe.id;
                self.cache.update(dupe);
            }

            self.duplicates.add_duplicate(item.master_id, item.id);
            return Ok(());
        }

        Ok(())
    }

    fn remove_from_duplicate_table(&mut self, item: &StoreItem) {
        let old_master = item.master_id;
        let dupes = self
            .duplicates
            .duplicates(old_master)
            .map(<[MessageId]>::to_vec)
            .unwrap_or_default();

        let new_master = self.duplicates.remove_duplicate(old_master, item.id);
        if new_master == 0 {
            for dupe in dupes {
                let mut dupe = self.cache.get(dupe);
                if dupe.id != 0 {
                    dupe.master_id = 0;
                    self.cache.update(dupe);
                }
            }
        } else if new_master != old_master {
            let members = self
                .duplicates
                .duplicates(new_master)
                .map(<[MessageId]>::to_vec)
                .unwrap_or_default();
            for member in members {
                let mut member = self.cache.get(member);
                if member.id != 0 {
                    member.master_id = new_master;
                    self.cache.update(member);
                }
            }
        }
    }

    fn remove_from_cache(&mut self, id: MessageId) {
        let item = self.cache.get(id);
        if item.master_id != 0 {
            self.remove_from_duplicate_table(&item);
        }

        if item.parent_id != 0 {
            if let Some(children) = self.children.get_mut(&item.parent_id) {
                children.remove(id);
            }
        }

        self.cache.remove(id);
    }
}
