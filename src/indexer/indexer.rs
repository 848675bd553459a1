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

//! Indexer module.
//!
//! The indexer is the registry of every view. It owns the views and
//! the groups, routes new messages to the views they belong to and
//! dispatches the resulting notifications to the groups.

use log::{debug, info, trace, warn};
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    mem,
    path::Path,
};

use crate::{
    group::{Effect, GroupKind, Groups, ViewGroup},
    store::threads::strip_address,
    view::{
        self, RangeTable, Search, SearchField, SearchOption, View, ViewId, ViewKind,
        ViewStorage, ACCOUNT_RANGE, AUDIO_ATTACHMENTS, CATEGORY_RANGE, CONTACTS,
        CONTACT_RANGE, DOC_ATTACHMENTS, DRAFTS, FOLDER_RANGE, HIDDEN, IMAGE_ATTACHMENTS,
        INTERSECTION_RANGE, LABELS, MAILING_LISTS, MY_MAIL, NEWSFEEDS, NEWSGROUPS,
        NEWSGROUP_RANGE, OUTBOX, PIN_BOARD, RECEIVED, RECEIVED_LIST, RECEIVED_NEWS, SEARCHES,
        SENT, SPAM, STANDARD_VIEWS, THREADS, THREAD_RANGE, TRASH, UNION_RANGE, UNREAD,
        UNREAD_UI, VIDEO_ATTACHMENTS, VIEWS_DB_NAME, ZIP_ATTACHMENTS,
    },
    AccountId, EngineConfig, MessageFlags, MessageId, Store,
};

use super::{message_tokens, ActiveSearch, AutoFilter, Error, Notification, Result, Token, Verdict};

const STANDARD_NAMES: [(ViewId, &str, ViewId); 16] = [
    (RECEIVED, "Received", MY_MAIL),
    (UNREAD, "Unread", 0),
    (OUTBOX, "Outbox", MY_MAIL),
    (SENT, "Sent", MY_MAIL),
    (DRAFTS, "Drafts", MY_MAIL),
    (TRASH, "Trash", 0),
    (SPAM, "Spam", 0),
    (RECEIVED_NEWS, "News", 0),
    (RECEIVED_LIST, "Lists", 0),
    (PIN_BOARD, "Pinned", 0),
    (DOC_ATTACHMENTS, "Documents", 0),
    (IMAGE_ATTACHMENTS, "Images", 0),
    (AUDIO_ATTACHMENTS, "Audio", 0),
    (VIDEO_ATTACHMENTS, "Video", 0),
    (ZIP_ATTACHMENTS, "Archives", 0),
    (NEWSFEEDS, "Newsfeeds", 0),
];

const CATEGORY_NAMES: [(ViewId, &str); 8] = [
    (MY_MAIL, "My mail"),
    (MAILING_LISTS, "Mailing lists"),
    (LABELS, "Labels"),
    (view::FOLDERS, "Folders"),
    (NEWSGROUPS, "Newsgroups"),
    (CONTACTS, "Contacts"),
    (SEARCHES, "Searches"),
    (THREADS, "Threads"),
];

const ATTACHMENT_VIEWS: [(MessageFlags, ViewId); 5] = [
    (MessageFlags::HAS_ATTACHMENT, DOC_ATTACHMENTS),
    (MessageFlags::HAS_IMAGE_ATTACHMENT, IMAGE_ATTACHMENTS),
    (MessageFlags::HAS_AUDIO_ATTACHMENT, AUDIO_ATTACHMENTS),
    (MessageFlags::HAS_VIDEO_ATTACHMENT, VIDEO_ATTACHMENTS),
    (MessageFlags::HAS_ZIP_ATTACHMENT, ZIP_ATTACHMENTS),
];

/// Logs longer than twice the members count plus this slack are
/// compacted on save.
const LOG_COMPACTION_SLACK: usize = 64;

pub struct Indexer {
    pub(super) views: RangeTable<View>,
    pub(super) groups: Groups,
    pub(super) storage: ViewStorage,
    pub(super) searches: Vec<ActiveSearch>,
    pub(super) active_account: Option<AccountId>,
    autofilters: HashMap<ViewId, AutoFilter>,
    search_in: HashMap<ViewId, ViewId>,
    queue: VecDeque<Notification>,
    events: Vec<Notification>,
    stale_groups: BTreeSet<ViewId>,
    autofilter_min_messages: usize,
    autofilter_threshold: f64,
}

impl Indexer {
    /// Opens the registry stored in the given directory.
    pub fn open<P: AsRef<Path>>(config: &EngineConfig, dir: P) -> Result<Self> {
        let storage = ViewStorage::open(dir.as_ref().join(VIEWS_DB_NAME))?;
        Self::with_storage(config, storage)
    }

    /// Opens a registry keeping everything in memory.
    pub fn in_memory(config: &EngineConfig) -> Result<Self> {
        Self::with_storage(config, ViewStorage::open_in_memory()?)
    }

    pub fn with_storage(config: &EngineConfig, storage: ViewStorage) -> Result<Self> {
        let mut indexer = Self {
            views: RangeTable::new(),
            groups: Groups::new(),
            storage,
            searches: vec![],
            active_account: None,
            autofilters: HashMap::new(),
            search_in: HashMap::new(),
            queue: VecDeque::new(),
            events: vec![],
            stale_groups: BTreeSet::new(),
            autofilter_min_messages: config.autofilter_min_messages(),
            autofilter_threshold: config.autofilter_threshold(),
        };

        for view in indexer.storage.load_views()? {
            indexer.views.insert(view.id, view);
        }

        for (id, name, parent) in STANDARD_NAMES {
            if !indexer.views.contains(id) {
                let mut view = View::new(id, ViewKind::Special, name);
                view.parent_id = parent;
                view.has_autofilter = id == SPAM;
                indexer.views.insert(id, view);
            }
            indexer.prefetch(id)?;
        }

        let restricted: Vec<(ViewId, ViewId)> = indexer
            .views
            .values()
            .filter(|view| view.search_only_in != 0 && view.kind != ViewKind::Search)
            .map(|view| (view.id, view.search_only_in))
            .collect();
        for (id, in_view) in restricted {
            if let Err(err) = indexer.set_search_in(id, in_view) {
                warn!("cannot restrict view {} to view {}: {}", id, in_view, err);
            }
        }

        indexer.events.clear();
        info!("indexer opened with {} views", indexer.views.len());
        Ok(indexer)
    }

    /// Takes the notifications dispatched so far.
    pub fn drain_events(&mut self) -> Vec<Notification> {
        mem::take(&mut self.events)
    }

    /// Gets a view without creating nor loading it.
    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(id)
    }

    /// Gets a view, building lazy views on first access and loading
    /// the members if needed.
    pub fn get_view(&mut self, id: ViewId) -> Result<&View> {
        self.ensure(id)?;
        self.views.get(id).ok_or(Error::FindViewError(id))
    }

    /// Walks the views of the range `[start, end)`. A cursor of -1
    /// starts the walk.
    pub fn get_range(&self, start: ViewId, end: ViewId, cursor: &mut i64) -> Option<ViewId> {
        self.views.get_range(start, end, cursor)
    }

    /// Lists the views whose parent is the given view.
    pub fn children(&self, parent: ViewId) -> Vec<ViewId> {
        self.views
            .values()
            .filter(|view| view.parent_id == parent && view.id != parent)
            .map(|view| view.id)
            .collect()
    }

    pub fn is_group(&self, id: ViewId) -> bool {
        self.groups.contains(id)
    }

    /// Gets the group restricting a view to another one, if any.
    pub fn search_in_group(&self, id: ViewId) -> Option<ViewId> {
        self.search_in.get(&id).copied()
    }

    pub fn active_account(&self) -> Option<AccountId> {
        self.active_account
    }

    /// Shows only the messages of the given account, or of every
    /// account.
    pub fn set_active_account(&mut self, account: Option<AccountId>) {
        if self.active_account != account {
            debug!("active account set to {:?}", account);
            self.active_account = account;
            for view in self.views.values_mut() {
                view.invalidate_unread();
            }
        }
    }

    /// Checks if some groups could not be updated incrementally and
    /// wait for a full rebuild.
    pub fn needs_rebuild(&self) -> bool {
        !self.stale_groups.is_empty()
    }

    pub(super) fn ensure(&mut self, id: ViewId) -> Result<()> {
        if !self.views.contains(id) {
            self.create_lazy(id)?;
        }
        self.prefetch(id)
    }

    fn create_lazy(&mut self, id: ViewId) -> Result<()> {
        match id {
            HIDDEN => {
                let operands = self
                    .views
                    .values()
                    .filter(|view| view.hide_from_other)
                    .map(|view| view.id)
                    .collect();
                self.create_group(id, GroupKind::Union, 0, operands, "Hidden", 0)
            }
            UNREAD_UI => {
                self.ensure(HIDDEN)?;
                self.create_group(id, GroupKind::Complement, UNREAD, vec![HIDDEN], "Unread", 0)
            }
            id if (CATEGORY_RANGE.0..CATEGORY_RANGE.1).contains(&id) => {
                let name = CATEGORY_NAMES
                    .iter()
                    .find(|(category, _)| *category == id)
                    .map(|(_, name)| *name)
                    .ok_or(Error::FindViewError(id))?;
                let operands = self
                    .children(id)
                    .into_iter()
                    .filter(|child| !self.groups.depends_on(*child, id))
                    .collect();
                self.create_group(id, GroupKind::Union, 0, operands, name, 0)
            }
            _ => Err(Error::FindViewError(id)),
        }
    }

    /// Loads the members of a view. Group views are computed again
    /// when they are stale.
    pub fn prefetch(&mut self, id: ViewId) -> Result<()> {
        if self.stale_groups.contains(&id) {
            self.rebuild_group(id)?;
        }

        let storage = &self.storage;
        let view = self.views.get_mut(id).ok_or(Error::FindViewError(id))?;
        view.prefetch(storage)?;
        Ok(())
    }

    pub(super) fn apply_add(&mut self, view: ViewId, id: MessageId) -> Result<bool> {
        let storage = &self.storage;
        let target = self.views.get_mut(view).ok_or(Error::FindViewError(view))?;
        let added = target.add_message(storage, id)?;
        if added {
            self.queue.push_back(Notification::MessageAdded { view, id });
        }
        Ok(added)
    }

    pub(super) fn apply_remove(&mut self, view: ViewId, id: MessageId) -> Result<bool> {
        let storage = &self.storage;
        let target = self.views.get_mut(view).ok_or(Error::FindViewError(view))?;
        let removed = target.remove_message(storage, id)?;
        if removed {
            self.queue.push_back(Notification::MessageRemoved { view, id });
        }
        Ok(removed)
    }

    fn apply_effect(&mut self, effect: Effect) -> Result<bool> {
        match effect {
            Effect::Add(view, id) => self.apply_add(view, id),
            Effect::Remove(view, id) => self.apply_remove(view, id),
        }
    }

    fn apply_effects(&mut self, result: ViewId, effects: Vec<Effect>) {
        for effect in effects {
            if let Err(err) = self.apply_effect(effect) {
                warn!("cannot update group {}, rebuilding it later: {}", result, err);
                self.stale_groups.insert(result);
            }
        }
    }

    pub(super) fn push_event(&mut self, notification: Notification) {
        self.queue.push_back(notification);
    }

    /// Processes the queued notifications in order, letting the
    /// groups react to the changes of their sources.
    pub(super) fn dispatch(&mut self) {
        let mut rebuilt = BTreeSet::new();

        loop {
            while let Some(notification) = self.queue.pop_front() {
                match notification {
                    Notification::MessageAdded { view, id } => self.propagate(view, id, true),
                    Notification::MessageRemoved { view, id } => self.propagate(view, id, false),
                    _ => (),
                }
                self.events.push(notification);
            }

            let stale: Vec<ViewId> = self
                .stale_groups
                .iter()
                .copied()
                .filter(|id| !rebuilt.contains(id))
                .collect();
            if stale.is_empty() {
                break;
            }

            for result in stale {
                rebuilt.insert(result);
                if let Err(err) = self.rebuild_group(result) {
                    warn!("cannot rebuild group {}: {}", result, err);
                }
            }
        }
    }

    fn propagate(&mut self, source: ViewId, id: MessageId, added: bool) {
        if source == UNREAD {
            for view in self.views.values_mut() {
                if view.contains(id) && view.id != UNREAD {
                    view.invalidate_unread();
                    self.events.push(Notification::UnreadChanged(view.id));
                }
            }
        } else if STANDARD_VIEWS.contains(&source) || source == HIDDEN {
            self.invalidate_unread_of(id);
        }

        for result in self.groups.observers_of(source) {
            let effect = match self.groups.get(result) {
                Some(group) if added => group.message_added(&self.views, source, id),
                Some(group) => group.message_removed(&self.views, source, id),
                None => None,
            };
            if let Some(effect) = effect {
                self.apply_effects(result, vec![effect]);
            }
        }
    }

    fn invalidate_unread_of(&mut self, id: MessageId) {
        for view in self.views.values_mut() {
            if view.contains(id) {
                view.invalidate_unread();
            }
        }
    }

    /// Computes a group from scratch and applies the difference.
    pub fn rebuild_group(&mut self, result: ViewId) -> Result<()> {
        let sources: Vec<ViewId> = self
            .groups
            .get(result)
            .map(|group| group.sources().collect())
            .unwrap_or_default();
        for source in sources {
            self.prefetch(source)?;
        }

        let effects = match self.groups.get(result) {
            Some(group) => group.rebuild(&self.views)?,
            None => return Ok(()),
        };

        debug!("rebuilding group {} ({} changes)", result, effects.len());
        self.stale_groups.remove(&result);
        for effect in effects {
            self.apply_effect(effect)?;
        }
        Ok(())
    }

    fn create_group(
        &mut self,
        result: ViewId,
        kind: GroupKind,
        base: ViewId,
        operands: Vec<ViewId>,
        name: &str,
        parent: ViewId,
    ) -> Result<()> {
        if base != 0 {
            self.ensure(base)?;
        }
        for operand in &operands {
            self.ensure(*operand)?;
        }

        let mut group = ViewGroup::new(kind, result, base)?;
        for operand in operands {
            if operand == result || self.groups.depends_on(operand, result) {
                return Err(crate::group::Error::CycleError(result, operand).into());
            }
            group.add_operand(&self.views, operand)?;
        }

        let mut view = View::memory(result, kind.view_kind(), name);
        view.parent_id = parent;
        view.set_members(group.compute(&self.views)?);
        debug!(
            "group {} created ({:?}, {} messages)",
            result,
            kind,
            view.len()
        );

        self.views.insert(result, view);
        self.groups.insert(group);
        self.push_event(Notification::ViewCreated(result));
        Ok(())
    }

    /// Creates a group computed from a base view and operand views.
    /// Union groups accept 0 as base.
    pub fn new_group(
        &mut self,
        kind: GroupKind,
        base: ViewId,
        operands: Vec<ViewId>,
        name: &str,
    ) -> Result<ViewId> {
        let (start, end) = match kind {
            GroupKind::Union => UNION_RANGE,
            GroupKind::Intersection => INTERSECTION_RANGE,
            GroupKind::Complement => view::COMPLEMENT_RANGE,
        };
        let result = self.storage.next_id(start, end)?;
        self.create_group(result, kind, base, operands, name, 0)?;
        self.dispatch();
        Ok(result)
    }

    /// Adds an operand to a group and reconciles its result.
    pub fn add_group_operand(&mut self, result: ViewId, operand: ViewId) -> Result<()> {
        self.ensure(operand)?;
        let effects = self.groups.add_operand(&self.views, result, operand)?;
        self.apply_effects(result, effects);
        self.dispatch();
        Ok(())
    }

    /// Removes an operand from a group and reconciles its result.
    pub fn remove_group_operand(&mut self, result: ViewId, operand: ViewId) -> Result<()> {
        let effects = self.groups.remove_operand(&self.views, result, operand)?;
        self.apply_effects(result, effects);
        self.dispatch();
        Ok(())
    }

    /// Registers a new view and links it to the groups following its
    /// parent and its hidden state.
    pub(super) fn create_view(&mut self, view: View) -> Result<ViewId> {
        let id = view.id;
        if view.save_to_disk {
            self.storage.save_view(&view)?;
        }
        let (parent, hidden) = (view.parent_id, view.hide_from_other);
        self.views.insert(id, view);
        self.push_event(Notification::ViewCreated(id));
        trace!("view {} created", id);

        self.link(id, parent, hidden)?;
        Ok(id)
    }

    fn link(&mut self, id: ViewId, parent: ViewId, hidden: bool) -> Result<()> {
        if parent != 0 && self.groups.contains(parent) && ViewKind::of(parent) == Some(ViewKind::Category)
        {
            self.add_group_operand(parent, id)?;
        }
        if hidden && self.groups.contains(HIDDEN) {
            self.add_group_operand(HIDDEN, id)?;
        }
        Ok(())
    }

    fn unlink(&mut self, id: ViewId, parent: ViewId, hidden: bool) -> Result<()> {
        if parent != 0 && self.groups.contains(parent) && ViewKind::of(parent) == Some(ViewKind::Category)
        {
            self.remove_group_operand(parent, id)?;
        }
        if hidden && self.groups.contains(HIDDEN) {
            self.remove_group_operand(HIDDEN, id)?;
        }
        Ok(())
    }

    /// Creates a view of the given kind. Views with search rules are
    /// filled from the existing messages, one message per turn.
    pub fn new_view(
        &mut self,
        store: &Store,
        kind: ViewKind,
        name: &str,
        parent: ViewId,
        searches: Vec<Search>,
    ) -> Result<ViewId> {
        if kind.is_group() || matches!(kind, ViewKind::Special | ViewKind::Category | ViewKind::Account)
        {
            return Err(Error::ViewKindError(kind));
        }

        let (start, end) = kind.range();
        let id = self.storage.next_id(start, end)?;
        let mut view = View::new(id, kind, name);
        view.parent_id = parent;
        Self::set_view_searches(&mut view, searches)?;
        let scan = !view.searches().is_empty();

        self.create_view(view)?;
        if scan {
            self.begin_scan(store, id);
        }
        self.dispatch();
        info!("view {} ({:?}) created", id, kind);
        Ok(id)
    }

    pub(super) fn set_view_searches(view: &mut View, searches: Vec<Search>) -> Result<()> {
        for search in &searches {
            search
                .compile()
                .map_err(|err| Error::InvalidRegexError(err, search.text.clone()))?;
        }
        view.set_searches(searches)
            .map_err(|err| Error::InvalidRegexError(err, String::new()))
    }

    /// Creates a folder or label view.
    pub fn add_folder_view(&mut self, name: &str, parent: ViewId) -> Result<ViewId> {
        let (start, end) = FOLDER_RANGE;
        let id = self.storage.next_id(start, end)?;
        let mut view = View::new(id, ViewKind::Folder, name);
        view.parent_id = parent;
        self.create_view(view)?;
        self.dispatch();
        Ok(id)
    }

    /// Gets the view of an account, creating it if needed.
    pub fn account_view(&mut self, account: AccountId) -> Result<ViewId> {
        let id = ACCOUNT_RANGE.0 + account as ViewId;
        if !self.views.contains(id) {
            let mut view = View::new(id, ViewKind::Account, format!("Account {}", account));
            view.account_id = account;
            self.create_view(view)?;
            self.dispatch();
        }
        self.prefetch(id)?;
        Ok(id)
    }

    /// Gets the view of the messages sent by a contact, creating it if
    /// needed.
    pub fn contact_view(&mut self, store: &Store, address: &str) -> Result<ViewId> {
        let keyword = strip_address(address.trim())
            .trim_end_matches(|c| c == '"' || c == '>')
            .to_lowercase();

        let existing = self
            .views
            .values()
            .find(|view| view.kind == ViewKind::Contact && view.keyword == keyword)
            .map(|view| view.id);
        if let Some(id) = existing {
            return Ok(id);
        }

        let (start, end) = CONTACT_RANGE;
        let id = self.storage.next_id(start, end)?;
        let mut view = View::new(id, ViewKind::Contact, address.trim());
        view.parent_id = CONTACTS;
        view.keyword = keyword.clone();
        Self::set_view_searches(
            &mut view,
            vec![Search::new(keyword, SearchField::From, SearchOption::Exact)],
        )?;

        self.create_view(view)?;
        self.begin_scan(store, id);
        self.dispatch();
        Ok(id)
    }

    /// Gets the view of a newsgroup, creating it if needed.
    pub fn newsgroup_view(&mut self, store: &Store, newsgroup: &str) -> Result<ViewId> {
        let keyword = newsgroup.trim().to_lowercase();
        let existing = self
            .views
            .values()
            .find(|view| view.kind == ViewKind::Newsgroup && view.keyword == keyword)
            .map(|view| view.id);
        if let Some(id) = existing {
            return Ok(id);
        }

        let (start, end) = NEWSGROUP_RANGE;
        let id = self.storage.next_id(start, end)?;
        let mut view = View::new(id, ViewKind::Newsgroup, newsgroup.trim());
        view.parent_id = NEWSGROUPS;
        view.keyword = keyword.clone();
        Self::set_view_searches(
            &mut view,
            vec![Search::new(keyword, SearchField::Newsgroups, SearchOption::Exact)],
        )?;

        self.create_view(view)?;
        self.begin_scan(store, id);
        self.dispatch();
        Ok(id)
    }

    fn mailing_list_view(&mut self, list_id: &str) -> Result<ViewId> {
        let keyword = list_id.trim().to_lowercase();
        let existing = self
            .views
            .values()
            .find(|view| view.parent_id == MAILING_LISTS && view.keyword == keyword)
            .map(|view| view.id);
        if let Some(id) = existing {
            return Ok(id);
        }

        let (start, end) = FOLDER_RANGE;
        let id = self.storage.next_id(start, end)?;
        let mut view = View::new(id, ViewKind::Folder, list_id.trim());
        view.parent_id = MAILING_LISTS;
        view.keyword = keyword;
        debug!("mailing list view {} created for {}", id, list_id);
        self.create_view(view)
    }

    /// Gets the thread view of a message, creating it if needed. The
    /// view lives in memory only.
    pub fn create_thread_view(&mut self, store: &Store, id: MessageId) -> Result<ViewId> {
        if let Some(view) = self.thread_view_of(store, id) {
            return Ok(view);
        }

        let thread = store.thread_ids(id);
        let root = store.thread_root(id);
        let subject = store
            .get_record(root)
            .map(|record| record.subject)
            .unwrap_or_default();

        let (start, end) = THREAD_RANGE;
        let view_id = self.storage.next_id(start, end)?;
        let mut view = View::memory(view_id, ViewKind::Thread, subject);
        view.parent_id = THREADS;
        view.keyword = root.to_string();
        view.set_members(thread);

        self.create_view(view)?;
        self.dispatch();
        Ok(view_id)
    }

    /// Finds the thread view holding the thread of a message.
    pub fn thread_view_of(&self, store: &Store, id: MessageId) -> Option<ViewId> {
        let root = store.thread_root(id).to_string();
        self.views
            .values()
            .find(|view| view.kind == ViewKind::Thread && view.keyword == root)
            .map(|view| view.id)
    }

    /// Restricts a view to the messages of another one through an
    /// intersection group. Returns the group, or the view itself when
    /// the restriction is lifted.
    pub fn set_search_in(&mut self, id: ViewId, in_view: ViewId) -> Result<ViewId> {
        self.ensure(id)?;

        if let Some(previous) = self.search_in.remove(&id) {
            self.remove_view(previous)?;
        }

        let view = self.views.get_mut(id).ok_or(Error::FindViewError(id))?;
        view.search_only_in = in_view;
        view.set_dirty(true);
        let (name, parent) = (view.name.clone(), view.parent_id);

        if in_view == 0 {
            return Ok(id);
        }

        let (start, end) = INTERSECTION_RANGE;
        let result = self.storage.next_id(start, end)?;
        self.create_group(result, GroupKind::Intersection, id, vec![in_view], &name, parent)?;
        self.search_in.insert(id, result);
        self.dispatch();
        Ok(result)
    }

    /// Changes the settings of a view and keeps the groups following
    /// it up to date.
    pub fn update_view<F>(&mut self, store: &Store, id: ViewId, update: F) -> Result<()>
    where
        F: FnOnce(&mut View),
    {
        self.ensure(id)?;
        let view = self.views.get_mut(id).ok_or(Error::FindViewError(id))?;
        let (parent, hidden, searches) = (
            view.parent_id,
            view.hide_from_other,
            view.searches().to_vec(),
        );

        update(view);
        view.set_dirty(true);
        let (new_parent, new_hidden) = (view.parent_id, view.hide_from_other);
        let searches_changed = view.searches() != searches.as_slice();
        let rescan = searches_changed && !view.searches().is_empty();
        if searches_changed && !self.groups.contains(id) {
            view.set_members(Default::default());
            if view.save_to_disk {
                if let Some(name) = view.unique_name() {
                    self.storage.clear_log(&name)?;
                }
            }
        }

        if parent != new_parent || hidden != new_hidden {
            self.unlink(id, parent, hidden)?;
            self.link(id, new_parent, new_hidden)?;
        }
        if searches_changed {
            self.rebuild_dependent_groups(id)?;
        }
        if rescan {
            self.begin_scan(store, id);
        }

        self.push_event(Notification::ViewChanged(id));
        self.dispatch();
        Ok(())
    }

    fn rebuild_dependent_groups(&mut self, id: ViewId) -> Result<()> {
        for result in self.groups.observers_of(id) {
            self.rebuild_group(result)?;
        }
        Ok(())
    }

    /// Removes a view, the groups based on it and its log.
    pub fn remove_view(&mut self, id: ViewId) -> Result<()> {
        let kind = self
            .views
            .get(id)
            .map(|view| view.kind)
            .ok_or(Error::FindViewError(id))?;
        if matches!(kind, ViewKind::Special | ViewKind::Category) && !self.groups.contains(id) {
            return Err(Error::ViewKindError(kind));
        }

        for result in self.groups.observers_of(id) {
            let based = self
                .groups
                .get(result)
                .map(|group| group.base() == id)
                .unwrap_or(false);
            if based {
                self.remove_view(result)?;
            } else {
                self.remove_group_operand(result, id)?;
            }
        }
        self.groups.remove(id);

        if let Some(group) = self.search_in.remove(&id) {
            if self.views.contains(group) {
                self.remove_view(group)?;
            }
        }
        self.search_in.retain(|_, group| *group != id);
        self.searches.retain(|search| search.view != id);
        self.autofilters.remove(&id);
        self.stale_groups.remove(&id);

        let view = match self.views.remove(id) {
            Some(view) => view,
            None => return Ok(()),
        };
        for child in self.views.values_mut() {
            if child.parent_id == id {
                child.parent_id = view.parent_id;
                child.set_dirty(true);
            }
        }
        if view.save_to_disk {
            if let Some(name) = view.unique_name() {
                self.storage.delete_view(id, &name)?;
            }
        }

        info!("view {} removed", id);
        self.push_event(Notification::ViewRemoved(id));
        self.dispatch();
        Ok(())
    }

    /// Routes a new message to every view it belongs to.
    pub fn new_message(&mut self, store: &mut Store, id: MessageId) -> Result<()> {
        let record = store.get_record(id)?;
        let flags = record.flags;
        let mut targets: Vec<ViewId> = vec![];

        if flags.contains(MessageFlags::IS_OUTGOING) {
            if flags.contains(MessageFlags::IS_SENT) {
                targets.push(SENT);
            } else if flags.contains(MessageFlags::IS_TIMEQUEUED) {
                targets.push(OUTBOX);
            } else {
                targets.push(DRAFTS);
            }
        } else {
            targets.push(RECEIVED);
            if flags.contains(MessageFlags::IS_NEWS_MESSAGE) {
                targets.push(RECEIVED_NEWS);
            }
            if !record.headers.list_id.trim().is_empty() {
                targets.push(RECEIVED_LIST);
                targets.push(self.mailing_list_view(&record.headers.list_id)?);
            }
        }

        if flags.contains(MessageFlags::IS_NEWSFEED_MESSAGE) {
            targets.push(NEWSFEEDS);
        }
        if !flags.contains(MessageFlags::IS_READ) {
            targets.push(UNREAD);
        }
        if flags.contains(MessageFlags::IS_FLAGGED) {
            targets.push(PIN_BOARD);
        }
        if flags.contains(MessageFlags::IS_DELETED) {
            targets.push(TRASH);
        }
        for (flag, view) in ATTACHMENT_VIEWS {
            if flags.contains(flag) {
                targets.push(view);
            }
        }
        if record.account_id != 0 {
            targets.push(self.account_view(record.account_id)?);
        }

        if record.parent_id != 0 {
            targets.extend(
                self.views
                    .values()
                    .filter(|view| view.kind == ViewKind::Thread && view.contains(record.parent_id))
                    .map(|view| view.id),
            );
        }

        let filters: Vec<ViewId> = self
            .views
            .values()
            .filter(|view| !view.compiled_searches().is_empty() && !self.groups.contains(view.id))
            .map(|view| view.id)
            .collect();
        for view in filters {
            match self.matches_view(store, view, id) {
                Ok(true) => targets.push(view),
                Ok(false) => (),
                Err(err) => warn!("cannot match message {} against view {}: {}", id, view, err),
            }
        }

        let mut tokens: Option<Vec<Token>> = None;
        let autofiltered: Vec<ViewId> = self
            .views
            .values()
            .filter(|view| view.has_autofilter && view.id != SPAM)
            .map(|view| view.id)
            .collect();
        for view in autofiltered {
            let tokens = tokens.get_or_insert_with(|| Self::tokens(store, id));
            if self.classify_tokens(view, tokens)?.is_match() {
                targets.push(view);
            }
        }

        let spam_candidate = !flags.intersects(
            MessageFlags::IS_SPAM | MessageFlags::IS_CONFIRMED_NOT_SPAM | MessageFlags::IS_OUTGOING,
        );
        if flags.contains(MessageFlags::IS_SPAM) {
            targets.push(SPAM);
        } else if spam_candidate {
            let tokens = tokens.get_or_insert_with(|| Self::tokens(store, id));
            if self.classify_tokens(SPAM, tokens)?.is_match() {
                info!("message {} classified as spam", id);
                store.set_flag(id, MessageFlags::IS_SPAM, true)?;
                targets.push(SPAM);
            }
        }

        targets.sort_unstable();
        targets.dedup();
        trace!("routing message {} to views {:?}", id, targets);
        for view in targets {
            if let Err(err) = self.apply_add(view, id) {
                warn!("cannot add message {} to view {}: {}", id, view, err);
            }
        }

        self.dispatch();
        Ok(())
    }

    /// Removes a message from every view but the given one.
    pub fn remove_message(&mut self, id: MessageId, except_from: Option<ViewId>) -> Result<()> {
        for view in self.views.ids() {
            if Some(view) == except_from || self.groups.contains(view) {
                continue;
            }
            if let Err(err) = self.prefetch(view) {
                warn!("cannot load view {}: {}", view, err);
                continue;
            }
            if let Err(err) = self.apply_remove(view, id) {
                warn!("cannot remove message {} from view {}: {}", id, view, err);
            }
        }

        self.dispatch();
        Ok(())
    }

    /// Adds a message to a view on behalf of the user. Views with an
    /// auto-filter learn from it.
    pub fn add_message(&mut self, store: &Store, view: ViewId, id: MessageId) -> Result<bool> {
        if self.groups.contains(view) {
            return Err(Error::GroupViewError(view));
        }
        self.ensure(view)?;

        let added = self.apply_add(view, id)?;
        if added && self.views.get(view).map(|v| v.has_autofilter).unwrap_or(false) {
            let tokens = Self::tokens(store, id);
            self.autofilter(view)?.train(&tokens, true);
        }

        self.dispatch();
        Ok(added)
    }

    /// Removes a message from a view on behalf of the user. Views with
    /// an auto-filter learn from it.
    pub fn remove_message_from(&mut self, store: &Store, view: ViewId, id: MessageId) -> Result<bool> {
        if self.groups.contains(view) {
            return Err(Error::GroupViewError(view));
        }
        self.ensure(view)?;

        let removed = self.apply_remove(view, id)?;
        if removed && self.views.get(view).map(|v| v.has_autofilter).unwrap_or(false) {
            let tokens = Self::tokens(store, id);
            let filter = self.autofilter(view)?;
            filter.untrain(&tokens, true);
            filter.train(&tokens, false);
        }

        self.dispatch();
        Ok(removed)
    }

    /// Updates the unread view after the read state of a message
    /// changed.
    pub fn message_read(&mut self, id: MessageId, read: bool) -> Result<()> {
        if read {
            self.apply_remove(UNREAD, id)?;
        } else {
            self.apply_add(UNREAD, id)?;
        }
        self.dispatch();
        Ok(())
    }

    /// Moves a message from the outgoing views to the sent view.
    pub fn message_sent(&mut self, id: MessageId) -> Result<()> {
        self.apply_remove(OUTBOX, id)?;
        self.apply_remove(DRAFTS, id)?;
        self.apply_add(SENT, id)?;
        self.dispatch();
        Ok(())
    }

    /// Moves a message in and out of the views following its flags.
    pub fn flags_changed(
        &mut self,
        id: MessageId,
        previous: MessageFlags,
        flags: MessageFlags,
    ) -> Result<()> {
        let changed = previous ^ flags;
        if changed.is_empty() {
            return Ok(());
        }

        if changed.contains(MessageFlags::IS_READ) {
            if flags.contains(MessageFlags::IS_READ) {
                self.apply_remove(UNREAD, id)?;
            } else {
                self.apply_add(UNREAD, id)?;
            }
        }
        if changed.contains(MessageFlags::IS_SENT) && flags.contains(MessageFlags::IS_SENT) {
            self.apply_remove(OUTBOX, id)?;
            self.apply_remove(DRAFTS, id)?;
            self.apply_add(SENT, id)?;
        }

        for (flag, view) in [
            (MessageFlags::IS_FLAGGED, PIN_BOARD),
            (MessageFlags::IS_SPAM, SPAM),
            (MessageFlags::IS_DELETED, TRASH),
        ] {
            if !changed.contains(flag) {
                continue;
            }
            if flags.contains(flag) {
                self.apply_add(view, id)?;
            } else {
                self.apply_remove(view, id)?;
            }
        }

        self.invalidate_unread_of(id);
        self.dispatch();
        Ok(())
    }

    /// Drops the cached unread counts of the views holding a message
    /// whose flags changed.
    pub fn message_changed(&mut self, id: MessageId) {
        self.invalidate_unread_of(id);
    }

    /// Marks a message as spam and teaches the spam filter.
    pub fn spam(&mut self, store: &mut Store, id: MessageId) -> Result<()> {
        let tokens = Self::tokens(store, id);
        let flags = store.get_flags(id)?;
        let filter = self.autofilter(SPAM)?;
        if flags.contains(MessageFlags::IS_CONFIRMED_NOT_SPAM) {
            filter.untrain(&tokens, false);
        }
        filter.train(&tokens, true);

        store.set_flags(
            id,
            (flags | MessageFlags::IS_SPAM) - MessageFlags::IS_CONFIRMED_NOT_SPAM,
        )?;
        self.apply_add(SPAM, id)?;
        self.dispatch();
        Ok(())
    }

    /// Marks a message as not spam and teaches the spam filter.
    pub fn not_spam(&mut self, store: &mut Store, id: MessageId) -> Result<()> {
        let tokens = Self::tokens(store, id);
        let flags = store.get_flags(id)?;
        let filter = self.autofilter(SPAM)?;
        if flags.contains(MessageFlags::IS_SPAM) {
            filter.untrain(&tokens, true);
        }
        filter.train(&tokens, false);

        store.set_flags(
            id,
            (flags | MessageFlags::IS_CONFIRMED_NOT_SPAM) - MessageFlags::IS_SPAM,
        )?;
        self.apply_remove(SPAM, id)?;
        self.dispatch();
        Ok(())
    }

    fn tokens(store: &Store, id: MessageId) -> Vec<Token> {
        let record = match store.get_record(id) {
            Ok(record) => record,
            Err(_) => return vec![],
        };
        let body = store
            .get_message_data(id)
            .map(|raw| crate::store::body::body_text(&raw))
            .unwrap_or_default();
        message_tokens(&record, &body)
    }

    /// Gets the auto-filter of a view, loading it on first use.
    pub fn autofilter(&mut self, view: ViewId) -> Result<&mut AutoFilter> {
        if !self.autofilters.contains_key(&view) {
            let filter = AutoFilter::load(&self.storage, view)?;
            self.autofilters.insert(view, filter);
        }
        self.autofilters
            .get_mut(&view)
            .ok_or(Error::FindViewError(view))
    }

    fn classify_tokens(&mut self, view: ViewId, tokens: &[Token]) -> Result<Verdict> {
        let (min, threshold) = (self.autofilter_min_messages, self.autofilter_threshold);
        Ok(self.autofilter(view)?.classify(tokens, min, threshold))
    }

    /// Classifies a message against the auto-filter of a view.
    pub fn classify(&mut self, store: &Store, view: ViewId, id: MessageId) -> Result<Verdict> {
        let tokens = Self::tokens(store, id);
        self.classify_tokens(view, &tokens)
    }

    /// Turns the auto-filter of a view on or off. A filter turned on
    /// for a view holding enough messages learns from its members and
    /// from as many received messages outside of it.
    pub fn set_autofilter(&mut self, store: &Store, view: ViewId, enabled: bool) -> Result<()> {
        self.ensure(view)?;
        let target = self.views.get_mut(view).ok_or(Error::FindViewError(view))?;
        target.has_autofilter = enabled;
        target.set_dirty(true);
        let members = target.members().to_vec();

        let min = self.autofilter_min_messages;
        let untrained = self.autofilter(view)?.included() == 0;
        if enabled && untrained && members.len() >= min {
            let excluded: Vec<MessageId> = self
                .views
                .get(RECEIVED)
                .map(|received| {
                    received
                        .members()
                        .iter()
                        .rev()
                        .filter(|id| !members.contains(id))
                        .take(members.len())
                        .collect()
                })
                .unwrap_or_default();

            info!(
                "training auto-filter of view {} ({} included, {} excluded)",
                view,
                members.len(),
                excluded.len()
            );
            for id in &members {
                let tokens = Self::tokens(store, *id);
                self.autofilter(view)?.train(&tokens, true);
            }
            for id in &excluded {
                let tokens = Self::tokens(store, *id);
                self.autofilter(view)?.train(&tokens, false);
            }
        }

        self.push_event(Notification::ViewChanged(view));
        self.dispatch();
        Ok(())
    }

    /// Saves the dirty view configurations, compacts the long logs and
    /// saves the auto-filters.
    pub fn save_all(&mut self) -> Result<()> {
        let mut saved = 0;
        for view in self.views.values_mut() {
            if !view.save_to_disk {
                continue;
            }
            if view.is_dirty() {
                self.storage.save_view(view)?;
                view.set_dirty(false);
                saved += 1;
            }
            if view.is_loaded() {
                if let Some(name) = view.unique_name() {
                    if self.storage.log_len(&name)? > view.len() * 2 + LOG_COMPACTION_SLACK {
                        self.storage.compact(&name, view.members())?;
                    }
                }
            }
        }

        for (view, filter) in self.autofilters.iter_mut() {
            filter.save(&mut self.storage, *view)?;
        }

        debug!("{} views saved", saved);
        Ok(())
    }
}
