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

//! View module.
//!
//! A view is a named, ordered set of message ids together with the
//! settings deciding how its messages are displayed. Folders, labels,
//! threads, filters and search results are all views.

use log::{debug, trace};
use serde::Serialize;

use crate::{AccountId, MessageId, OrderedIdSet};

use super::{
    compile_all, get_unique_name, CompiledSearch, Model, Result, Search, ViewId, ViewKind,
    ViewStorage,
};

/// Sentinel value of an unread count that needs to be computed again.
pub const UNREAD_UNKNOWN: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Clone, Debug, Serialize)]
pub struct View {
    pub id: ViewId,
    pub parent_id: ViewId,
    pub name: String,
    pub kind: ViewKind,
    #[serde(skip)]
    members: OrderedIdSet,
    searches: Vec<Search>,
    #[serde(skip)]
    compiled: Vec<CompiledSearch>,
    pub model: Model,
    #[serde(skip)]
    unread: u32,
    state: LoadState,
    /// Keeps the members in the view log. Views not saved to disk
    /// vanish when the process ends.
    pub save_to_disk: bool,
    /// Represents the account of the view, 0 for none.
    pub account_id: AccountId,
    /// Represents the routing keyword: the contact address of a
    /// contact view, the list id of a mailing list view, the newsgroup
    /// of a newsgroup view, the root message of a thread view.
    pub keyword: String,
    pub watched: bool,
    pub ignored: bool,
    /// Hides the members of the view from every other view.
    pub hide_from_other: bool,
    pub has_autofilter: bool,
    pub visible: bool,
    /// Restricts search matches to the members of another view, 0 for
    /// none.
    pub search_only_in: ViewId,
    #[serde(skip)]
    dirty: bool,
}

impl View {
    pub fn new<N: ToString>(id: ViewId, kind: ViewKind, name: N) -> Self {
        Self {
            id,
            parent_id: 0,
            name: name.to_string(),
            kind,
            members: OrderedIdSet::new(),
            searches: vec![],
            compiled: vec![],
            model: Model::default(),
            unread: UNREAD_UNKNOWN,
            state: LoadState::Unloaded,
            save_to_disk: id != 0 && !kind.is_group(),
            account_id: 0,
            keyword: String::new(),
            watched: false,
            ignored: false,
            hide_from_other: false,
            has_autofilter: false,
            visible: true,
            search_only_in: 0,
            dirty: true,
        }
    }

    /// Builds a view living only in memory. It is loaded right away.
    pub fn memory<N: ToString>(id: ViewId, kind: ViewKind, name: N) -> Self {
        let mut view = Self::new(id, kind, name);
        view.save_to_disk = false;
        view.state = LoadState::Loaded;
        view
    }

    pub fn unique_name(&self) -> Option<String> {
        get_unique_name(self.id)
    }

    pub fn members(&self) -> &OrderedIdSet {
        &self.members
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    /// Loads the members by replaying the view log. Views already
    /// loaded are left untouched.
    pub fn prefetch(&mut self, storage: &ViewStorage) -> Result<()> {
        if self.state != LoadState::Unloaded {
            return Ok(());
        }

        self.state = LoadState::Loading;
        if self.save_to_disk {
            if let Some(name) = self.unique_name() {
                match storage.replay(&name) {
                    Ok(members) => self.members = members,
                    Err(err) => {
                        self.state = LoadState::Unloaded;
                        return Err(err);
                    }
                }
            }
        }
        self.state = LoadState::Loaded;
        debug!("view {} prefetched ({} messages)", self.id, self.members.len());

        Ok(())
    }

    /// Adds a message. Returns `false` when the message was already
    /// there, in which case nothing is written.
    pub fn add_message(&mut self, storage: &ViewStorage, id: MessageId) -> Result<bool> {
        self.prefetch(storage)?;

        if self.members.contains(id) {
            return Ok(false);
        }

        self.members.insert(id)?;
        if self.save_to_disk {
            if let Some(name) = self.unique_name() {
                storage.append(&name, id as i64)?;
            }
        }
        self.invalidate_unread();
        trace!("message {} added to view {}", id, self.id);

        Ok(true)
    }

    /// Removes a message. A loaded view not containing the message is
    /// left untouched and `false` is returned.
    pub fn remove_message(&mut self, storage: &ViewStorage, id: MessageId) -> Result<bool> {
        if self.is_loaded() && !self.members.contains(id) {
            return Ok(false);
        }

        if self.save_to_disk {
            if let Some(name) = self.unique_name() {
                storage.append(&name, -(id as i64))?;
            }
        }
        self.members.remove(id);
        self.invalidate_unread();
        trace!("message {} removed from view {}", id, self.id);

        Ok(true)
    }

    /// Replaces the members of a memory-only view.
    pub fn set_members(&mut self, members: OrderedIdSet) {
        self.members = members;
        self.state = LoadState::Loaded;
        self.invalidate_unread();
    }

    pub fn searches(&self) -> &[Search] {
        &self.searches
    }

    pub fn compiled_searches(&self) -> &[CompiledSearch] {
        &self.compiled
    }

    /// Sets the search rules of the view.
    pub fn set_searches(&mut self, searches: Vec<Search>) -> std::result::Result<(), regex::Error> {
        self.compiled = compile_all(&searches)?;
        self.searches = searches;
        self.dirty = true;
        Ok(())
    }

    pub fn cached_unread(&self) -> Option<u32> {
        (self.unread != UNREAD_UNKNOWN).then_some(self.unread)
    }

    pub fn set_unread(&mut self, unread: u32) {
        self.unread = unread.min(UNREAD_UNKNOWN - 1);
    }

    pub fn invalidate_unread(&mut self) {
        self.unread = UNREAD_UNKNOWN;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

#[cfg(test)]
mod tests {
    use crate::view::FOLDER_RANGE;

    use super::*;

    #[test]
    fn memory_view_is_loaded() {
        let view = View::memory(FOLDER_RANGE.0, ViewKind::Folder, "tmp");
        assert!(view.is_loaded());
        assert!(!view.save_to_disk);
        assert_eq!(None, view.cached_unread());
    }

    #[test]
    fn unread_cache() {
        let mut view = View::memory(0, ViewKind::Search, "tmp");
        view.set_unread(3);
        assert_eq!(Some(3), view.cached_unread());
        view.invalidate_unread();
        assert_eq!(None, view.cached_unread());
    }
}
