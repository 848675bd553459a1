use chrono::Utc;
use log::trace;
use std::collections::HashSet;

use crate::{
    view::{
        ModelFlags, View, ViewId, DRAFTS, HIDDEN, NEWSFEEDS, OUTBOX, RECEIVED_LIST, RECEIVED_NEWS,
        SENT, SPAM, TRASH, UNREAD,
    },
    MessageFlags, MessageId, Store,
};

use super::{Error, Indexer, Result};

/// Standard views hiding their members from the views whose model
/// does not show them.
const FILTERING_VIEWS: [(ViewId, ModelFlags); 6] = [
    (TRASH, ModelFlags::SHOW_TRASH),
    (SPAM, ModelFlags::SHOW_SPAM),
    (RECEIVED_NEWS, ModelFlags::SHOW_NEWSGROUPS),
    (NEWSFEEDS, ModelFlags::SHOW_NEWSFEEDS),
    (RECEIVED_LIST, ModelFlags::SHOW_MAILING_LISTS),
    (HIDDEN, ModelFlags::SHOW_HIDDEN),
];

/// Messages being evaluated, with the view their evaluation ignores.
type Visiting = HashSet<(MessageId, Option<ViewId>)>;

impl Indexer {
    /// Checks if a member of a view is shown, given the other standard
    /// views, the model of the view, the active account and the
    /// duplicates.
    pub fn is_visible(&mut self, store: &Store, view: ViewId, id: MessageId) -> Result<bool> {
        self.ensure(view)?;
        self.ensure(HIDDEN)?;
        self.dispatch();

        let target = self.views.get(view).ok_or(Error::FindViewError(view))?;
        let now = Utc::now().timestamp();
        Ok(!self.is_hidden(store, target, id, None, now, &mut Visiting::new()))
    }

    fn is_hidden(
        &self,
        store: &Store,
        view: &View,
        id: MessageId,
        ignore: Option<ViewId>,
        now: i64,
        visiting: &mut Visiting,
    ) -> bool {
        // a message already under evaluation is hidden, which ends
        // the walk on cyclic threads
        if !visiting.insert((id, ignore)) {
            trace!("visibility of message {} already being evaluated", id);
            return true;
        }

        let hidden = self.evaluate(store, view, id, ignore, now, visiting);
        visiting.remove(&(id, ignore));
        hidden
    }

    fn evaluate(
        &self,
        store: &Store,
        view: &View,
        id: MessageId,
        ignore: Option<ViewId>,
        now: i64,
        visiting: &mut Visiting,
    ) -> bool {
        if !store.contains(id) {
            return true;
        }
        let item = store.get_item(id).unwrap_or_default();
        let model = &view.model;

        if let Some(account) = self.active_account {
            if item.account_id != account {
                return true;
            }
        }

        if let Some(cutoff) = model.age_cutoff(now) {
            if item.sent_date < cutoff {
                return true;
            }
        }

        for (standard, shown) in FILTERING_VIEWS {
            if view.id == standard || ignore == Some(standard) || model.shows(shown) {
                continue;
            }
            if standard == HIDDEN && view.hide_from_other {
                continue;
            }
            let member = self
                .views
                .get(standard)
                .map(|other| other.contains(id))
                .unwrap_or(false);
            if member {
                return true;
            }
        }

        if item.flags.contains(MessageFlags::IS_READ)
            && !model.shows(ModelFlags::SHOW_READ)
            && ignore != Some(UNREAD)
            && view.id != UNREAD
        {
            return true;
        }

        if !model.shows(ModelFlags::SHOW_DUPLICATES) {
            let master = store.find_duplicate_master(id);
            if master != id && master != 0 && view.contains(master) {
                return true;
            }
        }

        let outgoing = item.flags.contains(MessageFlags::IS_OUTGOING);
        let sent_view = matches!(view.id, SENT | OUTBOX | DRAFTS);
        if outgoing && !sent_view && !model.shows(ModelFlags::SHOW_SENT) && ignore != Some(SENT) {
            if !model.is_threaded() {
                return true;
            }
            // threaded views show outgoing messages answering or
            // answered by a visible member
            return !self.has_visible_relative(store, view, id, ignore, now, visiting);
        }

        false
    }

    fn has_visible_relative(
        &self,
        store: &Store,
        view: &View,
        id: MessageId,
        ignore: Option<ViewId>,
        now: i64,
        visiting: &mut Visiting,
    ) -> bool {
        let parent = store.parent_id(id);
        let children = store.children_ids(id);
        let relatives = (parent != 0).then_some(parent).into_iter().chain(children.iter());

        for relative in relatives {
            if view.contains(relative) && !self.is_hidden(store, view, relative, ignore, now, visiting)
            {
                return true;
            }
        }
        false
    }

    /// Counts the unread and visible members of a view. The count is
    /// cached until a change of the view or of the standard views
    /// drops it.
    pub fn unread_count(&mut self, store: &Store, view: ViewId) -> Result<u32> {
        self.ensure(view)?;
        self.ensure(UNREAD)?;
        self.ensure(HIDDEN)?;
        self.dispatch();

        let target = self.views.get(view).ok_or(Error::FindViewError(view))?;
        if let Some(count) = target.cached_unread() {
            return Ok(count);
        }
        let unread = self.views.get(UNREAD).ok_or(Error::FindViewError(UNREAD))?;

        let (outer, inner) = if target.len() <= unread.len() {
            (target.members(), unread.members())
        } else {
            (unread.members(), target.members())
        };

        let now = Utc::now().timestamp();
        let mut visiting = Visiting::new();
        let count = outer
            .iter()
            .filter(|id| inner.contains(*id))
            .filter(|id| !self.is_hidden(store, target, *id, Some(UNREAD), now, &mut visiting))
            .count() as u32;

        trace!("view {} has {} unread messages", view, count);
        if let Some(target) = self.views.get_mut(view) {
            target.set_unread(count);
        }
        Ok(count)
    }
}

