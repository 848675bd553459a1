//! Search module.
//!
//! Searches walk the store from the most recent message down to the
//! oldest one, one message per view and per turn, so that a long scan
//! never blocks the caller.

use log::{debug, trace, warn};

use crate::{
    lexicon::Lexicon,
    store::body::{body_text, header_text},
    view::{self, Search, SearchField, View, ViewKind, SEARCHES, SEARCH_RANGE},
    MessageId, MessageRecord, OrderedIdSet, Store,
};

use super::{Error, Indexer, Notification, Result};

/// Represents a view being filled from the existing messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActiveSearch {
    pub view: view::ViewId,
    /// Represents the next message to match, 0 once the scan is over.
    pub position: MessageId,
}

/// Gets the text of a message field. Fields needing the raw message
/// are empty when it cannot be read.
pub fn field_text(record: &MessageRecord, raw: Option<&[u8]>, field: SearchField) -> String {
    match field {
        SearchField::CachedHeaders => record.header_text(),
        SearchField::CachedSubject => record.subject.clone(),
        SearchField::From => record.from.clone(),
        SearchField::To => record.to.clone(),
        SearchField::Cc => record.headers.cc.clone(),
        SearchField::ReplyTo => record.headers.reply_to.clone(),
        SearchField::Newsgroups => record.headers.newsgroups.clone(),
        SearchField::Headers => raw.map(header_text).unwrap_or_default(),
        SearchField::Body => raw.map(body_text).unwrap_or_default(),
        SearchField::EntireMessage => raw
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .unwrap_or_default(),
    }
}

impl Indexer {
    /// Starts a search in a new memory-only view. The view fills up
    /// while [`Indexer::continue_search`] is called, and a
    /// [`Notification::SearchStabilized`] is sent once the whole store
    /// was scanned.
    pub fn start_search(
        &mut self,
        store: &Store,
        searches: Vec<Search>,
        search_only_in: view::ViewId,
    ) -> Result<view::ViewId> {
        let name = searches
            .first()
            .map(|search| search.text.clone())
            .unwrap_or_default();

        let (start, end) = SEARCH_RANGE;
        let id = self.storage.next_id(start, end)?;
        let mut view = View::memory(id, ViewKind::Search, name);
        view.parent_id = SEARCHES;
        view.search_only_in = search_only_in;
        Self::set_view_searches(&mut view, searches)?;

        self.create_view(view)?;
        self.begin_scan(store, id);
        self.dispatch();
        debug!("search {} started", id);
        Ok(id)
    }

    /// Starts scanning the store for a view. A scan already running
    /// for the view starts over.
    pub(super) fn begin_scan(&mut self, store: &Store, view: view::ViewId) {
        self.searches.retain(|search| search.view != view);

        let position = store.last_id();
        if position == 0 {
            self.push_event(Notification::SearchStabilized(view));
            return;
        }

        trace!("scanning {} messages for view {}", position, view);
        self.searches.push(ActiveSearch { view, position });
    }

    /// Matches the next message of every running search. Returns true
    /// while some searches still need more turns.
    pub fn continue_search(&mut self, store: &Store) -> bool {
        let searches = std::mem::take(&mut self.searches);
        let mut running = Vec::with_capacity(searches.len());

        for mut search in searches {
            let id = search.position;
            match self.matches_view(store, search.view, id) {
                Ok(true) => {
                    if let Err(err) = self.apply_add(search.view, id) {
                        warn!("cannot add message {} to search {}: {}", id, search.view, err);
                    }
                }
                Ok(false) => (),
                Err(Error::FindViewError(view)) => {
                    debug!("search {} dropped: view removed", view);
                    continue;
                }
                Err(err) => warn!("cannot match message {} against search {}: {}", id, search.view, err),
            }

            search.position -= 1;
            if search.position == 0 {
                debug!("search {} stabilized", search.view);
                self.push_event(Notification::SearchStabilized(search.view));
            } else {
                running.push(search);
            }
        }

        // searches started while matching run from the next turn
        running.append(&mut self.searches);
        self.searches = running;
        self.dispatch();
        !self.searches.is_empty()
    }

    pub fn has_active_searches(&self) -> bool {
        !self.searches.is_empty()
    }

    /// Gets the next message a running search will match.
    pub fn search_position(&self, view: view::ViewId) -> Option<MessageId> {
        self.searches
            .iter()
            .find(|search| search.view == view)
            .map(|search| search.position)
    }

    /// Stops a running search, leaving the matches found so far.
    pub fn stop_search(&mut self, view: view::ViewId) {
        self.searches.retain(|search| search.view != view);
    }

    /// Checks if a message matches the searches of a view.
    pub(super) fn matches_view(&self, store: &Store, view: view::ViewId, id: MessageId) -> Result<bool> {
        let target = self.views.get(view).ok_or(Error::FindViewError(view))?;
        if !store.contains(id) || target.compiled_searches().is_empty() {
            return Ok(false);
        }

        if target.search_only_in != 0 && target.kind == ViewKind::Search {
            let member = self
                .views
                .get(target.search_only_in)
                .map(|other| other.contains(id))
                .unwrap_or(false);
            if !member {
                return Ok(false);
            }
        }

        let record = store.get_record(id)?;
        if target.account_id != 0 && record.account_id != target.account_id {
            return Ok(false);
        }

        let searches = target.compiled_searches();
        let raw = if searches.iter().any(|search| search.field().needs_raw_message()) {
            store.get_message_data(id).ok()
        } else {
            None
        };

        Ok(view::matches_chain(searches, record.sent_time, |field| {
            field_text(&record, raw.as_deref(), field)
        }))
    }

    /// Finds the messages containing every word of a text through the
    /// full-text index. With `partial`, words also match as prefixes.
    /// Messages of other accounts than the active one are left out.
    pub fn find_words(
        &self,
        store: &Store,
        lexicon: &Lexicon,
        text: &str,
        partial: bool,
    ) -> Result<OrderedIdSet> {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect();
        let found = lexicon.multi_search(&words, partial)?;

        let account = match self.active_account {
            Some(account) => account,
            None => return Ok(found),
        };

        let mut ids = OrderedIdSet::new();
        for id in found.iter() {
            if store.get_account_id(id).map(|a| a == account).unwrap_or(false) {
                ids.insert(id)?;
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Headers;

    fn record() -> MessageRecord {
        MessageRecord {
            from: "Alice <alice@example.com>".into(),
            subject: "Quarterly report".into(),
            headers: Headers {
                newsgroups: "comp.lang.rust".into(),
                ..Headers::default()
            },
            ..MessageRecord::default()
        }
    }

    #[test]
    fn cached_fields() {
        let record = record();
        assert_eq!("Quarterly report", field_text(&record, None, SearchField::CachedSubject));
        assert_eq!("comp.lang.rust", field_text(&record, None, SearchField::Newsgroups));
        assert!(field_text(&record, None, SearchField::CachedHeaders).contains("alice@example.com"));
    }

    #[test]
    fn raw_fields() {
        let raw = b"Subject: hi\r\n\r\nsee you tomorrow\r\n";
        let record = record();
        assert_eq!("", field_text(&record, None, SearchField::Body));
        assert_eq!("see you tomorrow\r\n", field_text(&record, Some(raw), SearchField::Body));
        assert_eq!("Subject: hi", field_text(&record, Some(raw), SearchField::Headers));
    }
}
