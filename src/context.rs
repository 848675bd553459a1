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

//! Context module.
//!
//! The context owns the store, the indexer, the lexicon and the
//! scheduler of an engine. Everything happens on the thread owning
//! the context, one task per turn, except the lexicon searches which
//! run on the lexicon worker.

use log::{debug, info, trace, warn};
use proc_lock::{lock, LockPath};
use std::{
    fs, io,
    path::{Path, PathBuf},
    result,
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::{
    config,
    indexer::{self, Indexer, Notification},
    lexicon::{self, Lexicon, SearchResult, LEXICON_DB_NAME},
    scheduler::{Scheduler, TaskKey},
    store::{
        self, body, BodyStore, FsBodyStore, LoadProgress, Store, StoreEvent, STORE_DB_NAME,
    },
    view::{Search, ViewId, VIEWS_DB_NAME},
    EngineConfig, MessageFlags, MessageId, MessageRecord, OrderedIdSet,
};

/// Name of the directory holding the raw messages.
pub const BODIES_DIR_NAME: &str = "bodies";

/// Delay between two polls of the lexicon worker.
const LEXICON_POLL_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot lock engine directory {1}")]
    LockEngineError(#[source] io::Error, PathBuf),
    #[error("cannot remove database {1}")]
    RemoveDatabaseError(#[source] io::Error, PathBuf),

    #[error(transparent)]
    ConfigError(#[from] config::Error),
    #[error(transparent)]
    BodyError(#[from] body::Error),
    #[error(transparent)]
    StoreError(#[from] store::Error),
    #[error(transparent)]
    IndexerError(#[from] indexer::Error),
    #[error(transparent)]
    LexiconError(#[from] lexicon::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    /// Checks if the error means that a database is corrupted and the
    /// engine needs to be rebuilt with [`Context::reset`].
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::StoreError(store::Error::CorruptError(_))
                | Self::IndexerError(indexer::Error::ViewError(crate::view::Error::CorruptError(_)))
                | Self::LexiconError(lexicon::Error::CorruptError(_))
        )
    }
}

pub struct Context {
    config: EngineConfig,
    root_dir: PathBuf,
    store: Store,
    indexer: Indexer,
    lexicon: Lexicon,
    scheduler: Scheduler,
    notifications: Vec<Notification>,
    word_results: Vec<SearchResult>,
}

impl Context {
    /// Opens the engine stored in the root directory of the config,
    /// keeping raw messages in its bodies directory.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let root_dir = config.root_dir()?;
        let bodies = FsBodyStore::new(root_dir.join(BODIES_DIR_NAME))?;
        Self::open_with_bodies(config, Box::new(bodies))
    }

    /// Opens the engine with the given raw message storage. The store
    /// loads in the background: run turns until
    /// [`Context::is_loaded`] to get every message.
    pub fn open_with_bodies(config: EngineConfig, bodies: Box<dyn BodyStore>) -> Result<Self> {
        let root_dir = config.root_dir()?;
        info!("opening engine at {:?}", root_dir);

        let store = Store::open(&config, &root_dir, bodies)?;
        let indexer = Indexer::open(&config, &root_dir)?;
        let lexicon = Lexicon::open(&root_dir)?;

        let mut scheduler = Scheduler::new();
        scheduler.post(TaskKey::StoreLoad);

        Ok(Self {
            config,
            root_dir,
            store,
            indexer,
            lexicon,
            scheduler,
            notifications: vec![],
            word_results: vec![],
        })
    }

    /// Removes the databases of the engine so that the next open
    /// starts from scratch. Raw messages are kept.
    pub fn reset(config: &EngineConfig) -> Result<()> {
        let root_dir = config.root_dir()?;
        for name in [STORE_DB_NAME, VIEWS_DB_NAME, LEXICON_DB_NAME] {
            let path = root_dir.join(name);
            match fs::remove_file(&path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(Error::RemoveDatabaseError(err, path));
                }
                _ => (),
            }
        }
        warn!("engine databases at {:?} removed", root_dir);
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Gives access to the indexer together with the store it needs
    /// for most of its operations.
    pub fn indexer_mut(&mut self) -> (&mut Indexer, &mut Store) {
        (&mut self.indexer, &mut self.store)
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    /// Takes the notifications of the indexer dispatched so far.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.append(&mut self.indexer.drain_events());
        std::mem::take(&mut self.notifications)
    }

    /// Runs the task due first at the given time. Returns the task
    /// run, if any.
    pub fn run_turn_at(&mut self, now: Instant) -> Result<Option<TaskKey>> {
        let key = match self.scheduler.next_ready(now) {
            Some(key) => key,
            None => return Ok(None),
        };
        trace!("running task {:?}", key);

        match key {
            TaskKey::StoreLoad => {
                let progress = self.store.load_step()?;
                self.handle_store_events()?;
                if let LoadProgress::Partial(_) = progress {
                    self.scheduler.post(TaskKey::StoreLoad);
                }
            }
            TaskKey::StoreCommit => self.commit()?,
            TaskKey::ContinueSearch => {
                if self.indexer.continue_search(&self.store) {
                    self.scheduler.post(TaskKey::ContinueSearch);
                }
            }
            TaskKey::PreFetch(view) => {
                if let Err(err) = self.indexer.prefetch(view) {
                    warn!("cannot prefetch view {}: {}", view, err);
                }
            }
            TaskKey::LexiconCommit => {
                self.lexicon.commit()?;
            }
            TaskKey::LexiconPoll => {
                self.word_results.extend(self.lexicon.poll_results());
                if self.lexicon.has_searches_in_flight() {
                    self.scheduler
                        .post_delayed(TaskKey::LexiconPoll, LEXICON_POLL_DELAY);
                }
            }
        }

        self.collect_notifications();
        Ok(Some(key))
    }

    pub fn run_turn(&mut self) -> Result<Option<TaskKey>> {
        self.run_turn_at(Instant::now())
    }

    /// Runs the tasks ready now until none is left. Delayed tasks not
    /// due yet stay pending. Returns the number of turns run.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let mut turns = 0;
        while self.run_turn()?.is_some() {
            turns += 1;
        }
        Ok(turns)
    }

    fn collect_notifications(&mut self) {
        self.notifications.append(&mut self.indexer.drain_events());
    }

    fn handle_store_events(&mut self) -> Result<()> {
        for event in self.store.drain_events() {
            match event {
                StoreEvent::MessageAvailable { .. } => (),
                StoreEvent::MessageChanged(id) => self.indexer.message_changed(id),
                StoreEvent::NeedsReindexing(id) => {
                    self.indexer.new_message(&mut self.store, id)?;
                    self.index_words(id)?;
                }
                StoreEvent::PermanentlyRemoved(id) => {
                    debug!("removing again message {}", id);
                    self.store.remove_message(id)?;
                    self.indexer.remove_message(id, None)?;
                    self.scheduler
                        .post_delayed(TaskKey::StoreCommit, self.config.store_commit_delay());
                }
                StoreEvent::MessageRemoved(id) => {
                    self.lexicon.remove_message(id)?;
                    self.schedule_lexicon_commit();
                }
                StoreEvent::AllMessagesAvailable => {
                    info!("engine loaded");
                    if self.indexer.has_active_searches() {
                        self.scheduler.post(TaskKey::ContinueSearch);
                    }
                }
            }
        }
        Ok(())
    }

    fn index_words(&mut self, id: MessageId) -> Result<()> {
        let record = self.store.get_record(id)?;
        let body = self
            .store
            .get_message_data(id)
            .map(|raw| body::body_text(&raw))
            .unwrap_or_default();
        self.lexicon
            .insert_message(id, format!("{} {}", record.header_text(), body))?;
        self.schedule_lexicon_commit();
        Ok(())
    }

    fn schedule_lexicon_commit(&mut self) {
        self.scheduler
            .post_delayed(TaskKey::LexiconCommit, self.config.lexicon_commit_delay());
    }

    fn schedule_store_commit(&mut self) {
        if !self.scheduler.is_pending(TaskKey::StoreCommit) {
            self.scheduler
                .post_delayed(TaskKey::StoreCommit, self.config.store_commit_delay());
        }
    }

    /// Adds a message to the store, routes it to its views and queues
    /// its words for the lexicon. Records with an id are saved again
    /// instead.
    pub fn add_message(&mut self, record: MessageRecord, raw: Option<&[u8]>) -> Result<MessageId> {
        let new = record.id == 0;
        let id = self.store.add_message(record)?;
        if let Some(raw) = raw {
            self.store.set_raw_message(id, raw)?;
        }

        if new {
            self.indexer.new_message(&mut self.store, id)?;
        }
        self.index_words(id)?;
        self.handle_store_events()?;
        self.schedule_store_commit();
        if self.indexer.has_active_searches() {
            self.scheduler.post(TaskKey::ContinueSearch);
        }

        self.collect_notifications();
        Ok(id)
    }

    /// Changes the flags of a message and keeps the views following
    /// its flags in sync (unread, sent, pin board, spam and trash).
    pub fn set_flags(&mut self, id: MessageId, flags: MessageFlags) -> Result<bool> {
        let previous = self.store.get_flags(id)?;
        if !self.store.set_flags(id, flags)? {
            return Ok(false);
        }

        self.indexer.flags_changed(id, previous, flags)?;

        self.handle_store_events()?;
        self.schedule_store_commit();
        self.collect_notifications();
        Ok(true)
    }

    pub fn mark_read(&mut self, id: MessageId, read: bool) -> Result<bool> {
        let mut flags = self.store.get_flags(id)?;
        flags.set(MessageFlags::IS_READ, read);
        self.set_flags(id, flags)
    }

    pub fn message_sent(&mut self, id: MessageId) -> Result<bool> {
        let mut flags = self.store.get_flags(id)?;
        flags.insert(MessageFlags::IS_SENT);
        flags.remove(MessageFlags::IS_TIMEQUEUED);
        self.set_flags(id, flags)
    }

    pub fn spam(&mut self, id: MessageId) -> Result<()> {
        self.indexer.spam(&mut self.store, id)?;
        self.handle_store_events()?;
        self.schedule_store_commit();
        self.collect_notifications();
        Ok(())
    }

    pub fn not_spam(&mut self, id: MessageId) -> Result<()> {
        self.indexer.not_spam(&mut self.store, id)?;
        self.handle_store_events()?;
        self.schedule_store_commit();
        self.collect_notifications();
        Ok(())
    }

    /// Removes a message from every view and queues it for removal
    /// from the store.
    pub fn remove_message(&mut self, id: MessageId) -> Result<()> {
        self.store.remove_message(id)?;
        self.indexer.remove_message(id, None)?;
        self.schedule_store_commit();
        self.collect_notifications();
        Ok(())
    }

    /// Starts a search in a new view, continued one message per turn.
    pub fn start_search(&mut self, searches: Vec<Search>, search_only_in: ViewId) -> Result<ViewId> {
        let view = self
            .indexer
            .start_search(&self.store, searches, search_only_in)?;
        if self.store.is_loaded() {
            self.scheduler.post(TaskKey::ContinueSearch);
        }
        self.collect_notifications();
        Ok(view)
    }

    /// Loads a view soon. Requests for the same view made before the
    /// delay elapsed are served once.
    pub fn request_prefetch(&mut self, view: ViewId) {
        self.scheduler
            .post_delayed(TaskKey::PreFetch(view), self.config.prefetch_delay());
    }

    /// Finds the messages containing the words of a text. Only the
    /// committed words are searched.
    pub fn find_words(&self, text: &str, partial: bool) -> Result<OrderedIdSet> {
        Ok(self
            .indexer
            .find_words(&self.store, &self.lexicon, text, partial)?)
    }

    /// Sends a word search to the lexicon worker. The result is
    /// collected by a later turn.
    pub fn async_find_words(&mut self, text: &str, partial: bool) -> Result<u64> {
        let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
        let id = self.lexicon.async_multi_search(&words, partial)?;
        self.scheduler.post(TaskKey::LexiconPoll);
        Ok(id)
    }

    /// Takes the results of the word searches collected so far.
    pub fn take_word_results(&mut self) -> Vec<SearchResult> {
        std::mem::take(&mut self.word_results)
    }

    /// Writes the store and the views to disk. The engine directory is
    /// locked while writing.
    pub fn commit(&mut self) -> Result<()> {
        let guard = if self.config.lock {
            let lock_path = LockPath::Tmp(format!(
                "mailbase-{:x}.lock",
                md5::compute(self.root_dir.to_string_lossy().as_bytes())
            ));
            Some(lock(&lock_path).map_err(|err| Error::LockEngineError(err, self.root_dir.clone()))?)
        } else {
            None
        };

        self.store.flush()?;
        self.handle_store_events()?;
        self.indexer.save_all()?;
        drop(guard);

        self.scheduler.cancel(TaskKey::StoreCommit);
        debug!("engine committed");
        Ok(())
    }

    /// Commits everything pending and closes the engine.
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        self.lexicon.commit()?;
        info!("engine at {:?} closed", self.root_dir);
        Ok(())
    }
}
