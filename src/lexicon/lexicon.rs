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

//! Lexicon facade module.
//!
//! The facade shares the word index between the caller and a
//! dedicated worker thread. Synchronous searches lock the index
//! directly, asynchronous searches are sent to the worker and their
//! results collected later with [`Lexicon::poll_results`].

use log::{debug, trace, warn};
use std::{
    path::Path,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use crate::{MessageId, OrderedIdSet};

use super::{Error, Result, WordIndex, LEXICON_DB_NAME};

/// Represents a search handed over to the worker.
#[derive(Clone, Debug)]
struct SearchJob {
    id: u64,
    words: Vec<String>,
    partial: bool,
}

/// Represents the outcome of an asynchronous search, tagged with the
/// identifier returned by [`Lexicon::async_multi_search`].
pub type SearchResult = (u64, Result<OrderedIdSet>);

pub struct Lexicon {
    index: Arc<Mutex<WordIndex>>,
    jobs: Option<Sender<SearchJob>>,
    results: Receiver<SearchResult>,
    worker: Option<JoinHandle<()>>,
    next_search_id: u64,
    in_flight: usize,
}

impl Lexicon {
    /// Opens the lexicon stored in the given directory and starts its
    /// worker.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let index = Arc::new(Mutex::new(WordIndex::open(
            dir.as_ref().join(LEXICON_DB_NAME),
        )?));

        let (jobs, jobs_rx) = mpsc::channel::<SearchJob>();
        let (results_tx, results) = mpsc::channel();

        let worker_index = Arc::clone(&index);
        let worker = thread::Builder::new()
            .name("lexicon".into())
            .spawn(move || {
                debug!("lexicon worker started");
                for job in jobs_rx {
                    trace!("lexicon worker running search {}", job.id);
                    let result = lock(&worker_index)
                        .and_then(|index| index.multi_search(&job.words, job.partial));
                    if results_tx.send((job.id, result)).is_err() {
                        break;
                    }
                }
                debug!("lexicon worker stopped");
            })
            .map_err(Error::SpawnWorkerError)?;

        Ok(Self {
            index,
            jobs: Some(jobs),
            results,
            worker: Some(worker),
            next_search_id: 1,
            in_flight: 0,
        })
    }

    /// Finds the messages containing every word, blocking until the
    /// index is available.
    pub fn multi_search(&self, words: &[String], partial: bool) -> Result<OrderedIdSet> {
        lock(&self.index)?.multi_search(words, partial)
    }

    /// Sends a search to the worker. The returned identifier tags the
    /// result.
    pub fn async_multi_search(&mut self, words: &[String], partial: bool) -> Result<u64> {
        let id = self.next_search_id;
        self.next_search_id += 1;

        let job = SearchJob {
            id,
            words: words.to_vec(),
            partial,
        };
        self.jobs
            .as_ref()
            .ok_or(Error::SendSearchError(id))?
            .send(job)
            .map_err(|_| Error::SendSearchError(id))?;

        self.in_flight += 1;
        trace!("search {} sent to lexicon worker", id);
        Ok(id)
    }

    /// Collects the results of the asynchronous searches finished so
    /// far, in the order they finished.
    pub fn poll_results(&mut self) -> Vec<SearchResult> {
        let results: Vec<SearchResult> = self.results.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(results.len());
        results
    }

    /// Checks if some asynchronous searches did not report yet.
    pub fn has_searches_in_flight(&self) -> bool {
        self.in_flight > 0
    }

    /// Queues the text of a message. It becomes searchable once
    /// committed.
    pub fn insert_message(&self, id: MessageId, text: String) -> Result<()> {
        lock(&self.index)?.insert_message(id, text);
        Ok(())
    }

    pub fn remove_message(&self, id: MessageId) -> Result<()> {
        lock(&self.index)?.remove_message(id);
        Ok(())
    }

    pub fn has_pending(&self) -> Result<bool> {
        Ok(lock(&self.index)?.has_pending())
    }

    /// Writes the queued changes.
    pub fn commit(&self) -> Result<usize> {
        lock(&self.index)?.commit()
    }
}

impl Drop for Lexicon {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.jobs.take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("lexicon worker panicked");
            }
        }

        match self.commit() {
            Ok(0) => (),
            Ok(n) => debug!("{} lexicon changes committed on close", n),
            Err(err) => warn!("cannot commit lexicon on close: {}", err),
        }
    }
}

fn lock(index: &Mutex<WordIndex>) -> Result<MutexGuard<'_, WordIndex>> {
    index
        .lock()
        .map_err(|err| Error::LockIndexError(err.to_string()))
}
