//! Word index module.
//!
//! This module contains the persistent word to message ids index the
//! lexicon searches in. Changes are queued and written in batches.

use log::{debug, trace};
use rayon::prelude::*;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::{indexer::tokenize, store::is_corruption, MessageId, OrderedIdSet};

use super::{Error, Result};

pub const LEXICON_DB_NAME: &str = "lexicon.sqlite";

/// Longest text indexed for a single message, in tokens.
const MAX_WORDS_PER_MESSAGE: usize = 10_000;

const CREATE_WORDS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS words (
        word TEXT    NOT NULL,
        id   INTEGER NOT NULL,
        PRIMARY KEY(word, id)
    )
";

const CREATE_WORDS_ID_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS words_id ON words(id)
";

const INSERT_WORD: &str = "INSERT OR IGNORE INTO words VALUES (?, ?)";

const DELETE_MESSAGE: &str = "DELETE FROM words WHERE id = ?";

const SELECT_WORD: &str = "SELECT id FROM words WHERE word = ?";

const SELECT_PREFIX: &str = "SELECT DISTINCT id FROM words WHERE word >= ? AND word < ?";

const COUNT_WORDS: &str = "SELECT COUNT(DISTINCT word) FROM words";

#[derive(Clone, Debug, Eq, PartialEq)]
enum Change {
    Insert(MessageId, String),
    Remove(MessageId),
}

/// Represents the word index. Searches only see committed changes.
#[derive(Debug)]
pub struct WordIndex {
    path: PathBuf,
    conn: Connection,
    pending: Vec<Change>,
}

impl WordIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        debug!("opening lexicon database at {:?}", path);

        let conn = Connection::open(&path)
            .map_err(|err| Error::OpenDatabaseError(err, path.clone()))?;

        let init = conn.execute_batch(&format!(
            "{};{};",
            CREATE_WORDS_TABLE, CREATE_WORDS_ID_INDEX
        ));
        match init {
            Err(err) if is_corruption(&err) => return Err(Error::CorruptError(path)),
            Err(err) => return Err(Error::OpenDatabaseError(err, path)),
            Ok(()) => (),
        }

        Ok(Self {
            path,
            conn,
            pending: vec![],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues the words of a message. A message indexed again loses
    /// its previous words.
    pub fn insert_message(&mut self, id: MessageId, text: String) {
        self.pending.push(Change::Insert(id, text));
    }

    pub fn remove_message(&mut self, id: MessageId) {
        self.pending.push(Change::Remove(id));
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Writes the queued changes in one transaction. Returns the
    /// number of changes written.
    pub fn commit(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let pending = std::mem::take(&mut self.pending);
        let changes: Vec<(MessageId, Option<Vec<String>>)> = pending
            .into_par_iter()
            .map(|change| match change {
                Change::Insert(id, text) => (id, Some(tokenize(&text, MAX_WORDS_PER_MESSAGE))),
                Change::Remove(id) => (id, None),
            })
            .collect();

        let tx = self.conn.transaction()?;
        {
            let mut delete = tx.prepare_cached(DELETE_MESSAGE)?;
            let mut insert = tx.prepare_cached(INSERT_WORD)?;
            for (id, words) in &changes {
                delete.execute([*id as i64])?;
                for word in words.iter().flatten() {
                    insert.execute(params![word, *id as i64])?;
                }
            }
        }
        tx.commit()?;

        debug!("{} lexicon changes committed", changes.len());
        Ok(changes.len())
    }

    /// Finds the messages containing a word, or a word starting with
    /// it when `partial` is set.
    pub fn search(&self, word: &str, partial: bool) -> Result<OrderedIdSet> {
        let word = word.to_lowercase();
        let ids: Vec<i64> = if partial {
            let upper = format!("{}{}", word, char::MAX);
            let mut stmt = self.conn.prepare_cached(SELECT_PREFIX)?;
            let ids = stmt
                .query_map(params![word, upper], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids
        } else {
            let mut stmt = self.conn.prepare_cached(SELECT_WORD)?;
            let ids = stmt
                .query_map([&word], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids
        };

        let mut set = OrderedIdSet::new();
        for id in ids {
            set.insert(id as MessageId)?;
        }
        trace!("word {:?} found in {} messages", word, set.len());
        Ok(set)
    }

    /// Finds the messages containing every given word.
    pub fn multi_search(&self, words: &[String], partial: bool) -> Result<OrderedIdSet> {
        let mut result: Option<OrderedIdSet> = None;

        for word in words.iter().filter(|word| !word.is_empty()) {
            let found = self.search(word, partial)?;
            let next = match result {
                None => found,
                Some(previous) => {
                    let mut both = OrderedIdSet::new();
                    for id in previous.iter().filter(|id| found.contains(*id)) {
                        both.insert(id)?;
                    }
                    both
                }
            };
            if next.is_empty() {
                return Ok(next);
            }
            result = Some(next);
        }

        Ok(result.unwrap_or_default())
    }

    pub fn words_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(COUNT_WORDS, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> (tempfile::TempDir, WordIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = WordIndex::open(dir.path().join(LEXICON_DB_NAME)).unwrap();
        (dir, index)
    }

    #[test]
    fn changes_are_seen_after_commit() {
        let (_dir, mut index) = index();
        index.insert_message(1, "Hello world".into());
        assert!(index.search("hello", false).unwrap().is_empty());

        assert_eq!(1, index.commit().unwrap());
        assert_eq!(vec![1], index.search("HELLO", false).unwrap().to_vec());
    }

    #[test]
    fn reindexing_replaces_words() {
        let (_dir, mut index) = index();
        index.insert_message(1, "apple".into());
        index.insert_message(1, "banana".into());
        index.commit().unwrap();

        assert!(index.search("apple", false).unwrap().is_empty());
        assert_eq!(vec![1], index.search("banana", false).unwrap().to_vec());
    }

    #[test]
    fn prefix_and_intersection() {
        let (_dir, mut index) = index();
        index.insert_message(1, "rustacean meeting".into());
        index.insert_message(2, "rust meeting".into());
        index.insert_message(3, "lunch".into());
        index.commit().unwrap();

        let words = vec!["rust".to_owned(), "meeting".to_owned()];
        assert_eq!(vec![2], index.multi_search(&words, false).unwrap().to_vec());
        assert_eq!(vec![1, 2], index.multi_search(&words, true).unwrap().to_vec());
        assert!(index.multi_search(&[], false).unwrap().is_empty());
    }
}
