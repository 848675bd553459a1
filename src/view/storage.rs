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

//! View storage module.
//!
//! This module contains the SQLite storage of the views: the
//! append-only member logs, the view configurations, the id counters
//! and the auto-filter tables.

use log::{debug, info, trace, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::{MessageId, OrderedIdSet, SortBy};

use super::{
    Error, Model, ModelFlags, ModelGrouping, ModelType, Result, Search, SearchField,
    SearchOperator, SearchOption, View, ViewId, ViewKind,
};

pub const VIEWS_DB_NAME: &str = "views.sqlite";
pub const VIEWS_VERSION: i64 = 2;

const CREATE_VIEW_LOG_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS view_log (
        seq   INTEGER PRIMARY KEY AUTOINCREMENT,
        name  TEXT    NOT NULL,
        entry INTEGER NOT NULL
    )
";

const CREATE_VIEW_LOG_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS view_log_name ON view_log (name, seq)
";

const CREATE_VIEWS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS views (
        id              INTEGER PRIMARY KEY,
        parent_id       INTEGER NOT NULL,
        name            TEXT    NOT NULL,
        kind            INTEGER NOT NULL,
        model_flags     INTEGER NOT NULL,
        model_age       INTEGER NOT NULL,
        model_sort      INTEGER NOT NULL,
        model_type      INTEGER NOT NULL,
        model_grouping  INTEGER NOT NULL,
        model_ascending INTEGER NOT NULL,
        account_id      INTEGER NOT NULL,
        watched         INTEGER NOT NULL,
        ignored         INTEGER NOT NULL,
        hide_from_other INTEGER NOT NULL,
        has_autofilter  INTEGER NOT NULL,
        visible         INTEGER NOT NULL,
        search_only_in  INTEGER NOT NULL,
        keyword         TEXT    NOT NULL DEFAULT ''
    )
";

const CREATE_VIEW_SEARCHES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS view_searches (
        view_id    INTEGER NOT NULL,
        position   INTEGER NOT NULL,
        text       TEXT    NOT NULL,
        field      INTEGER NOT NULL,
        operator   INTEGER NOT NULL,
        option     INTEGER NOT NULL,
        start_date INTEGER NOT NULL,
        end_date   INTEGER NOT NULL,
        PRIMARY KEY(view_id, position)
    )
";

const CREATE_COUNTERS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS counters (
        range_start INTEGER PRIMARY KEY,
        next_id     INTEGER NOT NULL
    )
";

const CREATE_AUTOFILTER_TOKENS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS autofilter_tokens (
        view_id INTEGER NOT NULL,
        section INTEGER NOT NULL,
        token   TEXT    NOT NULL,
        count   INTEGER NOT NULL,
        PRIMARY KEY(view_id, section, token)
    )
";

const CREATE_AUTOFILTER_COUNTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS autofilter_counts (
        view_id  INTEGER PRIMARY KEY,
        included INTEGER NOT NULL,
        excluded INTEGER NOT NULL
    )
";

const CREATE_META_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT    PRIMARY KEY,
        value INTEGER NOT NULL
    )
";

const UPGRADE_V1_ADD_KEYWORD: &str = "
    ALTER TABLE views ADD COLUMN keyword TEXT NOT NULL DEFAULT ''
";

const INSERT_LOG_ENTRY: &str = "
    INSERT INTO view_log (name, entry)
    VALUES (?, ?)
";

const SELECT_LOG_ENTRIES: &str = "
    SELECT entry
    FROM view_log
    WHERE name = ?
    ORDER BY seq ASC
";

const COUNT_LOG_ENTRIES: &str = "
    SELECT COUNT(*)
    FROM view_log
    WHERE name = ?
";

const DELETE_LOG_ENTRIES: &str = "
    DELETE FROM view_log
    WHERE name = ?
";

const INSERT_VIEW: &str = "
    INSERT OR REPLACE INTO views
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_VIEWS: &str = "
    SELECT id, parent_id, name, kind, model_flags, model_age, model_sort,
           model_type, model_grouping, model_ascending, account_id, watched,
           ignored, hide_from_other, has_autofilter, visible, search_only_in,
           keyword
    FROM views
    ORDER BY id ASC
";

const DELETE_VIEW: &str = "
    DELETE FROM views
    WHERE id = ?
";

const INSERT_SEARCH: &str = "
    INSERT OR REPLACE INTO view_searches
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_SEARCHES: &str = "
    SELECT text, field, operator, option, start_date, end_date
    FROM view_searches
    WHERE view_id = ?
    ORDER BY position ASC
";

const DELETE_SEARCHES: &str = "
    DELETE FROM view_searches
    WHERE view_id = ?
";

const SELECT_COUNTER: &str = "
    SELECT next_id
    FROM counters
    WHERE range_start = ?
";

const INSERT_COUNTER: &str = "
    INSERT OR REPLACE INTO counters
    VALUES (?, ?)
";

const SELECT_AUTOFILTER_TOKENS: &str = "
    SELECT section, token, count
    FROM autofilter_tokens
    WHERE view_id = ?
";

const INSERT_AUTOFILTER_TOKEN: &str = "
    INSERT OR REPLACE INTO autofilter_tokens
    VALUES (?, ?, ?, ?)
";

const SELECT_AUTOFILTER_COUNTS: &str = "
    SELECT included, excluded
    FROM autofilter_counts
    WHERE view_id = ?
";

const INSERT_AUTOFILTER_COUNTS: &str = "
    INSERT OR REPLACE INTO autofilter_counts
    VALUES (?, ?, ?)
";

const SELECT_META: &str = "
    SELECT value
    FROM meta
    WHERE key = ?
";

const INSERT_META: &str = "
    INSERT OR REPLACE INTO meta
    VALUES (?, ?)
";

const META_VERSION: &str = "version";

/// Represents the storage of every persistent view.
#[derive(Debug)]
pub struct ViewStorage {
    path: PathBuf,
    conn: Connection,
}

impl ViewStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        debug!("opening views database at {:?}", path);

        let conn = Connection::open(&path).map_err(|err| Error::from_open(err, path.clone()))?;
        conn.execute_batch(&format!(
            "{};{};{};{};{};{};{};{};",
            CREATE_VIEW_LOG_TABLE,
            CREATE_VIEW_LOG_INDEX,
            CREATE_VIEWS_TABLE,
            CREATE_VIEW_SEARCHES_TABLE,
            CREATE_COUNTERS_TABLE,
            CREATE_AUTOFILTER_TOKENS_TABLE,
            CREATE_AUTOFILTER_COUNTS_TABLE,
            CREATE_META_TABLE,
        ))
        .map_err(|err| Error::from_open(err, path.clone()))?;

        let storage = Self { path, conn };
        storage.upgrade()?;
        Ok(storage)
    }

    /// Opens a storage living in memory, for memory-only registries.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_meta(&self, key: &str) -> Result<Option<i64>> {
        let value = self
            .conn
            .query_row(SELECT_META, [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn write_meta(&self, key: &str, value: i64) -> Result<()> {
        self.conn.execute(INSERT_META, params![key, value])?;
        Ok(())
    }

    pub fn version(&self) -> Result<i64> {
        Ok(self.read_meta(META_VERSION)?.unwrap_or(0))
    }

    /// Runs the one-time upgrade passes the stored version requires.
    fn upgrade(&self) -> Result<()> {
        let version = self.version()?;
        if version >= VIEWS_VERSION {
            return Ok(());
        }

        // databases older than the meta table read as version 0
        if version < 2 {
            info!("upgrading views database from version {}", version);
            let has_keyword = self
                .conn
                .prepare("SELECT keyword FROM views LIMIT 1")
                .is_ok();
            if !has_keyword {
                self.conn
                    .execute_batch(UPGRADE_V1_ADD_KEYWORD)
                    .map_err(|err| Error::UpgradeDatabaseError(err, version))?;
            }
        }

        self.write_meta(META_VERSION, VIEWS_VERSION)?;
        Ok(())
    }

    /// Appends a signed entry to a view log: positive entries add a
    /// message, negative ones remove it.
    pub fn append(&self, name: &str, entry: i64) -> Result<()> {
        trace!("appending {} to view log {}", entry, name);
        self.conn.execute(INSERT_LOG_ENTRY, params![name, entry])?;
        Ok(())
    }

    /// Replays a view log from an empty set.
    pub fn replay(&self, name: &str) -> Result<OrderedIdSet> {
        let mut stmt = self.conn.prepare(SELECT_LOG_ENTRIES)?;
        let entries = stmt.query_map([name], |row| row.get::<_, i64>(0))?;

        let mut members = OrderedIdSet::new();
        for entry in entries {
            let entry = entry?;
            if entry > 0 {
                members.insert(entry as MessageId)?;
            } else if entry < 0 {
                members.remove((-entry) as MessageId);
            }
        }

        Ok(members)
    }

    pub fn log_len(&self, name: &str) -> Result<usize> {
        let len: i64 = self
            .conn
            .query_row(COUNT_LOG_ENTRIES, [name], |row| row.get(0))?;
        Ok(len as usize)
    }

    /// Rewrites a view log so that it only holds the given members.
    pub fn compact(&mut self, name: &str, members: &OrderedIdSet) -> Result<()> {
        debug!("compacting view log {} ({} members)", name, members.len());
        let tx = self.conn.transaction()?;
        tx.execute(DELETE_LOG_ENTRIES, [name])?;
        {
            let mut stmt = tx.prepare(INSERT_LOG_ENTRY)?;
            for id in members {
                stmt.execute(params![name, id as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear_log(&self, name: &str) -> Result<()> {
        self.conn.execute(DELETE_LOG_ENTRIES, [name])?;
        Ok(())
    }

    /// Saves the configuration and the search rules of a view.
    pub fn save_view(&mut self, view: &View) -> Result<()> {
        trace!("saving view {} config", view.id);
        let tx = self.conn.transaction()?;
        tx.execute(
            INSERT_VIEW,
            params![
                view.id as i64,
                view.parent_id as i64,
                view.name,
                view.kind.to_i64(),
                view.model.flags.bits() as i64,
                view.model.age as i64,
                view.model.sort.to_i64(),
                view.model.kind.to_i64(),
                view.model.grouping.to_i64(),
                view.model.ascending,
                view.account_id as i64,
                view.watched,
                view.ignored,
                view.hide_from_other,
                view.has_autofilter,
                view.visible,
                view.search_only_in as i64,
                view.keyword,
            ],
        )?;

        tx.execute(DELETE_SEARCHES, [view.id as i64])?;
        for (position, search) in view.searches().iter().enumerate() {
            tx.execute(
                INSERT_SEARCH,
                params![
                    view.id as i64,
                    position as i64,
                    search.text,
                    search.field.to_i64(),
                    match search.operator {
                        SearchOperator::And => 0,
                        SearchOperator::Or => 1,
                    },
                    search.option.to_i64(),
                    search.start_date,
                    search.end_date,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn parse_view(row: &Row) -> rusqlite::Result<Option<View>> {
        let id = row.get::<_, i64>(0)? as ViewId;
        let kind = match ViewKind::from_i64(row.get(3)?) {
            Some(kind) => kind,
            None => return Ok(None),
        };

        let mut view = View::new(id, kind, row.get::<_, String>(2)?);
        view.parent_id = row.get::<_, i64>(1)? as ViewId;
        view.model = Model {
            flags: ModelFlags::from_bits_truncate(row.get::<_, i64>(4)? as u32),
            age: row.get::<_, i64>(5)? as u32,
            sort: SortBy::from_i64(row.get(6)?),
            kind: ModelType::from_i64(row.get(7)?),
            grouping: ModelGrouping::from_i64(row.get(8)?),
            ascending: row.get(9)?,
        };
        view.account_id = row.get::<_, i64>(10)? as u16;
        view.watched = row.get(11)?;
        view.ignored = row.get(12)?;
        view.hide_from_other = row.get(13)?;
        view.has_autofilter = row.get(14)?;
        view.visible = row.get(15)?;
        view.search_only_in = row.get::<_, i64>(16)? as ViewId;
        view.keyword = row.get(17)?;
        view.set_dirty(false);

        Ok(Some(view))
    }

    fn read_searches(&self, id: ViewId) -> Result<Vec<Search>> {
        let mut stmt = self.conn.prepare(SELECT_SEARCHES)?;
        let searches = stmt
            .query_map([id as i64], |row| {
                Ok(Search {
                    text: row.get(0)?,
                    field: SearchField::from_i64(row.get(1)?),
                    operator: match row.get::<_, i64>(2)? {
                        1 => SearchOperator::Or,
                        _ => SearchOperator::And,
                    },
                    option: SearchOption::from_i64(row.get(3)?),
                    start_date: row.get(4)?,
                    end_date: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(searches)
    }

    /// Loads every saved view configuration. Members are not loaded.
    pub fn load_views(&self) -> Result<Vec<View>> {
        let mut views: Vec<View> = {
            let mut stmt = self.conn.prepare(SELECT_VIEWS)?;
            let rows = stmt.query_map([], Self::parse_view)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect()
        };

        for view in views.iter_mut() {
            let searches = self.read_searches(view.id)?;
            if let Err(err) = view.set_searches(searches) {
                warn!("cannot compile searches of view {}: {}", view.id, err);
            }
            view.set_dirty(false);
        }

        debug!("{} views loaded", views.len());
        Ok(views)
    }

    /// Deletes a view: its configuration, searches, log and
    /// auto-filter tables.
    pub fn delete_view(&mut self, id: ViewId, name: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(DELETE_VIEW, [id as i64])?;
        tx.execute(DELETE_SEARCHES, [id as i64])?;
        tx.execute(DELETE_LOG_ENTRIES, [name])?;
        tx.execute("DELETE FROM autofilter_tokens WHERE view_id = ?", [id as i64])?;
        tx.execute("DELETE FROM autofilter_counts WHERE view_id = ?", [id as i64])?;
        tx.commit()?;
        Ok(())
    }

    /// Allocates the next identifier of the range `[start, end)`.
    pub fn next_id(&self, start: ViewId, end: ViewId) -> Result<ViewId> {
        let next = self
            .conn
            .query_row(SELECT_COUNTER, [start as i64], |row| row.get::<_, i64>(0))
            .optional()?
            .map(|next| next as ViewId)
            .unwrap_or(start)
            .max(start);

        if next >= end {
            return Err(Error::AllocViewIdError(start));
        }

        self.conn
            .execute(INSERT_COUNTER, params![start as i64, next as i64 + 1])?;
        Ok(next)
    }

    /// Reads the auto-filter tokens of a view as `(section, token,
    /// count)` triples.
    pub fn read_autofilter_tokens(&self, id: ViewId) -> Result<Vec<(i64, String, u32)>> {
        let mut stmt = self.conn.prepare(SELECT_AUTOFILTER_TOKENS)?;
        let tokens = stmt
            .query_map([id as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? as u32))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(tokens)
    }

    pub fn read_autofilter_counts(&self, id: ViewId) -> Result<Option<(u32, u32)>> {
        let counts = self
            .conn
            .query_row(SELECT_AUTOFILTER_COUNTS, [id as i64], |row| {
                Ok((row.get::<_, i64>(0)? as u32, row.get::<_, i64>(1)? as u32))
            })
            .optional()?;
        Ok(counts)
    }

    /// Writes the auto-filter tables of a view in one transaction.
    pub fn write_autofilter<'a, I>(
        &mut self,
        id: ViewId,
        counts: (u32, u32),
        tokens: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (i64, &'a str, u32)>,
    {
        let tx = self.conn.transaction()?;
        tx.execute(
            INSERT_AUTOFILTER_COUNTS,
            params![id as i64, counts.0 as i64, counts.1 as i64],
        )?;
        {
            let mut stmt = tx.prepare(INSERT_AUTOFILTER_TOKEN)?;
            for (section, token, count) in tokens {
                stmt.execute(params![id as i64, section, token, count as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_signed_log() {
        let storage = ViewStorage::open_in_memory().unwrap();
        storage.append("folder_0300000", 5).unwrap();
        storage.append("folder_0300000", -5).unwrap();
        storage.append("folder_0300000", 5).unwrap();
        storage.append("folder_0300000", 7).unwrap();
        storage.append("folder_0300000", -7).unwrap();

        let members = storage.replay("folder_0300000").unwrap();
        assert_eq!(vec![5], members.to_vec());
        assert!(storage.replay("folder_0300001").unwrap().is_empty());
    }

    #[test]
    fn counters_are_monotonic() {
        let storage = ViewStorage::open_in_memory().unwrap();
        assert_eq!(300_000, storage.next_id(300_000, 300_002).unwrap());
        assert_eq!(300_001, storage.next_id(300_000, 300_002).unwrap());
        assert!(storage.next_id(300_000, 300_002).is_err());
    }

    #[test]
    fn upgrade_database_without_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VIEWS_DB_NAME);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE views (
                    id              INTEGER PRIMARY KEY,
                    parent_id       INTEGER NOT NULL,
                    name            TEXT    NOT NULL,
                    kind            INTEGER NOT NULL,
                    model_flags     INTEGER NOT NULL,
                    model_age       INTEGER NOT NULL,
                    model_sort      INTEGER NOT NULL,
                    model_type      INTEGER NOT NULL,
                    model_grouping  INTEGER NOT NULL,
                    model_ascending INTEGER NOT NULL,
                    account_id      INTEGER NOT NULL,
                    watched         INTEGER NOT NULL,
                    ignored         INTEGER NOT NULL,
                    hide_from_other INTEGER NOT NULL,
                    has_autofilter  INTEGER NOT NULL,
                    visible         INTEGER NOT NULL,
                    search_only_in  INTEGER NOT NULL
                )",
            )
            .unwrap();
        }

        let storage = ViewStorage::open(&path).unwrap();
        assert_eq!(VIEWS_VERSION, storage.version().unwrap());
        assert!(storage.load_views().unwrap().is_empty());
    }
}
