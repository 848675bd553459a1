//! Storage module.
//!
//! This module contains the SQLite backed record table and the
//! Message-ID secondary index of the store.

use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::{BodyHandle, Headers, MessageFlags, MessageId, MessageRecord};

use super::{is_corruption, Error, Result};

const CREATE_MESSAGES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id                INTEGER PRIMARY KEY,
        account_id        INTEGER NOT NULL,
        parent_id         INTEGER NOT NULL,
        flags_lo          INTEGER NOT NULL,
        flags_hi          INTEGER NOT NULL,
        size              INTEGER NOT NULL,
        recv_time         INTEGER NOT NULL,
        sent_time         INTEGER NOT NULL,
        sender            TEXT    NOT NULL,
        recipients        TEXT    NOT NULL,
        subject           TEXT    NOT NULL,
        message_id        TEXT    NOT NULL,
        internet_location TEXT    NOT NULL,
        body_kind         INTEGER NOT NULL,
        body_data         INTEGER NOT NULL,
        cc                TEXT    NOT NULL,
        reply_to          TEXT    NOT NULL,
        newsgroups        TEXT    NOT NULL,
        list_id           TEXT    NOT NULL
    )
";

const CREATE_MESSAGE_IDS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS message_ids (
        hash INTEGER NOT NULL,
        id   INTEGER NOT NULL,
        PRIMARY KEY(hash, id)
    )
";

const CREATE_META_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT    PRIMARY KEY,
        value INTEGER NOT NULL
    )
";

const INSERT_MESSAGE: &str = "
    INSERT OR REPLACE INTO messages
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_MESSAGE: &str = "
    SELECT *
    FROM messages
    WHERE id = ?
";

const SELECT_MESSAGES_BLOCK: &str = "
    SELECT *
    FROM messages
    WHERE id > ?
    ORDER BY id ASC
    LIMIT ?
";

const UPDATE_FLAGS: &str = "
    UPDATE messages
    SET flags_lo = ?, flags_hi = ?
    WHERE id = ?
";

const DELETE_MESSAGE: &str = "
    DELETE FROM messages
    WHERE id = ?
";

const INSERT_MESSAGE_ID: &str = "
    INSERT OR IGNORE INTO message_ids
    VALUES (?, ?)
";

const DELETE_MESSAGE_ID: &str = "
    DELETE FROM message_ids
    WHERE hash = ?
    AND id = ?
";

const SELECT_MESSAGE_IDS: &str = "
    SELECT id
    FROM message_ids
    WHERE hash = ?
    ORDER BY id ASC
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

pub const META_NEXT_ID: &str = "next_id";
pub const META_VERSION: &str = "version";

/// Represents the record table of the store.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    conn: Connection,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        debug!("opening store database at {:?}", path);

        let conn = Connection::open(&path)
            .map_err(|err| Error::OpenDatabaseError(err, path.clone()))?;

        let init = conn.execute_batch(&format!(
            "{};{};{};",
            CREATE_MESSAGES_TABLE, CREATE_MESSAGE_IDS_TABLE, CREATE_META_TABLE
        ));
        match init {
            Err(err) if is_corruption(&err) => return Err(Error::CorruptError(path)),
            Err(err) => return Err(Error::OpenDatabaseError(err, path)),
            Ok(()) => (),
        }

        Ok(Self { path, conn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_record(row: &Row) -> rusqlite::Result<MessageRecord> {
        Ok(MessageRecord {
            id: row.get::<_, i64>(0)? as MessageId,
            account_id: row.get::<_, i64>(1)? as u16,
            parent_id: row.get::<_, i64>(2)? as MessageId,
            flags: MessageFlags::join(
                row.get::<_, i64>(3)? as u32,
                row.get::<_, i64>(4)? as u32,
            ),
            size: row.get::<_, i64>(5)? as u32,
            recv_time: row.get(6)?,
            sent_time: row.get(7)?,
            from: row.get(8)?,
            to: row.get(9)?,
            subject: row.get(10)?,
            message_id: row.get(11)?,
            internet_location: row.get(12)?,
            body: BodyHandle {
                kind: row.get::<_, i64>(13)? as u32,
                data: row.get::<_, i64>(14)? as u64,
            },
            headers: Headers {
                cc: row.get(15)?,
                reply_to: row.get(16)?,
                newsgroups: row.get(17)?,
                list_id: row.get(18)?,
                ..Headers::default()
            },
        })
    }

    pub fn write_record(&self, record: &MessageRecord) -> Result<()> {
        trace!("writing record {}", record.id);
        let (flags_lo, flags_hi) = record.flags.split();
        self.conn.execute(
            INSERT_MESSAGE,
            params![
                record.id as i64,
                record.account_id as i64,
                record.parent_id as i64,
                flags_lo as i64,
                flags_hi as i64,
                record.size as i64,
                record.recv_time,
                record.sent_time,
                record.from,
                record.to,
                record.subject,
                record.message_id,
                record.internet_location,
                record.body.kind as i64,
                record.body.data as i64,
                record.headers.cc,
                record.headers.reply_to,
                record.headers.newsgroups,
                record.headers.list_id,
            ],
        )?;
        Ok(())
    }

    pub fn read_record(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        let record = self
            .conn
            .query_row(SELECT_MESSAGE, [id as i64], Self::parse_record)
            .optional()?;
        Ok(record)
    }

    /// Reads at most `limit` records with an id greater than `after`,
    /// in ascending id order.
    pub fn read_block(&self, after: MessageId, limit: usize) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn.prepare(SELECT_MESSAGES_BLOCK)?;
        let records = stmt
            .query_map(params![after as i64, limit as i64], Self::parse_record)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(records)
    }

    pub fn write_flags(&self, id: MessageId, flags: MessageFlags) -> Result<()> {
        let (flags_lo, flags_hi) = flags.split();
        self.conn
            .execute(UPDATE_FLAGS, params![flags_lo as i64, flags_hi as i64, id as i64])?;
        Ok(())
    }

    pub fn delete_record(&self, id: MessageId) -> Result<()> {
        self.conn.execute(DELETE_MESSAGE, [id as i64])?;
        Ok(())
    }

    pub fn insert_message_id(&self, hash: u32, id: MessageId) -> Result<()> {
        self.conn
            .execute(INSERT_MESSAGE_ID, params![hash as i64, id as i64])?;
        Ok(())
    }

    pub fn delete_message_id(&self, hash: u32, id: MessageId) -> Result<()> {
        self.conn
            .execute(DELETE_MESSAGE_ID, params![hash as i64, id as i64])?;
        Ok(())
    }

    /// Lists the ids registered under the given Message-ID hash.
    pub fn find_message_ids(&self, hash: u32) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn.prepare(SELECT_MESSAGE_IDS)?;
        let ids = stmt
            .query_map([hash as i64], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as MessageId))
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    pub fn read_meta(&self, key: &str) -> Result<Option<i64>> {
        let value = self
            .conn
            .query_row(SELECT_META, [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn write_meta(&self, key: &str, value: i64) -> Result<()> {
        self.conn.execute(INSERT_META, params![key, value])?;
        Ok(())
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Drops every record and index entry.
    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM messages; DELETE FROM message_ids;")?;
        Ok(())
    }
}
