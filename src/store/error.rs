use rusqlite::{self, ErrorCode};
use std::{path::PathBuf, result};
use thiserror::Error;

use crate::{message, MessageId};

use super::body;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find message {0}")]
    FindMessageError(MessageId),
    #[error("cannot allocate a message id: the store is still loading")]
    StoreUnavailableError,
    #[error("cannot read store at {0}: the database is corrupted and needs to be rebuilt")]
    CorruptError(PathBuf),
    #[error("cannot open store database at {1}")]
    OpenDatabaseError(#[source] rusqlite::Error, PathBuf),

    #[error(transparent)]
    MessageError(#[from] message::Error),
    #[error(transparent)]
    BodyError(#[from] body::Error),
    #[error(transparent)]
    DatabaseError(#[from] rusqlite::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Checks if the given database error means that the file cannot be
/// trusted anymore.
pub fn is_corruption(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(err, _) => {
            matches!(err.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
        }
        _ => false,
    }
}
