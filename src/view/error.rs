use rusqlite;
use std::{path::PathBuf, result};
use thiserror::Error;

use crate::{message, store::is_corruption};

use super::ViewId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find view {0}")]
    FindViewError(ViewId),
    #[error("cannot allocate a view id: range starting at {0} is full")]
    AllocViewIdError(ViewId),
    #[error("cannot read views at {0}: the database is corrupted and needs to be rebuilt")]
    CorruptError(PathBuf),
    #[error("cannot open views database at {1}")]
    OpenDatabaseError(#[source] rusqlite::Error, PathBuf),
    #[error("cannot upgrade views database from version {1}")]
    UpgradeDatabaseError(#[source] rusqlite::Error, i64),

    #[error(transparent)]
    MessageError(#[from] message::Error),
    #[error(transparent)]
    DatabaseError(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn from_open(err: rusqlite::Error, path: PathBuf) -> Self {
        if is_corruption(&err) {
            Self::CorruptError(path)
        } else {
            Self::OpenDatabaseError(err, path)
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
