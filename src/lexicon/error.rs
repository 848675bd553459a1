use std::{io, path::PathBuf, result};
use thiserror::Error;

use crate::message;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open lexicon database at {1}")]
    OpenDatabaseError(#[source] rusqlite::Error, PathBuf),
    #[error("cannot read lexicon at {0}: the database is corrupted and needs to be rebuilt")]
    CorruptError(PathBuf),
    #[error("cannot lock word index: {0}")]
    LockIndexError(String),
    #[error("cannot spawn lexicon worker")]
    SpawnWorkerError(#[source] io::Error),
    #[error("cannot send search {0} to lexicon worker: the worker stopped")]
    SendSearchError(u64),

    #[error(transparent)]
    MessageError(#[from] message::Error),
    #[error(transparent)]
    DatabaseError(#[from] rusqlite::Error),
}

pub type Result<T> = result::Result<T, Error>;
