//! Body storage module.
//!
//! This module exposes the boundary with the raw message storage. The
//! store only keeps an opaque [`BodyHandle`] per message and never
//! interprets the bytes behind it.

use log::{debug, trace};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;

use crate::{BodyHandle, MessageId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find raw message for handle {0:?}")]
    FindBodyError(BodyHandle),
    #[error("cannot handle raw message of storage type {0}")]
    UnknownStorageTypeError(u32),
    #[error("cannot create body directory {1}")]
    CreateDirError(#[source] io::Error, PathBuf),
    #[error("cannot write raw message at {1}")]
    WriteBodyError(#[source] io::Error, PathBuf),
    #[error("cannot read raw message at {1}")]
    ReadBodyError(#[source] io::Error, PathBuf),
    #[error("cannot remove raw message at {1}")]
    RemoveBodyError(#[source] io::Error, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the raw message storage collaborator.
pub trait BodyStore: Send {
    fn add_message(&mut self, id: MessageId, raw: &[u8]) -> Result<BodyHandle>;
    fn get_message(&self, handle: BodyHandle) -> Result<Vec<u8>>;
    fn remove_message(&mut self, handle: BodyHandle) -> Result<()>;
}

/// Keeps raw messages in memory, mostly useful for tests and for
/// headers-only accounts.
#[derive(Debug, Default)]
pub struct MemoryBodyStore {
    bodies: HashMap<u64, Vec<u8>>,
}

impl MemoryBodyStore {
    pub const KIND: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }
}

impl BodyStore for MemoryBodyStore {
    fn add_message(&mut self, id: MessageId, raw: &[u8]) -> Result<BodyHandle> {
        self.bodies.insert(id as u64, raw.to_owned());
        Ok(BodyHandle {
            kind: Self::KIND,
            data: id as u64,
        })
    }

    fn get_message(&self, handle: BodyHandle) -> Result<Vec<u8>> {
        if handle.kind != Self::KIND {
            return Err(Error::UnknownStorageTypeError(handle.kind));
        }
        self.bodies
            .get(&handle.data)
            .cloned()
            .ok_or(Error::FindBodyError(handle))
    }

    fn remove_message(&mut self, handle: BodyHandle) -> Result<()> {
        self.bodies.remove(&handle.data);
        Ok(())
    }
}

/// Keeps one file per raw message inside a directory.
#[derive(Debug)]
pub struct FsBodyStore {
    dir: PathBuf,
}

impl FsBodyStore {
    pub const KIND: u32 = 2;

    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir).map_err(|err| Error::CreateDirError(err, dir.clone()))?;
        debug!("using body directory {:?}", dir);
        Ok(Self { dir })
    }

    fn path(&self, data: u64) -> PathBuf {
        self.dir.join(format!("{:08}.eml", data))
    }
}

impl BodyStore for FsBodyStore {
    fn add_message(&mut self, id: MessageId, raw: &[u8]) -> Result<BodyHandle> {
        let path = self.path(id as u64);
        trace!("writing raw message {} at {:?}", id, path);
        fs::write(&path, raw).map_err(|err| Error::WriteBodyError(err, path))?;
        Ok(BodyHandle {
            kind: Self::KIND,
            data: id as u64,
        })
    }

    fn get_message(&self, handle: BodyHandle) -> Result<Vec<u8>> {
        if handle.kind != Self::KIND {
            return Err(Error::UnknownStorageTypeError(handle.kind));
        }
        let path = self.path(handle.data);
        fs::read(&path).map_err(|err| Error::ReadBodyError(err, path))
    }

    fn remove_message(&mut self, handle: BodyHandle) -> Result<()> {
        let path = self.path(handle.data);
        match fs::remove_file(&path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                Err(Error::RemoveBodyError(err, path))
            }
            _ => Ok(()),
        }
    }
}

/// Returns the body part of a raw message, after the first empty
/// line.
pub fn body_text(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    match raw.find("\r\n\r\n").or_else(|| raw.find("\n\n")) {
        Some(pos) => raw[pos..].trim_start().to_owned(),
        None => String::new(),
    }
}

/// Returns the header part of a raw message, before the first empty
/// line.
pub fn header_text(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    match raw.find("\r\n\r\n").or_else(|| raw.find("\n\n")) {
        Some(pos) => raw[..pos].to_owned(),
        None => raw.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_raw_message() {
        let raw = b"Subject: hello\r\nFrom: a@b\r\n\r\nbody text\r\n";
        assert_eq!("Subject: hello\r\nFrom: a@b", header_text(raw));
        assert_eq!("body text\r\n", body_text(raw));
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryBodyStore::new();
        let handle = store.add_message(3, b"raw").unwrap();
        assert_eq!(b"raw".to_vec(), store.get_message(handle).unwrap());
        store.remove_message(handle).unwrap();
        assert!(store.get_message(handle).is_err());
    }
}
