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

//! Config module.
//!
//! This module contains everything related to the engine
//! configuration.

use shellexpand;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    result,
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_ROOT_DIR_NAME: &str = "mailbase";
pub const DEFAULT_AUTOFILTER_MIN_MESSAGES: usize = 30;
pub const DEFAULT_AUTOFILTER_THRESHOLD: f64 = 0.995;
pub const DEFAULT_LEXICON_COMMIT_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_STORE_COMMIT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_PREFETCH_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_LOAD_BLOCK_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot expand root directory {1}")]
    ExpandRootDirError(#[source] shellexpand::LookupError<env::VarError>, String),
    #[error("cannot find default data directory")]
    FindDataDirError,
    #[error("cannot create root directory {1}")]
    CreateRootDirError(#[source] io::Error, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the configuration of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Represents the directory holding the store, the views and the
    /// lexicon databases.
    pub root_dir: Option<PathBuf>,
    /// Splits threads when the subject of a reply does not match the
    /// subject of its parent.
    pub split_thread_on_subject_change: bool,
    /// Represents the minimum number of included and excluded
    /// messages the auto-filter needs before it classifies anything.
    pub autofilter_min_messages: Option<usize>,
    /// Represents the score above which a message is auto-filtered.
    pub autofilter_threshold: Option<f64>,
    /// Represents the idle delay before queued lexicon changes are
    /// committed.
    pub lexicon_commit_delay: Option<Duration>,
    /// Represents the delay before a requested store commit runs.
    pub store_commit_delay: Option<Duration>,
    /// Represents the delay used to coalesce prefetch requests.
    pub prefetch_delay: Option<Duration>,
    /// Represents the number of records read per bulk load turn.
    pub load_block_size: Option<usize>,
    /// Takes a process lock on the root directory.
    pub lock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            split_thread_on_subject_change: true,
            autofilter_min_messages: None,
            autofilter_threshold: None,
            lexicon_commit_delay: None,
            store_commit_delay: None,
            prefetch_delay: None,
            load_block_size: None,
            lock: true,
        }
    }
}

impl EngineConfig {
    /// Builds a config rooted at the given directory.
    pub fn with_root_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            root_dir: Some(dir.as_ref().to_owned()),
            ..Self::default()
        }
    }

    /// Gets the root directory, expanding shell variables and
    /// creating it if needed.
    pub fn root_dir(&self) -> Result<PathBuf> {
        let dir = match self.root_dir.as_ref() {
            Some(dir) => {
                let dir = dir.to_string_lossy();
                let expanded = shellexpand::full(&dir)
                    .map_err(|err| Error::ExpandRootDirError(err, dir.to_string()))?;
                PathBuf::from(expanded.to_string())
            }
            None => dirs::data_dir()
                .ok_or(Error::FindDataDirError)?
                .join(DEFAULT_ROOT_DIR_NAME),
        };

        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|err| Error::CreateRootDirError(err, dir.clone()))?;
        }

        Ok(dir)
    }

    pub fn autofilter_min_messages(&self) -> usize {
        self.autofilter_min_messages
            .unwrap_or(DEFAULT_AUTOFILTER_MIN_MESSAGES)
    }

    pub fn autofilter_threshold(&self) -> f64 {
        self.autofilter_threshold
            .unwrap_or(DEFAULT_AUTOFILTER_THRESHOLD)
    }

    pub fn lexicon_commit_delay(&self) -> Duration {
        self.lexicon_commit_delay
            .unwrap_or(DEFAULT_LEXICON_COMMIT_DELAY)
    }

    pub fn store_commit_delay(&self) -> Duration {
        self.store_commit_delay
            .unwrap_or(DEFAULT_STORE_COMMIT_DELAY)
    }

    pub fn prefetch_delay(&self) -> Duration {
        self.prefetch_delay.unwrap_or(DEFAULT_PREFETCH_DELAY)
    }

    pub fn load_block_size(&self) -> usize {
        self.load_block_size
            .unwrap_or(DEFAULT_LOAD_BLOCK_SIZE)
            .max(1)
    }
}
