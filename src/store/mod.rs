//! Store module.
//!
//! This module contains everything related to the persistent message
//! store: the record table, the raw message boundary, the sort cache
//! and the thread helpers.

pub mod body;
pub use body::{BodyStore, FsBodyStore, MemoryBodyStore};

pub mod cache;
pub use cache::{SortBy, SortCache, StoreItem};

mod error;
pub use error::*;

pub mod storage;

pub mod store;
pub use self::store::*;

pub mod threads;
