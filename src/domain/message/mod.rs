//! Message module.
//!
//! This module contains everything related to stored messages that
//! does not depend on the storage itself.

use std::{collections::TryReserveError, result};
use thiserror::Error;

pub mod duplicates;
pub use duplicates::*;

pub mod flag;
pub use flag::*;

pub mod id_set;
pub use id_set::*;

pub mod record;
pub use record::*;

/// Represents the message identifier. 0 is never a valid identifier.
pub type MessageId = u32;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot allocate memory for {1} message ids")]
    AllocError(#[source] TryReserveError, usize),
}

pub type Result<T> = result::Result<T, Error>;
