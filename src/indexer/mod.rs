//! Indexer module.
//!
//! This module contains the registry of views, the routing of new
//! messages, the incremental searches and the auto-filters.

pub mod autofilter;
pub use autofilter::*;

mod error;
pub use error::*;

pub mod events;
pub use events::*;

pub mod indexer;
pub use self::indexer::*;

pub mod search;
pub use search::*;

pub mod tokenizer;
pub use tokenizer::*;

mod visibility;
