//! Lexicon module.
//!
//! This module contains the full-text word index and the facade
//! running its searches on a dedicated worker.

mod error;
pub use error::*;

pub mod lexicon;
pub use self::lexicon::*;

pub mod word_index;
pub use word_index::*;
