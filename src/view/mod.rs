//! View module.
//!
//! This module contains everything related to views: identifiers and
//! their ranges, the range table, the display model, the search rules
//! and the storage of the view logs.

mod error;
pub use error::*;

pub mod id;
pub use id::*;

pub mod model;
pub use model::*;

pub mod search;
pub use search::*;

pub mod storage;
pub use storage::*;

pub mod table;
pub use table::*;

pub mod view;
pub use self::view::*;
