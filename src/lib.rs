pub mod config;
pub use config::EngineConfig;

pub mod domain;
pub use domain::*;

pub mod store;
pub use store::{SortBy, Store};

pub mod view;

pub mod group;

pub mod indexer;

pub mod lexicon;

pub mod scheduler;

pub mod context;
pub use context::Context;
