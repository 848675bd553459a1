use std::result;
use thiserror::Error;

use crate::{group, lexicon, message, store, view, view::ViewId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find view {0}")]
    FindViewError(ViewId),
    #[error("cannot parse regular expression {1:?}")]
    InvalidRegexError(#[source] regex::Error, String),
    #[error("cannot change members of group view {0}: it is computed from other views")]
    GroupViewError(ViewId),
    #[error("cannot create a view of kind {0:?} this way")]
    ViewKindError(view::ViewKind),

    #[error(transparent)]
    ViewError(#[from] view::Error),
    #[error(transparent)]
    GroupError(#[from] group::Error),
    #[error(transparent)]
    StoreError(#[from] store::Error),
    #[error(transparent)]
    MessageError(#[from] message::Error),
    #[error(transparent)]
    LexiconError(#[from] lexicon::Error),
}

pub type Result<T> = result::Result<T, Error>;
