//! View model module.
//!
//! The model holds the display settings of a view: which categories
//! of messages are shown, the age cutoff and the sort order.

use bitflags::bitflags;
use serde::Serialize;

use crate::SortBy;

bitflags! {
    /// Represents the categories of messages a view shows. A cleared
    /// bit hides the category.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
    pub struct ModelFlags: u32 {
        const SHOW_READ          = 1 << 0;
        const SHOW_SPAM          = 1 << 1;
        const SHOW_TRASH         = 1 << 2;
        const SHOW_NEWSGROUPS    = 1 << 3;
        const SHOW_NEWSFEEDS     = 1 << 4;
        const SHOW_MAILING_LISTS = 1 << 5;
        const SHOW_SENT          = 1 << 6;
        const SHOW_HIDDEN        = 1 << 7;
        const SHOW_DUPLICATES    = 1 << 8;
    }
}

impl Default for ModelFlags {
    fn default() -> Self {
        Self::SHOW_READ
            | Self::SHOW_NEWSGROUPS
            | Self::SHOW_NEWSFEEDS
            | Self::SHOW_MAILING_LISTS
            | Self::SHOW_SENT
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub enum ModelType {
    #[default]
    Flat,
    Threaded,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub enum ModelGrouping {
    #[default]
    None,
    Date,
    Sender,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Model {
    pub flags: ModelFlags,
    /// Represents the age cutoff in days, 0 for none.
    pub age: u32,
    #[serde(skip)]
    pub sort: SortBy,
    pub kind: ModelType,
    pub grouping: ModelGrouping,
    pub ascending: bool,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            flags: ModelFlags::default(),
            age: 0,
            sort: SortBy::SentDate,
            kind: ModelType::Flat,
            grouping: ModelGrouping::None,
            ascending: true,
        }
    }
}

impl Model {
    pub fn shows(&self, flags: ModelFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn is_threaded(&self) -> bool {
        self.kind == ModelType::Threaded
    }

    /// Gets the oldest sent date still shown at the given time, if
    /// the model has an age cutoff.
    pub fn age_cutoff(&self, now: i64) -> Option<i64> {
        (self.age > 0).then(|| now - self.age as i64 * 86_400)
    }
}

impl ModelType {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Flat => 0,
            Self::Threaded => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Threaded,
            _ => Self::Flat,
        }
    }
}

impl ModelGrouping {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Date => 1,
            Self::Sender => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Date,
            2 => Self::Sender,
            _ => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_hides_spam_and_trash() {
        let model = Model::default();
        assert!(model.shows(ModelFlags::SHOW_READ));
        assert!(!model.shows(ModelFlags::SHOW_SPAM));
        assert!(!model.shows(ModelFlags::SHOW_TRASH));
        assert!(!model.shows(ModelFlags::SHOW_DUPLICATES));
        assert_eq!(None, model.age_cutoff(1_000_000));
    }

    #[test]
    fn age_cutoff() {
        let model = Model {
            age: 2,
            ..Model::default()
        };
        assert_eq!(Some(1_000_000 - 172_800), model.age_cutoff(1_000_000));
    }
}
