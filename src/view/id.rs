//! View identifier module.
//!
//! View identifiers are partitioned into fixed numeric ranges, one
//! per view kind. The range an identifier falls in gives its kind and
//! its persistent name.

use serde::Serialize;

/// Represents the view identifier. 0 is the ephemeral, unsaved view.
pub type ViewId = u32;

pub const RECEIVED: ViewId = 1;
pub const UNREAD: ViewId = 2;
pub const OUTBOX: ViewId = 3;
pub const SENT: ViewId = 4;
pub const DRAFTS: ViewId = 5;
pub const TRASH: ViewId = 6;
pub const SPAM: ViewId = 7;
pub const RECEIVED_NEWS: ViewId = 8;
pub const RECEIVED_LIST: ViewId = 9;
pub const PIN_BOARD: ViewId = 10;
pub const DOC_ATTACHMENTS: ViewId = 11;
pub const IMAGE_ATTACHMENTS: ViewId = 12;
pub const AUDIO_ATTACHMENTS: ViewId = 13;
pub const VIDEO_ATTACHMENTS: ViewId = 14;
pub const ZIP_ATTACHMENTS: ViewId = 15;
pub const NEWSFEEDS: ViewId = 16;
/// Union of every view hiding its messages from the other views.
pub const HIDDEN: ViewId = 100;
/// Unread messages minus the hidden ones.
pub const UNREAD_UI: ViewId = 101;

pub const MY_MAIL: ViewId = 1000;
pub const MAILING_LISTS: ViewId = 1001;
pub const LABELS: ViewId = 1002;
pub const FOLDERS: ViewId = 1003;
pub const NEWSGROUPS: ViewId = 1004;
pub const CONTACTS: ViewId = 1005;
pub const SEARCHES: ViewId = 1006;
pub const THREADS: ViewId = 1007;

pub const SPECIAL_RANGE: (ViewId, ViewId) = (1, 1000);
pub const CATEGORY_RANGE: (ViewId, ViewId) = (1000, 2000);
pub const ACCOUNT_RANGE: (ViewId, ViewId) = (2000, 12_000);
pub const CONTACT_RANGE: (ViewId, ViewId) = (100_000, 200_000);
pub const SEARCH_RANGE: (ViewId, ViewId) = (200_000, 300_000);
pub const FOLDER_RANGE: (ViewId, ViewId) = (300_000, 400_000);
pub const THREAD_RANGE: (ViewId, ViewId) = (400_000, 500_000);
pub const NEWSGROUP_RANGE: (ViewId, ViewId) = (500_000, 600_000);
pub const IMAP_RANGE: (ViewId, ViewId) = (600_000, 700_000);
pub const NEWSFEED_RANGE: (ViewId, ViewId) = (700_000, 800_000);
pub const ARCHIVE_RANGE: (ViewId, ViewId) = (800_000, 900_000);
pub const POP_RANGE: (ViewId, ViewId) = (900_000, 1_000_000);
pub const UNION_RANGE: (ViewId, ViewId) = (1_000_000, 1_100_000);
pub const INTERSECTION_RANGE: (ViewId, ViewId) = (1_100_000, 1_200_000);
pub const COMPLEMENT_RANGE: (ViewId, ViewId) = (1_200_000, 1_300_000);

/// Standard views the visibility rules check messages against.
pub const STANDARD_VIEWS: [ViewId; 16] = [
    RECEIVED,
    UNREAD,
    OUTBOX,
    SENT,
    DRAFTS,
    TRASH,
    SPAM,
    RECEIVED_NEWS,
    RECEIVED_LIST,
    PIN_BOARD,
    DOC_ATTACHMENTS,
    IMAGE_ATTACHMENTS,
    AUDIO_ATTACHMENTS,
    VIDEO_ATTACHMENTS,
    ZIP_ATTACHMENTS,
    NEWSFEEDS,
];

/// Represents the kind of a view.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum ViewKind {
    Special,
    Category,
    Account,
    Contact,
    Search,
    Folder,
    Thread,
    Newsgroup,
    Imap,
    Newsfeed,
    Archive,
    Pop,
    UnionGroup,
    IntersectionGroup,
    ComplementGroup,
}

impl ViewKind {
    const ALL: [ViewKind; 15] = [
        ViewKind::Special,
        ViewKind::Category,
        ViewKind::Account,
        ViewKind::Contact,
        ViewKind::Search,
        ViewKind::Folder,
        ViewKind::Thread,
        ViewKind::Newsgroup,
        ViewKind::Imap,
        ViewKind::Newsfeed,
        ViewKind::Archive,
        ViewKind::Pop,
        ViewKind::UnionGroup,
        ViewKind::IntersectionGroup,
        ViewKind::ComplementGroup,
    ];

    /// Gets the identifier range `[start, end)` of the kind.
    pub fn range(self) -> (ViewId, ViewId) {
        match self {
            Self::Special => SPECIAL_RANGE,
            Self::Category => CATEGORY_RANGE,
            Self::Account => ACCOUNT_RANGE,
            Self::Contact => CONTACT_RANGE,
            Self::Search => SEARCH_RANGE,
            Self::Folder => FOLDER_RANGE,
            Self::Thread => THREAD_RANGE,
            Self::Newsgroup => NEWSGROUP_RANGE,
            Self::Imap => IMAP_RANGE,
            Self::Newsfeed => NEWSFEED_RANGE,
            Self::Archive => ARCHIVE_RANGE,
            Self::Pop => POP_RANGE,
            Self::UnionGroup => UNION_RANGE,
            Self::IntersectionGroup => INTERSECTION_RANGE,
            Self::ComplementGroup => COMPLEMENT_RANGE,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Special => "special",
            Self::Category => "category",
            Self::Account => "account",
            Self::Contact => "contact",
            Self::Search => "search",
            Self::Folder => "folder",
            Self::Thread => "thread",
            Self::Newsgroup => "newsgroup",
            Self::Imap => "imap",
            Self::Newsfeed => "newsfeed",
            Self::Archive => "archive",
            Self::Pop => "pop",
            Self::UnionGroup => "union",
            Self::IntersectionGroup => "intersection",
            Self::ComplementGroup => "complement",
        }
    }

    /// Finds the kind owning the given identifier.
    pub fn of(id: ViewId) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let (start, end) = kind.range();
            (start..end).contains(&id)
        })
    }

    pub fn is_group(self) -> bool {
        matches!(
            self,
            Self::UnionGroup | Self::IntersectionGroup | Self::ComplementGroup
        )
    }

    pub fn to_i64(self) -> i64 {
        Self::ALL.iter().position(|kind| *kind == self).unwrap_or(0) as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }
}

/// Gets the persistent name of a view. The name only depends on the
/// identifier, so that it stays stable across restarts.
pub fn get_unique_name(id: ViewId) -> Option<String> {
    let kind = ViewKind::of(id)?;
    Some(format!("{}_{:07}", kind.prefix(), id))
}
