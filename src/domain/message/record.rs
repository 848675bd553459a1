//! Message record module.
//!
//! This module contains the persistent record kept by the store for
//! every message, together with the parsed header values handed over
//! by protocol backends.

use serde::Serialize;

use super::{MessageFlags, MessageId};

/// Represents the account identifier.
pub type AccountId = u16;

/// Represents the location of the raw message inside the body
/// storage. Both values are owned by the body storage collaborator.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct BodyHandle {
    /// Represents the storage type, 0 when no body is stored.
    pub kind: u32,
    /// Represents the storage specific data (offset, file id…).
    pub data: u64,
}

impl BodyHandle {
    pub const NONE: Self = Self { kind: 0, data: 0 };

    pub fn is_none(&self) -> bool {
        self.kind == 0
    }
}

/// Represents the already parsed header values of a message which
/// are not needed for sorting but are used for routing and search.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Headers {
    /// Represents the raw References header.
    pub references: String,
    /// Represents the raw In-Reply-To header.
    pub in_reply_to: String,
    pub cc: String,
    pub reply_to: String,
    pub newsgroups: String,
    /// Represents the List-Id header.
    pub list_id: String,
}

/// Represents the stored message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MessageRecord {
    /// Represents the identifier, 0 until the store assigns one.
    pub id: MessageId,
    pub account_id: AccountId,
    /// Represents the thread parent, 0 if none.
    pub parent_id: MessageId,
    pub flags: MessageFlags,
    pub size: u32,
    /// Represents the received time as a unix timestamp.
    pub recv_time: i64,
    /// Represents the Date header as a unix timestamp.
    pub sent_time: i64,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Represents the Message-ID header.
    pub message_id: String,
    pub internet_location: String,
    pub body: BodyHandle,
    pub headers: Headers,
}

impl MessageRecord {
    pub fn is_flag_set(&self, flag: MessageFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: MessageFlags, value: bool) {
        self.flags.set(flag, value)
    }

    /// Builds the 31-bit hash of the Message-ID header used by the
    /// secondary index and the duplicate detection.
    pub fn message_id_hash(&self) -> Option<u32> {
        message_id_hash(&self.message_id)
    }

    /// Builds the text the classifiers and the lexicon work on.
    pub fn header_text(&self) -> String {
        [
            self.from.as_str(),
            self.subject.as_str(),
            self.to.as_str(),
            self.headers.cc.as_str(),
            self.headers.newsgroups.as_str(),
            self.headers.reply_to.as_str(),
            self.headers.list_id.as_str(),
        ]
        .join(" ")
    }
}

/// Hashes a Message-ID header value, `None` when it is empty. Angle
/// brackets are not significant.
pub fn message_id_hash(message_id: &str) -> Option<u32> {
    let message_id = message_id
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>');
    if message_id.is_empty() {
        return None;
    }

    let digest = md5::compute(message_id.as_bytes());
    let bytes = [digest.0[0], digest.0[1], digest.0[2], digest.0[3]];
    Some(u32::from_be_bytes(bytes) & 0x7FFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_hash_ignores_brackets() {
        assert_eq!(message_id_hash("<a@b>"), message_id_hash(" a@b "));
        assert!(message_id_hash("a@b").unwrap() <= 0x7FFF_FFFF);
        assert_eq!(None, message_id_hash("  "));
    }
}
