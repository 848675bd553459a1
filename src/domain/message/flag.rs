// mailbase-lib, a Rust library for local mail storage and indexing.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Represents the 64-bit message flag set.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
    pub struct MessageFlags: u64 {
        const IS_READ                 = 1 << 0;
        const IS_REPLIED              = 1 << 1;
        const IS_FORWARDED            = 1 << 2;
        const IS_RESENT               = 1 << 3;
        const IS_FLAGGED              = 1 << 4;
        const IS_OUTGOING             = 1 << 5;
        const IS_SENT                 = 1 << 6;
        const IS_IMPORTED             = 1 << 7;
        const IS_TIMEQUEUED           = 1 << 8;
        const IS_NEWS_MESSAGE         = 1 << 9;
        const IS_NEWSFEED_MESSAGE     = 1 << 10;
        const IS_SPAM                 = 1 << 11;
        const IS_CONFIRMED_NOT_SPAM   = 1 << 12;
        const IS_DELETED              = 1 << 13;
        const PERMANENTLY_REMOVED     = 1 << 14;
        const IS_WAITING_FOR_INDEXING = 1 << 15;
        const HAS_ATTACHMENT          = 1 << 16;
        const HAS_IMAGE_ATTACHMENT    = 1 << 17;
        const HAS_AUDIO_ATTACHMENT    = 1 << 18;
        const HAS_VIDEO_ATTACHMENT    = 1 << 19;
        const HAS_ZIP_ATTACHMENT      = 1 << 20;
        const HAS_PRIORITY_LOW        = 1 << 21;
        const HAS_PRIORITY_HIGH       = 1 << 22;
        const PARTIALLY_FETCHED       = 1 << 23;
        const LABEL_1                 = 1 << 32;
        const LABEL_2                 = 1 << 33;
        const LABEL_3                 = 1 << 34;
        const LABEL_4                 = 1 << 35;
        const LABEL_5                 = 1 << 36;
    }
}

impl MessageFlags {
    /// Flags compared by the status sort.
    pub const STATUS: Self = Self::IS_REPLIED
        .union(Self::IS_FORWARDED)
        .union(Self::IS_RESENT);

    /// Flags compared by the attachment sort.
    pub const ATTACHMENTS: Self = Self::HAS_ATTACHMENT
        .union(Self::HAS_IMAGE_ATTACHMENT)
        .union(Self::HAS_AUDIO_ATTACHMENT)
        .union(Self::HAS_VIDEO_ATTACHMENT)
        .union(Self::HAS_ZIP_ATTACHMENT);

    /// Splits the flags into the two 32-bit stored fields.
    pub fn split(self) -> (u32, u32) {
        let bits = self.bits();
        (bits as u32, (bits >> 32) as u32)
    }

    /// Joins the two 32-bit stored fields back. Unknown bits are
    /// kept so that newer stores survive a round trip.
    pub fn join(lo: u32, hi: u32) -> Self {
        Self::from_bits_retain((hi as u64) << 32 | lo as u64)
    }

    /// Checks if the message is an outgoing message neither sent nor
    /// queued for sending.
    pub fn is_draft(self) -> bool {
        self.contains(Self::IS_OUTGOING)
            && !self.intersects(Self::IS_SENT | Self::IS_TIMEQUEUED)
    }
}

#[cfg(test)]
mod tests {
    use super::MessageFlags;

    #[test]
    fn split_and_join() {
        let flags = MessageFlags::IS_READ | MessageFlags::LABEL_3;
        let (lo, hi) = flags.split();
        assert_eq!(1, lo);
        assert_eq!(1 << 2, hi);
        assert_eq!(flags, MessageFlags::join(lo, hi));
    }
}
