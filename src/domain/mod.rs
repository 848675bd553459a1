pub mod message;
pub use message::{
    message_id_hash, AccountId, BodyHandle, DuplicateTable, Headers, MessageFlags, MessageId,
    MessageRecord, OrderedIdSet,
};
