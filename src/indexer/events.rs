//! Notification module.

use serde::Serialize;

use crate::{view::ViewId, MessageId};

/// Represents a change happening in the registry. Notifications are
/// queued, dispatched to the groups in order, then handed over to
/// the listeners of the registry.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Notification {
    MessageAdded { view: ViewId, id: MessageId },
    MessageRemoved { view: ViewId, id: MessageId },
    ViewCreated(ViewId),
    ViewRemoved(ViewId),
    /// The configuration of a view changed.
    ViewChanged(ViewId),
    UnreadChanged(ViewId),
    /// A search went through the whole store.
    SearchStabilized(ViewId),
}

impl Notification {
    /// Gets the view the notification is about.
    pub fn view(&self) -> ViewId {
        match self {
            Self::MessageAdded { view, .. } | Self::MessageRemoved { view, .. } => *view,
            Self::ViewCreated(view)
            | Self::ViewRemoved(view)
            | Self::ViewChanged(view)
            | Self::UnreadChanged(view)
            | Self::SearchStabilized(view) => *view,
        }
    }
}
