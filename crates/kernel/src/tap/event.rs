//! Content lifecycle taps and their payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::content::Content;

/// A named lifecycle extension point.
///
/// "-ing" taps fire before the operation and may be vetoed; "-ed" taps fire
/// after the operation and are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tap {
    Creating,
    Created,
    Saving,
    Saved,
    Publishing,
    Published,
    UnPublishing,
    UnPublished,
    Deleting,
    Deleted,
    DeletingVersions,
    DeletedVersions,
    Trashing,
    Trashed,
    Moving,
    Moved,
    Copying,
    Copied,
    RollingBack,
    RolledBack,
    SendingToPublish,
    SentToPublish,
}

impl Tap {
    pub const ALL: [Tap; 22] = [
        Tap::Creating,
        Tap::Created,
        Tap::Saving,
        Tap::Saved,
        Tap::Publishing,
        Tap::Published,
        Tap::UnPublishing,
        Tap::UnPublished,
        Tap::Deleting,
        Tap::Deleted,
        Tap::DeletingVersions,
        Tap::DeletedVersions,
        Tap::Trashing,
        Tap::Trashed,
        Tap::Moving,
        Tap::Moved,
        Tap::Copying,
        Tap::Copied,
        Tap::RollingBack,
        Tap::RolledBack,
        Tap::SendingToPublish,
        Tap::SentToPublish,
    ];

    /// Stable tap name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Tap::Creating => "tap_content_creating",
            Tap::Created => "tap_content_created",
            Tap::Saving => "tap_content_saving",
            Tap::Saved => "tap_content_saved",
            Tap::Publishing => "tap_content_publishing",
            Tap::Published => "tap_content_published",
            Tap::UnPublishing => "tap_content_unpublishing",
            Tap::UnPublished => "tap_content_unpublished",
            Tap::Deleting => "tap_content_deleting",
            Tap::Deleted => "tap_content_deleted",
            Tap::DeletingVersions => "tap_content_deleting_versions",
            Tap::DeletedVersions => "tap_content_deleted_versions",
            Tap::Trashing => "tap_content_trashing",
            Tap::Trashed => "tap_content_trashed",
            Tap::Moving => "tap_content_moving",
            Tap::Moved => "tap_content_moved",
            Tap::Copying => "tap_content_copying",
            Tap::Copied => "tap_content_copied",
            Tap::RollingBack => "tap_content_rolling_back",
            Tap::RolledBack => "tap_content_rolled_back",
            Tap::SendingToPublish => "tap_content_sending_to_publish",
            Tap::SentToPublish => "tap_content_sent_to_publish",
        }
    }

    /// Whether a handler can veto the operation.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Tap::Creating
                | Tap::Saving
                | Tap::Publishing
                | Tap::UnPublishing
                | Tap::Deleting
                | Tap::DeletingVersions
                | Tap::Trashing
                | Tap::Moving
                | Tap::Copying
                | Tap::RollingBack
                | Tap::SendingToPublish
        )
    }
}

impl fmt::Display for Tap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A handler's answer to a cancellable tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapVerdict {
    #[default]
    Allow,
    Deny,
}

/// Data a tap carries.
#[derive(Debug, Clone)]
pub enum EventPayload<'a> {
    /// A single item.
    Content(&'a Content),
    /// A batch of items.
    Batch(Vec<&'a Content>),
    /// Items that were published, and whether this was a site-wide republish.
    Published {
        items: Vec<&'a Content>,
        is_all_republished: bool,
    },
    /// An item created from a content type alias.
    Create {
        content: &'a Content,
        parent_id: i32,
        alias: &'a str,
    },
    /// An item moving under a new parent.
    Move { content: &'a Content, parent_id: i32 },
    /// An item being copied under a parent.
    Copy {
        original: &'a Content,
        copy: &'a Content,
        parent_id: i32,
    },
    /// Version history being pruned: one version, or all before a date.
    Versions {
        content_id: i32,
        version: Option<Uuid>,
        before: Option<DateTime<Utc>>,
    },
}

/// A tap invocation.
#[derive(Debug, Clone)]
pub struct ContentEvent<'a> {
    pub tap: Tap,
    /// User performing the operation.
    pub user_id: i32,
    pub payload: EventPayload<'a>,
}

impl<'a> ContentEvent<'a> {
    pub fn new(tap: Tap, user_id: i32, payload: EventPayload<'a>) -> Self {
        Self {
            tap,
            user_id,
            payload,
        }
    }

    pub fn content(tap: Tap, user_id: i32, content: &'a Content) -> Self {
        Self::new(tap, user_id, EventPayload::Content(content))
    }

    pub fn batch(tap: Tap, user_id: i32, items: Vec<&'a Content>) -> Self {
        Self::new(tap, user_id, EventPayload::Batch(items))
    }

    /// Every item the event refers to.
    ///
    /// For copies this is the copy, not the original.
    pub fn items(&self) -> Vec<&'a Content> {
        match &self.payload {
            EventPayload::Content(content)
            | EventPayload::Create { content, .. }
            | EventPayload::Move { content, .. } => vec![*content],
            EventPayload::Batch(items) | EventPayload::Published { items, .. } => items.clone(),
            EventPayload::Copy { copy, .. } => vec![*copy],
            EventPayload::Versions { .. } => Vec::new(),
        }
    }

    /// Whether this is the `Published` tap of a site-wide republish.
    pub fn is_all_republished(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Published {
                is_all_republished: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pre_operation_taps_are_cancellable() {
        let cancellable: Vec<Tap> = Tap::ALL
            .into_iter()
            .filter(Tap::is_cancellable)
            .collect();
        assert_eq!(cancellable.len(), 11);
        assert!(Tap::Saving.is_cancellable());
        assert!(!Tap::Saved.is_cancellable());
        assert!(!Tap::Published.is_cancellable());
        assert!(Tap::DeletingVersions.is_cancellable());
    }

    #[test]
    fn tap_names_are_unique() {
        let mut names: Vec<&str> = Tap::ALL.iter().map(Tap::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Tap::ALL.len());
    }
}
