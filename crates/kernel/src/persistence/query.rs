//! Content query criteria.
//!
//! A query is a conjunction of optional filters. Repositories translate it
//! to SQL or evaluate it in memory with [`ContentQuery::matches`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::content::{Content, RECYCLE_BIN_ID};

/// Filter criteria for content lookups.
///
/// Results are always ordered by level, then sort order, then id.
#[derive(Debug, Clone, Default)]
pub struct ContentQuery {
    pub id: Option<i32>,
    pub key: Option<Uuid>,
    pub parent_id: Option<i32>,
    pub level: Option<i32>,
    pub content_type_id: Option<i32>,
    /// Items whose path starts with this path followed by a comma.
    pub descendants_of: Option<String>,
    /// Items whose path includes the recycle bin.
    pub in_recycle_bin: Option<bool>,
    pub name_contains: Option<String>,
    pub published: Option<bool>,
    pub trashed: Option<bool>,
    /// Items with a release date at or before this instant.
    pub release_before: Option<DateTime<Utc>>,
    /// Items with an expire date at or before this instant.
    pub expire_before: Option<DateTime<Utc>>,
    pub exclude_id: Option<i32>,
    /// Items that have a published version (current or older).
    pub has_published_version: Option<bool>,
}

impl ContentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn key(mut self, key: Uuid) -> Self {
        self.key = Some(key);
        self
    }

    pub fn parent_id(mut self, parent_id: i32) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn content_type_id(mut self, content_type_id: i32) -> Self {
        self.content_type_id = Some(content_type_id);
        self
    }

    pub fn descendants_of(mut self, path: impl Into<String>) -> Self {
        self.descendants_of = Some(path.into());
        self
    }

    pub fn in_recycle_bin(mut self, in_bin: bool) -> Self {
        self.in_recycle_bin = Some(in_bin);
        self
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn published(mut self, published: bool) -> Self {
        self.published = Some(published);
        self
    }

    pub fn trashed(mut self, trashed: bool) -> Self {
        self.trashed = Some(trashed);
        self
    }

    pub fn release_before(mut self, at: DateTime<Utc>) -> Self {
        self.release_before = Some(at);
        self
    }

    pub fn expire_before(mut self, at: DateTime<Utc>) -> Self {
        self.expire_before = Some(at);
        self
    }

    pub fn exclude_id(mut self, id: i32) -> Self {
        self.exclude_id = Some(id);
        self
    }

    pub fn has_published_version(mut self, has: bool) -> Self {
        self.has_published_version = Some(has);
        self
    }

    /// Prefix a descendant path must start with.
    pub(crate) fn descendant_prefix(&self) -> Option<String> {
        self.descendants_of.as_ref().map(|p| format!("{p},"))
    }

    /// Evaluate the criteria against a current item.
    ///
    /// `has_published_version` needs version history, which an entity does
    /// not carry, so the caller supplies it.
    pub fn matches(&self, content: &Content, has_published_version: bool) -> bool {
        let bin_segment = RECYCLE_BIN_ID.to_string();

        self.id.is_none_or(|id| content.id() == id)
            && self.key.is_none_or(|key| content.key() == key)
            && self.parent_id.is_none_or(|p| content.parent_id() == p)
            && self.level.is_none_or(|l| content.level() == l)
            && self
                .content_type_id
                .is_none_or(|t| content.content_type().id == t)
            && self
                .descendant_prefix()
                .is_none_or(|prefix| content.path().starts_with(&prefix))
            && self.in_recycle_bin.is_none_or(|in_bin| {
                content.path().split(',').any(|s| s == bin_segment) == in_bin
            })
            && self
                .name_contains
                .as_ref()
                .is_none_or(|n| content.name().to_lowercase().contains(&n.to_lowercase()))
            && self.published.is_none_or(|p| content.published() == p)
            && self.trashed.is_none_or(|t| content.trashed() == t)
            && self
                .release_before
                .is_none_or(|at| content.release_date().is_some_and(|d| d <= at))
            && self
                .expire_before
                .is_none_or(|at| content.expire_date().is_some_and(|d| d <= at))
            && self.exclude_id.is_none_or(|id| content.id() != id)
            && self
                .has_published_version
                .is_none_or(|h| has_published_version == h)
    }
}

/// Order items by level, then sort order, then id.
pub(crate) fn sort_tree_order(items: &mut [Content]) {
    items.sort_by_key(|c| (c.level(), c.sort_order(), c.id()));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::content_type::ContentType;

    fn item(id: i32, path: &str, sort_order: i32) -> Content {
        let content_type = Arc::new(ContentType::new(1045, "textpage", "Textpage"));
        let mut content = Content::new(format!("Item {id}"), 0, content_type);
        content.id = id;
        content.set_path(path);
        content.set_level(path.split(',').count() as i32 - 1);
        content.set_sort_order(sort_order);
        content
    }

    #[test]
    fn descendants_match_on_whole_segments() {
        let query = ContentQuery::new().descendants_of("-1,1000");

        assert!(query.matches(&item(1001, "-1,1000,1001", 0), false));
        assert!(!query.matches(&item(1000, "-1,1000", 0), false));
        assert!(!query.matches(&item(10001, "-1,10001", 0), false));
    }

    #[test]
    fn recycle_bin_filter_looks_at_every_ancestor() {
        let binned = item(1001, "-1,-20,1000,1001", 0);
        let live = item(1002, "-1,1002", 0);

        assert!(ContentQuery::new().in_recycle_bin(true).matches(&binned, false));
        assert!(!ContentQuery::new().in_recycle_bin(true).matches(&live, false));
        assert!(ContentQuery::new().in_recycle_bin(false).matches(&live, false));
    }

    #[test]
    fn filters_combine() {
        let content = item(1001, "-1,1001", 0);
        let query = ContentQuery::new()
            .name_contains("ITEM")
            .has_published_version(true);

        assert!(query.matches(&content, true));
        assert!(!query.matches(&content, false));
        assert!(!query.clone().exclude_id(1001).matches(&content, true));
    }

    #[test]
    fn tree_order_is_level_then_sort_order() {
        let mut items = vec![
            item(1003, "-1,1000,1003", 0),
            item(1002, "-1,1002", 1),
            item(1000, "-1,1000", 0),
            item(1001, "-1,1001", 1),
        ];

        sort_tree_order(&mut items);

        let ids: Vec<i32> = items.iter().map(Content::id).collect();
        assert_eq!(ids, vec![1000, 1001, 1002, 1003]);
    }
}
