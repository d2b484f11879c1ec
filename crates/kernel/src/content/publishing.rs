//! Publishing strategy.
//!
//! Decides whether items may be published or unpublished, raises the
//! cancellable taps, and flips the in-memory state. It never touches storage:
//! the caller computes ancestor publishability and persists the outcome.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::models::content::{Content, PublishedState};
use crate::tap::{ContentEvent, EventPayload, Tap, TapDispatcher};

/// Outcome of a publish attempt for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Success,
    /// An ancestor is unpublished, or the item is in the recycle bin.
    FailedPathNotPublished,
    /// One or more property values failed validation.
    FailedInvalidProperties,
    /// A `Publishing` handler denied the operation.
    FailedCancelledByEvent,
    /// Excluded from a batch because the item has never been published.
    FailedHasNeverBeenPublished,
}

impl PublishStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishStatus::Success)
    }
}

/// Per-item result of a batch publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Position of the item in the batch slice.
    pub index: usize,
    pub content_id: i32,
    pub status: PublishStatus,
}

/// Stateless publish/unpublish decision engine.
#[derive(Clone)]
pub struct PublishingStrategy {
    dispatcher: Arc<TapDispatcher>,
}

/// Whether an item has a published version, as far as its state tells.
fn has_been_published(content: &Content) -> bool {
    content.published() || content.published_state() == PublishedState::Saved
}

impl PublishingStrategy {
    pub fn new(dispatcher: Arc<TapDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Eligibility checks and the `Publishing` tap, without mutating anything.
    fn check(&self, content: &Content, path_published: bool, user_id: i32) -> PublishStatus {
        if content.is_in_recycle_bin() || !path_published {
            info!(
                content_id = content.id(),
                name = %content.name(),
                "content cannot be published: its path is not published or it is in the recycle bin"
            );
            return PublishStatus::FailedPathNotPublished;
        }

        let invalid = content.invalid_properties();
        if !invalid.is_empty() {
            info!(
                content_id = content.id(),
                name = %content.name(),
                properties = ?invalid,
                "content cannot be published: invalid properties"
            );
            return PublishStatus::FailedInvalidProperties;
        }

        let event = ContentEvent::content(Tap::Publishing, user_id, content);
        if !self.dispatcher.allows(&event) {
            info!(
                content_id = content.id(),
                name = %content.name(),
                "content publishing cancelled by tap handler"
            );
            return PublishStatus::FailedCancelledByEvent;
        }

        PublishStatus::Success
    }

    /// Publish a single item.
    ///
    /// `path_published` tells whether every ancestor below the root has a
    /// published version. On failure the item is left untouched.
    pub fn publish(&self, content: &mut Content, path_published: bool, user_id: i32) -> PublishStatus {
        let status = self.check(content, path_published, user_id);
        if status.is_success() {
            content.change_published_state(PublishedState::Published);
            info!(content_id = content.id(), name = %content.name(), "content published");
        }
        status
    }

    /// Publish an item together with its descendants.
    ///
    /// Items are processed top-down. An item whose parent in the batch was
    /// skipped or failed is skipped and left out of the result, along with
    /// its own subtree. Items that are already published are not reported but
    /// their children are still processed. Unless `include_unpublished` is
    /// set, an item with no published version is excluded unless its parent
    /// was published by this batch.
    ///
    /// `path_published` applies to items whose parent is not in the batch.
    pub fn publish_with_children(
        &self,
        items: &mut [Content],
        path_published: bool,
        user_id: i32,
        include_unpublished: bool,
    ) -> Vec<PublishOutcome> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by_key(|&i| items[i].level());

        let positions: HashMap<i32, usize> = items
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i))
            .collect();

        let mut skipped: HashSet<i32> = HashSet::new();
        let mut published_now: HashSet<i32> = HashSet::new();
        let mut outcomes = Vec::new();

        for index in order {
            let (id, parent_id) = (items[index].id(), items[index].parent_id());
            let parent_in_batch = positions.get(&parent_id).copied();

            if skipped.contains(&parent_id) {
                skipped.insert(id);
                continue;
            }
            if parent_in_batch.is_some_and(|parent| !items[parent].published()) {
                skipped.insert(id);
                continue;
            }

            if items[index].published() {
                continue;
            }

            if !include_unpublished
                && !has_been_published(&items[index])
                && !published_now.contains(&parent_id)
            {
                debug!(content_id = id, "skipping never published content");
                skipped.insert(id);
                continue;
            }

            let path_ok = parent_in_batch.is_some() || path_published;
            let status = self.check(&items[index], path_ok, user_id);
            if status.is_success() {
                items[index].change_published_state(PublishedState::Published);
                published_now.insert(id);
            } else {
                skipped.insert(id);
            }
            outcomes.push(PublishOutcome {
                index,
                content_id: id,
                status,
            });
        }

        info!(
            published = published_now.len(),
            attempted = outcomes.len(),
            "content published with children"
        );
        outcomes
    }

    /// Unpublish a single item. Returns `false` if a handler denied it.
    pub fn unpublish(&self, content: &mut Content, user_id: i32) -> bool {
        let event = ContentEvent::content(Tap::UnPublishing, user_id, content);
        if !self.dispatcher.allows(&event) {
            info!(
                content_id = content.id(),
                name = %content.name(),
                "content unpublishing cancelled by tap handler"
            );
            return false;
        }

        content.change_published_state(PublishedState::Unpublished);
        info!(content_id = content.id(), name = %content.name(), "content unpublished");
        true
    }

    /// Unpublish several items; returns one flag per item.
    pub fn unpublish_many(&self, items: &mut [Content], user_id: i32) -> Vec<bool> {
        items
            .iter_mut()
            .map(|content| self.unpublish(content, user_id))
            .collect()
    }

    /// Raise `Published` for items whose publish has been persisted.
    pub fn publishing_finalized(&self, items: &[&Content], user_id: i32, is_all_republished: bool) {
        let event = ContentEvent::new(
            Tap::Published,
            user_id,
            EventPayload::Published {
                items: items.to_vec(),
                is_all_republished,
            },
        );
        self.dispatcher.dispatch(&event);
    }

    /// Raise `UnPublished` for items whose unpublish has been persisted.
    pub fn unpublishing_finalized(&self, items: &[&Content], user_id: i32) {
        let event = ContentEvent::batch(Tap::UnPublished, user_id, items.to_vec());
        self.dispatcher.dispatch(&event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::content::ROOT_ID;
    use crate::models::content_type::{ContentType, DataType, PropertyType};
    use crate::tap::TapVerdict;

    fn textpage() -> Arc<ContentType> {
        Arc::new(ContentType::new(1045, "textpage", "Textpage").with_group(
            "Content",
            vec![PropertyType::new("title", "Title", DataType::Text).mandatory()],
        ))
    }

    fn node(id: i32, name: &str, parent: Option<&Content>) -> Content {
        let parent_id = parent.map_or(ROOT_ID, Content::id);
        let mut content = Content::new(name, parent_id, textpage());
        content.id = id;
        content.place_under(parent.map_or("-1", Content::path));
        content.set_value("title", name).unwrap();
        content.reset_dirty();
        content
    }

    /// Home, Text Page 1 and 2 under Home, Text Page 3 under Text Page 2.
    fn tree() -> Vec<Content> {
        let home = node(1046, "Home", None);
        let page1 = node(1047, "Text Page 1", Some(&home));
        let page2 = node(1048, "Text Page 2", Some(&home));
        let page3 = node(1049, "Text Page 3", Some(&page2));
        vec![page3, page1, page2, home]
    }

    fn strategy() -> (PublishingStrategy, Arc<TapDispatcher>) {
        let dispatcher = Arc::new(TapDispatcher::new());
        (PublishingStrategy::new(dispatcher.clone()), dispatcher)
    }

    #[test]
    fn publish_flips_state() {
        let (strategy, _) = strategy();
        let mut home = node(1046, "Home", None);
        assert_eq!(strategy.publish(&mut home, true, 0), PublishStatus::Success);
        assert!(home.published());
        assert_eq!(home.published_state(), PublishedState::Published);
    }

    #[test]
    fn publish_fails_on_unpublished_path() {
        let (strategy, _) = strategy();
        let mut child = node(1047, "Child", Some(&node(1046, "Home", None)));
        assert_eq!(
            strategy.publish(&mut child, false, 0),
            PublishStatus::FailedPathNotPublished
        );
        assert!(!child.published());
        assert!(!child.is_dirty());
    }

    #[test]
    fn publish_fails_in_recycle_bin() {
        let (strategy, _) = strategy();
        let mut binned = node(1046, "Home", None);
        binned.change_trashed_state(true, ROOT_ID);
        assert_eq!(
            strategy.publish(&mut binned, true, 0),
            PublishStatus::FailedPathNotPublished
        );
    }

    #[test]
    fn publish_fails_on_invalid_properties() {
        let (strategy, _) = strategy();
        let mut home = node(1046, "Home", None);
        home.set_value("title", "").unwrap();
        assert_eq!(
            strategy.publish(&mut home, true, 0),
            PublishStatus::FailedInvalidProperties
        );
        assert!(!home.published());
    }

    #[test]
    fn cancelled_publish_leaves_item_untouched() {
        let (strategy, dispatcher) = strategy();
        dispatcher.on(Tap::Publishing, "veto", 0, |_| TapVerdict::Deny);

        let mut home = node(1046, "Home", None);
        assert_eq!(
            strategy.publish(&mut home, true, 0),
            PublishStatus::FailedCancelledByEvent
        );
        assert!(!home.published());
    }

    #[test]
    fn batch_ignores_cancelled_items_and_their_children() {
        let (strategy, dispatcher) = strategy();
        dispatcher.on(Tap::Publishing, "no-page-2", 0, |event| {
            if event.items().iter().any(|c| c.name() == "Text Page 2") {
                TapVerdict::Deny
            } else {
                TapVerdict::Allow
            }
        });

        let mut items = tree();
        let outcomes = strategy.publish_with_children(&mut items, true, 0, true);

        let succeeded: Vec<i32> = outcomes
            .iter()
            .filter(|o| o.status.is_success())
            .map(|o| o.content_id)
            .collect();
        assert_eq!(succeeded.len(), items.len() - 2);
        assert!(succeeded.contains(&1046));
        assert!(succeeded.contains(&1047));
        assert!(!outcomes.iter().any(|o| o.content_id == 1049));
        assert!(!items[0].published());
    }

    #[test]
    fn batch_processes_ancestors_first() {
        let (strategy, _) = strategy();
        let mut items = tree();
        let outcomes = strategy.publish_with_children(&mut items, true, 0, true);
        let order: Vec<i32> = outcomes.iter().map(|o| o.content_id).collect();
        assert_eq!(order[0], 1046);
        assert_eq!(*order.last().unwrap(), 1049);
        assert!(items.iter().all(Content::published));
    }

    #[test]
    fn batch_ignores_never_published_items_by_default() {
        let (strategy, _) = strategy();
        let mut items = tree();
        for content in items.iter_mut().filter(|c| c.id() != 1049) {
            assert!(strategy.publish(content, true, 0).is_success());
        }

        let outcomes = strategy.publish_with_children(&mut items, true, 0, false);
        assert!(outcomes.is_empty());
        assert!(!items[0].published());
    }

    #[test]
    fn batch_includes_never_published_items_on_request() {
        let (strategy, _) = strategy();
        let mut items = tree();
        for content in items.iter_mut().filter(|c| c.id() != 1049) {
            assert!(strategy.publish(content, true, 0).is_success());
        }

        let outcomes = strategy.publish_with_children(&mut items, true, 0, true);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].status.is_success());
        assert!(items[outcomes[0].index].published());
    }

    #[test]
    fn invalid_child_skips_grandchild() {
        let (strategy, _) = strategy();
        let root = node(1046, "R", None);
        let mut a = node(1047, "A", Some(&root));
        a.set_value("title", "").unwrap();
        let b = node(1048, "B", Some(&a));
        let mut items = vec![root, a, b];

        let outcomes = strategy.publish_with_children(&mut items, true, 0, true);
        assert!(items[0].published());
        assert!(!items[1].published());
        assert!(!items[2].published());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].status, PublishStatus::FailedInvalidProperties);
    }

    #[test]
    fn unpublish_is_cancellable_and_finalizes() {
        let (strategy, dispatcher) = strategy();
        let finalized = Arc::new(AtomicUsize::new(0));
        let f = finalized.clone();
        dispatcher.on(Tap::UnPublished, "count", 0, move |event| {
            f.fetch_add(event.items().len(), Ordering::SeqCst);
            TapVerdict::Allow
        });

        let mut home = node(1046, "Home", None);
        strategy.publish(&mut home, true, 0);
        assert!(strategy.unpublish(&mut home, 0));
        assert_eq!(home.published_state(), PublishedState::Unpublished);
        strategy.unpublishing_finalized(&[&home], 0);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);

        dispatcher.on(Tap::UnPublishing, "veto", 0, |_| TapVerdict::Deny);
        strategy.publish(&mut home, true, 0);
        assert!(!strategy.unpublish(&mut home, 0));
        assert!(home.published());
    }
}
