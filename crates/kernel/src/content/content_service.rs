//! Content service with tap integration.
//!
//! Orchestrates the content lifecycle: create, save, publish, move, copy,
//! trash, delete, rollback and version pruning. Every mutating operation
//! fires a cancellable "-ing" tap first and an informational "-ed" tap
//! after, and writes an audit entry once it completes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::content::publishing::{PublishOutcome, PublishStatus, PublishingStrategy};
use crate::content::type_registry::ContentTypeLookup;
use crate::error::{ContentError, ContentResult};
use crate::file::MediaFileSystem;
use crate::models::content::{
    Content, ContentField, Property, PublishedState, RECYCLE_BIN_ID, RECYCLE_BIN_PATH, ROOT_ID,
    ROOT_PATH,
};
use crate::models::content_type::DataType;
use crate::models::relation::{RELATE_DOCUMENT_ON_COPY, Relation};
use crate::models::xml::{ContentXml, PreviewXml};
use crate::persistence::{ContentQuery, UnitOfWork, UnitOfWorkProvider};
use crate::services::audit::{AuditSink, AuditType};
use crate::tap::{ContentEvent, EventPayload, Tap, TapDispatcher};

/// Service for the content lifecycle.
#[derive(Clone)]
pub struct ContentService {
    inner: Arc<ContentServiceInner>,
}

struct ContentServiceInner {
    uow: Arc<dyn UnitOfWorkProvider>,
    content_types: Arc<dyn ContentTypeLookup>,
    dispatcher: Arc<TapDispatcher>,
    strategy: PublishingStrategy,
    audit: Arc<dyn AuditSink>,
    media: Option<Arc<dyn MediaFileSystem>>,
}

impl ContentService {
    /// Create a new content service.
    pub fn new(
        uow: Arc<dyn UnitOfWorkProvider>,
        content_types: Arc<dyn ContentTypeLookup>,
        dispatcher: Arc<TapDispatcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ContentServiceInner {
                uow,
                content_types,
                strategy: PublishingStrategy::new(dispatcher.clone()),
                dispatcher,
                audit,
                media: None,
            }),
        }
    }

    /// Use a media file system for upload-backed properties.
    pub fn with_media(self, media: Arc<dyn MediaFileSystem>) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(ContentServiceInner {
                uow: inner.uow.clone(),
                content_types: inner.content_types.clone(),
                dispatcher: inner.dispatcher.clone(),
                strategy: inner.strategy.clone(),
                audit: inner.audit.clone(),
                media: Some(media),
            }),
        }
    }

    /// Tap dispatcher, for registering handlers.
    pub fn dispatcher(&self) -> &Arc<TapDispatcher> {
        &self.inner.dispatcher
    }

    pub fn strategy(&self) -> &PublishingStrategy {
        &self.inner.strategy
    }

    async fn begin(&self) -> ContentResult<Box<dyn UnitOfWork>> {
        Ok(self.inner.uow.begin().await?)
    }

    fn allows(&self, event: &ContentEvent<'_>) -> bool {
        let allowed = self.inner.dispatcher.allows(event);
        if !allowed {
            info!(tap = %event.tap, user_id = event.user_id, "operation cancelled by tap handler");
        }
        allowed
    }

    fn raise(&self, event: &ContentEvent<'_>) {
        self.inner.dispatcher.dispatch(event);
    }

    async fn audit(&self, audit_type: AuditType, message: &str, user_id: i32, entity_id: i32) {
        self.inner
            .audit
            .add(audit_type, message, user_id, entity_id)
            .await;
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    async fn query(&self, query: &ContentQuery) -> ContentResult<Vec<Content>> {
        let mut uow = self.begin().await?;
        Ok(uow.get_by_query(query).await?)
    }

    /// Load an item by id.
    pub async fn get_by_id(&self, id: i32) -> ContentResult<Option<Content>> {
        let mut uow = self.begin().await?;
        Ok(uow.get(id).await?)
    }

    /// Load an item by its unique key.
    pub async fn get_by_key(&self, key: Uuid) -> ContentResult<Option<Content>> {
        Ok(self
            .query(&ContentQuery::new().key(key))
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_content_of_content_type(
        &self,
        content_type_id: i32,
    ) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().content_type_id(content_type_id))
            .await
    }

    /// Items at a tree level, outside the recycle bin.
    pub async fn get_by_level(&self, level: i32) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().level(level).in_recycle_bin(false))
            .await
    }

    /// Load one specific version of an item.
    pub async fn get_by_version(&self, version: Uuid) -> ContentResult<Option<Content>> {
        let mut uow = self.begin().await?;
        Ok(uow.get_by_version(version).await?)
    }

    /// Every version of an item, newest first.
    pub async fn get_versions(&self, id: i32) -> ContentResult<Vec<Content>> {
        let mut uow = self.begin().await?;
        Ok(uow.get_all_versions(id).await?)
    }

    pub async fn get_children(&self, id: i32) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().parent_id(id)).await
    }

    /// Children whose name contains `name`, case-insensitively.
    pub async fn get_children_by_name(
        &self,
        parent_id: i32,
        name: &str,
    ) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().parent_id(parent_id).name_contains(name))
            .await
    }

    /// Every item below `content`, ancestors before descendants.
    pub async fn get_descendants(&self, content: &Content) -> ContentResult<Vec<Content>> {
        if !content.has_identity() {
            return Ok(Vec::new());
        }
        self.query(&ContentQuery::new().descendants_of(content.path()))
            .await
    }

    /// Descendants that are published and not trashed.
    pub async fn get_published_descendants(
        &self,
        content: &Content,
    ) -> ContentResult<Vec<Content>> {
        if !content.has_identity() {
            return Ok(Vec::new());
        }
        self.query(
            &ContentQuery::new()
                .descendants_of(content.path())
                .published(true)
                .trashed(false),
        )
        .await
    }

    /// The version of an item currently flagged as published.
    pub async fn get_published_version(&self, id: i32) -> ContentResult<Option<Content>> {
        let mut uow = self.begin().await?;
        Ok(uow.get_published_version(id).await?)
    }

    pub async fn get_root_content(&self) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().parent_id(ROOT_ID)).await
    }

    /// Published items whose expire date is at or before `now`.
    pub async fn get_content_for_expiration(
        &self,
        now: DateTime<Utc>,
    ) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().published(true).expire_before(now))
            .await
    }

    /// Unpublished items whose release date is at or before `now`.
    pub async fn get_content_for_release(
        &self,
        now: DateTime<Utc>,
    ) -> ContentResult<Vec<Content>> {
        self.query(
            &ContentQuery::new()
                .published(false)
                .trashed(false)
                .release_before(now),
        )
        .await
    }

    /// Everything in the recycle bin, at any depth.
    pub async fn get_content_in_recycle_bin(&self) -> ContentResult<Vec<Content>> {
        self.query(&ContentQuery::new().in_recycle_bin(true)).await
    }

    pub async fn has_children(&self, id: i32) -> ContentResult<bool> {
        let mut uow = self.begin().await?;
        Ok(uow.count(&ContentQuery::new().parent_id(id)).await? > 0)
    }

    pub async fn has_published_version(&self, id: i32) -> ContentResult<bool> {
        let mut uow = self.begin().await?;
        Ok(uow.has_published_version(id).await?)
    }

    /// Whether every ancestor of `content` below the root has a published
    /// version.
    ///
    /// An unsaved item has no path yet, so its parent is checked instead,
    /// including the parent itself.
    pub async fn is_publishable(&self, content: &Content) -> ContentResult<bool> {
        if content.has_identity() {
            return self.ancestors_published(content, false).await;
        }
        match content.parent_id() {
            ROOT_ID => Ok(true),
            RECYCLE_BIN_ID => Ok(false),
            parent_id => {
                let parent = self
                    .get_by_id(parent_id)
                    .await?
                    .ok_or(ContentError::NotFound(parent_id))?;
                self.ancestors_published(&parent, true).await
            }
        }
    }

    async fn ancestors_published(
        &self,
        content: &Content,
        check_current: bool,
    ) -> ContentResult<bool> {
        let mut uow = self.begin().await?;
        for id in content.path_ids()? {
            if id == RECYCLE_BIN_ID {
                return Ok(false);
            }
            if id == ROOT_ID || (!check_current && id == content.id()) {
                continue;
            }
            if !uow.has_published_version(id).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether `content` may be published as far as its location goes.
    async fn path_published(&self, content: &Content) -> ContentResult<bool> {
        match content.parent_id() {
            ROOT_ID => Ok(true),
            RECYCLE_BIN_ID => Ok(false),
            _ => self.is_publishable(content).await,
        }
    }

    async fn parent_path(&self, parent_id: i32) -> ContentResult<String> {
        match parent_id {
            ROOT_ID => Ok(ROOT_PATH.to_string()),
            RECYCLE_BIN_ID => Ok(RECYCLE_BIN_PATH.to_string()),
            id => self
                .get_by_id(id)
                .await?
                .map(|parent| parent.path().to_string())
                .ok_or(ContentError::NotFound(id)),
        }
    }

    // -------------------------------------------------------------------------
    // Create and save
    // -------------------------------------------------------------------------

    /// Create a new, unsaved item of the content type `alias` under `parent_id`.
    ///
    /// If a `Creating` handler denies it, the unsaved entity is returned and
    /// `Created` is not raised.
    pub async fn create_content(
        &self,
        name: &str,
        parent_id: i32,
        alias: &str,
        user_id: i32,
    ) -> ContentResult<Content> {
        let content_type = self
            .inner
            .content_types
            .get_by_alias(alias)
            .ok_or_else(|| ContentError::UnknownContentType(alias.to_string()))?;

        let mut content = Content::new(name, parent_id, content_type);
        content.set_creator_id(user_id);
        content.set_writer_id(user_id);

        let creating = ContentEvent::new(
            Tap::Creating,
            user_id,
            EventPayload::Create {
                content: &content,
                parent_id,
                alias,
            },
        );
        if !self.allows(&creating) {
            return Ok(content);
        }

        self.raise(&ContentEvent::new(
            Tap::Created,
            user_id,
            EventPayload::Create {
                content: &content,
                parent_id,
                alias,
            },
        ));

        self.audit(AuditType::New, "", user_id, content.id()).await;
        debug!(name = %content.name(), parent_id, alias = %alias, "content created");
        Ok(content)
    }

    /// Write the item as a new version with its preview snapshot.
    async fn persist(&self, content: &mut Content) -> ContentResult<()> {
        let mut uow = self.begin().await?;
        uow.add_or_update(content).await?;
        uow.upsert_preview_xml(&PreviewXml::from_content(content)?)
            .await?;
        uow.commit().await?;
        content.reset_dirty();
        Ok(())
    }

    /// Save an item. A published item is demoted to `Saved`: the new version
    /// waits for an explicit publish.
    ///
    /// Returns `false` if a `Saving` handler denied it.
    pub async fn save(&self, content: &mut Content, user_id: i32) -> ContentResult<bool> {
        self.save_with(content, user_id, true, true).await
    }

    /// Save without raising taps.
    pub async fn save_silently(&self, content: &mut Content, user_id: i32) -> ContentResult<bool> {
        self.save_with(content, user_id, false, true).await
    }

    async fn save_with(
        &self,
        content: &mut Content,
        user_id: i32,
        raise_events: bool,
        change_state: bool,
    ) -> ContentResult<bool> {
        if raise_events && !self.allows(&ContentEvent::content(Tap::Saving, user_id, content)) {
            return Ok(false);
        }

        content.set_writer_id(user_id);
        if change_state && content.published() {
            content.change_published_state(PublishedState::Saved);
        }
        self.persist(content).await?;

        if raise_events {
            self.raise(&ContentEvent::content(Tap::Saved, user_id, content));
        }

        self.audit(
            AuditType::Save,
            "Save Content performed by user",
            user_id,
            content.id(),
        )
        .await;
        info!(content_id = content.id(), name = %content.name(), "content saved");
        Ok(true)
    }

    /// Save several items.
    ///
    /// When the batch contains new items each one is committed on its own,
    /// and published items are demoted to `Saved`. Otherwise the batch is
    /// written in a single unit of work.
    pub async fn save_many(
        &self,
        items: &mut [Content],
        user_id: i32,
        raise_events: bool,
    ) -> ContentResult<bool> {
        if raise_events {
            let saving = ContentEvent::batch(Tap::Saving, user_id, items.iter().collect());
            if !self.allows(&saving) {
                return Ok(false);
            }
        }

        let contains_new = items.iter().any(|c| !c.has_identity());
        if contains_new {
            for content in items.iter_mut() {
                content.set_writer_id(user_id);
                if content.published() {
                    content.change_published_state(PublishedState::Saved);
                }
                self.persist(content).await?;
            }
        } else {
            let mut uow = self.begin().await?;
            for content in items.iter_mut() {
                content.set_writer_id(user_id);
                uow.add_or_update(content).await?;
                uow.upsert_preview_xml(&PreviewXml::from_content(content)?)
                    .await?;
            }
            uow.commit().await?;
            for content in items.iter_mut() {
                content.reset_dirty();
            }
        }

        if raise_events {
            self.raise(&ContentEvent::batch(Tap::Saved, user_id, items.iter().collect()));
        }

        self.audit(
            AuditType::Save,
            "Bulk Save content performed by user",
            user_id.max(0),
            ROOT_ID,
        )
        .await;
        info!(count = items.len(), "content batch saved");
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Publish and unpublish
    // -------------------------------------------------------------------------

    /// Save and publish an item, raising taps.
    pub async fn publish(&self, content: &mut Content, user_id: i32) -> ContentResult<PublishStatus> {
        self.save_and_publish(content, user_id, true).await
    }

    /// Save an item and try to publish it.
    ///
    /// The item is persisted whatever the publish outcome. On success its
    /// published snapshot is written. If this is the item's first publish,
    /// descendants that are already published get their snapshots rebuilt.
    pub async fn save_and_publish(
        &self,
        content: &mut Content,
        user_id: i32,
        raise_events: bool,
    ) -> ContentResult<PublishStatus> {
        Ok(self
            .save_and_publish_with(content, user_id, raise_events)
            .await?
            .unwrap_or(PublishStatus::FailedCancelledByEvent))
    }

    /// `None` when a `Saving` handler denied the save, so nothing was written.
    async fn save_and_publish_with(
        &self,
        content: &mut Content,
        user_id: i32,
        raise_events: bool,
    ) -> ContentResult<Option<PublishStatus>> {
        if raise_events && !self.allows(&ContentEvent::content(Tap::Saving, user_id, content)) {
            return Ok(None);
        }

        let previously_published =
            content.has_identity() && self.has_published_version(content.id()).await?;
        let path_published = self.path_published(content).await?;

        let status = self
            .inner
            .strategy
            .publish(content, path_published, user_id);
        let published = status.is_success();
        if !published && content.published() {
            // The published version stays as it was; this one is a draft.
            content.change_published_state(PublishedState::Saved);
        }

        content.set_writer_id(user_id);
        let mut uow = self.begin().await?;
        uow.add_or_update(content).await?;
        uow.upsert_preview_xml(&PreviewXml::from_content(content)?)
            .await?;
        if published {
            uow.upsert_content_xml(&ContentXml::from_content(content)?)
                .await?;
        }
        uow.commit().await?;
        content.reset_dirty();

        if raise_events {
            self.raise(&ContentEvent::content(Tap::Saved, user_id, content));
        }

        if published {
            self.inner
                .strategy
                .publishing_finalized(&[&*content], user_id, false);

            if !previously_published && self.has_children(content.id()).await? {
                self.refresh_published_descendants(content, user_id).await?;
            }
        }

        self.audit(
            AuditType::Publish,
            "Save and Publish performed by user",
            user_id,
            content.id(),
        )
        .await;
        Ok(Some(status))
    }

    /// Rebuild snapshots of descendants that were published while an
    /// ancestor was not.
    async fn refresh_published_descendants(
        &self,
        content: &Content,
        user_id: i32,
    ) -> ContentResult<()> {
        let descendants = self.get_published_descendants(content).await?;
        if descendants.is_empty() {
            return Ok(());
        }

        let mut uow = self.begin().await?;
        for descendant in &descendants {
            uow.upsert_content_xml(&ContentXml::from_content(descendant)?)
                .await?;
        }
        uow.commit().await?;

        let refs: Vec<&Content> = descendants.iter().collect();
        self.inner
            .strategy
            .publishing_finalized(&refs, user_id, false);
        debug!(
            content_id = content.id(),
            count = descendants.len(),
            "published descendants refreshed"
        );
        Ok(())
    }

    /// Persist batch items whose published flag changed and write snapshots.
    ///
    /// With `rebuild_all`, every published item in the batch gets a fresh
    /// snapshot, not only the changed ones. Returns the indexes of the
    /// persisted items.
    async fn persist_published(
        &self,
        items: &mut [Content],
        user_id: i32,
        rebuild_all: bool,
    ) -> ContentResult<Vec<usize>> {
        let mut uow = self.begin().await?;
        let mut updated = Vec::new();
        for (index, item) in items.iter_mut().enumerate() {
            if item.is_field_dirty(ContentField::Published) {
                item.set_writer_id(user_id);
                uow.add_or_update(item).await?;
                updated.push(index);
            }
        }

        for (index, item) in items.iter().enumerate() {
            if item.published() && (rebuild_all || updated.contains(&index)) {
                uow.upsert_content_xml(&ContentXml::from_content(item)?)
                    .await?;
            }
        }
        uow.commit().await?;

        for &index in &updated {
            items[index].reset_dirty();
        }
        Ok(updated)
    }

    /// Publish an item and its descendants.
    ///
    /// Unless `include_unpublished` is set, descendants that were never
    /// published stay unpublished. Only items whose published flag changed
    /// are persisted.
    pub async fn publish_with_children(
        &self,
        content: &mut Content,
        user_id: i32,
        include_unpublished: bool,
    ) -> ContentResult<Vec<PublishOutcome>> {
        if !content.has_identity() {
            self.save_with(content, user_id, false, false).await?;
        }

        let path_published = self.path_published(content).await?;
        let mut items = vec![content.clone()];
        items.extend(self.get_descendants(content).await?);

        let outcomes = self.inner.strategy.publish_with_children(
            &mut items,
            path_published,
            user_id,
            include_unpublished,
        );

        let updated = self.persist_published(&mut items, user_id, false).await?;
        if !updated.is_empty() {
            let refs: Vec<&Content> = updated.iter().map(|&i| &items[i]).collect();
            self.inner
                .strategy
                .publishing_finalized(&refs, user_id, false);
        }

        self.audit(
            AuditType::Publish,
            "Publish with Children performed by user",
            user_id,
            content.id(),
        )
        .await;

        if let Some(first) = items.into_iter().next() {
            *content = first;
        }
        Ok(outcomes)
    }

    /// Publish every valid root item and its descendants, including items
    /// that were never published, and rebuild every published snapshot.
    pub async fn republish_all(&self, user_id: i32) -> ContentResult<Vec<PublishOutcome>> {
        let mut items = Vec::new();
        for root in self.get_root_content().await? {
            if root.is_valid() {
                let descendants = self.get_descendants(&root).await?;
                items.push(root);
                items.extend(descendants);
            }
        }

        let outcomes = self
            .inner
            .strategy
            .publish_with_children(&mut items, true, user_id, true);

        let updated = self.persist_published(&mut items, user_id, true).await?;
        let refs: Vec<&Content> = updated.iter().map(|&i| &items[i]).collect();
        self.inner
            .strategy
            .publishing_finalized(&refs, user_id, true);

        self.audit(
            AuditType::Publish,
            "RePublish All performed by user",
            user_id,
            ROOT_ID,
        )
        .await;
        info!(
            items = items.len(),
            updated = updated.len(),
            "all content republished"
        );
        Ok(outcomes)
    }

    /// Unpublish an item and drop its published snapshot.
    ///
    /// Returns `false` if an `UnPublishing` handler denied it.
    pub async fn unpublish(&self, content: &mut Content, user_id: i32) -> ContentResult<bool> {
        if !self.inner.strategy.unpublish(content, user_id) {
            return Ok(false);
        }

        content.set_writer_id(user_id);
        let mut uow = self.begin().await?;
        uow.add_or_update(content).await?;
        uow.delete_content_xml(content.id()).await?;
        uow.commit().await?;
        content.reset_dirty();

        self.inner
            .strategy
            .unpublishing_finalized(&[&*content], user_id);

        self.audit(
            AuditType::UnPublish,
            "UnPublish performed by user",
            user_id,
            content.id(),
        )
        .await;
        Ok(true)
    }

    /// Unpublish each item that has a published version.
    async fn unpublish_all(&self, items: &mut [Content], user_id: i32) -> ContentResult<()> {
        for item in items.iter_mut() {
            if self.has_published_version(item.id()).await? {
                self.unpublish(item, user_id).await?;
            }
        }
        Ok(())
    }

    /// Ask handlers to send an item to publication.
    pub async fn send_to_publication(&self, content: &Content, user_id: i32) -> ContentResult<bool> {
        if !self.allows(&ContentEvent::content(
            Tap::SendingToPublish,
            user_id,
            content,
        )) {
            return Ok(false);
        }

        self.raise(&ContentEvent::content(Tap::SentToPublish, user_id, content));

        self.audit(
            AuditType::SendToPublish,
            "Send to Publish performed by user",
            user_id,
            content.id(),
        )
        .await;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Move, trash and delete
    // -------------------------------------------------------------------------

    /// Move an item under a new parent.
    ///
    /// Moving to the recycle bin trashes the item. Moving out of the bin
    /// restores it. Descendants follow with recomputed paths. Published items
    /// are republished at the new location when possible; otherwise the new
    /// version is saved as a draft and the published snapshot is rebuilt.
    pub async fn move_content(
        &self,
        content: &mut Content,
        parent_id: i32,
        user_id: i32,
    ) -> ContentResult<bool> {
        if parent_id == RECYCLE_BIN_ID {
            return self.move_to_recycle_bin(content, user_id).await;
        }

        let moving = ContentEvent::new(
            Tap::Moving,
            user_id,
            EventPayload::Move {
                content: &*content,
                parent_id,
            },
        );
        if !self.allows(&moving) {
            return Ok(false);
        }

        let parent_path = self.parent_path(parent_id).await?;
        let own_segment = content.id().to_string();
        if parent_path.split(',').any(|segment| segment == own_segment) {
            return Err(ContentError::InvalidPath(parent_path));
        }

        let descendants = self.get_descendants(content).await?;
        let original = content.clone();

        if content.trashed() {
            content.change_trashed_state(false, parent_id);
        } else {
            content.set_parent_id(parent_id);
        }
        content.place_under(&parent_path);

        let siblings = {
            let mut uow = self.begin().await?;
            uow.count(
                &ContentQuery::new()
                    .parent_id(parent_id)
                    .exclude_id(content.id()),
            )
            .await?
        };
        content.set_sort_order(siblings as i32);

        if !self.relocate(content, user_id, true).await? {
            *content = original;
            return Ok(false);
        }

        let mut paths: HashMap<i32, String> = HashMap::new();
        paths.insert(content.id(), content.path().to_string());
        for mut descendant in descendants {
            let Some(path) = paths.get(&descendant.parent_id()).cloned() else {
                continue;
            };
            if descendant.trashed() {
                let parent = descendant.parent_id();
                descendant.change_trashed_state(false, parent);
            }
            descendant.place_under(&path);
            // Without taps nothing can veto a descendant.
            self.relocate(&mut descendant, user_id, false).await?;
            paths.insert(descendant.id(), descendant.path().to_string());
        }

        self.raise(&ContentEvent::new(
            Tap::Moved,
            user_id,
            EventPayload::Move {
                content: &*content,
                parent_id,
            },
        ));

        self.audit(
            AuditType::Move,
            "Move Content performed by user",
            user_id,
            content.id(),
        )
        .await;
        info!(
            content_id = content.id(),
            parent_id,
            path = %content.path(),
            "content moved"
        );
        Ok(true)
    }

    /// Persist an item at its new location.
    ///
    /// Returns `false` if a `Saving` handler denied it and nothing was written.
    async fn relocate(
        &self,
        content: &mut Content,
        user_id: i32,
        raise_events: bool,
    ) -> ContentResult<bool> {
        if !content.published() {
            return self.save_with(content, user_id, raise_events, true).await;
        }

        if self.is_publishable(content).await? {
            let status = self
                .save_and_publish_with(content, user_id, raise_events)
                .await?;
            return Ok(status.is_some());
        }

        if !self.save_with(content, user_id, raise_events, true).await? {
            return Ok(false);
        }
        let mut uow = self.begin().await?;
        uow.upsert_content_xml(&ContentXml::from_content(content)?)
            .await?;
        uow.commit().await?;
        Ok(true)
    }

    /// Move an item and its subtree to the recycle bin.
    ///
    /// Everything in the subtree is unpublished first. The item is parented
    /// to the bin; descendants keep their parents with recomputed paths.
    pub async fn move_to_recycle_bin(
        &self,
        content: &mut Content,
        user_id: i32,
    ) -> ContentResult<bool> {
        let trashing = ContentEvent::new(
            Tap::Trashing,
            user_id,
            EventPayload::Move {
                content: &*content,
                parent_id: RECYCLE_BIN_ID,
            },
        );
        if !self.allows(&trashing) {
            return Ok(false);
        }

        let mut descendants = self.get_descendants(content).await?;
        if self.has_published_version(content.id()).await? {
            self.unpublish(content, user_id).await?;
        }
        self.unpublish_all(&mut descendants, user_id).await?;

        let mut uow = self.begin().await?;

        content.set_writer_id(user_id);
        content.change_trashed_state(true, RECYCLE_BIN_ID);
        content.place_under(RECYCLE_BIN_PATH);
        demote(content);
        uow.add_or_update(content).await?;
        uow.delete_content_xml(content.id()).await?;

        let mut paths: HashMap<i32, String> = HashMap::new();
        paths.insert(content.id(), content.path().to_string());
        for descendant in descendants.iter_mut() {
            let parent_id = descendant.parent_id();
            let Some(path) = paths.get(&parent_id).cloned() else {
                continue;
            };
            descendant.set_writer_id(user_id);
            descendant.change_trashed_state(true, parent_id);
            descendant.set_parent_id(parent_id);
            descendant.place_under(&path);
            demote(descendant);
            uow.add_or_update(descendant).await?;
            uow.delete_content_xml(descendant.id()).await?;
            paths.insert(descendant.id(), descendant.path().to_string());
        }
        uow.commit().await?;

        content.reset_dirty();

        self.raise(&ContentEvent::new(
            Tap::Trashed,
            user_id,
            EventPayload::Move {
                content: &*content,
                parent_id: RECYCLE_BIN_ID,
            },
        ));

        self.audit(
            AuditType::Move,
            "Move Content to Recycle Bin performed by user",
            user_id,
            content.id(),
        )
        .await;
        info!(
            content_id = content.id(),
            descendants = descendants.len(),
            "content moved to recycle bin"
        );
        Ok(true)
    }

    /// Permanently delete every top-level item of the recycle bin.
    ///
    /// Items a `Deleting` handler denies are skipped. Returns how many were
    /// deleted.
    pub async fn empty_recycle_bin(&self) -> ContentResult<usize> {
        let items = self
            .query(&ContentQuery::new().parent_id(RECYCLE_BIN_ID))
            .await?;

        let mut deleted = 0;
        for item in &items {
            if self.delete(item, 0).await? {
                deleted += 1;
            }
        }

        self.audit(
            AuditType::Delete,
            "Empty Recycle Bin performed by user",
            0,
            RECYCLE_BIN_ID,
        )
        .await;
        info!(deleted, skipped = items.len() - deleted, "recycle bin emptied");
        Ok(deleted)
    }

    /// Permanently delete an item together with its descendants.
    ///
    /// Returns `false` if a `Deleting` handler denied it.
    pub async fn delete(&self, content: &Content, user_id: i32) -> ContentResult<bool> {
        if !self.allows(&ContentEvent::content(Tap::Deleting, user_id, content)) {
            return Ok(false);
        }

        let mut subtree = vec![content.clone()];
        subtree.extend(self.get_descendants(content).await?);
        self.unpublish_all(&mut subtree, user_id).await?;

        let mut uow = self.begin().await?;
        for item in subtree.iter().rev() {
            uow.delete(item.id()).await?;
        }
        uow.commit().await?;

        self.raise(&ContentEvent::batch(
            Tap::Deleted,
            user_id,
            subtree.iter().collect(),
        ));

        for item in subtree.iter().rev() {
            self.audit(
                AuditType::Delete,
                "Delete Content performed by user",
                user_id,
                item.id(),
            )
            .await;
        }
        info!(
            content_id = content.id(),
            count = subtree.len(),
            "content deleted"
        );
        Ok(true)
    }

    /// Permanently delete every item of a content type.
    ///
    /// Descendants of other types are moved to the recycle bin first.
    pub async fn delete_content_of_type(
        &self,
        content_type_id: i32,
        user_id: i32,
    ) -> ContentResult<bool> {
        let items = self.get_content_of_content_type(content_type_id).await?;
        if !self.allows(&ContentEvent::batch(
            Tap::Deleting,
            user_id,
            items.iter().collect(),
        )) {
            return Ok(false);
        }

        for item in &items {
            // Earlier iterations may have deleted or moved it.
            let Some(current) = self.get_by_id(item.id()).await? else {
                continue;
            };

            for descendant in self.get_descendants(&current).await? {
                if descendant.content_type().id == content_type_id {
                    continue;
                }
                let Some(mut child) = self.get_by_id(descendant.id()).await? else {
                    continue;
                };
                if !child.is_in_recycle_bin() {
                    self.move_to_recycle_bin(&mut child, user_id).await?;
                }
            }

            self.delete(&current, user_id).await?;
        }

        self.audit(
            AuditType::Delete,
            &format!("Delete Content of Type {content_type_id} performed by user"),
            user_id,
            ROOT_ID,
        )
        .await;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Copy
    // -------------------------------------------------------------------------

    /// Copy an item and its descendants under `parent_id`.
    ///
    /// Copies are never published. Upload-backed properties get their files
    /// duplicated. With `relate_to_original`, each copy is linked to its
    /// source by a relation. Returns `None` if a `Copying` handler denied the
    /// top-level copy.
    pub async fn copy(
        &self,
        content: &Content,
        parent_id: i32,
        relate_to_original: bool,
        user_id: i32,
    ) -> ContentResult<Option<Content>> {
        let Some(copy) = self
            .copy_one(content, parent_id, relate_to_original, user_id)
            .await?
        else {
            return Ok(None);
        };

        let mut parents: HashMap<i32, i32> = HashMap::new();
        parents.insert(content.id(), copy.id());
        for descendant in self.get_descendants(content).await? {
            let Some(&new_parent) = parents.get(&descendant.parent_id()) else {
                continue;
            };
            if let Some(child_copy) = self
                .copy_one(&descendant, new_parent, relate_to_original, user_id)
                .await?
            {
                parents.insert(descendant.id(), child_copy.id());
            }
        }

        Ok(Some(copy))
    }

    async fn copy_one(
        &self,
        original: &Content,
        parent_id: i32,
        relate_to_original: bool,
        user_id: i32,
    ) -> ContentResult<Option<Content>> {
        let mut copy = original.clone_as_new();
        copy.set_parent_id(parent_id);
        copy.change_published_state(PublishedState::Unpublished);

        let copying = ContentEvent::new(
            Tap::Copying,
            user_id,
            EventPayload::Copy {
                original,
                copy: &copy,
                parent_id,
            },
        );
        if !self.allows(&copying) {
            return Ok(None);
        }

        copy.set_creator_id(user_id);
        copy.set_writer_id(user_id);
        self.persist(&mut copy).await?;

        if self.copy_media(original, &mut copy).await? {
            self.persist(&mut copy).await?;
        }

        if relate_to_original {
            let mut uow = self.begin().await?;
            uow.add_relation(&Relation::new(
                original.id(),
                copy.id(),
                RELATE_DOCUMENT_ON_COPY,
            ))
            .await?;
            uow.commit().await?;

            self.audit(
                AuditType::Copy,
                &format!(
                    "Copied content with Id: '{}' related to original content with Id: '{}'",
                    copy.id(),
                    original.id()
                ),
                user_id,
                copy.id(),
            )
            .await;
        }

        self.raise(&ContentEvent::new(
            Tap::Copied,
            user_id,
            EventPayload::Copy {
                original,
                copy: &copy,
                parent_id,
            },
        ));

        self.audit(
            AuditType::Copy,
            "Copy Content performed by user",
            user_id,
            original.id(),
        )
        .await;
        info!(
            content_id = original.id(),
            copy_id = copy.id(),
            parent_id,
            "content copied"
        );
        Ok(Some(copy))
    }

    /// Duplicate the files behind upload properties into folders owned by
    /// the copy's properties. Returns whether any value changed.
    async fn copy_media(&self, original: &Content, copy: &mut Content) -> ContentResult<bool> {
        let Some(media) = self.inner.media.as_ref() else {
            return Ok(false);
        };

        let uploads: Vec<(String, String)> = original
            .content_type()
            .property_types()
            .filter(|pt| pt.data_type == DataType::Upload)
            .filter_map(|pt| {
                original
                    .property(&pt.alias)
                    .and_then(Property::as_str)
                    .filter(|url| !url.is_empty())
                    .map(|url| (pt.alias.clone(), url.to_string()))
            })
            .collect();

        let mut updated = false;
        for (alias, url) in uploads {
            let current = media.relative_path(&url);
            if !media.file_exists(&current).await? {
                debug!(alias = %alias, path = %current, "upload file missing, not copied");
                continue;
            }
            let Some(folder) = copy.property(&alias).map(|p| p.id().to_string()) else {
                continue;
            };

            let target = media.relative_path_for(&folder, file_name(&current));
            media.copy_file(&current, &target).await?;
            copy.set_value(&alias, media.url(&target))?;

            for thumbnail in media.thumbnails(&current).await? {
                let thumbnail_target = media.relative_path_for(&folder, file_name(&thumbnail));
                media.copy_file(&thumbnail, &thumbnail_target).await?;
            }
            updated = true;
        }
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Rollback and versions
    // -------------------------------------------------------------------------

    /// Make the values of an older version current again.
    ///
    /// Only versioned data is restored: property values, template, language
    /// and schedule. The result is saved as a new version; a published item
    /// keeps its published version until it is published again.
    pub async fn rollback(&self, id: i32, version: Uuid, user_id: i32) -> ContentResult<Content> {
        let mut content = self
            .get_by_id(id)
            .await?
            .ok_or(ContentError::NotFound(id))?;
        let target = self
            .get_by_version(version)
            .await?
            .ok_or(ContentError::VersionNotFound(version))?;
        if target.id() != id {
            return Err(ContentError::VersionMismatch {
                content_id: id,
                version,
            });
        }

        if !self.allows(&ContentEvent::content(Tap::RollingBack, user_id, &target)) {
            return Ok(content);
        }

        for property in target.properties() {
            if content.content_type().property_type(property.alias()).is_some() {
                content.set_value(property.alias(), property.value().clone())?;
            }
        }
        content.set_template(target.template.clone());
        content.set_language(target.language.clone());
        content.set_release_date(target.release_date());
        content.set_expire_date(target.expire_date());
        content.set_writer_id(user_id);
        if content.published() {
            content.change_published_state(PublishedState::Saved);
        }
        self.persist(&mut content).await?;

        self.raise(&ContentEvent::content(Tap::RolledBack, user_id, &content));

        self.audit(
            AuditType::RollBack,
            "Content rollback performed by user",
            user_id,
            content.id(),
        )
        .await;
        info!(content_id = id, version = %version, new_version = %content.version(), "content rolled back");
        Ok(content)
    }

    /// Delete versions of an item last updated before `before`.
    ///
    /// The current and published versions are always kept.
    pub async fn delete_versions(
        &self,
        id: i32,
        before: DateTime<Utc>,
        user_id: i32,
    ) -> ContentResult<bool> {
        let payload = || EventPayload::Versions {
            content_id: id,
            version: None,
            before: Some(before),
        };
        if !self.allows(&ContentEvent::new(Tap::DeletingVersions, user_id, payload())) {
            return Ok(false);
        }

        let mut uow = self.begin().await?;
        let removed = uow.delete_versions_before(id, before).await?;
        uow.commit().await?;

        self.raise(&ContentEvent::new(Tap::DeletedVersions, user_id, payload()));

        self.audit(
            AuditType::Delete,
            "Delete Content by version date performed by user",
            user_id,
            ROOT_ID,
        )
        .await;
        info!(content_id = id, removed, "content versions pruned");
        Ok(true)
    }

    /// Delete one version of an item, optionally with every older one.
    ///
    /// Neither the current nor the published version can be deleted. Delete
    /// the item, or unpublish it first.
    pub async fn delete_version(
        &self,
        id: i32,
        version: Uuid,
        delete_prior_versions: bool,
        user_id: i32,
    ) -> ContentResult<bool> {
        let target = self
            .get_by_version(version)
            .await?
            .ok_or(ContentError::VersionNotFound(version))?;
        if target.id() != id {
            return Err(ContentError::VersionMismatch {
                content_id: id,
                version,
            });
        }
        let current = self
            .get_by_id(id)
            .await?
            .ok_or(ContentError::NotFound(id))?;
        if current.version() == version {
            return Err(ContentError::CurrentVersion {
                content_id: id,
                version,
            });
        }
        if target.published() {
            return Err(ContentError::PublishedVersion {
                content_id: id,
                version,
            });
        }

        if delete_prior_versions {
            self.delete_versions(id, target.update_date(), user_id)
                .await?;
        }

        let payload = || EventPayload::Versions {
            content_id: id,
            version: Some(version),
            before: None,
        };
        if !self.allows(&ContentEvent::new(Tap::DeletingVersions, user_id, payload())) {
            return Ok(false);
        }

        let mut uow = self.begin().await?;
        uow.delete_version(id, version).await?;
        uow.commit().await?;

        self.raise(&ContentEvent::new(Tap::DeletedVersions, user_id, payload()));

        self.audit(
            AuditType::Delete,
            "Delete Content by version performed by user",
            user_id,
            ROOT_ID,
        )
        .await;
        Ok(true)
    }
}

/// Trashed items never keep a published or pending state.
fn demote(content: &mut Content) {
    if content.published_state() != PublishedState::Unpublished {
        content.change_published_state(PublishedState::Unpublished);
    }
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}
