//! Persistence layer for content.
//!
//! The service never talks to storage directly. It opens a [`UnitOfWork`]
//! from a [`UnitOfWorkProvider`], performs reads and writes through the
//! [`ContentRepository`] methods on it, and commits. Dropping a unit of work
//! without committing discards every write made through it.
//!
//! Two providers exist: [`MemoryStore`] for tests and embedded use, and
//! [`PgUnitOfWorkProvider`] backed by a PostgreSQL transaction.

mod memory;
mod postgres;
pub mod query;
pub mod records;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::content::{
    Content, ContentField, RECYCLE_BIN_ID, RECYCLE_BIN_PATH, ROOT_ID, ROOT_PATH,
};
use crate::models::relation::Relation;
use crate::models::xml::{ContentXml, PreviewXml};

pub use memory::MemoryStore;
pub use postgres::PgUnitOfWorkProvider;
pub use query::ContentQuery;

/// Content storage operations.
///
/// Reads see the committed state plus the writes made earlier through the
/// same unit of work.
#[async_trait]
pub trait ContentRepository: Send {
    /// Current version of an item.
    async fn get(&mut self, id: i32) -> Result<Option<Content>>;

    /// Current versions matching `query`, ordered by level, sort order and id.
    async fn get_by_query(&mut self, query: &ContentQuery) -> Result<Vec<Content>>;

    /// Number of items matching `query`.
    async fn count(&mut self, query: &ContentQuery) -> Result<usize>;

    /// Insert or update an item.
    ///
    /// New items are assigned an id, a key (if empty), a path below their
    /// parent and a sort order after their siblings. Every call writes a new
    /// version row and updates `version` and `update_date` on the entity.
    async fn add_or_update(&mut self, content: &mut Content) -> Result<()>;

    /// Delete an item with all its versions, snapshots and relations.
    async fn delete(&mut self, id: i32) -> Result<()>;

    /// All versions of an item, newest first.
    async fn get_all_versions(&mut self, id: i32) -> Result<Vec<Content>>;

    /// One specific version.
    async fn get_by_version(&mut self, version: Uuid) -> Result<Option<Content>>;

    /// The version flagged as published, if any.
    async fn get_published_version(&mut self, id: i32) -> Result<Option<Content>>;

    /// Whether any version of the item is flagged as published.
    async fn has_published_version(&mut self, id: i32) -> Result<bool>;

    /// Delete one version row.
    async fn delete_version(&mut self, id: i32, version: Uuid) -> Result<()>;

    /// Delete versions last updated before `before`.
    ///
    /// The current version and the published version are always kept.
    async fn delete_versions_before(&mut self, id: i32, before: DateTime<Utc>) -> Result<u64>;

    async fn upsert_content_xml(&mut self, xml: &ContentXml) -> Result<()>;

    async fn get_content_xml(&mut self, id: i32) -> Result<Option<ContentXml>>;

    async fn delete_content_xml(&mut self, id: i32) -> Result<()>;

    async fn upsert_preview_xml(&mut self, xml: &PreviewXml) -> Result<()>;

    async fn get_preview_xml(&mut self, id: i32, version: Uuid) -> Result<Option<PreviewXml>>;

    async fn add_relation(&mut self, relation: &Relation) -> Result<()>;

    /// Relations where the item is either end.
    async fn get_relations(&mut self, id: i32) -> Result<Vec<Relation>>;
}

/// A transactional batch of repository operations.
#[async_trait]
pub trait UnitOfWork: ContentRepository {
    /// Make every write visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Opens units of work.
#[async_trait]
pub trait UnitOfWorkProvider: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// Fill in what a first insert assigns once the id is known.
pub(crate) async fn place_new<R>(repo: &mut R, content: &mut Content, now: DateTime<Utc>) -> Result<()>
where
    R: ContentRepository + ?Sized,
{
    if content.key.is_nil() {
        content.key = Uuid::now_v7();
    }
    content.create_date = now;

    let path = parent_path(repo, content.parent_id()).await?;
    content.place_under(&path);

    let siblings = repo
        .count(
            &ContentQuery::new()
                .parent_id(content.parent_id())
                .exclude_id(content.id()),
        )
        .await?;
    content.set_sort_order(siblings as i32);
    Ok(())
}

/// Recompute the path of an item whose parent changed without a new path.
pub(crate) async fn place_moved<R>(repo: &mut R, content: &mut Content) -> Result<()>
where
    R: ContentRepository + ?Sized,
{
    if content.is_field_dirty(ContentField::ParentId) && !content.is_field_dirty(ContentField::Path)
    {
        let path = parent_path(repo, content.parent_id()).await?;
        content.place_under(&path);
    }
    Ok(())
}

/// Path of a parent, resolving the two synthetic nodes without a lookup.
pub(crate) async fn parent_path<R>(repo: &mut R, parent_id: i32) -> Result<String>
where
    R: ContentRepository + ?Sized,
{
    match parent_id {
        ROOT_ID => Ok(ROOT_PATH.to_string()),
        RECYCLE_BIN_ID => Ok(RECYCLE_BIN_PATH.to_string()),
        id => repo
            .get(id)
            .await?
            .map(|parent| parent.path().to_string())
            .ok_or_else(|| anyhow::anyhow!("parent {id} not found")),
    }
}
