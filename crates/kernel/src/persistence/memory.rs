//! In-memory content store.
//!
//! A unit of work reads the committed tables until its first write. From
//! then on it works on a private copy, so it reads its own writes while other
//! units of work do not see them. Commit replays the recorded writes onto the
//! shared tables under one lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::query::{ContentQuery, sort_tree_order};
use super::{ContentRepository, UnitOfWork, UnitOfWorkProvider, place_moved, place_new};
use crate::models::content::{Content, PublishedState};
use crate::models::relation::Relation;
use crate::models::xml::{ContentXml, PreviewXml};

const FIRST_NODE_ID: i32 = 1000;

#[derive(Debug, Clone, Default)]
struct Tables {
    nodes: BTreeMap<i32, Content>,
    /// Version history per node, oldest first.
    versions: BTreeMap<i32, Vec<Content>>,
    content_xml: HashMap<i32, ContentXml>,
    preview_xml: HashMap<(i32, Uuid), PreviewXml>,
    relations: Vec<Relation>,
}

#[derive(Debug, Clone)]
enum Write {
    Save(Content),
    Delete(i32),
    DeleteVersion(i32, Uuid),
    DeleteVersionsBefore(i32, DateTime<Utc>),
    UpsertContentXml(ContentXml),
    DeleteContentXml(i32),
    UpsertPreviewXml(PreviewXml),
    AddRelation(Relation),
}

impl Tables {
    fn apply(&mut self, write: &Write) -> u64 {
        match write {
            Write::Save(content) => {
                let versions = self.versions.entry(content.id).or_default();
                let clears_published = content.published
                    || content.published_state == PublishedState::Unpublished;
                if clears_published {
                    for version in versions.iter_mut() {
                        version.published = false;
                    }
                }
                versions.push(content.clone());
                self.nodes.insert(content.id, content.clone());
                1
            }
            Write::Delete(id) => {
                self.nodes.remove(id);
                self.versions.remove(id);
                self.content_xml.remove(id);
                self.preview_xml.retain(|(node_id, _), _| node_id != id);
                self.relations
                    .retain(|r| r.parent_id != *id && r.child_id != *id);
                1
            }
            Write::DeleteVersion(id, version) => {
                let Some(versions) = self.versions.get_mut(id) else {
                    return 0;
                };
                let before = versions.len();
                versions.retain(|v| v.version != *version);
                self.preview_xml.remove(&(*id, *version));
                (before - versions.len()) as u64
            }
            Write::DeleteVersionsBefore(id, cutoff) => {
                let current = self.nodes.get(id).map(|c| c.version);
                let Some(versions) = self.versions.get_mut(id) else {
                    return 0;
                };
                let before = versions.len();
                versions.retain(|v| {
                    Some(v.version) == current || v.published || v.update_date >= *cutoff
                });
                let kept: Vec<Uuid> = versions.iter().map(|v| v.version).collect();
                self.preview_xml
                    .retain(|(node_id, version), _| node_id != id || kept.contains(version));
                (before - versions.len()) as u64
            }
            Write::UpsertContentXml(xml) => {
                self.content_xml.insert(xml.node_id, xml.clone());
                1
            }
            Write::DeleteContentXml(id) => u64::from(self.content_xml.remove(id).is_some()),
            Write::UpsertPreviewXml(xml) => {
                self.preview_xml
                    .insert((xml.node_id, xml.version_id), xml.clone());
                1
            }
            Write::AddRelation(relation) => {
                self.relations.push(relation.clone());
                1
            }
        }
    }

    fn has_published_version(&self, id: i32) -> bool {
        self.versions
            .get(&id)
            .is_some_and(|versions| versions.iter().any(|v| v.published))
    }

    /// A stored version with the node fields of the current item.
    fn version_view(&self, version: &Content) -> Content {
        let mut view = version.clone();
        if let Some(node) = self.nodes.get(&version.id) {
            view.name = node.name.clone();
            view.parent_id = node.parent_id;
            view.path = node.path.clone();
            view.level = node.level;
            view.sort_order = node.sort_order;
            view.trashed = node.trashed;
            view.creator_id = node.creator_id;
            view.create_date = node.create_date;
        }
        if let Some(stored) = self
            .versions
            .get(&version.id)
            .and_then(|versions| versions.iter().find(|v| v.version == version.version))
        {
            view.published = stored.published;
        }
        view.reset_dirty();
        view
    }

    fn query(&self, query: &ContentQuery) -> Vec<Content> {
        let mut items: Vec<Content> = self
            .nodes
            .values()
            .filter(|c| query.matches(c, self.has_published_version(c.id)))
            .map(|c| {
                let mut item = c.clone();
                item.reset_dirty();
                item
            })
            .collect();
        sort_tree_order(&mut items);
        items
    }
}

struct Inner {
    tables: Mutex<Tables>,
    next_id: AtomicI32,
    next_property_id: AtomicI32,
    clock: Mutex<DateTime<Utc>>,
}

/// In-memory [`UnitOfWorkProvider`].
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                next_id: AtomicI32::new(FIRST_NODE_ID),
                next_property_id: AtomicI32::new(1),
                clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
            }),
        }
    }

    /// Strictly increasing timestamps, so version dates never tie.
    fn tick(&self) -> DateTime<Utc> {
        let mut last = self.inner.clock.lock();
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Number of committed items, for diagnostics.
    pub fn len(&self) -> usize {
        self.inner.tables.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitOfWorkProvider for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork::new(self.clone())))
    }
}

struct MemoryUnitOfWork {
    store: MemoryStore,
    /// Copy of the tables, taken on the first write.
    local: Option<Tables>,
    writes: Vec<Write>,
}

impl MemoryUnitOfWork {
    fn new(store: MemoryStore) -> Self {
        Self {
            store,
            local: None,
            writes: Vec::new(),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        match &self.local {
            Some(tables) => f(tables),
            None => f(&self.store.inner.tables.lock()),
        }
    }

    fn record(&mut self, write: Write) -> u64 {
        let store = &self.store;
        let local = self
            .local
            .get_or_insert_with(|| store.inner.tables.lock().clone());
        let affected = local.apply(&write);
        self.writes.push(write);
        affected
    }
}

#[async_trait]
impl ContentRepository for MemoryUnitOfWork {
    async fn get(&mut self, id: i32) -> Result<Option<Content>> {
        Ok(self.read(|tables| {
            tables.nodes.get(&id).map(|c| {
                let mut item = c.clone();
                item.reset_dirty();
                item
            })
        }))
    }

    async fn get_by_query(&mut self, query: &ContentQuery) -> Result<Vec<Content>> {
        Ok(self.read(|tables| tables.query(query)))
    }

    async fn count(&mut self, query: &ContentQuery) -> Result<usize> {
        Ok(self.read(|tables| tables.query(query).len()))
    }

    async fn add_or_update(&mut self, content: &mut Content) -> Result<()> {
        let now = self.store.tick();

        if content.has_identity() {
            place_moved(&mut *self, content).await?;
        } else {
            content.id = self.store.inner.next_id.fetch_add(1, Ordering::SeqCst);
            place_new(&mut *self, content, now).await?;
        }

        content.version = Uuid::now_v7();
        content.update_date = now;
        for property in &mut content.properties {
            if property.id == 0 {
                property.id = self.store.inner.next_property_id.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.record(Write::Save(content.clone()));
        Ok(())
    }

    async fn delete(&mut self, id: i32) -> Result<()> {
        self.record(Write::Delete(id));
        Ok(())
    }

    async fn get_all_versions(&mut self, id: i32) -> Result<Vec<Content>> {
        Ok(self.read(|tables| {
            tables
                .versions
                .get(&id)
                .map(|versions| {
                    versions
                        .iter()
                        .rev()
                        .map(|v| tables.version_view(v))
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn get_by_version(&mut self, version: Uuid) -> Result<Option<Content>> {
        Ok(self.read(|tables| {
            tables
                .versions
                .values()
                .flat_map(|versions| versions.iter())
                .find(|v| v.version == version)
                .map(|v| tables.version_view(v))
        }))
    }

    async fn get_published_version(&mut self, id: i32) -> Result<Option<Content>> {
        Ok(self.read(|tables| {
            tables.versions.get(&id).and_then(|versions| {
                versions
                    .iter()
                    .find(|v| v.published)
                    .map(|v| tables.version_view(v))
            })
        }))
    }

    async fn has_published_version(&mut self, id: i32) -> Result<bool> {
        Ok(self.read(|tables| tables.has_published_version(id)))
    }

    async fn delete_version(&mut self, id: i32, version: Uuid) -> Result<()> {
        self.record(Write::DeleteVersion(id, version));
        Ok(())
    }

    async fn delete_versions_before(&mut self, id: i32, before: DateTime<Utc>) -> Result<u64> {
        Ok(self.record(Write::DeleteVersionsBefore(id, before)))
    }

    async fn upsert_content_xml(&mut self, xml: &ContentXml) -> Result<()> {
        self.record(Write::UpsertContentXml(xml.clone()));
        Ok(())
    }

    async fn get_content_xml(&mut self, id: i32) -> Result<Option<ContentXml>> {
        Ok(self.read(|tables| tables.content_xml.get(&id).cloned()))
    }

    async fn delete_content_xml(&mut self, id: i32) -> Result<()> {
        self.record(Write::DeleteContentXml(id));
        Ok(())
    }

    async fn upsert_preview_xml(&mut self, xml: &PreviewXml) -> Result<()> {
        self.record(Write::UpsertPreviewXml(xml.clone()));
        Ok(())
    }

    async fn get_preview_xml(&mut self, id: i32, version: Uuid) -> Result<Option<PreviewXml>> {
        Ok(self.read(|tables| tables.preview_xml.get(&(id, version)).cloned()))
    }

    async fn add_relation(&mut self, relation: &Relation) -> Result<()> {
        self.record(Write::AddRelation(relation.clone()));
        Ok(())
    }

    async fn get_relations(&mut self, id: i32) -> Result<Vec<Relation>> {
        Ok(self.read(|tables| {
            tables
                .relations
                .iter()
                .filter(|r| r.parent_id == id || r.child_id == id)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut tables = this.store.inner.tables.lock();
        for write in &this.writes {
            tables.apply(write);
        }
        debug!(writes = this.writes.len(), "memory unit of work committed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::content::{RECYCLE_BIN_ID, ROOT_ID};
    use crate::models::content_type::{ContentType, DataType, PropertyType};

    fn textpage() -> Arc<ContentType> {
        Arc::new(ContentType::new(1045, "textpage", "Textpage").with_group(
            "Content",
            vec![PropertyType::new("bodyText", "Body", DataType::TextLong)],
        ))
    }

    async fn insert(store: &MemoryStore, name: &str, parent_id: i32) -> Content {
        let mut uow = store.begin().await.unwrap();
        let mut content = Content::new(name, parent_id, textpage());
        uow.add_or_update(&mut content).await.unwrap();
        uow.commit().await.unwrap();
        content
    }

    #[tokio::test]
    async fn insert_assigns_identity_and_path() {
        let store = MemoryStore::new();
        let home = insert(&store, "Home", ROOT_ID).await;
        assert!(home.has_identity());
        assert!(!home.key().is_nil());
        assert_eq!(home.path(), format!("-1,{}", home.id()));
        assert_eq!(home.level(), 1);
        assert_eq!(home.sort_order(), 0);

        let first = insert(&store, "First", home.id()).await;
        let second = insert(&store, "Second", home.id()).await;
        assert_eq!(second.path(), format!("{},{}", home.path(), second.id()));
        assert_eq!(second.level(), 2);
        assert_eq!(first.sort_order(), 0);
        assert_eq!(second.sort_order(), 1);

        let binned = insert(&store, "Binned", RECYCLE_BIN_ID).await;
        assert_eq!(binned.path(), format!("-1,-20,{}", binned.id()));
        assert_eq!(binned.level(), 2);
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            let mut content = Content::new("Draft", ROOT_ID, textpage());
            uow.add_or_update(&mut content).await.unwrap();
            assert!(uow.get(content.id()).await.unwrap().is_some());
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn reads_see_own_writes_only_until_commit() {
        let store = MemoryStore::new();
        let home = insert(&store, "Home", ROOT_ID).await;

        let mut reader = MemoryUnitOfWork::new(store.clone());
        assert_eq!(reader.get(home.id()).await.unwrap().unwrap().name(), "Home");
        assert!(reader.local.is_none());

        let mut writer = MemoryUnitOfWork::new(store.clone());
        let mut renamed = writer.get(home.id()).await.unwrap().unwrap();
        renamed.set_name("Start");
        writer.add_or_update(&mut renamed).await.unwrap();
        assert!(writer.local.is_some());
        assert_eq!(writer.get(home.id()).await.unwrap().unwrap().name(), "Start");
        assert_eq!(reader.get(home.id()).await.unwrap().unwrap().name(), "Home");

        Box::new(writer).commit().await.unwrap();
        assert_eq!(reader.get(home.id()).await.unwrap().unwrap().name(), "Start");
        assert!(reader.local.is_none());
    }

    #[tokio::test]
    async fn missing_parent_is_an_error() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let mut content = Content::new("Orphan", 4242, textpage());
        assert!(uow.add_or_update(&mut content).await.is_err());
    }

    #[tokio::test]
    async fn single_published_version() {
        let store = MemoryStore::new();
        let mut home = insert(&store, "Home", ROOT_ID).await;

        let mut uow = store.begin().await.unwrap();
        home.change_published_state(PublishedState::Published);
        uow.add_or_update(&mut home).await.unwrap();
        let first_published = home.version();

        home.change_published_state(PublishedState::Saved);
        uow.add_or_update(&mut home).await.unwrap();
        let published = uow.get_published_version(home.id()).await.unwrap().unwrap();
        assert_eq!(published.version(), first_published);

        home.change_published_state(PublishedState::Published);
        uow.add_or_update(&mut home).await.unwrap();
        let versions = uow.get_all_versions(home.id()).await.unwrap();
        assert_eq!(versions.len(), 4);
        assert_eq!(versions.iter().filter(|v| v.published()).count(), 1);
        assert_eq!(versions[0].version(), home.version());

        home.change_published_state(PublishedState::Unpublished);
        uow.add_or_update(&mut home).await.unwrap();
        assert!(!uow.has_published_version(home.id()).await.unwrap());
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn pruning_keeps_current_and_published_versions() {
        let store = MemoryStore::new();
        let mut home = insert(&store, "Home", ROOT_ID).await;

        let mut uow = store.begin().await.unwrap();
        home.change_published_state(PublishedState::Published);
        uow.add_or_update(&mut home).await.unwrap();
        let published = home.version();
        home.change_published_state(PublishedState::Saved);
        uow.add_or_update(&mut home).await.unwrap();
        uow.add_or_update(&mut home).await.unwrap();

        let removed = uow
            .delete_versions_before(home.id(), Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let kept: Vec<Uuid> = uow
            .get_all_versions(home.id())
            .await
            .unwrap()
            .iter()
            .map(Content::version)
            .collect();
        assert_eq!(kept, vec![home.version(), published]);
    }

    #[tokio::test]
    async fn delete_removes_snapshots_and_relations() {
        let store = MemoryStore::new();
        let home = insert(&store, "Home", ROOT_ID).await;
        let other = insert(&store, "Other", ROOT_ID).await;

        let mut uow = store.begin().await.unwrap();
        uow.upsert_content_xml(&ContentXml::from_content(&home).unwrap())
            .await
            .unwrap();
        uow.add_relation(&Relation::new(home.id(), other.id(), "related"))
            .await
            .unwrap();
        uow.delete(home.id()).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(uow.get(home.id()).await.unwrap().is_none());
        assert!(uow.get_content_xml(home.id()).await.unwrap().is_none());
        assert!(uow.get_relations(other.id()).await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }
}
