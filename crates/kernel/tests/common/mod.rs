#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Builds the real content service over an in-memory store, an in-memory
//! audit log and a registry holding a `textpage` and a `folder` type.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use folio_kernel::content::{ContentService, ContentTypeRegistry, PublishStatus};
use folio_kernel::file::LocalMediaFileSystem;
use folio_kernel::models::{
    Content, ContentType, ContentXml, DataType, PropertyType, Relation, ROOT_ID,
};
use folio_kernel::persistence::{ContentRepository, MemoryStore, UnitOfWorkProvider};
use folio_kernel::services::MemoryAuditLog;
use folio_kernel::tap::{Tap, TapDispatcher, TapVerdict};

pub const TEXTPAGE_ID: i32 = 1045;
pub const FOLDER_ID: i32 = 1050;

/// The "Textpage" content type.
pub fn textpage() -> ContentType {
    ContentType::new(TEXTPAGE_ID, "textpage", "Textpage")
        .with_default_template("textpage")
        .with_group(
            "Content",
            vec![
                PropertyType::new("title", "Title", DataType::Text).mandatory(),
                PropertyType::new("bodyText", "Body Text", DataType::TextLong),
                PropertyType::new("image", "Image", DataType::Upload),
            ],
        )
}

/// A content type without properties.
pub fn folder() -> ContentType {
    ContentType::new(FOLDER_ID, "folder", "Folder")
}

/// Test application wrapper around the real content service.
pub struct TestApp {
    pub service: ContentService,
    pub store: MemoryStore,
    pub audit: Arc<MemoryAuditLog>,
    pub dispatcher: Arc<TapDispatcher>,
    pub registry: ContentTypeRegistry,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Test app with media stored under `root` and served from `/media`.
    pub fn with_media(root: PathBuf) -> Self {
        Self::build(Some(LocalMediaFileSystem::new(root, "/media")))
    }

    fn build(media: Option<LocalMediaFileSystem>) -> Self {
        let store = MemoryStore::new();
        let audit = Arc::new(MemoryAuditLog::new());
        let dispatcher = Arc::new(TapDispatcher::new());
        let registry = ContentTypeRegistry::new();
        registry.register(textpage());
        registry.register(folder());

        let mut service = ContentService::new(
            Arc::new(store.clone()),
            Arc::new(registry.clone()),
            dispatcher.clone(),
            audit.clone(),
        );
        if let Some(media) = media {
            service = service.with_media(Arc::new(media));
        }

        Self {
            service,
            store,
            audit,
            dispatcher,
            registry,
        }
    }

    /// Create and save a textpage whose title is its name.
    pub async fn create(&self, name: &str, parent_id: i32) -> Content {
        let mut content = self
            .service
            .create_content(name, parent_id, "textpage", 0)
            .await
            .unwrap();
        content.set_value("title", name).unwrap();
        assert!(self.service.save(&mut content, 0).await.unwrap());
        content
    }

    /// Create and save a folder.
    pub async fn create_folder(&self, name: &str, parent_id: i32) -> Content {
        let mut content = self
            .service
            .create_content(name, parent_id, "folder", 0)
            .await
            .unwrap();
        assert!(self.service.save(&mut content, 0).await.unwrap());
        content
    }

    /// Create, save and publish a textpage.
    pub async fn create_published(&self, name: &str, parent_id: i32) -> Content {
        let mut content = self.create(name, parent_id).await;
        self.publish(&mut content).await;
        content
    }

    /// Publish and assert success.
    pub async fn publish(&self, content: &mut Content) {
        assert_eq!(
            self.service.publish(content, 0).await.unwrap(),
            PublishStatus::Success
        );
    }

    /// Create a root textpage.
    pub async fn root(&self, name: &str) -> Content {
        self.create(name, ROOT_ID).await
    }

    /// Load the committed state of an item.
    pub async fn reload(&self, id: i32) -> Content {
        self.service
            .get_by_id(id)
            .await
            .unwrap()
            .expect("content should exist")
    }

    pub async fn content_xml(&self, id: i32) -> Option<ContentXml> {
        let mut uow = self.store.begin().await.unwrap();
        uow.get_content_xml(id).await.unwrap()
    }

    pub async fn relations(&self, id: i32) -> Vec<Relation> {
        let mut uow = self.store.begin().await.unwrap();
        uow.get_relations(id).await.unwrap()
    }

    /// Deny a cancellable tap for items with the given name.
    pub fn deny_named(&self, tap: Tap, name: &'static str) {
        self.dispatcher.on(tap, format!("deny-{name}"), 0, move |event| {
            if event.items().iter().any(|c| c.name() == name) {
                TapVerdict::Deny
            } else {
                TapVerdict::Allow
            }
        });
    }

    /// Record the ids of items each time `tap` fires.
    pub fn record(&self, tap: Tap) -> Arc<Mutex<Vec<i32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.dispatcher.on(tap, "record", 100, move |event| {
            sink.lock().extend(event.items().iter().map(|c| c.id()));
            TapVerdict::Allow
        });
        seen
    }
}

/// A fresh temporary directory.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("folio-{name}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
