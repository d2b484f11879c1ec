//! Integration tests for rollback and version pruning.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::TestApp;
use folio_kernel::error::ContentError;
use folio_kernel::models::{Content, PublishedState, ROOT_ID};
use folio_kernel::services::AuditType;
use folio_kernel::tap::{Tap, TapVerdict};

/// Save `Home` with each body text in turn; returns the item and the
/// version ids, oldest first.
async fn home_with_history(app: &TestApp, bodies: &[&str]) -> (Content, Vec<Uuid>) {
    let mut home = app.root("Home").await;
    let mut versions = vec![home.version()];
    for body in bodies {
        home.set_value("bodyText", *body).unwrap();
        assert!(app.service.save(&mut home, 0).await.unwrap());
        versions.push(home.version());
    }
    (home, versions)
}

#[tokio::test]
async fn versions_are_listed_newest_first() {
    let app = TestApp::new();
    let (home, versions) = home_with_history(&app, &["one", "two"]).await;

    let listed: Vec<Uuid> = app
        .service
        .get_versions(home.id())
        .await
        .unwrap()
        .iter()
        .map(Content::version)
        .collect();

    assert_eq!(listed, versions.iter().rev().copied().collect::<Vec<_>>());
    let first = app.service.get_by_version(versions[1]).await.unwrap().unwrap();
    assert_eq!(first.value("bodyText").unwrap(), "one");
    assert_eq!(first.name(), "Home");
}

#[tokio::test]
async fn rollback_restores_values_as_a_new_version() {
    let app = TestApp::new();
    let (home, versions) = home_with_history(&app, &["one", "two"]).await;
    let rolled_back = app.record(Tap::RolledBack);

    let restored = app.service.rollback(home.id(), versions[1], 9).await.unwrap();

    assert_eq!(restored.value("bodyText").unwrap(), "one");
    assert_ne!(restored.version(), versions[1]);
    assert_eq!(restored.writer_id(), 9);
    assert_eq!(restored.creator_id(), home.creator_id());
    assert_eq!(app.reload(home.id()).await.creator_id(), home.creator_id());
    assert_eq!(app.service.get_versions(home.id()).await.unwrap().len(), 4);
    assert_eq!(
        app.reload(home.id()).await.value("bodyText").unwrap(),
        "one"
    );
    assert_eq!(*rolled_back.lock(), vec![home.id()]);
    assert_eq!(app.audit.entries_for(AuditType::RollBack, home.id()).len(), 1);
}

#[tokio::test]
async fn rollback_of_published_content_waits_for_a_publish() {
    let app = TestApp::new();
    let mut home = app.root("Home").await;
    home.set_value("bodyText", "one").unwrap();
    app.publish(&mut home).await;
    let first = home.version();
    home.set_value("bodyText", "two").unwrap();
    app.publish(&mut home).await;
    let second = home.version();

    let restored = app.service.rollback(home.id(), first, 0).await.unwrap();

    assert_eq!(restored.published_state(), PublishedState::Saved);
    let published = app
        .service
        .get_published_version(home.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.version(), second);
    assert!(app.content_xml(home.id()).await.unwrap().xml.contains("two"));
}

#[tokio::test]
async fn rollback_rejects_unknown_and_foreign_versions() {
    let app = TestApp::new();
    let (home, _) = home_with_history(&app, &["one"]).await;
    let other = app.root("Other").await;

    let err = app
        .service
        .rollback(home.id(), Uuid::now_v7(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::VersionNotFound(_)));

    let err = app
        .service
        .rollback(home.id(), other.version(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::VersionMismatch { .. }));

    let err = app
        .service
        .rollback(4242, home.version(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::NotFound(4242)));
}

#[tokio::test]
async fn rolling_back_handler_can_cancel() {
    let app = TestApp::new();
    let (home, versions) = home_with_history(&app, &["one", "two"]).await;
    app.deny_named(Tap::RollingBack, "Home");

    let current = app.service.rollback(home.id(), versions[1], 0).await.unwrap();

    assert_eq!(current.value("bodyText").unwrap(), "two");
    assert_eq!(app.service.get_versions(home.id()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn current_version_cannot_be_deleted() {
    let app = TestApp::new();
    let (home, _) = home_with_history(&app, &["one"]).await;

    let err = app
        .service
        .delete_version(home.id(), home.version(), false, 0)
        .await
        .unwrap_err();

    assert!(matches!(err, ContentError::CurrentVersion { .. }));
    assert_eq!(app.service.get_versions(home.id()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn published_version_cannot_be_deleted() {
    let app = TestApp::new();
    let mut home = app.create_published("Home", ROOT_ID).await;
    let published = home.version();
    let child = app.create_published("Child", home.id()).await;
    home.set_value("bodyText", "draft").unwrap();
    assert!(app.service.save(&mut home, 0).await.unwrap());

    let err = app
        .service
        .delete_version(home.id(), published, false, 0)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ContentError::PublishedVersion { content_id, version }
            if content_id == home.id() && version == published
    ));
    let still_published = app
        .service
        .get_published_version(home.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still_published.version(), published);
    assert!(app.content_xml(home.id()).await.is_some());
    assert!(app.reload(child.id()).await.published());
    assert!(app.audit.entries_for(AuditType::Delete, ROOT_ID).is_empty());
}

#[tokio::test]
async fn delete_version_removes_only_that_version() {
    let app = TestApp::new();
    let (home, versions) = home_with_history(&app, &["one", "two"]).await;

    assert!(app
        .service
        .delete_version(home.id(), versions[1], false, 0)
        .await
        .unwrap());

    let remaining: Vec<Uuid> = app
        .service
        .get_versions(home.id())
        .await
        .unwrap()
        .iter()
        .map(Content::version)
        .collect();
    assert_eq!(remaining, vec![versions[2], versions[0]]);
    assert!(app.service.get_by_version(versions[1]).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_version_with_prior_versions() {
    let app = TestApp::new();
    let (home, versions) = home_with_history(&app, &["one", "two", "three"]).await;
    let deleted = std::sync::Arc::new(parking_lot::Mutex::new(0));
    let count = deleted.clone();
    app.dispatcher.on(Tap::DeletedVersions, "count", 0, move |_| {
        *count.lock() += 1;
        TapVerdict::Allow
    });

    assert!(app
        .service
        .delete_version(home.id(), versions[2], true, 0)
        .await
        .unwrap());

    let remaining: Vec<Uuid> = app
        .service
        .get_versions(home.id())
        .await
        .unwrap()
        .iter()
        .map(Content::version)
        .collect();
    assert_eq!(remaining, vec![versions[3]]);
    assert_eq!(*deleted.lock(), 2);
}

#[tokio::test]
async fn pruning_keeps_the_current_and_published_versions() {
    let app = TestApp::new();
    let mut home = app.create_published("Home", ROOT_ID).await;
    let published = home.version();
    home.set_value("bodyText", "draft").unwrap();
    assert!(app.service.save(&mut home, 0).await.unwrap());
    home.set_value("bodyText", "newer draft").unwrap();
    assert!(app.service.save(&mut home, 0).await.unwrap());

    assert!(app
        .service
        .delete_versions(home.id(), Utc::now() + Duration::days(1), 0)
        .await
        .unwrap());

    let remaining: Vec<Uuid> = app
        .service
        .get_versions(home.id())
        .await
        .unwrap()
        .iter()
        .map(Content::version)
        .collect();
    assert_eq!(remaining, vec![home.version(), published]);
    assert_eq!(app.audit.entries_for(AuditType::Delete, ROOT_ID).len(), 1);
}

#[tokio::test]
async fn deleting_versions_handler_can_cancel() {
    let app = TestApp::new();
    let (home, _) = home_with_history(&app, &["one", "two"]).await;
    app.dispatcher
        .on(Tap::DeletingVersions, "keep-history", 0, |_| TapVerdict::Deny);

    assert!(!app
        .service
        .delete_versions(home.id(), Utc::now() + Duration::days(1), 0)
        .await
        .unwrap());
    assert_eq!(app.service.get_versions(home.id()).await.unwrap().len(), 3);
}
