//! Storage rows for content items.
//!
//! An item is stored as one node row (tree position and identity, shared by
//! every version) plus one version row per saved revision. The node name is
//! not versioned.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::content::{Content, Property, PublishedState};
use crate::models::content_type::ContentType;

/// Tree node row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeRecord {
    pub id: i32,
    pub unique_id: Uuid,
    pub name: String,
    pub parent_id: i32,
    pub path: String,
    pub level: i32,
    pub sort_order: i32,
    pub trashed: bool,
    pub content_type_id: i32,
    pub creator_id: i32,
    pub create_date: DateTime<Utc>,
}

/// Version row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VersionRecord {
    pub version_id: Uuid,
    pub node_id: i32,
    pub published: bool,
    pub published_state: String,
    pub writer_id: i32,
    pub update_date: DateTime<Utc>,
    pub release_date: Option<DateTime<Utc>>,
    pub expire_date: Option<DateTime<Utc>>,
    pub template: Option<String>,
    pub language: Option<String>,
    pub properties: serde_json::Value,
}

/// A node joined with one of its versions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContentRow {
    #[sqlx(flatten)]
    pub node: NodeRecord,
    #[sqlx(flatten)]
    pub version: VersionRecord,
}

impl NodeRecord {
    pub fn from_content(content: &Content) -> Self {
        Self {
            id: content.id,
            unique_id: content.key,
            name: content.name.clone(),
            parent_id: content.parent_id,
            path: content.path.clone(),
            level: content.level,
            sort_order: content.sort_order,
            trashed: content.trashed,
            content_type_id: content.content_type.id,
            creator_id: content.creator_id,
            create_date: content.create_date,
        }
    }
}

impl VersionRecord {
    pub fn from_content(content: &Content) -> anyhow::Result<Self> {
        Ok(Self {
            version_id: content.version,
            node_id: content.id,
            published: content.published,
            published_state: content.published_state.as_str().to_string(),
            writer_id: content.writer_id,
            update_date: content.update_date,
            release_date: content.release_date,
            expire_date: content.expire_date,
            template: content.template.clone(),
            language: content.language.clone(),
            properties: serde_json::to_value(&content.properties)?,
        })
    }
}

/// Rebuild an entity from its node row and one of its version rows.
///
/// The result is clean: no dirty bits are set.
pub fn to_content(
    node: &NodeRecord,
    version: &VersionRecord,
    content_type: Arc<ContentType>,
) -> anyhow::Result<Content> {
    let stored: Vec<Property> = serde_json::from_value(version.properties.clone())?;

    // Properties follow the content type; stored values fill them in.
    let mut properties: Vec<Property> = content_type
        .property_types()
        .map(|pt| {
            stored
                .iter()
                .find(|p| p.alias == pt.alias)
                .cloned()
                .unwrap_or_else(|| Property::new(pt.alias.clone()))
        })
        .collect();
    for property in &mut properties {
        property.dirty = false;
    }

    Ok(Content {
        id: node.id,
        key: node.unique_id,
        version: version.version_id,
        name: node.name.clone(),
        parent_id: node.parent_id,
        path: node.path.clone(),
        level: node.level,
        sort_order: node.sort_order,
        published: version.published,
        published_state: version.published_state.parse::<PublishedState>()?,
        trashed: node.trashed,
        release_date: version.release_date,
        expire_date: version.expire_date,
        creator_id: node.creator_id,
        writer_id: version.writer_id,
        create_date: node.create_date,
        update_date: version.update_date,
        template: version.template.clone(),
        language: version.language.clone(),
        content_type,
        properties,
        dirty: BTreeSet::new(),
    })
}
