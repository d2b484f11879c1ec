//! Content type registry.
//!
//! Holds content type definitions in memory for fast lookup by alias or id.
//! Definitions can be loaded from and persisted to the `content_type` table.

use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::models::content_type::ContentType;

/// Read access to content type definitions.
pub trait ContentTypeLookup: Send + Sync {
    fn get_by_alias(&self, alias: &str) -> Option<Arc<ContentType>>;

    fn get_by_id(&self, id: i32) -> Option<Arc<ContentType>>;
}

/// Registry of content types.
#[derive(Clone, Default)]
pub struct ContentTypeRegistry {
    inner: Arc<ContentTypeRegistryInner>,
}

#[derive(Default)]
struct ContentTypeRegistryInner {
    by_alias: DashMap<String, Arc<ContentType>>,
    by_id: DashMap<i32, Arc<ContentType>>,
}

impl ContentTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a content type in memory.
    pub fn register(&self, content_type: ContentType) -> Arc<ContentType> {
        let content_type = Arc::new(content_type);
        let stale_alias = self
            .inner
            .by_id
            .get(&content_type.id)
            .map(|previous| previous.alias.clone())
            .filter(|alias| *alias != content_type.alias);
        if let Some(alias) = stale_alias {
            self.inner.by_alias.remove(&alias);
        }
        self.inner
            .by_alias
            .insert(content_type.alias.clone(), content_type.clone());
        self.inner
            .by_id
            .insert(content_type.id, content_type.clone());
        content_type
    }

    /// All registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .inner
            .by_alias
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        aliases.sort();
        aliases
    }

    /// Load every stored definition into the registry.
    pub async fn load_from_db(&self, pool: &PgPool) -> Result<usize> {
        let rows: Vec<(i32, serde_json::Value)> =
            sqlx::query_as("SELECT id, definition FROM content_type ORDER BY id")
                .fetch_all(pool)
                .await
                .context("failed to load content types")?;

        let mut loaded = 0;
        for (id, definition) in rows {
            match serde_json::from_value::<ContentType>(definition) {
                Ok(content_type) => {
                    self.register(content_type);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(id, error = %e, "failed to parse content type definition");
                }
            }
        }

        info!(count = loaded, "content types loaded");
        Ok(loaded)
    }

    /// Store a definition and register it.
    pub async fn persist(&self, pool: &PgPool, content_type: ContentType) -> Result<Arc<ContentType>> {
        let definition =
            serde_json::to_value(&content_type).context("failed to serialize content type")?;

        sqlx::query(
            r#"
            INSERT INTO content_type (id, alias, name, definition)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                alias = EXCLUDED.alias,
                name = EXCLUDED.name,
                definition = EXCLUDED.definition
            "#,
        )
        .bind(content_type.id)
        .bind(&content_type.alias)
        .bind(&content_type.name)
        .bind(definition)
        .execute(pool)
        .await
        .context("failed to upsert content type")?;

        info!(alias = %content_type.alias, "registered content type");
        Ok(self.register(content_type))
    }
}

impl ContentTypeLookup for ContentTypeRegistry {
    fn get_by_alias(&self, alias: &str) -> Option<Arc<ContentType>> {
        self.inner.by_alias.get(alias).map(|r| r.clone())
    }

    fn get_by_id(&self, id: i32) -> Option<Arc<ContentType>> {
        self.inner.by_id.get(&id).map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_alias_and_id() {
        let registry = ContentTypeRegistry::new();
        registry.register(ContentType::new(1045, "textpage", "Textpage"));

        assert_eq!(
            registry.get_by_alias("textpage").map(|ct| ct.id),
            Some(1045)
        );
        assert_eq!(
            registry.get_by_id(1045).map(|ct| ct.alias.clone()),
            Some("textpage".to_string())
        );
        assert!(registry.get_by_alias("news").is_none());
    }

    #[test]
    fn re_registering_replaces_the_alias() {
        let registry = ContentTypeRegistry::new();
        registry.register(ContentType::new(1045, "textpage", "Textpage"));
        registry.register(ContentType::new(1045, "page", "Page"));

        assert!(registry.get_by_alias("textpage").is_none());
        assert!(registry.get_by_alias("page").is_some());
        assert_eq!(registry.aliases(), vec!["page".to_string()]);
    }
}
