//! PostgreSQL-backed unit of work.
//!
//! A unit of work wraps one transaction. Node rows hold the tree position;
//! version rows hold everything else, with `newest` marking the current
//! version of each node.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{
    Alias, Asterisk, Expr, ExprTrait, JoinType, Order, PostgresQueryBuilder, Query,
    SelectStatement,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::query::ContentQuery;
use super::records::{ContentRow, NodeRecord, VersionRecord, to_content};
use super::{ContentRepository, UnitOfWork, UnitOfWorkProvider, place_moved, place_new};
use crate::content::ContentTypeLookup;
use crate::models::content::{Content, PublishedState, RECYCLE_BIN_PATH};
use crate::models::relation::Relation;
use crate::models::xml::{ContentXml, PreviewXml};

const VERSION_COLUMNS: [&str; 11] = [
    "version_id",
    "node_id",
    "published",
    "published_state",
    "writer_id",
    "update_date",
    "release_date",
    "expire_date",
    "template",
    "language",
    "properties",
];

const SELECT_ROWS: &str = r#"
    SELECT n.*, v.version_id, v.node_id, v.published, v.published_state, v.writer_id,
           v.update_date, v.release_date, v.expire_date, v.template, v.language, v.properties
    FROM content_node n
    JOIN content_version v ON v.node_id = n.id
"#;

/// [`UnitOfWorkProvider`] over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgUnitOfWorkProvider {
    pool: PgPool,
    content_types: Arc<dyn ContentTypeLookup>,
}

impl PgUnitOfWorkProvider {
    pub fn new(pool: PgPool, content_types: Arc<dyn ContentTypeLookup>) -> Self {
        Self {
            pool,
            content_types,
        }
    }
}

#[async_trait]
impl UnitOfWorkProvider for PgUnitOfWorkProvider {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to start transaction")?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            content_types: self.content_types.clone(),
        }))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    content_types: Arc<dyn ContentTypeLookup>,
}

fn col(table: &str, column: &str) -> (Alias, Alias) {
    (Alias::new(table), Alias::new(column))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Apply the query criteria to a select over `content_node n` joined with
/// the newest `content_version v`.
fn add_filters(select: &mut SelectStatement, query: &ContentQuery) {
    if let Some(id) = query.id {
        select.and_where(Expr::col(col("n", "id")).eq(id));
    }
    if let Some(key) = query.key {
        select.and_where(Expr::col(col("n", "unique_id")).eq(key));
    }
    if let Some(parent_id) = query.parent_id {
        select.and_where(Expr::col(col("n", "parent_id")).eq(parent_id));
    }
    if let Some(level) = query.level {
        select.and_where(Expr::col(col("n", "level")).eq(level));
    }
    if let Some(type_id) = query.content_type_id {
        select.and_where(Expr::col(col("n", "content_type_id")).eq(type_id));
    }
    if let Some(prefix) = query.descendant_prefix() {
        select.and_where(Expr::col(col("n", "path")).like(format!("{}%", escape_like(&prefix))));
    }
    if let Some(in_bin) = query.in_recycle_bin {
        let pattern = format!("{}%", escape_like(&format!("{RECYCLE_BIN_PATH},")));
        if in_bin {
            select.and_where(Expr::col(col("n", "path")).like(pattern));
        } else {
            select.and_where(Expr::col(col("n", "path")).not_like(pattern));
        }
    }
    if let Some(ref needle) = query.name_contains {
        select.and_where(Expr::cust_with_values(
            "n.name ILIKE $1",
            [format!("%{}%", escape_like(needle))],
        ));
    }
    if let Some(published) = query.published {
        select.and_where(Expr::col(col("v", "published")).eq(published));
    }
    if let Some(trashed) = query.trashed {
        select.and_where(Expr::col(col("n", "trashed")).eq(trashed));
    }
    if let Some(at) = query.release_before {
        select.and_where(Expr::col(col("v", "release_date")).lte(at));
    }
    if let Some(at) = query.expire_before {
        select.and_where(Expr::col(col("v", "expire_date")).lte(at));
    }
    if let Some(id) = query.exclude_id {
        select.and_where(Expr::col(col("n", "id")).ne(id));
    }
    if let Some(has) = query.has_published_version {
        let published = Query::select()
            .expr(Expr::val(1))
            .from_as(Alias::new("content_version"), Alias::new("pv"))
            .and_where(Expr::col(col("pv", "node_id")).equals(col("n", "id")))
            .and_where(Expr::col(col("pv", "published")).eq(true))
            .take();
        let exists = Expr::exists(published);
        select.and_where(if has { exists } else { exists.not() });
    }
}

fn base_select() -> SelectStatement {
    let mut select = Query::select();
    select
        .from_as(Alias::new("content_node"), Alias::new("n"))
        .join_as(
            JoinType::InnerJoin,
            Alias::new("content_version"),
            Alias::new("v"),
            Expr::col(col("v", "node_id"))
                .equals(col("n", "id"))
                .and(Expr::col(col("v", "newest")).eq(true)),
        );
    select
}

fn build_select(query: &ContentQuery) -> String {
    let mut select = base_select();
    select
        .column((Alias::new("n"), Asterisk))
        .columns(VERSION_COLUMNS.iter().map(|c| col("v", c)));
    add_filters(&mut select, query);
    select
        .order_by(col("n", "level"), Order::Asc)
        .order_by(col("n", "sort_order"), Order::Asc)
        .order_by(col("n", "id"), Order::Asc);
    select.to_string(PostgresQueryBuilder)
}

fn build_count(query: &ContentQuery) -> String {
    let mut select = base_select();
    select.expr(Expr::col(Asterisk).count());
    add_filters(&mut select, query);
    select.to_string(PostgresQueryBuilder)
}

impl PgUnitOfWork {
    fn hydrate(&self, row: ContentRow) -> Result<Content> {
        let content_type = self
            .content_types
            .get_by_id(row.node.content_type_id)
            .with_context(|| format!("unknown content type id {}", row.node.content_type_id))?;
        to_content(&row.node, &row.version, content_type)
    }

    fn hydrate_all(&self, rows: Vec<ContentRow>) -> Result<Vec<Content>> {
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    async fn next_value(&mut self, sequence: &str) -> Result<i32> {
        let sql = format!("SELECT nextval('{sequence}')::int");
        sqlx::query_scalar::<_, i32>(&sql)
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("failed to draw from {sequence}"))
    }
}

#[async_trait]
impl ContentRepository for PgUnitOfWork {
    async fn get(&mut self, id: i32) -> Result<Option<Content>> {
        let mut items = self.get_by_query(&ContentQuery::new().id(id)).await?;
        Ok(items.pop())
    }

    async fn get_by_query(&mut self, query: &ContentQuery) -> Result<Vec<Content>> {
        let sql = build_select(query);
        let rows = sqlx::query_as::<_, ContentRow>(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .context("failed to query content")?;
        self.hydrate_all(rows)
    }

    async fn count(&mut self, query: &ContentQuery) -> Result<usize> {
        let sql = build_count(query);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to count content")?;
        Ok(count as usize)
    }

    async fn add_or_update(&mut self, content: &mut Content) -> Result<()> {
        let now = Utc::now();

        if content.has_identity() {
            place_moved(&mut *self, content).await?;
        } else {
            content.id = self.next_value("content_node_id_seq").await?;
            place_new(&mut *self, content, now).await?;
        }

        content.version = Uuid::now_v7();
        content.update_date = now;
        let mut property_ids = Vec::new();
        for property in content.properties.iter().filter(|p| p.id == 0) {
            property_ids.push((property.alias.clone(), self.next_value("content_property_id_seq").await?));
        }
        for (alias, id) in property_ids {
            if let Some(property) = content.properties.iter_mut().find(|p| p.alias == alias) {
                property.id = id;
            }
        }

        let node = NodeRecord::from_content(content);
        let version = VersionRecord::from_content(content)?;

        sqlx::query(
            r#"
            INSERT INTO content_node (id, unique_id, name, parent_id, path, level, sort_order, trashed, content_type_id, creator_id, create_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                parent_id = EXCLUDED.parent_id,
                path = EXCLUDED.path,
                level = EXCLUDED.level,
                sort_order = EXCLUDED.sort_order,
                trashed = EXCLUDED.trashed,
                content_type_id = EXCLUDED.content_type_id
            "#,
        )
        .bind(node.id)
        .bind(node.unique_id)
        .bind(&node.name)
        .bind(node.parent_id)
        .bind(&node.path)
        .bind(node.level)
        .bind(node.sort_order)
        .bind(node.trashed)
        .bind(node.content_type_id)
        .bind(node.creator_id)
        .bind(node.create_date)
        .execute(&mut *self.tx)
        .await
        .context("failed to upsert content node")?;

        if content.published || content.published_state == PublishedState::Unpublished {
            sqlx::query("UPDATE content_version SET published = FALSE WHERE node_id = $1")
                .bind(node.id)
                .execute(&mut *self.tx)
                .await
                .context("failed to clear published versions")?;
        }

        sqlx::query("UPDATE content_version SET newest = FALSE WHERE node_id = $1")
            .bind(node.id)
            .execute(&mut *self.tx)
            .await
            .context("failed to clear newest version")?;

        sqlx::query(
            r#"
            INSERT INTO content_version (version_id, node_id, published, published_state, writer_id, update_date, release_date, expire_date, template, language, properties, newest)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE)
            "#,
        )
        .bind(version.version_id)
        .bind(version.node_id)
        .bind(version.published)
        .bind(&version.published_state)
        .bind(version.writer_id)
        .bind(version.update_date)
        .bind(version.release_date)
        .bind(version.expire_date)
        .bind(&version.template)
        .bind(&version.language)
        .bind(&version.properties)
        .execute(&mut *self.tx)
        .await
        .context("failed to insert content version")?;

        Ok(())
    }

    async fn delete(&mut self, id: i32) -> Result<()> {
        for sql in [
            "DELETE FROM relation WHERE parent_id = $1 OR child_id = $1",
            "DELETE FROM preview_xml WHERE node_id = $1",
            "DELETE FROM content_xml WHERE node_id = $1",
            "DELETE FROM content_version WHERE node_id = $1",
            "DELETE FROM content_node WHERE id = $1",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("failed to delete content {id}"))?;
        }
        Ok(())
    }

    async fn get_all_versions(&mut self, id: i32) -> Result<Vec<Content>> {
        let sql = format!("{SELECT_ROWS} WHERE n.id = $1 ORDER BY v.update_date DESC");
        let rows = sqlx::query_as::<_, ContentRow>(&sql)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await
            .context("failed to load versions")?;
        self.hydrate_all(rows)
    }

    async fn get_by_version(&mut self, version: Uuid) -> Result<Option<Content>> {
        let sql = format!("{SELECT_ROWS} WHERE v.version_id = $1");
        let row = sqlx::query_as::<_, ContentRow>(&sql)
            .bind(version)
            .fetch_optional(&mut *self.tx)
            .await
            .context("failed to load version")?;
        row.map(|row| self.hydrate(row)).transpose()
    }

    async fn get_published_version(&mut self, id: i32) -> Result<Option<Content>> {
        let sql = format!("{SELECT_ROWS} WHERE n.id = $1 AND v.published");
        let row = sqlx::query_as::<_, ContentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("failed to load published version")?;
        row.map(|row| self.hydrate(row)).transpose()
    }

    async fn has_published_version(&mut self, id: i32) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM content_version WHERE node_id = $1 AND published)",
        )
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await
        .context("failed to check published version")
    }

    async fn delete_version(&mut self, id: i32, version: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM preview_xml WHERE node_id = $1 AND version_id = $2")
            .bind(id)
            .bind(version)
            .execute(&mut *self.tx)
            .await
            .context("failed to delete preview xml")?;
        sqlx::query("DELETE FROM content_version WHERE node_id = $1 AND version_id = $2")
            .bind(id)
            .bind(version)
            .execute(&mut *self.tx)
            .await
            .context("failed to delete version")?;
        Ok(())
    }

    async fn delete_versions_before(&mut self, id: i32, before: DateTime<Utc>) -> Result<u64> {
        sqlx::query(
            r#"
            DELETE FROM preview_xml WHERE node_id = $1 AND version_id IN (
                SELECT version_id FROM content_version
                WHERE node_id = $1 AND update_date < $2 AND NOT newest AND NOT published
            )
            "#,
        )
        .bind(id)
        .bind(before)
        .execute(&mut *self.tx)
        .await
        .context("failed to prune preview xml")?;

        let result = sqlx::query(
            "DELETE FROM content_version WHERE node_id = $1 AND update_date < $2 AND NOT newest AND NOT published",
        )
        .bind(id)
        .bind(before)
        .execute(&mut *self.tx)
        .await
        .context("failed to prune versions")?;
        Ok(result.rows_affected())
    }

    async fn upsert_content_xml(&mut self, xml: &ContentXml) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_xml (node_id, xml) VALUES ($1, $2)
            ON CONFLICT (node_id) DO UPDATE SET xml = EXCLUDED.xml
            "#,
        )
        .bind(xml.node_id)
        .bind(&xml.xml)
        .execute(&mut *self.tx)
        .await
        .context("failed to upsert content xml")?;
        Ok(())
    }

    async fn get_content_xml(&mut self, id: i32) -> Result<Option<ContentXml>> {
        sqlx::query_as::<_, ContentXml>("SELECT node_id, xml FROM content_xml WHERE node_id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("failed to load content xml")
    }

    async fn delete_content_xml(&mut self, id: i32) -> Result<()> {
        sqlx::query("DELETE FROM content_xml WHERE node_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("failed to delete content xml")?;
        Ok(())
    }

    async fn upsert_preview_xml(&mut self, xml: &PreviewXml) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preview_xml (node_id, version_id, timestamp, xml) VALUES ($1, $2, $3, $4)
            ON CONFLICT (node_id, version_id) DO UPDATE SET timestamp = EXCLUDED.timestamp, xml = EXCLUDED.xml
            "#,
        )
        .bind(xml.node_id)
        .bind(xml.version_id)
        .bind(xml.timestamp)
        .bind(&xml.xml)
        .execute(&mut *self.tx)
        .await
        .context("failed to upsert preview xml")?;
        Ok(())
    }

    async fn get_preview_xml(&mut self, id: i32, version: Uuid) -> Result<Option<PreviewXml>> {
        sqlx::query_as::<_, PreviewXml>(
            "SELECT node_id, version_id, timestamp, xml FROM preview_xml WHERE node_id = $1 AND version_id = $2",
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&mut *self.tx)
        .await
        .context("failed to load preview xml")
    }

    async fn add_relation(&mut self, relation: &Relation) -> Result<()> {
        sqlx::query(
            "INSERT INTO relation (parent_id, child_id, relation_type, created) VALUES ($1, $2, $3, $4)",
        )
        .bind(relation.parent_id)
        .bind(relation.child_id)
        .bind(&relation.relation_type)
        .bind(relation.created)
        .execute(&mut *self.tx)
        .await
        .context("failed to insert relation")?;
        Ok(())
    }

    async fn get_relations(&mut self, id: i32) -> Result<Vec<Relation>> {
        sqlx::query_as::<_, Relation>(
            r#"
            SELECT parent_id, child_id, relation_type, created FROM relation
            WHERE parent_id = $1 OR child_id = $1
            ORDER BY created
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .context("failed to load relations")
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_joins_newest_version_in_tree_order() {
        let sql = build_select(&ContentQuery::new().parent_id(1046));
        assert!(sql.contains(r#"FROM "content_node" AS "n""#));
        assert!(sql.contains(r#""v"."newest" = TRUE"#));
        assert!(sql.contains(r#""n"."parent_id" = 1046"#));
        assert!(sql.contains(r#"ORDER BY "n"."level" ASC"#));
    }

    #[test]
    fn descendant_filter_uses_path_prefix() {
        let sql = build_count(&ContentQuery::new().descendants_of("-1,1046"));
        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains(r#""n"."path" LIKE '-1,1046,%'"#));
    }

    #[test]
    fn published_version_filter_is_an_exists_subquery() {
        let sql = build_count(&ContentQuery::new().has_published_version(false));
        assert!(sql.contains("NOT EXISTS"));
        assert!(sql.contains(r#""pv"."published" = TRUE"#));
    }
}
