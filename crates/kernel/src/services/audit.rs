//! Audit logging.
//!
//! Records content lifecycle actions. Writing an entry never fails the
//! operation being audited: sinks log their own errors and move on.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};

/// Kind of audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    New,
    Save,
    Delete,
    Publish,
    SendToPublish,
    UnPublish,
    Move,
    Copy,
    RollBack,
}

impl AuditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditType::New => "new",
            AuditType::Save => "save",
            AuditType::Delete => "delete",
            AuditType::Publish => "publish",
            AuditType::SendToPublish => "send_to_publish",
            AuditType::UnPublish => "unpublish",
            AuditType::Move => "move",
            AuditType::Copy => "copy",
            AuditType::RollBack => "rollback",
        }
    }
}

impl fmt::Display for AuditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_type: AuditType,
    pub message: String,
    pub user_id: i32,
    pub entity_id: i32,
    pub created: DateTime<Utc>,
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an action. Failures are logged, never returned.
    async fn add(&self, audit_type: AuditType, message: &str, user_id: i32, entity_id: i32);
}

/// Audit sink backed by the `audit_log` table.
#[derive(Clone)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    /// Create a new audit service.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write an entry, returning storage errors.
    pub async fn record(
        &self,
        audit_type: AuditType,
        message: &str,
        user_id: i32,
        entity_id: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (audit_type, message, user_id, entity_id, created)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(audit_type.as_str())
        .bind(message)
        .bind(user_id)
        .bind(entity_id)
        .execute(&self.pool)
        .await
        .context("failed to write audit log")?;

        debug!(
            audit_type = %audit_type,
            entity_id,
            user_id,
            "audit log entry created"
        );

        Ok(())
    }

    /// Cleanup old audit log entries beyond retention period.
    pub async fn cleanup(&self, retention_days: i64) -> Result<u64> {
        let cutoff = retention_cutoff(Utc::now(), retention_days);

        let result = sqlx::query("DELETE FROM audit_log WHERE created < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to cleanup audit log")?;

        Ok(result.rows_affected())
    }
}

fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
    now - Duration::days(retention_days)
}

#[async_trait]
impl AuditSink for AuditService {
    async fn add(&self, audit_type: AuditType, message: &str, user_id: i32, entity_id: i32) {
        if let Err(e) = self.record(audit_type, message, user_id, entity_id).await {
            warn!(audit_type = %audit_type, entity_id, error = %e, "failed to write audit entry");
        }
    }
}

impl fmt::Debug for AuditService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditService").finish()
    }
}

/// Audit sink that keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Entries of one type for one entity.
    pub fn entries_for(&self, audit_type: AuditType, entity_id: i32) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.audit_type == audit_type && e.entity_id == entity_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn add(&self, audit_type: AuditType, message: &str, user_id: i32, entity_id: i32) {
        self.entries.lock().push(AuditEntry {
            audit_type,
            message: message.to_string(),
            user_id,
            entity_id,
            created: Utc::now(),
        });
    }
}
