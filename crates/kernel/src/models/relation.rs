//! Relations between content items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relation type alias recorded when a copy is related to its original.
pub const RELATE_DOCUMENT_ON_COPY: &str = "relateDocumentOnCopy";

/// A directed, typed link from one item to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Relation {
    pub parent_id: i32,
    pub child_id: i32,
    pub relation_type: String,
    pub created: DateTime<Utc>,
}

impl Relation {
    pub fn new(parent_id: i32, child_id: i32, relation_type: impl Into<String>) -> Self {
        Self {
            parent_id,
            child_id,
            relation_type: relation_type.into(),
            created: Utc::now(),
        }
    }
}
