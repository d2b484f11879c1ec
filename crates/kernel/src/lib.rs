//! Folio CMS Kernel Library
//!
//! Content lifecycle for a hierarchical CMS: creation, versioned saves,
//! publishing with ancestor checks, moves, copies, the recycle bin and
//! published/preview XML snapshots. The `folio` binary runs maintenance
//! operations against PostgreSQL.

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod file;
pub mod models;
pub mod persistence;
pub mod services;
pub mod tap;

pub use config::Config;
pub use content::{
    ContentService, ContentTypeLookup, ContentTypeRegistry, PublishOutcome, PublishStatus,
    PublishingStrategy,
};
pub use error::{ContentError, ContentResult};
pub use persistence::{ContentQuery, MemoryStore, PgUnitOfWorkProvider};
pub use services::{AuditService, AuditSink, AuditType, MemoryAuditLog, ScheduledPublishingService};
pub use tap::{ContentEvent, EventPayload, Tap, TapDispatcher, TapVerdict};
