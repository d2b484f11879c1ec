//! Kernel services around the content pipeline.
//!
//! Audit logging and scheduled publishing sit beside the content service
//! rather than inside it.

pub mod audit;
pub mod scheduled_publishing;

pub use audit::{AuditEntry, AuditService, AuditSink, AuditType, MemoryAuditLog};
pub use scheduled_publishing::{ScheduleReport, ScheduledPublishingService};
