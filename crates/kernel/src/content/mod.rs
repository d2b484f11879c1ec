//! Content management module.
//!
//! This module provides:
//! - ContentTypeRegistry: content type definitions by alias and id
//! - PublishingStrategy: publish and unpublish decisions
//! - ContentService: the content lifecycle with tap invocations

mod content_service;
mod publishing;
mod type_registry;

pub use content_service::ContentService;
pub use publishing::{PublishOutcome, PublishStatus, PublishingStrategy};
pub use type_registry::{ContentTypeLookup, ContentTypeRegistry};
