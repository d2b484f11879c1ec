//! Content models.

pub mod content;
pub mod content_type;
pub mod relation;
pub mod xml;

pub use content::{
    Content, ContentField, ContentStatus, Property, PublishedState, RECYCLE_BIN_ID,
    RECYCLE_BIN_PATH, ROOT_ID, ROOT_PATH,
};
pub use content_type::{ContentType, DataType, PropertyGroup, PropertyType};
pub use relation::{RELATE_DOCUMENT_ON_COPY, Relation};
pub use xml::{ContentXml, PreviewXml, serialize_content};
