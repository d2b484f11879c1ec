//! XML snapshots of content items.
//!
//! Two snapshots exist per item: the published snapshot (one row per node,
//! replaced on every publish) and the preview snapshot (one row per
//! version). Both hold the same serialized form produced by
//! [`serialize_content`].

use std::io::Cursor;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::content::Content;

/// Published snapshot row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContentXml {
    pub node_id: i32,
    pub xml: String,
}

/// Preview snapshot row, keyed by node and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PreviewXml {
    pub node_id: i32,
    pub version_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub xml: String,
}

impl ContentXml {
    pub fn from_content(content: &Content) -> Result<Self> {
        Ok(Self {
            node_id: content.id(),
            xml: serialize_content(content)?,
        })
    }
}

impl PreviewXml {
    pub fn from_content(content: &Content) -> Result<Self> {
        Ok(Self {
            node_id: content.id(),
            version_id: content.version(),
            timestamp: Utc::now(),
            xml: serialize_content(content)?,
        })
    }
}

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Turn a content type alias into a valid XML element name.
pub fn element_name(alias: &str) -> String {
    let mut name: String = alias
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

/// URL segment derived from a node name.
pub fn url_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Serialize a content item to its snapshot XML.
///
/// The element is named after the content type alias and carries the node
/// metadata as attributes; every property becomes a child element.
pub fn serialize_content(content: &Content) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let tag = element_name(&content.content_type().alias);

    let id = content.id().to_string();
    let parent_id = content.parent_id().to_string();
    let level = content.level().to_string();
    let creator_id = content.creator_id().to_string();
    let writer_id = content.writer_id().to_string();
    let sort_order = content.sort_order().to_string();
    let create_date = content.create_date().format(DATE_FORMAT).to_string();
    let update_date = content.update_date().format(DATE_FORMAT).to_string();
    let url = url_name(content.name());
    let key = content.key().to_string();
    let version = content.version().to_string();
    let node_type = content.content_type().id.to_string();

    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("id", id.as_str()));
    start.push_attribute(("key", key.as_str()));
    start.push_attribute(("parentID", parent_id.as_str()));
    start.push_attribute(("level", level.as_str()));
    start.push_attribute(("creatorID", creator_id.as_str()));
    start.push_attribute(("writerID", writer_id.as_str()));
    start.push_attribute(("sortOrder", sort_order.as_str()));
    start.push_attribute(("createDate", create_date.as_str()));
    start.push_attribute(("updateDate", update_date.as_str()));
    start.push_attribute(("nodeName", content.name()));
    start.push_attribute(("urlName", url.as_str()));
    start.push_attribute(("path", content.path()));
    start.push_attribute(("version", version.as_str()));
    start.push_attribute(("nodeType", node_type.as_str()));
    start.push_attribute(("template", content.template().unwrap_or_default()));
    start.push_attribute(("isDoc", ""));

    writer
        .write_event(Event::Start(start))
        .context("failed to write content element")?;

    for property in content.properties() {
        let name = element_name(property.alias());
        writer
            .write_event(Event::Start(BytesStart::new(name.as_str())))
            .with_context(|| format!("failed to write property '{}'", property.alias()))?;

        match property.value() {
            serde_json::Value::Null => {}
            serde_json::Value::String(s) if s.contains("]]>") => {
                writer
                    .write_event(Event::Text(BytesText::new(s)))
                    .context("failed to write property text")?;
            }
            serde_json::Value::String(s) => {
                writer
                    .write_event(Event::CData(BytesCData::new(s.as_str())))
                    .context("failed to write property cdata")?;
            }
            other => {
                let text = other.to_string();
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .context("failed to write property text")?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new(name.as_str())))
            .context("failed to close property element")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(tag.as_str())))
        .context("failed to close content element")?;

    String::from_utf8(writer.into_inner().into_inner()).context("snapshot xml is not utf-8")
}
