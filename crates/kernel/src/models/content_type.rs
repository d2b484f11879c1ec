//! Content type model.
//!
//! A content type is the schema a content item conforms to: its property
//! groups, the property types inside them, and a default template. Content
//! items hold an `Arc<ContentType>` and never mutate it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Storage shape of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Short text.
    Text,
    /// Long text / rich text.
    TextLong,
    /// Whole number.
    Integer,
    /// True/false.
    Boolean,
    /// RFC 3339 date/time.
    Date,
    /// File upload; the value is the public URL of the stored file.
    Upload,
    /// Comma-separated tags.
    Tags,
}

/// A single property definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyType {
    /// Machine alias, unique within the content type.
    pub alias: String,

    /// Human readable label.
    pub name: String,

    /// Value storage shape.
    pub data_type: DataType,

    /// Whether a value is required for the item to be valid.
    #[serde(default)]
    pub mandatory: bool,

    /// Optional regular expression a non-empty text value must match.
    #[serde(default)]
    pub validation: Option<String>,
}

impl PropertyType {
    /// Create an optional property without validation.
    pub fn new(alias: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            alias: alias.into(),
            name: name.into(),
            data_type,
            mandatory: false,
            validation: None,
        }
    }

    /// Mark the property as mandatory.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Require non-empty values to match a regular expression.
    pub fn with_validation(mut self, pattern: impl Into<String>) -> Self {
        self.validation = Some(pattern.into());
        self
    }

    /// Check a value against this property type.
    pub fn is_valid(&self, value: &serde_json::Value) -> bool {
        if is_empty_value(value) {
            return !self.mandatory;
        }

        let shape_ok = match self.data_type {
            DataType::Integer => match value {
                serde_json::Value::Number(n) => n.is_i64() || n.is_u64(),
                serde_json::Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            DataType::Boolean => match value {
                serde_json::Value::Bool(_) => true,
                serde_json::Value::String(s) => matches!(s.as_str(), "0" | "1" | "true" | "false"),
                serde_json::Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
                _ => false,
            },
            DataType::Date => match value {
                serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
                _ => false,
            },
            DataType::Text | DataType::TextLong | DataType::Upload | DataType::Tags => {
                value.is_string()
            }
        };
        if !shape_ok {
            return false;
        }

        match (&self.validation, value.as_str()) {
            (Some(pattern), Some(text)) => match Regex::new(pattern) {
                Ok(re) => re.is_match(text),
                Err(e) => {
                    warn!(alias = %self.alias, pattern = %pattern, error = %e, "invalid validation pattern");
                    false
                }
            },
            _ => true,
        }
    }
}

/// Whether a value counts as "no value" for mandatory checks.
pub(crate) fn is_empty_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// A named group of property types (a tab in the editor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyGroup {
    pub name: String,
    pub property_types: Vec<PropertyType>,
}

/// Content type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentType {
    /// Numeric identifier.
    pub id: i32,

    /// Machine alias (e.g. "textpage").
    pub alias: String,

    /// Human readable name.
    pub name: String,

    /// Template alias used when an item does not pick one.
    #[serde(default)]
    pub default_template: Option<String>,

    /// Property groups in display order.
    #[serde(default)]
    pub property_groups: Vec<PropertyGroup>,
}

impl ContentType {
    /// Create an empty content type.
    pub fn new(id: i32, alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            alias: alias.into(),
            name: name.into(),
            default_template: None,
            property_groups: Vec::new(),
        }
    }

    /// Set the default template.
    pub fn with_default_template(mut self, template: impl Into<String>) -> Self {
        self.default_template = Some(template.into());
        self
    }

    /// Add a property group.
    pub fn with_group(mut self, name: impl Into<String>, property_types: Vec<PropertyType>) -> Self {
        self.property_groups.push(PropertyGroup {
            name: name.into(),
            property_types,
        });
        self
    }

    /// All property types across groups, in group order.
    pub fn property_types(&self) -> impl Iterator<Item = &PropertyType> {
        self.property_groups
            .iter()
            .flat_map(|g| g.property_types.iter())
    }

    /// Find a property type by alias.
    pub fn property_type(&self, alias: &str) -> Option<&PropertyType> {
        self.property_types().find(|p| p.alias == alias)
    }
}
