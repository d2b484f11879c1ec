//! Content item model.
//!
//! Content items are the core records of the tree: every page, folder and
//! article is one. An item carries its tree position (`parent_id`, `path`,
//! `level`, `sort_order`), its lifecycle flags (`published`,
//! `published_state`, `trashed`), and a property collection shaped by its
//! [`ContentType`].
//!
//! Every setter records a dirty bit for the field it changes; repositories
//! read those bits and the service clears them after a successful commit.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ContentError, ContentResult};
use crate::models::content_type::ContentType;

/// Id of the synthetic tree root.
pub const ROOT_ID: i32 = -1;

/// Id of the recycle bin node.
pub const RECYCLE_BIN_ID: i32 = -20;

/// Path of the synthetic tree root.
pub const ROOT_PATH: &str = "-1";

/// Path of the recycle bin node.
pub const RECYCLE_BIN_PATH: &str = "-1,-20";

/// Last publishing transition of an item.
///
/// `Saved` means the item was published and has since been edited without
/// being republished; its `published` flag is false but an older version is
/// still live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishedState {
    Published,
    Saved,
    Unpublished,
}

impl PublishedState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Saved => "saved",
            Self::Unpublished => "unpublished",
        }
    }
}

impl FromStr for PublishedState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(Self::Published),
            "saved" => Ok(Self::Saved),
            "unpublished" => Ok(Self::Unpublished),
            other => anyhow::bail!("unknown published state '{other}'"),
        }
    }
}

/// Derived display status, evaluated in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStatus {
    Trashed,
    Expired,
    AwaitingRelease,
    Published,
    Unpublished,
}

/// Tracked entity fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentField {
    Key,
    Version,
    Name,
    ParentId,
    Path,
    Level,
    SortOrder,
    Published,
    Trashed,
    ReleaseDate,
    ExpireDate,
    CreatorId,
    WriterId,
    Template,
    Language,
}

/// A property value on a content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    /// Storage identifier (0 until persisted).
    #[serde(default)]
    pub(crate) id: i32,

    pub(crate) alias: String,

    #[serde(default)]
    pub(crate) value: serde_json::Value,

    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl Property {
    pub(crate) fn new(alias: impl Into<String>) -> Self {
        Self {
            id: 0,
            alias: alias.into(),
            value: serde_json::Value::Null,
            dirty: false,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Content item.
#[derive(Debug, Clone)]
pub struct Content {
    pub(crate) id: i32,
    pub(crate) key: Uuid,
    pub(crate) version: Uuid,
    pub(crate) name: String,
    pub(crate) parent_id: i32,
    pub(crate) path: String,
    pub(crate) level: i32,
    pub(crate) sort_order: i32,
    pub(crate) published: bool,
    pub(crate) published_state: PublishedState,
    pub(crate) trashed: bool,
    pub(crate) release_date: Option<DateTime<Utc>>,
    pub(crate) expire_date: Option<DateTime<Utc>>,
    pub(crate) creator_id: i32,
    pub(crate) writer_id: i32,
    pub(crate) create_date: DateTime<Utc>,
    pub(crate) update_date: DateTime<Utc>,
    pub(crate) template: Option<String>,
    pub(crate) language: Option<String>,
    pub(crate) content_type: Arc<ContentType>,
    pub(crate) properties: Vec<Property>,
    pub(crate) dirty: BTreeSet<ContentField>,
}

fn track<T: PartialEq>(
    dirty: &mut BTreeSet<ContentField>,
    field: ContentField,
    slot: &mut T,
    value: T,
) {
    if *slot != value {
        *slot = value;
        dirty.insert(field);
    }
}

/// A date of `None` or the minimum representable date means "no constraint".
fn effective_date(date: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    date.filter(|d| *d > DateTime::<Utc>::MIN_UTC)
}

impl Content {
    /// Create a new, unsaved item under `parent_id`.
    ///
    /// The item has no identity and no path until a repository persists it.
    pub fn new(name: impl Into<String>, parent_id: i32, content_type: Arc<ContentType>) -> Self {
        let now = Utc::now();
        let properties = content_type
            .property_types()
            .map(|pt| Property::new(pt.alias.clone()))
            .collect();

        let mut dirty = BTreeSet::new();
        dirty.insert(ContentField::Name);
        dirty.insert(ContentField::ParentId);

        Self {
            id: 0,
            key: Uuid::nil(),
            version: Uuid::now_v7(),
            name: name.into(),
            parent_id,
            path: String::new(),
            level: 0,
            sort_order: 0,
            published: false,
            published_state: PublishedState::Unpublished,
            trashed: false,
            release_date: None,
            expire_date: None,
            creator_id: 0,
            writer_id: 0,
            create_date: now,
            update_date: now,
            template: None,
            language: None,
            content_type,
            properties,
            dirty,
        }
    }

    /// Whether the item has been persisted.
    pub fn has_identity(&self) -> bool {
        self.id > 0
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn version(&self) -> Uuid {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> i32 {
        self.parent_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn sort_order(&self) -> i32 {
        self.sort_order
    }

    pub fn published(&self) -> bool {
        self.published
    }

    pub fn published_state(&self) -> PublishedState {
        self.published_state
    }

    pub fn trashed(&self) -> bool {
        self.trashed
    }

    pub fn release_date(&self) -> Option<DateTime<Utc>> {
        self.release_date
    }

    pub fn expire_date(&self) -> Option<DateTime<Utc>> {
        self.expire_date
    }

    pub fn creator_id(&self) -> i32 {
        self.creator_id
    }

    pub fn writer_id(&self) -> i32 {
        self.writer_id
    }

    pub fn create_date(&self) -> DateTime<Utc> {
        self.create_date
    }

    pub fn update_date(&self) -> DateTime<Utc> {
        self.update_date
    }

    /// Explicit template, falling back to the content type default.
    pub fn template(&self) -> Option<&str> {
        self.template
            .as_deref()
            .or(self.content_type.default_template.as_deref())
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn content_type(&self) -> &Arc<ContentType> {
        &self.content_type
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        track(&mut self.dirty, ContentField::Name, &mut self.name, name.into());
    }

    pub fn set_parent_id(&mut self, parent_id: i32) {
        track(&mut self.dirty, ContentField::ParentId, &mut self.parent_id, parent_id);
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        track(&mut self.dirty, ContentField::Path, &mut self.path, path.into());
    }

    pub fn set_level(&mut self, level: i32) {
        track(&mut self.dirty, ContentField::Level, &mut self.level, level);
    }

    pub fn set_sort_order(&mut self, sort_order: i32) {
        track(&mut self.dirty, ContentField::SortOrder, &mut self.sort_order, sort_order);
    }

    pub fn set_release_date(&mut self, date: Option<DateTime<Utc>>) {
        track(&mut self.dirty, ContentField::ReleaseDate, &mut self.release_date, date);
    }

    pub fn set_expire_date(&mut self, date: Option<DateTime<Utc>>) {
        track(&mut self.dirty, ContentField::ExpireDate, &mut self.expire_date, date);
    }

    pub fn set_creator_id(&mut self, user_id: i32) {
        track(&mut self.dirty, ContentField::CreatorId, &mut self.creator_id, user_id);
    }

    pub fn set_writer_id(&mut self, user_id: i32) {
        track(&mut self.dirty, ContentField::WriterId, &mut self.writer_id, user_id);
    }

    pub fn set_template(&mut self, template: Option<String>) {
        track(&mut self.dirty, ContentField::Template, &mut self.template, template);
    }

    pub fn set_language(&mut self, language: Option<String>) {
        track(&mut self.dirty, ContentField::Language, &mut self.language, language);
    }

    /// Re-anchor the item under a parent path, keeping `level` in step.
    pub fn place_under(&mut self, parent_path: &str) {
        let path = format!("{parent_path},{}", self.id);
        let level = path.split(',').count() as i32 - 1;
        self.set_path(path);
        self.set_level(level);
    }

    /// Record a publishing transition.
    ///
    /// Only the two flags change; cascading to other items is the caller's job.
    pub fn change_published_state(&mut self, state: PublishedState) {
        track(
            &mut self.dirty,
            ContentField::Published,
            &mut self.published,
            state == PublishedState::Published,
        );
        self.published_state = state;
    }

    /// Move the item in or out of the recycle bin.
    ///
    /// Trashing always parents the item to the recycle bin; restoring parents
    /// it to `parent_id`. A published item that is trashed becomes
    /// unpublished. Descendants are not touched.
    pub fn change_trashed_state(&mut self, is_trashed: bool, parent_id: i32) {
        track(&mut self.dirty, ContentField::Trashed, &mut self.trashed, is_trashed);

        if is_trashed {
            self.set_parent_id(RECYCLE_BIN_ID);
        } else {
            self.set_parent_id(parent_id);
        }

        if is_trashed && self.published {
            self.change_published_state(PublishedState::Unpublished);
        }
    }

    /// Copy the item as a brand new entity.
    ///
    /// The copy has no identity, an empty key (assigned on first save) and a
    /// fresh version; property values are copied with their identity reset.
    pub fn clone_as_new(&self) -> Self {
        let mut clone = self.clone();
        clone.id = 0;
        clone.key = Uuid::nil();
        clone.version = Uuid::now_v7();
        for property in &mut clone.properties {
            property.id = 0;
            property.dirty = true;
        }
        clone.dirty = [
            ContentField::Key,
            ContentField::Version,
            ContentField::Name,
            ContentField::ParentId,
        ]
        .into_iter()
        .collect();
        clone
    }

    /// Whether any tracked field or property value changed since the last persist.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.properties.iter().any(|p| p.dirty)
    }

    /// Whether a specific tracked field changed since the last persist.
    pub fn is_field_dirty(&self, field: ContentField) -> bool {
        self.dirty.contains(&field)
    }

    /// Whether the value of a property changed since the last persist.
    pub fn is_value_dirty(&self, alias: &str) -> bool {
        self.properties.iter().any(|p| p.alias == alias && p.dirty)
    }

    /// Tracked fields changed since the last persist.
    pub fn dirty_fields(&self) -> impl Iterator<Item = ContentField> + '_ {
        self.dirty.iter().copied()
    }

    /// Clear all dirty bits. Called after a successful commit.
    pub fn reset_dirty(&mut self) {
        self.dirty.clear();
        for property in &mut self.properties {
            property.dirty = false;
        }
    }

    /// Status as of now.
    pub fn status(&self) -> ContentStatus {
        self.status_at(Utc::now())
    }

    /// Status as of `now`: Trashed > Expired > AwaitingRelease > Published > Unpublished.
    pub fn status_at(&self, now: DateTime<Utc>) -> ContentStatus {
        if self.trashed {
            return ContentStatus::Trashed;
        }
        if effective_date(self.expire_date).is_some_and(|d| now > d) {
            return ContentStatus::Expired;
        }
        if effective_date(self.release_date).is_some_and(|d| d > now) {
            return ContentStatus::AwaitingRelease;
        }
        if self.published {
            return ContentStatus::Published;
        }
        ContentStatus::Unpublished
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, alias: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.alias == alias)
    }

    /// Current value of a property.
    pub fn value(&self, alias: &str) -> Option<&serde_json::Value> {
        self.property(alias).map(|p| &p.value)
    }

    /// Set a property value.
    ///
    /// The alias must be defined by the content type.
    pub fn set_value(
        &mut self,
        alias: &str,
        value: impl Into<serde_json::Value>,
    ) -> ContentResult<()> {
        if self.content_type.property_type(alias).is_none() {
            return Err(ContentError::UnknownProperty {
                content_type: self.content_type.alias.clone(),
                alias: alias.to_string(),
            });
        }

        let value = value.into();
        match self.properties.iter_mut().find(|p| p.alias == alias) {
            Some(property) => {
                if property.value != value {
                    property.value = value;
                    property.dirty = true;
                }
            }
            None => {
                let mut property = Property::new(alias);
                property.value = value;
                property.dirty = true;
                self.properties.push(property);
            }
        }
        Ok(())
    }

    /// Aliases of properties whose values fail validation.
    pub fn invalid_properties(&self) -> Vec<&str> {
        self.content_type
            .property_types()
            .filter(|pt| {
                let value = self.value(&pt.alias).unwrap_or(&serde_json::Value::Null);
                !pt.is_valid(value)
            })
            .map(|pt| pt.alias.as_str())
            .collect()
    }

    /// Whether every property value passes validation.
    pub fn is_valid(&self) -> bool {
        self.invalid_properties().is_empty()
    }

    /// Ids along the path, root first.
    pub fn path_ids(&self) -> ContentResult<Vec<i32>> {
        self.path
            .split(',')
            .map(|segment| {
                segment
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| ContentError::InvalidPath(self.path.clone()))
            })
            .collect()
    }

    /// Whether the item is in the recycle bin, directly or through an ancestor.
    pub fn is_in_recycle_bin(&self) -> bool {
        self.trashed
            || self
                .path
                .split(',')
                .any(|segment| segment.trim() == RECYCLE_BIN_ID.to_string())
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::content_type::{DataType, PropertyType};
    use chrono::Duration;

    fn textpage() -> Arc<ContentType> {
        Arc::new(
            ContentType::new(1045, "textpage", "Textpage")
                .with_default_template("Textpage")
                .with_group(
                    "Content",
                    vec![
                        PropertyType::new("title", "Title", DataType::Text).mandatory(),
                        PropertyType::new("bodyText", "Body", DataType::TextLong),
                    ],
                ),
        )
    }

    fn persisted(name: &str) -> Content {
        let mut content = Content::new(name, ROOT_ID, textpage());
        content.id = 1046;
        content.key = Uuid::now_v7();
        content.path = "-1,1046".to_string();
        content.level = 1;
        content.set_value("title", "Home").unwrap();
        content.reset_dirty();
        content
    }

    #[test]
    fn new_content_has_no_identity() {
        let content = Content::new("Home", ROOT_ID, textpage());
        assert!(!content.has_identity());
        assert!(content.key().is_nil());
        assert!(content.is_dirty());
        assert_eq!(content.published_state(), PublishedState::Unpublished);
        assert_eq!(content.template(), Some("Textpage"));
        assert_eq!(content.properties().len(), 2);
    }

    #[test]
    fn setters_only_dirty_on_change() {
        let mut content = persisted("Home");
        assert!(!content.is_dirty());

        content.set_name("Home");
        assert!(!content.is_dirty());

        content.set_name("Start");
        assert!(content.is_field_dirty(ContentField::Name));

        content.reset_dirty();
        content.set_value("bodyText", "<p>Hi</p>").unwrap();
        assert!(content.is_value_dirty("bodyText"));
        assert!(!content.is_value_dirty("title"));
        assert!(content.is_dirty());
    }

    #[test]
    fn unknown_property_is_an_error() {
        let mut content = persisted("Home");
        let err = content.set_value("nope", "x").unwrap_err();
        assert!(matches!(err, ContentError::UnknownProperty { .. }));
    }

    #[test]
    fn change_published_state_sets_both_flags() {
        let mut content = persisted("Home");

        content.change_published_state(PublishedState::Published);
        assert!(content.published());
        assert!(content.is_field_dirty(ContentField::Published));

        content.change_published_state(PublishedState::Saved);
        assert!(!content.published());
        assert_eq!(content.published_state(), PublishedState::Saved);
    }

    #[test]
    fn trashing_forces_recycle_bin_parent_and_unpublishes() {
        let mut content = persisted("Home");
        content.change_published_state(PublishedState::Published);

        content.change_trashed_state(true, 1234);
        assert!(content.trashed());
        assert_eq!(content.parent_id(), RECYCLE_BIN_ID);
        assert!(!content.published());
        assert_eq!(content.published_state(), PublishedState::Unpublished);

        content.change_trashed_state(false, 1050);
        assert!(!content.trashed());
        assert_eq!(content.parent_id(), 1050);
    }

    #[test]
    fn clone_as_new_resets_identity() {
        let mut original = persisted("Home");
        original.properties[0].id = 7;

        let clone = original.clone_as_new();
        assert_eq!(clone.id(), 0);
        assert!(clone.key().is_nil());
        assert_ne!(clone.version(), original.version());
        assert!(clone.properties().iter().all(|p| p.id() == 0));
        assert_eq!(clone.value("title"), original.value("title"));
    }

    #[test]
    fn status_priority() {
        let now = Utc::now();
        let mut content = persisted("Home");
        assert_eq!(content.status_at(now), ContentStatus::Unpublished);

        content.change_published_state(PublishedState::Published);
        assert_eq!(content.status_at(now), ContentStatus::Published);

        content.set_release_date(Some(now + Duration::days(1)));
        assert_eq!(content.status_at(now), ContentStatus::AwaitingRelease);

        content.set_expire_date(Some(now - Duration::days(1)));
        assert_eq!(content.status_at(now), ContentStatus::Expired);

        content.change_trashed_state(true, ROOT_ID);
        assert_eq!(content.status_at(now), ContentStatus::Trashed);
    }

    #[test]
    fn minimum_dates_are_no_constraint() {
        let now = Utc::now();
        let mut content = persisted("Home");
        content.change_published_state(PublishedState::Published);
        content.set_expire_date(Some(DateTime::<Utc>::MIN_UTC));
        content.set_release_date(Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(content.status_at(now), ContentStatus::Published);
    }

    #[test]
    fn validity_follows_property_types() {
        let mut content = Content::new("Home", ROOT_ID, textpage());
        assert!(!content.is_valid());
        assert_eq!(content.invalid_properties(), vec!["title"]);

        content.set_value("title", "Welcome").unwrap();
        assert!(content.is_valid());
    }

    #[test]
    fn place_under_recomputes_level() {
        let mut content = persisted("Child");
        content.place_under("-1,1046,1050");
        assert_eq!(content.path(), "-1,1046,1050,1046");
        assert_eq!(content.level(), 3);
        assert_eq!(content.path_ids().unwrap(), vec![-1, 1046, 1050, 1046]);
    }

    #[test]
    fn recycle_bin_detection_uses_path() {
        let mut content = persisted("Child");
        assert!(!content.is_in_recycle_bin());
        content.path = "-1,-20,1046".to_string();
        assert!(content.is_in_recycle_bin());
    }
}
