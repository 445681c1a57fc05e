//! Remote object snapshots.
//!
//! A snapshot is the remote's full state of one object at one version. The
//! `from_api_json` constructors decode the remote's JSON shape: top-level
//! `key`/`version`/`library`/`links`/`meta` with the object body under
//! `data`. Annotation geometry arrives inside the `annotationPosition` JSON
//! string and is split into sub-fields, `rects` and `paths` here.

use std::collections::BTreeMap;

use bibsync_core::{FieldKey, LibraryId, LinkType, Rect, TagKind, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ProtocolResult};

/// Field value the remote sends when the real value is not known yet
/// (e.g. the checksum of an attachment whose upload is unconfirmed).
pub const NULL_SENTINEL: &str = "<null>";

/// Library block of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    /// `user` or `group`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remote library id.
    pub id: i64,
    /// Library name.
    #[serde(default)]
    pub name: String,
}

impl LibrarySnapshot {
    /// Resolves the local library identifier, if the kind is known.
    #[must_use]
    pub fn library_id(&self) -> Option<LibraryId> {
        match self.kind.as_str() {
            "user" => Some(LibraryId::User),
            "group" => Some(LibraryId::Group(self.id)),
            _ => None,
        }
    }
}

/// A remote user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Remote user id.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// One field of an item snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    /// Field key.
    pub key: FieldKey,
    /// Base key for type-specific aliases and sub-fields.
    pub base_key: Option<FieldKey>,
    /// Field value.
    pub value: String,
}

impl FieldSnapshot {
    /// Creates a field without base key.
    pub fn new(key: FieldKey, value: impl Into<String>) -> Self {
        Self {
            key,
            base_key: None,
            value: value.into(),
        }
    }
}

/// A creator in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorSnapshot {
    /// Creator type, e.g. `author`.
    pub creator_type: String,
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Single-field name.
    #[serde(default)]
    pub name: String,
}

/// A tag in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSnapshot {
    /// Tag name.
    pub tag: String,
    /// `0` manual, `1` automatic.
    #[serde(rename = "type", default)]
    pub kind: u8,
}

impl TagSnapshot {
    /// Creates a tag snapshot.
    pub fn new(tag: impl Into<String>, kind: TagKind) -> Self {
        Self {
            tag: tag.into(),
            kind: kind.as_u8(),
        }
    }

    /// Typed tag kind.
    #[must_use]
    pub const fn tag_kind(&self) -> TagKind {
        TagKind::from_u8(self.kind)
    }
}

/// A relation value: one URI or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationValue {
    /// Single URI.
    One(String),
    /// Several URIs.
    Many(Vec<String>),
}

impl RelationValue {
    /// Stored form: several URIs are joined with `;`.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            RelationValue::One(value) => value.clone(),
            RelationValue::Many(values) => values.join(";"),
        }
    }
}

/// A link in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// Link kind.
    pub link_type: LinkType,
    /// Target URL.
    pub href: String,
    /// Media type.
    pub content_type: String,
    /// Title.
    pub title: String,
    /// Length in bytes.
    pub length: u64,
}

/// Remote state of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    /// Item key.
    pub key: String,
    /// Remote version.
    pub version: Version,
    /// Library block; `None` when the payload omitted it.
    pub library: Option<LibrarySnapshot>,
    /// Item type.
    pub item_type: String,
    /// Parent item key.
    pub parent: Option<String>,
    /// In trash.
    pub trash: bool,
    /// Creation timestamp.
    pub date_added: DateTime<Utc>,
    /// Modification timestamp.
    pub date_modified: DateTime<Utc>,
    /// Fields in payload order.
    pub fields: Vec<FieldSnapshot>,
    /// Creators in order.
    pub creators: Vec<CreatorSnapshot>,
    /// Tags.
    pub tags: Vec<TagSnapshot>,
    /// Collection keys.
    pub collections: Vec<String>,
    /// Relations by predicate.
    pub relations: BTreeMap<String, RelationValue>,
    /// Links.
    pub links: Vec<LinkSnapshot>,
    /// Annotation rectangles.
    pub rects: Vec<Rect>,
    /// Annotation ink paths, each flattened as `[x0, y0, x1, y1, ...]`.
    pub paths: Vec<Vec<f64>>,
    /// Creating user.
    pub created_by: Option<UserSnapshot>,
    /// Last modifying user.
    pub modified_by: Option<UserSnapshot>,
}

impl ItemSnapshot {
    /// Creates a minimal snapshot.
    pub fn new(
        library: Option<LibrarySnapshot>,
        key: impl Into<String>,
        version: Version,
        item_type: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            version,
            library,
            item_type: item_type.into(),
            parent: None,
            trash: false,
            date_added: date,
            date_modified: date,
            fields: Vec::new(),
            creators: Vec::new(),
            tags: Vec::new(),
            collections: Vec::new(),
            relations: BTreeMap::new(),
            links: Vec::new(),
            rects: Vec::new(),
            paths: Vec::new(),
            created_by: None,
            modified_by: None,
        }
    }

    /// Value of the first field with `key`.
    #[must_use]
    pub fn field_value(&self, key: &FieldKey) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| &field.key == key)
            .map(|field| field.value.as_str())
    }

    /// Decodes an item from the remote's JSON shape.
    pub fn from_api_json(value: &Value) -> ProtocolResult<Self> {
        const OBJECT: &str = "item";
        let envelope = Envelope::decode(value, OBJECT)?;
        let data = envelope.data;

        let item_type = str_attr(data, "itemType")
            .ok_or_else(|| ProtocolError::missing(OBJECT, "itemType"))?;
        let date_added = date_attr(data, "dateAdded")?;
        let date_modified = date_attr(data, "dateModified")?;
        let mut snapshot = Self::new(
            envelope.library,
            envelope.key,
            envelope.version,
            item_type,
            date_added,
        );
        snapshot.date_modified = date_modified;
        snapshot.parent = str_attr(data, "parentItem").map(str::to_owned);
        snapshot.trash = bool_attr(data, "deleted");
        snapshot.links = decode_links(value.get("links"));

        if let Some(meta) = value.get("meta") {
            snapshot.created_by = optional_from(meta.get("createdByUser"))?;
            snapshot.modified_by = optional_from(meta.get("lastModifiedByUser"))?;
        }
        if let Some(creators) = data.get("creators") {
            snapshot.creators = serde_json::from_value(creators.clone())?;
        }
        if let Some(tags) = data.get("tags") {
            snapshot.tags = serde_json::from_value(tags.clone())?;
        }
        if let Some(collections) = data.get("collections") {
            snapshot.collections = serde_json::from_value(collections.clone())?;
        }
        if let Some(relations) = data.get("relations") {
            snapshot.relations = serde_json::from_value(relations.clone())?;
        }

        for (name, value) in data {
            if name == "annotationPosition" {
                snapshot.decode_position(value)?;
                continue;
            }
            if RESERVED_ITEM_KEYS.contains(&name.as_str()) {
                continue;
            }
            if let Some(value) = scalar_string(value) {
                snapshot
                    .fields
                    .push(FieldSnapshot::new(FieldKey::parse(name), value));
            }
        }
        Ok(snapshot)
    }

    fn decode_position(&mut self, value: &Value) -> ProtocolResult<()> {
        let position: Value = match value {
            Value::String(text) => serde_json::from_str(text)?,
            Value::Object(_) => value.clone(),
            _ => return Err(ProtocolError::invalid("annotationPosition", "not an object")),
        };
        for (key, name) in [(FieldKey::PageIndex, "pageIndex"), (FieldKey::LineWidth, "width")] {
            if let Some(value) = position.get(name).and_then(scalar_string) {
                self.fields.push(FieldSnapshot {
                    key,
                    base_key: Some(FieldKey::AnnotationPosition),
                    value,
                });
            }
        }
        if let Some(rects) = position.get("rects") {
            let rects: Vec<Vec<f64>> = serde_json::from_value(rects.clone())?;
            self.rects = rects
                .into_iter()
                .map(|rect| match rect.as_slice() {
                    [min_x, min_y, max_x, max_y] => Ok(Rect::new(*min_x, *min_y, *max_x, *max_y)),
                    _ => Err(ProtocolError::invalid("rects", "expected four coordinates")),
                })
                .collect::<ProtocolResult<_>>()?;
        }
        if let Some(paths) = position.get("paths") {
            self.paths = serde_json::from_value(paths.clone())?;
        }
        Ok(())
    }
}

/// Remote state of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSnapshot {
    /// Collection key.
    pub key: String,
    /// Remote version.
    pub version: Version,
    /// Library block.
    pub library: Option<LibrarySnapshot>,
    /// Name.
    pub name: String,
    /// Parent collection key.
    pub parent: Option<String>,
    /// In trash.
    pub trash: bool,
}

impl CollectionSnapshot {
    /// Decodes a collection from the remote's JSON shape.
    pub fn from_api_json(value: &Value) -> ProtocolResult<Self> {
        const OBJECT: &str = "collection";
        let envelope = Envelope::decode(value, OBJECT)?;
        let data = envelope.data;
        Ok(Self {
            key: envelope.key,
            version: envelope.version,
            library: envelope.library,
            name: str_attr(data, "name")
                .ok_or_else(|| ProtocolError::missing(OBJECT, "name"))?
                .to_owned(),
            parent: str_attr(data, "parentCollection").map(str::to_owned),
            trash: bool_attr(data, "deleted"),
        })
    }
}

/// A saved-search condition in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    /// Condition name.
    pub condition: String,
    /// Operator.
    pub operator: String,
    /// Operand.
    #[serde(default)]
    pub value: String,
}

/// Remote state of a saved search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSnapshot {
    /// Search key.
    pub key: String,
    /// Remote version.
    pub version: Version,
    /// Library block.
    pub library: Option<LibrarySnapshot>,
    /// Name.
    pub name: String,
    /// Conditions in order.
    pub conditions: Vec<ConditionSnapshot>,
    /// In trash.
    pub trash: bool,
    /// Modification timestamp, if reported.
    pub date_modified: Option<DateTime<Utc>>,
}

impl SearchSnapshot {
    /// Decodes a search from the remote's JSON shape.
    pub fn from_api_json(value: &Value) -> ProtocolResult<Self> {
        const OBJECT: &str = "search";
        let envelope = Envelope::decode(value, OBJECT)?;
        let data = envelope.data;
        let conditions = match data.get("conditions") {
            Some(conditions) => serde_json::from_value(conditions.clone())?,
            None => Vec::new(),
        };
        let date_modified = match data.get("dateModified") {
            Some(_) => Some(date_attr(data, "dateModified")?),
            None => None,
        };
        Ok(Self {
            key: envelope.key,
            version: envelope.version,
            library: envelope.library,
            name: str_attr(data, "name")
                .ok_or_else(|| ProtocolError::missing(OBJECT, "name"))?
                .to_owned(),
            conditions,
            trash: bool_attr(data, "deleted"),
            date_modified,
        })
    }
}

/// Data attributes decoded into dedicated snapshot members rather than
/// fields.
const RESERVED_ITEM_KEYS: &[&str] = &[
    "key",
    "version",
    "itemType",
    "parentItem",
    "deleted",
    "dateAdded",
    "dateModified",
    "creators",
    "tags",
    "collections",
    "relations",
    "inPublications",
];

/// Common top-level attributes of every payload.
struct Envelope<'a> {
    key: String,
    version: Version,
    library: Option<LibrarySnapshot>,
    data: &'a Map<String, Value>,
}

impl<'a> Envelope<'a> {
    fn decode(value: &'a Value, object: &'static str) -> ProtocolResult<Self> {
        let key = value
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::missing(object, "key"))?
            .to_owned();
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| ProtocolError::missing(object, "version"))?;
        let version = Version::try_from(version)
            .map_err(|_| ProtocolError::invalid("version", format!("{version} out of range")))?;
        let library = optional_from(value.get("library"))?;
        let data = value
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| ProtocolError::missing(object, "data"))?;
        Ok(Self {
            key,
            version,
            library,
            data,
        })
    }
}

fn optional_from<T: serde::de::DeserializeOwned>(value: Option<&Value>) -> ProtocolResult<Option<T>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

/// Non-empty string attribute. `false` and `""` mean absent.
fn str_attr<'a>(data: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    data.get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Boolean attribute that may be sent as `true` or `1`.
fn bool_attr(data: &Map<String, Value>, name: &str) -> bool {
    match data.get(name) {
        Some(Value::Bool(value)) => *value,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|value| value != 0),
        _ => false,
    }
}

fn date_attr(data: &Map<String, Value>, name: &'static str) -> ProtocolResult<DateTime<Utc>> {
    let text = data
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::invalid(name, "missing timestamp"))?;
    DateTime::parse_from_rfc3339(text)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| ProtocolError::invalid(name, err.to_string()))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn decode_links(value: Option<&Value>) -> Vec<LinkSnapshot> {
    let Some(links) = value.and_then(Value::as_object) else {
        return Vec::new();
    };
    [
        ("self", LinkType::Me),
        ("up", LinkType::Up),
        ("alternate", LinkType::Alternate),
        ("enclosure", LinkType::Enclosure),
    ]
    .into_iter()
    .filter_map(|(name, link_type)| {
        let link = links.get(name)?;
        Some(LinkSnapshot {
            link_type,
            href: link.get("href")?.as_str()?.to_owned(),
            content_type: link
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            title: link
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            length: link.get("length").and_then(Value::as_u64).unwrap_or(0),
        })
    })
    .collect()
}
