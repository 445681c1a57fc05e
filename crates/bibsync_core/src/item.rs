//! Items and their owned sub-records.
//!
//! Fields, creators, typed tags, relations, links and annotation geometry
//! are owned by the item. Parent items, collections, base tags and users are
//! referenced by key and resolved through the store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{ChangeFlags, SyncMeta};
use crate::types::{LibraryId, ObjectKind, Syncable};

/// Well-known item type names.
pub mod item_types {
    /// Annotation on an attachment.
    pub const ANNOTATION: &str = "annotation";
    /// File or link attachment.
    pub const ATTACHMENT: &str = "attachment";
    /// Standalone or child note.
    pub const NOTE: &str = "note";
    /// Generic document.
    pub const DOCUMENT: &str = "document";

    /// Highlight annotation (rect geometry).
    pub const HIGHLIGHT: &str = "highlight";
    /// Underline annotation (rect geometry).
    pub const UNDERLINE: &str = "underline";
    /// Image annotation (rect geometry).
    pub const IMAGE: &str = "image";
    /// Ink annotation (path geometry).
    pub const INK: &str = "ink";
}

/// Typed field key.
///
/// Keys the reconciliation core reacts to are variants; every other schema
/// field is carried as [`FieldKey::Other`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    /// `title`, also the base key of type-specific title fields.
    Title,
    /// `note`
    Note,
    /// `date`
    Date,
    /// `publisher`
    Publisher,
    /// `publicationTitle`
    PublicationTitle,
    /// `annotationType`
    AnnotationType,
    /// `annotationText`
    AnnotationText,
    /// `annotationComment`
    AnnotationComment,
    /// `annotationColor`
    AnnotationColor,
    /// `annotationPageLabel`
    AnnotationPageLabel,
    /// `annotationSortIndex`
    AnnotationSortIndex,
    /// `annotationPosition`, base key of the position sub-fields.
    AnnotationPosition,
    /// `pageIndex`, a sub-field of the annotation position.
    PageIndex,
    /// `width`, ink line width, a sub-field of the annotation position.
    LineWidth,
    /// `md5`
    Md5,
    /// `mtime`
    Mtime,
    /// `contentType`
    ContentType,
    /// `filename`
    Filename,
    /// Any other schema field.
    Other(String),
}

impl FieldKey {
    /// Returns the wire name of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            FieldKey::Title => "title",
            FieldKey::Note => "note",
            FieldKey::Date => "date",
            FieldKey::Publisher => "publisher",
            FieldKey::PublicationTitle => "publicationTitle",
            FieldKey::AnnotationType => "annotationType",
            FieldKey::AnnotationText => "annotationText",
            FieldKey::AnnotationComment => "annotationComment",
            FieldKey::AnnotationColor => "annotationColor",
            FieldKey::AnnotationPageLabel => "annotationPageLabel",
            FieldKey::AnnotationSortIndex => "annotationSortIndex",
            FieldKey::AnnotationPosition => "annotationPosition",
            FieldKey::PageIndex => "pageIndex",
            FieldKey::LineWidth => "width",
            FieldKey::Md5 => "md5",
            FieldKey::Mtime => "mtime",
            FieldKey::ContentType => "contentType",
            FieldKey::Filename => "filename",
            FieldKey::Other(name) => name,
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "title" => FieldKey::Title,
            "note" => FieldKey::Note,
            "date" => FieldKey::Date,
            "publisher" => FieldKey::Publisher,
            "publicationTitle" => FieldKey::PublicationTitle,
            "annotationType" => FieldKey::AnnotationType,
            "annotationText" => FieldKey::AnnotationText,
            "annotationComment" => FieldKey::AnnotationComment,
            "annotationColor" => FieldKey::AnnotationColor,
            "annotationPageLabel" => FieldKey::AnnotationPageLabel,
            "annotationSortIndex" => FieldKey::AnnotationSortIndex,
            "annotationPosition" => FieldKey::AnnotationPosition,
            "pageIndex" => FieldKey::PageIndex,
            "width" => FieldKey::LineWidth,
            "md5" => FieldKey::Md5,
            "mtime" => FieldKey::Mtime,
            "contentType" => FieldKey::ContentType,
            "filename" => FieldKey::Filename,
            other => FieldKey::Other(other.to_owned()),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        FieldKey::parse(name)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single item field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field key.
    pub key: FieldKey,
    /// Base key when `key` is a type-specific alias or a sub-field.
    pub base_key: Option<FieldKey>,
    /// Field value.
    pub value: String,
    /// Whether the value has a pending local edit.
    pub changed: bool,
}

impl Field {
    /// Creates an unchanged field.
    pub fn new(key: FieldKey, value: impl Into<String>) -> Self {
        Self {
            key,
            base_key: None,
            value: value.into(),
            changed: false,
        }
    }

    /// Sets the base key.
    #[must_use]
    pub fn with_base_key(mut self, base_key: FieldKey) -> Self {
        self.base_key = Some(base_key);
        self
    }

    /// Returns true if this field is `key` or is based on `key`.
    #[must_use]
    pub fn is(&self, key: &FieldKey) -> bool {
        &self.key == key || self.base_key.as_ref() == Some(key)
    }
}

/// A creator (author, editor, ...) of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    /// Position in the creator list.
    pub order: usize,
    /// Creator type, e.g. `author`.
    pub creator_type: String,
    /// First name, for two-part names.
    pub first_name: String,
    /// Last name, for two-part names.
    pub last_name: String,
    /// Single-field name, for institutional creators.
    pub name: String,
}

impl Creator {
    /// Name used in creator summaries.
    #[must_use]
    pub fn summary_name(&self) -> &str {
        if self.name.is_empty() {
            &self.last_name
        } else {
            &self.name
        }
    }
}

/// Whether a tag was assigned by the user or automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TagKind {
    /// Added by the user.
    #[default]
    Manual,
    /// Added automatically (import, feed).
    Automatic,
}

impl TagKind {
    /// Wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            TagKind::Manual => 0,
            TagKind::Automatic => 1,
        }
    }

    /// Parses a wire value. Unknown values are treated as manual.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => TagKind::Automatic,
            _ => TagKind::Manual,
        }
    }
}

/// Join between an item and a library base tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypedTag {
    /// Base tag name.
    pub name: String,
    /// Manual or automatic.
    pub kind: TagKind,
}

impl TypedTag {
    /// Creates a typed tag.
    pub fn new(name: impl Into<String>, kind: TagKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Kind of an item link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// Link to the object itself.
    #[serde(rename = "self")]
    Me,
    /// Link to the parent.
    #[serde(rename = "up")]
    Up,
    /// Web view of the object.
    #[serde(rename = "alternate")]
    Alternate,
    /// Attachment file download.
    #[serde(rename = "enclosure")]
    Enclosure,
}

/// A hyperlink attached to an item by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Link kind.
    pub link_type: LinkType,
    /// Target URL.
    pub href: String,
    /// Media type.
    pub content_type: String,
    /// Title, if any.
    pub title: String,
    /// Length in bytes, if any.
    pub length: u64,
}

/// Axis-aligned annotation rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub min_x: f64,
    /// Bottom edge.
    pub min_y: f64,
    /// Right edge.
    pub max_x: f64,
    /// Top edge.
    pub max_y: f64,
}

impl Rect {
    /// Creates a rect from its corner coordinates.
    #[must_use]
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Coordinates in wire order.
    #[must_use]
    pub const fn to_array(self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// One point of an ink path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Splits a flattened `[x0, y0, x1, y1, ...]` path into points.
///
/// A trailing odd coordinate is ignored.
#[must_use]
pub fn path_points(coordinates: &[f64]) -> Vec<PathPoint> {
    coordinates
        .chunks_exact(2)
        .map(|pair| PathPoint {
            x: pair[0],
            y: pair[1],
        })
        .collect()
}

/// Denormalized values derived from fields and creators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemMetadata {
    /// Title shown in lists.
    pub display_title: String,
    /// Short creator summary, e.g. `Smith and Jones`.
    pub creator_summary: Option<String>,
    /// Raw date field.
    pub date: Option<String>,
    /// Year parsed from the date field.
    pub year: Option<i32>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Publication title.
    pub publication_title: Option<String>,
    /// Annotation sort index.
    pub annotation_sort_index: String,
    /// Attachment checksum reported by the remote.
    pub backend_md5: String,
    /// Attachment media type.
    pub content_type: Option<String>,
}

/// A library item.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Owning library.
    pub library: LibraryId,
    /// Item key.
    pub key: String,
    /// Item type name (see [`item_types`]).
    pub item_type: String,
    /// In trash.
    pub trash: bool,
    /// Creation timestamp.
    pub date_added: DateTime<Utc>,
    /// Last modification timestamp.
    pub date_modified: DateTime<Utc>,
    /// Parent item key.
    pub parent: Option<String>,
    /// Ordered fields.
    pub fields: Vec<Field>,
    /// Ordered creators.
    pub creators: Vec<Creator>,
    /// Keys of collections this item belongs to. Always empty for child items.
    pub collections: BTreeSet<String>,
    /// Typed tags.
    pub tags: Vec<TypedTag>,
    /// Relations by predicate.
    pub relations: BTreeMap<String, String>,
    /// Remote links.
    pub links: Vec<Link>,
    /// Highlight/underline/image geometry.
    pub rects: Vec<Rect>,
    /// Ink geometry, each path flattened as `[x0, y0, x1, y1, ...]`.
    pub paths: Vec<Vec<f64>>,
    /// User who created the item (group libraries).
    pub created_by: Option<i64>,
    /// User who last modified the item (group libraries).
    pub modified_by: Option<i64>,
    /// Derived metadata.
    pub metadata: ItemMetadata,
    /// Sync metadata.
    pub sync: SyncMeta,
}

impl Item {
    /// Creates an empty item.
    pub fn new(
        library: LibraryId,
        key: impl Into<String>,
        item_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            library,
            key: key.into(),
            item_type: item_type.into(),
            trash: false,
            date_added: now,
            date_modified: now,
            parent: None,
            fields: Vec::new(),
            creators: Vec::new(),
            collections: BTreeSet::new(),
            tags: Vec::new(),
            relations: BTreeMap::new(),
            links: Vec::new(),
            rects: Vec::new(),
            paths: Vec::new(),
            created_by: None,
            modified_by: None,
            metadata: ItemMetadata::default(),
            sync: SyncMeta::default(),
        }
    }

    /// Returns the first field that is `key` or based on `key`.
    #[must_use]
    pub fn field(&self, key: &FieldKey) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| &field.key == key)
            .or_else(|| self.fields.iter().find(|field| field.is(key)))
    }

    /// Returns the value of [`Item::field`].
    #[must_use]
    pub fn field_value(&self, key: &FieldKey) -> Option<&str> {
        self.field(key).map(|field| field.value.as_str())
    }

    /// Sets a field value as a local edit.
    ///
    /// Returns true if the value changed. The caller records
    /// [`ChangeFlags::FIELDS`] on the item.
    pub fn set_field(&mut self, key: FieldKey, value: impl Into<String>) -> bool {
        let value = value.into();
        if let Some(field) = self.fields.iter_mut().find(|field| field.key == key) {
            if field.value == value {
                return false;
            }
            field.value = value;
            field.changed = true;
        } else {
            let mut field = Field::new(key, value);
            field.changed = true;
            self.fields.push(field);
        }
        self.update_metadata();
        true
    }

    /// Returns true for annotation items.
    #[must_use]
    pub fn is_annotation(&self) -> bool {
        self.item_type == item_types::ANNOTATION
    }

    /// Returns true for item types that carry no creators.
    #[must_use]
    pub fn ignores_creators(&self) -> bool {
        matches!(
            self.item_type.as_str(),
            item_types::ANNOTATION | item_types::ATTACHMENT | item_types::NOTE
        )
    }

    /// Annotation type (`highlight`, `ink`, ...), for annotations.
    #[must_use]
    pub fn annotation_type(&self) -> Option<&str> {
        if self.is_annotation() {
            self.field_value(&FieldKey::AnnotationType)
        } else {
            None
        }
    }

    /// Recomputes the creator summary.
    pub fn update_creator_summary(&mut self) {
        let mut names: Vec<&str> = self
            .creators
            .iter()
            .map(Creator::summary_name)
            .filter(|name| !name.is_empty())
            .collect();
        self.metadata.creator_summary = match names.len() {
            0 => None,
            1 => names.pop().map(str::to_owned),
            2 => Some(format!("{} and {}", names[0], names[1])),
            _ => Some(format!("{} et al.", names[0])),
        };
    }

    /// Recomputes the display title.
    pub fn update_derived_titles(&mut self) {
        self.metadata.display_title = if self.item_type == item_types::NOTE {
            self.field_value(&FieldKey::Note)
                .map(note_title)
                .unwrap_or_default()
        } else if self.is_annotation() {
            String::new()
        } else {
            self.field_value(&FieldKey::Title)
                .unwrap_or_default()
                .to_owned()
        };
    }

    /// Recomputes every value in [`ItemMetadata`] derived from fields and
    /// creators.
    pub fn update_metadata(&mut self) {
        let value = |key: FieldKey| {
            self.field_value(&key)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        let date = value(FieldKey::Date);
        let publisher = value(FieldKey::Publisher);
        let publication_title = value(FieldKey::PublicationTitle);
        let sort_index = value(FieldKey::AnnotationSortIndex).unwrap_or_default();
        let content_type = value(FieldKey::ContentType);

        self.metadata.year = date.as_deref().and_then(parse_year);
        self.metadata.date = date;
        self.metadata.publisher = publisher;
        self.metadata.publication_title = publication_title;
        self.metadata.annotation_sort_index = sort_index;
        self.metadata.content_type = content_type;
        self.update_creator_summary();
        self.update_derived_titles();
    }
}

impl Syncable for Item {
    const KIND: ObjectKind = ObjectKind::Item;

    fn key(&self) -> &str {
        &self.key
    }

    fn library(&self) -> LibraryId {
        self.library
    }

    fn sync(&self) -> &SyncMeta {
        &self.sync
    }

    fn sync_mut(&mut self) -> &mut SyncMeta {
        &mut self.sync
    }

    fn in_trash(&self) -> bool {
        self.trash
    }

    fn full_change_set(&self) -> ChangeFlags {
        let mut flags = ChangeFlags::TYPE
            | ChangeFlags::FIELDS
            | ChangeFlags::TAGS
            | ChangeFlags::TRASH
            | ChangeFlags::RELATIONS
            | ChangeFlags::PARENT;
        if self.parent.is_none() {
            flags |= ChangeFlags::COLLECTIONS;
        }
        if !self.ignores_creators() {
            flags |= ChangeFlags::CREATORS;
        }
        if !self.rects.is_empty() {
            flags |= ChangeFlags::RECTS;
        }
        if !self.paths.is_empty() {
            flags |= ChangeFlags::PATHS;
        }
        flags
    }

    fn display_title(&self) -> String {
        self.metadata.display_title.clone()
    }

    fn parent_key(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn clear_change_markers(&mut self) {
        for field in &mut self.fields {
            field.changed = false;
        }
    }
}

/// First line of a note, with markup stripped.
fn note_title(note: &str) -> String {
    let mut text = String::with_capacity(note.len());
    let mut in_tag = false;
    for c in note.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push('\n');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_owned()
}

/// First run of four digits in a date string.
fn parse_year(date: &str) -> Option<i32> {
    let bytes = date.as_bytes();
    bytes
        .windows(4)
        .enumerate()
        .find(|(index, window)| {
            window.iter().all(u8::is_ascii_digit)
                && bytes.get(index + 4).map_or(true, |b| !b.is_ascii_digit())
                && (*index == 0 || !bytes[index - 1].is_ascii_digit())
        })
        .and_then(|(index, _)| date[index..index + 4].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(item_type: &str) -> Item {
        Item::new(LibraryId::User, "AAAA2222", item_type, Utc::now())
    }

    #[test]
    fn field_key_round_trip_names() {
        assert_eq!(FieldKey::parse("publicationTitle"), FieldKey::PublicationTitle);
        assert_eq!(FieldKey::parse("width").as_str(), "width");
        assert_eq!(
            FieldKey::parse("caseName"),
            FieldKey::Other("caseName".into())
        );
    }

    #[test]
    fn title_resolves_through_base_key() {
        let mut case = item("case");
        case.fields.push(
            Field::new(FieldKey::Other("caseName".into()), "Roe v. Wade")
                .with_base_key(FieldKey::Title),
        );
        case.update_metadata();
        assert_eq!(case.metadata.display_title, "Roe v. Wade");
    }

    #[test]
    fn note_title_strips_markup() {
        let mut note = item(item_types::NOTE);
        note.fields
            .push(Field::new(FieldKey::Note, "<p>First line</p><p>second</p>"));
        note.update_metadata();
        assert_eq!(note.metadata.display_title, "First line");
    }

    #[test]
    fn creator_summary_forms() {
        let creator = |last: &str| Creator {
            order: 0,
            creator_type: "author".into(),
            first_name: String::new(),
            last_name: last.into(),
            name: String::new(),
        };
        let mut doc = item(item_types::DOCUMENT);
        doc.creators = vec![creator("Smith")];
        doc.update_creator_summary();
        assert_eq!(doc.metadata.creator_summary.as_deref(), Some("Smith"));

        doc.creators.push(creator("Jones"));
        doc.update_creator_summary();
        assert_eq!(
            doc.metadata.creator_summary.as_deref(),
            Some("Smith and Jones")
        );

        doc.creators.push(creator("Brown"));
        doc.update_creator_summary();
        assert_eq!(doc.metadata.creator_summary.as_deref(), Some("Smith et al."));
    }

    #[test]
    fn set_field_marks_changed() {
        let mut doc = item(item_types::DOCUMENT);
        assert!(doc.set_field(FieldKey::Title, "A"));
        assert!(!doc.set_field(FieldKey::Title, "A"));
        assert!(doc.field(&FieldKey::Title).unwrap().changed);
        assert_eq!(doc.metadata.display_title, "A");
    }

    #[test]
    fn year_parsing() {
        assert_eq!(parse_year("March 2019"), Some(2019));
        assert_eq!(parse_year("2019-03-01"), Some(2019));
        assert_eq!(parse_year("no date"), None);
        assert_eq!(parse_year("12345"), None);
    }

    #[test]
    fn full_change_set_depends_on_shape() {
        let mut annotation = item(item_types::ANNOTATION);
        annotation.parent = Some("PARENT22".into());
        annotation.rects.push(Rect::new(0.0, 0.0, 1.0, 1.0));
        let flags = annotation.full_change_set();
        assert!(flags.contains(ChangeFlags::RECTS));
        assert!(!flags.contains(ChangeFlags::CREATORS));
        assert!(!flags.contains(ChangeFlags::COLLECTIONS));
    }

    #[test]
    fn path_points_ignore_trailing_coordinate() {
        let points = path_points(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], PathPoint { x: 3.0, y: 4.0 });
    }
}
