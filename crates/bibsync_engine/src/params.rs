//! Update parameters: the upload form of locally changed objects.
//!
//! Only the groups named in an object's change set are serialized, next to
//! the identity members (`key`, `version`) every entry carries.

use bibsync_core::{
    ChangeFlags, Collection, Creator, FieldKey, Item, Rect, Search, Syncable,
};
use bibsync_protocol::UpdateParameters;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Serializes an object for a write batch.
pub trait ToUpdateParameters: Syncable {
    /// Returns the parameters of the pending changes, or `None` if the
    /// object has none.
    fn update_parameters(&self) -> Option<UpdateParameters>;
}

/// Rounds a coordinate to the precision sent to the remote.
pub(crate) fn round_coordinate(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn timestamp(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn identity<T: Syncable>(object: &T) -> UpdateParameters {
    let mut parameters = Map::new();
    parameters.insert("key".into(), json!(object.key()));
    parameters.insert("version".into(), json!(object.sync().version));
    parameters
}

impl ToUpdateParameters for Collection {
    fn update_parameters(&self) -> Option<UpdateParameters> {
        let changes = self.sync.change_set();
        if changes.is_empty() {
            return None;
        }
        let mut parameters = identity(self);
        if changes.contains(ChangeFlags::NAME) {
            parameters.insert("name".into(), json!(self.name));
        }
        if changes.contains(ChangeFlags::PARENT) {
            let parent = self.parent.as_deref().map_or(Value::Bool(false), |key| json!(key));
            parameters.insert("parentCollection".into(), parent);
        }
        Some(parameters)
    }
}

impl ToUpdateParameters for Search {
    fn update_parameters(&self) -> Option<UpdateParameters> {
        let changes = self.sync.change_set();
        if changes.is_empty() {
            return None;
        }
        let mut parameters = identity(self);
        parameters.insert("dateModified".into(), timestamp(self.date_modified));
        if changes.contains(ChangeFlags::NAME) {
            parameters.insert("name".into(), json!(self.name));
        }
        if changes.contains(ChangeFlags::CONDITIONS) {
            let conditions: Vec<Value> = self
                .conditions
                .iter()
                .map(|condition| {
                    json!({
                        "condition": condition.condition,
                        "operator": condition.operator,
                        "value": condition.value,
                    })
                })
                .collect();
            parameters.insert("conditions".into(), Value::Array(conditions));
        }
        if changes.contains(ChangeFlags::TRASH) {
            parameters.insert("deleted".into(), json!(self.trash));
        }
        Some(parameters)
    }
}

impl ToUpdateParameters for Item {
    fn update_parameters(&self) -> Option<UpdateParameters> {
        let changes = self.sync.change_set();
        if changes.is_empty() {
            return None;
        }
        let mut parameters = identity(self);
        parameters.insert("dateModified".into(), timestamp(self.date_modified));
        parameters.insert("dateAdded".into(), timestamp(self.date_added));

        if changes.contains(ChangeFlags::TYPE) {
            parameters.insert("itemType".into(), json!(self.item_type));
        }
        if changes.contains(ChangeFlags::TRASH) {
            parameters.insert("deleted".into(), json!(self.trash));
        }
        if changes.contains(ChangeFlags::TAGS) {
            let tags: Vec<Value> = self
                .tags
                .iter()
                .map(|tag| match tag.kind.as_u8() {
                    0 => json!({ "tag": tag.name }),
                    kind => json!({ "tag": tag.name, "type": kind }),
                })
                .collect();
            parameters.insert("tags".into(), Value::Array(tags));
        }
        if changes.contains(ChangeFlags::COLLECTIONS) {
            parameters.insert("collections".into(), json!(self.collections));
        }
        if changes.contains(ChangeFlags::RELATIONS) {
            parameters.insert("relations".into(), relations(self));
        }
        if changes.contains(ChangeFlags::PARENT) {
            let parent = self.parent.as_deref().map_or(Value::Bool(false), |key| json!(key));
            parameters.insert("parentItem".into(), parent);
        }
        if changes.contains(ChangeFlags::CREATORS) {
            let creators: Vec<Value> = self.creators.iter().map(creator).collect();
            parameters.insert("creators".into(), Value::Array(creators));
        }

        let mut position_changed = false;
        if changes.contains(ChangeFlags::FIELDS) {
            for field in self.fields.iter().filter(|field| field.changed) {
                match &field.key {
                    FieldKey::Md5 | FieldKey::Mtime => {
                        // Sent with the file upload, not with the item.
                        parameters.insert(field.key.to_string(), json!(""));
                    }
                    _ if field.base_key == Some(FieldKey::AnnotationPosition) => {
                        position_changed = true;
                    }
                    _ => {
                        parameters.insert(field.key.to_string(), json!(field.value));
                    }
                }
            }
        }
        if position_changed || changes.intersects(ChangeFlags::RECTS | ChangeFlags::PATHS) {
            if let Some(position) = annotation_position(self) {
                parameters.insert(FieldKey::AnnotationPosition.to_string(), position);
            }
        }
        Some(parameters)
    }
}

fn relations(item: &Item) -> Value {
    let relations: Map<String, Value> = item
        .relations
        .iter()
        .map(|(predicate, value)| {
            let value = if value.contains(';') {
                json!(value.split(';').collect::<Vec<_>>())
            } else {
                json!(value)
            };
            (predicate.clone(), value)
        })
        .collect();
    Value::Object(relations)
}

fn creator(creator: &Creator) -> Value {
    let mut parameters = Map::new();
    parameters.insert("creatorType".into(), json!(creator.creator_type));
    if !creator.name.is_empty() {
        parameters.insert("name".into(), json!(creator.name));
    }
    if !creator.first_name.is_empty() || !creator.last_name.is_empty() {
        parameters.insert("firstName".into(), json!(creator.first_name));
        parameters.insert("lastName".into(), json!(creator.last_name));
    }
    Value::Object(parameters)
}

/// Builds the `annotationPosition` JSON string from the position
/// sub-fields and geometry. Items without geometry have no position.
fn annotation_position(item: &Item) -> Option<Value> {
    if item.rects.is_empty() && item.paths.is_empty() {
        return None;
    }
    let page_index = item
        .field_value(&FieldKey::PageIndex)
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(0);

    let mut position = Map::new();
    position.insert(FieldKey::PageIndex.to_string(), json!(page_index));
    if item.paths.is_empty() {
        let rects: Vec<[f64; 4]> = item.rects.iter().map(|rect| rounded_rect(*rect)).collect();
        position.insert("rects".into(), json!(rects));
    } else {
        let width = item
            .field_value(&FieldKey::LineWidth)
            .and_then(|value| value.parse::<f64>().ok())
            .map_or(0.0, round_coordinate);
        let paths: Vec<Vec<f64>> = item
            .paths
            .iter()
            .map(|path| path.iter().copied().map(round_coordinate).collect())
            .collect();
        position.insert(FieldKey::LineWidth.to_string(), json!(width));
        position.insert("paths".into(), json!(paths));
    }
    Some(Value::String(Value::Object(position).to_string()))
}

fn rounded_rect(rect: Rect) -> [f64; 4] {
    rect.to_array().map(round_coordinate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::{ChangeOrigin, Condition, Field, LibraryId, TagKind, TypedTag};
    use chrono::TimeZone;

    const LIB: LibraryId = LibraryId::User;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
    }

    fn changed_item(flags: ChangeFlags) -> Item {
        let mut item = Item::new(LIB, "ITEM2345", "book", date());
        item.sync.version = 7;
        item.sync.record_change(flags, ChangeOrigin::User);
        item
    }

    #[test]
    fn unchanged_objects_have_no_parameters() {
        let item = Item::new(LIB, "ITEM2345", "book", date());
        assert!(item.update_parameters().is_none());
        assert!(Collection::new(LIB, "C", "C").update_parameters().is_none());
    }

    #[test]
    fn item_identity_is_always_sent() {
        let parameters = changed_item(ChangeFlags::TRASH).update_parameters().unwrap();
        assert_eq!(parameters["key"], json!("ITEM2345"));
        assert_eq!(parameters["version"], json!(7));
        assert_eq!(parameters["dateAdded"], json!("2024-05-01T12:30:15Z"));
        assert_eq!(parameters["deleted"], json!(false));
        assert!(!parameters.contains_key("itemType"));
        assert!(!parameters.contains_key("tags"));
    }

    #[test]
    fn only_changed_fields_are_sent() {
        let mut item = changed_item(ChangeFlags::FIELDS);
        item.fields.push(Field::new(FieldKey::Title, "unchanged"));
        item.set_field(FieldKey::Date, "2021");
        item.set_field(FieldKey::Md5, "abc");

        let parameters = item.update_parameters().unwrap();
        assert_eq!(parameters["date"], json!("2021"));
        assert_eq!(parameters["md5"], json!(""));
        assert!(!parameters.contains_key("title"));
    }

    #[test]
    fn parent_and_relations() {
        let mut item = changed_item(ChangeFlags::PARENT | ChangeFlags::RELATIONS);
        item.relations.insert("dc:relation".into(), "a;b".into());
        item.relations.insert("owl:sameAs".into(), "c".into());

        let parameters = item.update_parameters().unwrap();
        assert_eq!(parameters["parentItem"], json!(false));
        assert_eq!(
            parameters["relations"],
            json!({"dc:relation": ["a", "b"], "owl:sameAs": "c"})
        );

        item.parent = Some("PARENT23".into());
        assert_eq!(item.update_parameters().unwrap()["parentItem"], json!("PARENT23"));
    }

    #[test]
    fn tags_and_creators() {
        let mut item = changed_item(ChangeFlags::TAGS | ChangeFlags::CREATORS);
        item.tags.push(TypedTag::new("manual", TagKind::Manual));
        item.tags.push(TypedTag::new("auto", TagKind::Automatic));
        item.creators.push(Creator {
            order: 0,
            creator_type: "author".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            name: String::new(),
        });

        let parameters = item.update_parameters().unwrap();
        assert_eq!(
            parameters["tags"],
            json!([{"tag": "manual"}, {"tag": "auto", "type": 1}])
        );
        assert_eq!(
            parameters["creators"],
            json!([{"creatorType": "author", "firstName": "Ada", "lastName": "Lovelace"}])
        );
    }

    #[test]
    fn highlight_position_is_rounded() {
        let mut item = changed_item(ChangeFlags::RECTS);
        item.item_type = "annotation".into();
        item.fields
            .push(Field::new(FieldKey::PageIndex, "3").with_base_key(FieldKey::AnnotationPosition));
        item.rects.push(Rect::new(1.23456, 2.0, 3.0006, 4.1));

        let parameters = item.update_parameters().unwrap();
        let position: Value =
            serde_json::from_str(parameters["annotationPosition"].as_str().unwrap()).unwrap();
        assert_eq!(position, json!({"pageIndex": 3, "rects": [[1.235, 2.0, 3.001, 4.1]]}));
    }

    #[test]
    fn changed_page_index_rebuilds_ink_position() {
        let mut item = changed_item(ChangeFlags::FIELDS);
        item.item_type = "annotation".into();
        let mut page = Field::new(FieldKey::PageIndex, "1").with_base_key(FieldKey::AnnotationPosition);
        page.changed = true;
        item.fields.push(page);
        item.fields
            .push(Field::new(FieldKey::LineWidth, "2").with_base_key(FieldKey::AnnotationPosition));
        item.paths.push(vec![0.1, 0.2, 0.3, 0.4]);

        let parameters = item.update_parameters().unwrap();
        assert!(!parameters.contains_key("pageIndex"));
        let position: Value =
            serde_json::from_str(parameters["annotationPosition"].as_str().unwrap()).unwrap();
        assert_eq!(
            position,
            json!({"pageIndex": 1, "width": 2.0, "paths": [[0.1, 0.2, 0.3, 0.4]]})
        );
    }

    #[test]
    fn collection_parameters() {
        let mut collection = Collection::new(LIB, "COLL2345", "Reading");
        collection.parent = Some("ROOT2345".into());
        collection
            .sync
            .record_change(ChangeFlags::NAME | ChangeFlags::PARENT, ChangeOrigin::User);

        let parameters = collection.update_parameters().unwrap();
        assert_eq!(parameters["name"], json!("Reading"));
        assert_eq!(parameters["parentCollection"], json!("ROOT2345"));
    }

    #[test]
    fn search_parameters() {
        let mut search = Search::new(LIB, "SRCH2345", "Unread", date());
        search.conditions.push(Condition::new("tag", "isNot", "read"));
        search
            .sync
            .record_change(ChangeFlags::CONDITIONS, ChangeOrigin::User);

        let parameters = search.update_parameters().unwrap();
        assert_eq!(parameters["dateModified"], json!("2024-05-01T12:30:15Z"));
        assert_eq!(
            parameters["conditions"],
            json!([{"condition": "tag", "operator": "isNot", "value": "read"}])
        );
        assert!(!parameters.contains_key("name"));
    }
}
