//! Upload batches and their acknowledgements.

use std::collections::BTreeMap;

use bibsync_core::{LibraryId, ObjectKind, Version};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Maximum number of objects the remote accepts per write or delete request.
pub const MAX_BATCH_COUNT: usize = 50;

/// Parameter map of one object in a write batch.
pub type UpdateParameters = Map<String, Value>;

/// A size-capped write request.
///
/// Created by the upload batcher, consumed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    /// Target library.
    pub library: LibraryId,
    /// Object kind of every entry.
    pub object: ObjectKind,
    /// Library version the batch was built against.
    pub version: Version,
    /// Ordered per-object parameters.
    pub parameters: Vec<UpdateParameters>,
    /// Provenance ids of the changes covered, by object key.
    pub change_ids: BTreeMap<String, Vec<Uuid>>,
}

impl WriteBatch {
    /// Keys of the objects in this batch, in upload order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter_map(|parameters| parameters.get("key").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    }

    /// Number of objects in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// A size-capped delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteBatch {
    /// Target library.
    pub library: LibraryId,
    /// Object kind of every key.
    pub object: ObjectKind,
    /// Library version the batch was built against.
    pub version: Version,
    /// Keys to delete.
    pub keys: Vec<String>,
}

/// A write rejected by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    /// Object key.
    pub key: String,
    /// Remote status code.
    pub code: u16,
    /// Remote error message.
    pub message: String,
}

/// Remote response to a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteAck {
    /// New library version after the write.
    pub version: Version,
    /// Keys written.
    pub successful: Vec<String>,
    /// Keys the remote already had in this state.
    pub unchanged: Vec<String>,
    /// Keys rejected.
    pub failed: Vec<FailedWrite>,
}

impl WriteAck {
    /// Acknowledges every key in `batch` as written at `version`.
    #[must_use]
    pub fn all_successful(batch: &WriteBatch, version: Version) -> Self {
        Self {
            version,
            successful: batch.keys(),
            ..Self::default()
        }
    }

    /// Keys whose changes were accepted.
    pub fn accepted_keys(&self) -> impl Iterator<Item = &str> {
        self.successful
            .iter()
            .chain(self.unchanged.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch() -> WriteBatch {
        let parameters = ["A", "B"]
            .iter()
            .map(|key| {
                let mut map = Map::new();
                map.insert("key".into(), json!(key));
                map
            })
            .collect();
        WriteBatch {
            library: LibraryId::User,
            object: ObjectKind::Item,
            version: 3,
            parameters,
            change_ids: BTreeMap::new(),
        }
    }

    #[test]
    fn batch_keys_in_order() {
        assert_eq!(batch().keys(), vec!["A", "B"]);
        assert_eq!(batch().len(), 2);
    }

    #[test]
    fn ack_accepts_unchanged() {
        let mut ack = WriteAck::all_successful(&batch(), 4);
        ack.unchanged.push("C".into());
        assert_eq!(ack.accepted_keys().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }
}
