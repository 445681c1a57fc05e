//! Annotation Splitter: redistributes oversized annotation geometry over
//! several annotation items.
//!
//! The remote caps the serialized length of an annotation position. A
//! highlight whose rects, or an ink annotation whose paths, would exceed
//! that cap is replaced by copies that each carry one partition of the
//! geometry. Splitting is all-or-nothing: either every copy is created and
//! the source deleted, or the store is left untouched.

use bibsync_core::{
    item_types, ChangeFlags, ChangeOrigin, Field, Item, KeyGenerator, LibraryId, Rect,
    StoreState, SyncMeta,
};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::params::round_coordinate;
use crate::tracker::ChangeTracker;

/// Decides whether annotation geometry must be split, and how.
///
/// Both methods return `None` when the geometry fits in one annotation.
pub trait GeometryPartitioner {
    /// Partitions highlight rects.
    fn split_rects(&self, rects: &[Rect]) -> Option<Vec<Vec<Rect>>>;

    /// Partitions ink paths. Each path is a flattened coordinate list; a
    /// long path may be cut between two points.
    fn split_paths(&self, paths: &[Vec<f64>]) -> Option<Vec<Vec<Vec<f64>>>>;
}

/// Partitions by the length of the serialized annotation position.
///
/// Coordinates are measured as they are uploaded, rounded to three
/// decimals, together with their separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSizePartitioner {
    limit: usize,
}

impl PositionSizePartitioner {
    /// Creates a partitioner with a size limit in bytes.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for PositionSizePartitioner {
    fn default() -> Self {
        Self::new(crate::config::POSITION_SIZE_LIMIT)
    }
}

fn coordinate_len(value: f64) -> usize {
    round_coordinate(value).to_string().len()
}

impl GeometryPartitioner for PositionSizePartitioner {
    fn split_rects(&self, rects: &[Rect]) -> Option<Vec<Vec<Rect>>> {
        let mut sorted = rects.to_vec();
        sorted.sort_by(|a, b| {
            b.min_y
                .total_cmp(&a.min_y)
                .then_with(|| a.min_x.total_cmp(&b.min_x))
        });

        // Brackets around the rect list.
        let mut count = 2;
        let mut split = Vec::new();
        let mut current = Vec::new();
        for rect in sorted {
            // Four coordinates, three commas, brackets and a trailing comma.
            let size = rect.to_array().into_iter().map(coordinate_len).sum::<usize>() + 6;
            if count + size > self.limit {
                if !current.is_empty() {
                    split.push(std::mem::take(&mut current));
                }
                count = 2;
            }
            current.push(rect);
            count += size;
        }
        if !current.is_empty() {
            split.push(current);
        }

        (split.len() > 1).then_some(split)
    }

    fn split_paths(&self, paths: &[Vec<f64>]) -> Option<Vec<Vec<Vec<f64>>>> {
        let mut count = 2;
        let mut split: Vec<Vec<Vec<f64>>> = Vec::new();
        let mut lines: Vec<Vec<f64>> = Vec::new();
        let mut points: Vec<f64> = Vec::new();

        let flush = |points: &mut Vec<f64>,
                     lines: &mut Vec<Vec<f64>>,
                     split: &mut Vec<Vec<Vec<f64>>>| {
            if !points.is_empty() {
                lines.push(std::mem::take(points));
            }
            if !lines.is_empty() {
                split.push(std::mem::take(lines));
            }
        };

        for path in paths {
            if count + 3 > self.limit {
                flush(&mut points, &mut lines, &mut split);
                count = 2;
            }
            count += 3;

            for pair in path.chunks_exact(2) {
                let size = coordinate_len(pair[0]) + coordinate_len(pair[1]) + 2;
                if count + size > self.limit {
                    flush(&mut points, &mut lines, &mut split);
                    count = 5;
                }
                points.extend_from_slice(pair);
                count += size;
            }

            if !points.is_empty() {
                lines.push(std::mem::take(&mut points));
            }
        }
        flush(&mut points, &mut lines, &mut split);

        (split.len() > 1).then_some(split)
    }
}

/// Partitions by element count: at most `max` rects or paths per
/// annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountPartitioner {
    max: usize,
}

impl CountPartitioner {
    /// Creates a partitioner allowing `max` elements per partition.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self { max: max.max(1) }
    }
}

impl GeometryPartitioner for CountPartitioner {
    fn split_rects(&self, rects: &[Rect]) -> Option<Vec<Vec<Rect>>> {
        (rects.len() > self.max).then(|| rects.chunks(self.max).map(<[Rect]>::to_vec).collect())
    }

    fn split_paths(&self, paths: &[Vec<f64>]) -> Option<Vec<Vec<Vec<f64>>>> {
        (paths.len() > self.max).then(|| paths.chunks(self.max).map(<[Vec<f64>]>::to_vec).collect())
    }
}

/// Result of splitting one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Key of the deleted source annotation.
    pub source: String,
    /// Keys of the created annotations, in partition order.
    pub created: Vec<String>,
}

enum Geometry {
    Rects(Vec<Vec<Rect>>),
    Paths(Vec<Vec<Vec<f64>>>),
}

impl Geometry {
    fn len(&self) -> usize {
        match self {
            Geometry::Rects(parts) => parts.len(),
            Geometry::Paths(parts) => parts.len(),
        }
    }
}

/// Splits oversized annotations.
#[derive(Debug, Clone)]
pub struct AnnotationSplitter<P = PositionSizePartitioner> {
    partitioner: P,
}

impl AnnotationSplitter<PositionSizePartitioner> {
    /// Creates a splitter using the configured position size limit.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(PositionSizePartitioner::new(config.position_size_limit))
    }
}

impl<P: GeometryPartitioner> AnnotationSplitter<P> {
    /// Creates a splitter with a custom partitioner.
    #[must_use]
    pub fn new(partitioner: P) -> Self {
        Self { partitioner }
    }

    /// Splits the annotation `key` if its geometry is too large.
    ///
    /// Highlights are split by rects and ink annotations by paths; other
    /// items are never split. Returns `None` when nothing was done.
    pub fn split(
        &self,
        state: &mut StoreState,
        library: LibraryId,
        key: &str,
    ) -> Option<SplitOutcome> {
        let source = state.item(library, key)?;
        let geometry = match source.annotation_type()? {
            item_types::HIGHLIGHT => Geometry::Rects(self.partitioner.split_rects(&source.rects)?),
            item_types::INK => Geometry::Paths(self.partitioner.split_paths(&source.paths)?),
            _ => return None,
        };
        let source = source.clone();

        let mut created = Vec::with_capacity(geometry.len());
        let copies: Vec<Item> = match geometry {
            Geometry::Rects(parts) => parts
                .into_iter()
                .map(|rects| {
                    let mut copy = copy_annotation(state, &source, &created, ChangeFlags::RECTS);
                    copy.rects = rects;
                    created.push(copy.key.clone());
                    copy
                })
                .collect(),
            Geometry::Paths(parts) => parts
                .into_iter()
                .map(|paths| {
                    let mut copy = copy_annotation(state, &source, &created, ChangeFlags::PATHS);
                    copy.paths = paths;
                    created.push(copy.key.clone());
                    copy
                })
                .collect(),
        };

        for copy in copies {
            state.insert(copy);
        }
        // Copies hold the same tags and users, so the source can go without
        // pruning anything they still reference.
        state.delete::<Item>(library, key);

        if let Some(parent) = source.parent.as_deref() {
            if let Some(parent) = state.item_mut(library, parent) {
                ChangeTracker::force_dirty(parent);
            }
        }

        info!(
            library = %library,
            key,
            parts = created.len(),
            "split oversized annotation"
        );
        Some(SplitOutcome {
            source: key.to_owned(),
            created,
        })
    }

    /// Splits every annotation in `keys` that needs it.
    pub fn split_all<'k>(
        &self,
        state: &mut StoreState,
        library: LibraryId,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Vec<SplitOutcome> {
        keys.into_iter()
            .filter_map(|key| {
                let outcome = self.split(state, library, key);
                if outcome.is_none() {
                    debug!(library = %library, key, "annotation not split");
                }
                outcome
            })
            .collect()
    }
}

/// Copies everything but the geometry of `source` under a fresh key.
///
/// The copy counts as a sync response: it is synced at version 0, so the
/// remote treats it as new, and carries the changes that make the remote
/// create it.
fn copy_annotation(
    state: &StoreState,
    source: &Item,
    taken: &[String],
    geometry: ChangeFlags,
) -> Item {
    let key = loop {
        let key = KeyGenerator::new_key();
        if state.item(source.library, &key).is_none() && !taken.contains(&key) {
            break key;
        }
    };

    let mut copy = Item::new(source.library, key, source.item_type.clone(), source.date_added);
    copy.date_modified = source.date_modified;
    copy.trash = source.trash;
    copy.parent.clone_from(&source.parent);
    copy.created_by = source.created_by;
    copy.modified_by = source.modified_by;
    copy.tags.clone_from(&source.tags);
    copy.fields = source
        .fields
        .iter()
        .map(|field| Field {
            changed: true,
            ..field.clone()
        })
        .collect();
    copy.update_metadata();

    copy.sync = SyncMeta::synced(0);
    copy.sync.record_change(
        ChangeFlags::PARENT | ChangeFlags::FIELDS | ChangeFlags::TYPE | ChangeFlags::TAGS,
        ChangeOrigin::SyncResponse,
    );
    copy.sync.record_change(geometry, ChangeOrigin::SyncResponse);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::{FieldKey, TagKind, TypedTag};
    use bibsync_protocol::UpdateParameters;
    use chrono::Utc;

    use crate::batcher::UploadBatcher;

    const LIB: LibraryId = LibraryId::User;

    fn annotation(key: &str, kind: &str) -> Item {
        let mut item = Item::new(LIB, key, item_types::ANNOTATION, Utc::now());
        item.parent = Some("PDF".into());
        item.fields.push(Field::new(FieldKey::AnnotationType, kind));
        item.fields.push(Field::new(FieldKey::AnnotationText, "passage"));
        item.tags = vec![
            TypedTag::new("method", TagKind::Manual),
            TypedTag::new("auto", TagKind::Automatic),
        ];
        item.created_by = Some(7);
        item.sync = SyncMeta::synced(12);
        item
    }

    fn store_with(source: Item) -> StoreState {
        let mut state = StoreState::new();
        let mut parent = Item::new(LIB, "PDF", item_types::ATTACHMENT, Utc::now());
        parent.sync = SyncMeta::synced(3);
        state.insert(parent);
        for tag in &source.tags {
            state.ensure_tag(LIB, &tag.name);
        }
        state.insert(source);
        state
    }

    fn highlight(rects: usize) -> Item {
        let mut item = annotation("SRC", item_types::HIGHLIGHT);
        item.rects = (0..rects)
            .map(|index| {
                let y = index as f64 * 10.0;
                Rect::new(1.0, y, 2.0, y + 5.0)
            })
            .collect();
        item
    }

    #[test]
    fn highlight_split_by_count() {
        let mut state = store_with(highlight(50));
        let splitter = AnnotationSplitter::new(CountPartitioner::new(10));

        let outcome = splitter.split(&mut state, LIB, "SRC").unwrap();

        assert_eq!(outcome.created.len(), 5);
        assert!(state.item(LIB, "SRC").is_none());
        let source_tags = highlight(0).tags;
        let mut total = 0;
        for key in &outcome.created {
            let copy = state.item(LIB, key).unwrap();
            total += copy.rects.len();
            assert_eq!(copy.tags, source_tags);
            assert_eq!(copy.parent.as_deref(), Some("PDF"));
            assert_eq!(copy.created_by, Some(7));
            assert_eq!(copy.field_value(&FieldKey::AnnotationText), Some("passage"));
            assert!(copy.fields.iter().all(|field| field.changed));
        }
        assert_eq!(total, 50);
    }

    #[test]
    fn copies_are_sync_responses() {
        let mut state = store_with(highlight(20));
        let outcome = AnnotationSplitter::new(CountPartitioner::new(10))
            .split(&mut state, LIB, "SRC")
            .unwrap();

        let copy = state.item(LIB, &outcome.created[0]).unwrap();
        assert_eq!(copy.sync.change_origin, ChangeOrigin::SyncResponse);
        assert_eq!(copy.sync.version, 0);
        assert!(copy.sync.sync_state.is_synced());
        assert_eq!(
            copy.sync.change_set(),
            ChangeFlags::PARENT
                | ChangeFlags::FIELDS
                | ChangeFlags::TYPE
                | ChangeFlags::TAGS
                | ChangeFlags::RECTS
        );
        assert_eq!(copy.sync.changes.len(), 2);
    }

    #[test]
    fn copies_are_uploaded_as_new_objects() {
        let mut state = store_with(highlight(20));
        let outcome = AnnotationSplitter::new(CountPartitioner::new(10))
            .split(&mut state, LIB, "SRC")
            .unwrap();

        let config = SyncConfig::default();
        let batches = UploadBatcher::new(&config).write_batches_for::<Item>(&state, LIB, 40);
        let uploaded: Vec<&UpdateParameters> = batches
            .iter()
            .flat_map(|batch| &batch.parameters)
            .filter(|parameters| outcome.created.iter().any(|key| parameters["key"] == key.as_str()))
            .collect();

        assert_eq!(uploaded.len(), outcome.created.len());
        assert!(uploaded.iter().all(|parameters| parameters["version"] == 0));
    }

    #[test]
    fn parent_is_forced_dirty_and_tags_survive() {
        let mut state = store_with(highlight(20));
        AnnotationSplitter::new(CountPartitioner::new(10))
            .split(&mut state, LIB, "SRC")
            .unwrap();

        let parent = state.item(LIB, "PDF").unwrap();
        assert!(!parent.sync.sync_state.is_synced());
        assert!(parent.sync.change_set().is_empty());
        assert!(state.tag(LIB, "method").is_some());
        assert!(state.tag(LIB, "auto").is_some());
    }

    #[test]
    fn small_geometry_is_left_alone() {
        let mut state = store_with(highlight(3));
        let before = state.clone();

        let splitter = AnnotationSplitter::from_config(&SyncConfig::default());
        assert!(splitter.split(&mut state, LIB, "SRC").is_none());
        assert_eq!(state.item(LIB, "SRC"), before.item(LIB, "SRC"));
        assert!(state.item(LIB, "PDF").unwrap().sync.sync_state.is_synced());
    }

    #[test]
    fn non_annotations_are_not_split() {
        let mut item = highlight(50);
        item.item_type = item_types::NOTE.into();
        let mut state = store_with(item);

        let splitter = AnnotationSplitter::new(CountPartitioner::new(1));
        assert!(splitter.split(&mut state, LIB, "SRC").is_none());
        assert!(splitter.split(&mut state, LIB, "MISSING").is_none());
        assert!(state.item(LIB, "SRC").is_some());
    }

    #[test]
    fn ink_split_by_paths() {
        let mut item = annotation("SRC", item_types::INK);
        item.paths = vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0], vec![6.0, 7.0]];
        let mut state = store_with(item);

        let outcome = AnnotationSplitter::new(CountPartitioner::new(2))
            .split(&mut state, LIB, "SRC")
            .unwrap();

        assert_eq!(outcome.created.len(), 2);
        let first = state.item(LIB, &outcome.created[0]).unwrap();
        assert_eq!(first.paths, vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0]]);
        assert!(first.sync.change_set().contains(ChangeFlags::PATHS));
        assert!(!first.sync.change_set().contains(ChangeFlags::RECTS));
    }

    #[test]
    fn position_size_partitions_rects() {
        // Each rect "[1,2,3,4]," costs 10; with brackets 3 fit in 32.
        let rects: Vec<Rect> = (0..7u8)
            .map(|index| Rect::new(1.0, 2.0 + f64::from(index), 3.0, 4.0))
            .collect();
        let parts = PositionSizePartitioner::new(32).split_rects(&rects).unwrap();

        let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        // Sorted top to bottom.
        assert_eq!(parts[0][0].min_y, 8.0);
        assert_eq!(parts[2][0].min_y, 2.0);
    }

    #[test]
    fn position_size_measures_rounded_coordinates() {
        let rects = vec![Rect::new(1.00049, 2.0, 3.0, 4.0); 3];
        assert!(PositionSizePartitioner::new(32).split_rects(&rects).is_none());
    }

    #[test]
    fn position_size_partitions_paths() {
        // Each point "1,2," costs 4 and each path 3.
        let paths = vec![vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]; 4];
        let parts = PositionSizePartitioner::new(20).split_paths(&paths).unwrap();

        let points: usize = parts
            .iter()
            .flatten()
            .map(|path| path.len() / 2)
            .sum();
        assert_eq!(points, 12);
        assert!(parts.len() > 1);
        assert!(PositionSizePartitioner::default().split_paths(&paths).is_none());
    }

    #[test]
    fn empty_geometry_needs_no_split() {
        let partitioner = PositionSizePartitioner::new(1);
        assert!(partitioner.split_rects(&[]).is_none());
        assert!(partitioner.split_paths(&[]).is_none());
    }
}
