//! Region-of-interest span storage and the ordered-key membership iterator

use crate::error::{Result, VoxelError};
use crate::geometry::{BlockSize, Geometry};
use crate::index::{max_index_for_z, min_index_for_z, BlockIndex, BlockKey};
use crate::store::KeyValueStore;
use crate::types::{DataId, DatasetId, VersionId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One run of included blocks on a (z, y) row: every block (x, y, z) with
/// `x0 <= x <= x1` is inside the region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub z: i32,
    pub y: i32,
    pub x0: i32,
    pub x1: i32,
}

impl Span {
    pub fn new(z: i32, y: i32, x0: i32, x1: i32) -> Self {
        Self { z, y, x0, x1 }
    }
}

/// A persisted region of interest. Spans live in the ROI's own keyspace,
/// one entry per span keyed by (z, y, x0), so a ranged scan returns them in
/// the same (z, y, x) order the block keys of a volume scan follow.
pub struct Roi {
    dataset_id: DatasetId,
    id: DataId,
    block_size: BlockSize,
    store: Arc<dyn KeyValueStore>,
}

impl Roi {
    pub fn new(
        dataset_id: DatasetId,
        id: DataId,
        block_size: BlockSize,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            dataset_id,
            id,
            block_size,
            store,
        }
    }

    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Persist `spans` for `version`. Spans must be sorted by (z, y, x0)
    /// and spans on the same row must not overlap.
    pub async fn put_spans(&self, version: VersionId, spans: &[Span]) -> Result<()> {
        for pair in spans.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let in_order = (a.z, a.y, a.x0) < (b.z, b.y, b.x0);
            let disjoint = (a.z, a.y) != (b.z, b.y) || b.x0 > a.x1;
            if !in_order || !disjoint {
                return Err(VoxelError::BadRequest(format!(
                    "Spans must be sorted and disjoint; ({},{},{}..{}) precedes ({},{},{}..{})",
                    a.z, a.y, a.x0, a.x1, b.z, b.y, b.x0, b.x1
                )));
            }
        }
        for span in spans {
            if span.x0 > span.x1 {
                return Err(VoxelError::BadRequest(format!(
                    "Span x0 {} exceeds x1 {}",
                    span.x0, span.x1
                )));
            }
            let key = self.span_key(version, span);
            let value = Bytes::from(bincode::serialize(span)?);
            self.store.put(&key.encode(), value).await?;
        }
        Ok(())
    }

    /// Fetch every span with a block Z coordinate in `[min_z, max_z]`, in
    /// (z, y, x0) order, via one ranged scan.
    pub async fn get_spans(&self, version: VersionId, min_z: i32, max_z: i32) -> Result<Vec<Span>> {
        let start = BlockKey::new(self.dataset_id, self.id, version, min_index_for_z(min_z));
        let end = BlockKey::new(self.dataset_id, self.id, version, max_index_for_z(max_z));
        let pairs = self.store.get_range(&start.encode(), &end.encode()).await?;

        let mut spans = Vec::with_capacity(pairs.len());
        for (_, value) in pairs {
            spans.push(bincode::deserialize(&value)?);
        }
        Ok(spans)
    }

    /// Build a membership iterator covering the block Z extent of `bounds`.
    pub async fn iterator(&self, version: VersionId, bounds: &Geometry) -> Result<RoiIterator> {
        let min_z = bounds.start_voxel().block_coord(self.block_size).z;
        let max_z = bounds.end_voxel().block_coord(self.block_size).z;
        let spans = self.get_spans(version, min_z, max_z).await?;
        Ok(RoiIterator::new(spans))
    }

    fn span_key(&self, version: VersionId, span: &Span) -> BlockKey {
        BlockKey::new(
            self.dataset_id,
            self.id,
            version,
            BlockIndex::new(span.x0, span.y, span.z),
        )
    }
}

/// Stateful membership cursor over an ordered span list.
///
/// When block keys are fed in non-decreasing (z, y, x) order, the cursor
/// only ever moves forward, so a full volume scan costs amortised O(1) per
/// key. Feeding keys out of order may yield false negatives; call `reset`
/// before rewinding.
pub struct RoiIterator {
    spans: Vec<Span>,
    cur_span: usize,
}

impl RoiIterator {
    pub fn new(spans: Vec<Span>) -> Self {
        Self { spans, cur_span: 0 }
    }

    /// Rewind the cursor to the first span.
    pub fn reset(&mut self) {
        self.cur_span = 0;
    }

    /// Whether the block at `index` lies inside the region of interest.
    pub fn inside(&mut self, index: BlockIndex) -> bool {
        // Fast forward past spans that precede the key, then compare.
        while let Some(span) = self.spans.get(self.cur_span) {
            if span.z < index.z() {
                self.cur_span += 1;
                continue;
            }
            if span.z > index.z() {
                return false;
            }
            if span.y < index.y() {
                self.cur_span += 1;
                continue;
            }
            if span.y > index.y() {
                return false;
            }
            if span.x0 > index.x() {
                return false;
            }
            if span.x1 >= index.x() {
                return true;
            }
            self.cur_span += 1;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn spans() -> Vec<Span> {
        vec![
            Span::new(0, 0, 0, 2),
            Span::new(0, 1, 1, 3),
            Span::new(1, 0, 0, 0),
        ]
    }

    /// Feed all blocks of the (0,0,0)..(3,1,1) cuboid in ascending ZYX order
    /// and collect those reported inside.
    fn scan(it: &mut RoiIterator) -> Vec<(i32, i32, i32)> {
        let mut inside = Vec::new();
        for z in 0..=1 {
            for y in 0..=1 {
                for x in 0..=3 {
                    if it.inside(BlockIndex::new(x, y, z)) {
                        inside.push((x, y, z));
                    }
                }
            }
        }
        inside
    }

    #[test]
    fn test_inside_matches_spans_in_order() {
        let mut it = RoiIterator::new(spans());
        assert_eq!(
            scan(&mut it),
            vec![
                (0, 0, 0),
                (1, 0, 0),
                (2, 0, 0),
                (1, 1, 0),
                (2, 1, 0),
                (3, 1, 0),
                (0, 0, 1),
            ]
        );
    }

    #[test]
    fn test_reset_allows_rescan() {
        let mut it = RoiIterator::new(spans());
        let first = scan(&mut it);

        // Cursor has walked off the end; a rewound scan must agree.
        assert!(!it.inside(BlockIndex::new(0, 0, 0)));
        it.reset();
        assert_eq!(scan(&mut it), first);
    }

    #[test]
    fn test_empty_roi_contains_nothing() {
        let mut it = RoiIterator::new(Vec::new());
        assert!(!it.inside(BlockIndex::new(0, 0, 0)));
    }

    #[tokio::test]
    async fn test_spans_roundtrip_through_store() {
        let store = Arc::new(MemoryStore::new());
        let roi = Roi::new(1, 7, BlockSize::default(), store);

        roi.put_spans(4, &spans()).await.unwrap();
        assert_eq!(roi.get_spans(4, 0, 1).await.unwrap(), spans());
        // Z-bounded fetch drops the z=1 span.
        assert_eq!(roi.get_spans(4, 0, 0).await.unwrap(), &spans()[..2]);
        // Other versions see nothing.
        assert!(roi.get_spans(5, 0, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_spans_validates_order() {
        let store = Arc::new(MemoryStore::new());
        let roi = Roi::new(1, 7, BlockSize::default(), store);

        let unsorted = vec![Span::new(1, 0, 0, 0), Span::new(0, 0, 0, 2)];
        assert!(roi.put_spans(1, &unsorted).await.is_err());

        let overlapping = vec![Span::new(0, 0, 0, 4), Span::new(0, 0, 3, 6)];
        assert!(roi.put_spans(1, &overlapping).await.is_err());

        let backwards = vec![Span::new(0, 0, 5, 2)];
        assert!(roi.put_spans(1, &backwards).await.is_err());
    }

    #[tokio::test]
    async fn test_iterator_bounded_by_geometry() {
        use crate::geometry::{DataShape, Point3};

        let store = Arc::new(MemoryStore::new());
        let roi = Roi::new(1, 7, BlockSize::default(), store);
        roi.put_spans(4, &spans()).await.unwrap();

        // An XY slice at z=0 only loads plane-0 spans, so the z=1 span
        // is invisible.
        let bounds = Geometry::slice(DataShape::XY, Point3::ZERO, 64, 32).unwrap();
        let mut it = roi.iterator(4, &bounds).await.unwrap();
        assert!(it.inside(BlockIndex::new(0, 0, 0)));
        assert!(!it.inside(BlockIndex::new(0, 0, 1)));
    }
}
