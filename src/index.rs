//! ZYX block indexing and key construction for the ordered store
//!
//! Block keys sort lexicographically by (z, y, x), so a fixed (z, y) line of
//! blocks occupies one contiguous key interval. Both the request orchestrator
//! and the ROI iterator depend on this ordering.

use crate::error::{Result, VoxelError};
use crate::geometry::{BlockSize, Point3};
use crate::types::{DataId, DatasetId, VersionId};
use std::cmp::Ordering;
use std::fmt;

/// The coordinate of one block in block space, totally ordered by (z, y, x)
/// with x innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIndex {
    x: i32,
    y: i32,
    z: i32,
}

/// Encodes a signed coordinate so that unsigned byte order matches signed
/// numeric order.
fn order_encode(v: i32) -> [u8; 4] {
    ((v as u32) ^ 0x8000_0000).to_be_bytes()
}

fn order_decode(b: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(b);
    (u32::from_be_bytes(buf) ^ 0x8000_0000) as i32
}

impl BlockIndex {
    /// Length of the byte encoding: three order-preserving i32 components.
    pub const ENCODED_LEN: usize = 12;

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    /// Minimum voxel coordinate covered by this block.
    pub fn min_voxel(&self, block_size: BlockSize) -> Point3 {
        Point3::new(
            self.x * block_size.x,
            self.y * block_size.y,
            self.z * block_size.z,
        )
    }

    /// One past the maximum voxel coordinate of this block (half-open).
    pub fn max_voxel(&self, block_size: BlockSize) -> Point3 {
        self.min_voxel(block_size) + block_size.as_point()
    }

    /// Byte encoding whose lexicographic order equals (z, y, x) order.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&order_encode(self.z));
        buf[4..8].copy_from_slice(&order_encode(self.y));
        buf[8..12].copy_from_slice(&order_encode(self.x));
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(VoxelError::Invariant(format!(
                "Block index encoding is {} bytes, not {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        Ok(Self {
            z: order_decode(&bytes[0..4]),
            y: order_decode(&bytes[4..8]),
            x: order_decode(&bytes[8..12]),
        })
    }
}

impl Ord for BlockIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}

impl PartialOrd for BlockIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block ({},{},{})", self.x, self.y, self.z)
    }
}

/// Smallest index on block plane `z`, for ranged scans over whole Z planes.
pub fn min_index_for_z(z: i32) -> BlockIndex {
    BlockIndex::new(i32::MIN, i32::MIN, z)
}

/// Largest index on block plane `z`.
pub fn max_index_for_z(z: i32) -> BlockIndex {
    BlockIndex::new(i32::MAX, i32::MAX, z)
}

/// Full key for one block of one version of one data instance. The dataset,
/// data, and version ids prefix the block index so that a version's blocks
/// form a contiguous keyspace segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub dataset: DatasetId,
    pub data: DataId,
    pub version: VersionId,
    pub index: BlockIndex,
}

impl BlockKey {
    pub const ENCODED_LEN: usize = 12 + BlockIndex::ENCODED_LEN;

    pub fn new(dataset: DatasetId, data: DataId, version: VersionId, index: BlockIndex) -> Self {
        Self {
            dataset,
            data,
            version,
            index,
        }
    }

    /// Byte encoding whose lexicographic order is (dataset, data, version,
    /// z, y, x).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.extend_from_slice(&self.dataset.to_be_bytes());
        buf.extend_from_slice(&self.data.to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.index.encode());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(VoxelError::Invariant(format!(
                "Block key encoding is {} bytes, not {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[0..4]);
        let dataset = u32::from_be_bytes(id);
        id.copy_from_slice(&bytes[4..8]);
        let data = u32::from_be_bytes(id);
        id.copy_from_slice(&bytes[8..12]);
        let version = u32::from_be_bytes(id);
        let index = BlockIndex::decode(&bytes[12..])?;
        Ok(Self {
            dataset,
            data,
            version,
            index,
        })
    }

    /// Inclusive key bounds for the contiguous run of blocks with
    /// `x0 <= x <= x1` on the (y, z) line. For a fixed (y, z, version, data)
    /// the keys in this interval are exactly those blocks and no others,
    /// which is what permits a single ranged scan per row.
    pub fn range_for_line(
        dataset: DatasetId,
        data: DataId,
        version: VersionId,
        x0: i32,
        x1: i32,
        y: i32,
        z: i32,
    ) -> (BlockKey, BlockKey) {
        (
            BlockKey::new(dataset, data, version, BlockIndex::new(x0, y, z)),
            BlockKey::new(dataset, data, version, BlockIndex::new(x1, y, z)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_ordering_is_zyx() {
        let a = BlockIndex::new(5, 0, 0);
        let b = BlockIndex::new(0, 1, 0);
        let c = BlockIndex::new(0, 0, 1);
        assert!(a < b);
        assert!(b < c);
        assert!(BlockIndex::new(-1, 0, 0) < BlockIndex::new(0, 0, 0));
    }

    #[test]
    fn test_encoding_preserves_order() {
        let coords = [-100_000, -17, -1, 0, 1, 16, 99_999];
        let mut indices = Vec::new();
        for &z in &coords {
            for &y in &coords {
                for &x in &coords {
                    indices.push(BlockIndex::new(x, y, z));
                }
            }
        }
        let mut by_index = indices.clone();
        by_index.sort();
        let mut by_bytes = indices;
        by_bytes.sort_by_key(|i| i.encode());
        assert_eq!(by_index, by_bytes);
    }

    #[test]
    fn test_index_roundtrip() {
        let index = BlockIndex::new(-3, 7, 100);
        let decoded = BlockIndex::decode(&index.encode()).unwrap();
        assert_eq!(index, decoded);

        assert!(BlockIndex::decode(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_key_roundtrip() {
        let key = BlockKey::new(1, 2, 3, BlockIndex::new(-5, 0, 12));
        let decoded = BlockKey::decode(&key.encode()).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_block_voxel_bounds() {
        let bs = BlockSize::default();
        let index = BlockIndex::new(2, -1, 0);
        assert_eq!(index.min_voxel(bs), Point3::new(32, -16, 0));
        assert_eq!(index.max_voxel(bs), Point3::new(48, 0, 16));
    }

    #[test]
    fn test_line_range_is_tight() {
        let (k0, k1) = BlockKey::range_for_line(1, 2, 3, 0, 4, 7, 9);
        let lo = k0.encode();
        let hi = k1.encode();

        for x in 0..=4 {
            let k = BlockKey::new(1, 2, 3, BlockIndex::new(x, 7, 9)).encode();
            assert!(lo <= k && k <= hi);
        }
        // Neighbors on other rows, versions, or x outside the span fall outside.
        for key in [
            BlockKey::new(1, 2, 3, BlockIndex::new(-1, 7, 9)),
            BlockKey::new(1, 2, 3, BlockIndex::new(5, 7, 9)),
            BlockKey::new(1, 2, 3, BlockIndex::new(2, 6, 9)),
            BlockKey::new(1, 2, 3, BlockIndex::new(2, 8, 9)),
            BlockKey::new(1, 2, 3, BlockIndex::new(2, 7, 10)),
            BlockKey::new(1, 2, 4, BlockIndex::new(2, 7, 9)),
        ] {
            let k = key.encode();
            assert!(k < lo || k > hi);
        }
    }
}
