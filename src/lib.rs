//! voxelstore - versioned voxel block engine
//!
//! A storage engine for large 3D scientific image volumes (e.g.
//! electron-microscopy stacks). The voxel space is partitioned into
//! fixed-size blocks, each persisted as one entry of an ordered key-value
//! store under a (z, y, x)-ordered block index, and arbitrary axis-aligned
//! 2D slices and 3D subvolumes are served by a map/reduce traversal over the
//! overlapping blocks.
//!
//! # Features
//!
//! - XY/XZ/YZ slice and subvolume reads and writes over interleaved
//!   multi-channel voxels
//! - One ranged key scan per block row; missing blocks read as zeros
//! - Bounded worker pool for chunk deserialization and copying
//! - Per-(data, version) writer lock serializing read-modify-write cycles
//! - Region-of-interest span store with an amortised O(1) membership
//!   iterator for ordered key feeds
//! - Compressed, checksummed block envelopes (deflate, zstd)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voxelstore::{
//!     ChunkPool, Data, DataConfig, DataShape, Datatype, Geometry, MemoryStore, Point3,
//! };
//!
//! # async fn example() -> voxelstore::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let data = Data::new(
//!     1, 1, "grayscale",
//!     Arc::new(Datatype::grayscale8()),
//!     DataConfig::default(),
//!     store,
//!     ChunkPool::with_default_tokens(),
//! )?;
//!
//! // Read a 200 x 200 XY slice at z = 100.
//! let slice = Geometry::slice(DataShape::XY, Point3::new(0, 0, 100), 200, 200)?;
//! let voxels = data.get_image(7, slice).await?;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod codec;
pub mod error;
pub mod geometry;
pub mod index;
pub mod pixel;
pub mod pool;
pub mod roi;
pub mod store;
pub mod types;
pub mod voxels;

// Re-exports
pub use access::{Data, DataConfig};
pub use codec::{ChecksumMethod, CompressionMethod, Compressor};
pub use error::{Result, VoxelError};
pub use geometry::{BlockSize, DataShape, Geometry, Point3};
pub use index::{BlockIndex, BlockKey};
pub use pixel::{ImageFormat, PixelKind, SliceView};
pub use pool::{ChunkPool, VersionLocks};
pub use roi::{Roi, RoiIterator, Span};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{DataId, DatasetId, Datatype, VersionId, VoxelSpec};
pub use voxels::{OpType, Voxels};

/// Version of the voxelstore implementation
pub const VOXELSTORE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VOXELSTORE_VERSION.is_empty());
    }
}
