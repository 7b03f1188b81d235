//! Data instances and the request orchestrator
//!
//! A request region is decomposed into one ranged key scan per (z, y) block
//! row, each overlapping block becomes a chunk gated by the worker pool, and
//! a completion barrier holds the request open until every chunk finished.

use crate::codec::{self, ChecksumMethod, CompressionMethod};
use crate::error::{Result, VoxelError};
use crate::geometry::{BlockSize, Geometry, Point3};
use crate::index::{BlockIndex, BlockKey};
use crate::pixel::image_to_raw;
use crate::pool::{ChunkPool, VersionLocks};
use crate::store::KeyValueStore;
use crate::types::{DataId, DatasetId, Datatype, VersionId, VoxelSpec};
use crate::voxels::{self, OpType, Voxels};
use bytes::Bytes;
use futures::future::join_all;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::debug;

fn default_block_size() -> [i32; 3] {
    [16, 16, 16]
}

fn default_voxel_res() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_voxel_res_units() -> String {
    "nanometers".to_string()
}

/// Per-instance configuration options for a data instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Block size in voxels along (x, y, z).
    #[serde(default = "default_block_size", rename = "BlockSize")]
    pub block_size: [i32; 3],

    /// Relative resolution of voxels in the volume.
    #[serde(default = "default_voxel_res", rename = "VoxelRes")]
    pub voxel_res: [f32; 3],

    /// Units of resolution, e.g. "nanometers".
    #[serde(default = "default_voxel_res_units", rename = "VoxelResUnits")]
    pub voxel_res_units: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            voxel_res: default_voxel_res(),
            voxel_res_units: default_voxel_res_units(),
        }
    }
}

impl DataConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One named data instance of a voxel datatype within a dataset.
///
/// Carries the per-instance settings (block size, resolution) and the
/// engine handles; the invariants shared by all instances of the datatype
/// (channels, bytes per voxel) stay on [`Datatype`].
pub struct Data {
    dataset_id: DatasetId,
    id: DataId,
    name: String,
    datatype: Arc<Datatype>,
    block_size: BlockSize,
    voxel_res: [f32; 3],
    voxel_res_units: String,
    compression: CompressionMethod,
    checksum: ChecksumMethod,
    store: Arc<dyn KeyValueStore>,
    pool: ChunkPool,
    version_locks: VersionLocks,
}

impl Data {
    pub fn new(
        dataset_id: DatasetId,
        id: DataId,
        name: impl Into<String>,
        datatype: Arc<Datatype>,
        config: DataConfig,
        store: Arc<dyn KeyValueStore>,
        pool: ChunkPool,
    ) -> Result<Self> {
        let [bx, by, bz] = config.block_size;
        let block_size = BlockSize::new(bx, by, bz)?;
        Ok(Self {
            dataset_id,
            id,
            name: name.into(),
            datatype,
            block_size,
            voxel_res: config.voxel_res,
            voxel_res_units: config.voxel_res_units,
            compression: CompressionMethod::Deflate,
            checksum: ChecksumMethod::Crc32,
            store,
            pool,
            version_locks: VersionLocks::new(),
        })
    }

    /// Set the storage envelope compression for written blocks.
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Set the storage envelope checksum for written blocks.
    pub fn with_checksum(mut self, method: ChecksumMethod) -> Self {
        self.checksum = method;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    pub fn spec(&self) -> VoxelSpec {
        self.datatype.spec()
    }

    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    pub fn voxel_res(&self) -> [f32; 3] {
        self.voxel_res
    }

    pub fn voxel_res_units(&self) -> &str {
        &self.voxel_res_units
    }

    /// Allocate a zero-filled request buffer for `geometry` with this
    /// instance's pixel layout.
    pub fn voxels(&self, geometry: Geometry) -> Voxels {
        Voxels::new(geometry, self.spec())
    }

    /// Wrap a decoded image as a write buffer for `slice`. The image must
    /// match the slice dimensions and provide full rows.
    pub fn image_to_voxels(&self, img: &DynamicImage, slice: Geometry) -> Result<Voxels> {
        let spec = self.spec();
        let (raw, width, height) = image_to_raw(img, spec)?;
        if width as i32 != slice.width() || height as i32 != slice.height() {
            return Err(VoxelError::BadRequest(format!(
                "Image of {} x {} does not cover {}",
                width, height, slice
            )));
        }
        let stride = slice.width() * spec.voxel_bytes();
        Voxels::with_data(slice, spec, raw, stride)
    }

    /// Read the region described by `voxels` from `version`, filling its
    /// buffer. Voxels in blocks never written remain zero.
    pub async fn get_voxels(&self, version: VersionId, voxels: &Voxels) -> Result<()> {
        let start_time = Instant::now();
        let geometry = *voxels.geometry();
        let (s_block, e_block) = self.block_extents(&geometry);
        let block_len = voxels::block_bytes(self.block_size, self.spec());

        let mut chunks: Vec<JoinHandle<Result<()>>> = Vec::new();
        for z in s_block.z..=e_block.z {
            for y in s_block.y..=e_block.y {
                // An x span on a fixed (y, z) line is one contiguous key range.
                let (k0, k1) = BlockKey::range_for_line(
                    self.dataset_id,
                    self.id,
                    version,
                    s_block.x,
                    e_block.x,
                    y,
                    z,
                );
                let pairs = self.store.get_range(&k0.encode(), &k1.encode()).await?;
                for (key, value) in pairs {
                    chunks.push(self.submit_get_chunk(key, value, voxels, block_len).await?);
                }
            }
        }

        let result = wait_for_chunks(chunks).await;
        debug!(
            data = %self.name,
            version,
            elapsed = ?start_time.elapsed(),
            "GET {}", geometry
        );
        result
    }

    /// Write the region described by `voxels` into `version`.
    ///
    /// Each overlapped block is read, merged with the incoming region, and
    /// written back; the per-version writer lock is held for the whole call
    /// so concurrent writes cannot interleave their read-modify-write
    /// cycles. Readers are not blocked and may observe partial writes.
    pub async fn put_voxels(&self, version: VersionId, voxels: &Voxels) -> Result<()> {
        let start_time = Instant::now();
        let write_lock = self.version_locks.get_or_create(self.id, version);
        let _write_guard = write_lock.lock().await;

        let geometry = *voxels.geometry();
        let (s_block, e_block) = self.block_extents(&geometry);
        let block_len = voxels::block_bytes(self.block_size, self.spec());

        let mut chunks: Vec<JoinHandle<Result<()>>> = Vec::new();
        for z in s_block.z..=e_block.z {
            for y in s_block.y..=e_block.y {
                let (k0, k1) = BlockKey::range_for_line(
                    self.dataset_id,
                    self.id,
                    version,
                    s_block.x,
                    e_block.x,
                    y,
                    z,
                );
                // Fetch what exists on this row, then pair each x with its
                // stored payload or a fresh zero block.
                let pairs = self.store.get_range(&k0.encode(), &k1.encode()).await?;
                let mut existing = pairs.into_iter().peekable();
                for x in s_block.x..=e_block.x {
                    let index = BlockIndex::new(x, y, z);
                    let old = match existing.peek() {
                        Some((key, _)) if decode_chunk_key(key).index.x() == x => {
                            existing.next().map(|(_, value)| value)
                        }
                        _ => None,
                    };
                    chunks.push(self.submit_put_chunk(version, index, old, voxels, block_len).await?);
                }
            }
        }

        let result = wait_for_chunks(chunks).await;
        debug!(
            data = %self.name,
            version,
            elapsed = ?start_time.elapsed(),
            "PUT {}", geometry
        );
        result
    }

    /// Read a 2D slice and return the filled request buffer, ready for
    /// encoding through a slice view.
    pub async fn get_image(&self, version: VersionId, slice: Geometry) -> Result<Voxels> {
        let voxels = self.voxels(slice);
        self.get_voxels(version, &voxels).await?;
        Ok(voxels)
    }

    /// Decode and write a posted image at `slice`'s offset.
    pub async fn put_image(
        &self,
        version: VersionId,
        img: &DynamicImage,
        slice: Geometry,
    ) -> Result<()> {
        let voxels = self.image_to_voxels(img, slice)?;
        self.put_voxels(version, &voxels).await
    }

    fn block_extents(&self, geometry: &Geometry) -> (Point3, Point3) {
        (
            geometry.start_voxel().block_coord(self.block_size),
            geometry.end_voxel().block_coord(self.block_size),
        )
    }

    async fn submit_get_chunk(
        &self,
        key: Vec<u8>,
        value: Bytes,
        voxels: &Voxels,
        block_len: usize,
    ) -> Result<JoinHandle<Result<()>>> {
        let permit = self.pool.acquire().await?;
        let voxels = voxels.clone();
        let block_size = self.block_size;
        Ok(tokio::spawn(async move {
            let _permit = permit;
            let index = decode_chunk_key(&key).index;
            let mut block = decode_block(&value, block_len)?;
            voxels::copy_block(OpType::Get, &voxels, &index, &mut block, block_size)
        }))
    }

    async fn submit_put_chunk(
        &self,
        version: VersionId,
        index: BlockIndex,
        old: Option<Bytes>,
        voxels: &Voxels,
        block_len: usize,
    ) -> Result<JoinHandle<Result<()>>> {
        let permit = self.pool.acquire().await?;
        let voxels = voxels.clone();
        let store = Arc::clone(&self.store);
        let block_size = self.block_size;
        let key = BlockKey::new(self.dataset_id, self.id, version, index);
        let compression = self.compression;
        let checksum = self.checksum;
        Ok(tokio::spawn(async move {
            let _permit = permit;
            let mut block = match old {
                Some(value) => decode_block(&value, block_len)?,
                None => vec![0u8; block_len],
            };
            voxels::copy_block(OpType::Put, &voxels, &index, &mut block, block_size)?;
            let envelope = codec::serialize(&block, compression, checksum)?;
            store.put(&key.encode(), envelope).await
        }))
    }
}

/// Decode a block key delivered by the store inside a chunk. A key that is
/// not a block key here means the keyspace layout itself is broken, which is
/// a programmer bug, not a request error.
fn decode_chunk_key(key: &[u8]) -> BlockKey {
    match BlockKey::decode(key) {
        Ok(key) => key,
        Err(err) => panic!("Chunk key is not a block key: {}", err),
    }
}

fn decode_block(value: &[u8], block_len: usize) -> Result<Vec<u8>> {
    let block = codec::deserialize(value, true, Some(block_len))?;
    if block.len() != block_len {
        return Err(VoxelError::Codec(format!(
            "Retrieved block is {} bytes, not the {} byte block size",
            block.len(),
            block_len
        )));
    }
    Ok(block)
}

/// Barrier over all submitted chunks: waits for every chunk to finish and
/// returns the first error observed. A panicked chunk takes the process
/// down rather than let a corrupt request complete quietly.
async fn wait_for_chunks(chunks: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_err = None;
    for joined in join_all(chunks).await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
            Err(join_err) if join_err.is_panic() => {
                std::panic::resume_unwind(join_err.into_panic())
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(VoxelError::Invariant(join_err.to_string()));
                }
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
