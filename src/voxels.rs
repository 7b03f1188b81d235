//! Voxel request buffers and the block/region copy kernel
//!
//! The kernel copies the intersection of one block with a requested slice or
//! subvolume, in either direction. Blocks are tightly packed 3D arrays in ZYX
//! order with X innermost and channels interleaved per voxel, so every shape
//! except YZ reduces its inner loop to one contiguous run copy per line.

use crate::error::{Result, VoxelError};
use crate::geometry::{BlockSize, DataShape, Geometry, Point3};
use crate::index::BlockIndex;
use crate::types::VoxelSpec;
use parking_lot::{RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::Arc;

/// Direction of a chunk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Copy block bytes into the request buffer.
    Get,
    /// Copy request bytes into the block.
    Put,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpType::Get => write!(f, "GET"),
            OpType::Put => write!(f, "PUT"),
        }
    }
}

/// Number of bytes in one block payload for the given layout.
pub fn block_bytes(block_size: BlockSize, spec: VoxelSpec) -> usize {
    block_size.total_voxels() as usize * spec.voxel_bytes() as usize
}

/// A slice or subvolume request buffer together with its geometry and pixel
/// layout.
///
/// The buffer is shared: clones refer to the same bytes, which is how chunk
/// tasks of one request all write into a single result image. Reads of
/// 2D slices use `stride` bytes per image row; subvolumes are fully packed
/// with derived strides.
#[derive(Clone)]
pub struct Voxels {
    geometry: Geometry,
    spec: VoxelSpec,
    data: Arc<RwLock<Vec<u8>>>,
    stride: i32,
}

impl Voxels {
    /// Allocate a zero-filled buffer for `geometry` with a tight stride.
    pub fn new(geometry: Geometry, spec: VoxelSpec) -> Self {
        let len = geometry.num_voxels() as usize * spec.voxel_bytes() as usize;
        Self {
            geometry,
            spec,
            data: Arc::new(RwLock::new(vec![0u8; len])),
            stride: geometry.width() * spec.voxel_bytes(),
        }
    }

    /// Wrap existing bytes, e.g. pixels decoded from a posted image. The
    /// data must cover the geometry at the given stride.
    pub fn with_data(
        geometry: Geometry,
        spec: VoxelSpec,
        data: Vec<u8>,
        stride: i32,
    ) -> Result<Self> {
        let row_bytes = geometry.width() * spec.voxel_bytes();
        if stride < row_bytes {
            return Err(VoxelError::BadRequest(format!(
                "Stride of {} bytes is too small for {} voxel rows of {} bytes",
                stride,
                geometry.width(),
                row_bytes
            )));
        }
        let needed = match geometry.shape() {
            DataShape::Vol => geometry.num_voxels() as usize * spec.voxel_bytes() as usize,
            _ => (geometry.height() as usize - 1) * stride as usize + row_bytes as usize,
        };
        if data.len() < needed {
            return Err(VoxelError::BadRequest(format!(
                "Too little data for {}: {} bytes, need {}",
                geometry,
                data.len(),
                needed
            )));
        }
        Ok(Self {
            geometry,
            spec,
            data: Arc::new(RwLock::new(data)),
            stride,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn spec(&self) -> VoxelSpec {
        self.spec
    }

    /// Bytes per image row for 2D iteration.
    pub fn stride(&self) -> i32 {
        self.stride
    }

    /// Read access to the underlying bytes.
    pub fn read_data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }
}

impl fmt::Display for Voxels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.geometry)
    }
}

fn copy_run(
    op: OpType,
    data: &mut [u8],
    data_i: usize,
    block: &mut [u8],
    block_i: usize,
    len: usize,
) {
    match op {
        OpType::Get => data[data_i..data_i + len].copy_from_slice(&block[block_i..block_i + len]),
        OpType::Put => block[block_i..block_i + len].copy_from_slice(&data[data_i..data_i + len]),
    }
}

/// Copy the intersection of `block` with the request region of `voxels`, in
/// the direction given by `op`.
///
/// The clamp of region bounds against block bounds below is the only guard
/// against copying past either buffer; all index arithmetic stays inside the
/// intersection.
pub fn copy_block(
    op: OpType,
    voxels: &Voxels,
    index: &BlockIndex,
    block: &mut [u8],
    block_size: BlockSize,
) -> Result<()> {
    let spec = voxels.spec();
    let voxel_bytes = spec.voxel_bytes();
    let geometry = *voxels.geometry();

    // Bounding voxel coordinates of the block, then of the intersection.
    let min_block_voxel = index.min_voxel(block_size);
    let max_block_voxel = index.max_voxel(block_size);
    let beg_vol = geometry.start_voxel().max(min_block_voxel);
    let end_vol = geometry.end_voxel().min(max_block_voxel - Point3::new(1, 1, 1));
    if beg_vol.x > end_vol.x || beg_vol.y > end_vol.y || beg_vol.z > end_vol.z {
        return Ok(());
    }

    // The same point in block-local and region-local coordinates.
    let block_beg = beg_vol - min_block_voxel;
    let beg = beg_vol - geometry.start_voxel();
    let end = end_vol - geometry.start_voxel();

    let vb = voxel_bytes as usize;
    let block_row = (block_size.x * voxel_bytes) as usize;
    let block_plane = block_size.y as usize * block_row;
    let stride = voxels.stride() as usize;

    let mut data = voxels.data.write();

    match geometry.shape() {
        DataShape::XY => {
            let mut block_i = block_beg.z as usize * block_plane
                + block_beg.y as usize * block_row
                + block_beg.x as usize * vb;
            let mut data_i = beg.y as usize * stride + beg.x as usize * vb;
            let run = (end.x - beg.x + 1) as usize * vb;
            for _y in beg.y..=end.y {
                copy_run(op, &mut data, data_i, block, block_i, run);
                block_i += block_row;
                data_i += stride;
            }
        }
        DataShape::XZ => {
            // The image's vertical axis is world Z, one block plane per row.
            let mut block_i = block_beg.z as usize * block_plane
                + block_beg.y as usize * block_row
                + block_beg.x as usize * vb;
            let mut data_i = beg.z as usize * stride + beg.x as usize * vb;
            let run = (end.x - beg.x + 1) as usize * vb;
            for _z in beg.z..=end.z {
                copy_run(op, &mut data, data_i, block, block_i, run);
                block_i += block_plane;
                data_i += stride;
            }
        }
        DataShape::YZ => {
            // X is not innermost on the block side, so copy voxel by voxel
            // walking Y across each block row.
            let mut bz = block_beg.z as usize;
            for z in beg.z..=end.z {
                let mut data_i = z as usize * stride + beg.y as usize * vb;
                let mut block_i = bz * block_plane
                    + block_beg.y as usize * block_row
                    + block_beg.x as usize * vb;
                for _y in beg.y..=end.y {
                    copy_run(op, &mut data, data_i, block, block_i, vb);
                    block_i += block_row;
                    data_i += vb;
                }
                bz += 1;
            }
        }
        DataShape::Vol => {
            let data_row = geometry.width() as usize * vb;
            let data_plane = geometry.height() as usize * data_row;
            let run = (end.x - beg.x + 1) as usize * vb;
            let mut block_z = block_beg.z as usize;
            for z in beg.z..=end.z {
                let mut block_y = block_beg.y as usize;
                for y in beg.y..=end.y {
                    let block_i = block_z * block_plane
                        + block_y * block_row
                        + block_beg.x as usize * vb;
                    let data_i =
                        z as usize * data_plane + y as usize * data_row + beg.x as usize * vb;
                    copy_run(op, &mut data, data_i, block, block_i, run);
                    block_y += 1;
                }
                block_z += 1;
            }
        }
        DataShape::Arb => {
            return Err(VoxelError::Unsupported(
                "Arbitrarily oriented planes are not supported".to_string(),
            ))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Datatype;

    fn bs() -> BlockSize {
        BlockSize::default()
    }

    fn spec() -> VoxelSpec {
        Datatype::grayscale8().spec()
    }

    /// Block filled so that the voxel at (x, y, z) holds a value derived
    /// from its coordinates, for checking index arithmetic.
    fn tagged_block() -> Vec<u8> {
        let mut block = vec![0u8; block_bytes(bs(), spec())];
        for z in 0..16 {
            for y in 0..16 {
                for x in 0..16 {
                    block[z * 256 + y * 16 + x] = (x ^ y ^ z) as u8;
                }
            }
        }
        block
    }

    #[test]
    fn test_get_xy_within_one_block() {
        let g = Geometry::slice(DataShape::XY, Point3::new(2, 3, 5), 4, 2).unwrap();
        let v = Voxels::new(g, spec());
        let mut block = tagged_block();

        copy_block(OpType::Get, &v, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();

        let data = v.read_data();
        for y in 0..2usize {
            for x in 0..4usize {
                let expected = ((x + 2) ^ (y + 3) ^ 5) as u8;
                assert_eq!(data[y * 4 + x], expected, "pixel ({},{})", x, y);
            }
        }
    }

    #[test]
    fn test_get_clamps_to_block_bounds() {
        // Region straddles blocks (0,0,0) and (1,0,0); copying only the
        // first block must leave the second half untouched.
        let g = Geometry::slice(DataShape::XY, Point3::new(12, 0, 0), 8, 1).unwrap();
        let v = Voxels::new(g, spec());
        let mut block = vec![9u8; block_bytes(bs(), spec())];

        copy_block(OpType::Get, &v, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();

        let data = v.read_data();
        assert_eq!(&data[0..4], &[9, 9, 9, 9]);
        assert_eq!(&data[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_put_xy_then_get_roundtrip() {
        let g = Geometry::slice(DataShape::XY, Point3::new(2, 3, 5), 4, 2).unwrap();
        let pixels: Vec<u8> = (1..=8).collect();
        let v = Voxels::with_data(g, spec(), pixels.clone(), 4).unwrap();
        let mut block = vec![0u8; block_bytes(bs(), spec())];

        copy_block(OpType::Put, &v, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();

        // Only the intersection rows may be nonzero.
        assert_eq!(block.iter().filter(|&&b| b != 0).count(), 8);
        assert_eq!(&block[5 * 256 + 3 * 16 + 2..][..4], &[1, 2, 3, 4]);
        assert_eq!(&block[5 * 256 + 4 * 16 + 2..][..4], &[5, 6, 7, 8]);

        let out = Voxels::new(g, spec());
        copy_block(OpType::Get, &out, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();
        assert_eq!(&*out.read_data(), &pixels);
    }

    #[test]
    fn test_xz_slice_walks_planes() {
        let g = Geometry::slice(DataShape::XZ, Point3::new(1, 7, 2), 3, 2).unwrap();
        let v = Voxels::new(g, spec());
        let mut block = tagged_block();

        copy_block(OpType::Get, &v, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();

        let data = v.read_data();
        for z in 0..2usize {
            for x in 0..3usize {
                let expected = ((x + 1) ^ 7 ^ (z + 2)) as u8;
                assert_eq!(data[z * 3 + x], expected, "pixel ({},{})", x, z);
            }
        }
    }

    #[test]
    fn test_yz_slice_is_voxelwise() {
        let g = Geometry::slice(DataShape::YZ, Point3::new(9, 1, 2), 3, 2).unwrap();
        let v = Voxels::new(g, spec());
        let mut block = tagged_block();

        copy_block(OpType::Get, &v, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();

        let data = v.read_data();
        for z in 0..2usize {
            for y in 0..3usize {
                let expected = (9 ^ (y + 1) ^ (z + 2)) as u8;
                assert_eq!(data[z * 3 + y], expected, "pixel ({},{})", y, z);
            }
        }
    }

    #[test]
    fn test_vol_roundtrip_within_block() {
        let g = Geometry::subvolume(Point3::new(1, 2, 3), Point3::new(4, 3, 2)).unwrap();
        let bytes: Vec<u8> = (0..24).map(|i| i as u8 + 1).collect();
        let v = Voxels::with_data(g, spec(), bytes.clone(), 4).unwrap();
        let mut block = vec![0u8; block_bytes(bs(), spec())];

        copy_block(OpType::Put, &v, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();
        assert_eq!(block.iter().filter(|&&b| b != 0).count(), 24);

        let out = Voxels::new(g, spec());
        copy_block(OpType::Get, &out, &BlockIndex::new(0, 0, 0), &mut block, bs()).unwrap();
        assert_eq!(&*out.read_data(), &bytes);
    }

    #[test]
    fn test_disjoint_block_copies_nothing() {
        let g = Geometry::slice(DataShape::XY, Point3::new(0, 0, 0), 8, 8).unwrap();
        let v = Voxels::new(g, spec());
        let mut block = vec![1u8; block_bytes(bs(), spec())];

        copy_block(OpType::Get, &v, &BlockIndex::new(3, 3, 3), &mut block, bs()).unwrap();
        assert!(v.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_with_data_validates_stride_and_len() {
        let g = Geometry::slice(DataShape::XY, Point3::ZERO, 8, 2).unwrap();
        assert!(Voxels::with_data(g, spec(), vec![0; 16], 4).is_err());
        assert!(Voxels::with_data(g, spec(), vec![0; 8], 8).is_err());
        assert!(Voxels::with_data(g, spec(), vec![0; 16], 8).is_ok());
    }
}
