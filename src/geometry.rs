//! Geometry primitives: voxel coordinates, block sizes, and request regions

use crate::error::{Result, VoxelError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// A signed 3D coordinate in voxel or block space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point3 {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Componentwise maximum.
    pub fn max(&self, other: Point3) -> Point3 {
        Point3::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Componentwise minimum.
    pub fn min(&self, other: Point3) -> Point3 {
        Point3::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// The block coordinate containing this voxel, using floored division
    /// so that negative voxels map into the correct block.
    pub fn block_coord(&self, block_size: BlockSize) -> Point3 {
        Point3::new(
            self.x.div_euclid(block_size.x),
            self.y.div_euclid(block_size.y),
            self.z.div_euclid(block_size.z),
        )
    }

    /// The offset of this voxel within its block, always in `[0, block_size)`.
    pub fn block_offset(&self, block_size: BlockSize) -> Point3 {
        Point3::new(
            self.x.rem_euclid(block_size.x),
            self.y.rem_euclid(block_size.y),
            self.z.rem_euclid(block_size.z),
        )
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl FromStr for Point3 {
    type Err = VoxelError;

    /// Parses a coordinate string in the format "x,y,z".
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            return Err(VoxelError::BadRequest(format!(
                "Expected coordinate in the format \"x,y,z\", got {:?}",
                s
            )));
        }
        let mut coords = [0i32; 3];
        for (i, part) in parts.iter().enumerate() {
            coords[i] = part.trim().parse().map_err(|_| {
                VoxelError::BadRequest(format!("Illegal coordinate component {:?} in {:?}", part, s))
            })?;
        }
        Ok(Point3::new(coords[0], coords[1], coords[2]))
    }
}

/// Size of a block in voxels along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSize {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockSize {
    /// Create a new block size. All components must be positive.
    pub fn new(x: i32, y: i32, z: i32) -> Result<Self> {
        if x <= 0 || y <= 0 || z <= 0 {
            return Err(VoxelError::BadRequest(format!(
                "Block size must have positive components, got ({},{},{})",
                x, y, z
            )));
        }
        Ok(Self { x, y, z })
    }

    /// Total number of voxels in one block.
    pub fn total_voxels(&self) -> i64 {
        self.x as i64 * self.y as i64 * self.z as i64
    }

    pub fn as_point(&self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        // Common default for EM stacks: 16x16x16
        Self { x: 16, y: 16, z: 16 }
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {}", self.x, self.y, self.z)
    }
}

/// The shape of a requested region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataShape {
    /// Axis-aligned plane with X horizontal and Y vertical.
    XY,
    /// Axis-aligned plane with X horizontal and Z vertical.
    XZ,
    /// Axis-aligned plane with Y horizontal and Z vertical.
    YZ,
    /// 3D subvolume.
    Vol,
    /// Arbitrarily oriented plane. Parsed but not served.
    Arb,
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataShape::XY => "XY slice",
            DataShape::XZ => "XZ slice",
            DataShape::YZ => "YZ slice",
            DataShape::Vol => "volume",
            DataShape::Arb => "arbitrary plane",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DataShape {
    type Err = VoxelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xy" => Ok(DataShape::XY),
            "xz" => Ok(DataShape::XZ),
            "yz" => Ok(DataShape::YZ),
            "vol" => Ok(DataShape::Vol),
            "arb" => Ok(DataShape::Arb),
            _ => Err(VoxelError::BadRequest(format!(
                "Bad data shape given {:?}",
                s
            ))),
        }
    }
}

/// An axis-aligned request region: a 2D slice or a 3D subvolume.
///
/// For slices, `width` and `height` are the 2D image dimensions and map onto
/// world axes according to the shape: XY -> (x, y), XZ -> (x, z), YZ -> (y, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    shape: DataShape,
    start: Point3,
    size: Point3,
}

impl Geometry {
    /// Create a 2D slice region of `width` x `height` pixels at `offset`.
    pub fn slice(shape: DataShape, offset: Point3, width: i32, height: i32) -> Result<Self> {
        match shape {
            DataShape::XY | DataShape::XZ | DataShape::YZ => {}
            DataShape::Vol => {
                return Err(VoxelError::BadRequest(
                    "Volume geometry requires a 3D size".to_string(),
                ))
            }
            DataShape::Arb => {
                return Err(VoxelError::Unsupported(
                    "Arbitrarily oriented planes are not supported".to_string(),
                ))
            }
        }
        if width <= 0 || height <= 0 {
            return Err(VoxelError::BadRequest(format!(
                "Slice size must be positive, got {} x {}",
                width, height
            )));
        }
        Ok(Self {
            shape,
            start: offset,
            size: Point3::new(width, height, 1),
        })
    }

    /// Create a 3D subvolume region of `size` voxels at `offset`.
    pub fn subvolume(offset: Point3, size: Point3) -> Result<Self> {
        if size.x <= 0 || size.y <= 0 || size.z <= 0 {
            return Err(VoxelError::BadRequest(format!(
                "Subvolume size must be positive, got {}",
                size
            )));
        }
        Ok(Self {
            shape: DataShape::Vol,
            start: offset,
            size,
        })
    }

    /// Create a slice from URL-style strings: shape ("xy"), offset ("x,y,z"),
    /// and size ("dx,dy").
    pub fn slice_from_strings(shape: &str, offset: &str, size: &str) -> Result<Self> {
        let shape: DataShape = shape.parse()?;
        let offset: Point3 = offset.parse()?;
        let parts: Vec<&str> = size.split(',').collect();
        if parts.len() != 2 {
            return Err(VoxelError::BadRequest(format!(
                "Expected slice size in the format \"dx,dy\", got {:?}",
                size
            )));
        }
        let width = parts[0].trim().parse().map_err(|_| {
            VoxelError::BadRequest(format!("Illegal slice width {:?}", parts[0]))
        })?;
        let height = parts[1].trim().parse().map_err(|_| {
            VoxelError::BadRequest(format!("Illegal slice height {:?}", parts[1]))
        })?;
        Self::slice(shape, offset, width, height)
    }

    /// Create a subvolume from URL-style strings: offset ("x,y,z") and size
    /// ("dx,dy,dz").
    pub fn subvolume_from_strings(offset: &str, size: &str) -> Result<Self> {
        let offset: Point3 = offset.parse()?;
        let size: Point3 = size.parse()?;
        Self::subvolume(offset, size)
    }

    pub fn shape(&self) -> DataShape {
        self.shape
    }

    /// Minimum voxel coordinate covered by this region.
    pub fn start_voxel(&self) -> Point3 {
        self.start
    }

    /// Maximum voxel coordinate covered by this region (inclusive).
    pub fn end_voxel(&self) -> Point3 {
        let Point3 { x: w, y: h, z: d } = self.size;
        match self.shape {
            DataShape::XY => self.start + Point3::new(w - 1, h - 1, 0),
            DataShape::XZ => self.start + Point3::new(w - 1, 0, h - 1),
            DataShape::YZ => self.start + Point3::new(0, w - 1, h - 1),
            DataShape::Vol | DataShape::Arb => self.start + Point3::new(w - 1, h - 1, d - 1),
        }
    }

    pub fn width(&self) -> i32 {
        self.size.x
    }

    pub fn height(&self) -> i32 {
        self.size.y
    }

    pub fn depth(&self) -> i32 {
        self.size.z
    }

    pub fn num_voxels(&self) -> i64 {
        self.size.x as i64 * self.size.y as i64 * self.size.z as i64
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of size {} x {} x {} @ {}",
            self.shape, self.size.x, self.size.y, self.size.z, self.start
        )
    }
}
