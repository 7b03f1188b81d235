//! Identifiers and datatype-level invariants shared by all data instances

use crate::error::{Result, VoxelError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a dataset within the store.
pub type DatasetId = u32;

/// Identifies one data instance within a dataset.
pub type DataId = u32;

/// Identifies one version (branch node) of a data instance.
pub type VersionId = u32;

/// Per-voxel byte layout shared by every data instance of a datatype.
///
/// Channels are interleaved per voxel, so one voxel occupies
/// `bytes_per_voxel * channels_interleaved` consecutive bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelSpec {
    bytes_per_voxel: i32,
    channels_interleaved: i32,
}

impl VoxelSpec {
    /// Create a voxel spec. Bytes per voxel must be one of 1, 2, 4, or 8 and
    /// interleaved channels one of 1 or 4.
    pub fn new(bytes_per_voxel: i32, channels_interleaved: i32) -> Result<Self> {
        if !matches!(bytes_per_voxel, 1 | 2 | 4 | 8) {
            return Err(VoxelError::BadRequest(format!(
                "Bytes per voxel must be 1, 2, 4, or 8, got {}",
                bytes_per_voxel
            )));
        }
        if !matches!(channels_interleaved, 1 | 4) {
            return Err(VoxelError::BadRequest(format!(
                "Interleaved channels must be 1 or 4, got {}",
                channels_interleaved
            )));
        }
        Ok(Self {
            bytes_per_voxel,
            channels_interleaved,
        })
    }

    pub fn bytes_per_voxel(&self) -> i32 {
        self.bytes_per_voxel
    }

    pub fn channels_interleaved(&self) -> i32 {
        self.channels_interleaved
    }

    /// Interleaved bytes for one voxel across all channels.
    pub fn voxel_bytes(&self) -> i32 {
        self.bytes_per_voxel * self.channels_interleaved
    }
}

impl fmt::Display for VoxelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes/voxel x {} channels",
            self.bytes_per_voxel, self.channels_interleaved
        )
    }
}

/// A named voxel datatype. Fields here are invariant for all data instances
/// of the type; per-instance settings such as block size live on `Data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datatype {
    name: String,
    spec: VoxelSpec,
}

impl Datatype {
    pub fn new(name: impl Into<String>, spec: VoxelSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    /// 8-bit single-channel grayscale.
    pub fn grayscale8() -> Self {
        Self::new("grayscale8", VoxelSpec { bytes_per_voxel: 1, channels_interleaved: 1 })
    }

    /// 16-bit single-channel grayscale.
    pub fn grayscale16() -> Self {
        Self::new("grayscale16", VoxelSpec { bytes_per_voxel: 2, channels_interleaved: 1 })
    }

    /// 8-bit four-channel color.
    pub fn rgba8() -> Self {
        Self::new("rgba8", VoxelSpec { bytes_per_voxel: 1, channels_interleaved: 4 })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> VoxelSpec {
        self.spec
    }
}
