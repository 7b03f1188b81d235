//! Error types for voxel engine operations

use thiserror::Error;

/// Main error type for voxel engine operations
#[derive(Error, Debug)]
pub enum VoxelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Specialized Result type for voxel engine operations
pub type Result<T> = std::result::Result<T, VoxelError>;

impl From<bincode::Error> for VoxelError {
    fn from(err: bincode::Error) -> Self {
        VoxelError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for VoxelError {
    fn from(err: serde_json::Error) -> Self {
        VoxelError::BadRequest(err.to_string())
    }
}

impl From<image::ImageError> for VoxelError {
    fn from(err: image::ImageError) -> Self {
        VoxelError::Codec(err.to_string())
    }
}
