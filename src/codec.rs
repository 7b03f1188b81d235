//! Serialization envelope for block payloads: compression plus checksum
//!
//! A stored block value is `[method u8][checksum u8][crc32 u32 LE?][payload]`
//! where the checksum covers the compressed payload bytes.

use crate::error::{Result, VoxelError};
use bytes::Bytes;
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Compression methods supported for block payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// Deflate/ZIP compression
    Deflate = 1,
    /// Zstandard compression
    Zstd = 2,
}

impl CompressionMethod {
    /// Get the method from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// Checksum methods supported for block payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumMethod {
    /// No checksum
    None = 0,
    /// CRC32 over the compressed payload
    Crc32 = 1,
}

impl ChecksumMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChecksumMethod::None),
            1 => Some(ChecksumMethod::Crc32),
            _ => None,
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Trait for compression/decompression operations
pub trait Compressor: Send + Sync {
    /// Compress data
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    /// Get the compression method
    fn method(&self) -> CompressionMethod;
}

/// No compression
#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

/// Deflate compression
#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, FlateCompression::new(level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| VoxelError::Codec(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decompressed = if let Some(size) = expected_size {
            Vec::with_capacity(size)
        } else {
            Vec::new()
        };
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| VoxelError::Codec(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

/// Zstandard compression
#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(data, level.value() as i32).map_err(|e| VoxelError::Codec(e.to_string()))
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| VoxelError::Codec(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Deflate => Box::new(DeflateCompressor),
        CompressionMethod::Zstd => Box::new(ZstdCompressor),
    }
}

/// Calculate a CRC32 checksum for data
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFFFFFFu32;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}

/// Wrap a block payload in the storage envelope.
pub fn serialize(
    data: &[u8],
    compression: CompressionMethod,
    checksum: ChecksumMethod,
) -> Result<Bytes> {
    let compressed = get_compressor(compression).compress(data, CompressionLevel::default())?;
    let mut out = Vec::with_capacity(compressed.len() + 6);
    out.push(compression as u8);
    out.push(checksum as u8);
    if checksum == ChecksumMethod::Crc32 {
        out.extend_from_slice(&crc32(&compressed).to_le_bytes());
    }
    out.extend_from_slice(&compressed);
    Ok(Bytes::from(out))
}

/// Unwrap a storage envelope, optionally verifying its checksum, and return
/// the decompressed payload.
pub fn deserialize(data: &[u8], verify: bool, expected_size: Option<usize>) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(VoxelError::Codec(format!(
            "Envelope too short: {} bytes",
            data.len()
        )));
    }
    let compression = CompressionMethod::from_u8(data[0])
        .ok_or_else(|| VoxelError::Codec(format!("Unknown compression method {}", data[0])))?;
    let checksum = ChecksumMethod::from_u8(data[1])
        .ok_or_else(|| VoxelError::Codec(format!("Unknown checksum method {}", data[1])))?;

    let mut payload = &data[2..];
    if checksum == ChecksumMethod::Crc32 {
        if payload.len() < 4 {
            return Err(VoxelError::Codec(
                "Envelope truncated before checksum".to_string(),
            ));
        }
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&payload[..4]);
        let stored = u32::from_le_bytes(stored);
        payload = &payload[4..];
        if verify && crc32(payload) != stored {
            return Err(VoxelError::Codec("Checksum mismatch".to_string()));
        }
    }

    get_compressor(compression).decompress(payload, expected_size)
}
