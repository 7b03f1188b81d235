//! Typed 2D pixel views over request buffers, plus image encode/decode
//!
//! Multi-byte samples are little-endian in the raw voxel bytes.

use crate::error::{Result, VoxelError};
use crate::types::VoxelSpec;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Luma, Rgba};
use std::io::Cursor;
use std::str::FromStr;

const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Output encoding for slice images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    /// JPEG with a quality in [1, 100].
    Jpeg(u8),
}

impl Default for ImageFormat {
    fn default() -> Self {
        ImageFormat::Png
    }
}

impl FromStr for ImageFormat {
    type Err = VoxelError;

    /// Parses "png", "jpg", or "jpg:<quality>". An empty string selects the
    /// default format.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s == "png" {
            return Ok(ImageFormat::Png);
        }
        if s == "jpg" || s == "jpeg" {
            return Ok(ImageFormat::Jpeg(DEFAULT_JPEG_QUALITY));
        }
        if let Some(quality) = s.strip_prefix("jpg:") {
            let quality: u8 = quality.parse().map_err(|_| {
                VoxelError::BadRequest(format!("Bad JPEG quality {:?}", quality))
            })?;
            if !(1..=100).contains(&quality) {
                return Err(VoxelError::BadRequest(format!(
                    "JPEG quality must be in [1,100], got {}",
                    quality
                )));
            }
            return Ok(ImageFormat::Jpeg(quality));
        }
        Err(VoxelError::BadRequest(format!(
            "Unknown image format {:?}",
            s
        )))
    }
}

/// Pixel interpretations supported for 2D views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelKind {
    Gray8,
    Gray16,
    Rgba8,
    Rgba16,
}

impl PixelKind {
    /// Map a voxel spec onto a pixel interpretation. Wide single-channel
    /// voxels are presented through the color kinds of matching width.
    pub fn for_spec(spec: VoxelSpec) -> Result<Self> {
        let kind = match (spec.channels_interleaved(), spec.bytes_per_voxel()) {
            (1, 1) => PixelKind::Gray8,
            (1, 2) => PixelKind::Gray16,
            (1, 4) => PixelKind::Rgba8,
            (1, 8) => PixelKind::Rgba16,
            (4, 1) => PixelKind::Rgba8,
            (4, 2) => PixelKind::Rgba16,
            _ => {
                return Err(VoxelError::Unsupported(format!(
                    "No image support for {}",
                    spec
                )))
            }
        };
        Ok(kind)
    }
}

/// A typed 2D view over one plane of a request buffer. The view borrows the
/// buffer; encode it before the buffer goes away.
#[derive(Debug, Clone, Copy)]
pub struct SliceView<'a> {
    kind: PixelKind,
    width: u32,
    height: u32,
    data: &'a [u8],
}

impl<'a> SliceView<'a> {
    /// View `data` as a `width` x `height` image of the spec's pixel kind.
    pub fn new(data: &'a [u8], spec: VoxelSpec, width: i32, height: i32) -> Result<Self> {
        let kind = PixelKind::for_spec(spec)?;
        let expected = width as usize * height as usize * spec.voxel_bytes() as usize;
        if data.len() < expected {
            return Err(VoxelError::BadRequest(format!(
                "Image bounds of {} x {} need {} bytes, buffer has {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            kind,
            width: width as u32,
            height: height as u32,
            data: &data[..expected],
        })
    }

    pub fn kind(&self) -> PixelKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn to_dynamic(&self) -> Result<DynamicImage> {
        let (w, h) = (self.width, self.height);
        let corrupt = || VoxelError::Invariant("Pixel buffer length mismatch".to_string());
        let img = match self.kind {
            PixelKind::Gray8 => {
                let buf = ImageBuffer::<Luma<u8>, _>::from_raw(w, h, self.data.to_vec())
                    .ok_or_else(corrupt)?;
                DynamicImage::ImageLuma8(buf)
            }
            PixelKind::Gray16 => {
                let samples = bytes_to_u16(self.data);
                let buf =
                    ImageBuffer::<Luma<u16>, _>::from_raw(w, h, samples).ok_or_else(corrupt)?;
                DynamicImage::ImageLuma16(buf)
            }
            PixelKind::Rgba8 => {
                let buf = ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, self.data.to_vec())
                    .ok_or_else(corrupt)?;
                DynamicImage::ImageRgba8(buf)
            }
            PixelKind::Rgba16 => {
                let samples = bytes_to_u16(self.data);
                let buf =
                    ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, samples).ok_or_else(corrupt)?;
                DynamicImage::ImageRgba16(buf)
            }
        };
        Ok(img)
    }

    /// Encode the view in the requested format.
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>> {
        let img = self.to_dynamic()?;
        let mut out = Cursor::new(Vec::new());
        match format {
            ImageFormat::Png => {
                img.write_to(&mut out, image::ImageFormat::Png)?;
            }
            ImageFormat::Jpeg(quality) => {
                // JPEG is 8-bit and has no alpha; narrow before encoding.
                let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
                match self.kind {
                    PixelKind::Gray8 | PixelKind::Gray16 => {
                        encoder.encode_image(&img.into_luma8())?
                    }
                    PixelKind::Rgba8 | PixelKind::Rgba16 => {
                        encoder.encode_image(&img.into_rgb8())?
                    }
                }
            }
        }
        Ok(out.into_inner())
    }
}

/// View one Z plane of a packed buffer as an image.
pub fn slice_view<'a>(
    data: &'a [u8],
    spec: VoxelSpec,
    width: i32,
    height: i32,
    z: i32,
) -> Result<SliceView<'a>> {
    let plane = width as usize * height as usize * spec.voxel_bytes() as usize;
    let beg = z as usize * plane;
    let end = beg + plane;
    if z < 0 || end > data.len() {
        return Err(VoxelError::BadRequest(format!(
            "Slice z = {} is outside the buffer of {} bytes",
            z,
            data.len()
        )));
    }
    SliceView::new(&data[beg..end], spec, width, height)
}

/// Decode a posted image payload.
pub fn image_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Convert a decoded image into raw interleaved voxel bytes for a spec,
/// tightly packed. Returns the bytes with the image dimensions.
pub fn image_to_raw(img: &DynamicImage, spec: VoxelSpec) -> Result<(Vec<u8>, u32, u32)> {
    let (width, height) = (img.width(), img.height());
    let raw = match PixelKind::for_spec(spec)? {
        PixelKind::Gray8 => img.to_luma8().into_raw(),
        PixelKind::Gray16 => u16_to_bytes(&img.to_luma16().into_raw()),
        PixelKind::Rgba8 => img.to_rgba8().into_raw(),
        PixelKind::Rgba16 => u16_to_bytes(&img.to_rgba16().into_raw()),
    };
    Ok((raw, width, height))
}

fn bytes_to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn u16_to_bytes(samples: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Datatype, VoxelSpec};

    #[test]
    fn test_format_parsing() {
        assert_eq!("".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!("png".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!(
            "jpg".parse::<ImageFormat>().unwrap(),
            ImageFormat::Jpeg(DEFAULT_JPEG_QUALITY)
        );
        assert_eq!("jpg:45".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg(45));

        assert!("jpg:0".parse::<ImageFormat>().is_err());
        assert!("jpg:101".parse::<ImageFormat>().is_err());
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn test_pixel_kind_table() {
        let gray16 = Datatype::grayscale16().spec();
        assert_eq!(PixelKind::for_spec(gray16).unwrap(), PixelKind::Gray16);

        let wide = VoxelSpec::new(8, 1).unwrap();
        assert_eq!(PixelKind::for_spec(wide).unwrap(), PixelKind::Rgba16);

        let unsupported = VoxelSpec::new(8, 4).unwrap();
        assert!(PixelKind::for_spec(unsupported).is_err());
    }

    #[test]
    fn test_view_bounds() {
        let spec = Datatype::grayscale8().spec();
        assert!(SliceView::new(&[0u8; 16], spec, 4, 4).is_ok());
        assert!(SliceView::new(&[0u8; 15], spec, 4, 4).is_err());
    }

    #[test]
    fn test_slice_view_selects_plane() {
        let spec = Datatype::grayscale8().spec();
        let mut data = vec![0u8; 32];
        data[16..].fill(3);

        let plane0 = slice_view(&data, spec, 4, 4, 0).unwrap();
        assert!(plane0.data().iter().all(|&b| b == 0));
        let plane1 = slice_view(&data, spec, 4, 4, 1).unwrap();
        assert!(plane1.data().iter().all(|&b| b == 3));
        assert!(slice_view(&data, spec, 4, 4, 2).is_err());
    }

    #[test]
    fn test_png_roundtrip_gray8() {
        let spec = Datatype::grayscale8().spec();
        let pixels: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
        let view = SliceView::new(&pixels, spec, 8, 8).unwrap();

        let png = view.encode(ImageFormat::Png).unwrap();
        let decoded = image_from_bytes(&png).unwrap();
        let (raw, width, height) = image_to_raw(&decoded, spec).unwrap();

        assert_eq!((width, height), (8, 8));
        assert_eq!(raw, pixels);
    }

    #[test]
    fn test_jpeg_encodes_rgba_input() {
        let spec = Datatype::rgba8().spec();
        let pixels = vec![128u8; 4 * 4 * 4];
        let view = SliceView::new(&pixels, spec, 4, 4).unwrap();
        let jpg = view.encode(ImageFormat::Jpeg(90)).unwrap();
        assert!(!jpg.is_empty());
    }
}
