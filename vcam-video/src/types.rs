//! Frame data types shared by every stage of the pipeline

use crate::error::{Error, Result};
use std::sync::Arc;

/// Packed pixel layout of a [`PixelBuffer`]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8 = 0, // Packed RGBA, 4 bytes per pixel
    Rgb8 = 1,  // Packed RGB, 3 bytes per pixel
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Bytes needed for a `width` x `height` frame
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.channels()
    }
}

/// Byte layout an output sink accepts
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkFormat {
    Rgba = 0,             // Packed RGBA
    Yuv420SemiPlanar = 1, // Y plane followed by interleaved V/U at quarter resolution
}

impl SinkFormat {
    /// Encoded size in bytes of a `width` x `height` frame
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        match self {
            SinkFormat::Rgba => PixelFormat::Rgba8.frame_size(width, height),
            SinkFormat::Yuv420SemiPlanar => crate::semi_planar_size(width, height),
        }
    }
}

/// An immutable rectangle of packed pixels.
///
/// Pixels live behind an `Arc` so a buffer can be handed to several
/// consumers (or returned unchanged by an identity transform) without a copy.
/// Nothing ever writes through a produced buffer; every transform allocates
/// a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp_us: u64,
    pixels: Arc<[u8]>,
}

impl PixelBuffer {
    /// Wrap `pixels`, checking `pixels.len() == width * height * channels`
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_us: u64,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self> {
        let pixels = pixels.into();
        let expected = format.frame_size(width, height);
        if pixels.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format,
            timestamp_us,
            pixels,
        })
    }

    /// All-zero (transparent black) buffer
    pub fn blank(width: u32, height: u32, format: PixelFormat, timestamp_us: u64) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us,
            pixels: vec![0u8; format.frame_size(width, height)].into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Presentation timestamp in microseconds
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.channels()
    }

    /// Same pixels, new timestamp. No copy.
    pub fn with_timestamp(&self, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            pixels: Arc::clone(&self.pixels),
            ..*self
        }
    }

    /// True when both buffers point at the same pixel storage
    pub fn shares_pixels(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// RGBA view of this buffer; RGBA input is returned without a copy
    pub fn to_rgba(&self) -> PixelBuffer {
        match self.format {
            PixelFormat::Rgba8 => self.clone(),
            PixelFormat::Rgb8 => {
                let rgb: &[[u8; 3]] = bytemuck::cast_slice(&self.pixels[..]);
                let out: Vec<u8> = rgb.iter().flat_map(|&[r, g, b]| [r, g, b, 255]).collect();
                PixelBuffer {
                    format: PixelFormat::Rgba8,
                    pixels: out.into(),
                    ..*self
                }
            }
        }
    }

    /// Read the RGB triple at (x, y)
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = y as usize * self.stride() + x as usize * self.format.channels();
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }
}

impl From<image::RgbaImage> for PixelBuffer {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            timestamp_us: 0,
            pixels: img.into_raw().into(),
        }
    }
}
