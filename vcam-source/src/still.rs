//! Single decoded image served on every tick

use crate::source::{FrameOutcome, FrameSource};
use image::ImageReader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use vcam_video::{Error, PixelBuffer, Result};

/// Decodes once, then hands out the same pixels with a fresh timestamp.
///
/// Transform parameters are applied downstream on every tick, so changing
/// them still changes the output even though the pixels here never do.
#[derive(Debug, Clone)]
pub struct StaticImageSource {
    image: PixelBuffer,
    frame_rate: u32,
    counter: u64,
}

impl StaticImageSource {
    /// Decode `path`; the format is sniffed from the file contents
    pub fn open(path: impl AsRef<Path>, frame_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::from_open(e, path))?;
        let decoded = ImageReader::new(BufReader::new(file))
            .with_guessed_format()?
            .decode()?;

        let image = PixelBuffer::from(decoded.to_rgba8());
        log::info!(
            "loaded still image {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::from_buffer(image, frame_rate))
    }

    pub fn from_buffer(image: PixelBuffer, frame_rate: u32) -> Self {
        Self {
            image,
            frame_rate: frame_rate.max(1),
            counter: 0,
        }
    }

    pub fn image(&self) -> &PixelBuffer {
        &self.image
    }
}

impl FrameSource for StaticImageSource {
    fn produce_next_frame(&mut self) -> Result<FrameOutcome> {
        let timestamp_us = self.counter * 1_000_000 / self.frame_rate as u64;
        self.counter += 1;
        Ok(FrameOutcome::Frame(self.image.with_timestamp(timestamp_us)))
    }

    fn name(&self) -> &'static str {
        "image"
    }
}
