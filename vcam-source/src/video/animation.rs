//! Animated image containers (GIF, APNG, animated WebP) as video tracks
//!
//! The `image` decoders compose every frame onto the full canvas, so the
//! whole animation is decoded when the container is opened and replayed
//! from memory. That keeps the demuxer `Send` regardless of the decoder's
//! internal reader types.

use super::demux::{Codec, Demuxer, Sample, TrackInfo, TrackKind};
use crate::handles::{HandleGuard, HandleKind};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, Frame, ImageFormat};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use vcam_video::{Error, Result};

/// Browsers treat a zero delay as 100 ms; so do we
const DEFAULT_DELAY_US: u64 = 100_000;

#[derive(Debug)]
pub struct AnimationDemuxer {
    tracks: Vec<TrackInfo>,
    samples: Vec<Sample>,
    selected: Option<usize>,
    position: usize,
    _handle: HandleGuard,
}

impl AnimationDemuxer {
    pub fn open(path: &Path, format: ImageFormat) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::from_open(e, path))?;
        let reader = BufReader::new(file);
        let no_track = || {
            Error::UnsupportedFormat(format!("{}: still image has no video track", path.display()))
        };

        let frames = match format {
            ImageFormat::Gif => GifDecoder::new(reader)?.into_frames().collect_frames()?,
            ImageFormat::Png => {
                let decoder = PngDecoder::new(reader)?;
                if !decoder.is_apng()? {
                    return Err(no_track());
                }
                decoder.apng()?.into_frames().collect_frames()?
            }
            ImageFormat::WebP => {
                let decoder = WebPDecoder::new(reader)?;
                if !decoder.has_animation() {
                    return Err(no_track());
                }
                decoder.into_frames().collect_frames()?
            }
            _ => return Err(no_track()),
        };

        let (width, height, samples) = frames_to_samples(frames)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{}: animation has no frames", path.display())))??;

        log::debug!(
            "{:?} animation {}: {}x{}, {} frames",
            format,
            path.display(),
            width,
            height,
            samples.len()
        );

        Ok(Self {
            tracks: vec![TrackInfo {
                kind: TrackKind::Video,
                codec: Codec::RawRgba,
                width,
                height,
                frame_rate: None,
                frame_count: Some(samples.len() as u64),
            }],
            samples,
            selected: None,
            position: 0,
            _handle: HandleGuard::new(HandleKind::Demuxer),
        })
    }
}

/// `None` when there are no frames at all
fn frames_to_samples(frames: Vec<Frame>) -> Option<Result<(u32, u32, Vec<Sample>)>> {
    let (width, height) = frames.first()?.buffer().dimensions();

    let mut samples = Vec::with_capacity(frames.len());
    let mut pts_us = 0u64;
    for (index, frame) in frames.into_iter().enumerate() {
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay_us = match numer as u64 * 1000 / denom.max(1) as u64 {
            0 => DEFAULT_DELAY_US,
            us => us,
        };

        let buffer = frame.into_buffer();
        if buffer.dimensions() != (width, height) {
            return Some(Err(Error::DecodeFailure(format!(
                "frame {} is {:?}, expected {}x{}",
                index,
                buffer.dimensions(),
                width,
                height
            ))));
        }

        samples.push(Sample {
            data: buffer.into_raw().into(),
            codec: Codec::RawRgba,
            pts_us,
            duration_us: delay_us,
        });
        pts_us += delay_us;
    }

    Some(Ok((width, height, samples)))
}

impl Demuxer for AnimationDemuxer {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::invalid_parameter(
                "track",
                format!("index {} out of {} tracks", index, self.tracks.len()),
            ));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<Sample>> {
        if self.selected.is_none() {
            return Err(Error::DecodeFailure("no track selected".into()));
        }
        let sample = self.samples.get(self.position).cloned();
        if sample.is_some() {
            self.position += 1;
        }
        Ok(sample)
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}
