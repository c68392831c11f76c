//! Container-level abstraction: tracks and compressed samples

use super::animation::AnimationDemuxer;
use super::y4m::Y4mDemuxer;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use vcam_video::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Other,
}

/// Sample payload layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Planar Y, U, V with 2x2 chroma subsampling
    RawI420,
    /// Planar Y, U, V at full resolution
    RawI444,
    /// Luma only
    RawMono,
    /// Packed RGBA
    RawRgba,
}

impl Codec {
    /// Payload bytes of one frame
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Codec::RawI420 => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
            Codec::RawI444 => w * h * 3,
            Codec::RawMono => w * h,
            Codec::RawRgba => w * h * 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    /// Nominal rate as (numerator, denominator) when the container declares one
    pub frame_rate: Option<(u32, u32)>,
    pub frame_count: Option<u64>,
}

/// One unit read from a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Arc<[u8]>,
    pub codec: Codec,
    pub pts_us: u64,
    pub duration_us: u64,
}

/// Reads samples of the selected track in presentation order
pub trait Demuxer: Send {
    fn tracks(&self) -> &[TrackInfo];

    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Next sample, `None` at end of stream
    fn read_sample(&mut self) -> Result<Option<Sample>>;

    /// Rewind to the first sample
    fn seek_to_start(&mut self) -> Result<()>;
}

const Y4M_MAGIC: &[u8] = b"YUV4MPEG2 ";

/// Open a container, choosing the demuxer by file signature
pub fn open_demuxer(path: &Path) -> Result<Box<dyn Demuxer>> {
    let mut magic = [0u8; 16];
    let len = {
        let mut file = File::open(path).map_err(|e| Error::from_open(e, path))?;
        read_prefix(&mut file, &mut magic)?
    };
    let magic = &magic[..len];

    if magic.starts_with(Y4M_MAGIC) {
        return Ok(Box::new(Y4mDemuxer::open(path)?));
    }

    match image::guess_format(magic) {
        Ok(format) => Ok(Box::new(AnimationDemuxer::open(path, format)?)),
        Err(_) => Err(Error::UnsupportedFormat(format!(
            "{}: unrecognised container",
            path.display()
        ))),
    }
}

/// Fill as much of `buf` as the file allows
fn read_prefix(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Index of the first video track
pub fn first_video_track(tracks: &[TrackInfo]) -> Option<usize> {
    tracks.iter().position(|t| t.kind == TrackKind::Video)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::test_support::{temp_path, write_y4m};
    use vcam_video::ErrorKind;

    #[test]
    fn test_codec_frame_sizes() {
        assert_eq!(Codec::RawI420.frame_size(4, 4), 24);
        assert_eq!(Codec::RawI420.frame_size(3, 3), 9 + 8);
        assert_eq!(Codec::RawI444.frame_size(2, 2), 12);
        assert_eq!(Codec::RawRgba.frame_size(2, 2), 16);
    }

    #[test]
    fn test_sniffs_y4m_regardless_of_extension() {
        let _serial = crate::handles::counter_lock();
        let path = temp_path("sniff.bin");
        write_y4m(&path, 4, 2, 2, "420jpeg");

        let demuxer = open_demuxer(&path).unwrap();
        assert_eq!(demuxer.tracks()[0].codec, Codec::RawI420);

        drop(demuxer);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unknown_signature() {
        let path = temp_path("unknown.y4m");
        std::fs::write(&path, b"hello, not a video").unwrap();

        let err = open_demuxer(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_first_video_track() {
        let other = TrackInfo {
            kind: TrackKind::Other,
            codec: Codec::RawMono,
            width: 1,
            height: 1,
            frame_rate: None,
            frame_count: None,
        };
        let video = TrackInfo {
            kind: TrackKind::Video,
            ..other.clone()
        };

        assert_eq!(first_video_track(&[other.clone(), video]), Some(1));
        assert_eq!(first_video_track(&[other]), None);
    }
}
