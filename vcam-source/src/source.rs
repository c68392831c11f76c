//! The frame source abstraction and its factory

use crate::still::StaticImageSource;
use crate::synthetic::SyntheticPatternSource;
use crate::video::VideoDecoderSource;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use vcam_video::{PixelBuffer, Result};

/// Result of one tick of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A freshly produced frame
    Frame(PixelBuffer),
    /// Nothing ready within the decode timeout; try again next tick
    Pending,
}

/// Which source a pipeline should run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameSourceSpec {
    Video(PathBuf),
    Image(PathBuf),
    Synthetic,
}

impl fmt::Display for FrameSourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSourceSpec::Video(path) => write!(f, "video:{}", path.display()),
            FrameSourceSpec::Image(path) => write!(f, "image:{}", path.display()),
            FrameSourceSpec::Synthetic => f.write_str("synthetic"),
        }
    }
}

/// Anything that yields one frame per tick.
///
/// Sources are owned by exactly one delivery thread, hence `Send` but not
/// `Sync`.
pub trait FrameSource: Send {
    /// Produce the frame for this tick
    fn produce_next_frame(&mut self) -> Result<FrameOutcome>;

    /// True when frame timestamps carry real presentation timing
    fn has_timestamps(&self) -> bool {
        false
    }

    /// Release any decoder resources; later ticks must fail
    fn stop(&mut self) {}

    /// Short label for logs
    fn name(&self) -> &'static str;
}

/// Construction options shared by every source kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    /// Ticks per second for sources without inherent timing
    pub frame_rate: u32,
    /// Upper bound on a single decoder wait
    pub decode_timeout: Duration,
    /// Size of the synthetic pattern
    pub synthetic_width: u32,
    pub synthetic_height: u32,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            decode_timeout: Duration::from_millis(20),
            synthetic_width: 1280,
            synthetic_height: 720,
        }
    }
}

/// Build the source described by `spec`
pub fn open_source(spec: &FrameSourceSpec, options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    match spec {
        FrameSourceSpec::Video(path) => Ok(Box::new(VideoDecoderSource::open(path, options.decode_timeout)?)),
        FrameSourceSpec::Image(path) => Ok(Box::new(StaticImageSource::open(path, options.frame_rate)?)),
        FrameSourceSpec::Synthetic => Ok(Box::new(synthetic_source(options))),
    }
}

/// The source that can always be built
pub fn synthetic_source(options: &SourceOptions) -> SyntheticPatternSource {
    SyntheticPatternSource::new(options.synthetic_width, options.synthetic_height, options.frame_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcam_video::ErrorKind;

    #[test]
    fn test_source_display() {
        assert_eq!(FrameSourceSpec::Synthetic.to_string(), "synthetic");
        assert_eq!(
            FrameSourceSpec::Video(PathBuf::from("/tmp/a.y4m")).to_string(),
            "video:/tmp/a.y4m"
        );
    }

    #[test]
    fn test_open_synthetic_always_works() {
        let options = SourceOptions {
            synthetic_width: 32,
            synthetic_height: 18,
            ..Default::default()
        };
        let mut source = open_source(&FrameSourceSpec::Synthetic, &options).unwrap();

        assert_eq!(source.name(), "synthetic");
        assert!(!source.has_timestamps());
        match source.produce_next_frame().unwrap() {
            FrameOutcome::Frame(frame) => assert_eq!((frame.width(), frame.height()), (32, 18)),
            FrameOutcome::Pending => panic!("synthetic source never pends"),
        }
    }

    #[test]
    fn test_open_missing_files() {
        let options = SourceOptions::default();
        for spec in [
            FrameSourceSpec::Video(PathBuf::from("/definitely/not/here.y4m")),
            FrameSourceSpec::Image(PathBuf::from("/definitely/not/here.png")),
        ] {
            let err = open_source(&spec, &options).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::SourceNotFound, "{}", spec);
        }
    }
}
