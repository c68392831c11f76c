//! Looping video source built on a demuxer + decoder pair

use super::decoder::{Decoder, RawVideoDecoder, DECODER_DEPTH};
use super::demux::{first_video_track, open_demuxer, Demuxer, TrackInfo};
use crate::source::{FrameOutcome, FrameSource};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vcam_video::{Error, Result};

/// Lifecycle of a [`VideoDecoderSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Initialized,
    Running,
    /// The current tick rewound the stream to its first sample
    Looping,
    Stopped,
}

/// Video file source that loops forever.
///
/// On end of stream the demuxer is rewound and timestamps keep counting
/// from where the previous pass ended, so consumers see one continuous,
/// monotonic stream.
pub struct VideoDecoderSource {
    path: PathBuf,
    decode_timeout: Duration,
    state: DecoderState,
    demuxer: Option<Box<dyn Demuxer>>,
    decoder: Option<Box<dyn Decoder>>,
    track: Option<TrackInfo>,
    /// Added to every sample pts
    pts_offset_us: u64,
    /// End of the current pass in stream time (last pts + duration)
    pass_end_us: u64,
    loop_count: u64,
    frames_produced: u64,
}

impl VideoDecoderSource {
    /// Unopened source; the container is opened by [`initialize`](Self::initialize)
    pub fn new(path: impl Into<PathBuf>, decode_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            decode_timeout,
            state: DecoderState::Uninitialized,
            demuxer: None,
            decoder: None,
            track: None,
            pts_offset_us: 0,
            pass_end_us: 0,
            loop_count: 0,
            frames_produced: 0,
        }
    }

    /// Open `path` and configure a decoder for its first video track
    pub fn open(path: impl AsRef<Path>, decode_timeout: Duration) -> Result<Self> {
        let mut source = Self::new(path.as_ref(), decode_timeout);
        source.initialize()?;
        Ok(source)
    }

    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            DecoderState::Uninitialized => {}
            DecoderState::Stopped => return Err(Error::DecodeFailure("source stopped".into())),
            _ => return Ok(()),
        }

        let mut demuxer = open_demuxer(&self.path)?;
        let index = first_video_track(demuxer.tracks()).ok_or_else(|| {
            Error::UnsupportedFormat(format!("{}: no video track", self.path.display()))
        })?;
        let track = demuxer.tracks()[index].clone();
        if track.frame_count == Some(0) {
            return Err(Error::UnsupportedFormat(format!(
                "{}: video track has no frames",
                self.path.display()
            )));
        }
        demuxer.select_track(index)?;
        let decoder = RawVideoDecoder::configure(&track)?;

        log::info!(
            "opened video {} ({}x{} {:?}, {:?} frames)",
            self.path.display(),
            track.width,
            track.height,
            track.codec,
            track.frame_count
        );

        self.demuxer = Some(demuxer);
        self.decoder = Some(Box::new(decoder));
        self.track = Some(track);
        self.state = DecoderState::Initialized;
        Ok(())
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Completed wraps back to the first frame
    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    pub fn track(&self) -> Option<&TrackInfo> {
        self.track.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the decoder queue full, rewinding at end of stream
    fn feed(&mut self) -> Result<()> {
        let (demuxer, decoder) = match (self.demuxer.as_mut(), self.decoder.as_mut()) {
            (Some(demuxer), Some(decoder)) => (demuxer, decoder),
            _ => return Err(Error::DecodeFailure("decoder not initialized".into())),
        };

        while decoder.in_flight() < DECODER_DEPTH {
            let mut sample = match demuxer.read_sample()? {
                Some(sample) => sample,
                None => {
                    demuxer.seek_to_start()?;
                    self.pts_offset_us += self.pass_end_us;
                    self.pass_end_us = 0;
                    self.loop_count += 1;
                    self.state = DecoderState::Looping;
                    log::info!("video {} looped ({} passes)", self.path.display(), self.loop_count);

                    demuxer
                        .read_sample()?
                        .ok_or_else(|| Error::DecodeFailure("stream has no samples after rewind".into()))?
                }
            };

            self.pass_end_us = self.pass_end_us.max(sample.pts_us + sample.duration_us);
            sample.pts_us += self.pts_offset_us;
            decoder.queue_sample(sample)?;
        }
        Ok(())
    }
}

impl FrameSource for VideoDecoderSource {
    fn produce_next_frame(&mut self) -> Result<FrameOutcome> {
        match self.state {
            DecoderState::Stopped => return Err(Error::DecodeFailure("source stopped".into())),
            DecoderState::Uninitialized => self.initialize()?,
            _ => {}
        }

        self.state = DecoderState::Running;
        self.feed()?;

        let timeout = self.decode_timeout;
        let frame = match self.decoder.as_mut() {
            Some(decoder) => decoder.dequeue_frame(timeout)?,
            None => return Err(Error::DecodeFailure("decoder not initialized".into())),
        };

        match frame {
            Some(frame) => {
                self.frames_produced += 1;
                if self.frames_produced % 30 == 0 {
                    log::trace!("video frame {} at {} us", self.frames_produced, frame.timestamp_us());
                }
                Ok(FrameOutcome::Frame(frame))
            }
            None => Ok(FrameOutcome::Pending),
        }
    }

    fn has_timestamps(&self) -> bool {
        true
    }

    fn stop(&mut self) {
        if self.state == DecoderState::Stopped {
            return;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.decoder = None;
        self.demuxer = None;
        self.state = DecoderState::Stopped;
        log::debug!("video {} released", self.path.display());
    }

    fn name(&self) -> &'static str {
        "video"
    }
}

impl Drop for VideoDecoderSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{counter_lock, live_decoders, live_demuxers};
    use crate::video::test_support::{temp_path, write_gif, write_y4m};
    use vcam_video::{ErrorKind, PixelBuffer};

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Tick until a frame arrives
    fn next_frame(source: &mut VideoDecoderSource) -> PixelBuffer {
        for _ in 0..100 {
            if let FrameOutcome::Frame(frame) = source.produce_next_frame().unwrap() {
                return frame;
            }
        }
        panic!("no frame after 100 ticks");
    }

    #[test]
    fn test_loops_past_end_of_stream() {
        let _serial = counter_lock();
        let path = temp_path("loop.y4m");
        write_y4m(&path, 4, 4, 3, "420jpeg");

        let mut source = VideoDecoderSource::open(&path, TIMEOUT).unwrap();
        assert_eq!(source.state(), DecoderState::Initialized);
        assert_eq!(source.track().unwrap().frame_count, Some(3));

        let mut timestamps = Vec::new();
        let mut lumas = Vec::new();
        for _ in 0..8 {
            let frame = next_frame(&mut source);
            timestamps.push(frame.timestamp_us());
            lumas.push(frame.pixels()[0]);
        }

        assert!(source.loop_count() >= 2);
        assert_eq!(source.frames_produced(), 8);
        // 25 fps, continuous across wraps
        let expected: Vec<u64> = (0..8).map(|i| i * 40_000).collect();
        assert_eq!(timestamps, expected);
        // Content repeats with the stream period
        assert_eq!(lumas[0], lumas[3]);
        assert_eq!(lumas[1], lumas[4]);
        assert_ne!(lumas[0], lumas[1]);

        drop(source);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_gif_source_loops() {
        let _serial = counter_lock();
        let path = temp_path("loop.gif");
        write_gif(&path, 2, 2, &[[255, 0, 0, 255], [0, 0, 255, 255]], 100);

        let mut source = VideoDecoderSource::open(&path, TIMEOUT).unwrap();
        let frames: Vec<PixelBuffer> = (0..5).map(|_| next_frame(&mut source)).collect();

        let stamps: Vec<u64> = frames.iter().map(|f| f.timestamp_us()).collect();
        assert_eq!(stamps, vec![0, 100_000, 200_000, 300_000, 400_000]);
        assert!(frames[2].rgb_at(0, 0)[0] > 200);
        assert!(frames[3].rgb_at(0, 0)[2] > 200);
        assert!(source.loop_count() >= 2);

        drop(source);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stop_releases_handles() {
        let _serial = counter_lock();
        let path = temp_path("stop.y4m");
        write_y4m(&path, 2, 2, 2, "mono");

        let demuxers = live_demuxers();
        let decoders = live_decoders();

        let mut source = VideoDecoderSource::open(&path, TIMEOUT).unwrap();
        next_frame(&mut source);
        assert_eq!(live_demuxers(), demuxers + 1);
        assert_eq!(live_decoders(), decoders + 1);

        source.stop();
        source.stop();
        assert_eq!(source.state(), DecoderState::Stopped);
        assert_eq!(live_demuxers(), demuxers);
        assert_eq!(live_decoders(), decoders);

        let err = source.produce_next_frame().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeFailure);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_lazy_initialization() {
        let _serial = counter_lock();
        let path = temp_path("lazy.y4m");
        write_y4m(&path, 2, 2, 1, "444");

        let mut source = VideoDecoderSource::new(&path, TIMEOUT);
        assert_eq!(source.state(), DecoderState::Uninitialized);
        next_frame(&mut source);
        // A one-frame stream rewinds on nearly every tick
        assert!(matches!(
            source.state(),
            DecoderState::Running | DecoderState::Looping
        ));

        drop(source);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_errors() {
        let _serial = counter_lock();
        let missing = VideoDecoderSource::open("/no/such/video.y4m", TIMEOUT).err().unwrap();
        assert_eq!(missing.kind(), ErrorKind::SourceNotFound);

        let path = temp_path("empty.y4m");
        std::fs::write(&path, b"YUV4MPEG2 W2 H2 F25:1\n").unwrap();
        let empty = VideoDecoderSource::open(&path, TIMEOUT).err().unwrap();
        assert_eq!(empty.kind(), ErrorKind::UnsupportedFormat);

        std::fs::remove_file(&path).ok();
    }
}
