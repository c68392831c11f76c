//! Raw-sample decoder running on its own worker thread
//!
//! Mirrors the queue-in / dequeue-out shape of a hardware codec: samples
//! are queued without blocking, decoded frames are dequeued with a short
//! timeout, and `flush` discards everything in flight.

use super::demux::{Codec, Sample, TrackInfo};
use crate::handles::{HandleGuard, HandleKind};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vcam_video::{i420_to_rgba, i444_to_rgba, mono_to_rgba, Error, PixelBuffer, PixelFormat, Result};

/// Samples that may be queued but not yet dequeued
pub const DECODER_DEPTH: usize = 4;

/// Turns samples into RGBA frames
pub trait Decoder: Send {
    /// Hand one sample to the decoder; fails when `in_flight() == DECODER_DEPTH`
    fn queue_sample(&mut self, sample: Sample) -> Result<()>;

    /// Wait at most `timeout` for the next decoded frame
    fn dequeue_frame(&mut self, timeout: Duration) -> Result<Option<PixelBuffer>>;

    /// Drop every queued and in-progress sample
    fn flush(&mut self);

    /// Samples queued and not yet returned from `dequeue_frame`
    fn in_flight(&self) -> usize;
}

struct Job {
    generation: u64,
    sample: Sample,
}

struct Decoded {
    generation: u64,
    frame: Result<PixelBuffer>,
}

/// Decoder for the raw codecs produced by this crate's demuxers
pub struct RawVideoDecoder {
    input: Option<Sender<Job>>,
    output: Receiver<Decoded>,
    worker: Option<JoinHandle<()>>,
    generation: u64,
    in_flight: usize,
    _handle: HandleGuard,
}

impl RawVideoDecoder {
    /// Configure a decoder for `track`
    pub fn configure(track: &TrackInfo) -> Result<Self> {
        if track.width == 0 || track.height == 0 {
            return Err(Error::UnsupportedFormat(format!(
                "cannot decode a {}x{} track",
                track.width, track.height
            )));
        }

        let (input, jobs) = channel::bounded::<Job>(DECODER_DEPTH);
        let (results, output) = channel::bounded::<Decoded>(DECODER_DEPTH);
        let (codec, width, height) = (track.codec, track.width, track.height);

        let worker = thread::Builder::new()
            .name("vcam-decoder".to_string())
            .spawn(move || {
                for job in jobs.iter() {
                    let frame = decode_sample(&job.sample, codec, width, height);
                    if results
                        .send(Decoded {
                            generation: job.generation,
                            frame,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            })?;

        Ok(Self {
            input: Some(input),
            output,
            worker: Some(worker),
            generation: 0,
            in_flight: 0,
            _handle: HandleGuard::new(HandleKind::Decoder),
        })
    }
}

impl Decoder for RawVideoDecoder {
    fn queue_sample(&mut self, sample: Sample) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| Error::DecodeFailure("decoder released".into()))?;
        if self.in_flight >= DECODER_DEPTH {
            return Err(Error::DecodeFailure("decoder input queue full".into()));
        }

        let job = Job {
            generation: self.generation,
            sample,
        };
        match input.try_send(job) {
            Ok(()) => {
                self.in_flight += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::DecodeFailure("decoder input queue full".into())),
            Err(TrySendError::Disconnected(_)) => Err(Error::DecodeFailure("decoder worker exited".into())),
        }
    }

    fn dequeue_frame(&mut self, timeout: Duration) -> Result<Option<PixelBuffer>> {
        let deadline = Instant::now() + timeout;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.output.recv_timeout(remaining) {
                Ok(decoded) => {
                    self.in_flight -= 1;
                    if decoded.generation == self.generation {
                        return decoded.frame.map(Some);
                    }
                    // Stale output from before the last flush
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::DecodeFailure("decoder worker exited".into()))
                }
            }
        }
        Ok(None)
    }

    fn flush(&mut self) {
        self.generation += 1;
        while self.output.try_recv().is_ok() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for RawVideoDecoder {
    fn drop(&mut self) {
        // Closing both ends stops the worker even if it is mid-send
        self.input.take();
        drop(std::mem::replace(&mut self.output, channel::never()));
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("decoder worker panicked");
            }
        }
    }
}

fn decode_sample(sample: &Sample, codec: Codec, width: u32, height: u32) -> Result<PixelBuffer> {
    if sample.codec != codec {
        return Err(Error::DecodeFailure(format!(
            "{:?} sample on a {:?} track",
            sample.codec, codec
        )));
    }
    let expected = codec.frame_size(width, height);
    if sample.data.len() != expected {
        return Err(Error::DecodeFailure(format!(
            "sample is {} bytes, expected {}",
            sample.data.len(),
            expected
        )));
    }

    let data = &sample.data[..];
    let luma = width as usize * height as usize;
    match codec {
        Codec::RawI420 => {
            let chroma = (expected - luma) / 2;
            let (y, rest) = data.split_at(luma);
            let (u, v) = rest.split_at(chroma);
            i420_to_rgba(y, u, v, width, height, sample.pts_us)
        }
        Codec::RawI444 => {
            let (y, rest) = data.split_at(luma);
            let (u, v) = rest.split_at(luma);
            i444_to_rgba(y, u, v, width, height, sample.pts_us)
        }
        Codec::RawMono => mono_to_rgba(data, width, height, sample.pts_us),
        Codec::RawRgba => PixelBuffer::new(
            width,
            height,
            PixelFormat::Rgba8,
            sample.pts_us,
            sample.data.clone(),
        ),
    }
}
