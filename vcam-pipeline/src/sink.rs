//! Output sinks: where encoded frames leave the pipeline

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use vcam_video::{Error, Result, SinkFormat};

/// Consumer of encoded frames, owned by the delivery thread while it runs.
///
/// Returning an error means the consumer is gone for good; the delivery
/// loop stops instead of retrying.
pub trait OutputSink: Send {
    /// Byte layout this sink wants
    fn accepted_format(&self) -> SinkFormat;

    fn push(
        &mut self,
        bytes: &[u8],
        width: u32,
        height: u32,
        format: SinkFormat,
        timestamp_us: u64,
    ) -> Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn accepted_format(&self) -> SinkFormat {
        (**self).accepted_format()
    }

    fn push(
        &mut self,
        bytes: &[u8],
        width: u32,
        height: u32,
        format: SinkFormat,
        timestamp_us: u64,
    ) -> Result<()> {
        (**self).push(bytes, width, height, format, timestamp_us)
    }
}

/// One encoded frame as delivered through a [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: SinkFormat,
    pub timestamp_us: u64,
}

/// Sink that forwards frames over a bounded channel.
///
/// A slow consumer loses frames rather than stalling delivery; a dropped
/// receiver rejects the frame and so ends the loop.
pub struct ChannelSink {
    format: SinkFormat,
    tx: Sender<EncodedFrame>,
    dropped: u64,
}

impl ChannelSink {
    pub fn bounded(format: SinkFormat, capacity: usize) -> (Self, Receiver<EncodedFrame>) {
        let (tx, rx) = channel::bounded(capacity);
        let sink = Self {
            format,
            tx,
            dropped: 0,
        };
        (sink, rx)
    }

    /// Frames discarded because the receiver was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

impl OutputSink for ChannelSink {
    fn accepted_format(&self) -> SinkFormat {
        self.format
    }

    fn push(
        &mut self,
        bytes: &[u8],
        width: u32,
        height: u32,
        format: SinkFormat,
        timestamp_us: u64,
    ) -> Result<()> {
        let frame = EncodedFrame {
            bytes: bytes.to_vec(),
            width,
            height,
            format,
            timestamp_us,
        };
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::SinkRejected("receiver dropped".into())),
        }
    }
}
