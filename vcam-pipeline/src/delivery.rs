//! Timed delivery loop
//!
//! One named thread per running pipeline. Each tick it takes the newest
//! transform parameters, pulls a frame from the source, transforms, fits
//! and encodes it, waits for the frame's due time and pushes it to the sink.
//!
//! The thread owns the source and the sink exclusively. On exit it releases
//! the source, records why it stopped and hands the sink back to whoever
//! stops it.

use crate::config::DeliveryConfig;
use crate::sink::OutputSink;
use crate::state::{PipelineState, PipelineStatus};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vcam_source::{FrameOutcome, FrameSource};
use vcam_transform::{fit_to, FrameTransform, TransformParameters};
use vcam_video::{to_semi_planar_yuv420, ErrorKind, PixelBuffer, Result, SinkFormat};

/// Longest single sleep, so a stop request is seen promptly
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Wait after a tick where the source had nothing ready
const PENDING_BACKOFF: Duration = Duration::from_millis(2);

/// Presentation lag (or lead) beyond which pacing re-anchors
const REANCHOR_THRESHOLD: Duration = Duration::from_secs(1);

/// Rebuilds the source after a mid-stream decode failure
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn FrameSource>> + Send>;

/// Single-slot, last-writer-wins parameter mailbox
pub type ParamsSlot = Arc<ArrayQueue<TransformParameters>>;

pub fn params_slot() -> ParamsSlot {
    Arc::new(ArrayQueue::new(1))
}

/// Why a delivery thread ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// `stop` was requested
    Stopped,
    /// The sink refused a frame
    SinkRejected(String),
    /// The source failed twice in a row, or could not be rebuilt
    Failed(String),
}

/// Counters shared with the controller, updated lock-free
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    frames_delivered: AtomicU64,
    frames_pending: AtomicU64,
    source_reinits: AtomicU64,
}

impl DeliveryCounters {
    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_pending: self.frames_pending.load(Ordering::Relaxed),
            source_reinits: self.source_reinits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryStats {
    /// Frames accepted by the sink
    pub frames_delivered: u64,
    /// Ticks where the source had nothing ready
    pub frames_pending: u64,
    /// Sources rebuilt after a decode failure
    pub source_reinits: u64,
}

/// Everything handed to the delivery thread at spawn
pub struct LoopInputs {
    pub source: Box<dyn FrameSource>,
    pub factory: SourceFactory,
    pub params: TransformParameters,
    pub params_slot: ParamsSlot,
    pub sink: Box<dyn OutputSink>,
    pub config: DeliveryConfig,
    pub status: Arc<Mutex<PipelineStatus>>,
    pub counters: Arc<DeliveryCounters>,
}

/// Handle to a running delivery thread
pub struct DeliveryLoop {
    key: String,
    running: Arc<AtomicBool>,
    exit_rx: Receiver<(LoopExit, Box<dyn OutputSink>)>,
    thread_handle: Option<JoinHandle<()>>,
}

/// What `stop` recovered from the thread
pub struct StoppedLoop {
    pub exit: LoopExit,
    pub sink: Box<dyn OutputSink>,
}

impl DeliveryLoop {
    /// Start delivering on a thread named `vcam-delivery-<key>`
    pub fn spawn(key: &str, inputs: LoopInputs) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (exit_tx, exit_rx) = channel::bounded(1);

        let thread_running = running.clone();
        let thread_key = key.to_string();
        let thread_handle = thread::Builder::new()
            .name(format!("vcam-delivery-{}", key))
            .spawn(move || run_loop(thread_key, inputs, thread_running, exit_tx))?;

        log::info!("delivery loop {} started", key);
        Ok(Self {
            key: key.to_string(),
            running,
            exit_rx,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the thread has ended on its own or been asked to stop
    pub fn is_finished(&self) -> bool {
        !self.running.load(Ordering::Acquire) || !self.exit_rx.is_empty()
    }

    /// Collect the exit of a thread that ended on its own, without blocking
    pub fn try_reap(&mut self) -> Option<StoppedLoop> {
        let (exit, sink) = self.exit_rx.try_recv().ok()?;
        self.join();
        Some(StoppedLoop { exit, sink })
    }

    /// Request a stop and wait up to `timeout` for the thread to hand back
    /// the sink. `None` means the thread did not finish in time (it is
    /// detached) or died without handing anything back.
    pub fn stop(mut self, timeout: Duration) -> Option<StoppedLoop> {
        self.running.store(false, Ordering::Release);

        match self.exit_rx.recv_timeout(timeout) {
            Ok((exit, sink)) => {
                self.join();
                log::info!("delivery loop {} stopped ({:?})", self.key, exit);
                Some(StoppedLoop { exit, sink })
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "delivery loop {} did not stop within {:?}, detaching",
                    self.key,
                    timeout
                );
                self.thread_handle.take();
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                log::error!("delivery loop {} exited without handing back its sink", self.key);
                None
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("delivery loop {} panicked", self.key);
            }
        }
    }
}

impl Drop for DeliveryLoop {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        // Never block in drop; a thread still running finishes on its own
        if let Ok((_, sink)) = self.exit_rx.try_recv() {
            drop(sink);
            self.join();
        }
    }
}

/// Delivery thread body
fn run_loop(
    key: String,
    inputs: LoopInputs,
    running: Arc<AtomicBool>,
    exit_tx: Sender<(LoopExit, Box<dyn OutputSink>)>,
) {
    let LoopInputs {
        mut source,
        mut factory,
        mut params,
        params_slot,
        mut sink,
        config,
        status,
        counters,
    } = inputs;

    if let Some(core) = config.pin_to_core {
        pin_current_thread(&key, core);
    }

    let transform = FrameTransform::new(config.sampling);
    let mut pacer = Pacer::new(config.period());
    let mut recovering = false;

    let exit = loop {
        if !running.load(Ordering::Acquire) {
            break LoopExit::Stopped;
        }

        if let Some(latest) = params_slot.pop() {
            params = latest;
        }

        let frame = match source.produce_next_frame() {
            Ok(FrameOutcome::Frame(frame)) => {
                recovering = false;
                frame
            }
            Ok(FrameOutcome::Pending) => {
                counters.frames_pending.fetch_add(1, Ordering::Relaxed);
                if !sleep_until(Instant::now() + PENDING_BACKOFF, &running) {
                    break LoopExit::Stopped;
                }
                continue;
            }
            Err(e) if e.kind() == ErrorKind::DecodeFailure && !recovering => {
                log::warn!("{} source failed ({}), re-initialising", source.name(), e);
                source.stop();
                match factory() {
                    Ok(rebuilt) => {
                        source = rebuilt;
                        recovering = true;
                        pacer.reset();
                        counters.source_reinits.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Err(e) => break LoopExit::Failed(format!("re-initialisation failed: {}", e)),
                }
            }
            Err(e) => break LoopExit::Failed(e.to_string()),
        };

        let timed = source.has_timestamps().then_some(frame.timestamp_us());
        let (bytes, width, height, format) = match encode(&frame, &transform, &params, &config, sink.accepted_format()) {
            Ok(encoded) => encoded,
            Err(e) => break LoopExit::Failed(e.to_string()),
        };

        let due = pacer.due(timed, Instant::now());
        if !sleep_until(due, &running) {
            break LoopExit::Stopped;
        }

        if let Err(e) = sink.push(&bytes, width, height, format, frame.timestamp_us()) {
            break LoopExit::SinkRejected(e.to_string());
        }

        let delivered = counters.frames_delivered.fetch_add(1, Ordering::Relaxed) + 1;
        if delivered % 30 == 0 {
            log::debug!("delivery loop {}: frame {} delivered", key, delivered);
        }
    };

    // Release decoder resources before anyone is told we are done
    source.stop();
    drop(source);

    match &exit {
        LoopExit::Stopped => {}
        LoopExit::SinkRejected(reason) => {
            log::warn!("delivery loop {}: {}", key, reason);
            let mut status = status.lock();
            status.state = PipelineState::Idle;
            status.last_error = Some(reason.clone());
        }
        LoopExit::Failed(reason) => {
            log::error!("delivery loop {} failed: {}", key, reason);
            let mut status = status.lock();
            status.state = PipelineState::Failed(reason.clone());
            status.last_error = Some(reason.clone());
        }
    }

    running.store(false, Ordering::Release);
    if exit_tx.send((exit, sink)).is_err() {
        log::debug!("delivery loop {}: nobody waiting for the sink", key);
    }
}

/// Transform, fit and encode one frame for the sink
fn encode(
    frame: &PixelBuffer,
    transform: &FrameTransform,
    params: &TransformParameters,
    config: &DeliveryConfig,
    format: SinkFormat,
) -> Result<(Vec<u8>, u32, u32, SinkFormat)> {
    let mut out = transform.apply(frame, params)?;
    if let Some(geometry) = &config.output {
        out = fit_to(&out, geometry, config.sampling)?;
    }

    let bytes = match format {
        SinkFormat::Rgba => out.to_rgba().pixels().to_vec(),
        SinkFormat::Yuv420SemiPlanar => to_semi_planar_yuv420(&out),
    };
    Ok((bytes, out.width(), out.height(), format))
}

fn pin_current_thread(key: &str, core: usize) {
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    match cores.into_iter().find(|c| c.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            log::debug!("delivery loop {} pinned to core {}", key, core);
        }
        _ => log::warn!("delivery loop {}: could not pin to core {}", key, core),
    }
}

/// Sleep in short slices until `deadline`; false if a stop was requested
fn sleep_until(deadline: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
    }
}

/// Computes when each frame should be pushed.
///
/// Timed frames are scheduled relative to an anchor `(instant, pts)`;
/// untimed frames follow a fixed period without accumulating drift.
#[derive(Debug)]
struct Pacer {
    period: Duration,
    anchor: Option<(Instant, u64)>,
    next_tick: Option<Instant>,
}

impl Pacer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            anchor: None,
            next_tick: None,
        }
    }

    fn reset(&mut self) {
        self.anchor = None;
        self.next_tick = None;
    }

    fn due(&mut self, pts_us: Option<u64>, now: Instant) -> Instant {
        match pts_us {
            Some(pts) => self.due_timed(pts, now),
            None => self.due_fixed(now),
        }
    }

    fn due_timed(&mut self, pts: u64, now: Instant) -> Instant {
        if let Some((instant, base)) = self.anchor {
            if pts >= base {
                let due = instant + Duration::from_micros(pts - base);
                let lagging = now.saturating_duration_since(due) > REANCHOR_THRESHOLD;
                let leading = due.saturating_duration_since(now) > REANCHOR_THRESHOLD;
                if !lagging && !leading {
                    return due;
                }
            }
        }
        self.anchor = Some((now, pts));
        now
    }

    fn due_fixed(&mut self, now: Instant) -> Instant {
        let due = self.next_tick.unwrap_or(now);
        let next = due + self.period;
        // Skip missed ticks instead of bursting to catch up
        self.next_tick = Some(if next < now { now } else { next });
        due
    }
}
