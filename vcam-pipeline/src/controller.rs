//! Pipeline lifecycle: source selection, fallback, hot-swap and stop

use crate::config::DeliveryConfig;
use crate::delivery::{
    params_slot, DeliveryCounters, DeliveryLoop, DeliveryStats, LoopExit, LoopInputs, ParamsSlot,
    SourceFactory, StoppedLoop,
};
use crate::sink::OutputSink;
use crate::state::{PipelineState, PipelineStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use vcam_source::{open_source, synthetic_source, FrameSource, FrameSourceSpec, SourceOptions};
use vcam_transform::TransformParameters;
use vcam_video::{Error, Result};

/// Owns one pipeline: its source spec, parameters, sink and delivery loop.
///
/// ```text
/// Idle --start--> Starting --> Running --stop--> Stopping --> Idle
///                                 |  \--sink rejects------------> Idle
///                                 \--source fails twice--> Failed --reset--> Idle
/// ```
pub struct PipelineController {
    key: String,
    config: DeliveryConfig,
    status: Arc<Mutex<PipelineStatus>>,
    params: TransformParameters,
    params_slot: ParamsSlot,
    counters: Arc<DeliveryCounters>,
    active: Option<FrameSourceSpec>,
    fallback: bool,
    delivery: Option<DeliveryLoop>,
    /// Sink kept between runs, handed back by the last loop
    sink: Option<Box<dyn OutputSink>>,
}

impl PipelineController {
    pub fn new(key: impl Into<String>, config: DeliveryConfig) -> Self {
        Self {
            key: key.into(),
            config,
            status: Arc::new(Mutex::new(PipelineStatus::default())),
            params: TransformParameters::IDENTITY,
            params_slot: params_slot(),
            counters: Arc::new(DeliveryCounters::default()),
            active: None,
            fallback: false,
            delivery: None,
            sink: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.status.lock().state.clone()
    }

    /// Most recent failure or sink rejection, kept across restarts
    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    /// The source the caller asked for, even when the fallback is running
    pub fn active_source(&self) -> Option<FrameSourceSpec> {
        self.active.clone()
    }

    /// True when the requested source could not be opened and the
    /// synthetic pattern is running in its place
    pub fn fallback_active(&self) -> bool {
        self.fallback
    }

    pub fn transform_parameters(&self) -> TransformParameters {
        self.params
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    /// Start delivering `spec` into `sink`.
    ///
    /// While running, a different spec hot-swaps the source: the old loop
    /// is stopped and joined before the new one starts, so no frame from
    /// the old source follows the swap. The same spec only updates the
    /// parameters. `sink` may be `None` to keep the sink already attached.
    pub fn start(
        &mut self,
        spec: FrameSourceSpec,
        params: TransformParameters,
        sink: Option<Box<dyn OutputSink>>,
    ) -> Result<()> {
        self.reap();

        let state = self.state();
        match state {
            PipelineState::Failed(reason) => {
                return Err(Error::invalid_parameter(
                    "state",
                    format!("pipeline failed ({}); reset first", reason),
                ))
            }
            PipelineState::Running if self.active.as_ref() == Some(&spec) && sink.is_none() => {
                return self.set_transform_parameters(params);
            }
            _ => {}
        }

        let params = params.validate()?;

        // The running loop holds the current sink; get it back first
        if self.delivery.is_some() {
            log::info!("pipeline {}: hot-swapping to {}", self.key, spec);
            self.halt_loop();
        }
        let sink = match sink.or_else(|| self.sink.take()) {
            Some(sink) => sink,
            None => {
                self.set_state(PipelineState::Idle);
                return Err(Error::invalid_parameter("sink", "no output sink attached"));
            }
        };

        // A loop abandoned by an earlier stop keeps writing to the old cell,
        // never to this run's
        self.status = Arc::new(Mutex::new(PipelineStatus {
            state: PipelineState::Starting,
            last_error: self.last_error(),
        }));
        let options = self.config.source_options();
        let (source, factory, fallback) = build_source(&self.key, &spec, &options);

        // Stale parameters from a previous run must not override these
        while self.params_slot.pop().is_some() {}
        self.params = params;

        let inputs = LoopInputs {
            source,
            factory,
            params,
            params_slot: self.params_slot.clone(),
            sink,
            config: self.config,
            status: self.status.clone(),
            counters: self.counters.clone(),
        };
        match DeliveryLoop::spawn(&self.key, inputs) {
            Ok(delivery) => self.delivery = Some(delivery),
            Err(e) => {
                self.set_failed(e.to_string());
                return Err(e);
            }
        }

        self.active = Some(spec);
        self.fallback = fallback;
        {
            let mut status = self.status.lock();
            // The loop may already have ended on its own
            if status.state == PipelineState::Starting {
                status.state = PipelineState::Running;
            }
        }
        Ok(())
    }

    /// Replace the transform parameters; applied from the next tick.
    ///
    /// Invalid parameters are rejected and the current ones stay in force.
    pub fn set_transform_parameters(&mut self, params: TransformParameters) -> Result<()> {
        let params = params.validate()?;
        self.params = params;
        if self.delivery.is_some() {
            self.params_slot.force_push(params);
        }
        Ok(())
    }

    /// Stop delivery and wait (bounded) for the loop to release its source.
    ///
    /// Ends in `Idle` even if the loop has to be abandoned. A failed
    /// pipeline stays `Failed` until [`reset`](Self::reset).
    pub fn stop(&mut self) -> Result<()> {
        self.reap();
        if self.state().is_failed() {
            return Ok(());
        }

        if self.delivery.is_some() {
            self.set_state(PipelineState::Stopping);
            self.halt_loop();
            log::info!("pipeline {} stopped", self.key);
        }
        self.set_state(PipelineState::Idle);
        Ok(())
    }

    /// Leave `Failed`; the next `start` may run again
    pub fn reset(&mut self) {
        self.reap();
        if self.delivery.is_some() {
            self.halt_loop();
        }
        self.active = None;
        self.fallback = false;
        self.set_state(PipelineState::Idle);
    }

    /// Collect a loop that ended on its own
    fn reap(&mut self) {
        let reaped = match self.delivery.as_mut() {
            Some(delivery) => delivery.try_reap(),
            None => return,
        };
        if let Some(stopped) = reaped {
            self.delivery = None;
            self.keep_sink(stopped);
        }
    }

    fn halt_loop(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            match delivery.stop(self.config.join_timeout) {
                Some(stopped) => self.keep_sink(stopped),
                None => log::warn!("pipeline {}: sink lost with abandoned loop", self.key),
            }
        }
    }

    fn keep_sink(&mut self, stopped: StoppedLoop) {
        match stopped.exit {
            // A sink that refused a frame is dead
            LoopExit::SinkRejected(_) => self.sink = None,
            LoopExit::Stopped | LoopExit::Failed(_) => self.sink = Some(stopped.sink),
        }
    }

    fn set_state(&self, state: PipelineState) {
        self.status.lock().state = state;
    }

    fn set_failed(&self, reason: String) {
        log::error!("pipeline {} failed: {}", self.key, reason);
        let mut status = self.status.lock();
        status.state = PipelineState::Failed(reason.clone());
        status.last_error = Some(reason);
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.delivery.is_some() {
            self.halt_loop();
        }
    }
}

/// Open the requested source, falling back to the synthetic pattern when
/// it cannot be constructed for any reason (missing, unreadable, corrupt
/// or unsupported). Returns the source, a factory that rebuilds the same
/// kind of source, and whether the fallback was taken.
fn build_source(
    key: &str,
    spec: &FrameSourceSpec,
    options: &SourceOptions,
) -> (Box<dyn FrameSource>, SourceFactory, bool) {
    let options = *options;
    match open_source(spec, &options) {
        Ok(source) => {
            let spec = spec.clone();
            let factory: SourceFactory = Box::new(move || open_source(&spec, &options));
            (source, factory, false)
        }
        Err(e) => {
            log::warn!(
                "pipeline {}: cannot open {} ({:?}: {}), falling back to synthetic pattern",
                key,
                spec,
                e.kind(),
                e
            );
            let factory: SourceFactory =
                Box::new(move || Ok(Box::new(synthetic_source(&options)) as Box<dyn FrameSource>));
            (Box::new(synthetic_source(&options)), factory, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, EncodedFrame};
    use crossbeam::channel::Receiver;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};
    use vcam_source::handles::{live_decoders, live_demuxers};
    use vcam_video::{ErrorKind, PixelBuffer, SinkFormat};

    /// Tests that open video files assert on process-wide handle counters
    fn serial() -> parking_lot::MutexGuard<'static, ()> {
        static LOCK: Mutex<()> = parking_lot::const_mutex(());
        LOCK.lock()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vcam-pipeline-{}-{}", std::process::id(), name))
    }

    /// 4x4 mono Y4M, frame `i` has luma `16 + 20 * i`
    fn write_y4m(path: &Path, frames: u32) {
        let mut bytes = b"YUV4MPEG2 W4 H4 F100:1 Cmono\n".to_vec();
        for i in 0..frames {
            bytes.extend_from_slice(b"FRAME\n");
            bytes.extend(std::iter::repeat((16 + 20 * i) as u8).take(16));
        }
        std::fs::File::create(path).unwrap().write_all(&bytes).unwrap();
    }

    fn fast_config() -> DeliveryConfig {
        DeliveryConfig {
            frame_rate: 200,
            ..DeliveryConfig::default()
        }
    }

    fn small_synthetic_config() -> DeliveryConfig {
        DeliveryConfig {
            output: Some(vcam_transform::OutputGeometry::new(16, 8, vcam_transform::FitMode::Stretch)),
            ..fast_config()
        }
    }

    fn channel_sink(format: SinkFormat) -> (Option<Box<dyn OutputSink>>, Receiver<EncodedFrame>) {
        let (sink, rx) = ChannelSink::bounded(format, 256);
        (Some(Box::new(sink)), rx)
    }

    fn recv(rx: &Receiver<EncodedFrame>) -> EncodedFrame {
        rx.recv_timeout(Duration::from_secs(5)).expect("frame delivered")
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_synthetic_run_and_stop() {
        let mut controller = PipelineController::new("synthetic", small_synthetic_config());
        assert_eq!(controller.state(), PipelineState::Idle);

        let (sink, rx) = channel_sink(SinkFormat::Yuv420SemiPlanar);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        assert_eq!(controller.state(), PipelineState::Running);
        assert!(!controller.fallback_active());

        let frame = recv(&rx);
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.format, SinkFormat::Yuv420SemiPlanar);
        assert_eq!(frame.bytes.len(), 16 * 8 + 2 * 8 * 4);

        let started = Instant::now();
        controller.stop().unwrap();
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(started.elapsed() < controller.config().join_timeout);
        assert!(controller.stats().frames_delivered >= 1);
    }

    #[test]
    fn test_rgba_sink_skips_conversion() {
        let mut controller = PipelineController::new("rgba", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();

        let frame = recv(&rx);
        assert_eq!(frame.format, SinkFormat::Rgba);
        assert_eq!(frame.bytes.len(), 16 * 8 * 4);
        controller.stop().unwrap();
    }

    #[test]
    fn test_parameters_apply_on_next_tick() {
        let mut controller = PipelineController::new("params", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);

        let black = TransformParameters {
            brightness: -1.0,
            ..Default::default()
        };
        controller.set_transform_parameters(black).unwrap();

        // Within a few ticks every delivered frame is fully black
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let frame = recv(&rx);
            let all_black = frame.bytes.chunks_exact(4).all(|px| px[..3] == [0, 0, 0]);
            if all_black {
                break;
            }
            assert!(Instant::now() < deadline, "parameters never applied");
        }
        controller.stop().unwrap();
    }

    #[test]
    fn test_invalid_parameters_keep_previous() {
        let mut controller = PipelineController::new("invalid", small_synthetic_config());
        let flipped = TransformParameters {
            flip_horizontal: true,
            ..Default::default()
        };
        controller.set_transform_parameters(flipped).unwrap();

        let err = controller
            .set_transform_parameters(TransformParameters {
                scale_x: -1.0,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(controller.transform_parameters(), flipped);
    }

    #[test]
    fn test_missing_file_falls_back_to_synthetic() {
        let mut controller = PipelineController::new("fallback", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        let spec = FrameSourceSpec::Video(PathBuf::from("/no/such/clip.y4m"));

        controller
            .start(spec.clone(), TransformParameters::IDENTITY, sink)
            .unwrap();
        assert_eq!(controller.state(), PipelineState::Running);
        assert!(controller.fallback_active());
        assert_eq!(controller.active_source(), Some(spec));

        let frame = recv(&rx);
        assert_eq!((frame.width, frame.height), (16, 8));
        controller.stop().unwrap();
    }

    /// Start `spec` and expect the synthetic fallback to be delivering
    fn assert_falls_back(spec: FrameSourceSpec) {
        let mut controller = PipelineController::new("unopenable", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);

        controller
            .start(spec.clone(), TransformParameters::IDENTITY, sink)
            .unwrap();
        assert_eq!(controller.state(), PipelineState::Running, "{}", spec);
        assert!(controller.fallback_active(), "{}", spec);
        assert_eq!(controller.active_source(), Some(spec));

        let frame = recv(&rx);
        assert_eq!((frame.width, frame.height), (16, 8));
        controller.stop().unwrap();
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn test_unreadable_sources_fall_back_to_synthetic() {
        let _serial = serial();

        // A directory opens as a file on some platforms but never reads
        let dir = temp_path("dir.y4m");
        std::fs::create_dir_all(&dir).unwrap();
        assert_falls_back(FrameSourceSpec::Video(dir.clone()));
        assert_falls_back(FrameSourceSpec::Image(dir.clone()));

        let gif = temp_path("truncated.gif");
        std::fs::write(&gif, b"GIF89a\x02\x00").unwrap();
        assert_falls_back(FrameSourceSpec::Video(gif.clone()));
        assert_falls_back(FrameSourceSpec::Image(gif.clone()));

        let y4m = temp_path("multibyte.y4m");
        std::fs::write(&y4m, "YUV4MPEG2 \u{e9}W4 H4 F25:1\nFRAME\n".as_bytes()).unwrap();
        assert_falls_back(FrameSourceSpec::Video(y4m.clone()));

        let junk = temp_path("junk.y4m");
        std::fs::write(&junk, [0xffu8; 64]).unwrap();
        assert_falls_back(FrameSourceSpec::Video(junk.clone()));

        let long = temp_path("long-header.y4m");
        let mut header = b"YUV4MPEG2 W4 H4 F25:1 X".to_vec();
        header.resize(4096, b'x');
        header.push(b'\n');
        std::fs::write(&long, &header).unwrap();
        assert_falls_back(FrameSourceSpec::Video(long.clone()));

        std::fs::remove_dir_all(&dir).ok();
        for path in [gif, y4m, junk, long] {
            std::fs::remove_file(&path).ok();
        }
    }

    #[test]
    fn test_video_loops_and_stops_without_leaks() {
        let _serial = serial();
        let path = temp_path("loop.y4m");
        write_y4m(&path, 3);

        let demuxers = live_demuxers();
        let decoders = live_decoders();

        let mut controller = PipelineController::new("video", fast_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Video(path.clone()), TransformParameters::IDENTITY, sink)
            .unwrap();
        assert!(!controller.fallback_active());

        // Seven frames from a three-frame file: the source wrapped twice
        let stamps: Vec<u64> = (0..7).map(|_| recv(&rx).timestamp_us).collect();
        let expected: Vec<u64> = (0..7).map(|i| i * 10_000).collect();
        assert_eq!(stamps, expected);

        let started = Instant::now();
        controller.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(controller.state(), PipelineState::Idle);
        assert_eq!(live_demuxers(), demuxers);
        assert_eq!(live_decoders(), decoders);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_still_image_repeats_each_tick() {
        let path = temp_path("still.png");
        image::RgbaImage::from_pixel(4, 2, image::Rgba([200, 10, 10, 255]))
            .save(&path)
            .unwrap();

        let mut controller = PipelineController::new("still", fast_config());
        let (sink, rx) = channel_sink(SinkFormat::Yuv420SemiPlanar);
        controller
            .start(FrameSourceSpec::Image(path.clone()), TransformParameters::IDENTITY, sink)
            .unwrap();
        assert!(!controller.fallback_active());

        let first = recv(&rx);
        let second = recv(&rx);
        assert_eq!((first.width, first.height), (4, 2));
        assert_eq!(first.bytes, second.bytes);
        assert!(second.timestamp_us > first.timestamp_us);

        controller.stop().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_hot_swap_stays_running() {
        let _serial = serial();
        let path = temp_path("swap.y4m");
        write_y4m(&path, 2);

        let mut controller = PipelineController::new("swap", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);

        // Same sink, new source
        controller
            .start(FrameSourceSpec::Video(path.clone()), TransformParameters::IDENTITY, None)
            .unwrap();
        assert_eq!(controller.state(), PipelineState::Running);
        assert_eq!(controller.active_source(), Some(FrameSourceSpec::Video(path.clone())));

        // Frames queued before the swap are the coloured pattern; once the
        // first grey video frame arrives nothing else may follow
        let grey = |frame: &EncodedFrame| {
            frame.bytes.chunks_exact(4).all(|px| px[0] == px[1] && px[1] == px[2])
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !grey(&recv(&rx)) {
            assert!(Instant::now() < deadline, "no video frame after swap");
        }
        for _ in 0..3 {
            assert!(grey(&recv(&rx)));
        }

        controller.stop().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_same_source_only_updates_parameters() {
        let mut controller = PipelineController::new("same", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);

        let flipped = TransformParameters {
            flip_vertical: true,
            ..Default::default()
        };
        controller
            .start(FrameSourceSpec::Synthetic, flipped, None)
            .unwrap();
        assert_eq!(controller.transform_parameters(), flipped);
        assert_eq!(controller.state(), PipelineState::Running);
        controller.stop().unwrap();
    }

    #[test]
    fn test_sink_rejection_moves_to_idle() {
        let mut controller = PipelineController::new("rejected", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);
        drop(rx);

        wait_for(|| controller.state() == PipelineState::Idle);
        assert!(controller.last_error().unwrap().contains("sink rejected"));

        // The dead sink was discarded; a new start needs a new one
        let err = controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);
        controller.stop().unwrap();
    }

    #[test]
    fn test_restart_reuses_retained_sink() {
        let mut controller = PipelineController::new("restart", small_synthetic_config());
        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);
        controller.stop().unwrap();

        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, None)
            .unwrap();
        while rx.try_recv().is_ok() {}
        recv(&rx);
        controller.stop().unwrap();
    }

    /// Blocks in `push` until released, then rejects
    struct GatedSink {
        entered: crossbeam::channel::Sender<()>,
        release: Receiver<()>,
        dropped: crossbeam::channel::Sender<()>,
    }

    impl OutputSink for GatedSink {
        fn accepted_format(&self) -> SinkFormat {
            SinkFormat::Rgba
        }

        fn push(&mut self, _: &[u8], _: u32, _: u32, _: SinkFormat, _: u64) -> Result<()> {
            self.entered.send(()).ok();
            self.release.recv().ok();
            Err(Error::SinkRejected("gate closed".into()))
        }
    }

    impl Drop for GatedSink {
        fn drop(&mut self) {
            self.dropped.send(()).ok();
        }
    }

    #[test]
    fn test_abandoned_loop_cannot_touch_next_run() {
        let config = DeliveryConfig {
            join_timeout: Duration::from_millis(100),
            ..small_synthetic_config()
        };
        let mut controller = PipelineController::new("abandoned", config);

        let (entered_tx, entered_rx) = crossbeam::channel::unbounded();
        let (release_tx, release_rx) = crossbeam::channel::unbounded();
        let (dropped_tx, dropped_rx) = crossbeam::channel::unbounded();
        let gated = GatedSink {
            entered: entered_tx,
            release: release_rx,
            dropped: dropped_tx,
        };
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, Some(Box::new(gated)))
            .unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The loop is stuck in the sink, so stop gives up on it
        controller.stop().unwrap();
        assert_eq!(controller.state(), PipelineState::Idle);

        let (sink, rx) = channel_sink(SinkFormat::Rgba);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .unwrap();
        recv(&rx);

        // Let the abandoned loop end with a rejection
        release_tx.send(()).unwrap();
        dropped_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(controller.state(), PipelineState::Running);
        assert!(!controller.last_error().unwrap_or_default().contains("gate closed"));
        while rx.try_recv().is_ok() {}
        recv(&rx);
        controller.stop().unwrap();
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut controller = PipelineController::new("idle", DeliveryConfig::default());
        controller.stop().unwrap();
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    /// Fails on demand; the factory decides what replaces it
    struct FlakySource {
        failures_left: u32,
        frames: u64,
    }

    impl FrameSource for FlakySource {
        fn produce_next_frame(&mut self) -> Result<vcam_source::FrameOutcome> {
            if self.frames >= 2 && self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(Error::DecodeFailure("corrupt sample".into()));
            }
            self.frames += 1;
            Ok(vcam_source::FrameOutcome::Frame(PixelBuffer::blank(
                2,
                2,
                vcam_video::PixelFormat::Rgba8,
                self.frames,
            )))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn spawn_flaky(
        controller: &mut PipelineController,
        source: FlakySource,
        factory: SourceFactory,
    ) -> Receiver<EncodedFrame> {
        let (sink, rx) = ChannelSink::bounded(SinkFormat::Rgba, 256);
        let inputs = LoopInputs {
            source: Box::new(source),
            factory,
            params: TransformParameters::IDENTITY,
            params_slot: controller.params_slot.clone(),
            sink: Box::new(sink),
            config: controller.config,
            status: controller.status.clone(),
            counters: controller.counters.clone(),
        };
        controller.set_state(PipelineState::Running);
        controller.delivery = Some(DeliveryLoop::spawn(&controller.key, inputs).unwrap());
        rx
    }

    #[test]
    fn test_single_decode_failure_reinitialises() {
        let mut controller = PipelineController::new("reinit", fast_config());
        let factory: SourceFactory = Box::new(|| {
            Ok(Box::new(FlakySource {
                failures_left: 0,
                frames: 0,
            }) as Box<dyn FrameSource>)
        });
        let rx = spawn_flaky(
            &mut controller,
            FlakySource {
                failures_left: 1,
                frames: 0,
            },
            factory,
        );

        for _ in 0..5 {
            recv(&rx);
        }
        assert_eq!(controller.state(), PipelineState::Running);
        assert_eq!(controller.stats().source_reinits, 1);
        controller.stop().unwrap();
    }

    #[test]
    fn test_second_consecutive_failure_fails_pipeline() {
        let mut controller = PipelineController::new("failed", fast_config());
        let factory: SourceFactory = Box::new(|| {
            Ok(Box::new(FlakySource {
                failures_left: 1,
                frames: 2,
            }) as Box<dyn FrameSource>)
        });
        let _rx = spawn_flaky(
            &mut controller,
            FlakySource {
                failures_left: 1,
                frames: 0,
            },
            factory,
        );

        wait_for(|| controller.state().is_failed());
        assert!(controller.last_error().unwrap().contains("corrupt sample"));

        // Failed blocks start until reset
        let (sink, _rx2) = channel_sink(SinkFormat::Rgba);
        assert!(controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, sink)
            .is_err());
        controller.stop().unwrap();
        assert!(controller.state().is_failed());

        controller.reset();
        assert_eq!(controller.state(), PipelineState::Idle);
        controller
            .start(FrameSourceSpec::Synthetic, TransformParameters::IDENTITY, None)
            .unwrap();
        assert_eq!(controller.state(), PipelineState::Running);
        controller.stop().unwrap();
    }
}
