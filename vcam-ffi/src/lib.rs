//! Virtual camera FFI - C Foreign Function Interface
//!
//! C-compatible API for hosts that embed the pipeline: create a pipeline,
//! start it on a source with a frame callback, adjust the transform while
//! it runs, stop it. Every function is null-safe and reports success as
//! 1 / failure as 0 unless documented otherwise.

use libc::size_t;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::path::PathBuf;
use std::ptr;

use vcam_pipeline::{
    CameraConfig, DeliveryConfig, FitMode, FrameSourceSpec, OutputGeometry, OutputSink,
    PipelineController, TransformParameters,
};
use vcam_video::{Error, PixelBuffer, PixelFormat, Result, SinkFormat};

mod transform_ffi;
pub use transform_ffi::*;

/// Opaque handle to a pipeline (C-compatible)
pub struct VcamPipeline {
    _private: [u8; 0],
}

/// Receives one encoded frame; return non-zero to accept, 0 to reject.
/// `bytes` is only valid for the duration of the call.
pub type VcamFrameCallback = extern "C" fn(
    user_data: *mut c_void,
    bytes: *const u8,
    len: size_t,
    width: u32,
    height: u32,
    format: c_uint,
    timestamp_us: u64,
) -> c_int;

pub const VCAM_FORMAT_RGBA: c_uint = SinkFormat::Rgba as c_uint;
pub const VCAM_FORMAT_YUV420SP: c_uint = SinkFormat::Yuv420SemiPlanar as c_uint;

pub const VCAM_SOURCE_VIDEO: c_uint = 0;
pub const VCAM_SOURCE_IMAGE: c_uint = 1;

/// Host-side sink reached through a C callback
struct CallbackSink {
    callback: VcamFrameCallback,
    user_data: *mut c_void,
    format: SinkFormat,
}

// The host guarantees `user_data` may be used from the delivery thread
unsafe impl Send for CallbackSink {}

impl OutputSink for CallbackSink {
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
        let accepted = (self.callback)(
            self.user_data,
            bytes.as_ptr(),
            bytes.len(),
            width,
            height,
            format as c_uint,
            timestamp_us,
        );
        if accepted == 0 {
            return Err(Error::SinkRejected("host callback returned 0".into()));
        }
        Ok(())
    }
}

fn sink_format(format: c_uint) -> Option<SinkFormat> {
    match format {
        VCAM_FORMAT_RGBA => Some(SinkFormat::Rgba),
        VCAM_FORMAT_YUV420SP => Some(SinkFormat::Yuv420SemiPlanar),
        _ => None,
    }
}

/// `None` callback keeps whatever sink the pipeline already holds
fn make_sink(
    callback: Option<VcamFrameCallback>,
    user_data: *mut c_void,
    format: c_uint,
) -> std::result::Result<Option<Box<dyn OutputSink>>, ()> {
    let Some(callback) = callback else {
        return Ok(None);
    };
    match sink_format(format) {
        Some(format) => Ok(Some(Box::new(CallbackSink {
            callback,
            user_data,
            format,
        }))),
        None => {
            log::error!("unknown sink format {}", format);
            Err(())
        }
    }
}

fn report(result: Result<()>, what: &str) -> c_int {
    match result {
        Ok(()) => 1,
        Err(e) => {
            log::error!("{} failed: {}", what, e);
            0
        }
    }
}

unsafe fn controller<'a>(ptr: *mut VcamPipeline) -> Option<&'a mut PipelineController> {
    (ptr as *mut PipelineController).as_mut()
}

unsafe fn path_arg(path: *const c_char) -> Option<PathBuf> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok().map(PathBuf::from)
}

// ============================================================================
// PIPELINE API
// ============================================================================

/// Create an idle pipeline delivering `width` x `height` frames.
///
/// `fps` paces sources without their own timing. `fit_mode` is 0 (stretch),
/// 1 (letterbox) or 2 (crop). A zero size keeps each source's native size.
#[no_mangle]
pub extern "C" fn vcam_pipeline_create(
    width: u32,
    height: u32,
    fps: u32,
    fit_mode: c_uint,
) -> *mut VcamPipeline {
    let fit = match fit_mode {
        0 => FitMode::Stretch,
        1 => FitMode::ScaleInner,
        2 => FitMode::ScaleOuter,
        _ => return ptr::null_mut(),
    };
    if fps == 0 {
        return ptr::null_mut();
    }

    let output = (width > 0 && height > 0).then(|| OutputGeometry::new(width, height, fit));
    let config = DeliveryConfig {
        frame_rate: fps,
        output,
        ..DeliveryConfig::default()
    };
    let controller = Box::new(PipelineController::new("ffi", config));
    Box::into_raw(controller) as *mut VcamPipeline
}

/// Create an idle pipeline from a persisted JSON camera configuration
///
/// # Safety
/// `json` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_create_from_json(json: *const c_char) -> *mut VcamPipeline {
    if json.is_null() {
        return ptr::null_mut();
    }
    let Ok(json) = CStr::from_ptr(json).to_str() else {
        return ptr::null_mut();
    };

    match CameraConfig::from_json(json).and_then(|config| config.delivery_config()) {
        Ok(config) => Box::into_raw(Box::new(PipelineController::new("ffi", config))) as *mut VcamPipeline,
        Err(e) => {
            log::error!("invalid camera configuration: {}", e);
            ptr::null_mut()
        }
    }
}

/// Destroy a pipeline, stopping it first
///
/// # Safety
/// Caller must ensure ptr is valid and not already freed.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_destroy(ptr: *mut VcamPipeline) {
    if !ptr.is_null() {
        let _ = Box::from_raw(ptr as *mut PipelineController);
    }
}

/// Start (or hot-swap to) the synthetic test pattern.
///
/// A null `callback` reuses the sink from the previous run.
///
/// # Safety
/// Caller must ensure ptr is valid. `user_data` must stay valid, and be
/// usable from another thread, until the pipeline is stopped.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_start_synthetic(
    ptr: *mut VcamPipeline,
    callback: Option<VcamFrameCallback>,
    user_data: *mut c_void,
    format: c_uint,
) -> c_int {
    let Some(controller) = controller(ptr) else {
        return 0;
    };
    let Ok(sink) = make_sink(callback, user_data, format) else {
        return 0;
    };
    let params = controller.transform_parameters();
    report(
        controller.start(FrameSourceSpec::Synthetic, params, sink),
        "start synthetic",
    )
}

/// Start (or hot-swap to) a file source. `kind` is `VCAM_SOURCE_VIDEO` or
/// `VCAM_SOURCE_IMAGE`. A missing or unreadable file runs the synthetic
/// pattern instead; see [`vcam_pipeline_fallback_active`].
///
/// # Safety
/// As [`vcam_pipeline_start_synthetic`]; `path` must be a valid
/// NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_start_file(
    ptr: *mut VcamPipeline,
    kind: c_uint,
    path: *const c_char,
    callback: Option<VcamFrameCallback>,
    user_data: *mut c_void,
    format: c_uint,
) -> c_int {
    let Some(controller) = controller(ptr) else {
        return 0;
    };
    let Some(path) = path_arg(path) else {
        return 0;
    };
    let spec = match kind {
        VCAM_SOURCE_VIDEO => FrameSourceSpec::Video(path),
        VCAM_SOURCE_IMAGE => FrameSourceSpec::Image(path),
        _ => return 0,
    };
    let Ok(sink) = make_sink(callback, user_data, format) else {
        return 0;
    };
    let params = controller.transform_parameters();
    report(controller.start(spec, params, sink), "start file")
}

/// Start whatever a persisted JSON configuration selects, with its
/// transform. A disabled camera stops the pipeline.
///
/// # Safety
/// As [`vcam_pipeline_start_synthetic`]; `json` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_start_config(
    ptr: *mut VcamPipeline,
    json: *const c_char,
    callback: Option<VcamFrameCallback>,
    user_data: *mut c_void,
    format: c_uint,
) -> c_int {
    let Some(controller) = controller(ptr) else {
        return 0;
    };
    if json.is_null() {
        return 0;
    }
    let Ok(json) = CStr::from_ptr(json).to_str() else {
        return 0;
    };
    let Ok(sink) = make_sink(callback, user_data, format) else {
        return 0;
    };

    let result = CameraConfig::from_json(json).and_then(|config| {
        let params = config.transform_parameters()?;
        match config.source_spec()? {
            Some(spec) => controller.start(spec, params, sink),
            None => controller.stop(),
        }
    });
    report(result, "start from configuration")
}

/// Replace the transform parameters; invalid values are rejected and the
/// previous parameters stay in force.
///
/// # Safety
/// Caller must ensure ptr and params are valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_set_transform(
    ptr: *mut VcamPipeline,
    params: *const CTransformParameters,
) -> c_int {
    let Some(controller) = controller(ptr) else {
        return 0;
    };
    if params.is_null() {
        return 0;
    }
    let params = TransformParameters::from(&*params);
    report(controller.set_transform_parameters(params), "set transform")
}

/// Stop delivery; blocks for at most the pipeline's join timeout
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_stop(ptr: *mut VcamPipeline) -> c_int {
    let Some(controller) = controller(ptr) else {
        return 0;
    };
    report(controller.stop(), "stop")
}

/// Clear a failed state so the pipeline can be started again
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_reset(ptr: *mut VcamPipeline) {
    if let Some(controller) = controller(ptr) {
        controller.reset();
    }
}

/// 0 idle, 1 starting, 2 running, 3 stopping, 4 failed; -1 for a null handle
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_state(ptr: *const VcamPipeline) -> c_int {
    match (ptr as *const PipelineController).as_ref() {
        Some(controller) => controller.state().code(),
        None => -1,
    }
}

/// 1 when the requested file could not be opened and the synthetic
/// pattern is running instead
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_fallback_active(ptr: *const VcamPipeline) -> c_int {
    match (ptr as *const PipelineController).as_ref() {
        Some(controller) => controller.fallback_active() as c_int,
        None => 0,
    }
}

/// Frames accepted by the sink since the pipeline was created
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_frames_delivered(ptr: *const VcamPipeline) -> u64 {
    match (ptr as *const PipelineController).as_ref() {
        Some(controller) => controller.stats().frames_delivered,
        None => 0,
    }
}

/// Copy the last error message into `buf` (NUL-terminated, truncated to
/// fit). Returns the full message length in bytes, 0 when there is none.
///
/// # Safety
/// Caller must ensure ptr is valid and `buf` has room for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn vcam_pipeline_last_error(
    ptr: *const VcamPipeline,
    buf: *mut c_char,
    len: size_t,
) -> size_t {
    let Some(controller) = (ptr as *const PipelineController).as_ref() else {
        return 0;
    };
    let Some(message) = controller.last_error() else {
        return 0;
    };

    if !buf.is_null() && len > 0 {
        let copied = message.len().min(len - 1);
        ptr::copy_nonoverlapping(message.as_ptr() as *const c_char, buf, copied);
        *buf.add(copied) = 0;
    }
    message.len()
}

// ============================================================================
// FORMAT CONVERSION API
// ============================================================================

/// Bytes needed for a semi-planar YUV 4:2:0 frame
#[no_mangle]
pub extern "C" fn vcam_yuv420sp_size(width: u32, height: u32) -> size_t {
    vcam_video::semi_planar_size(width, height)
}

/// Convert packed RGBA to semi-planar YUV 4:2:0 (Y plane, then V/U pairs)
///
/// # Safety
/// `input` must hold `width * height * 4` bytes and `output` `output_len`
/// bytes, at least [`vcam_yuv420sp_size`].
#[no_mangle]
pub unsafe extern "C" fn vcam_convert_rgba_to_yuv420sp(
    input: *const u8,
    width: u32,
    height: u32,
    output: *mut u8,
    output_len: size_t,
) -> c_int {
    if input.is_null() || output.is_null() {
        return 0;
    }
    let needed = vcam_video::semi_planar_size(width, height);
    if output_len < needed {
        return 0;
    }

    let input_len = PixelFormat::Rgba8.frame_size(width, height);
    let pixels = std::slice::from_raw_parts(input, input_len);
    let buffer = match PixelBuffer::new(width, height, PixelFormat::Rgba8, 0, pixels) {
        Ok(buffer) => buffer,
        Err(e) => {
            log::error!("rgba to yuv420sp: {}", e);
            return 0;
        }
    };

    let encoded = vcam_video::to_semi_planar_yuv420(&buffer);
    ptr::copy_nonoverlapping(encoded.as_ptr(), output, needed);
    1
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Get library version string
///
/// # Safety
/// Returns a static string, safe to call.
#[no_mangle]
pub extern "C" fn vcam_version() -> *const c_char {
    "0.1.0\0".as_ptr() as *const c_char
}
