//! Frame transform FFI bindings
//!
//! C-compatible transform parameters, plus a one-shot transform of a
//! caller-owned RGBA buffer for hosts that run their own delivery.

use std::os::raw::c_int;
use vcam_transform::{FrameTransform, Sampling, TransformParameters};
use vcam_video::{PixelBuffer, PixelFormat};

/// C-compatible transform parameters
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CTransformParameters {
    pub rotation_degrees: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub translate_x: f32,
    pub translate_y: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl CTransformParameters {
    pub fn identity() -> Self {
        Self::from(&TransformParameters::IDENTITY)
    }
}

impl From<&CTransformParameters> for TransformParameters {
    fn from(c: &CTransformParameters) -> Self {
        TransformParameters {
            rotation_degrees: c.rotation_degrees,
            scale_x: c.scale_x,
            scale_y: c.scale_y,
            flip_horizontal: c.flip_horizontal,
            flip_vertical: c.flip_vertical,
            translate_x: c.translate_x,
            translate_y: c.translate_y,
            brightness: c.brightness,
            contrast: c.contrast,
            saturation: c.saturation,
        }
    }
}

impl From<&TransformParameters> for CTransformParameters {
    fn from(p: &TransformParameters) -> Self {
        CTransformParameters {
            rotation_degrees: p.rotation_degrees,
            scale_x: p.scale_x,
            scale_y: p.scale_y,
            flip_horizontal: p.flip_horizontal,
            flip_vertical: p.flip_vertical,
            translate_x: p.translate_x,
            translate_y: p.translate_y,
            brightness: p.brightness,
            contrast: p.contrast,
            saturation: p.saturation,
        }
    }
}

// ============================================================================
// TRANSFORM API
// ============================================================================

/// Fill `out` with the identity parameters
///
/// # Safety
/// Caller must ensure out is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_transform_identity(out: *mut CTransformParameters) {
    if !out.is_null() {
        *out = CTransformParameters::identity();
    }
}

/// 1 if the parameters would be accepted by a pipeline
///
/// # Safety
/// Caller must ensure params is valid.
#[no_mangle]
pub unsafe extern "C" fn vcam_transform_validate(params: *const CTransformParameters) -> c_int {
    if params.is_null() {
        return 0;
    }
    TransformParameters::from(&*params).validate().is_ok() as c_int
}

/// Transform a `width` x `height` RGBA frame into `output` (same size).
/// `bilinear` selects bilinear (non-zero) or nearest (0) sampling.
///
/// # Safety
/// `input` and `output` must each hold `width * height * 4` bytes and must
/// not overlap.
#[no_mangle]
pub unsafe extern "C" fn vcam_transform_rgba(
    input: *const u8,
    output: *mut u8,
    width: u32,
    height: u32,
    params: *const CTransformParameters,
    bilinear: c_int,
) -> c_int {
    if input.is_null() || output.is_null() || params.is_null() {
        return 0;
    }

    let len = PixelFormat::Rgba8.frame_size(width, height);
    let pixels = std::slice::from_raw_parts(input, len);
    let sampling = if bilinear != 0 {
        Sampling::Bilinear
    } else {
        Sampling::Nearest
    };

    let result = PixelBuffer::new(width, height, PixelFormat::Rgba8, 0, pixels)
        .and_then(|frame| FrameTransform::new(sampling).apply(&frame, &TransformParameters::from(&*params)));
    match result {
        Ok(frame) => {
            std::ptr::copy_nonoverlapping(frame.pixels().as_ptr(), output, len);
            1
        }
        Err(e) => {
            log::error!("transform rgba: {}", e);
            0
        }
    }
}
