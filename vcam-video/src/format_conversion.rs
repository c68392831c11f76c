//! RGB <-> YUV 4:2:0 conversion
//!
//! BT.601 limited-range integer approximation. The forward coefficients are
//! fixed: consumers compare our output byte for byte against reference
//! vectors, so any change here is a wire-format change.
//!
//! Semi-planar layout: `width * height` luma bytes, then one interleaved
//! V,U pair per 2x2 block, sampled from the block's top-left pixel.

use crate::error::{Error, Result};
use crate::types::{PixelBuffer, PixelFormat};
use rayon::prelude::*;

/// Frames with at least this many pixels are converted on the rayon pool
const PARALLEL_THRESHOLD: usize = 64 * 64;

#[inline]
fn clamp_byte(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert one RGB pixel to (Y, U, V)
#[inline]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_byte(y), clamp_byte(u), clamp_byte(v))
}

/// Convert one (Y, U, V) sample back to RGB
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_byte((298 * c + 409 * e + 128) >> 8),
        clamp_byte((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_byte((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Size in bytes of a semi-planar 4:2:0 frame (odd dimensions round chroma up)
pub fn semi_planar_size(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
}

/// Encode a packed RGB(A) buffer as semi-planar YUV 4:2:0 (V,U order).
///
/// Alpha is ignored.
pub fn to_semi_planar_yuv420(buffer: &PixelBuffer) -> Vec<u8> {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let mut out = vec![0u8; semi_planar_size(buffer.width(), buffer.height())];
    if width == 0 || height == 0 {
        return out;
    }

    if width * height >= PARALLEL_THRESHOLD {
        encode_parallel(buffer, &mut out);
    } else {
        encode_scalar(buffer, &mut out);
    }
    out
}

/// Row-parallel encoder; luma rows and chroma rows are independent
fn encode_parallel(buffer: &PixelBuffer, out: &mut [u8]) {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let channels = buffer.format().channels();
    let stride = buffer.stride();
    let pixels = buffer.pixels();
    let (luma, chroma) = out.split_at_mut(width * height);

    luma.par_chunks_mut(width)
        .zip(pixels.par_chunks(stride))
        .for_each(|(dst, src)| {
            for (y, px) in dst.iter_mut().zip(src.chunks_exact(channels)) {
                *y = rgb_to_yuv(px[0], px[1], px[2]).0;
            }
        });

    let chroma_width = width.div_ceil(2);
    chroma
        .par_chunks_mut(2 * chroma_width)
        .enumerate()
        .for_each(|(cy, dst)| {
            let row = &pixels[2 * cy * stride..];
            for cx in 0..chroma_width {
                let px = &row[2 * cx * channels..];
                let (_, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
                dst[2 * cx] = v;
                dst[2 * cx + 1] = u;
            }
        });
}

/// Scalar fallback, single pass in row-major order
fn encode_scalar(buffer: &PixelBuffer, out: &mut [u8]) {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let channels = buffer.format().channels();
    let pixels = buffer.pixels();

    let mut y_index = 0;
    let mut uv_index = width * height;
    for (j, row) in pixels.chunks_exact(buffer.stride()).enumerate() {
        for (i, px) in row.chunks_exact(channels).enumerate() {
            let (y, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
            out[y_index] = y;
            y_index += 1;

            if j % 2 == 0 && i % 2 == 0 {
                out[uv_index] = v;
                out[uv_index + 1] = u;
                uv_index += 2;
            }
        }
    }
    debug_assert_eq!(y_index, width * height);
    debug_assert_eq!(uv_index, out.len());
}

/// Decode a semi-planar YUV 4:2:0 (V,U order) frame into RGBA
pub fn semi_planar_yuv420_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    timestamp_us: u64,
) -> Result<PixelBuffer> {
    let expected = semi_planar_size(width, height);
    if data.len() != expected {
        return Err(Error::BufferSize {
            expected,
            actual: data.len(),
        });
    }

    let w = width as usize;
    let (luma, chroma) = data.split_at(w * height as usize);
    let chroma_width = w.div_ceil(2);

    let rgba = planes_to_rgba(w, height as usize, |x, y| {
        let c = (y / 2) * 2 * chroma_width + (x / 2) * 2;
        (luma[y * w + x], chroma[c + 1], chroma[c])
    });
    PixelBuffer::new(width, height, PixelFormat::Rgba8, timestamp_us, rgba)
}

/// Decode planar I420 (Y, U, V planes, chroma rounded up) into RGBA
pub fn i420_to_rgba(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    width: u32,
    height: u32,
    timestamp_us: u64,
) -> Result<PixelBuffer> {
    let w = width as usize;
    let h = height as usize;
    let chroma_width = w.div_ceil(2);
    let chroma_size = chroma_width * h.div_ceil(2);
    check_plane(y_plane, w * h)?;
    check_plane(u_plane, chroma_size)?;
    check_plane(v_plane, chroma_size)?;

    let rgba = planes_to_rgba(w, h, |x, y| {
        let c = (y / 2) * chroma_width + x / 2;
        (y_plane[y * w + x], u_plane[c], v_plane[c])
    });
    PixelBuffer::new(width, height, PixelFormat::Rgba8, timestamp_us, rgba)
}

/// Decode planar I444 into RGBA
pub fn i444_to_rgba(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    width: u32,
    height: u32,
    timestamp_us: u64,
) -> Result<PixelBuffer> {
    let w = width as usize;
    let size = w * height as usize;
    check_plane(y_plane, size)?;
    check_plane(u_plane, size)?;
    check_plane(v_plane, size)?;

    let rgba = planes_to_rgba(w, height as usize, |x, y| {
        let i = y * w + x;
        (y_plane[i], u_plane[i], v_plane[i])
    });
    PixelBuffer::new(width, height, PixelFormat::Rgba8, timestamp_us, rgba)
}

/// Decode a luma-only plane into grey RGBA
pub fn mono_to_rgba(y_plane: &[u8], width: u32, height: u32, timestamp_us: u64) -> Result<PixelBuffer> {
    let w = width as usize;
    check_plane(y_plane, w * height as usize)?;

    let rgba = planes_to_rgba(w, height as usize, |x, y| (y_plane[y * w + x], 128, 128));
    PixelBuffer::new(width, height, PixelFormat::Rgba8, timestamp_us, rgba)
}

fn check_plane(plane: &[u8], expected: usize) -> Result<()> {
    if plane.len() != expected {
        return Err(Error::BufferSize {
            expected,
            actual: plane.len(),
        });
    }
    Ok(())
}

/// Shared RGBA writer; `sample(x, y)` yields the (Y, U, V) of a pixel
fn planes_to_rgba<F>(width: usize, height: usize, sample: F) -> Vec<u8>
where
    F: Fn(usize, usize) -> (u8, u8, u8) + Sync,
{
    let mut rgba = vec![0u8; width * height * 4];
    if width == 0 || height == 0 {
        return rgba;
    }

    rgba.par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let (luma, u, v) = sample(x, y);
                let [r, g, b] = yuv_to_rgb(luma, u, v);
                px.copy_from_slice(&[r, g, b, 255]);
            }
        });
    rgba
}
