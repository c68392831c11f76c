//! Resampling a frame into the output geometry

use crate::transform::{EdgeMode, Sampler};
use crate::types::{FitMode, OutputGeometry, Sampling};
use glam::Vec2;
use rayon::prelude::*;
use vcam_video::{Error, PixelBuffer, Result};

/// Placement of the scaled source inside the output rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    /// Output-space origin of the scaled source
    origin: Vec2,
    /// Source pixels per output pixel
    step: Vec2,
    /// Output-space extent covered by the source
    extent: Vec2,
}

fn placement(src_w: u32, src_h: u32, geometry: &OutputGeometry) -> Placement {
    let src = Vec2::new(src_w as f32, src_h as f32);
    let dst = Vec2::new(geometry.width as f32, geometry.height as f32);
    let ratio = dst / src;

    let scale = match geometry.fit {
        FitMode::Stretch => ratio,
        FitMode::ScaleInner => Vec2::splat(ratio.min_element()),
        FitMode::ScaleOuter => Vec2::splat(ratio.max_element()),
    };

    let extent = src * scale;
    Placement {
        origin: (dst - extent) / 2.0,
        step: Vec2::ONE / scale,
        extent,
    }
}

/// Resample `buffer` to `geometry`, keeping the pixel format and timestamp.
///
/// A buffer already at the target size is returned without a copy.
/// Letterbox bars left by [`FitMode::ScaleInner`] are opaque black.
pub fn fit_to(buffer: &PixelBuffer, geometry: &OutputGeometry, sampling: Sampling) -> Result<PixelBuffer> {
    if geometry.width == 0 || geometry.height == 0 {
        return Err(Error::invalid_parameter(
            "output_geometry",
            format!("{}x{} has no pixels", geometry.width, geometry.height),
        ));
    }
    if buffer.width() == geometry.width && buffer.height() == geometry.height {
        return Ok(buffer.clone());
    }

    let format = buffer.format();
    let channels = format.channels();
    let mut out = vec![0u8; format.frame_size(geometry.width, geometry.height)];
    if channels == 4 {
        for px in out.chunks_exact_mut(4) {
            px[3] = 255;
        }
    }

    if buffer.width() > 0 && buffer.height() > 0 {
        let place = placement(buffer.width(), buffer.height(), geometry);
        let source = Sampler::new(buffer);
        let row_len = geometry.width as usize * channels;

        out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            let oy = y as f32 + 0.5 - place.origin.y;
            if oy < 0.0 || oy >= place.extent.y {
                return;
            }
            for (x, px) in row.chunks_exact_mut(channels).enumerate() {
                let ox = x as f32 + 0.5 - place.origin.x;
                if ox < 0.0 || ox >= place.extent.x {
                    continue;
                }
                let texel = source.sample(Vec2::new(ox, oy) * place.step, sampling, EdgeMode::Clamp);
                for (dst, value) in px.iter_mut().zip(texel) {
                    *dst = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        });
    }

    PixelBuffer::new(geometry.width, geometry.height, format, buffer.timestamp_us(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcam_video::{ErrorKind, PixelFormat};

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> PixelBuffer {
        let pixels: Vec<u8> = (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect();
        PixelBuffer::new(width, height, PixelFormat::Rgba8, 77, pixels).unwrap()
    }

    #[test]
    fn test_same_size_is_passthrough() {
        let buf = solid(8, 6, [1, 2, 3]);
        let out = fit_to(&buf, &OutputGeometry::new(8, 6, FitMode::ScaleOuter), Sampling::Bilinear).unwrap();
        assert!(out.shares_pixels(&buf));
    }

    #[test]
    fn test_stretch_fills_output() {
        let buf = solid(4, 2, [90, 60, 30]);
        let out = fit_to(&buf, &OutputGeometry::new(10, 10, FitMode::Stretch), Sampling::Bilinear).unwrap();

        assert_eq!((out.width(), out.height()), (10, 10));
        assert_eq!(out.timestamp_us(), 77);
        for px in out.pixels().chunks_exact(4) {
            assert_eq!(px, &[90, 60, 30, 255]);
        }
    }

    #[test]
    fn test_scale_inner_letterboxes() {
        // 2:1 source into a square: bars top and bottom
        let buf = solid(8, 4, [200, 100, 50]);
        let out = fit_to(&buf, &OutputGeometry::new(8, 8, FitMode::ScaleInner), Sampling::Nearest).unwrap();

        assert_eq!(out.rgb_at(4, 0), [0, 0, 0]);
        assert_eq!(out.rgb_at(4, 1), [0, 0, 0]);
        assert_eq!(out.rgb_at(4, 2), [200, 100, 50]);
        assert_eq!(out.rgb_at(4, 5), [200, 100, 50]);
        assert_eq!(out.rgb_at(4, 6), [0, 0, 0]);
        // Bars are opaque
        assert_eq!(out.pixels()[3], 255);
    }

    #[test]
    fn test_scale_outer_crops() {
        // Left half red, right half blue; a square crop keeps both halves
        let mut pixels = Vec::new();
        for _y in 0..4 {
            for x in 0..8 {
                if x < 4 {
                    pixels.extend_from_slice(&[255, 0, 0, 255]);
                } else {
                    pixels.extend_from_slice(&[0, 0, 255, 255]);
                }
            }
        }
        let buf = PixelBuffer::new(8, 4, PixelFormat::Rgba8, 0, pixels).unwrap();
        let out = fit_to(&buf, &OutputGeometry::new(4, 4, FitMode::ScaleOuter), Sampling::Nearest).unwrap();

        assert_eq!(out.rgb_at(0, 0), [255, 0, 0]);
        assert_eq!(out.rgb_at(3, 3), [0, 0, 255]);
        // No letterbox anywhere
        assert!(out.pixels().chunks_exact(4).all(|px| px != [0, 0, 0, 255]));
    }

    #[test]
    fn test_rgb_format_preserved() {
        let buf = PixelBuffer::new(2, 2, PixelFormat::Rgb8, 0, vec![9u8; 12]).unwrap();
        let out = fit_to(&buf, &OutputGeometry::new(4, 4, FitMode::Stretch), Sampling::Bilinear).unwrap();

        assert_eq!(out.format(), PixelFormat::Rgb8);
        assert!(out.pixels().iter().all(|&v| v == 9));
    }

    #[test]
    fn test_zero_output_rejected() {
        let buf = solid(2, 2, [0, 0, 0]);
        let err = fit_to(&buf, &OutputGeometry::new(0, 4, FitMode::Stretch), Sampling::Bilinear).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
}
