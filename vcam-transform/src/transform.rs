//! Frame transform engine
//!
//! Geometry is a single affine matrix composed with glam; colour is a single
//! 3x3 matrix plus offset. Both are applied in one row-parallel pass over the
//! output, so the cost stays linear in the pixel count no matter how many
//! adjustments are active.

use crate::types::{Sampling, TransformParameters};
use glam::{Affine2, Mat3, Vec2, Vec3};
use rayon::prelude::*;
use vcam_video::{PixelBuffer, Result};

/// BT.601 luma weights used for desaturation
const LUMA_WEIGHTS: Vec3 = Vec3::new(0.299, 0.587, 0.114);

/// Build the forward (source -> output) matrix.
///
/// Order: centre to origin, rotate, scale, flip, back to centre plus the
/// user translation.
pub fn geometry_matrix(params: &TransformParameters, width: u32, height: u32) -> Affine2 {
    let center = Vec2::new(width as f32 / 2.0, height as f32 / 2.0);
    let flip = Vec2::new(
        if params.flip_horizontal { -1.0 } else { 1.0 },
        if params.flip_vertical { -1.0 } else { 1.0 },
    );

    Affine2::from_translation(center + Vec2::new(params.translate_x, params.translate_y))
        * Affine2::from_scale(flip)
        * Affine2::from_scale(Vec2::new(params.scale_x, params.scale_y))
        * Affine2::from_angle(params.normalized_rotation().to_radians())
        * Affine2::from_translation(-center)
}

/// Brightness, contrast and saturation folded into one linear map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix {
    pub matrix: Mat3,
    pub offset: Vec3,
}

impl ColorMatrix {
    pub fn from_params(params: &TransformParameters) -> Self {
        // v' = (v - 128) * contrast + 128 + brightness * 255
        let shift = 128.0 * (1.0 - params.contrast) + params.brightness * 255.0;

        // Mix toward luma by (1 - saturation). Every row of this matrix sums
        // to 1, so the contrast offset passes through it unchanged.
        let s = params.saturation;
        let luma_rows = Mat3::from_cols(
            Vec3::splat(LUMA_WEIGHTS.x),
            Vec3::splat(LUMA_WEIGHTS.y),
            Vec3::splat(LUMA_WEIGHTS.z),
        );
        let saturation = Mat3::IDENTITY * s + luma_rows * (1.0 - s);

        Self {
            matrix: saturation * params.contrast,
            offset: Vec3::splat(shift),
        }
    }

    #[inline]
    pub fn apply(&self, rgb: Vec3) -> Vec3 {
        self.matrix * rgb + self.offset
    }
}

/// Transform engine with a configurable resampling filter
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTransform {
    sampling: Sampling,
}

impl FrameTransform {
    pub fn new(sampling: Sampling) -> Self {
        Self { sampling }
    }

    pub fn sampling(&self) -> Sampling {
        self.sampling
    }

    /// Apply `params` to `buffer`, producing a buffer of identical size.
    ///
    /// Identity parameters return the input itself (same pixel storage).
    /// Out-of-range parameters are rejected with `InvalidParameter`.
    pub fn apply(&self, buffer: &PixelBuffer, params: &TransformParameters) -> Result<PixelBuffer> {
        let params = params.validate()?;
        if params.is_identity() {
            return Ok(buffer.clone());
        }

        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let channels = buffer.format().channels();
        let mut out = vec![0u8; buffer.pixels().len()];
        if width == 0 || height == 0 {
            return PixelBuffer::new(
                buffer.width(),
                buffer.height(),
                buffer.format(),
                buffer.timestamp_us(),
                out,
            );
        }

        let source = Sampler::new(buffer);
        let inverse = (!params.is_geometry_identity())
            .then(|| geometry_matrix(&params, buffer.width(), buffer.height()).inverse());
        let color = (!params.is_color_identity()).then(|| ColorMatrix::from_params(&params));
        let sampling = self.sampling;

        out.par_chunks_mut(width * channels)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(channels).enumerate() {
                    let (mut texel, coverage) = match inverse {
                        Some(inv) => {
                            let p = inv.transform_point2(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                            (
                                source.sample(p, sampling, EdgeMode::Transparent),
                                source.coverage(p, sampling),
                            )
                        }
                        None => (source.fetch(x as i64, y as i64, EdgeMode::Transparent), 1.0),
                    };

                    // Texels blended with the transparent border are weighted
                    // by coverage, so the colour offset is too. Fully
                    // uncovered output stays black.
                    if let Some(color) = color.as_ref().filter(|_| coverage > 0.0) {
                        let rgb = color.matrix * Vec3::new(texel[0], texel[1], texel[2])
                            + color.offset * coverage;
                        texel[0] = rgb.x;
                        texel[1] = rgb.y;
                        texel[2] = rgb.z;
                    }

                    for (dst, value) in px.iter_mut().zip(texel) {
                        *dst = value.round().clamp(0.0, 255.0) as u8;
                    }
                }
            });

        PixelBuffer::new(
            buffer.width(),
            buffer.height(),
            buffer.format(),
            buffer.timestamp_us(),
            out,
        )
    }
}

/// Apply `params` with the default (bilinear) engine
pub fn apply(buffer: &PixelBuffer, params: &TransformParameters) -> Result<PixelBuffer> {
    FrameTransform::default().apply(buffer, params)
}

/// What a tap outside the source rectangle reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeMode {
    /// Transparent black
    Transparent,
    /// Nearest edge pixel
    Clamp,
}

/// Read-only view over a packed buffer returning RGBA as f32
pub(crate) struct Sampler<'a> {
    pixels: &'a [u8],
    width: i64,
    height: i64,
    channels: usize,
}

impl<'a> Sampler<'a> {
    pub(crate) fn new(buffer: &'a PixelBuffer) -> Self {
        Self {
            pixels: buffer.pixels(),
            width: buffer.width() as i64,
            height: buffer.height() as i64,
            channels: buffer.format().channels(),
        }
    }

    #[inline]
    pub(crate) fn fetch(&self, x: i64, y: i64, edge: EdgeMode) -> [f32; 4] {
        let (x, y) = match edge {
            EdgeMode::Clamp => (x.clamp(0, self.width - 1), y.clamp(0, self.height - 1)),
            EdgeMode::Transparent => {
                if !self.contains(x, y) {
                    return [0.0; 4];
                }
                (x, y)
            }
        };

        let i = (y * self.width + x) as usize * self.channels;
        let px = &self.pixels[i..i + self.channels];
        let alpha = if self.channels == 4 { px[3] as f32 } else { 255.0 };
        [px[0] as f32, px[1] as f32, px[2] as f32, alpha]
    }

    #[inline]
    fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// Fraction of the filter footprint at `pos` that lands inside the
    /// source rectangle
    #[inline]
    pub(crate) fn coverage(&self, pos: Vec2, sampling: Sampling) -> f32 {
        match sampling {
            Sampling::Nearest => {
                self.contains(pos.x.floor() as i64, pos.y.floor() as i64) as u8 as f32
            }
            Sampling::Bilinear => {
                let fx = pos.x - 0.5;
                let fy = pos.y - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);

                let w = |x: i64, y: i64, weight: f32| {
                    if self.contains(x, y) {
                        weight
                    } else {
                        0.0
                    }
                };
                w(x0, y0, (1.0 - tx) * (1.0 - ty))
                    + w(x0 + 1, y0, tx * (1.0 - ty))
                    + w(x0, y0 + 1, (1.0 - tx) * ty)
                    + w(x0 + 1, y0 + 1, tx * ty)
            }
        }
    }

    /// Sample at a continuous position where pixel centres sit on .5
    #[inline]
    pub(crate) fn sample(&self, pos: Vec2, sampling: Sampling, edge: EdgeMode) -> [f32; 4] {
        match sampling {
            Sampling::Nearest => self.fetch(pos.x.floor() as i64, pos.y.floor() as i64, edge),
            Sampling::Bilinear => {
                let fx = pos.x - 0.5;
                let fy = pos.y - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);

                let a = self.fetch(x0, y0, edge);
                let b = self.fetch(x0 + 1, y0, edge);
                let c = self.fetch(x0, y0 + 1, edge);
                let d = self.fetch(x0 + 1, y0 + 1, edge);

                let mut out = [0.0f32; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * tx;
                    let bottom = c[i] + (d[i] - c[i]) * tx;
                    out[i] = top + (bottom - top) * ty;
                }
                out
            }
        }
    }
}
