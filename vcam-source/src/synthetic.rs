//! Procedural test pattern
//!
//! Every frame is a pure function of (counter, size, frame rate), so the
//! source needs no files, cannot fail and is trivially reproducible in tests.
//!
//! Layers, back to front:
//! - Hue-cycling background (36 degrees per second)
//! - SMPTE colour bars along the bottom eighth, scrolling one bar per second
//! - A white square orbiting the centre once every four seconds
//! - A 16-cell binary marker of the frame counter along the top edge
//! - The frame number in a 3x5 bitmap font

use crate::source::{FrameOutcome, FrameSource};
use rayon::prelude::*;
use std::f64::consts::TAU;
use vcam_video::{PixelBuffer, PixelFormat, Result};

/// 75% SMPTE bars: grey, yellow, cyan, green, magenta, red, blue
const SMPTE_BARS: [[u8; 3]; 7] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
];

/// 3x5 glyphs, row-major from the top, 3 bits per row
const DIGITS: [u16; 10] = [
    0b111_101_101_101_111,
    0b010_110_010_010_111,
    0b111_001_111_100_111,
    0b111_001_111_001_111,
    0b101_101_111_001_001,
    0b111_100_111_001_111,
    0b111_100_111_101_111,
    0b111_001_001_001_001,
    0b111_101_111_101_111,
    0b111_101_111_001_111,
];

const MARKER_CELLS: u32 = 16;
const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];

/// Animated pattern source, the fallback that is always available
#[derive(Debug, Clone)]
pub struct SyntheticPatternSource {
    width: u32,
    height: u32,
    frame_rate: u32,
    counter: u64,
}

impl SyntheticPatternSource {
    /// Degenerate sizes and rates are clamped to 1 so construction cannot fail
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_rate: frame_rate.max(1),
            counter: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frames produced so far
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Render frame `counter` without advancing the source
    pub fn render(&self, counter: u64) -> PixelBuffer {
        render_pattern(counter, self.width, self.height, self.frame_rate)
    }
}

impl Default for SyntheticPatternSource {
    fn default() -> Self {
        Self::new(1280, 720, 30)
    }
}

impl FrameSource for SyntheticPatternSource {
    fn produce_next_frame(&mut self) -> Result<FrameOutcome> {
        let frame = self.render(self.counter);
        self.counter += 1;
        if self.counter % 300 == 0 {
            log::debug!("synthetic pattern at frame {}", self.counter);
        }
        Ok(FrameOutcome::Frame(frame))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

/// Precomputed per-frame geometry
struct Layout {
    background: [u8; 3],
    counter: u64,
    digits: Vec<u8>,
    bar_top: u32,
    bar_width: u32,
    bar_offset: u32,
    square_min: (f64, f64),
    square_max: (f64, f64),
    marker_height: u32,
    cell_width: u32,
    glyph_scale: u32,
    text_origin: (u32, u32),
}

impl Layout {
    fn new(counter: u64, width: u32, height: u32, frame_rate: u32) -> Self {
        let t = counter as f64 / frame_rate as f64;
        let short = width.min(height) as f64;

        let bar_width = (width / SMPTE_BARS.len() as u32).max(1);
        let bar_offset = (t * bar_width as f64) as u64 % (bar_width as u64 * SMPTE_BARS.len() as u64);

        let angle = TAU * t / 4.0;
        let radius = short / 4.0;
        let half = (short / 20.0).max(1.0);
        let cx = width as f64 / 2.0 + radius * angle.cos();
        let cy = height as f64 / 2.0 + radius * angle.sin();

        let marker_height = (height / 45).max(1);
        let glyph_scale = (height / 120).max(1);

        Self {
            background: hsv_to_rgb((t * 36.0).rem_euclid(360.0), 1.0, 0.5),
            counter,
            digits: counter.to_string().bytes().map(|b| b - b'0').collect(),
            bar_top: height - (height / 8).max(1),
            bar_width,
            bar_offset: bar_offset as u32,
            square_min: (cx - half, cy - half),
            square_max: (cx + half, cy + half),
            marker_height,
            cell_width: (width / MARKER_CELLS).max(1),
            glyph_scale,
            text_origin: (glyph_scale, marker_height + glyph_scale),
        }
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if y < self.marker_height {
            let cell = x / self.cell_width;
            if cell >= MARKER_CELLS {
                return BLACK;
            }
            let bit = MARKER_CELLS - 1 - cell;
            return if (self.counter >> bit) & 1 == 1 { WHITE } else { BLACK };
        }

        if self.glyph_lit(x, y) {
            return WHITE;
        }

        if y >= self.bar_top {
            let bar = ((x + self.bar_offset) / self.bar_width) as usize % SMPTE_BARS.len();
            return SMPTE_BARS[bar];
        }

        let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
        if px >= self.square_min.0 && px < self.square_max.0 && py >= self.square_min.1 && py < self.square_max.1 {
            return WHITE;
        }

        self.background
    }

    fn glyph_lit(&self, x: u32, y: u32) -> bool {
        let (ox, oy) = self.text_origin;
        if x < ox || y < oy {
            return false;
        }
        let s = self.glyph_scale;
        let (dx, dy) = (x - ox, y - oy);
        let row = dy / s;
        if row >= 5 {
            return false;
        }

        let advance = 4 * s;
        let index = (dx / advance) as usize;
        let col = (dx % advance) / s;
        match self.digits.get(index) {
            Some(&digit) if col < 3 => {
                let bit = 14 - (row * 3 + col);
                (DIGITS[digit as usize] >> bit) & 1 == 1
            }
            _ => false,
        }
    }
}

/// Render one pattern frame as RGBA
pub fn render_pattern(counter: u64, width: u32, height: u32, frame_rate: u32) -> PixelBuffer {
    let width = width.max(1);
    let height = height.max(1);
    let layout = Layout::new(counter, width, height, frame_rate.max(1));
    let timestamp_us = counter * 1_000_000 / frame_rate.max(1) as u64;

    let mut pixels = vec![0u8; PixelFormat::Rgba8.frame_size(width, height)];
    pixels
        .par_chunks_mut(width as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let [r, g, b] = layout.pixel(x as u32, y as u32);
                px.copy_from_slice(&[r, g, b, 255]);
            }
        });

    // Sized from the same format, so construction cannot fail
    PixelBuffer::new(width, height, PixelFormat::Rgba8, timestamp_us, pixels)
        .unwrap_or_else(|_| PixelBuffer::blank(width, height, PixelFormat::Rgba8, timestamp_us))
}

/// `h` in degrees, `s` and `v` in [0, 1]
fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_byte = |f: f64| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_byte(r), to_byte(g), to_byte(b)]
}
