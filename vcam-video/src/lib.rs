//! Virtual camera frame model
//!
//! Leaf crate of the pipeline: the immutable [`PixelBuffer`], the pixel and
//! sink format tags, the shared error type, and the colour-space converter
//! that turns packed RGB into the semi-planar YUV 4:2:0 layout most camera
//! consumers expect.
//!
//! Key properties:
//! - Buffers are never mutated once produced (pixels behind `Arc<[u8]>`)
//! - Conversion arithmetic is bit-exact BT.601 integer math
//! - Large frames are converted row-parallel on the rayon pool

pub mod error;
pub mod format_conversion;
pub mod types;

pub use error::*;
pub use format_conversion::*;
pub use types::*;
