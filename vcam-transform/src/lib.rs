//! Per-frame geometry and colour transforms
//!
//! Rotation, scale, flips and translation are composed into one affine
//! matrix about the frame centre; brightness, contrast and saturation into
//! one colour matrix. A transform pass reads the source once and writes a
//! freshly allocated buffer of the same size.
//!
//! Key properties:
//! - Identity parameters are a zero-copy passthrough
//! - Uncovered output pixels are transparent black
//! - Rows are processed in parallel via rayon

pub mod fit;
pub mod transform;
pub mod types;

pub use fit::*;
pub use transform::*;
pub use types::*;
