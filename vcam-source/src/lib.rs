//! Frame sources for the virtual camera
//!
//! Three interchangeable producers behind the [`FrameSource`] trait:
//! - [`VideoDecoderSource`]: demux + decode a video file, looping forever
//! - [`StaticImageSource`]: one decoded image, re-served every tick
//! - [`SyntheticPatternSource`]: procedural test pattern, cannot fail
//!
//! Sources are driven by a single delivery thread; nothing here locks.

pub mod handles;
pub mod source;
pub mod still;
pub mod synthetic;
pub mod video;

pub use source::*;
pub use still::StaticImageSource;
pub use synthetic::{render_pattern, SyntheticPatternSource};
pub use vcam_video::{Error, ErrorKind, Result};
pub use video::{DecoderState, VideoDecoderSource};
