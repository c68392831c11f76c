//! Virtual camera delivery pipeline
//!
//! Ties a [`FrameSource`](vcam_source::FrameSource) to an [`OutputSink`]:
//! a [`PipelineController`] owns one delivery thread that pulls frames,
//! applies the current transform, fits them to the output size, converts
//! them to the sink's pixel format and pushes them at the source's pace.
//!
//! Controllers are plain values. Hosts that need several cameras keep them
//! in a [`PipelineRegistry`].

pub mod config;
pub mod controller;
pub mod delivery;
pub mod registry;
pub mod sink;
pub mod state;

pub use config::{CameraConfig, DeliveryConfig, MethodType, Resolution, SourceKind};
pub use controller::PipelineController;
pub use delivery::{DeliveryStats, LoopExit};
pub use registry::PipelineRegistry;
pub use sink::{ChannelSink, EncodedFrame, OutputSink};
pub use state::{PipelineState, PipelineStatus};
pub use vcam_source::FrameSourceSpec;
pub use vcam_transform::{FitMode, OutputGeometry, Sampling, TransformParameters};
pub use vcam_video::{Error, ErrorKind, Result, SinkFormat};
