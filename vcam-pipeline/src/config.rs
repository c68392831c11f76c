//! Delivery settings and the persisted camera configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vcam_source::{FrameSourceSpec, SourceOptions};
use vcam_transform::{FitMode, OutputGeometry, Sampling, TransformParameters};
use vcam_video::{Error, Result};

/// Runtime settings of one delivery loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryConfig {
    /// Ticks per second for sources without their own timing
    pub frame_rate: u32,
    /// Resample every frame to this size; `None` keeps the source size
    pub output: Option<OutputGeometry>,
    pub sampling: Sampling,
    /// Pin the delivery thread to this core id
    pub pin_to_core: Option<usize>,
    /// How long `stop` waits for the thread to finish
    pub join_timeout: Duration,
    /// Upper bound on one decoder wait inside a tick
    pub decode_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            output: None,
            sampling: Sampling::Bilinear,
            pin_to_core: None,
            join_timeout: Duration::from_secs(2),
            decode_timeout: Duration::from_millis(20),
        }
    }
}

impl DeliveryConfig {
    /// Nominal tick period
    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.frame_rate.max(1) as u64)
    }

    /// Options for building sources; the synthetic pattern follows the output size
    pub fn source_options(&self) -> SourceOptions {
        let defaults = SourceOptions::default();
        let (synthetic_width, synthetic_height) = match self.output {
            Some(geometry) => (geometry.width, geometry.height),
            None => (defaults.synthetic_width, defaults.synthetic_height),
        };
        SourceOptions {
            frame_rate: self.frame_rate.max(1),
            decode_timeout: self.decode_timeout,
            synthetic_width,
            synthetic_height,
        }
    }
}

/// How frames are acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodType {
    #[default]
    Disabled,
    LocalVideo,
    NetworkStream,
}

/// Explicit source kind, overriding extension sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Image,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Persisted camera settings as written by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub method_type: MethodType,
    /// File path, or the stream URL for `network_stream`
    pub video_source: String,
    /// Local copy of a network stream deposited by the fetcher
    pub stream_path: Option<PathBuf>,
    pub source_kind: Option<SourceKind>,
    pub resolution: Resolution,
    /// Width over height the host offers in its settings; carried for the
    /// host only. Output size always comes from `resolution`.
    pub aspect_ratio: f32,
    /// Carried for the host; this pipeline has no audio path
    pub enable_audio: bool,
    /// Clockwise degrees
    pub rotation: i32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Full parameter set; when present it replaces rotation and flips above
    pub transform: Option<TransformParameters>,
    pub maintain_aspect_ratio: bool,
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            method_type: MethodType::Disabled,
            video_source: String::new(),
            stream_path: None,
            source_kind: None,
            resolution: Resolution::default(),
            aspect_ratio: 16.0 / 9.0,
            enable_audio: true,
            rotation: 0,
            flip_horizontal: false,
            flip_vertical: false,
            transform: None,
            maintain_aspect_ratio: true,
            target_fps: 30,
        }
    }
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

impl CameraConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// The source to run, or `None` when the camera is disabled
    pub fn source_spec(&self) -> Result<Option<FrameSourceSpec>> {
        let path = match self.method_type {
            MethodType::Disabled => return Ok(None),
            MethodType::LocalVideo => {
                if self.source_kind == Some(SourceKind::Synthetic) {
                    return Ok(Some(FrameSourceSpec::Synthetic));
                }
                if self.video_source.is_empty() {
                    return Err(Error::Config("video_source is empty".into()));
                }
                PathBuf::from(&self.video_source)
            }
            MethodType::NetworkStream => match &self.stream_path {
                Some(path) => path.clone(),
                None => {
                    return Err(Error::Config(format!(
                        "network stream {} has no local copy",
                        self.video_source
                    )))
                }
            },
        };

        let spec = match self.source_kind {
            Some(SourceKind::Synthetic) => FrameSourceSpec::Synthetic,
            Some(SourceKind::Image) => FrameSourceSpec::Image(path),
            Some(SourceKind::Video) => FrameSourceSpec::Video(path),
            None if is_image_path(&path) => FrameSourceSpec::Image(path),
            None => FrameSourceSpec::Video(path),
        };
        Ok(Some(spec))
    }

    /// Validated transform parameters
    pub fn transform_parameters(&self) -> Result<TransformParameters> {
        let params = match self.transform {
            Some(params) => params,
            None => TransformParameters {
                rotation_degrees: self.rotation as f32,
                flip_horizontal: self.flip_horizontal,
                flip_vertical: self.flip_vertical,
                ..TransformParameters::IDENTITY
            },
        };
        params.validate()
    }

    pub fn delivery_config(&self) -> Result<DeliveryConfig> {
        if self.target_fps == 0 {
            return Err(Error::Config("target_fps must be positive".into()));
        }
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Err(Error::Config(format!("resolution {}x{} is empty", width, height)));
        }
        if !(self.aspect_ratio.is_finite() && self.aspect_ratio > 0.0) {
            return Err(Error::Config(format!("aspect_ratio {} is not positive", self.aspect_ratio)));
        }

        let fit = if self.maintain_aspect_ratio {
            FitMode::ScaleInner
        } else {
            FitMode::Stretch
        };
        Ok(DeliveryConfig {
            frame_rate: self.target_fps,
            output: Some(OutputGeometry::new(width, height, fit)),
            ..DeliveryConfig::default()
        })
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}
