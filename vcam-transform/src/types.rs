//! Transform parameter types
//!
//! Plain `Copy` values so the delivery thread can swap in a new set at the
//! top of any tick without locking pixel data.

use serde::{Deserialize, Serialize};
use vcam_video::{Error, Result};

/// Geometric and colour adjustments applied to every frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParameters {
    /// Clockwise rotation in degrees, normalised to [0, 360)
    pub rotation_degrees: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Translation in output pixels
    pub translate_x: f32,
    pub translate_y: f32,
    /// Additive brightness in [-1, 1], as a fraction of full scale
    pub brightness: f32,
    /// Contrast around mid-grey, > 0
    pub contrast: f32,
    /// 0 = greyscale, 1 = unchanged, > 1 = boosted
    pub saturation: f32,
}

impl TransformParameters {
    pub const IDENTITY: TransformParameters = TransformParameters {
        rotation_degrees: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
        flip_horizontal: false,
        flip_vertical: false,
        translate_x: 0.0,
        translate_y: 0.0,
        brightness: 0.0,
        contrast: 1.0,
        saturation: 1.0,
    };

    /// True when applying these parameters cannot change a single pixel
    pub fn is_identity(&self) -> bool {
        self.is_geometry_identity() && self.is_color_identity()
    }

    pub fn is_geometry_identity(&self) -> bool {
        self.normalized_rotation() == 0.0
            && self.scale_x == 1.0
            && self.scale_y == 1.0
            && !self.flip_horizontal
            && !self.flip_vertical
            && self.translate_x == 0.0
            && self.translate_y == 0.0
    }

    pub fn is_color_identity(&self) -> bool {
        self.brightness == 0.0 && self.contrast == 1.0 && self.saturation == 1.0
    }

    /// Rotation folded into [0, 360)
    pub fn normalized_rotation(&self) -> f32 {
        let r = self.rotation_degrees.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        if r >= 360.0 {
            0.0
        } else {
            r
        }
    }

    /// Check ranges and return a copy with rotation normalised.
    ///
    /// Rejected values leave the caller's previous parameters untouched;
    /// nothing here mutates `self`.
    pub fn validate(&self) -> Result<TransformParameters> {
        let finite = [
            ("rotation_degrees", self.rotation_degrees),
            ("scale_x", self.scale_x),
            ("scale_y", self.scale_y),
            ("translate_x", self.translate_x),
            ("translate_y", self.translate_y),
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(Error::invalid_parameter(name, format!("{} is not finite", value)));
            }
        }

        if self.scale_x <= 0.0 {
            return Err(Error::invalid_parameter(
                "scale_x",
                format!("{} must be positive", self.scale_x),
            ));
        }
        if self.scale_y <= 0.0 {
            return Err(Error::invalid_parameter(
                "scale_y",
                format!("{} must be positive", self.scale_y),
            ));
        }
        if self.contrast <= 0.0 {
            return Err(Error::invalid_parameter(
                "contrast",
                format!("{} must be positive", self.contrast),
            ));
        }
        if !(-1.0..=1.0).contains(&self.brightness) {
            return Err(Error::invalid_parameter(
                "brightness",
                format!("{} outside [-1, 1]", self.brightness),
            ));
        }
        if self.saturation < 0.0 {
            return Err(Error::invalid_parameter(
                "saturation",
                format!("{} must not be negative", self.saturation),
            ));
        }

        Ok(TransformParameters {
            rotation_degrees: self.normalized_rotation(),
            ..*self
        })
    }
}

impl Default for TransformParameters {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// How a frame is fitted into a differently sized output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Ignore aspect ratio, fill the output exactly
    Stretch,
    /// Keep aspect ratio, letterbox with black bars
    #[default]
    ScaleInner,
    /// Keep aspect ratio, fill the output and crop the overflow
    ScaleOuter,
}

/// Target size the delivery loop resamples every frame to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub fit: FitMode,
}

impl OutputGeometry {
    pub fn new(width: u32, height: u32, fit: FitMode) -> Self {
        Self { width, height, fit }
    }
}

/// Resampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampling {
    Nearest,
    #[default]
    Bilinear,
}
