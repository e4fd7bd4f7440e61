//! Tone mapping: asinh stretch, gamma, brightness, contrast
//!
//! The chain that turns a normalized image into a displayable raster. The
//! [`ToneMapEngine`] keeps the last computed raster so releasing a slider
//! without moving it costs nothing; that check runs on every slider release
//! and stays allocation-free on a hit.

use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::render::DecodedImage;

/// Tolerance for treating two parameter sets as equal
const PARAM_EPSILON: f32 = 1e-6;

/// Tone-map parameters: the four sliders as one immutable value.
///
/// Serialized to JSON for preset storage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ToneMapParams {
    /// Effective asinh stretch factor (stretch base times multiplier in the
    /// UI); 0 is the linear case
    pub stretch: f32,
    /// Gamma exponent; samples are raised to `1/gamma`
    pub gamma: f32,
    /// Linear brightness multiplier, clipped to `[0, 1]` afterwards
    pub brightness: f32,
    /// Contrast about the 0.5 midpoint, clipped to `[0, 1]` afterwards
    pub contrast: f32,
}

impl Default for ToneMapParams {
    fn default() -> Self {
        Self::preset_default()
    }
}

impl ToneMapParams {
    /// Default viewing stretch (preset key 1)
    pub fn preset_default() -> Self {
        Self { stretch: 10_000.0, gamma: 0.7, brightness: 1.0, contrast: 1.5 }
    }

    /// Linear, no adjustments (preset key 0)
    pub fn preset_linear() -> Self {
        Self { stretch: 0.0, gamma: 1.0, brightness: 1.0, contrast: 1.0 }
    }

    /// Medium stretch (preset key 2)
    pub fn preset_medium() -> Self {
        Self { stretch: 40_000.0, gamma: 1.0, brightness: 1.0, contrast: 1.2 }
    }

    /// High stretch (preset key 3)
    pub fn preset_high() -> Self {
        Self { stretch: 250_000.0, gamma: 0.5, brightness: 1.1, contrast: 1.8 }
    }

    /// Maximum visual stretch, may clip (preset key 4)
    pub fn preset_max() -> Self {
        Self { stretch: 1_000_000.0, gamma: 0.4, brightness: 1.2, contrast: 2.0 }
    }

    /// Look up a preset by its keyboard digit.
    pub fn preset(key: u8) -> Option<Self> {
        match key {
            0 => Some(Self::preset_linear()),
            1 => Some(Self::preset_default()),
            2 => Some(Self::preset_medium()),
            3 => Some(Self::preset_high()),
            4 => Some(Self::preset_max()),
            _ => None,
        }
    }

    /// Two parameter sets are equal iff all four components are numerically
    /// close; used to detect "no recompute needed".
    pub fn approx_eq(&self, other: &Self) -> bool {
        (self.stretch - other.stretch).abs() <= PARAM_EPSILON
            && (self.gamma - other.gamma).abs() <= PARAM_EPSILON
            && (self.brightness - other.brightness).abs() <= PARAM_EPSILON
            && (self.contrast - other.contrast).abs() <= PARAM_EPSILON
    }

    /// Convert to JSON for preset storage.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse from a stored JSON preset.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Inverse hyperbolic sine stretch: compresses bright values, expands faint
/// ones. `k <= 0` is the identity (linear) case.
pub fn asinh_stretch(v: f32, k: f32) -> f32 {
    if k <= 0.0 {
        v
    } else {
        (v * k).asinh() / k.asinh()
    }
}

/// Apply the full tone-map chain and scale to an 8-bit raster.
///
/// Single-channel images rasterize to grayscale; 3-channel images pass
/// through the same math per channel. Any other channel count is a hard
/// failure, not silently handled.
pub fn tone_map(image: &DecodedImage, params: &ToneMapParams) -> Result<DynamicImage> {
    // Gamma 0 would be a division by zero; treat it as linear.
    let gamma = if params.gamma == 0.0 { 1.0 } else { params.gamma };
    let inv_gamma = 1.0 / gamma;
    let (stretch, brightness, contrast) = (params.stretch, params.brightness, params.contrast);

    let map = move |v: f32| -> u8 {
        let v = asinh_stretch(v, stretch).powf(inv_gamma);
        let v = (v * brightness).clamp(0.0, 1.0);
        let v = ((v - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
        (v * 255.0) as u8
    };

    let (w, h) = (image.width, image.height);
    let plane = (w * h) as usize;
    let samples = image.samples();
    match image.channels {
        1 => {
            let buf = GrayImage::from_fn(w, h, |x, y| {
                image::Luma([map(samples[(y * w + x) as usize])])
            });
            Ok(DynamicImage::ImageLuma8(buf))
        }
        3 => {
            let buf = RgbImage::from_fn(w, h, |x, y| {
                let i = (y * w + x) as usize;
                image::Rgb([
                    map(samples[i]),
                    map(samples[plane + i]),
                    map(samples[2 * plane + i]),
                ])
            });
            Ok(DynamicImage::ImageRgb8(buf))
        }
        n => Err(DecodeError::UnsupportedChannelLayout(n)),
    }
}

/// Caches the last tone-mapped raster keyed by its parameters.
///
/// Owned by the interactive foreground path only; the background preview run
/// never touches it. The engine must be [`reset`](Self::reset) when the
/// displayed image changes, since the key is the parameter tuple alone.
#[derive(Default)]
pub struct ToneMapEngine {
    last_params: Option<ToneMapParams>,
    cached: Option<DynamicImage>,
}

impl ToneMapEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the engine already holds a raster for `params`.
    pub fn is_cached(&self, params: &ToneMapParams) -> bool {
        self.cached.is_some()
            && self.last_params.as_ref().is_some_and(|p| p.approx_eq(params))
    }

    /// Tone-map `image`, reusing the cached raster when the parameters have
    /// not moved since the last call.
    pub fn render(&mut self, image: &DecodedImage, params: &ToneMapParams) -> Result<&DynamicImage> {
        if !self.is_cached(params) {
            self.cached = Some(tone_map(image, params)?);
            self.last_params = Some(*params);
        }
        Ok(self.cached.as_ref().expect("raster cached above"))
    }

    /// Forget the cached raster; called when the displayed image changes.
    pub fn reset(&mut self) {
        self.last_params = None;
        self.cached = None;
    }
}
