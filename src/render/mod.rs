//! Normalization and tone mapping
//!
//! Two stages, cached independently: per-file normalization runs once per
//! decode and produces the [`DecodedImage`] the cache holds; the tone map in
//! [`tonemap`] runs whenever the slider parameters change.

pub mod tonemap;

use crate::decode::RawImage;

/// A decoded, per-file normalized image.
///
/// Samples are 32-bit floats in `[0, 1]`, planar channel layout. Instances
/// are immutable once created: the tone-map stage recomputes rather than
/// mutates, and the decoded cache owns each instance it holds.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    samples: Vec<f32>,
    header_text: String,
}

impl DecodedImage {
    /// Normalized samples, read-only.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// The container's metadata text, retained verbatim for display.
    pub fn header_text(&self) -> &str {
        &self.header_text
    }
}

/// Normalize raw samples into `[0, 1]` using the file's own min and max.
///
/// NaN samples (possible with float FITS data) are ignored when finding the
/// range and normalize to 0. A flat image (`max == min`) produces an
/// all-zero image; that is defined behavior, not an error.
pub fn normalize(raw: RawImage) -> DecodedImage {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in &raw.samples {
        if v.is_nan() {
            continue;
        }
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }

    let samples = if max > min {
        let range = max - min;
        raw.samples
            .iter()
            .map(|&v| if v.is_nan() { 0.0 } else { (v - min) / range })
            .collect()
    } else {
        vec![0.0; raw.samples.len()]
    };

    DecodedImage {
        width: raw.width,
        height: raw.height,
        channels: raw.channels,
        samples,
        header_text: raw.header_text,
    }
}
