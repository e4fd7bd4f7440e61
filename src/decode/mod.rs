//! Container decoding
//!
//! This module handles:
//! - Detecting the container format from the file extension
//! - Parsing container headers (XISF XML block, FITS cards)
//! - Recovering raw samples (LZ4 block decompression, byte-plane unshuffle)

pub mod fits;
pub mod xisf;

use std::fs;
use std::path::Path;

use crate::error::{DecodeError, Result};

/// Supported container formats, selected once per file and threaded through
/// the decode calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// XML metadata block plus a binary attachment (`.xisf` / `.xifs`)
    Xisf,
    /// 2880-byte header/data records (`.fits`)
    Fits,
}

impl FormatKind {
    /// Detect the container format from the file extension.
    pub fn from_path(path: &Path) -> Option<FormatKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xisf" | "xifs" => Some(FormatKind::Xisf),
            "fits" => Some(FormatKind::Fits),
            _ => None,
        }
    }
}

/// Raw samples recovered from a container, before normalization.
///
/// Samples are planar (channel-major), row-major within a channel.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub samples: Vec<f32>,
    /// The container's own metadata text, retained verbatim for display
    pub header_text: String,
}

/// Load raw samples from a container file.
///
/// This is the shared decode route: the interactive path and the background
/// preview run both come through here.
pub fn load_image(path: &Path) -> Result<RawImage> {
    let kind = FormatKind::from_path(path).ok_or_else(|| {
        DecodeError::MalformedContainer(format!("unsupported file type: {}", path.display()))
    })?;
    let bytes = fs::read(path)?;
    match kind {
        FormatKind::Xisf => xisf::load(&bytes),
        FormatKind::Fits => fits::load(&bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(
            FormatKind::from_path(Path::new("/data/m31_L_001.xisf")),
            Some(FormatKind::Xisf)
        );
        assert_eq!(
            FormatKind::from_path(Path::new("/data/m31_L_001.XIFS")),
            Some(FormatKind::Xisf)
        );
        assert_eq!(
            FormatKind::from_path(Path::new("/data/m31_L_001.fits")),
            Some(FormatKind::Fits)
        );
        assert_eq!(FormatKind::from_path(Path::new("/data/notes.txt")), None);
        assert_eq!(FormatKind::from_path(Path::new("/data/noext")), None);
    }

    #[test]
    fn load_rejects_unknown_extension() {
        let err = load_image(Path::new("/nonexistent/file.jpg")).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedContainer(_)));
    }
}
