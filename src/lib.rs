//! Culling core for XISF and FITS astronomical exposures.
//!
//! The pipeline: container header parsing, LZ4 block decompression with
//! byte-plane unshuffling, per-file min/max normalization, asinh stretch /
//! gamma / brightness / contrast tone mapping to an 8-bit raster. Around it:
//! a bounded LRU cache of decoded images, a background thumbnail run with an
//! independent preview store, and an explicit session object holding the
//! state a culling UI needs.

use std::path::Path;

pub mod cache;
pub mod decode;
pub mod error;
pub mod render;
pub mod state;
pub mod thumbs;

pub use cache::DecodedCache;
pub use decode::{load_image, FormatKind, RawImage};
pub use error::{DecodeError, Result};
pub use render::tonemap::{asinh_stretch, tone_map, ToneMapEngine, ToneMapParams};
pub use render::{normalize, DecodedImage};
pub use state::session::{FileEntry, Session};
pub use thumbs::{Preview, PreviewStore, ProgressEvent};

/// Decode a container file into a normalized image.
///
/// Convenience for the common case; the session's cache-aware path goes
/// through [`Session`](state::session::Session) instead.
pub fn decode_file(path: &Path) -> Result<DecodedImage> {
    Ok(render::normalize(decode::load_image(path)?))
}
