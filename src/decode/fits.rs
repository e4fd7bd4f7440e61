//! Minimal FITS image reader
//!
//! Just enough of the standard to pull the first image HDU out of a file:
//! 2880-byte records, 80-byte header cards, big-endian data scaled by
//! `BZERO`/`BSCALE`. Data-less HDUs (a bare primary header in front of an
//! IMAGE extension is common) are walked past; the first HDU with pixels
//! wins. Table extensions are skipped.

use log::debug;

use crate::decode::RawImage;
use crate::error::{DecodeError, Result};

/// FITS record size; headers and data are both padded to this
const BLOCK_SIZE: usize = 2880;
/// One header card
const CARD_SIZE: usize = 80;

/// Keywords extracted from one HDU header.
struct HduHeader {
    bitpix: i32,
    /// NAXIS1..NAXISn, in axis order
    dims: Vec<usize>,
    bzero: f32,
    bscale: f32,
    /// Quoted XTENSION value, empty for the primary HDU
    xtension: String,
    /// Trimmed card text, for display
    cards: Vec<String>,
    /// File offset where this HDU's data begins
    data_start: usize,
}

impl HduHeader {
    /// Raw data size in bytes, before block padding. `None` when the
    /// declared dimensions overflow, which only a broken header produces.
    fn data_len(&self) -> Option<usize> {
        if self.dims.is_empty() {
            return Some(0);
        }
        let mut count = 1usize;
        for &dim in &self.dims {
            count = count.checked_mul(dim)?;
        }
        count.checked_mul(self.bitpix.unsigned_abs() as usize / 8)
    }

    /// The primary HDU and IMAGE extensions carry image data.
    fn is_image(&self) -> bool {
        self.xtension.is_empty() || self.xtension.starts_with("IMAGE")
    }
}

/// Decode a FITS file into raw samples.
pub fn load(bytes: &[u8]) -> Result<RawImage> {
    if !bytes.starts_with(b"SIMPLE") {
        return Err(DecodeError::MalformedContainer("not a FITS file".into()));
    }

    let overflow = || DecodeError::MalformedContainer("declared data size overflows".into());
    let mut pos = 0;
    while pos < bytes.len() {
        let hdu = parse_hdu_header(bytes, pos)?;
        let data_len = hdu.data_len().ok_or_else(overflow)?;
        if data_len > 0 && hdu.is_image() {
            return read_image(bytes, &hdu);
        }
        if data_len > 0 {
            debug!("skipping {} extension with {} data bytes", hdu.xtension, data_len);
        }
        pos = data_len
            .div_ceil(BLOCK_SIZE)
            .checked_mul(BLOCK_SIZE)
            .and_then(|padded| hdu.data_start.checked_add(padded))
            .ok_or_else(overflow)?;
    }
    Err(DecodeError::NoImageElement)
}

/// Parse one HDU header starting at `start`, which must be block-aligned.
fn parse_hdu_header(bytes: &[u8], start: usize) -> Result<HduHeader> {
    let mut header = HduHeader {
        bitpix: 0,
        dims: Vec::new(),
        bzero: 0.0,
        bscale: 1.0,
        xtension: String::new(),
        cards: Vec::new(),
        data_start: start,
    };
    let mut naxis = 0usize;

    let mut pos = start;
    'blocks: loop {
        let block = bytes.get(pos..pos + BLOCK_SIZE).ok_or_else(|| {
            DecodeError::MalformedContainer("truncated FITS header (no END card)".into())
        })?;
        pos += BLOCK_SIZE;

        for card in block.chunks_exact(CARD_SIZE) {
            // The keyword field is ASCII by the standard; anything else
            // means the header itself is broken, not just one value.
            let keyword = std::str::from_utf8(&card[..8])
                .map_err(|_| {
                    DecodeError::MalformedContainer("non-ASCII keyword in header card".into())
                })?
                .trim_end();
            if keyword == "END" {
                break 'blocks;
            }
            if keyword.is_empty() {
                continue;
            }
            header.cards.push(String::from_utf8_lossy(card).trim_end().to_string());

            let Some(value) = card_value(card) else { continue };
            match keyword {
                "BITPIX" => {
                    let v = parse_int(keyword, &value)?;
                    header.bitpix = i32::try_from(v).map_err(|_| {
                        DecodeError::MalformedContainer(format!("BITPIX out of range: {v}"))
                    })?;
                }
                "NAXIS" => {
                    naxis = parse_dim(keyword, &value)?;
                    if naxis > 999 {
                        return Err(DecodeError::MalformedContainer(format!(
                            "NAXIS out of range: {naxis}"
                        )));
                    }
                    header.dims.resize(naxis, 1);
                }
                "BZERO" => header.bzero = parse_float(keyword, &value)?,
                "BSCALE" => header.bscale = parse_float(keyword, &value)?,
                "XTENSION" => header.xtension = quoted(&value),
                k if k.starts_with("NAXIS") => {
                    if let Ok(axis) = k["NAXIS".len()..].parse::<usize>() {
                        if axis >= 1 && axis <= naxis {
                            header.dims[axis - 1] = parse_dim(keyword, &value)?;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    header.data_start = pos;
    Ok(header)
}

fn read_image(bytes: &[u8], hdu: &HduHeader) -> Result<RawImage> {
    let (width, height, channels) = match hdu.dims.as_slice() {
        [w] => (*w, 1, 1),
        [w, h] => (*w, *h, 1),
        [w, h, c] => (*w, *h, *c),
        dims => {
            return Err(DecodeError::MalformedContainer(format!(
                "unsupported NAXIS count {}",
                dims.len()
            )))
        }
    };

    let count = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| DecodeError::MalformedContainer("image dimensions overflow".into()))?;
    let bpp = hdu.bitpix.unsigned_abs() as usize / 8;
    let data = count
        .checked_mul(bpp)
        .and_then(|len| hdu.data_start.checked_add(len))
        .and_then(|end| bytes.get(hdu.data_start..end))
        .ok_or_else(|| DecodeError::MalformedContainer("truncated FITS data".into()))?;

    let (bzero, bscale) = (hdu.bzero, hdu.bscale);
    let scale = |v: f32| bzero + bscale * v;
    let mut samples = Vec::with_capacity(count);
    match hdu.bitpix {
        8 => samples.extend(data.iter().map(|&b| scale(b as f32))),
        16 => samples.extend(
            data.chunks_exact(2)
                .map(|b| scale(i16::from_be_bytes([b[0], b[1]]) as f32)),
        ),
        32 => samples.extend(
            data.chunks_exact(4)
                .map(|b| scale(i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f32)),
        ),
        64 => samples.extend(data.chunks_exact(8).map(|b| {
            scale(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
        })),
        -32 => samples.extend(
            data.chunks_exact(4)
                .map(|b| scale(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))),
        ),
        -64 => samples.extend(data.chunks_exact(8).map(|b| {
            scale(f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
        })),
        other => {
            return Err(DecodeError::UnsupportedSampleFormat(format!("BITPIX {other}")))
        }
    }

    Ok(RawImage {
        width: axis_u32(width)?,
        height: axis_u32(height)?,
        channels: axis_u32(channels)?,
        samples,
        header_text: hdu.cards.join("\n"),
    })
}

/// Value portion of a card, with any trailing comment stripped. Works on
/// the raw bytes so a stray non-ASCII byte cannot shift the field offsets.
fn card_value(card: &[u8]) -> Option<String> {
    if !card[8..].starts_with(b"= ") {
        return None;
    }
    let field = &card[10..];
    // Comments start at '/'; none of the keywords we read hold quoted
    // strings containing one.
    let raw = field.split(|&b| b == b'/').next().unwrap_or(field);
    let value = String::from_utf8_lossy(raw).trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn quoted(value: &str) -> String {
    value.trim_matches('\'').trim().to_string()
}

fn parse_int(keyword: &str, value: &str) -> Result<i64> {
    value.parse().map_err(|_| {
        DecodeError::MalformedContainer(format!("bad integer for {keyword}: {value:?}"))
    })
}

/// Parse an axis count or length; negative values are a broken header.
fn parse_dim(keyword: &str, value: &str) -> Result<usize> {
    let v = parse_int(keyword, value)?;
    usize::try_from(v)
        .map_err(|_| DecodeError::MalformedContainer(format!("negative {keyword}: {v}")))
}

fn axis_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        DecodeError::MalformedContainer(format!("axis length {value} out of range"))
    })
}

fn parse_float(keyword: &str, value: &str) -> Result<f32> {
    value.parse().map_err(|_| {
        DecodeError::MalformedContainer(format!("bad number for {keyword}: {value:?}"))
    })
}
