//! XISF container support
//!
//! An XISF file embeds an XML metadata block between a literal `<?xml`
//! marker and the closing `</xisf>` tag; the pixel payload is a contiguous
//! byte range at an offset declared in the `location` attribute. Compressed
//! payloads are LZ4 blocks, optionally byte-plane shuffled before
//! compression, which has to be reversed after decompression.

use log::warn;

use crate::decode::RawImage;
use crate::error::{DecodeError, Result};

/// Start marker of the embedded XML metadata block
const XML_START: &[u8] = b"<?xml";
/// End marker; the block runs through the closing tag inclusive
const XML_END: &[u8] = b"</xisf>";

/// Bytes per sample; only UInt16 payloads are supported
const BYTES_PER_SAMPLE: usize = 2;

/// Compression applied to the pixel attachment.
///
/// Anything other than `"none"` is treated as LZ4 block data; the shuffle
/// flag records whether a `+sh:` suffix was present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4 { shuffled: bool },
}

/// Parsed description of one XISF file.
#[derive(Debug, Clone)]
pub struct XisfHeader {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub compression: Compression,
    /// The raw compression descriptor, kept for display
    pub compression_token: String,
    /// Bytes per shuffle unit (meaningful only when shuffled)
    pub shuffle_item_size: usize,
    /// Byte offset of the pixel payload within the file
    pub data_offset: usize,
    /// On-disk size of the payload
    pub compressed_size: usize,
    /// Declared size of the payload after decompression
    pub uncompressed_size: usize,
    /// The XML metadata block, retained verbatim for display and editing
    pub xml_header: String,
}

impl XisfHeader {
    /// Size the recovered sample buffer must have, derived from geometry.
    pub fn expected_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize * BYTES_PER_SAMPLE
    }
}

/// Locate and parse the XML metadata block.
///
/// `bytes` may be the whole file or any leading slice long enough to contain
/// the block, so callers that only need the header can read a prefix.
pub fn parse_header(bytes: &[u8]) -> Result<XisfHeader> {
    let start = find(bytes, XML_START)
        .ok_or_else(|| DecodeError::MalformedContainer("no XML header found".into()))?;
    let end = find(&bytes[start..], XML_END)
        .map(|rel| start + rel + XML_END.len())
        .ok_or_else(|| DecodeError::MalformedContainer("no </xisf> end tag found".into()))?;
    let xml_header = String::from_utf8_lossy(&bytes[start..end]).into_owned();

    let doc = roxmltree::Document::parse(&xml_header)
        .map_err(|e| DecodeError::MalformedContainer(format!("invalid XML header: {e}")))?;

    // Match by local name so a missing namespace declaration still parses.
    let image = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Image")
        .ok_or(DecodeError::NoImageElement)?;

    let geometry = image
        .attribute("geometry")
        .ok_or_else(|| DecodeError::InvalidGeometry("<missing>".into()))?;
    let (width, height, channels) = parse_geometry(geometry)?;

    let sample_format = image.attribute("sampleFormat").unwrap_or("UInt16");
    if !sample_format.eq_ignore_ascii_case("uint16") {
        return Err(DecodeError::UnsupportedSampleFormat(sample_format.into()));
    }

    let location = image.attribute("location").unwrap_or("attachment:0:0");
    let (data_offset, compressed_size) = parse_location(location)?;

    let compression_token = image
        .attribute("compression")
        .unwrap_or("none")
        .to_ascii_lowercase();
    let geometry_bytes =
        width as usize * height as usize * channels as usize * BYTES_PER_SAMPLE;
    let (compression, uncompressed_size, shuffle_item_size) =
        parse_compression(&compression_token, geometry_bytes);

    Ok(XisfHeader {
        width,
        height,
        channels,
        compression,
        compression_token,
        shuffle_item_size,
        data_offset,
        compressed_size,
        uncompressed_size,
        xml_header,
    })
}

/// Recover the raw little-endian sample bytes described by `header`.
pub fn extract_samples(bytes: &[u8], header: &XisfHeader) -> Result<Vec<u8>> {
    let end = header
        .data_offset
        .checked_add(header.compressed_size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            DecodeError::MalformedContainer(format!(
                "payload range {}+{} exceeds file size {}",
                header.data_offset,
                header.compressed_size,
                bytes.len()
            ))
        })?;
    let payload = &bytes[header.data_offset..end];

    let data = match header.compression {
        Compression::None => payload.to_vec(),
        Compression::Lz4 { shuffled } => {
            // Request exactly the declared uncompressed size; a corrupt block
            // or a size disagreement is a hard failure, never a truncation.
            let decompressed = lz4_flex::block::decompress(payload, header.uncompressed_size)
                .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;
            if shuffled {
                unshuffle_u16(&decompressed)
            } else {
                decompressed
            }
        }
    };

    if data.len() != header.expected_bytes() {
        return Err(DecodeError::SizeMismatch {
            expected: header.expected_bytes(),
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Decode an XISF file into raw samples.
pub fn load(bytes: &[u8]) -> Result<RawImage> {
    let header = parse_header(bytes)?;
    let data = extract_samples(bytes, &header)?;
    let samples = data
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32)
        .collect();
    Ok(RawImage {
        width: header.width,
        height: header.height,
        channels: header.channels,
        samples,
        header_text: header.xml_header,
    })
}

/// Reverse byte-plane shuffling for 16-bit samples.
///
/// A shuffled buffer holds all low bytes first, then all high bytes; each
/// sample is rebuilt as `low | high << 8`. This assumes item size 2, the
/// only layout UInt16 payloads use.
pub fn unshuffle_u16(data: &[u8]) -> Vec<u8> {
    let n = data.len() / 2;
    let (low, high) = data.split_at(n);
    let mut out = Vec::with_capacity(n * 2);
    for i in 0..n {
        out.push(low[i]);
        out.push(high[i]);
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_geometry(geometry: &str) -> Result<(u32, u32, u32)> {
    let bad = || DecodeError::InvalidGeometry(geometry.to_string());
    let parts: Vec<&str> = geometry.split(':').collect();
    if parts.len() != 3 {
        return Err(bad());
    }
    let mut dims = [0u32; 3];
    for (slot, part) in dims.iter_mut().zip(&parts) {
        *slot = part.parse().map_err(|_| bad())?;
        if *slot == 0 {
            return Err(bad());
        }
    }
    Ok((dims[0], dims[1], dims[2]))
}

fn parse_location(location: &str) -> Result<(usize, usize)> {
    let bad = || DecodeError::UnsupportedLocation(location.to_string());
    let parts: Vec<&str> = location.split(':').collect();
    if parts.len() != 3 || parts[0] != "attachment" {
        return Err(bad());
    }
    let offset = parts[1].parse().map_err(|_| bad())?;
    let size = parts[2].parse().map_err(|_| bad())?;
    Ok((offset, size))
}

/// Parse the compression descriptor.
///
/// A malformed `+sh:` suffix deliberately falls back to the geometry-derived
/// size with item size 1 instead of failing; files with such descriptors
/// exist in the wild and decode fine. The fallback is logged.
fn parse_compression(token: &str, geometry_bytes: usize) -> (Compression, usize, usize) {
    if token == "none" {
        return (Compression::None, geometry_bytes, 1);
    }
    match token.split_once("+sh:") {
        Some((_, suffix)) => {
            let mut it = suffix.split(':');
            let size = it.next().and_then(|s| s.parse().ok());
            let item = it.next().and_then(|s| s.parse().ok());
            if let (Some(size), Some(item)) = (size, item) {
                (Compression::Lz4 { shuffled: true }, size, item)
            } else {
                warn!("malformed shuffle suffix in compression descriptor {token:?}, falling back to geometry-derived size");
                (Compression::Lz4 { shuffled: true }, geometry_bytes, 1)
            }
        }
        None => (Compression::Lz4 { shuffled: false }, geometry_bytes, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA_OFFSET: usize = 1024;

    /// Compose a file: XML block at the front, payload at a fixed offset.
    fn make_xisf(image_attrs: &str, payload: &[u8]) -> Vec<u8> {
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <xisf xmlns=\"http://www.pixinsight.com/xisf\" version=\"1.0\">\n\
             <Image {image_attrs}/>\n\
             </xisf>"
        );
        assert!(xml.len() <= DATA_OFFSET, "test header must fit before payload");
        let mut bytes = vec![0u8; DATA_OFFSET + payload.len()];
        bytes[..xml.len()].copy_from_slice(xml.as_bytes());
        bytes[DATA_OFFSET..].copy_from_slice(payload);
        bytes
    }

    /// Forward shuffle, the inverse of `unshuffle_u16`: all low bytes, then
    /// all high bytes.
    fn shuffle_u16(data: &[u8]) -> Vec<u8> {
        let n = data.len() / 2;
        let mut out = vec![0u8; n * 2];
        for i in 0..n {
            out[i] = data[2 * i];
            out[n + i] = data[2 * i + 1];
        }
        out
    }

    fn le_bytes(samples: &[u16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn parses_uncompressed_header() {
        let bytes = make_xisf(
            "geometry=\"100:50:1\" sampleFormat=\"UInt16\" compression=\"none\" \
             location=\"attachment:128:10000\"",
            &[],
        );
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.width, 100);
        assert_eq!(header.height, 50);
        assert_eq!(header.channels, 1);
        assert_eq!(header.compression, Compression::None);
        assert_eq!(header.data_offset, 128);
        assert_eq!(header.compressed_size, 10000);
        assert_eq!(header.uncompressed_size, 100 * 50 * 2);
        assert!(header.xml_header.starts_with("<?xml"));
        assert!(header.xml_header.ends_with("</xisf>"));
    }

    #[test]
    fn sample_format_defaults_to_uint16() {
        let bytes = make_xisf("geometry=\"4:4:1\" location=\"attachment:1024:32\"", &[]);
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.uncompressed_size, 32);
    }

    #[test]
    fn parses_shuffle_suffix() {
        let bytes = make_xisf(
            "geometry=\"100:50:1\" compression=\"lz4+sh:20000:2\" \
             location=\"attachment:128:5000\"",
            &[],
        );
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.compression, Compression::Lz4 { shuffled: true });
        assert_eq!(header.uncompressed_size, 20000);
        assert_eq!(header.shuffle_item_size, 2);
    }

    #[test]
    fn malformed_shuffle_suffix_falls_back_to_geometry() {
        let bytes = make_xisf(
            "geometry=\"100:50:1\" compression=\"lz4+sh:banana\" \
             location=\"attachment:128:5000\"",
            &[],
        );
        let header = parse_header(&bytes).unwrap();
        // Permissive fallback, not an error: geometry-derived size, item 1.
        assert_eq!(header.compression, Compression::Lz4 { shuffled: true });
        assert_eq!(header.uncompressed_size, 100 * 50 * 2);
        assert_eq!(header.shuffle_item_size, 1);
    }

    #[test]
    fn missing_markers_are_malformed() {
        let err = parse_header(b"not an xisf file at all").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedContainer(_)));

        let err = parse_header(b"<?xml version=\"1.0\"?><xisf>").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedContainer(_)));
    }

    #[test]
    fn broken_xml_is_malformed() {
        // End marker present but the document does not parse.
        let err = parse_header(b"<?xml version=\"1.0\"?><xisf><Image</xisf>").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedContainer(_)));
    }

    #[test]
    fn missing_image_element() {
        let bytes =
            b"<?xml version=\"1.0\"?><xisf xmlns=\"http://www.pixinsight.com/xisf\"></xisf>";
        let err = parse_header(bytes).unwrap_err();
        assert!(matches!(err, DecodeError::NoImageElement));
    }

    #[test]
    fn rejects_bad_geometry() {
        for geometry in ["100:0:1", "abc:2:3", "100:50", "1:2:3:4", "-4:2:1"] {
            let bytes = make_xisf(
                &format!("geometry=\"{geometry}\" location=\"attachment:0:0\""),
                &[],
            );
            let err = parse_header(&bytes).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidGeometry(_)),
                "geometry {geometry:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_unsupported_sample_format() {
        let bytes = make_xisf(
            "geometry=\"4:4:1\" sampleFormat=\"Float32\" location=\"attachment:0:32\"",
            &[],
        );
        let err = parse_header(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedSampleFormat(f) if f == "Float32"));
    }

    #[test]
    fn rejects_unsupported_location() {
        let bytes = make_xisf("geometry=\"4:4:1\" location=\"inline:base64\"", &[]);
        let err = parse_header(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedLocation(_)));
    }

    #[test]
    fn unshuffle_round_trip() {
        let samples: Vec<u16> = (0..256).map(|i| i * 257).collect();
        let bytes = le_bytes(&samples);
        assert_eq!(unshuffle_u16(&shuffle_u16(&bytes)), bytes);
    }

    #[test]
    fn decodes_uncompressed_payload() {
        let samples: Vec<u16> = (0..20).map(|i| i * 1000).collect();
        let payload = le_bytes(&samples);
        let bytes = make_xisf(
            &format!(
                "geometry=\"5:4:1\" compression=\"none\" location=\"attachment:{DATA_OFFSET}:{}\"",
                payload.len()
            ),
            &payload,
        );
        let raw = load(&bytes).unwrap();
        assert_eq!((raw.width, raw.height, raw.channels), (5, 4, 1));
        let expected: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
        assert_eq!(raw.samples, expected);
    }

    #[test]
    fn decodes_compressed_shuffled_payload() {
        let samples: Vec<u16> = (0..64).map(|i| 60000 - i * 700).collect();
        let plain = le_bytes(&samples);
        let compressed = lz4_flex::block::compress(&shuffle_u16(&plain));
        let bytes = make_xisf(
            &format!(
                "geometry=\"8:8:1\" compression=\"lz4+sh:{}:2\" \
                 location=\"attachment:{DATA_OFFSET}:{}\"",
                plain.len(),
                compressed.len()
            ),
            &compressed,
        );
        let raw = load(&bytes).unwrap();
        let expected: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
        assert_eq!(raw.samples, expected);
    }

    #[test]
    fn corrupt_block_fails_decompression() {
        let plain = le_bytes(&(0..64).collect::<Vec<u16>>());
        let mut compressed = lz4_flex::block::compress(&plain);
        compressed.truncate(compressed.len() / 2);
        let bytes = make_xisf(
            &format!(
                "geometry=\"8:8:1\" compression=\"lz4\" location=\"attachment:{DATA_OFFSET}:{}\"",
                compressed.len()
            ),
            &compressed,
        );
        let err = load(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::DecompressionFailed(_)));
    }

    #[test]
    fn wrong_payload_size_is_a_mismatch() {
        // Geometry says 8x8 but only 10 samples are attached.
        let payload = le_bytes(&(0..10).collect::<Vec<u16>>());
        let bytes = make_xisf(
            &format!(
                "geometry=\"8:8:1\" compression=\"none\" location=\"attachment:{DATA_OFFSET}:{}\"",
                payload.len()
            ),
            &payload,
        );
        let err = load(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::SizeMismatch { expected: 128, actual: 20 }));
    }

    #[test]
    fn payload_range_outside_file_is_malformed() {
        let bytes = make_xisf(
            "geometry=\"8:8:1\" compression=\"none\" location=\"attachment:4096:128\"",
            &[],
        );
        let err = load(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedContainer(_)));
    }
}
