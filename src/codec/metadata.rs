//! Metadata carry-over for re-encoded JPEG and PNG streams.
//!
//! The pixel encoders never write EXIF/ICC/comments, so stripping is the
//! default. Preserving means copying the original segments/chunks verbatim
//! (CRCs included) into the freshly encoded stream.

/// JPEG markers
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
/// Adobe colour-transform marker, tied to the original encoding
const APP14: u8 = 0xEE;
const APP15: u8 = 0xEF;
const COM: u8 = 0xFE;

const EXIF_HEADER: &[u8] = b"Exif\0\0";

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Ancillary PNG chunks treated as metadata
const PNG_METADATA_CHUNKS: &[&[u8; 4]] = &[b"eXIf", b"iCCP", b"tEXt", b"zTXt", b"iTXt", b"tIME"];

fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == SOI
}

/// Walk the JPEG header segments up to the start of scan.
///
/// Each item is `(marker, whole segment including the 0xFF marker bytes)`.
fn jpeg_segments(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut segments = Vec::new();
    if !is_jpeg(data) {
        return segments;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            break;
        }
        let marker = data[pos + 1];
        match marker {
            // fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            SOS | EOI => break,
            // standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > data.len() {
            break;
        }
        segments.push((marker, &data[pos..end]));
        pos = end;
    }
    segments
}

/// APP1..APP15 and COM segments of a JPEG (EXIF, XMP, ICC, comments...).
///
/// APP14 is skipped: its transform flag describes the source scan data and
/// would make decoders misread the re-encoded YCbCr stream.
pub fn jpeg_metadata_segments(data: &[u8]) -> Vec<&[u8]> {
    jpeg_segments(data)
        .into_iter()
        .filter(|(marker, _)| ((APP1..=APP15).contains(marker) && *marker != APP14) || *marker == COM)
        .map(|(_, segment)| segment)
        .collect()
}

/// The EXIF APP1 segment, if any
pub fn jpeg_exif_segment(data: &[u8]) -> Option<&[u8]> {
    jpeg_segments(data)
        .into_iter()
        .find(|(marker, segment)| *marker == APP1 && segment.get(4..10) == Some(EXIF_HEADER))
        .map(|(_, segment)| segment)
}

/// Insert `segments` right after SOI (and after the encoder's JFIF APP0)
pub fn splice_jpeg_segments(encoded: &[u8], segments: &[&[u8]]) -> Vec<u8> {
    if segments.is_empty() || !is_jpeg(encoded) {
        return encoded.to_vec();
    }

    let mut insert_at = 2;
    if let Some((APP0, app0)) = jpeg_segments(encoded).first() {
        insert_at += app0.len();
    }

    let extra: usize = segments.iter().map(|s| s.len()).sum();
    let mut out = Vec::with_capacity(encoded.len() + extra);
    out.extend_from_slice(&encoded[..insert_at]);
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(&encoded[insert_at..]);
    out
}

/// A raw PNG chunk: `(type, whole chunk including length, type, data and CRC)`
fn png_chunks(data: &[u8]) -> Vec<([u8; 4], &[u8])> {
    let mut chunks = Vec::new();
    if data.len() < 8 || data[..8] != PNG_SIGNATURE {
        return chunks;
    }

    let mut pos = 8;
    while pos + 12 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let kind = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let end = match pos.checked_add(12 + len) {
            Some(end) if end <= data.len() => end,
            _ => break,
        };
        chunks.push((kind, &data[pos..end]));
        pos = end;
        if &kind == b"IEND" {
            break;
        }
    }
    chunks
}

/// Metadata chunks of a PNG (eXIf, iCCP, text chunks, tIME)
pub fn png_metadata_chunks(data: &[u8]) -> Vec<&[u8]> {
    png_chunks(data)
        .into_iter()
        .filter(|(kind, _)| PNG_METADATA_CHUNKS.iter().any(|k| *k == kind))
        .map(|(_, chunk)| chunk)
        .collect()
}

pub fn png_has_chunk(data: &[u8], kind: &[u8; 4]) -> bool {
    png_chunks(data).iter().any(|(k, _)| k == kind)
}

/// Raw bytes of a PNG chunk (whole chunk), if present
pub fn png_chunk<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    png_chunks(data)
        .into_iter()
        .find(|(k, _)| k == kind)
        .map(|(_, chunk)| chunk)
}

/// Insert `chunks` right after IHDR, where iCCP and eXIf are allowed
pub fn splice_png_chunks(encoded: &[u8], chunks: &[&[u8]]) -> Vec<u8> {
    let ihdr_end = match png_chunks(encoded).first() {
        Some((kind, ihdr)) if kind == b"IHDR" => 8 + ihdr.len(),
        _ => return encoded.to_vec(),
    };
    if chunks.is_empty() {
        return encoded.to_vec();
    }

    let extra: usize = chunks.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(encoded.len() + extra);
    out.extend_from_slice(&encoded[..ihdr_end]);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&encoded[ihdr_end..]);
    out
}

/// Palette layout of a PNG source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PngPalette {
    pub indexed: bool,
    pub has_transparency: bool,
}

impl PngPalette {
    pub fn inspect(data: &[u8]) -> Self {
        let chunks = png_chunks(data);
        // IHDR data: width(4) height(4) depth(1) colour type(1) ...
        let indexed = chunks
            .first()
            .filter(|(kind, _)| kind == b"IHDR")
            .and_then(|(_, ihdr)| ihdr.get(8 + 9))
            .map(|colour_type| *colour_type == 3)
            .unwrap_or(false);
        let has_transparency = chunks.iter().any(|(kind, _)| kind == b"tRNS");

        Self {
            indexed,
            has_transparency,
        }
    }

    /// Palette images with tRNS must be expanded to RGBA before re-encoding
    pub fn needs_alpha_expansion(&self) -> bool {
        self.indexed && self.has_transparency
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Minimal hand-built streams for metadata tests.

    /// An EXIF APP1 segment with a tiny TIFF header payload
    pub fn exif_app1() -> Vec<u8> {
        let payload: &[u8] = b"Exif\0\0MM\0\x2a\0\0\0\x08\0\0";
        let len = (payload.len() + 2) as u16;
        let mut seg = vec![0xFF, 0xE1];
        seg.extend_from_slice(&len.to_be_bytes());
        seg.extend_from_slice(payload);
        seg
    }

    /// Insert the EXIF segment into a JPEG right after SOI
    pub fn with_exif(jpeg: &[u8]) -> Vec<u8> {
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&exif_app1());
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// An Adobe APP14 segment with the given colour transform flag
    pub fn adobe_app14(transform: u8) -> Vec<u8> {
        let mut seg = vec![0xFF, 0xEE, 0x00, 0x0E];
        seg.extend_from_slice(b"Adobe");
        seg.extend_from_slice(&[0x00, 0x64, 0x00, 0x00, 0x00, 0x00, transform]);
        seg
    }

    /// Insert `segment` into a JPEG right after SOI
    pub fn with_segment(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(segment);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// Markers of the header segments, in stream order
    pub fn jpeg_markers(data: &[u8]) -> Vec<u8> {
        super::jpeg_segments(data).into_iter().map(|(marker, _)| marker).collect()
    }

    /// 8-bit indexed PNG; `alpha` becomes a tRNS chunk when not empty
    pub fn indexed_png(width: u32, palette: &[[u8; 3]], alpha: &[u8], indices: &[u8]) -> Vec<u8> {
        let height = indices.len() as u32 / width;
        let mut ihdr = width.to_be_bytes().to_vec();
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 3, 0, 0, 0]);

        let mut raw = Vec::new();
        for row in indices.chunks(width as usize) {
            raw.push(0);
            raw.extend_from_slice(row);
        }

        // zlib stream holding one stored deflate block
        let len = raw.len() as u16;
        let mut idat = vec![0x78, 0x01, 0x01];
        idat.extend_from_slice(&len.to_le_bytes());
        idat.extend_from_slice(&(!len).to_le_bytes());
        idat.extend_from_slice(&raw);
        idat.extend_from_slice(&adler32(&raw).to_be_bytes());

        let mut png = super::PNG_SIGNATURE.to_vec();
        png.extend(raw_chunk(b"IHDR", &ihdr));
        png.extend(raw_chunk(b"PLTE", &palette.concat()));
        if !alpha.is_empty() {
            png.extend(raw_chunk(b"tRNS", alpha));
        }
        png.extend(raw_chunk(b"IDAT", &idat));
        png.extend(raw_chunk(b"IEND", &[]));
        png
    }

    fn adler32(data: &[u8]) -> u32 {
        let (mut a, mut b) = (1u32, 0u32);
        for byte in data {
            a = (a + *byte as u32) % 65_521;
            b = (b + a) % 65_521;
        }
        (b << 16) | a
    }

    /// A complete PNG chunk with a valid CRC
    pub fn raw_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut chunk = (data.len() as u32).to_be_bytes().to_vec();
        chunk.extend_from_slice(kind);
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(&crc32(kind, data).to_be_bytes());
        chunk
    }

    fn crc32(kind: &[u8], data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for byte in kind.iter().chain(data) {
            crc ^= *byte as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
            }
        }
        !crc
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90))
            .unwrap();
        out
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 255, 128]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_with_encoder(image::codecs::png::PngEncoder::new(&mut out))
            .unwrap();
        out
    }

    #[test]
    fn test_jpeg_exif_round_trip() {
        let source = with_exif(&tiny_jpeg());
        assert_eq!(jpeg_exif_segment(&source), Some(exif_app1().as_slice()));

        let plain = tiny_jpeg();
        assert!(jpeg_exif_segment(&plain).is_none());

        let spliced = splice_jpeg_segments(&plain, &jpeg_metadata_segments(&source));
        assert_eq!(jpeg_exif_segment(&spliced), Some(exif_app1().as_slice()));
        assert!(image::load_from_memory(&spliced).is_ok());
    }

    #[test]
    fn test_splice_with_no_segments_is_identity() {
        let plain = tiny_jpeg();
        assert_eq!(splice_jpeg_segments(&plain, &[]), plain);
        assert_eq!(splice_jpeg_segments(b"not a jpeg", &[b"x"]), b"not a jpeg".to_vec());
    }

    #[test]
    fn test_png_chunk_splice() {
        let plain = tiny_png();
        assert!(!png_has_chunk(&plain, b"eXIf"));

        let exif = raw_chunk(b"eXIf", b"MM\0\x2a\0\0\0\x08");
        let text = raw_chunk(b"tEXt", b"Comment\0hello");
        let spliced = splice_png_chunks(&plain, &[&exif, &text]);

        assert!(png_has_chunk(&spliced, b"eXIf"));
        assert_eq!(png_chunk(&spliced, b"eXIf"), Some(exif.as_slice()));
        assert_eq!(png_metadata_chunks(&spliced).len(), 2);
        assert!(image::load_from_memory(&spliced).is_ok());
    }

    #[test]
    fn test_adobe_segment_is_not_carried() {
        let source = with_segment(&with_exif(&tiny_jpeg()), &adobe_app14(0));
        assert!(jpeg_markers(&source).contains(&APP14));

        let carried = jpeg_metadata_segments(&source);
        assert_eq!(carried, vec![exif_app1().as_slice()]);
    }

    #[test]
    fn test_indexed_png_inspection() {
        let palette = [[255, 0, 0], [0, 0, 255]];
        let with_alpha = indexed_png(2, &palette, &[0x40, 0xFF], &[0, 1, 1, 0]);
        let inspected = PngPalette::inspect(&with_alpha);
        assert!(inspected.indexed);
        assert!(inspected.needs_alpha_expansion());

        let decoded = image::load_from_memory(&with_alpha).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0, 0x40]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 0, 255, 0xFF]);

        let opaque = indexed_png(2, &palette, &[], &[0, 1, 1, 0]);
        assert!(PngPalette::inspect(&opaque).indexed);
        assert!(!PngPalette::inspect(&opaque).needs_alpha_expansion());
    }

    #[test]
    fn test_palette_inspection() {
        let plain = tiny_png();
        let palette = PngPalette::inspect(&plain);
        assert!(!palette.indexed);
        assert!(!palette.needs_alpha_expansion());
        assert_eq!(PngPalette::inspect(b"garbage"), PngPalette::default());
    }
}
