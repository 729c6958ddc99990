//! Enhanced back-end: `mozjpeg` for JPEG, `oxipng` for PNG, frame-level
//! lossless GIF re-encode.

use super::metadata;
use super::CodecBackend;
use crate::error::OptimizeError;
use image::DynamicImage;
use mozjpeg::{ColorSpace, Compress};
use oxipng::{Deflaters, Options, StripChunks};
use std::io::Cursor;
use tracing::debug;

/// oxipng preset used for filter/reduction trials; deflate level is set explicitly
const OXIPNG_PRESET: u8 = 2;

fn codec_err(e: impl std::fmt::Display) -> OptimizeError {
    OptimizeError::Codec(e.to_string())
}

/// Full-featured codec, available with the `enhanced-codec` feature
#[derive(Debug, Default, Clone, Copy)]
pub struct EnhancedCodec;

impl EnhancedCodec {
    pub fn png_options(level: u8, preserve_metadata: bool) -> Options {
        let mut options = Options::from_preset(OXIPNG_PRESET);
        options.deflate = Deflaters::Libdeflater {
            compression: level.clamp(1, 12),
        };
        options.strip = if preserve_metadata {
            StripChunks::None
        } else {
            StripChunks::All
        };
        options
    }
}

impl CodecBackend for EnhancedCodec {
    fn name(&self) -> &'static str {
        "enhanced"
    }

    /// Trellis quantisation and optimised Huffman tables from mozjpeg's defaults
    fn reencode_jpeg(&self, source: &[u8], quality: u8, preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError> {
        let img = image::load_from_memory_with_format(source, image::ImageFormat::Jpeg)?;
        let (width, height) = (img.width() as usize, img.height() as usize);
        let (color_space, pixels) = match img {
            DynamicImage::ImageLuma8(gray) => (ColorSpace::JCS_GRAYSCALE, gray.into_raw()),
            other => (ColorSpace::JCS_RGB, other.to_rgb8().into_raw()),
        };

        let mut compress = Compress::new(color_space);
        compress.set_size(width, height);
        compress.set_quality(quality as f32);

        let mut started = compress
            .start_compress(Vec::with_capacity(source.len()))
            .map_err(codec_err)?;
        started.write_scanlines(&pixels).map_err(codec_err)?;
        let mut out = started.finish().map_err(codec_err)?;

        if preserve_metadata {
            let segments = metadata::jpeg_metadata_segments(source);
            debug!("Carrying {} JPEG metadata segments", segments.len());
            out = metadata::splice_jpeg_segments(&out, &segments);
        }
        Ok(out)
    }

    /// oxipng works on the original chunk stream and never drops alpha, so
    /// palette transparency survives without an explicit RGBA expansion.
    fn reencode_png(&self, source: &[u8], level: u8, preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError> {
        let options = Self::png_options(level, preserve_metadata);
        oxipng::optimize_from_memory(source, &options).map_err(codec_err)
    }

    fn reencode_gif(&self, source: &[u8], preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError> {
        // the frame encoder cannot carry comment/application extensions
        if preserve_metadata {
            debug!("Keeping GIF untouched to preserve its extensions");
            return Ok(source.to_vec());
        }

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(Cursor::new(source)).map_err(codec_err)?;

        let (width, height) = (decoder.width(), decoder.height());
        let global_palette = decoder.global_palette().map(<[u8]>::to_vec).unwrap_or_default();
        let repeat = decoder.repeat();

        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().map_err(codec_err)? {
            frames.push(frame.clone());
        }
        debug!("Re-encoding GIF with {} frames", frames.len());

        let mut out = Vec::with_capacity(source.len());
        {
            let mut encoder = gif::Encoder::new(&mut out, width, height, &global_palette).map_err(codec_err)?;
            if frames.len() > 1 {
                encoder.set_repeat(repeat).map_err(codec_err)?;
            }
            for frame in &frames {
                encoder.write_frame(frame).map_err(codec_err)?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::metadata::test_support::{indexed_png, raw_chunk, with_exif};
    use crate::codec::test_images;

    #[test]
    fn test_jpeg_quality_and_metadata() {
        let source = with_exif(&test_images::noisy_jpeg(48, 48, 100));
        let original_exif = metadata::jpeg_exif_segment(&source).unwrap().to_vec();

        let stripped = EnhancedCodec.reencode_jpeg(&source, 75, false).unwrap();
        assert!(stripped.len() < source.len());
        assert!(metadata::jpeg_exif_segment(&stripped).is_none());
        let decoded = image::load_from_memory(&stripped).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (48, 48));

        let kept = EnhancedCodec.reencode_jpeg(&source, 75, true).unwrap();
        assert_eq!(metadata::jpeg_exif_segment(&kept), Some(original_exif.as_slice()));
        assert!(image::load_from_memory(&kept).is_ok());
    }

    #[test]
    fn test_palette_transparency_survives() {
        let source = indexed_png(2, &[[255, 0, 0], [0, 0, 255]], &[0x40, 0xFF], &[0, 1, 1, 0]);
        let out = EnhancedCodec.reencode_png(&source, 9, false).unwrap();
        assert_eq!(
            image::load_from_memory(&out).unwrap().to_rgba8(),
            image::load_from_memory(&source).unwrap().to_rgba8()
        );
    }

    #[test]
    fn test_png_strip_and_keep() {
        let plain = test_images::gradient_png_rgba(16, 16);
        let exif = raw_chunk(b"eXIf", b"MM\0\x2a\0\0\0\x08");
        let source = metadata::splice_png_chunks(&plain, &[&exif]);

        let stripped = EnhancedCodec.reencode_png(&source, 9, false).unwrap();
        assert!(!metadata::png_has_chunk(&stripped, b"eXIf"));

        let kept = EnhancedCodec.reencode_png(&source, 9, true).unwrap();
        assert_eq!(metadata::png_chunk(&kept, b"eXIf"), Some(exif.as_slice()));

        let before = image::load_from_memory(&source).unwrap().to_rgba8();
        let after = image::load_from_memory(&stripped).unwrap().to_rgba8();
        assert_eq!(before, after);
    }

    #[test]
    fn test_gif_reencode_is_lossless() {
        let source = test_images::tiny_gif();
        let out = EnhancedCodec.reencode_gif(&source, false).unwrap();
        let before = image::load_from_memory(&source).unwrap().to_rgba8();
        let after = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(before, after);
    }

    #[test]
    fn test_corrupt_gif_is_codec_error() {
        let err = EnhancedCodec.reencode_gif(b"GIF89a\x01", false).unwrap_err();
        assert!(matches!(err, OptimizeError::Codec(_)));
    }
}
