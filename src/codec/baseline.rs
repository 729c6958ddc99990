//! Baseline back-end: decode and re-encode with the `image` crate.

use super::metadata::{self, PngPalette};
use super::CodecBackend;
use crate::error::OptimizeError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::DynamicImage;
use tracing::debug;

/// Raster codec always available
#[derive(Debug, Default, Clone, Copy)]
pub struct BaselineCodec;

impl BaselineCodec {
    /// The encoder exposes three deflate presets; spread 0-9 over them
    pub fn png_compression_type(level: u8) -> CompressionType {
        match level {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }
}

impl CodecBackend for BaselineCodec {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn reencode_jpeg(&self, source: &[u8], quality: u8, preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError> {
        let img = image::load_from_memory_with_format(source, image::ImageFormat::Jpeg)?;
        // JPEG carries no alpha and the encoder only takes 8-bit gray or RGB
        let img = match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };

        let mut out = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;

        if preserve_metadata {
            let segments = metadata::jpeg_metadata_segments(source);
            debug!("Carrying {} JPEG metadata segments", segments.len());
            out = metadata::splice_jpeg_segments(&out, &segments);
        }
        Ok(out)
    }

    fn reencode_png(&self, source: &[u8], level: u8, preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError> {
        let palette = PngPalette::inspect(source);
        let mut img = image::load_from_memory_with_format(source, image::ImageFormat::Png)?;

        if palette.needs_alpha_expansion() && !img.color().has_alpha() {
            debug!("Expanding palette PNG with transparency to RGBA");
            img = DynamicImage::ImageRgba8(img.to_rgba8());
        }

        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(
            &mut out,
            Self::png_compression_type(level),
            FilterType::Adaptive,
        );
        img.write_with_encoder(encoder)?;

        if preserve_metadata {
            let chunks = metadata::png_metadata_chunks(source);
            debug!("Carrying {} PNG metadata chunks", chunks.len());
            out = metadata::splice_png_chunks(&out, &chunks);
        }
        Ok(out)
    }

    /// No safe compression path for GIF here: bytes are returned untouched
    fn reencode_gif(&self, source: &[u8], _preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError> {
        Ok(source.to_vec())
    }
}
