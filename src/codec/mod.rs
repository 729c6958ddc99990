//! # Codec Back-ends
//!
//! Due back-end selezionabili tramite `OptimizationPolicy::use_alternate_codec`:
//!
//! | Back-end | JPEG | PNG | GIF |
//! |----------|------|-----|-----|
//! | `baseline` (`image`) | re-encode a qualità | re-encode, 3 preset deflate | pass-through |
//! | `enhanced` (`mozjpeg` + `oxipng` + `gif`) | mozjpeg (trellis, Huffman ottimizzato) | deflate 0-9 esplicito, strip chunk | re-encode lossless dei frame |
//!
//! Il back-end `enhanced` è compilato solo con la feature `enhanced-codec`
//! (attiva di default). Se richiesto ma assente si ricade su `baseline` con un
//! warning, mai con un errore.
//!
//! Tutti i metodi lavorano su buffer in memoria e sono sincroni: il chiamante
//! li esegue in `spawn_blocking`.

pub mod baseline;
#[cfg(feature = "enhanced-codec")]
pub mod enhanced;
pub mod metadata;

use crate::error::OptimizeError;
use image::codecs::webp::WebPEncoder;
use image::DynamicImage;

pub use baseline::BaselineCodec;
#[cfg(feature = "enhanced-codec")]
pub use enhanced::EnhancedCodec;

/// Format-specific re-encode operations over raw file bytes
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn reencode_jpeg(&self, source: &[u8], quality: u8, preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError>;

    fn reencode_png(&self, source: &[u8], level: u8, preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError>;

    fn reencode_gif(&self, source: &[u8], preserve_metadata: bool) -> Result<Vec<u8>, OptimizeError>;
}

static BASELINE: BaselineCodec = BaselineCodec;
#[cfg(feature = "enhanced-codec")]
static ENHANCED: EnhancedCodec = EnhancedCodec;

/// Whether the full-featured back-end was compiled in
pub fn enhanced_available() -> bool {
    cfg!(feature = "enhanced-codec")
}

/// Pick the back-end for a policy
pub fn select_backend(use_alternate_codec: bool) -> &'static dyn CodecBackend {
    if use_alternate_codec {
        alternate_backend()
    } else {
        &BASELINE
    }
}

#[cfg(feature = "enhanced-codec")]
fn alternate_backend() -> &'static dyn CodecBackend {
    &ENHANCED
}

#[cfg(not(feature = "enhanced-codec"))]
fn alternate_backend() -> &'static dyn CodecBackend {
    static FALLBACK_WARNING: std::sync::Once = std::sync::Once::new();
    FALLBACK_WARNING.call_once(|| {
        tracing::warn!("Alternate codec requested but not compiled in (feature `enhanced-codec`), using baseline");
    });
    &BASELINE
}

/// Lossless WebP rendition of a JPEG/PNG source
pub fn encode_webp_lossless(source: &[u8]) -> Result<Vec<u8>, OptimizeError> {
    let img = image::load_from_memory(source)?;
    let img = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };

    let mut out = Vec::new();
    img.write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backend() {
        assert_eq!(select_backend(false).name(), "baseline");
        let expected = if enhanced_available() { "enhanced" } else { "baseline" };
        assert_eq!(select_backend(true).name(), expected);
    }

    #[test]
    fn test_webp_lossless_keeps_pixels() {
        let source = test_images::gradient_png_rgba(16, 16);
        let webp = encode_webp_lossless(&source).unwrap();
        assert_eq!(image::guess_format(&webp).unwrap(), image::ImageFormat::WebP);

        let decoded = image::load_from_memory(&webp).unwrap().to_rgba8();
        assert_eq!(decoded, image::load_from_memory(&source).unwrap().to_rgba8());
    }

    #[test]
    fn test_tiny_gif_decodes() {
        let img = image::load_from_memory(&test_images::tiny_gif()).unwrap();
        assert_eq!((img.width(), img.height()), (1, 1));
    }
}
