//! # Optimization Policy Module
//!
//! Questo modulo definisce la policy immutabile passata ad ogni chiamata del core.
//!
//! ## Livelli:
//!
//! | Formato | Low | Balanced | High |
//! |---------|-----|----------|------|
//! | JPEG quality (0-100) | 90 | 82 | 75 |
//! | PNG compression (0-9) | 3 | 6 | 9 |
//! | GIF | pass-through | pass-through | pass-through |
//!
//! Un livello sconosciuto (es. da un file di config scritto a mano) viene
//! normalizzato a `Balanced`, mai propagato come errore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Coarse quality/compression preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OptimizationLevel {
    Low,
    #[default]
    Balanced,
    High,
}

impl OptimizationLevel {
    /// Parse a level, falling back to `Balanced` for anything unrecognised
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "balanced" => Self::Balanced,
            "high" => Self::High,
            other => {
                warn!("Unknown optimization level '{}', using balanced", other);
                Self::Balanced
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Balanced => "balanced",
            Self::High => "high",
        }
    }

    /// JPEG encoder quality for this level
    pub fn jpeg_quality(self) -> u8 {
        match self {
            Self::Low => 90,
            Self::Balanced => 82,
            Self::High => 75,
        }
    }

    /// PNG compression level (0-9) for this level
    pub fn png_compression(self) -> u8 {
        match self {
            Self::Low => 3,
            Self::Balanced => 6,
            Self::High => 9,
        }
    }
}

impl From<String> for OptimizationLevel {
    fn from(value: String) -> Self {
        Self::parse_lossy(&value)
    }
}

impl From<OptimizationLevel> for String {
    fn from(level: OptimizationLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy applied to a single optimize call or a whole batch page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationPolicy {
    pub level: OptimizationLevel,
    /// Keep EXIF/ICC/comments in the re-encoded file
    pub preserve_metadata: bool,
    /// Prefer the full-featured codec back-end when compiled in
    pub use_alternate_codec: bool,
    /// Snapshot the original into the backup store before rewriting
    pub backup_original: bool,
}

impl Default for OptimizationPolicy {
    fn default() -> Self {
        Self {
            level: OptimizationLevel::Balanced,
            preserve_metadata: false,
            use_alternate_codec: false,
            backup_original: true,
        }
    }
}

impl OptimizationPolicy {
    pub fn with_level(level: OptimizationLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parameters() {
        assert_eq!(OptimizationLevel::Low.jpeg_quality(), 90);
        assert_eq!(OptimizationLevel::Balanced.jpeg_quality(), 82);
        assert_eq!(OptimizationLevel::High.jpeg_quality(), 75);

        assert_eq!(OptimizationLevel::Low.png_compression(), 3);
        assert_eq!(OptimizationLevel::Balanced.png_compression(), 6);
        assert_eq!(OptimizationLevel::High.png_compression(), 9);
    }

    #[test]
    fn test_unknown_level_normalizes_to_balanced() {
        assert_eq!(OptimizationLevel::parse_lossy("HIGH"), OptimizationLevel::High);
        assert_eq!(OptimizationLevel::parse_lossy(" low "), OptimizationLevel::Low);
        assert_eq!(OptimizationLevel::parse_lossy("ultra"), OptimizationLevel::Balanced);
        assert_eq!(OptimizationLevel::parse_lossy(""), OptimizationLevel::Balanced);
    }

    #[test]
    fn test_policy_serde_with_unknown_level() {
        let json = r#"{"level":"extreme","preserve_metadata":true,"use_alternate_codec":false,"backup_original":false}"#;
        let policy: OptimizationPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.level, OptimizationLevel::Balanced);
        assert!(policy.preserve_metadata);

        let out = serde_json::to_string(&OptimizationPolicy::with_level(OptimizationLevel::High)).unwrap();
        assert!(out.contains(r#""level":"high""#));
    }
}
