//! TagIO - an audio metadata library written in Rust
//!
//! TagIO reads and writes embedded audio metadata ("tags") across
//! heterogeneous container formats through one format-neutral tag model,
//! rewriting files in place without touching the audio payload where the
//! format allows it.
//!
//! # Architecture
//!
//! - `tag`: the format-neutral tag document and the zone/anchor machinery
//!   that tracks which byte ranges a codec owns during a rewrite
//! - `format`: one codec per container format (FLAC, Ogg Vorbis, MPEG
//!   audio with ID3v1/ID3v2/APEv2, SPC700), plus the shared Vorbis Comment
//!   and FLAC picture services
//! - `manager`: path-level probing and the read / update / remove cycle
//! - `util`: byte-level codecs and the file splice primitives

pub mod error;
pub mod format;
pub mod manager;
pub mod tag;
pub mod util;

pub use error::{Error, Result};
pub use manager::{open, AudioFile, ReadOptions};
pub use tag::{
    AdditionalField, Chapter, FieldValue, PictureData, PictureType, TagData, TagField, TagKind,
};
pub use util::TextEncoding;

/// TagIO version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Tunable behaviors threaded through read and write calls
///
/// There is no process-wide state: callers hold a `Settings` value and pass
/// it at call boundaries.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Absorb tag size changes into padding regions instead of splicing
    /// the audio payload
    pub enable_padding: bool,
    /// Encoding used where a format offers a choice and latin-1 does not
    /// preserve the text (ID3v2)
    pub default_text_encoding: TextEncoding,
    /// ID3v2 version written when the file does not already carry 2.3/2.4
    pub id3v2_version: u8,
    /// Treat an all-zero SPC date field as a binary-mode tag
    pub spc_prefer_binary_date: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enable_padding: true,
            default_text_encoding: TextEncoding::Utf16,
            id3v2_version: 3,
            spc_prefer_binary_date: true,
        }
    }
}

/// Configuration for the TagIO library
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the TagIO library with the given configuration
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(level).init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION_MAJOR, 0);
        assert_eq!(VERSION_MINOR, 1);
        assert_eq!(VERSION_PATCH, 0);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enable_padding);
        assert_eq!(settings.id3v2_version, 3);
        assert_eq!(settings.default_text_encoding, TextEncoding::Utf16);
        assert!(settings.spc_prefer_binary_date);
    }
}
