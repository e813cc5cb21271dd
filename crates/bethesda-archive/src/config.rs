//! Codec configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default buffer size for bounded copies (64 KiB)
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Highest zlib compression level
pub const MAX_ZLIB_LEVEL: u32 = 9;

/// Knobs shared by readers and builders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Emit `ATI2` instead of `DXT5` for BC5 textures when synthesizing DDS headers
    pub use_ati_fourcc: bool,

    /// zlib compression level used by builders (0-9)
    pub zlib_level: u32,

    /// Directory for disk-backed staging sinks (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,

    /// Sinks stay in memory until they exceed this many bytes (0 = always disk)
    pub staging_memory_threshold: usize,

    /// Buffer size for bounded copies
    pub copy_buffer_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            use_ati_fourcc: false,
            zlib_level: MAX_ZLIB_LEVEL,
            staging_dir: None,
            staging_memory_threshold: 0,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

impl CodecConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the BC5 FourCC variant
    #[must_use]
    pub const fn with_ati_fourcc(mut self, enable: bool) -> Self {
        self.use_ati_fourcc = enable;
        self
    }

    /// Set the zlib compression level, clamped to 0-9
    #[must_use]
    pub fn with_zlib_level(mut self, level: u32) -> Self {
        self.zlib_level = level.min(MAX_ZLIB_LEVEL);
        self
    }

    /// Stage builder payloads under `dir`
    #[must_use]
    pub fn with_staging_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.staging_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Keep staged payloads in memory up to `threshold` bytes
    #[must_use]
    pub const fn with_staging_memory_threshold(mut self, threshold: usize) -> Self {
        self.staging_memory_threshold = threshold;
        self
    }

    /// Set the bounded copy buffer size (at least 1 byte)
    #[must_use]
    pub fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }
}
