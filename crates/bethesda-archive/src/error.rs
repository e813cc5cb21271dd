//! Error types for archive reading and building

use thiserror::Error;

/// Archive operation result type
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors raised while opening, extracting from, or building an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The leading magic did not match the format being opened
    #[error("invalid {format} magic: got {found:02X?}")]
    InvalidMagic {
        /// Format that was expected
        format: &'static str,
        /// Bytes actually found at the start of the stream
        found: [u8; 4],
    },

    /// The signature matches none of the supported archive formats
    #[error("not a recognized archive: signature {0:02X?}")]
    UnrecognizedArchive([u8; 4]),

    /// BA2 sub-type token that does not name an entry kind
    #[error("unknown BA2 entry kind: {0:?}")]
    UnknownEntryKind(String),

    /// BA2 entry kind that is known but has no reader or writer
    #[error("unsupported BA2 entry kind: {0}")]
    UnsupportedEntryKind(String),

    /// Header version outside the set this codec understands
    #[error("unsupported {format} version: 0x{version:X}")]
    UnsupportedVersion {
        /// Format whose version field was rejected
        format: &'static str,
        /// Version value found in the header
        version: u32,
    },

    /// A bounded copy ran out of source bytes before its declared length
    #[error("truncated source: expected {expected} bytes, copied {copied}")]
    Truncated {
        /// Declared length of the copy
        expected: u64,
        /// Bytes copied before the source ran dry
        copied: u64,
    },

    /// Builder cursor disagrees with the analytically computed layout
    #[error("layout violation in {stage}: expected position {expected}, at {actual}")]
    LayoutViolation {
        /// Build stage that detected the mismatch
        stage: &'static str,
        /// Position the layout arithmetic predicted
        expected: u64,
        /// Actual writer position
        actual: u64,
    },

    /// A build pass finished with an offset placeholder never patched
    #[error("offset placeholder at {position} was never patched ({owner})")]
    UnpatchedOffset {
        /// Stream position of the placeholder
        position: u64,
        /// Entry that owns the placeholder
        owner: String,
    },

    /// DDS synthesis was asked for a pixel format it cannot describe
    #[error("unsupported DDS pixel format {format} for {path}")]
    UnsupportedPixelFormat {
        /// Raw DXGI format value
        format: u8,
        /// Path of the texture entry
        path: String,
    },

    /// A state descriptor does not match the builder or archive it was given to
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A value does not fit the on-disk field that must hold it
    #[error("{field} overflow: {value} does not fit")]
    FieldOverflow {
        /// Name of the on-disk field
        field: &'static str,
        /// Value that was too large
        value: u64,
    },

    /// Compression failed
    #[error("compression failed: {0}")]
    Compression(String),

    /// Decompression failed
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// A string is too long for its length prefix
    #[error("string of {len} bytes exceeds {max}-byte length prefix: {value}")]
    StringTooLong {
        /// Encoded length
        len: usize,
        /// Largest length the prefix can express
        max: usize,
        /// The offending string
        value: String,
    },

    /// Entry handed to a reader that did not produce it
    #[error("entry does not belong to this archive: {0}")]
    ForeignEntry(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary read/write error
    #[error("binary format error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl ArchiveError {
    /// Check if the error was caused by bad input bytes rather than a bug
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. }
                | Self::UnrecognizedArchive(_)
                | Self::UnknownEntryKind(_)
                | Self::UnsupportedVersion { .. }
                | Self::Truncated { .. }
                | Self::Decompression(_)
                | Self::BinRw(_)
        )
    }

    /// Check if the error signals a builder layout bug
    pub fn is_layout_violation(&self) -> bool {
        matches!(
            self,
            Self::LayoutViolation { .. } | Self::UnpatchedOffset { .. }
        )
    }

    pub(crate) fn overflow(field: &'static str, value: impl TryInto<u64>) -> Self {
        Self::FieldOverflow {
            field,
            value: value.try_into().unwrap_or(u64::MAX),
        }
    }
}
