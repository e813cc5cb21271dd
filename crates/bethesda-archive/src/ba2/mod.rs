//! General/texture archives (Fallout 4, Skyrim VR, Starfield)
//!
//! ```text
//! [header, 24/32/36 bytes by version]
//! [file_count × record]                 GNRL: 36 bytes each
//!                                       DX10: 24 bytes + chunk_count × 24
//! [payloads]                            one per GNRL record, one per chunk
//! [name table]                          u16 length + UTF-8 path per record
//! ```
//!
//! Texture payloads omit the DDS header; readers synthesize it from the
//! record and builders strip it from the input. Compressed payloads use
//! zlib, or LZ4 block when a version 3 archive selects it.

mod builder;
mod header;
mod reader;

pub use builder::Ba2Builder;
pub use header::{
    BA2_MAGIC, Ba2EntryKind, Ba2Header, COMPRESSION_LZ4, GENERAL_OFFSET_FIELD, GENERAL_RECORD_SIZE,
    GeneralRecord, NAME_TABLE_OFFSET_FIELD, SUPPORTED_VERSIONS, TEXTURE_CHUNK_SIZE,
    TEXTURE_RECORD_SIZE, TextureChunk, TextureRecord, extension_bytes, extension_str,
    has_extended_header,
};
pub use reader::{Ba2Archive, Ba2Entry, Ba2Record};

use serde::{Deserialize, Serialize};

/// Archive-level settings needed to rebuild a BA2 archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ba2ArchiveState {
    /// Header version
    pub version: u32,
    /// Kind of every entry
    pub entry_kind: Ba2EntryKind,
    /// Write a name table after the payloads
    pub has_name_table: bool,
    /// Extended header word, versions 2 and 3
    #[serde(default)]
    pub unknown1: u32,
    /// Extended header word, versions 2 and 3
    #[serde(default)]
    pub unknown2: u32,
    /// Compression selector, version 3
    #[serde(default)]
    pub compression: u32,
}

impl Ba2ArchiveState {
    /// Settings for a new archive with a name table
    pub fn new(version: u32, entry_kind: Ba2EntryKind) -> Self {
        Self {
            version,
            entry_kind,
            has_name_table: true,
            unknown1: 0,
            unknown2: 0,
            compression: 0,
        }
    }

    /// Select the version 3 compression codec
    #[must_use]
    pub fn with_compression(mut self, compression: u32) -> Self {
        self.compression = compression;
        self
    }
}

/// Per-file settings of a general entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ba2GeneralFileState {
    /// Position of the record in the archive
    pub index: usize,
    /// Archive path
    pub path: String,
    /// Hash of the file name stem
    pub name_hash: u32,
    /// Extension without the dot
    pub extension: String,
    /// Hash of the directory
    pub dir_hash: u32,
    /// Opaque record flags
    pub flags: u32,
    /// Alignment marker
    pub align: u32,
    /// Compress the payload
    pub compressed: bool,
}

/// Per-chunk settings of a texture entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ba2ChunkState {
    /// Uncompressed size of the chunk
    pub unpacked_size: u32,
    /// First mip level
    pub start_mip: u16,
    /// Last mip level
    pub end_mip: u16,
    /// Alignment marker
    pub align: u32,
    /// Compress the chunk
    pub compressed: bool,
}

/// Per-file settings of a texture entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ba2TextureFileState {
    /// Position of the record in the archive
    pub index: usize,
    /// Archive path
    pub path: String,
    /// Hash of the file name stem
    pub name_hash: u32,
    /// Extension without the dot
    pub extension: String,
    /// Hash of the directory
    pub dir_hash: u32,
    /// Unknown record byte
    #[serde(default)]
    pub unknown: u8,
    /// Size of each chunk record
    pub chunk_header_len: u16,
    /// Height in pixels
    pub height: u16,
    /// Width in pixels
    pub width: u16,
    /// Number of mip levels
    pub mip_count: u8,
    /// Raw DXGI format
    pub pixel_format: u8,
    /// Cubemap marker
    #[serde(default)]
    pub is_cubemap: u8,
    /// Tile mode
    #[serde(default)]
    pub tile_mode: u8,
    /// Chunks in on-disk order
    pub chunks: Vec<Ba2ChunkState>,
}

/// Per-file settings of a BA2 entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Ba2FileState {
    /// A general entry
    General(Ba2GeneralFileState),
    /// A texture entry
    Texture(Ba2TextureFileState),
}

impl Ba2FileState {
    /// Position of the record in the archive
    pub fn index(&self) -> usize {
        match self {
            Self::General(s) => s.index,
            Self::Texture(s) => s.index,
        }
    }

    /// Archive path
    pub fn path(&self) -> &str {
        match self {
            Self::General(s) => &s.path,
            Self::Texture(s) => &s.path,
        }
    }

    /// Entry kind this state describes
    pub fn entry_kind(&self) -> Ba2EntryKind {
        match self {
            Self::General(_) => Ba2EntryKind::General,
            Self::Texture(_) => Ba2EntryKind::Texture,
        }
    }
}
