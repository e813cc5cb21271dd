//! Folder/file-record archives (Oblivion through Skyrim SE)
//!
//! ```text
//! [header, 0x24 bytes]
//! [folder_count × folder record]             sorted by folder hash
//! per folder:
//!   [bzstring folder name]                   if FLAG_FOLDER_NAMES
//!   [file_count × file record]               sorted by file hash
//! [file_count × \0-terminated file name]     if FLAG_FILE_NAMES
//! [payloads]
//! ```
//!
//! A payload may be preceded by a name blob (length byte + full path) and,
//! when compressed, by its `u32` uncompressed size. Whether a file is
//! compressed is the archive default XOR the flip bit in its size field.
//!
//! Compressed payloads use zlib for versions 0x67 and 0x68 and an LZ4
//! frame for 0x69.

mod builder;
mod header;
mod reader;

pub use builder::Tes4Builder;
pub use header::{
    BSA_MAGIC, FILE_RECORD_SIZE, FLAG_COMPRESSED, FLAG_FILE_NAMES, FLAG_FOLDER_NAMES,
    FLAG_NAME_BLOBS, FLIP_COMPRESSION_BIT, FileRecord, FolderRecord, HEADER_SIZE, Tes4Header,
    Tes4Version,
};
pub use reader::{Tes4Archive, Tes4Entry, Tes4Folder};

use serde::{Deserialize, Serialize};

/// Archive-level settings needed to rebuild a TES4-family archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tes4ArchiveState {
    /// Raw header version (0x67, 0x68 or 0x69)
    pub version: u32,
    /// `FLAG_*` bits
    pub archive_flags: u32,
    /// Content-type bits copied into the header
    pub file_flags: u32,
}

impl Tes4ArchiveState {
    /// Settings for a new archive of `version` with folder and file names
    pub fn new(version: Tes4Version) -> Self {
        Self {
            version: version.as_raw(),
            archive_flags: FLAG_FOLDER_NAMES | FLAG_FILE_NAMES,
            file_flags: 0,
        }
    }

    /// Set or clear the archive-wide default compression
    #[must_use]
    pub fn with_compression(mut self, enable: bool) -> Self {
        if enable {
            self.archive_flags |= FLAG_COMPRESSED;
        } else {
            self.archive_flags &= !FLAG_COMPRESSED;
        }
        self
    }

    /// Set or clear embedded name blobs
    #[must_use]
    pub fn with_name_blobs(mut self, enable: bool) -> Self {
        if enable {
            self.archive_flags |= FLAG_NAME_BLOBS;
        } else {
            self.archive_flags &= !FLAG_NAME_BLOBS;
        }
        self
    }
}

/// Per-file settings needed to rebuild a TES4-family entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tes4FileState {
    /// Ordinal of the file in the source archive
    pub index: usize,
    /// Archive path with `\` separators
    pub path: String,
    /// Invert the archive-wide default compression for this file
    pub flip_compression: bool,
}
