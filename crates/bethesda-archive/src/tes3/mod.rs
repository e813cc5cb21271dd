//! Legacy fixed-record archives (Morrowind)
//!
//! ```text
//! [header: version, hash_offset, file_count]
//! [file_count × (size u32, offset u32)]
//! [file_count × name_offset u32]
//! [names, each \0-terminated ASCII]
//! [file_count × (hash1 u32, hash2 u32)]   <- 12 + hash_offset
//! [file data]                             <- offsets are relative to here
//! ```
//!
//! The three tables are parallel and indexed by file index. Nothing is
//! compressed and there are no folders.

mod builder;
mod header;
mod reader;

pub use builder::Tes3Builder;
pub use header::{
    HASH_RECORD_SIZE, HEADER_SIZE, HashRecord, RECORD_TABLE_STRIDE, SizeOffsetRecord, TES3_MAGIC,
    TES3_VERSION, Tes3Header,
};
pub use reader::{Tes3Archive, Tes3Entry};

use serde::{Deserialize, Serialize};

/// Archive-level settings needed to rebuild a TES3 archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tes3ArchiveState {
    /// Header version, normally [`TES3_VERSION`]
    pub version: u32,
}

impl Default for Tes3ArchiveState {
    fn default() -> Self {
        Self {
            version: TES3_VERSION,
        }
    }
}

/// Per-file settings needed to rebuild a TES3 entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tes3FileState {
    /// Position of the file in the record tables
    pub index: usize,
    /// Archive path with `\` separators
    pub path: String,
}
