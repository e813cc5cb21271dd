use super::Tes3ArchiveState;
use super::Tes3FileState;
use super::header::{HashRecord, RECORD_TABLE_STRIDE, SizeOffsetRecord, Tes3Header};
use crate::config::CodecConfig;
use crate::error::{ArchiveError, Result};
use crate::hash::tes3_hash;
use crate::io::expect_position;
use crate::staging::{StagingArena, StagingSink};
use crate::text::{TextEncoding, normalize_path, zstring_bytes};
use binrw::BinWrite;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, Write};
use tracing::{debug, info};

#[derive(Debug)]
struct PendingFile {
    index: usize,
    path: String,
    size: u64,
    sink: StagingSink,
}

/// Builder for TES3 archives
///
/// Files are written in ascending state index. `add_file` may be called
/// from several threads at once; `build` consumes the builder.
#[derive(Debug)]
pub struct Tes3Builder {
    state: Tes3ArchiveState,
    arena: StagingArena,
    size_hint: u64,
    files: Mutex<Vec<PendingFile>>,
}

impl Tes3Builder {
    /// Create an empty builder
    ///
    /// `size_hint` is the expected total payload size; it decides whether
    /// staged payloads start out in memory.
    pub fn new(state: Tes3ArchiveState, config: &CodecConfig, size_hint: u64) -> Self {
        Self {
            state,
            arena: StagingArena::new(config),
            size_hint,
            files: Mutex::new(Vec::new()),
        }
    }

    /// Stage one file
    pub fn add_file<R: Read + ?Sized>(&self, state: Tes3FileState, reader: &mut R) -> Result<()> {
        let mut sink = self.arena.allocate(self.size_hint)?;
        let size = io::copy(reader, &mut sink)?;
        let path = normalize_path(&state.path);
        debug!(index = state.index, path = %path, size, "staged TES3 file");

        self.files.lock().push(PendingFile {
            index: state.index,
            path,
            size,
            sink,
        });
        Ok(())
    }

    /// Number of staged files
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Whether no files have been staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the archive, returning the number of bytes written
    pub fn build<W: Write + Seek>(self, writer: &mut W) -> Result<u64> {
        let mut files = self.files.into_inner();
        files.sort_by_key(|f| f.index);

        let base = writer.stream_position()?;
        let file_count = u32::try_from(files.len())
            .map_err(|_| ArchiveError::overflow("file count", files.len()))?;

        let names: Vec<Vec<u8>> = files
            .iter()
            .map(|f| zstring_bytes(TextEncoding::Ascii, &f.path))
            .collect();
        let names_len: u64 = names.iter().map(|n| n.len() as u64).sum();
        let hash_offset = RECORD_TABLE_STRIDE * u64::from(file_count) + names_len;

        let header = Tes3Header {
            version: self.state.version,
            hash_offset: u32::try_from(hash_offset)
                .map_err(|_| ArchiveError::overflow("hash offset", hash_offset))?,
            file_count,
        };
        header.write(writer)?;

        let mut data_cursor = 0u64;
        for file in &files {
            SizeOffsetRecord {
                size: u32::try_from(file.size)
                    .map_err(|_| ArchiveError::overflow("file size", file.size))?,
                offset: u32::try_from(data_cursor)
                    .map_err(|_| ArchiveError::overflow("data offset", data_cursor))?,
            }
            .write(writer)?;
            data_cursor += file.size;
        }

        let mut name_cursor = 0u32;
        for name in &names {
            name_cursor.write_le(writer)?;
            name_cursor += name.len() as u32;
        }

        expect_position(writer, base + header.name_table_start(), "TES3 name table")?;
        for name in &names {
            writer.write_all(name)?;
        }

        expect_position(writer, base + header.hash_table_start(), "TES3 hash table")?;
        for file in &files {
            let (hash1, hash2) = tes3_hash(&file.path);
            HashRecord { hash1, hash2 }.write(writer)?;
        }

        expect_position(writer, base + header.data_start(), "TES3 data")?;
        for file in &mut files {
            file.sink.copy_into(writer)?;
        }

        let written = writer.stream_position()? - base;
        info!(files = file_count, bytes = written, "built TES3 archive");
        Ok(written)
    }
}
