use super::header::{
    HASH_RECORD_SIZE, HEADER_SIZE, HashRecord, RECORD_TABLE_STRIDE, SizeOffsetRecord, TES3_MAGIC,
    Tes3Header,
};
use super::{Tes3ArchiveState, Tes3FileState};
use crate::config::CodecConfig;
use crate::error::{ArchiveError, Result};
use crate::io::{FileSource, StreamSource, copy_to_limit, ensure_table_fits};
use crate::text::{TextEncoding, normalize_path, read_zstring};
use binrw::BinRead;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One file in a TES3 archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tes3Entry {
    index: usize,
    path: String,
    size: u32,
    offset: u32,
    name_offset: u32,
    hash: HashRecord,
}

impl Tes3Entry {
    /// Position in the record tables
    pub fn index(&self) -> usize {
        self.index
    }

    /// Archive path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Payload size in bytes
    pub fn size(&self) -> u64 {
        u64::from(self.size)
    }

    /// Offset relative to the start of the data section
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Offset of the name relative to the name table
    pub fn name_offset(&self) -> u32 {
        self.name_offset
    }

    /// Stored hash pair
    pub fn hash(&self) -> HashRecord {
        self.hash
    }

    /// Settings needed to add this file to a new builder
    pub fn state(&self) -> Tes3FileState {
        Tes3FileState {
            index: self.index,
            path: self.path.clone(),
        }
    }
}

/// An open TES3 archive
#[derive(Debug)]
pub struct Tes3Archive {
    source: Arc<dyn StreamSource>,
    config: CodecConfig,
    header: Tes3Header,
    entries: Vec<Tes3Entry>,
}

impl Tes3Archive {
    /// Open the archive file at `path`
    pub fn open_path<P: AsRef<Path>>(path: P, config: &CodecConfig) -> Result<Self> {
        Self::open(Arc::new(FileSource::new(path)), config)
    }

    /// Parse the directory of the archive behind `source`
    pub fn open(source: Arc<dyn StreamSource>, config: &CodecConfig) -> Result<Self> {
        let mut stream = source.open()?;
        let (header, entries) = Self::read_directory(&mut stream)?;
        debug!(
            source = %source.describe(),
            files = header.file_count,
            "opened TES3 archive"
        );
        Ok(Self {
            source,
            config: config.clone(),
            header,
            entries,
        })
    }

    fn read_directory<R: Read + Seek>(stream: &mut R) -> Result<(Tes3Header, Vec<Tes3Entry>)> {
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if magic != TES3_MAGIC {
            return Err(ArchiveError::InvalidMagic {
                format: "TES3",
                found: magic,
            });
        }
        stream.seek(SeekFrom::Start(0))?;

        let header = Tes3Header::read(stream)?;

        // record, name offset and hash per file
        ensure_table_fits(
            stream,
            HEADER_SIZE,
            u64::from(header.file_count),
            RECORD_TABLE_STRIDE + HASH_RECORD_SIZE,
        )?;
        let count = header.file_count as usize;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(SizeOffsetRecord::read(stream)?);
        }
        let mut name_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            name_offsets.push(u32::read_le(stream)?);
        }

        let names_start = header.name_table_start();
        let mut paths = Vec::with_capacity(count);
        for &name_offset in &name_offsets {
            stream.seek(SeekFrom::Start(names_start + u64::from(name_offset)))?;
            paths.push(read_zstring(stream, TextEncoding::Ascii)?);
        }

        stream.seek(SeekFrom::Start(header.hash_table_start()))?;
        let mut entries = Vec::with_capacity(count);
        for (index, ((record, name_offset), path)) in
            records.into_iter().zip(name_offsets).zip(paths).enumerate()
        {
            entries.push(Tes3Entry {
                index,
                path,
                size: record.size,
                offset: record.offset,
                name_offset,
                hash: HashRecord::read(stream)?,
            });
        }

        Ok((header, entries))
    }

    /// Parsed header
    pub fn header(&self) -> &Tes3Header {
        &self.header
    }

    /// Absolute start of the data section
    pub fn data_offset(&self) -> u64 {
        self.header.data_start()
    }

    /// All files in table order
    pub fn entries(&self) -> &[Tes3Entry] {
        &self.entries
    }

    /// Look up a file by path, ignoring case and separator style
    pub fn find_by_path(&self, path: &str) -> Option<&Tes3Entry> {
        let wanted = normalize_path(path).to_lowercase();
        self.entries
            .iter()
            .find(|e| normalize_path(&e.path).to_lowercase() == wanted)
    }

    /// Settings needed to rebuild this archive
    pub fn state(&self) -> Tes3ArchiveState {
        Tes3ArchiveState {
            version: self.header.version,
        }
    }

    /// Copy an entry's bytes into `sink`, returning the number written
    pub fn copy_entry_data<W: Write + ?Sized>(
        &self,
        entry: &Tes3Entry,
        sink: &mut W,
    ) -> Result<u64> {
        if self.entries.get(entry.index) != Some(entry) {
            return Err(ArchiveError::ForeignEntry(entry.path.clone()));
        }
        let mut stream = self.source.open()?;
        stream.seek(SeekFrom::Start(self.data_offset() + u64::from(entry.offset)))?;
        copy_to_limit(&mut stream, sink, entry.size(), self.config.copy_buffer_size)
    }
}
