use super::header::{
    BSA_MAGIC, FILE_RECORD_SIZE, FileRecord, FolderRecord, Tes4Header, Tes4Version,
};
use super::{Tes4ArchiveState, Tes4FileState};
use crate::compression::decompress;
use crate::config::CodecConfig;
use crate::error::{ArchiveError, Result};
use crate::hash::{bsa_file_hash, bsa_folder_hash};
use crate::io::{FileSource, StreamSource, copy_to_limit, ensure_table_fits, read_u32};
use crate::text::{normalize_path, read_bzstring, read_zstring};
use binrw::BinRead;
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A folder of a TES4-family archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tes4Folder {
    hash: u64,
    name: String,
    offset: u64,
    entries: Range<usize>,
}

impl Tes4Folder {
    /// Folder path hash
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Folder path, or the hex hash when the archive has no folder names
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored offset of the file record block (includes the file name total)
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of files in the folder
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Range of this folder's files in [`Tes4Archive::entries`]
    pub fn entry_range(&self) -> Range<usize> {
        self.entries.clone()
    }
}

/// One file of a TES4-family archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tes4Entry {
    index: usize,
    folder: usize,
    path: String,
    record: FileRecord,
    compressed: bool,
    data_start: u64,
    data_len: u64,
    original_size: u64,
}

impl Tes4Entry {
    /// Ordinal of the file across all folders
    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the owning folder in [`Tes4Archive::folders`]
    pub fn folder_index(&self) -> usize {
        self.folder
    }

    /// Full archive path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File name hash
    pub fn hash(&self) -> u64 {
        self.record.hash
    }

    /// The raw file record
    pub fn record(&self) -> FileRecord {
        self.record
    }

    /// Whether the flip bit is set
    pub fn flip_compression(&self) -> bool {
        self.record.flips_compression()
    }

    /// Effective compression of this file
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Uncompressed size in bytes
    pub fn size(&self) -> u64 {
        self.original_size
    }

    /// Stored payload size, excluding any name blob and size prefix
    pub fn packed_size(&self) -> u64 {
        self.data_len
    }

    /// Absolute offset of the payload (past any name blob and size prefix)
    pub fn data_offset(&self) -> u64 {
        self.data_start
    }

    /// Settings needed to add this file to a new builder
    pub fn state(&self) -> Tes4FileState {
        Tes4FileState {
            index: self.index,
            path: self.path.clone(),
            flip_compression: self.flip_compression(),
        }
    }
}

/// An open TES4-family archive
#[derive(Debug)]
pub struct Tes4Archive {
    source: Arc<dyn StreamSource>,
    config: CodecConfig,
    header: Tes4Header,
    version: Tes4Version,
    folders: Vec<Tes4Folder>,
    entries: Vec<Tes4Entry>,
}

fn record_too_short(stored: u64, needed: u64) -> ArchiveError {
    ArchiveError::Truncated {
        expected: needed,
        copied: stored,
    }
}

impl Tes4Archive {
    /// Open the archive file at `path`
    pub fn open_path<P: AsRef<Path>>(path: P, config: &CodecConfig) -> Result<Self> {
        Self::open(Arc::new(FileSource::new(path)), config)
    }

    /// Parse the directory of the archive behind `source`
    ///
    /// Payloads are not loaded. Compressed files have their 4-byte
    /// uncompressed size read so every entry knows its own size.
    pub fn open(source: Arc<dyn StreamSource>, config: &CodecConfig) -> Result<Self> {
        let mut stream = source.open()?;

        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if magic != BSA_MAGIC {
            return Err(ArchiveError::InvalidMagic {
                format: "BSA",
                found: magic,
            });
        }
        stream.seek(SeekFrom::Start(0))?;

        let header = Tes4Header::read(&mut stream)?;
        let version = Tes4Version::from_raw(header.version).ok_or(ArchiveError::UnsupportedVersion {
            format: "BSA",
            version: header.version,
        })?;
        let encoding = version.encoding();

        let folders_start = u64::from(header.folder_record_offset);
        let folder_count = u64::from(header.folder_count);
        ensure_table_fits(
            &mut stream,
            folders_start,
            folder_count,
            version.folder_record_size(),
        )?;
        ensure_table_fits(
            &mut stream,
            folders_start + folder_count * version.folder_record_size(),
            u64::from(header.file_count),
            FILE_RECORD_SIZE,
        )?;

        stream.seek(SeekFrom::Start(folders_start))?;
        let mut folder_records = Vec::with_capacity(header.folder_count as usize);
        for _ in 0..header.folder_count {
            folder_records.push(FolderRecord::read_le_args(&mut stream, (version,))?);
        }

        if !header.has_folder_names() || !header.has_file_names() {
            warn!(
                source = %source.describe(),
                "archive lacks stored names, using hex hashes"
            );
        }

        let mut folders = Vec::with_capacity(folder_records.len());
        let mut records = Vec::with_capacity(header.file_count as usize);
        for record in &folder_records {
            let name = if header.has_folder_names() {
                read_bzstring(&mut stream, encoding)?
            } else {
                format!("{:016x}", record.hash)
            };
            let first = records.len();
            for _ in 0..record.file_count {
                records.push((folders.len(), FileRecord::read(&mut stream)?));
            }
            folders.push(Tes4Folder {
                hash: record.hash,
                name,
                offset: record.offset,
                entries: first..records.len(),
            });
        }

        let mut names = Vec::with_capacity(records.len());
        for (_, record) in &records {
            names.push(if header.has_file_names() {
                read_zstring(&mut stream, encoding)?
            } else {
                format!("{:016x}", record.hash)
            });
        }

        let mut entries = Vec::with_capacity(records.len());
        for (index, ((folder, record), name)) in records.into_iter().zip(names).enumerate() {
            let folder_name = &folders[folder].name;
            let path = if folder_name.is_empty() {
                name
            } else {
                format!("{folder_name}\\{name}")
            };
            entries.push(Self::locate_payload(
                &mut stream,
                &header,
                index,
                folder,
                path,
                record,
            )?);
        }

        debug!(
            source = %source.describe(),
            version = header.version,
            folders = folders.len(),
            files = entries.len(),
            "opened BSA archive"
        );

        Ok(Self {
            source,
            config: config.clone(),
            header,
            version,
            folders,
            entries,
        })
    }

    /// Resolve where an entry's payload begins, skipping its name blob and
    /// reading the uncompressed size of compressed payloads
    fn locate_payload<R: Read + Seek>(
        stream: &mut R,
        header: &Tes4Header,
        index: usize,
        folder: usize,
        path: String,
        record: FileRecord,
    ) -> Result<Tes4Entry> {
        let compressed = header.compressed_by_default() != record.flips_compression();
        let mut start = u64::from(record.offset);
        let mut remaining = u64::from(record.stored_size());

        if header.has_name_blobs() {
            stream.seek(SeekFrom::Start(start))?;
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            let blob = 1 + u64::from(len[0]);
            remaining = remaining
                .checked_sub(blob)
                .ok_or_else(|| record_too_short(remaining, blob))?;
            start += blob;
        }

        let original_size = if compressed {
            stream.seek(SeekFrom::Start(start))?;
            let original = read_u32(stream)?;
            remaining = remaining
                .checked_sub(4)
                .ok_or_else(|| record_too_short(remaining, 4))?;
            start += 4;
            u64::from(original)
        } else {
            remaining
        };

        Ok(Tes4Entry {
            index,
            folder,
            path,
            record,
            compressed,
            data_start: start,
            data_len: remaining,
            original_size,
        })
    }

    /// Parsed header
    pub fn header(&self) -> &Tes4Header {
        &self.header
    }

    /// Archive version
    pub fn version(&self) -> Tes4Version {
        self.version
    }

    /// Folders in on-disk order
    pub fn folders(&self) -> &[Tes4Folder] {
        &self.folders
    }

    /// Files in on-disk order, folder by folder
    pub fn entries(&self) -> &[Tes4Entry] {
        &self.entries
    }

    /// Look up a file by path using the folder and file hashes
    pub fn find_by_path(&self, path: &str) -> Option<&Tes4Entry> {
        let path = normalize_path(path);
        let (folder, name) = path.rsplit_once('\\').unwrap_or(("", path.as_str()));
        let folder_hash = bsa_folder_hash(folder);
        let file_hash = bsa_file_hash(name);

        self.folders
            .iter()
            .filter(|f| f.hash == folder_hash)
            .flat_map(|f| &self.entries[f.entries.clone()])
            .find(|e| e.record.hash == file_hash)
    }

    /// Settings needed to rebuild this archive
    pub fn state(&self) -> Tes4ArchiveState {
        Tes4ArchiveState {
            version: self.header.version,
            archive_flags: self.header.archive_flags,
            file_flags: self.header.file_flags,
        }
    }

    /// Copy an entry's uncompressed bytes into `sink`, returning the number written
    pub fn copy_entry_data<W: Write + ?Sized>(
        &self,
        entry: &Tes4Entry,
        sink: &mut W,
    ) -> Result<u64> {
        if self.entries.get(entry.index) != Some(entry) {
            return Err(ArchiveError::ForeignEntry(entry.path.clone()));
        }

        let mut stream = self.source.open()?;
        stream.seek(SeekFrom::Start(entry.data_start))?;
        if entry.compressed {
            let mut packed = stream.take(entry.data_len);
            decompress(
                self.version.codec(),
                &mut packed,
                sink,
                entry.original_size,
                self.config.copy_buffer_size,
            )
        } else {
            copy_to_limit(&mut stream, sink, entry.data_len, self.config.copy_buffer_size)
        }
    }
}
