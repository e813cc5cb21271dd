use super::header::{
    FILE_RECORD_SIZE, FLIP_COMPRESSION_BIT, FolderRecord, HEADER_SIZE, Tes4Header, Tes4Version,
};
use super::{Tes4ArchiveState, Tes4FileState};
use crate::compression::compress;
use crate::config::CodecConfig;
use crate::error::{ArchiveError, Result};
use crate::hash::{bsa_file_hash, bsa_folder_hash};
use crate::io::{OffsetWidth, PendingOffsetField, ensure_patched, expect_position};
use crate::staging::{StagingArena, StagingSink};
use crate::text::{bstring_bytes, bzstring_bytes, normalize_path, zstring_bytes};
use binrw::BinWrite;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, Write};
use tracing::{debug, info};

#[derive(Debug)]
struct PendingFile {
    index: usize,
    path: String,
    folder: String,
    name: String,
    hash: u64,
    flip: bool,
    compressed: bool,
    original_size: u64,
    staged_size: u64,
    sink: StagingSink,
    offset_field: Option<PendingOffsetField>,
}

#[derive(Debug)]
struct FolderPlan {
    hash: u64,
    name: String,
    files: Vec<PendingFile>,
}

/// Builder for TES4-family archives
///
/// Payloads are compressed as they are added, so `add_file` calls from
/// different threads run their compression in parallel. Folder and file
/// order is derived from hashes at build time, never from the order files
/// were added in.
#[derive(Debug)]
pub struct Tes4Builder {
    state: Tes4ArchiveState,
    version: Tes4Version,
    zlib_level: u32,
    arena: StagingArena,
    size_hint: u64,
    files: Mutex<Vec<PendingFile>>,
}

impl Tes4Builder {
    /// Create an empty builder
    pub fn new(state: Tes4ArchiveState, config: &CodecConfig, size_hint: u64) -> Result<Self> {
        let version = Tes4Version::from_raw(state.version).ok_or(ArchiveError::UnsupportedVersion {
            format: "BSA",
            version: state.version,
        })?;
        Ok(Self {
            state,
            version,
            zlib_level: config.zlib_level,
            arena: StagingArena::new(config),
            size_hint,
            files: Mutex::new(Vec::new()),
        })
    }

    fn header_template(&self) -> Tes4Header {
        Tes4Header {
            version: self.state.version,
            folder_record_offset: HEADER_SIZE,
            archive_flags: self.state.archive_flags,
            folder_count: 0,
            file_count: 0,
            total_folder_name_length: 0,
            total_file_name_length: 0,
            file_flags: self.state.file_flags,
        }
    }

    /// Stage one file, compressing it if its effective compression is on
    pub fn add_file<R: Read + ?Sized>(&self, state: Tes4FileState, reader: &mut R) -> Result<()> {
        let compressed = self.header_template().compressed_by_default() != state.flip_compression;
        let path = normalize_path(&state.path);
        let (folder, name) = match path.rsplit_once('\\') {
            Some((folder, name)) => (folder.to_string(), name.to_string()),
            None => (String::new(), path.clone()),
        };

        let mut sink = self.arena.allocate(self.size_hint)?;
        let original_size = if compressed {
            compress(self.version.codec(), reader, &mut sink, self.zlib_level)?
        } else {
            io::copy(reader, &mut sink)?
        };
        let staged_size = sink.written_len()?;
        debug!(path = %path, original_size, staged_size, compressed, "staged BSA file");

        self.files.lock().push(PendingFile {
            index: state.index,
            hash: bsa_file_hash(&name),
            path,
            folder,
            name,
            flip: state.flip_compression,
            compressed,
            original_size,
            staged_size,
            sink,
            offset_field: None,
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

    /// Group files by folder (case-insensitively) and sort everything by hash
    ///
    /// A folder keeps the spelling of its lowest-index file.
    fn plan_folders(mut files: Vec<PendingFile>) -> Vec<FolderPlan> {
        files.sort_by_key(|f| f.index);
        let mut grouped: BTreeMap<String, FolderPlan> = BTreeMap::new();
        for file in files {
            grouped
                .entry(file.folder.to_lowercase())
                .or_insert_with(|| FolderPlan {
                    hash: bsa_folder_hash(&file.folder),
                    name: file.folder.clone(),
                    files: Vec::new(),
                })
                .files
                .push(file);
        }

        let mut folders: Vec<FolderPlan> = grouped.into_values().collect();
        for folder in &mut folders {
            folder.files.sort_by_key(|f| f.hash);
        }
        folders.sort_by_key(|f| f.hash);
        folders
    }

    /// Write the archive, returning the number of bytes written
    pub fn build<W: Write + Seek>(self, writer: &mut W) -> Result<u64> {
        let mut header = self.header_template();
        let version = self.version;
        let encoding = version.encoding();
        let folder_names = header.has_folder_names();
        let file_names = header.has_file_names();
        let name_blobs = header.has_name_blobs();

        let mut folders = Self::plan_folders(self.files.into_inner());
        let file_count: usize = folders.iter().map(|f| f.files.len()).sum();

        let folder_name_bytes: Vec<Vec<u8>> = folders
            .iter()
            .map(|f| bzstring_bytes(encoding, &f.name))
            .collect::<Result<_>>()?;
        let file_name_bytes: Vec<Vec<u8>> = folders
            .iter()
            .flat_map(|f| &f.files)
            .map(|f| zstring_bytes(encoding, &f.name))
            .collect();

        let total_folder_name_length: u64 = if folder_names {
            folder_name_bytes.iter().map(|n| n.len() as u64 - 1).sum()
        } else {
            0
        };
        let total_file_name_length: u64 = if file_names {
            file_name_bytes.iter().map(|n| n.len() as u64).sum()
        } else {
            0
        };

        header.folder_count = u32::try_from(folders.len())
            .map_err(|_| ArchiveError::overflow("folder count", folders.len()))?;
        header.file_count = u32::try_from(file_count)
            .map_err(|_| ArchiveError::overflow("file count", file_count))?;
        header.total_folder_name_length = u32::try_from(total_folder_name_length)
            .map_err(|_| ArchiveError::overflow("folder name length", total_folder_name_length))?;
        header.total_file_name_length = u32::try_from(total_file_name_length)
            .map_err(|_| ArchiveError::overflow("file name length", total_file_name_length))?;

        // Block sizes are known before anything is written, so folder
        // offsets are computed in closed form.
        let block_sizes: Vec<u64> = folders
            .iter()
            .zip(&folder_name_bytes)
            .map(|(f, name)| {
                let name_len = if folder_names { name.len() as u64 } else { 0 };
                name_len + FILE_RECORD_SIZE * f.files.len() as u64
            })
            .collect();

        let base = writer.stream_position()?;
        let records_start = base + u64::from(HEADER_SIZE);
        let blocks_start = records_start + version.folder_record_size() * folders.len() as u64;
        let names_start = blocks_start + block_sizes.iter().sum::<u64>();
        let data_start = names_start + total_file_name_length;

        info!(
            version = header.version,
            folders = folders.len(),
            files = file_count,
            "building BSA archive"
        );

        header.write(writer)?;

        let mut preceding_blocks = 0u64;
        for (folder, block_size) in folders.iter().zip(&block_sizes) {
            let record = FolderRecord {
                hash: folder.hash,
                file_count: u32::try_from(folder.files.len())
                    .map_err(|_| ArchiveError::overflow("folder file count", folder.files.len()))?,
                reserved: 0,
                offset: blocks_start + preceding_blocks + total_file_name_length - base,
            };
            record
                .write_le_args(writer, (version,))
                .map_err(|e| match e {
                    binrw::Error::AssertFail { .. } => {
                        ArchiveError::overflow("folder offset", record.offset)
                    }
                    other => other.into(),
                })?;
            preceding_blocks += block_size;
        }

        expect_position(writer, blocks_start, "BSA file record blocks")?;
        for (folder, name) in folders.iter_mut().zip(&folder_name_bytes) {
            if folder_names {
                writer.write_all(name)?;
            }
            for file in &mut folder.files {
                let blob_len = if name_blobs {
                    bstring_bytes(encoding, &file.path)?.len() as u64
                } else {
                    0
                };
                let prefix_len = if file.compressed { 4 } else { 0 };
                let stored = file.staged_size + blob_len + prefix_len;
                let stored = u32::try_from(stored)
                    .ok()
                    .filter(|s| s & FLIP_COMPRESSION_BIT == 0)
                    .ok_or_else(|| ArchiveError::overflow("file size", stored))?;

                file.hash.write_le(writer)?;
                let size = if file.flip { stored | FLIP_COMPRESSION_BIT } else { stored };
                size.write_le(writer)?;
                file.offset_field = Some(PendingOffsetField::reserve(writer, OffsetWidth::U32)?);
            }
        }

        expect_position(writer, names_start, "BSA file names")?;
        if file_names {
            for name in &file_name_bytes {
                writer.write_all(name)?;
            }
        }

        expect_position(writer, data_start, "BSA data")?;
        for folder in &mut folders {
            for file in &mut folder.files {
                if let Some(field) = file.offset_field.take() {
                    let here = writer.stream_position()?;
                    field.patch(writer, here - base)?;
                }
                if name_blobs {
                    writer.write_all(&bstring_bytes(encoding, &file.path)?)?;
                }
                if file.compressed {
                    let original = u32::try_from(file.original_size)
                        .map_err(|_| ArchiveError::overflow("original size", file.original_size))?;
                    original.write_le(writer)?;
                }
                file.sink.copy_into(writer)?;
            }
        }

        for file in folders.iter().flat_map(|f| &f.files) {
            ensure_patched(file.offset_field.as_ref(), &file.path)?;
        }

        let written = writer.stream_position()? - base;
        info!(bytes = written, "built BSA archive");
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::super::{FLAG_NAME_BLOBS, Tes4Archive, Tes4Entry};
    use super::*;
    use crate::io::MemorySource;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Arc;

    fn build(state: Tes4ArchiveState, files: &[(&str, bool, &[u8])]) -> Vec<u8> {
        let builder = Tes4Builder::new(state, &CodecConfig::default(), 0).unwrap();
        for (index, (path, flip, data)) in files.iter().enumerate() {
            builder
                .add_file(
                    Tes4FileState {
                        index,
                        path: (*path).to_string(),
                        flip_compression: *flip,
                    },
                    &mut &data[..],
                )
                .unwrap();
        }
        let mut out = Cursor::new(Vec::new());
        builder.build(&mut out).unwrap();
        out.into_inner()
    }

    fn open(bytes: Vec<u8>) -> Tes4Archive {
        Tes4Archive::open(Arc::new(MemorySource::new(bytes)), &CodecConfig::default()).unwrap()
    }

    fn contents(archive: &Tes4Archive, entry: &Tes4Entry) -> Vec<u8> {
        let mut out = Vec::new();
        let n = archive.copy_entry_data(entry, &mut out).unwrap();
        assert_eq!(n, out.len() as u64);
        out
    }

    #[test]
    fn test_round_trip_every_version() {
        let zeros = vec![0u8; 4096];
        for version in [Tes4Version::Tes4, Tes4Version::Fo3, Tes4Version::Sse] {
            let state = Tes4ArchiveState::new(version).with_compression(true);
            let archive = open(build(
                state,
                &[
                    ("meshes\\a.nif", false, zeros.as_slice()),
                    ("meshes\\b.nif", true, b"plain bytes".as_slice()),
                    ("textures\\c.dds", false, b"".as_slice()),
                ],
            ));
            assert_eq!(archive.version(), version);
            assert_eq!(archive.state(), state);
            assert_eq!(archive.entries().len(), 3);

            let a = archive.find_by_path("meshes/A.NIF").unwrap();
            assert!(a.is_compressed());
            assert_eq!(a.size(), 4096);
            assert!(a.packed_size() < 4096);
            assert_eq!(contents(&archive, a), zeros);

            let b = archive.find_by_path("meshes\\b.nif").unwrap();
            assert!(b.flip_compression());
            assert!(!b.is_compressed());
            assert_eq!(contents(&archive, b), b"plain bytes");

            let c = archive.find_by_path("textures\\c.dds").unwrap();
            assert_eq!(c.size(), 0);
            assert!(contents(&archive, c).is_empty());
        }
    }

    #[test]
    fn test_folders_and_files_sorted_by_hash() {
        let archive = open(build(
            Tes4ArchiveState::new(Tes4Version::Fo3),
            &[
                ("textures\\z.dds", false, b"1".as_slice()),
                ("meshes\\y.nif", false, b"2".as_slice()),
                ("meshes\\x.nif", false, b"3".as_slice()),
                ("sound\\w.wav", false, b"4".as_slice()),
            ],
        ));
        let folder_hashes: Vec<u64> = archive.folders().iter().map(|f| f.hash()).collect();
        assert!(folder_hashes.windows(2).all(|w| w[0] < w[1]));

        for folder in archive.folders() {
            let hashes: Vec<u64> = archive.entries()[folder.entry_range()]
                .iter()
                .map(Tes4Entry::hash)
                .collect();
            assert!(hashes.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(folder.hash(), bsa_folder_hash(folder.name()));
        }
    }

    #[test]
    fn test_folder_case_kept_from_first_file() {
        let archive = open(build(
            Tes4ArchiveState::new(Tes4Version::Sse),
            &[
                ("Meshes\\a.nif", false, b"a".as_slice()),
                ("MESHES\\b.nif", false, b"b".as_slice()),
            ],
        ));
        assert_eq!(archive.folders().len(), 1);
        assert_eq!(archive.folders()[0].name(), "Meshes");
        assert_eq!(archive.folders()[0].file_count(), 2);
    }

    #[test]
    fn test_name_blobs() {
        let state = Tes4ArchiveState::new(Tes4Version::Fo3)
            .with_compression(true)
            .with_name_blobs(true);
        let archive = open(build(
            state,
            &[
                ("sound\\voice.wav", false, b"compressed voice".as_slice()),
                ("sound\\raw.wav", true, b"raw".as_slice()),
            ],
        ));
        assert!(archive.header().has_name_blobs());

        let raw = archive.find_by_path("sound\\raw.wav").unwrap();
        // length byte + "sound\raw.wav" + payload
        assert_eq!(raw.record().stored_size(), 1 + 13 + 3);
        assert_eq!(contents(&archive, raw), b"raw");

        let voice = archive.find_by_path("sound\\voice.wav").unwrap();
        assert_eq!(contents(&archive, voice), b"compressed voice");
    }

    #[test]
    fn test_root_files_use_empty_folder() {
        let archive = open(build(
            Tes4ArchiveState::new(Tes4Version::Tes4),
            &[("readme.txt", false, b"hello".as_slice())],
        ));
        assert_eq!(archive.folders()[0].hash(), 0);
        assert_eq!(archive.entries()[0].path(), "readme.txt");
        assert_eq!(archive.entries()[0].hash(), 0xC7ED_DCEA_7206_6D65);
    }

    #[test]
    fn test_header_totals() {
        let bytes = build(
            Tes4ArchiveState::new(Tes4Version::Sse),
            &[("ab\\c.d", false, b"x".as_slice())],
        );
        let archive = open(bytes);
        let header = archive.header();
        assert_eq!(header.folder_count, 1);
        assert_eq!(header.file_count, 1);
        assert_eq!(header.total_folder_name_length, 3);
        assert_eq!(header.total_file_name_length, 4);
        // folder offset points past the file name block
        let record_block = u64::from(HEADER_SIZE) + 24;
        assert_eq!(archive.folders()[0].offset(), record_block + 4);
    }

    #[test]
    fn test_unknown_version() {
        let state = Tes4ArchiveState {
            version: 0x70,
            archive_flags: 0,
            file_flags: 0,
        };
        let err = Tes4Builder::new(state, &CodecConfig::default(), 0).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedVersion { version: 0x70, .. }));

        let mut bytes = build(Tes4ArchiveState::new(Tes4Version::Fo3), &[]);
        bytes[4] = 0x70;
        let err = Tes4Archive::open(Arc::new(MemorySource::new(bytes)), &CodecConfig::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedVersion { version: 0x70, .. }));
    }

    #[test]
    fn test_wrong_magic() {
        let err = Tes4Archive::open(
            Arc::new(MemorySource::new(b"BTDX\x01\0\0\0GNRL\0\0\0\0".to_vec())),
            &CodecConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidMagic { format: "BSA", .. }));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_foreign_entry_rejected() {
        let one = open(build(
            Tes4ArchiveState::new(Tes4Version::Fo3),
            &[("a\\one.txt", false, b"1".as_slice())],
        ));
        let two = open(build(
            Tes4ArchiveState::new(Tes4Version::Fo3),
            &[("b\\two.txt", false, b"2".as_slice())],
        ));
        let mut out = Vec::new();
        let err = one.copy_entry_data(&two.entries()[0], &mut out).unwrap_err();
        assert!(matches!(err, ArchiveError::ForeignEntry(_)));
    }
}
