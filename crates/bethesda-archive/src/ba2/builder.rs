use super::header::{
    Ba2EntryKind, Ba2Header, GENERAL_OFFSET_FIELD, GeneralRecord, NAME_TABLE_OFFSET_FIELD,
    SUPPORTED_VERSIONS, TextureChunk, TextureRecord, extension_bytes,
};
use super::{Ba2ArchiveState, Ba2ChunkState, Ba2FileState, Ba2GeneralFileState, Ba2TextureFileState};
use crate::compression::{Codec, compress};
use crate::config::CodecConfig;
use crate::dds::header_size_for_format;
use crate::error::{ArchiveError, Result};
use crate::io::{OffsetWidth, PendingOffsetField, copy_to_limit, ensure_patched};
use crate::staging::{StagingArena, StagingSink};
use crate::text::{TextEncoding, wstring_bytes};
use binrw::BinWrite;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, Write};
use tracing::{debug, info};

/// A payload staged for writing, with its offset field once reserved
#[derive(Debug)]
struct StagedBlob {
    packed_size: u32,
    unpacked_size: u32,
    sink: StagingSink,
    offset_field: Option<PendingOffsetField>,
}

#[derive(Debug)]
enum PendingEntry {
    General {
        state: Ba2GeneralFileState,
        blob: StagedBlob,
    },
    Texture {
        state: Ba2TextureFileState,
        chunks: Vec<(Ba2ChunkState, StagedBlob)>,
    },
}

impl PendingEntry {
    fn index(&self) -> usize {
        match self {
            Self::General { state, .. } => state.index,
            Self::Texture { state, .. } => state.index,
        }
    }

    fn path(&self) -> &str {
        match self {
            Self::General { state, .. } => &state.path,
            Self::Texture { state, .. } => &state.path,
        }
    }

    fn blobs_mut(&mut self) -> Vec<&mut StagedBlob> {
        match self {
            Self::General { blob, .. } => vec![blob],
            Self::Texture { chunks, .. } => chunks.iter_mut().map(|(_, blob)| blob).collect(),
        }
    }

    fn blobs(&self) -> Vec<&StagedBlob> {
        match self {
            Self::General { blob, .. } => vec![blob],
            Self::Texture { chunks, .. } => chunks.iter().map(|(_, blob)| blob).collect(),
        }
    }

    /// Write the record with zeroed offsets and remember where they are
    fn write_record<W: Write + Seek>(&mut self, writer: &mut W) -> Result<()> {
        match self {
            Self::General { state, blob } => {
                let start = writer.stream_position()?;
                GeneralRecord {
                    name_hash: state.name_hash,
                    extension: extension_bytes(&state.extension),
                    dir_hash: state.dir_hash,
                    flags: state.flags,
                    offset: 0,
                    packed_size: blob.packed_size,
                    unpacked_size: blob.unpacked_size,
                    align: state.align,
                }
                .write(writer)?;
                let field = PendingOffsetField::at(start + GENERAL_OFFSET_FIELD, OffsetWidth::U64);
                blob.offset_field = Some(field);
            }
            Self::Texture { state, chunks } => {
                TextureRecord {
                    name_hash: state.name_hash,
                    extension: extension_bytes(&state.extension),
                    dir_hash: state.dir_hash,
                    unknown: state.unknown,
                    chunk_count: u8::try_from(chunks.len())
                        .map_err(|_| ArchiveError::overflow("chunk count", chunks.len()))?,
                    chunk_header_len: state.chunk_header_len,
                    height: state.height,
                    width: state.width,
                    mip_count: state.mip_count,
                    format: state.pixel_format,
                    is_cubemap: state.is_cubemap,
                    tile_mode: state.tile_mode,
                }
                .write(writer)?;
                for (chunk, blob) in chunks {
                    let start = writer.stream_position()?;
                    TextureChunk {
                        offset: 0,
                        packed_size: blob.packed_size,
                        unpacked_size: blob.unpacked_size,
                        start_mip: chunk.start_mip,
                        end_mip: chunk.end_mip,
                        align: chunk.align,
                    }
                    .write(writer)?;
                    blob.offset_field = Some(PendingOffsetField::at(start, OffsetWidth::U64));
                }
            }
        }
        Ok(())
    }
}

/// Builder for BA2 archives
///
/// Every general payload and texture chunk is compressed into its own
/// staging sink inside `add_file`, so sizes are final before any record is
/// written. Records are written in ascending state index.
#[derive(Debug)]
pub struct Ba2Builder {
    state: Ba2ArchiveState,
    codec: Codec,
    zlib_level: u32,
    copy_buffer_size: usize,
    arena: StagingArena,
    size_hint: u64,
    entries: Mutex<Vec<PendingEntry>>,
}

impl Ba2Builder {
    /// Create an empty builder
    pub fn new(state: Ba2ArchiveState, config: &CodecConfig, size_hint: u64) -> Result<Self> {
        if state.entry_kind == Ba2EntryKind::Gnmf {
            return Err(ArchiveError::UnsupportedEntryKind(state.entry_kind.name().to_string()));
        }
        if !SUPPORTED_VERSIONS.contains(&state.version) {
            return Err(ArchiveError::UnsupportedVersion {
                format: "BA2",
                version: state.version,
            });
        }
        Ok(Self {
            codec: Self::header_template(&state).codec(),
            state,
            zlib_level: config.zlib_level,
            copy_buffer_size: config.copy_buffer_size,
            arena: StagingArena::new(config),
            size_hint,
            entries: Mutex::new(Vec::new()),
        })
    }

    fn header_template(state: &Ba2ArchiveState) -> Ba2Header {
        Ba2Header {
            version: state.version,
            kind: state.entry_kind,
            file_count: 0,
            name_table_offset: 0,
            unknown1: state.unknown1,
            unknown2: state.unknown2,
            compression: state.compression,
        }
    }

    /// Stage `limit` bytes (or everything, when `None`) from `reader`
    fn stage<R: Read + ?Sized>(
        &self,
        reader: &mut R,
        limit: Option<u64>,
        compressed: bool,
    ) -> Result<StagedBlob> {
        let mut sink = self.arena.allocate(self.size_hint)?;
        let unpacked = match (compressed, limit) {
            (true, Some(limit)) => {
                let mut bounded = (&mut *reader).take(limit);
                let consumed = compress(self.codec, &mut bounded, &mut sink, self.zlib_level)?;
                if consumed != limit {
                    return Err(ArchiveError::Truncated {
                        expected: limit,
                        copied: consumed,
                    });
                }
                consumed
            }
            (true, None) => compress(self.codec, reader, &mut sink, self.zlib_level)?,
            (false, Some(limit)) => copy_to_limit(reader, &mut sink, limit, self.copy_buffer_size)?,
            (false, None) => io::copy(reader, &mut sink)?,
        };

        let packed = if compressed { sink.written_len()? } else { 0 };
        Ok(StagedBlob {
            packed_size: u32::try_from(packed)
                .map_err(|_| ArchiveError::overflow("packed size", packed))?,
            unpacked_size: u32::try_from(unpacked)
                .map_err(|_| ArchiveError::overflow("unpacked size", unpacked))?,
            sink,
            offset_field: None,
        })
    }

    /// Stage one file
    ///
    /// Texture input is a complete DDS file; its header is skipped and the
    /// rest is split into the chunks the state lists.
    pub fn add_file<R: Read + ?Sized>(&self, state: Ba2FileState, reader: &mut R) -> Result<()> {
        if state.entry_kind() != self.state.entry_kind {
            return Err(ArchiveError::InvalidState(format!(
                "{} entry {} added to a {} archive",
                state.entry_kind().name(),
                state.path(),
                self.state.entry_kind.name()
            )));
        }

        let entry = match state {
            Ba2FileState::General(state) => {
                let blob = self.stage(reader, None, state.compressed)?;
                debug!(
                    path = %state.path,
                    unpacked = blob.unpacked_size,
                    packed = blob.packed_size,
                    "staged BA2 file"
                );
                PendingEntry::General { state, blob }
            }
            Ba2FileState::Texture(state) => {
                let header_size = header_size_for_format(state.pixel_format).ok_or_else(|| {
                    ArchiveError::UnsupportedPixelFormat {
                        format: state.pixel_format,
                        path: state.path.clone(),
                    }
                })?;
                let header_len = 4 + u64::from(header_size);
                let skipped = io::copy(&mut (&mut *reader).take(header_len), &mut io::sink())?;
                if skipped != header_len {
                    return Err(ArchiveError::Truncated {
                        expected: header_len,
                        copied: skipped,
                    });
                }

                let mut chunks = Vec::with_capacity(state.chunks.len());
                for chunk in &state.chunks {
                    let limit = Some(u64::from(chunk.unpacked_size));
                    let blob = self.stage(reader, limit, chunk.compressed)?;
                    chunks.push((*chunk, blob));
                }
                debug!(path = %state.path, chunks = chunks.len(), "staged BA2 texture");
                PendingEntry::Texture { state, chunks }
            }
        };

        self.entries.lock().push(entry);
        Ok(())
    }

    /// Number of staged files
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no files have been staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the archive, returning the number of bytes written
    pub fn build<W: Write + Seek>(self, writer: &mut W) -> Result<u64> {
        let mut entries = self.entries.into_inner();
        entries.sort_by_key(PendingEntry::index);

        let mut header = Self::header_template(&self.state);
        header.file_count = u32::try_from(entries.len())
            .map_err(|_| ArchiveError::overflow("file count", entries.len()))?;

        info!(
            version = header.version,
            kind = header.kind.name(),
            files = entries.len(),
            "building BA2 archive"
        );

        let base = writer.stream_position()?;
        header.write_le(writer)?;
        let mut name_table = self
            .state
            .has_name_table
            .then(|| PendingOffsetField::at(base + NAME_TABLE_OFFSET_FIELD, OffsetWidth::U64));

        for entry in &mut entries {
            entry.write_record(writer)?;
        }

        for entry in &mut entries {
            for blob in entry.blobs_mut() {
                if let Some(field) = blob.offset_field.take() {
                    let here = writer.stream_position()?;
                    field.patch(writer, here - base)?;
                }
                blob.sink.copy_into(writer)?;
            }
        }

        if let Some(field) = name_table.take() {
            let here = writer.stream_position()?;
            field.patch(writer, here - base)?;
            for entry in &entries {
                writer.write_all(&wstring_bytes(TextEncoding::Utf8, entry.path())?)?;
            }
        }

        ensure_patched(name_table.as_ref(), "BA2 name table")?;
        for entry in &entries {
            for blob in entry.blobs() {
                ensure_patched(blob.offset_field.as_ref(), entry.path())?;
            }
        }

        let written = writer.stream_position()? - base;
        info!(bytes = written, "built BA2 archive");
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::super::{Ba2Archive, Ba2Record, COMPRESSION_LZ4};
    use super::*;
    use crate::dds::{DDS_HEADER_SIZE, DX10_HEADER_SIZE};
    use crate::io::MemorySource;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Arc;

    fn general(index: usize, path: &str, compressed: bool) -> Ba2FileState {
        Ba2FileState::General(Ba2GeneralFileState {
            index,
            path: path.to_string(),
            name_hash: 0x1000 + index as u32,
            extension: path.rsplit('.').next().unwrap_or_default().to_string(),
            dir_hash: 0xD1,
            flags: 0x0010_0100,
            align: 0xBAAD_F00D,
            compressed,
        })
    }

    fn texture(index: usize, format: u8, chunks: &[(u32, bool)]) -> Ba2FileState {
        Ba2FileState::Texture(Ba2TextureFileState {
            index,
            path: format!("textures\\t{index}.dds"),
            name_hash: 0x2000 + index as u32,
            extension: "dds".to_string(),
            dir_hash: 0xD2,
            unknown: 0,
            chunk_header_len: 24,
            height: 16,
            width: 16,
            mip_count: chunks.len() as u8,
            pixel_format: format,
            is_cubemap: 0,
            tile_mode: 8,
            chunks: chunks
                .iter()
                .enumerate()
                .map(|(i, &(unpacked_size, compressed))| Ba2ChunkState {
                    unpacked_size,
                    start_mip: i as u16,
                    end_mip: i as u16,
                    align: 0,
                    compressed,
                })
                .collect(),
        })
    }

    fn build(state: Ba2ArchiveState, files: Vec<(Ba2FileState, Vec<u8>)>) -> Vec<u8> {
        let builder = Ba2Builder::new(state, &CodecConfig::default(), 0).unwrap();
        for (file, data) in files {
            builder.add_file(file, &mut data.as_slice()).unwrap();
        }
        let mut out = Cursor::new(Vec::new());
        builder.build(&mut out).unwrap();
        out.into_inner()
    }

    fn open(bytes: Vec<u8>) -> Ba2Archive {
        Ba2Archive::open(Arc::new(MemorySource::new(bytes)), &CodecConfig::default()).unwrap()
    }

    fn contents(archive: &Ba2Archive, index: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let entry = &archive.entries()[index];
        let n = archive.copy_entry_data(entry, &mut out).unwrap();
        assert_eq!(n, out.len() as u64);
        assert_eq!(n, entry.size().unwrap());
        out
    }

    #[test]
    fn test_general_round_trip() {
        let text = b"the quick brown fox ".repeat(50);
        let variants = [(1, 0), (7, 0), (8, 0), (2, 0), (3, 0), (3, COMPRESSION_LZ4)];
        for (version, compression) in variants {
            let state =
                Ba2ArchiveState::new(version, Ba2EntryKind::General).with_compression(compression);
            let archive = open(build(
                state,
                vec![
                    (general(1, "meshes\\b.nif", false), b"raw".to_vec()),
                    (general(0, "sound\\a.wav", true), text.clone()),
                ],
            ));
            assert_eq!(archive.state(), state);
            assert_eq!(archive.entries()[0].path(), "sound\\a.wav");
            assert_eq!(contents(&archive, 0), text);
            assert_eq!(contents(&archive, 1), b"raw");

            let Ba2Record::General(record) = archive.entries()[0].record() else {
                panic!("expected a general record");
            };
            assert!(record.is_compressed());
            assert!(u64::from(record.packed_size) < text.len() as u64);
            assert_eq!(archive.entries()[0].state(), general(0, "sound\\a.wav", true));
            assert_eq!(archive.entries()[1].state(), general(1, "meshes\\b.nif", false));
        }
    }

    #[test]
    fn test_record_offsets_point_at_payloads() {
        let bytes = build(
            Ba2ArchiveState::new(8, Ba2EntryKind::General),
            vec![
                (general(0, "a.txt", false), b"first".to_vec()),
                (general(1, "b.txt", false), b"second".to_vec()),
            ],
        );
        let archive = open(bytes.clone());
        let mut expected: &[u8] = b"first";
        for entry in archive.entries() {
            let Ba2Record::General(record) = entry.record() else {
                panic!("expected a general record");
            };
            let at = record.offset as usize;
            assert_eq!(&bytes[at..at + expected.len()], expected);
            expected = b"second";
        }
        // the name table follows the last payload
        assert_eq!(archive.header().name_table_offset as usize, 24 + 2 * 36 + 11);
    }

    #[test]
    fn test_without_name_table() {
        let mut state = Ba2ArchiveState::new(1, Ba2EntryKind::General);
        state.has_name_table = false;
        let archive = open(build(state, vec![(general(0, "a.txt", false), b"x".to_vec())]));
        assert!(!archive.header().has_name_table());
        assert_eq!(archive.entries()[0].path(), "1000");
        assert!(!archive.state().has_name_table);
    }

    #[test]
    fn test_texture_round_trip() {
        // BC1: header is magic + 124 bytes
        let header_len = 4 + DDS_HEADER_SIZE as usize;
        let mut input = vec![0xEEu8; header_len];
        input.extend(std::iter::repeat_n(0xAB, 128));
        input.extend((0..32u8).collect::<Vec<_>>());

        let state = texture(0, 71, &[(128, true), (32, false)]);
        let archive = open(build(
            Ba2ArchiveState::new(1, Ba2EntryKind::Texture),
            vec![(state.clone(), input.clone())],
        ));
        let entry = &archive.entries()[0];
        assert_eq!(entry.size().unwrap(), input.len() as u64);
        assert_eq!(entry.state(), state);

        let out = contents(&archive, 0);
        assert_eq!(&out[..4], b"DDS ");
        assert_eq!(&out[header_len..], &input[header_len..]);

        let Ba2Record::Texture { chunks, .. } = entry.record() else {
            panic!("expected a texture record");
        };
        assert!(chunks[0].is_compressed());
        assert!(!chunks[1].is_compressed());
    }

    #[test]
    fn test_texture_with_dx10_header() {
        // BC7 carries the extension header
        let header_len = 4 + (DDS_HEADER_SIZE + DX10_HEADER_SIZE) as usize;
        let mut input = vec![0u8; header_len];
        input.extend(b"pixels");
        let archive = open(build(
            Ba2ArchiveState::new(7, Ba2EntryKind::Texture),
            vec![(texture(0, 98, &[(6, false)]), input)],
        ));
        let out = contents(&archive, 0);
        assert_eq!(out.len(), header_len + 6);
        assert_eq!(&out[84..88], b"DX10");
        assert_eq!(&out[header_len..], b"pixels");
    }

    #[test]
    fn test_unsupported_pixel_format_names_path() {
        let state = Ba2ArchiveState::new(1, Ba2EntryKind::Texture);
        let builder = Ba2Builder::new(state, &CodecConfig::default(), 0).unwrap();
        let mut input = vec![0u8; 4 + DDS_HEADER_SIZE as usize];
        input.extend(b"data");
        let err = builder
            .add_file(texture(3, 200, &[(4, false)]), &mut input.as_slice())
            .unwrap_err();
        match err {
            ArchiveError::UnsupportedPixelFormat { format, path } => {
                assert_eq!(format, 200);
                assert_eq!(path, "textures\\t3.dds");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(builder.is_empty());
    }

    #[test]
    fn test_stored_unknown_pixel_format_has_no_size() {
        let mut input = vec![0u8; 4 + DDS_HEADER_SIZE as usize];
        input.extend(b"data");
        let mut bytes = build(
            Ba2ArchiveState::new(1, Ba2EntryKind::Texture),
            vec![(texture(3, 71, &[(4, false)]), input)],
        );
        // format byte of the first texture record, after the 24-byte header
        assert_eq!(bytes[24 + 21], 71);
        bytes[24 + 21] = 200;

        let archive = open(bytes);
        let entry = &archive.entries()[0];
        assert!(matches!(
            entry.size(),
            Err(ArchiveError::UnsupportedPixelFormat { format: 200, .. })
        ));
        let mut out = Vec::new();
        let err = archive.copy_entry_data(entry, &mut out).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedPixelFormat { format: 200, .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_short_texture_input() {
        let state = Ba2ArchiveState::new(1, Ba2EntryKind::Texture);
        let builder = Ba2Builder::new(state, &CodecConfig::default(), 0).unwrap();
        let mut input = vec![0u8; 4 + DDS_HEADER_SIZE as usize];
        input.extend(b"abc");
        let err = builder
            .add_file(texture(0, 71, &[(8, true)]), &mut input.as_slice())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Truncated { expected: 8, copied: 3 }));

        let err = builder
            .add_file(texture(0, 71, &[(8, false)]), &mut &input[..10])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Truncated { copied: 10, .. }));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let state = Ba2ArchiveState::new(1, Ba2EntryKind::General);
        let builder = Ba2Builder::new(state, &CodecConfig::default(), 0).unwrap();
        let err = builder
            .add_file(texture(0, 71, &[]), &mut [0u8; 0].as_slice())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidState(_)));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_builder_rejects_gnmf_and_unknown_versions() {
        let config = CodecConfig::default();
        let gnmf = Ba2ArchiveState::new(1, Ba2EntryKind::Gnmf);
        let err = Ba2Builder::new(gnmf, &config, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedEntryKind(ref k) if k == "GNMF"));

        let unknown = Ba2ArchiveState::new(4, Ba2EntryKind::General);
        let err = Ba2Builder::new(unknown, &config, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedVersion { version: 4, .. }));
    }

    #[test]
    fn test_reader_rejects_bad_headers() {
        let config = CodecConfig::default();
        let open_err = |bytes: &[u8]| {
            Ba2Archive::open(Arc::new(MemorySource::new(bytes.to_vec())), &config).unwrap_err()
        };
        assert!(matches!(
            open_err(b"BSA\0\x01\0\0\0GNRL\0\0\0\0"),
            ArchiveError::InvalidMagic { format: "BA2", .. }
        ));
        assert!(matches!(
            open_err(b"BTDX\x01\0\0\0ABCD\0\0\0\0"),
            ArchiveError::UnknownEntryKind(ref k) if k == "ABCD"
        ));
        assert!(matches!(
            open_err(b"BTDX\x01\0\0\0GNMF\0\0\0\0"),
            ArchiveError::UnsupportedEntryKind(ref k) if k == "GNMF"
        ));
        assert!(matches!(
            open_err(b"BTDX\x09\0\0\0GNRL\0\0\0\0"),
            ArchiveError::UnsupportedVersion { version: 9, .. }
        ));
    }

    #[test]
    fn test_find_by_path() {
        let archive = open(build(
            Ba2ArchiveState::new(1, Ba2EntryKind::General),
            vec![(general(0, "Meshes\\Thing.nif", false), b"x".to_vec())],
        ));
        assert!(archive.find_by_path("meshes/thing.NIF").is_some());
        assert!(archive.find_by_path("meshes/other.nif").is_none());
    }
}
