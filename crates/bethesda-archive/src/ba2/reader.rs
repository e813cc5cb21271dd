use super::header::{
    BA2_MAGIC, Ba2EntryKind, Ba2Header, GENERAL_RECORD_SIZE, GeneralRecord, SUPPORTED_VERSIONS,
    TEXTURE_RECORD_SIZE, TextureChunk, TextureRecord, extension_str,
};
use super::{Ba2ArchiveState, Ba2ChunkState, Ba2FileState, Ba2GeneralFileState, Ba2TextureFileState};
use crate::compression::decompress;
use crate::config::CodecConfig;
use crate::dds::{DdsError, TextureDescriptor, header_size_for_format, synthesize};
use crate::error::{ArchiveError, Result};
use crate::io::{FileSource, ReadSeek, StreamSource, copy_to_limit, ensure_table_fits};
use crate::text::{TextEncoding, normalize_path, read_wstring};
use binrw::BinRead;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Kind-specific record of a BA2 entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ba2Record {
    /// A general entry
    General(GeneralRecord),
    /// A texture entry and its chunks
    Texture {
        /// Texture record
        record: TextureRecord,
        /// Chunks in on-disk order
        chunks: Vec<TextureChunk>,
    },
}

/// One entry of a BA2 archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ba2Entry {
    index: usize,
    path: String,
    record: Ba2Record,
}

impl Ba2Entry {
    /// Position of the record in the archive
    pub fn index(&self) -> usize {
        self.index
    }

    /// Archive path, or the hex name hash when there is no name table
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Kind-specific record
    pub fn record(&self) -> &Ba2Record {
        &self.record
    }

    /// Hash of the file name stem
    pub fn name_hash(&self) -> u32 {
        match &self.record {
            Ba2Record::General(r) => r.name_hash,
            Ba2Record::Texture { record, .. } => record.name_hash,
        }
    }

    /// Hash of the directory
    pub fn dir_hash(&self) -> u32 {
        match &self.record {
            Ba2Record::General(r) => r.dir_hash,
            Ba2Record::Texture { record, .. } => record.dir_hash,
        }
    }

    /// Extension without padding
    pub fn extension(&self) -> String {
        match &self.record {
            Ba2Record::General(r) => extension_str(&r.extension),
            Ba2Record::Texture { record, .. } => extension_str(&record.extension),
        }
    }

    /// Logical size of the extracted file
    ///
    /// For textures this includes the synthesized DDS header and its magic,
    /// so a texture with an unknown pixel format has no size.
    pub fn size(&self) -> Result<u64> {
        match &self.record {
            Ba2Record::General(r) => Ok(u64::from(r.unpacked_size)),
            Ba2Record::Texture { record, chunks } => {
                let header_size = header_size_for_format(record.format).ok_or_else(|| {
                    ArchiveError::UnsupportedPixelFormat {
                        format: record.format,
                        path: self.path.clone(),
                    }
                })?;
                let pixels = chunks.iter().map(|c| u64::from(c.unpacked_size)).sum::<u64>();
                Ok(pixels + 4 + u64::from(header_size))
            }
        }
    }

    /// Settings needed to add this entry to a new builder
    pub fn state(&self) -> Ba2FileState {
        match &self.record {
            Ba2Record::General(r) => Ba2FileState::General(Ba2GeneralFileState {
                index: self.index,
                path: self.path.clone(),
                name_hash: r.name_hash,
                extension: extension_str(&r.extension),
                dir_hash: r.dir_hash,
                flags: r.flags,
                align: r.align,
                compressed: r.is_compressed(),
            }),
            Ba2Record::Texture { record, chunks } => Ba2FileState::Texture(Ba2TextureFileState {
                index: self.index,
                path: self.path.clone(),
                name_hash: record.name_hash,
                extension: extension_str(&record.extension),
                dir_hash: record.dir_hash,
                unknown: record.unknown,
                chunk_header_len: record.chunk_header_len,
                height: record.height,
                width: record.width,
                mip_count: record.mip_count,
                pixel_format: record.format,
                is_cubemap: record.is_cubemap,
                tile_mode: record.tile_mode,
                chunks: chunks
                    .iter()
                    .map(|c| Ba2ChunkState {
                        unpacked_size: c.unpacked_size,
                        start_mip: c.start_mip,
                        end_mip: c.end_mip,
                        align: c.align,
                        compressed: c.is_compressed(),
                    })
                    .collect(),
            }),
        }
    }
}

/// An open BA2 archive
#[derive(Debug)]
pub struct Ba2Archive {
    source: Arc<dyn StreamSource>,
    config: CodecConfig,
    header: Ba2Header,
    entries: Vec<Ba2Entry>,
}

impl Ba2Archive {
    /// Open the archive file at `path`
    pub fn open_path<P: AsRef<Path>>(path: P, config: &CodecConfig) -> Result<Self> {
        Self::open(Arc::new(FileSource::new(path)), config)
    }

    /// Parse the records and name table of the archive behind `source`
    pub fn open(source: Arc<dyn StreamSource>, config: &CodecConfig) -> Result<Self> {
        let mut stream = source.open()?;

        let mut prefix = [0u8; 12];
        stream.read_exact(&mut prefix)?;
        let magic = [prefix[0], prefix[1], prefix[2], prefix[3]];
        if magic != BA2_MAGIC {
            return Err(ArchiveError::InvalidMagic {
                format: "BA2",
                found: magic,
            });
        }
        let version = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let token = [prefix[8], prefix[9], prefix[10], prefix[11]];
        match Ba2EntryKind::from_token(token) {
            None => {
                return Err(ArchiveError::UnknownEntryKind(
                    String::from_utf8_lossy(&token).into_owned(),
                ));
            }
            Some(Ba2EntryKind::Gnmf) => {
                return Err(ArchiveError::UnsupportedEntryKind(
                    Ba2EntryKind::Gnmf.name().to_string(),
                ));
            }
            Some(_) => {}
        }
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ArchiveError::UnsupportedVersion {
                format: "BA2",
                version,
            });
        }

        stream.seek(SeekFrom::Start(0))?;
        let header = Ba2Header::read_le(&mut stream)?;
        let record_size = match header.kind {
            Ba2EntryKind::Texture => TEXTURE_RECORD_SIZE,
            _ => GENERAL_RECORD_SIZE,
        };
        ensure_table_fits(
            &mut stream,
            header.size(),
            u64::from(header.file_count),
            record_size,
        )?;

        let mut records = Vec::with_capacity(header.file_count as usize);
        for _ in 0..header.file_count {
            records.push(Self::read_record(&mut stream, header.kind)?);
        }

        let paths: Vec<String> = if header.has_name_table() {
            stream.seek(SeekFrom::Start(header.name_table_offset))?;
            (0..records.len())
                .map(|_| read_wstring(&mut stream, TextEncoding::Utf8))
                .collect::<Result<_>>()?
        } else {
            records.iter().map(|r| format!("{:X}", record_name_hash(r))).collect()
        };

        let entries: Vec<Ba2Entry> = records
            .into_iter()
            .zip(paths)
            .enumerate()
            .map(|(index, (record, path))| Ba2Entry {
                index,
                path,
                record,
            })
            .collect();

        debug!(
            source = %source.describe(),
            version = header.version,
            kind = header.kind.name(),
            files = entries.len(),
            "opened BA2 archive"
        );

        Ok(Self {
            source,
            config: config.clone(),
            header,
            entries,
        })
    }

    fn read_record<R: Read + Seek>(stream: &mut R, kind: Ba2EntryKind) -> Result<Ba2Record> {
        match kind {
            Ba2EntryKind::General => Ok(Ba2Record::General(GeneralRecord::read(stream)?)),
            Ba2EntryKind::Texture => {
                let record = TextureRecord::read(stream)?;
                let chunks = (0..record.chunk_count)
                    .map(|_| TextureChunk::read(stream))
                    .collect::<binrw::BinResult<Vec<_>>>()?;
                Ok(Ba2Record::Texture { record, chunks })
            }
            Ba2EntryKind::Gnmf => Err(ArchiveError::UnsupportedEntryKind(kind.name().to_string())),
        }
    }

    /// Parsed header
    pub fn header(&self) -> &Ba2Header {
        &self.header
    }

    /// Entries in record order
    pub fn entries(&self) -> &[Ba2Entry] {
        &self.entries
    }

    /// Look up an entry by path, ignoring case and separator style
    pub fn find_by_path(&self, path: &str) -> Option<&Ba2Entry> {
        let wanted = normalize_path(path).to_lowercase();
        self.entries
            .iter()
            .find(|e| normalize_path(&e.path).to_lowercase() == wanted)
    }

    /// Settings needed to rebuild this archive
    pub fn state(&self) -> Ba2ArchiveState {
        Ba2ArchiveState {
            version: self.header.version,
            entry_kind: self.header.kind,
            has_name_table: self.header.has_name_table(),
            unknown1: self.header.unknown1,
            unknown2: self.header.unknown2,
            compression: self.header.compression,
        }
    }

    /// Copy an entry's bytes into `sink`, returning the number written
    ///
    /// Textures are written as a complete DDS file.
    pub fn copy_entry_data<W: Write + ?Sized>(
        &self,
        entry: &Ba2Entry,
        sink: &mut W,
    ) -> Result<u64> {
        if self.entries.get(entry.index) != Some(entry) {
            return Err(ArchiveError::ForeignEntry(entry.path.clone()));
        }

        let mut stream = self.source.open()?;
        match &entry.record {
            Ba2Record::General(record) => self.copy_payload(
                &mut stream,
                record.offset,
                record.packed_size,
                record.unpacked_size,
                sink,
            ),
            Ba2Record::Texture { record, chunks } => {
                let descriptor = TextureDescriptor {
                    format: record.format,
                    width: record.width,
                    height: record.height,
                    mip_count: record.mip_count,
                };
                let header =
                    synthesize(&descriptor, self.config.use_ati_fourcc).map_err(|e| match e {
                        DdsError::UnsupportedFormat(format) => {
                            ArchiveError::UnsupportedPixelFormat {
                                format,
                                path: entry.path.clone(),
                            }
                        }
                        DdsError::BinRw(e) => ArchiveError::BinRw(e),
                    })?;
                sink.write_all(&header)?;

                let mut written = header.len() as u64;
                for chunk in chunks {
                    written += self.copy_payload(
                        &mut stream,
                        chunk.offset,
                        chunk.packed_size,
                        chunk.unpacked_size,
                        sink,
                    )?;
                }
                Ok(written)
            }
        }
    }

    fn copy_payload<W: Write + ?Sized>(
        &self,
        stream: &mut Box<dyn ReadSeek>,
        offset: u64,
        packed_size: u32,
        unpacked_size: u32,
        sink: &mut W,
    ) -> Result<u64> {
        stream.seek(SeekFrom::Start(offset))?;
        if packed_size == 0 {
            copy_to_limit(stream, sink, u64::from(unpacked_size), self.config.copy_buffer_size)
        } else {
            let mut packed = stream.take(u64::from(packed_size));
            decompress(
                self.header.codec(),
                &mut packed,
                sink,
                u64::from(unpacked_size),
                self.config.copy_buffer_size,
            )
        }
    }
}

fn record_name_hash(record: &Ba2Record) -> u32 {
    match record {
        Ba2Record::General(r) => r.name_hash,
        Ba2Record::Texture { record, .. } => record.name_hash,
    }
}
