//! BA2 header, general records and texture records

use crate::compression::Codec;
use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};
use serde::{Deserialize, Serialize};

/// `"BTDX"` magic
pub const BA2_MAGIC: [u8; 4] = *b"BTDX";

/// Versions this crate reads and writes
pub const SUPPORTED_VERSIONS: [u32; 5] = [1, 2, 3, 7, 8];

/// Compression selector (version 3) meaning LZ4 block compression
pub const COMPRESSION_LZ4: u32 = 3;

/// Position of the name table offset within the header
pub const NAME_TABLE_OFFSET_FIELD: u64 = 16;

/// Size of one general record
pub const GENERAL_RECORD_SIZE: u64 = 36;

/// Position of the data offset within a general record
pub const GENERAL_OFFSET_FIELD: u64 = 16;

/// Size of one texture record, not counting its chunks
pub const TEXTURE_RECORD_SIZE: u64 = 24;

/// Size of one texture chunk
pub const TEXTURE_CHUNK_SIZE: u64 = 24;

/// Kind of entry stored in an archive, named by the header's type token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ba2EntryKind {
    /// `GNRL`: opaque files
    General,
    /// `DX10`: textures with the DDS header stripped
    Texture,
    /// `GNMF`: console textures, recognized but not supported
    Gnmf,
}

impl Ba2EntryKind {
    /// Parse a header type token
    pub fn from_token(token: [u8; 4]) -> Option<Self> {
        match &token {
            b"GNRL" => Some(Self::General),
            b"DX10" => Some(Self::Texture),
            b"GNMF" => Some(Self::Gnmf),
            _ => None,
        }
    }

    /// The header type token
    pub fn token(self) -> [u8; 4] {
        match self {
            Self::General => *b"GNRL",
            Self::Texture => *b"DX10",
            Self::Gnmf => *b"GNMF",
        }
    }

    /// Token as text, for messages
    pub fn name(self) -> &'static str {
        match self {
            Self::General => "GNRL",
            Self::Texture => "DX10",
            Self::Gnmf => "GNMF",
        }
    }
}

/// Whether `version` carries the two extra header words
pub fn has_extended_header(version: u32) -> bool {
    matches!(version, 2 | 3)
}

/// Archive header
///
/// Versions 2 and 3 append two unknown words; version 3 also appends the
/// compression selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ba2Header {
    /// Archive version
    pub version: u32,
    /// Entry kind of every record
    pub kind: Ba2EntryKind,
    /// Number of records
    pub file_count: u32,
    /// Absolute offset of the name table, 0 when absent
    pub name_table_offset: u64,
    /// Extended header word, versions 2 and 3
    pub unknown1: u32,
    /// Extended header word, versions 2 and 3
    pub unknown2: u32,
    /// Compression selector, version 3
    pub compression: u32,
}

impl Ba2Header {
    /// Serialized size for this header's version
    pub fn size(&self) -> u64 {
        match self.version {
            2 => 32,
            3 => 36,
            _ => 24,
        }
    }

    /// Whether a name table is present
    pub fn has_name_table(&self) -> bool {
        self.name_table_offset != 0
    }

    /// Codec of compressed payloads
    pub fn codec(&self) -> Codec {
        if self.version == 3 && self.compression == COMPRESSION_LZ4 {
            Codec::Lz4Block
        } else {
            Codec::Zlib
        }
    }
}

impl BinRead for Ba2Header {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        (): Self::Args<'_>,
    ) -> BinResult<Self> {
        let magic_pos = reader.stream_position()?;
        let magic = <[u8; 4]>::read_options(reader, endian, ())?;
        if magic != BA2_MAGIC {
            return Err(binrw::Error::BadMagic {
                pos: magic_pos,
                found: Box::new(magic),
            });
        }
        let version = u32::read_options(reader, endian, ())?;
        let token_pos = reader.stream_position()?;
        let token = <[u8; 4]>::read_options(reader, endian, ())?;
        let kind = Ba2EntryKind::from_token(token).ok_or_else(|| binrw::Error::AssertFail {
            pos: token_pos,
            message: format!("unknown entry kind {}", String::from_utf8_lossy(&token)),
        })?;
        let file_count = u32::read_options(reader, endian, ())?;
        let name_table_offset = u64::read_options(reader, endian, ())?;

        let (unknown1, unknown2) = if has_extended_header(version) {
            (
                u32::read_options(reader, endian, ())?,
                u32::read_options(reader, endian, ())?,
            )
        } else {
            (0, 0)
        };
        let compression = if version == 3 {
            u32::read_options(reader, endian, ())?
        } else {
            0
        };

        Ok(Self {
            version,
            kind,
            file_count,
            name_table_offset,
            unknown1,
            unknown2,
            compression,
        })
    }
}

impl BinWrite for Ba2Header {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        (): Self::Args<'_>,
    ) -> BinResult<()> {
        BA2_MAGIC.write_options(writer, endian, ())?;
        self.version.write_options(writer, endian, ())?;
        self.kind.token().write_options(writer, endian, ())?;
        self.file_count.write_options(writer, endian, ())?;
        self.name_table_offset.write_options(writer, endian, ())?;
        if has_extended_header(self.version) {
            self.unknown1.write_options(writer, endian, ())?;
            self.unknown2.write_options(writer, endian, ())?;
        }
        if self.version == 3 {
            self.compression.write_options(writer, endian, ())?;
        }
        Ok(())
    }
}

/// Record of a general (`GNRL`) entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct GeneralRecord {
    /// Hash of the file name stem
    pub name_hash: u32,
    /// Extension, `\0`-padded
    pub extension: [u8; 4],
    /// Hash of the directory
    pub dir_hash: u32,
    /// Opaque flags
    pub flags: u32,
    /// Absolute offset of the payload
    pub offset: u64,
    /// Compressed size, 0 when stored raw
    pub packed_size: u32,
    /// Uncompressed size
    pub unpacked_size: u32,
    /// Alignment marker
    pub align: u32,
}

impl GeneralRecord {
    /// Whether the payload is compressed
    pub fn is_compressed(&self) -> bool {
        self.packed_size != 0
    }
}

/// Record of a texture (`DX10`) entry, followed on disk by its chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct TextureRecord {
    /// Hash of the file name stem
    pub name_hash: u32,
    /// Extension, `\0`-padded
    pub extension: [u8; 4],
    /// Hash of the directory
    pub dir_hash: u32,
    /// Unknown byte
    pub unknown: u8,
    /// Number of chunks that follow
    pub chunk_count: u8,
    /// Size of each chunk record
    pub chunk_header_len: u16,
    /// Height in pixels
    pub height: u16,
    /// Width in pixels
    pub width: u16,
    /// Number of mip levels
    pub mip_count: u8,
    /// Raw DXGI format
    pub format: u8,
    /// Cubemap marker
    pub is_cubemap: u8,
    /// Tile mode
    pub tile_mode: u8,
}

/// One mip range of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct TextureChunk {
    /// Absolute offset of the chunk data
    pub offset: u64,
    /// Compressed size, 0 when stored raw
    pub packed_size: u32,
    /// Uncompressed size
    pub unpacked_size: u32,
    /// First mip level in the chunk
    pub start_mip: u16,
    /// Last mip level in the chunk
    pub end_mip: u16,
    /// Alignment marker
    pub align: u32,
}

impl TextureChunk {
    /// Whether the chunk is compressed
    pub fn is_compressed(&self) -> bool {
        self.packed_size != 0
    }
}

/// Pack an extension into the 4-byte record field
pub fn extension_bytes(extension: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (slot, b) in out.iter_mut().zip(extension.bytes()) {
        *slot = b;
    }
    out
}

/// Extension field as text, without padding
pub fn extension_str(extension: &[u8; 4]) -> String {
    let end = extension.iter().position(|&b| b == 0).unwrap_or(4);
    String::from_utf8_lossy(&extension[..end]).into_owned()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(version: u32) -> Ba2Header {
        Ba2Header {
            version,
            kind: Ba2EntryKind::General,
            file_count: 2,
            name_table_offset: 0x1234,
            unknown1: 5,
            unknown2: 6,
            compression: COMPRESSION_LZ4,
        }
    }

    #[test]
    fn test_header_size_by_version() {
        for (version, size) in [(1, 24), (7, 24), (8, 24), (2, 32), (3, 36)] {
            let mut out = Cursor::new(Vec::new());
            header(version).write_le(&mut out).unwrap();
            let bytes = out.into_inner();
            assert_eq!(bytes.len() as u64, size);
            assert_eq!(header(version).size(), size);
            assert_eq!(&bytes[..4], b"BTDX");
            assert_eq!(&bytes[8..12], b"GNRL");
        }
    }

    #[test]
    fn test_extended_fields_survive() {
        let mut out = Cursor::new(Vec::new());
        header(3).write_le(&mut out).unwrap();
        out.set_position(0);
        let back = Ba2Header::read_le(&mut out).unwrap();
        assert_eq!(back, header(3));
        assert_eq!(back.codec(), Codec::Lz4Block);
    }

    #[test]
    fn test_legacy_versions_drop_extended_fields() {
        let mut out = Cursor::new(Vec::new());
        header(1).write_le(&mut out).unwrap();
        out.set_position(0);
        let back = Ba2Header::read_le(&mut out).unwrap();
        assert_eq!((back.unknown1, back.unknown2, back.compression), (0, 0, 0));
        assert_eq!(back.codec(), Codec::Zlib);
    }

    #[test]
    fn test_unknown_token_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"BTDX\x01\0\0\0XXXX");
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(Ba2Header::read_le(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_tokens() {
        for kind in [Ba2EntryKind::General, Ba2EntryKind::Texture, Ba2EntryKind::Gnmf] {
            assert_eq!(Ba2EntryKind::from_token(kind.token()), Some(kind));
            assert_eq!(kind.name().as_bytes(), kind.token());
        }
        assert_eq!(Ba2EntryKind::from_token(*b"gnrl"), None);
    }

    #[test]
    fn test_record_sizes() {
        let mut out = Cursor::new(Vec::new());
        GeneralRecord {
            name_hash: 1,
            extension: extension_bytes("nif"),
            dir_hash: 2,
            flags: 0x0010_0100,
            offset: 0xAABB,
            packed_size: 0,
            unpacked_size: 3,
            align: 0xBAAD_F00D,
        }
        .write(&mut out)
        .unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len() as u64, GENERAL_RECORD_SIZE);
        let offset_at = GENERAL_OFFSET_FIELD as usize;
        assert_eq!(&bytes[offset_at..offset_at + 2], &[0xBB, 0xAA]);

        let mut out = Cursor::new(Vec::new());
        TextureRecord {
            name_hash: 1,
            extension: extension_bytes("dds"),
            dir_hash: 2,
            unknown: 0,
            chunk_count: 1,
            chunk_header_len: 24,
            height: 256,
            width: 256,
            mip_count: 9,
            format: 71,
            is_cubemap: 0,
            tile_mode: 8,
        }
        .write(&mut out)
        .unwrap();
        assert_eq!(out.into_inner().len() as u64, TEXTURE_RECORD_SIZE);
    }

    #[test]
    fn test_extension_padding() {
        assert_eq!(extension_bytes("nif"), *b"nif\0");
        assert_eq!(extension_bytes("toolong"), *b"tool");
        assert_eq!(extension_str(b"dds\0"), "dds");
        assert_eq!(extension_str(b"wav\0"), "wav");
        assert_eq!(extension_str(b"abcd"), "abcd");
    }
}
