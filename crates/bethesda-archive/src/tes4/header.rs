//! TES4-family header, folder records and file records

use crate::compression::Codec;
use crate::text::TextEncoding;
use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};

/// `"BSA\0"` magic
pub const BSA_MAGIC: [u8; 4] = *b"BSA\0";

/// Size of the archive header, which is also where folder records start
pub const HEADER_SIZE: u32 = 0x24;

/// Size of one file record
pub const FILE_RECORD_SIZE: u64 = 16;

/// Bit in a file record's size field that inverts the default compression
pub const FLIP_COMPRESSION_BIT: u32 = 1 << 30;

/// Archive stores folder names
pub const FLAG_FOLDER_NAMES: u32 = 0x1;
/// Archive stores file names
pub const FLAG_FILE_NAMES: u32 = 0x2;
/// Files are compressed unless their flip bit says otherwise
pub const FLAG_COMPRESSED: u32 = 0x4;
/// Each payload is prefixed by its full path (FO3 and SSE only)
pub const FLAG_NAME_BLOBS: u32 = 0x100;

/// Header versions of the TES4 family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Tes4Version {
    /// Oblivion
    Tes4 = 0x67,
    /// Fallout 3, New Vegas, Skyrim LE
    Fo3 = 0x68,
    /// Skyrim Special Edition
    Sse = 0x69,
}

impl Tes4Version {
    /// Parse a raw header version
    pub fn from_raw(version: u32) -> Option<Self> {
        match version {
            0x67 => Some(Self::Tes4),
            0x68 => Some(Self::Fo3),
            0x69 => Some(Self::Sse),
            _ => None,
        }
    }

    /// Raw header value
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Codec applied to compressed payloads
    pub fn codec(self) -> Codec {
        match self {
            Self::Sse => Codec::Lz4Frame,
            Self::Tes4 | Self::Fo3 => Codec::Zlib,
        }
    }

    /// Encoding of folder and file names
    pub fn encoding(self) -> TextEncoding {
        TextEncoding::for_bsa_version(self.as_raw())
    }

    /// Size of one folder record
    pub fn folder_record_size(self) -> u64 {
        match self {
            Self::Sse => 24,
            Self::Tes4 | Self::Fo3 => 16,
        }
    }

    /// Whether archive flag 0x100 means name blobs for this version
    pub fn supports_name_blobs(self) -> bool {
        !matches!(self, Self::Tes4)
    }
}

/// Archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"BSA\0")]
pub struct Tes4Header {
    /// Raw version, see [`Tes4Version`]
    pub version: u32,
    /// Always [`HEADER_SIZE`]
    pub folder_record_offset: u32,
    /// `FLAG_*` bits
    pub archive_flags: u32,
    /// Number of folders
    pub folder_count: u32,
    /// Number of files across all folders
    pub file_count: u32,
    /// Sum of folder name lengths including terminators
    pub total_folder_name_length: u32,
    /// Sum of file name lengths including terminators
    pub total_file_name_length: u32,
    /// Content-type bits (meshes, textures, ...)
    pub file_flags: u32,
}

impl Tes4Header {
    /// Folder names are stored before each file record block
    pub fn has_folder_names(&self) -> bool {
        self.archive_flags & FLAG_FOLDER_NAMES != 0
    }

    /// A file name block follows the file record blocks
    pub fn has_file_names(&self) -> bool {
        self.archive_flags & FLAG_FILE_NAMES != 0
    }

    /// Archive-wide default compression
    pub fn compressed_by_default(&self) -> bool {
        self.archive_flags & FLAG_COMPRESSED != 0
    }

    /// Payloads carry an embedded name blob
    pub fn has_name_blobs(&self) -> bool {
        self.archive_flags & FLAG_NAME_BLOBS != 0
            && Tes4Version::from_raw(self.version).is_some_and(Tes4Version::supports_name_blobs)
    }
}

/// Folder record; SSE widens the offset and adds a reserved field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderRecord {
    /// Folder path hash
    pub hash: u64,
    /// Number of files in the folder
    pub file_count: u32,
    /// Reserved, SSE only
    pub reserved: u32,
    /// Offset of the file record block plus the total file name length
    pub offset: u64,
}

impl BinRead for FolderRecord {
    type Args<'a> = (Tes4Version,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        (version,): Self::Args<'_>,
    ) -> BinResult<Self> {
        let hash = u64::read_options(reader, endian, ())?;
        let file_count = u32::read_options(reader, endian, ())?;
        let (reserved, offset) = match version {
            Tes4Version::Sse => (
                u32::read_options(reader, endian, ())?,
                u64::read_options(reader, endian, ())?,
            ),
            Tes4Version::Tes4 | Tes4Version::Fo3 => {
                (0, u64::from(u32::read_options(reader, endian, ())?))
            }
        };
        Ok(Self {
            hash,
            file_count,
            reserved,
            offset,
        })
    }
}

impl BinWrite for FolderRecord {
    type Args<'a> = (Tes4Version,);

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        (version,): Self::Args<'_>,
    ) -> BinResult<()> {
        self.hash.write_options(writer, endian, ())?;
        self.file_count.write_options(writer, endian, ())?;
        match version {
            Tes4Version::Sse => {
                self.reserved.write_options(writer, endian, ())?;
                self.offset.write_options(writer, endian, ())?;
            }
            Tes4Version::Tes4 | Tes4Version::Fo3 => {
                let offset = u32::try_from(self.offset).map_err(|_| binrw::Error::AssertFail {
                    pos: 0,
                    message: format!("folder offset {} does not fit in 32 bits", self.offset),
                })?;
                offset.write_options(writer, endian, ())?;
            }
        }
        Ok(())
    }
}

/// File record
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct FileRecord {
    /// File name hash
    pub hash: u64,
    /// On-disk size, possibly with [`FLIP_COMPRESSION_BIT`] set
    pub size: u32,
    /// Absolute offset of the payload
    pub offset: u32,
}

impl FileRecord {
    /// Whether the flip bit is set
    pub fn flips_compression(&self) -> bool {
        self.size & FLIP_COMPRESSION_BIT != 0
    }

    /// Size with the flip bit cleared
    pub fn stored_size(&self) -> u32 {
        self.size & !FLIP_COMPRESSION_BIT
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(version: u32, archive_flags: u32) -> Tes4Header {
        Tes4Header {
            version,
            folder_record_offset: HEADER_SIZE,
            archive_flags,
            folder_count: 0,
            file_count: 0,
            total_folder_name_length: 0,
            total_file_name_length: 0,
            file_flags: 0,
        }
    }

    #[test]
    fn test_header_size() {
        let mut out = Cursor::new(Vec::new());
        header(0x69, 0x3).write(&mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len() as u32, HEADER_SIZE);
        assert_eq!(&bytes[..4], b"BSA\0");
    }

    #[test]
    fn test_name_blobs_ignored_for_oblivion() {
        assert!(!header(0x67, FLAG_NAME_BLOBS).has_name_blobs());
        assert!(header(0x68, FLAG_NAME_BLOBS).has_name_blobs());
        assert!(header(0x69, FLAG_NAME_BLOBS).has_name_blobs());
    }

    #[test]
    fn test_folder_record_width() {
        let record = FolderRecord {
            hash: 0x0102_0304_0506_0708,
            file_count: 3,
            reserved: 0,
            offset: 0x1234,
        };
        for (version, size) in [(Tes4Version::Fo3, 16), (Tes4Version::Sse, 24)] {
            let mut out = Cursor::new(Vec::new());
            record.write_le_args(&mut out, (version,)).unwrap();
            let bytes = out.into_inner();
            assert_eq!(bytes.len() as u64, size);
            assert_eq!(version.folder_record_size(), size);
            let back = FolderRecord::read_le_args(&mut Cursor::new(bytes), (version,)).unwrap();
            assert_eq!(back, record);
        }
    }

    #[test]
    fn test_narrow_folder_offset_overflow() {
        let record = FolderRecord {
            hash: 1,
            file_count: 1,
            reserved: 0,
            offset: u64::from(u32::MAX) + 1,
        };
        let mut out = Cursor::new(Vec::new());
        assert!(record.write_le_args(&mut out, (Tes4Version::Tes4,)).is_err());
        assert!(record.write_le_args(&mut out, (Tes4Version::Sse,)).is_ok());
    }

    #[test]
    fn test_flip_bit() {
        let record = FileRecord {
            hash: 0,
            size: 100 | FLIP_COMPRESSION_BIT,
            offset: 0,
        };
        assert!(record.flips_compression());
        assert_eq!(record.stored_size(), 100);
    }
}
