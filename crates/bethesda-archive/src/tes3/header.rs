//! TES3 header and fixed-size record tables

use binrw::{BinRead, BinWrite};

/// Version field of every TES3 archive, doubling as its magic
pub const TES3_VERSION: u32 = 0x100;

/// Magic bytes as they appear on disk
pub const TES3_MAGIC: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

/// Size of the fixed header
pub const HEADER_SIZE: u64 = 12;

/// Bytes per file in the size/offset and name-offset tables
pub const RECORD_TABLE_STRIDE: u64 = 12;

/// Bytes per file in the hash table
pub const HASH_RECORD_SIZE: u64 = 8;

/// Archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Tes3Header {
    /// Always [`TES3_VERSION`]
    pub version: u32,
    /// Offset of the hash table, relative to the end of the header
    pub hash_offset: u32,
    /// Number of files
    pub file_count: u32,
}

impl Tes3Header {
    /// Absolute start of the name table
    pub fn name_table_start(&self) -> u64 {
        HEADER_SIZE + RECORD_TABLE_STRIDE * u64::from(self.file_count)
    }

    /// Absolute start of the hash table
    pub fn hash_table_start(&self) -> u64 {
        HEADER_SIZE + u64::from(self.hash_offset)
    }

    /// Absolute start of file data
    pub fn data_start(&self) -> u64 {
        self.hash_table_start() + HASH_RECORD_SIZE * u64::from(self.file_count)
    }
}

/// Size and data-relative offset of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SizeOffsetRecord {
    /// Payload size
    pub size: u32,
    /// Offset from the start of the data section
    pub offset: u32,
}

/// Hash pair of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct HashRecord {
    /// Low half
    pub hash1: u32,
    /// High half
    pub hash2: u32,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_layout_arithmetic() {
        let header = Tes3Header {
            version: TES3_VERSION,
            hash_offset: 2 * 12 + 10,
            file_count: 2,
        };
        assert_eq!(header.name_table_start(), 36);
        assert_eq!(header.hash_table_start(), 46);
        assert_eq!(header.data_start(), 62);
    }

    #[test]
    fn test_header_bytes() {
        let header = Tes3Header {
            version: TES3_VERSION,
            hash_offset: 0x20,
            file_count: 3,
        };
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[..4], &TES3_MAGIC);
        assert_eq!(bytes, [0, 1, 0, 0, 0x20, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(Tes3Header::read(&mut Cursor::new(&bytes)).unwrap(), header);
    }
}
