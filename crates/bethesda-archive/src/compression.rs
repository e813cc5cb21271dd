//! Payload codecs
//!
//! - zlib (deflate with zlib framing) for TES4/FO3 BSA and BA2 entries
//! - LZ4 frame for SSE BSA entries
//! - LZ4 block for BA2 version 3 archives that select it

use crate::error::{ArchiveError, Result};
use crate::io::copy_to_limit;
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{self, Read, Write};

/// A payload compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// zlib-wrapped deflate
    Zlib,
    /// LZ4 frame format
    Lz4Frame,
    /// Raw LZ4 block; the uncompressed size is stored out of band
    Lz4Block,
}

fn decompression_error(err: ArchiveError) -> ArchiveError {
    match err {
        ArchiveError::Io(e)
            if matches!(
                e.kind(),
                io::ErrorKind::InvalidData
                    | io::ErrorKind::InvalidInput
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::Other
            ) =>
        {
            ArchiveError::Decompression(e.to_string())
        }
        other => other,
    }
}

/// Compress everything `reader` yields into `writer`
///
/// Returns the number of uncompressed bytes consumed.
pub fn compress<R, W>(codec: Codec, reader: &mut R, writer: &mut W, zlib_level: u32) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    match codec {
        Codec::Zlib => {
            let mut encoder = ZlibEncoder::new(reader, Compression::new(zlib_level));
            io::copy(&mut encoder, writer)
                .map_err(|e| ArchiveError::Compression(format!("zlib: {e}")))?;
            Ok(encoder.total_in())
        }
        Codec::Lz4Frame => {
            let mut encoder = FrameEncoder::new(writer);
            let consumed = io::copy(reader, &mut encoder)?;
            encoder
                .finish()
                .map_err(|e| ArchiveError::Compression(format!("lz4 frame: {e}")))?;
            Ok(consumed)
        }
        Codec::Lz4Block => {
            let mut raw = Vec::new();
            reader.read_to_end(&mut raw)?;
            writer.write_all(&lz4_flex::block::compress(&raw))?;
            Ok(raw.len() as u64)
        }
    }
}

/// Decompress `reader` into `writer`, stopping after exactly `unpacked_len` bytes
///
/// `reader` should already be limited to the packed payload.
pub fn decompress<R, W>(
    codec: Codec,
    reader: &mut R,
    writer: &mut W,
    unpacked_len: u64,
    buffer_size: usize,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    match codec {
        Codec::Zlib => {
            let mut decoder = ZlibDecoder::new(reader);
            copy_to_limit(&mut decoder, writer, unpacked_len, buffer_size)
                .map_err(decompression_error)
        }
        Codec::Lz4Frame => {
            let mut decoder = FrameDecoder::new(reader);
            copy_to_limit(&mut decoder, writer, unpacked_len, buffer_size)
                .map_err(decompression_error)
        }
        Codec::Lz4Block => {
            let expected = usize::try_from(unpacked_len)
                .map_err(|_| ArchiveError::overflow("unpacked size", unpacked_len))?;
            let mut packed = Vec::new();
            reader.read_to_end(&mut packed)?;
            let raw = lz4_flex::block::decompress(&packed, expected)
                .map_err(|e| ArchiveError::Decompression(format!("lz4 block: {e}")))?;
            if raw.len() != expected {
                return Err(ArchiveError::Truncated {
                    expected: unpacked_len,
                    copied: raw.len() as u64,
                });
            }
            writer.write_all(&raw)?;
            Ok(unpacked_len)
        }
    }
}

/// Compress an in-memory buffer
pub fn compress_bytes(codec: Codec, data: &[u8], zlib_level: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    compress(codec, &mut &data[..], &mut out, zlib_level)?;
    Ok(out)
}

/// Decompress an in-memory buffer of known unpacked length
pub fn decompress_bytes(codec: Codec, data: &[u8], unpacked_len: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decompress(codec, &mut &data[..], &mut out, unpacked_len, 64 * 1024)?;
    Ok(out)
}
