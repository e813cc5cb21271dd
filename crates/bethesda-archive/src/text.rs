//! Name encodings and the string forms used on disk
//!
//! Which text encoding a name uses depends on the archive version:
//!
//! | Version | Encoding |
//! |---|---|
//! | TES3 | ASCII, anything else becomes `?` |
//! | TES4 (0x67) | UTF-7 |
//! | FO3 (0x68) | UTF-8 |
//! | SSE (0x69) | Windows-1252 |
//! | BA2 name table | UTF-8 |
//!
//! Four string forms appear in the formats:
//!
//! - **bzstring**: length byte (including terminator), bytes, `\0`
//! - **bstring**: length byte, bytes, no terminator
//! - **zstring**: bytes, `\0`, no length prefix
//! - **wstring**: little-endian `u16` length, bytes

use crate::error::{ArchiveError, Result};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use encoding_rs::WINDOWS_1252;
use std::io::{Read, Write};

/// Modified base64 used inside UTF-7 shifted sequences
const UTF7_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Text encoding of names stored in an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// 7-bit ASCII
    Ascii,
    /// UTF-7 (RFC 2152)
    Utf7,
    /// UTF-8
    Utf8,
    /// Windows-1252 single-byte code page
    Windows1252,
}

impl TextEncoding {
    /// Encoding used by a folder/file-record archive of the given version
    pub fn for_bsa_version(version: u32) -> Self {
        match version {
            0x68 => Self::Utf8,
            0x69 => Self::Windows1252,
            _ => Self::Utf7,
        }
    }

    /// Encode a string; characters the encoding cannot represent become `?`
    pub fn encode(self, value: &str) -> Vec<u8> {
        match self {
            Self::Ascii => value
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Self::Utf8 => value.as_bytes().to_vec(),
            Self::Windows1252 => {
                let mut out = Vec::with_capacity(value.len());
                let mut buf = [0u8; 4];
                for c in value.chars() {
                    let (bytes, _, unmappable) = WINDOWS_1252.encode(c.encode_utf8(&mut buf));
                    if unmappable {
                        out.push(b'?');
                    } else {
                        out.extend_from_slice(&bytes);
                    }
                }
                out
            }
            Self::Utf7 => utf7_encode(value),
        }
    }

    /// Decode bytes; invalid sequences are replaced rather than rejected
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Windows1252 => WINDOWS_1252
                .decode_without_bom_handling(bytes)
                .0
                .into_owned(),
            Self::Utf7 => utf7_decode(bytes),
        }
    }
}

/// Characters UTF-7 writes as themselves
fn utf7_direct(c: char) -> bool {
    c.is_ascii() && c != '+' && (c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\r' | '\n'))
}

fn utf7_encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut shifted: Vec<u16> = Vec::new();

    let flush = |shifted: &mut Vec<u16>, out: &mut Vec<u8>| {
        if shifted.is_empty() {
            return;
        }
        let raw: Vec<u8> = shifted.iter().flat_map(|u| u.to_be_bytes()).collect();
        out.push(b'+');
        out.extend_from_slice(UTF7_BASE64.encode(raw).as_bytes());
        out.push(b'-');
        shifted.clear();
    };

    for c in value.chars() {
        if utf7_direct(c) {
            flush(&mut shifted, &mut out);
            out.push(c as u8);
        } else if c == '+' && shifted.is_empty() {
            out.extend_from_slice(b"+-");
        } else {
            let mut units = [0u16; 2];
            shifted.extend_from_slice(c.encode_utf16(&mut units));
        }
    }
    flush(&mut shifted, &mut out);
    out
}

fn utf7_decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'+' {
            out.push(if b.is_ascii() { b as char } else { '\u{FFFD}' });
            continue;
        }
        if bytes.get(i) == Some(&b'-') {
            out.push('+');
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len()
            && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'+' | b'/'))
        {
            i += 1;
        }
        match UTF7_BASE64.decode(&bytes[start..i]) {
            Ok(raw) => {
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                out.push_str(&String::from_utf16_lossy(&units));
            }
            Err(_) => out.push('\u{FFFD}'),
        }
        if bytes.get(i) == Some(&b'-') {
            i += 1;
        }
    }
    out
}

/// Convert forward slashes to the backslashes archives store
pub fn normalize_path(path: &str) -> String {
    path.replace('/', "\\")
}

fn length_byte(len: usize, value: &str) -> Result<u8> {
    u8::try_from(len).map_err(|_| ArchiveError::StringTooLong {
        len,
        max: usize::from(u8::MAX),
        value: value.to_string(),
    })
}

/// Encoded bzstring: length byte counting the terminator, bytes, `\0`
pub fn bzstring_bytes(encoding: TextEncoding, value: &str) -> Result<Vec<u8>> {
    let bytes = encoding.encode(value);
    let len = length_byte(bytes.len() + 1, value)?;
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(len);
    out.extend_from_slice(&bytes);
    out.push(0);
    Ok(out)
}

/// Encoded bstring: length byte, bytes, no terminator
pub fn bstring_bytes(encoding: TextEncoding, value: &str) -> Result<Vec<u8>> {
    let bytes = encoding.encode(value);
    let len = length_byte(bytes.len(), value)?;
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(len);
    out.extend_from_slice(&bytes);
    Ok(out)
}

/// Encoded zstring: bytes followed by `\0`
pub fn zstring_bytes(encoding: TextEncoding, value: &str) -> Vec<u8> {
    let mut out = encoding.encode(value);
    out.push(0);
    out
}

/// Encoded wstring: `u16` length, bytes
pub fn wstring_bytes(encoding: TextEncoding, value: &str) -> Result<Vec<u8>> {
    let bytes = encoding.encode(value);
    let len = u16::try_from(bytes.len()).map_err(|_| ArchiveError::StringTooLong {
        len: bytes.len(),
        max: usize::from(u16::MAX),
        value: value.to_string(),
    })?;
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&bytes);
    Ok(out)
}

/// Write a bzstring, returning the bytes written
pub fn write_bzstring<W: Write>(
    writer: &mut W,
    encoding: TextEncoding,
    value: &str,
) -> Result<usize> {
    let bytes = bzstring_bytes(encoding, value)?;
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Write a bstring, returning the bytes written
pub fn write_bstring<W: Write>(
    writer: &mut W,
    encoding: TextEncoding,
    value: &str,
) -> Result<usize> {
    let bytes = bstring_bytes(encoding, value)?;
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Write a zstring, returning the bytes written
pub fn write_zstring<W: Write>(
    writer: &mut W,
    encoding: TextEncoding,
    value: &str,
) -> Result<usize> {
    let bytes = zstring_bytes(encoding, value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Write a wstring, returning the bytes written
pub fn write_wstring<W: Write>(
    writer: &mut W,
    encoding: TextEncoding,
    value: &str,
) -> Result<usize> {
    let bytes = wstring_bytes(encoding, value)?;
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    reader.read_exact(&mut b)?;
    Ok(b[0])
}

/// Read a bzstring; a zero length byte yields an empty string
pub fn read_bzstring<R: Read>(reader: &mut R, encoding: TextEncoding) -> Result<String> {
    let len = usize::from(read_byte(reader)?);
    if len == 0 {
        return Ok(String::new());
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    Ok(encoding.decode(&bytes))
}

/// Read a bstring
pub fn read_bstring<R: Read>(reader: &mut R, encoding: TextEncoding) -> Result<String> {
    let len = usize::from(read_byte(reader)?);
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(encoding.decode(&bytes))
}

/// Read bytes up to and including a `\0` terminator
pub fn read_zstring<R: Read>(reader: &mut R, encoding: TextEncoding) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        match read_byte(reader)? {
            0 => break,
            b => bytes.push(b),
        }
    }
    Ok(encoding.decode(&bytes))
}

/// Read a wstring
pub fn read_wstring<R: Read>(reader: &mut R, encoding: TextEncoding) -> Result<String> {
    let mut len = [0u8; 2];
    reader.read_exact(&mut len)?;
    let mut bytes = vec![0u8; usize::from(u16::from_le_bytes(len))];
    reader.read_exact(&mut bytes)?;
    Ok(encoding.decode(&bytes))
}
