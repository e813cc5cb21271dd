//! Stream plumbing shared by readers and builders

use crate::error::{ArchiveError, Result};
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A readable, seekable stream that can move between threads
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Backing data of an archive that can be reopened on demand
///
/// Readers call [`StreamSource::open`] once for header parsing and once per
/// extraction, so concurrent extractions never share a cursor.
pub trait StreamSource: fmt::Debug + Send + Sync {
    /// Open a fresh stream positioned at the start of the archive
    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;

    /// Human-readable description for log output
    fn describe(&self) -> String;
}

/// Archive stored in a file on disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source for the file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StreamSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Archive held in shared memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    /// Create a source over `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl StreamSource for MemorySource {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn describe(&self) -> String {
        format!("<memory, {} bytes>", self.data.len())
    }
}

/// Copy exactly `limit` bytes from `reader` to `writer`
///
/// Fails with [`ArchiveError::Truncated`] if the reader runs dry first.
pub fn copy_to_limit<R, W>(
    reader: &mut R,
    writer: &mut W,
    limit: u64,
    buffer_size: usize,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let cap = usize::try_from(limit).unwrap_or(usize::MAX).max(1);
    let mut buffer = vec![0u8; buffer_size.clamp(1, cap)];
    let mut copied = 0u64;
    while copied < limit {
        let want =
            usize::try_from(limit - copied).map_or(buffer.len(), |left| left.min(buffer.len()));
        let read = match reader.read(&mut buffer[..want]) {
            Ok(0) => {
                return Err(ArchiveError::Truncated {
                    expected: limit,
                    copied,
                });
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
    }
    Ok(copied)
}

/// Read a little-endian `u32`
pub(crate) fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Check that `count` records of `record_size` bytes fit between `start`
/// and the end of `stream`
///
/// Header counts must pass this before any table is allocated from them.
/// The stream position is left unchanged.
pub(crate) fn ensure_table_fits<S: Seek + ?Sized>(
    stream: &mut S,
    start: u64,
    count: u64,
    record_size: u64,
) -> Result<()> {
    let position = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(position))?;

    let needed = count.saturating_mul(record_size);
    let available = end.saturating_sub(start);
    if needed > available {
        return Err(ArchiveError::Truncated {
            expected: needed,
            copied: available,
        });
    }
    Ok(())
}

/// Width of an offset field on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetWidth {
    /// 32-bit little-endian
    U32,
    /// 64-bit little-endian
    U64,
}

impl OffsetWidth {
    /// Field size in bytes
    pub const fn size(self) -> u64 {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// An offset field written as a placeholder and patched once its target is known
///
/// Consuming `patch` is the only way to fill the field in, so a field can be
/// patched at most once. Builders keep unpatched fields in an `Option` and
/// report any left over as [`ArchiveError::UnpatchedOffset`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PendingOffsetField {
    position: u64,
    width: OffsetWidth,
}

impl PendingOffsetField {
    /// Write a zero placeholder at the current position
    pub fn reserve<W: Write + Seek + ?Sized>(writer: &mut W, width: OffsetWidth) -> Result<Self> {
        let position = writer.stream_position()?;
        match width {
            OffsetWidth::U32 => writer.write_all(&0u32.to_le_bytes())?,
            OffsetWidth::U64 => writer.write_all(&0u64.to_le_bytes())?,
        }
        Ok(Self { position, width })
    }

    /// Track a zeroed field that a record write has already emitted at `position`
    pub fn at(position: u64, width: OffsetWidth) -> Self {
        Self { position, width }
    }

    /// Stream position of the placeholder
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Field width
    pub fn width(&self) -> OffsetWidth {
        self.width
    }

    /// Write `value` into the field and return to the current position
    pub fn patch<W: Write + Seek + ?Sized>(self, writer: &mut W, value: u64) -> Result<()> {
        let resume = writer.stream_position()?;
        writer.seek(SeekFrom::Start(self.position))?;
        match self.width {
            OffsetWidth::U32 => {
                let value =
                    u32::try_from(value).map_err(|_| ArchiveError::overflow("offset", value))?;
                writer.write_all(&value.to_le_bytes())?;
            }
            OffsetWidth::U64 => writer.write_all(&value.to_le_bytes())?,
        }
        writer.seek(SeekFrom::Start(resume))?;
        Ok(())
    }

    /// Patch the field with the writer's current position and return it
    pub fn patch_here<W: Write + Seek + ?Sized>(self, writer: &mut W) -> Result<u64> {
        let here = writer.stream_position()?;
        self.patch(writer, here)?;
        Ok(here)
    }
}

/// Fail with [`ArchiveError::UnpatchedOffset`] if a placeholder is still pending
pub(crate) fn ensure_patched(field: Option<&PendingOffsetField>, owner: &str) -> Result<()> {
    match field {
        Some(field) => Err(ArchiveError::UnpatchedOffset {
            position: field.position,
            owner: owner.to_string(),
        }),
        None => Ok(()),
    }
}

/// Fail with [`ArchiveError::LayoutViolation`] unless the writer is at `expected`
pub(crate) fn expect_position<S: Seek + ?Sized>(
    stream: &mut S,
    expected: u64,
    stage: &'static str,
) -> Result<()> {
    let actual = stream.stream_position()?;
    if actual == expected {
        Ok(())
    } else {
        Err(ArchiveError::LayoutViolation {
            stage,
            expected,
            actual,
        })
    }
}
