//! Format detection and a uniform surface over the three codecs
//!
//! [`open`] sniffs the signature and returns an [`Archive`];
//! [`create_builder`] turns an [`ArchiveState`] back into the matching
//! builder. Both hide which format is underneath.

use crate::ba2::{
    BA2_MAGIC, Ba2Archive, Ba2ArchiveState, Ba2Builder, Ba2Entry, Ba2EntryKind, Ba2FileState,
};
use crate::config::CodecConfig;
use crate::error::{ArchiveError, Result};
use crate::io::{FileSource, StreamSource};
use crate::tes3::{TES3_MAGIC, Tes3Archive, Tes3ArchiveState, Tes3Builder, Tes3Entry, Tes3FileState};
use crate::tes4::{BSA_MAGIC, Tes4Archive, Tes4ArchiveState, Tes4Builder, Tes4Entry, Tes4FileState};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Archive family identified from a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// TES3 fixed-record archive
    Legacy,
    /// TES4-family folder/file-record archive
    FolderFile,
    /// BA2 general/texture archive
    GeneralTexture,
    /// None of the above
    Unknown,
}

/// Identify an archive from its first bytes
///
/// BA2 needs 12 bytes: the magic plus a type token naming a known entry kind.
pub fn identify(bytes: &[u8]) -> ArchiveKind {
    let Some(magic) = bytes.get(..4) else {
        return ArchiveKind::Unknown;
    };
    if magic == TES3_MAGIC {
        ArchiveKind::Legacy
    } else if magic == BSA_MAGIC {
        ArchiveKind::FolderFile
    } else if magic == BA2_MAGIC {
        bytes
            .get(8..12)
            .and_then(|token| <[u8; 4]>::try_from(token).ok())
            .and_then(Ba2EntryKind::from_token)
            .map_or(ArchiveKind::Unknown, |_| ArchiveKind::GeneralTexture)
    } else {
        ArchiveKind::Unknown
    }
}

/// Open the archive behind `source`, whatever its format
pub fn open(source: Arc<dyn StreamSource>, config: &CodecConfig) -> Result<Archive> {
    let mut signature = [0u8; 12];
    let mut filled = 0;
    {
        let mut stream = source.open()?;
        while filled < signature.len() {
            match stream.read(&mut signature[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
    }

    let magic = [signature[0], signature[1], signature[2], signature[3]];
    let kind = identify(&signature[..filled]);
    debug!(source = %source.describe(), ?kind, "identified archive");

    match kind {
        ArchiveKind::Legacy => Ok(Archive::Tes3(Tes3Archive::open(source, config)?)),
        ArchiveKind::FolderFile => Ok(Archive::Tes4(Tes4Archive::open(source, config)?)),
        ArchiveKind::GeneralTexture => Ok(Archive::Ba2(Ba2Archive::open(source, config)?)),
        // a BA2 with a bad token gets the BA2 reader's more specific error
        ArchiveKind::Unknown if filled >= 4 && magic == BA2_MAGIC => {
            Ok(Archive::Ba2(Ba2Archive::open(source, config)?))
        }
        ArchiveKind::Unknown => Err(ArchiveError::UnrecognizedArchive(magic)),
    }
}

/// Open the archive file at `path`, whatever its format
pub fn open_path<P: AsRef<Path>>(path: P, config: &CodecConfig) -> Result<Archive> {
    open(Arc::new(FileSource::new(path)), config)
}

/// Create an empty builder for the format `state` describes
pub fn create_builder(
    state: ArchiveState,
    config: &CodecConfig,
    size_hint: u64,
) -> Result<ArchiveBuilder> {
    Ok(match state {
        ArchiveState::Tes3(state) => {
            ArchiveBuilder::Tes3(Tes3Builder::new(state, config, size_hint))
        }
        ArchiveState::Tes4(state) => {
            ArchiveBuilder::Tes4(Tes4Builder::new(state, config, size_hint)?)
        }
        ArchiveState::Ba2(state) => ArchiveBuilder::Ba2(Ba2Builder::new(state, config, size_hint)?),
    })
}

/// Archive-level settings of any format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format")]
pub enum ArchiveState {
    /// TES3 settings
    Tes3(Tes3ArchiveState),
    /// TES4-family settings
    Tes4(Tes4ArchiveState),
    /// BA2 settings
    Ba2(Ba2ArchiveState),
}

impl ArchiveState {
    /// Archive family these settings build
    pub fn kind(&self) -> ArchiveKind {
        match self {
            Self::Tes3(_) => ArchiveKind::Legacy,
            Self::Tes4(_) => ArchiveKind::FolderFile,
            Self::Ba2(_) => ArchiveKind::GeneralTexture,
        }
    }
}

/// Per-file settings of any format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format")]
pub enum FileState {
    /// TES3 entry
    Tes3(Tes3FileState),
    /// TES4-family entry
    Tes4(Tes4FileState),
    /// BA2 entry
    Ba2(Ba2FileState),
}

impl FileState {
    /// Ordinal of the file in its source archive
    pub fn index(&self) -> usize {
        match self {
            Self::Tes3(s) => s.index,
            Self::Tes4(s) => s.index,
            Self::Ba2(s) => s.index(),
        }
    }

    /// Archive path
    pub fn path(&self) -> &str {
        match self {
            Self::Tes3(s) => &s.path,
            Self::Tes4(s) => &s.path,
            Self::Ba2(s) => s.path(),
        }
    }

    fn kind(&self) -> ArchiveKind {
        match self {
            Self::Tes3(_) => ArchiveKind::Legacy,
            Self::Tes4(_) => ArchiveKind::FolderFile,
            Self::Ba2(_) => ArchiveKind::GeneralTexture,
        }
    }
}

/// Borrowed entry of an [`Archive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRef<'a> {
    /// TES3 entry
    Tes3(&'a Tes3Entry),
    /// TES4-family entry
    Tes4(&'a Tes4Entry),
    /// BA2 entry
    Ba2(&'a Ba2Entry),
}

impl EntryRef<'_> {
    /// Position of the entry in its archive
    pub fn index(&self) -> usize {
        match self {
            Self::Tes3(e) => e.index(),
            Self::Tes4(e) => e.index(),
            Self::Ba2(e) => e.index(),
        }
    }

    /// Archive path
    pub fn path(&self) -> &str {
        match self {
            Self::Tes3(e) => e.path(),
            Self::Tes4(e) => e.path(),
            Self::Ba2(e) => e.path(),
        }
    }

    /// Size of the extracted bytes
    ///
    /// Fails only for BA2 textures whose pixel format has no DDS header.
    pub fn size(&self) -> Result<u64> {
        match self {
            Self::Tes3(e) => Ok(e.size()),
            Self::Tes4(e) => Ok(e.size()),
            Self::Ba2(e) => e.size(),
        }
    }

    /// Settings needed to add this entry to a new builder
    pub fn state(&self) -> FileState {
        match self {
            Self::Tes3(e) => FileState::Tes3(e.state()),
            Self::Tes4(e) => FileState::Tes4(e.state()),
            Self::Ba2(e) => FileState::Ba2(e.state()),
        }
    }
}

/// An open archive of any format
#[derive(Debug)]
pub enum Archive {
    /// TES3 archive
    Tes3(Tes3Archive),
    /// TES4-family archive
    Tes4(Tes4Archive),
    /// BA2 archive
    Ba2(Ba2Archive),
}

impl Archive {
    /// Archive family
    pub fn kind(&self) -> ArchiveKind {
        match self {
            Self::Tes3(_) => ArchiveKind::Legacy,
            Self::Tes4(_) => ArchiveKind::FolderFile,
            Self::Ba2(_) => ArchiveKind::GeneralTexture,
        }
    }

    /// All entries in on-disk order
    pub fn entries(&self) -> Vec<EntryRef<'_>> {
        match self {
            Self::Tes3(a) => a.entries().iter().map(EntryRef::Tes3).collect(),
            Self::Tes4(a) => a.entries().iter().map(EntryRef::Tes4).collect(),
            Self::Ba2(a) => a.entries().iter().map(EntryRef::Ba2).collect(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        match self {
            Self::Tes3(a) => a.entries().len(),
            Self::Tes4(a) => a.entries().len(),
            Self::Ba2(a) => a.entries().len(),
        }
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an entry by path
    pub fn find_by_path(&self, path: &str) -> Option<EntryRef<'_>> {
        match self {
            Self::Tes3(a) => a.find_by_path(path).map(EntryRef::Tes3),
            Self::Tes4(a) => a.find_by_path(path).map(EntryRef::Tes4),
            Self::Ba2(a) => a.find_by_path(path).map(EntryRef::Ba2),
        }
    }

    /// Settings needed to rebuild this archive
    pub fn state(&self) -> ArchiveState {
        match self {
            Self::Tes3(a) => ArchiveState::Tes3(a.state()),
            Self::Tes4(a) => ArchiveState::Tes4(a.state()),
            Self::Ba2(a) => ArchiveState::Ba2(a.state()),
        }
    }

    /// Copy an entry's bytes into `sink`, returning the number written
    pub fn copy_entry_data<W: Write + ?Sized>(
        &self,
        entry: EntryRef<'_>,
        sink: &mut W,
    ) -> Result<u64> {
        match (self, entry) {
            (Self::Tes3(a), EntryRef::Tes3(e)) => a.copy_entry_data(e, sink),
            (Self::Tes4(a), EntryRef::Tes4(e)) => a.copy_entry_data(e, sink),
            (Self::Ba2(a), EntryRef::Ba2(e)) => a.copy_entry_data(e, sink),
            (_, entry) => Err(ArchiveError::ForeignEntry(entry.path().to_string())),
        }
    }
}

/// A builder of any format
#[derive(Debug)]
pub enum ArchiveBuilder {
    /// TES3 builder
    Tes3(Tes3Builder),
    /// TES4-family builder
    Tes4(Tes4Builder),
    /// BA2 builder
    Ba2(Ba2Builder),
}

impl ArchiveBuilder {
    /// Archive family being built
    pub fn kind(&self) -> ArchiveKind {
        match self {
            Self::Tes3(_) => ArchiveKind::Legacy,
            Self::Tes4(_) => ArchiveKind::FolderFile,
            Self::Ba2(_) => ArchiveKind::GeneralTexture,
        }
    }

    /// Stage one file; safe to call from several threads at once
    pub fn add_file<R: Read + ?Sized>(&self, state: FileState, reader: &mut R) -> Result<()> {
        match (self, state) {
            (Self::Tes3(b), FileState::Tes3(s)) => b.add_file(s, reader),
            (Self::Tes4(b), FileState::Tes4(s)) => b.add_file(s, reader),
            (Self::Ba2(b), FileState::Ba2(s)) => b.add_file(s, reader),
            (builder, state) => Err(ArchiveError::InvalidState(format!(
                "{:?} file state for {} given to a {:?} builder",
                state.kind(),
                state.path(),
                builder.kind()
            ))),
        }
    }

    /// Number of staged files
    pub fn len(&self) -> usize {
        match self {
            Self::Tes3(b) => b.len(),
            Self::Tes4(b) => b.len(),
            Self::Ba2(b) => b.len(),
        }
    }

    /// Whether no files have been staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the archive, returning the number of bytes written
    pub fn build<W: Write + Seek>(self, writer: &mut W) -> Result<u64> {
        match self {
            Self::Tes3(b) => b.build(writer),
            Self::Tes4(b) => b.build(writer),
            Self::Ba2(b) => b.build(writer),
        }
    }

    /// Write the archive to a new file at `path`
    pub fn build_to_path<P: AsRef<Path>>(self, path: P) -> Result<u64> {
        let mut writer = BufWriter::new(File::create(path)?);
        let written = self.build(&mut writer)?;
        writer.flush()?;
        Ok(written)
    }
}
