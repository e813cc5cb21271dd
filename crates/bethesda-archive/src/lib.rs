//! Readers and builders for Bethesda game archives
//!
#![allow(clippy::cast_possible_truncation)] // Binary format field widths
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::doc_markdown)] // Format names don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::needless_pass_by_value)] // State descriptors are moved into builders
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::use_self)] // Type clarity
//! This crate reads and writes the three archive formats used by Bethesda
//! games, all behind one dispatcher:
//!
//! - **TES3**: Morrowind's fixed-record BSA, uncompressed and flat
//! - **TES4 family**: Oblivion, Fallout 3/New Vegas, Skyrim LE and SE BSAs
//!   with folder records, hash-ordered layout and per-file compression
//! - **BA2**: Fallout 4 and Starfield archives of general files or DX10
//!   textures whose DDS headers are stripped on disk
//!
//! # Reading
//!
//! Opening an archive parses its directory only. Payloads are read when
//! [`Archive::copy_entry_data`] is called, each time through a freshly
//! opened stream, so different entries can be extracted from different
//! threads at once.
//!
//! ```no_run
//! use bethesda_archive::{CodecConfig, open_path};
//!
//! # fn main() -> bethesda_archive::Result<()> {
//! let archive = open_path("Skyrim - Meshes0.bsa", &CodecConfig::default())?;
//! for entry in archive.entries() {
//!     let mut bytes = Vec::new();
//!     archive.copy_entry_data(entry, &mut bytes)?;
//!     println!("{} ({} bytes)", entry.path(), bytes.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Building
//!
//! Every reader reports the [`ArchiveState`] and per-entry [`FileState`]
//! needed to rebuild it. Builders stage each payload (compressing it if
//! required) as it is added, then lay out the archive and patch offsets in
//! a single `build` pass.
//!
//! ```no_run
//! use bethesda_archive::{CodecConfig, create_builder, open_path};
//! use std::io::Cursor;
//!
//! # fn main() -> bethesda_archive::Result<()> {
//! let config = CodecConfig::default();
//! let source = open_path("in.bsa", &config)?;
//! let builder = create_builder(source.state(), &config, 0)?;
//! for entry in source.entries() {
//!     let mut bytes = Vec::new();
//!     source.copy_entry_data(entry, &mut bytes)?;
//!     builder.add_file(entry.state(), &mut Cursor::new(bytes))?;
//! }
//! builder.build_to_path("out.bsa")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod ba2;
pub mod compression;
pub mod config;
pub mod dds;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod io;
pub mod staging;
pub mod tes3;
pub mod tes4;
pub mod text;

pub use config::CodecConfig;
pub use dispatch::{
    Archive, ArchiveBuilder, ArchiveKind, ArchiveState, EntryRef, FileState, create_builder,
    identify, open, open_path,
};
pub use error::{ArchiveError, Result};
pub use io::{FileSource, MemorySource, StreamSource};
