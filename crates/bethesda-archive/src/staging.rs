//! Disposable staging sinks for builder payloads
//!
//! Builders compress each payload into its own sink before the archive
//! layout is fixed, then copy the sinks into the output in order. Sinks are
//! backed by anonymous temp files (or spooled memory below a threshold) and
//! are released when dropped.

use crate::config::CodecConfig;
use crate::error::Result;
use crate::io::copy_to_limit;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::SpooledTempFile;
use tracing::trace;

/// Allocator of staging sinks for one builder
#[derive(Debug)]
pub struct StagingArena {
    dir: Option<PathBuf>,
    memory_threshold: usize,
    copy_buffer_size: usize,
    next_id: AtomicUsize,
}

impl StagingArena {
    /// Create an arena using the staging settings in `config`
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            dir: config.staging_dir.clone(),
            memory_threshold: config.staging_memory_threshold,
            copy_buffer_size: config.copy_buffer_size,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Allocate a new empty sink
    ///
    /// `size_hint` only decides whether a memory-spooled sink is worth
    /// trying; disk sinks grow as needed.
    pub fn allocate(&self, size_hint: u64) -> Result<StagingSink> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spool = self.memory_threshold > 0
            && usize::try_from(size_hint).is_ok_and(|hint| hint <= self.memory_threshold);

        let backing = if spool {
            Backing::Spooled(SpooledTempFile::new(self.memory_threshold))
        } else {
            match &self.dir {
                Some(dir) => Backing::Disk(tempfile::tempfile_in(dir)?),
                None => Backing::Disk(tempfile::tempfile()?),
            }
        };
        trace!(id, size_hint, spooled = spool, "allocated staging sink");

        Ok(StagingSink {
            id,
            backing,
            copy_buffer_size: self.copy_buffer_size,
        })
    }

    /// Number of sinks handed out so far
    pub fn allocated(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
enum Backing {
    Spooled(SpooledTempFile),
    Disk(File),
}

/// A write-then-read temporary byte sink
#[derive(Debug)]
pub struct StagingSink {
    id: usize,
    backing: Backing,
    copy_buffer_size: usize,
}

impl StagingSink {
    /// Arena-local index of this sink
    pub fn id(&self) -> usize {
        self.id
    }

    /// Total bytes written to the sink
    pub fn written_len(&mut self) -> Result<u64> {
        let here = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(here))?;
        Ok(len)
    }

    /// Copy the sink's full contents into `writer`
    pub fn copy_into<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        let len = self.written_len()?;
        self.seek(SeekFrom::Start(0))?;
        let buffer_size = self.copy_buffer_size;
        copy_to_limit(self, writer, len, buffer_size)
    }
}

impl Write for StagingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.backing {
            Backing::Spooled(f) => f.write(buf),
            Backing::Disk(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.backing {
            Backing::Spooled(f) => f.flush(),
            Backing::Disk(f) => f.flush(),
        }
    }
}

impl Read for StagingSink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.backing {
            Backing::Spooled(f) => f.read(buf),
            Backing::Disk(f) => f.read(buf),
        }
    }
}

impl Seek for StagingSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.backing {
            Backing::Spooled(f) => f.seek(pos),
            Backing::Disk(f) => f.seek(pos),
        }
    }
}
