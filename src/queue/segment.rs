//! Segment
//!
//! A single size-bounded file holding a sequence of blocks. The file is
//! opened twice: an append-writer for the tail role and an independent
//! sequential reader for the cursor role, each with its own position.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::SyncStrategy;
use crate::error::{HandoffError, Result};

use super::block::Block;

/// Segment file name for an id: the plain decimal id
pub fn segment_file_name(id: u64) -> String {
    id.to_string()
}

/// Sorted ids of the segment files in `dir`; other files are ignored
pub fn segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = parse_segment_id(&entry.file_name().to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Decode every block of the file at `path` from `from` to the end
///
/// Read-only; stops at the first torn or corrupt block and reports why.
pub fn scan_file(path: &Path, from: u64, max_block_size: u32) -> Result<ScanReport> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut reader = BufReader::new(file);

    let mut report = ScanReport {
        blocks: 0,
        end_offset: from,
        corruption: None,
    };
    loop {
        match Block::decode(&mut reader, max_block_size) {
            Ok(Some((_, len))) => {
                report.blocks += 1;
                report.end_offset += len;
            }
            Ok(None) => break,
            Err(HandoffError::Corrupt(reason)) => {
                report.corruption = Some(reason);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

/// Parse a segment id from a file name
/// "42" → Some(42), "00000000000000000042" → Some(42), "cursor.dmp" → None
pub fn parse_segment_id(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Result of scanning a segment without moving its reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Whole blocks decoded
    pub blocks: u64,
    /// Offset just past the last whole block
    pub end_offset: u64,
    /// Why the scan stopped early, if it did
    pub corruption: Option<String>,
}

/// One segment file of a queue
pub struct Segment {
    id: u64,
    path: PathBuf,

    /// Bytes appended so far (file length at open + appends)
    size: u64,
    max_size: u64,

    sync_strategy: SyncStrategy,
    max_block_size: u32,

    /// Append capability
    writer: Option<BufWriter<File>>,
    /// Bytes sitting in the writer buffer
    dirty: bool,
    /// Set after a failed write: a partial block may be on disk
    sealed: bool,

    /// Sequential read capability
    reader: Option<BufReader<File>>,
    read_offset: u64,
}

impl Segment {
    /// Open (creating if absent) a segment file for append and read
    pub fn open(
        id: u64,
        path: &Path,
        max_size: u64,
        sync_strategy: SyncStrategy,
        max_block_size: u32,
    ) -> Result<Self> {
        let write_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let read_file = File::open(path)?;
        let size = write_file.metadata()?.len();

        tracing::trace!("segment {} opened, {} bytes", path.display(), size);

        Ok(Self {
            id,
            path: path.to_path_buf(),
            size,
            max_size,
            sync_strategy,
            max_block_size,
            writer: Some(BufWriter::new(write_file)),
            dirty: false,
            sealed: false,
            reader: Some(BufReader::new(read_file)),
            read_offset: 0,
        })
    }

    /// Append a block at the end of the file
    ///
    /// Returns the encoded length. Fails with `SegmentFull` when the block
    /// does not fit; the caller rolls a new segment.
    pub fn append(&mut self, block: &Block, checksum: bool) -> Result<u64> {
        let writer = self.writer.as_mut().ok_or(HandoffError::SegmentClosed)?;

        let len = block.encoded_len(checksum);
        if self.sealed || self.size + len > self.max_size {
            return Err(HandoffError::SegmentFull);
        }

        let encoded = block.encode(checksum)?;
        let written = writer.write_all(&encoded).and_then(|_| match self.sync_strategy {
            SyncStrategy::EveryWrite => {
                writer.flush()?;
                writer.get_ref().sync_data()
            }
            SyncStrategy::Buffered => Ok(()),
        });
        if let Err(e) = written {
            self.sealed = true;
            tracing::warn!("segment {} sealed after failed write: {}", self.path.display(), e);
            return Err(e.into());
        }

        self.dirty = self.sync_strategy == SyncStrategy::Buffered;
        self.size += len;
        Ok(len)
    }

    /// Read the block at the reader position
    ///
    /// Returns:
    /// - `Ok(Some(block))`: reader advanced past the block
    /// - `Ok(None)`: end of segment, nothing consumed
    /// - `Err(Corrupt)`: the bytes at the position are not a whole block
    pub fn read_one(&mut self) -> Result<Option<Block>> {
        let reader = self.reader.as_mut().ok_or(HandoffError::SegmentClosed)?;

        match Block::decode(reader, self.max_block_size)? {
            Some((block, len)) => {
                self.read_offset += len;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Move the reader to an absolute offset
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(HandoffError::SegmentClosed)?;
        let pos = reader.seek(SeekFrom::Start(offset))?;
        if pos != offset {
            return Err(HandoffError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("bad seek: expected {}, got {}", offset, pos),
            )));
        }
        self.read_offset = offset;
        Ok(())
    }

    /// Push buffered bytes to the file so the reader can see them
    pub fn flush_buffer(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Flush buffered bytes and fsync
    pub fn sync(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(HandoffError::SegmentClosed)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        self.dirty = false;
        Ok(())
    }

    /// Decode every block from `from` to the end without touching the
    /// segment's own reader
    pub fn scan(&self, from: u64) -> Result<ScanReport> {
        scan_file(&self.path, from, self.max_block_size)
    }

    /// Close both file handles, syncing the writer first
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        self.reader = None;
        self.dirty = false;
        Ok(())
    }

    /// Close then delete the file
    pub fn remove(mut self) -> Result<()> {
        self.close()?;
        fs::remove_file(&self.path)?;
        tracing::trace!("segment {} removed", self.path.display());
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current reader offset
    pub fn offset(&self) -> u64 {
        self.read_offset
    }

    /// Bytes used on disk (including still-buffered appends)
    pub fn disk_usage(&self) -> u64 {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn last_modified(&self) -> Result<SystemTime> {
        Ok(fs::metadata(&self.path)?.modified()?)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                tracing::error!("segment {} flush on drop: {}", self.path.display(), e);
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("max_size", &self.max_size)
            .field("read_offset", &self.read_offset)
            .finish()
    }
}
