//! Cursor
//!
//! Durable read position of a queue. Two positions are tracked:
//!
//! - **read**: where the next `next()` starts reading
//! - **committed**: just past the last block whose delivery was confirmed
//!
//! Only the committed position is ever written to `cursor.dmp`, so a block
//! that was read but not confirmed is read again after a restart.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HandoffError, Result};

use super::segment::Segment;

/// Name of the checkpoint file inside a queue directory
pub const CURSOR_FILE: &str = "cursor.dmp";

/// Scratch file the checkpoint is written to before the rename
const CURSOR_TMP_FILE: &str = "cursor.dmp.tmp";

/// A byte offset inside a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub offset: u64,
    pub segment_id: u64,
}

impl Position {
    pub fn new(segment_id: u64, offset: u64) -> Self {
        Self { offset, segment_id }
    }
}

/// Read/commit positions of one queue plus the checkpoint file location
#[derive(Debug)]
pub struct Cursor {
    dir: PathBuf,
    read: Position,
    committed: Position,
}

impl Cursor {
    /// Load the checkpoint and attach it to a live segment
    ///
    /// Falls back to the head segment when the checkpoint is missing,
    /// unparsable or points at a segment that is gone. `segments` must be
    /// sorted by id and non-empty.
    pub fn open(dir: &Path, segments: &mut [Segment]) -> Result<Self> {
        let head = segments
            .first()
            .map(Segment::id)
            .ok_or(HandoffError::CursorNotFound(0))?;
        let reset = Position::new(head, 0);

        let mut pos = match Self::load(dir) {
            Ok(Some(pos)) => pos,
            Ok(None) => reset,
            Err(e) => {
                tracing::warn!("cursor {}: {}, reset to head", dir.display(), e);
                reset
            }
        };

        if pos.segment_id < head {
            tracing::warn!(
                "cursor {}: segment {} purged, reset to head {}",
                dir.display(),
                pos.segment_id,
                head
            );
            pos = reset;
        }

        let idx = match find_segment(segments, pos.segment_id) {
            Some(idx) => idx,
            None => {
                tracing::warn!(
                    "cursor {}: segment {} not found, reset to head {}",
                    dir.display(),
                    pos.segment_id,
                    head
                );
                pos = reset;
                find_segment(segments, pos.segment_id)
                    .ok_or(HandoffError::CursorNotFound(pos.segment_id))?
            }
        };

        // the checkpoint may have outlived the bytes it points past
        let size = segments[idx].disk_usage();
        if pos.offset > size {
            tracing::warn!(
                "cursor {}: offset {} beyond segment {} size {}, reset to segment start",
                dir.display(),
                pos.offset,
                pos.segment_id,
                size
            );
            pos.offset = 0;
        }

        segments[idx].seek(pos.offset)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            read: pos,
            committed: pos,
        })
    }

    /// Read the persisted position, `None` if there is no checkpoint yet
    pub fn load(dir: &Path) -> Result<Option<Position>> {
        let path = dir.join(CURSOR_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Persist the committed position
    ///
    /// Written to a scratch file, fsynced, then renamed over `cursor.dmp`
    /// so a crash leaves either the old or the new position.
    pub fn checkpoint(&self) -> Result<()> {
        let tmp = self.dir.join(CURSOR_TMP_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        serde_json::to_writer(&mut file, &self.committed)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, self.dir.join(CURSOR_FILE))?;
        // Make the rename itself durable where directories can be synced.
        match File::open(&self.dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(e) => tracing::debug!("cursor {}: dir fsync: {}", self.dir.display(), e),
        }
        Ok(())
    }

    /// Move the read position to the start of the next segment by id
    ///
    /// Returns false when the read position is already in the tail. With
    /// nothing uncommitted, the committed position follows so the exhausted
    /// segment becomes eligible for retention.
    pub fn advance_to_next_segment(&mut self, segments: &mut [Segment]) -> Result<bool> {
        let next = segments.iter().position(|s| s.id() > self.read.segment_id);
        match next {
            Some(idx) => {
                segments[idx].seek(0)?;
                let settled = !self.has_uncommitted();
                self.read = Position::new(segments[idx].id(), 0);
                if settled {
                    self.committed = self.read;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record the segment reader's offset after a successful read
    pub fn set_read_offset(&mut self, offset: u64) {
        self.read.offset = offset;
    }

    /// Confirm everything read so far
    pub fn commit(&mut self) {
        self.committed = self.read;
    }

    /// Forget reads that were not committed and rewind the segment reader
    pub fn rollback(&mut self, segments: &mut [Segment]) -> Result<()> {
        let idx = find_segment(segments, self.committed.segment_id)
            .ok_or(HandoffError::CursorNotFound(self.committed.segment_id))?;
        segments[idx].seek(self.committed.offset)?;
        self.read = self.committed;
        Ok(())
    }

    /// Jump both positions to the start of `segment_id` (corruption skip)
    pub fn reset_to(&mut self, segments: &mut [Segment], segment_id: u64) -> Result<()> {
        let idx = find_segment(segments, segment_id)
            .ok_or(HandoffError::CursorNotFound(segment_id))?;
        segments[idx].seek(0)?;
        self.read = Position::new(segment_id, 0);
        self.committed = self.read;
        Ok(())
    }

    /// Index of the segment the read position points into
    pub fn segment_index(&self, segments: &[Segment]) -> Result<usize> {
        find_segment(segments, self.read.segment_id)
            .ok_or(HandoffError::CursorNotFound(self.read.segment_id))
    }

    pub fn read_position(&self) -> Position {
        self.read
    }

    pub fn committed_position(&self) -> Position {
        self.committed
    }

    /// Whether a read has happened that is not yet committed
    pub fn has_uncommitted(&self) -> bool {
        self.read != self.committed
    }
}

fn find_segment(segments: &[Segment], id: u64) -> Option<usize> {
    segments.binary_search_by_key(&id, Segment::id).ok()
}
