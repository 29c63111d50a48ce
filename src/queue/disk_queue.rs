//! Queue
//!
//! Owns the ordered segments and the cursor of one (cluster, topic).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{Config, SyncStrategy};
use crate::error::{HandoffError, Result};

use super::block::Block;
use super::cursor::{Cursor, Position, CURSOR_FILE};
use super::segment::{parse_segment_id, scan_file, segment_file_name, segment_ids, Segment};

// =============================================================================
// Queue Key
// =============================================================================

/// The (cluster, topic) pair a queue buffers for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClusterTopic {
    pub cluster: String,
    pub topic: String,
}

impl ClusterTopic {
    /// Both parts become directory names, so they must be plain names
    pub fn new(cluster: impl Into<String>, topic: impl Into<String>) -> Result<Self> {
        let cluster = cluster.into();
        let topic = topic.into();
        validate_name(&cluster)?;
        validate_name(&topic)?;
        Ok(Self { cluster, topic })
    }

    /// {base}/{cluster}
    pub fn cluster_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.cluster)
    }

    /// {base}/{cluster}/{topic}
    pub fn topic_dir(&self, base: &Path) -> PathBuf {
        self.cluster_dir(base).join(&self.topic)
    }
}

impl fmt::Display for ClusterTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.topic)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(HandoffError::InvalidName(name.to_string()));
    }
    Ok(())
}

// =============================================================================
// Options / State / Stats
// =============================================================================

/// The subset of `Config` a single queue needs
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_segment_size: u64,
    pub max_queue_size: Option<u64>,
    pub max_block_size: u32,
    pub sync_strategy: SyncStrategy,
    pub block_checksum: bool,
    pub retention_min_age: Duration,
}

impl From<&Config> for QueueOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_segment_size: config.max_segment_size,
            max_queue_size: config.max_queue_size,
            max_block_size: config.max_block_size,
            sync_strategy: config.sync_strategy,
            block_checksum: config.block_checksum,
            retention_min_age: config.retention_min_age,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Open → Draining (pump attached) → Closing → Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueState {
    Open,
    Draining,
    Closing,
    Closed,
}

/// Point-in-time view of a queue, for operators
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub cluster_topic: ClusterTopic,
    pub dir: PathBuf,
    pub state: QueueState,
    pub segments: Vec<u64>,
    pub read: Position,
    pub committed: Position,
    pub disk_usage: u64,
    pub append_n: u64,
    pub deliver_n: u64,
    pub corrupt_n: u64,
    pub inflights: i64,
    pub empty_inflight: bool,
}

/// Offline view of a queue directory, built without opening the queue
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub cluster_topic: ClusterTopic,
    pub dir: PathBuf,
    pub segments: Vec<u64>,
    /// Where an open would resume
    pub committed: Position,
    pub disk_usage: u64,
    /// Whole blocks behind `committed`
    pub pending: u64,
    /// Segments whose scan stopped at a torn or corrupt block
    pub corrupt_segments: Vec<u64>,
}

// =============================================================================
// Queue
// =============================================================================

/// Mutable state guarded by the per-queue lock
struct Inner {
    state: QueueState,
    /// Sorted by id; `segments[0]` is the head, the last one the tail
    segments: Vec<Segment>,
    cursor: Option<Cursor>,
}

/// Disk-backed FIFO of blocks for one (cluster, topic)
///
/// ## Concurrency
/// - `inner`: one Mutex per queue serializes append (may roll the tail),
///   next/commit/rollback (cursor) and purge (may drop the head)
/// - counters: atomics, readable without the lock
/// - `wake_tx`: bounded(1) channel nudged on every append so an idle pump
///   wakes without polling
pub struct Queue {
    cluster_topic: ClusterTopic,
    /// The storage root this queue lives in
    base_dir: PathBuf,
    /// {base_dir}/{cluster}/{topic}
    dir: PathBuf,
    options: QueueOptions,

    inner: Mutex<Inner>,

    append_n: AtomicU64,
    deliver_n: AtomicU64,
    corrupt_n: AtomicU64,
    inflights: AtomicI64,
    empty_inflight: AtomicBool,

    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Queue {
    /// Create a closed queue handle; call `open()` before use
    pub fn new(base_dir: &Path, cluster_topic: ClusterTopic, options: QueueOptions) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            dir: cluster_topic.topic_dir(base_dir),
            base_dir: base_dir.to_path_buf(),
            cluster_topic,
            options,
            inner: Mutex::new(Inner {
                state: QueueState::Closed,
                segments: Vec::new(),
                cursor: None,
            }),
            append_n: AtomicU64::new(0),
            deliver_n: AtomicU64::new(0),
            corrupt_n: AtomicU64::new(0),
            inflights: AtomicI64::new(0),
            empty_inflight: AtomicBool::new(false),
            wake_tx,
            wake_rx,
        }
    }

    /// Read-only scan of `{base_dir}/{cluster}/{topic}`
    ///
    /// Resolves the checkpoint the way `open()` would, but creates no
    /// segment, rolls no tail and writes no `cursor.dmp`.
    pub fn inspect(base_dir: &Path, cluster_topic: ClusterTopic, options: &QueueOptions) -> Result<Inspection> {
        let dir = cluster_topic.topic_dir(base_dir);
        let ids = segment_ids(&dir)?;

        let mut sizes = Vec::with_capacity(ids.len());
        for id in &ids {
            sizes.push(fs::metadata(dir.join(segment_file_name(*id)))?.len());
        }

        let mut committed = match ids.first() {
            Some(&head) => {
                let reset = Position::new(head, 0);
                let pos = match Cursor::load(&dir) {
                    Ok(Some(pos)) => pos,
                    Ok(None) => reset,
                    Err(e) => {
                        tracing::warn!("inspect {}: {}, assuming head", dir.display(), e);
                        reset
                    }
                };
                if ids.binary_search(&pos.segment_id).is_ok() {
                    pos
                } else {
                    reset
                }
            }
            None => Position::default(),
        };
        if let Ok(idx) = ids.binary_search(&committed.segment_id) {
            if committed.offset > sizes[idx] {
                committed.offset = 0;
            }
        }

        let mut pending = 0;
        let mut corrupt_segments = Vec::new();
        for id in ids.iter().filter(|id| **id >= committed.segment_id) {
            let from = if *id == committed.segment_id {
                committed.offset
            } else {
                0
            };
            let report = scan_file(&dir.join(segment_file_name(*id)), from, options.max_block_size)?;
            pending += report.blocks;
            if report.corruption.is_some() {
                corrupt_segments.push(*id);
            }
        }

        Ok(Inspection {
            cluster_topic,
            dir,
            disk_usage: sizes.iter().sum(),
            segments: ids,
            committed,
            pending,
            corrupt_segments,
        })
    }

    /// Open the queue for reading and writing
    ///
    /// On open:
    /// 1. Create the queue directory if needed
    /// 2. Discover segment files (creating segment 1 for a fresh queue)
    /// 3. Restore the cursor from `cursor.dmp`
    /// 4. Scan the backlog behind the cursor: seeds `inflights` and rolls a
    ///    fresh tail if the current one ends in a torn block
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != QueueState::Closed {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;

        inner.segments = self.load_segments()?;
        if inner.segments.is_empty() {
            self.add_segment(&mut inner)?;
        }

        let cursor = Cursor::open(&self.dir, &mut inner.segments)?;
        inner.cursor = Some(cursor);

        let (pending, torn_tail) = self.scan_backlog(&inner)?;
        if let Some(reason) = torn_tail {
            tracing::warn!("queue[{}] tail ends in a torn block ({}), rolling", self.ident(), reason);
            self.add_segment(&mut inner)?;
        }
        self.inflights.store(pending as i64, Ordering::SeqCst);
        self.empty_inflight.store(pending == 0, Ordering::SeqCst);

        inner.state = QueueState::Open;

        tracing::debug!(
            "queue[{}] opened: {} segments, {} inflights, cursor {:?}",
            self.ident(),
            inner.segments.len(),
            pending,
            inner.cursor.as_ref().map(Cursor::committed_position)
        );
        Ok(())
    }

    /// Mark the queue as drained by a pump
    pub fn set_draining(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            QueueState::Open | QueueState::Draining => {
                inner.state = QueueState::Draining;
                Ok(())
            }
            _ => Err(HandoffError::QueueClosed),
        }
    }

    /// Append a block at the tail
    ///
    /// Rolls a new tail segment once if the current one is full.
    pub fn append(&self, block: &Block) -> Result<()> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, QueueState::Open | QueueState::Draining) {
            return Err(HandoffError::QueueClosed);
        }

        let checksum = self.options.block_checksum;
        let len = block.encoded_len(checksum);
        self.check_block(block, len)?;

        if let Some(max) = self.options.max_queue_size {
            let usage = disk_usage(&inner.segments);
            if usage + len > max {
                return Err(HandoffError::QueueFull { usage, max });
            }
        }

        let tail = inner.segments.last_mut().ok_or(HandoffError::QueueClosed)?;
        match tail.append(block, checksum) {
            Ok(_) => {}
            Err(HandoffError::SegmentFull) => {
                self.add_segment(&mut inner)?;
                let tail = inner.segments.last_mut().ok_or(HandoffError::QueueClosed)?;
                tail.append(block, checksum)?;
            }
            Err(e) => return Err(e),
        }

        self.append_n.fetch_add(1, Ordering::Relaxed);
        self.inflights.fetch_add(1, Ordering::SeqCst);
        self.empty_inflight.store(false, Ordering::SeqCst);
        drop(inner);

        let _ = self.wake_tx.try_send(());
        Ok(())
    }

    /// Read the next undelivered block
    ///
    /// Returns:
    /// - `Ok(Some(block))`: read position moved past the block (not committed)
    /// - `Ok(None)`: end of queue, nothing to deliver right now
    /// - `Err(Corrupt)`: call `skip_corrupt_segment()` before reading again
    pub fn next(&self) -> Result<Option<Block>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !matches!(inner.state, QueueState::Open | QueueState::Draining) {
            return Err(HandoffError::QueueClosed);
        }
        let cursor = inner.cursor.as_mut().ok_or(HandoffError::QueueClosed)?;
        let tail = inner.segments.len() - 1;

        loop {
            let idx = cursor.segment_index(&inner.segments)?;
            let segment = &mut inner.segments[idx];
            if idx == tail {
                // buffered appends must be visible to the reader
                segment.flush_buffer()?;
            }

            match segment.read_one()? {
                Some(block) => {
                    cursor.set_read_offset(segment.offset());
                    self.empty_inflight.store(false, Ordering::SeqCst);
                    return Ok(Some(block));
                }
                None => {
                    // end of this segment: either move on or we are at the tail
                    if !cursor.advance_to_next_segment(&mut inner.segments)? {
                        self.empty_inflight.store(true, Ordering::SeqCst);
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Confirm delivery of everything read so far
    ///
    /// The committed position is what `checkpoint()` persists.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let cursor = inner.cursor.as_mut().ok_or(HandoffError::QueueClosed)?;
        if cursor.has_uncommitted() {
            cursor.commit();
            self.inflights.fetch_sub(1, Ordering::SeqCst);
            self.deliver_n.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Give a read block back: the next `next()` returns it again
    ///
    /// Nothing was committed for it, so a restart redelivers it as well.
    pub fn rollback(&self, block: &Block) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let cursor = inner.cursor.as_mut().ok_or(HandoffError::QueueClosed)?;
        cursor.rollback(&mut inner.segments)?;
        tracing::trace!(
            "queue[{}] rolled back block of {} bytes to {:?}",
            self.ident(),
            block.encoded_len(self.options.block_checksum),
            cursor.read_position()
        );
        Ok(())
    }

    /// Jump past a segment that failed to decode
    ///
    /// If the corrupt segment is the tail, a new tail is rolled first so the
    /// cursor always has somewhere to go. The skip is committed and
    /// checkpointed immediately.
    pub fn skip_corrupt_segment(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let idx = {
            let cursor = inner.cursor.as_ref().ok_or(HandoffError::QueueClosed)?;
            cursor.segment_index(&inner.segments)?
        };
        if idx + 1 == inner.segments.len() {
            self.add_segment(inner)?;
        }

        let skipped = inner.segments[idx].id();
        let next_id = inner.segments[idx + 1].id();
        let cursor = inner.cursor.as_mut().ok_or(HandoffError::QueueClosed)?;
        let lost_from = cursor.read_position();
        cursor.reset_to(&mut inner.segments, next_id)?;
        cursor.checkpoint()?;

        self.corrupt_n.fetch_add(1, Ordering::Relaxed);
        let (pending, _) = self.scan_backlog(inner)?;
        self.inflights.store(pending as i64, Ordering::SeqCst);

        tracing::warn!(
            "queue[{}] skipped corrupt segment {} from {:?}, now at segment {}",
            self.ident(),
            skipped,
            lost_from,
            next_id
        );
        Ok(())
    }

    /// Persist the committed cursor position
    pub fn checkpoint(&self) -> Result<()> {
        let inner = self.inner.lock();
        let cursor = inner.cursor.as_ref().ok_or(HandoffError::QueueClosed)?;
        cursor.checkpoint()
    }

    /// Remove head segments the committed cursor has moved past
    ///
    /// Never removes the segment the cursor points into, nor the last
    /// remaining segment. Returns the number of segments removed.
    pub fn purge(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let committed = match inner.cursor.as_ref() {
            Some(cursor) => cursor.committed_position().segment_id,
            None => return Ok(0),
        };
        self.purge_before(&mut inner, committed)
    }

    /// Periodic maintenance: fsync the tail, checkpoint, then purge
    ///
    /// Runs under one lock, and purges only below the segment the fresh
    /// checkpoint names, so `cursor.dmp` never points at a deleted file.
    /// Returns the number of segments removed; a closed queue is a no-op.
    pub fn housekeep(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.cursor.is_none() {
            return Ok(0);
        }
        if let Some(tail) = inner.segments.last_mut() {
            if tail.is_open() {
                tail.sync()?;
            }
        }
        let checkpointed = match inner.cursor.as_ref() {
            Some(cursor) => {
                cursor.checkpoint()?;
                cursor.committed_position().segment_id
            }
            None => return Ok(0),
        };
        self.purge_before(&mut inner, checkpointed)
    }

    fn purge_before(&self, inner: &mut Inner, committed: u64) -> Result<usize> {
        let mut removed = 0;
        while inner.segments.len() > 1 {
            let head = &inner.segments[0];
            if head.id() >= committed || !self.old_enough(head)? {
                break;
            }
            let head = inner.segments.remove(0);
            let id = head.id();
            head.remove()?;
            removed += 1;
            tracing::debug!("queue[{}] purged segment {}", self.ident(), id);
        }
        Ok(removed)
    }

    /// Close the queue
    ///
    /// The cursor is checkpointed before any segment handle is closed; if
    /// the checkpoint fails the segments stay open and the error is returned.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == QueueState::Closed {
            return Ok(());
        }
        inner.state = QueueState::Closing;

        if let Some(cursor) = inner.cursor.as_ref() {
            cursor.checkpoint()?;
        }

        let mut first_err = None;
        for segment in inner.segments.iter_mut() {
            if let Err(e) = segment.close() {
                tracing::error!("queue[{}] close segment {}: {}", self.ident(), segment.id(), e);
                first_err.get_or_insert(e);
            }
        }
        inner.segments.clear();
        inner.cursor = None;
        inner.state = QueueState::Closed;

        // wake a pump parked on this queue so it notices
        let _ = self.wake_tx.try_send(());

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete the queue directory. The queue must be closed.
    pub fn remove(&self) -> Result<()> {
        let inner = self.inner.lock();
        if inner.state != QueueState::Closed {
            return Err(HandoffError::QueueOpen);
        }
        fs::remove_dir_all(&self.dir)?;
        tracing::info!("queue[{}] removed", self.ident());
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// True iff the last `next()` found the queue drained and nothing was
    /// appended since
    pub fn empty_inflight(&self) -> bool {
        self.empty_inflight.load(Ordering::SeqCst)
    }

    pub fn inflights(&self) -> i64 {
        self.inflights.load(Ordering::SeqCst)
    }

    pub fn append_n(&self) -> u64 {
        self.append_n.load(Ordering::Relaxed)
    }

    pub fn deliver_n(&self) -> u64 {
        self.deliver_n.load(Ordering::SeqCst)
    }

    pub fn corrupt_n(&self) -> u64 {
        self.corrupt_n.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.append_n.store(0, Ordering::Relaxed);
        self.deliver_n.store(0, Ordering::Relaxed);
        self.corrupt_n.store(0, Ordering::Relaxed);
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn disk_usage(&self) -> u64 {
        disk_usage(&self.inner.lock().segments)
    }

    /// Last modification time of the tail segment
    pub fn last_modified(&self) -> Result<SystemTime> {
        let inner = self.inner.lock();
        let tail = inner.segments.last().ok_or(HandoffError::QueueClosed)?;
        tail.last_modified()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let (read, committed) = inner
            .cursor
            .as_ref()
            .map(|c| (c.read_position(), c.committed_position()))
            .unwrap_or_default();
        QueueStats {
            cluster_topic: self.cluster_topic.clone(),
            dir: self.dir.clone(),
            state: inner.state,
            segments: inner.segments.iter().map(Segment::id).collect(),
            read,
            committed,
            disk_usage: disk_usage(&inner.segments),
            append_n: self.append_n(),
            deliver_n: self.deliver_n(),
            corrupt_n: self.corrupt_n(),
            inflights: self.inflights(),
            empty_inflight: self.empty_inflight(),
        }
    }

    /// Receiver nudged on every append and on close
    pub fn subscribe(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }

    pub fn cluster_topic(&self) -> &ClusterTopic {
        &self.cluster_topic
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn ident(&self) -> String {
        self.cluster_topic.to_string()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_block(&self, block: &Block, len: u64) -> Result<()> {
        let max_field = self.options.max_block_size as u64;
        let field = block.key().len().max(block.value().len()) as u64;
        if field > max_field {
            return Err(HandoffError::BlockTooLarge {
                size: field,
                max: max_field,
            });
        }
        if len > self.options.max_segment_size {
            return Err(HandoffError::BlockTooLarge {
                size: len,
                max: self.options.max_segment_size,
            });
        }
        Ok(())
    }

    /// Open every segment file in the queue directory, sorted by id
    fn load_segments(&self) -> Result<Vec<Segment>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match parse_segment_id(&name) {
                Some(id) => ids.push((id, entry.path())),
                None if name.starts_with(CURSOR_FILE) => {}
                None => tracing::warn!("queue[{}] unexpected file: {}", self.ident(), name),
            }
        }
        ids.sort_by_key(|(id, _)| *id);

        let mut segments = Vec::with_capacity(ids.len());
        for (id, path) in ids {
            segments.push(self.open_segment(id, &path)?);
        }
        Ok(segments)
    }

    fn open_segment(&self, id: u64, path: &Path) -> Result<Segment> {
        Segment::open(
            id,
            path,
            self.options.max_segment_size,
            self.options.sync_strategy,
            self.options.max_block_size,
        )
    }

    /// Roll a new empty tail segment with id = current max + 1
    fn add_segment(&self, inner: &mut Inner) -> Result<()> {
        let next_id = inner.segments.last().map(|s| s.id() + 1).unwrap_or(1);
        if let Some(tail) = inner.segments.last_mut() {
            // the old tail stops being flushed on read once it is no longer the tail
            if tail.is_open() {
                tail.sync()?;
            }
        }

        let path = self.dir.join(segment_file_name(next_id));
        let segment = self.open_segment(next_id, &path)?;
        inner.segments.push(segment);
        tracing::debug!("queue[{}] added segment {}", self.ident(), next_id);
        Ok(())
    }

    /// Count whole blocks from the committed position to the end, and
    /// report whether the tail ends in a torn block
    fn scan_backlog(&self, inner: &Inner) -> Result<(u64, Option<String>)> {
        let cursor = match inner.cursor.as_ref() {
            Some(cursor) => cursor,
            None => return Ok((0, None)),
        };
        let committed = cursor.committed_position();
        let tail = inner.segments.len().saturating_sub(1);

        let mut pending = 0;
        let mut torn_tail = None;
        for (idx, segment) in inner.segments.iter().enumerate() {
            if segment.id() < committed.segment_id {
                continue;
            }
            let from = if segment.id() == committed.segment_id {
                committed.offset
            } else {
                0
            };
            let report = segment.scan(from)?;
            pending += report.blocks;
            if let Some(reason) = report.corruption {
                if idx == tail {
                    torn_tail = Some(reason);
                } else {
                    tracing::warn!(
                        "queue[{}] segment {} corrupt at offset {}: {}",
                        self.ident(),
                        segment.id(),
                        report.end_offset,
                        reason
                    );
                }
            }
        }
        Ok((pending, torn_tail))
    }

    fn old_enough(&self, segment: &Segment) -> Result<bool> {
        let min_age = self.options.retention_min_age;
        if min_age.is_zero() {
            return Ok(true);
        }
        let modified = segment.last_modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age >= min_age)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if self.inner.get_mut().state != QueueState::Closed {
            if let Err(e) = self.close() {
                tracing::error!("queue[{}] close on drop: {}", self.ident(), e);
            }
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("cluster_topic", &self.cluster_topic)
            .field("dir", &self.dir)
            .field("state", &self.state())
            .finish()
    }
}

fn disk_usage(segments: &[Segment]) -> u64 {
    segments.iter().map(Segment::disk_usage).sum()
}
