//! Tests for Queue
//!
//! These tests verify:
//! - FIFO delivery and segment rotation
//! - Durable cursor: no redelivery after checkpoint, redelivery without one
//! - Purge only removes segments behind the committed cursor
//! - Corrupt and torn segments are skipped instead of retried forever
//! - Size limits (QueueFull, BlockTooLarge)
//! - Buffered writes, counters, close/remove lifecycle
//! - A checkpoint past the end of its segment does not hide new appends
//! - Housekeeping checkpoints before it purges
//! - Offline inspection leaves the directory untouched

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use handoff::config::SyncStrategy;
use handoff::queue::{Block, ClusterTopic, Cursor, Position, Queue, QueueOptions, QueueState, CURSOR_FILE};
use handoff::HandoffError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn block(i: usize) -> Block {
    Block::new(format!("k{}", i), format!("v{}", i))
}

/// Encoded size of `block(i)` for single-digit `i`
fn block_len() -> u64 {
    block(0).encoded_len(true)
}

fn open_queue(base: &Path, options: QueueOptions) -> Queue {
    let ct = ClusterTopic::new("c1", "t1").unwrap();
    let queue = Queue::new(base, ct, options);
    queue.open().unwrap();
    queue
}

fn options(max_segment_size: u64) -> QueueOptions {
    QueueOptions {
        max_segment_size,
        ..QueueOptions::default()
    }
}

/// Read, "deliver" and commit everything currently queued
fn drain(queue: &Queue) -> Vec<Block> {
    let mut out = Vec::new();
    while let Some(block) = queue.next().unwrap() {
        queue.commit().unwrap();
        out.push(block);
    }
    out
}

fn segment_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with("cursor.dmp"))
        .collect();
    names.sort();
    names
}

fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Concrete Scenarios
// =============================================================================

#[test]
fn test_two_blocks_one_segment_then_restart_is_drained() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));

    queue.append(&Block::new(&b"k1"[..], &b"v1"[..])).unwrap();
    queue.append(&Block::new(&b"k2"[..], &b"v2"[..])).unwrap();

    let dir = temp.path().join("c1").join("t1");
    assert_eq!(segment_files(&dir), vec!["1"]);
    assert_eq!(fs::metadata(dir.join("1")).unwrap().len(), 2 * block_len());
    assert!(!queue.empty_inflight());

    assert_eq!(drain(&queue).len(), 2);
    queue.checkpoint().unwrap();
    queue.close().unwrap();

    let queue = open_queue(temp.path(), options(1024));
    assert_eq!(queue.next().unwrap(), None);
    assert!(queue.empty_inflight());
    assert_eq!(queue.inflights(), 0);
}

#[test]
fn test_segment_holds_exactly_one_block() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(block_len()));

    queue.append(&block(1)).unwrap();
    queue.append(&block(2)).unwrap();

    let dir = queue.dir().to_path_buf();
    assert_eq!(segment_files(&dir), vec!["1", "2"]);
    assert_eq!(fs::metadata(dir.join("1")).unwrap().len(), block_len());
    assert_eq!(fs::metadata(dir.join("2")).unwrap().len(), block_len());
    assert_eq!(queue.stats().segments, vec![1, 2]);
}

// =============================================================================
// Ordering / Durability Tests
// =============================================================================

#[test]
fn test_fifo_across_segments() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(3 * block_len()));

    for i in 0..10 {
        queue.append(&block(i)).unwrap();
    }
    assert_eq!(queue.stats().segments, vec![1, 2, 3, 4]);

    let got = drain(&queue);
    let expected: Vec<Block> = (0..10).map(block).collect();
    assert_eq!(got, expected);
    assert_eq!(queue.deliver_n(), 10);
    assert_eq!(queue.inflights(), 0);
}

#[test]
fn test_uncommitted_block_is_redelivered_after_restart() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path(), options(1024));
        queue.append(&block(0)).unwrap();
        queue.append(&block(1)).unwrap();

        assert_eq!(queue.next().unwrap(), Some(block(0)));
        queue.commit().unwrap();
        assert_eq!(queue.next().unwrap(), Some(block(1)));
        // read but never confirmed
        queue.close().unwrap();
    }

    let queue = open_queue(temp.path(), options(1024));
    assert_eq!(queue.inflights(), 1);
    assert_eq!(queue.next().unwrap(), Some(block(1)));
}

#[test]
fn test_crash_before_checkpoint_redelivers() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    queue.append(&block(0)).unwrap();
    assert_eq!(queue.next().unwrap(), Some(block(0)));
    queue.commit().unwrap();
    // process dies: no checkpoint, no close
    std::mem::forget(queue);

    let queue = open_queue(temp.path(), options(1024));
    assert_eq!(queue.next().unwrap(), Some(block(0)));
}

#[test]
fn test_checkpoint_past_segment_end_does_not_hide_appends() {
    let temp = TempDir::new().unwrap();
    let dir = {
        let queue = open_queue(temp.path(), options(1024));
        queue.append(&block(0)).unwrap();
        queue.close().unwrap();
        queue.dir().to_path_buf()
    };
    // cursor fsynced, segment bytes lost behind it
    fs::write(dir.join(CURSOR_FILE), br#"{"offset":500,"segment_id":1}"#).unwrap();

    let queue = open_queue(temp.path(), options(1024));
    for i in 1..4 {
        queue.append(&block(i)).unwrap();
    }
    assert!(!queue.empty_inflight());
    assert_eq!(drain(&queue), vec![block(0), block(1), block(2), block(3)]);
}

#[test]
fn test_rollback_returns_same_block() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    queue.append(&block(0)).unwrap();
    queue.append(&block(1)).unwrap();

    let first = queue.next().unwrap().unwrap();
    queue.rollback(&first).unwrap();
    assert_eq!(queue.next().unwrap(), Some(first));
    assert_eq!(queue.stats().committed, Position::new(1, 0));
}

// =============================================================================
// Purge Tests
// =============================================================================

#[test]
fn test_purge_only_behind_committed_cursor() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(block_len()));
    for i in 0..3 {
        queue.append(&block(i)).unwrap();
    }
    let dir = queue.dir().to_path_buf();

    assert_eq!(queue.next().unwrap(), Some(block(0)));
    queue.commit().unwrap();
    // cursor still points into segment 1
    assert_eq!(queue.purge().unwrap(), 0);

    assert_eq!(queue.next().unwrap(), Some(block(1)));
    assert_eq!(queue.purge().unwrap(), 1);
    assert_eq!(segment_files(&dir), vec!["2", "3"]);

    // block 1 is still uncommitted: segment 2 must survive
    assert_eq!(queue.purge().unwrap(), 0);
    queue.rollback(&block(1)).unwrap();
    assert_eq!(queue.next().unwrap(), Some(block(1)));
    queue.commit().unwrap();

    assert_eq!(queue.next().unwrap(), Some(block(2)));
    queue.commit().unwrap();
    assert_eq!(queue.purge().unwrap(), 1);
    assert_eq!(segment_files(&dir), vec!["3"]);

    // the last segment is never removed
    assert_eq!(queue.next().unwrap(), None);
    assert_eq!(queue.purge().unwrap(), 0);
}

#[test]
fn test_purge_respects_retention_min_age() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(
        temp.path(),
        QueueOptions {
            max_segment_size: block_len(),
            retention_min_age: Duration::from_secs(3600),
            ..QueueOptions::default()
        },
    );
    queue.append(&block(0)).unwrap();
    queue.append(&block(1)).unwrap();
    drain(&queue);

    assert_eq!(queue.purge().unwrap(), 0);
    assert_eq!(queue.stats().segments, vec![1, 2]);
}

#[test]
fn test_restart_after_purge_resumes() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path(), options(block_len()));
        for i in 0..3 {
            queue.append(&block(i)).unwrap();
        }
        assert_eq!(queue.next().unwrap(), Some(block(0)));
        queue.commit().unwrap();
        assert_eq!(queue.next().unwrap(), Some(block(1)));
        queue.commit().unwrap();
        queue.purge().unwrap();
        queue.close().unwrap();
    }

    let queue = open_queue(temp.path(), options(block_len()));
    assert_eq!(queue.inflights(), 1);
    assert_eq!(drain(&queue), vec![block(2)]);
}

#[test]
fn test_housekeep_checkpoints_before_purge() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(block_len()));
    for i in 0..3 {
        queue.append(&block(i)).unwrap();
    }
    let dir = queue.dir().to_path_buf();
    assert_eq!(drain(&queue).len(), 3);

    assert_eq!(queue.housekeep().unwrap(), 2);
    assert_eq!(segment_files(&dir), vec!["3"]);

    // the persisted cursor names a segment that is still on disk
    let saved = Cursor::load(&dir).unwrap().unwrap();
    assert_eq!(saved, Position::new(3, block_len()));
    assert!(dir.join(saved.segment_id.to_string()).exists());

    queue.close().unwrap();
    let queue = open_queue(temp.path(), options(block_len()));
    assert_eq!(queue.next().unwrap(), None);
}

#[test]
fn test_housekeep_on_closed_queue_is_noop() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    queue.close().unwrap();
    assert_eq!(queue.housekeep().unwrap(), 0);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupt_segment_is_skipped() {
    let temp = TempDir::new().unwrap();
    let dir = {
        let queue = open_queue(temp.path(), options(block_len() + 8));
        for i in 0..3 {
            queue.append(&block(i)).unwrap();
        }
        queue.close().unwrap();
        queue.dir().to_path_buf()
    };
    // garbage after the only block of segment 1
    append_garbage(&dir.join("1"), &[0xde, 0xad, 0xbe, 0xef]);

    let queue = open_queue(temp.path(), options(block_len() + 8));
    assert_eq!(queue.next().unwrap(), Some(block(0)));
    queue.commit().unwrap();

    let err = queue.next().unwrap_err();
    assert!(err.is_corruption());
    queue.skip_corrupt_segment().unwrap();
    assert_eq!(queue.corrupt_n(), 1);

    assert_eq!(drain(&queue), vec![block(1), block(2)]);
}

#[test]
fn test_torn_tail_rolls_new_segment_on_open() {
    let temp = TempDir::new().unwrap();
    let dir = {
        let queue = open_queue(temp.path(), options(1024));
        queue.append(&block(0)).unwrap();
        queue.close().unwrap();
        queue.dir().to_path_buf()
    };
    let torn = block(1).encode(true).unwrap();
    append_garbage(&dir.join("1"), &torn[..torn.len() - 3]);

    let queue = open_queue(temp.path(), options(1024));
    assert_eq!(queue.stats().segments, vec![1, 2]);
    assert_eq!(queue.inflights(), 1);

    // new appends never land behind the torn bytes
    queue.append(&block(2)).unwrap();
    assert_eq!(segment_files(&dir), vec!["1", "2"]);

    assert_eq!(queue.next().unwrap(), Some(block(0)));
    queue.commit().unwrap();
    assert!(queue.next().unwrap_err().is_corruption());
    queue.skip_corrupt_segment().unwrap();
    assert_eq!(drain(&queue), vec![block(2)]);
}

#[test]
fn test_corrupt_tail_segment_skip_rolls() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    queue.append(&block(0)).unwrap();
    append_garbage(&queue.dir().join("1"), &[0x00; 12]);

    assert_eq!(queue.next().unwrap(), Some(block(0)));
    queue.commit().unwrap();
    assert!(queue.next().unwrap_err().is_corruption());

    queue.skip_corrupt_segment().unwrap();
    assert_eq!(queue.stats().segments, vec![1, 2]);
    assert_eq!(queue.next().unwrap(), None);

    queue.append(&block(1)).unwrap();
    assert_eq!(queue.next().unwrap(), Some(block(1)));
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_queue_full() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(
        temp.path(),
        QueueOptions {
            max_segment_size: 1024,
            max_queue_size: Some(2 * block_len()),
            ..QueueOptions::default()
        },
    );

    queue.append(&block(0)).unwrap();
    queue.append(&block(1)).unwrap();
    assert!(matches!(queue.append(&block(2)), Err(HandoffError::QueueFull { .. })));
    assert_eq!(queue.append_n(), 2);
}

#[test]
fn test_block_too_large() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(
        temp.path(),
        QueueOptions {
            max_block_size: 16,
            ..QueueOptions::default()
        },
    );

    let big = Block::new(vec![b'x'; 32], &b"v"[..]);
    assert!(matches!(queue.append(&big), Err(HandoffError::BlockTooLarge { .. })));

    let queue_small_segment = open_queue(&temp.path().join("other"), options(block_len()));
    let wide = Block::new(&b"k"[..], vec![b'v'; 64]);
    assert!(matches!(
        queue_small_segment.append(&wide),
        Err(HandoffError::BlockTooLarge { .. })
    ));
}

// =============================================================================
// Buffered Tests
// =============================================================================

#[test]
fn test_buffered_appends_readable_and_durable_on_close() {
    let temp = TempDir::new().unwrap();
    let buffered = QueueOptions {
        sync_strategy: SyncStrategy::Buffered,
        ..QueueOptions::default()
    };
    {
        let queue = open_queue(temp.path(), buffered.clone());
        for i in 0..5 {
            queue.append(&block(i)).unwrap();
        }
        assert_eq!(queue.next().unwrap(), Some(block(0)));
        queue.commit().unwrap();
        queue.close().unwrap();
    }

    let queue = open_queue(temp.path(), buffered);
    assert_eq!(queue.inflights(), 4);
    assert_eq!(drain(&queue), (1..5).map(block).collect::<Vec<_>>());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_counters_and_reset() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    for i in 0..4 {
        queue.append(&block(i)).unwrap();
    }
    queue.next().unwrap();
    queue.commit().unwrap();

    assert_eq!(queue.append_n(), 4);
    assert_eq!(queue.deliver_n(), 1);
    assert_eq!(queue.inflights(), 3);

    queue.reset_counters();
    assert_eq!(queue.append_n(), 0);
    assert_eq!(queue.deliver_n(), 0);
    assert_eq!(queue.inflights(), 3);
}

#[test]
fn test_closed_queue_rejects_operations() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    queue.close().unwrap();

    assert_eq!(queue.state(), QueueState::Closed);
    assert!(matches!(queue.append(&block(0)), Err(HandoffError::QueueClosed)));
    assert!(matches!(queue.next(), Err(HandoffError::QueueClosed)));
}

#[test]
fn test_remove_requires_closed() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path(), options(1024));
    queue.append(&block(0)).unwrap();

    assert!(matches!(queue.remove(), Err(HandoffError::QueueOpen)));
    queue.close().unwrap();
    queue.remove().unwrap();
    assert!(!queue.dir().exists());
}

#[test]
fn test_unexpected_files_are_ignored() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1").join("t1");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("README"), b"not a segment").unwrap();

    let queue = open_queue(temp.path(), options(1024));
    assert_eq!(queue.stats().segments, vec![1]);
    queue.append(&block(0)).unwrap();
    assert_eq!(drain(&queue), vec![block(0)]);
}

// =============================================================================
// Inspection Tests
// =============================================================================

#[test]
fn test_inspect_empty_dir_creates_nothing() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("c1").join("t1");
    fs::create_dir_all(&dir).unwrap();

    let ct = ClusterTopic::new("c1", "t1").unwrap();
    let view = Queue::inspect(temp.path(), ct, &QueueOptions::default()).unwrap();
    assert!(view.segments.is_empty());
    assert_eq!(view.pending, 0);
    assert_eq!(view.disk_usage, 0);

    assert!(fs::read_dir(&dir).unwrap().next().is_none());
}

#[test]
fn test_inspect_torn_tail_is_read_only() {
    let temp = TempDir::new().unwrap();
    let dir = {
        let queue = open_queue(temp.path(), options(1024));
        for i in 0..3 {
            queue.append(&block(i)).unwrap();
        }
        assert_eq!(queue.next().unwrap(), Some(block(0)));
        queue.commit().unwrap();
        queue.close().unwrap();
        queue.dir().to_path_buf()
    };
    let torn = block(3).encode(true).unwrap();
    append_garbage(&dir.join("1"), &torn[..torn.len() - 3]);
    let cursor_before = fs::read(dir.join(CURSOR_FILE)).unwrap();

    let ct = ClusterTopic::new("c1", "t1").unwrap();
    let view = Queue::inspect(temp.path(), ct, &options(1024)).unwrap();
    assert_eq!(view.segments, vec![1]);
    assert_eq!(view.committed, Position::new(1, block_len()));
    assert_eq!(view.pending, 2);
    assert_eq!(view.corrupt_segments, vec![1]);
    assert_eq!(view.disk_usage, 3 * block_len() + (torn.len() - 3) as u64);

    assert_eq!(segment_files(&dir), vec!["1"]);
    assert_eq!(fs::read(dir.join(CURSOR_FILE)).unwrap(), cursor_before);
}
