//! Disk Queue Module
//!
//! Bounded, disk-backed, append-only storage that combines queue and log
//! semantics for one (cluster, topic).
//!
//! ## Responsibilities
//! - Frame key/value blocks with a format tag and length prefixes
//! - Spread blocks over size-bounded segment files, rolling a new tail when full
//! - Track a durable read cursor and checkpoint it to `cursor.dmp`
//! - Reclaim segments the cursor has moved past
//!
//! ## Layout
//! ```text
//!   head                                           tail
//!    │                                              │
//!    ▼                                              ▼
//! ┌────────────────┐ ┌────────────────┐ ┌────────────────┐
//! │ segment 1      │ │ segment 2      │ │ segment 3      │
//! └────────────────┘ └────────────────┘ └────────────────┘
//!                        ▲
//!                        │
//!                     cursor
//! ```
//!
//! Reads happen at the cursor, writes at the tail. Segments behind the
//! cursor are purged whole.
//!
//! ## Block Format
//! ```text
//! ┌─────────┬────────┬─────────────┬─────────┬─────────────┬─────────┬───────────┐
//! │Magic (1)│Attr (1)│ KeyLen (4)  │ Key     │ ValueLen (4)│ Value   │ CRC32 (4) │
//! └─────────┴────────┴─────────────┴─────────┴─────────────┴─────────┴───────────┘
//! ```
//! Lengths are big-endian. The CRC trailer is present only when the
//! `ATTR_CRC32` bit of `Attr` is set.

mod block;
mod cursor;
mod disk_queue;
mod segment;

pub use block::{Block, ATTR_CRC32, BLOCK_OVERHEAD, CRC_SIZE, MAGIC};
pub use cursor::{Cursor, Position, CURSOR_FILE};
pub use disk_queue::{ClusterTopic, Inspection, Queue, QueueOptions, QueueState, QueueStats};
pub use segment::{parse_segment_id, scan_file, segment_file_name, segment_ids, ScanReport, Segment};
