//! # handoff
//!
//! Disk-backed hinted-handoff buffer for a pub/sub gateway:
//! - Per (cluster, topic) append-only queues split into size-bounded segments
//! - Durable cursor checkpoints with at-least-once redelivery after a crash
//! - One background pump per queue retrying the downstream publish
//! - Retention of consumed segments and corrupt-segment isolation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Gateway (publish failed)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ append(cluster, topic, key, value)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Service                               │
//! │          (registry of queues, housekeeping thread)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Queue    │ ◄─next── │    Pump     │ ──publish──► broker
//!   │ (segments)  │ ─commit─ │  (thread)   │
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │ 1 2 3 ...   │
//!   │ cursor.dmp  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod queue;
pub mod pump;
pub mod service;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{HandoffError, Result};
pub use config::{Config, RetryPolicy, SyncStrategy};
pub use queue::{Block, ClusterTopic, Queue, QueueOptions, QueueStats};
pub use pump::{Delivery, Publisher};
pub use service::{FlushReport, Service};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of handoff
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
