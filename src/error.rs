//! Error types for the hinted-handoff queue
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using HandoffError
pub type Result<T> = std::result::Result<T, HandoffError>;

/// Unified error type for hinted-handoff operations
#[derive(Debug, Error)]
pub enum HandoffError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Block / Segment Errors
    // -------------------------------------------------------------------------
    /// A block could not be decoded: torn write, bad format tag, length over
    /// the ceiling or checksum mismatch.
    #[error("segment corruption detected: {0}")]
    Corrupt(String),

    /// The segment cannot hold the block; the queue rolls a new tail.
    #[error("segment full")]
    SegmentFull,

    #[error("segment not open")]
    SegmentClosed,

    #[error("block too large: {size} bytes (max {max})")]
    BlockTooLarge { size: u64, max: u64 },

    // -------------------------------------------------------------------------
    // Queue Errors
    // -------------------------------------------------------------------------
    #[error("queue full: {usage} bytes used (max {max})")]
    QueueFull { usage: u64, max: u64 },

    #[error("queue not open")]
    QueueClosed,

    #[error("queue still open")]
    QueueOpen,

    #[error("cursor segment {0} not found")]
    CursorNotFound(u64),

    // -------------------------------------------------------------------------
    // Service Errors
    // -------------------------------------------------------------------------
    #[error("hinted handoff service closed")]
    ServiceClosed,

    #[error("hinted handoff service still running")]
    ServiceRunning,

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    // -------------------------------------------------------------------------
    // Delivery Errors
    // -------------------------------------------------------------------------
    #[error("publish failed: {0}")]
    Publish(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HandoffError {
    /// Whether this error means the bytes on disk cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, HandoffError::Corrupt(_))
    }
}

impl From<serde_json::Error> for HandoffError {
    fn from(e: serde_json::Error) -> Self {
        HandoffError::Serialization(e.to_string())
    }
}
