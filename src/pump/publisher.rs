//! Publisher
//!
//! The external "publish" operation the pump hands blocks to. The queue
//! never talks to the network itself.

use crate::error::Result;

/// Where the downstream broker stored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Synchronous publish to the downstream broker
///
/// Must return `Ok` only once the message is durably accepted; the cursor
/// moves past a block only after `Ok`.
pub trait Publisher: Send + Sync {
    fn publish(&self, cluster: &str, topic: &str, key: &[u8], value: &[u8]) -> Result<Delivery>;
}

impl<F> Publisher for F
where
    F: Fn(&str, &str, &[u8], &[u8]) -> Result<Delivery> + Send + Sync,
{
    fn publish(&self, cluster: &str, topic: &str, key: &[u8], value: &[u8]) -> Result<Delivery> {
        self(cluster, topic, key, value)
    }
}
