//! Offline drain of a queue with bounded retries

use std::thread;

use crate::config::RetryPolicy;
use crate::error::HandoffError;
use crate::queue::{ClusterTopic, Queue};

use super::backoff::Backoff;
use super::publisher::Publisher;

/// Result of draining one queue
#[derive(Debug)]
pub struct FlushOutcome {
    pub cluster_topic: ClusterTopic,
    /// Blocks confirmed by the publisher
    pub delivered: u64,
    /// Every problem met; empty means the queue was fully drained
    pub errors: Vec<HandoffError>,
}

impl FlushOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Deliver everything behind the cursor
///
/// Each block gets `max_attempts` publish attempts. The first block that
/// still fails is rolled back and the drain stops there; a corrupt segment
/// is recorded and skipped. The cursor is checkpointed before returning.
pub fn flush_queue(
    queue: &Queue,
    publisher: &dyn Publisher,
    retry: RetryPolicy,
    max_attempts: u32,
) -> FlushOutcome {
    let max_attempts = max_attempts.max(1);
    let ct = queue.cluster_topic().clone();
    let mut outcome = FlushOutcome {
        cluster_topic: ct.clone(),
        delivered: 0,
        errors: Vec::new(),
    };

    loop {
        let block = match queue.next() {
            Ok(Some(block)) => block,
            Ok(None) => {
                tracing::debug!("queue[{}] flushed {} inflights", ct, outcome.delivered);
                break;
            }
            Err(e) if e.is_corruption() => {
                tracing::error!("queue[{}] flush: {}", ct, e);
                outcome.errors.push(e);
                if let Err(e) = queue.skip_corrupt_segment() {
                    outcome.errors.push(e);
                    break;
                }
                continue;
            }
            Err(e) => {
                outcome.errors.push(e);
                break;
            }
        };

        let mut backoff = Backoff::new(retry);
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match publisher.publish(&ct.cluster, &ct.topic, block.key(), block.value()) {
                Ok(delivery) => {
                    tracing::trace!(
                        "queue[{}] flushed {{P:{} O:{}}}",
                        ct,
                        delivery.partition,
                        delivery.offset
                    );
                    last_err = None;
                    break;
                }
                Err(e) => {
                    tracing::debug!("queue[{}] flush attempt {}/{}: {}", ct, attempt, max_attempts, e);
                    last_err = Some(e);
                    if attempt < max_attempts {
                        thread::sleep(backoff.next_delay());
                    }
                }
            }
        }

        match last_err {
            None => {
                if let Err(e) = queue.commit() {
                    outcome.errors.push(e);
                    break;
                }
                outcome.delivered += 1;
            }
            Some(e) => {
                tracing::error!(
                    "queue[{}] gave up after {} attempts at block #{}: {}",
                    ct,
                    max_attempts,
                    outcome.delivered + 1,
                    e
                );
                outcome.errors.push(e);
                if let Err(e) = queue.rollback(&block) {
                    outcome.errors.push(e);
                }
                break;
            }
        }
    }

    if let Err(e) = queue.checkpoint() {
        outcome.errors.push(e);
    }
    outcome
}
