//! Pump Module
//!
//! Delivers queued blocks to the downstream broker.
//!
//! ## Responsibilities
//! - One worker thread per queue, so a dead sink stalls only its own queue
//! - Retry a failing block with capped exponential backoff, forever, until
//!   it is delivered or the pump is stopped (at-least-once)
//! - Commit the cursor only after a confirmed publish; checkpoint every
//!   `checkpoint_every` deliveries, whenever the queue drains, and on stop
//! - Skip a segment that fails to decode instead of spinning on it
//!
//! ## Wait States
//! ```text
//!              ┌──────────── shutdown ───────────┐
//!              │                                 ▼
//!   next() ──► empty ──► select { wake, poll } ─► exit
//!     │
//!     └──────► block ──► publish ──► fail ──► select { shutdown, backoff }
//! ```
//!
//! `flush_queue` is the offline variant: bounded attempts, stops at the
//! first block it cannot deliver.

mod backoff;
mod flush;
mod publisher;

pub use backoff::Backoff;
pub use flush::{flush_queue, FlushOutcome};
pub use publisher::{Delivery, Publisher};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use crossbeam::select;

use crate::config::{Config, RetryPolicy};
use crate::error::{HandoffError, Result};
use crate::queue::{Block, Queue};

/// Counters a pump reports when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub delivered: u64,
    pub failed_attempts: u64,
    pub corrupt_skips: u64,
}

/// Steady-state delivery worker for one queue
pub struct Pump {
    queue: Arc<Queue>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
    poll_interval: Duration,
    checkpoint_every: u64,

    /// Disconnected when the pump should stop
    shutdown: Receiver<()>,
    /// Nudged by the queue on append
    wake: Receiver<()>,
}

/// Owner side of a running pump
///
/// Dropping the handle stops the pump and waits for it.
pub struct PumpHandle {
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<PumpReport>>,
    name: String,
}

impl PumpHandle {
    /// Signal the pump; it finishes the in-flight publish attempt, rolls
    /// back anything undelivered and checkpoints before exiting
    pub fn signal(&mut self) {
        self.shutdown_tx.take();
    }

    /// Signal and wait for the pump thread
    pub fn stop(mut self) -> PumpReport {
        self.join()
    }

    fn join(&mut self) -> PumpReport {
        self.signal();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                tracing::error!("{} panicked", self.name);
                PumpReport::default()
            }),
            None => PumpReport::default(),
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.join();
    }
}

impl Pump {
    /// Attach a pump to an open queue and start its thread
    pub fn spawn(queue: Arc<Queue>, publisher: Arc<dyn Publisher>, config: &Config) -> Result<PumpHandle> {
        queue.set_draining()?;

        let (shutdown_tx, shutdown) = bounded::<()>(0);
        let name = format!("hh-pump-{}", queue.ident());
        let pump = Pump {
            wake: queue.subscribe(),
            queue,
            publisher,
            retry: config.retry,
            poll_interval: config.poll_interval,
            checkpoint_every: config.checkpoint_every,
            shutdown,
        };

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || pump.run())?;

        Ok(PumpHandle {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
            name,
        })
    }

    fn run(self) -> PumpReport {
        let ident = self.queue.ident();
        let mut report = PumpReport::default();
        let mut unflushed = 0u64;

        tracing::debug!("queue[{}] pump started", ident);

        loop {
            if self.stopping() {
                break;
            }

            match self.queue.next() {
                Ok(Some(block)) => {
                    if !self.deliver(&block, &mut report) {
                        if let Err(e) = self.queue.rollback(&block) {
                            tracing::error!("queue[{}] rollback: {}", ident, e);
                        }
                        break;
                    }

                    if let Err(e) = self.queue.commit() {
                        tracing::error!("queue[{}] commit: {}", ident, e);
                        break;
                    }
                    report.delivered += 1;
                    unflushed += 1;
                    if unflushed >= self.checkpoint_every {
                        self.checkpoint(&mut unflushed);
                    }
                }

                Ok(None) => {
                    if unflushed > 0 {
                        self.checkpoint(&mut unflushed);
                    }
                    if !self.idle() {
                        break;
                    }
                }

                Err(HandoffError::QueueClosed) => break,

                Err(e) if e.is_corruption() => {
                    tracing::error!("queue[{}] pump: {}", ident, e);
                    report.corrupt_skips += 1;
                    if let Err(e) = self.queue.skip_corrupt_segment() {
                        tracing::error!("queue[{}] skip corrupt segment: {}", ident, e);
                        if !self.sleep(self.retry.max_backoff) {
                            break;
                        }
                    }
                }

                Err(e) => {
                    tracing::error!("queue[{}] pump: {}", ident, e);
                    if !self.sleep(self.poll_interval) {
                        break;
                    }
                }
            }
        }

        if unflushed > 0 {
            self.checkpoint(&mut unflushed);
        }
        tracing::debug!(
            "queue[{}] pump done: delivered {}, failed attempts {}, corrupt skips {}",
            ident,
            report.delivered,
            report.failed_attempts,
            report.corrupt_skips
        );
        report
    }

    /// Publish until it succeeds. Returns false if stopped first.
    fn deliver(&self, block: &Block, report: &mut PumpReport) -> bool {
        let ct = self.queue.cluster_topic();
        let mut backoff = Backoff::new(self.retry);

        loop {
            match self.publisher.publish(&ct.cluster, &ct.topic, block.key(), block.value()) {
                Ok(delivery) => {
                    tracing::trace!(
                        "queue[{}] delivered {{P:{} O:{}}}",
                        ct,
                        delivery.partition,
                        delivery.offset
                    );
                    return true;
                }
                Err(e) => {
                    report.failed_attempts += 1;
                    let delay = backoff.next_delay();
                    if backoff.attempts() == 1 {
                        tracing::warn!("queue[{}] publish failed, retrying: {}", ct, e);
                    } else {
                        tracing::debug!(
                            "queue[{}] publish attempt {} failed, next in {:?}: {}",
                            ct,
                            backoff.attempts(),
                            delay,
                            e
                        );
                    }
                    if !self.sleep(delay) {
                        return false;
                    }
                }
            }
        }
    }

    fn checkpoint(&self, unflushed: &mut u64) {
        match self.queue.checkpoint() {
            Ok(()) => *unflushed = 0,
            Err(HandoffError::QueueClosed) => {}
            Err(e) => tracing::error!("queue[{}] checkpoint: {}", self.queue.ident(), e),
        }
    }

    /// Wait for new data, the poll timeout or shutdown. False on shutdown.
    fn idle(&self) -> bool {
        select! {
            recv(self.shutdown) -> _ => false,
            recv(self.wake) -> _ => true,
            default(self.poll_interval) => true,
        }
    }

    /// Interruptible sleep. False on shutdown.
    fn sleep(&self, delay: Duration) -> bool {
        select! {
            recv(self.shutdown) -> _ => false,
            default(delay) => true,
        }
    }

    fn stopping(&self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }
}
