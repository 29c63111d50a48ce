//! Service Module
//!
//! Registry of all hinted-handoff queues of one process.
//!
//! ## Responsibilities
//! - Discover queues already on disk at start and attach a pump to each
//! - Create queues lazily on the first append for a (cluster, topic)
//! - Spread new queues over the configured storage roots
//! - Periodic housekeeping: purge consumed segments, flush, checkpoint
//! - Offline `flush_inflights`: drain every on-disk queue with bounded retries
//!
//! ## On-Disk Layout
//! ```text
//! {dir}
//! ├── cluster1
//! └── cluster2
//!     ├── topic1
//!     └── topic2
//!         ├── 1
//!         ├── 2
//!         ├── 3
//!         └── cursor.dmp
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{HandoffError, Result};
use crate::pump::{flush_queue, FlushOutcome, Publisher, Pump, PumpHandle};
use crate::queue::{Block, ClusterTopic, Queue, QueueOptions, QueueState, QueueStats};

/// Outcome of `flush_inflights` for every queue found on disk
#[derive(Debug, Default)]
pub struct FlushReport {
    pub outcomes: Vec<FlushOutcome>,
}

impl FlushReport {
    /// True when every queue drained completely
    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(FlushOutcome::is_ok)
    }

    pub fn delivered(&self) -> u64 {
        self.outcomes.iter().map(|o| o.delivered).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FlushOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// A registered queue and the pump draining it
struct Entry {
    queue: Arc<Queue>,
    pump: Option<PumpHandle>,
}

struct Registry {
    closed: bool,
    queues: HashMap<ClusterTopic, Entry>,
}

/// Housekeeping thread
struct Janitor {
    shutdown_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// The hinted-handoff service
///
/// ## Concurrency
/// - `registry`: RwLock. An append for a known key takes only the read
///   lock; the first append for a key takes the write lock and re-checks
///   before creating the queue.
/// - each queue has its own lock, so unrelated keys never contend
/// - one pump thread per queue, plus one janitor thread
pub struct Service {
    config: Config,
    publisher: Arc<dyn Publisher>,
    registry: Arc<RwLock<Registry>>,
    janitor: Mutex<Option<Janitor>>,
}

impl Service {
    pub fn new(config: Config, publisher: Arc<dyn Publisher>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            publisher,
            registry: Arc::new(RwLock::new(Registry {
                closed: true,
                queues: HashMap::new(),
            })),
            janitor: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        "disk"
    }

    /// Open every queue found under the storage roots and start pumping
    ///
    /// Starting an already started service is a no-op. On failure every
    /// queue opened so far is closed again.
    pub fn start(&self) -> Result<()> {
        {
            let mut registry = self.registry.write();
            if !registry.closed {
                return Ok(());
            }

            if let Err(e) = self.load_all(&mut registry) {
                tracing::error!("hh[{}] start: {}", self.name(), e);
                shutdown_entries(&mut registry);
                return Err(e);
            }
            registry.closed = false;

            tracing::info!(
                "hh[{}] started with {} queues in {:?}",
                self.name(),
                registry.queues.len(),
                self.config.dirs
            );
        }

        self.start_janitor()?;
        Ok(())
    }

    /// Stop pumps, checkpoint and close every queue, refuse new appends
    pub fn stop(&self) {
        // the janitor takes the registry read lock; stop it before locking
        if let Some(janitor) = self.janitor.lock().take() {
            drop(janitor.shutdown_tx);
            if janitor.thread.join().is_err() {
                tracing::error!("hh[{}] janitor panicked", self.name());
            }
        }

        let mut registry = self.registry.write();
        if registry.closed {
            return;
        }
        registry.closed = true;
        shutdown_entries(&mut registry);
        tracing::info!("hh[{}] stopped", self.name());
    }

    /// Buffer a message for later delivery
    pub fn append(&self, cluster: &str, topic: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let ct = ClusterTopic::new(cluster, topic)?;
        let block = Block::new(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));

        tracing::trace!("hh[{}] append {}", self.name(), ct);

        let existing = {
            let registry = self.registry.read();
            if registry.closed {
                return Err(HandoffError::ServiceClosed);
            }
            registry.queues.get(&ct).map(|entry| Arc::clone(&entry.queue))
        };
        if let Some(queue) = existing {
            return queue.append(&block);
        }

        let queue = {
            let mut registry = self.registry.write();
            if registry.closed {
                return Err(HandoffError::ServiceClosed);
            }
            // double check: another appender may have created it meanwhile
            match registry.queues.get(&ct) {
                Some(entry) => Arc::clone(&entry.queue),
                None => {
                    let base = self.next_base_dir(&registry);
                    self.create_and_open(&mut registry, &base, ct)?
                }
            }
        };
        queue.append(&block)
    }

    /// Whether nothing is buffered for the key
    ///
    /// Unknown keys (and invalid names) report empty.
    pub fn empty(&self, cluster: &str, topic: &str) -> bool {
        let ct = match ClusterTopic::new(cluster, topic) {
            Ok(ct) => ct,
            Err(_) => return true,
        };
        let registry = self.registry.read();
        match registry.queues.get(&ct) {
            Some(entry) => entry.queue.empty_inflight(),
            None => true,
        }
    }

    /// Drain every on-disk queue with bounded retries
    ///
    /// Offline only: the service must be stopped, and nothing else may use
    /// the storage roots meanwhile. Queues are drained in parallel; a
    /// failing queue does not stop the others.
    pub fn flush_inflights(&self) -> Result<FlushReport> {
        if !self.registry.read().closed {
            tracing::error!("hh[{}] flush inflights with service running", self.name());
            return Err(HandoffError::ServiceRunning);
        }

        let mut report = FlushReport::default();
        let mut queues = Vec::new();
        for dir in &self.config.dirs {
            for ct in discover(dir)? {
                let queue = Queue::new(dir, ct.clone(), QueueOptions::from(&self.config));
                match queue.open() {
                    Ok(()) => queues.push(queue),
                    Err(e) => {
                        tracing::error!("hh[{}] flush inflights {}: {}", self.name(), ct, e);
                        report.outcomes.push(FlushOutcome {
                            cluster_topic: ct,
                            delivered: 0,
                            errors: vec![e],
                        });
                    }
                }
            }
        }

        let publisher = self.publisher.as_ref();
        let retry = self.config.retry;
        let attempts = self.config.flush_max_attempts;
        let outcomes: Vec<FlushOutcome> = thread::scope(|scope| {
            let workers: Vec<_> = queues
                .iter()
                .map(|queue| scope.spawn(move || flush_queue(queue, publisher, retry, attempts)))
                .collect();
            workers
                .into_iter()
                .zip(queues.iter())
                .map(|(worker, queue)| {
                    worker.join().unwrap_or_else(|_| FlushOutcome {
                        cluster_topic: queue.cluster_topic().clone(),
                        delivered: 0,
                        errors: vec![HandoffError::Publish("flush worker panicked".into())],
                    })
                })
                .collect()
        });

        for (mut outcome, queue) in outcomes.into_iter().zip(queues.iter()) {
            if let Err(e) = queue.close() {
                outcome.errors.push(e);
            }
            for e in &outcome.errors {
                tracing::error!("hh[{}] flush inflights {}: {}", self.name(), outcome.cluster_topic, e);
            }
            report.outcomes.push(outcome);
        }

        tracing::info!(
            "hh[{}] flushed {} inflights from {} queues, {} failed",
            self.name(),
            report.delivered(),
            report.outcomes.len(),
            report.failures().count()
        );
        Ok(report)
    }

    /// Administrative purge: drop the queue and delete its directory
    ///
    /// Works with the service running or stopped. Returns false if no such
    /// queue exists.
    pub fn remove(&self, cluster: &str, topic: &str) -> Result<bool> {
        let ct = ClusterTopic::new(cluster, topic)?;

        // Held until the directory is gone so a concurrent append cannot
        // recreate the queue over files that are being deleted.
        let mut registry = self.registry.write();
        if let Some(mut entry) = registry.queues.remove(&ct) {
            if let Some(pump) = entry.pump.take() {
                pump.stop();
            }
            entry.queue.close()?;
            entry.queue.remove()?;
            return Ok(true);
        }

        for dir in &self.config.dirs {
            if ct.topic_dir(dir).is_dir() {
                Queue::new(dir, ct.clone(), QueueOptions::from(&self.config)).remove()?;
                return Ok(true);
            }
        }
        drop(registry);
        Ok(false)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Blocks appended but not yet delivered, over all queues
    pub fn inflights(&self) -> i64 {
        self.sum(|q| q.inflights())
    }

    pub fn append_n(&self) -> u64 {
        self.sum(|q| q.append_n() as i64) as u64
    }

    pub fn deliver_n(&self) -> u64 {
        self.sum(|q| q.deliver_n() as i64) as u64
    }

    pub fn corrupt_n(&self) -> u64 {
        self.sum(|q| q.corrupt_n() as i64) as u64
    }

    pub fn reset_counters(&self) {
        for entry in self.registry.read().queues.values() {
            entry.queue.reset_counters();
        }
    }

    pub fn stats(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self
            .registry
            .read()
            .queues
            .values()
            .map(|entry| entry.queue.stats())
            .collect();
        stats.sort_by(|a, b| a.cluster_topic.cmp(&b.cluster_topic));
        stats
    }

    pub fn queue_count(&self) -> usize {
        self.registry.read().queues.len()
    }

    pub fn is_closed(&self) -> bool {
        self.registry.read().closed
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn sum(&self, f: impl Fn(&Queue) -> i64) -> i64 {
        self.registry
            .read()
            .queues
            .values()
            .map(|entry| f(&entry.queue))
            .sum()
    }

    fn load_all(&self, registry: &mut Registry) -> Result<()> {
        for dir in &self.config.dirs {
            fs::create_dir_all(dir)?;
            for ct in discover(dir)? {
                if registry.queues.contains_key(&ct) {
                    tracing::warn!("hh[{}] duplicate queue {} in {}, ignored", self.name(), ct, dir.display());
                    continue;
                }
                self.create_and_open(registry, dir, ct)?;
            }
        }
        Ok(())
    }

    fn create_and_open(
        &self,
        registry: &mut Registry,
        base: &Path,
        ct: ClusterTopic,
    ) -> Result<Arc<Queue>> {
        fs::create_dir_all(ct.cluster_dir(base))?;

        let queue = Arc::new(Queue::new(base, ct.clone(), QueueOptions::from(&self.config)));
        queue.open()?;

        let pump = Pump::spawn(Arc::clone(&queue), Arc::clone(&self.publisher), &self.config)?;

        registry.queues.insert(
            ct,
            Entry {
                queue: Arc::clone(&queue),
                pump: Some(pump),
            },
        );
        Ok(queue)
    }

    /// The storage root holding the fewest queues; an unused root wins
    fn next_base_dir(&self, registry: &Registry) -> PathBuf {
        let dirs = &self.config.dirs;
        if dirs.len() == 1 {
            return dirs[0].clone();
        }

        let mut layout: HashMap<&Path, usize> = HashMap::new();
        for entry in registry.queues.values() {
            *layout.entry(entry.queue.base_dir()).or_default() += 1;
        }

        dirs.iter()
            .min_by_key(|dir| layout.get(dir.as_path()).copied().unwrap_or(0))
            .cloned()
            .unwrap_or_else(|| dirs[0].clone())
    }

    fn start_janitor(&self) -> Result<()> {
        let (shutdown_tx, shutdown) = bounded::<()>(0);
        let registry = Arc::clone(&self.registry);
        let interval = self.config.purge_interval;

        let thread = thread::Builder::new()
            .name("hh-janitor".to_string())
            .spawn(move || housekeeping(registry, shutdown, interval))?;

        *self.janitor.lock() = Some(Janitor { shutdown_tx, thread });
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Every (cluster, topic) directory under a storage root
pub fn discover(dir: &Path) -> Result<Vec<ClusterTopic>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }

    for cluster in fs::read_dir(dir)? {
        let cluster = cluster?;
        if !cluster.file_type()?.is_dir() {
            continue;
        }
        for topic in fs::read_dir(cluster.path())? {
            let topic = topic?;
            if !topic.file_type()?.is_dir() {
                continue;
            }
            let cluster_name = cluster.file_name().to_string_lossy().into_owned();
            let topic_name = topic.file_name().to_string_lossy().into_owned();
            match ClusterTopic::new(cluster_name, topic_name) {
                Ok(ct) => found.push(ct),
                Err(e) => tracing::warn!("skip {}: {}", topic.path().display(), e),
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Signal every pump, wait for them, then close the queues
fn shutdown_entries(registry: &mut Registry) {
    let mut entries: Vec<Entry> = registry.queues.drain().map(|(_, entry)| entry).collect();

    // signal all first so they wind down in parallel
    for entry in entries.iter_mut() {
        if let Some(pump) = entry.pump.as_mut() {
            pump.signal();
        }
    }

    for mut entry in entries {
        if let Some(pump) = entry.pump.take() {
            pump.stop();
        }
        match entry.queue.close() {
            Ok(()) => tracing::trace!("queue[{}] closed", entry.queue.ident()),
            Err(e) => tracing::error!("queue[{}] close: {}", entry.queue.ident(), e),
        }
    }
}

/// Janitor loop: flush, checkpoint and purge every queue each tick
fn housekeeping(registry: Arc<RwLock<Registry>>, shutdown: Receiver<()>, interval: std::time::Duration) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {}
        }

        let queues: Vec<Arc<Queue>> = registry
            .read()
            .queues
            .values()
            .map(|entry| Arc::clone(&entry.queue))
            .collect();

        for queue in queues {
            if queue.state() == QueueState::Closed {
                continue;
            }
            match queue.housekeep() {
                Ok(0) => {}
                Ok(n) => tracing::debug!("queue[{}] purged {} segments", queue.ident(), n),
                Err(e) => tracing::error!("queue[{}] housekeeping: {}", queue.ident(), e),
            }
        }
    }
    tracing::trace!("janitor done");
}
