//! handoff-admin
//!
//! Offline maintenance for hinted-handoff storage. Must not run while a
//! gateway is using the same directories.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use handoff::queue::{segment_file_name, segment_ids, Cursor, Queue, QueueOptions, Segment};
use handoff::service::discover;
use handoff::{ClusterTopic, Config, Delivery, HandoffError, Publisher, Result, Service};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Hinted-handoff admin
#[derive(Parser, Debug)]
#[command(name = "handoff-admin")]
#[command(about = "Inspect and drain hinted-handoff queues")]
#[command(version)]
struct Args {
    /// Storage root (repeat for several)
    #[arg(short, long = "dir", default_value = "./hh")]
    dirs: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print per-queue stats as JSON lines
    Stat,

    /// Print undelivered blocks without moving the cursor
    Dump {
        cluster: String,
        topic: String,

        /// Stop after this many blocks
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Deliver every buffered block to stdout as JSON lines
    Drain {
        /// Publish attempts per block
        #[arg(short, long, default_value = "1")]
        attempts: u32,
    },

    /// Delete a queue and everything buffered in it
    Remove { cluster: String, topic: String },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,handoff=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("handoff-admin v{}", handoff::VERSION);

    let result = match args.command {
        Commands::Stat => stat(&args.dirs),
        Commands::Dump { cluster, topic, limit } => dump(&args.dirs, &cluster, &topic, limit),
        Commands::Drain { attempts } => drain(&args.dirs, attempts),
        Commands::Remove { cluster, topic } => remove(&args.dirs, &cluster, &topic),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn config(dirs: &[PathBuf]) -> Result<Config> {
    Config::builder().dirs(dirs.iter().cloned()).build()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

// =============================================================================
// stat
// =============================================================================

fn stat(dirs: &[PathBuf]) -> Result<()> {
    let options = QueueOptions::from(&config(dirs)?);
    for dir in dirs {
        for ct in discover(dir)? {
            print_json(&Queue::inspect(dir, ct, &options)?)?;
        }
    }
    Ok(())
}

// =============================================================================
// dump
// =============================================================================

#[derive(Serialize)]
struct DumpLine<'a> {
    segment_id: u64,
    offset: u64,
    key: &'a str,
    value: &'a str,
}

/// Read segments directly from the checkpointed position; the queue is
/// never opened, so nothing on disk changes
fn dump(dirs: &[PathBuf], cluster: &str, topic: &str, limit: Option<usize>) -> Result<()> {
    let config = config(dirs)?;
    let ct = ClusterTopic::new(cluster, topic)?;
    let dir = dirs
        .iter()
        .map(|base| ct.topic_dir(base))
        .find(|dir| dir.is_dir())
        .ok_or_else(|| HandoffError::Config(format!("no queue {}", ct)))?;

    let start = Cursor::load(&dir)?.unwrap_or_default();
    let mut printed = 0;
    for id in segment_ids(&dir)? {
        if id < start.segment_id {
            continue;
        }
        let mut segment = Segment::open(
            id,
            &dir.join(segment_file_name(id)),
            config.max_segment_size,
            config.sync_strategy,
            config.max_block_size,
        )?;
        if id == start.segment_id {
            segment.seek(start.offset)?;
        }

        loop {
            if limit.is_some_and(|limit| printed >= limit) {
                return Ok(());
            }
            let offset = segment.offset();
            match segment.read_one() {
                Ok(Some(block)) => {
                    print_json(&DumpLine {
                        segment_id: id,
                        offset,
                        key: &String::from_utf8_lossy(block.key()),
                        value: &String::from_utf8_lossy(block.value()),
                    })?;
                    printed += 1;
                }
                Ok(None) => break,
                Err(e) if e.is_corruption() => {
                    tracing::warn!("segment {} at offset {}: {}", id, offset, e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

// =============================================================================
// drain
// =============================================================================

/// Publishes by printing one JSON line per block
struct StdoutPublisher;

#[derive(Serialize)]
struct DrainLine<'a> {
    cluster: &'a str,
    topic: &'a str,
    key: &'a str,
    value: &'a str,
}

impl Publisher for StdoutPublisher {
    fn publish(&self, cluster: &str, topic: &str, key: &[u8], value: &[u8]) -> Result<Delivery> {
        print_json(&DrainLine {
            cluster,
            topic,
            key: &String::from_utf8_lossy(key),
            value: &String::from_utf8_lossy(value),
        })?;
        Ok(Delivery::default())
    }
}

fn drain(dirs: &[PathBuf], attempts: u32) -> Result<()> {
    let config = Config::builder()
        .dirs(dirs.iter().cloned())
        .flush_max_attempts(attempts)
        .build()?;
    let service = Service::new(config, Arc::new(StdoutPublisher))?;

    let report = service.flush_inflights()?;
    tracing::info!("drained {} blocks from {} queues", report.delivered(), report.outcomes.len());
    for failure in report.failures() {
        for e in &failure.errors {
            tracing::error!("{}: {}", failure.cluster_topic, e);
        }
    }
    if !report.is_ok() {
        process::exit(2);
    }
    Ok(())
}

// =============================================================================
// remove
// =============================================================================

fn remove(dirs: &[PathBuf], cluster: &str, topic: &str) -> Result<()> {
    let service = Service::new(config(dirs)?, Arc::new(StdoutPublisher))?;
    if service.remove(cluster, topic)? {
        tracing::info!("removed {}/{}", cluster, topic);
    } else {
        tracing::warn!("no queue {}/{}", cluster, topic);
    }
    Ok(())
}
