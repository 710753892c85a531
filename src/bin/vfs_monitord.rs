//! Process entrypoint (§5): wires the netlink reader, event filter, job batcher, worker pool,
//! watchdog, and control surface into one running daemon, and drives graceful shutdown on
//! `SIGINT`/`SIGTERM`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use vfs_monitord::batcher::IndexJob;
use vfs_monitord::config::{Cli, EventHandlerConfig};
use vfs_monitord::context::Context;
use vfs_monitord::control::ControlSurface;
use vfs_monitord::filter::EventFilter;
use vfs_monitord::netlink::{self, RawEvent};
use vfs_monitord::reconciler;
use vfs_monitord::watchdog;
use vfs_monitord::worker::WorkerPool;

/// How many raw netlink events may be buffered between the blocking reader thread and the async
/// filter task before the reader starts blocking (§5).
const RAW_EVENT_CHANNEL_CAPACITY: usize = 4096;

/// How many index job batches may queue ahead of the worker pool.
const JOB_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match EventHandlerConfig::load(&cli.config, &cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(watchdog::APP_QUIT_CODE);
        }
    };
    init_tracing(&config.log_level);

    info!("vfs-monitord starting");

    let baseline_ino = match watchdog::initial_inode(std::path::Path::new(watchdog::KERNEL_MODULE_NODE)) {
        Ok(ino) => ino,
        Err(err) => {
            error!(error = %err, node = watchdog::KERNEL_MODULE_NODE, "kernel module node unavailable at startup");
            std::process::exit(watchdog::APP_QUIT_CODE);
        }
    };

    let (job_tx, job_rx) = async_channel::bounded(JOB_CHANNEL_CAPACITY);
    let context = match Context::new(config, job_tx) {
        Ok(context) => context,
        Err(err) => {
            error!(error = %err, "failed to initialize daemon state");
            std::process::exit(watchdog::APP_QUIT_CODE);
        }
    };

    let worker_pool = WorkerPool::spawn(context.config.thread_pool_size, Arc::clone(&context.engine), job_rx);

    let pending = reconciler::scan_all(&context.config);
    info!(count = pending.len(), "queued startup reconciliation scan");
    context.batcher.push_pending(pending);

    let (raw_tx, raw_rx) = async_channel::bounded(RAW_EVENT_CHANNEL_CAPACITY);
    std::thread::spawn(move || netlink::socket::run_forever(raw_tx));

    let mut filter_task = tokio::spawn(run_filter(context.clone(), raw_rx));
    let mut timer_task = tokio::spawn(run_batch_timer(context.clone()));
    let mut commit_task = tokio::spawn(run_commit_timer(context.clone()));
    let mut watchdog_task = {
        let watchdog_node = PathBuf::from(watchdog::KERNEL_MODULE_NODE);
        tokio::spawn(async move { watchdog::run_forever(&watchdog_node, baseline_ino).await })
    };

    let control_surface = ControlSurface::new(context.clone());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down");
        }
        result = &mut filter_task => {
            warn!(?result, "event filter task exited unexpectedly");
        }
        result = &mut watchdog_task => {
            warn!(?result, "watchdog task exited unexpectedly");
        }
    }

    // Stop accepting new events and drop every handle that keeps the batcher's job-channel sender
    // alive, so the worker pool's receiver closes and `join` below actually returns (§5 shutdown).
    filter_task.abort();
    timer_task.abort();
    commit_task.abort();
    watchdog_task.abort();
    drop(control_surface);

    let engine = Arc::clone(&context.engine);
    drop(context);

    worker_pool.join().await;

    if let Err(err) = engine.shutdown() {
        error!(error = %err, "failed to flush index on shutdown");
    }

    info!("vfs-monitord stopped");
}

/// Drains decoded kernel events, feeding normalized jobs into the batcher (§4.2 → §4.4). Also owns
/// rename-cookie eviction, since the cookie table is private to one `EventFilter` and not shared
/// across tasks (§4.2).
async fn run_filter(context: Context, raw_rx: async_channel::Receiver<RawEvent>) {
    let filter = EventFilter::new(Arc::clone(&context.mounts), Arc::clone(&context.config));
    let mut eviction_interval = tokio::time::interval(vfs_monitord::filter::RENAME_COOKIE_TTL);

    loop {
        tokio::select! {
            raw = raw_rx.recv() => {
                match raw {
                    Ok(raw) => {
                        if let Some(event) = filter.process(raw) {
                            context.batcher.push_live(IndexJob::from_full_path_event(event));
                        }
                    }
                    Err(_) => return,
                }
            }
            _ = eviction_interval.tick() => {
                filter.evict_expired_cookies();
            }
        }
    }
}

/// Drives the batcher's size/timer flush cadence (§4.4, §5 "Timer" role).
async fn run_batch_timer(context: Context) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        interval.tick().await;
        context.batcher.tick();
    }
}

/// Drives the two durability cadences of §4.3 independently: a frequent volatile commit (so
/// queries see recent writes) and a much less frequent merge into the persistent tier.
async fn run_commit_timer(context: Context) {
    let mut volatile_tick = tokio::time::interval(std::time::Duration::from_millis(context.config.commit_volatile_index_timeout_ms));
    let mut persistent_tick = tokio::time::interval(std::time::Duration::from_millis(context.config.commit_persistent_index_timeout_ms));
    loop {
        tokio::select! {
            _ = volatile_tick.tick() => {
                if let Err(err) = context.engine.commit_volatile() {
                    warn!(error = %err, "periodic volatile commit failed");
                }
            }
            _ = persistent_tick.tick() => {
                if let Err(err) = context.engine.flush_volatile_to_persistent() {
                    warn!(error = %err, "periodic persistent merge failed");
                }
            }
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
