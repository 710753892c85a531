//! Daemon-scoped shared state (§9 "no global singletons"): one `Context` is built at startup and
//! passed by reference (or cloned, being all `Arc`s internally) to every component that needs it,
//! rather than each module reaching for a process-wide static the way Qt code commonly reaches for
//! `Q_GLOBAL_STATIC`.

use std::sync::Arc;

use async_channel::Sender;

use crate::batcher::{IndexJob, JobBatcher};
use crate::config::EventHandlerConfig;
use crate::index::IndexEngine;
use crate::mount::MountTable;

/// Everything a running daemon needs to share across its tasks (netlink reader, filter, batcher,
/// workers, control surface, watchdog). Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<EventHandlerConfig>,
    pub mounts: Arc<MountTable>,
    pub engine: Arc<IndexEngine>,
    pub batcher: Arc<JobBatcher>,
}

impl Context {
    /// Builds the shared state. `jobs_out` is the channel the worker pool consumes from; the
    /// caller owns spawning the worker pool itself, since that's an independent lifetime concern
    /// (§5: the pool must be joined during shutdown, the context need not know about that).
    pub fn new(config: EventHandlerConfig, jobs_out: Sender<Vec<IndexJob>>) -> crate::error::Result<Self> {
        let config = Arc::new(config);
        let mounts = Arc::new(MountTable::new());
        mounts.refresh()?;
        let engine = Arc::new(IndexEngine::open(Arc::clone(&config))?);
        let batcher = Arc::new(JobBatcher::new(crate::batcher::DEFAULT_BATCH_SIZE, Arc::clone(&engine), jobs_out));
        Ok(Self { config, mounts, engine, batcher })
    }
}
