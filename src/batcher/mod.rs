//! Job batching (§4.4): coalesces filter-stage output into [`IndexJob`]s and decides when the
//! worker pool sees a batch. `live_jobs` is the fast path for events as they arrive; `pending_paths`
//! is the slow reconciliation backlog and only drains once `live_jobs` is empty, so a busy live
//! stream never gets starved by a big startup scan (§4.4, grounded on `base_event_handler.cpp`'s
//! `jobs_push`/`eat_jobs`/`timer_worker`).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::Sender;
use crossbeam_queue::SegQueue;
use tracing::debug;

use crate::action::NormalizedAction;
use crate::filter::FullPathEvent;
use crate::index::IndexEngine;

/// Default `live_jobs` flush threshold (§4.4).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// How many `pending_paths` entries one idle tick drains at most (§4.4).
const PENDING_SLICE: usize = 2000;

/// One unit of work applied to the index engine (§3, §4.4).
///
/// Invariant: `Update` always carries both a `src` and a `dst` — the rename pairing that produces
/// it (§4.2) never yields one without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexJob {
    Add(PathBuf),
    Remove(PathBuf),
    Update { src: PathBuf, dst: PathBuf },
}

impl IndexJob {
    /// Turns one filter-stage event into a job (§4.2 → §4.4 handoff).
    pub fn from_full_path_event(event: FullPathEvent) -> Self {
        match event.action {
            NormalizedAction::RenameFile | NormalizedAction::RenameFolder => IndexJob::Update {
                src: event.src,
                dst: event.dst.expect("rename events always carry dst"),
            },
            NormalizedAction::DelFile | NormalizedAction::DelFolder => IndexJob::Remove(event.src),
            NormalizedAction::NewFile
            | NormalizedAction::NewSymlink
            | NormalizedAction::NewLink
            | NormalizedAction::NewFolder => IndexJob::Add(event.src),
        }
    }
}

/// Coalesces live ingestion events and reconciliation candidates into batches for the worker pool
/// (§4.4). Call [`JobBatcher::push_live`] from the filter consumer and [`JobBatcher::tick`] once a
/// second from a timer task; both push completed batches onto `out`.
pub struct JobBatcher {
    batch_size: usize,
    live_jobs: SegQueue<IndexJob>,
    live_count: AtomicUsize,
    pending_paths: Mutex<VecDeque<PathBuf>>,
    engine: Arc<IndexEngine>,
    out: Sender<Vec<IndexJob>>,
}

impl JobBatcher {
    pub fn new(batch_size: usize, engine: Arc<IndexEngine>, out: Sender<Vec<IndexJob>>) -> Self {
        Self {
            batch_size,
            live_jobs: SegQueue::new(),
            live_count: AtomicUsize::new(0),
            pending_paths: Mutex::new(VecDeque::new()),
            engine,
            out,
        }
    }

    /// Pushes one live job, flushing immediately once `live_jobs` reaches `batch_size` (§4.4).
    pub fn push_live(&self, job: IndexJob) {
        self.live_jobs.push(job);
        if self.live_count.fetch_add(1, Ordering::AcqRel) + 1 >= self.batch_size {
            if let Some(batch) = self.drain_live(self.batch_size) {
                self.send(batch);
            }
        }
    }

    /// Queues reconciliation candidates (startup scan, `refresh`/`sync` control-surface calls);
    /// these only flush once `live_jobs` is empty (§4.4).
    pub fn push_pending(&self, paths: impl IntoIterator<Item = PathBuf>) {
        self.pending_paths.lock().unwrap().extend(paths);
    }

    pub fn pending_paths_count(&self) -> usize {
        self.pending_paths.lock().unwrap().len()
    }

    /// Driven once a second by the batcher's timer task (§4.4, §5 "Timer" role): flushes whatever
    /// `live_jobs` has accumulated below `batch_size`, or failing that, one `pending_paths` slice.
    pub fn tick(&self) {
        match self.drain_live(self.batch_size) {
            Some(batch) => self.send(batch),
            None => self.drain_pending_slice(),
        }
    }

    /// Pops up to `max` jobs off the lock-free `live_jobs` queue. Concurrent callers may each
    /// drain a partial batch rather than one draining all of it; §4.4 only requires batches no
    /// larger than `batch_size`, not that every flush be maximally full.
    fn drain_live(&self, max: usize) -> Option<Vec<IndexJob>> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.live_jobs.pop() {
                Some(job) => {
                    self.live_count.fetch_sub(1, Ordering::AcqRel);
                    batch.push(job);
                }
                None => break,
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    /// `live_jobs` is empty: pop a `pending_paths` slice and turn any path that still exists on
    /// disk and isn't already indexed into an `Add` job (§4.4, mirroring the original's
    /// `timer_worker` idle-path existence check).
    fn drain_pending_slice(&self) {
        let slice = {
            let mut guard = self.pending_paths.lock().unwrap();
            if guard.is_empty() {
                return;
            }
            let n = PENDING_SLICE.min(guard.len());
            drain(&mut guard, n)
        };

        debug!(count = slice.len(), "draining reconciliation slice");
        let jobs: Vec<IndexJob> = slice
            .into_iter()
            .filter(|path| path.exists() && !self.engine.document_exists(&path.to_string_lossy(), true))
            .map(IndexJob::Add)
            .collect();

        if !jobs.is_empty() {
            self.send(jobs);
        }
    }

    fn send(&self, batch: Vec<IndexJob>) {
        if self.out.send_blocking(batch).is_err() {
            debug!("worker pool channel closed, dropping batch");
        }
    }
}

fn drain<T>(queue: &mut VecDeque<T>, n: usize) -> Vec<T> {
    queue.drain(..n.min(queue.len())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventHandlerConfig;

    fn new_batcher(batch_size: usize) -> (JobBatcher, async_channel::Receiver<Vec<IndexJob>>) {
        let (tx, rx) = async_channel::unbounded();
        let engine = Arc::new(IndexEngine::open_in_ram(Arc::new(EventHandlerConfig::default())).unwrap());
        (JobBatcher::new(batch_size, engine, tx), rx)
    }

    #[test]
    fn flushes_live_jobs_at_batch_size() {
        let (batcher, rx) = new_batcher(2);
        batcher.push_live(IndexJob::Add(PathBuf::from("/a")));
        assert!(rx.try_recv().is_err());
        batcher.push_live(IndexJob::Add(PathBuf::from("/b")));
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn tick_flushes_partial_batch_when_idle() {
        let (batcher, rx) = new_batcher(100);
        batcher.push_live(IndexJob::Add(PathBuf::from("/a")));
        batcher.tick();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn pending_paths_only_drain_when_live_empty() {
        let (batcher, rx) = new_batcher(100);
        batcher.push_live(IndexJob::Add(PathBuf::from("/a")));
        batcher.push_pending([PathBuf::from("/nonexistent-pending-path")]);
        batcher.tick();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch, vec![IndexJob::Add(PathBuf::from("/a"))]);
        assert_eq!(batcher.pending_paths_count(), 1);
    }

    #[test]
    fn missing_pending_path_is_dropped_without_a_job() {
        let (batcher, rx) = new_batcher(100);
        batcher.push_pending([PathBuf::from("/nonexistent-pending-path")]);
        batcher.tick();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rename_event_becomes_update_job() {
        let event = FullPathEvent {
            action: NormalizedAction::RenameFile,
            src: PathBuf::from("/a"),
            dst: Some(PathBuf::from("/b")),
        };
        assert_eq!(
            IndexJob::from_full_path_event(event),
            IndexJob::Update { src: PathBuf::from("/a"), dst: PathBuf::from("/b") }
        );
    }
}
