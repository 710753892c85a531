//! Control surface (§6): the daemon's externally invokable operations, named and shaped after the
//! methods on the original daemon's D-Bus interface. Wiring an actual IPC transport (D-Bus, a Unix
//! socket RPC, whatever) is out of scope — `original_source/src/configs/dbus/AnythingAdaptor.cpp`
//! itself is nothing but a `QMetaObject::invokeMethod` forwarder with no logic of its own, so there
//! is no transport-layer behavior to imitate, only the method set and its semantics. [`ControlSurface`]
//! is that logic; a transport would delegate to it the same way the original delegated into its
//! `default_event_handler`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::batcher::IndexJob;
use crate::context::Context;
use crate::error::Result;
use crate::index::Hit;

/// Page size `search`'s non-paginated overload uses (§6).
const DEFAULT_SEARCH_LIMIT: usize = 100;

/// A paginated search result (§6 `search`'s 7-argument overload).
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub paths: Vec<String>,
    /// Whether the underlying index may hold more matches beyond this page.
    pub has_more: bool,
}

/// An opaque client-defined post-filter applied on top of the engine's own ranked results (§6
/// `parallelsearch`, §9 Open Question (b): the narrowest reading of "rules" that doesn't invent
/// wire semantics nobody specified).
pub trait SearchRule: Send + Sync {
    fn matches(&self, hit: &Hit) -> bool;
}

/// Implements §6's method set as plain Rust methods over a shared [`Context`].
pub struct ControlSurface {
    context: Context,
    auto_index_internal: AtomicBool,
    auto_index_external: AtomicBool,
    log_level: Mutex<String>,
}

impl ControlSurface {
    pub fn new(context: Context) -> Self {
        let log_level = context.config.log_level.clone();
        Self {
            context,
            auto_index_internal: AtomicBool::new(true),
            auto_index_external: AtomicBool::new(false),
            log_level: Mutex::new(log_level),
        }
    }

    /// `addPath` (§6): indexes `path`. Asynchronous — the call enqueues the job and returns before
    /// indexing completes, matching the original's `jobs_push` (unlike `removePath`, below).
    ///
    /// The original's D-Bus adaptor follows this call with an `addPathFinished(path, success)`
    /// signal once the worker pool drains the job. There is no transport here to emit a signal
    /// over (§1 Non-goals: the IPC adaptor surface), and the job-batching boundary means this
    /// method has no handle back to the specific batch a given path lands in, so that completion
    /// notification has no counterpart in this crate.
    pub fn add_path(&self, path: PathBuf) {
        self.context.batcher.push_live(IndexJob::Add(path));
    }

    /// `removePath` (§6): applied synchronously, directly against the engine. This asymmetry with
    /// `addPath` is deliberate and mirrors `base_event_handler.cpp::removePath`, which calls
    /// `engine_->remove` inline rather than going through the job queue.
    pub fn remove_path(&self, path: &Path) -> Result<()> {
        self.context.engine.remove(path)
    }

    /// `hasLFT` (§6): true if anything is indexed at or under `path`.
    pub fn has_lft(&self, path: &str) -> bool {
        self.context.engine.document_exists(path, false)
    }

    /// `hasLFTSubdirectories` (§6): true if `path` falls under a configured indexing root, i.e.
    /// the daemon maintains an index for it regardless of whether anything is indexed there yet.
    pub fn has_lft_subdirectories(&self, path: &Path) -> bool {
        self.context
            .config
            .indexing_paths
            .iter()
            .any(|root| crate::config::path_has_prefix(path, root.event_path()))
    }

    /// `refresh` (§6): re-walks every configured indexing root, optionally narrowed by
    /// `serial_uri_filter` (empty means "all roots"), queuing everything found as reconciliation
    /// backlog rather than indexing inline.
    pub fn refresh(&self, serial_uri_filter: &str) {
        let paths = crate::reconciler::scan_all(&self.context.config);
        let filtered: Vec<PathBuf> = if serial_uri_filter.is_empty() {
            paths
        } else {
            paths.into_iter().filter(|p| p.to_string_lossy().contains(serial_uri_filter)).collect()
        };
        info!(count = filtered.len(), "refresh queued reconciliation paths");
        self.context.batcher.push_pending(filtered);
    }

    /// `sync` (§6): re-walks a single mount point's subtree.
    pub fn sync(&self, mount_point: &Path) {
        let found = crate::reconciler::scan_subtree(mount_point, &self.context.config);
        info!(count = found.len(), path = %mount_point.display(), "sync queued reconciliation paths");
        self.context.batcher.push_pending(found);
    }

    /// `search` (§6, simple overload): prefix+query search with a fixed default page size.
    pub fn search(&self, path: &str, key: &str, use_regexp: bool) -> Result<Vec<String>> {
        let outcome = self.context.engine.search(path, key, 0, DEFAULT_SEARCH_LIMIT, use_regexp)?;
        self.enqueue_stale_removal(&outcome.stale);
        Ok(outcome.hits.into_iter().map(|hit| hit.full_path).collect())
    }

    /// `search` (§6, paginated overload): explicit offset/limit, reporting whether the index may
    /// hold further results beyond this page.
    pub fn search_paginated(&self, path: &str, key: &str, offset: usize, limit: usize, use_regexp: bool) -> Result<SearchPage> {
        let outcome = self.context.engine.search(path, key, offset, limit, use_regexp)?;
        self.enqueue_stale_removal(&outcome.stale);
        let has_more = limit != 0 && outcome.hits.len() == limit;
        Ok(SearchPage { paths: outcome.hits.into_iter().map(|hit| hit.full_path).collect(), has_more })
    }

    /// `parallelsearch` (§6): the engine's own ranked results, narrowed by `rules` (§9 Open
    /// Question (b)).
    pub fn parallel_search(&self, path: &str, key: &str, use_regexp: bool, rules: &[Box<dyn SearchRule>]) -> Result<Vec<String>> {
        let outcome = self.context.engine.search(path, key, 0, DEFAULT_SEARCH_LIMIT, use_regexp)?;
        self.enqueue_stale_removal(&outcome.stale);
        Ok(outcome
            .hits
            .into_iter()
            .filter(|hit| rules.iter().all(|rule| rule.matches(hit)))
            .map(|hit| hit.full_path)
            .collect())
    }

    /// Self-healing (§4.3): any path a search found to no longer exist gets enqueued for removal
    /// rather than removed inline, so a burst of stale hits doesn't stall the query under the
    /// engine's writer lock.
    fn enqueue_stale_removal(&self, stale: &[String]) {
        for path in stale {
            self.context.batcher.push_live(IndexJob::Remove(PathBuf::from(path)));
        }
    }

    /// `cacheDir` (§6): where the persistent index lives.
    pub fn cache_dir(&self) -> &Path {
        &self.context.config.persistent_index_dir
    }

    /// `quit` (§6): requests a clean, no-restart shutdown.
    pub fn quit(&self) {
        info!("quit requested via control surface");
        std::process::exit(crate::watchdog::APP_QUIT_CODE);
    }

    pub fn auto_index_internal(&self) -> bool {
        self.auto_index_internal.load(Ordering::Relaxed)
    }

    pub fn set_auto_index_internal(&self, enabled: bool) {
        self.auto_index_internal.store(enabled, Ordering::Relaxed);
    }

    pub fn auto_index_external(&self) -> bool {
        self.auto_index_external.load(Ordering::Relaxed)
    }

    pub fn set_auto_index_external(&self, enabled: bool) {
        self.auto_index_external.store(enabled, Ordering::Relaxed);
    }

    pub fn log_level(&self) -> String {
        self.log_level.lock().unwrap().clone()
    }

    pub fn set_log_level(&self, level: String) {
        *self.log_level.lock().unwrap() = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventHandlerConfig;

    fn surface() -> ControlSurface {
        let (tx, _rx) = async_channel::unbounded();
        let context = Context::new(EventHandlerConfig::default(), tx).unwrap();
        ControlSurface::new(context)
    }

    #[test]
    fn add_then_remove_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();

        let surface = surface();
        surface.context.engine.add(&path).unwrap();
        assert!(surface.has_lft(&path.to_string_lossy()));

        surface.remove_path(&path).unwrap();
        assert!(!surface.has_lft(&path.to_string_lossy()));
    }

    #[test]
    fn has_lft_subdirectories_reflects_configured_roots() {
        let (tx, _rx) = async_channel::unbounded();
        let mut config = EventHandlerConfig::default();
        config.indexing_paths = vec![crate::config::IndexingRoot { origin_path: PathBuf::from("/home"), event_path: None }];
        let context = Context::new(config, tx).unwrap();
        let surface = ControlSurface::new(context);

        assert!(surface.has_lft_subdirectories(Path::new("/home/user/docs")));
        assert!(!surface.has_lft_subdirectories(Path::new("/etc")));
    }

    #[test]
    fn log_level_property_round_trips() {
        let surface = surface();
        surface.set_log_level("debug".to_string());
        assert_eq!(surface.log_level(), "debug");
    }

    struct ExtensionRule(&'static str);
    impl SearchRule for ExtensionRule {
        fn matches(&self, hit: &Hit) -> bool {
            hit.full_path.ends_with(self.0)
        }
    }

    #[test]
    fn parallel_search_applies_post_filter_rules() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("report.txt");
        let doc = dir.path().join("report.doc");
        std::fs::write(&txt, b"x").unwrap();
        std::fs::write(&doc, b"x").unwrap();

        let surface = surface();
        surface.context.engine.add(&txt).unwrap();
        surface.context.engine.add(&doc).unwrap();

        let rules: Vec<Box<dyn SearchRule>> = vec![Box::new(ExtensionRule(".txt"))];
        let hits = surface.parallel_search(dir.path().to_str().unwrap(), "report", false, &rules).unwrap();
        assert_eq!(hits, vec![txt.to_string_lossy().to_string()]);
    }
}
