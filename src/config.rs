//! Configuration loading: the `event_handler_config` record (§3) plus the CLI surface used to
//! locate and override it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Command-line flags accepted by the daemon binary.
#[derive(Debug, Parser)]
#[command(name = "vfs-monitord", about = "VFS event ingestion and path-search daemon")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/vfs-monitord/config.toml")]
    pub config: PathBuf,

    /// Override the configured log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(long)]
    pub foreground: bool,
}

/// A prefix-anchored indexing root, optionally translating between the path the kernel emits
/// events under and the path a user-facing client should see (§3).
#[derive(Debug, Clone, Deserialize)]
pub struct IndexingRoot {
    /// User-visible absolute path.
    pub origin_path: PathBuf,
    /// Path as it appears in kernel-emitted events, when it differs from `origin_path`
    /// (e.g. under a container or bind mount). Defaults to `origin_path` when absent.
    #[serde(default)]
    pub event_path: Option<PathBuf>,
}

impl IndexingRoot {
    pub fn event_path(&self) -> &Path {
        self.event_path.as_deref().unwrap_or(&self.origin_path)
    }
}

/// The `event_handler_config` record (§3), as loaded from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventHandlerConfig {
    pub persistent_index_dir: PathBuf,
    pub volatile_index_dir: PathBuf,
    pub thread_pool_size: usize,
    pub blacklist_paths: Vec<PathBuf>,
    pub indexing_paths: Vec<IndexingRoot>,
    pub file_type_mapping: HashMap<String, String>,
    pub commit_volatile_index_timeout_ms: u64,
    pub commit_persistent_index_timeout_ms: u64,
    pub log_level: String,
}

impl Default for EventHandlerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            persistent_index_dir: default_runtime_subdir("persistent"),
            volatile_index_dir: default_runtime_subdir("volatile"),
            thread_pool_size: cpus.saturating_sub(3).max(1),
            blacklist_paths: Vec::new(),
            indexing_paths: Vec::new(),
            file_type_mapping: HashMap::new(),
            commit_volatile_index_timeout_ms: 500,
            commit_persistent_index_timeout_ms: 10_000,
            log_level: "info".to_string(),
        }
    }
}

fn default_runtime_subdir(name: &str) -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    base.join("vfs-monitord").join(name)
}

impl EventHandlerConfig {
    /// Loads configuration from `path`, falling back to built-in defaults for any section that is
    /// missing entirely, per §7's "Configuration absent" policy.
    pub fn load(path: &Path, cli: &Cli) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "configuration file absent or unreadable, using built-in defaults");
                Self::default()
            }
        };

        if let Some(level) = &cli.log_level {
            config.log_level = level.clone();
        }

        if config.indexing_paths.is_empty() {
            warn!("no indexing_paths configured, the daemon will index nothing");
        }

        Ok(config)
    }

    /// True if `path` falls under a configured blacklist prefix (§3's `BlacklistRule`): the rule
    /// must match either the whole path or be followed by a `/`.
    pub fn is_blacklisted(&self, path: &Path) -> bool {
        self.blacklist_paths.iter().any(|rule| path_has_prefix(path, rule))
    }
}

/// Prefix-anchored match used by both blacklist rules and indexing roots: `path` matches `prefix`
/// iff `path == prefix` or `path` starts with `prefix` followed by a path separator.
pub fn path_has_prefix(path: &Path, prefix: &Path) -> bool {
    if path == prefix {
        return true;
    }
    match path.strip_prefix(prefix) {
        Ok(rest) => !rest.as_os_str().is_empty(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_prefix_matches_subpaths_only() {
        let prefix = PathBuf::from("/home/u/docs/tmp");
        assert!(path_has_prefix(Path::new("/home/u/docs/tmp"), &prefix));
        assert!(path_has_prefix(Path::new("/home/u/docs/tmp/cache.bin"), &prefix));
        assert!(!path_has_prefix(Path::new("/home/u/docs/tmpfile"), &prefix));
        assert!(!path_has_prefix(Path::new("/home/u/docs"), &prefix));
    }

    #[test]
    fn defaults_are_usable_when_file_missing() {
        let cli = Cli { config: PathBuf::from("/nonexistent"), log_level: None, foreground: true };
        let config = EventHandlerConfig::load(Path::new("/nonexistent/config.toml"), &cli).unwrap();
        assert_eq!(config.commit_volatile_index_timeout_ms, 500);
        assert!(config.thread_pool_size >= 1);
    }
}
