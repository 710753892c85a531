//! Reconciliation directory walk (§4.4, §7 "daemon starts with an existing tree on disk"):
//! enumerates everything under the configured indexing roots and feeds it to the
//! [`crate::batcher::JobBatcher`]'s `pending_paths` backlog, so paths that predate the daemon (or
//! were missed while it was down) eventually get indexed without blocking live event ingestion.
//!
//! Grounded on `original_source/src/server/src/core/disk_scanner.cpp`'s
//! `recursive_directory_iterator` walk: blacklisted and unreadable directories are pruned (the
//! equivalent of `disable_recursion_pending()`), symlinks are recorded but not followed, and
//! dotfiles are indexed like anything else (hiding only applies to search result presentation, via
//! [`crate::index::document::is_hidden_name`], not to ingestion).

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::EventHandlerConfig;

/// Walks every configured indexing root and returns every path found, in directory-then-children
/// order. Does not follow symlinks and does not cross into a blacklisted subtree.
pub fn scan_all(config: &EventHandlerConfig) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in &config.indexing_paths {
        found.extend(scan_subtree(root.event_path(), config));
    }
    found
}

/// Walks a single subtree (§6 `sync`: re-scanning one mount point rather than every configured
/// root). Returns nothing if `root` itself is blacklisted.
pub fn scan_subtree(root: &Path, config: &EventHandlerConfig) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if config.is_blacklisted(root) {
        debug!(path = %root.display(), "scan root is blacklisted, skipping scan");
        return found;
    }
    scan_dir(root, config, &mut found);
    found
}

fn scan_dir(dir: &Path, config: &EventHandlerConfig, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "failed to read directory during reconciliation scan");
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "failed to read directory entry during reconciliation scan");
                continue;
            }
        };

        let path = entry.path();
        if config.is_blacklisted(&path) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to stat directory entry during reconciliation scan");
                continue;
            }
        };

        found.push(path.clone());

        if file_type.is_dir() && !file_type.is_symlink() {
            scan_dir(&path, config, found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_for(root: PathBuf) -> EventHandlerConfig {
        let mut config = EventHandlerConfig::default();
        config.indexing_paths = vec![crate::config::IndexingRoot { origin_path: root.clone(), event_path: None }];
        config
    }

    #[test]
    fn scan_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), b"x").unwrap();

        let found = scan_all(&config_for(dir.path().to_path_buf()));
        assert!(found.contains(&dir.path().join("a.txt")));
        assert!(found.contains(&dir.path().join("sub")));
        assert!(found.contains(&dir.path().join("sub").join("b.txt")));
    }

    #[test]
    fn scan_skips_blacklisted_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("secret.txt"), b"x").unwrap();

        let mut config = config_for(dir.path().to_path_buf());
        config.blacklist_paths = vec![blocked.clone()];

        let found = scan_all(&config);
        assert!(!found.iter().any(|p| p.starts_with(&blocked)));
    }

    #[test]
    fn scan_does_not_descend_into_blacklisted_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let mut config = config_for(dir.path().to_path_buf());
        config.blacklist_paths = vec![dir.path().to_path_buf()];

        assert!(scan_all(&config).is_empty());
    }
}
