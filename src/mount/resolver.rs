//! Path resolution on top of the mount table: blacklist and `fuse.dlnfs` filtering (§4.1), and the
//! `find_matching_dir` helper used by external query translation.

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;

use crate::config::{path_has_prefix, EventHandlerConfig};
use crate::mount::{DeviceId, MountTable};

/// Outcome of resolving one kernel event's `(major,minor,relpath)` into a user-visible path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The event resolved to this absolute path and should be processed further.
    Path(PathBuf),
    /// The device is not yet known; the caller should refresh the mount table and retry once.
    UnknownDevice,
    /// The path is on a `fuse.dlnfs` mount, or names a `.longname` shadow file (§4.1); drop
    /// silently.
    LongNameShadow,
    /// The resolved path falls under a blacklisted prefix (§4.1); drop silently.
    Blacklisted,
}

/// Resolves kernel-relative paths to absolute paths, applying the blacklist and long-filename
/// rules that gate whether an event is indexed at all.
pub struct PathResolver {
    mounts: Arc<MountTable>,
    config: Arc<EventHandlerConfig>,
    match_cache: Cache<(PathBuf, PathBuf), Option<PathBuf>>,
}

impl PathResolver {
    pub fn new(mounts: Arc<MountTable>, config: Arc<EventHandlerConfig>) -> Self {
        Self { mounts, config, match_cache: Cache::new(1024) }
    }

    /// Full resolution pipeline for one raw kernel event (§4.1, §4.2 "Path translation").
    pub fn resolve(&self, device_id: DeviceId, relpath: &Path) -> Resolution {
        let Some(abs_path) = self.mounts.resolve(device_id, relpath) else {
            return Resolution::UnknownDevice;
        };

        if is_longname_shadow(&abs_path) || self.on_dlnfs_mount(device_id, relpath) {
            return Resolution::LongNameShadow;
        }

        if self.config.is_blacklisted(&abs_path) {
            return Resolution::Blacklisted;
        }

        Resolution::Path(abs_path)
    }

    /// Checks the filesystem type of the specific mount `relpath` resolves through, not an
    /// arbitrary mount for `device_id` (§4.1: a bind-mounted device may carry mixed fs types).
    fn on_dlnfs_mount(&self, device_id: DeviceId, relpath: &Path) -> bool {
        self.mounts.fs_type_for(device_id, relpath).as_deref() == Some("fuse.dlnfs")
    }

    /// Walks `mount_dir`'s tree — without following symlinks, without crossing mount boundaries —
    /// breadth-first, looking for a directory whose `(st_dev, st_ino)` matches `search_dir` (§4.1).
    /// Ties are broken by shortest path (guaranteed by BFS order). Results are memoized per
    /// `(mount_dir, search_dir)` pair in a bounded cache (§9).
    pub fn find_matching_dir(&self, mount_dir: &Path, search_dir: &Path) -> Option<PathBuf> {
        let key = (mount_dir.to_path_buf(), search_dir.to_path_buf());
        if let Some(cached) = self.match_cache.get(&key) {
            return cached;
        }

        let result = find_matching_dir_uncached(mount_dir, search_dir);
        self.match_cache.insert(key, result.clone());
        result
    }
}

fn is_longname_shadow(path: &Path) -> bool {
    path.extension().map(|ext| ext == "longname").unwrap_or(false)
        || path.file_name().and_then(|n| n.to_str()).map(|n| n.ends_with(".longname")).unwrap_or(false)
}

fn find_matching_dir_uncached(mount_dir: &Path, search_dir: &Path) -> Option<PathBuf> {
    let target = fs::symlink_metadata(search_dir).ok()?;
    let mount_dev = fs::symlink_metadata(mount_dir).ok()?.dev();

    let mut queue = VecDeque::new();
    queue.push_back(mount_dir.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        let meta = match fs::symlink_metadata(&dir) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if meta.dev() != mount_dev {
            // Crossed a mount boundary; don't descend further.
            continue;
        }
        if meta.dev() == target.dev() && meta.ino() == target.ino() {
            return Some(dir);
        }

        let Ok(entries) = fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if file_type.is_symlink() || !file_type.is_dir() {
                continue;
            }
            queue.push_back(entry.path());
        }
    }

    None
}

/// Re-export for callers that only need the blacklist predicate without a full resolver.
pub fn is_blacklisted(path: &Path, blacklist: &[PathBuf]) -> bool {
    blacklist.iter().any(|rule| path_has_prefix(path, rule))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longname_shadow_detection() {
        assert!(is_longname_shadow(Path::new("/a/b/foo.longname")));
        assert!(!is_longname_shadow(Path::new("/a/b/foo.txt")));
    }

    #[test]
    fn find_matching_dir_locates_nested_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let resolver_cache: Cache<(PathBuf, PathBuf), Option<PathBuf>> = Cache::new(8);
        drop(resolver_cache);

        let found = find_matching_dir_uncached(root.path(), &nested);
        assert_eq!(found, Some(nested));
    }

    #[test]
    fn find_matching_dir_returns_none_outside_tree() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        assert_eq!(find_matching_dir_uncached(root.path(), other.path()), None);
    }

    /// A device bind-mounting a `fuse.dlnfs` shadow store alongside its own filesystem must only
    /// be treated as a long-name shadow for paths actually under that bind, not for every path on
    /// the device (§4.1).
    #[test]
    fn dlnfs_gating_only_applies_under_the_matching_bind_mount() {
        const MOUNTINFO: &str = "\
70 1 8:1 / /home/u/docs rw,relatime shared:1 - ext4 /dev/sda1 rw
71 70 8:1 /shadow /home/u/docs/.shadow rw,relatime shared:1 - fuse.dlnfs dlnfs rw";

        let mounts = Arc::new(MountTable::new());
        mounts.refresh_from_str(MOUNTINFO).unwrap();
        let resolver = PathResolver::new(Arc::clone(&mounts), Arc::new(EventHandlerConfig::default()));

        assert_eq!(resolver.resolve((8, 1), Path::new("/notes.txt")), Resolution::Path(PathBuf::from("/home/u/docs/notes.txt")));
        assert_eq!(resolver.resolve((8, 1), Path::new("/shadow/a.longname")), Resolution::LongNameShadow);
    }
}
