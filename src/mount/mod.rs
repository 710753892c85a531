//! Mount table: a snapshot of `(major,minor) → mount point` plus bind-mount and filesystem-type
//! metadata, refreshed from `/proc/self/mountinfo` (§4.1).

pub mod resolver;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{Error, Result};

/// A device identifier: `(major, minor)`, per §3.
pub type DeviceId = (u16, u8);

/// One row of `/proc/self/mountinfo` that matters to path resolution (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device_id: DeviceId,
    pub mount_point: PathBuf,
    /// Path of this mount's root within the source filesystem. Non-`/` for a bind mount.
    pub fs_root: PathBuf,
    pub fs_type: String,
}

/// Snapshot of all known mounts, keyed by device id, with an index of bind targets per device for
/// §4.1's "emit the mount whose `fs_root` is the longest prefix" rule.
#[derive(Debug, Default, Clone)]
struct Snapshot {
    by_device: HashMap<DeviceId, Vec<MountEntry>>,
}

impl Snapshot {
    fn parse(mountinfo: &str) -> Self {
        let mut by_device: HashMap<DeviceId, Vec<MountEntry>> = HashMap::new();

        for line in mountinfo.lines() {
            match parse_mountinfo_line(line) {
                Some(entry) => by_device.entry(entry.device_id).or_default().push(entry),
                None => debug!(line, "skipping unparsable mountinfo line"),
            }
        }

        Self { by_device }
    }

    /// Picks the canonical mount for `(device_id, relpath)`: the entry whose `fs_root` is the
    /// longest prefix of `relpath` (§4.1 bind-mount expansion).
    fn resolve_entry(&self, device_id: DeviceId, relpath: &Path) -> Option<&MountEntry> {
        self.by_device
            .get(&device_id)?
            .iter()
            .filter(|entry| path_is_prefix(&entry.fs_root, relpath))
            .max_by_key(|entry| entry.fs_root.as_os_str().len())
    }
}

fn path_is_prefix(prefix: &Path, path: &Path) -> bool {
    prefix == Path::new("/") || path.starts_with(prefix)
}

/// Parses one `/proc/self/mountinfo` line using the standard column layout documented in
/// `proc(5)`: device id in column 3 as `maj:min`, mount point in column 5, fs root in column 4,
/// fs type following the `-` separator (§6).
fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let _mount_id = fields.next()?;
    let _parent_id = fields.next()?;
    let maj_min = fields.next()?;
    let fs_root = fields.next()?;
    let mount_point = fields.next()?;

    let mut rest = line.split(" - ");
    let _before = rest.next()?;
    let after = rest.next()?;
    let fs_type = after.split_whitespace().next()?;

    let (major, minor) = maj_min.split_once(':')?;
    let major: u16 = major.parse().ok()?;
    let minor: u8 = minor.parse().ok()?;

    Some(MountEntry {
        device_id: (major, minor),
        mount_point: PathBuf::from(unescape_octal(mount_point)),
        fs_root: PathBuf::from(unescape_octal(fs_root)),
        fs_type: fs_type.to_string(),
    })
}

/// `/proc` escapes space, tab, newline, and backslash as `\NNN` octal sequences.
fn unescape_octal(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Ok(code) = u8::from_str_radix(&raw[i + 1..i + 4], 8) {
                out.push(code as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Thread-shared mount table. The filter task is the sole writer (`refresh`); every other reader
/// (workers, control surface, reconciler) reads through the same `RwLock`-protected snapshot,
/// swapped atomically on refresh, per §5 and §9's "Mount table shared across threads" note.
#[derive(Debug, Default)]
pub struct MountTable {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(Snapshot::default())) }
    }

    /// Parses `/proc/self/mountinfo` and atomically swaps in the new snapshot (§4.1).
    pub fn refresh(&self) -> Result<()> {
        self.refresh_from_str(&fs::read_to_string("/proc/self/mountinfo")?)
    }

    fn refresh_from_str(&self, mountinfo: &str) -> Result<()> {
        let snapshot = Snapshot::parse(mountinfo);
        let count: usize = snapshot.by_device.values().map(Vec::len).sum();
        debug!(mounts = count, "mount table refreshed");
        *self.snapshot.write().unwrap() = Arc::new(snapshot);
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap())
    }

    /// Resolves `(device_id, relpath) → abs-path`, or `None` if the device is unknown (§4.1).
    /// Callers should `refresh()` once and retry on a `None` for a device that was previously
    /// known, per §7's "Unknown (major,minor)" policy.
    pub fn resolve(&self, device_id: DeviceId, relpath: &Path) -> Option<PathBuf> {
        let snapshot = self.current();
        let entry = snapshot.resolve_entry(device_id, relpath)?;
        let suffix = relpath.strip_prefix(&entry.fs_root).unwrap_or(relpath);
        Some(join_abs(&entry.mount_point, suffix))
    }

    /// The filesystem type of an arbitrary mount for `device_id`. Only meaningful when the device
    /// has a single mount point; for devices with bind mounts of differing types use
    /// [`MountTable::fs_type_for`] instead, which resolves through the same entry `resolve` would.
    pub fn fs_type(&self, device_id: DeviceId) -> Option<String> {
        let snapshot = self.current();
        snapshot.by_device.get(&device_id)?.first().map(|e| e.fs_type.clone())
    }

    /// The filesystem type of the specific mount that `(device_id, relpath)` resolves through
    /// (§4.1: "if the **resolved** path lies on a mount whose `fs_type = fuse.dlnfs`"), so a
    /// bind-mounted device with mixed filesystem types is classified correctly.
    pub fn fs_type_for(&self, device_id: DeviceId, relpath: &Path) -> Option<String> {
        let snapshot = self.current();
        snapshot.resolve_entry(device_id, relpath).map(|entry| entry.fs_type.clone())
    }

    pub fn contains_device(&self, device_id: DeviceId) -> bool {
        self.current().by_device.contains_key(&device_id)
    }

    /// Every mount point known as of the last refresh, for verifying §8 invariant 5 (mount
    /// bijection) in tests.
    pub fn mount_points(&self) -> Vec<PathBuf> {
        self.current()
            .by_device
            .values()
            .flat_map(|entries| entries.iter().map(|e| e.mount_point.clone()))
            .collect()
    }
}

fn join_abs(base: &Path, suffix: &Path) -> PathBuf {
    if suffix.as_os_str().is_empty() {
        return base.to_path_buf();
    }
    let mut joined = base.to_path_buf();
    joined.push(suffix);
    joined
}

/// Returns an error describing why a device is unavailable, for call sites that want to surface
/// it rather than silently drop (used by the control surface, not the live event path).
pub fn unknown_device_error(device_id: DeviceId) -> Error {
    let (major, minor) = device_id;
    Error::Mount(format!("unknown device {major}:{minor}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
60 35 0:3 / /home/u/docs rw - fuse.dlnfs dlnfs rw
61 60 8:1 / /home/u/docs rw,relatime shared:1 - ext4 /dev/sda1 rw
62 61 8:1 /projects /home/u/docs/projects rw,relatime shared:1 - ext4 /dev/sda1 rw";

    #[test]
    fn parses_device_and_mount_point() {
        let table = MountTable::new();
        table.refresh_from_str(SAMPLE).unwrap();
        assert_eq!(table.resolve((8, 1), Path::new("/notes.txt")), Some(PathBuf::from("/home/u/docs/notes.txt")));
    }

    #[test]
    fn bind_mount_picks_longest_fs_root_prefix() {
        let table = MountTable::new();
        table.refresh_from_str(SAMPLE).unwrap();
        let resolved = table.resolve((8, 1), Path::new("/projects/a.rs")).unwrap();
        assert_eq!(resolved, PathBuf::from("/home/u/docs/projects/a.rs"));
    }

    #[test]
    fn unknown_device_resolves_to_none() {
        let table = MountTable::new();
        table.refresh_from_str(SAMPLE).unwrap();
        assert_eq!(table.resolve((9, 9), Path::new("/x")), None);
    }

    #[test]
    fn reports_fuse_dlnfs_fs_type() {
        let table = MountTable::new();
        table.refresh_from_str(SAMPLE).unwrap();
        assert_eq!(table.fs_type((0, 3)), Some("fuse.dlnfs".to_string()));
    }

    /// A single device id can carry more than one `fs_root` with a different `fs_type` each (a
    /// bind mount re-exporting a `fuse.dlnfs` shadow store alongside the device's own
    /// filesystem); `fs_type_for` must resolve through the entry the path actually falls under,
    /// not an arbitrary one for the device (§4.1).
    const MIXED_FS_TYPE_SAMPLE: &str = "\
70 1 8:1 / /home/u/docs rw,relatime shared:1 - ext4 /dev/sda1 rw
71 70 8:1 /shadow /home/u/docs/.shadow rw,relatime shared:1 - fuse.dlnfs dlnfs rw";

    #[test]
    fn fs_type_for_resolves_through_the_matching_bind_entry() {
        let table = MountTable::new();
        table.refresh_from_str(MIXED_FS_TYPE_SAMPLE).unwrap();

        assert_eq!(table.fs_type_for((8, 1), Path::new("/shadow/foo.longname")), Some("fuse.dlnfs".to_string()));
        assert_eq!(table.fs_type_for((8, 1), Path::new("/notes.txt")), Some("ext4".to_string()));
    }
}
