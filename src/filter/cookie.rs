//! Rename-cookie coalescing table (§4.2, §9 "bounded LRU" design note).

use std::path::PathBuf;
use std::time::Duration;

use moka::sync::Cache;

/// Maximum number of in-flight rename cookies tracked at once, bounding memory under event
/// floods (§9 Open Question strategy note).
const MAX_PENDING_RENAMES: u64 = 16_384;

/// `cookie (u32) → pending src path` (§3). Entries are inserted on `RENAME_FROM_*` and removed on
/// the matching `RENAME_TO_*`, or evicted after `ttl` if unmatched (§4.2's "accepted best-effort
/// for cross-device renames").
pub struct RenameCookieTable {
    pending: Cache<u32, PathBuf>,
}

impl RenameCookieTable {
    pub fn new(ttl: Duration) -> Self {
        let pending = Cache::builder().max_capacity(MAX_PENDING_RENAMES).time_to_live(ttl).build();
        Self { pending }
    }

    /// Inserts a pending `RENAME_FROM_*`. Invariant: at most one entry per cookie (§3); a second
    /// `RENAME_FROM_*` for the same cookie before the first is matched simply overwrites it, since
    /// the kernel would not reuse a cookie still in flight.
    pub fn insert(&self, cookie: u32, src: PathBuf) {
        self.pending.insert(cookie, src);
    }

    /// Looks up and removes the pending source path for `cookie`, for a matching `RENAME_TO_*`.
    pub fn take(&self, cookie: u32) -> Option<PathBuf> {
        let src = self.pending.get(&cookie);
        if src.is_some() {
            self.pending.invalidate(&cookie);
        }
        src
    }

    /// Forces moka's lazy expiration sweep to run now, so a caller can observe expired entries
    /// disappear without waiting for the next `get`/`insert` to trigger it incidentally.
    pub fn evict_expired(&self) {
        self.pending.run_pending_tasks();
    }

    #[cfg(test)]
    fn len(&self) -> u64 {
        self.pending.run_pending_tasks();
        self.pending.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_to_consumes_the_pending_from() {
        let table = RenameCookieTable::new(Duration::from_secs(5));
        table.insert(42, PathBuf::from("/a.md"));
        assert_eq!(table.take(42), Some(PathBuf::from("/a.md")));
        assert_eq!(table.take(42), None);
    }

    #[test]
    fn unmatched_from_expires_after_ttl() {
        let table = RenameCookieTable::new(Duration::from_millis(20));
        table.insert(7, PathBuf::from("/x"));
        assert_eq!(table.len(), 1);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(table.len(), 0);
        assert_eq!(table.take(7), None);
    }
}
