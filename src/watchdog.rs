//! Kernel module liveness watchdog (§4.5): polls `/sys/kernel/vfs_monitor`'s inode and exits with a
//! restart-requesting status if it ever changes, since that means the kernel module was unloaded
//! and reloaded out from under the daemon's open netlink socket.
//!
//! Grounded on `original_source/src/server/src/main.cpp`'s `setup_kernel_module_alive_check`: a
//! timer samples `lstat` every 3 seconds, comparing `st_ino` against the value observed at
//! startup. A missing node is *not* treated as a failure (`lstat` failing after the daemon has
//! already started means the system is mid-reboot; systemd will stop the unit), only an inode
//! change is. Exit codes are `original_source/src/server/include/core/config.h`'s
//! `APP_RESTART_CODE`/`APP_QUIT_CODE`.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

/// Path the kernel module publishes for liveness checking (§4.5).
pub const KERNEL_MODULE_NODE: &str = "/sys/kernel/vfs_monitor";

/// Process exit status requesting the service manager restart the daemon.
pub const APP_RESTART_CODE: i32 = 1;

/// Process exit status for a clean, no-restart shutdown.
#[allow(dead_code)]
pub const APP_QUIT_CODE: i32 = 0;

/// Poll interval (§4.5, matches the original's `timer.setInterval(3000)`).
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Reads `node`'s inode, returning `Err` if it is entirely missing. Call once at startup: a
/// missing node *before* the daemon has ever started is a hard failure (§4.5), unlike a node that
/// disappears later.
pub fn initial_inode(node: &Path) -> std::io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::symlink_metadata(node).map(|m| m.ino())
}

/// Runs the watchdog loop forever, exiting the process with [`APP_RESTART_CODE`] the moment
/// `node`'s inode no longer matches `baseline_ino`. Intended to be spawned as its own task; never
/// returns under normal operation.
pub async fn run_forever(node: &Path, baseline_ino: u64) -> ! {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        use std::os::unix::fs::MetadataExt;
        let current_ino = match std::fs::symlink_metadata(node) {
            Ok(metadata) => metadata.ino(),
            Err(_) => {
                // Disappearing mid-run usually means the system is rebooting; wait for systemd to
                // stop us rather than racing it with our own exit.
                continue;
            }
        };

        if current_ino != baseline_ino {
            info!(path = %node.display(), "kernel module inode changed, requesting restart");
            error!("exiting with restart code {APP_RESTART_CODE}");
            std::process::exit(APP_RESTART_CODE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_inode_fails_for_missing_node() {
        assert!(initial_inode(Path::new("/nonexistent/vfs_monitor_probe")).is_err());
    }

    #[test]
    fn initial_inode_succeeds_for_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(initial_inode(file.path()).is_ok());
    }
}
