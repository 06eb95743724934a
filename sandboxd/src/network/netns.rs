/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use nix::{
    errno::Errno,
    mount::{MntFlags, MsFlags},
    sched::CloneFlags,
    sys::statfs::{statfs, NSFS_MAGIC},
};
use std::{
    fmt::Debug,
    fs::OpenOptions,
    io::{self, ErrorKind},
    path::Path,
};
use tracing::trace;

/// Operations on filesystem-visible network namespaces.
///
/// A namespace is "open" while its path resolves to a live namespace. The
/// path may outlive the namespace (for example after an out-of-band
/// `umount`), in which case it is closed but still present.
pub trait NetNamespaces: Send + Sync + Debug {
    /// Creates a new network namespace and pins it at `path`.
    fn create(&self, path: &Path) -> io::Result<()>;

    fn is_open(&self, path: &Path) -> io::Result<bool>;

    /// Unpins and deletes `path`. Missing paths are not an error.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Kernel backed namespaces, pinned with a bind mount of the nsfs inode the
/// same way `ip netns add` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxNetNamespaces;

impl NetNamespaces for LinuxNetNamespaces {
    fn create(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // The bind mount needs an existing target.
        let _ = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        // unshare(2) only moves the calling thread, so do it on a throwaway
        // thread. The namespace stays alive through the bind mount.
        let target = path.to_path_buf();
        let res = std::thread::spawn(move || -> io::Result<()> {
            nix::sched::unshare(CloneFlags::CLONE_NEWNET)
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

            let source =
                format!("/proc/self/task/{}/ns/net", nix::unistd::gettid());

            nix::mount::mount(
                Some(source.as_str()),
                &target,
                None::<&str>, // ignored
                MsFlags::MS_BIND,
                None::<&str>, // ignored
            )
            .map_err(|e| io::Error::from_raw_os_error(e as i32))
        })
        .join()
        .map_err(|_| {
            io::Error::new(ErrorKind::Other, "namespace thread panicked")
        })?;

        if let Err(e) = res {
            let _best_effort = std::fs::remove_file(path);
            return Err(e);
        }

        trace!("pinned network namespace at {}", path.display());
        Ok(())
    }

    fn is_open(&self, path: &Path) -> io::Result<bool> {
        match statfs(path) {
            Ok(stat) => Ok(stat.filesystem_type() == NSFS_MAGIC),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
        }
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match nix::mount::umount2(path, MntFlags::MNT_DETACH) {
            // EINVAL: not a mount point anymore, ENOENT: already gone
            Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }

        match std::fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_helpers::*;

    fn random_path_for_tests() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("sandboxd-netns-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_path_is_closed_and_removable() {
        let path = random_path_for_tests();
        let ns = LinuxNetNamespaces;
        assert!(!ns.is_open(&path).expect("probe"));
        ns.remove(&path).expect("remove is idempotent");
    }

    #[test]
    fn plain_file_is_not_an_open_namespace() {
        let path = random_path_for_tests();
        std::fs::write(&path, b"").expect("write");
        let ns = LinuxNetNamespaces;
        assert!(!ns.is_open(&path).expect("probe"));
        ns.remove(&path).expect("remove");
        assert!(!path.exists());
    }

    #[test]
    fn create_then_remove() {
        skip_if_not_root!("create_then_remove");
        skip_if_seccomp!("create_then_remove");

        let path = random_path_for_tests();
        let ns = LinuxNetNamespaces;
        ns.create(&path).expect("create");
        assert!(ns.is_open(&path).expect("probe"));

        ns.remove(&path).expect("remove");
        assert!(!ns.is_open(&path).expect("probe"));
        assert!(!path.exists());

        // already gone
        ns.remove(&path).expect("remove twice");
    }

    #[test]
    fn detached_namespace_is_closed_but_present() {
        skip_if_not_root!("detached_namespace_is_closed_but_present");
        skip_if_seccomp!("detached_namespace_is_closed_but_present");

        let path = random_path_for_tests();
        let ns = LinuxNetNamespaces;
        ns.create(&path).expect("create");

        nix::mount::umount2(&path, MntFlags::MNT_DETACH).expect("umount");
        assert!(path.exists());
        assert!(!ns.is_open(&path).expect("probe"));

        ns.remove(&path).expect("remove");
        assert!(!path.exists());
    }
}
