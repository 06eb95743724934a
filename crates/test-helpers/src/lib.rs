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

//! Test macros and fixtures shared by the workspace's test suites.

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

#[doc(hidden)]
pub use nix;

// The skip helpers follow nix's own (unexported) test helpers:
// https://github.com/nix-rust/nix/blob/master/test/common/mod.rs

/// Returns from the current test after printing the reason to stderr.
#[macro_export]
macro_rules! skip {
    ($($reason: expr),+) => {{
        ::std::eprintln!($($reason),+);
        return;
    }};
}

/// Skips tests that mount or unshare namespaces when not running as root.
#[macro_export]
macro_rules! skip_if_not_root {
    ($name:expr) => {
        if !$crate::nix::unistd::Uid::current().is_root() {
            $crate::skip!("{} requires root privileges. Skipping test.", $name);
        }
    };
}

#[macro_export]
macro_rules! skip_if_seccomp {
    ($name:expr) => {
        if $crate::seccomp_enabled() {
            $crate::skip!(
                "{} cannot be run in Seccomp mode. Skipping test.",
                $name
            );
        }
    };
}

/// Polls `$left` until it equals `$right` or the timeout expires.
///
/// Defaults to a 200ms timeout polled every 10ms. Must be used in an async
/// test running on tokio.
#[macro_export]
macro_rules! assert_eventually_eq {
    ($left: expr, $right: expr $(,)?) => {
        $crate::assert_eventually_eq!(
            $left,
            $right,
            ::std::time::Duration::from_millis(200),
            ::std::time::Duration::from_millis(10)
        );
    };
    ($left: expr, $right: expr, $timeout: expr $(,)?) => {
        $crate::assert_eventually_eq!(
            $left,
            $right,
            $timeout,
            ::std::time::Duration::from_millis(10)
        );
    };
    ($left: expr, $right: expr, $timeout: expr, $poll_interval: expr $(,)?) => {
        let start = ::std::time::Instant::now();
        let timeout = $timeout;
        let poll_interval = $poll_interval;
        loop {
            let left = $left;
            let right = $right;
            if left == right {
                break;
            }
            if start.elapsed() > timeout {
                ::core::panic!(
                    "assertion failed after {:?}: `(left == right)`\nleft: {:#?}\nright: {:#?}",
                    timeout, left, right
                );
            }
            ::tokio::time::sleep(poll_interval).await;
        }
    };
}

#[doc(hidden)]
pub fn seccomp_enabled() -> bool {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return false;
    };
    status.lines().any(|line| {
        let mut fields = line.split_whitespace();
        fields.next() == Some("Seccomp:") && fields.next() != Some("0")
    })
}

/// A uniquely named directory under the system temp dir, removed on drop.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir()
            .join(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)
            .unwrap_or_else(|e| panic!("failed to create {path:?}: {e}"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.path.join(path)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_is_removed_on_drop() {
        let dir = TempDir::new("test-helpers");
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());

        std::fs::write(dir.join("file"), b"x").expect("write");
        drop(dir);
        assert!(!path.exists());
    }
}
