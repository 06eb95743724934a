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

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bounded exponential backoff applied to each teardown step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeardownRetry {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// After this much time a step gives up and the error is surfaced.
    pub max_elapsed_time: Duration,
}

impl TeardownRetry {
    /// Fails on the first error. Callers are expected to retry themselves.
    pub fn none() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            multiplier: 1.0,
            max_interval: Duration::from_millis(1),
            max_elapsed_time: Duration::ZERO,
        }
    }

    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.5)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed_time))
            .build()
    }
}

impl Default for TeardownRetry {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            multiplier: 2.0,
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Duration::from_secs(10),
        }
    }
}

/// Everything the daemon needs to find its collaborators on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxdConfig {
    /// State root of the low-level runtime.
    pub root_dir: PathBuf,
    /// Durable per-sandbox bundles.
    pub bundle_dir: PathBuf,
    /// Where network namespaces are bind mounted.
    pub netns_dir: PathBuf,
    pub cni_bin_dir: PathBuf,
    pub cni_conf_dir: PathBuf,
    pub pause_rootfs: PathBuf,
    pub pause_command: String,
    #[serde(default)]
    pub teardown_retry: TeardownRetry,
}

impl Default for SandboxdConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/run/sandboxd"),
            bundle_dir: PathBuf::from("/var/lib/sandboxd/bundles"),
            netns_dir: PathBuf::from("/var/run/netns"),
            cni_bin_dir: PathBuf::from("/opt/cni/bin"),
            cni_conf_dir: PathBuf::from("/etc/cni/net.d"),
            pause_rootfs: PathBuf::from("/var/lib/sandboxd/pause"),
            pause_command: "/pause".into(),
            teardown_retry: TeardownRetry::default(),
        }
    }
}
