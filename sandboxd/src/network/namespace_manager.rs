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

use super::{
    error::{NamespaceError, NetworkError, Result},
    NetNamespaces, NetworkPlugin,
};
use crate::sandbox::SandboxId;
use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

/// The network identity of a sandbox once [NamespaceManager::create] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxNetwork {
    pub netns_path: PathBuf,
    pub ip: IpAddr,
}

/// Creates, probes and tears down sandbox network namespaces, and drives
/// the [NetworkPlugin] that allocates their IPs.
///
/// The plugin's allocation record is never touched here other than through
/// [NetworkPlugin::setup] and [NetworkPlugin::teardown].
#[derive(Debug, Clone)]
pub struct NamespaceManager {
    netns_dir: PathBuf,
    namespaces: Arc<dyn NetNamespaces>,
    plugin: Arc<dyn NetworkPlugin>,
}

impl NamespaceManager {
    pub fn new(
        netns_dir: PathBuf,
        namespaces: Arc<dyn NetNamespaces>,
        plugin: Arc<dyn NetworkPlugin>,
    ) -> Self {
        Self { netns_dir, namespaces, plugin }
    }

    pub fn netns_path(&self, sandbox_id: &SandboxId) -> PathBuf {
        self.netns_dir.join(format!("sandbox-{sandbox_id}"))
    }

    /// Creates the namespace and asks the plugin for an IP. Nothing is left
    /// behind on failure.
    pub async fn create(
        &self,
        sandbox_id: &SandboxId,
    ) -> Result<SandboxNetwork> {
        let netns_path = self.netns_path(sandbox_id);

        let namespaces = self.namespaces.clone();
        let path = netns_path.clone();
        tokio::task::spawn_blocking(move || namespaces.create(&path))
            .await
            .map_err(NamespaceError::from)?
            .map_err(|source| NamespaceError::FailedToCreate {
                path: netns_path.clone(),
                source,
            })?;

        let ip = match self.plugin.setup(sandbox_id, &netns_path).await {
            Ok(ip) => ip,
            Err(e) => {
                // a chained plugin may have allocated before a later one failed
                if let Err(release) =
                    self.plugin.teardown(sandbox_id, Some(&netns_path)).await
                {
                    warn!("failed to release partial network setup for sandbox {sandbox_id}: {release}");
                }
                if let Err(remove) = self.remove(&netns_path).await {
                    warn!("failed to remove network namespace for sandbox {sandbox_id}: {remove}");
                }
                return Err(e.into());
            }
        };

        info!(
            "sandbox {sandbox_id} network namespace {} has ip {ip}",
            netns_path.display()
        );

        Ok(SandboxNetwork { netns_path, ip })
    }

    /// Releases the IP and removes the namespace resource.
    ///
    /// The plugin runs first so it can still act inside the namespace. If the
    /// namespace is already closed, the plugin is still invoked (without a
    /// path) so the allocation record is released.
    pub async fn teardown(
        &self,
        sandbox_id: &SandboxId,
        netns_path: &Path,
    ) -> Result<()> {
        let open = self.is_open(netns_path).await?;
        if !open {
            warn!(
                "network namespace {} of sandbox {sandbox_id} is already closed",
                netns_path.display()
            );
        }

        self.plugin
            .teardown(sandbox_id, open.then_some(netns_path))
            .await
            .map_err(NetworkError::from)?;

        self.remove(netns_path).await?;

        info!(
            "sandbox {sandbox_id} network namespace {} torn down",
            netns_path.display()
        );
        Ok(())
    }

    pub async fn is_open(
        &self,
        netns_path: &Path,
    ) -> std::result::Result<bool, NamespaceError> {
        let namespaces = self.namespaces.clone();
        let path = netns_path.to_path_buf();
        tokio::task::spawn_blocking(move || namespaces.is_open(&path))
            .await?
            .map_err(|source| NamespaceError::FailedToProbe {
                path: netns_path.to_path_buf(),
                source,
            })
    }

    /// Removes whatever is left at `netns_path` once it no longer holds an
    /// open namespace, such as a file whose mount was detached behind our
    /// back. Returns whether anything was removed.
    ///
    /// The plugin is not involved, the IP stays allocated until
    /// [NamespaceManager::teardown].
    pub async fn remove_stale(
        &self,
        netns_path: &Path,
    ) -> std::result::Result<bool, NamespaceError> {
        let namespaces = self.namespaces.clone();
        let path = netns_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            if !path.exists() || namespaces.is_open(&path)? {
                return Ok(false);
            }
            namespaces.remove(&path).map(|()| true)
        })
        .await?
        .map_err(|source| NamespaceError::FailedToRemove {
            path: netns_path.to_path_buf(),
            source,
        })
    }

    async fn remove(
        &self,
        netns_path: &Path,
    ) -> std::result::Result<(), NamespaceError> {
        let namespaces = self.namespaces.clone();
        let path = netns_path.to_path_buf();
        tokio::task::spawn_blocking(move || namespaces.remove(&path))
            .await?
            .map_err(|source| NamespaceError::FailedToRemove {
                path: netns_path.to_path_buf(),
                source,
            })
    }
}
