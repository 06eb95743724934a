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
    keyed_mutex::KeyedMutex,
    reconciler::Reconciler,
    sandbox_store::SandboxStore,
    status::{PodSandboxStatus, SandboxFilter, SandboxInfo, INFO_KEY},
    Result, Sandbox, SandboxConfig, SandboxError, SandboxId,
    SandboxSpecBuilder, SandboxState,
};
use crate::config::{SandboxdConfig, TeardownRetry};
use crate::network::{NamespaceManager, NetworkError};
use crate::task::TaskAdapter;
use backoff::backoff::Backoff;
use chrono::Utc;
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{error, info, trace, warn};

const SANDBOX_ID_ANNOTATION: &str = "io.aurae.sandbox.id";

/// Drives sandboxes through their lifecycle.
///
/// Operations on one sandbox id are serialized, operations on different ids
/// run in parallel. The store lock is only held for lookups and write
/// backs, never across runtime or network calls.
#[derive(Debug)]
pub struct SandboxController {
    store: Mutex<SandboxStore>,
    locks: KeyedMutex<SandboxId>,
    namespaces: NamespaceManager,
    tasks: TaskAdapter,
    reconciler: Reconciler,
    pause_rootfs: PathBuf,
    pause_command: String,
    teardown_retry: TeardownRetry,
}

impl SandboxController {
    /// Builds a controller whose store is rebuilt from the runtime's durable
    /// container listing, with every sandbox reconciled against the OS.
    ///
    /// Containers whose metadata cannot be understood are logged and left
    /// untouched.
    #[tracing::instrument(skip(config, namespaces, tasks))]
    pub async fn recover(
        config: &SandboxdConfig,
        namespaces: NamespaceManager,
        tasks: TaskAdapter,
    ) -> Result<Self> {
        let reconciler = Reconciler::new(namespaces.clone(), tasks.clone());
        let containers = tasks
            .list()
            .await
            .map_err(|source| SandboxError::FailedToListContainers { source })?;

        let mut store = SandboxStore::default();
        for container in containers {
            let container_id = container.id.clone();
            let mut sandbox = match Sandbox::from_container(container) {
                Ok(sandbox) => sandbox,
                Err(e) => {
                    warn!("skipping container {container_id}: {e}");
                    continue;
                }
            };

            match reconciler.refresh(&mut sandbox).await {
                Ok(facts) if !facts.netns_open => {
                    Self::remove_stale_namespace(&namespaces, &sandbox).await;
                }
                Ok(_) => {}
                Err(e) => {
                    // Unverifiable sandboxes are not trusted to be ready.
                    warn!("failed to reconcile sandbox {container_id}: {e}");
                    sandbox.mark_not_ready();
                }
            }

            info!(
                "recovered sandbox {container_id} ({}/{}) as {:?}",
                sandbox.config().namespace,
                sandbox.config().name,
                sandbox.state()
            );
            store.add(sandbox)?;
        }

        Ok(Self {
            store: Mutex::new(store),
            locks: KeyedMutex::default(),
            namespaces,
            tasks,
            reconciler,
            pause_rootfs: config.pause_rootfs.clone(),
            pause_command: config.pause_command.clone(),
            teardown_retry: config.teardown_retry,
        })
    }

    /// Creates the network namespace and the placeholder task of a new
    /// sandbox. Nothing is left behind on failure.
    ///
    /// The container is persisted before the IP is allocated. A crash or a
    /// dropped call past that point leaves a record that is reconciled to
    /// not ready, and [SandboxController::stop] releases its network.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, config: SandboxConfig) -> Result<SandboxId> {
        config.validate()?;

        let sandbox_id = SandboxId::new();
        let _guard = self.locks.lock(sandbox_id.clone()).await;

        let netns_path = self.namespaces.netns_path(&sandbox_id);
        let spec =
            SandboxSpecBuilder::new(&self.pause_rootfs, &self.pause_command)
                .hostname(&config.name)
                .network_namespace(&netns_path)
                .annotation(SANDBOX_ID_ANNOTATION, sandbox_id.as_str())
                .build()
                .map_err(|source| SandboxError::FailedToBuildSpec {
                    sandbox_id: sandbox_id.clone(),
                    source,
                })?;

        let mut sandbox = Sandbox::new(
            sandbox_id.clone(),
            config,
            netns_path,
            spec,
            Utc::now(),
        );
        self.store.lock().await.add(sandbox.clone())?;

        if let Err(source) = self
            .tasks
            .persist(&sandbox_id, sandbox.runtime_spec(), &sandbox.labels())
            .await
        {
            self.rollback(&sandbox).await;
            return Err(SandboxError::FailedToPersist { sandbox_id, source });
        }

        let network = match self.namespaces.create(&sandbox_id).await {
            Ok(network) => network,
            Err(source) => {
                self.rollback(&sandbox).await;
                return Err(SandboxError::FailedToSetupNetwork {
                    sandbox_id,
                    source,
                });
            }
        };
        sandbox.set_ip(network.ip);

        if let Err(source) =
            self.tasks.update_labels(&sandbox_id, &sandbox.labels()).await
        {
            self.rollback(&sandbox).await;
            return Err(SandboxError::FailedToPersist { sandbox_id, source });
        }

        let pid = match self.tasks.start_pause(&sandbox_id).await {
            Ok(pid) => pid,
            Err(source) => {
                self.rollback(&sandbox).await;
                return Err(SandboxError::FailedToStartTask {
                    sandbox_id,
                    source,
                });
            }
        };
        sandbox.set_pid(pid);
        self.write_back(&sandbox).await?;

        info!(
            "sandbox {sandbox_id} is ready with pid {pid} and ip {}",
            network.ip
        );
        Ok(sandbox_id)
    }

    /// Kills the placeholder task and releases the network. Safe to call
    /// any number of times; once the network is released this does nothing.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, sandbox_id: &SandboxId) -> Result<()> {
        let _guard = self.locks.lock(sandbox_id.clone()).await;
        let mut sandbox = self.store.lock().await.get(sandbox_id)?.clone();

        if sandbox.state() == SandboxState::NotReady
            && sandbox.network_released()
        {
            trace!("sandbox {sandbox_id} is already stopped");
            return Ok(());
        }

        let tasks = &self.tasks;
        self.retry(sandbox_id, "delete task", move || {
            tasks.force_delete(sandbox_id)
        })
        .await
        .map_err(|source| SandboxError::FailedToDeleteTask {
            sandbox_id: sandbox_id.clone(),
            source,
        })?;
        sandbox.mark_not_ready();
        self.write_back(&sandbox).await?;

        if !sandbox.network_released() {
            let namespaces = &self.namespaces;
            let netns_path = sandbox.netns_path();
            self.retry(sandbox_id, "tear down network", move || {
                namespaces.teardown(sandbox_id, netns_path)
            })
            .await
            .map_err(|source| SandboxError::FailedToTeardownNetwork {
                sandbox_id: sandbox_id.clone(),
                source,
            })?;

            let mut released = sandbox.clone();
            released.mark_network_released();
            let labels = &released.labels();
            self.retry(sandbox_id, "persist network release", move || {
                tasks.update_labels(sandbox_id, labels)
            })
            .await
            .map_err(|source| SandboxError::FailedToPersist {
                sandbox_id: sandbox_id.clone(),
                source,
            })?;

            sandbox = released;
            self.write_back(&sandbox).await?;
        }

        info!("sandbox {sandbox_id} stopped");
        Ok(())
    }

    /// Forgets a stopped sandbox.
    ///
    /// Refused while the sandbox is ready, while its network has not been
    /// released, or while its namespace is still open. This never tears
    /// anything down itself.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, sandbox_id: &SandboxId) -> Result<()> {
        let _guard = self.locks.lock(sandbox_id.clone()).await;
        let sandbox = self.store.lock().await.get(sandbox_id)?.clone();

        if sandbox.state() == SandboxState::Ready {
            return Err(SandboxError::SandboxReady {
                sandbox_id: sandbox_id.clone(),
            });
        }
        if !sandbox.network_released() {
            return Err(SandboxError::NetworkNotReleased {
                sandbox_id: sandbox_id.clone(),
            });
        }
        let netns_open = self
            .namespaces
            .is_open(sandbox.netns_path())
            .await
            .map_err(|e| SandboxError::FailedToProbeNetwork {
                sandbox_id: sandbox_id.clone(),
                source: NetworkError::from(e),
            })?;
        if netns_open {
            return Err(SandboxError::NetworkNamespaceOpen {
                sandbox_id: sandbox_id.clone(),
                netns_path: sandbox.netns_path().to_path_buf(),
            });
        }

        self.tasks.remove_container(sandbox_id).await.map_err(|source| {
            SandboxError::FailedToDeleteContainer {
                sandbox_id: sandbox_id.clone(),
                source,
            }
        })?;

        let _ = self.store.lock().await.remove(sandbox_id)?;
        info!("sandbox {sandbox_id} removed");
        Ok(())
    }

    /// Reconciles the sandbox against the OS before reporting it, so tasks
    /// killed or namespaces unmounted behind our back show up here.
    #[tracing::instrument(skip(self))]
    pub async fn status(
        &self,
        sandbox_id: &SandboxId,
        verbose: bool,
    ) -> Result<PodSandboxStatus> {
        let _guard = self.locks.lock(sandbox_id.clone()).await;
        let mut sandbox = self.store.lock().await.get(sandbox_id)?.clone();

        let facts = self.reconciler.refresh(&mut sandbox).await?;
        self.write_back(&sandbox).await?;

        let mut status = PodSandboxStatus::new(&sandbox);
        if verbose {
            let info = SandboxInfo::new(&sandbox, facts.netns_open);
            let info = serde_json::to_string(&info).map_err(|source| {
                SandboxError::FailedToEncodeInfo {
                    sandbox_id: sandbox_id.clone(),
                    source,
                }
            })?;
            let _ = status.info.insert(INFO_KEY.into(), info);
        }
        Ok(status)
    }

    /// Reconciled status of every sandbox matching `filter`, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn list(
        &self,
        filter: &SandboxFilter,
    ) -> Result<Vec<PodSandboxStatus>> {
        let ids: Vec<SandboxId> = self
            .store
            .lock()
            .await
            .list()
            .into_iter()
            .map(|sandbox| sandbox.id().clone())
            .filter(|id| filter.id.as_ref().map_or(true, |want| want == id))
            .collect();

        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            match self.status(&id, false).await {
                Ok(status) if filter.matches(&status) => statuses.push(status),
                Ok(_) => {}
                // removed since the snapshot was taken
                Err(SandboxError::SandboxNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(statuses)
    }

    async fn write_back(&self, sandbox: &Sandbox) -> Result<()> {
        let mut store = self.store.lock().await;
        *store.get_mut(sandbox.id())? = sandbox.clone();
        Ok(())
    }

    async fn retry<T, E, F, Fut>(
        &self,
        sandbox_id: &SandboxId,
        step: &str,
        mut op: F,
    ) -> std::result::Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut backoff = self.teardown_retry.backoff();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!("sandbox {sandbox_id}: {step} failed, retrying in {delay:?}: {e}");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!("sandbox {sandbox_id}: {step} failed: {e}");
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Best effort cleanup of a sandbox whose creation failed.
    ///
    /// The container and the record are only dropped once the network is
    /// released. Otherwise the sandbox stays around as not ready so a later
    /// stop can release it.
    async fn rollback(&self, sandbox: &Sandbox) {
        let sandbox_id = sandbox.id();
        if let Err(e) = self.tasks.force_delete(sandbox_id).await {
            warn!("failed to delete task of sandbox {sandbox_id}: {e}");
        }

        let namespaces = &self.namespaces;
        let netns_path = sandbox.netns_path();
        if let Err(e) = self
            .retry(sandbox_id, "release network", move || {
                namespaces.teardown(sandbox_id, netns_path)
            })
            .await
        {
            error!("sandbox {sandbox_id} is kept until its network is released: {e}");
            let mut failed = sandbox.clone();
            failed.mark_not_ready();
            if let Err(e) = self.write_back(&failed).await {
                warn!("failed to update sandbox {sandbox_id}: {e}");
            }
            return;
        }

        if let Err(e) = self.tasks.remove_container(sandbox_id).await {
            warn!("failed to delete container of sandbox {sandbox_id}: {e}");
        }
        let _ = self.store.lock().await.remove(sandbox_id);
    }

    async fn remove_stale_namespace(
        namespaces: &NamespaceManager,
        sandbox: &Sandbox,
    ) {
        let sandbox_id = sandbox.id();
        let netns_path = sandbox.netns_path();
        match namespaces.remove_stale(netns_path).await {
            Ok(true) => info!(
                "removed stale network namespace {} of sandbox {sandbox_id}",
                netns_path.display()
            ),
            Ok(false) => {}
            Err(e) => warn!(
                "failed to remove stale network namespace of sandbox {sandbox_id}: {e}"
            ),
        }
    }
}
