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
    error::Result, ContainerRecord, Labels, TaskInfo, TaskRuntime,
};
use crate::sandbox::SandboxId;
use oci_spec::runtime::Spec;
use std::sync::Arc;
use tracing::{info, warn};

/// Sandbox-shaped view over a [TaskRuntime].
///
/// "Already gone" is folded into success wherever the caller only cares
/// that the task (or container) does not exist afterwards.
#[derive(Debug, Clone)]
pub struct TaskAdapter {
    runtime: Arc<dyn TaskRuntime>,
}

impl TaskAdapter {
    pub fn new(runtime: Arc<dyn TaskRuntime>) -> Self {
        Self { runtime }
    }

    /// Persists the container so it survives a restart of this process.
    /// No task is started.
    pub async fn persist(
        &self,
        id: &SandboxId,
        spec: &Spec,
        labels: &Labels,
    ) -> Result<()> {
        self.runtime.create_container(id, spec, labels).await
    }

    /// Starts the placeholder task of a persisted container.
    ///
    /// On failure the task is deleted again, the container is left to the
    /// caller.
    pub async fn start_pause(&self, id: &SandboxId) -> Result<u32> {
        match self.runtime.start_task(id).await {
            Ok(pid) => Ok(pid),
            Err(e) => {
                if let Err(e) = self.force_delete(id).await {
                    warn!("failed to delete task of container {id}: {e}");
                }
                Err(e)
            }
        }
    }

    /// Returns [None] when the task no longer exists.
    pub async fn load(&self, id: &SandboxId) -> Result<Option<TaskInfo>> {
        match self.runtime.load_task(id).await {
            Ok(task) => Ok(Some(task)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Kills and deletes the task. A task that is already gone (for
    /// example killed and reaped by someone else) counts as deleted.
    pub async fn force_delete(&self, id: &SandboxId) -> Result<()> {
        match self.runtime.delete_task(id, true).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("task of sandbox {id} is already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_labels(
        &self,
        id: &SandboxId,
        labels: &Labels,
    ) -> Result<()> {
        self.runtime.update_labels(id, labels).await
    }

    pub async fn list(&self) -> Result<Vec<ContainerRecord>> {
        self.runtime.list_containers().await
    }

    /// Deletes the durable container. Missing containers are ignored.
    pub async fn remove_container(&self, id: &SandboxId) -> Result<()> {
        match self.runtime.delete_container(id).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }
}
