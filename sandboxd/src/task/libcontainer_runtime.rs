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
    error::{Result, RuntimeError},
    runtime::{ContainerRecord, Labels, TaskInfo, TaskRuntime, TaskStatus},
};
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use libcontainer::container::{
    builder::ContainerBuilder, Container, ContainerStatus,
};
use libcontainer::syscall::syscall::create_syscall;
use oci_spec::runtime::Spec;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{info, trace, warn};

const CONFIG_FILE: &str = "config.json";
const LABELS_FILE: &str = "labels.json";

/// [TaskRuntime] backed by youki's `libcontainer`.
///
/// Containers are OCI bundles under `bundle_dir/<id>` (`config.json` plus
/// `labels.json`). Task state lives under `root_dir/<id>` and is owned by
/// libcontainer.
#[derive(Debug, Clone)]
pub struct LibcontainerRuntime {
    root_dir: PathBuf,
    bundle_dir: PathBuf,
}

impl LibcontainerRuntime {
    pub fn new(root_dir: PathBuf, bundle_dir: PathBuf) -> Self {
        Self { root_dir, bundle_dir }
    }

    fn bundle_path(&self, id: &SandboxId) -> PathBuf {
        self.bundle_dir.join(id.as_str())
    }

    fn state_path(&self, id: &SandboxId) -> PathBuf {
        self.root_dir.join(id.as_str())
    }

    async fn load_container(&self, id: &SandboxId) -> Result<Container> {
        let state_path = self.state_path(id);
        if !state_path.exists() {
            return Err(RuntimeError::TaskNotFound { id: id.clone() });
        }

        let task_id = id.clone();
        tokio::task::spawn_blocking(move || {
            let mut container = Container::load(state_path).map_err(
                |source| RuntimeError::Runtime { id: task_id.clone(), source },
            )?;
            container.refresh_status().map_err(|source| {
                RuntimeError::Runtime { id: task_id, source }
            })?;
            Ok(container)
        })
        .await?
    }
}

#[async_trait]
impl TaskRuntime for LibcontainerRuntime {
    async fn create_container(
        &self,
        id: &SandboxId,
        spec: &Spec,
        labels: &Labels,
    ) -> Result<()> {
        let bundle = self.bundle_path(id);
        if bundle.exists() {
            return Err(RuntimeError::ContainerExists { id: id.clone() });
        }

        tokio::fs::create_dir_all(&bundle).await.map_err(|source| {
            RuntimeError::Io { path: bundle.clone(), source }
        })?;

        write_json(&bundle.join(CONFIG_FILE), spec).await?;
        write_json(&bundle.join(LABELS_FILE), labels).await?;

        trace!("wrote bundle for container {id} to {}", bundle.display());
        Ok(())
    }

    async fn start_task(&self, id: &SandboxId) -> Result<u32> {
        let root_dir = self.root_dir.clone();
        let bundle = self.bundle_path(id);
        let task_id = id.clone();

        let pid = tokio::task::spawn_blocking(move || {
            let runtime_err =
                |source| RuntimeError::Runtime { id: task_id.clone(), source };

            let mut container = ContainerBuilder::new(
                task_id.to_string(),
                create_syscall().as_ref(),
            )
            .with_root_path(root_dir)
            .map_err(runtime_err)?
            .as_init(bundle)
            .with_systemd(false) // defaults to true
            .build()
            .map_err(runtime_err)?;

            container.start().map_err(runtime_err)?;

            Ok::<_, RuntimeError>(
                container
                    .pid()
                    .map(|pid| pid.as_raw() as u32)
                    .unwrap_or_default(),
            )
        })
        .await??;

        info!("task for container {id} started with pid {pid}");
        Ok(pid)
    }

    async fn load_task(&self, id: &SandboxId) -> Result<TaskInfo> {
        let container = self.load_container(id).await?;

        let status = match container.status() {
            ContainerStatus::Creating | ContainerStatus::Created => {
                TaskStatus::Created
            }
            ContainerStatus::Running => TaskStatus::Running,
            ContainerStatus::Paused => TaskStatus::Paused,
            ContainerStatus::Stopped => TaskStatus::Stopped,
        };

        let pid = container
            .pid()
            .map(|pid| pid.as_raw() as u32)
            .unwrap_or_default();

        Ok(TaskInfo { pid, status })
    }

    async fn delete_task(
        &self,
        id: &SandboxId,
        force_kill: bool,
    ) -> Result<()> {
        let mut container = self.load_container(id).await?;

        let task_id = id.clone();
        tokio::task::spawn_blocking(move || {
            container
                .delete(force_kill)
                .map_err(|source| RuntimeError::Runtime { id: task_id, source })
        })
        .await??;

        info!("task for container {id} deleted");
        Ok(())
    }

    async fn update_labels(
        &self,
        id: &SandboxId,
        labels: &Labels,
    ) -> Result<()> {
        let bundle = self.bundle_path(id);
        if !bundle.exists() {
            return Err(RuntimeError::ContainerNotFound { id: id.clone() });
        }

        write_json(&bundle.join(LABELS_FILE), labels).await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let io_err = |source| RuntimeError::Io {
            path: self.bundle_dir.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&self.bundle_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err(e)),
        };

        let mut containers = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name();
            let Ok(id) = name.to_string_lossy().parse::<SandboxId>() else {
                warn!("ignoring unknown bundle {}", entry.path().display());
                continue;
            };

            let bundle = entry.path();
            let spec: Spec = match read_json(&bundle.join(CONFIG_FILE)).await {
                Ok(spec) => spec,
                Err(e) => {
                    // a crash between mkdir and the first write
                    warn!("skipping container {id} with unreadable bundle: {e}");
                    continue;
                }
            };
            let labels: Labels = match read_json(&bundle.join(LABELS_FILE)).await
            {
                Ok(labels) => labels,
                Err(RuntimeError::Io { source, .. })
                    if source.kind() == ErrorKind::NotFound =>
                {
                    Labels::new()
                }
                Err(e) => return Err(e),
            };

            containers.push(ContainerRecord { id, spec, labels });
        }

        Ok(containers)
    }

    async fn delete_container(&self, id: &SandboxId) -> Result<()> {
        let bundle = self.bundle_path(id);
        match tokio::fs::remove_dir_all(&bundle).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RuntimeError::ContainerNotFound { id: id.clone() })
            }
            Err(source) => {
                return Err(RuntimeError::Io { path: bundle, source })
            }
        }

        // leftovers of a task that was never deleted through libcontainer
        let state_path = self.state_path(id);
        match tokio::fs::remove_dir_all(&state_path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!("failed to remove task state {}: {e}", state_path.display())
            }
            _ => {}
        }

        info!("container {id} deleted");
        Ok(())
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| {
        RuntimeError::Serde { path: path.to_path_buf(), source }
    })?;

    // write then rename, so a crash never leaves a torn file behind
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| RuntimeError::Io { path: tmp.clone(), source })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| RuntimeError::Io { path: path.to_path_buf(), source })
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path).await.map_err(|source| {
        RuntimeError::Io { path: path.to_path_buf(), source }
    })?;
    serde_json::from_slice(&bytes).map_err(|source| RuntimeError::Serde {
        path: path.to_path_buf(),
        source,
    })
}
