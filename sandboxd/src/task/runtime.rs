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

use super::error::Result;
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use oci_spec::runtime::Spec;
use std::{collections::BTreeMap, fmt::Debug};

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Stopped,
}

/// What the runtime knows about a loaded task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub pid: u32,
    pub status: TaskStatus,
}

impl TaskInfo {
    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskStatus::Running | TaskStatus::Paused)
    }
}

/// A durable container as listed by the runtime. It outlives its task.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: SandboxId,
    pub spec: Spec,
    pub labels: Labels,
}

/// The low-level container runtime.
///
/// A *container* is the durable description (runtime spec and labels) of a
/// sandbox, and survives restarts of this process. Its *task* is the running
/// process, which may disappear at any time.
#[async_trait]
pub trait TaskRuntime: Send + Sync + Debug {
    async fn create_container(
        &self,
        id: &SandboxId,
        spec: &Spec,
        labels: &Labels,
    ) -> Result<()>;

    /// Starts the container's task and returns its pid.
    async fn start_task(&self, id: &SandboxId) -> Result<u32>;

    /// # Errors
    /// * If the task no longer exists -> [RuntimeError::TaskNotFound](super::RuntimeError::TaskNotFound)
    async fn load_task(&self, id: &SandboxId) -> Result<TaskInfo>;

    /// Deletes the task, killing it first when `force_kill` is set.
    ///
    /// # Errors
    /// * If the task no longer exists -> [RuntimeError::TaskNotFound](super::RuntimeError::TaskNotFound)
    async fn delete_task(&self, id: &SandboxId, force_kill: bool) -> Result<()>;

    /// Replaces the labels of a container.
    async fn update_labels(&self, id: &SandboxId, labels: &Labels)
        -> Result<()>;

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// # Errors
    /// * If the container no longer exists -> [RuntimeError::ContainerNotFound](super::RuntimeError::ContainerNotFound)
    async fn delete_container(&self, id: &SandboxId) -> Result<()>;
}
