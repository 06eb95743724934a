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

use super::{Result, Sandbox, SandboxError, SandboxState};
use crate::network::{NamespaceManager, NetworkError};
use crate::task::{TaskAdapter, TaskInfo};
use tracing::{info, trace};

/// What the OS and the runtime currently say about a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedFacts {
    /// [None] when the runtime no longer has a task for the sandbox.
    pub task: Option<TaskInfo>,
    pub netns_open: bool,
}

impl ObservedFacts {
    fn task_running(&self) -> bool {
        self.task.map_or(false, |task| task.is_running())
    }
}

/// Returns the record corrected by the observed facts.
///
/// A ready sandbox whose task is not running, or whose namespace is no
/// longer open, becomes not ready. A not ready sandbox is never promoted.
pub fn reconcile(sandbox: &Sandbox, facts: &ObservedFacts) -> Sandbox {
    let mut reconciled = sandbox.clone();

    if let Some(task) = facts.task.filter(TaskInfo::is_running) {
        reconciled.set_pid(task.pid);
    }

    if sandbox.state() == SandboxState::Ready
        && !(facts.task_running() && facts.netns_open)
    {
        reconciled.mark_not_ready();
    }

    reconciled
}

/// Gathers [ObservedFacts] and applies [reconcile] to stored records.
#[derive(Debug, Clone)]
pub(crate) struct Reconciler {
    namespaces: NamespaceManager,
    tasks: TaskAdapter,
}

impl Reconciler {
    pub fn new(namespaces: NamespaceManager, tasks: TaskAdapter) -> Self {
        Self { namespaces, tasks }
    }

    pub async fn observe(&self, sandbox: &Sandbox) -> Result<ObservedFacts> {
        let sandbox_id = sandbox.id();
        let task = self.tasks.load(sandbox_id).await.map_err(|source| {
            SandboxError::FailedToLoadTask {
                sandbox_id: sandbox_id.clone(),
                source,
            }
        })?;
        let netns_open = self
            .namespaces
            .is_open(sandbox.netns_path())
            .await
            .map_err(|e| SandboxError::FailedToProbeNetwork {
                sandbox_id: sandbox_id.clone(),
                source: NetworkError::from(e),
            })?;

        let facts = ObservedFacts { task, netns_open };
        trace!("sandbox {sandbox_id} observed {facts:?}");
        Ok(facts)
    }

    /// Observes and corrects `sandbox` in place.
    pub async fn refresh(
        &self,
        sandbox: &mut Sandbox,
    ) -> Result<ObservedFacts> {
        let facts = self.observe(sandbox).await?;
        let reconciled = reconcile(sandbox, &facts);
        if reconciled.state() != sandbox.state() {
            info!(
                "sandbox {} is no longer ready (task running: {}, namespace open: {})",
                sandbox.id(),
                facts.task_running(),
                facts.netns_open
            );
        }
        *sandbox = reconciled;
        Ok(facts)
    }
}
