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

use super::{Result, Sandbox, SandboxError, SandboxId};
use std::collections::HashMap;

/// In-memory index of every sandbox the daemon knows about.
#[derive(Debug, Default)]
pub(crate) struct SandboxStore {
    cache: HashMap<SandboxId, Sandbox>,
}

impl SandboxStore {
    pub fn add(&mut self, sandbox: Sandbox) -> Result<()> {
        if self.cache.contains_key(sandbox.id()) {
            return Err(SandboxError::SandboxExists {
                sandbox_id: sandbox.id().clone(),
            });
        }
        let _ = self.cache.insert(sandbox.id().clone(), sandbox);
        Ok(())
    }

    pub fn get(&self, sandbox_id: &SandboxId) -> Result<&Sandbox> {
        let Some(sandbox) = self.cache.get(sandbox_id) else {
            return Err(SandboxError::SandboxNotFound {
                sandbox_id: sandbox_id.clone(),
            });
        };
        Ok(sandbox)
    }

    pub fn get_mut(&mut self, sandbox_id: &SandboxId) -> Result<&mut Sandbox> {
        let Some(sandbox) = self.cache.get_mut(sandbox_id) else {
            return Err(SandboxError::SandboxNotFound {
                sandbox_id: sandbox_id.clone(),
            });
        };
        Ok(sandbox)
    }

    /// Sandboxes ordered by creation time, oldest first.
    pub fn list(&self) -> Vec<&Sandbox> {
        let mut sandboxes: Vec<&Sandbox> = self.cache.values().collect();
        sandboxes.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().as_str().cmp(b.id().as_str()))
        });
        sandboxes
    }

    pub fn remove(&mut self, sandbox_id: &SandboxId) -> Result<Sandbox> {
        self.cache.remove(sandbox_id).ok_or_else(|| {
            SandboxError::SandboxNotFound { sandbox_id: sandbox_id.clone() }
        })
    }
}
