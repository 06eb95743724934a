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

use crate::sandbox::SandboxId;
use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("task '{id}' not found")]
    TaskNotFound { id: SandboxId },
    #[error("container '{id}' not found")]
    ContainerNotFound { id: SandboxId },
    #[error("container '{id}' already exists")]
    ContainerExists { id: SandboxId },
    #[error("runtime failed for container '{id}': {source}")]
    Runtime { id: SandboxId, source: anyhow::Error },
    #[error("failed to access '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode or decode '{path}': {source}")]
    Serde { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl RuntimeError {
    /// True when the task (or the whole container) is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::TaskNotFound { .. }
                | RuntimeError::ContainerNotFound { .. }
        )
    }
}
