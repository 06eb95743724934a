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

use super::SandboxId;
use crate::{network::NetworkError, task::RuntimeError};
use oci_spec::OciSpecError;
use std::path::PathBuf;
use thiserror::Error;
use tonic::Status;
use tracing::error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// How a [SandboxError] should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A precondition on the sandbox state was not met. Not retried.
    InvalidState,
    /// The sandbox id is unknown.
    NotFound,
    /// The environment failed (disk, subprocess, kernel). Safe to retry.
    ResourceError,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox '{sandbox_id}' already exists")]
    SandboxExists { sandbox_id: SandboxId },
    #[error("sandbox '{sandbox_id}' not found")]
    SandboxNotFound { sandbox_id: SandboxId },
    #[error("invalid sandbox config: {reason}")]
    InvalidConfig { reason: String },
    #[error("sandbox '{sandbox_id}' is still ready, it must be stopped before removal")]
    SandboxReady { sandbox_id: SandboxId },
    #[error("sandbox '{sandbox_id}' network has not been torn down, it must be stopped before removal")]
    NetworkNotReleased { sandbox_id: SandboxId },
    #[error("sandbox '{sandbox_id}' network namespace '{netns_path}' is not closed")]
    NetworkNamespaceOpen { sandbox_id: SandboxId, netns_path: PathBuf },
    #[error("sandbox '{sandbox_id}' has invalid metadata: {reason}")]
    InvalidMetadata { sandbox_id: SandboxId, reason: String },
    #[error("failed to set up network for sandbox '{sandbox_id}': {source}")]
    FailedToSetupNetwork { sandbox_id: SandboxId, source: NetworkError },
    #[error("failed to tear down network of sandbox '{sandbox_id}': {source}")]
    FailedToTeardownNetwork { sandbox_id: SandboxId, source: NetworkError },
    #[error("failed to probe network namespace of sandbox '{sandbox_id}': {source}")]
    FailedToProbeNetwork { sandbox_id: SandboxId, source: NetworkError },
    #[error("failed to build runtime spec for sandbox '{sandbox_id}': {source}")]
    FailedToBuildSpec { sandbox_id: SandboxId, source: OciSpecError },
    #[error("failed to start task of sandbox '{sandbox_id}': {source}")]
    FailedToStartTask { sandbox_id: SandboxId, source: RuntimeError },
    #[error("failed to load task of sandbox '{sandbox_id}': {source}")]
    FailedToLoadTask { sandbox_id: SandboxId, source: RuntimeError },
    #[error("failed to delete task of sandbox '{sandbox_id}': {source}")]
    FailedToDeleteTask { sandbox_id: SandboxId, source: RuntimeError },
    #[error("failed to persist sandbox '{sandbox_id}': {source}")]
    FailedToPersist { sandbox_id: SandboxId, source: RuntimeError },
    #[error("failed to delete container of sandbox '{sandbox_id}': {source}")]
    FailedToDeleteContainer { sandbox_id: SandboxId, source: RuntimeError },
    #[error("failed to encode info of sandbox '{sandbox_id}': {source}")]
    FailedToEncodeInfo { sandbox_id: SandboxId, source: serde_json::Error },
    #[error("failed to list sandboxes from the runtime: {source}")]
    FailedToListContainers { source: RuntimeError },
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::SandboxExists { .. }
            | SandboxError::InvalidConfig { .. }
            | SandboxError::SandboxReady { .. }
            | SandboxError::NetworkNotReleased { .. }
            | SandboxError::NetworkNamespaceOpen { .. } => {
                ErrorKind::InvalidState
            }
            SandboxError::SandboxNotFound { .. } => ErrorKind::NotFound,
            SandboxError::InvalidMetadata { .. }
            | SandboxError::FailedToSetupNetwork { .. }
            | SandboxError::FailedToTeardownNetwork { .. }
            | SandboxError::FailedToProbeNetwork { .. }
            | SandboxError::FailedToBuildSpec { .. }
            | SandboxError::FailedToStartTask { .. }
            | SandboxError::FailedToLoadTask { .. }
            | SandboxError::FailedToDeleteTask { .. }
            | SandboxError::FailedToPersist { .. }
            | SandboxError::FailedToDeleteContainer { .. }
            | SandboxError::FailedToEncodeInfo { .. }
            | SandboxError::FailedToListContainers { .. } => {
                ErrorKind::ResourceError
            }
        }
    }
}

impl From<SandboxError> for Status {
    fn from(err: SandboxError) -> Self {
        let msg = err.to_string();
        error!("{msg}");
        match err {
            SandboxError::SandboxExists { .. } => Status::already_exists(msg),
            SandboxError::InvalidConfig { .. } => {
                Status::invalid_argument(msg)
            }
            e => match e.kind() {
                ErrorKind::InvalidState => Status::failed_precondition(msg),
                ErrorKind::NotFound => Status::not_found(msg),
                ErrorKind::ResourceError => Status::internal(msg),
            },
        }
    }
}
