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

use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("failed to create network namespace '{path}': {source}")]
    FailedToCreate { path: PathBuf, source: io::Error },
    #[error("failed to probe network namespace '{path}': {source}")]
    FailedToProbe { path: PathBuf, source: io::Error },
    #[error("failed to remove network namespace '{path}': {source}")]
    FailedToRemove { path: PathBuf, source: io::Error },
    #[error(transparent)]
    TaskJoinError(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no network configuration found in '{dir}'")]
    NoNetworkConfig { dir: PathBuf },
    #[error("failed to read network configuration '{path}': {source}")]
    FailedToReadConfig { path: PathBuf, source: io::Error },
    #[error("invalid network configuration '{path}': {source}")]
    InvalidConfig { path: PathBuf, source: serde_json::Error },
    #[error("network configuration '{path}' does not list any plugins")]
    EmptyPluginList { path: PathBuf },
    #[error("failed to execute plugin '{plugin}': {source}")]
    FailedToExecute { plugin: String, source: io::Error },
    #[error("plugin '{plugin}' failed with code {code}: {msg}")]
    PluginFailed { plugin: String, code: u32, msg: String },
    #[error("plugin '{plugin}' returned an unparsable result: {source}")]
    InvalidResult { plugin: String, source: serde_json::Error },
    #[error("plugin '{plugin}' did not return an ip address")]
    NoAddress { plugin: String },
}
