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

//! Sandbox records, their lifecycle and the reconciliation of stored state
//! against what the OS and the runtime report.

pub use controller::SandboxController;
pub use error::{ErrorKind, Result, SandboxError};
pub use oci::{network_namespace_path, SandboxSpecBuilder};
pub use reconciler::{reconcile, ObservedFacts};
pub use sandbox::{Sandbox, SandboxConfig, SandboxState};
pub use sandbox_id::{InvalidSandboxId, SandboxId};
pub use status::{
    PodSandboxNetworkStatus, PodSandboxStatus, SandboxFilter, SandboxInfo,
    INFO_KEY,
};

mod controller;
mod error;
mod keyed_mutex;
mod oci;
mod reconciler;
#[allow(clippy::module_inception)]
mod sandbox;
mod sandbox_id;
mod sandbox_store;
mod status;
