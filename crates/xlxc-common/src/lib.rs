//! # xlxc-common
//!
//! Shared utilities and types for provisioning XIA containers.
//!
//! This crate provides functionality used across all XLXC crates:
//! - Deterministic container, bridge and veth naming
//! - Standard filesystem paths
//! - The [`HostOps`] capability every component mutates the host through
//! - An in-memory host for dry runs and tests
//! - Running external tools
//! - Common error types

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod host;
pub mod id;
pub mod memory;
pub mod paths;

pub use error::{XlxcError, XlxcResult};
pub use host::{HostOps, PathKind};
pub use id::{ContainerName, HwAddress};
pub use memory::MemoryHost;
pub use paths::XlxcPaths;
