//! # XLXC
//!
//! Provisioning of Linux XIA containers and the bridge networks that
//! connect them.
//!
//! ## Features
//!
//! - **Batches**: create, reset or delete containers `NAME{first..=last}`
//! - **Filesystems**: read-only bind mounts of the host's system
//!   directories plus a writable copy of the staged configuration
//! - **Topologies**: star (one bridge per container) and connected (one
//!   shared bridge) networks with conflict-free address blocks
//! - **No registry**: every run re-derives state from the host
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use xlxc::host::SystemHost;
//! use xlxc::runtime::{LifecycleController, RuntimeConfig};
//! use xlxc::topology::TopologyKind;
//!
//! # async fn example() -> xlxc_common::XlxcResult<()> {
//! let config = RuntimeConfig::default();
//! let host = Arc::new(SystemHost::new(config.paths.clone()));
//! let mut controller = LifecycleController::new(host, config);
//!
//! controller.preflight("xlxc-net", false).await?;
//! let (topology, report) = controller
//!     .build_topology("test", 3, TopologyKind::Star, "eth0")
//!     .await?;
//! assert_eq!(topology.bridges().len(), 3);
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod filesystem;
pub mod host;
pub mod lxcconf;
pub mod resolver;
pub mod runtime;
pub mod topology;

pub use runtime::{LifecycleController, RuntimeConfig};
pub use topology::{Topology, TopologyBuilder, TopologyKind};
