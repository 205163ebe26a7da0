//! The host capability every component provisions through.
//!
//! Nothing in XLXC keeps a registry of what it created. Containers,
//! bridges and address blocks are rediscovered by querying the host on
//! every invocation, which is only sound while a single orchestrator
//! process runs at a time. Two concurrent invocations can both observe a
//! name or block as free before either claims it.

use std::path::Path;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;

use crate::error::XlxcResult;
use crate::id::HwAddress;

/// What a path on the host refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// A directory.
    Dir,
    /// Anything that is not a directory.
    File,
    /// Nothing exists at the path.
    Missing,
}

/// Primitive host operations.
///
/// Each call either succeeds or fails. Callers never assume a call is
/// transactional: a failure leaves whatever partial state the primitive
/// produced.
#[async_trait]
pub trait HostOps: Send + Sync {
    /// Effective user id of the invoking process.
    async fn effective_uid(&self) -> u32;

    /// Release string of the running kernel.
    async fn kernel_release(&self) -> XlxcResult<String>;

    /// Names of all containers under the container root.
    async fn list_containers(&self) -> XlxcResult<Vec<String>>;

    /// Names of all bridge devices.
    async fn list_bridges(&self) -> XlxcResult<Vec<String>>;

    /// Names of all network interfaces, bridges included.
    async fn list_interfaces(&self) -> XlxcResult<Vec<String>>;

    /// Address blocks currently held by live bridges.
    async fn bridge_blocks(&self) -> XlxcResult<Vec<(String, Ipv4Network)>>;

    /// What exists at `path`.
    async fn path_kind(&self, path: &Path) -> PathKind;

    /// Whether something is mounted on `path`.
    async fn is_mounted(&self, path: &Path) -> XlxcResult<bool>;

    /// Read a text file.
    async fn read_file(&self, path: &Path) -> XlxcResult<String>;

    /// Create a bridge device.
    async fn create_bridge(&self, name: &str) -> XlxcResult<()>;

    /// Delete a bridge device.
    async fn delete_bridge(&self, name: &str) -> XlxcResult<()>;

    /// Set a bridge's hardware address.
    async fn set_hw_address(&self, name: &str, address: HwAddress) -> XlxcResult<()>;

    /// Put a bridge in promiscuous mode and bring it up.
    async fn set_promisc_up(&self, name: &str) -> XlxcResult<()>;

    /// Assign `address` (host address plus prefix) to a bridge.
    async fn add_bridge_address(&self, name: &str, address: Ipv4Network) -> XlxcResult<()>;

    /// Forward and masquerade traffic from `block` on `bridge` out of `iface`.
    async fn attach_uplink(&self, bridge: &str, iface: &str, block: Ipv4Network)
    -> XlxcResult<()>;

    /// Remove every forwarding rule previously attached for `bridge`.
    async fn detach_uplink(&self, bridge: &str) -> XlxcResult<()>;

    /// Create a directory and its parents.
    async fn create_dir_all(&self, path: &Path) -> XlxcResult<()>;

    /// Create an empty file if it does not exist.
    async fn touch(&self, path: &Path) -> XlxcResult<()>;

    /// Write a file, replacing any previous contents.
    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> XlxcResult<()>;

    /// Recursively copy the contents of `src` into `dst`.
    async fn copy_dir(&self, src: &Path, dst: &Path) -> XlxcResult<()>;

    /// Recursively remove a directory.
    async fn remove_dir_all(&self, path: &Path) -> XlxcResult<()>;

    /// Recursively bind mount `src` on `dst`, optionally read-only.
    async fn bind_mount(&self, src: &Path, dst: &Path, readonly: bool) -> XlxcResult<()>;

    /// Unmount whatever is mounted on `path`.
    async fn unmount(&self, path: &Path) -> XlxcResult<()>;

    /// Run a command with `root` as its root directory.
    async fn chroot_exec(&self, root: &Path, argv: &[&str]) -> XlxcResult<()>;

    /// Run an external tool to completion.
    async fn run_tool(&self, program: &str, args: &[&str]) -> XlxcResult<()>;
}
