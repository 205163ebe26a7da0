//! Runtime configuration.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnetwork::Ipv4Network;
use xlxc_common::XlxcPaths;

fn block(addr: Ipv4Addr, prefix: u8) -> Ipv4Network {
    // Prefixes passed here are at most 32
    Ipv4Network::new(addr, prefix).unwrap_or_else(|_| Ipv4Network::from(addr))
}

/// Runtime configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Container root and interface listing.
    pub paths: XlxcPaths,
    /// Staging directory copied into every container as `/etc`.
    pub local_etc: PathBuf,
    /// Host-wide configuration snapshotted into the staging directory.
    pub shared_config: PathBuf,
    /// Where persisted launcher credentials live, one file per container.
    pub credential_dir: PathBuf,
    /// User given a home directory in every container.
    pub home_user: String,
    /// Substring the kernel release must contain (empty disables the check).
    pub kernel_marker: String,
    /// Pool network address blocks are drawn from.
    pub address_pool: Ipv4Network,
    /// Addressing for containers created outside a network.
    pub standalone_block: Ipv4Network,
    /// Tool that destroys a single container (`TOOL -n NAME`).
    pub lifecycle_tool: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            paths: XlxcPaths::new(),
            local_etc: PathBuf::from("./etc"),
            shared_config: PathBuf::from("/etc/xia"),
            credential_dir: PathBuf::from("/etc/xia/hid/prv"),
            home_user: "ubuntu".to_string(),
            kernel_marker: "xia".to_string(),
            address_pool: block(Ipv4Addr::new(10, 0, 0, 0), 8),
            standalone_block: block(Ipv4Addr::new(192, 168, 0, 0), 16),
            lifecycle_tool: "lxc-destroy".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Set the container root.
    #[must_use]
    pub fn with_lxc(mut self, lxc: impl Into<PathBuf>) -> Self {
        self.paths = self.paths.with_lxc(lxc);
        self
    }

    /// Set all paths.
    #[must_use]
    pub fn with_paths(mut self, paths: XlxcPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Set the staging directory.
    #[must_use]
    pub fn with_local_etc(mut self, local_etc: impl Into<PathBuf>) -> Self {
        self.local_etc = local_etc.into();
        self
    }

    /// Set the shared configuration directory.
    #[must_use]
    pub fn with_shared_config(mut self, shared_config: impl Into<PathBuf>) -> Self {
        self.shared_config = shared_config.into();
        self
    }

    /// Set the credential directory.
    #[must_use]
    pub fn with_credential_dir(mut self, credential_dir: impl Into<PathBuf>) -> Self {
        self.credential_dir = credential_dir.into();
        self
    }

    /// Set the home directory user.
    #[must_use]
    pub fn with_home_user(mut self, home_user: impl Into<String>) -> Self {
        self.home_user = home_user.into();
        self
    }

    /// Set the required kernel marker.
    #[must_use]
    pub fn with_kernel_marker(mut self, kernel_marker: impl Into<String>) -> Self {
        self.kernel_marker = kernel_marker.into();
        self
    }

    /// Set the address pool.
    #[must_use]
    pub fn with_address_pool(mut self, address_pool: Ipv4Network) -> Self {
        self.address_pool = address_pool;
        self
    }

    /// Set the standalone container addressing.
    #[must_use]
    pub fn with_standalone_block(mut self, standalone_block: Ipv4Network) -> Self {
        self.standalone_block = standalone_block;
        self
    }

    /// Set the container destroy tool.
    #[must_use]
    pub fn with_lifecycle_tool(mut self, lifecycle_tool: impl Into<String>) -> Self {
        self.lifecycle_tool = lifecycle_tool.into();
        self
    }
}
