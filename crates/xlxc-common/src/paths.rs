//! Standard filesystem paths for XLXC.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default directory holding one subdirectory per container.
pub static LXC_PATH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("XLXC_LXC_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/lxc"))
});

/// Default sysfs directory listing network interfaces.
pub static SYSFS_NET: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("XLXC_SYSFS_NET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/sys/class/net"))
});

/// Host directories shared read-only into every container, in mount order.
pub const SYSTEM_DIRS: &[&str] = &["/bin", "/lib", "/lib64", "/sbin", "/usr"];

/// Standard paths used when provisioning containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XlxcPaths {
    /// Container root (default: /var/lib/lxc).
    pub lxc: PathBuf,
    /// Interface listing (default: /sys/class/net).
    pub sysfs_net: PathBuf,
}

impl XlxcPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom container root.
    #[must_use]
    pub fn with_lxc(mut self, lxc: impl Into<PathBuf>) -> Self {
        self.lxc = lxc.into();
        self
    }

    /// Create paths with a custom interface listing.
    #[must_use]
    pub fn with_sysfs_net(mut self, sysfs_net: impl Into<PathBuf>) -> Self {
        self.sysfs_net = sysfs_net.into();
        self
    }

    /// Directory for a specific container.
    #[must_use]
    pub fn container(&self, name: &str) -> PathBuf {
        self.lxc.join(name)
    }

    /// Container rootfs directory.
    #[must_use]
    pub fn container_rootfs(&self, name: &str) -> PathBuf {
        self.container(name).join("rootfs")
    }

    /// Container runtime descriptor.
    #[must_use]
    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container(name).join("config")
    }

    /// Container mount table.
    #[must_use]
    pub fn container_fstab(&self, name: &str) -> PathBuf {
        self.container(name).join("fstab")
    }
}

impl Default for XlxcPaths {
    fn default() -> Self {
        Self {
            lxc: LXC_PATH.clone(),
            sysfs_net: SYSFS_NET.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_paths() {
        let paths = XlxcPaths::new().with_lxc("/tmp/lxc");
        assert_eq!(paths.container("test0"), PathBuf::from("/tmp/lxc/test0"));
        assert_eq!(
            paths.container_rootfs("test0"),
            PathBuf::from("/tmp/lxc/test0/rootfs")
        );
        assert_eq!(
            paths.container_config("test0"),
            PathBuf::from("/tmp/lxc/test0/config")
        );
        assert_eq!(
            paths.container_fstab("test0"),
            PathBuf::from("/tmp/lxc/test0/fstab")
        );
    }

    #[test]
    fn custom_sysfs() {
        let paths = XlxcPaths::new().with_sysfs_net("/tmp/net");
        assert_eq!(paths.sysfs_net, PathBuf::from("/tmp/net"));
    }
}
