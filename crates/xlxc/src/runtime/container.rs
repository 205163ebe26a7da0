//! The single-container path: create, reset and destroy one container.

use ipnetwork::Ipv4Network;
use xlxc_common::id::connected_bridge;
use xlxc_common::{ContainerName, HostOps, HwAddress, XlxcError, XlxcResult};
use xlxc_network::BridgeManager;

use super::RuntimeConfig;
use crate::filesystem::RootfsAssembler;
use crate::lxcconf::{self, ContainerFiles};

/// A network bridge a container joins instead of getting its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Bridge the container links to.
    pub bridge: String,
    /// Address block of the bridge.
    pub block: Ipv4Network,
}

/// Provisions individual containers.
pub struct ContainerBuilder<'a> {
    host: &'a dyn HostOps,
    config: &'a RuntimeConfig,
}

impl<'a> ContainerBuilder<'a> {
    /// Provision on `host` with `config`.
    #[must_use]
    pub fn new(host: &'a dyn HostOps, config: &'a RuntimeConfig) -> Self {
        Self { host, config }
    }

    fn assembler(&self) -> RootfsAssembler<'a> {
        RootfsAssembler::new(self.host, &self.config.local_etc, &self.config.home_user)
    }

    /// Create a container.
    ///
    /// Without an attachment the container gets its own bridge and is
    /// addressed from the standalone block. With one, it links to the
    /// attachment's existing bridge. A launcher script is written when
    /// `script` is set.
    pub async fn create(
        &self,
        name: &ContainerName,
        attachment: Option<&Attachment>,
        script: bool,
    ) -> XlxcResult<()> {
        let full_name = name.full_name();
        let paths = &self.config.paths;
        let (bridge, block) = match attachment {
            Some(a) => (a.bridge.clone(), a.block),
            None => (name.own_bridge(), self.config.standalone_block),
        };

        // Rendering can fail on addressing, so do it before touching the host
        let files = ContainerFiles::render(paths, name, &bridge, block)?;

        tracing::info!(container = %full_name, bridge = %bridge, "Creating container");

        self.assembler()
            .assemble(&paths.container_rootfs(&full_name))
            .await?;

        if attachment.is_none() {
            BridgeManager::new(self.host)
                .create(&bridge, name.hw_address())
                .await?;
        }

        files.write(self.host, paths, name).await?;

        if script {
            lxcconf::write_launcher(self.host, paths, name, &self.config.credential_dir).await?;
        }

        tracing::info!(container = %full_name, "Container created");
        Ok(())
    }

    /// Restore the bridge and read-only mounts of an existing container.
    ///
    /// The bridge is the one the container's runtime descriptor links to.
    /// Bridges that already exist and targets already mounted are left
    /// alone, so repeating a reset changes nothing.
    pub async fn reset(&self, name: &ContainerName) -> XlxcResult<()> {
        let full_name = name.full_name();
        let paths = &self.config.paths;

        let bridge = match self.host.read_file(&paths.container_config(&full_name)).await {
            Ok(config) => lxcconf::descriptor_link(&config),
            Err(e) => {
                tracing::warn!(container = %full_name, error = %e, "Cannot read runtime descriptor");
                None
            }
        }
        .unwrap_or_else(|| name.own_bridge());

        // A shared bridge carries the address of index 0
        let hw_address = if bridge == connected_bridge(name.base()) {
            HwAddress::for_index(0)
        } else {
            name.hw_address()
        };

        tracing::info!(container = %full_name, bridge = %bridge, "Resetting container");

        let bridges = BridgeManager::new(self.host);
        if bridges.exists(&bridge).await? {
            tracing::debug!(bridge = %bridge, "Bridge already present");
        } else {
            bridges.create(&bridge, hw_address).await?;
        }

        self.assembler()
            .mount_system_dirs(&paths.container_rootfs(&full_name))
            .await
    }

    /// Unmount a container's shared directories and destroy it with the
    /// lifecycle tool.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::MissingContainer`] if there is nothing to
    /// destroy.
    pub async fn destroy(&self, name: &ContainerName) -> XlxcResult<()> {
        let full_name = name.full_name();
        if !self.host.list_containers().await?.contains(&full_name) {
            return Err(XlxcError::MissingContainer { name: full_name });
        }

        tracing::info!(container = %full_name, "Destroying container");

        self.assembler()
            .unmount_system_dirs(&self.config.paths.container_rootfs(&full_name))
            .await?;
        self.host
            .run_tool(&self.config.lifecycle_tool, &["-n", &full_name])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlxc_common::{MemoryHost, XlxcPaths};

    fn setup() -> (MemoryHost, RuntimeConfig) {
        let paths = XlxcPaths::new().with_lxc("/var/lib/lxc");
        let config = RuntimeConfig::default()
            .with_paths(paths.clone())
            .with_local_etc("/opt/xlxc/etc");
        let host = MemoryHost::new(paths).with_dir("/opt/xlxc/etc");
        (host, config)
    }

    #[tokio::test]
    async fn standalone_create_gets_own_bridge() {
        let (host, config) = setup();
        let builder = ContainerBuilder::new(&host, &config);
        builder
            .create(&ContainerName::new("a", 2), None, false)
            .await
            .unwrap();

        let bridge = host.bridge("a2br").unwrap();
        assert_eq!(bridge.hw_address, Some(HwAddress::for_index(2)));
        assert!(bridge.addresses.is_empty());

        let interfaces = host
            .file("/var/lib/lxc/a2/rootfs/etc/network/interfaces")
            .unwrap();
        assert!(interfaces.contains("address 192.168.0.3\n"));
        assert!(host.file("/var/lib/lxc/a2/rootfs/run.sh").is_none());
    }

    #[tokio::test]
    async fn attached_create_reuses_bridge() {
        let (host, config) = setup();
        let builder = ContainerBuilder::new(&host, &config);
        let attachment = Attachment {
            bridge: "netbr".to_string(),
            block: "10.0.0.0/29".parse().unwrap(),
        };
        builder
            .create(&ContainerName::new("net", 1), Some(&attachment), true)
            .await
            .unwrap();

        assert!(host.bridge("net1br").is_none());
        let config_file = host.file("/var/lib/lxc/net1/config").unwrap();
        assert!(config_file.contains("lxc.network.link=netbr\n"));
        assert_eq!(host.file_mode("/var/lib/lxc/net1/rootfs/run.sh"), Some(0o755));
    }

    #[tokio::test]
    async fn launcher_skips_provisioning_with_credential() {
        let (host, config) = setup();
        let host = host.with_file("/etc/xia/hid/prv/a0", "key");
        ContainerBuilder::new(&host, &config)
            .create(&ContainerName::new("a", 0), None, true)
            .await
            .unwrap();
        let script = host.file("/var/lib/lxc/a0/rootfs/run.sh").unwrap();
        assert!(!script.contains("hid new"));
    }

    #[tokio::test]
    async fn reset_follows_the_descriptor() {
        let (host, config) = setup();
        let builder = ContainerBuilder::new(&host, &config);
        let attachment = Attachment {
            bridge: "netbr".to_string(),
            block: "10.0.0.0/29".parse().unwrap(),
        };
        let name = ContainerName::new("net", 1);
        builder.create(&name, Some(&attachment), false).await.unwrap();
        for dir in xlxc_common::paths::SYSTEM_DIRS.iter().rev() {
            let target = format!("/var/lib/lxc/net1/rootfs{dir}");
            host.unmount(std::path::Path::new(&target)).await.unwrap();
        }

        builder.reset(&name).await.unwrap();
        let bridge = host.bridge("netbr").unwrap();
        assert_eq!(bridge.hw_address, Some(HwAddress::for_index(0)));
        assert_eq!(host.mounts().len(), xlxc_common::paths::SYSTEM_DIRS.len());
    }

    #[tokio::test]
    async fn destroy_missing_is_advisory() {
        let (host, config) = setup();
        let err = ContainerBuilder::new(&host, &config)
            .destroy(&ContainerName::new("ghost", 0))
            .await
            .unwrap_err();
        assert!(err.is_advisory());
        assert!(host.mutations().is_empty());
    }
}
