//! The real host.
//!
//! [`SystemHost`] carries out [`HostOps`] on the running machine: mounts
//! through rustix, bridges and forwarding rules through `ip` and
//! `iptables`, and everything else through `tokio::fs` and external
//! commands.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use xlxc_common::{HostOps, HwAddress, PathKind, XlxcPaths, XlxcResult, command};
use xlxc_network::iproute;

use crate::filesystem::mounts;

/// Host operations backed by the running system.
#[derive(Debug, Clone)]
pub struct SystemHost {
    paths: XlxcPaths,
}

impl SystemHost {
    /// Operate on containers and interfaces found under `paths`.
    #[must_use]
    pub fn new(paths: XlxcPaths) -> Self {
        Self { paths }
    }

    /// The paths this host reads.
    #[must_use]
    pub const fn paths(&self) -> &XlxcPaths {
        &self.paths
    }
}

#[async_trait]
impl HostOps for SystemHost {
    async fn effective_uid(&self) -> u32 {
        rustix::process::geteuid().as_raw()
    }

    async fn kernel_release(&self) -> XlxcResult<String> {
        let uname = rustix::system::uname();
        Ok(uname.release().to_string_lossy().into_owned())
    }

    async fn list_containers(&self) -> XlxcResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.paths.lxc).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_bridges(&self) -> XlxcResult<Vec<String>> {
        Ok(iproute::sysfs_links(&self.paths.sysfs_net)?
            .into_iter()
            .filter(|(_, is_bridge)| *is_bridge)
            .map(|(name, _)| name)
            .collect())
    }

    async fn list_interfaces(&self) -> XlxcResult<Vec<String>> {
        Ok(iproute::sysfs_links(&self.paths.sysfs_net)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn bridge_blocks(&self) -> XlxcResult<Vec<(String, Ipv4Network)>> {
        let mut blocks = Vec::new();
        for bridge in self.list_bridges().await? {
            for addr in iproute::addr_show(&bridge).await? {
                let block = Ipv4Network::new(addr.network(), addr.prefix()).unwrap_or(addr);
                blocks.push((bridge.clone(), block));
            }
        }
        Ok(blocks)
    }

    async fn path_kind(&self, path: &Path) -> PathKind {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => PathKind::Dir,
            Ok(_) => PathKind::File,
            Err(_) => PathKind::Missing,
        }
    }

    async fn is_mounted(&self, path: &Path) -> XlxcResult<bool> {
        mounts::is_mounted(path)
    }

    async fn read_file(&self, path: &Path) -> XlxcResult<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn create_bridge(&self, name: &str) -> XlxcResult<()> {
        iproute::link_add_bridge(name).await
    }

    async fn delete_bridge(&self, name: &str) -> XlxcResult<()> {
        iproute::link_delete(name).await
    }

    async fn set_hw_address(&self, name: &str, address: HwAddress) -> XlxcResult<()> {
        iproute::link_set_address(name, address).await
    }

    async fn set_promisc_up(&self, name: &str) -> XlxcResult<()> {
        iproute::link_set_promisc_up(name).await
    }

    async fn add_bridge_address(&self, name: &str, address: Ipv4Network) -> XlxcResult<()> {
        iproute::addr_add(name, address).await
    }

    async fn attach_uplink(
        &self,
        bridge: &str,
        iface: &str,
        block: Ipv4Network,
    ) -> XlxcResult<()> {
        iproute::uplink_add(bridge, iface, block).await
    }

    async fn detach_uplink(&self, bridge: &str) -> XlxcResult<()> {
        iproute::uplink_remove(bridge).await
    }

    async fn create_dir_all(&self, path: &Path) -> XlxcResult<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn touch(&self, path: &Path) -> XlxcResult<()> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> XlxcResult<()> {
        tokio::fs::write(path, contents).await?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn copy_dir(&self, src: &Path, dst: &Path) -> XlxcResult<()> {
        tokio::fs::create_dir_all(dst).await?;
        // Trailing "/." copies the contents rather than the directory itself
        let contents = src.join(".");
        let contents = contents.to_string_lossy();
        let dst = dst.to_string_lossy();
        command::run("cp", &["-a", &contents, &dst]).await?;
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> XlxcResult<()> {
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }

    async fn bind_mount(&self, src: &Path, dst: &Path, readonly: bool) -> XlxcResult<()> {
        mounts::bind_mount(src, dst, readonly)
    }

    async fn unmount(&self, path: &Path) -> XlxcResult<()> {
        mounts::unmount(path)
    }

    async fn chroot_exec(&self, root: &Path, argv: &[&str]) -> XlxcResult<()> {
        let root = root.to_string_lossy();
        let mut args = vec![&*root];
        args.extend_from_slice(argv);
        command::run("chroot", &args).await?;
        Ok(())
    }

    async fn run_tool(&self, program: &str, args: &[&str]) -> XlxcResult<()> {
        command::run(program, args).await?;
        Ok(())
    }
}
