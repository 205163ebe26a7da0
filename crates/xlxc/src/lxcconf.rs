//! Container configuration files.
//!
//! Rendering is pure: every file is a function of the container's name,
//! its bridge and its address block. Writing only touches the
//! container's own directory.

use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use xlxc_common::{ContainerName, HostOps, PathKind, XlxcPaths, XlxcResult};
use xlxc_network::{container_address, gateway_address};

/// Settings shared by every container's runtime descriptor.
pub const LXC_CONFIG_TEMPLATE: &str = "\
lxc.network.type=veth
lxc.network.flags=up
lxc.tty=4
lxc.pts=1024
lxc.cap.drop=sys_module mac_admin mac_override
lxc.cgroup.devices.deny=a
# /dev/null and zero
lxc.cgroup.devices.allow=c 1:3 rwm
lxc.cgroup.devices.allow=c 1:5 rwm
# consoles
lxc.cgroup.devices.allow=c 5:1 rwm
lxc.cgroup.devices.allow=c 5:0 rwm
lxc.cgroup.devices.allow=c 4:0 rwm
lxc.cgroup.devices.allow=c 4:1 rwm
# /dev/{,u}random
lxc.cgroup.devices.allow=c 1:9 rwm
lxc.cgroup.devices.allow=c 1:8 rwm
lxc.cgroup.devices.allow=c 136:* rwm
lxc.cgroup.devices.allow=c 5:2 rwm
# rtc
lxc.cgroup.devices.allow=c 254:0 rwm
";

/// Filesystems the container runtime mounts at start.
pub const FSTAB_TEMPLATE: &str = "\
proc            proc         proc    nodev,noexec,nosuid 0 0
sysfs           sys          sysfs   defaults  0 0
devpts          dev/pts      devpts  defaults  0 0
";

/// Runtime descriptor key naming the bridge the container links to.
const LINK_KEY: &str = "lxc.network.link";

/// Paths of a container's network identity files inside its rootfs.
const INTERFACES_FILE: &str = "etc/network/interfaces";
const HOSTS_FILE: &str = "etc/hosts";
const HOSTNAME_FILE: &str = "etc/hostname";

/// Launcher script path inside the rootfs.
const LAUNCHER_FILE: &str = "run.sh";

/// Rendered configuration for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFiles {
    /// Runtime descriptor.
    pub config: String,
    /// Mount table.
    pub fstab: String,
    /// Network interfaces (static, no DHCP).
    pub interfaces: String,
    /// Hosts file.
    pub hosts: String,
    /// Hostname file.
    pub hostname: String,
}

impl ContainerFiles {
    /// Render the files for `name` linked to `bridge`, addressed within
    /// `block`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container's index does not fit in `block`.
    pub fn render(
        paths: &XlxcPaths,
        name: &ContainerName,
        bridge: &str,
        block: Ipv4Network,
    ) -> XlxcResult<Self> {
        let full_name = name.full_name();
        let address = container_address(block, name.index())?;
        let gateway = gateway_address(block)?;

        let config = format!(
            "{LXC_CONFIG_TEMPLATE}{LINK_KEY}={bridge}\n\
             lxc.network.veth.pair={veth}\n\
             lxc.rootfs={rootfs}\n\
             lxc.utsname={full_name}\n\
             lxc.mount={fstab}\n",
            veth = name.veth_pair(),
            rootfs = paths.container_rootfs(&full_name).display(),
            fstab = paths.container_fstab(&full_name).display(),
        );

        let interfaces = format!(
            "auto lo\n\
             iface lo inet loopback\n\
             \n\
             auto eth0\n\
             iface eth0 inet static\n\
             \taddress {ip}\n\
             \tnetmask {mask}\n\
             \tgateway {gw}\n",
            ip = address.ip(),
            mask = block.mask(),
            gw = gateway.ip(),
        );

        let hosts = format!(
            "127.0.0.1   localhost\n\
             127.0.1.1   {full_name}\n\
             \n\
             ::1     ip6-localhost ip6-loopback\n\
             fe00::0 ip6-localnet\n\
             ff00::0 ip6-mcastprefix\n\
             ff02::1 ip6-allnodes\n\
             ff02::2 ip6-allrouters\n"
        );

        Ok(Self {
            config,
            fstab: FSTAB_TEMPLATE.to_string(),
            interfaces,
            hosts,
            hostname: format!("{full_name}\n"),
        })
    }

    /// Write the files into the container's directory and rootfs.
    pub async fn write(
        &self,
        host: &dyn HostOps,
        paths: &XlxcPaths,
        name: &ContainerName,
    ) -> XlxcResult<()> {
        let full_name = name.full_name();
        let rootfs = paths.container_rootfs(&full_name);

        let files: [(PathBuf, &str); 5] = [
            (paths.container_config(&full_name), &self.config),
            (paths.container_fstab(&full_name), &self.fstab),
            (rootfs.join(INTERFACES_FILE), &self.interfaces),
            (rootfs.join(HOSTS_FILE), &self.hosts),
            (rootfs.join(HOSTNAME_FILE), &self.hostname),
        ];

        for (path, contents) in files {
            if let Some(parent) = path.parent() {
                host.create_dir_all(parent).await?;
            }
            host.write_file(&path, contents, 0o644).await?;
        }

        tracing::debug!(container = %full_name, "Wrote container configuration");
        Ok(())
    }
}

/// Bridge named by a runtime descriptor's link entry.
#[must_use]
pub fn descriptor_link(config: &str) -> Option<String> {
    config
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == LINK_KEY)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Launcher that provisions a host identifier when none was persisted,
/// registers it, then keeps the container running.
#[must_use]
pub fn launcher_script(full_name: &str, has_credential: bool) -> String {
    let mut script = String::from("# Add HID for this container.\n");
    if !has_credential {
        script.push_str(&format!("sudo xip hid new {full_name}\n"));
    }
    script.push_str(&format!("sudo xip hid add {full_name}\n"));
    script.push_str("# Keep container running.\ncat\n");
    script
}

/// Write the launcher script into the container's rootfs.
pub async fn write_launcher(
    host: &dyn HostOps,
    paths: &XlxcPaths,
    name: &ContainerName,
    credential_dir: &Path,
) -> XlxcResult<PathBuf> {
    let full_name = name.full_name();
    let has_credential = host.path_kind(&credential_dir.join(&full_name)).await == PathKind::File;
    let script = paths.container_rootfs(&full_name).join(LAUNCHER_FILE);

    host.write_file(&script, &launcher_script(&full_name, has_credential), 0o755)
        .await?;

    tracing::debug!(container = %full_name, has_credential, "Wrote launcher script");
    Ok(script)
}
