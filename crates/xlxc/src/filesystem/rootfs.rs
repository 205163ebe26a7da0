//! Root filesystem assembly.
//!
//! A container rootfs is mostly empty. The host's system directories are
//! bind mounted into it read-only and shared, not copied, and a staged
//! copy of the local configuration provides a writable `/etc`.

use std::path::{Path, PathBuf};

use xlxc_common::paths::SYSTEM_DIRS;
use xlxc_common::{HostOps, PathKind, XlxcError, XlxcResult};

/// Mount point the container runtime mounts devpts on at start.
const DEV_PTS: &str = "dev/pts";

/// Directories that start empty.
const EMPTY_DIRS: &[&str] = &["proc", "sys", "root"];

/// Join an absolute host path below `rootfs`.
fn under(rootfs: &Path, path: &str) -> PathBuf {
    rootfs.join(path.trim_start_matches('/'))
}

/// Builds container root filesystems on a host.
pub struct RootfsAssembler<'a> {
    host: &'a dyn HostOps,
    local_etc: &'a Path,
    home_user: &'a str,
}

impl<'a> RootfsAssembler<'a> {
    /// Assemble with `local_etc` as the writable configuration source and
    /// `home_user` as the single home directory.
    #[must_use]
    pub fn new(host: &'a dyn HostOps, local_etc: &'a Path, home_user: &'a str) -> Self {
        Self {
            host,
            local_etc,
            home_user,
        }
    }

    /// Build the root filesystem at `rootfs`.
    ///
    /// Steps run in order and stop at the first failure, which leaves a
    /// partially assembled tree that must not be used.
    pub async fn assemble(&self, rootfs: &Path) -> XlxcResult<()> {
        tracing::debug!(rootfs = %rootfs.display(), "Assembling root filesystem");

        self.host.create_dir_all(rootfs).await?;
        self.mount_system_dirs(rootfs).await?;

        // Only pts needs to exist in dev to start
        self.host.create_dir_all(&rootfs.join(DEV_PTS)).await?;

        self.host
            .copy_dir(self.local_etc, &rootfs.join("etc"))
            .await?;

        for dir in EMPTY_DIRS {
            self.host.create_dir_all(&rootfs.join(dir)).await?;
        }
        self.host
            .create_dir_all(&rootfs.join("home").join(self.home_user))
            .await?;

        self.host
            .chroot_exec(rootfs, &["passwd", "-d", "root"])
            .await?;

        tracing::debug!(rootfs = %rootfs.display(), "Root filesystem assembled");
        Ok(())
    }

    /// Bind mount the host system directories read-only into `rootfs`.
    ///
    /// Targets already mounted are left alone, so this can be repeated
    /// after a reboot. Host directories that do not exist are skipped.
    pub async fn mount_system_dirs(&self, rootfs: &Path) -> XlxcResult<()> {
        for dir in SYSTEM_DIRS {
            let source = Path::new(dir);
            let target = under(rootfs, dir);

            match self.host.path_kind(source).await {
                PathKind::Missing => {
                    tracing::warn!(source = %source.display(), "Host directory missing, not mounting");
                    continue;
                }
                PathKind::Dir => self.host.create_dir_all(&target).await?,
                PathKind::File => self.host.touch(&target).await?,
            }

            if self.host.is_mounted(&target).await? {
                tracing::debug!(target = %target.display(), "Already mounted");
                continue;
            }

            self.host
                .bind_mount(source, &target, true)
                .await
                .map_err(|e| match e {
                    XlxcError::MountFailure { .. } => e,
                    other => XlxcError::MountFailure {
                        source_path: source.display().to_string(),
                        target: target.display().to_string(),
                        reason: other.to_string(),
                    },
                })?;
        }
        Ok(())
    }

    /// Unmount the system directories from `rootfs`, in reverse order.
    pub async fn unmount_system_dirs(&self, rootfs: &Path) -> XlxcResult<()> {
        for dir in SYSTEM_DIRS.iter().rev() {
            let target = under(rootfs, dir);
            if self.host.is_mounted(&target).await? {
                self.host.unmount(&target).await?;
            }
        }
        Ok(())
    }

    /// Snapshot the host's shared configuration into the staging area.
    ///
    /// Returns the staged path, to be passed to [`Self::unstage`] once the
    /// batch is done.
    pub async fn stage(&self, shared: &Path) -> XlxcResult<Option<PathBuf>> {
        let Some(name) = shared.file_name() else {
            return Err(XlxcError::Config {
                message: format!("shared configuration {} has no name", shared.display()),
            });
        };

        self.host.create_dir_all(self.local_etc).await?;
        if self.host.path_kind(shared).await != PathKind::Dir {
            tracing::warn!(shared = %shared.display(), "Shared configuration missing, not staging");
            return Ok(None);
        }

        let staged = self.local_etc.join(name);
        self.host.copy_dir(shared, &staged).await?;
        tracing::debug!(staged = %staged.display(), "Staged shared configuration");
        Ok(Some(staged))
    }

    /// Remove a staged snapshot.
    pub async fn unstage(&self, staged: Option<PathBuf>) {
        if let Some(staged) = staged {
            if let Err(e) = self.host.remove_dir_all(&staged).await {
                tracing::warn!(staged = %staged.display(), error = %e, "Failed to remove staged configuration");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlxc_common::{MemoryHost, XlxcPaths};

    fn host() -> MemoryHost {
        MemoryHost::new(XlxcPaths::new().with_lxc("/var/lib/lxc"))
            .with_file("/opt/xlxc/etc/resolv.conf", "nameserver 10.0.0.1\n")
    }

    #[tokio::test]
    async fn assemble_mounts_then_populates() {
        let host = host();
        let assembler = RootfsAssembler::new(&host, Path::new("/opt/xlxc/etc"), "ubuntu");
        let rootfs = Path::new("/var/lib/lxc/test0/rootfs");
        assembler.assemble(rootfs).await.unwrap();

        let mounts = host.mounts();
        assert_eq!(mounts.len(), SYSTEM_DIRS.len());
        assert!(mounts.iter().all(|m| m.readonly));
        assert_eq!(mounts[0].target, PathBuf::from("/var/lib/lxc/test0/rootfs/bin"));

        for dir in ["dev/pts", "proc", "sys", "root", "home/ubuntu"] {
            assert!(host.has_dir(rootfs.join(dir)), "{dir} missing");
        }
        assert_eq!(
            host.file(rootfs.join("etc/resolv.conf")).as_deref(),
            Some("nameserver 10.0.0.1\n")
        );

        let mutations = host.mutations();
        let last_mount = mutations
            .iter()
            .rposition(|m| m.starts_with("bind_mount"))
            .unwrap();
        let copy = mutations
            .iter()
            .position(|m| m.starts_with("copy_dir"))
            .unwrap();
        assert!(last_mount < copy);
        assert_eq!(
            mutations.last().unwrap(),
            "chroot_exec /var/lib/lxc/test0/rootfs passwd -d root"
        );
    }

    #[tokio::test]
    async fn mount_failure_stops_assembly() {
        let host = host();
        host.fail_on("bind_mount", "/lib ");
        let assembler = RootfsAssembler::new(&host, Path::new("/opt/xlxc/etc"), "ubuntu");
        let err = assembler
            .assemble(Path::new("/var/lib/lxc/test0/rootfs"))
            .await
            .unwrap_err();
        assert!(matches!(err, XlxcError::MountFailure { .. }));
        assert!(!host.mutations().iter().any(|m| m.starts_with("copy_dir")));
    }

    #[tokio::test]
    async fn remounting_is_idempotent() {
        let host = host();
        let assembler = RootfsAssembler::new(&host, Path::new("/opt/xlxc/etc"), "ubuntu");
        let rootfs = Path::new("/var/lib/lxc/test0/rootfs");
        assembler.mount_system_dirs(rootfs).await.unwrap();
        assembler.mount_system_dirs(rootfs).await.unwrap();
        assert_eq!(host.mounts().len(), SYSTEM_DIRS.len());

        assembler.unmount_system_dirs(rootfs).await.unwrap();
        assert!(host.mounts().is_empty());
    }

    #[tokio::test]
    async fn staging_round_trip() {
        let host = host().with_file("/etc/xia/hid/prv/a0", "key");
        let assembler = RootfsAssembler::new(&host, Path::new("/opt/xlxc/etc"), "ubuntu");
        let staged = assembler.stage(Path::new("/etc/xia")).await.unwrap();
        assert_eq!(staged, Some(PathBuf::from("/opt/xlxc/etc/xia")));
        assert!(host.file("/opt/xlxc/etc/xia/hid/prv/a0").is_some());

        assembler.unstage(staged).await;
        assert!(!host.has_dir("/opt/xlxc/etc/xia"));
        assert!(host.has_dir("/opt/xlxc/etc"));
    }
}
