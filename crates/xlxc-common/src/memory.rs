//! In-memory host.
//!
//! [`MemoryHost`] models bridges, addresses, files, mounts and containers
//! without touching the machine. It records every mutating call so
//! callers can inspect exactly what a run would have done, and it can be
//! told to fail selected calls.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use parking_lot::Mutex;

use crate::error::{XlxcError, XlxcResult};
use crate::host::{HostOps, PathKind};
use crate::id::HwAddress;
use crate::paths::{SYSTEM_DIRS, XlxcPaths};

/// State of a bridge held by the in-memory host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBridge {
    /// Hardware address, once set.
    pub hw_address: Option<HwAddress>,
    /// Promiscuous and up.
    pub up: bool,
    /// Assigned addresses.
    pub addresses: Vec<Ipv4Network>,
    /// Uplink interface, once attached.
    pub uplink: Option<String>,
}

/// A mount recorded by the in-memory host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMount {
    /// Mounted path.
    pub source: PathBuf,
    /// Mount point.
    pub target: PathBuf,
    /// Read-only flag.
    pub readonly: bool,
}

/// Comparable view of everything the host holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    /// Bridges by name.
    pub bridges: BTreeMap<String, MemoryBridge>,
    /// Directories.
    pub dirs: BTreeSet<PathBuf>,
    /// Files and their contents.
    pub files: BTreeMap<PathBuf, String>,
    /// Active mounts in mount order.
    pub mounts: Vec<MemoryMount>,
}

#[derive(Debug)]
struct State {
    uid: u32,
    kernel: String,
    interfaces: BTreeSet<String>,
    bridges: BTreeMap<String, MemoryBridge>,
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, (String, u32)>,
    mounts: Vec<MemoryMount>,
    mutations: Vec<String>,
    failures: Vec<(String, String)>,
}

/// A host that lives entirely in memory.
#[derive(Debug)]
pub struct MemoryHost {
    paths: XlxcPaths,
    destroy_tool: String,
    state: Mutex<State>,
}

impl MemoryHost {
    /// Create a host running as root on an XIA kernel, with the shared
    /// system directories and the container root present.
    #[must_use]
    pub fn new(paths: XlxcPaths) -> Self {
        let host = Self {
            paths,
            destroy_tool: "lxc-destroy".to_string(),
            state: Mutex::new(State {
                uid: 0,
                kernel: "3.9.0-xia".to_string(),
                interfaces: BTreeSet::from(["lo".to_string()]),
                bridges: BTreeMap::new(),
                dirs: BTreeSet::new(),
                files: BTreeMap::new(),
                mounts: Vec::new(),
                mutations: Vec::new(),
                failures: Vec::new(),
            }),
        };
        {
            let mut state = host.state.lock();
            insert_dir(&mut state.dirs, &host.paths.lxc);
            for dir in SYSTEM_DIRS {
                insert_dir(&mut state.dirs, Path::new(dir));
            }
        }
        host
    }

    /// Set the effective user id.
    #[must_use]
    pub fn with_uid(self, uid: u32) -> Self {
        self.state.lock().uid = uid;
        self
    }

    /// Set the kernel release.
    #[must_use]
    pub fn with_kernel(self, release: &str) -> Self {
        self.state.lock().kernel = release.to_string();
        self
    }

    /// Add a plain (non-bridge) interface.
    #[must_use]
    pub fn with_interface(self, name: &str) -> Self {
        self.state.lock().interfaces.insert(name.to_string());
        self
    }

    /// Add a live bridge holding `address`.
    #[must_use]
    pub fn with_bridge(self, name: &str, address: Option<Ipv4Network>) -> Self {
        let bridge = MemoryBridge {
            up: true,
            addresses: address.into_iter().collect(),
            ..MemoryBridge::default()
        };
        self.state.lock().bridges.insert(name.to_string(), bridge);
        self
    }

    /// Add a directory and its parents.
    #[must_use]
    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        insert_dir(&mut self.state.lock().dirs, path.as_ref());
        self
    }

    /// Add a file, creating its parent directories.
    #[must_use]
    pub fn with_file(self, path: impl AsRef<Path>, contents: &str) -> Self {
        {
            let mut state = self.state.lock();
            let path = path.as_ref();
            if let Some(parent) = path.parent() {
                insert_dir(&mut state.dirs, parent);
            }
            state
                .files
                .insert(path.to_path_buf(), (contents.to_string(), 0o644));
        }
        self
    }

    /// Add an existing container directory with an empty rootfs.
    #[must_use]
    pub fn with_container(self, name: &str) -> Self {
        let rootfs = self.paths.container_rootfs(name);
        self.with_dir(rootfs)
    }

    /// Use `tool` as the program that destroys containers.
    #[must_use]
    pub fn with_destroy_tool(mut self, tool: &str) -> Self {
        self.destroy_tool = tool.to_string();
        self
    }

    /// Make every mutation whose record starts with `operation` and
    /// contains `needle` fail.
    pub fn fail_on(&self, operation: &str, needle: &str) {
        self.state
            .lock()
            .failures
            .push((operation.to_string(), needle.to_string()));
    }

    /// Mutations performed so far, in order.
    #[must_use]
    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().mutations.clone()
    }

    /// Bridge state by name.
    #[must_use]
    pub fn bridge(&self, name: &str) -> Option<MemoryBridge> {
        self.state.lock().bridges.get(name).cloned()
    }

    /// Contents of a file.
    #[must_use]
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state
            .lock()
            .files
            .get(path.as_ref())
            .map(|(contents, _)| contents.clone())
    }

    /// Mode of a file.
    #[must_use]
    pub fn file_mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.state.lock().files.get(path.as_ref()).map(|(_, mode)| *mode)
    }

    /// Whether a directory exists.
    #[must_use]
    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().dirs.contains(path.as_ref())
    }

    /// Active mounts in mount order.
    #[must_use]
    pub fn mounts(&self) -> Vec<MemoryMount> {
        self.state.lock().mounts.clone()
    }

    /// Everything the host currently holds.
    #[must_use]
    pub fn snapshot(&self) -> HostSnapshot {
        let state = self.state.lock();
        HostSnapshot {
            bridges: state.bridges.clone(),
            dirs: state.dirs.clone(),
            files: state
                .files
                .iter()
                .map(|(path, (contents, _))| (path.clone(), contents.clone()))
                .collect(),
            mounts: state.mounts.clone(),
        }
    }

    /// Record a mutation, failing it if a matching failure was injected.
    fn record(&self, state: &mut State, entry: String) -> XlxcResult<()> {
        tracing::debug!(mutation = %entry, "memory host");
        let injected = state
            .failures
            .iter()
            .any(|(op, needle)| entry.starts_with(op.as_str()) && entry.contains(needle.as_str()));
        state.mutations.push(entry.clone());
        if injected {
            return Err(XlxcError::host(entry, "injected failure"));
        }
        Ok(())
    }
}

fn insert_dir(dirs: &mut BTreeSet<PathBuf>, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> XlxcError {
    XlxcError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    ))
}

fn require_parent(state: &State, path: &Path) -> XlxcResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !state.dirs.contains(parent) => {
            Err(not_found(parent))
        }
        _ => Ok(()),
    }
}

fn require_bridge<'a>(state: &'a mut State, name: &str) -> XlxcResult<&'a mut MemoryBridge> {
    state
        .bridges
        .get_mut(name)
        .ok_or_else(|| XlxcError::host("link", format!("Cannot find device \"{name}\"")))
}

#[async_trait]
impl HostOps for MemoryHost {
    async fn effective_uid(&self) -> u32 {
        self.state.lock().uid
    }

    async fn kernel_release(&self) -> XlxcResult<String> {
        Ok(self.state.lock().kernel.clone())
    }

    async fn list_containers(&self) -> XlxcResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .dirs
            .iter()
            .filter(|dir| dir.parent() == Some(self.paths.lxc.as_path()))
            .filter_map(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    async fn list_bridges(&self) -> XlxcResult<Vec<String>> {
        Ok(self.state.lock().bridges.keys().cloned().collect())
    }

    async fn list_interfaces(&self) -> XlxcResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .interfaces
            .iter()
            .chain(state.bridges.keys())
            .cloned()
            .collect())
    }

    async fn bridge_blocks(&self) -> XlxcResult<Vec<(String, Ipv4Network)>> {
        let state = self.state.lock();
        Ok(state
            .bridges
            .iter()
            .flat_map(|(name, bridge)| {
                bridge.addresses.iter().map(move |addr| {
                    let block = Ipv4Network::new(addr.network(), addr.prefix())
                        .unwrap_or(*addr);
                    (name.clone(), block)
                })
            })
            .collect())
    }

    async fn path_kind(&self, path: &Path) -> PathKind {
        let state = self.state.lock();
        if state.dirs.contains(path) {
            PathKind::Dir
        } else if state.files.contains_key(path) {
            PathKind::File
        } else {
            PathKind::Missing
        }
    }

    async fn is_mounted(&self, path: &Path) -> XlxcResult<bool> {
        Ok(self.state.lock().mounts.iter().any(|m| m.target == path))
    }

    async fn read_file(&self, path: &Path) -> XlxcResult<String> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|(contents, _)| contents.clone())
            .ok_or_else(|| not_found(path))
    }

    async fn create_bridge(&self, name: &str) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("create_bridge {name}"))?;
        if state.bridges.contains_key(name) || state.interfaces.contains(name) {
            return Err(XlxcError::host("create_bridge", format!("{name}: File exists")));
        }
        state.bridges.insert(name.to_string(), MemoryBridge::default());
        Ok(())
    }

    async fn delete_bridge(&self, name: &str) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("delete_bridge {name}"))?;
        state
            .bridges
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| XlxcError::host("delete_bridge", format!("Cannot find device \"{name}\"")))
    }

    async fn set_hw_address(&self, name: &str, address: HwAddress) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("set_hw_address {name} {address}"))?;
        require_bridge(&mut state, name)?.hw_address = Some(address);
        Ok(())
    }

    async fn set_promisc_up(&self, name: &str) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("set_promisc_up {name}"))?;
        require_bridge(&mut state, name)?.up = true;
        Ok(())
    }

    async fn add_bridge_address(&self, name: &str, address: Ipv4Network) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("add_bridge_address {name} {address}"))?;
        let bridge = require_bridge(&mut state, name)?;
        if bridge.addresses.contains(&address) {
            return Err(XlxcError::host("add_bridge_address", "File exists"));
        }
        bridge.addresses.push(address);
        Ok(())
    }

    async fn attach_uplink(
        &self,
        bridge: &str,
        iface: &str,
        block: Ipv4Network,
    ) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("attach_uplink {bridge} {iface} {block}"))?;
        if !state.interfaces.contains(iface) && !state.bridges.contains_key(iface) {
            return Err(XlxcError::host(
                "attach_uplink",
                format!("no such interface {iface}"),
            ));
        }
        require_bridge(&mut state, bridge)?.uplink = Some(iface.to_string());
        Ok(())
    }

    async fn detach_uplink(&self, bridge: &str) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("detach_uplink {bridge}"))?;
        if let Some(b) = state.bridges.get_mut(bridge) {
            b.uplink = None;
        }
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("create_dir_all {}", path.display()))?;
        if state.files.contains_key(path) {
            return Err(XlxcError::host(
                "create_dir_all",
                format!("{} is a file", path.display()),
            ));
        }
        insert_dir(&mut state.dirs, path);
        Ok(())
    }

    async fn touch(&self, path: &Path) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("touch {}", path.display()))?;
        require_parent(&state, path)?;
        if !state.dirs.contains(path) {
            state
                .files
                .entry(path.to_path_buf())
                .or_insert_with(|| (String::new(), 0o644));
        }
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("write_file {} {mode:o}", path.display()))?;
        require_parent(&state, path)?;
        state
            .files
            .insert(path.to_path_buf(), (contents.to_string(), mode));
        Ok(())
    }

    async fn copy_dir(&self, src: &Path, dst: &Path) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            format!("copy_dir {} -> {}", src.display(), dst.display()),
        )?;
        if !state.dirs.contains(src) {
            return Err(not_found(src));
        }
        let rebase = |path: &Path| path.strip_prefix(src).ok().map(|rel| dst.join(rel));
        let dirs: Vec<PathBuf> = state.dirs.iter().filter_map(|d| rebase(d)).collect();
        let files: Vec<(PathBuf, (String, u32))> = state
            .files
            .iter()
            .filter_map(|(path, entry)| rebase(path).map(|p| (p, entry.clone())))
            .collect();
        insert_dir(&mut state.dirs, dst);
        for dir in dirs {
            insert_dir(&mut state.dirs, &dir);
        }
        state.files.extend(files);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("remove_dir_all {}", path.display()))?;
        if let Some(busy) = state.mounts.iter().find(|m| m.target.starts_with(path)) {
            return Err(XlxcError::host(
                "remove_dir_all",
                format!("{}: Device or resource busy", busy.target.display()),
            ));
        }
        state.dirs.retain(|d| !d.starts_with(path));
        state.files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    async fn bind_mount(&self, src: &Path, dst: &Path, readonly: bool) -> XlxcResult<()> {
        let mut state = self.state.lock();
        let flag = if readonly { "ro" } else { "rw" };
        self.record(
            &mut state,
            format!("bind_mount {} -> {} {flag}", src.display(), dst.display()),
        )?;
        let exists = |p: &Path| state.dirs.contains(p) || state.files.contains_key(p);
        if !exists(src) {
            return Err(not_found(src));
        }
        if !exists(dst) {
            return Err(not_found(dst));
        }
        state.mounts.push(MemoryMount {
            source: src.to_path_buf(),
            target: dst.to_path_buf(),
            readonly,
        });
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("unmount {}", path.display()))?;
        let position = state
            .mounts
            .iter()
            .rposition(|m| m.target == path)
            .ok_or_else(|| XlxcError::host("unmount", format!("{}: not mounted", path.display())))?;
        state.mounts.remove(position);
        Ok(())
    }

    async fn chroot_exec(&self, root: &Path, argv: &[&str]) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            format!("chroot_exec {} {}", root.display(), argv.join(" ")),
        )?;
        if !state.dirs.contains(root) {
            return Err(not_found(root));
        }
        Ok(())
    }

    async fn run_tool(&self, program: &str, args: &[&str]) -> XlxcResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("run_tool {program} {}", args.join(" ")))?;
        if program != self.destroy_tool {
            return Ok(());
        }
        let Some(name) = args
            .iter()
            .position(|a| *a == "-n")
            .and_then(|i| args.get(i + 1))
        else {
            return Err(XlxcError::host(program, "missing -n NAME"));
        };
        let dir = self.paths.container(name);
        if !state.dirs.contains(&dir) {
            return Err(XlxcError::host(program, format!("Container {name} does not exist")));
        }
        if state.mounts.iter().any(|m| m.target.starts_with(&dir)) {
            return Err(XlxcError::host(
                program,
                format!("{name}: rootfs still has mounts"),
            ));
        }
        state.dirs.retain(|d| !d.starts_with(&dir));
        state.files.retain(|f, _| !f.starts_with(&dir));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> MemoryHost {
        MemoryHost::new(XlxcPaths::new().with_lxc("/var/lib/lxc"))
    }

    #[tokio::test]
    async fn containers_are_directories_under_the_root() {
        let host = host().with_container("test0").with_container("test1");
        let mut names = host.list_containers().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["test0", "test1"]);
    }

    #[tokio::test]
    async fn bridge_creation_conflicts_with_interfaces() {
        let host = host().with_interface("eth0");
        assert!(host.create_bridge("eth0").await.is_err());
        host.create_bridge("testbr").await.unwrap();
        assert!(host.create_bridge("testbr").await.is_err());
        assert!(host.list_interfaces().await.unwrap().contains(&"testbr".to_string()));
    }

    #[tokio::test]
    async fn remove_refuses_mounted_trees() {
        let host = host().with_dir("/var/lib/lxc/a0/rootfs/usr");
        host.bind_mount(Path::new("/usr"), Path::new("/var/lib/lxc/a0/rootfs/usr"), true)
            .await
            .unwrap();
        assert!(host.remove_dir_all(Path::new("/var/lib/lxc/a0")).await.is_err());
        host.unmount(Path::new("/var/lib/lxc/a0/rootfs/usr"))
            .await
            .unwrap();
        host.remove_dir_all(Path::new("/var/lib/lxc/a0")).await.unwrap();
        assert!(!host.has_dir("/var/lib/lxc/a0"));
    }

    #[tokio::test]
    async fn copy_dir_rebases_contents() {
        let host = host().with_file("/stage/etc/xia/hid", "key");
        host.copy_dir(Path::new("/stage/etc"), Path::new("/root/etc"))
            .await
            .unwrap();
        assert_eq!(host.file("/root/etc/xia/hid").as_deref(), Some("key"));
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let host = host();
        host.fail_on("create_bridge", "bad");
        assert!(host.create_bridge("badbr").await.is_err());
        assert!(host.create_bridge("goodbr").await.is_ok());
        assert_eq!(
            host.mutations(),
            vec!["create_bridge badbr", "create_bridge goodbr"]
        );
    }

    #[tokio::test]
    async fn destroy_tool_removes_the_container() {
        let host = host().with_container("a0");
        host.run_tool("lxc-destroy", &["-n", "a0"]).await.unwrap();
        assert!(host.list_containers().await.unwrap().is_empty());
        assert!(host.run_tool("lxc-destroy", &["-n", "a0"]).await.is_err());
    }
}
