//! Mount operations.

use std::path::{Path, PathBuf};

use xlxc_common::{XlxcError, XlxcResult};

fn mount_error(source: &Path, target: &Path, err: impl std::fmt::Display) -> XlxcError {
    XlxcError::MountFailure {
        source_path: source.display().to_string(),
        target: target.display().to_string(),
        reason: err.to_string(),
    }
}

/// Recursively bind mount a path, optionally remounting it read-only.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path, readonly: bool) -> XlxcResult<()> {
    use rustix::mount::{MountFlags, mount_bind_recursive, mount_remount};

    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        readonly,
        "Creating bind mount"
    );

    mount_bind_recursive(source, target).map_err(|e| mount_error(source, target, e))?;

    // A bind mount ignores MS_RDONLY until it is remounted
    if readonly {
        mount_remount(target, MountFlags::BIND | MountFlags::RDONLY, "")
            .map_err(|e| mount_error(source, target, e))?;
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn bind_mount(source: &Path, target: &Path, _readonly: bool) -> XlxcResult<()> {
    Err(mount_error(source, target, "bind mounts require Linux"))
}

/// Lazily unmount a path and everything mounted below it.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> XlxcResult<()> {
    use rustix::mount::{UnmountFlags, unmount};

    tracing::debug!(target = %target.display(), "Unmounting filesystem");

    unmount(target, UnmountFlags::DETACH).map_err(|e| XlxcError::Io(e.into()))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> XlxcResult<()> {
    Err(XlxcError::host("unmount", "unmounting requires Linux"))
}

/// Whether `target` is a mount point according to `/proc/self/mountinfo`.
pub fn is_mounted(target: &Path) -> XlxcResult<bool> {
    let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")?;
    Ok(mount_points(&mountinfo).iter().any(|p| p == target))
}

/// Mount points listed in a mountinfo table.
#[must_use]
pub fn mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

/// Decode the octal escapes (`\040` and friends) mountinfo uses for
/// whitespace and backslashes.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
