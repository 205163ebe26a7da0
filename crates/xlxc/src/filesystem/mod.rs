//! Filesystem operations for containers.
//!
//! This module handles:
//! - Bind mounts and their discovery
//! - Root filesystem assembly
//! - Staging of shared configuration

pub mod mounts;
mod rootfs;

pub use mounts::{bind_mount, is_mounted, unmount};
pub use rootfs::RootfsAssembler;
