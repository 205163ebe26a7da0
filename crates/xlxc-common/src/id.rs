//! Deterministic naming of containers, bridges and veth pairs.
//!
//! Every name is a pure function of a base name and an index, so the
//! same invocation always derives the same host resources.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{XlxcError, XlxcResult};

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;

/// Largest container index. Bridge hardware addresses carry the index in
/// their low two octets, so larger indices would share addresses.
pub const MAX_INDEX: u32 = 0xffff;

/// Suffix appended to every bridge name.
pub const BRIDGE_SUFFIX: &str = "br";

/// Validate a naming scheme base name.
///
/// Base names must be non-empty, start with an alphanumeric character and
/// contain only alphanumeric characters, hyphens and underscores.
///
/// # Errors
///
/// Returns [`XlxcError::InvalidName`] if the format is invalid.
pub fn validate_base(base: &str) -> XlxcResult<()> {
    let invalid = |reason: &str| XlxcError::InvalidName {
        name: base.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = base.chars().next() else {
        return Err(invalid("name is empty"));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(invalid("must start with an alphanumeric character"));
    }
    if base
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
    {
        return Err(invalid("contains characters other than [A-Za-z0-9_-]"));
    }
    Ok(())
}

/// Check that a derived interface name fits the kernel limit.
///
/// # Errors
///
/// Returns [`XlxcError::InvalidName`] if the name is too long.
pub fn check_ifname(name: &str) -> XlxcResult<()> {
    if name.len() > MAX_IFNAME_LEN {
        return Err(XlxcError::InvalidName {
            name: name.to_string(),
            reason: format!("interface names are limited to {MAX_IFNAME_LEN} bytes"),
        });
    }
    Ok(())
}

/// Check that an index fits the hardware address space.
///
/// # Errors
///
/// Returns [`XlxcError::InvalidName`] if the index is above [`MAX_INDEX`].
pub fn check_index(base: &str, index: u32) -> XlxcResult<()> {
    if index > MAX_INDEX {
        return Err(XlxcError::InvalidName {
            name: format!("{base}{index}"),
            reason: format!("container indices are limited to {MAX_INDEX}"),
        });
    }
    Ok(())
}

/// Name of the single bridge shared by a connected network.
#[must_use]
pub fn connected_bridge(base: &str) -> String {
    format!("{base}{BRIDGE_SUFFIX}")
}

/// Identity of one container: a base name plus an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerName {
    base: String,
    index: u32,
}

impl ContainerName {
    /// Create a container identity.
    #[must_use]
    pub fn new(base: impl Into<String>, index: u32) -> Self {
        Self {
            base: base.into(),
            index,
        }
    }

    /// The naming scheme base.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The index within the naming scheme.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// `base + index`, the name the container runtime knows it by.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}{}", self.base, self.index)
    }

    /// Bridge dedicated to this container (standalone and star networks).
    #[must_use]
    pub fn own_bridge(&self) -> String {
        format!("{}{BRIDGE_SUFFIX}", self.full_name())
    }

    /// Host side name of the container's veth pair.
    #[must_use]
    pub fn veth_pair(&self) -> String {
        format!("veth.{}{}", self.index, self.base)
    }

    /// Hardware address of the bridge dedicated to this container.
    #[must_use]
    pub const fn hw_address(&self) -> HwAddress {
        HwAddress::for_index(self.index)
    }

    /// Host suffix of the container's address within its block.
    #[must_use]
    pub const fn host_suffix(&self) -> u32 {
        self.index + 1
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.index)
    }
}

/// A bridge hardware address derived from an index.
///
/// The low two octets carry the index, so the last octet is the index in
/// hex for indices below 256. The first octet marks the address as locally
/// administered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HwAddress([u8; 6]);

impl HwAddress {
    /// Derive the address for an index.
    #[must_use]
    pub const fn for_index(index: u32) -> Self {
        let [_, _, hi, lo] = index.to_be_bytes();
        Self([0x02, 0, 0, 0, hi, lo])
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for HwAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
