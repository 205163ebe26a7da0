//! Conflict detection for naming schemes.
//!
//! Every check reads the host and mutates nothing. A batch runs all of
//! its checks before its first mutation.

use xlxc_common::id::{check_ifname, check_index, connected_bridge, validate_base};
use xlxc_common::{ContainerName, HostOps, XlxcError, XlxcResult};

use crate::topology::TopologyKind;

/// Checks naming schemes against the host.
pub struct ConflictResolver<'a> {
    host: &'a dyn HostOps,
}

impl<'a> ConflictResolver<'a> {
    /// Check against `host`.
    #[must_use]
    pub fn new(host: &'a dyn HostOps) -> Self {
        Self { host }
    }

    /// Check that `base` is well formed, that indices `first..=last` get
    /// distinct hardware addresses, and that the interface names derived
    /// for them fit the kernel limit.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::InvalidName`] for the first bad name.
    pub fn validate_names(base: &str, first: u32, last: u32) -> XlxcResult<()> {
        validate_base(base)?;
        let widest = last.max(first);
        check_index(base, widest)?;
        // Derived names only grow with the index
        let widest = ContainerName::new(base, widest);
        check_ifname(&widest.veth_pair())?;
        check_ifname(&widest.own_bridge())
    }

    /// Fail if any container of the batch already exists.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::NameConflict`] for the first existing name.
    pub async fn validate_create(&self, base: &str, first: u32, last: u32) -> XlxcResult<()> {
        let existing = self.host.list_containers().await?;
        for index in first..=last {
            let name = ContainerName::new(base, index).full_name();
            if existing.contains(&name) {
                return Err(XlxcError::NameConflict { name });
            }
        }
        Ok(())
    }

    /// Containers of the batch that do not exist.
    ///
    /// Missing containers are advisory: they are reported and skipped, the
    /// rest of the batch is reset.
    pub async fn validate_reset(
        &self,
        base: &str,
        first: u32,
        last: u32,
    ) -> XlxcResult<Vec<ContainerName>> {
        let existing = self.host.list_containers().await?;
        let missing: Vec<ContainerName> = (first..=last)
            .map(|index| ContainerName::new(base, index))
            .filter(|name| !existing.contains(&name.full_name()))
            .collect();
        for name in &missing {
            tracing::warn!(container = %name, "Container does not exist, it will not be reset");
        }
        Ok(missing)
    }

    /// Fail if any of `bridges` is already a bridge or interface on the
    /// host.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::BridgeConflict`] for the first name in use.
    pub async fn validate_bridges(&self, bridges: &[String]) -> XlxcResult<()> {
        let mut in_use = self.host.list_bridges().await?;
        in_use.extend(self.host.list_interfaces().await?);
        match bridges.iter().find(|b| in_use.contains(b)) {
            Some(name) => Err(XlxcError::BridgeConflict { name: name.clone() }),
            None => Ok(()),
        }
    }

    /// Fail if a bridge implied by a network of `size` containers is in
    /// use.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::InvalidName`] if the shared bridge name is too
    /// long and [`XlxcError::BridgeConflict`] if a bridge is in use.
    pub async fn validate_bridge_names(
        &self,
        base: &str,
        size: u32,
        kind: TopologyKind,
    ) -> XlxcResult<()> {
        let bridges = match kind {
            TopologyKind::Connected => {
                let bridge = connected_bridge(base);
                check_ifname(&bridge)?;
                vec![bridge]
            }
            TopologyKind::Star => (0..size)
                .map(|index| ContainerName::new(base, index).own_bridge())
                .collect(),
        };
        self.validate_bridges(&bridges).await
    }
}
