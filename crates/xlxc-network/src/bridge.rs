//! Linux bridge management.
//!
//! This module drives bridge construction and removal through a
//! [`HostOps`] implementation.

use ipnetwork::Ipv4Network;
use xlxc_common::{HostOps, HwAddress, XlxcResult};

use crate::cidr::gateway_address;

/// Bridge manager for container networking.
pub struct BridgeManager<'a> {
    host: &'a dyn HostOps,
}

impl<'a> BridgeManager<'a> {
    /// Manage bridges on `host`.
    #[must_use]
    pub fn new(host: &'a dyn HostOps) -> Self {
        Self { host }
    }

    /// Check if a bridge or interface with this name exists.
    pub async fn exists(&self, name: &str) -> XlxcResult<bool> {
        Ok(self.host.list_interfaces().await?.iter().any(|i| i == name))
    }

    /// Create a bridge, set its hardware address, and bring it up in
    /// promiscuous mode.
    ///
    /// Safe to retry: a bridge left behind by an earlier attempt is reused.
    pub async fn create(&self, name: &str, hw_address: HwAddress) -> XlxcResult<()> {
        tracing::debug!(name, %hw_address, "Creating bridge");

        if let Err(e) = self.host.create_bridge(name).await {
            // Bridge might already exist, check before failing
            if !self.host.list_bridges().await?.iter().any(|b| b == name) {
                return Err(e);
            }
            tracing::debug!(name, "Reusing existing bridge");
        }

        self.host.set_hw_address(name, hw_address).await?;
        self.host.set_promisc_up(name).await?;

        tracing::info!(name, "Bridge created successfully");
        Ok(())
    }

    /// Give the bridge the gateway address of `block` and route the block
    /// out of `iface`.
    pub async fn attach(&self, name: &str, iface: &str, block: Ipv4Network) -> XlxcResult<()> {
        let gateway = gateway_address(block)?;
        tracing::debug!(bridge = name, %gateway, iface, "Attaching bridge to uplink");

        let held = self.host.bridge_blocks().await?;
        if !held.iter().any(|(b, addr)| b == name && addr.network() == block.network()) {
            self.host.add_bridge_address(name, gateway).await?;
        }
        self.host.attach_uplink(name, iface, block).await?;

        tracing::info!(bridge = name, %block, iface, "Bridge attached");
        Ok(())
    }

    /// Detach the bridge from its uplink and delete it.
    pub async fn delete(&self, name: &str) -> XlxcResult<()> {
        tracing::debug!(name, "Deleting bridge");

        if !self.host.list_bridges().await?.iter().any(|b| b == name) {
            tracing::warn!(name, "Bridge does not exist, nothing to delete");
            return Ok(());
        }

        self.host.detach_uplink(name).await?;
        self.host.delete_bridge(name).await?;

        tracing::info!(name, "Bridge deleted");
        Ok(())
    }
}
