//! Container networks.
//!
//! A star network gives every container its own bridge. A connected
//! network puts all containers on one shared bridge. Both are torn down
//! containers first, since a bridge with attached interfaces cannot be
//! deleted.

use std::fmt;

use ipnetwork::Ipv4Network;
use serde::Serialize;
use xlxc_common::id::connected_bridge;
use xlxc_common::{ContainerName, HostOps, HwAddress, XlxcError, XlxcResult};
use xlxc_network::{AddressAllocator, BridgeManager, container_address};

use crate::runtime::{Attachment, BatchReport, ContainerBuilder, RuntimeConfig};

/// Shape of a container network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// One bridge per container.
    Star,
    /// One bridge shared by all containers.
    Connected,
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Star => write!(f, "star"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A container of a network and where it sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedContainer {
    /// Full container name.
    pub name: String,
    /// Index within the naming scheme.
    pub index: u32,
    /// Bridge the container links to.
    pub bridge: String,
    /// Container address, once its bridge has a block.
    pub address: Option<Ipv4Network>,
}

/// A bridge of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedBridge {
    /// Bridge name.
    pub name: String,
    /// Hardware address.
    pub hw_address: String,
    /// Address block, once allocated.
    pub block: Option<Ipv4Network>,
}

impl PlannedBridge {
    fn new(name: String, hw_address: HwAddress) -> Self {
        Self {
            name,
            hw_address: hw_address.to_string(),
            block: None,
        }
    }
}

/// The containers and bridges of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "topology", rename_all = "lowercase")]
pub enum Topology {
    /// Each container on its own bridge, in index order.
    Star {
        /// Containers.
        containers: Vec<PlannedContainer>,
        /// Bridges, one per container.
        bridges: Vec<PlannedBridge>,
    },
    /// All containers on one bridge.
    Connected {
        /// Containers.
        containers: Vec<PlannedContainer>,
        /// The shared bridge.
        bridge: PlannedBridge,
    },
}

impl Topology {
    /// Derive the names of a network of `size` containers.
    #[must_use]
    pub fn plan(base: &str, size: u32, kind: TopologyKind) -> Self {
        let names: Vec<ContainerName> = (0..size).map(|i| ContainerName::new(base, i)).collect();
        match kind {
            TopologyKind::Star => Self::Star {
                containers: names
                    .iter()
                    .map(|n| planned_container(n, n.own_bridge()))
                    .collect(),
                bridges: names
                    .iter()
                    .map(|n| PlannedBridge::new(n.own_bridge(), n.hw_address()))
                    .collect(),
            },
            TopologyKind::Connected => {
                let bridge = connected_bridge(base);
                Self::Connected {
                    containers: names
                        .iter()
                        .map(|n| planned_container(n, bridge.clone()))
                        .collect(),
                    bridge: PlannedBridge::new(bridge, HwAddress::for_index(0)),
                }
            }
        }
    }

    /// Shape of the network.
    #[must_use]
    pub const fn kind(&self) -> TopologyKind {
        match self {
            Self::Star { .. } => TopologyKind::Star,
            Self::Connected { .. } => TopologyKind::Connected,
        }
    }

    /// Containers in index order.
    #[must_use]
    pub fn containers(&self) -> &[PlannedContainer] {
        match self {
            Self::Star { containers, .. } | Self::Connected { containers, .. } => containers,
        }
    }

    /// Bridges in creation order.
    #[must_use]
    pub fn bridges(&self) -> Vec<&PlannedBridge> {
        match self {
            Self::Star { bridges, .. } => bridges.iter().collect(),
            Self::Connected { bridge, .. } => vec![bridge],
        }
    }

    /// Record that `bridge` holds `block`, addressing its containers.
    fn assign(&mut self, bridge: &str, block: Ipv4Network) {
        let (containers, bridges): (&mut Vec<PlannedContainer>, Vec<&mut PlannedBridge>) =
            match self {
                Self::Star {
                    containers,
                    bridges,
                } => (containers, bridges.iter_mut().collect()),
                Self::Connected {
                    containers,
                    bridge,
                } => (containers, vec![bridge]),
            };

        for planned in bridges.into_iter().filter(|b| b.name == bridge) {
            planned.block = Some(block);
        }
        for container in containers.iter_mut().filter(|c| c.bridge == bridge) {
            container.address = container_address(block, container.index).ok();
        }
    }
}

fn planned_container(name: &ContainerName, bridge: String) -> PlannedContainer {
    PlannedContainer {
        name: name.full_name(),
        index: name.index(),
        bridge,
        address: None,
    }
}

/// Builds and tears down networks on a host.
pub struct TopologyBuilder<'a> {
    host: &'a dyn HostOps,
    config: &'a RuntimeConfig,
}

impl<'a> TopologyBuilder<'a> {
    /// Build on `host` with `config`.
    #[must_use]
    pub fn new(host: &'a dyn HostOps, config: &'a RuntimeConfig) -> Self {
        Self { host, config }
    }

    /// Build a network of `size` containers routed out of `iface`.
    ///
    /// Containers are created in index order, each after the bridge it
    /// links to. A failure on one container abandons only that index. In
    /// a star network a failed bridge abandons its index; in a connected
    /// network it abandons the build.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared bridge of a connected network cannot
    /// be allocated or created.
    pub async fn build(
        &self,
        base: &str,
        size: u32,
        kind: TopologyKind,
        iface: &str,
    ) -> XlxcResult<(Topology, BatchReport)> {
        let mut topology = Topology::plan(base, size, kind);
        let mut report = BatchReport::new();
        let allocator = AddressAllocator::new(self.config.address_pool);
        let bridges = BridgeManager::new(self.host);
        let containers = ContainerBuilder::new(self.host, self.config);

        tracing::info!(base, size, %kind, iface, "Building network");

        match kind {
            TopologyKind::Connected => {
                let bridge = connected_bridge(base);
                let block = allocator.allocate(self.host, size).await?;
                bridges.create(&bridge, HwAddress::for_index(0)).await?;
                bridges.attach(&bridge, iface, block).await?;
                topology.assign(&bridge, block);

                let attachment = Attachment { bridge, block };
                for index in 0..size {
                    let name = ContainerName::new(base, index);
                    let result = containers.create(&name, Some(&attachment), false).await;
                    report.record(name.full_name(), result);
                }
            }
            TopologyKind::Star => {
                for index in 0..size {
                    let name = ContainerName::new(base, index);
                    let bridge = name.own_bridge();

                    let block = match allocator.allocate(self.host, size).await {
                        Ok(block) => block,
                        Err(e @ XlxcError::AddressSpaceExhausted { .. }) => {
                            // Later indices cannot fare better
                            report.record(name.full_name(), Err(e));
                            break;
                        }
                        Err(e) => {
                            report.record(name.full_name(), Err(e));
                            continue;
                        }
                    };

                    let result = async {
                        bridges.create(&bridge, name.hw_address()).await?;
                        bridges.attach(&bridge, iface, block).await?;
                        topology.assign(&bridge, block);
                        let attachment = Attachment {
                            bridge: bridge.clone(),
                            block,
                        };
                        containers.create(&name, Some(&attachment), false).await
                    }
                    .await;
                    report.record(name.full_name(), result);
                }
            }
        }

        Ok((topology, report))
    }

    /// Tear down a network of `size` containers.
    ///
    /// Containers are destroyed before the bridge they link to. A bridge
    /// is only deleted once all of its containers are gone; missing
    /// containers count as gone.
    pub async fn teardown(
        &self,
        base: &str,
        size: u32,
        kind: TopologyKind,
    ) -> XlxcResult<(Topology, BatchReport)> {
        let topology = Topology::plan(base, size, kind);
        let mut report = BatchReport::new();
        let bridges = BridgeManager::new(self.host);
        let containers = ContainerBuilder::new(self.host, self.config);

        tracing::info!(base, size, %kind, "Tearing down network");

        match kind {
            TopologyKind::Connected => {
                let mut clear = true;
                for index in 0..size {
                    let name = ContainerName::new(base, index);
                    let result = containers.destroy(&name).await;
                    clear &= is_gone(&result);
                    report.record(name.full_name(), result);
                }

                let bridge = connected_bridge(base);
                if clear {
                    let result = bridges.delete(&bridge).await;
                    report.record(bridge, result);
                } else {
                    report.skip(bridge, still_attached());
                }
            }
            TopologyKind::Star => {
                for index in 0..size {
                    let name = ContainerName::new(base, index);
                    let bridge = name.own_bridge();
                    let result = containers.destroy(&name).await;
                    let clear = is_gone(&result);
                    report.record(name.full_name(), result);

                    if clear {
                        let result = bridges.delete(&bridge).await;
                        report.record(bridge, result);
                    } else {
                        report.skip(bridge, still_attached());
                    }
                }
            }
        }

        Ok((topology, report))
    }
}

/// Whether a destroy left nothing behind.
fn is_gone(result: &XlxcResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => e.is_advisory(),
    }
}

fn still_attached() -> XlxcError {
    XlxcError::host(
        "delete_bridge",
        "a container on this bridge was not destroyed, bridge left in place",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_plan_names() {
        let topology = Topology::plan("test", 3, TopologyKind::Star);
        let bridges: Vec<&str> = topology.bridges().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(bridges, vec!["test0br", "test1br", "test2br"]);
        let containers: Vec<&str> = topology.containers().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(containers, vec!["test0", "test1", "test2"]);
        assert_eq!(topology.bridges()[2].hw_address, "02:00:00:00:00:02");
    }

    #[test]
    fn connected_plan_shares_one_bridge() {
        let topology = Topology::plan("test", 3, TopologyKind::Connected);
        assert_eq!(topology.kind(), TopologyKind::Connected);
        assert_eq!(topology.bridges().len(), 1);
        assert!(topology.containers().iter().all(|c| c.bridge == "testbr"));
    }

    #[test]
    fn assign_addresses_containers_on_the_bridge() {
        let mut topology = Topology::plan("test", 3, TopologyKind::Star);
        topology.assign("test1br", "10.0.0.8/29".parse().unwrap());
        let containers = topology.containers();
        assert_eq!(containers[0].address, None);
        assert_eq!(containers[1].address, Some("10.0.0.10/29".parse().unwrap()));
        assert_eq!(
            topology.bridges()[1].block,
            Some("10.0.0.8/29".parse().unwrap())
        );
    }

    #[test]
    fn serializes_with_tag() {
        let json = serde_json::to_value(Topology::plan("n", 1, TopologyKind::Connected)).unwrap();
        assert_eq!(json["topology"], "connected");
        assert_eq!(json["bridge"]["name"], "nbr");
        assert_eq!(json["containers"][0]["name"], "n0");
    }
}
