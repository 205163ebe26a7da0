//! Integration tests for star and connected networks.
use std::error::Error;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use proptest::prelude::*;
use xlxc::runtime::{LifecycleController, Outcome, RuntimeConfig};
use xlxc::topology::TopologyKind;
use xlxc_common::{HostOps, MemoryHost, XlxcError, XlxcPaths};

const LXC: &str = "/var/lib/lxc";

fn controller(host: MemoryHost) -> (Arc<MemoryHost>, LifecycleController) {
    let host = Arc::new(host);
    let config = RuntimeConfig::default()
        .with_paths(XlxcPaths::new().with_lxc(LXC))
        .with_local_etc("/opt/xlxc/etc");
    let controller = LifecycleController::new(host.clone(), config);
    (host, controller)
}

fn base_host() -> MemoryHost {
    MemoryHost::new(XlxcPaths::new().with_lxc(LXC))
        .with_interface("eth0")
        .with_dir("/opt/xlxc/etc")
}

fn interfaces_file(host: &MemoryHost, container: &str) -> String {
    host.file(format!("{LXC}/{container}/rootfs/etc/network/interfaces"))
        .unwrap_or_default()
}

fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

#[test_log::test(tokio::test)]
async fn test_star_network() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host());
    let (topology, report) = controller
        .build_topology("test", 3, TopologyKind::Star, "eth0")
        .await?;
    assert!(report.is_success());

    assert_eq!(host.list_bridges().await?, vec!["test0br", "test1br", "test2br"]);
    let mut containers = host.list_containers().await?;
    containers.sort();
    assert_eq!(containers, vec!["test0", "test1", "test2"]);

    let blocks: Vec<Ipv4Network> = topology
        .bridges()
        .iter()
        .filter_map(|b| b.block)
        .collect();
    assert_eq!(blocks.len(), 3);
    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            assert!(!overlaps(*a, *b), "{a} overlaps {b}");
        }
    }

    // Each container gets host suffix index + 1 inside its own block
    for (index, block) in blocks.iter().enumerate() {
        let name = format!("test{index}");
        let suffix = u32::try_from(index)? + 1;
        let expected = std::net::Ipv4Addr::from(u32::from(block.network()) + suffix);
        assert!(
            interfaces_file(&host, &name).contains(&format!("address {expected}\n")),
            "{name} not addressed at {expected}"
        );
        let config = host.file(format!("{LXC}/{name}/config")).unwrap_or_default();
        assert!(config.contains(&format!("lxc.network.link=test{index}br\n")));

        let bridge = host.bridge(&format!("test{index}br")).unwrap();
        assert_eq!(bridge.uplink.as_deref(), Some("eth0"));
        assert_eq!(
            bridge.hw_address.map(|hw| hw.to_string()),
            Some(format!("02:00:00:00:00:0{index}"))
        );
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_connected_network() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host());
    let (topology, report) = controller
        .build_topology("test", 3, TopologyKind::Connected, "eth0")
        .await?;
    assert!(report.is_success());
    assert_eq!(topology.kind(), TopologyKind::Connected);

    assert_eq!(host.list_bridges().await?, vec!["testbr"]);
    let bridge = host.bridge("testbr").unwrap();
    let block: Ipv4Network = "10.0.0.0/29".parse()?;
    assert_eq!(bridge.addresses, vec!["10.0.0.6/29".parse::<Ipv4Network>()?]);
    assert_eq!(topology.bridges()[0].block, Some(block));

    for index in 0..3 {
        let name = format!("test{index}");
        let interfaces = interfaces_file(&host, &name);
        assert!(interfaces.contains(&format!("address 10.0.0.{}\n", index + 1)));
        assert!(interfaces.contains("gateway 10.0.0.6\n"));
        let config = host.file(format!("{LXC}/{name}/config")).unwrap_or_default();
        assert!(config.contains("lxc.network.link=testbr\n"));
    }
    Ok(())
}

#[tokio::test]
async fn test_sequential_networks_get_disjoint_blocks() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host());
    controller
        .build_topology("a", 5, TopologyKind::Connected, "eth0")
        .await?;
    controller
        .build_topology("b", 2, TopologyKind::Star, "eth0")
        .await?;
    controller
        .build_topology("c", 5, TopologyKind::Connected, "eth0")
        .await?;

    let blocks: Vec<Ipv4Network> = host
        .bridge_blocks()
        .await?
        .into_iter()
        .map(|(_, block)| block)
        .collect();
    assert_eq!(blocks.len(), 4);
    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            assert!(!overlaps(*a, *b), "{a} overlaps {b}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_bridge_conflict_rejects_network() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host().with_bridge("testbr", None));
    let before = host.snapshot();
    let err = controller
        .build_topology("test", 3, TopologyKind::Connected, "eth0")
        .await
        .unwrap_err();
    assert!(matches!(err, XlxcError::BridgeConflict { ref name } if name == "testbr"));
    assert_eq!(host.snapshot(), before);

    // The star scheme derives different bridge names
    let (_, report) = controller
        .build_topology("test", 2, TopologyKind::Star, "eth0")
        .await?;
    assert!(report.is_success());
    Ok(())
}

#[tokio::test]
async fn test_exhausted_pool_fails_connected_build() -> Result<(), Box<dyn Error>> {
    let host = Arc::new(base_host());
    let config = RuntimeConfig::default()
        .with_paths(XlxcPaths::new().with_lxc(LXC))
        .with_local_etc("/opt/xlxc/etc")
        .with_address_pool("10.0.0.0/29".parse()?);
    let mut controller = LifecycleController::new(host.clone(), config);

    let err = controller
        .build_topology("big", 10, TopologyKind::Connected, "eth0")
        .await
        .unwrap_err();
    assert!(matches!(err, XlxcError::AddressSpaceExhausted { .. }));
    assert!(host.list_bridges().await?.is_empty());
    assert!(host.list_containers().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_star_bridge_failure_abandons_only_its_index() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host());
    host.fail_on("create_bridge", "test1br");

    let (_, report) = controller
        .build_topology("test", 3, TopologyKind::Star, "eth0")
        .await?;
    assert!(matches!(report.outcome("test0"), Some(Outcome::Done)));
    assert!(matches!(report.outcome("test1"), Some(Outcome::Failed(_))));
    assert!(matches!(report.outcome("test2"), Some(Outcome::Done)));

    let mut containers = host.list_containers().await?;
    containers.sort();
    assert_eq!(containers, vec!["test0", "test2"]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_teardown_restores_host() -> Result<(), Box<dyn Error>> {
    for kind in [TopologyKind::Star, TopologyKind::Connected] {
        let (host, mut controller) = controller(base_host());
        let before = (host.list_bridges().await?, host.mounts());

        controller.build_topology("net", 3, kind, "eth0").await?;
        let (_, report) = controller.teardown_topology("net", 3, kind).await?;
        assert!(report.is_success(), "{kind} teardown failed");

        assert_eq!((host.list_bridges().await?, host.mounts()), before);
        assert!(host.list_containers().await?.is_empty());
        assert!(host.bridge_blocks().await?.is_empty());

        // Bridges go after the containers linked to them
        let mutations = host.mutations();
        let last_destroy = mutations
            .iter()
            .rposition(|m| m.starts_with("run_tool lxc-destroy"))
            .unwrap_or_default();
        let last_bridge = mutations
            .iter()
            .rposition(|m| m.starts_with("delete_bridge"))
            .unwrap_or_default();
        assert!(last_destroy < last_bridge);
    }
    Ok(())
}

#[tokio::test]
async fn test_teardown_keeps_bridge_with_undestroyed_container() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host());
    controller
        .build_topology("net", 2, TopologyKind::Connected, "eth0")
        .await?;
    host.fail_on("run_tool", "net1");

    let (_, report) = controller
        .teardown_topology("net", 2, TopologyKind::Connected)
        .await?;
    assert!(!report.is_success());
    assert!(matches!(report.outcome("netbr"), Some(Outcome::Skipped(_))));
    assert!(host.bridge("netbr").is_some());
    Ok(())
}

#[tokio::test]
async fn test_teardown_of_missing_network_is_advisory() -> Result<(), Box<dyn Error>> {
    let (host, mut controller) = controller(base_host());
    let (_, report) = controller
        .teardown_topology("ghost", 2, TopologyKind::Star)
        .await?;
    assert!(report.is_success());
    assert!(host.mutations().is_empty());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_network_counts(size in 1u32..=12, star in any::<bool>()) {
        let kind = if star { TopologyKind::Star } else { TopologyKind::Connected };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let (host, mut controller) = controller(base_host());

        let (topology, report) = runtime
            .block_on(controller.build_topology("p", size, kind, "eth0"))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(report.is_success());

        let bridges = runtime
            .block_on(host.list_bridges())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let containers = runtime
            .block_on(host.list_containers())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let expected_bridges = if star { size as usize } else { 1 };
        prop_assert_eq!(bridges.len(), expected_bridges);
        prop_assert_eq!(topology.bridges().len(), expected_bridges);
        prop_assert_eq!(containers.len(), size as usize);
        prop_assert_eq!(topology.containers().len(), size as usize);
    }
}
