//! Address block allocation.
//!
//! Blocks come from one global pool. There is no allocation table: the
//! blocks in use are whatever live bridges currently hold, read from the
//! host at call time. Two allocations made before either block is
//! assigned to a bridge therefore return the same block, so only one
//! orchestrator may run at a time.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use xlxc_common::{HostOps, XlxcError, XlxcResult};

/// Narrowest usable prefix (two hosts).
const MAX_PREFIX: u8 = 30;

/// Longest prefix whose block can address `size` containers plus the
/// bridge gateway, or `None` if no IPv4 block is large enough.
#[must_use]
pub fn prefix_for(size: u32) -> Option<u8> {
    let needed = u64::from(size) + 1;
    (0..=MAX_PREFIX)
        .rev()
        .find(|prefix| (1u64 << (32 - prefix)) - 2 >= needed)
}

fn usable_hosts(block: Ipv4Network) -> u64 {
    (1u64 << (32 - block.prefix())).saturating_sub(2)
}

fn offset(block: Ipv4Network, suffix: u64) -> XlxcResult<Ipv4Network> {
    let base = u64::from(u32::from(block.network()));
    block_at(base + suffix, block.prefix())
}

/// Address of the bridge gateway: the last usable host of `block`.
///
/// # Errors
///
/// Returns an error if the block has no usable hosts.
pub fn gateway_address(block: Ipv4Network) -> XlxcResult<Ipv4Network> {
    let hosts = usable_hosts(block);
    if hosts == 0 {
        return Err(XlxcError::Config {
            message: format!("block {block} has no usable hosts"),
        });
    }
    offset(block, hosts)
}

/// Address of the container with `index` inside `block` (host suffix
/// `index + 1`).
///
/// # Errors
///
/// Returns an error if the suffix would reach the gateway or beyond.
pub fn container_address(block: Ipv4Network, index: u32) -> XlxcResult<Ipv4Network> {
    let suffix = u64::from(index) + 1;
    if suffix >= usable_hosts(block) {
        return Err(XlxcError::Config {
            message: format!("container index {index} does not fit in {block}"),
        });
    }
    offset(block, suffix)
}

fn block_at(start: u64, prefix: u8) -> XlxcResult<Ipv4Network> {
    let start = u32::try_from(start).map_err(|_| XlxcError::Config {
        message: format!("block start {start} is outside IPv4"),
    })?;
    Ipv4Network::new(Ipv4Addr::from(start), prefix).map_err(|e| XlxcError::Config {
        message: e.to_string(),
    })
}

fn range(block: Ipv4Network) -> (u64, u64) {
    let start = u64::from(u32::from(block.network()));
    (start, start + (1u64 << (32 - block.prefix())))
}

/// Picks free blocks from a fixed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAllocator {
    pool: Ipv4Network,
}

impl AddressAllocator {
    /// Allocate from `pool`.
    #[must_use]
    pub fn new(pool: Ipv4Network) -> Self {
        let pool = Ipv4Network::new(pool.network(), pool.prefix()).unwrap_or(pool);
        Self { pool }
    }

    /// The pool blocks are drawn from.
    #[must_use]
    pub const fn pool(&self) -> Ipv4Network {
        self.pool
    }

    /// Lowest block for `size` containers that overlaps none of `in_use`.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::AddressSpaceExhausted`] if the pool has no such
    /// block.
    pub fn choose(&self, size: u32, in_use: &[Ipv4Network]) -> XlxcResult<Ipv4Network> {
        let exhausted = || XlxcError::AddressSpaceExhausted {
            size,
            pool: self.pool.to_string(),
        };

        let prefix = prefix_for(size).ok_or_else(exhausted)?;
        if prefix < self.pool.prefix() {
            return Err(exhausted());
        }

        let step = 1u64 << (32 - prefix);
        let (mut candidate, pool_end) = range(self.pool);
        let used: Vec<(u64, u64)> = in_use.iter().map(|b| range(*b)).collect();

        while candidate + step <= pool_end {
            let end = candidate + step;
            match used.iter().find(|(start, stop)| *start < end && candidate < *stop) {
                Some(&(_, stop)) => candidate = stop.div_ceil(step) * step,
                None => return block_at(candidate, prefix),
            }
        }

        Err(exhausted())
    }

    /// Scan the blocks held by live bridges and choose a free one.
    ///
    /// # Errors
    ///
    /// Returns [`XlxcError::AddressSpaceExhausted`] if the pool has no free
    /// block, or the host error if the scan fails.
    pub async fn allocate(&self, host: &dyn HostOps, size: u32) -> XlxcResult<Ipv4Network> {
        let in_use: Vec<Ipv4Network> = host
            .bridge_blocks()
            .await?
            .into_iter()
            .map(|(_, block)| block)
            .collect();
        let block = self.choose(size, &in_use)?;
        tracing::debug!(size, %block, live = in_use.len(), "Allocated address block");
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use xlxc_common::{MemoryHost, XlxcPaths};

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn prefix_holds_containers_and_gateway() {
        assert_eq!(prefix_for(1), Some(30));
        assert_eq!(prefix_for(2), Some(29));
        assert_eq!(prefix_for(3), Some(29));
        assert_eq!(prefix_for(5), Some(29));
        assert_eq!(prefix_for(6), Some(28));
        assert_eq!(prefix_for(65533), Some(16));
        assert_eq!(prefix_for(65534), Some(15));
    }

    #[test]
    fn addresses_within_block() {
        let block = net("10.0.0.0/29");
        assert_eq!(container_address(block, 0).unwrap(), net("10.0.0.1/29"));
        assert_eq!(container_address(block, 2).unwrap(), net("10.0.0.3/29"));
        assert_eq!(gateway_address(block).unwrap(), net("10.0.0.6/29"));
        assert!(container_address(block, 5).is_err());
    }

    #[test]
    fn lowest_free_block() {
        let alloc = AddressAllocator::new(net("10.0.0.0/8"));
        assert_eq!(alloc.choose(3, &[]).unwrap(), net("10.0.0.0/29"));
        let used = [net("10.0.0.6/29"), net("10.0.0.8/30")];
        assert_eq!(alloc.choose(3, &used).unwrap(), net("10.0.0.16/29"));
    }

    #[test]
    fn blocks_outside_the_pool_are_ignored() {
        let alloc = AddressAllocator::new(net("10.0.0.0/8"));
        let used = [net("192.168.1.0/24")];
        assert_eq!(alloc.choose(1, &used).unwrap(), net("10.0.0.0/30"));
    }

    #[test]
    fn exhausted_pool() {
        let alloc = AddressAllocator::new(net("10.0.0.0/30"));
        assert_eq!(alloc.choose(1, &[]).unwrap(), net("10.0.0.0/30"));
        assert!(matches!(
            alloc.choose(1, &[net("10.0.0.2/30")]),
            Err(XlxcError::AddressSpaceExhausted { .. })
        ));
        assert!(matches!(
            alloc.choose(2, &[]),
            Err(XlxcError::AddressSpaceExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn allocation_scans_live_bridges() {
        let host = MemoryHost::new(XlxcPaths::new())
            .with_bridge("abr", Some(net("10.0.0.2/30")));
        let alloc = AddressAllocator::new(net("10.0.0.0/8"));
        assert_eq!(alloc.allocate(&host, 1).await.unwrap(), net("10.0.0.4/30"));
    }

    #[tokio::test]
    async fn unclaimed_blocks_are_handed_out_twice() {
        // Allocation does not reserve anything until a bridge holds the
        // block, so back-to-back scans without a bridge collide.
        let host = MemoryHost::new(XlxcPaths::new());
        let alloc = AddressAllocator::new(net("10.0.0.0/8"));
        let first = alloc.allocate(&host, 3).await.unwrap();
        let second = alloc.allocate(&host, 3).await.unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn sequential_allocations_never_overlap(sizes in proptest::collection::vec(1u32..300, 1..20)) {
            let alloc = AddressAllocator::new(net("10.0.0.0/8"));
            let mut held: Vec<Ipv4Network> = Vec::new();
            for size in sizes {
                let block = alloc.choose(size, &held).unwrap();
                prop_assert!(alloc.pool().contains(block.network()));
                for other in &held {
                    let (a0, a1) = range(block);
                    let (b0, b1) = range(*other);
                    prop_assert!(a1 <= b0 || b1 <= a0, "{} overlaps {}", block, other);
                }
                prop_assert!(container_address(block, size - 1).is_ok());
                held.push(gateway_address(block).unwrap());
            }
        }
    }
}
