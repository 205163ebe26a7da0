//! # xlxc-network
//!
//! Networking primitives for XLXC container networks.
//!
//! This crate provides the address block allocator, the bridge
//! construction sequence, and the `ip`/`iptables` wrappers the real host
//! uses to carry them out.

#![warn(missing_docs)]

pub mod bridge;
pub mod cidr;
pub mod iproute;

pub use bridge::BridgeManager;
pub use cidr::{AddressAllocator, container_address, gateway_address, prefix_for};
