//! Wiring a container's network namespace into the host bridge: pinning the
//! namespace, creating a veth pair, and configuring addresses and routes,
//! all over netlink.

pub mod bridge;
pub mod namespace;
pub mod netlink;

pub use bridge::{attach, attach_with, teardown, AttachedNetwork, BridgeConfig, NetworkError};
pub use namespace::{Namespace, NamespaceError};
pub use netlink::{DefaultNetlink, Link, Netlink};
