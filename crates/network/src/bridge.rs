//! Network Bridge Attacher: wires a container's network namespace into the
//! host bridge with a veth pair, entirely over netlink rather than by
//! shelling out to `ip`.
//!
//! Runs in the parent, after it has observed the child's pid (the child's
//! `CLONE_NEWNET` namespace only has a stable path once the child exists).
//! State per container netns moves `absent -> pinned -> wired -> addressed ->
//! up`; each step names itself in [`NetworkError`] so a failure can be
//! reported without string-matching.

use crate::namespace::{self, Namespace, NamespaceError};
use crate::netlink::{DefaultNetlink, Netlink};
use ipnetwork::Ipv4Network;
use log::{info, warn};
use nix::unistd::Pid;
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub bridge_name: String,
    pub container_address: Ipv4Network,
    pub gateway: Ipv4Addr,
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("pinning network namespace: {0}")]
    Pin(#[source] NamespaceError),

    #[error("creating veth pair: {0}")]
    CreateVeth(#[source] anyhow::Error),

    #[error("moving veth end into container namespace: {0}")]
    MoveToNetns(#[source] anyhow::Error),

    #[error("attaching veth to bridge {bridge}: {source}")]
    AttachBridge {
        bridge: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuring address inside container namespace: {0}")]
    Address(#[source] anyhow::Error),

    #[error("bringing interface up: {0}")]
    Up(#[source] anyhow::Error),
}

/// The attached network state a container holds for its lifetime, needed
/// again at teardown.
pub struct AttachedNetwork {
    pub netns_path: PathBuf,
    pub veth_host: String,
    pub veth_container: String,
}

fn netns_path(id: &str) -> PathBuf {
    PathBuf::from(format!("/var/run/netns/ns{}", id))
}

/// Runs the full six-step attach sequence against the host's default
/// netlink connection.
pub async fn attach(
    config: &BridgeConfig,
    id: &str,
    pid: Pid,
) -> Result<AttachedNetwork, NetworkError> {
    let host = DefaultNetlink::new()
        .await
        .map_err(NetworkError::CreateVeth)?;
    attach_with(&host, config, id, pid).await
}

/// Same as [`attach`] but takes an explicit netlink implementation, so the
/// sequencing can be exercised against a mock in unit tests.
pub async fn attach_with(
    host: &dyn Netlink,
    config: &BridgeConfig,
    id: &str,
    pid: Pid,
) -> Result<AttachedNetwork, NetworkError> {
    let veth_host = format!("vb{}", id);
    let veth_container = format!("eth{}", id);
    let netns = netns_path(id);

    info!("pinning network namespace for container {}", id);
    namespace::pin(pid, &netns).map_err(NetworkError::Pin)?;

    info!("creating veth pair {} <-> {}", veth_host, veth_container);
    host.add_veth(&veth_host, &veth_container)
        .await
        .map_err(NetworkError::CreateVeth)?;

    let container_link = host
        .link_by_name(&veth_container)
        .await
        .map_err(NetworkError::MoveToNetns)?;

    let ns = Namespace::open(&netns)
        .await
        .map_err(NetworkError::Pin)?;
    let ns_file = tokio::fs::File::open(&netns)
        .await
        .map_err(|err| NetworkError::MoveToNetns(err.into()))?;
    host.move_to_netns(&container_link, ns_file.as_raw_fd())
        .await
        .map_err(NetworkError::MoveToNetns)?;

    let bridge_name = config.bridge_name.clone();
    let bridge_link = host
        .link_by_name(&bridge_name)
        .await
        .map_err(|source| NetworkError::AttachBridge {
            bridge: bridge_name.clone(),
            source,
        })?;
    let host_link = host
        .link_by_name(&veth_host)
        .await
        .map_err(|source| NetworkError::AttachBridge {
            bridge: bridge_name.clone(),
            source,
        })?;
    host.set_master(&host_link, &bridge_link)
        .await
        .map_err(|source| NetworkError::AttachBridge {
            bridge: bridge_name,
            source,
        })?;

    let address = config.container_address;
    let gateway = config.gateway;
    let container_iface = veth_container.clone();
    ns.run(move || {
        let container_iface = container_iface.clone();
        async move {
            let netlink = DefaultNetlink::new().await?;
            let lo = netlink.loopback().await?;
            netlink.set_link_up(&lo).await?;

            let link = netlink.link_by_name(&container_iface).await?;
            netlink.add_address(&link, address).await?;
            netlink.set_link_up(&link).await?;
            netlink.add_default_route(&link, gateway).await?;
            Ok(())
        }
    })
    .await
    .map_err(|err| NetworkError::Address(anyhow::anyhow!(err.to_string())))?;

    info!("bringing up host side of veth pair {}", veth_host);
    host.set_link_up(&host_link).await.map_err(NetworkError::Up)?;

    Ok(AttachedNetwork {
        netns_path: netns,
        veth_host,
        veth_container,
    })
}

/// Best-effort teardown keyed off `id` alone, so it can run whether or not
/// [`attach`] ever returned successfully: deletes the host-side veth (the
/// namespace end goes with it, if it was ever created) and removes the netns
/// pin (if it was ever pinned). Every step tolerates "doesn't exist" and
/// never fails; failures are logged.
pub async fn teardown(id: &str) {
    let veth_host = format!("vb{}", id);
    match DefaultNetlink::new().await {
        Ok(host) => {
            if let Err(err) = host.delete_link(&veth_host).await {
                warn!("removing veth {}: {}", veth_host, err);
            }
        }
        Err(err) => warn!("connecting to netlink for teardown: {}", err),
    }
    namespace::unpin(&netns_path(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netns_path_is_namespaced_by_container_id() {
        assert_eq!(
            netns_path("abc123"),
            PathBuf::from("/var/run/netns/nsabc123")
        );
    }

    #[test]
    fn veth_names_follow_the_host_and_container_prefix_convention() {
        let id = "abc123";
        assert_eq!(format!("vb{}", id), "vbabc123");
        assert_eq!(format!("eth{}", id), "ethabc123");
    }

    // Requires CAP_NET_ADMIN and a `docker0`-equivalent bridge to already exist;
    // run explicitly with `cargo test -- --ignored`.
    #[ignore]
    #[tokio::test]
    async fn attach_and_teardown_against_a_real_bridge() {
        let config = BridgeConfig {
            bridge_name: "docker0".into(),
            container_address: "172.17.0.8/16".parse().unwrap(),
            gateway: "172.17.0.1".parse().unwrap(),
        };
        let _attached = attach(&config, "testnsid", Pid::this()).await.unwrap();
        teardown("testnsid").await;
    }
}
