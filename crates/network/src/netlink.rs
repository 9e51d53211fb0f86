//! Netlink operations used to wire up a container's veth pair: creating a
//! veth pair, moving one end into another network namespace, attaching a
//! link as a bridge slave, and assigning an address/default route.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dyn_clone::{clone_trait_object, DynClone};
use futures::stream::TryStreamExt;
use getset::Getters;
use ipnetwork::Ipv4Network;
use log::{debug, trace};
use rtnetlink::packet::rtnl::link::nlas::Nla;
use std::fmt;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

#[async_trait]
/// The netlink behavior this crate needs, kept as a trait so the bridge
/// attacher can be exercised against a mock in unit tests.
pub trait Netlink: DynClone + Send + Sync {
    /// Get the loopback link.
    async fn loopback(&self) -> Result<Link> {
        bail!("no loopback")
    }

    /// Get a link referenced by its name.
    async fn link_by_name(&self, _name: &str) -> Result<Link> {
        bail!("no link for name")
    }

    /// Set a link down.
    async fn set_link_down(&self, _link: &Link) -> Result<()> {
        Ok(())
    }

    /// Set a link up.
    async fn set_link_up(&self, _link: &Link) -> Result<()> {
        Ok(())
    }

    /// Create a veth pair `name` <-> `peer`, both ends on the host.
    async fn add_veth(&self, _name: &str, _peer: &str) -> Result<()> {
        Ok(())
    }

    /// Delete a link by name. Used during teardown.
    async fn delete_link(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Move `link` into the network namespace pinned at the open file
    /// descriptor `netns_fd`.
    async fn move_to_netns(&self, _link: &Link, _netns_fd: RawFd) -> Result<()> {
        Ok(())
    }

    /// Attach `link` as a slave of the bridge `master`.
    async fn set_master(&self, _link: &Link, _master: &Link) -> Result<()> {
        Ok(())
    }

    /// Assign `address` to `link`.
    async fn add_address(&self, _link: &Link, _address: Ipv4Network) -> Result<()> {
        Ok(())
    }

    /// Add a default route via `gateway`, out of `link`.
    async fn add_default_route(&self, _link: &Link, _gateway: Ipv4Addr) -> Result<()> {
        Ok(())
    }
}

clone_trait_object!(Netlink);

#[derive(Clone, Debug, Getters)]
/// The default Netlink interface implementation, wrapping an `rtnetlink`
/// connection bound to whichever network namespace was current when it was
/// created.
pub struct DefaultNetlink {
    #[get]
    handle: rtnetlink::Handle,
}

#[derive(Clone, Debug, Default, Getters)]
/// A link returned by netlink usage.
pub struct Link {
    #[get = "pub"]
    name: String,
    index: u32,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl DefaultNetlink {
    /// Create a new netlink instance bound to the network namespace of the
    /// calling thread at the time this is invoked.
    pub async fn new() -> Result<Self> {
        debug!("creating new netlink connection");

        let (connection, handle, _) =
            rtnetlink::new_connection().context("create new netlink connection")?;
        tokio::spawn(connection);

        Ok(Self { handle })
    }

    async fn link_nla_name(message: &rtnetlink::packet::LinkMessage) -> Result<String> {
        for nla in message.nlas.iter() {
            if let Nla::IfName(name) = nla {
                return Ok(name.clone());
            }
        }
        bail!("no name found for interface")
    }
}

#[async_trait]
impl Netlink for DefaultNetlink {
    async fn loopback(&self) -> Result<Link> {
        self.link_by_name("lo").await
    }

    async fn link_by_name(&self, name: &str) -> Result<Link> {
        let message = self
            .handle
            .link()
            .get()
            .set_name_filter(name.into())
            .execute()
            .try_next()
            .await
            .context("get links")?
            .with_context(|| format!("no link found for name {}", name))?;
        trace!("got link by name {}: {:?}", name, message.header);

        Ok(Link {
            name: name.to_string(),
            index: message.header.index,
        })
    }

    async fn set_link_down(&self, link: &Link) -> Result<()> {
        trace!("setting link {} down", link);
        self.handle
            .link()
            .set(link.index)
            .down()
            .execute()
            .await
            .context("set link down")
    }

    async fn set_link_up(&self, link: &Link) -> Result<()> {
        trace!("setting link {} up", link);
        self.handle
            .link()
            .set(link.index)
            .up()
            .execute()
            .await
            .context("set link up")
    }

    async fn add_veth(&self, name: &str, peer: &str) -> Result<()> {
        trace!("creating veth pair {} <-> {}", name, peer);
        self.handle
            .link()
            .add()
            .veth(name.into(), peer.into())
            .execute()
            .await
            .context("create veth pair")
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        let link = match self.link_by_name(name).await {
            Ok(link) => link,
            Err(_) => return Ok(()),
        };
        self.handle
            .link()
            .del(link.index)
            .execute()
            .await
            .context("delete link")
    }

    async fn move_to_netns(&self, link: &Link, netns_fd: RawFd) -> Result<()> {
        trace!("moving link {} into target netns", link);
        self.handle
            .link()
            .set(link.index)
            .setns_by_fd(netns_fd)
            .execute()
            .await
            .context("move link to netns")
    }

    async fn set_master(&self, link: &Link, master: &Link) -> Result<()> {
        trace!("attaching {} to bridge {}", link, master);
        self.handle
            .link()
            .set(link.index)
            .master(master.index)
            .execute()
            .await
            .context("attach link to bridge")
    }

    async fn add_address(&self, link: &Link, address: Ipv4Network) -> Result<()> {
        trace!("assigning {} to {}", address, link);
        self.handle
            .address()
            .add(link.index, address.ip().into(), address.prefix())
            .execute()
            .await
            .context("assign address")
    }

    async fn add_default_route(&self, link: &Link, gateway: Ipv4Addr) -> Result<()> {
        trace!("adding default route via {} on {}", gateway, link);
        self.handle
            .route()
            .add()
            .v4()
            .output_interface(link.index)
            .gateway(gateway)
            .execute()
            .await
            .context("add default route")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_is_reachable_over_the_host_netlink_socket() -> Result<()> {
        let netlink = DefaultNetlink::new().await?;
        netlink.loopback().await?;
        Ok(())
    }
}
