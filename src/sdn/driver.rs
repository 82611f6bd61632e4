//! Backend drivers for SDN devices
//!
//! [`NetDriver`] is the one interface every device delegates to.
//! [`KernelDriver`] realises devices as kernel links; [`SwitchDriver`]
//! realises them as switch rows, using kernel calls only for the admin
//! state and addresses of the switch's internal bridge interface.

use super::NetworkMode;
use crate::error::{Error, Result};
use crate::kernel::{LinkKind, LinkOps};
use crate::vswitch::VSwitch;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// A tunnel located by alias, with the bridge it hangs off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    pub name: String,
    pub bridge: Option<String>,
    /// Endpoints as far as the backend records them
    pub local_ip: Option<IpAddr>,
    pub remote_ip: Option<IpAddr>,
}

/// Parameters for realising a GRE tunnel endpoint
#[derive(Debug, Clone, Copy)]
pub struct TunnelSpec<'a> {
    pub name: &'a str,
    pub global_id: &'a str,
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
}

pub trait NetDriver: Send + Sync {
    fn mode(&self) -> NetworkMode;

    /// Whether a host-local name is already in use
    fn name_taken(&self, name: &str) -> Result<bool>;

    /// Local names of bridges aliased `global_id`, first match first
    fn find_bridges(&self, global_id: &str) -> Result<Vec<String>>;

    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()>;

    fn destroy_bridge(&self, name: &str) -> Result<()>;

    fn set_bridge_up(&self, name: &str, up: bool) -> Result<()>;

    fn add_address(&self, name: &str, addr: &IpNet) -> Result<()>;

    fn del_address(&self, name: &str, addr: &IpNet) -> Result<()>;

    /// Tunnels aliased `global_id`, first match first
    fn find_tunnels(&self, global_id: &str) -> Result<Vec<Found>>;

    fn create_tunnel(&self, tunnel: &TunnelSpec<'_>, bridge: &str) -> Result<()>;

    fn destroy_tunnel(&self, name: &str, bridge: Option<&str>) -> Result<()>;

    fn attach(&self, bridge: &str, vnic: &str) -> Result<()>;

    fn detach(&self, bridge: &str, vnic: &str) -> Result<()>;

    /// Bridge the VNIC is currently attached to
    fn attached_to(&self, vnic: &str) -> Result<Option<String>>;
}

/// Devices as native kernel links
pub struct KernelDriver {
    links: Arc<dyn LinkOps>,
}

impl KernelDriver {
    pub fn new(links: Arc<dyn LinkOps>) -> Self {
        Self { links }
    }

    /// Tear down a link created earlier in a failed multi-step operation
    fn roll_back(&self, name: &str, cause: Error) -> Error {
        warn!(link = name, error = %cause, "rolling back partially created link");
        match self.links.delete(name) {
            Ok(()) => cause,
            Err(rollback) => Error::Backend(format!(
                "{} (rollback of '{}' also failed: {})",
                cause, name, rollback
            )),
        }
    }
}

impl NetDriver for KernelDriver {
    fn mode(&self) -> NetworkMode {
        NetworkMode::KernelBridge
    }

    fn name_taken(&self, name: &str) -> Result<bool> {
        Ok(self.links.link(name)?.is_some())
    }

    fn find_bridges(&self, global_id: &str) -> Result<Vec<String>> {
        Ok(self
            .links
            .links_by_alias(global_id)?
            .into_iter()
            .filter(|l| l.kind == LinkKind::Bridge)
            .map(|l| l.name)
            .collect())
    }

    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()> {
        self.links.add_bridge(name)?;

        let configured = self
            .links
            .set_up(name, true)
            .and_then(|_| self.links.set_alias(name, global_id));
        configured.map_err(|e| self.roll_back(name, e))
    }

    fn destroy_bridge(&self, name: &str) -> Result<()> {
        self.links.delete(name)
    }

    fn set_bridge_up(&self, name: &str, up: bool) -> Result<()> {
        self.links.set_up(name, up)
    }

    fn add_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        self.links.add_address(name, addr)
    }

    fn del_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        self.links.del_address(name, addr)
    }

    fn find_tunnels(&self, global_id: &str) -> Result<Vec<Found>> {
        Ok(self
            .links
            .links_by_alias(global_id)?
            .into_iter()
            .filter(|l| l.kind == LinkKind::GreTap)
            .map(|l| Found {
                name: l.name,
                bridge: l.master,
                local_ip: l.local,
                remote_ip: l.remote,
            })
            .collect())
    }

    fn create_tunnel(&self, tunnel: &TunnelSpec<'_>, bridge: &str) -> Result<()> {
        self.links
            .add_gretap(tunnel.name, tunnel.local_ip, tunnel.remote_ip)?;

        let configured = self
            .links
            .set_master(tunnel.name, Some(bridge))
            .and_then(|_| self.links.set_alias(tunnel.name, tunnel.global_id))
            .and_then(|_| self.links.set_up(tunnel.name, true));
        configured.map_err(|e| self.roll_back(tunnel.name, e))
    }

    fn destroy_tunnel(&self, name: &str, _bridge: Option<&str>) -> Result<()> {
        self.links.delete(name)
    }

    fn attach(&self, bridge: &str, vnic: &str) -> Result<()> {
        if self.links.link(vnic)?.is_none() {
            return Err(Error::NotFound(format!("interface '{}'", vnic)));
        }
        self.links.set_master(vnic, Some(bridge))
    }

    fn detach(&self, _bridge: &str, vnic: &str) -> Result<()> {
        self.links.set_master(vnic, None)
    }

    fn attached_to(&self, vnic: &str) -> Result<Option<String>> {
        Ok(self.links.link(vnic)?.and_then(|l| l.master))
    }
}

/// Devices as Open vSwitch rows
pub struct SwitchDriver {
    switch: Arc<dyn VSwitch>,
    links: Arc<dyn LinkOps>,
}

impl SwitchDriver {
    pub fn new(switch: Arc<dyn VSwitch>, links: Arc<dyn LinkOps>) -> Self {
        Self { switch, links }
    }
}

impl NetDriver for SwitchDriver {
    fn mode(&self) -> NetworkMode {
        NetworkMode::ManagedSwitch
    }

    fn name_taken(&self, name: &str) -> Result<bool> {
        // Switch ports and kernel links share one namespace on the host
        Ok(self.links.link(name)?.is_some() || self.switch.port_bridge(name)?.is_some())
    }

    fn find_bridges(&self, global_id: &str) -> Result<Vec<String>> {
        self.switch.bridges_by_alias(global_id)
    }

    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()> {
        self.switch.create_bridge(name, global_id)
    }

    fn destroy_bridge(&self, name: &str) -> Result<()> {
        self.switch.delete_bridge(name)
    }

    fn set_bridge_up(&self, name: &str, up: bool) -> Result<()> {
        self.links.set_up(name, up)
    }

    fn add_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        self.links.add_address(name, addr)
    }

    fn del_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        self.links.del_address(name, addr)
    }

    fn find_tunnels(&self, global_id: &str) -> Result<Vec<Found>> {
        // The switch picks the source address from routing; only the remote is stored
        let mut found = Vec::new();
        for name in self.switch.ports_by_alias(global_id)? {
            found.push(Found {
                bridge: self.switch.port_bridge(&name)?,
                remote_ip: self.switch.gre_remote(&name)?,
                local_ip: None,
                name,
            });
        }
        Ok(found)
    }

    fn create_tunnel(&self, tunnel: &TunnelSpec<'_>, bridge: &str) -> Result<()> {
        debug!(
            port = tunnel.name,
            bridge,
            local = %tunnel.local_ip,
            remote = %tunnel.remote_ip,
            "adding gre port"
        );
        self.switch
            .add_gre_port(bridge, tunnel.name, tunnel.global_id, tunnel.remote_ip)
    }

    fn destroy_tunnel(&self, name: &str, bridge: Option<&str>) -> Result<()> {
        let bridge = match bridge {
            Some(bridge) => bridge.to_string(),
            None => self
                .switch
                .port_bridge(name)?
                .ok_or_else(|| Error::NotFound(format!("port '{}'", name)))?,
        };
        self.switch.delete_gre_port(&bridge, name)
    }

    fn attach(&self, bridge: &str, vnic: &str) -> Result<()> {
        self.switch.add_port(bridge, vnic)
    }

    fn detach(&self, bridge: &str, vnic: &str) -> Result<()> {
        self.switch.delete_port(bridge, vnic)
    }

    fn attached_to(&self, vnic: &str) -> Result<Option<String>> {
        self.switch.port_bridge(vnic)
    }
}
