//! GRE tunnel endpoints
//!
//! A tunnel carries one tenant network's overlay traffic to one remote host
//! and always hangs off a bound [`Bridge`] of the same mode.

use super::bridge::Bridge;
use super::driver::TunnelSpec;
use super::ident::{first_match, validate_local_name, DeviceClass};
use super::state::{DeviceState, Lifecycle};
use super::{Backend, NetworkMode};
use crate::error::{DeviceRef, Error, Result};
use std::net::IpAddr;
use tracing::info;

/// Check a local/remote endpoint pair before any backend call
fn validate_endpoints(local: IpAddr, remote: IpAddr) -> Result<()> {
    if local.is_unspecified() || remote.is_unspecified() {
        return Err(Error::InvalidArgument(format!(
            "tunnel endpoints must be concrete addresses, got {} -> {}",
            local, remote
        )));
    }
    if local.is_ipv4() != remote.is_ipv4() {
        return Err(Error::InvalidArgument(format!(
            "tunnel endpoints {} and {} are of different address families",
            local, remote
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct GreTunnel {
    global_id: String,
    local_name: Option<String>,
    /// Endpoint addresses; on a recovered handle, whatever the backend records
    local_ip: Option<IpAddr>,
    remote_ip: Option<IpAddr>,
    /// Local name of the owning bridge
    bridge_name: Option<String>,
    backend: Backend,
    lifecycle: Lifecycle,
}

impl GreTunnel {
    /// Build a handle for `global_id` without touching the backend
    pub fn associate(
        global_id: &str,
        local_ip: IpAddr,
        remote_ip: IpAddr,
        backend: Backend,
    ) -> Result<Self> {
        let device = DeviceRef::new(global_id, None);
        if global_id.is_empty() {
            return Err(Error::InvalidArgument("empty global identifier".into())
                .on_device(device, "associate"));
        }
        validate_endpoints(local_ip, remote_ip).map_err(|e| e.on_device(device, "associate"))?;

        Ok(Self {
            global_id: global_id.to_string(),
            local_name: None,
            local_ip: Some(local_ip),
            remote_ip: Some(remote_ip),
            bridge_name: None,
            backend,
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn with_local_name(mut self, name: &str) -> Result<Self> {
        validate_local_name(name).map_err(|e| e.on_device(self.device(), "associate"))?;
        self.local_name = Some(name.to_string());
        Ok(self)
    }

    /// Bind to the existing tunnel aliased `global_id`
    pub fn resolve(global_id: &str, backend: Backend) -> Result<Self> {
        let device = DeviceRef::new(global_id, None);
        if global_id.is_empty() {
            return Err(Error::InvalidArgument("empty global identifier".into())
                .on_device(device, "resolve"));
        }

        let found = backend
            .driver()
            .find_tunnels(global_id)
            .map_err(|e| e.on_device(device.clone(), "resolve"))?;
        let found = first_match(global_id, found).ok_or_else(|| {
            Error::NotFound("no tunnel carries this alias".into()).on_device(device, "resolve")
        })?;

        let mut tunnel = Self {
            global_id: global_id.to_string(),
            local_name: Some(found.name),
            local_ip: found.local_ip,
            remote_ip: found.remote_ip,
            bridge_name: found.bridge,
            backend,
            lifecycle: Lifecycle::new(),
        };
        tunnel
            .lifecycle
            .bind()
            .map_err(|e| e.on_device(tunnel.device(), "resolve"))?;
        Ok(tunnel)
    }

    pub fn global_id(&self) -> &str {
        &self.global_id
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }

    /// Local name of the bridge this tunnel is attached under
    pub fn bridge_name(&self) -> Option<&str> {
        self.bridge_name.as_deref()
    }

    pub fn mode(&self) -> NetworkMode {
        self.backend.mode()
    }

    pub fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    pub fn is_bound(&self) -> bool {
        self.lifecycle.is_bound()
    }

    fn device(&self) -> DeviceRef {
        DeviceRef::new(&self.global_id, self.local_name.as_deref())
    }

    /// Create the tunnel device under `bridge` and bind this handle to it
    pub fn create(&mut self, bridge: &Bridge) -> Result<()> {
        self.try_create(bridge)
            .map_err(|e| e.on_device(self.device(), "create"))
    }

    fn try_create(&mut self, bridge: &Bridge) -> Result<()> {
        match self.state() {
            DeviceState::Unbound => {}
            DeviceState::Destroyed => {
                return Err(Error::InvalidArgument("tunnel was destroyed".into()));
            }
            _ => return Err(Error::AlreadyExists("handle is already bound".into())),
        }
        let (Some(local_ip), Some(remote_ip)) = (self.local_ip, self.remote_ip) else {
            return Err(Error::InvalidArgument("tunnel endpoints are not known".into()));
        };

        let bridge_name = bridge.bound_name("create")?.to_string();
        if bridge.mode() != self.mode() {
            return Err(Error::InvalidArgument(format!(
                "bridge '{}' is {} but the tunnel is {}",
                bridge.global_id(),
                bridge.mode(),
                self.mode()
            )));
        }

        let driver = self.backend.driver();
        let name = match self.local_name.clone() {
            Some(name) => name,
            None => {
                let name = self
                    .backend
                    .names()
                    .generate(DeviceClass::Tunnel, &self.global_id, |n| driver.name_taken(n))?;
                self.local_name = Some(name.clone());
                name
            }
        };

        let existing = driver.find_tunnels(&self.global_id)?;
        if let Some(other) = existing.first() {
            return Err(Error::AlreadyExists(format!(
                "tunnel alias already used by {}",
                other.name
            )));
        }

        let spec = TunnelSpec {
            name: &name,
            global_id: &self.global_id,
            local_ip,
            remote_ip,
        };
        driver.create_tunnel(&spec, &bridge_name)?;
        self.lifecycle.bind()?;

        info!(
            global_id = %self.global_id,
            tunnel = %name,
            bridge = %bridge_name,
            %local_ip,
            %remote_ip,
            "tunnel created"
        );
        self.bridge_name = Some(bridge_name);
        Ok(())
    }

    /// Destroy the tunnel device; the handle stays bound on failure
    pub fn destroy(&mut self) -> Result<()> {
        let Some(name) = self.local_name.clone().filter(|_| self.is_bound()) else {
            return Err(Error::NotBound.on_device(self.device(), "destroy"));
        };

        self.backend
            .driver()
            .destroy_tunnel(&name, self.bridge_name.as_deref())
            .map_err(|e| e.on_device(self.device(), "destroy"))?;
        self.lifecycle
            .destroy()
            .map_err(|e| e.on_device(self.device(), "destroy"))?;

        info!(global_id = %self.global_id, tunnel = %name, "tunnel destroyed");
        Ok(())
    }
}
