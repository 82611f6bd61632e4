//! Tenant bridge management
//!
//! Provides:
//! - Association of a handle with a global identifier (no backend access)
//! - Recovery of an existing bridge by alias
//! - Creation and destruction of the bridge device
//! - Admin up/down and IP address management

use super::ident::{first_match, validate_local_name, DeviceClass};
use super::state::{DeviceState, Lifecycle};
use super::{Backend, NetworkMode};
use crate::error::{DeviceRef, Error, Result};
use ipnet::IpNet;
use tracing::info;

/// One tenant network's layer-2 segment on this host
#[derive(Debug)]
pub struct Bridge {
    /// Cluster-wide identifier, recorded as the device alias
    global_id: String,
    /// Host-local interface name (e.g., "fabb1a2b3c4d")
    local_name: Option<String>,
    backend: Backend,
    lifecycle: Lifecycle,
}

impl Bridge {
    /// Build a handle for `global_id` without touching the backend
    pub fn associate(global_id: &str, backend: Backend) -> Result<Self> {
        if global_id.is_empty() {
            return Err(Error::InvalidArgument("empty global identifier".into())
                .on_device(DeviceRef::new(global_id, None), "associate"));
        }

        Ok(Self {
            global_id: global_id.to_string(),
            local_name: None,
            backend,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Use a caller-chosen local name instead of a generated one
    pub fn with_local_name(mut self, name: &str) -> Result<Self> {
        validate_local_name(name).map_err(|e| e.on_device(self.device(), "associate"))?;
        self.local_name = Some(name.to_string());
        Ok(self)
    }

    /// Bind to the existing bridge aliased `global_id`
    ///
    /// If several bridges carry the alias, the first one the backend reports
    /// is bound.
    pub fn resolve(global_id: &str, backend: Backend) -> Result<Self> {
        let mut bridge = Self::associate(global_id, backend)?;

        let found = bridge
            .backend
            .driver()
            .find_bridges(global_id)
            .map_err(|e| e.on_device(bridge.device(), "resolve"))?;
        let name = first_match(global_id, found).ok_or_else(|| {
            Error::NotFound("no bridge carries this alias".into())
                .on_device(bridge.device(), "resolve")
        })?;

        bridge.local_name = Some(name);
        bridge
            .lifecycle
            .bind()
            .map_err(|e| e.on_device(bridge.device(), "resolve"))?;
        Ok(bridge)
    }

    pub fn global_id(&self) -> &str {
        &self.global_id
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
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

    pub(crate) fn device(&self) -> DeviceRef {
        DeviceRef::new(&self.global_id, self.local_name.as_deref())
    }

    /// Local name of a bound bridge, or `NotBound`
    pub(crate) fn bound_name(&self, op: &'static str) -> Result<&str> {
        match self.local_name.as_deref() {
            Some(name) if self.is_bound() => Ok(name),
            _ => Err(Error::NotBound.on_device(self.device(), op)),
        }
    }

    /// Create the bridge device and bind this handle to it
    pub fn create(&mut self) -> Result<()> {
        self.try_create().map_err(|e| e.on_device(self.device(), "create"))
    }

    fn try_create(&mut self) -> Result<()> {
        if self.global_id.is_empty() {
            return Err(Error::InvalidArgument("empty global identifier".into()));
        }
        match self.state() {
            DeviceState::Unbound => {}
            DeviceState::Destroyed => {
                return Err(Error::InvalidArgument("bridge was destroyed".into()));
            }
            _ => return Err(Error::AlreadyExists("handle is already bound".into())),
        }

        let driver = self.backend.driver();
        let name = match self.local_name.clone() {
            Some(name) => name,
            None => {
                let name = self
                    .backend
                    .names()
                    .generate(DeviceClass::Bridge, &self.global_id, |n| driver.name_taken(n))?;
                self.local_name = Some(name.clone());
                name
            }
        };

        let existing = driver.find_bridges(&self.global_id)?;
        if !existing.is_empty() {
            return Err(Error::AlreadyExists(format!(
                "alias already used by {}",
                existing.join(", ")
            )));
        }

        driver.create_bridge(&name, &self.global_id)?;
        self.lifecycle.bind()?;

        info!(global_id = %self.global_id, bridge = %name, mode = %self.mode(), "bridge created");
        Ok(())
    }

    /// Destroy the bridge device
    ///
    /// On failure the handle stays bound. Attached ports are not checked.
    pub fn destroy(&mut self) -> Result<()> {
        let name = self.bound_name("destroy")?.to_string();

        self.backend
            .driver()
            .destroy_bridge(&name)
            .map_err(|e| e.on_device(self.device(), "destroy"))?;
        self.lifecycle
            .destroy()
            .map_err(|e| e.on_device(self.device(), "destroy"))?;

        info!(global_id = %self.global_id, bridge = %name, "bridge destroyed");
        Ok(())
    }

    /// Bring the bridge administratively up
    pub fn enable(&mut self) -> Result<()> {
        self.set_up(true, "enable")
    }

    /// Bring the bridge administratively down
    pub fn disable(&mut self) -> Result<()> {
        self.set_up(false, "disable")
    }

    fn set_up(&mut self, up: bool, op: &'static str) -> Result<()> {
        let name = self.bound_name(op)?.to_string();

        self.backend
            .driver()
            .set_bridge_up(&name, up)
            .map_err(|e| e.on_device(self.device(), op))?;

        let transition = if up {
            self.lifecycle.enable()
        } else {
            self.lifecycle.disable()
        };
        transition.map_err(|e| e.on_device(self.device(), op))
    }

    /// Add one address to the bridge interface
    ///
    /// Not idempotent: adding an address twice surfaces the backend's error.
    pub fn add_ip(&mut self, addr: &IpNet) -> Result<()> {
        let name = self.bound_name("add_ip")?;

        self.backend
            .driver()
            .add_address(name, addr)
            .map_err(|e| e.on_device(self.device(), "add_ip"))?;
        info!(bridge = name, %addr, "address added");
        Ok(())
    }

    /// Remove one address from the bridge interface
    pub fn del_ip(&mut self, addr: &IpNet) -> Result<()> {
        let name = self.bound_name("del_ip")?;

        self.backend
            .driver()
            .del_address(name, addr)
            .map_err(|e| e.on_device(self.device(), "del_ip"))?;
        info!(bridge = name, %addr, "address removed");
        Ok(())
    }
}
