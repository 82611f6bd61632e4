//! Instance interface attachment

use super::bridge::Bridge;
use super::ident::validate_local_name;
use super::{Backend, NetworkMode};
use crate::error::{DeviceRef, Error, Result};
use tracing::info;

/// A compute instance's interface, attached to at most one tenant bridge
#[derive(Debug)]
pub struct Vnic {
    local_name: String,
    backend: Backend,
}

impl Vnic {
    pub fn new(local_name: &str, backend: Backend) -> Result<Self> {
        validate_local_name(local_name)
            .map_err(|e| e.on_device(DeviceRef::new(local_name, Some(local_name)), "associate"))?;

        Ok(Self {
            local_name: local_name.to_string(),
            backend,
        })
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn mode(&self) -> NetworkMode {
        self.backend.mode()
    }

    fn device(&self) -> DeviceRef {
        DeviceRef::new(&self.local_name, Some(&self.local_name))
    }

    /// Local name of the bridge the interface is attached to right now
    pub fn attached_to(&self) -> Result<Option<String>> {
        self.backend
            .driver()
            .attached_to(&self.local_name)
            .map_err(|e| e.on_device(self.device(), "attached_to"))
    }

    /// Attach to a bound bridge of the same mode
    pub fn attach(&mut self, bridge: &Bridge) -> Result<()> {
        let bridge_name = self
            .target(bridge, "attach")
            .map_err(|e| e.on_device(self.device(), "attach"))?;

        self.backend
            .driver()
            .attach(&bridge_name, &self.local_name)
            .map_err(|e| e.on_device(self.device(), "attach"))?;

        info!(vnic = %self.local_name, bridge = %bridge_name, "vnic attached");
        Ok(())
    }

    /// Detach from `bridge`
    ///
    /// Fails with `NotFound` when the interface is not attached to that
    /// bridge, including when it was already detached.
    pub fn detach(&mut self, bridge: &Bridge) -> Result<()> {
        let bridge_name = self
            .target(bridge, "detach")
            .map_err(|e| e.on_device(self.device(), "detach"))?;

        let current = self.attached_to()?;
        if current.as_deref() != Some(bridge_name.as_str()) {
            let detail = match current {
                Some(other) => format!("interface is attached to '{}', not '{}'", other, bridge_name),
                None => format!("interface is not attached to '{}'", bridge_name),
            };
            return Err(Error::NotFound(detail).on_device(self.device(), "detach"));
        }

        self.backend
            .driver()
            .detach(&bridge_name, &self.local_name)
            .map_err(|e| e.on_device(self.device(), "detach"))?;

        info!(vnic = %self.local_name, bridge = %bridge_name, "vnic detached");
        Ok(())
    }

    fn target(&self, bridge: &Bridge, op: &'static str) -> Result<String> {
        let name = bridge.bound_name(op)?;
        if bridge.mode() != self.mode() {
            return Err(Error::InvalidArgument(format!(
                "bridge '{}' is {} but the interface is managed as {}",
                bridge.global_id(),
                bridge.mode(),
                self.mode()
            )));
        }
        Ok(name.to_string())
    }
}
