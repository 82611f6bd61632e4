//! Host context
//!
//! Builds one driver per [`NetworkMode`] from configuration at startup and
//! hands out device handles bound to the right backend. Requests for a mode
//! the host has no driver for fail with `UnsupportedMode`.

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::kernel::{IpRoute, LinkOps};
use crate::manifest::{FabricConfig, SwitchBackend};
use crate::sdn::{
    Backend, Bridge, GreTunnel, KernelDriver, NameGenerator, NetworkMode, SwitchDriver, Vnic,
};
use crate::vswitch::{rpc, OvsdbSwitch, VSwitch, Vsctl};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct Fabric {
    default_mode: NetworkMode,
    kernel: Option<Backend>,
    switch: Option<Backend>,
}

impl Fabric {
    /// A host with no drivers registered yet
    pub fn new(default_mode: NetworkMode) -> Self {
        Self {
            default_mode,
            kernel: None,
            switch: None,
        }
    }

    /// Register `backend` for the mode it implements
    pub fn with_backend(mut self, backend: Backend) -> Self {
        match backend.mode() {
            NetworkMode::KernelBridge => self.kernel = Some(backend),
            NetworkMode::ManagedSwitch => self.switch = Some(backend),
        }
        self
    }

    /// Build the host's drivers from configuration
    ///
    /// The protocol variant opens its database session here; it lives as long
    /// as the returned value and is not re-established if it drops.
    pub fn from_config(config: &FabricConfig) -> Result<Self> {
        let names = NameGenerator::new(&config.host.name_prefix)?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let links: Arc<dyn LinkOps> =
            Arc::new(IpRoute::new(runner.clone(), config.kernel.ip_command.clone()));

        let mut fabric = Self::new(config.host.default_mode).with_backend(Backend::new(
            Arc::new(KernelDriver::new(links.clone())),
            names.clone(),
        ));

        let switch = &config.switch;
        if switch.enabled {
            let adapter: Arc<dyn VSwitch> = match switch.backend {
                SwitchBackend::Cli => Arc::new(
                    Vsctl::new(runner)
                        .with_commands(&switch.vsctl_command, &switch.ovsdb_client_command)
                        .with_database(&switch.endpoint, &switch.database)
                        .with_datapath_type(&switch.datapath_type),
                ),
                SwitchBackend::Protocol => {
                    let session = rpc::connect(&switch.endpoint()?)?;
                    Arc::new(OvsdbSwitch::new(
                        session,
                        switch.database.clone(),
                        switch.datapath_type.clone(),
                    ))
                }
            };
            debug!(backend = ?switch.backend, "switch adapter ready");
            fabric = fabric.with_backend(Backend::new(
                Arc::new(SwitchDriver::new(adapter, links)),
                names,
            ));
        }

        Ok(fabric)
    }

    /// Parse a requested mode name, or fall back to the host default
    pub fn mode(&self, requested: Option<&str>) -> Result<NetworkMode> {
        match requested {
            Some(name) => name.parse(),
            None => Ok(self.default_mode),
        }
    }

    pub fn backend(&self, mode: NetworkMode) -> Result<Backend> {
        let backend = match mode {
            NetworkMode::KernelBridge => &self.kernel,
            NetworkMode::ManagedSwitch => &self.switch,
        };
        backend
            .clone()
            .ok_or_else(|| Error::UnsupportedMode(format!("{} (no driver on this host)", mode)))
    }

    pub fn bridge(&self, global_id: &str, mode: NetworkMode) -> Result<Bridge> {
        Bridge::associate(global_id, self.backend(mode)?)
    }

    pub fn resolve_bridge(&self, global_id: &str, mode: NetworkMode) -> Result<Bridge> {
        Bridge::resolve(global_id, self.backend(mode)?)
    }

    pub fn tunnel(
        &self,
        global_id: &str,
        local_ip: IpAddr,
        remote_ip: IpAddr,
        mode: NetworkMode,
    ) -> Result<GreTunnel> {
        GreTunnel::associate(global_id, local_ip, remote_ip, self.backend(mode)?)
    }

    pub fn resolve_tunnel(&self, global_id: &str, mode: NetworkMode) -> Result<GreTunnel> {
        GreTunnel::resolve(global_id, self.backend(mode)?)
    }

    pub fn vnic(&self, local_name: &str, mode: NetworkMode) -> Result<Vnic> {
        Vnic::new(local_name, self.backend(mode)?)
    }
}
