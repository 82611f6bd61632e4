//! Host-local SDN devices
//!
//! Provides:
//! - Tenant bridges with address and admin-state management
//! - GRE tunnel endpoints carrying overlay traffic between hosts
//! - VNIC attachment of instance interfaces to tenant bridges
//! - Global identifier to local interface name resolution
//!
//! Every device is bound to one [`Backend`] at association time and
//! delegates to its driver for the rest of its life.

pub mod bridge;
pub mod driver;
pub mod ident;
pub mod state;
pub mod tunnel;
pub mod vnic;

pub use bridge::Bridge;
pub use driver::{KernelDriver, NetDriver, SwitchDriver};
pub use ident::NameGenerator;
pub use tunnel::GreTunnel;
pub use vnic::Vnic;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Backend a device is realised on; fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum NetworkMode {
    /// Native kernel bridge and kernel GRE device
    KernelBridge,
    /// Open vSwitch bridge, port and interface rows
    ManagedSwitch,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::KernelBridge => write!(f, "kernel_bridge"),
            NetworkMode::ManagedSwitch => write!(f, "managed_switch"),
        }
    }
}

impl FromStr for NetworkMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kernel_bridge" | "kernel-bridge" => Ok(NetworkMode::KernelBridge),
            "managed_switch" | "managed-switch" => Ok(NetworkMode::ManagedSwitch),
            other => Err(Error::UnsupportedMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for NetworkMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A driver plus the naming policy for devices created through it
#[derive(Clone)]
pub struct Backend {
    driver: Arc<dyn NetDriver>,
    names: NameGenerator,
}

impl Backend {
    pub fn new(driver: Arc<dyn NetDriver>, names: NameGenerator) -> Self {
        Self { driver, names }
    }

    pub fn mode(&self) -> NetworkMode {
        self.driver.mode()
    }

    pub fn driver(&self) -> &dyn NetDriver {
        self.driver.as_ref()
    }

    pub fn names(&self) -> &NameGenerator {
        &self.names
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("mode", &self.mode())
            .field("names", &self.names)
            .finish()
    }
}
