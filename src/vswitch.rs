//! Open vSwitch adapter
//!
//! Provides:
//! - The [`VSwitch`] capability set shared by both backends
//! - `vsctl`: drives the `ovs-vsctl` command-line tool
//! - `ovsdb`: transactional operations against the switch database
//! - `rpc`: the JSON-RPC session used by the protocol backend
//!
//! A host runs one variant for every device, chosen by configuration.

pub mod ovsdb;
pub mod rpc;
pub mod vsctl;

pub use ovsdb::{Operation, OvsdbSwitch};
pub use vsctl::Vsctl;

use crate::error::Result;
use std::net::IpAddr;

/// `external_ids` key recording a device's global identifier on switch rows
pub const GLOBAL_ID_KEY: &str = "fabric-global-id";

/// Operations the device layer needs from the switch
pub trait VSwitch: Send + Sync {
    /// Create a bridge row tagged with the overlay datapath type and alias
    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()>;

    fn delete_bridge(&self, name: &str) -> Result<()>;

    /// Add an existing host interface as a port of `bridge`
    fn add_port(&self, bridge: &str, port: &str) -> Result<()>;

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()>;

    /// Add a GRE interface, its port, and bridge membership in one transaction
    fn add_gre_port(
        &self,
        bridge: &str,
        port: &str,
        global_id: &str,
        remote_ip: IpAddr,
    ) -> Result<()>;

    fn delete_gre_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.delete_port(bridge, port)
    }

    /// Submit raw database operations as a single transaction
    fn transact(&self, ops: &[Operation]) -> Result<()>;

    /// Names of bridges whose alias is `global_id`, first match first
    fn bridges_by_alias(&self, global_id: &str) -> Result<Vec<String>>;

    /// Names of ports whose alias is `global_id`, first match first
    fn ports_by_alias(&self, global_id: &str) -> Result<Vec<String>>;

    /// Bridge currently holding `port`; `None` if the port is missing or in no bridge
    fn port_bridge(&self, port: &str) -> Result<Option<String>>;

    /// `options:remote_ip` of a GRE interface
    fn gre_remote(&self, port: &str) -> Result<Option<IpAddr>>;
}
