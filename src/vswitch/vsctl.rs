//! `ovs-vsctl` backend
//!
//! Each request becomes one invocation of the control tool. A non-zero exit
//! status is the only failure signal; output is not parsed for error detail.

use super::ovsdb::Operation;
use super::{VSwitch, GLOBAL_ID_KEY};
use crate::error::Result;
use crate::exec::{args, CommandRunner};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// [`VSwitch`] over the `ovs-vsctl` / `ovsdb-client` tools
pub struct Vsctl {
    runner: Arc<dyn CommandRunner>,
    vsctl: String,
    ovsdb_client: String,
    endpoint: String,
    database: String,
    datapath_type: String,
}

impl Vsctl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            vsctl: "ovs-vsctl".into(),
            ovsdb_client: "ovsdb-client".into(),
            endpoint: "unix:/var/run/openvswitch/db.sock".into(),
            database: "Open_vSwitch".into(),
            datapath_type: "netdev".into(),
        }
    }

    pub fn with_commands(mut self, vsctl: &str, ovsdb_client: &str) -> Self {
        self.vsctl = vsctl.to_string();
        self.ovsdb_client = ovsdb_client.to_string();
        self
    }

    pub fn with_database(mut self, endpoint: &str, database: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self.database = database.to_string();
        self
    }

    pub fn with_datapath_type(mut self, datapath_type: &str) -> Self {
        self.datapath_type = datapath_type.to_string();
        self
    }

    fn vsctl(&self, argv: Vec<String>) -> Result<String> {
        debug!(command = %crate::exec::render(&self.vsctl, &argv), "vsctl");
        let output = self.runner.run(&self.vsctl, &argv)?;
        Ok(output.check(&self.vsctl, &argv)?.stdout)
    }

    /// `--bare --columns=COLUMN find TABLE CONDITION`, one value per line
    fn find_column(&self, table: &str, column: &str, condition: String) -> Result<Vec<String>> {
        let columns = format!("--columns={}", column);
        let stdout = self.vsctl(args(["--bare", &columns, "find", table, &condition]))?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn find_names(&self, table: &str, condition: String) -> Result<Vec<String>> {
        self.find_column(table, "name", condition)
    }
}

/// Quote a string as a database atom
fn atom(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn alias_condition(global_id: &str) -> String {
    format!("external_ids:{}={}", GLOBAL_ID_KEY, atom(global_id))
}

impl VSwitch for Vsctl {
    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()> {
        let datapath = format!("datapath_type={}", self.datapath_type);
        let alias = alias_condition(global_id);
        self.vsctl(args([
            "add-br", name, "--", "set", "bridge", name, &datapath, &alias,
        ]))?;
        Ok(())
    }

    fn delete_bridge(&self, name: &str) -> Result<()> {
        self.vsctl(args(["del-br", name]))?;
        Ok(())
    }

    fn add_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.vsctl(args(["add-port", bridge, port]))?;
        Ok(())
    }

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.vsctl(args(["del-port", bridge, port]))?;
        Ok(())
    }

    fn add_gre_port(
        &self,
        bridge: &str,
        port: &str,
        global_id: &str,
        remote_ip: IpAddr,
    ) -> Result<()> {
        let remote = format!("options:remote_ip={}", remote_ip);
        let alias = alias_condition(global_id);
        self.vsctl(args([
            "add-port", bridge, port, "--", "set", "interface", port, "type=gre", &remote, "--",
            "set", "port", port, &alias,
        ]))?;
        Ok(())
    }

    fn transact(&self, ops: &[Operation]) -> Result<()> {
        let mut request = vec![Value::String(self.database.clone())];
        for op in ops {
            request.push(serde_json::to_value(op)?);
        }
        let request = Value::Array(request).to_string();

        let argv = args(["transact", &self.endpoint, &request]);
        debug!(operations = ops.len(), "ovsdb-client transact");
        self.runner
            .run(&self.ovsdb_client, &argv)?
            .check(&self.ovsdb_client, &argv)?;
        Ok(())
    }

    fn bridges_by_alias(&self, global_id: &str) -> Result<Vec<String>> {
        self.find_names("Bridge", alias_condition(global_id))
    }

    fn ports_by_alias(&self, global_id: &str) -> Result<Vec<String>> {
        self.find_names("Port", alias_condition(global_id))
    }

    fn port_bridge(&self, port: &str) -> Result<Option<String>> {
        let ids = self.find_column("Port", "_uuid", format!("name={}", atom(port)))?;
        let Some(id) = ids.first() else {
            return Ok(None);
        };
        let bridges = self.find_names("Bridge", format!("ports{{>=}}{}", id))?;
        Ok(bridges.into_iter().next())
    }

    fn gre_remote(&self, port: &str) -> Result<Option<IpAddr>> {
        let stdout = self.vsctl(args([
            "--if-exists", "get", "interface", port, "options:remote_ip",
        ]))?;
        Ok(stdout.trim().trim_matches('"').parse().ok())
    }
}
