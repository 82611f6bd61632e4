//! In-memory stand-ins for the host: command runner, kernel links, switch
//! database and JSON-RPC session

use crate::error::{Error, Result};
use crate::exec::{render, CommandOutput, CommandRunner};
use crate::kernel::{LinkInfo, LinkKind, LinkOps};
use crate::sdn::{Backend, KernelDriver, NameGenerator, SwitchDriver};
use crate::vswitch::rpc::Channel;
use crate::vswitch::{Operation, VSwitch};
use ipnet::IpNet;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

pub fn kernel_backend(links: Arc<FakeLinks>) -> Backend {
    Backend::new(Arc::new(KernelDriver::new(links)), NameGenerator::default())
}

pub fn switch_backend(switch: Arc<FakeSwitch>, links: Arc<FakeLinks>) -> Backend {
    Backend::new(
        Arc::new(SwitchDriver::new(switch, links)),
        NameGenerator::default(),
    )
}

/// Replays queued outputs; an empty queue answers with success
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, stdout: &str) {
        self.outputs.lock().unwrap().push_back(CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
    }

    pub fn push_fail(&self, code: i32, stderr: &str) {
        self.outputs.lock().unwrap().push_back(CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
    }

    /// Rendered command lines, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(render(program, args));
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            }))
    }
}

#[derive(Debug, Clone)]
struct FakeLink {
    info: LinkInfo,
    addresses: Vec<IpNet>,
}

#[derive(Default)]
struct LinkTable {
    links: Vec<FakeLink>,
    next_index: u32,
    failing: HashSet<String>,
}

impl LinkTable {
    fn check(&self, op: &str) -> Result<()> {
        if self.failing.contains(op) {
            return Err(Error::Backend(format!("injected failure in {}", op)));
        }
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut FakeLink> {
        self.links
            .iter_mut()
            .find(|l| l.info.name == name)
            .ok_or_else(|| Error::Backend(format!("Cannot find device \"{}\"", name)))
    }

    fn insert(&mut self, name: &str, kind: LinkKind) -> Result<()> {
        if self.links.iter().any(|l| l.info.name == name) {
            return Err(Error::Backend("RTNETLINK answers: File exists".into()));
        }
        self.next_index += 1;
        self.links.push(FakeLink {
            info: LinkInfo {
                index: self.next_index,
                name: name.to_string(),
                kind,
                alias: None,
                master: None,
                up: false,
                local: None,
                remote: None,
            },
            addresses: Vec::new(),
        });
        Ok(())
    }
}

/// Kernel links held in memory, enumerated in creation order
#[derive(Default)]
pub struct FakeLinks {
    table: Mutex<LinkTable>,
}

impl FakeLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail
    pub fn fail_on(&self, op: &str) {
        self.table.lock().unwrap().failing.insert(op.to_string());
    }

    /// Seed a link as if something else created it
    pub fn add_link(&self, name: &str, kind: LinkKind, alias: Option<&str>) {
        let mut table = self.table.lock().unwrap();
        table.insert(name, kind).unwrap();
        table.get_mut(name).unwrap().info.alias = alias.map(str::to_string);
    }

    pub fn addresses(&self, name: &str) -> Vec<IpNet> {
        let table = self.table.lock().unwrap();
        table
            .links
            .iter()
            .find(|l| l.info.name == name)
            .map(|l| l.addresses.clone())
            .unwrap_or_default()
    }
}

impl LinkOps for FakeLinks {
    fn links(&self) -> Result<Vec<LinkInfo>> {
        let table = self.table.lock().unwrap();
        table.check("links")?;
        Ok(table.links.iter().map(|l| l.info.clone()).collect())
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("add_bridge")?;
        table.insert(name, LinkKind::Bridge)
    }

    fn add_gretap(&self, name: &str, local: IpAddr, remote: IpAddr) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("add_gretap")?;
        table.insert(name, LinkKind::GreTap)?;
        let link = table.get_mut(name)?;
        link.info.local = Some(local);
        link.info.remote = Some(remote);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("delete")?;
        table.get_mut(name)?;
        table.links.retain(|l| l.info.name != name);
        for link in &mut table.links {
            if link.info.master.as_deref() == Some(name) {
                link.info.master = None;
            }
        }
        Ok(())
    }

    fn set_up(&self, name: &str, up: bool) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("set_up")?;
        table.get_mut(name)?.info.up = up;
        Ok(())
    }

    fn set_alias(&self, name: &str, alias: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("set_alias")?;
        table.get_mut(name)?.info.alias = Some(alias.to_string());
        Ok(())
    }

    fn set_master(&self, name: &str, master: Option<&str>) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("set_master")?;
        if let Some(master) = master {
            table.get_mut(master)?;
        }
        table.get_mut(name)?.info.master = master.map(str::to_string);
        Ok(())
    }

    fn add_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("add_address")?;
        let link = table.get_mut(name)?;
        if link.addresses.contains(addr) {
            return Err(Error::Backend("RTNETLINK answers: File exists".into()));
        }
        link.addresses.push(*addr);
        Ok(())
    }

    fn del_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.check("del_address")?;
        let link = table.get_mut(name)?;
        let before = link.addresses.len();
        link.addresses.retain(|a| a != addr);
        if link.addresses.len() == before {
            return Err(Error::Backend(
                "RTNETLINK answers: Cannot assign requested address".into(),
            ));
        }
        Ok(())
    }
}

/// Bridge row in [`FakeSwitch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchBridge {
    pub name: String,
    pub global_id: String,
    pub ports: Vec<String>,
}

/// Port row in [`FakeSwitch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPort {
    pub name: String,
    pub global_id: Option<String>,
    pub remote_ip: Option<IpAddr>,
}

#[derive(Default)]
struct SwitchDb {
    bridges: Vec<SwitchBridge>,
    ports: Vec<SwitchPort>,
    failing: HashSet<String>,
}

impl SwitchDb {
    fn check(&self, op: &str) -> Result<()> {
        if self.failing.contains(op) {
            return Err(Error::Backend(format!("injected failure in {}", op)));
        }
        Ok(())
    }

    fn bridge_mut(&mut self, name: &str) -> Result<&mut SwitchBridge> {
        self.bridges
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| Error::Backend(format!("no bridge named {}", name)))
    }
}

/// Switch database held in memory
///
/// Deleting a bridge also drops the port rows it referenced, as the switch
/// database does for rows no longer reachable from the root table. With
/// [`FakeSwitch::with_links`], bridge rows also get an internal interface in
/// the given link table.
#[derive(Default)]
pub struct FakeSwitch {
    db: Mutex<SwitchDb>,
    links: Option<Arc<FakeLinks>>,
}

impl FakeSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: Arc<FakeLinks>) -> Self {
        Self {
            db: Mutex::default(),
            links: Some(links),
        }
    }

    pub fn fail_on(&self, op: &str) {
        self.db.lock().unwrap().failing.insert(op.to_string());
    }

    pub fn bridge(&self, name: &str) -> Option<SwitchBridge> {
        let db = self.db.lock().unwrap();
        db.bridges.iter().find(|b| b.name == name).cloned()
    }

    pub fn port(&self, name: &str) -> Option<SwitchPort> {
        let db = self.db.lock().unwrap();
        db.ports.iter().find(|p| p.name == name).cloned()
    }

    fn insert_port(&self, bridge: &str, port: SwitchPort) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        if db.ports.iter().any(|p| p.name == port.name) {
            return Err(Error::Backend(format!("port {} already exists", port.name)));
        }
        db.bridge_mut(bridge)?.ports.push(port.name.clone());
        db.ports.push(port);
        Ok(())
    }
}

impl VSwitch for FakeSwitch {
    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()> {
        {
            let mut db = self.db.lock().unwrap();
            db.check("create_bridge")?;
            if db.bridges.iter().any(|b| b.name == name) {
                return Err(Error::Backend(format!("bridge {} already exists", name)));
            }
            db.bridges.push(SwitchBridge {
                name: name.to_string(),
                global_id: global_id.to_string(),
                ports: Vec::new(),
            });
        }
        if let Some(links) = &self.links {
            links.add_link(name, LinkKind::Other, None);
        }
        Ok(())
    }

    fn delete_bridge(&self, name: &str) -> Result<()> {
        {
            let mut db = self.db.lock().unwrap();
            db.check("delete_bridge")?;
            let ports = std::mem::take(&mut db.bridge_mut(name)?.ports);
            db.bridges.retain(|b| b.name != name);
            db.ports.retain(|p| !ports.contains(&p.name));
        }
        if let Some(links) = &self.links {
            links.delete(name)?;
        }
        Ok(())
    }

    fn add_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.db.lock().unwrap().check("add_port")?;
        self.insert_port(
            bridge,
            SwitchPort {
                name: port.to_string(),
                global_id: None,
                remote_ip: None,
            },
        )
    }

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        db.check("delete_port")?;
        let owner = db.bridge_mut(bridge)?;
        let before = owner.ports.len();
        owner.ports.retain(|p| p != port);
        if owner.ports.len() == before {
            return Err(Error::Backend(format!(
                "bridge {} does not have a port {}",
                bridge, port
            )));
        }
        db.ports.retain(|p| p.name != port);
        Ok(())
    }

    fn add_gre_port(
        &self,
        bridge: &str,
        port: &str,
        global_id: &str,
        remote_ip: IpAddr,
    ) -> Result<()> {
        self.db.lock().unwrap().check("add_gre_port")?;
        self.insert_port(
            bridge,
            SwitchPort {
                name: port.to_string(),
                global_id: Some(global_id.to_string()),
                remote_ip: Some(remote_ip),
            },
        )
    }

    fn transact(&self, _ops: &[Operation]) -> Result<()> {
        self.db.lock().unwrap().check("transact")
    }

    fn bridges_by_alias(&self, global_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .bridges
            .iter()
            .filter(|b| b.global_id == global_id)
            .map(|b| b.name.clone())
            .collect())
    }

    fn ports_by_alias(&self, global_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .ports
            .iter()
            .filter(|p| p.global_id.as_deref() == Some(global_id))
            .map(|p| p.name.clone())
            .collect())
    }

    fn port_bridge(&self, port: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .bridges
            .iter()
            .find(|b| b.ports.iter().any(|p| p == port))
            .map(|b| b.name.clone()))
    }

    fn gre_remote(&self, port: &str) -> Result<Option<IpAddr>> {
        Ok(self.port(port).and_then(|p| p.remote_ip))
    }
}

#[derive(Default)]
struct ChannelState {
    replies: VecDeque<Value>,
    requests: Vec<(String, Value)>,
}

/// JSON-RPC session answering from a queue; clones share one queue
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, result: Value) {
        self.state.lock().unwrap().replies.push_back(result);
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl Channel for ScriptedChannel {
    fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((method.to_string(), params));
        state.replies.pop_front().ok_or(Error::Disconnected)
    }
}
