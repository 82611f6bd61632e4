//! Kernel link management
//!
//! Provides:
//! - The [`LinkOps`] capability: link create/delete, up/down, alias, master,
//!   address add/delete, and enumeration in kernel index order
//! - [`IpRoute`], an implementation driving iproute2 and parsing its JSON output

use crate::error::{Error, Result};
use crate::exec::{args, CommandRunner};
use ipnet::IpNet;
use serde::Deserialize;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Kind of kernel link, as reported by `linkinfo.info_kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    GreTap,
    Other,
}

impl LinkKind {
    fn from_info_kind(kind: Option<&str>) -> Self {
        match kind {
            Some("bridge") => LinkKind::Bridge,
            Some("gretap") | Some("ip6gretap") => LinkKind::GreTap,
            _ => LinkKind::Other,
        }
    }
}

/// Snapshot of one kernel link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub name: String,
    pub kind: LinkKind,
    pub alias: Option<String>,
    pub master: Option<String>,
    pub up: bool,
    /// Tunnel endpoints from `linkinfo.info_data`, for GRE links
    pub local: Option<IpAddr>,
    pub remote: Option<IpAddr>,
}

/// Host networking primitives addressed by interface name
pub trait LinkOps: Send + Sync {
    /// All links, in kernel index order
    fn links(&self) -> Result<Vec<LinkInfo>>;

    fn add_bridge(&self, name: &str) -> Result<()>;

    fn add_gretap(&self, name: &str, local: IpAddr, remote: IpAddr) -> Result<()>;

    fn delete(&self, name: &str) -> Result<()>;

    fn set_up(&self, name: &str, up: bool) -> Result<()>;

    fn set_alias(&self, name: &str, alias: &str) -> Result<()>;

    /// Enslave `name` to `master`, or release it with `None`
    fn set_master(&self, name: &str, master: Option<&str>) -> Result<()>;

    fn add_address(&self, name: &str, addr: &IpNet) -> Result<()>;

    fn del_address(&self, name: &str, addr: &IpNet) -> Result<()>;

    fn link(&self, name: &str) -> Result<Option<LinkInfo>> {
        Ok(self.links()?.into_iter().find(|l| l.name == name))
    }

    /// Links carrying `alias`, first match first
    fn links_by_alias(&self, alias: &str) -> Result<Vec<LinkInfo>> {
        Ok(self
            .links()?
            .into_iter()
            .filter(|l| l.alias.as_deref() == Some(alias))
            .collect())
    }
}

/// Link as printed by `ip -d -j link show`
#[derive(Debug, Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    ifalias: Option<String>,
    master: Option<String>,
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    info_kind: Option<String>,
    info_data: Option<IpTunnelData>,
}

/// The endpoint fields of `info_data`; other kinds carry unrelated keys
#[derive(Debug, Default, Deserialize)]
struct IpTunnelData {
    local: Option<Value>,
    remote: Option<Value>,
}

/// iproute2 prints `any` for an unset endpoint
fn endpoint(addr: Option<&Value>) -> Option<IpAddr> {
    addr.and_then(Value::as_str).and_then(|a| a.parse().ok())
}

impl From<IpLink> for LinkInfo {
    fn from(link: IpLink) -> Self {
        let kind = LinkKind::from_info_kind(
            link.linkinfo.as_ref().and_then(|i| i.info_kind.as_deref()),
        );
        let data = link.linkinfo.as_ref().and_then(|i| i.info_data.as_ref());
        let (local, remote) = match (kind, data) {
            (LinkKind::GreTap, Some(data)) => {
                (endpoint(data.local.as_ref()), endpoint(data.remote.as_ref()))
            }
            _ => (None, None),
        };
        Self {
            index: link.ifindex,
            up: link.flags.iter().any(|f| f == "UP"),
            name: link.ifname,
            kind,
            alias: link.ifalias.filter(|a| !a.is_empty()),
            master: link.master,
            local,
            remote,
        }
    }
}

/// Parse the JSON array printed by `ip -d -j link show`
fn parse_links(json: &str) -> Result<Vec<LinkInfo>> {
    let mut links: Vec<LinkInfo> = serde_json::from_str::<Vec<IpLink>>(json)?
        .into_iter()
        .map(LinkInfo::from)
        .collect();
    links.sort_by_key(|l| l.index);
    Ok(links)
}

/// [`LinkOps`] over the iproute2 `ip` tool
pub struct IpRoute {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl IpRoute {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    fn ip(&self, argv: Vec<String>) -> Result<String> {
        let output = self.runner.run(&self.program, &argv)?;
        Ok(output.check(&self.program, &argv)?.stdout)
    }
}

impl LinkOps for IpRoute {
    fn links(&self) -> Result<Vec<LinkInfo>> {
        let stdout = self.ip(args(["-d", "-j", "link", "show"]))?;
        parse_links(&stdout)
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        debug!(link = name, "adding bridge link");
        self.ip(args(["link", "add", "name", name, "type", "bridge"]))?;
        Ok(())
    }

    fn add_gretap(&self, name: &str, local: IpAddr, remote: IpAddr) -> Result<()> {
        let kind = match (local, remote) {
            (IpAddr::V4(_), IpAddr::V4(_)) => "gretap",
            (IpAddr::V6(_), IpAddr::V6(_)) => "ip6gretap",
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "tunnel endpoints {} and {} are of different address families",
                    local, remote
                )));
            }
        };

        debug!(link = name, %local, %remote, "adding {} link", kind);
        let local = local.to_string();
        let remote = remote.to_string();
        self.ip(args([
            "link", "add", "name", name, "type", kind, "local", &local, "remote", &remote,
        ]))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.ip(args(["link", "del", "dev", name]))?;
        Ok(())
    }

    fn set_up(&self, name: &str, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        self.ip(args(["link", "set", "dev", name, state]))?;
        Ok(())
    }

    fn set_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.ip(args(["link", "set", "dev", name, "alias", alias]))?;
        Ok(())
    }

    fn set_master(&self, name: &str, master: Option<&str>) -> Result<()> {
        match master {
            Some(master) => self.ip(args(["link", "set", "dev", name, "master", master]))?,
            None => self.ip(args(["link", "set", "dev", name, "nomaster"]))?,
        };
        Ok(())
    }

    fn add_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        let addr = addr.to_string();
        self.ip(args(["addr", "add", &addr, "dev", name]))?;
        Ok(())
    }

    fn del_address(&self, name: &str, addr: &IpNet) -> Result<()> {
        let addr = addr.to_string();
        self.ip(args(["addr", "del", &addr, "dev", name]))?;
        Ok(())
    }
}
