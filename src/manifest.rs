//! Configuration file parsing for fabricnet
//!
//! Parses `fabricnet.toml` configuration files using serde

use crate::error::{Error, Result};
use crate::sdn::{NameGenerator, NetworkMode};
use crate::vswitch::rpc::Endpoint;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fabricnet.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<FabricConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse(&content)
}

/// Load configuration, falling back to defaults if the file does not exist
pub fn load_or_default(path: &Path) -> Result<FabricConfig> {
    match fs::read_to_string(path) {
        Ok(content) => parse(&content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FabricConfig::default()),
        Err(e) => Err(Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parse and validate configuration text
///
/// The mode name is checked on its own first so an unknown mode reports
/// `UnsupportedMode` rather than a generic parse error.
pub fn parse(content: &str) -> Result<FabricConfig> {
    let raw: toml::Table = toml::from_str(content)?;
    if let Some(mode) = raw
        .get("host")
        .and_then(|host| host.get("default_mode"))
        .and_then(|mode| mode.as_str())
    {
        mode.parse::<NetworkMode>()?;
    }

    let config: FabricConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FabricConfig {
    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub switch: SwitchConfig,
}

impl FabricConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        NameGenerator::new(&self.host.name_prefix)?;

        if self.kernel.ip_command.is_empty() {
            return Err(Error::ConfigValidation("kernel.ip_command is empty".into()));
        }

        if self.switch.enabled {
            self.switch.endpoint()?;
            if self.switch.database.is_empty() {
                return Err(Error::ConfigValidation("switch.database is empty".into()));
            }
            if self.switch.datapath_type.is_empty() {
                return Err(Error::ConfigValidation("switch.datapath_type is empty".into()));
            }
        } else if self.host.default_mode == NetworkMode::ManagedSwitch {
            return Err(Error::ConfigValidation(
                "default_mode is managed_switch but the switch is disabled".into(),
            ));
        }

        Ok(())
    }
}

/// Host-wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Mode used when a command does not name one
    #[serde(default = "default_mode")]
    pub default_mode: NetworkMode,

    /// Prefix for generated interface names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            name_prefix: default_name_prefix(),
        }
    }
}

fn default_mode() -> NetworkMode {
    NetworkMode::KernelBridge
}

fn default_name_prefix() -> String {
    "fab".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelConfig {
    /// iproute2 binary
    #[serde(default = "default_ip_command")]
    pub ip_command: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ip_command: default_ip_command(),
        }
    }
}

fn default_ip_command() -> String {
    "ip".to_string()
}

/// Which switch adapter a host runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchBackend {
    /// `ovs-vsctl` invocations
    #[default]
    Cli,
    /// Direct database transactions over JSON-RPC
    Protocol,
}

/// Open vSwitch settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: SwitchBackend,

    #[serde(default = "default_vsctl_command")]
    pub vsctl_command: String,

    #[serde(default = "default_ovsdb_client_command")]
    pub ovsdb_client_command: String,

    /// Database server, `unix:PATH` or `tcp:HOST:PORT`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Datapath implementation tagged on every bridge row
    #[serde(default = "default_datapath_type")]
    pub datapath_type: String,
}

impl SwitchConfig {
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.endpoint.parse()
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: SwitchBackend::default(),
            vsctl_command: default_vsctl_command(),
            ovsdb_client_command: default_ovsdb_client_command(),
            endpoint: default_endpoint(),
            database: default_database(),
            datapath_type: default_datapath_type(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_vsctl_command() -> String {
    "ovs-vsctl".to_string()
}

fn default_ovsdb_client_command() -> String {
    "ovsdb-client".to_string()
}

fn default_endpoint() -> String {
    "unix:/var/run/openvswitch/db.sock".to_string()
}

fn default_database() -> String {
    "Open_vSwitch".to_string()
}

fn default_datapath_type() -> String {
    "netdev".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn test_parse_empty_config() {
        let config: FabricConfig = toml::from_str("").unwrap();
        assert_eq!(config.host.default_mode, NetworkMode::KernelBridge);
        assert_eq!(config.host.name_prefix, "fab");
        assert_eq!(config.kernel.ip_command, "ip");
        assert!(config.switch.enabled);
        assert_eq!(config.switch.backend, SwitchBackend::Cli);
        assert_eq!(config.switch.datapath_type, "netdev");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[host]
default_mode = "managed_switch"
name_prefix = "ovl"

[kernel]
ip_command = "/sbin/ip"

[switch]
backend = "protocol"
endpoint = "tcp:127.0.0.1:6640"
database = "Open_vSwitch"
datapath_type = "system"
"#;

        let config: FabricConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.host.default_mode, NetworkMode::ManagedSwitch);
        assert_eq!(config.switch.backend, SwitchBackend::Protocol);
        assert_eq!(
            config.switch.endpoint().unwrap(),
            Endpoint::Tcp("127.0.0.1:6640".into())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let toml = r#"
[host]
default_mode = "vxlan"
"#;
        let err = parse(toml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMode);
        assert!(err.to_string().contains("vxlan"));
    }

    #[test]
    fn test_mode_spellings_match_command_line() {
        let config = parse("[host]\ndefault_mode = \"managed-switch\"").unwrap();
        assert_eq!(config.host.default_mode, NetworkMode::ManagedSwitch);

        let config = parse("[host]\ndefault_mode = \"kernel-bridge\"").unwrap();
        assert_eq!(config.host.default_mode, NetworkMode::KernelBridge);
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let toml = r#"
[host]
name_prefix = "toolong"
"#;
        let config: FabricConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let toml = r#"
[switch]
endpoint = "ssl:10.0.0.1:6640"
"#;
        let config: FabricConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_switch_mode_needs_switch() {
        let toml = r#"
[host]
default_mode = "managed_switch"

[switch]
enabled = false
"#;
        let config: FabricConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[kernel]\nip_command = \"/usr/sbin/ip\"").unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.kernel.ip_command, "/usr/sbin/ip");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("fabricnet.toml")).unwrap();
        assert_eq!(config.host.name_prefix, "fab");

        let err = load(&dir.path().join("fabricnet.toml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[host\nname_prefix = 1").unwrap();

        let err = load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
