//! Command-line interface for fabricnet
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::PathBuf;

/// fabricnet - host-side SDN device manager
#[derive(Parser)]
#[command(name = "fabricnet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path; must exist when given [default: /etc/fabricnet.toml]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Network mode (kernel_bridge or managed_switch); defaults to the host setting
    #[arg(long, global = true)]
    pub mode: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Manage tenant bridges
    Bridge {
        #[command(subcommand)]
        action: BridgeAction,
    },

    /// Manage GRE tunnel endpoints
    Tunnel {
        #[command(subcommand)]
        action: TunnelAction,
    },

    /// Attach instance interfaces to bridges
    Vnic {
        #[command(subcommand)]
        action: VnicAction,
    },

    /// Validate configuration
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Actions for the bridge command
#[derive(Subcommand)]
pub enum BridgeAction {
    /// Create a bridge for a tenant network
    Create {
        /// Cluster-wide identifier of the network
        global_id: String,

        /// Interface name to use instead of a generated one
        #[arg(long)]
        local_name: Option<String>,
    },

    /// Destroy a bridge
    Destroy {
        global_id: String,
    },

    /// Bring a bridge up
    Enable {
        global_id: String,
    },

    /// Bring a bridge down
    Disable {
        global_id: String,
    },

    /// Add an address to a bridge (e.g., 192.168.10.1/24)
    AddIp {
        global_id: String,
        addr: IpNet,
    },

    /// Remove an address from a bridge
    DelIp {
        global_id: String,
        addr: IpNet,
    },

    /// Show the bridge bound to a global identifier
    Show {
        global_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Actions for the tunnel command
#[derive(Subcommand)]
pub enum TunnelAction {
    /// Create a tunnel under an existing bridge
    Create {
        /// Cluster-wide identifier of the tunnel
        global_id: String,

        /// Global identifier of the owning bridge
        #[arg(long)]
        bridge: String,

        /// Local endpoint address
        #[arg(long)]
        local: IpAddr,

        /// Remote endpoint address
        #[arg(long)]
        remote: IpAddr,

        /// Interface name to use instead of a generated one
        #[arg(long)]
        local_name: Option<String>,
    },

    /// Destroy a tunnel
    Destroy {
        global_id: String,
    },

    /// Show the tunnel bound to a global identifier
    Show {
        global_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Actions for the vnic command
#[derive(Subcommand)]
pub enum VnicAction {
    /// Attach an interface to a bridge
    Attach {
        /// Host interface name of the VNIC
        name: String,

        /// Global identifier of the bridge
        #[arg(long)]
        bridge: String,
    },

    /// Detach an interface from a bridge
    Detach {
        name: String,

        #[arg(long)]
        bridge: String,
    },

    /// Show which bridge an interface is attached to
    Show {
        name: String,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "fabricnet", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tunnel_create() {
        let cli = Cli::try_parse_from([
            "fabricnet",
            "--mode",
            "managed_switch",
            "tunnel",
            "create",
            "tenant-42-tun-3",
            "--bridge",
            "tenant-42-net-1",
            "--local",
            "10.0.0.1",
            "--remote",
            "10.0.0.2",
        ])
        .unwrap();

        assert_eq!(cli.mode.as_deref(), Some("managed_switch"));
        assert_eq!(cli.config, None);
        match cli.command {
            Commands::Tunnel {
                action: TunnelAction::Create { global_id, bridge, remote, .. },
            } => {
                assert_eq!(global_id, "tenant-42-tun-3");
                assert_eq!(bridge, "tenant-42-net-1");
                assert_eq!(remote, "10.0.0.2".parse::<IpAddr>().unwrap());
            }
            _ => panic!("expected tunnel create"),
        }
    }

    #[test]
    fn test_parse_bridge_add_ip() {
        let cli = Cli::try_parse_from([
            "fabricnet", "bridge", "add-ip", "tenant-42-net-1", "192.168.10.1/24",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Bridge { action: BridgeAction::AddIp { .. } }
        ));
    }

    #[test]
    fn test_explicit_config_path() {
        let cli = Cli::try_parse_from(["fabricnet", "-c", "/tmp/fab.toml", "check"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/fab.toml")));
    }

    #[test]
    fn test_bad_cidr_rejected() {
        assert!(
            Cli::try_parse_from(["fabricnet", "bridge", "add-ip", "t", "not-an-address"]).is_err()
        );
    }
}
