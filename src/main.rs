//! fabricnet - host-side SDN device manager
//!
//! Creates tenant bridges, GRE tunnel endpoints and VNIC attachments on one
//! host, either as native kernel links or as Open vSwitch rows, and recovers
//! them after restart through the global identifier recorded on each device.

mod cli;
mod error;
mod exec;
mod fabric;
mod kernel;
mod manifest;
mod sdn;
mod vswitch;

#[cfg(test)]
mod testutil;

use cli::{BridgeAction, Cli, Commands, TunnelAction, VnicAction};
use error::Result;
use fabric::Fabric;
use sdn::{Bridge, GreTunnel, NetworkMode};
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(e.kind().exit_code());
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    // Commands that don't require config
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => manifest::load(path)?,
        None => manifest::load_or_default(Path::new(manifest::DEFAULT_CONFIG_PATH))?,
    };

    if let Commands::Check = cli.command {
        println!("Configuration OK");
        println!("  Default mode: {}", config.host.default_mode);
        println!("  Name prefix:  {}", config.host.name_prefix);
        if config.switch.enabled {
            println!(
                "  Switch:       {:?} via {}",
                config.switch.backend, config.switch.endpoint
            );
        } else {
            println!("  Switch:       disabled");
        }
        return Ok(());
    }

    let fabric = Fabric::from_config(&config)?;
    let mode = fabric.mode(cli.mode.as_deref())?;

    match cli.command {
        Commands::Bridge { action } => run_bridge(&fabric, mode, action),
        Commands::Tunnel { action } => run_tunnel(&fabric, mode, action),
        Commands::Vnic { action } => run_vnic(&fabric, mode, action),
        // Already handled above
        Commands::Check | Commands::Completion { .. } => Ok(()),
    }
}

fn run_bridge(fabric: &Fabric, mode: NetworkMode, action: BridgeAction) -> Result<()> {
    match action {
        BridgeAction::Create {
            global_id,
            local_name,
        } => {
            let mut bridge = fabric.bridge(&global_id, mode)?;
            if let Some(name) = local_name {
                bridge = bridge.with_local_name(&name)?;
            }
            bridge.create()?;
            println!(
                "Created bridge {} ({})",
                global_id,
                bridge.local_name().unwrap_or("-")
            );
        }
        BridgeAction::Destroy { global_id } => {
            let mut bridge = fabric.resolve_bridge(&global_id, mode)?;
            bridge.destroy()?;
            println!("Destroyed bridge {}", global_id);
        }
        BridgeAction::Enable { global_id } => {
            fabric.resolve_bridge(&global_id, mode)?.enable()?;
            println!("Bridge {} is up", global_id);
        }
        BridgeAction::Disable { global_id } => {
            fabric.resolve_bridge(&global_id, mode)?.disable()?;
            println!("Bridge {} is down", global_id);
        }
        BridgeAction::AddIp { global_id, addr } => {
            fabric.resolve_bridge(&global_id, mode)?.add_ip(&addr)?;
            println!("Added {} to bridge {}", addr, global_id);
        }
        BridgeAction::DelIp { global_id, addr } => {
            fabric.resolve_bridge(&global_id, mode)?.del_ip(&addr)?;
            println!("Removed {} from bridge {}", addr, global_id);
        }
        BridgeAction::Show { global_id, json } => {
            let bridge = fabric.resolve_bridge(&global_id, mode)?;
            print_bridge(&bridge, json)?;
        }
    }
    Ok(())
}

fn run_tunnel(fabric: &Fabric, mode: NetworkMode, action: TunnelAction) -> Result<()> {
    match action {
        TunnelAction::Create {
            global_id,
            bridge,
            local,
            remote,
            local_name,
        } => {
            let owner = fabric.resolve_bridge(&bridge, mode)?;
            let mut tunnel = fabric.tunnel(&global_id, local, remote, mode)?;
            if let Some(name) = local_name {
                tunnel = tunnel.with_local_name(&name)?;
            }
            tunnel.create(&owner)?;
            println!(
                "Created tunnel {} ({}) {} -> {} on bridge {}",
                global_id,
                tunnel.local_name().unwrap_or("-"),
                local,
                remote,
                bridge
            );
        }
        TunnelAction::Destroy { global_id } => {
            fabric.resolve_tunnel(&global_id, mode)?.destroy()?;
            println!("Destroyed tunnel {}", global_id);
        }
        TunnelAction::Show { global_id, json } => {
            let tunnel = fabric.resolve_tunnel(&global_id, mode)?;
            print_tunnel(&tunnel, json)?;
        }
    }
    Ok(())
}

fn run_vnic(fabric: &Fabric, mode: NetworkMode, action: VnicAction) -> Result<()> {
    match action {
        VnicAction::Attach { name, bridge } => {
            let owner = fabric.resolve_bridge(&bridge, mode)?;
            fabric.vnic(&name, mode)?.attach(&owner)?;
            println!("Attached {} to bridge {}", name, bridge);
        }
        VnicAction::Detach { name, bridge } => {
            let owner = fabric.resolve_bridge(&bridge, mode)?;
            fabric.vnic(&name, mode)?.detach(&owner)?;
            println!("Detached {} from bridge {}", name, bridge);
        }
        VnicAction::Show { name } => {
            let vnic = fabric.vnic(&name, mode)?;
            match vnic.attached_to()? {
                Some(bridge) => println!("{} is attached to {}", vnic.local_name(), bridge),
                None => println!("{} is not attached", vnic.local_name()),
            }
        }
    }
    Ok(())
}

fn print_bridge(bridge: &Bridge, as_json: bool) -> Result<()> {
    if as_json {
        let value = json!({
            "global_id": bridge.global_id(),
            "local_name": bridge.local_name(),
            "mode": bridge.mode().to_string(),
            "state": format!("{:?}", bridge.state()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{:<12} {:<16} {:<16} STATE", "GLOBAL_ID", "LOCAL_NAME", "MODE");
    println!(
        "{:<12} {:<16} {:<16} {:?}",
        bridge.global_id(),
        bridge.local_name().unwrap_or("-"),
        bridge.mode().to_string(),
        bridge.state()
    );
    Ok(())
}

fn print_tunnel(tunnel: &GreTunnel, as_json: bool) -> Result<()> {
    if as_json {
        let value = json!({
            "global_id": tunnel.global_id(),
            "local_name": tunnel.local_name(),
            "bridge": tunnel.bridge_name(),
            "local_ip": tunnel.local_ip(),
            "remote_ip": tunnel.remote_ip(),
            "mode": tunnel.mode().to_string(),
            "state": format!("{:?}", tunnel.state()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let endpoint = |ip: Option<std::net::IpAddr>| ip.map_or("-".to_string(), |ip| ip.to_string());
    println!(
        "{:<12} {:<16} {:<16} {:<16} {:<16} MODE",
        "GLOBAL_ID", "LOCAL_NAME", "BRIDGE", "LOCAL", "REMOTE"
    );
    println!(
        "{:<12} {:<16} {:<16} {:<16} {:<16} {}",
        tunnel.global_id(),
        tunnel.local_name().unwrap_or("-"),
        tunnel.bridge_name().unwrap_or("-"),
        endpoint(tunnel.local_ip()),
        endpoint(tunnel.remote_ip()),
        tunnel.mode()
    );
    Ok(())
}
