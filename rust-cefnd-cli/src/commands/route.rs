//! `route add|del`: FIB management through the control channel

use anyhow::Result;
use log::info;
use rust_cefnd_fwd::control::ControlRequest;
use std::path::Path;

use crate::RouteCommands;

/// Handle route-related commands
pub async fn handle_command(cmd: RouteCommands, socket: &Path) -> Result<()> {
    match cmd {
        RouteCommands::Add {
            prefix,
            protocol,
            next_hops,
            cost,
        } => {
            info!("Adding route: prefix={}, protocol={}, hops={:?}", prefix, protocol, next_hops);
            let hops = next_hops.join(", ");
            super::call(
                socket,
                ControlRequest::RouteAdd {
                    prefix: prefix.clone(),
                    protocol,
                    next_hops,
                    cost,
                },
            )
            .await?;
            println!("Added route: {} -> {} (cost {})", prefix, hops, cost);
        }
        RouteCommands::Del {
            prefix,
            protocol,
            next_hops,
        } => {
            info!("Removing route: prefix={}", prefix);
            let hops = next_hops.join(", ");
            super::call(
                socket,
                ControlRequest::RouteDel {
                    prefix: prefix.clone(),
                    protocol,
                    next_hops,
                },
            )
            .await?;
            println!("Removed route: {} -> {}", prefix, hops);
        }
    }
    Ok(())
}
