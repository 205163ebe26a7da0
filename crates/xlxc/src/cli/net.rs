//! `xlxc-net`: star and connected container networks.

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};

use super::{CommonArgs, finish};
use crate::host::SystemHost;
use crate::runtime::{LifecycleController, MAX_NETWORK_SIZE};
use crate::topology::TopologyKind;

/// Create or delete a network of Linux XIA containers
#[derive(Parser, Debug)]
#[command(name = "xlxc-net")]
#[command(author, version, about, long_about = None)]
pub struct NetCli {
    /// Network naming scheme
    #[arg(short, long)]
    pub name: String,

    /// Number of containers in the network
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_NETWORK_SIZE)))]
    pub size: u32,

    /// Topology of the network
    #[arg(short, long, value_enum)]
    pub topology: TopologyKind,

    /// Host gateway interface
    #[arg(short, long, required_unless_present = "delete")]
    pub iface: Option<String>,

    /// Delete this container network
    #[arg(short, long)]
    pub delete: bool,

    /// Print the resulting network as JSON
    #[arg(long)]
    pub json: bool,

    /// Shared options.
    #[command(flatten)]
    pub common: CommonArgs,
}

impl NetCli {
    /// Execute the command.
    pub async fn execute(self) -> Result<()> {
        let config = self.common.runtime_config();
        let host = Arc::new(SystemHost::new(config.paths.clone()));
        let mut controller = LifecycleController::new(host, config);

        controller.preflight("xlxc-net", !self.delete).await?;

        let (topology, report) = match (&self.iface, self.delete) {
            (_, true) => {
                controller
                    .teardown_topology(&self.name, self.size, self.topology)
                    .await?
            }
            (Some(iface), false) => {
                controller
                    .build_topology(&self.name, self.size, self.topology, iface)
                    .await?
            }
            (None, false) => return Err(eyre!("--iface is required unless --delete is given")),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&topology)?);
        }
        finish(report)
    }
}
