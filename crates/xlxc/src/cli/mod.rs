//! Command line front ends.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Result, eyre};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::runtime::{BatchReport, Outcome, RuntimeConfig};

pub mod create;
pub mod net;

pub use create::CreateCli;
pub use net::NetCli;

/// Options shared by every tool.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding one subdirectory per container
    #[arg(long, env = "XLXC_LXC_PATH", default_value = "/var/lib/lxc")]
    pub lxc_path: PathBuf,

    /// Staging directory copied into each container as /etc
    #[arg(long, env = "XLXC_LOCAL_ETC", default_value = "./etc")]
    pub local_etc: PathBuf,

    /// Host-wide XIA configuration staged before creating containers
    #[arg(long, env = "XLXC_SHARED_CONFIG", default_value = "/etc/xia")]
    pub shared_config: PathBuf,

    /// User that gets a home directory in each container
    #[arg(long, env = "XLXC_HOME_USER", default_value = "ubuntu")]
    pub home_user: String,

    /// Substring the kernel release must contain (empty to skip the check)
    #[arg(long, env = "XLXC_KERNEL_MARKER", default_value = "xia")]
    pub kernel_marker: String,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl CommonArgs {
    /// Runtime configuration from the arguments.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_lxc(&self.lxc_path)
            .with_local_etc(&self.local_etc)
            .with_shared_config(&self.shared_config)
            .with_home_user(&self.home_user)
            .with_kernel_marker(&self.kernel_marker)
    }
}

/// Install the tracing subscriber.
pub fn init_tracing(debug: bool) -> Result<()> {
    let directive = if debug { "xlxc=debug" } else { "xlxc=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();
    Ok(())
}

/// Print the failures of a report and turn them into the exit status.
pub fn finish(report: BatchReport) -> Result<()> {
    let mut failed = 0usize;
    for (subject, outcome) in report.into_entries() {
        match outcome {
            Outcome::Done => println!("{subject}: done"),
            Outcome::Skipped(reason) => println!("{subject}: skipped ({reason})"),
            Outcome::Failed(e) => {
                failed += 1;
                eprintln!("{subject}: {:?}", miette::Report::new(e));
            }
        }
    }

    if failed > 0 {
        return Err(eyre!("{failed} operation(s) failed"));
    }
    Ok(())
}
