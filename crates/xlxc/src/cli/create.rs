//! `xlxc-create`: batches of single containers.

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use xlxc_common::{XlxcError, XlxcResult};

use super::{CommonArgs, finish};
use crate::host::SystemHost;
use crate::runtime::{Action, BatchReport, LifecycleController};

/// Create, reset or delete Linux XIA containers NAME{START..=END}
#[derive(Parser, Debug)]
#[command(name = "xlxc-create")]
#[command(author, version, about, long_about = None)]
pub struct CreateCli {
    /// Naming scheme; containers are named NAME0, NAME1, ...
    pub name: String,

    /// First container index
    pub start: u32,

    /// Last container index (inclusive)
    pub end: u32,

    /// Restore bridges and mounts of existing containers after a reboot
    #[arg(long, conflicts_with = "delete")]
    pub reset: bool,

    /// Write a launcher script that registers the container's host identifier
    #[arg(long, conflicts_with_all = ["reset", "delete"])]
    pub script: bool,

    /// Destroy the containers and their bridges
    #[arg(long)]
    pub delete: bool,

    /// Shared options.
    #[command(flatten)]
    pub common: CommonArgs,
}

impl CreateCli {
    /// The action the flags select.
    #[must_use]
    pub const fn action(&self) -> Action {
        if self.reset {
            Action::Reset
        } else if self.delete {
            Action::Delete
        } else {
            Action::Create {
                script: self.script,
            }
        }
    }

    /// Argument checks that need no host access.
    pub fn validate(&self) -> XlxcResult<()> {
        if self.end < self.start {
            return Err(XlxcError::Usage {
                message: "End parameter cannot be less than start parameter".to_string(),
            });
        }
        Ok(())
    }

    /// Check the arguments and the host, then run the selected action.
    ///
    /// Every action requires root and the XIA kernel.
    pub async fn run(&self, controller: &mut LifecycleController) -> XlxcResult<BatchReport> {
        self.validate()?;
        controller.preflight("xlxc-create", true).await?;
        controller
            .run_batch(&self.name, self.start, self.end, self.action())
            .await
    }

    /// Execute the command.
    pub async fn execute(self) -> Result<()> {
        let config = self.common.runtime_config();
        let host = Arc::new(SystemHost::new(config.paths.clone()));
        let mut controller = LifecycleController::new(host, config);

        let report = self.run(&mut controller).await?;
        finish(report)
    }
}
