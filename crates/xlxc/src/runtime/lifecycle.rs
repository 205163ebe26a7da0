//! Batch and network lifecycle.
//!
//! A run validates everything it will touch before its first mutation.
//! Validation failures reject the whole run with the host untouched; once
//! mutation starts, failures are per container.

use std::fmt;
use std::sync::Arc;

use xlxc_common::{ContainerName, HostOps, XlxcError, XlxcResult};
use xlxc_network::BridgeManager;

use super::{BatchReport, ContainerBuilder, RuntimeConfig};
use crate::filesystem::RootfsAssembler;
use crate::resolver::ConflictResolver;
use crate::topology::{Topology, TopologyBuilder, TopologyKind};

/// Largest network the address pool is sized for.
pub const MAX_NETWORK_SIZE: u32 = 65534;

/// What a batch does to each of its containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create new containers, optionally with a launcher script.
    Create {
        /// Write the launcher script.
        script: bool,
    },
    /// Restore bridges and mounts of existing containers.
    Reset,
    /// Destroy containers and their own bridges.
    Delete,
}

/// Lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Checking preconditions. Nothing has been mutated.
    Validating,
    /// Creating containers.
    Creating,
    /// Resetting containers.
    Resetting,
    /// Deleting containers.
    Deleting,
    /// Finished; per-container outcomes are in the report.
    Done,
    /// Refused during validation. Nothing was mutated.
    Rejected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Creating => write!(f, "creating"),
            Self::Resetting => write!(f, "resetting"),
            Self::Deleting => write!(f, "deleting"),
            Self::Done => write!(f, "done"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Drives batches of containers and whole networks.
pub struct LifecycleController {
    host: Arc<dyn HostOps>,
    config: RuntimeConfig,
    phase: Phase,
}

impl LifecycleController {
    /// Control containers on `host`.
    #[must_use]
    pub fn new(host: Arc<dyn HostOps>, config: RuntimeConfig) -> Self {
        Self {
            host,
            config,
            phase: Phase::Validating,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "Lifecycle transition");
        self.phase = phase;
    }

    fn reject(&mut self, err: XlxcError) -> XlxcError {
        self.enter(Phase::Rejected);
        err
    }

    /// Check that `tool` may run: root privileges, and when `check_kernel`
    /// is set, a kernel release containing the configured marker.
    pub async fn preflight(&mut self, tool: &str, check_kernel: bool) -> XlxcResult<()> {
        self.enter(Phase::Validating);

        if self.host.effective_uid().await != 0 {
            return Err(self.reject(XlxcError::Privilege {
                tool: tool.to_string(),
            }));
        }

        let marker = &self.config.kernel_marker;
        if check_kernel && !marker.is_empty() {
            let release = self.host.kernel_release().await?;
            if !release.contains(marker.as_str()) {
                let marker = marker.clone();
                return Err(self.reject(XlxcError::Environment { release, marker }));
            }
        }
        Ok(())
    }

    /// Run `action` on containers `base{first..=last}`.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing mutated, if validation fails. Errors
    /// after that are recorded per container in the report.
    pub async fn run_batch(
        &mut self,
        base: &str,
        first: u32,
        last: u32,
        action: Action,
    ) -> XlxcResult<BatchReport> {
        self.enter(Phase::Validating);

        if last < first {
            return Err(self.reject(XlxcError::Usage {
                message: format!("end index {last} is less than start index {first}"),
            }));
        }
        if let Err(e) = ConflictResolver::validate_names(base, first, last) {
            return Err(self.reject(e));
        }

        let host = Arc::clone(&self.host);
        let resolver = ConflictResolver::new(host.as_ref());
        let names: Vec<ContainerName> = (first..=last)
            .map(|i| ContainerName::new(base, i))
            .collect();

        match action {
            Action::Create { script } => {
                let own_bridges: Vec<String> =
                    names.iter().map(ContainerName::own_bridge).collect();
                let validation = async {
                    resolver.validate_create(base, first, last).await?;
                    resolver.validate_bridges(&own_bridges).await
                }
                .await;
                if let Err(e) = validation {
                    return Err(self.reject(e));
                }

                self.enter(Phase::Creating);
                let report = self.create_all(host.as_ref(), &names, script).await;
                self.enter(Phase::Done);
                report
            }
            Action::Reset => {
                let missing = match resolver.validate_reset(base, first, last).await {
                    Ok(missing) => missing,
                    Err(e) => return Err(self.reject(e)),
                };

                self.enter(Phase::Resetting);
                let builder = ContainerBuilder::new(host.as_ref(), &self.config);
                let mut report = BatchReport::new();
                for name in &names {
                    if missing.contains(name) {
                        report.skip(
                            name.full_name(),
                            XlxcError::MissingContainer {
                                name: name.full_name(),
                            },
                        );
                        continue;
                    }
                    report.record(name.full_name(), builder.reset(name).await);
                }
                self.enter(Phase::Done);
                Ok(report)
            }
            Action::Delete => {
                self.enter(Phase::Deleting);
                let builder = ContainerBuilder::new(host.as_ref(), &self.config);
                let bridges = BridgeManager::new(host.as_ref());
                let mut report = BatchReport::new();
                for name in &names {
                    let result = match builder.destroy(name).await {
                        Err(e) if !e.is_advisory() => Err(e),
                        destroyed => bridges.delete(&name.own_bridge()).await.and(destroyed),
                    };
                    report.record(name.full_name(), result);
                }
                self.enter(Phase::Done);
                Ok(report)
            }
        }
    }

    /// Stage the shared configuration, create every container, then remove
    /// the staged copy.
    async fn create_all(
        &self,
        host: &dyn HostOps,
        names: &[ContainerName],
        script: bool,
    ) -> XlxcResult<BatchReport> {
        let assembler = RootfsAssembler::new(host, &self.config.local_etc, &self.config.home_user);
        let staged = assembler.stage(&self.config.shared_config).await?;

        let builder = ContainerBuilder::new(host, &self.config);
        let mut report = BatchReport::new();
        for name in names {
            report.record(name.full_name(), builder.create(name, None, script).await);
        }

        assembler.unstage(staged).await;
        Ok(report)
    }

    fn validate_size(&mut self, size: u32) -> XlxcResult<()> {
        if size == 0 || size > MAX_NETWORK_SIZE {
            return Err(self.reject(XlxcError::Usage {
                message: format!(
                    "network size must be between 1 and {MAX_NETWORK_SIZE}, got {size}"
                ),
            }));
        }
        Ok(())
    }

    /// Build a network of `size` containers named `base{0..size}`, routed
    /// out of the host interface `iface`.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing mutated, if validation fails, and an
    /// error if the network as a whole cannot be built (no address block,
    /// or the shared bridge of a connected network fails).
    pub async fn build_topology(
        &mut self,
        base: &str,
        size: u32,
        kind: TopologyKind,
        iface: &str,
    ) -> XlxcResult<(Topology, BatchReport)> {
        self.enter(Phase::Validating);
        self.validate_size(size)?;

        let host = Arc::clone(&self.host);
        let resolver = ConflictResolver::new(host.as_ref());
        let validation = async {
            ConflictResolver::validate_names(base, 0, size - 1)?;
            resolver.validate_create(base, 0, size - 1).await?;
            resolver.validate_bridge_names(base, size, kind).await?;
            if !host.list_interfaces().await?.iter().any(|i| i == iface) {
                return Err(XlxcError::Usage {
                    message: format!("host interface {iface} does not exist"),
                });
            }
            Ok::<(), XlxcError>(())
        }
        .await;
        if let Err(e) = validation {
            return Err(self.reject(e));
        }

        self.enter(Phase::Creating);
        let built = async {
            let assembler = RootfsAssembler::new(
                host.as_ref(),
                &self.config.local_etc,
                &self.config.home_user,
            );
            let staged = assembler.stage(&self.config.shared_config).await?;
            let built = TopologyBuilder::new(host.as_ref(), &self.config)
                .build(base, size, kind, iface)
                .await;
            assembler.unstage(staged).await;
            built
        }
        .await;

        self.enter(Phase::Done);
        built
    }

    /// Tear down a network of `size` containers named `base{0..size}`.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing mutated, if validation fails.
    pub async fn teardown_topology(
        &mut self,
        base: &str,
        size: u32,
        kind: TopologyKind,
    ) -> XlxcResult<(Topology, BatchReport)> {
        self.enter(Phase::Validating);
        self.validate_size(size)?;
        if let Err(e) = ConflictResolver::validate_names(base, 0, size - 1) {
            return Err(self.reject(e));
        }

        self.enter(Phase::Deleting);
        let host = Arc::clone(&self.host);
        let torn_down = TopologyBuilder::new(host.as_ref(), &self.config)
            .teardown(base, size, kind)
            .await;

        self.enter(Phase::Done);
        torn_down
    }
}
