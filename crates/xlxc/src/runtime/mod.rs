//! Container provisioning runtime.
//!
//! This module provides the single-container path and the lifecycle
//! controller that drives batches and networks through it.

mod config;
mod container;
mod lifecycle;
mod report;

pub use config::RuntimeConfig;
pub use container::{Attachment, ContainerBuilder};
pub use lifecycle::{Action, LifecycleController, MAX_NETWORK_SIZE, Phase};
pub use report::{BatchReport, Outcome};
