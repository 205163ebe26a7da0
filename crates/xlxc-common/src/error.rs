//! Common error types for XLXC.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`XlxcError`].
pub type XlxcResult<T> = Result<T, XlxcError>;

/// Errors raised while provisioning containers and networks.
#[derive(Error, Diagnostic, Debug)]
pub enum XlxcError {
    /// Bad command line arguments.
    #[error("Usage error: {message}")]
    #[diagnostic(code(xlxc::usage))]
    Usage {
        /// What was wrong with the arguments.
        message: String,
    },

    /// Not running with root privileges.
    #[error("{tool} must be run as root")]
    #[diagnostic(
        code(xlxc::privilege),
        help("Try running with elevated privileges (sudo)")
    )]
    Privilege {
        /// The tool that was invoked.
        tool: String,
    },

    /// The running kernel is not the expected network-stack variant.
    #[error("Kernel {release} is not a {marker} kernel")]
    #[diagnostic(
        code(xlxc::environment),
        help("Boot the Linux XIA kernel before creating XIA containers")
    )]
    Environment {
        /// Kernel release string reported by the host.
        release: String,
        /// Substring the release must contain.
        marker: String,
    },

    /// A base name or a name derived from it is not usable.
    #[error("Invalid name {name}: {reason}")]
    #[diagnostic(
        code(xlxc::name::invalid),
        help("Names must be alphanumeric with hyphens and underscores, and derived interface names must fit in 15 bytes")
    )]
    InvalidName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A container with this name already exists.
    #[error("Naming conflict: container {name} already exists")]
    #[diagnostic(code(xlxc::container::conflict))]
    NameConflict {
        /// Conflicting container name.
        name: String,
    },

    /// A bridge or interface with this name already exists.
    #[error("Bridge {name} is already in use, so this naming scheme cannot be used")]
    #[diagnostic(code(xlxc::bridge::conflict))]
    BridgeConflict {
        /// Conflicting bridge name.
        name: String,
    },

    /// Reset was requested for a container that does not exist.
    #[error("Container {name} does not exist")]
    #[diagnostic(code(xlxc::container::missing), severity(Warning))]
    MissingContainer {
        /// Missing container name.
        name: String,
    },

    /// No free block in the address pool can hold the requested network.
    #[error("No free address block for {size} containers in {pool}")]
    #[diagnostic(
        code(xlxc::address::exhausted),
        help("Delete unused container networks or use a smaller size")
    )]
    AddressSpaceExhausted {
        /// Requested number of containers.
        size: u32,
        /// The pool that was searched.
        pool: String,
    },

    /// A bind mount failed.
    #[error("Failed to mount {source_path} on {target}: {reason}")]
    #[diagnostic(code(xlxc::mount))]
    MountFailure {
        /// Host path being mounted.
        source_path: String,
        /// Mount point inside the container rootfs.
        target: String,
        /// Underlying failure.
        reason: String,
    },

    /// A host primitive (command, device operation) failed.
    #[error("Host operation {operation} failed: {message}")]
    #[diagnostic(code(xlxc::host))]
    HostOperation {
        /// The primitive that failed.
        operation: String,
        /// The error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(xlxc::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(xlxc::io))]
    Io(#[from] std::io::Error),
}

impl XlxcError {
    /// Shorthand for a [`XlxcError::HostOperation`].
    pub fn host(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::HostOperation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error is advisory and must not fail a batch.
    #[must_use]
    pub const fn is_advisory(&self) -> bool {
        matches!(self, Self::MissingContainer { .. })
    }
}
