//! Error types for VM-isolated containers
//!
//! Every failure in provisioning, descriptor building and domain lifecycle
//! handling surfaces as one of these variants. None of them are retried
//! internally; orchestration above this crate owns retry policy.

use camino::Utf8PathBuf;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while isolating a container inside a VM
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external tool could not be resolved on the search path
    #[error("{tool} is not installed on your PATH; install it to run isolated containers")]
    ToolNotInstalled {
        /// Name of the missing tool
        tool: String,
    },

    /// The bridge network assignment is not a valid CIDR block
    #[error("invalid network configuration: {0}")]
    InvalidNetworkConfig(String),

    /// The container context cannot be mapped onto a VM
    #[error("invalid container configuration: {0}")]
    InvalidContainer(String),

    /// Reading or writing a generated artifact failed
    #[error("I/O error on {path}: {source}")]
    FileIo {
        /// Path being accessed
        path: Utf8PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An external tool ran but did not succeed
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool {
        /// Name of the tool
        tool: String,
        /// Exit status description
        status: String,
        /// Captured standard error of the tool
        stderr: String,
    },

    /// The hypervisor connection could not be opened
    #[error("failed to connect to libvirt daemon at {uri}: {reason}")]
    Connection {
        /// Connection URI
        uri: String,
        /// Why the connection failed
        reason: String,
    },

    /// The hypervisor rejected a domain operation
    #[error("domain {operation} failed for {domain}: {reason}")]
    DomainOperation {
        /// Operation that was attempted
        operation: &'static str,
        /// Domain name, or "<new>" for a definition
        domain: String,
        /// Hypervisor-provided reason
        reason: String,
    },

    /// A lifecycle operation was attempted from a state that does not allow it
    #[error("cannot {operation}: {detail}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// Description of the current state
        detail: String,
    },

    /// The domain descriptor or cloud-init documents could not be serialized
    #[error("failed to serialize {what}: {reason}")]
    Serialization {
        /// Document being produced
        what: &'static str,
        /// Underlying reason
        reason: String,
    },

    /// The driver configuration could not be loaded
    #[error("invalid driver configuration {path}: {reason}")]
    Config {
        /// Configuration file path
        path: Utf8PathBuf,
        /// Parse or read failure
        reason: String,
    },

    /// The host architecture has no known machine type
    #[error("unsupported architecture: {0}; supported architectures: x86_64, aarch64")]
    UnsupportedArch(String),
}

impl Error {
    pub(crate) fn file_io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(what: &'static str, reason: impl std::fmt::Display) -> Self {
        Error::Serialization {
            what,
            reason: reason.to_string(),
        }
    }
}
