//! Read-only view of the container being isolated
//!
//! The container runtime hands us a JSON document describing the container's
//! identity, root filesystem, entrypoint, network assignments and the work
//! directory reserved for its generated artifacts.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

use crate::error::{Error, Result};
use crate::network::{self, GuestNetwork};

/// Name of the network whose assignment the guest inherits
pub const BRIDGE_NETWORK: &str = "bridge";

/// Number of leading container ID characters used as the domain name
pub const DOMAIN_NAME_LEN: usize = 12;

/// A single network assignment for the container
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkAssignment {
    /// IPv4 address on the network
    pub ip_address: String,
    /// Prefix length of the network
    pub ip_prefix_len: u32,
    /// Gateway address, empty when the network has none
    #[serde(default)]
    pub gateway: String,
    /// MAC address given to the guest interface
    pub mac_address: String,
}

/// Container configuration as seen by the VM driver
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerContext {
    /// Unique container ID
    pub id: String,
    /// Host path of the container's root filesystem
    pub rootfs: Utf8PathBuf,
    /// Resolved entrypoint path
    pub path: String,
    /// Entrypoint arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Network assignments keyed by network name
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkAssignment>,
    /// Directory holding this container's generated VM artifacts
    pub work_dir: Utf8PathBuf,
}

impl ContainerContext {
    /// Load a container context from a JSON file
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            Error::InvalidContainer(format!("failed to parse {path}: {e}"))
        })
    }

    /// The domain name: the first twelve characters of the container ID
    pub fn vm_name(&self) -> Result<&str> {
        match self.id.char_indices().nth(DOMAIN_NAME_LEN) {
            Some((end, _)) => Ok(&self.id[..end]),
            None if self.id.chars().count() == DOMAIN_NAME_LEN => Ok(&self.id),
            None => Err(Error::InvalidContainer(format!(
                "container ID {:?} is shorter than {DOMAIN_NAME_LEN} characters",
                self.id
            ))),
        }
    }

    /// The container's assignment on the bridge network
    pub fn bridge_network(&self) -> Result<&NetworkAssignment> {
        self.networks.get(BRIDGE_NETWORK).ok_or_else(|| {
            Error::InvalidContainer(format!(
                "container {} has no {BRIDGE_NETWORK} network assignment",
                self.id
            ))
        })
    }

    /// Static guest network configuration derived from the bridge assignment
    pub fn guest_network(&self) -> Result<GuestNetwork> {
        let bridge = self.bridge_network()?;
        network::derive_static_config(&bridge.ip_address, bridge.ip_prefix_len, &bridge.gateway)
    }
}
