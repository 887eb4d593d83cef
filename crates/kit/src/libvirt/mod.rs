//! libvirt integration
//!
//! This module provides:
//! - `domain`: the domain descriptor and its XML serialization
//! - `lifecycle`: the per-container domain state machine
//! - `virsh`: a hypervisor connection driven through `virsh`

use std::fmt;
use uuid::Uuid;

use crate::error::Result;

pub mod domain;
pub mod lifecycle;
pub mod virsh;

/// Reference to a domain the hypervisor has defined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainHandle {
    /// Domain name
    pub name: String,
    /// Domain UUID assigned by libvirt
    pub uuid: Uuid,
}

impl fmt::Display for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// Operations the driver needs from a hypervisor connection.
///
/// Every call blocks until the hypervisor answers; none of them time out.
/// Failures are reported as [`crate::Error::DomainOperation`].
pub trait Hypervisor: fmt::Debug {
    /// Define a persistent domain from domain XML
    fn define_domain(&self, xml: &str) -> Result<DomainHandle>;

    /// Start a defined domain
    fn create(&self, domain: &DomainHandle) -> Result<()>;

    /// Forcibly stop a running or paused domain
    fn destroy(&self, domain: &DomainHandle) -> Result<()>;

    /// Remove the domain's persistent definition
    fn undefine(&self, domain: &DomainHandle) -> Result<()>;

    /// Pause a running domain
    fn suspend(&self, domain: &DomainHandle) -> Result<()>;

    /// Resume a paused domain
    fn resume(&self, domain: &DomainHandle) -> Result<()>;
}
