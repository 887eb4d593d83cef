//! Architecture detection for the domain's OS descriptor

use crate::error::{Error, Result};

/// Architecture configuration for libvirt domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchConfig {
    /// Architecture string for libvirt (e.g., "x86_64", "aarch64")
    pub arch: &'static str,
    /// Machine type for libvirt (e.g., "q35", "virt")
    pub machine: &'static str,
    /// OS type for libvirt (always "hvm" here)
    pub os_type: &'static str,
}

impl ArchConfig {
    /// Configuration for a named architecture
    pub fn for_arch(arch: &str) -> Result<Self> {
        match arch {
            "x86_64" => Ok(Self {
                arch: "x86_64",
                machine: "q35",
                os_type: "hvm",
            }),
            "aarch64" => Ok(Self {
                arch: "aarch64",
                machine: "virt",
                os_type: "hvm",
            }),
            unsupported => Err(Error::UnsupportedArch(unsupported.to_string())),
        }
    }

    /// Detect host architecture and return appropriate configuration
    pub fn detect() -> Result<Self> {
        Self::for_arch(std::env::consts::ARCH)
    }
}
