//! Driver configuration loaded from an optional TOML file
//!
//! Every field has a default, so a missing file or an empty one yields the
//! stock driver: `qemu:///system`, the `docker0` bridge, one vCPU, 256 MiB of
//! memory and the shared base image under `/var/lib/libvirt/images`.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::qemu_img::DiskFormat;

/// Default libvirt connection address
pub const DEFAULT_CONNECT_URI: &str = "qemu:///system";
/// Host bridge that guest interfaces are attached to
pub const DEFAULT_BRIDGE: &str = "docker0";
/// Shared read-only base image every overlay is backed by
pub const DEFAULT_BASE_IMAGE: &str = "/var/lib/libvirt/images/disk.img.orig";
/// Default number of vCPUs per domain
pub const DEFAULT_VCPUS: u32 = 1;
/// Default domain memory in MiB
pub const DEFAULT_MEMORY_MIB: u64 = 256;

/// Top-level driver configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Hypervisor connection URI
    pub connect_uri: ConnectUri,

    /// Bridge that guest network interfaces join
    pub bridge: BridgeName,

    /// Fixed per-domain defaults
    pub vm: VmBaseConfig,

    /// External tools used for provisioning
    pub tools: ToolsConfig,
}

/// Hypervisor connection URI with a `qemu:///system` default
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ConnectUri(pub String);

impl Default for ConnectUri {
    fn default() -> Self {
        Self(DEFAULT_CONNECT_URI.to_string())
    }
}

/// Bridge name with a `docker0` default
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BridgeName(pub String);

impl Default for BridgeName {
    fn default() -> Self {
        Self(DEFAULT_BRIDGE.to_string())
    }
}

/// Defaults applied identically to every domain created by a driver.
///
/// Nothing here is derived from container input.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct VmBaseConfig {
    /// Number of virtual CPUs
    pub vcpus: u32,

    /// Memory size in MiB
    pub memory_mib: u64,

    /// Shared base image that each writable disk overlays
    pub base_image: Utf8PathBuf,

    /// On-disk format of the base image
    pub base_image_format: DiskFormat,

    /// Explicit emulator binary; libvirt chooses one when unset
    pub emulator: Option<Utf8PathBuf>,
}

impl Default for VmBaseConfig {
    fn default() -> Self {
        Self {
            vcpus: DEFAULT_VCPUS,
            memory_mib: DEFAULT_MEMORY_MIB,
            base_image: Utf8PathBuf::from(DEFAULT_BASE_IMAGE),
            base_image_format: DiskFormat::Raw,
            emulator: None,
        }
    }
}

/// Names of the external tools and where to look for them
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// ISO authoring tool used for the cloud-init seed
    pub iso: String,

    /// Disk image tool used for the copy-on-write overlay
    pub disk: String,

    /// libvirt command-line client
    pub virsh: String,

    /// Search path overriding `PATH` for tool lookup
    pub search_path: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            iso: "genisoimage".to_string(),
            disk: "qemu-img".to_string(),
            virsh: "virsh".to_string(),
            search_path: None,
        }
    }
}

impl ToolsConfig {
    /// Resolve `tool` to an absolute path, honoring `search_path` if set
    pub fn resolve(&self, tool: &str) -> Result<Utf8PathBuf> {
        let search_path = self
            .search_path
            .as_ref()
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"));
        let found = lookup(tool, search_path, std::env::current_dir().ok()).ok_or_else(|| {
            Error::ToolNotInstalled {
                tool: tool.to_string(),
            }
        })?;
        Utf8PathBuf::try_from(found).map_err(|e| Error::ToolNotInstalled {
            tool: format!("{tool} (non UTF-8 path {:?})", e.into_path_buf()),
        })
    }
}

/// Find `tool` on `search_path`. The working directory only matters for
/// relative names, so an unreadable one falls back to a plain path search.
fn lookup(tool: &str, search_path: Option<OsString>, cwd: Option<PathBuf>) -> Option<PathBuf> {
    match cwd {
        Some(cwd) => which::which_in(tool, search_path, cwd).ok(),
        None => which::which_in_global(tool, search_path).ok()?.next(),
    }
}

impl DriverConfig {
    /// Load configuration from `path`, or defaults when no path is given
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::load(None).unwrap();
        assert_eq!(config.connect_uri.0, "qemu:///system");
        assert_eq!(config.bridge.0, "docker0");
        assert_eq!(config.vm.vcpus, 1);
        assert_eq!(config.vm.memory_mib, 256);
        assert_eq!(config.vm.base_image, DEFAULT_BASE_IMAGE);
        assert_eq!(config.vm.base_image_format, DiskFormat::Raw);
        assert!(config.vm.emulator.is_none());
        assert_eq!(config.tools.iso, "genisoimage");
        assert_eq!(config.tools.disk, "qemu-img");
    }

    #[test]
    fn test_partial_override() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(temp.path().join("driver.toml")).unwrap();
        fs::write(
            &path,
            indoc::indoc! {r#"
                bridge = "br0"

                [vm]
                memory-mib = 1024
                emulator = "/usr/bin/qemu-kvm"
            "#},
        )
        .unwrap();

        let config = DriverConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bridge.0, "br0");
        assert_eq!(config.connect_uri.0, DEFAULT_CONNECT_URI);
        assert_eq!(config.vm.memory_mib, 1024);
        assert_eq!(config.vm.vcpus, DEFAULT_VCPUS);
        assert_eq!(
            config.vm.emulator.as_ref().map(|p| p.as_str()),
            Some("/usr/bin/qemu-kvm")
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(temp.path().join("driver.toml")).unwrap();
        fs::write(&path, "brdige = \"br0\"\n").unwrap();

        let err = DriverConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "{err}");
    }

    #[test]
    fn test_resolve_missing_tool() {
        let temp = tempfile::tempdir().unwrap();
        let tools = ToolsConfig {
            search_path: Some(temp.path().to_str().unwrap().to_string()),
            ..Default::default()
        };
        let err = tools.resolve("genisoimage").unwrap_err();
        assert!(
            matches!(err, Error::ToolNotInstalled { ref tool } if tool == "genisoimage"),
            "{err}"
        );
    }

    #[test]
    fn test_lookup_without_working_directory() {
        let temp = tempfile::tempdir().unwrap();
        let bin = Utf8Path::from_path(temp.path()).unwrap();
        crate::qemu_img::tests::fake_tool(bin, "qemu-img", "exit 0");
        let search_path = Some(OsString::from(bin.as_str()));

        let found = lookup("qemu-img", search_path.clone(), None).unwrap();
        assert_eq!(found, bin.join("qemu-img").as_std_path());
        assert!(lookup("genisoimage", search_path, None).is_none());
    }
}
