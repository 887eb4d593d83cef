//! Helper functions for interacting with qemu-img

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::{debug, warn};

use crate::cmdext::CommandRunExt;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};

/// File name of the writable overlay inside the VM work directory
pub const DELTA_DISK_NAME: &str = "disk.img";

/// Supported disk image formats
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiskFormat {
    /// Raw disk image
    Raw,
    /// QEMU Copy On Write 2
    Qcow2,
}

/// Path of the overlay disk for a work directory
pub fn delta_disk_path(work_dir: &Utf8Path) -> Utf8PathBuf {
    work_dir.join(DELTA_DISK_NAME)
}

/// Create a qcow2 overlay `disk.img` in `work_dir` backed by `base_image`.
///
/// The tool is invoked with absolute paths only, so this never touches the
/// process working directory and is safe to run for several containers at
/// once. Each container gets its own overlay; the caller must not delete it
/// while a domain references it.
///
/// The command is `create -f qcow2 -b <base> -F <format> <disk>`. The
/// `-F` argument goes beyond a bare `-b` because qemu-img 6.1 and later
/// refuse to create an overlay whose backing format is not stated.
pub fn create_overlay(
    tools: &ToolsConfig,
    work_dir: &Utf8Path,
    base_image: &Utf8Path,
    base_format: DiskFormat,
) -> Result<Utf8PathBuf> {
    let qemu_img = tools.resolve(&tools.disk)?;

    if !work_dir.is_dir() {
        return Err(Error::file_io(
            work_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "VM work directory missing"),
        ));
    }

    let disk = delta_disk_path(work_dir);
    debug!("Creating delta disk {} backed by {}", disk, base_image);
    let result = Command::new(&qemu_img)
        .args(["create", "-f", DiskFormat::Qcow2.as_ref()])
        .args(["-b", base_image.as_str()])
        .args(["-F", base_format.as_ref()])
        .arg(disk.as_str())
        .run_tool(&tools.disk);

    if let Err(e) = result {
        if let Err(rm) = std::fs::remove_file(&disk) {
            if rm.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial delta disk {}: {}", disk, rm);
            }
        }
        return Err(e);
    }

    Ok(disk)
}
