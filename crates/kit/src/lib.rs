//! Run containers inside lightweight KVM virtual machines managed by libvirt.
//!
//! For each container the driver generates a cloud-init seed image and a
//! copy-on-write overlay disk in the container's work directory, describes a
//! domain sharing the container's root filesystem over 9p, and drives that
//! domain through define, launch, pause, shutdown and undefine.
//!
//! All external tools are invoked with absolute paths; nothing here changes
//! the process working directory, so several containers may be provisioned
//! concurrently.

pub mod arch;
pub mod cloud_init;
pub mod cmdext;
pub mod config;
pub mod container;
pub mod driver;
pub mod error;
pub mod libvirt;
pub mod network;
pub mod qemu_img;
pub mod xml_utils;

pub use error::{Error, Result};
