//! Domain descriptor for a VM-isolated container
//!
//! A [`DomainDescriptor`] is assembled once per container from the driver's
//! fixed [`VmBaseConfig`], the container context, and the paths of the
//! provisioned overlay disk and seed image. It is then serialized to libvirt
//! domain XML by [`DomainDescriptor::to_xml`].
//!
//! Element layout produced by the serializer:
//!
//! ```text
//! domain[type=kvm]
//!   name, memory[unit=MiB], vcpu[current]
//!   os/type[arch,machine]           hvm
//!   features/acpi
//!   cpu[mode=host-model]
//!   on_poweroff, on_reboot, on_crash  destroy
//!   devices
//!     emulator                      only when configured
//!     filesystem[type=mount,accessmode=passthrough]  source[dir], target[dir]
//!     disk[type=file,device]        driver[name,type], source[file],
//!                                   backingStore[type,index]/{format,source},
//!                                   target[dev,bus], readonly
//!     console[type=unix]            source[mode=bind,path], target[type,port]
//!     interface[type=bridge]        mac[address], source[bridge], model[type]
//!     controller[type=scsi,model=virtio-scsi]
//!   seclabel[type=none]
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::arch::ArchConfig;
use crate::cloud_init::SHARE_MOUNT_TAG;
use crate::config::VmBaseConfig;
use crate::container::ContainerContext;
use crate::error::Result;
use crate::qemu_img::DiskFormat;
use crate::xml_utils::XmlWriter;

/// CPU model policy for every domain
pub const CPU_MODE: &str = "host-model";
/// Storage controller model shared by both disks
pub const SCSI_CONTROLLER_MODEL: &str = "virtio-scsi";
/// Network interface model
pub const INTERFACE_MODEL: &str = "virtio";

/// Whether a disk is a plain disk or removable boot media
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum DiskDevice {
    /// Writable block device
    Disk,
    /// Read-only removable media
    Cdrom,
}

/// The image a copy-on-write disk overlays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingStore {
    /// Format of the backing image
    pub format: DiskFormat,
    /// Path of the backing image
    pub source: Utf8PathBuf,
}

/// One disk attached to the domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDescriptor {
    /// Device kind
    pub device: DiskDevice,
    /// Driver format of the source file
    pub format: DiskFormat,
    /// Host path of the disk image
    pub source: Utf8PathBuf,
    /// Base image overlaid by this disk, if any
    pub backing_store: Option<BackingStore>,
    /// Guest device name
    pub target_dev: &'static str,
    /// Guest bus
    pub bus: &'static str,
    /// Whether the guest sees the disk read-only
    pub readonly: bool,
}

impl DiskDescriptor {
    /// The writable qcow2 overlay, always backed by the shared base image
    pub fn writable(source: &Utf8Path, base: &VmBaseConfig) -> Self {
        Self {
            device: DiskDevice::Disk,
            format: DiskFormat::Qcow2,
            source: source.to_owned(),
            backing_store: Some(BackingStore {
                format: base.base_image_format,
                source: base.base_image.clone(),
            }),
            target_dev: "sda",
            bus: "scsi",
            readonly: false,
        }
    }

    /// The read-only cloud-init seed
    pub fn seed(source: &Utf8Path) -> Self {
        Self {
            device: DiskDevice::Cdrom,
            format: DiskFormat::Raw,
            source: source.to_owned(),
            backing_store: None,
            target_dev: "sdb",
            bus: "scsi",
            readonly: true,
        }
    }

    fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        writer.start_element("disk", &[("type", "file"), ("device", self.device.as_ref())])?;
        writer.write_empty_element("driver", &[("name", "qemu"), ("type", self.format.as_ref())])?;
        writer.write_empty_element("source", &[("file", self.source.as_str())])?;
        if let Some(ref backing) = self.backing_store {
            writer.start_element("backingStore", &[("type", "file"), ("index", "1")])?;
            writer.write_empty_element("format", &[("type", backing.format.as_ref())])?;
            writer.write_empty_element("source", &[("file", backing.source.as_str())])?;
            writer.end_element("backingStore")?;
        }
        writer.write_empty_element("target", &[("dev", self.target_dev), ("bus", self.bus)])?;
        if self.readonly {
            writer.write_empty_element("readonly", &[])?;
        }
        writer.end_element("disk")
    }
}

/// Bridged network interface carrying the container's MAC address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceDescriptor {
    /// Host bridge
    pub bridge: String,
    /// Guest MAC address
    pub mac_address: String,
    /// Device model
    pub model: &'static str,
}

/// The container root filesystem passed through to the guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemShareDescriptor {
    /// Host directory
    pub source_dir: Utf8PathBuf,
    /// Guest mount tag
    pub target_tag: &'static str,
}

/// Role of a console; each role has a fixed guest port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleRole {
    /// Serial console, port 0
    Serial,
    /// Control channel carrying the command's output, port 1
    Control,
    /// Application output channel, port 2
    Application,
}

impl ConsoleRole {
    /// All roles in port order
    pub const ALL: [ConsoleRole; 3] = [
        ConsoleRole::Serial,
        ConsoleRole::Control,
        ConsoleRole::Application,
    ];

    /// Guest port number
    pub fn port(self) -> u32 {
        match self {
            ConsoleRole::Serial => 0,
            ConsoleRole::Control => 1,
            ConsoleRole::Application => 2,
        }
    }

    /// libvirt console target type
    pub fn target_type(self) -> &'static str {
        match self {
            ConsoleRole::Serial => "serial",
            ConsoleRole::Control | ConsoleRole::Application => "virtio",
        }
    }

    /// Socket file name inside the VM work directory
    pub fn socket_name(self) -> &'static str {
        match self {
            ConsoleRole::Serial => "serial.sock",
            ConsoleRole::Control => "control.sock",
            ConsoleRole::Application => "app.sock",
        }
    }
}

/// A console bound to a Unix socket in the VM work directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleDescriptor {
    /// Console role
    pub role: ConsoleRole,
    /// Socket the hypervisor binds when the domain launches
    pub socket_path: Utf8PathBuf,
}

impl ConsoleDescriptor {
    fn new(role: ConsoleRole, work_dir: &Utf8Path) -> Self {
        Self {
            role,
            socket_path: work_dir.join(role.socket_name()),
        }
    }
}

/// What the hypervisor does when the guest powers off, reboots or crashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleAction {
    /// Tear the domain down
    Destroy,
}

/// Complete description of the VM for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescriptor {
    /// Domain name, the container ID prefix
    pub name: String,
    /// Fixed resources and base image
    pub base: VmBaseConfig,
    /// Host architecture
    pub arch: ArchConfig,
    /// Writable overlay disk
    pub disk: DiskDescriptor,
    /// Cloud-init seed disk
    pub seed: DiskDescriptor,
    /// Network interface
    pub interface: NetworkInterfaceDescriptor,
    /// Root filesystem share
    pub filesystem: FilesystemShareDescriptor,
    /// Serial, control and application consoles
    pub consoles: [ConsoleDescriptor; 3],
    /// Action on guest power-off, reboot and crash
    pub on_exit: LifecycleAction,
}

/// Builds a [`DomainDescriptor`] from fixed defaults and a container
#[derive(Debug)]
pub struct DomainBuilder<'a> {
    base: &'a VmBaseConfig,
    bridge: &'a str,
    arch: Option<ArchConfig>,
}

impl<'a> DomainBuilder<'a> {
    /// Create a builder for domains attached to `bridge`
    pub fn new(base: &'a VmBaseConfig, bridge: &'a str) -> Self {
        Self {
            base,
            bridge,
            arch: None,
        }
    }

    /// Override host architecture detection
    pub fn with_arch(mut self, arch: ArchConfig) -> Self {
        self.arch = Some(arch);
        self
    }

    /// Assemble the descriptor for `container` referencing the provisioned images
    pub fn build(
        &self,
        container: &ContainerContext,
        delta_disk: &Utf8Path,
        seed_image: &Utf8Path,
    ) -> Result<DomainDescriptor> {
        let arch = match self.arch {
            Some(arch) => arch,
            None => ArchConfig::detect()?,
        };
        let name = container.vm_name()?.to_string();
        let bridge = container.bridge_network()?;
        let work_dir = &container.work_dir;

        let consoles = ConsoleRole::ALL.map(|role| ConsoleDescriptor::new(role, work_dir));
        for console in &consoles {
            debug!(
                "{:?} console socket location: {}",
                console.role, console.socket_path
            );
        }

        Ok(DomainDescriptor {
            name,
            base: self.base.clone(),
            arch,
            disk: DiskDescriptor::writable(delta_disk, self.base),
            seed: DiskDescriptor::seed(seed_image),
            interface: NetworkInterfaceDescriptor {
                bridge: self.bridge.to_string(),
                mac_address: bridge.mac_address.clone(),
                model: INTERFACE_MODEL,
            },
            filesystem: FilesystemShareDescriptor {
                source_dir: container.rootfs.clone(),
                target_tag: SHARE_MOUNT_TAG,
            },
            consoles,
            on_exit: LifecycleAction::Destroy,
        })
    }
}

impl DomainDescriptor {
    /// Serialize to libvirt domain XML
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = XmlWriter::new();
        let memory = self.base.memory_mib.to_string();
        let vcpus = self.base.vcpus.to_string();

        writer.start_element("domain", &[("type", "kvm")])?;
        writer.write_text_element("name", &self.name)?;
        writer.write_text_element_with_attrs("memory", &memory, &[("unit", "MiB")])?;
        writer.write_text_element_with_attrs("vcpu", &vcpus, &[("current", &vcpus)])?;

        writer.start_element("os", &[])?;
        writer.write_text_element_with_attrs(
            "type",
            self.arch.os_type,
            &[("arch", self.arch.arch), ("machine", self.arch.machine)],
        )?;
        writer.end_element("os")?;

        writer.start_element("features", &[])?;
        writer.write_empty_element("acpi", &[])?;
        writer.end_element("features")?;

        writer.write_empty_element("cpu", &[("mode", CPU_MODE)])?;

        let on_exit = self.on_exit.as_ref();
        writer.write_text_element("on_poweroff", on_exit)?;
        writer.write_text_element("on_reboot", on_exit)?;
        writer.write_text_element("on_crash", on_exit)?;

        writer.start_element("devices", &[])?;
        if let Some(ref emulator) = self.base.emulator {
            writer.write_text_element("emulator", emulator.as_str())?;
        }

        writer.start_element(
            "filesystem",
            &[("type", "mount"), ("accessmode", "passthrough")],
        )?;
        writer.write_empty_element("source", &[("dir", self.filesystem.source_dir.as_str())])?;
        writer.write_empty_element("target", &[("dir", self.filesystem.target_tag)])?;
        writer.end_element("filesystem")?;

        self.disk.write_xml(&mut writer)?;
        self.seed.write_xml(&mut writer)?;

        for console in &self.consoles {
            let port = console.role.port().to_string();
            writer.start_element("console", &[("type", "unix")])?;
            writer.write_empty_element(
                "source",
                &[("mode", "bind"), ("path", console.socket_path.as_str())],
            )?;
            writer.write_empty_element(
                "target",
                &[("type", console.role.target_type()), ("port", &port)],
            )?;
            writer.end_element("console")?;
        }

        writer.start_element("interface", &[("type", "bridge")])?;
        writer.write_empty_element("mac", &[("address", &self.interface.mac_address)])?;
        writer.write_empty_element("source", &[("bridge", &self.interface.bridge)])?;
        writer.write_empty_element("model", &[("type", self.interface.model)])?;
        writer.end_element("interface")?;

        writer.write_empty_element(
            "controller",
            &[("type", "scsi"), ("model", SCSI_CONTROLLER_MODEL)],
        )?;
        writer.end_element("devices")?;

        writer.write_empty_element("seclabel", &[("type", "none")])?;
        writer.end_element("domain")?;

        writer.into_string()
    }
}
