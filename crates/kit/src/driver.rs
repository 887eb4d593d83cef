//! Driver entry points: one hypervisor connection per driver, one
//! [`IsolatedContainer`] per container.

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::arch::ArchConfig;
use crate::cloud_init::{seed_image_path, SeedImageBuilder};
use crate::config::DriverConfig;
use crate::container::ContainerContext;
use crate::error::Result;
use crate::libvirt::domain::{DomainBuilder, DomainDescriptor};
use crate::libvirt::lifecycle::LifecycleController;
use crate::libvirt::virsh::VirshConnection;
use crate::libvirt::{DomainHandle, Hypervisor};
use crate::qemu_img::{self, delta_disk_path};

/// Build the descriptor for `container` referencing its expected artifact
/// paths, without provisioning anything.
pub fn expected_descriptor(
    config: &DriverConfig,
    container: &ContainerContext,
) -> Result<DomainDescriptor> {
    let work_dir = &container.work_dir;
    DomainBuilder::new(&config.vm, &config.bridge.0)
        .with_arch(ArchConfig::detect()?)
        .build(
            container,
            &delta_disk_path(work_dir),
            &seed_image_path(work_dir),
        )
}

/// A VM isolation driver bound to one hypervisor connection
#[derive(Debug)]
pub struct LibvirtDriver<H: Hypervisor = VirshConnection> {
    config: DriverConfig,
    hypervisor: H,
}

impl LibvirtDriver<VirshConnection> {
    /// Connect to the configured libvirt daemon.
    ///
    /// The driver is unusable if this fails; the error is returned rather
    /// than retried.
    pub fn init(config: DriverConfig) -> Result<Self> {
        let conn = VirshConnection::connect(&config.tools, &config.connect_uri.0)?;
        info!("Initialized VM isolation driver on {}", conn.uri());
        Ok(Self::with_hypervisor(config, conn))
    }
}

impl<H: Hypervisor> LibvirtDriver<H> {
    /// Build a driver around an already open hypervisor connection
    pub fn with_hypervisor(config: DriverConfig, hypervisor: H) -> Self {
        Self { config, hypervisor }
    }

    /// Driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Hypervisor connection
    pub fn hypervisor(&self) -> &H {
        &self.hypervisor
    }

    /// Per-container context for `container`
    pub fn context(&self, container: ContainerContext) -> IsolatedContainer<'_, H> {
        IsolatedContainer {
            config: &self.config,
            lifecycle: LifecycleController::new(&self.hypervisor),
            container,
        }
    }
}

/// A container together with the domain isolating it
#[derive(Debug)]
pub struct IsolatedContainer<'d, H: Hypervisor> {
    config: &'d DriverConfig,
    container: ContainerContext,
    lifecycle: LifecycleController<'d, H>,
}

impl<'d, H: Hypervisor> IsolatedContainer<'d, H> {
    /// The container being isolated
    pub fn container(&self) -> &ContainerContext {
        &self.container
    }

    /// Directory holding the generated artifacts
    pub fn work_dir(&self) -> &Utf8Path {
        &self.container.work_dir
    }

    /// Domain lifecycle for this container
    pub fn lifecycle(&mut self) -> &mut LifecycleController<'d, H> {
        &mut self.lifecycle
    }

    /// Domain XML for the container's expected artifact paths
    pub fn domain_xml(&self) -> Result<String> {
        expected_descriptor(self.config, &self.container)?.to_xml()
    }

    /// Provision the seed image and delta disk, then build the descriptor.
    ///
    /// Makes no hypervisor calls.
    pub fn provision(&self) -> Result<DomainDescriptor> {
        let arch = ArchConfig::detect()?;
        let name = self.container.vm_name()?;
        debug!("Provisioning VM {} in {}", name, self.work_dir());

        let seed = SeedImageBuilder::new(&self.config.tools).build(&self.container)?;
        let vm = &self.config.vm;
        let disk = qemu_img::create_overlay(
            &self.config.tools,
            self.work_dir(),
            &vm.base_image,
            vm.base_image_format,
        )?;

        DomainBuilder::new(vm, &self.config.bridge.0)
            .with_arch(arch)
            .build(&self.container, &disk, &seed)
    }

    /// Provision all artifacts and define the domain.
    ///
    /// A failure in any step before definition returns without contacting
    /// the hypervisor.
    pub fn create_domain(&mut self) -> Result<DomainHandle> {
        let descriptor = self.provision()?;
        self.lifecycle.define(&descriptor)
    }

    /// Start the defined domain.
    ///
    /// If the start fails the domain is undefined and the handle released,
    /// so no persistent domain outlives the error. The start error is
    /// returned either way.
    pub fn start_domain(&mut self) -> Result<()> {
        let Err(err) = self.lifecycle.launch() else {
            return Ok(());
        };
        if let Err(cleanup) = self.lifecycle.undefine() {
            warn!("Failed to undefine domain after failed start: {cleanup}");
        }
        self.lifecycle.close();
        Err(err)
    }
}
