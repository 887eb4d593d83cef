//! Command-line entry point for provisioning and running VM-isolated containers.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::Context as _, Report, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use vmisolate::cloud_init::SeedImageBuilder;
use vmisolate::config::DriverConfig;
use vmisolate::container::ContainerContext;
use vmisolate::driver::{self, IsolatedContainer, LibvirtDriver};
use vmisolate::libvirt::virsh::VirshConnection;
use vmisolate::qemu_img;

/// Run containers inside libvirt-managed KVM virtual machines.
///
/// Each command takes a container description in JSON form (ID, root
/// filesystem, entrypoint, network assignments and work directory) and
/// generates the VM artifacts for it in that work directory.
#[derive(Parser)]
struct Cli {
    /// Driver configuration file (TOML); built-in defaults are used if omitted
    #[clap(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Container description argument shared by all commands
#[derive(Parser)]
struct ContainerArg {
    /// Path to the container description (JSON)
    container: Utf8PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the domain XML for a container without provisioning anything
    Xml(ContainerArg),

    /// Build only the cloud-init seed image
    Seed(ContainerArg),

    /// Build only the copy-on-write overlay disk
    Disk(ContainerArg),

    /// Provision all artifacts and define the domain
    Create {
        #[clap(flatten)]
        container: ContainerArg,

        /// Start the domain once it is defined
        #[clap(long)]
        start: bool,
    },

    /// Create and start the domain, then tear it down on SIGINT or SIGTERM
    Run(ContainerArg),
}

fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn create(
    ctx: &mut IsolatedContainer<'_, VirshConnection>,
    start: bool,
) -> Result<()> {
    let handle = ctx.create_domain()?;
    println!("Defined domain {handle}");
    if start {
        ctx.start_domain()?;
        println!("Started domain {}", handle.name);
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => debug!("SIGTERM received"),
        _ = sigint.recv() => debug!("SIGINT received"),
    }
    Ok(())
}

fn run(ctx: &mut IsolatedContainer<'_, VirshConnection>) -> Result<()> {
    create(ctx, true)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Init tokio runtime")?;
    info!("Domain running; press Ctrl-C to stop");
    let waited = rt.block_on(wait_for_shutdown_signal());

    // Tear down even if waiting failed, reporting the first error
    let lifecycle = ctx.lifecycle();
    let teardown = lifecycle.shutdown().and_then(|()| lifecycle.undefine());
    if teardown.is_err() {
        warn!("Domain teardown incomplete; releasing handle");
    }
    lifecycle.close();
    waited?;
    teardown?;
    Ok(())
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = DriverConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Xml(arg) => {
            let container = ContainerContext::load(&arg.container)?;
            let xml = driver::expected_descriptor(&config, &container)?.to_xml()?;
            println!("{xml}");
        }
        Commands::Seed(arg) => {
            let container = ContainerContext::load(&arg.container)?;
            let seed = SeedImageBuilder::new(&config.tools).build(&container)?;
            println!("{seed}");
        }
        Commands::Disk(arg) => {
            let container = ContainerContext::load(&arg.container)?;
            let disk = qemu_img::create_overlay(
                &config.tools,
                &container.work_dir,
                &config.vm.base_image,
                config.vm.base_image_format,
            )?;
            println!("{disk}");
        }
        Commands::Create { container, start } => {
            let container = ContainerContext::load(&container.container)?;
            let driver = LibvirtDriver::init(config)?;
            create(&mut driver.context(container), start)?;
        }
        Commands::Run(arg) => {
            let container = ContainerContext::load(&arg.container)?;
            let driver = LibvirtDriver::init(config)?;
            run(&mut driver.context(container))?;
        }
    }
    Ok(())
}
