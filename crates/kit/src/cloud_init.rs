//! Cloud-init NoCloud seed image generation
//!
//! The guest's cloud-init agent reads a small ISO volume labelled `cidata`
//! containing two documents:
//!
//! - `user-data` mounts the container root filesystem shared over 9p, runs the
//!   container's command chrooted into it with output sent to the control
//!   console, then powers the guest off.
//! - `meta-data` configures `eth0` statically with the container's bridge
//!   address.
//!
//! The ISO is authored with `genisoimage` using absolute paths, so building
//! seeds for several containers concurrently is safe.

use camino::{Utf8Path, Utf8PathBuf};
use indoc::formatdoc;
use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::process::Command;
use tracing::{debug, warn};

use crate::cmdext::CommandRunExt;
use crate::config::ToolsConfig;
use crate::container::ContainerContext;
use crate::error::{Error, Result};
use crate::network::GuestNetwork;

/// File name of the seed image inside the VM work directory
pub const SEED_IMAGE_NAME: &str = "seed.img";
/// Volume ID cloud-init's NoCloud datasource looks for
pub const SEED_VOLUME_ID: &str = "cidata";
/// Mount tag of the container root filesystem share
pub const SHARE_MOUNT_TAG: &str = "share_dir";
/// Guest device of the control console
pub const CONTROL_CONSOLE_DEVICE: &str = "/dev/hvc1";

const USER_DATA: &str = "user-data";
const META_DATA: &str = "meta-data";

/// Path of the seed image for a work directory
pub fn seed_image_path(work_dir: &Utf8Path) -> Utf8PathBuf {
    work_dir.join(SEED_IMAGE_NAME)
}

/// Quote an argument for the guest shell.
///
/// Arguments containing whitespace are wrapped in single quotes. Other
/// arguments stay unquoted, with any quote character or backslash escaped
/// by a backslash. Empty arguments become `''` so they survive word
/// splitting.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() {
        Cow::Borrowed("''")
    } else if arg.chars().any(char::is_whitespace) {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    } else if arg.contains(['\'', '"', '\\']) {
        let mut escaped = String::with_capacity(arg.len() + 2);
        for c in arg.chars() {
            if matches!(c, '\'' | '"' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        Cow::Owned(escaped)
    } else {
        Cow::Borrowed(arg)
    }
}

/// The container's command line as run inside the guest chroot
pub fn boot_command(path: &str, args: &[String]) -> String {
    std::iter::once(Cow::Borrowed(path))
        .chain(args.iter().map(|a| quote_arg(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the `user-data` document for `command`
pub fn render_user_data(command: &str) -> Result<String> {
    let chroot = format!("chroot /mnt {command} > {CONTROL_CONSOLE_DEVICE} 2>&1");
    // A JSON string is a valid YAML double-quoted scalar
    let chroot =
        serde_json::to_string(&chroot).map_err(|e| Error::serialization(USER_DATA, e))?;
    let user_data = formatdoc! {"
        #cloud-config
        runcmd:
         - mount -t 9p -o trans=virtio {tag} /mnt
         - {chroot}
         - init 0
        ",
        tag = SHARE_MOUNT_TAG,
        chroot = chroot,
    };

    serde_yaml::from_str::<serde_yaml::Value>(&user_data)
        .map_err(|e| Error::serialization(USER_DATA, e))?;
    Ok(user_data)
}

/// Render the `meta-data` document configuring `eth0` statically
pub fn render_meta_data(net: &GuestNetwork) -> String {
    let mut meta_data = formatdoc! {"
        #cloud-config
        network-interfaces: |
          auto eth0
          iface eth0 inet static
          address {address}
          netmask {netmask}
        ",
        address = net.address,
        netmask = net.netmask,
    };
    if let Some(gateway) = net.gateway {
        meta_data.push_str(&format!("  gateway {gateway}\n"));
    }
    meta_data
}

/// Builds the cloud-init seed image for a container
#[derive(Debug)]
pub struct SeedImageBuilder<'a> {
    tools: &'a ToolsConfig,
}

impl<'a> SeedImageBuilder<'a> {
    /// Create a builder using the configured ISO authoring tool
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { tools }
    }

    /// Write `user-data` and `meta-data` into the container's work directory
    /// and package them into `seed.img`, returning the image path.
    ///
    /// Nothing is written when the ISO tool is missing or the network
    /// assignment is invalid.
    pub fn build(&self, container: &ContainerContext) -> Result<Utf8PathBuf> {
        let genisoimage = self.tools.resolve(&self.tools.iso)?;
        debug!("genisoimage path: {}", genisoimage);

        let net = container.guest_network()?;
        let command = boot_command(&container.path, &container.args);
        let user_data = render_user_data(&command)?;
        let meta_data = render_meta_data(&net);
        debug!("The user data is: {}", user_data);
        debug!("The meta data is: {}", meta_data);

        let work_dir = &container.work_dir;
        if !work_dir.is_dir() {
            return Err(Error::file_io(
                work_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "VM work directory missing"),
            ));
        }

        let user_data_path = work_dir.join(USER_DATA);
        let meta_data_path = work_dir.join(META_DATA);
        write_document(&user_data_path, &user_data)?;
        write_document(&meta_data_path, &meta_data)?;

        let seed = seed_image_path(work_dir);
        let result = Command::new(&genisoimage)
            .args(["-output", seed.as_str()])
            .args(["-volid", SEED_VOLUME_ID])
            .args(["-joliet", "-rock"])
            .args([user_data_path.as_str(), meta_data_path.as_str()])
            .run_tool(&self.tools.iso);

        if let Err(e) = result {
            if let Err(rm) = std::fs::remove_file(&seed) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial seed image {}: {}", seed, rm);
                }
            }
            return Err(e);
        }

        Ok(seed)
    }
}

fn write_document(path: &Utf8Path, content: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o700)
        .open(path)
        .map_err(|e| Error::file_io(path, e))?;
    f.write_all(content.as_bytes())
        .map_err(|e| Error::file_io(path, e))?;
    debug!("Wrote {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::fixture;
    use crate::qemu_img::tests::{fake_tool, tools_in};
    use similar_asserts::assert_eq;
    use std::net::Ipv4Addr;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_quote_only_whitespace_args() {
        assert_eq!(quote_arg("-c"), "-c");
        assert_eq!(quote_arg("echo hi there"), "'echo hi there'");
        assert_eq!(quote_arg("tab\there"), "'tab\there'");
        assert_eq!(quote_arg("$HOME;|&"), "$HOME;|&");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn test_quote_escapes_bare_quotes() {
        assert_eq!(quote_arg("it's"), r"it\'s");
        assert_eq!(quote_arg(r#"say"hi"#), r#"say\"hi"#);
        assert_eq!(quote_arg(r"a\b"), r"a\\b");
        assert_eq!(
            boot_command("/bin/echo", &args(&["it's"])),
            r"/bin/echo it\'s"
        );
    }

    #[test]
    fn test_boot_command() {
        assert_eq!(boot_command("/bin/true", &[]), "/bin/true");
        assert_eq!(
            boot_command("/bin/sh", &args(&["-c", "echo hi there"])),
            "/bin/sh -c 'echo hi there'"
        );
    }

    #[test]
    fn test_boot_command_word_splits_back() {
        let cases = [
            args(&["-c", "echo hi there"]),
            args(&["a", "b c", "d\te", "it's a test", ""]),
            args(&["--flag=x y", "plain"]),
            args(&["it's", r#"say"hi"#, r"a\b"]),
            args(&[r#"--msg="it's""#, r"C:\dir\"]),
        ];
        for case in cases {
            let cmd = boot_command("/usr/bin/app", &case);
            let split = shlex::split(&cmd).unwrap();
            assert_eq!(split[0], "/usr/bin/app");
            assert_eq!(&split[1..], case.as_slice(), "{cmd}");
        }
    }

    #[test]
    fn test_user_data() {
        let user_data = render_user_data("/bin/sh -c 'echo hi there'").unwrap();
        assert!(user_data.starts_with("#cloud-config\n"));
        assert!(user_data.contains("chroot /mnt /bin/sh -c 'echo hi there' > /dev/hvc1 2>&1"));

        let doc: serde_yaml::Value = serde_yaml::from_str(&user_data).unwrap();
        let runcmd: Vec<String> = doc["runcmd"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            runcmd,
            vec![
                "mount -t 9p -o trans=virtio share_dir /mnt".to_string(),
                "chroot /mnt /bin/sh -c 'echo hi there' > /dev/hvc1 2>&1".to_string(),
                "init 0".to_string(),
            ]
        );
    }

    #[test]
    fn test_user_data_survives_yaml_specials() {
        let user_data = render_user_data("/bin/echo 'a: b # c' \"q\"").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&user_data).unwrap();
        assert_eq!(
            doc["runcmd"][1].as_str().unwrap(),
            "chroot /mnt /bin/echo 'a: b # c' \"q\" > /dev/hvc1 2>&1"
        );
    }

    #[test]
    fn test_meta_data() {
        let net = GuestNetwork {
            address: Ipv4Addr::new(172, 17, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
            gateway: Some(Ipv4Addr::new(172, 17, 0, 1)),
        };
        assert_eq!(
            render_meta_data(&net),
            indoc::indoc! {"
                #cloud-config
                network-interfaces: |
                  auto eth0
                  iface eth0 inet static
                  address 172.17.0.2
                  netmask 255.255.0.0
                  gateway 172.17.0.1
            "}
        );

        let no_gw = GuestNetwork {
            gateway: None,
            ..net
        };
        assert!(!render_meta_data(&no_gw).contains("gateway"));
    }

    #[test]
    fn test_build_seed_image() {
        let bin = tempfile::tempdir().unwrap();
        let bin = Utf8Path::from_path(bin.path()).unwrap().to_owned();
        let work = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(work.path()).unwrap();
        fake_tool(
            &bin,
            "genisoimage",
            &format!("echo \"$@\" > {bin}/args\ntouch \"$2\""),
        );

        let ctx = fixture(work);
        let tools = tools_in(&bin);
        let seed = SeedImageBuilder::new(&tools).build(&ctx).unwrap();

        assert_eq!(seed, work.join("seed.img"));
        assert!(seed.exists());
        let user_data = std::fs::read_to_string(work.join("user-data")).unwrap();
        assert!(user_data.contains("chroot /mnt /bin/sh -c 'echo hi there' > /dev/hvc1 2>&1"));
        let meta_data = std::fs::read_to_string(work.join("meta-data")).unwrap();
        assert!(meta_data.contains("netmask 255.255.0.0"));

        let mode = std::fs::metadata(work.join("user-data"))
            .unwrap()
            .permissions();
        assert_eq!(
            std::os::unix::fs::PermissionsExt::mode(&mode) & 0o700,
            0o700
        );

        let invocation = std::fs::read_to_string(bin.join("args")).unwrap();
        assert_eq!(
            invocation.trim(),
            format!("-output {work}/seed.img -volid cidata -joliet -rock {work}/user-data {work}/meta-data")
        );
    }

    #[test]
    fn test_missing_tool_writes_nothing() {
        let bin = tempfile::tempdir().unwrap();
        let bin = Utf8Path::from_path(bin.path()).unwrap();
        let work = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(work.path()).unwrap();

        let ctx = fixture(work);
        let tools = tools_in(bin);
        let err = SeedImageBuilder::new(&tools).build(&ctx).unwrap_err();

        assert!(
            matches!(err, Error::ToolNotInstalled { ref tool } if tool == "genisoimage"),
            "{err}"
        );
        assert_eq!(std::fs::read_dir(work).unwrap().count(), 0);
    }

    #[test]
    fn test_invalid_network_writes_nothing() {
        let bin = tempfile::tempdir().unwrap();
        let bin = Utf8Path::from_path(bin.path()).unwrap();
        let work = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(work.path()).unwrap();
        fake_tool(bin, "genisoimage", "exit 0");

        let mut ctx = fixture(work);
        if let Some(bridge) = ctx.networks.get_mut("bridge") {
            bridge.ip_prefix_len = 40;
        }
        let tools = tools_in(bin);
        let err = SeedImageBuilder::new(&tools).build(&ctx).unwrap_err();

        assert!(matches!(err, Error::InvalidNetworkConfig(_)), "{err}");
        assert_eq!(std::fs::read_dir(work).unwrap().count(), 0);
    }

    #[test]
    fn test_tool_failure_leaves_no_seed() {
        let bin = tempfile::tempdir().unwrap();
        let bin = Utf8Path::from_path(bin.path()).unwrap();
        let work = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(work.path()).unwrap();
        fake_tool(bin, "genisoimage", "touch \"$2\"\nexit 2");

        let ctx = fixture(work);
        let tools = tools_in(bin);
        let err = SeedImageBuilder::new(&tools).build(&ctx).unwrap_err();

        assert!(matches!(err, Error::ExternalTool { .. }), "{err}");
        assert!(!work.join("seed.img").exists());
    }
}
