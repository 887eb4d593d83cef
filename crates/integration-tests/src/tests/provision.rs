//! Tests for artifact provisioning through fake external tools
//!
//! These verify:
//! - `seed` writes user-data, meta-data and seed.img in the work directory
//! - a missing ISO tool aborts before any file is written
//! - a failing disk tool leaves no partial overlay behind
//! - `create` reports an unreachable hypervisor as a connection failure

use color_eyre::eyre::eyre;
use color_eyre::Result;
use integration_tests::integration_test;
use linkme::distributed_slice;

use crate::TestEnv;

fn test_seed_image_built() -> Result<()> {
    let env = TestEnv::new()?;
    env.fake_tool("genisoimage", &format!("echo \"$@\" > {}/iso-args\ntouch \"$2\"", env.root))?;

    let output = env.run("seed", &[env.container.as_str()])?;
    output.ensure_success("vmisolate seed")?;
    let seed = env.work.join("seed.img");
    if output.stdout.trim() != seed.as_str() {
        return Err(eyre!("unexpected seed path: {}", output.stdout));
    }
    if env.work_files()? != ["meta-data", "seed.img", "user-data"] {
        return Err(eyre!("unexpected work files: {:?}", env.work_files()?));
    }

    let user_data = std::fs::read_to_string(env.work.join("user-data"))?;
    if !user_data.contains("chroot /mnt /bin/sh -c 'echo hi there' > /dev/hvc1 2>&1") {
        return Err(eyre!("unexpected user-data:\n{user_data}"));
    }
    let meta_data = std::fs::read_to_string(env.work.join("meta-data"))?;
    for needle in ["address 172.17.0.2", "netmask 255.255.0.0", "gateway 172.17.0.1"] {
        if !meta_data.contains(needle) {
            return Err(eyre!("missing {needle} in meta-data:\n{meta_data}"));
        }
    }

    let args = std::fs::read_to_string(env.root.join("iso-args"))?;
    let expected = format!(
        "-output {w}/seed.img -volid cidata -joliet -rock {w}/user-data {w}/meta-data",
        w = env.work
    );
    if args.trim() != expected {
        return Err(eyre!("unexpected genisoimage arguments: {args}"));
    }
    Ok(())
}
integration_test!(test_seed_image_built);

fn test_seed_without_iso_tool() -> Result<()> {
    let env = TestEnv::new()?;
    let output = env.run("seed", &[env.container.as_str()])?;
    output.ensure_failure("vmisolate seed without genisoimage", "genisoimage is not installed")?;
    if !env.work_files()?.is_empty() {
        return Err(eyre!("files written: {:?}", env.work_files()?));
    }
    Ok(())
}
integration_test!(test_seed_without_iso_tool);

fn test_disk_tool_failure() -> Result<()> {
    let env = TestEnv::new()?;
    env.fake_tool(
        "qemu-img",
        "eval last=\\${$#}\ntouch \"$last\"\necho 'Could not open backing file' >&2\nexit 1",
    )?;
    let output = env.run("disk", &[env.container.as_str()])?;
    output.ensure_failure("vmisolate disk", "Could not open backing file")?;
    if env.work.join("disk.img").exists() {
        return Err(eyre!("partial disk.img left behind"));
    }
    Ok(())
}
integration_test!(test_disk_tool_failure);

fn test_disk_overlay_created() -> Result<()> {
    let env = TestEnv::new()?;
    env.fake_tool(
        "qemu-img",
        &format!("echo \"$@\" > {}/disk-args\neval last=\\${{$#}}\ntouch \"$last\"", env.root),
    )?;
    let output = env.run("disk", &[env.container.as_str()])?;
    output.ensure_success("vmisolate disk")?;

    let args = std::fs::read_to_string(env.root.join("disk-args"))?;
    let expected = format!(
        "create -f qcow2 -b {}/base.img -F raw {}/disk.img",
        env.root, env.work
    );
    if args.trim() != expected {
        return Err(eyre!("unexpected qemu-img arguments: {args}"));
    }
    Ok(())
}
integration_test!(test_disk_overlay_created);

fn test_create_without_hypervisor() -> Result<()> {
    let env = TestEnv::new()?;
    env.fake_tool("virsh", "echo 'failed to connect to the hypervisor' >&2\nexit 1")?;
    let output = env.run("create", &[env.container.as_str()])?;
    output.ensure_failure("vmisolate create", "failed to connect to libvirt daemon")?;
    if !env.work_files()?.is_empty() {
        return Err(eyre!("create provisioned without a connection"));
    }
    Ok(())
}
integration_test!(test_create_without_hypervisor);
