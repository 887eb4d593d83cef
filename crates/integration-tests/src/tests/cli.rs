//! Tests for commands that never touch a hypervisor or external tool

use color_eyre::eyre::eyre;
use color_eyre::Result;
use integration_tests::integration_test;
use linkme::distributed_slice;

use crate::TestEnv;

/// `xml` prints the domain for the container without writing anything
fn test_xml_prints_domain() -> Result<()> {
    let env = TestEnv::new()?;
    let output = env.run("xml", &[env.container.as_str()])?;
    output.ensure_success("vmisolate xml")?;

    let xml = &output.stdout;
    for needle in [
        "<domain type=\"kvm\">",
        "<name>abcdef012345</name>",
        "<memory unit=\"MiB\">256</memory>",
        "<source bridge=\"br-test\"/>",
        "<mac address=\"02:42:ac:11:00:02\"/>",
        "<target dev=\"sda\" bus=\"scsi\"/>",
        "<target dev=\"sdb\" bus=\"scsi\"/>",
        "<seclabel type=\"none\"/>",
    ] {
        if !xml.contains(needle) {
            return Err(eyre!("missing {needle} in:\n{xml}"));
        }
    }
    let base = format!("{}/base.img", env.root);
    if !xml.contains(&base) {
        return Err(eyre!("base image {base} not referenced:\n{xml}"));
    }
    if !env.work_files()?.is_empty() {
        return Err(eyre!("xml must not provision artifacts"));
    }
    Ok(())
}
integration_test!(test_xml_prints_domain);

fn test_invalid_config_rejected() -> Result<()> {
    let env = TestEnv::new()?;
    std::fs::write(&env.config, "bridg = \"typo\"\n")?;
    let output = env.run("xml", &[env.container.as_str()])?;
    output.ensure_failure("vmisolate xml with bad config", "invalid driver configuration")
}
integration_test!(test_invalid_config_rejected);

fn test_invalid_container_rejected() -> Result<()> {
    let env = TestEnv::new()?;
    std::fs::write(&env.container, "{\"id\": \"abc\"}")?;
    let output = env.run("xml", &[env.container.as_str()])?;
    output.ensure_failure("vmisolate xml with bad container", "invalid container")
}
integration_test!(test_invalid_container_rejected);
