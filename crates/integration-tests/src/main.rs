//! Integration tests for vmisolate
//!
//! These run the `vmisolate` binary against fake provisioning tools placed on
//! a private search path, so no libvirt daemon is needed.

use std::os::unix::fs::PermissionsExt;
use std::process::Output;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};

pub(crate) use integration_tests::{container_json, INTEGRATION_TESTS};

mod tests {
    pub mod cli;
    pub mod provision;
}

/// Container ID used by every test
pub(crate) const CONTAINER_ID: &str = "abcdef0123456789";

/// Get the path to the vmisolate binary, checking VMISOLATE_PATH env var
/// first, then falling back to "vmisolate"
pub(crate) fn get_vmisolate_command() -> Result<String> {
    if let Ok(path) = std::env::var("VMISOLATE_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/vmisolate", "target/release/vmisolate"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set VMISOLATE_PATH={path} to run using this binary"
        ));
    }
    Ok("vmisolate".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Create from a raw Output
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    /// Fail unless the command succeeded
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if !self.output.status.success() {
            return Err(eyre!("{context} failed: {}", self.stderr));
        }
        Ok(())
    }

    /// Fail unless the command failed with `needle` in its stderr
    pub fn ensure_failure(&self, context: &str, needle: &str) -> Result<()> {
        if self.output.status.success() {
            return Err(eyre!("{context} unexpectedly succeeded: {}", self.stdout));
        }
        if !self.stderr.contains(needle) {
            return Err(eyre!(
                "{context}: expected {needle:?} in stderr, got: {}",
                self.stderr
            ));
        }
        Ok(())
    }
}

/// A scratch environment: a private tool directory, a work directory, a
/// driver configuration pointing at the tool directory and a container
/// description pointing at the work directory.
pub(crate) struct TestEnv {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
    pub bin: Utf8PathBuf,
    pub work: Utf8PathBuf,
    pub config: Utf8PathBuf,
    pub container: Utf8PathBuf,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("Failed to create temp directory")?;
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())?;
        let bin = root.join("bin");
        let work = root.join("work");
        std::fs::create_dir(&bin)?;
        std::fs::create_dir(&work)?;

        let config = root.join("driver.toml");
        std::fs::write(
            &config,
            format!(
                "bridge = \"br-test\"\n\n[vm]\nbase-image = \"{root}/base.img\"\n\n\
                 [tools]\nsearch-path = \"{bin}\"\n"
            ),
        )?;
        let container = root.join("container.json");
        std::fs::write(&container, container_json(CONTAINER_ID, work.as_str()))?;

        Ok(Self {
            _dir: dir,
            root,
            bin,
            work,
            config,
            container,
        })
    }

    /// Install an executable shell script named `name` on the tool path
    pub fn fake_tool(&self, name: &str, body: &str) -> Result<()> {
        let path = self.bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    /// Names of the files in the work directory, sorted
    pub fn work_files(&self) -> Result<Vec<String>> {
        let mut names = std::fs::read_dir(&self.work)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Run `vmisolate --config <driver.toml> <verb> [args]`, capturing output
    pub fn run(&self, verb: &str, args: &[&str]) -> Result<CapturedOutput> {
        let sh = xshell::Shell::new()?;
        let bin = get_vmisolate_command()?;
        let config = self.config.as_str();
        let output = xshell::cmd!(sh, "{bin} --config {config} {verb} {args...}")
            .ignore_status()
            .output()?;
        Ok(CapturedOutput::new(output))
    }
}

fn main() {
    let args = Arguments::from_args();

    // Collect tests from the distributed slice
    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
        })
        .collect();

    // Run the tests and exit with the result
    libtest_mimic::run(&args, tests).exit();
}
