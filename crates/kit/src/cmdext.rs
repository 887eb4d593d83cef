//! Helpers for running external tools and mapping their failures

use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Extension trait for running an external tool to completion
pub trait CommandRunExt {
    /// Run the command, failing with [`Error::ExternalTool`] on a non-zero exit
    fn run_tool(&mut self, tool: &str) -> Result<()>;

    /// Run the command and return its trimmed standard output
    fn run_tool_capture(&mut self, tool: &str) -> Result<String>;
}

impl CommandRunExt for Command {
    fn run_tool(&mut self, tool: &str) -> Result<()> {
        self.run_tool_capture(tool).map(|_| ())
    }

    fn run_tool_capture(&mut self, tool: &str) -> Result<String> {
        tracing::debug!("Running {:?}", self);
        let output = self
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::ExternalTool {
                tool: tool.to_string(),
                status: "failed to spawn".to_string(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::ExternalTool {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
