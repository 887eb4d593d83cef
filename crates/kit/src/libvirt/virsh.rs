//! A [`Hypervisor`] backed by the `virsh` command line client.
//!
//! Every call runs `virsh -c <uri> ...` to completion; nothing is cached
//! between calls apart from the resolved binary and the URI.

use std::io::Write;
use std::process::Command;

use camino::Utf8PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DomainHandle, Hypervisor};
use crate::cmdext::CommandRunExt;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::xml_utils::parse_xml_dom;

const NEW_DOMAIN: &str = "<new>";

/// Connection to a libvirt daemon through `virsh`
#[derive(Debug, Clone)]
pub struct VirshConnection {
    virsh: Utf8PathBuf,
    tool: String,
    uri: String,
}

impl VirshConnection {
    /// Resolve `virsh` and verify the daemon at `uri` answers.
    pub fn connect(tools: &ToolsConfig, uri: &str) -> Result<Self> {
        let virsh = tools.resolve(&tools.virsh).map_err(|e| Error::Connection {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        let conn = Self {
            virsh,
            tool: tools.virsh.clone(),
            uri: uri.to_string(),
        };
        let canonical = conn
            .command()
            .arg("uri")
            .run_tool_capture(&conn.tool)
            .map_err(|e| Error::Connection {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Connected to libvirt at {}", canonical);
        Ok(conn)
    }

    /// The URI this connection was opened with
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.virsh);
        cmd.arg("-c").arg(&self.uri);
        cmd
    }

    fn run(&self, operation: &'static str, domain: &str, args: &[&str]) -> Result<String> {
        self.command()
            .args(args)
            .run_tool_capture(&self.tool)
            .map_err(|e| domain_error(operation, domain, e))
    }

    fn domain_uuid(&self, name: &str) -> Result<Uuid> {
        let uuid = self.run("define", name, &["domuuid", name])?;
        Uuid::parse_str(uuid.trim()).map_err(|e| Error::DomainOperation {
            operation: "define",
            domain: name.to_string(),
            reason: format!("unparseable domain UUID {uuid:?}: {e}"),
        })
    }

    fn run_on(&self, operation: &'static str, verb: &str, domain: &DomainHandle) -> Result<()> {
        let uuid = domain.uuid.to_string();
        self.run(operation, &domain.name, &[verb, &uuid]).map(|_| ())
    }
}

fn domain_error(operation: &'static str, domain: &str, err: Error) -> Error {
    let reason = match err {
        Error::ExternalTool { stderr, .. } if !stderr.is_empty() => stderr,
        other => other.to_string(),
    };
    Error::DomainOperation {
        operation,
        domain: domain.to_string(),
        reason,
    }
}

impl Hypervisor for VirshConnection {
    fn define_domain(&self, xml: &str) -> Result<DomainHandle> {
        let name = parse_xml_dom(xml)?
            .child("name")
            .map(|n| n.text_content().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::serialization("domain XML", "missing <name> element"))?;

        let mut file = tempfile::Builder::new()
            .prefix("vmisolate-")
            .suffix(".xml")
            .tempfile()
            .map_err(|e| Error::file_io(std::env::temp_dir().to_string_lossy().into_owned(), e))?;
        let xml_path = Utf8PathBuf::try_from(file.path().to_path_buf())
            .map_err(|e| Error::serialization("domain XML path", e))?;
        file.write_all(xml.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Error::file_io(xml_path.clone(), e))?;

        self.run("define", NEW_DOMAIN, &["define", xml_path.as_str()])?;
        let uuid = self.domain_uuid(&name).inspect_err(|_| {
            // The domain exists but no handle will be returned for it
            if let Err(e) = self.run("undefine", &name, &["undefine", &name]) {
                warn!("Failed to undefine {} after define error: {}", name, e);
            }
        })?;
        Ok(DomainHandle { name, uuid })
    }

    fn create(&self, domain: &DomainHandle) -> Result<()> {
        self.run_on("start", "start", domain)
    }

    fn destroy(&self, domain: &DomainHandle) -> Result<()> {
        self.run_on("shutdown", "destroy", domain)
    }

    fn undefine(&self, domain: &DomainHandle) -> Result<()> {
        self.run_on("undefine", "undefine", domain)
    }

    fn suspend(&self, domain: &DomainHandle) -> Result<()> {
        self.run_on("pause", "suspend", domain)
    }

    fn resume(&self, domain: &DomainHandle) -> Result<()> {
        self.run_on("resume", "resume", domain)
    }
}
