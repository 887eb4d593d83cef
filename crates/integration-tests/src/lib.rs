//! Shared library code for integration tests
//!
//! Tests register themselves into [`INTEGRATION_TESTS`] with the
//! [`integration_test!`] macro and are collected by the libtest-mimic
//! harness in `main.rs`.

// Unfortunately needed here to work with linkme
#![allow(unsafe_code)]

use linkme::distributed_slice;

/// A test function that returns a Result
pub type TestFn = fn() -> color_eyre::Result<()>;

/// Metadata for a registered integration test
#[derive(Debug)]
pub struct IntegrationTest {
    /// Name of the integration test
    pub name: &'static str,
    /// Test function to execute
    pub f: TestFn,
}

impl IntegrationTest {
    /// Create a new integration test with the given name and function
    pub const fn new(name: &'static str, f: TestFn) -> Self {
        Self { name, f }
    }
}

/// Distributed slice holding all registered integration tests
#[distributed_slice]
pub static INTEGRATION_TESTS: [IntegrationTest];

/// Register an integration test with less boilerplate.
///
/// # Examples
///
/// ```ignore
/// fn test_xml_output() -> Result<()> {
///     let output = run_vmisolate(&["xml", "container.json"])?;
///     output.assert_success("xml");
///     Ok(())
/// }
/// integration_test!(test_xml_output);
/// ```
#[macro_export]
macro_rules! integration_test {
    ($fn_name:ident) => {
        ::paste::paste! {
            #[distributed_slice($crate::INTEGRATION_TESTS)]
            static [<$fn_name:upper>]: $crate::IntegrationTest =
                $crate::IntegrationTest::new(stringify!($fn_name), $fn_name);
        }
    };
}

/// Render a container description for the driver.
///
/// The container sits on the bridge network as 172.17.0.2/16 and runs
/// `/bin/sh -c 'echo hi there'`.
pub fn container_json(id: &str, work_dir: &str) -> String {
    format!(
        r#"{{
  "id": "{id}",
  "rootfs": "/var/lib/docker/overlay2/{id}/merged",
  "path": "/bin/sh",
  "args": ["-c", "echo hi there"],
  "networks": {{
    "bridge": {{
      "ip-address": "172.17.0.2",
      "ip-prefix-len": 16,
      "gateway": "172.17.0.1",
      "mac-address": "02:42:ac:11:00:02"
    }}
  }},
  "work-dir": "{work_dir}"
}}"#
    )
}
