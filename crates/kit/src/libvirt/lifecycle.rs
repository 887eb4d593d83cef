//! Per-container domain state machine
//!
//! ```text
//! Undefined --define--> Defined --launch--> Running <--pause--> Paused
//!                                              |                  |
//!                                              +----shutdown------+
//!                                                      |
//!                                                      v
//! Undefined <------------------undefine------------ Shutdown
//! ```
//!
//! Each state other than [`DomainState::Undefined`] carries the handle of the
//! defined domain, so an operation that needs a domain cannot be attempted
//! without one. Rejected operations return [`Error::InvalidState`] and leave
//! the state untouched; hypervisor failures leave it at the last state the
//! hypervisor confirmed.

use std::fmt;

use tracing::{debug, error, info};

use super::domain::DomainDescriptor;
use super::{DomainHandle, Hypervisor};
use crate::error::{Error, Result};

/// Lifecycle state of a container's domain, as last confirmed by the hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DomainState {
    /// No domain handle is held
    #[default]
    Undefined,
    /// The domain is defined but not started
    Defined(DomainHandle),
    /// The domain is running
    Running(DomainHandle),
    /// The domain is suspended
    Paused(DomainHandle),
    /// The domain has been destroyed but is still defined
    Shutdown(DomainHandle),
}

impl DomainState {
    /// Handle of the defined domain, if any
    pub fn handle(&self) -> Option<&DomainHandle> {
        match self {
            DomainState::Undefined => None,
            DomainState::Defined(h)
            | DomainState::Running(h)
            | DomainState::Paused(h)
            | DomainState::Shutdown(h) => Some(h),
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainState::Undefined => f.write_str("no domain is defined"),
            DomainState::Defined(h) => write!(f, "domain {h} is defined but not running"),
            DomainState::Running(h) => write!(f, "domain {h} is running"),
            DomainState::Paused(h) => write!(f, "domain {h} is paused"),
            DomainState::Shutdown(h) => write!(f, "domain {h} is shut down"),
        }
    }
}

/// Drives one container's domain through its lifecycle.
///
/// Not reentrant: callers must not drive the same controller from several
/// threads at once.
#[derive(Debug)]
pub struct LifecycleController<'h, H: Hypervisor> {
    hypervisor: &'h H,
    state: DomainState,
}

impl<'h, H: Hypervisor> LifecycleController<'h, H> {
    /// A controller with no domain defined
    pub fn new(hypervisor: &'h H) -> Self {
        Self {
            hypervisor,
            state: DomainState::Undefined,
        }
    }

    /// Current state
    pub fn state(&self) -> &DomainState {
        &self.state
    }

    /// Handle of the defined domain, if any
    pub fn handle(&self) -> Option<&DomainHandle> {
        self.state.handle()
    }

    fn reject(&self, operation: &'static str) -> Error {
        let err = Error::InvalidState {
            operation,
            detail: self.state.to_string(),
        };
        error!("{}", err);
        err
    }

    fn report(operation: &'static str, err: Error) -> Error {
        error!("Domain {} failed: {}", operation, err);
        err
    }

    /// Serialize `descriptor` and define it with the hypervisor.
    ///
    /// Nothing reaches the hypervisor if serialization fails.
    pub fn define(&mut self, descriptor: &DomainDescriptor) -> Result<DomainHandle> {
        if self.state != DomainState::Undefined {
            return Err(self.reject("define"));
        }
        let xml = descriptor.to_xml()?;
        debug!("Domain XML for {}:\n{}", descriptor.name, xml);
        let handle = self
            .hypervisor
            .define_domain(&xml)
            .map_err(|e| Self::report("define", e))?;
        info!("Defined domain {}", handle);
        self.state = DomainState::Defined(handle.clone());
        Ok(handle)
    }

    /// Start the defined domain.
    pub fn launch(&mut self) -> Result<()> {
        let DomainState::Defined(handle) = &self.state else {
            return Err(self.reject("launch"));
        };
        let handle = handle.clone();
        self.hypervisor
            .create(&handle)
            .map_err(|e| Self::report("launch", e))?;
        info!("Domain has started: {}", handle);
        self.state = DomainState::Running(handle);
        Ok(())
    }

    /// Suspend (`pause == true`) a running domain or resume a paused one.
    pub fn pause(&mut self, pause: bool) -> Result<()> {
        match (&self.state, pause) {
            (DomainState::Running(handle), true) => {
                let handle = handle.clone();
                self.hypervisor
                    .suspend(&handle)
                    .map_err(|e| Self::report("pause", e))?;
                info!("Domain paused: {}", handle);
                self.state = DomainState::Paused(handle);
                Ok(())
            }
            (DomainState::Paused(handle), false) => {
                let handle = handle.clone();
                self.hypervisor
                    .resume(&handle)
                    .map_err(|e| Self::report("resume", e))?;
                info!("Domain resumed: {}", handle);
                self.state = DomainState::Running(handle);
                Ok(())
            }
            (_, true) => Err(self.reject("pause")),
            (_, false) => Err(self.reject("resume")),
        }
    }

    /// Forcibly stop a running or paused domain.
    pub fn shutdown(&mut self) -> Result<()> {
        let handle = match &self.state {
            DomainState::Running(h) | DomainState::Paused(h) => h.clone(),
            _ => return Err(self.reject("shutdown")),
        };
        self.hypervisor
            .destroy(&handle)
            .map_err(|e| Self::report("shutdown", e))?;
        info!("Domain destroyed: {}", handle);
        self.state = DomainState::Shutdown(handle);
        Ok(())
    }

    /// Remove the domain's persistent definition.
    ///
    /// Accepted in any state holding a handle. A domain that is still
    /// running keeps running as a transient domain until it stops.
    pub fn undefine(&mut self) -> Result<()> {
        let Some(handle) = self.state.handle().cloned() else {
            return Err(self.reject("undefine"));
        };
        self.hypervisor
            .undefine(&handle)
            .map_err(|e| Self::report("undefine", e))?;
        info!("Domain undefined: {}", handle);
        self.state = DomainState::Undefined;
        Ok(())
    }

    /// Forget the domain handle without contacting the hypervisor.
    ///
    /// For use when the domain is already known to be gone. Calling this on
    /// a live domain orphans it from this controller.
    pub fn close(&mut self) {
        if let Some(handle) = self.state.handle() {
            debug!("Releasing handle for domain {}", handle);
        }
        self.state = DomainState::Undefined;
    }
}
