//! Owns every adapter a process has opened.
//!
//! Most callers only ever run one adapter and could construct `Adapter` directly; `Manager`
//! exists for the multi-adapter case (a host with more than one controller, or a test harness
//! juggling a central and a peripheral on separate hardware) so they share one place to look
//! adapters up by index and tear them all down together.

use crate::adapter::{Adapter, AdapterConfig};
use crate::error::Error;
use crate::hci::transport::ControllerTransport;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(unix)]
use crate::hci::transport::LinuxHciSocket;

/// A collection of opened adapters, keyed by the OS adapter index each was opened with.
#[derive(Default)]
pub struct Manager {
    adapters: HashMap<u16, Arc<Adapter>>,
}

impl Manager {
    pub fn new() -> Self {
        Manager { adapters: HashMap::new() }
    }

    /// Opens the platform's raw HCI user-channel socket for `adapter_index` and starts an
    /// `Adapter` on it.
    #[cfg(unix)]
    pub fn open_adapter(&mut self, adapter_index: u16, config: AdapterConfig) -> Result<Arc<Adapter>, Error> {
        let transport: Arc<dyn ControllerTransport> = Arc::new(LinuxHciSocket::open(adapter_index)?);
        self.add_adapter(adapter_index, config, transport)
    }

    /// Starts an `Adapter` over an already-constructed transport, for platforms without a
    /// built-in socket transport or for tests driving a fake one.
    pub fn add_adapter(&mut self, adapter_index: u16, config: AdapterConfig, transport: Arc<dyn ControllerTransport>) -> Result<Arc<Adapter>, Error> {
        let adapter = Adapter::new(config, transport)?;
        self.adapters.insert(adapter_index, Arc::clone(&adapter));
        Ok(adapter)
    }

    pub fn adapter(&self, adapter_index: u16) -> Option<Arc<Adapter>> {
        self.adapters.get(&adapter_index).cloned()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<Adapter>> {
        self.adapters.values()
    }

    /// Closes every adapter's transport and blocks until its HCI reader thread and its own
    /// event-dispatch thread have both exited, then drops all of them.
    pub fn shutdown(&mut self) {
        for adapter in self.adapters.values() {
            adapter.shutdown();
        }
        self.adapters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manager_has_no_adapters() {
        let manager = Manager::new();
        assert!(manager.adapter(0).is_none());
        assert_eq!(manager.adapters().count(), 0);
    }
}
