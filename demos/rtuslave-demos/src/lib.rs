//! Shared plumbing for the demo binaries
//!
//! Each demo wires a kernel to the in-memory loopback link and plays both
//! sides of the bus in one process: the slave via `kernel.poll()`, the
//! master by injecting synthesized request frames and draining the response
//! bytes. Storage is a shared [`MemoryStore`], so a requested reboot can be
//! simulated by rebuilding the kernel over the same backing.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use rtuslave_frame::LoopbackLink;
use rtuslave_kernel::{RebootHook, SlaveKernel};

/// Demo runtime configuration, loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Log filter when RUST_LOG is not set
    pub log_level: String,
    /// Simulated non-volatile storage size in bytes
    pub store_bytes: usize,
    /// Poll cadence of the slave main loop
    pub poll_interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store_bytes: 64,
            poll_interval_ms: 1,
        }
    }
}

/// Load a config file, falling back to defaults when absent or malformed.
pub fn load_config(path: &Path) -> DemoConfig {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(err) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), err);
                DemoConfig::default()
            },
        },
        Err(_) => DemoConfig::default(),
    }
}

/// Initialize the tracing subscriber.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Reboot hook that asks the demo main loop to reconstruct the kernel.
#[derive(Debug, Clone, Default)]
pub struct RestartSignal {
    requested: Rc<Cell<bool>>,
}

impl RestartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a pending restart request.
    pub fn take(&self) -> bool {
        self.requested.replace(false)
    }
}

impl RebootHook for RestartSignal {
    fn reboot(&mut self) {
        info!("Reboot requested, restarting the kernel");
        self.requested.set(true);
    }
}

/// One in-process master transaction: inject the request, give the slave a
/// poll, collect whatever it answered.
pub fn transact(kernel: &mut SlaveKernel, line: &LoopbackLink, request: &[u8]) -> Vec<u8> {
    line.inject(request);
    kernel.poll();
    line.take_output()
}
