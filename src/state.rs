// src/state.rs

//! State owned by the binary for the lifetime of one invocation.

use crate::core::cache::PolicyCache;
use crate::system::process_registry::ProcessRegistry;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Process-wide state shared by every command handler.
///
/// Created once by the binary. Owns the async runtime, the registry of
/// spawned children (with its signal hooks already installed) and the
/// policy cache.
#[derive(Debug)]
pub struct AppContext {
    runtime: Runtime,
    /// Every child spawned by this invocation.
    pub registry: Arc<ProcessRegistry>,
    /// Loaded once, shared by every executor.
    pub policy_cache: Arc<PolicyCache>,
}

impl AppContext {
    /// Builds the runtime and installs the signal hooks inside it.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread().enable_all().build()?;
        let registry = Arc::new(ProcessRegistry::new());
        {
            let _entered = runtime.enter();
            registry.install_signal_hooks();
        }
        Ok(Self {
            runtime,
            registry,
            policy_cache: Arc::new(PolicyCache::new()),
        })
    }

    /// Runs a future to completion on the shared runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
