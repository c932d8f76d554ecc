//! # Port-Conflict Resolution
//!
//! Before a command that binds ports is spawned, each requested port is
//! checked for an owning process. Owners are killed (after confirmation,
//! unless running unattended) and the port is polled until it is free or
//! the wait budget runs out.
//!
//! Platform lookups sit behind [`PortInspector`] so the resolution loop can
//! be exercised without real sockets. They shell out, so every call runs on
//! the blocking pool.

use crate::{
    models::PortsConfig,
    system::{
        process_registry::{Termination, terminate_pid},
        prompt::Confirmation,
    },
};
use colored::*;
use std::{fmt, process::Command, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum PortError {
    /// The user refused to kill the owners of `port`.
    #[error("Port {port} is in use by pid(s) {} and cleanup was declined.", join_pids(pids))]
    Declined { port: u16, pids: Vec<u32> },
    /// `port` still had an owner when the wait budget ran out.
    #[error("Port {port} was still in use after waiting {} ms.", waited.as_millis())]
    Timeout { port: u16, waited: Duration },
    /// The confirmation prompt itself failed.
    #[error("Could not ask for confirmation: {0}")]
    Prompt(#[from] dialoguer::Error),
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Finds and stops the processes holding a port.
pub trait PortInspector: Send + Sync + fmt::Debug {
    /// Pids listening on `port`; empty when the port is free.
    fn owners(&self, port: u16) -> Vec<u32>;
    /// Force-kills `pids`.
    fn terminate(&self, pids: &[u32]);
    /// Kills every process whose command line matches `pattern`.
    fn sweep(&self, pattern: &str);
}

/// Uses `lsof`/`pkill` on Unix and `netstat`/`taskkill` on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortInspector;

impl PortInspector for SystemPortInspector {
    #[cfg(not(windows))]
    fn owners(&self, port: u16) -> Vec<u32> {
        let output = match Command::new("lsof")
            .args(["-ti", &format!("tcp:{port}")])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Could not run lsof to inspect port {}: {}", port, e);
                return Vec::new();
            }
        };
        let mut pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    #[cfg(windows)]
    fn owners(&self, port: u16) -> Vec<u32> {
        let output = match Command::new("netstat").args(["-ano", "-p", "tcp"]).output() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Could not run netstat to inspect port {}: {}", port, e);
                return Vec::new();
            }
        };
        let suffix = format!(":{port}");
        let mut pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| {
                let columns: Vec<&str> = line.split_whitespace().collect();
                match columns.as_slice() {
                    [_, local, _, "LISTENING", pid] if local.ends_with(&suffix) => pid.parse().ok(),
                    _ => None,
                }
            })
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    fn terminate(&self, pids: &[u32]) {
        for &pid in pids {
            if !terminate_pid(pid, Termination::Forced) {
                log::debug!("Could not signal pid {} (already gone?)", pid);
            }
        }
    }

    #[cfg(not(windows))]
    fn sweep(&self, pattern: &str) {
        match Command::new("pkill").args(["-f", pattern]).status() {
            Ok(status) => log::debug!("pkill -f '{}' exited with {}", pattern, status),
            Err(e) => log::warn!("Could not run pkill for '{}': {}", pattern, e),
        }
    }

    #[cfg(windows)]
    fn sweep(&self, pattern: &str) {
        log::debug!("Process sweep for '{}' is not supported on Windows.", pattern);
    }
}

/// A port whose stale watcher processes are swept alongside its owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxWatcher {
    /// The port whose cleanup triggers the sweep.
    pub port: u16,
    /// Command-line pattern handed to the sweep.
    pub pattern: String,
}

/// Tuning for [`free_ports`], from `[ports]` in `dx.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// How long a port may stay busy after its owners were killed.
    pub wait: Duration,
    /// Delay between two owner lookups while waiting.
    pub poll_interval: Duration,
    /// Helper processes swept after the owners are killed.
    pub aux_watcher: Option<AuxWatcher>,
}

impl From<&PortsConfig> for PortSettings {
    fn from(config: &PortsConfig) -> Self {
        let aux_watcher = match (config.aux_watcher_port, &config.aux_watcher_pattern) {
            (Some(port), Some(pattern)) => Some(AuxWatcher {
                port,
                pattern: pattern.clone(),
            }),
            _ => None,
        };
        Self {
            wait: Duration::from_millis(config.wait_ms),
            poll_interval: Duration::from_millis(config.poll_ms.max(1)),
            aux_watcher,
        }
    }
}

impl PortSettings {
    fn sweep_pattern(&self, port: u16) -> Option<&str> {
        self.aux_watcher
            .as_ref()
            .filter(|aux| aux.port == port)
            .map(|aux| aux.pattern.as_str())
    }
}

/// Frees every port in `ports`, returning the ones that had owners.
///
/// # Errors
/// [`PortError::Declined`] when the user refuses, [`PortError::Timeout`] when
/// a port stays busy for longer than `settings.wait`.
pub async fn free_ports(
    inspector: Arc<dyn PortInspector>,
    ports: &[u16],
    settings: &PortSettings,
    confirmation: Confirmation,
) -> Result<Vec<u16>, PortError> {
    let mut freed = Vec::new();
    for &port in ports {
        if freed.contains(&port) {
            continue;
        }
        let owners = inspect(&inspector, move |i| i.owners(port)).await;
        if owners.is_empty() {
            log::debug!("Port {} is free.", port);
            continue;
        }

        println!(
            "{} Port {} is in use by pid(s) {}",
            "→".yellow(),
            port.to_string().bold(),
            join_pids(&owners)
        );
        let prompt = format!("Kill the process(es) holding port {port}?");
        if !confirmation.ask(prompt).await? {
            return Err(PortError::Declined { port, pids: owners });
        }

        let pids = owners.clone();
        inspect(&inspector, move |i| i.terminate(&pids)).await;
        if let Some(pattern) = settings.sweep_pattern(port) {
            let pattern = pattern.to_string();
            inspect(&inspector, move |i| i.sweep(&pattern)).await;
        }
        wait_until_free(&inspector, port, settings).await?;
        println!("{} Port {} freed.", "→".green(), port);
        freed.push(port);
    }
    Ok(freed)
}

async fn wait_until_free(
    inspector: &Arc<dyn PortInspector>,
    port: u16,
    settings: &PortSettings,
) -> Result<(), PortError> {
    let started = Instant::now();
    loop {
        if inspect(inspector, move |i| i.owners(port)).await.is_empty() {
            return Ok(());
        }
        if started.elapsed() >= settings.wait {
            return Err(PortError::Timeout {
                port,
                waited: settings.wait,
            });
        }
        tokio::time::sleep(settings.poll_interval).await;
    }
}

/// Runs one inspector call on the blocking pool.
async fn inspect<T, F>(inspector: &Arc<dyn PortInspector>, call: F) -> T
where
    T: Default + Send + 'static,
    F: FnOnce(&dyn PortInspector) -> T + Send + 'static,
{
    let inspector = Arc::clone(inspector);
    match tokio::task::spawn_blocking(move || call(inspector.as_ref())).await {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Port inspection task failed: {}", e);
            T::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::PortInspector;
    use std::{
        collections::BTreeMap,
        sync::{Mutex, PoisonError},
        time::Duration,
    };

    /// In-memory port table. `stubborn` owners ignore termination, and every
    /// lookup blocks its thread for `lookup_delay`.
    #[derive(Debug, Default)]
    pub struct FakePortInspector {
        pub owners: Mutex<BTreeMap<u16, Vec<u32>>>,
        pub terminated: Mutex<Vec<u32>>,
        pub swept: Mutex<Vec<String>>,
        pub stubborn: bool,
        pub lookup_delay: Duration,
    }

    impl FakePortInspector {
        pub fn occupied(port: u16, pid: u32) -> Self {
            let inspector = Self::default();
            inspector
                .owners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(port, vec![pid]);
            inspector
        }

        pub fn terminated(&self) -> Vec<u32> {
            self.terminated
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl PortInspector for FakePortInspector {
        fn owners(&self, port: u16) -> Vec<u32> {
            if !self.lookup_delay.is_zero() {
                std::thread::sleep(self.lookup_delay);
            }
            self.owners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&port)
                .cloned()
                .unwrap_or_default()
        }

        fn terminate(&self, pids: &[u32]) {
            self.terminated
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(pids);
            if self.stubborn {
                return;
            }
            for owners in self
                .owners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values_mut()
            {
                owners.retain(|pid| !pids.contains(pid));
            }
        }

        fn sweep(&self, pattern: &str) {
            self.swept
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(pattern.to_string());
        }
    }
}
