//! # Process Registry
//!
//! Tracks every child the engine spawns so that an interrupt, a termination
//! request or a normal exit can take them all down with it.
//!
//! Entries are registered with a monotonically increasing id *before* the
//! child starts and get their pid attached right after the spawn, so a signal
//! arriving in between never leaves an untracked process behind. Cleanup on
//! signal is a plain `SIGKILL`; the polite `SIGTERM` path is reserved for
//! per-command timeouts.
//!
//! On unix a child that leads its own process group is signalled as a group,
//! so whatever its shell forked goes down with it.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::SystemTime,
};

/// Exit code used after an interrupt (`Ctrl+C`).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;
/// Exit code used after a termination request (`SIGTERM`).
pub const EXIT_CODE_TERMINATED: i32 = 143;

/// A spawned (or about to be spawned) child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcessRecord {
    /// Registration id, unique for the registry's lifetime.
    pub id: u64,
    /// `None` between registration and a successful spawn.
    pub pid: Option<u32>,
    /// The shell line, for logs.
    pub command: String,
    /// When the record was registered.
    pub started_at: SystemTime,
}

/// How a process should be asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `SIGTERM` (`taskkill` without `/F` on Windows).
    Polite,
    /// `SIGKILL` (`taskkill /F`).
    Forced,
}

/// Every child currently owned by this engine.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    next_id: AtomicU64,
    processes: Mutex<BTreeMap<u64, RunningProcessRecord>>,
    hooks_installed: AtomicBool,
}

impl ProcessRegistry {
    /// An empty registry without signal hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a command that is about to be spawned and returns its id.
    pub fn register(&self, command: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = RunningProcessRecord {
            id,
            pid: None,
            command: command.to_string(),
            started_at: SystemTime::now(),
        };
        self.lock().insert(id, record);
        log::trace!("Registered process #{}: {}", id, command);
        id
    }

    /// Records the pid of a child that was just spawned.
    pub fn attach_pid(&self, id: u64, pid: u32) {
        if let Some(record) = self.lock().get_mut(&id) {
            record.pid = Some(pid);
        }
    }

    /// Forgets a child that exited or failed to spawn.
    pub fn unregister(&self, id: u64) -> Option<RunningProcessRecord> {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            log::trace!("Unregistered process #{}", id);
        }
        removed
    }

    /// Number of tracked children.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes every record and force-kills each one that has a pid.
    /// Returns how many kill signals were delivered.
    pub fn kill_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        let mut killed = 0;
        for record in drained.into_values() {
            let Some(pid) = record.pid else { continue };
            if terminate_pid(pid, Termination::Forced) {
                log::debug!("Killed process {} ({})", pid, record.command);
                killed += 1;
            } else {
                log::debug!("Process {} was already gone ({})", pid, record.command);
            }
        }
        killed
    }

    /// Spawns a task that kills every registered child and exits the process
    /// on `Ctrl+C` (exit 130) or `SIGTERM` (exit 143).
    ///
    /// Must be called inside a tokio runtime. Only the first call installs
    /// anything; it returns `false` afterwards.
    pub fn install_signal_hooks(self: &Arc<Self>) -> bool {
        if self.hooks_installed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let Some(code) = wait_for_termination().await else {
                log::warn!("Could not listen for termination signals; children are cleaned up on exit only.");
                return;
            };
            let killed = registry.kill_all();
            log::debug!("Termination signal received, killed {} child process(es).", killed);
            std::process::exit(code);
        });
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, RunningProcessRecord>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(unix)]
async fn wait_for_termination() -> Option<i32> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            log::debug!("SIGTERM handler unavailable: {}", e);
            return tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|()| EXIT_CODE_INTERRUPTED);
        }
    };
    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => Some(EXIT_CODE_INTERRUPTED),
        Some(()) = terminate.recv() => Some(EXIT_CODE_TERMINATED),
        else => None,
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Option<i32> {
    tokio::signal::ctrl_c()
        .await
        .ok()
        .map(|()| EXIT_CODE_INTERRUPTED)
}

/// Sends a stop request to `pid`, or to the whole process group it leads.
/// Returns `false` if nothing could be signalled (usually because the process
/// no longer exists).
#[cfg(unix)]
pub fn terminate_pid(pid: u32, how: Termination) -> bool {
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let signal = match how {
        Termination::Polite => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };
    let pid = Pid::from_raw(raw);
    if killpg(pid, signal).is_ok() {
        return true;
    }
    // Not a group leader: signal the process alone.
    kill(pid, signal).is_ok()
}

#[cfg(windows)]
pub fn terminate_pid(pid: u32, how: Termination) -> bool {
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/T"];
    if how == Termination::Forced {
        args.push("/F");
    }
    std::process::Command::new("taskkill")
        .args(&args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_records_ordered() {
        let registry = ProcessRegistry::new();
        let a = registry.register("pnpm dev");
        let b = registry.register("pnpm build");
        assert!(b > a);

        registry.attach_pid(b, 4242);
        assert_eq!(registry.len(), 2);

        let first = registry.unregister(a).unwrap();
        assert_eq!(first.command, "pnpm dev");
        assert_eq!(first.pid, None);
        assert!(registry.unregister(a).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.unregister(b).unwrap().pid, Some(4242));
    }

    #[test]
    fn test_kill_all_skips_records_without_pid() {
        let registry = ProcessRegistry::new();
        registry.register("not yet spawned");
        assert_eq!(registry.kill_all(), 0);
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_all_kills_live_children() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let registry = ProcessRegistry::new();
        let id = registry.register("sleep 30");
        registry.attach_pid(id, child.id());

        assert_eq!(registry.kill_all(), 1);
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_all_takes_down_the_process_group() {
        use std::{process::Stdio, time::Duration};
        use tokio::io::AsyncReadExt;

        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 30 & wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let registry = ProcessRegistry::new();
        let id = registry.register("sleep 30 & wait");
        registry.attach_pid(id, child.id().unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(registry.kill_all(), 1);

        // The pipe only closes once the background sleep is gone as well.
        let mut stdout = child.stdout.take().unwrap();
        let mut out = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut out)).await;
        assert!(closed.is_ok(), "background process survived kill_all");
        assert!(!child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_signal_hooks_install_once() {
        let registry = Arc::new(ProcessRegistry::new());
        assert!(registry.install_signal_hooks());
        assert!(!registry.install_signal_hooks());
    }
}
