// src/models.rs

//! Configuration and execution models.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

// --- `dx.toml` MODELS (What is read from the workspace configuration file) ---

/// Represents the deserialized structure of `.dx/dx.toml`.
///
/// Every section is optional; a workspace without the file behaves as if it
/// contained only defaults.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DxConfig {
    /// Environment name → ordered layer file templates (`{app}`, `{env}`).
    pub layers: BTreeMap<String, Vec<String>>,
    /// Port-conflict resolution settings.
    pub ports: PortsConfig,
    /// Process lifecycle settings.
    pub process: ProcessConfig,
    /// Commands run by the auto-fix heuristics.
    pub autofix: AutofixConfig,
    /// Named commands, possibly branching per environment.
    pub commands: BTreeMap<String, CommandNode>,
}

/// The `[ports]` section.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PortsConfig {
    /// How long to wait for a port to be released after killing its owners.
    pub wait_ms: u64,
    /// Interval between two owner lookups while waiting for a port.
    pub poll_ms: u64,
    /// The one port whose auxiliary watcher gets swept alongside its owners.
    pub aux_watcher_port: Option<u16>,
    /// `pkill -f` pattern matching that watcher.
    pub aux_watcher_pattern: Option<String>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            wait_ms: 10_000,
            poll_ms: 250,
            aux_watcher_port: None,
            aux_watcher_pattern: None,
        }
    }
}

/// The `[process]` section.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProcessConfig {
    /// Grace window between SIGTERM and SIGKILL when a command times out.
    pub kill_grace_ms: u64,
    /// Retry budget used when the caller does not pass one.
    pub default_retries: u32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: 3_000,
            default_retries: 1,
        }
    }
}

/// The `[autofix]` section.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AutofixConfig {
    /// Regenerates the ORM client.
    pub orm_generate: String,
    /// Installs workspace dependencies.
    pub install: String,
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            orm_generate: "pnpm exec prisma generate".to_string(),
            install: "pnpm install".to_string(),
        }
    }
}

/// A node of the `[commands]` tree.
///
/// Leaves carry an executable command; branches select a child per
/// environment (or per sub-command name). `Leaf` is tried first, so any table
/// with a `command` key is a leaf.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandNode {
    /// A runnable command.
    Leaf(CommandLeaf),
    /// Children keyed by sub-command or environment name.
    Branch(BTreeMap<String, CommandNode>),
}

/// A runnable entry of the `[commands]` tree.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandLeaf {
    /// The shell line to run.
    pub command: String,
    /// Extra variables; command-line `--set` values win.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Requires an explicit confirmation before running.
    #[serde(default)]
    pub dangerous: bool,
    /// App used when `--app` is not given.
    #[serde(default)]
    pub app: Option<String>,
    /// Ports to free before running.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// One-line description shown before running.
    #[serde(default)]
    pub desc: Option<String>,
}

// --- EXECUTION MODELS ---

/// Everything a caller can tune about a single `execute_command` call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// The runnable app, used to pick layer files and the policy target.
    pub app: Option<String>,
    /// The requested environment. Falls back to the ambient `APP_ENV`.
    pub environment: Option<String>,
    /// Applied after the layered variables, before the forced runtime mode.
    pub extra_env: BTreeMap<String, String>,
    /// Ports to free before spawning.
    pub ports: Vec<u16>,
    /// How many times a failed command may be retried after an auto-fix.
    pub retries: u32,
    /// Stop the command once it runs this long.
    pub timeout: Option<Duration>,
    /// Skip the policy validator and the required-variable check.
    pub skip_env_validation: bool,
    /// Kill port owners without asking.
    pub force_port_cleanup: bool,
    /// Answer yes to every auto-fix confirmation.
    pub assume_yes: bool,
}

impl ExecutionOptions {
    /// Options for a given app and environment, everything else defaulted.
    pub fn for_app(app: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            environment: Some(environment.into()),
            ..Default::default()
        }
    }
}
