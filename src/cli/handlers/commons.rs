// src/cli/handlers/commons.rs

//! Shared argument groups and setup used by multiple handlers.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::{collections::BTreeMap, time::Duration};

use crate::{
    core::{
        config_loader,
        paths::{Workspace, relative_display},
    },
    models::{DxConfig, ExecutionOptions},
    state::AppContext,
    system::executor::{CommandExecutor, ExecutionOutcome},
};

/// Where to find the workspace configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct WorkspaceArgs {
    /// Directory holding dx.toml and the secret policy (default: <root>/.dx).
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<String>,
}

/// Options shared by every command that executes something.
#[derive(Args, Debug, Default, Clone)]
pub struct ExecArgs {
    /// The app whose layer files and required variables apply.
    #[arg(long)]
    pub app: Option<String>,

    /// The environment to run in (default: $APP_ENV, then development).
    #[arg(long = "env", value_name = "ENV")]
    pub environment: Option<String>,

    /// Free this port before running. Repeatable.
    #[arg(long = "port", value_name = "PORT")]
    pub ports: Vec<u16>,

    /// Auto-fix retry budget (default: [process].default_retries).
    #[arg(long)]
    pub retries: Option<u32>,

    /// Kill the command if it runs longer than this.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Skip the policy validation and required-variable checks.
    #[arg(long)]
    pub skip_env_validation: bool,

    /// Kill port owners without asking.
    #[arg(long)]
    pub force: bool,

    /// Answer yes to every confirmation.
    #[arg(long, short)]
    pub yes: bool,

    /// Extra variable for the child process. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Workspace location overrides.
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

impl ExecArgs {
    /// Converts the flags into [`ExecutionOptions`], filling gaps from `config`.
    pub fn to_options(&self, config: &DxConfig) -> ExecutionOptions {
        ExecutionOptions {
            app: self.app.clone(),
            environment: self.environment.clone(),
            extra_env: self.set.iter().cloned().collect::<BTreeMap<_, _>>(),
            ports: self.ports.clone(),
            retries: self.retries.unwrap_or(config.process.default_retries),
            timeout: self.timeout_ms.map(Duration::from_millis),
            skip_env_validation: self.skip_env_validation,
            force_port_cleanup: self.force,
            assume_yes: self.yes,
        }
    }
}

/// Parses `KEY=VALUE`. The value may be empty or contain further `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Locates the workspace from the current directory and loads `dx.toml`.
pub fn load_workspace(args: &WorkspaceArgs) -> Result<(Workspace, DxConfig)> {
    let cwd = std::env::current_dir().context("Could not determine the current directory")?;
    let workspace = Workspace::discover(&cwd, args.config_dir.as_deref())?;
    let config = config_loader::load_config(&workspace)
        .with_context(|| format!("Failed to load '{}'", workspace.config_file().display()))?;
    Ok((workspace, config))
}

/// An executor sharing the context's registry and policy cache.
pub fn build_executor(ctx: &AppContext, workspace: Workspace, config: &DxConfig) -> CommandExecutor {
    CommandExecutor::new(
        workspace,
        config,
        ctx.policy_cache.clone(),
        ctx.registry.clone(),
    )
}

/// Prints the one-line success summary after a command finishes.
pub fn print_outcome(workspace: &Workspace, outcome: &ExecutionOutcome) {
    let mut details = vec![format!("env {}", outcome.environment.cyan())];
    if !outcome.env_files.is_empty() {
        let files: Vec<String> = outcome
            .env_files
            .iter()
            .map(|f| relative_display(&workspace.root, f))
            .collect();
        details.push(format!("layers {}", files.join(", ")));
    }
    if outcome.attempts > 1 {
        details.push(format!("{} attempts", outcome.attempts));
    }
    println!(
        "{} {} ({})",
        "✔".green(),
        outcome.command.bold(),
        details.join("; ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("DATABASE_URL=postgres://u:p@h/db?x=1"),
            Ok(("DATABASE_URL".to_string(), "postgres://u:p@h/db?x=1".to_string()))
        );
        assert_eq!(parse_key_value("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_key_value("NOVALUE").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_options_fall_back_to_config() {
        let args = ExecArgs {
            app: Some("web".to_string()),
            timeout_ms: Some(1500),
            set: vec![("A".to_string(), "1".to_string())],
            ..Default::default()
        };
        let options = args.to_options(&DxConfig::default());
        assert_eq!(options.retries, 1);
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.extra_env.get("A").map(String::as_str), Some("1"));
        assert!(!options.force_port_cleanup);
    }
}
