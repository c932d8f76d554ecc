//! `dx run`: runs a named command from `dx.toml`.

use crate::{
    cli::handlers::commons::{self, ExecArgs},
    core::command_resolver::{self, ResolvedCommand},
    models::ExecutionOptions,
    state::AppContext,
    system::prompt::Confirmation,
};
use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use std::io::IsTerminal;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Runs a command defined in the [commands] table of .dx/dx.toml."
)]
struct RunArgs {
    /// Dotted command name, e.g. `dev` or `build.backend`.
    name: Option<String>,

    /// List every runnable command and exit.
    #[arg(long, short)]
    list: bool,

    #[command(flatten)]
    exec: ExecArgs,
}

/// Folds a leaf's own settings into the caller's options. Flags given on the
/// command line win over the leaf.
fn apply_leaf(resolved: &ResolvedCommand<'_>, options: &mut ExecutionOptions) {
    let leaf = resolved.leaf;
    if options.app.is_none() {
        options.app = leaf.app.clone();
    }
    for port in &leaf.ports {
        if !options.ports.contains(port) {
            options.ports.push(*port);
        }
    }
    for (key, value) in &leaf.env {
        options
            .extra_env
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

/// Dangerous commands need `--yes` when nobody is there to answer.
fn dangerous_confirmation(yes: bool, interactive: bool) -> Confirmation {
    match (yes, interactive) {
        (true, _) => Confirmation::AssumeYes,
        (false, true) => Confirmation::Ask,
        (false, false) => Confirmation::AssumeNo,
    }
}

/// Entry point for `dx run`.
pub fn handle(args: Vec<String>, ctx: &AppContext) -> Result<()> {
    let run_args = RunArgs::try_parse_from(&args)?;
    let (workspace, config) = commons::load_workspace(&run_args.exec.workspace)?;

    if run_args.list {
        let names = command_resolver::list_commands(&config.commands);
        if names.is_empty() {
            println!("{}", "No commands defined in .dx/dx.toml.".yellow());
        }
        for name in names {
            println!("  {}", name.cyan());
        }
        return Ok(());
    }

    let name = run_args
        .name
        .as_deref()
        .ok_or_else(|| anyhow!("Missing command name. Use `dx run --list` to see what is available."))?;

    let mut options = run_args.exec.to_options(&config);
    let executor = commons::build_executor(ctx, workspace.clone(), &config);
    let environment = executor.environment_context(&options).requested;

    let resolved = command_resolver::resolve_command(&config.commands, name, &environment)?;
    apply_leaf(&resolved, &mut options);
    if let Some(desc) = &resolved.leaf.desc {
        println!("{} {}", "→".cyan(), desc.dimmed());
    }

    if resolved.leaf.dangerous {
        let prompt = format!(
            "'{}' is marked dangerous ({}). Run it in '{}'?",
            resolved.path,
            resolved.leaf.command,
            environment
        );
        let confirmation = dangerous_confirmation(run_args.exec.yes, std::io::stdin().is_terminal());
        if !ctx.block_on(confirmation.ask(prompt))? {
            println!("\n{}", "Operation cancelled.".yellow());
            return Ok(());
        }
    }

    log::debug!("Running '{}': {}", resolved.path, resolved.leaf.command);
    let outcome = ctx.block_on(executor.execute_command(&resolved.leaf.command, &options))?;
    commons::print_outcome(&workspace, &outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandLeaf, CommandNode};
    use std::collections::BTreeMap;

    #[test]
    fn test_leaf_settings_fill_gaps_only() {
        let leaf = CommandLeaf {
            command: "pnpm dev".to_string(),
            env: BTreeMap::from([
                ("FEATURE".to_string(), "on".to_string()),
                ("PORT".to_string(), "3000".to_string()),
            ]),
            dangerous: false,
            app: Some("web".to_string()),
            ports: vec![3000, 9229],
            desc: None,
        };
        let commands = BTreeMap::from([("dev".to_string(), CommandNode::Leaf(leaf))]);
        let resolved = command_resolver::resolve_command(&commands, "dev", "development").unwrap();

        let mut options = ExecutionOptions {
            ports: vec![9229],
            ..Default::default()
        };
        options.extra_env.insert("PORT".to_string(), "4000".to_string());
        apply_leaf(&resolved, &mut options);

        assert_eq!(options.app.as_deref(), Some("web"));
        assert_eq!(options.ports, vec![9229, 3000]);
        assert_eq!(options.extra_env.get("PORT").map(String::as_str), Some("4000"));
        assert_eq!(options.extra_env.get("FEATURE").map(String::as_str), Some("on"));
    }

    #[test]
    fn test_dangerous_commands_are_refused_unattended_without_yes() {
        assert_eq!(dangerous_confirmation(true, false), Confirmation::AssumeYes);
        assert_eq!(dangerous_confirmation(false, true), Confirmation::Ask);
        assert_eq!(dangerous_confirmation(false, false), Confirmation::AssumeNo);
    }

    #[test]
    fn test_run_args_accept_shared_flags() {
        let args = RunArgs::try_parse_from(["build.backend", "--env", "staging", "--yes"]).unwrap();
        assert_eq!(args.name.as_deref(), Some("build.backend"));
        assert_eq!(args.exec.environment.as_deref(), Some("staging"));
        assert!(args.exec.yes);
    }
}
