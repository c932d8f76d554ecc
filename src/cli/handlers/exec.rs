//! `dx exec`: runs an ad-hoc command line.

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;

use crate::{
    cli::handlers::commons::{self, ExecArgs},
    state::AppContext,
    system::executor::CommandExecutor,
};

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Runs a literal command inside the layered environment."
)]
struct ExecCmdArgs {
    #[command(flatten)]
    exec: ExecArgs,

    /// Treat every argument as a separate command and run them all at once.
    #[arg(long)]
    parallel: bool,

    /// The command. A single argument is passed to the shell as-is.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Builds the shell line from the trailing arguments.
fn command_line(parts: &[String]) -> Result<String> {
    match parts {
        [single] => Ok(single.clone()),
        _ => shlex::try_join(parts.iter().map(String::as_str))
            .map_err(|e| anyhow!("Could not quote the command: {}", e)),
    }
}

/// Entry point for `dx exec`.
pub fn handle(args: Vec<String>, ctx: &AppContext) -> Result<()> {
    let exec_args = ExecCmdArgs::try_parse_from(&args)?;
    let (workspace, config) = commons::load_workspace(&exec_args.exec.workspace)?;
    let options = exec_args.exec.to_options(&config);
    let executor = Arc::new(commons::build_executor(ctx, workspace.clone(), &config));

    if exec_args.parallel {
        let report = ctx.block_on(CommandExecutor::execute_parallel(
            &executor,
            exec_args.command,
            &options,
        ));
        for (_, outcome) in &report.succeeded {
            commons::print_outcome(&workspace, outcome);
        }
        for (_, command, error) in &report.failed {
            eprintln!("{} {}\n  {}", "✘".red(), command.bold(), error);
        }
        if !report.is_success() {
            return Err(anyhow!(
                "{} of {} command(s) failed.",
                report.failed.len(),
                report.failed.len() + report.succeeded.len()
            ));
        }
        return Ok(());
    }

    let command = command_line(&exec_args.command)?;
    let outcome = ctx.block_on(executor.execute_command(&command, &options))?;
    commons::print_outcome(&workspace, &outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_command_are_separated() {
        let args = ExecCmdArgs::try_parse_from([
            "--app", "web", "--port", "3000", "--port", "9229", "--", "pnpm", "dev", "--turbo",
        ])
        .unwrap();
        assert_eq!(args.exec.app.as_deref(), Some("web"));
        assert_eq!(args.exec.ports, vec![3000, 9229]);
        assert_eq!(args.command, vec!["pnpm", "dev", "--turbo"]);
    }

    #[test]
    fn test_command_line_quoting() {
        assert_eq!(
            command_line(&["pnpm build && pnpm test".to_string()]).unwrap(),
            "pnpm build && pnpm test"
        );
        let joined = command_line(&["echo".to_string(), "hello world".to_string()]).unwrap();
        assert_eq!(
            shlex::split(&joined),
            Some(vec!["echo".to_string(), "hello world".to_string()])
        );
    }
}
