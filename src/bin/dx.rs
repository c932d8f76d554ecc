// src/bin/dx.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use colored::*;
use dx::{
    cli::{Cli, handlers},
    state::AppContext,
    system::{executor::ExecutionError, process_registry::EXIT_CODE_INTERRUPTED},
};
use std::sync::Arc;

// --- Command Definition and Registry ---

/// A system command, its aliases, and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, &AppContext) -> Result<()>,
}

/// Every built-in command. Anything else on the command line is a name from
/// the `[commands]` table and goes to `run`.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "env",
        aliases: &[],
        handler: handlers::env::handle,
    },
    CommandDefinition {
        name: "exec",
        aliases: &["x"],
        handler: handlers::exec::handle,
    },
    CommandDefinition {
        name: "layers",
        aliases: &[],
        handler: handlers::layers::handle,
    },
    CommandDefinition {
        name: "run",
        aliases: &[],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "validate",
        aliases: &["check"],
        handler: handlers::validate::handle,
    },
];

fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    let exit_code = match AppContext::new() {
        Ok(ctx) => {
            // Children still running when dx returns are killed, whatever the outcome.
            let registry = Arc::clone(&ctx.registry);
            let _cleanup = scopeguard::guard((), move |()| {
                let killed = registry.kill_all();
                if killed > 0 {
                    log::debug!("Killed {} leftover child process(es) on exit.", killed);
                }
            });

            match run_cli(Cli::parse(), &ctx) {
                Ok(()) => 0,
                Err(e) => exit_code_for(&e),
            }
        }
        Err(e) => {
            eprintln!("\n{}: could not start the async runtime: {}", "Error".red().bold(), e);
            1
        }
    };
    std::process::exit(exit_code);
}

/// Prints the error and picks the exit code. A child that was interrupted
/// exits quietly with 130, like a shell would.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(ExecutionError::ProcessExit { code, .. }) = error.downcast_ref::<ExecutionError>()
        && *code == Some(EXIT_CODE_INTERRUPTED)
    {
        return EXIT_CODE_INTERRUPTED;
    }
    eprintln!("\n{}: {}", "Error".red().bold(), error);
    1
}

fn run_cli(cli: Cli, ctx: &AppContext) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let mut args = cli.args.into_iter();
    let Some(first) = args.next() else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match find_command(&first) {
        Some(command) => (command.handler)(rest, ctx),
        None => {
            // `dx <name> [opts]` is a shortcut for `dx run <name> [opts]`.
            let mut run_args = vec![first];
            run_args.extend(rest);
            handlers::run::handle(run_args, ctx)
        }
    }
}
