//! Top-level argument parsing and help output.

use clap::Parser;

pub mod handlers;

const HELP_TEMPLATE: &str = "\
<title>dx</title> {version}
{about}

<title>USAGE</title>
  <cmd>dx</cmd> <hl><COMMAND></hl> [OPTIONS] [ARGS...]
  <cmd>dx</cmd> <hl><NAME></hl> [OPTIONS]          <dim>shortcut for `dx run <NAME>`</dim>

<title>COMMANDS</title>
  <cmd>exec</cmd>, <cmd>x</cmd>      Run a literal command in the layered environment
  <cmd>run</cmd>           Run a command defined in .dx/dx.toml
  <cmd>validate</cmd>      Check environment files against the secret policy
  <cmd>env</cmd>           Print the layered environment for an app
  <cmd>layers</cmd>        Print the layer files that would be loaded

<title>COMMON OPTIONS</title>
  <hl>--app</hl> <APP>         App whose layers and required variables apply
  <hl>--env</hl> <ENV>         Environment (defaults to $APP_ENV, then development)
  <hl>--port</hl> <PORT>       Free this port before running (repeatable)
  <hl>--retries</hl> <N>       Auto-fix retry budget
  <hl>--timeout-ms</hl> <MS>   Kill the command after this long
  <hl>--set</hl> KEY=VALUE     Extra variable for the child process
  <hl>--skip-env-validation</hl>, <hl>--force</hl>, <hl>--yes</hl>

Run <cmd>dx <COMMAND> --help</cmd> for the options of a single command.
";

/// Renders the help template, with colors when the terminal supports them.
fn build_help_string() -> &'static str {
    let use_colors = colored::control::SHOULD_COLORIZE.should_colorize();

    let title = if use_colors { "\x1b[1;33m" } else { "" }; // Bold Yellow
    let hl = if use_colors { "\x1b[1;36m" } else { "" }; // Bold Cyan
    let cmd = if use_colors { "\x1b[36m" } else { "" }; // Cyan
    let dim = if use_colors { "\x1b[2m" } else { "" };
    let reset = if use_colors { "\x1b[0m" } else { "" };

    let formatted = HELP_TEMPLATE
        .replace("<title>", title)
        .replace("</title>", reset)
        .replace("<hl>", hl)
        .replace("</hl>", reset)
        .replace("<cmd>", cmd)
        .replace("</cmd>", reset)
        .replace("<dim>", dim)
        .replace("</dim>", reset);

    Box::leak(formatted.into_boxed_str())
}

/// dx: runs workspace commands inside a validated, layered environment.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    help_template = build_help_string(),
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// Everything after `dx`; the first word selects the command.
    #[arg()]
    pub args: Vec<String>,
}
