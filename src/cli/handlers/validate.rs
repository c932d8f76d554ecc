use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::handlers::commons::{self, WorkspaceArgs},
    core::validator::PolicyValidator,
    state::AppContext,
};

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Checks every environment file against the secret policy."
)]
struct ValidateArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
}

/// Entry point for `dx validate`.
pub fn handle(args: Vec<String>, ctx: &AppContext) -> Result<()> {
    let validate_args = ValidateArgs::try_parse_from(&args)?;
    let (workspace, _) = commons::load_workspace(&validate_args.workspace)?;

    let policy = ctx
        .policy_cache
        .load(&workspace.config_dir)
        .context("Cannot validate without a secret policy")?;
    PolicyValidator::new(&workspace.root, &policy).validate()?;

    println!(
        "{} Environment files match the secret policy ({} environment(s), {} target(s)).",
        "✔".green(),
        policy.environments.len(),
        policy.targets.len()
    );
    Ok(())
}
