//! `dx layers`: lists the layer files an app and environment resolve to.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::handlers::commons::{self, WorkspaceArgs},
    constants::DEFAULT_ENVIRONMENT,
    core::{layers::EnvironmentLayerStore, paths::relative_display},
    state::AppContext,
};

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Shows which layer files an app and environment resolve to."
)]
struct LayersArgs {
    #[arg(long)]
    app: Option<String>,

    #[arg(long = "env", value_name = "ENV", default_value = DEFAULT_ENVIRONMENT)]
    environment: String,

    #[command(flatten)]
    workspace: WorkspaceArgs,
}

/// Entry point for `dx layers`.
pub fn handle(args: Vec<String>, _ctx: &AppContext) -> Result<()> {
    let layers_args = LayersArgs::try_parse_from(&args)?;
    let (workspace, config) = commons::load_workspace(&layers_args.workspace)?;
    let store = EnvironmentLayerStore::new(workspace.root.clone(), config.layers);
    let app = layers_args.app.as_deref();

    println!(
        "{} for env {}{}:",
        "Layer templates".bold(),
        layers_args.environment.cyan(),
        app.map(|a| format!(", app {}", a.cyan())).unwrap_or_default()
    );
    let existing = store.resolve_layers(app, &layers_args.environment);
    for template in store.templates_for(&layers_args.environment) {
        let name = template.replace("{env}", &layers_args.environment);
        let name = match app {
            Some(app) => name.replace("{app}", app),
            None if name.contains("{app}") => {
                println!("  {} {}", "-".dimmed(), format!("{name} (needs --app)").dimmed());
                continue;
            }
            None => name,
        };
        let path = workspace.root.join(&name);
        if existing.contains(&path) {
            println!("  {} {}", "✔".green(), relative_display(&workspace.root, &path));
        } else {
            println!("  {} {}", "·".dimmed(), format!("{name} (missing)").dimmed());
        }
    }
    Ok(())
}
