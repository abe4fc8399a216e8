// src/cli/handlers/catalog.rs

use anyhow::Result;
use clap::Parser;
use colored::*;

use crate::cli::handlers::commons::{self, CommandContext};
use crate::core::layer_height;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Shows every available intent category with its quality levels."
)]
struct CatalogArgs {}

/// Prints the intent category catalog.
pub fn handle(args: Vec<String>, context: &CommandContext) -> Result<()> {
    let _catalog_args = CatalogArgs::try_parse_from(&args)?;
    let workspace = &context.workspace;
    let catalog = layer_height::intent_category_catalog(
        &workspace.intent_manager(),
        &workspace.store,
        &workspace.machines,
        &workspace.index,
    )?;

    if context.json {
        return commons::print_json(&catalog);
    }

    commons::print_header(t!("catalog.header"));
    if catalog.is_empty() {
        commons::print_empty(t!("common.none"));
    }
    for category in &catalog {
        println!(
            "\n  {} {}",
            category.name.yellow().bold(),
            format!("({})", category.intent_category).dimmed()
        );
        for quality in &category.qualities {
            println!(
                "    {:<20} {:<12} {}",
                quality.name.cyan(),
                quality.quality_type,
                quality.layer_height
            );
        }
    }
    Ok(())
}
