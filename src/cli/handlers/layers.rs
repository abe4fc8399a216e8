// src/cli/handlers/layers.rs

use anyhow::Result;
use clap::Parser;
use colored::*;

use crate::cli::handlers::commons::{self, CommandContext};
use crate::constants::DEFAULT_INTENT_CATEGORY;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Lists the quality levels of an intent category, thinnest layers first."
)]
struct LayersArgs {
    /// The intent category to list. Defaults to `default`.
    intent_category: Option<String>,
}

/// Prints the layer-height projection of one category.
pub fn handle(args: Vec<String>, context: &CommandContext) -> Result<()> {
    let layers_args = LayersArgs::try_parse_from(&args)?;
    let category = layers_args
        .intent_category
        .unwrap_or_else(|| DEFAULT_INTENT_CATEGORY.to_string());

    let mut projection = context.workspace.layer_heights(&category);
    let entries = projection.entries()?.to_vec();

    if context.json {
        return commons::print_json(&entries);
    }

    let unit = projection.layer_height_unit();
    commons::print_header(&format!(t!("layers.header"), category = category));
    if entries.is_empty() {
        commons::print_empty(t!("common.none"));
    }
    for entry in &entries {
        println!(
            "  {:<20} {:<12} {}",
            entry.name.cyan(),
            entry.quality_type,
            format!("{} {}", entry.layer_height, unit).bold()
        );
    }
    Ok(())
}
