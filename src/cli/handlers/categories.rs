// src/cli/handlers/categories.rs

use anyhow::Result;
use clap::Parser;
use colored::*;

use crate::cli::handlers::commons::{self, CommandContext};
use crate::core::layer_height;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Lists the intent categories available on the active machine."
)]
struct CategoriesArgs {
    /// Query one configuration instead of the active machine.
    #[arg(long = "for", num_args = 3, value_names = ["DEFINITION", "VARIANT", "MATERIAL"])]
    configuration: Option<Vec<String>>,
}

/// Prints the available intent categories.
pub fn handle(args: Vec<String>, context: &CommandContext) -> Result<()> {
    let categories_args = CategoriesArgs::try_parse_from(&args)?;
    let manager = context.workspace.intent_manager();

    let (header, categories) = match categories_args.configuration.as_deref() {
        Some([definition, variant, material]) => (
            format!(
                t!("categories.header_for"),
                definition = definition,
                variant = variant,
                material = material
            ),
            manager.intent_categories(definition, variant, material),
        ),
        _ => (
            t!("categories.header").to_string(),
            manager.current_available_intent_categories(),
        ),
    };

    if context.json {
        return commons::print_json(&categories);
    }

    commons::print_header(&header);
    if categories.is_empty() {
        commons::print_empty(t!("common.none"));
    }
    for category in &categories {
        println!(
            "  {:<15} {}",
            category.cyan(),
            layer_height::category_display_name(category).dimmed()
        );
    }
    Ok(())
}
