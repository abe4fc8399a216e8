// src/cli/handlers/intents.rs

use anyhow::Result;
use clap::Parser;
use colored::*;

use crate::cli::handlers::commons::{self, CommandContext};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Lists the (intent category, quality type) pairs every active extruder supports."
)]
struct IntentsArgs {}

/// Prints the machine-wide intent pairs.
pub fn handle(args: Vec<String>, context: &CommandContext) -> Result<()> {
    let _intents_args = IntentsArgs::try_parse_from(&args)?;
    let intents = context.workspace.intent_manager().current_available_intents();

    if context.json {
        return commons::print_json(&intents);
    }

    commons::print_header(t!("intents.header"));
    if intents.is_empty() {
        commons::print_empty(t!("common.none"));
    }
    for key in &intents {
        println!("  {:<15} {}", key.intent_category.cyan(), key.quality_type);
    }
    Ok(())
}
