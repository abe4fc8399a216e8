// src/cli/handlers/select.rs

use anyhow::Result;
use clap::Parser;
use colored::*;

use crate::cli::handlers::commons::{self, CommandContext};
use crate::core::intent_manager::SelectionOutcome;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Applies an intent to every active extruder and reports what each one got."
)]
struct SelectArgs {
    /// The intent category to apply (e.g. `smooth`).
    intent_category: String,
    /// The quality type it is paired with (e.g. `normal`).
    quality_type: String,
}

/// Applies an intent and prints the per-extruder report.
pub fn handle(args: Vec<String>, context: &CommandContext) -> Result<()> {
    let select_args = SelectArgs::try_parse_from(&args)?;
    context.require_machine()?;

    let report = context
        .workspace
        .intent_manager()
        .select_intent(&select_args.intent_category, &select_args.quality_type);

    if context.json {
        return commons::print_json(&report);
    }

    commons::print_header(&format!(t!("select.header"), key = report.requested));
    for (position, outcome) in &report.extruders {
        match outcome {
            SelectionOutcome::Applied { intent_id } => println!(
                "  {}",
                format_args!(
                    t!("select.applied"),
                    position = position,
                    intent = intent_id.green()
                )
            ),
            SelectionOutcome::FellBack => println!(
                "  {}",
                format!(t!("select.fell_back"), position = position).yellow()
            ),
        }
    }
    if report.is_degraded() {
        println!("\n{}", t!("select.degraded").yellow());
    }
    Ok(())
}
