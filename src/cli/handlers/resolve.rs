// src/cli/handlers/resolve.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use serde::Serialize;

use crate::cli::handlers::commons::{self, CommandContext};
use crate::core::resolver;
use crate::models::{Literal, QualityKey};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Resolves one setting through a quality group of the active machine."
)]
struct ResolveArgs {
    /// The setting key (e.g. `layer_height`).
    setting: String,
    /// The intent category of the group.
    intent_category: String,
    /// The quality type of the group.
    quality_type: String,
}

#[derive(Serialize, Debug)]
struct Resolved<'a> {
    setting: &'a str,
    group: &'a str,
    value: Literal,
    unit: Option<&'a str>,
}

/// Resolves and prints one setting.
pub fn handle(args: Vec<String>, context: &CommandContext) -> Result<()> {
    let resolve_args = ResolveArgs::try_parse_from(&args)?;
    let machine = context.require_machine()?;
    let key = QualityKey::new(resolve_args.intent_category, resolve_args.quality_type);
    let group = context.find_group(&machine, &key)?;

    let value = resolver::resolve(&machine, &resolve_args.setting, &group)?;
    let unit = machine.definition().unit(&resolve_args.setting);

    if context.json {
        return commons::print_json(&Resolved {
            setting: &resolve_args.setting,
            group: &group.name,
            value,
            unit,
        });
    }

    println!(
        "\n{}",
        format_args!(
            t!("resolve.result"),
            setting = resolve_args.setting.cyan(),
            group = group.name.yellow(),
            value = format!("{} {}", value, unit.unwrap_or_default()).trim_end().bold()
        )
    );
    Ok(())
}
