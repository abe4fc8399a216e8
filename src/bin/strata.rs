// src/bin/strata.rs

//! The `strata` command-line tool.

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use colored::*;
use strata::{
    cli::{
        Cli,
        handlers::{self, commons::CommandContext},
    },
    t,
};

// --- Command Definition and Registry ---

/// A CLI action, its aliases, and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, &CommandContext) -> Result<()>,
}

/// Every action the binary knows. Adding a command means adding an entry here.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "catalog",
        aliases: &[],
        handler: handlers::catalog::handle,
    },
    CommandDefinition {
        name: "categories",
        aliases: &["cats"],
        handler: handlers::categories::handle,
    },
    CommandDefinition {
        name: "intents",
        aliases: &[],
        handler: handlers::intents::handle,
    },
    CommandDefinition {
        name: "layers",
        aliases: &[],
        handler: handlers::layers::handle,
    },
    CommandDefinition {
        name: "resolve",
        aliases: &[],
        handler: handlers::resolve::handle,
    },
    CommandDefinition {
        name: "select",
        aliases: &[],
        handler: handlers::select::handle,
    },
];

/// Finds a command definition by name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Looks up the action, loads the workspace, and runs the handler.
fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(action) = cli.action else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let command = find_command(&action)
        .ok_or_else(|| anyhow!(t!("error.unknown_command"), name = action))?;
    let context = CommandContext::load(cli.workspace.as_deref(), cli.json)?;
    (command.handler)(cli.args, &context)
}
