// src/cli/handlers/commons.rs

// Shared plumbing for the command handlers.

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use crate::{
    core::{
        paths,
        quality_group::QualityGroup,
        stack::GlobalStack,
        workspace_loader::Workspace,
    },
    models::QualityKey,
};

/// Everything a handler needs: the loaded workspace and output options.
#[derive(Debug)]
pub struct CommandContext {
    /// The loaded store, machine and index.
    pub workspace: Workspace,
    /// `--json` was given.
    pub json: bool,
}

impl CommandContext {
    /// Resolves the workspace path (explicit, local, then config dir) and loads it.
    pub fn load(explicit: Option<&Path>, json: bool) -> Result<Self> {
        let path = paths::resolve_workspace_path(explicit)?;
        let workspace = Workspace::from_file(&path)
            .with_context(|| format!(t!("error.workspace_load"), path = path.display()))?;
        Ok(Self { workspace, json })
    }

    /// A snapshot of the active machine, or an error for commands that
    /// cannot do anything without one.
    pub fn require_machine(&self) -> Result<GlobalStack> {
        self.workspace
            .machines
            .active_machine()
            .ok_or_else(|| anyhow!(t!("error.no_machine")))
    }

    /// Finds the quality group for `(intent_category, quality_type)` on the active machine.
    pub fn find_group(&self, machine: &GlobalStack, key: &QualityKey) -> Result<QualityGroup> {
        self.workspace
            .index
            .build_groups(machine)
            .shift_remove(key)
            .ok_or_else(|| anyhow!(t!("error.group_not_found"), key = key))
    }
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a yellow section header.
pub fn print_header(text: &str) {
    println!("\n--- {} ---", text.yellow().bold());
}

/// Prints a dimmed line for empty results.
pub fn print_empty(text: &str) {
    println!("  {}", text.dimmed());
}
