// src/core/mod.rs

/// In-memory registry of configuration containers.
pub mod container_store;
/// Deferred setting expressions.
pub mod expression;
/// Intent availability and selection.
pub mod intent_manager;
/// Layer-height projection and the intent category catalog.
pub mod layer_height;
/// Config directory and workspace file lookup.
pub mod paths;
/// Quality groups and their per-position nodes.
pub mod quality_group;
/// Builds quality groups for a machine.
pub mod quality_index;
/// Resolves one setting through a quality group.
pub mod resolver;
/// Configuration stacks and the machine context.
pub mod stack;
/// Loads a workspace snapshot file.
pub mod workspace_loader;

#[cfg(test)]
pub(crate) mod fixtures;
