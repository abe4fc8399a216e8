// src/cli/handlers/mod.rs

// One module per CLI action.

/// `catalog`
pub mod catalog;
/// `categories` / `cats`
pub mod categories;
/// Shared handler plumbing.
pub mod commons;
/// `intents`
pub mod intents;
/// `layers`
pub mod layers;
/// `resolve`
pub mod resolve;
/// `select`
pub mod select;
