//! Layered settings resolution for 3D-printer profiles: quality groups,
//! intents and deferred setting values.

include!(concat!(env!("OUT_DIR"), "/translations.rs"));

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Set by store subscribers when a derived view must be rebuilt.
pub type DirtyFlag = Arc<AtomicBool>;

/// Command-line front end over a workspace snapshot.
pub mod cli;
/// Well-known ids and names.
pub mod constants;
/// Resolution engine: store, stacks, quality groups, intents.
pub mod core;
/// Container and workspace data model.
pub mod models;
