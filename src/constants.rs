// src/constants.rs

/// The intent category every configuration supports implicitly.
pub const DEFAULT_INTENT_CATEGORY: &str = "default";

/// Id of the synthetic intent container used when no real intent applies.
pub const EMPTY_INTENT_ID: &str = "empty_intent";

/// Id of the synthetic quality-changes container stacks fall back to.
pub const EMPTY_QUALITY_CHANGES_ID: &str = "empty_quality_changes";

/// Definition that hosts the qualities of machines without their own.
pub const FALLBACK_QUALITY_DEFINITION: &str = "fdmprinter";

/// The setting the layer-height projection resolves.
pub const LAYER_HEIGHT_KEY: &str = "layer_height";

/// Maximum nesting of deferred references before evaluation is aborted.
pub const MAX_EVALUATION_DEPTH: u32 = 32;

/// The name of the workspace snapshot file.
pub const WORKSPACE_FILENAME: &str = "strata.toml";

/// Intent categories with a known display order, lightest first.
pub const KNOWN_INTENT_CATEGORIES: &[&str] = &["default", "engineering", "smooth"];
