// src/core/resolver.rs

use crate::core::expression::{self, ExpressionError};
use crate::core::quality_group::QualityGroup;
use crate::core::stack::{ConfigurationStack, GlobalStack, MachineManager};
use crate::models::Literal;
use std::sync::Arc;
use thiserror::Error;

/// Why a setting could not be resolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolverError {
    /// No layer, not even the definition, defines the setting.
    #[error(
        "Setting '{property}' is defined neither on '{container}' nor on the machine definition."
    )]
    ConfigurationIntegrity {
        /// The setting key.
        property: String,
        /// The container that was searched first.
        container: String,
    },
    /// The stored expression failed.
    #[error("Could not evaluate setting '{property}': {source}")]
    Evaluation {
        /// The setting key.
        property: String,
        /// The evaluation error.
        #[source]
        source: ExpressionError,
    },
    /// A numeric setting resolved to something else.
    #[error("Setting '{property}' resolved to '{value}', which is not a number.")]
    NotNumeric {
        /// The setting key.
        property: String,
        /// The resolved value.
        value: String,
    },
}

/// Result of a resolution.
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Resolves `property` for a quality group against the resolution context.
///
/// The group's global quality wins over the machine definition. Deferred
/// values are evaluated against `context` and the result is coerced to the
/// type the definition declares.
pub fn resolve(context: &GlobalStack, property: &str, group: &QualityGroup) -> ResolverResult<Literal> {
    let definition = context.definition();
    let source = group
        .node_for_global()
        .map(|node| &node.container)
        .filter(|container| container.value(property).is_some())
        .unwrap_or(definition);

    let Some(stored) = source.value(property) else {
        let container = group
            .node_for_global()
            .map_or(definition.id(), |node| node.container.id());
        return Err(ResolverError::ConfigurationIntegrity {
            property: property.to_string(),
            container: container.to_string(),
        });
    };

    let evaluation = |source: ExpressionError| ResolverError::Evaluation {
        property: property.to_string(),
        source,
    };
    let value = stored.evaluate(context).map_err(evaluation)?;
    log::trace!(
        "'{}' for group {} resolved from '{}': {}",
        property,
        group.key,
        source.id(),
        value
    );

    match definition
        .declared_type(property)
        .or_else(|| context.setting_type(property))
    {
        Some(kind) => expression::coerce(property, &value, kind).map_err(evaluation),
        None => Ok(value),
    }
}

/// [`resolve`] for numeric settings.
pub fn resolve_f64(context: &GlobalStack, property: &str, group: &QualityGroup) -> ResolverResult<f64> {
    let value = resolve(context, property, group)?;
    value.as_f64().ok_or_else(|| ResolverError::NotNumeric {
        property: property.to_string(),
        value: value.to_string(),
    })
}

/// Property resolution bound to the Machine Context.
#[derive(Debug, Clone)]
pub struct PropertyResolver {
    machines: Arc<MachineManager>,
}

impl PropertyResolver {
    /// A resolver reading the active machine from `machines`.
    pub fn new(machines: Arc<MachineManager>) -> Self {
        Self { machines }
    }

    /// Resolves against the active machine; `Ok(None)` when there is none.
    pub fn resolve(&self, property: &str, group: &QualityGroup) -> ResolverResult<Option<Literal>> {
        self.machines
            .with_active_machine(|machine| resolve(machine, property, group))
            .transpose()
    }
}
