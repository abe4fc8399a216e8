// src/core/quality_index.rs

use crate::constants::{DEFAULT_INTENT_CATEGORY, EMPTY_INTENT_ID, FALLBACK_QUALITY_DEFINITION};
use crate::core::container_store::{ContainerQuery, ContainerRef, ContainerStore};
use crate::core::quality_group::{QualityGroup, QualityNode};
use crate::core::stack::{ExtruderStack, GlobalStack};
use crate::models::{Container, ContainerType, ExtruderPosition, QualityKey};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Quality groups keyed by `(intent_category, quality_type)`, in order of
/// first discovery: every default group first, then the intent groups.
pub type QualityGroups = IndexMap<QualityKey, QualityGroup>;

/// The definition id qualities for `definition` are registered under.
///
/// Machines without their own qualities share the generic ones; a
/// `quality_definition` entry redirects the search to another definition.
pub fn quality_definition_id(definition: &Container) -> String {
    let metadata = &definition.metadata;
    if !metadata.has_machine_quality {
        return FALLBACK_QUALITY_DEFINITION.to_string();
    }
    metadata
        .quality_definition
        .clone()
        .unwrap_or_else(|| metadata.id.clone())
}

/// Builds quality groups for the active machine from the Container Store.
///
/// Nothing is cached here: every call reads the store again. Components that
/// need a cache keep their own and invalidate it on store notifications.
#[derive(Debug)]
pub struct QualityGroupIndex {
    store: Arc<ContainerStore>,
}

impl QualityGroupIndex {
    /// An index over `store`.
    pub fn new(store: Arc<ContainerStore>) -> Self {
        Self { store }
    }

    /// The store groups are built from.
    pub fn store(&self) -> &Arc<ContainerStore> {
        &self.store
    }

    /// Adds the variant/material filters `extruder` imposes on a quality or
    /// intent lookup. `None` when the machine needs a variant or material the
    /// extruder does not have loaded.
    pub fn extruder_query(
        &self,
        query: ContainerQuery,
        machine: &GlobalStack,
        extruder: &ExtruderStack,
    ) -> Option<ContainerQuery> {
        let metadata = &machine.definition().metadata;
        let mut query = query;
        if metadata.has_variants {
            query = query.variant(extruder.variant_name()?);
        }
        if metadata.has_materials {
            query = query.material(extruder.material_base_file()?);
        }
        Some(query)
    }

    /// Groups for the `default` intent category only, keyed by quality type.
    ///
    /// Malformed groups (neither a global node nor a node on every active
    /// extruder) are dropped.
    pub fn default_groups(&self, machine: &GlobalStack) -> IndexMap<String, QualityGroup> {
        let definition_id = quality_definition_id(machine.definition());
        let active: Vec<usize> = machine.active_extruders().map(|e| e.position).collect();
        let mut groups: IndexMap<String, QualityGroup> = IndexMap::new();

        let global_query = ContainerQuery::of_type(ContainerType::Quality)
            .definition(definition_id.as_str())
            .global_quality(true);
        for quality in self.store.find_containers(&global_query) {
            place_quality(&mut groups, ExtruderPosition::Global, quality);
        }

        for extruder in machine.active_extruders() {
            let base = ContainerQuery::of_type(ContainerType::Quality)
                .definition(definition_id.as_str())
                .global_quality(false);
            let Some(query) = self.extruder_query(base, machine, extruder) else {
                log::debug!(
                    "Extruder {} lacks a variant or material; no qualities for it.",
                    extruder.position
                );
                continue;
            };
            for quality in self.store.find_containers(&query) {
                place_quality(&mut groups, ExtruderPosition::Extruder(extruder.position), quality);
            }
        }

        for group in groups.values_mut() {
            let quality_type = group.quality_type().to_string();
            for extruder in machine.active_extruders() {
                let Some(node) = group.node_for_extruder_mut(extruder.position) else {
                    continue;
                };
                let base = ContainerQuery::of_type(ContainerType::Intent)
                    .definition(definition_id.as_str())
                    .quality_type(quality_type.as_str());
                let Some(query) = self.extruder_query(base, machine, extruder) else {
                    continue;
                };
                for intent in self.store.find_containers(&query) {
                    attach_intent(node, extruder.position, intent);
                }
            }
        }

        groups.retain(|quality_type, group| {
            let keep = group.is_well_formed(&active);
            if !keep {
                log::debug!(
                    "Quality type '{}' does not cover every active extruder; skipped.",
                    quality_type
                );
            }
            keep
        });
        groups
    }

    /// Every quality group available on `machine`.
    pub fn build_groups(&self, machine: &GlobalStack) -> QualityGroups {
        let mut result = QualityGroups::new();
        for (_, group) in self.default_groups(machine) {
            let intent_groups = intent_groups_of(&group);
            result.insert(group.key.clone(), group);
            for intent_group in intent_groups {
                result.insert(intent_group.key.clone(), intent_group);
            }
        }
        log::trace!(
            "Built {} quality groups for machine '{}'.",
            result.len(),
            machine.id
        );
        result
    }

    /// The groups of one intent category.
    pub fn groups_for_category(&self, machine: &GlobalStack, category: &str) -> Vec<QualityGroup> {
        self.build_groups(machine)
            .into_values()
            .filter(|g| g.intent_category() == category)
            .collect()
    }

    /// The `(intent_category, quality_type)` pairs extruder `position` can
    /// realize on its own.
    pub fn local_keys(groups: &QualityGroups, position: usize) -> IndexSet<QualityKey> {
        groups
            .iter()
            .filter(|(key, group)| {
                if key.intent_category == DEFAULT_INTENT_CATEGORY {
                    group.covers(position)
                } else {
                    group
                        .node_for_extruder(position)
                        .is_some_and(|n| n.container.container_type() == ContainerType::Intent)
                }
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn place_quality(
    groups: &mut IndexMap<String, QualityGroup>,
    position: ExtruderPosition,
    quality: ContainerRef,
) {
    let Some(quality_type) = quality.metadata.quality_type.clone() else {
        log::warn!("Quality '{}' has no quality_type; ignored.", quality.id());
        return;
    };
    let group = groups.entry(quality_type.clone()).or_insert_with(|| {
        QualityGroup::new(
            quality.metadata.display_name(),
            QualityKey::new(DEFAULT_INTENT_CATEGORY, quality_type.as_str()),
        )
    });
    if position == ExtruderPosition::Global {
        group.name = quality.metadata.display_name().to_string();
    }
    let id = quality.id().to_string();
    if let Some(previous) = group.set_node(position, QualityNode::new(quality)) {
        log::warn!(
            "Qualities '{}' and '{}' both claim ({}, {}) at position {}; using '{}'.",
            previous.container.id(),
            id,
            DEFAULT_INTENT_CATEGORY,
            quality_type,
            position,
            id
        );
    }
}

fn attach_intent(node: &mut QualityNode, position: usize, intent: ContainerRef) {
    if intent.id() == EMPTY_INTENT_ID {
        return;
    }
    let category = intent
        .metadata
        .intent_category
        .clone()
        .unwrap_or_else(|| DEFAULT_INTENT_CATEGORY.to_string());
    if category == DEFAULT_INTENT_CATEGORY {
        return;
    }
    let id = intent.id().to_string();
    if let Some(previous) = node.attach_intent(category.as_str(), intent) {
        log::warn!(
            "Intents '{}' and '{}' both claim category '{}' on extruder {}; using '{}'.",
            previous.id(),
            id,
            category,
            position,
            id
        );
    }
}

/// Derives the intent groups of a default group. Extruders with a matching
/// intent get a node wrapping the intent; the others reuse the default node.
fn intent_groups_of(group: &QualityGroup) -> Vec<QualityGroup> {
    let mut per_category: IndexMap<String, BTreeMap<usize, ContainerRef>> = IndexMap::new();
    for (position, node) in group.nodes_for_extruders() {
        for (category, intent) in &node.intents {
            per_category
                .entry(category.clone())
                .or_default()
                .insert(position, Arc::clone(intent));
        }
    }

    per_category
        .into_iter()
        .map(|(category, intents)| {
            let name = intents
                .values()
                .next()
                .map(|i| i.metadata.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{}_{}", group.name, category));
            let mut intent_group =
                QualityGroup::new(name, QualityKey::new(category, group.quality_type()));
            for (position, node) in &group.nodes {
                let node = match position {
                    ExtruderPosition::Extruder(p) => intents
                        .get(p)
                        .map(|intent| QualityNode::new(Arc::clone(intent)))
                        .unwrap_or_else(|| node.clone()),
                    ExtruderPosition::Global => node.clone(),
                };
                intent_group.set_node(*position, node);
            }
            intent_group
        })
        .collect()
}
