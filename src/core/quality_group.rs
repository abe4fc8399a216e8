// src/core/quality_group.rs

use crate::core::container_store::ContainerRef;
use crate::models::{ExtruderPosition, QualityKey};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A matched quality container for one extruder position, plus the intent
/// containers found for it keyed by intent category.
#[derive(Debug, Clone)]
pub struct QualityNode {
    /// The quality (or intent) container for this position.
    pub container: ContainerRef,
    /// Intents found for this node, by category.
    pub intents: IndexMap<String, ContainerRef>,
}

impl QualityNode {
    /// A node without intents.
    pub fn new(container: ContainerRef) -> Self {
        Self {
            container,
            intents: IndexMap::new(),
        }
    }

    /// Attaches an intent under `category`, returning the container it replaced.
    pub fn attach_intent(
        &mut self,
        category: impl Into<String>,
        intent: ContainerRef,
    ) -> Option<ContainerRef> {
        self.intents.insert(category.into(), intent)
    }

    /// The intent attached under `category`.
    pub fn intent(&self, category: &str) -> Option<&ContainerRef> {
        self.intents.get(category)
    }
}

/// The per-position containers realizing one `(intent_category, quality_type)`.
#[derive(Debug, Clone)]
pub struct QualityGroup {
    /// Display name.
    pub name: String,
    /// `(intent_category, quality_type)` this group realizes.
    pub key: QualityKey,
    /// Nodes by position.
    pub nodes: BTreeMap<ExtruderPosition, QualityNode>,
}

impl QualityGroup {
    /// An empty group.
    pub fn new(name: impl Into<String>, key: QualityKey) -> Self {
        Self {
            name: name.into(),
            key,
            nodes: BTreeMap::new(),
        }
    }

    /// The quality type half of the key.
    pub fn quality_type(&self) -> &str {
        &self.key.quality_type
    }

    /// The intent category half of the key.
    pub fn intent_category(&self) -> &str {
        &self.key.intent_category
    }

    /// The node of the global stack.
    pub fn node_for_global(&self) -> Option<&QualityNode> {
        self.nodes.get(&ExtruderPosition::Global)
    }

    /// The node of one extruder.
    pub fn node_for_extruder(&self, position: usize) -> Option<&QualityNode> {
        self.nodes.get(&ExtruderPosition::Extruder(position))
    }

    /// Mutable access to one extruder's node.
    pub fn node_for_extruder_mut(&mut self, position: usize) -> Option<&mut QualityNode> {
        self.nodes.get_mut(&ExtruderPosition::Extruder(position))
    }

    /// Extruder nodes ordered by position.
    pub fn nodes_for_extruders(&self) -> impl Iterator<Item = (usize, &QualityNode)> {
        self.nodes.iter().filter_map(|(position, node)| match position {
            ExtruderPosition::Extruder(p) => Some((*p, node)),
            ExtruderPosition::Global => None,
        })
    }

    /// Inserts a node, returning the one it replaced.
    pub fn set_node(&mut self, position: ExtruderPosition, node: QualityNode) -> Option<QualityNode> {
        self.nodes.insert(position, node)
    }

    /// A group is usable when it covers the whole machine: either through a
    /// global node or through a node on every active extruder.
    pub fn is_well_formed(&self, active_positions: &[usize]) -> bool {
        self.node_for_global().is_some()
            || (!active_positions.is_empty()
                && active_positions
                    .iter()
                    .all(|p| self.node_for_extruder(*p).is_some()))
    }

    /// Whether the group provides something for `position`.
    pub fn covers(&self, position: usize) -> bool {
        self.node_for_global().is_some() || self.node_for_extruder(position).is_some()
    }
}

/// A user-created profile: one quality-changes container per position,
/// all sharing the same name.
#[derive(Debug, Clone)]
pub struct QualityChangesGroup {
    /// Profile name shared by every container.
    pub name: String,
    /// The pair the profile was made on.
    pub key: QualityKey,
    /// Containers by position.
    pub containers: BTreeMap<ExtruderPosition, ContainerRef>,
    /// The profile's quality type is available on the machine.
    pub is_available: bool,
}

impl QualityChangesGroup {
    /// An empty, unavailable group.
    pub fn new(name: impl Into<String>, key: QualityKey) -> Self {
        Self {
            name: name.into(),
            key,
            containers: BTreeMap::new(),
            is_available: false,
        }
    }

    /// Files `container` under its position; the last one wins.
    pub fn add_container(&mut self, container: ContainerRef) {
        let position = container
            .metadata
            .position
            .map_or(ExtruderPosition::Global, ExtruderPosition::Extruder);
        if let Some(previous) = self.containers.insert(position, Arc::clone(&container)) {
            log::warn!(
                "Quality changes '{}' has two containers for position {}: '{}' replaces '{}'.",
                self.name,
                position,
                container.id(),
                previous.id()
            );
        }
    }

    /// Ids of every container in the group.
    pub fn container_ids(&self) -> impl Iterator<Item = &str> {
        self.containers.values().map(|c| c.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, ContainerMetadata, ContainerType};

    fn quality(id: &str) -> ContainerRef {
        Arc::new(Container::new(
            ContainerMetadata::new(id, ContainerType::Quality).with_quality_type("normal"),
        ))
    }

    #[test]
    fn test_well_formed_with_global_node() {
        let mut group = QualityGroup::new("Normal", QualityKey::new("default", "normal"));
        assert!(!group.is_well_formed(&[0, 1]));
        group.set_node(ExtruderPosition::Global, QualityNode::new(quality("global")));
        assert!(group.is_well_formed(&[0, 1]));
        assert!(group.is_well_formed(&[]));
    }

    #[test]
    fn test_well_formed_requires_every_active_extruder() {
        let mut group = QualityGroup::new("Normal", QualityKey::new("default", "normal"));
        group.set_node(ExtruderPosition::Extruder(0), QualityNode::new(quality("e0")));
        assert!(group.is_well_formed(&[0]));
        assert!(!group.is_well_formed(&[0, 1]));
        assert!(!group.is_well_formed(&[]));
        assert!(group.covers(0));
        assert!(!group.covers(1));
    }

    #[test]
    fn test_quality_changes_positions() {
        let mut group = QualityChangesGroup::new("Mine", QualityKey::new("default", "normal"));
        group.add_container(Arc::new(Container::new(ContainerMetadata::new(
            "mine_global",
            ContainerType::QualityChanges,
        ))));
        group.add_container(Arc::new(Container::new(
            ContainerMetadata::new("mine_e1", ContainerType::QualityChanges).with_position(1),
        )));
        let ids: Vec<_> = group.container_ids().collect();
        assert_eq!(ids, vec!["mine_global", "mine_e1"]);
    }
}
