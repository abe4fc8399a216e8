// src/core/container_store.rs

use crate::models::{Container, ContainerMetadata, ContainerType};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use uuid::Uuid;

/// Shared, immutable handle to a container held by the store.
pub type ContainerRef = Arc<Container>;

/// Callback invoked for every add/remove notification.
pub type Listener = Box<dyn Fn(&ContainerEvent) + Send + Sync>;

/// Store mutations that were refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Ids are unique within a store.
    #[error("A container with id '{id}' is already registered.")]
    DuplicateId {
        /// The id already in use.
        id: String,
    },
    /// No container has this id.
    #[error("Container '{id}' not found in the store.")]
    NotFound {
        /// The id looked up.
        id: String,
    },
}

/// Result of a store mutation.
pub type StoreResult<T> = Result<T, StoreError>;

/// A change notification. Carries the metadata of the affected container so
/// subscribers can filter on its type.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    /// A container was registered.
    Added(ContainerMetadata),
    /// A container was removed.
    Removed(ContainerMetadata),
}

impl ContainerEvent {
    /// Metadata of the affected container.
    pub fn metadata(&self) -> &ContainerMetadata {
        match self {
            Self::Added(metadata) | Self::Removed(metadata) => metadata,
        }
    }

    /// Type of the affected container.
    pub fn container_type(&self) -> ContainerType {
        self.metadata().container_type
    }
}

/// Handle returned by [`ContainerStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Metadata filter for store lookups. Every field that is set must match
/// exactly; a container lacking a filtered entry does not match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerQuery {
    /// Exact id.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Container type.
    pub container_type: Option<ContainerType>,
    /// Definition id.
    pub definition: Option<String>,
    /// Variant name.
    pub variant: Option<String>,
    /// Material base file.
    pub material: Option<String>,
    /// Quality type.
    pub quality_type: Option<String>,
    /// Intent category.
    pub intent_category: Option<String>,
    /// `global_quality` flag.
    pub global_quality: Option<bool>,
}

impl ContainerQuery {
    /// A query for every container of one type.
    pub fn of_type(container_type: ContainerType) -> Self {
        Self {
            container_type: Some(container_type),
            ..Default::default()
        }
    }

    /// Filters on the id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Filters on the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Filters on the definition id.
    pub fn definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    /// Filters on the variant name.
    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Filters on the material base file.
    pub fn material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    /// Filters on the quality type.
    pub fn quality_type(mut self, quality_type: impl Into<String>) -> Self {
        self.quality_type = Some(quality_type.into());
        self
    }

    /// Filters on the intent category.
    pub fn intent_category(mut self, intent_category: impl Into<String>) -> Self {
        self.intent_category = Some(intent_category.into());
        self
    }

    /// Filters on the `global_quality` flag.
    pub fn global_quality(mut self, global_quality: bool) -> Self {
        self.global_quality = Some(global_quality);
        self
    }

    /// Returns `true` if `metadata` satisfies every filter that is set.
    pub fn matches(&self, metadata: &ContainerMetadata) -> bool {
        fn field(filter: &Option<String>, value: Option<&String>) -> bool {
            match filter {
                None => true,
                Some(expected) => value == Some(expected),
            }
        }

        field(&self.id, Some(&metadata.id))
            && field(&self.name, Some(&metadata.name))
            && self
                .container_type
                .is_none_or(|t| t == metadata.container_type)
            && field(&self.definition, metadata.definition.as_ref())
            && field(&self.variant, metadata.variant.as_ref())
            && field(&self.material, metadata.material.as_ref())
            && field(&self.quality_type, metadata.quality_type.as_ref())
            && field(&self.intent_category, metadata.intent_category.as_ref())
            && self
                .global_quality
                .is_none_or(|g| g == metadata.global_quality)
    }
}

/// In-memory registry of every installed container, in insertion order.
///
/// The store is shared through an `Arc` and mutated through `&self`; the
/// order in which containers were added is what breaks ties between
/// containers that claim the same grouping key.
pub struct ContainerStore {
    containers: RwLock<Vec<ContainerRef>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
}

impl fmt::Debug for ContainerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerStore")
            .field("containers", &self.len())
            .field("listeners", &read(&self.listeners).len())
            .finish()
    }
}

impl Default for ContainerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ContainerStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Number of registered containers.
    pub fn len(&self) -> usize {
        read(&self.containers).len()
    }

    /// Whether the store holds no container.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a container and notifies subscribers.
    pub fn add_container(&self, container: Container) -> StoreResult<ContainerRef> {
        let container = Arc::new(container);
        {
            let mut containers = write(&self.containers);
            if containers.iter().any(|c| c.id() == container.id()) {
                return Err(StoreError::DuplicateId {
                    id: container.id().to_string(),
                });
            }
            containers.push(Arc::clone(&container));
        }
        log::trace!(
            "Container '{}' ({}) added to the store.",
            container.id(),
            container.container_type()
        );
        self.notify(&ContainerEvent::Added(container.metadata.clone()));
        Ok(container)
    }

    /// Removes a container by id and notifies subscribers.
    pub fn remove_container(&self, id: &str) -> StoreResult<ContainerRef> {
        let removed = {
            let mut containers = write(&self.containers);
            let index = containers
                .iter()
                .position(|c| c.id() == id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            containers.remove(index)
        };
        log::trace!("Container '{}' removed from the store.", id);
        self.notify(&ContainerEvent::Removed(removed.metadata.clone()));
        Ok(removed)
    }

    /// Replaces a container's display name in place, keeping its position in
    /// the insertion order. Returns the renamed container.
    pub fn rename_container(&self, id: &str, new_name: &str) -> StoreResult<ContainerRef> {
        let mut containers = write(&self.containers);
        let slot = containers
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let mut renamed = Container::clone(slot);
        renamed.metadata.name = new_name.to_string();
        *slot = Arc::new(renamed);
        Ok(Arc::clone(slot))
    }

    /// The container with `id`.
    pub fn find_container(&self, id: &str) -> Option<ContainerRef> {
        read(&self.containers).iter().find(|c| c.id() == id).cloned()
    }

    /// All containers matching `query`, oldest first.
    pub fn find_containers(&self, query: &ContainerQuery) -> Vec<ContainerRef> {
        read(&self.containers)
            .iter()
            .filter(|c| query.matches(&c.metadata))
            .cloned()
            .collect()
    }

    /// Metadata records of all containers matching `query`, oldest first.
    pub fn find_containers_metadata(&self, query: &ContainerQuery) -> Vec<ContainerMetadata> {
        read(&self.containers)
            .iter()
            .filter(|c| query.matches(&c.metadata))
            .map(|c| c.metadata.clone())
            .collect()
    }

    /// Returns `base` if no container uses it as name or id, otherwise the
    /// first free `"<base> #<n>"` starting at 2. An existing `#<n>` suffix on
    /// `base` is replaced rather than extended.
    pub fn unique_name(&self, base: &str) -> String {
        let base = base.trim();
        let stem = match base.rsplit_once(" #") {
            Some((stem, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => stem,
            _ => base,
        };
        let containers = read(&self.containers);
        let taken = |candidate: &str| {
            containers
                .iter()
                .any(|c| c.metadata.name == candidate || c.id() == candidate)
        };

        if !taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} #{}", stem, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Registers a callback for add/remove notifications.
    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        write(&self.listeners).push((id, listener));
        id
    }

    /// Drops a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn notify(&self, event: &ContainerEvent) {
        for (_, listener) in read(&self.listeners).iter() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn intent(id: &str, category: &str, quality_type: &str) -> Container {
        Container::new(
            ContainerMetadata::new(id, ContainerType::Intent)
                .with_definition("ultimaker3")
                .with_variant("AA 0.4")
                .with_material("generic_pla")
                .with_intent_category(category)
                .with_quality_type(quality_type),
        )
    }

    #[test]
    fn test_find_by_metadata_filters() {
        let store = ContainerStore::new();
        store.add_container(intent("smooth_normal", "smooth", "normal")).unwrap();
        store.add_container(intent("strong_abnorm", "strong", "abnorm")).unwrap();
        store
            .add_container(Container::new(ContainerMetadata::new(
                "generic_pla",
                ContainerType::Material,
            )))
            .unwrap();

        let query = ContainerQuery::of_type(ContainerType::Intent)
            .definition("ultimaker3")
            .variant("AA 0.4")
            .material("generic_pla");
        let ids: Vec<_> = store
            .find_containers_metadata(&query)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["smooth_normal", "strong_abnorm"]);

        let strong = store.find_containers(&query.clone().intent_category("strong"));
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].id(), "strong_abnorm");

        // The material container has no definition entry, so it cannot match a definition filter.
        let none = store.find_containers(&ContainerQuery::default().definition("ultimaker3").id("generic_pla"));
        assert!(none.is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let store = ContainerStore::new();
        store.add_container(intent("a", "smooth", "normal")).unwrap();
        let result = store.add_container(intent("a", "strong", "normal"));
        assert_eq!(result.unwrap_err(), StoreError::DuplicateId { id: "a".into() });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_subscribers_receive_add_and_remove() {
        let store = ContainerStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = store.subscribe(Box::new(move |event| {
            let kind = match event {
                ContainerEvent::Added(_) => "added",
                ContainerEvent::Removed(_) => "removed",
            };
            sink.lock().unwrap().push(format!("{}:{}", kind, event.metadata().id));
        }));

        store.add_container(intent("a", "smooth", "normal")).unwrap();
        store.remove_container("a").unwrap();
        assert!(store.unsubscribe(id));
        store.add_container(intent("b", "smooth", "normal")).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["added:a", "removed:a"]);
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn test_remove_unknown_container_fails() {
        let store = ContainerStore::new();
        assert_eq!(
            store.remove_container("ghost").unwrap_err(),
            StoreError::NotFound { id: "ghost".into() }
        );
    }

    #[test]
    fn test_unique_name() {
        let store = ContainerStore::new();
        assert_eq!(store.unique_name("Fine"), "Fine");

        store
            .add_container(Container::new(
                ContainerMetadata::new("qc_1", ContainerType::QualityChanges).with_name("Fine"),
            ))
            .unwrap();
        assert_eq!(store.unique_name("Fine"), "Fine #2");

        store
            .add_container(Container::new(
                ContainerMetadata::new("qc_2", ContainerType::QualityChanges).with_name("Fine #2"),
            ))
            .unwrap();
        assert_eq!(store.unique_name("Fine #2"), "Fine #3");
    }

    #[test]
    fn test_rename_keeps_insertion_order() {
        let store = ContainerStore::new();
        store.add_container(intent("a", "smooth", "normal")).unwrap();
        store.add_container(intent("b", "smooth", "normal")).unwrap();

        let renamed = store.rename_container("a", "Renamed").unwrap();
        assert_eq!(renamed.metadata.name, "Renamed");

        let ids: Vec<_> = store
            .find_containers(&ContainerQuery::default())
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
