// src/core/workspace_loader.rs

use crate::core::container_store::{ContainerQuery, ContainerRef, ContainerStore, StoreError};
use crate::core::intent_manager::IntentManager;
use crate::core::layer_height::LayerHeightProjection;
use crate::core::quality_index::QualityGroupIndex;
use crate::core::stack::{ExtruderStack, GlobalStack, MachineManager};
use crate::models::{ContainerType, MachineSnapshot, WorkspaceFile};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Why a workspace could not be loaded.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The file could not be read.
    #[error("Could not read workspace '{path}': {source}")]
    Io {
        /// The file.
        path: String,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid workspace TOML.
    #[error("Error parsing TOML in '{path}': {source}")]
    TomlParse {
        /// The file, or the name given to [`Workspace::parse`].
        path: String,
        /// The parse error.
        #[source]
        source: toml::de::Error,
    },
    /// A container could not be registered.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The machine references an id the snapshot lacks.
    #[error("The machine references {role} '{id}', which is not in the workspace.")]
    MissingContainer {
        /// The layer the id was given for.
        role: &'static str,
        /// The unknown id.
        id: String,
    },
    /// A container id was given for a layer of another type.
    #[error("Container '{id}' is used as {expected} but has type {found}.")]
    WrongType {
        /// The container id.
        id: String,
        /// The type the layer needs.
        expected: ContainerType,
        /// The container's actual type.
        found: ContainerType,
    },
}

/// Result of loading a workspace.
pub type LoadResult<T> = Result<T, LoadError>;

/// A populated Container Store plus the Machine Context built from a
/// workspace snapshot, wired together the way every component expects them.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Every container of the snapshot.
    pub store: Arc<ContainerStore>,
    /// The active machine, if the snapshot has one.
    pub machines: Arc<MachineManager>,
    /// Quality groups over `store`.
    pub index: Arc<QualityGroupIndex>,
}

impl Workspace {
    /// Reads and parses a workspace file.
    pub fn from_file(path: &Path) -> LoadResult<Self> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: display.clone(),
            source,
        })?;
        log::debug!("Loading workspace from '{}'.", display);
        Self::parse(&content, &display)
    }

    /// Parses a workspace from TOML. `origin` only names the source in errors.
    pub fn parse(content: &str, origin: &str) -> LoadResult<Self> {
        let file: WorkspaceFile = toml::from_str(content).map_err(|source| LoadError::TomlParse {
            path: origin.to_string(),
            source,
        })?;
        Self::from_snapshot(file)
    }

    /// Registers every container and builds the machine.
    pub fn from_snapshot(file: WorkspaceFile) -> LoadResult<Self> {
        let store = Arc::new(ContainerStore::new());
        for container in file.containers {
            store.add_container(container)?;
        }
        let machine = file
            .machine
            .as_ref()
            .map(|snapshot| build_machine(&store, snapshot))
            .transpose()?;
        log::debug!(
            "Workspace loaded: {} containers, active machine: {}.",
            store.len(),
            machine.as_ref().map_or("none", |m| m.id.as_str())
        );

        Ok(Self {
            index: Arc::new(QualityGroupIndex::new(Arc::clone(&store))),
            machines: Arc::new(MachineManager::new(machine)),
            store,
        })
    }

    /// An intent manager over this workspace.
    pub fn intent_manager(&self) -> IntentManager {
        IntentManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.machines),
            Arc::clone(&self.index),
        )
    }

    /// A layer-height projection of `intent_category`.
    pub fn layer_heights(&self, intent_category: &str) -> LayerHeightProjection {
        LayerHeightProjection::new(
            Arc::clone(&self.store),
            Arc::clone(&self.machines),
            Arc::clone(&self.index),
            intent_category,
        )
    }
}

fn fetch(
    store: &ContainerStore,
    id: &str,
    role: &'static str,
    expected: ContainerType,
) -> LoadResult<ContainerRef> {
    let container = store
        .find_container(id)
        .ok_or_else(|| LoadError::MissingContainer {
            role,
            id: id.to_string(),
        })?;
    if container.container_type() != expected {
        return Err(LoadError::WrongType {
            id: id.to_string(),
            expected,
            found: container.container_type(),
        });
    }
    Ok(container)
}

fn fetch_optional(
    store: &ContainerStore,
    id: Option<&String>,
    role: &'static str,
    expected: ContainerType,
) -> LoadResult<Option<ContainerRef>> {
    id.map(|id| fetch(store, id, role, expected)).transpose()
}

fn build_machine(store: &ContainerStore, snapshot: &MachineSnapshot) -> LoadResult<GlobalStack> {
    let definition = fetch(store, &snapshot.definition, "definition", ContainerType::Machine)?;
    let mut machine = GlobalStack::new(snapshot.id.as_str(), Arc::clone(&definition));
    if let Some(quality) = fetch_optional(store, snapshot.quality.as_ref(), "quality", ContainerType::Quality)? {
        machine = machine.with_quality(quality);
    }
    if let Some(changes) = fetch_optional(
        store,
        snapshot.quality_changes.as_ref(),
        "quality changes",
        ContainerType::QualityChanges,
    )? {
        machine = machine.with_quality_changes(changes);
    }

    let trains = store.find_containers(&ContainerQuery::of_type(ContainerType::ExtruderTrain));
    for extruder in &snapshot.extruders {
        let train = trains
            .iter()
            .find(|t| t.metadata.position == Some(extruder.position))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&definition));
        let mut stack = ExtruderStack::new(
            format!("{}_extruder_{}", snapshot.id, extruder.position),
            extruder.position,
            train,
        );
        if let Some(variant) = fetch_optional(store, extruder.variant.as_ref(), "variant", ContainerType::Variant)? {
            stack = stack.with_variant(variant);
        }
        if let Some(material) = fetch_optional(store, extruder.material.as_ref(), "material", ContainerType::Material)? {
            stack = stack.with_material(material);
        }
        if let Some(quality) = fetch_optional(store, extruder.quality.as_ref(), "quality", ContainerType::Quality)? {
            stack = stack.with_quality(quality);
        }
        if let Some(intent) = fetch_optional(store, extruder.intent.as_ref(), "intent", ContainerType::Intent)? {
            stack = stack.with_intent(intent);
        }
        if let Some(changes) = fetch_optional(
            store,
            extruder.quality_changes.as_ref(),
            "quality changes",
            ContainerType::QualityChanges,
        )? {
            stack = stack.with_quality_changes(changes);
        }
        if !extruder.enabled {
            stack = stack.disabled();
        }
        machine = machine.with_extruder(stack);
    }
    Ok(machine)
}
