// src/core/fixtures.rs
//
// Shared test data: a two-extruder Ultimaker 3 with "normal" and "abnorm"
// qualities and two PLA intents ("smooth" on normal, "strong" on abnorm).

use crate::core::container_store::{ContainerRef, ContainerStore};
use crate::core::expression::Expression;
use crate::core::quality_index::QualityGroupIndex;
use crate::core::stack::{ExtruderStack, GlobalStack, MachineManager};
use crate::models::{Container, ContainerMetadata, ContainerType, SettingProperty, SettingType};
use std::sync::Arc;

pub const DEFINITION: &str = "ultimaker3";
pub const NOZZLE: &str = "AA 0.4";
pub const PLA: &str = "generic_pla";
pub const ABS: &str = "generic_abs";

/// Source of the deferred layer height stored on the "normal" global quality.
pub const NORMAL_LAYER_HEIGHT: &str = "machine_nozzle_size * 0.375";

/// Layer height declared on the machine definition.
pub const DEFAULT_LAYER_HEIGHT: f64 = 0.1;

fn quality(id: &str, quality_type: &str, material: &str) -> Container {
    Container::new(
        ContainerMetadata::new(id, ContainerType::Quality)
            .with_definition(DEFINITION)
            .with_variant(NOZZLE)
            .with_material(material)
            .with_quality_type(quality_type),
    )
}

fn intent(id: &str, category: &str, quality_type: &str) -> Container {
    Container::new(
        ContainerMetadata::new(id, ContainerType::Intent)
            .with_definition(DEFINITION)
            .with_variant(NOZZLE)
            .with_material(PLA)
            .with_quality_type(quality_type)
            .with_intent_category(category),
    )
}

fn material(id: &str, base_file: &str, name: &str) -> Container {
    Container::new(
        ContainerMetadata::new(id, ContainerType::Material)
            .with_name(name)
            .with_definition(DEFINITION)
            .with_variant(NOZZLE)
            .with_base_file(base_file),
    )
}

pub fn definition() -> Container {
    Container::new(
        ContainerMetadata::new(DEFINITION, ContainerType::Machine)
            .with_name("Ultimaker 3")
            .with_machine_quality()
            .with_variants()
            .with_materials(),
    )
    .with_setting(
        "layer_height",
        SettingProperty::value(DEFAULT_LAYER_HEIGHT)
            .with_unit("mm")
            .with_type(SettingType::Float),
    )
    .with_setting(
        "machine_nozzle_size",
        SettingProperty::value(0.4)
            .with_unit("mm")
            .with_type(SettingType::Float),
    )
}

/// Every container of the scenario, in the order they are registered.
pub fn containers() -> Vec<Container> {
    let normal_layer_height = Expression::parse(NORMAL_LAYER_HEIGHT).unwrap();
    vec![
        definition(),
        Container::new(
            ContainerMetadata::new("ultimaker3_extruder_left", ContainerType::ExtruderTrain)
                .with_position(0),
        ),
        Container::new(
            ContainerMetadata::new("ultimaker3_extruder_right", ContainerType::ExtruderTrain)
                .with_position(1),
        ),
        Container::new(
            ContainerMetadata::new("ultimaker3_aa0.4", ContainerType::Variant)
                .with_name(NOZZLE)
                .with_definition(DEFINITION),
        ),
        material("generic_pla_ultimaker3_AA_0.4", PLA, "Generic PLA"),
        material("generic_abs_ultimaker3_AA_0.4", ABS, "Generic ABS"),
        Container::new(
            ContainerMetadata::new("um3_global_normal", ContainerType::Quality)
                .with_name("Normal")
                .with_definition(DEFINITION)
                .with_quality_type("normal")
                .as_global_quality(),
        )
        .with_setting("layer_height", SettingProperty::value(normal_layer_height)),
        Container::new(
            ContainerMetadata::new("um3_global_abnorm", ContainerType::Quality)
                .with_name("Abnormal")
                .with_definition(DEFINITION)
                .with_quality_type("abnorm")
                .as_global_quality(),
        ),
        quality("um3_aa0.4_pla_normal", "normal", PLA),
        quality("um3_aa0.4_pla_abnorm", "abnorm", PLA),
        quality("um3_aa0.4_abs_normal", "normal", ABS),
        quality("um3_aa0.4_abs_abnorm", "abnorm", ABS),
        intent("um3_aa0.4_pla_smooth_normal", "smooth", "normal"),
        intent("um3_aa0.4_pla_strong_abnorm", "strong", "abnorm"),
    ]
}

pub fn populated_store() -> Arc<ContainerStore> {
    let store = ContainerStore::new();
    for container in containers() {
        store.add_container(container).unwrap();
    }
    Arc::new(store)
}

fn fetch(store: &ContainerStore, id: &str) -> ContainerRef {
    store.find_container(id).unwrap()
}

/// The active machine: PLA on the left extruder, `right_material` (a base
/// file, `PLA` or `ABS`) on the right one.
pub fn machine(store: &ContainerStore, right_material: &str) -> GlobalStack {
    let extruder = |id: &str, position: usize, definition: &str, base_file: &str| {
        ExtruderStack::new(id, position, fetch(store, definition))
            .with_variant(fetch(store, "ultimaker3_aa0.4"))
            .with_material(fetch(store, &format!("{}_ultimaker3_AA_0.4", base_file)))
    };
    GlobalStack::new("um3", fetch(store, DEFINITION))
        .with_quality(fetch(store, "um3_global_normal"))
        .with_extruder(extruder("um3_left", 0, "ultimaker3_extruder_left", PLA))
        .with_extruder(extruder("um3_right", 1, "ultimaker3_extruder_right", right_material))
}

pub struct Scenario {
    pub store: Arc<ContainerStore>,
    pub machines: Arc<MachineManager>,
    pub index: Arc<QualityGroupIndex>,
}

pub fn scenario(right_material: &str) -> Scenario {
    let store = populated_store();
    let machines = Arc::new(MachineManager::new(Some(machine(&store, right_material))));
    let index = Arc::new(QualityGroupIndex::new(Arc::clone(&store)));
    Scenario {
        store,
        machines,
        index,
    }
}

/// A scenario whose store holds the same containers but no machine is active.
pub fn scenario_without_machine() -> Scenario {
    let store = populated_store();
    let index = Arc::new(QualityGroupIndex::new(Arc::clone(&store)));
    Scenario {
        store,
        machines: Arc::new(MachineManager::new(None)),
        index,
    }
}
