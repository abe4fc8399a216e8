// src/core/layer_height.rs

use crate::DirtyFlag;
use crate::constants::{KNOWN_INTENT_CATEGORIES, LAYER_HEIGHT_KEY};
use crate::core::container_store::{ContainerEvent, ContainerStore, SubscriptionId};
use crate::core::intent_manager::IntentManager;
use crate::core::quality_index::QualityGroupIndex;
use crate::core::resolver::{self, ResolverResult};
use crate::core::stack::MachineManager;
use crate::models::ContainerType;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// One row of the projection.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LayerHeightEntry {
    /// Display name of the quality group.
    pub name: String,
    /// Quality type of the group.
    pub quality_type: String,
    /// Resolved `layer_height` of the group.
    pub layer_height: f64,
    /// Always `true`: groups that are not usable are left out.
    pub available: bool,
}

/// Store changes that can alter the quality groups of a machine.
fn invalidates(event: &ContainerEvent) -> bool {
    matches!(
        event.container_type(),
        ContainerType::Intent | ContainerType::Quality
    )
}

/// The quality groups of one intent category with their resolved layer
/// heights, sorted ascending.
///
/// Entries are recomputed lazily: intent (and quality) additions or removals
/// in the store, a change of machine revision, or a new category mark the
/// cached rows stale.
#[derive(Debug)]
pub struct LayerHeightProjection {
    store: Arc<ContainerStore>,
    machines: Arc<MachineManager>,
    index: Arc<QualityGroupIndex>,
    intent_category: String,
    dirty: DirtyFlag,
    subscription: SubscriptionId,
    revision: Option<u64>,
    entries: Vec<LayerHeightEntry>,
    unit: OnceLock<String>,
}

impl LayerHeightProjection {
    /// Creates a projection for `intent_category` and subscribes it to the store.
    pub fn new(
        store: Arc<ContainerStore>,
        machines: Arc<MachineManager>,
        index: Arc<QualityGroupIndex>,
        intent_category: impl Into<String>,
    ) -> Self {
        let dirty: DirtyFlag = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&dirty);
        let subscription = store.subscribe(Box::new(move |event| {
            if invalidates(event) {
                log::trace!(
                    "'{}' changed; layer heights marked stale.",
                    event.metadata().id
                );
                flag.store(true, Ordering::SeqCst);
            }
        }));
        Self {
            store,
            machines,
            index,
            intent_category: intent_category.into(),
            dirty,
            subscription,
            revision: None,
            entries: Vec::new(),
            unit: OnceLock::new(),
        }
    }

    /// The category being projected.
    pub fn intent_category(&self) -> &str {
        &self.intent_category
    }

    /// Switches the projected category; rows are recomputed on next read.
    pub fn set_intent_category(&mut self, category: impl Into<String>) {
        let category = category.into();
        if category != self.intent_category {
            self.intent_category = category;
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Whether the next [`Self::entries`] call recomputes.
    pub fn is_stale(&self) -> bool {
        self.dirty.load(Ordering::SeqCst) || self.revision != Some(self.machines.revision())
    }

    /// The unit of `layer_height` on the machine definition, read once per
    /// projection. Empty while no machine declares one; an empty read is not
    /// cached.
    pub fn layer_height_unit(&self) -> &str {
        if let Some(unit) = self.unit.get() {
            return unit;
        }
        let read = self
            .machines
            .with_active_machine(|machine| {
                machine
                    .definition()
                    .unit(LAYER_HEIGHT_KEY)
                    .map(str::to_string)
            })
            .flatten();
        match read {
            Some(unit) if !unit.is_empty() => self.unit.get_or_init(|| unit),
            _ => "",
        }
    }

    /// The current rows, recomputed first if stale.
    pub fn entries(&mut self) -> ResolverResult<&[LayerHeightEntry]> {
        if self.is_stale() {
            let revision = self.machines.revision();
            self.dirty.store(false, Ordering::SeqCst);
            match self.compute() {
                Ok(entries) => {
                    self.entries = entries;
                    self.revision = Some(revision);
                }
                Err(e) => {
                    self.dirty.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        Ok(&self.entries)
    }

    fn compute(&self) -> ResolverResult<Vec<LayerHeightEntry>> {
        self.layer_height_unit();
        let computed = self.machines.with_active_machine(|machine| {
            let mut entries = self
                .index
                .groups_for_category(machine, &self.intent_category)
                .into_iter()
                .map(|group| {
                    Ok(LayerHeightEntry {
                        layer_height: resolver::resolve_f64(machine, LAYER_HEIGHT_KEY, &group)?,
                        name: group.name,
                        quality_type: group.key.quality_type,
                        available: true,
                    })
                })
                .collect::<ResolverResult<Vec<_>>>()?;
            entries.sort_by(|a, b| {
                a.layer_height
                    .total_cmp(&b.layer_height)
                    .then_with(|| a.name.cmp(&b.name))
            });
            Ok(entries)
        });
        log::debug!(
            "Layer heights for '{}' recomputed.",
            self.intent_category
        );
        computed.unwrap_or_else(|| Ok(Vec::new()))
    }
}

impl Drop for LayerHeightProjection {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription);
    }
}

// --- INTENT CATEGORY CATALOG ---

/// Display position of a category; unknown categories sort after the known ones.
pub fn category_weight(category: &str) -> usize {
    KNOWN_INTENT_CATEGORIES
        .iter()
        .position(|known| *known == category)
        .unwrap_or(KNOWN_INTENT_CATEGORIES.len())
}

/// The user-visible name of a category.
pub fn category_display_name(category: &str) -> &'static str {
    match category {
        "default" => t!("category.default"),
        "engineering" => t!("category.engineering"),
        "smooth" => t!("category.smooth"),
        _ => t!("category.unknown"),
    }
}

/// One category of the catalog.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IntentCategoryEntry {
    /// Translated display name.
    pub name: String,
    /// The category id.
    pub intent_category: String,
    /// Sort key, see [`category_weight`].
    pub weight: usize,
    /// The category's layer-height rows.
    pub qualities: Vec<LayerHeightEntry>,
}

/// Every intent category available on the active machine, ordered by
/// weight, each with its layer-height rows.
pub fn intent_category_catalog(
    manager: &IntentManager,
    store: &Arc<ContainerStore>,
    machines: &Arc<MachineManager>,
    index: &Arc<QualityGroupIndex>,
) -> ResolverResult<Vec<IntentCategoryEntry>> {
    let mut catalog = Vec::new();
    for category in manager.current_available_intent_categories() {
        let mut projection = LayerHeightProjection::new(
            Arc::clone(store),
            Arc::clone(machines),
            Arc::clone(index),
            category.as_str(),
        );
        catalog.push(IntentCategoryEntry {
            name: category_display_name(&category).to_string(),
            weight: category_weight(&category),
            qualities: projection.entries()?.to_vec(),
            intent_category: category,
        });
    }
    catalog.sort_by(|a, b| {
        a.weight
            .cmp(&b.weight)
            .then_with(|| a.intent_category.cmp(&b.intent_category))
    });
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ABS, DEFAULT_LAYER_HEIGHT, DEFINITION, NOZZLE, PLA, Scenario};
    use crate::core::stack::{ExtruderStack, GlobalStack};
    use crate::models::{Container, ContainerMetadata};
    use pretty_assertions::assert_eq;

    fn projection(scenario: &Scenario, category: &str) -> LayerHeightProjection {
        LayerHeightProjection::new(
            Arc::clone(&scenario.store),
            Arc::clone(&scenario.machines),
            Arc::clone(&scenario.index),
            category,
        )
    }

    fn rows(projection: &mut LayerHeightProjection) -> Vec<(String, String)> {
        projection
            .entries()
            .unwrap()
            .iter()
            .map(|e| (e.quality_type.clone(), e.name.clone()))
            .collect()
    }

    fn pair(quality_type: &str, name: &str) -> (String, String) {
        (quality_type.to_string(), name.to_string())
    }

    #[test]
    fn test_default_rows_sorted_by_layer_height() {
        let scenario = fixtures::scenario(PLA);
        let mut projection = projection(&scenario, "default");
        let entries = projection.entries().unwrap().to_vec();

        assert!(entries.windows(2).all(|w| w[0].layer_height <= w[1].layer_height));
        assert!(entries.iter().all(|e| e.available));
        // "abnorm" has no override and lands on the definition's value.
        assert_eq!(entries[0].quality_type, "abnorm");
        assert_eq!(entries[0].layer_height, DEFAULT_LAYER_HEIGHT);
        assert_eq!(entries[1].quality_type, "normal");
        assert!((entries[1].layer_height - 0.15).abs() < 1e-9);
        assert_eq!(projection.layer_height_unit(), "mm");
    }

    #[test]
    fn test_rows_are_filtered_by_category() {
        let scenario = fixtures::scenario(PLA);
        let mut smooth = projection(&scenario, "smooth");
        assert_eq!(rows(&mut smooth), vec![pair("normal", "Normal_smooth")]);

        smooth.set_intent_category("strong");
        assert!(smooth.is_stale());
        assert_eq!(rows(&mut smooth), vec![pair("abnorm", "Abnormal_strong")]);
    }

    #[test]
    fn test_ties_are_broken_by_name() {
        let scenario = fixtures::scenario(PLA);
        for (id, name) in [("um3_global_zeta", "Zeta"), ("um3_global_alpha", "Alpha")] {
            scenario
                .store
                .add_container(Container::new(
                    ContainerMetadata::new(id, ContainerType::Quality)
                        .with_name(name)
                        .with_definition(DEFINITION)
                        .with_quality_type(id.trim_start_matches("um3_global_"))
                        .as_global_quality(),
                ))
                .unwrap();
        }
        let mut projection = projection(&scenario, "default");
        assert_eq!(
            rows(&mut projection),
            vec![
                pair("abnorm", "Abnormal"),
                pair("alpha", "Alpha"),
                pair("zeta", "Zeta"),
                pair("normal", "Normal"),
            ]
        );
    }

    #[test]
    fn test_intent_changes_mark_rows_stale() {
        let scenario = fixtures::scenario(ABS);
        let mut projection = projection(&scenario, "smooth");
        assert_eq!(rows(&mut projection), vec![pair("normal", "Normal_smooth")]);
        assert!(!projection.is_stale());

        scenario
            .store
            .add_container(Container::new(
                ContainerMetadata::new("um3_aa0.4_pla_smooth_abnorm", ContainerType::Intent)
                    .with_name("Smooth Abnormal")
                    .with_definition(DEFINITION)
                    .with_variant(NOZZLE)
                    .with_material(PLA)
                    .with_quality_type("abnorm")
                    .with_intent_category("smooth"),
            ))
            .unwrap();
        assert!(projection.is_stale());
        assert_eq!(
            rows(&mut projection),
            vec![pair("abnorm", "Smooth Abnormal"), pair("normal", "Normal_smooth")]
        );

        // Materials do not affect the groups.
        projection.entries().unwrap();
        scenario
            .store
            .add_container(Container::new(ContainerMetadata::new(
                "generic_cpe",
                ContainerType::Material,
            )))
            .unwrap();
        assert!(!projection.is_stale());
    }

    #[test]
    fn test_machine_changes_mark_rows_stale() {
        let scenario = fixtures::scenario(ABS);
        let mut projection = projection(&scenario, "strong");
        assert_eq!(rows(&mut projection).len(), 1);

        let abs = scenario.store.find_container("generic_abs_ultimaker3_AA_0.4");
        scenario.machines.update_extruder(0, |e| e.set_material(abs));
        assert!(projection.is_stale());
        assert!(rows(&mut projection).is_empty());
    }

    #[test]
    fn test_no_machine_gives_no_rows() {
        let scenario = fixtures::scenario_without_machine();
        let mut projection = projection(&scenario, "default");
        assert!(projection.entries().unwrap().is_empty());
        assert_eq!(projection.layer_height_unit(), "");
    }

    #[test]
    fn test_unit_is_read_once_a_machine_is_active() {
        let scenario = fixtures::scenario_without_machine();
        let mut projection = projection(&scenario, "default");
        assert!(projection.entries().unwrap().is_empty());
        assert_eq!(projection.layer_height_unit(), "");

        let machine = fixtures::machine(&scenario.store, PLA);
        scenario.machines.set_active_machine(Some(machine));
        assert_eq!(projection.entries().unwrap().len(), 2);
        assert_eq!(projection.layer_height_unit(), "mm");
    }

    #[test]
    fn test_unresolvable_layer_height_propagates() {
        let store = Arc::new(ContainerStore::new());
        let definition = store
            .add_container(Container::new(
                ContainerMetadata::new("bare", ContainerType::Machine).with_machine_quality(),
            ))
            .unwrap();
        store
            .add_container(Container::new(
                ContainerMetadata::new("bare_global_fast", ContainerType::Quality)
                    .with_definition("bare")
                    .with_quality_type("fast")
                    .as_global_quality(),
            ))
            .unwrap();
        let machine = GlobalStack::new("bare_machine", Arc::clone(&definition))
            .with_extruder(ExtruderStack::new("bare_e0", 0, definition));
        let scenario = Scenario {
            index: Arc::new(QualityGroupIndex::new(Arc::clone(&store))),
            machines: Arc::new(MachineManager::new(Some(machine))),
            store,
        };

        let mut projection = projection(&scenario, "default");
        assert!(matches!(
            projection.entries(),
            Err(resolver::ResolverError::ConfigurationIntegrity { .. })
        ));
        assert!(projection.is_stale());
    }

    #[test]
    fn test_dropping_unsubscribes() {
        let scenario = fixtures::scenario(PLA);
        let before = format!("{:?}", scenario.store);
        drop(projection(&scenario, "default"));
        assert_eq!(format!("{:?}", scenario.store), before);
    }

    #[test]
    fn test_category_weights() {
        assert_eq!(category_weight("default"), 0);
        assert_eq!(category_weight("smooth"), 2);
        assert_eq!(category_weight("strong"), 3);
        assert_eq!(category_display_name("engineering"), "Engineering");
        assert_eq!(category_display_name("strong"), "Unknown");
    }

    #[test]
    fn test_catalog() {
        let scenario = fixtures::scenario(ABS);
        let manager = IntentManager::new(
            Arc::clone(&scenario.store),
            Arc::clone(&scenario.machines),
            Arc::clone(&scenario.index),
        );
        let catalog =
            intent_category_catalog(&manager, &scenario.store, &scenario.machines, &scenario.index)
                .unwrap();
        let summary: Vec<(&str, &str, usize, usize)> = catalog
            .iter()
            .map(|c| (c.name.as_str(), c.intent_category.as_str(), c.weight, c.qualities.len()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Default", "default", 0, 2),
                ("Smooth", "smooth", 2, 1),
                ("Unknown", "strong", 3, 1),
            ]
        );
    }
}
