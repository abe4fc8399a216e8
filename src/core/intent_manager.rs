// src/core/intent_manager.rs

use crate::constants::{DEFAULT_INTENT_CATEGORY, EMPTY_INTENT_ID, EMPTY_QUALITY_CHANGES_ID};
use crate::core::container_store::{ContainerQuery, ContainerRef, ContainerStore, StoreResult};
use crate::core::quality_group::QualityChangesGroup;
use crate::core::quality_index::{self, QualityGroupIndex};
use crate::core::stack::{
    self, ExtruderStack, GlobalStack, MachineManager, empty_quality_changes_container,
};
use crate::models::{ContainerMetadata, ContainerType, QualityKey};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// What happened to one extruder's intent layer during a selection.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelectionOutcome {
    /// A matching intent container was installed.
    Applied { intent_id: String },
    /// No match; the empty intent was installed instead.
    FellBack,
}

/// Result of [`IntentManager::select_intent`].
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SelectionReport {
    /// The pair that was asked for.
    pub requested: QualityKey,
    /// The category the machine ended up in: the requested one, or `default`
    /// as soon as one extruder fell back.
    pub intent_category: String,
    /// Outcome per active extruder position.
    pub extruders: Vec<(usize, SelectionOutcome)>,
}

impl SelectionReport {
    fn new(requested: QualityKey) -> Self {
        Self {
            intent_category: requested.intent_category.clone(),
            requested,
            extruders: Vec::new(),
        }
    }

    /// At least one extruder fell back to the empty intent.
    pub fn is_degraded(&self) -> bool {
        self.extruders
            .iter()
            .any(|(_, outcome)| *outcome == SelectionOutcome::FellBack)
    }

    /// Positions of the extruders that fell back.
    pub fn fell_back_positions(&self) -> Vec<usize> {
        self.extruders
            .iter()
            .filter(|(_, outcome)| *outcome == SelectionOutcome::FellBack)
            .map(|(position, _)| *position)
            .collect()
    }
}

/// Answers which intents the active machine can use and applies them.
///
/// Every query reads the store and the active machine afresh. Without an
/// active machine, queries return empty collections.
#[derive(Debug, Clone)]
pub struct IntentManager {
    store: Arc<ContainerStore>,
    machines: Arc<MachineManager>,
    index: Arc<QualityGroupIndex>,
}

impl IntentManager {
    /// Wires the manager to its collaborators.
    pub fn new(
        store: Arc<ContainerStore>,
        machines: Arc<MachineManager>,
        index: Arc<QualityGroupIndex>,
    ) -> Self {
        Self {
            store,
            machines,
            index,
        }
    }

    /// Metadata of the intent profiles installed for one configuration.
    /// The implicit `default` intent is not part of the result.
    pub fn intent_metadatas(
        &self,
        definition_id: &str,
        variant_name: &str,
        material_base_file: &str,
    ) -> Vec<ContainerMetadata> {
        let query = ContainerQuery::of_type(ContainerType::Intent)
            .definition(definition_id)
            .variant(variant_name)
            .material(material_base_file);
        self.store
            .find_containers_metadata(&query)
            .into_iter()
            .filter(|m| m.id != EMPTY_INTENT_ID)
            .collect()
    }

    /// The intent categories of one configuration; always contains `default`.
    pub fn intent_categories(
        &self,
        definition_id: &str,
        variant_name: &str,
        material_base_file: &str,
    ) -> BTreeSet<String> {
        let mut categories: BTreeSet<String> = self
            .intent_metadatas(definition_id, variant_name, material_base_file)
            .into_iter()
            .filter_map(|m| m.intent_category)
            .collect();
        categories.insert(DEFAULT_INTENT_CATEGORY.to_string());
        categories
    }

    /// `(intent_category, quality_type)` pairs every active extruder supports.
    pub fn current_available_intents(&self) -> IndexSet<QualityKey> {
        self.machines
            .with_active_machine(|machine| {
                let groups = self.index.build_groups(machine);
                let mut per_extruder = machine
                    .active_extruders()
                    .map(|e| QualityGroupIndex::local_keys(&groups, e.position));
                let Some(mut available) = per_extruder.next() else {
                    log::debug!("Machine '{}' has no active extruders.", machine.id);
                    return IndexSet::new();
                };
                for local in per_extruder {
                    available.retain(|key| local.contains(key));
                }
                available
            })
            .unwrap_or_else(|| {
                log::debug!("No active machine; no intents available.");
                IndexSet::new()
            })
    }

    /// Intent categories available on any active extruder.
    ///
    /// This is a union while [`Self::current_available_intents`] is an
    /// intersection, so a category may be listed here without any quality
    /// type it pairs with on every extruder.
    pub fn current_available_intent_categories(&self) -> BTreeSet<String> {
        self.machines
            .with_active_machine(|machine| {
                let definition_id = quality_index::quality_definition_id(machine.definition());
                let mut categories = BTreeSet::new();
                for extruder in machine.active_extruders() {
                    categories.insert(DEFAULT_INTENT_CATEGORY.to_string());
                    let base = ContainerQuery::of_type(ContainerType::Intent)
                        .definition(definition_id.as_str());
                    let Some(query) = self.index.extruder_query(base, machine, extruder) else {
                        continue;
                    };
                    categories.extend(
                        self.store
                            .find_containers_metadata(&query)
                            .into_iter()
                            .filter(|m| m.id != EMPTY_INTENT_ID)
                            .filter_map(|m| m.intent_category),
                    );
                }
                categories
            })
            .unwrap_or_else(|| {
                log::debug!("No active machine; no intent categories available.");
                BTreeSet::new()
            })
    }

    /// The intent every extruder falls back to.
    pub fn default_intent(&self) -> ContainerRef {
        stack::empty_intent_container()
    }

    /// The category of the first active extruder's intent layer.
    pub fn current_intent_category(&self) -> String {
        self.machines
            .with_active_machine(|machine| {
                machine
                    .active_extruders()
                    .next()
                    .map(|e| e.intent_category().to_string())
            })
            .flatten()
            .unwrap_or_else(|| DEFAULT_INTENT_CATEGORY.to_string())
    }

    fn find_intent(
        &self,
        machine: &GlobalStack,
        extruder: &ExtruderStack,
        key: &QualityKey,
    ) -> Option<ContainerRef> {
        let base = ContainerQuery::of_type(ContainerType::Intent)
            .definition(quality_index::quality_definition_id(machine.definition()))
            .quality_type(key.quality_type.as_str())
            .intent_category(key.intent_category.as_str());
        let query = self.index.extruder_query(base, machine, extruder)?;
        let mut found = self.store.find_containers(&query);
        if found.len() > 1 {
            log::warn!(
                "{} intents match {} on extruder {}; using the most recent, '{}'.",
                found.len(),
                key,
                extruder.position,
                found.last().map_or("", |c| c.id())
            );
        }
        found.pop()
    }

    /// Installs the intent for `(intent_category, quality_type)` on every
    /// active extruder. Extruders without a match get the empty intent; the
    /// report says which.
    pub fn select_intent(&self, intent_category: &str, quality_type: &str) -> SelectionReport {
        let key = QualityKey::new(intent_category, quality_type);
        let mut report = SelectionReport::new(key.clone());
        let default_intent = self.default_intent();

        let applied = self.machines.with_active_machine_mut(|machine| {
            let mut chosen = Vec::new();
            for extruder in machine.active_extruders() {
                let outcome = match self.find_intent(&*machine, extruder, &key) {
                    Some(intent) => Some(intent),
                    None if key.intent_category == DEFAULT_INTENT_CATEGORY => {
                        Some(Arc::clone(&default_intent))
                    }
                    None => None,
                };
                chosen.push((extruder.position, outcome));
            }
            for (extruder, (position, intent)) in machine.active_extruders_mut().zip(chosen) {
                match intent {
                    Some(intent) => {
                        report.extruders.push((
                            position,
                            SelectionOutcome::Applied {
                                intent_id: intent.id().to_string(),
                            },
                        ));
                        extruder.set_intent(intent);
                    }
                    None => {
                        log::info!(
                            "No intent for {} on extruder {}; using the empty intent.",
                            key,
                            position
                        );
                        report.extruders.push((position, SelectionOutcome::FellBack));
                        extruder.set_intent(Arc::clone(&default_intent));
                    }
                }
            }
        });

        if applied.is_none() {
            log::debug!("No active machine; selection of {} ignored.", key);
        }
        if report.is_degraded() {
            report.intent_category = DEFAULT_INTENT_CATEGORY.to_string();
        }
        report
    }

    /// Resets every active extruder to the empty intent.
    pub fn select_default_intent(&self) {
        let default_intent = self.default_intent();
        self.machines.with_active_machine_mut(|machine| {
            for extruder in machine.active_extruders_mut() {
                extruder.set_intent(Arc::clone(&default_intent));
            }
        });
    }

    /// Custom profiles for `machine`, keyed by name. A profile is available
    /// when its quality type is.
    pub fn quality_changes_groups(&self, machine: &GlobalStack) -> IndexMap<String, QualityChangesGroup> {
        let definition_id = quality_index::quality_definition_id(machine.definition());
        let query = ContainerQuery::of_type(ContainerType::QualityChanges).definition(definition_id);
        let available: HashSet<String> = self.index.default_groups(machine).into_keys().collect();

        let mut groups: IndexMap<String, QualityChangesGroup> = IndexMap::new();
        for container in self.store.find_containers(&query) {
            if container.id() == EMPTY_QUALITY_CHANGES_ID {
                continue;
            }
            let Some(quality_type) = container.metadata.quality_type.clone() else {
                log::warn!(
                    "Quality changes '{}' has no quality_type; ignored.",
                    container.id()
                );
                continue;
            };
            let category = container
                .metadata
                .intent_category
                .clone()
                .unwrap_or_else(|| DEFAULT_INTENT_CATEGORY.to_string());
            let name = container.metadata.display_name().to_string();
            let group = groups.entry(name.clone()).or_insert_with(|| {
                let mut group = QualityChangesGroup::new(name, QualityKey::new(category, quality_type.as_str()));
                group.is_available = available.contains(&quality_type);
                group
            });
            group.add_container(container);
        }
        groups
    }

    /// Removes every container of `group` from the store and resets stacks
    /// that were using one of them. Returns the removed ids.
    pub fn remove_quality_changes_group(&self, group: &QualityChangesGroup) -> Vec<String> {
        log::info!("Removing quality changes group '{}'.", group.name);
        let mut removed = Vec::new();
        for id in group.container_ids() {
            match self.store.remove_container(id) {
                Ok(container) => removed.push(container.id().to_string()),
                Err(e) => log::warn!("{}", e),
            }
        }

        self.machines.with_active_machine_mut(|machine| {
            let in_use = |container: &ContainerRef| removed.iter().any(|id| id == container.id());
            if in_use(machine.quality_changes()) {
                machine.set_quality_changes(empty_quality_changes_container());
            }
            for extruder in machine.extruders_mut() {
                if in_use(extruder.quality_changes()) {
                    extruder.set_quality_changes(empty_quality_changes_container());
                }
            }
        });
        removed
    }

    /// Renames every container of `group` to a store-unique form of
    /// `new_name` and returns the name actually used.
    pub fn rename_quality_changes_group(
        &self,
        group: &mut QualityChangesGroup,
        new_name: &str,
    ) -> StoreResult<String> {
        log::info!("Renaming quality changes group '{}' to '{}'.", group.name, new_name);
        if new_name == group.name {
            return Ok(group.name.clone());
        }

        let unique = self.store.unique_name(new_name);
        for container in group.containers.values_mut() {
            let renamed = self.store.rename_container(container.id(), &unique)?;
            self.machines
                .with_active_machine_mut(|machine| machine.replace_layer(&renamed));
            *container = renamed;
        }
        group.name = unique.clone();
        Ok(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ABS, DEFINITION, NOZZLE, PLA, Scenario};
    use crate::models::Container;
    use pretty_assertions::assert_eq;

    fn manager(scenario: &Scenario) -> IntentManager {
        IntentManager::new(
            Arc::clone(&scenario.store),
            Arc::clone(&scenario.machines),
            Arc::clone(&scenario.index),
        )
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn intent_ids(scenario: &Scenario) -> Vec<String> {
        scenario
            .machines
            .with_active_machine(|m| m.extruders().iter().map(|e| e.intent().id().to_string()).collect())
            .unwrap()
    }

    #[test]
    fn test_categories_without_intents_is_default_only() {
        let scenario = fixtures::scenario(PLA);
        let manager = manager(&scenario);
        assert_eq!(manager.intent_categories("ultimaker_s5", NOZZLE, PLA), set(&["default"]));
        assert_eq!(manager.intent_categories(DEFINITION, NOZZLE, ABS), set(&["default"]));
    }

    #[test]
    fn test_categories_for_configuration() {
        let scenario = fixtures::scenario(PLA);
        let manager = manager(&scenario);
        assert_eq!(
            manager.intent_categories(DEFINITION, NOZZLE, PLA),
            set(&["default", "smooth", "strong"])
        );
        assert_eq!(manager.intent_metadatas(DEFINITION, NOZZLE, PLA).len(), 2);
    }

    #[test]
    fn test_available_intents_are_intersected() {
        let scenario = fixtures::scenario(ABS);
        let intents = manager(&scenario).current_available_intents();
        let expected: IndexSet<QualityKey> = [
            QualityKey::new("default", "normal"),
            QualityKey::new("default", "abnorm"),
        ]
        .into_iter()
        .collect();
        assert_eq!(intents, expected);
    }

    #[test]
    fn test_available_intents_when_every_extruder_supports_them() {
        let scenario = fixtures::scenario(PLA);
        assert_eq!(manager(&scenario).current_available_intents().len(), 4);
    }

    #[test]
    fn test_available_categories_are_a_union() {
        // Same machine as the intersection test: only the PLA extruder has
        // intents, yet their categories are listed.
        let scenario = fixtures::scenario(ABS);
        assert_eq!(
            manager(&scenario).current_available_intent_categories(),
            set(&["default", "smooth", "strong"])
        );
    }

    #[test]
    fn test_queries_without_machine_are_empty() {
        let scenario = fixtures::scenario_without_machine();
        let manager = manager(&scenario);
        assert!(manager.current_available_intents().is_empty());
        assert!(manager.current_available_intent_categories().is_empty());
        assert_eq!(manager.current_intent_category(), "default");

        let report = manager.select_intent("strong", "abnorm");
        assert!(report.extruders.is_empty());
    }

    #[test]
    fn test_machine_without_variants_matches_on_material_only() {
        let store = Arc::new(ContainerStore::new());
        let definition = store
            .add_container(Container::new(
                ContainerMetadata::new("novar", ContainerType::Machine)
                    .with_machine_quality()
                    .with_materials(),
            ))
            .unwrap();
        let pla = store
            .add_container(Container::new(
                ContainerMetadata::new("pla_novar", ContainerType::Material).with_base_file(PLA),
            ))
            .unwrap();
        store
            .add_container(Container::new(
                ContainerMetadata::new("q_normal", ContainerType::Quality)
                    .with_definition("novar")
                    .with_material(PLA)
                    .with_quality_type("normal"),
            ))
            .unwrap();
        store
            .add_container(Container::new(
                ContainerMetadata::new("i_smooth", ContainerType::Intent)
                    .with_definition("novar")
                    .with_material(PLA)
                    .with_quality_type("normal")
                    .with_intent_category("smooth"),
            ))
            .unwrap();
        let machine = GlobalStack::new("novar_1", Arc::clone(&definition))
            .with_extruder(ExtruderStack::new("novar_1_e0", 0, definition).with_material(pla));
        let manager = IntentManager::new(
            Arc::clone(&store),
            Arc::new(MachineManager::new(Some(machine))),
            Arc::new(QualityGroupIndex::new(Arc::clone(&store))),
        );

        assert!(
            manager
                .current_available_intents()
                .contains(&QualityKey::new("smooth", "normal"))
        );
        assert_eq!(
            manager.current_available_intent_categories(),
            set(&["default", "smooth"])
        );
        let report = manager.select_intent("smooth", "normal");
        assert!(!report.is_degraded());
        assert_eq!(
            report.extruders,
            vec![(
                0,
                SelectionOutcome::Applied {
                    intent_id: "i_smooth".to_string()
                }
            )]
        );
    }

    #[test]
    fn test_select_intent_on_every_extruder() {
        let scenario = fixtures::scenario(PLA);
        let manager = manager(&scenario);
        let report = manager.select_intent("strong", "abnorm");

        assert!(!report.is_degraded());
        assert_eq!(report.intent_category, "strong");
        assert_eq!(
            intent_ids(&scenario),
            vec!["um3_aa0.4_pla_strong_abnorm", "um3_aa0.4_pla_strong_abnorm"]
        );
        let categories: Vec<String> = scenario
            .machines
            .with_active_machine(|m| {
                m.extruders()
                    .iter()
                    .map(|e| e.intent_category().to_string())
                    .collect()
            })
            .unwrap();
        assert_eq!(categories, vec!["strong", "strong"]);
        assert_eq!(manager.current_intent_category(), "strong");
    }

    #[test]
    fn test_partial_selection_falls_back() {
        let scenario = fixtures::scenario(ABS);
        let manager = manager(&scenario);
        let report = manager.select_intent("strong", "abnorm");

        assert_eq!(
            report.extruders,
            vec![
                (
                    0,
                    SelectionOutcome::Applied {
                        intent_id: "um3_aa0.4_pla_strong_abnorm".to_string()
                    }
                ),
                (1, SelectionOutcome::FellBack),
            ]
        );
        assert_eq!(report.fell_back_positions(), vec![1]);
        assert_eq!(report.intent_category, "default");
        assert_eq!(intent_ids(&scenario), vec!["um3_aa0.4_pla_strong_abnorm", "empty_intent"]);
    }

    #[test]
    fn test_selecting_default_is_not_a_fallback() {
        let scenario = fixtures::scenario(PLA);
        let manager = manager(&scenario);
        manager.select_intent("smooth", "normal");
        let report = manager.select_intent("default", "normal");
        assert!(!report.is_degraded());
        assert_eq!(intent_ids(&scenario), vec!["empty_intent", "empty_intent"]);
    }

    #[test]
    fn test_select_default_intent_resets_extruders() {
        let scenario = fixtures::scenario(PLA);
        let manager = manager(&scenario);
        manager.select_intent("smooth", "normal");
        manager.select_default_intent();
        assert_eq!(intent_ids(&scenario), vec!["empty_intent", "empty_intent"]);
        assert_eq!(manager.default_intent().id(), EMPTY_INTENT_ID);
    }

    #[test]
    fn test_disabled_extruders_are_ignored() {
        let scenario = fixtures::scenario(ABS);
        scenario.machines.update_extruder(1, |e| e.enabled = false);
        let manager = manager(&scenario);
        assert_eq!(manager.current_available_intents().len(), 4);
        let report = manager.select_intent("strong", "abnorm");
        assert_eq!(report.extruders.len(), 1);
        assert_eq!(intent_ids(&scenario)[1], "empty_intent");
    }

    fn custom_profile(store: &ContainerStore) {
        for (id, position) in [("my_profile_global", None), ("my_profile_e0", Some(0))] {
            let mut metadata = ContainerMetadata::new(id, ContainerType::QualityChanges)
                .with_name("My Profile")
                .with_definition(DEFINITION)
                .with_quality_type("normal");
            metadata.position = position;
            store.add_container(Container::new(metadata)).unwrap();
        }
        store
            .add_container(Container::new(
                ContainerMetadata::new("orphan", ContainerType::QualityChanges)
                    .with_name("Orphan")
                    .with_definition(DEFINITION)
                    .with_quality_type("draft"),
            ))
            .unwrap();
    }

    #[test]
    fn test_quality_changes_groups() {
        let scenario = fixtures::scenario(PLA);
        custom_profile(&scenario.store);
        let manager = manager(&scenario);
        let machine = scenario.machines.active_machine().unwrap();
        let groups = manager.quality_changes_groups(&machine);

        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["My Profile", "Orphan"]);
        let mine = &groups["My Profile"];
        assert!(mine.is_available);
        assert_eq!(mine.key, QualityKey::new("default", "normal"));
        assert_eq!(mine.containers.len(), 2);
        assert!(!groups["Orphan"].is_available);
    }

    #[test]
    fn test_remove_quality_changes_group_resets_stacks() {
        let scenario = fixtures::scenario(PLA);
        custom_profile(&scenario.store);
        let manager = manager(&scenario);
        let in_use = scenario.store.find_container("my_profile_e0").unwrap();
        scenario
            .machines
            .update_extruder(0, |e| e.set_quality_changes(in_use));

        let machine = scenario.machines.active_machine().unwrap();
        let group = manager.quality_changes_groups(&machine).shift_remove("My Profile").unwrap();
        let removed = manager.remove_quality_changes_group(&group);

        assert_eq!(removed, vec!["my_profile_global", "my_profile_e0"]);
        assert!(scenario.store.find_container("my_profile_e0").is_none());
        let current = scenario
            .machines
            .with_active_machine(|m| m.extruders()[0].quality_changes().id().to_string())
            .unwrap();
        assert_eq!(current, EMPTY_QUALITY_CHANGES_ID);
    }

    #[test]
    fn test_rename_quality_changes_group() {
        let scenario = fixtures::scenario(PLA);
        custom_profile(&scenario.store);
        let manager = manager(&scenario);
        let in_use = scenario.store.find_container("my_profile_global").unwrap();
        scenario
            .machines
            .with_active_machine_mut(|m| m.set_quality_changes(in_use));

        let machine = scenario.machines.active_machine().unwrap();
        let mut group = manager.quality_changes_groups(&machine).shift_remove("My Profile").unwrap();

        assert_eq!(manager.rename_quality_changes_group(&mut group, "My Profile").unwrap(), "My Profile");
        // "Orphan" is taken by another profile.
        let name = manager.rename_quality_changes_group(&mut group, "Orphan").unwrap();
        assert_eq!(name, "Orphan #2");
        assert_eq!(group.name, "Orphan #2");
        assert_eq!(
            scenario.store.find_container("my_profile_e0").unwrap().metadata.name,
            "Orphan #2"
        );
        let stack_name = scenario
            .machines
            .with_active_machine(|m| m.quality_changes().metadata.name.clone())
            .unwrap();
        assert_eq!(stack_name, "Orphan #2");
    }
}
