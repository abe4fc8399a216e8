// src/core/stack.rs

use crate::constants::{DEFAULT_INTENT_CATEGORY, EMPTY_INTENT_ID, EMPTY_QUALITY_CHANGES_ID};
use crate::core::container_store::ContainerRef;
use crate::core::expression::{self, ExpressionResult, SettingSource};
use crate::models::{
    Container, ContainerMetadata, ContainerType, Literal, PropertyAttribute, SettingType,
    SettingValue,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

static EMPTY_INTENT: LazyLock<ContainerRef> = LazyLock::new(|| {
    Arc::new(Container::new(
        ContainerMetadata::new(EMPTY_INTENT_ID, ContainerType::Intent)
            .with_name("Empty Intent")
            .with_intent_category(DEFAULT_INTENT_CATEGORY),
    ))
});

static EMPTY_QUALITY_CHANGES: LazyLock<ContainerRef> = LazyLock::new(|| {
    Arc::new(Container::new(
        ContainerMetadata::new(EMPTY_QUALITY_CHANGES_ID, ContainerType::QualityChanges)
            .with_name("Empty Quality Changes"),
    ))
});

/// The synthetic intent layer: no settings, `intent_category = "default"`.
pub fn empty_intent_container() -> ContainerRef {
    Arc::clone(&EMPTY_INTENT)
}

/// The synthetic quality-changes layer used when no custom profile is active.
pub fn empty_quality_changes_container() -> ContainerRef {
    Arc::clone(&EMPTY_QUALITY_CHANGES)
}

/// An ordered set of container layers, highest priority first.
///
/// Property lookups walk the layers top-down and stop at the first layer
/// that defines the requested attribute.
pub trait ConfigurationStack {
    /// The layers, highest priority first.
    fn layers(&self) -> Vec<&ContainerRef>;

    /// Whether any layer defines `attribute` of `key`.
    fn has_property(&self, key: &str, attribute: PropertyAttribute) -> bool {
        self.layers()
            .iter()
            .any(|layer| layer.has_property(key, attribute))
    }

    /// The stored (unevaluated) value of `key`.
    fn stored_value(&self, key: &str) -> Option<&SettingValue> {
        self.layers().into_iter().find_map(|layer| layer.value(key))
    }

    /// The unit of `key`.
    fn unit(&self, key: &str) -> Option<&str> {
        self.layers().into_iter().find_map(|layer| layer.unit(key))
    }

    /// The declared type of `key`.
    fn setting_type(&self, key: &str) -> Option<SettingType> {
        self.layers()
            .into_iter()
            .find_map(|layer| layer.declared_type(key))
    }

    /// Reads one attribute of a setting. Values are evaluated against this
    /// stack and coerced to the declared type; `unit` and `type` are returned
    /// as strings.
    fn get_property(
        &self,
        key: &str,
        attribute: PropertyAttribute,
    ) -> ExpressionResult<Option<Literal>>
    where
        Self: Sized,
    {
        match attribute {
            PropertyAttribute::Value => {
                let Some(stored) = self.stored_value(key) else {
                    return Ok(None);
                };
                let value = stored.evaluate(self)?;
                match self.setting_type(key) {
                    Some(kind) => expression::coerce(key, &value, kind).map(Some),
                    None => Ok(Some(value)),
                }
            }
            PropertyAttribute::Unit => Ok(self.unit(key).map(|u| Literal::Str(u.to_string()))),
            PropertyAttribute::Type => Ok(self
                .setting_type(key)
                .map(|t| Literal::Str(format!("{:?}", t).to_lowercase()))),
        }
    }
}

impl<T: ConfigurationStack> SettingSource for T {
    fn raw_value(&self, key: &str) -> Option<SettingValue> {
        self.stored_value(key).cloned()
    }

    fn declared_type(&self, key: &str) -> Option<SettingType> {
        self.setting_type(key)
    }
}

/// The configuration of one physical extruder.
#[derive(Debug, Clone)]
pub struct ExtruderStack {
    /// Stack id.
    pub id: String,
    /// Extruder position, from 0.
    pub position: usize,
    /// Disabled extruders take no part in availability or selection.
    pub enabled: bool,
    user: Option<ContainerRef>,
    quality_changes: ContainerRef,
    intent: ContainerRef,
    quality: Option<ContainerRef>,
    material: Option<ContainerRef>,
    variant: Option<ContainerRef>,
    definition: ContainerRef,
}

impl ExtruderStack {
    /// Creates an enabled extruder with an empty intent and no
    /// variant/material/quality layers.
    pub fn new(id: impl Into<String>, position: usize, definition: ContainerRef) -> Self {
        Self {
            id: id.into(),
            position,
            enabled: true,
            user: None,
            quality_changes: empty_quality_changes_container(),
            intent: empty_intent_container(),
            quality: None,
            material: None,
            variant: None,
            definition,
        }
    }

    /// Sets the variant layer.
    pub fn with_variant(mut self, variant: ContainerRef) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Sets the material layer.
    pub fn with_material(mut self, material: ContainerRef) -> Self {
        self.material = Some(material);
        self
    }

    /// Sets the quality layer.
    pub fn with_quality(mut self, quality: ContainerRef) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Sets the intent layer.
    pub fn with_intent(mut self, intent: ContainerRef) -> Self {
        self.intent = intent;
        self
    }

    /// Sets the quality-changes layer.
    pub fn with_quality_changes(mut self, quality_changes: ContainerRef) -> Self {
        self.quality_changes = quality_changes;
        self
    }

    /// Sets the user layer.
    pub fn with_user(mut self, user: ContainerRef) -> Self {
        self.user = Some(user);
        self
    }

    /// Marks the extruder disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The extruder train definition.
    pub fn definition(&self) -> &ContainerRef {
        &self.definition
    }

    /// The variant layer.
    pub fn variant(&self) -> Option<&ContainerRef> {
        self.variant.as_ref()
    }

    /// The material layer.
    pub fn material(&self) -> Option<&ContainerRef> {
        self.material.as_ref()
    }

    /// The quality layer.
    pub fn quality(&self) -> Option<&ContainerRef> {
        self.quality.as_ref()
    }

    /// The intent layer.
    pub fn intent(&self) -> &ContainerRef {
        &self.intent
    }

    /// The quality-changes layer.
    pub fn quality_changes(&self) -> &ContainerRef {
        &self.quality_changes
    }

    /// Replaces the intent layer. The layer is never left unset.
    pub fn set_intent(&mut self, intent: ContainerRef) {
        self.intent = intent;
    }

    /// Replaces the quality-changes layer.
    pub fn set_quality_changes(&mut self, quality_changes: ContainerRef) {
        self.quality_changes = quality_changes;
    }

    /// Replaces the variant layer.
    pub fn set_variant(&mut self, variant: Option<ContainerRef>) {
        self.variant = variant;
    }

    /// Replaces the material layer.
    pub fn set_material(&mut self, material: Option<ContainerRef>) {
        self.material = material;
    }

    /// The nozzle name quality and intent containers are matched against.
    pub fn variant_name(&self) -> Option<&str> {
        self.variant.as_ref().map(|v| v.metadata.display_name())
    }

    /// The material base file quality and intent containers are matched against.
    pub fn material_base_file(&self) -> Option<&str> {
        self.material.as_ref().map(|m| {
            m.metadata
                .base_file
                .as_deref()
                .unwrap_or(m.metadata.id.as_str())
        })
    }

    /// The intent category of the current intent layer.
    pub fn intent_category(&self) -> &str {
        self.intent
            .metadata
            .intent_category
            .as_deref()
            .unwrap_or(DEFAULT_INTENT_CATEGORY)
    }

    fn replace_layer(&mut self, container: &ContainerRef) {
        for slot in [
            self.user.as_mut(),
            Some(&mut self.quality_changes),
            Some(&mut self.intent),
            self.quality.as_mut(),
            self.material.as_mut(),
            self.variant.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            if slot.id() == container.id() {
                *slot = Arc::clone(container);
            }
        }
    }
}

impl ConfigurationStack for ExtruderStack {
    fn layers(&self) -> Vec<&ContainerRef> {
        let mut layers = Vec::with_capacity(7);
        layers.extend(self.user.as_ref());
        layers.push(&self.quality_changes);
        layers.push(&self.intent);
        layers.extend(self.quality.as_ref());
        layers.extend(self.material.as_ref());
        layers.extend(self.variant.as_ref());
        layers.push(&self.definition);
        layers
    }
}

/// The machine-wide configuration stack plus its extruder trains.
#[derive(Debug, Clone)]
pub struct GlobalStack {
    /// Machine id.
    pub id: String,
    user: Option<ContainerRef>,
    quality_changes: ContainerRef,
    intent: ContainerRef,
    quality: Option<ContainerRef>,
    definition_changes: Option<ContainerRef>,
    definition: ContainerRef,
    extruders: Vec<ExtruderStack>,
}

impl GlobalStack {
    /// A machine without extruders or quality.
    pub fn new(id: impl Into<String>, definition: ContainerRef) -> Self {
        Self {
            id: id.into(),
            user: None,
            quality_changes: empty_quality_changes_container(),
            intent: empty_intent_container(),
            quality: None,
            definition_changes: None,
            definition,
            extruders: Vec::new(),
        }
    }

    /// Adds an extruder, keeping them ordered by position.
    pub fn with_extruder(mut self, extruder: ExtruderStack) -> Self {
        self.extruders.push(extruder);
        self.extruders.sort_by_key(|e| e.position);
        self
    }

    /// Sets the global quality layer.
    pub fn with_quality(mut self, quality: ContainerRef) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Sets the global quality-changes layer.
    pub fn with_quality_changes(mut self, quality_changes: ContainerRef) -> Self {
        self.quality_changes = quality_changes;
        self
    }

    /// Sets the definition-changes layer.
    pub fn with_definition_changes(mut self, definition_changes: ContainerRef) -> Self {
        self.definition_changes = Some(definition_changes);
        self
    }

    /// Sets the global user layer.
    pub fn with_user(mut self, user: ContainerRef) -> Self {
        self.user = Some(user);
        self
    }

    /// The machine definition.
    pub fn definition(&self) -> &ContainerRef {
        &self.definition
    }

    /// Id of the machine definition.
    pub fn definition_id(&self) -> &str {
        self.definition.id()
    }

    /// The global quality layer.
    pub fn quality(&self) -> Option<&ContainerRef> {
        self.quality.as_ref()
    }

    /// The global quality-changes layer.
    pub fn quality_changes(&self) -> &ContainerRef {
        &self.quality_changes
    }

    /// Replaces the global quality-changes layer.
    pub fn set_quality_changes(&mut self, quality_changes: ContainerRef) {
        self.quality_changes = quality_changes;
    }

    /// Every extruder train, ordered by position.
    pub fn extruders(&self) -> &[ExtruderStack] {
        &self.extruders
    }

    /// Mutable access to every extruder.
    pub fn extruders_mut(&mut self) -> &mut [ExtruderStack] {
        &mut self.extruders
    }

    /// The extruders currently taking part in a print.
    pub fn active_extruders(&self) -> impl Iterator<Item = &ExtruderStack> {
        self.extruders.iter().filter(|e| e.enabled)
    }

    /// Mutable access to the enabled extruders.
    pub fn active_extruders_mut(&mut self) -> impl Iterator<Item = &mut ExtruderStack> {
        self.extruders.iter_mut().filter(|e| e.enabled)
    }

    /// The extruder at `position`.
    pub fn extruder_mut(&mut self, position: usize) -> Option<&mut ExtruderStack> {
        self.extruders.iter_mut().find(|e| e.position == position)
    }

    /// Swaps every layer (global and per extruder) that holds a container
    /// with the same id as `container` for the new handle.
    pub fn replace_layer(&mut self, container: &ContainerRef) {
        for slot in [
            self.user.as_mut(),
            Some(&mut self.quality_changes),
            Some(&mut self.intent),
            self.quality.as_mut(),
            self.definition_changes.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            if slot.id() == container.id() {
                *slot = Arc::clone(container);
            }
        }
        for extruder in &mut self.extruders {
            extruder.replace_layer(container);
        }
    }
}

impl ConfigurationStack for GlobalStack {
    fn layers(&self) -> Vec<&ContainerRef> {
        let mut layers = Vec::with_capacity(6);
        layers.extend(self.user.as_ref());
        layers.push(&self.quality_changes);
        layers.push(&self.intent);
        layers.extend(self.quality.as_ref());
        layers.extend(self.definition_changes.as_ref());
        layers.push(&self.definition);
        layers
    }
}

/// The machine context: owns the active global stack, if any.
///
/// `revision` increases every time the machine or an extruder's
/// variant/material changes, so derived views can tell when to rebuild.
#[derive(Debug, Default)]
pub struct MachineManager {
    active: RwLock<Option<GlobalStack>>,
    revision: AtomicU64,
}

impl MachineManager {
    /// A context holding `machine`.
    pub fn new(machine: Option<GlobalStack>) -> Self {
        Self {
            active: RwLock::new(machine),
            revision: AtomicU64::new(0),
        }
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Whether a machine is active.
    pub fn has_active_machine(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replaces (or clears) the active machine and bumps the revision.
    pub fn set_active_machine(&self, machine: Option<GlobalStack>) {
        match &machine {
            Some(m) => log::debug!("Active machine set to '{}'.", m.id),
            None => log::debug!("Active machine cleared."),
        }
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = machine;
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Runs `f` against the active machine; `None` when there is none.
    pub fn with_active_machine<R>(&self, f: impl FnOnce(&GlobalStack) -> R) -> Option<R> {
        let guard = self.active.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }

    /// Mutable counterpart of [`Self::with_active_machine`]. Does not bump
    /// the revision; callers changing what groups are built from use
    /// [`Self::update_extruder`].
    pub fn with_active_machine_mut<R>(&self, f: impl FnOnce(&mut GlobalStack) -> R) -> Option<R> {
        let mut guard = self.active.write().unwrap_or_else(PoisonError::into_inner);
        guard.as_mut().map(f)
    }

    /// Changes one extruder's layers and bumps the revision.
    /// Returns `false` when there is no machine or no such extruder.
    pub fn update_extruder(&self, position: usize, f: impl FnOnce(&mut ExtruderStack)) -> bool {
        let updated = self
            .with_active_machine_mut(|machine| machine.extruder_mut(position).map(f).is_some())
            .unwrap_or(false);
        if updated {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        updated
    }

    /// A snapshot of the active machine.
    pub fn active_machine(&self) -> Option<GlobalStack> {
        self.with_active_machine(GlobalStack::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::Expression;
    use crate::models::SettingProperty;
    use pretty_assertions::assert_eq;

    fn definition() -> ContainerRef {
        Arc::new(
            Container::new(ContainerMetadata::new("ultimaker3", ContainerType::Machine))
                .with_setting(
                    "layer_height",
                    SettingProperty::value(0.1)
                        .with_unit("mm")
                        .with_type(SettingType::Float),
                )
                .with_setting(
                    "layer_height_0",
                    SettingProperty::value(Expression::parse("layer_height * 2").unwrap())
                        .with_type(SettingType::Float),
                )
                .with_setting(
                    "wall_line_count",
                    SettingProperty::value(Expression::parse("5 / 2").unwrap())
                        .with_type(SettingType::Int),
                ),
        )
    }

    fn quality(layer_height: f64) -> ContainerRef {
        Arc::new(
            Container::new(
                ContainerMetadata::new("q_fine", ContainerType::Quality).with_quality_type("fine"),
            )
            .with_setting("layer_height", SettingProperty::value(layer_height)),
        )
    }

    #[test]
    fn test_upper_layers_override_definition() {
        let stack = GlobalStack::new("machine", definition()).with_quality(quality(0.06));
        assert_eq!(
            stack.get_property("layer_height", PropertyAttribute::Value).unwrap(),
            Some(Literal::Float(0.06))
        );
        // The deferred value on the definition sees the quality's override.
        assert_eq!(
            stack.get_property("layer_height_0", PropertyAttribute::Value).unwrap(),
            Some(Literal::Float(0.12))
        );
        assert_eq!(
            stack.get_property("layer_height", PropertyAttribute::Unit).unwrap(),
            Some(Literal::Str("mm".to_string()))
        );
    }

    #[test]
    fn test_values_are_coerced_to_declared_type() {
        let stack = GlobalStack::new("machine", definition());
        assert_eq!(
            stack.get_property("wall_line_count", PropertyAttribute::Value).unwrap(),
            Some(Literal::Int(2))
        );
        assert_eq!(
            stack.get_property("missing", PropertyAttribute::Value).unwrap(),
            None
        );
        assert!(!stack.has_property("missing", PropertyAttribute::Value));
    }

    #[test]
    fn test_new_stacks_carry_the_empty_intent() {
        let extruder = ExtruderStack::new("e0", 0, definition());
        assert_eq!(extruder.intent().id(), EMPTY_INTENT_ID);
        assert_eq!(extruder.intent_category(), DEFAULT_INTENT_CATEGORY);
    }

    #[test]
    fn test_material_base_file_falls_back_to_id() {
        let material = Arc::new(Container::new(ContainerMetadata::new(
            "generic_pla",
            ContainerType::Material,
        )));
        let extruder = ExtruderStack::new("e0", 0, definition()).with_material(material);
        assert_eq!(extruder.material_base_file(), Some("generic_pla"));
    }

    #[test]
    fn test_machine_manager_revision_tracks_changes() {
        let machines = MachineManager::new(None);
        assert!(!machines.has_active_machine());
        assert!(!machines.update_extruder(0, |_| {}));

        let machine =
            GlobalStack::new("machine", definition()).with_extruder(ExtruderStack::new("e0", 0, definition()));
        machines.set_active_machine(Some(machine));
        let revision = machines.revision();

        assert!(machines.update_extruder(0, |e| e.set_material(None)));
        assert_eq!(machines.revision(), revision + 1);
        assert!(!machines.update_extruder(7, |_| {}));
        assert_eq!(machines.revision(), revision + 1);
    }
}
