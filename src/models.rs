// src/models.rs

use crate::core::expression::Expression;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// --- CONTAINER METADATA MODELS ---
// Fixed-field records for everything the Container Store indexes. Absent
// entries are explicit `Option`s or `#[serde(default)]` flags, never lookups
// into a free-form dictionary.

/// The kind of layer a container represents inside a configuration stack.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// A machine definition (`fdmprinter`, `ultimaker3`, ...).
    Machine,
    /// The definition of a single extruder train.
    ExtruderTrain,
    /// A nozzle (or build plate) variant.
    Variant,
    /// A material profile.
    Material,
    /// A quality profile for one quality type.
    Quality,
    /// A user-created profile stored on top of a quality.
    QualityChanges,
    /// An intent profile layered above a quality.
    Intent,
    /// Per-machine overrides of the definition.
    DefinitionChanges,
    /// Loose user overrides.
    User,
}

impl ContainerType {
    /// The identifier used in workspace files and change notifications.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::ExtruderTrain => "extruder_train",
            Self::Variant => "variant",
            Self::Material => "material",
            Self::Quality => "quality",
            Self::QualityChanges => "quality_changes",
            Self::Intent => "intent",
            Self::DefinitionChanges => "definition_changes",
            Self::User => "user",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to a container.
///
/// Quality and intent containers reference their variant by *name* and their
/// material by *base file*, mirroring how those containers are matched against
/// an extruder stack.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContainerMetadata {
    /// Unique id.
    pub id: String,
    /// Display name; may be empty.
    #[serde(default)]
    pub name: String,
    /// What kind of layer this is.
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    /// Machine definition the container belongs to.
    #[serde(default)]
    pub definition: Option<String>,
    /// Variant name a quality or intent applies to.
    #[serde(default)]
    pub variant: Option<String>,
    /// Material base file a quality or intent applies to.
    #[serde(default, alias = "material_id")]
    pub material: Option<String>,
    /// Base file shared by material variants.
    #[serde(default)]
    pub base_file: Option<String>,
    /// Quality type, e.g. `normal`.
    #[serde(default)]
    pub quality_type: Option<String>,
    /// Intent category, e.g. `engineering`.
    #[serde(default)]
    pub intent_category: Option<String>,
    /// Material GUID.
    #[serde(default, rename = "GUID")]
    pub guid: Option<String>,
    /// Extruder position of an extruder train definition.
    #[serde(default)]
    pub position: Option<usize>,
    /// Quality applies to the global stack.
    #[serde(default)]
    pub global_quality: bool,
    /// Definition whose qualities this machine reuses.
    #[serde(default)]
    pub quality_definition: Option<String>,
    /// Machine ships its own qualities.
    #[serde(default)]
    pub has_machine_quality: bool,
    /// Machine qualities are filtered by variant.
    #[serde(default)]
    pub has_variants: bool,
    /// Machine qualities are filtered by material.
    #[serde(default)]
    pub has_materials: bool,
}

impl ContainerMetadata {
    /// Creates metadata with only the mandatory fields set.
    pub fn new(id: impl Into<String>, container_type: ContainerType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            container_type,
            definition: None,
            variant: None,
            material: None,
            base_file: None,
            quality_type: None,
            intent_category: None,
            guid: None,
            position: None,
            global_quality: false,
            quality_definition: None,
            has_machine_quality: false,
            has_variants: false,
            has_materials: false,
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the definition id.
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    /// Sets the variant name.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Sets the material base file.
    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    /// Sets the base file.
    pub fn with_base_file(mut self, base_file: impl Into<String>) -> Self {
        self.base_file = Some(base_file.into());
        self
    }

    /// Sets the quality type.
    pub fn with_quality_type(mut self, quality_type: impl Into<String>) -> Self {
        self.quality_type = Some(quality_type.into());
        self
    }

    /// Sets the intent category.
    pub fn with_intent_category(mut self, intent_category: impl Into<String>) -> Self {
        self.intent_category = Some(intent_category.into());
        self
    }

    /// Sets the GUID.
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Sets the extruder position.
    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Marks the container as a global quality.
    pub fn as_global_quality(mut self) -> Self {
        self.global_quality = true;
        self
    }

    /// Sets `has_machine_quality`.
    pub fn with_machine_quality(mut self) -> Self {
        self.has_machine_quality = true;
        self
    }

    /// Sets the quality definition.
    pub fn with_quality_definition(mut self, definition: impl Into<String>) -> Self {
        self.quality_definition = Some(definition.into());
        self
    }

    /// Sets `has_variants`.
    pub fn with_variants(mut self) -> Self {
        self.has_variants = true;
        self
    }

    /// Sets `has_materials`.
    pub fn with_materials(mut self) -> Self {
        self.has_materials = true;
        self
    }

    /// The human-readable name, falling back to the id for unnamed containers.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// --- SETTING VALUE MODELS ---

/// A concrete, already evaluated setting value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Literal {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(String),
}

impl Literal {
    /// Numeric view of the value; strings are parsed, booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Truthiness as used by deferred expressions.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
        }
    }

    /// The name of the variant, used in type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }

    /// Converts the value into the declared type of a setting.
    ///
    /// Returns `None` if the value cannot represent that type.
    #[allow(clippy::cast_possible_truncation)]
    pub fn coerce(&self, kind: SettingType) -> Option<Self> {
        match kind {
            SettingType::Float => self.as_f64().map(Self::Float),
            SettingType::Int => match self {
                Self::Int(i) => Some(Self::Int(*i)),
                Self::Bool(b) => Some(Self::Int(i64::from(*b))),
                Self::Float(f) if f.is_finite() => Some(Self::Int(f.trunc() as i64)),
                Self::Float(_) => None,
                Self::Str(s) => s.trim().parse().ok().map(Self::Int),
            },
            SettingType::Bool => match self {
                Self::Str(s) => match s.trim() {
                    "True" | "true" => Some(Self::Bool(true)),
                    "False" | "false" => Some(Self::Bool(false)),
                    _ => None,
                },
                other => Some(Self::Bool(other.is_truthy())),
            },
            SettingType::Str | SettingType::Enum => Some(Self::Str(self.to_string())),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// The declared type of a setting, taken from the machine definition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    /// Floating point.
    Float,
    /// Integer.
    Int,
    /// Boolean.
    Bool,
    /// String.
    #[serde(alias = "string")]
    Str,
    /// One of a fixed set of strings.
    Enum,
}

/// A stored setting value: either a literal or an expression that is only
/// evaluated when the setting is resolved against a stack.
///
/// In workspace files a string starting with `=` is a deferred expression,
/// e.g. `value = "=machine_nozzle_size * 0.5"`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "Literal")]
pub enum SettingValue {
    /// Stored as-is.
    Literal(Literal),
    /// Evaluated on resolution.
    Deferred(Expression),
}

impl SettingValue {
    /// Whether the value is an expression.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

impl TryFrom<Literal> for SettingValue {
    type Error = crate::core::expression::ExpressionError;

    fn try_from(value: Literal) -> Result<Self, Self::Error> {
        match value {
            Literal::Str(s) if s.starts_with('=') => {
                Ok(Self::Deferred(Expression::parse(s.trim_start_matches('='))?))
            }
            other => Ok(Self::Literal(other)),
        }
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Literal(Literal::Float(value))
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Literal(Literal::Int(value))
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Literal(Literal::Bool(value))
    }
}

impl From<Expression> for SettingValue {
    fn from(value: Expression) -> Self {
        Self::Deferred(value)
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{}", literal),
            Self::Deferred(expression) => write!(f, "={}", expression.source()),
        }
    }
}

/// The attributes a setting exposes through `get_property`/`has_property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAttribute {
    /// The value.
    Value,
    /// The unit.
    Unit,
    /// The declared type.
    Type,
}

/// One setting entry of a container.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SettingProperty {
    /// Stored value.
    #[serde(default)]
    pub value: Option<SettingValue>,
    /// Unit, e.g. `mm`.
    #[serde(default)]
    pub unit: Option<String>,
    /// Declared type.
    #[serde(default, rename = "type")]
    pub kind: Option<SettingType>,
}

impl SettingProperty {
    /// A property with only a value.
    pub fn value(value: impl Into<SettingValue>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the declared type.
    pub fn with_type(mut self, kind: SettingType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Whether `attribute` is set.
    pub fn has(&self, attribute: PropertyAttribute) -> bool {
        match attribute {
            PropertyAttribute::Value => self.value.is_some(),
            PropertyAttribute::Unit => self.unit.is_some(),
            PropertyAttribute::Type => self.kind.is_some(),
        }
    }
}

/// An immutable configuration record: metadata plus its settings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Container {
    /// Container metadata.
    #[serde(flatten)]
    pub metadata: ContainerMetadata,
    /// Settings in declaration order.
    #[serde(default)]
    pub settings: IndexMap<String, SettingProperty>,
}

impl Container {
    /// A container without settings.
    pub fn new(metadata: ContainerMetadata) -> Self {
        Self {
            metadata,
            settings: IndexMap::new(),
        }
    }

    /// Adds or replaces a setting.
    pub fn with_setting(mut self, key: impl Into<String>, property: SettingProperty) -> Self {
        self.settings.insert(key.into(), property);
        self
    }

    /// Container id.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Container type.
    pub fn container_type(&self) -> ContainerType {
        self.metadata.container_type
    }

    /// The setting `key`.
    pub fn setting(&self, key: &str) -> Option<&SettingProperty> {
        self.settings.get(key)
    }

    /// Whether `key` defines `attribute`.
    pub fn has_property(&self, key: &str, attribute: PropertyAttribute) -> bool {
        self.setting(key).is_some_and(|p| p.has(attribute))
    }

    /// The stored value of `key`.
    pub fn value(&self, key: &str) -> Option<&SettingValue> {
        self.setting(key).and_then(|p| p.value.as_ref())
    }

    /// The unit of `key`.
    pub fn unit(&self, key: &str) -> Option<&str> {
        self.setting(key).and_then(|p| p.unit.as_deref())
    }

    /// The declared type of `key`.
    pub fn declared_type(&self, key: &str) -> Option<SettingType> {
        self.setting(key).and_then(|p| p.kind)
    }
}

// --- GROUPING KEYS ---

/// A logical slot a container layer applies to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtruderPosition {
    /// The global stack.
    Global,
    /// An extruder stack by position.
    Extruder(usize),
}

impl fmt::Display for ExtruderPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Extruder(position) => write!(f, "{}", position),
        }
    }
}

/// The `(intent_category, quality_type)` pair a quality group realizes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualityKey {
    /// Intent category.
    pub intent_category: String,
    /// Quality type.
    pub quality_type: String,
}

impl QualityKey {
    /// Builds a key.
    pub fn new(intent_category: impl Into<String>, quality_type: impl Into<String>) -> Self {
        Self {
            intent_category: intent_category.into(),
            quality_type: quality_type.into(),
        }
    }
}

impl fmt::Display for QualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.intent_category, self.quality_type)
    }
}

// --- WORKSPACE MODELS (What is read from `strata.toml`) ---

/// Deserialized structure of a workspace snapshot file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct WorkspaceFile {
    /// Containers to register.
    #[serde(default)]
    pub containers: Vec<Container>,
    /// The active machine, if any.
    #[serde(default)]
    pub machine: Option<MachineSnapshot>,
}

/// The active machine as recorded in a workspace file. Layer fields hold
/// container ids that must be present in `containers`.
#[derive(Deserialize, Debug, Clone)]
pub struct MachineSnapshot {
    /// Machine id.
    pub id: String,
    /// Definition container id.
    pub definition: String,
    /// Global quality id.
    #[serde(default)]
    pub quality: Option<String>,
    /// Global quality-changes id.
    #[serde(default)]
    pub quality_changes: Option<String>,
    /// Extruder trains.
    #[serde(default)]
    pub extruders: Vec<ExtruderSnapshot>,
}

/// One extruder train of the active machine.
#[derive(Deserialize, Debug, Clone)]
pub struct ExtruderSnapshot {
    /// Extruder position.
    pub position: usize,
    /// Variant id.
    #[serde(default)]
    pub variant: Option<String>,
    /// Material id.
    #[serde(default)]
    pub material: Option<String>,
    /// Quality id.
    #[serde(default)]
    pub quality: Option<String>,
    /// Intent id.
    #[serde(default)]
    pub intent: Option<String>,
    /// Quality-changes id.
    #[serde(default)]
    pub quality_changes: Option<String>,
    /// Whether the extruder is enabled; defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
