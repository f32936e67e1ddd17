use crate::error::{Result, StoreError};
use crate::record::ID_FIELD;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Schema for one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timestamps: bool,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        SchemaDefinition {
            name: name.into(),
            fields: FieldMap::default(),
            timestamps: false,
        }
    }

    /// Add (or replace) a field definition.
    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(name, definition);
        self
    }

    /// Maintain `createdAt`/`updatedAt` on every write.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    /// Fields carrying a relation, in declaration order.
    pub fn relation_fields(&self) -> impl Iterator<Item = (&str, &Relation)> {
        self.fields
            .iter()
            .filter_map(|(name, def)| def.relation.as_ref().map(|r| (name, r)))
    }
}

/// Declaration-ordered mapping from field name to definition.
#[derive(Debug, Clone, Default)]
pub struct FieldMap(Vec<(String, FieldDefinition)>);

impl FieldMap {
    pub fn new() -> Self {
        FieldMap(Vec::new())
    }

    /// Insert a field, replacing an existing one with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, definition: FieldDefinition) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = definition,
            None => self.0.push((name, definition)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.0.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, FieldDefinition)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (S, FieldDefinition)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (name, def) in iter {
            map.insert(name, def);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, def) in &self.0 {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of field names to field definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<FieldMap, A::Error> {
                let mut map = FieldMap::new();
                while let Some((name, def)) = access.next_entry::<String, FieldDefinition>()? {
                    map.insert(name, def);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// Accepted value type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Any,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Null => value.is_null(),
            FieldType::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Null => "null",
            FieldType::Any => "any",
        }
    }
}

/// Built-in string formats checked by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringFormat {
    Email,
    Date,
    Datetime,
    Uri,
}

/// Relation kind between two collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    #[serde(alias = "oneToOne")]
    OneToOne,
    #[serde(alias = "oneToMany")]
    OneToMany,
    #[serde(alias = "manyToOne")]
    ManyToOne,
    #[serde(alias = "manyToMany")]
    ManyToMany,
}

/// What happens to referencing records when the referenced one is deleted
/// or its linking value changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAction {
    Cascade,
    Restrict,
    #[serde(alias = "setNull")]
    SetNull,
    #[serde(alias = "setDefault")]
    SetDefault,
}

/// Declared link from a field to another collection.
///
/// `field` names the field in the related collection that holds the linking
/// value: the key the stored value points at for `many_to_one`/`one_to_one`,
/// the back-reference for `one_to_many`, and the join-row column pointing at
/// this collection for `many_to_many`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub collection: String,
    #[serde(default = "default_join_field")]
    pub field: String,
    #[serde(default, alias = "foreignField", skip_serializing_if = "Option::is_none")]
    pub foreign_field: Option<String>,
    /// Explicit join collection for `many_to_many`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    #[serde(default, alias = "onDelete", skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferenceAction>,
    #[serde(default, alias = "onUpdate", skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferenceAction>,
}

fn default_join_field() -> String {
    ID_FIELD.to_string()
}

impl Relation {
    pub fn new(relation_type: RelationType, collection: impl Into<String>, field: impl Into<String>) -> Self {
        Relation {
            relation_type,
            collection: collection.into(),
            field: field.into(),
            foreign_field: None,
            through: None,
            on_delete: None,
            on_update: None,
        }
    }

    pub fn many_to_one(collection: impl Into<String>) -> Self {
        Relation::new(RelationType::ManyToOne, collection, ID_FIELD)
    }

    pub fn one_to_one(collection: impl Into<String>) -> Self {
        Relation::new(RelationType::OneToOne, collection, ID_FIELD)
    }

    pub fn one_to_many(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Relation::new(RelationType::OneToMany, collection, field)
    }

    pub fn many_to_many(
        collection: impl Into<String>,
        field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        let mut relation = Relation::new(RelationType::ManyToMany, collection, field);
        relation.foreign_field = Some(foreign_field.into());
        relation
    }

    pub fn on_delete(mut self, action: ReferenceAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: ReferenceAction) -> Self {
        self.on_update = Some(action);
        self
    }

    pub fn through(mut self, collection: impl Into<String>) -> Self {
        self.through = Some(collection.into());
        self
    }

    /// Join collection used by a `many_to_many` relation declared on `source`.
    pub fn join_collection(&self, source: &str) -> String {
        match &self.through {
            Some(name) => name.clone(),
            None => format!("{}_{}", source, self.collection),
        }
    }
}

pub type GeneratorFn = Arc<dyn Fn() -> Value + Send + Sync>;
pub type ValidatorFn = Arc<dyn Fn(&Value) -> std::result::Result<(), Option<String>> + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Default for a field omitted at creation: a literal, or a generator invoked
/// fresh for every record.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Generator { name: String, generate: GeneratorFn },
}

impl DefaultValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        DefaultValue::Literal(value.into())
    }

    pub fn generator<F>(name: impl Into<String>, generate: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        DefaultValue::Generator {
            name: name.into(),
            generate: Arc::new(generate),
        }
    }

    /// One of the named generators usable from schema files.
    pub fn builtin(name: &str) -> Result<Self> {
        let generate: GeneratorFn = match name {
            "uuid" => Arc::new(|| Value::String(uuid::Uuid::new_v4().to_string())),
            "ulid" => Arc::new(|| Value::String(ulid::Ulid::new().to_string().to_lowercase())),
            "nanoid" => Arc::new(|| Value::String(nanoid::nanoid!())),
            "now" => Arc::new(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))),
            "today" => Arc::new(|| Value::String(Utc::now().format("%Y-%m-%d").to_string())),
            "timestamp" => Arc::new(|| Value::from(Utc::now().timestamp_millis())),
            other => {
                return Err(StoreError::Schema(format!("Unknown default generator '{other}'")));
            }
        };
        Ok(DefaultValue::Generator {
            name: name.to_string(),
            generate,
        })
    }

    /// Produce the value. Generators run on every call.
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Generator { generate, .. } => generate(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Generator { name, .. } => f.debug_tuple("Generator").field(name).finish(),
        }
    }
}

/// Custom validation hook: `Ok(())` passes, `Err(Some(msg))` fails with a
/// message, `Err(None)` fails with the generic message.
#[derive(Clone)]
pub struct Validator {
    pub name: String,
    pub check: ValidatorFn,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").field("name", &self.name).finish()
    }
}

#[derive(Clone)]
pub struct Transform {
    pub name: String,
    pub apply: TransformFn,
}

impl Transform {
    /// Named transforms usable from schema files: `trim`, `lowercase`,
    /// `uppercase`, `round:<digits>`.
    pub fn builtin(name: &str) -> Result<Self> {
        let apply: TransformFn = match name {
            "trim" => Arc::new(|v| map_string(v, |s| s.trim().to_string())),
            "lowercase" => Arc::new(|v| map_string(v, |s| s.to_lowercase())),
            "uppercase" => Arc::new(|v| map_string(v, |s| s.to_uppercase())),
            other => match other.strip_prefix("round:").map(str::parse::<i32>) {
                Some(Ok(digits)) => Arc::new(move |v| round_number(v, digits)),
                _ => {
                    return Err(StoreError::Schema(format!("Unknown transform '{other}'")));
                }
            },
        };
        Ok(Transform {
            name: name.to_string(),
            apply,
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish()
    }
}

fn map_string(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn round_number(value: Value, digits: i32) -> Value {
    match value.as_f64() {
        Some(n) if value.is_f64() => {
            let factor = 10f64.powi(digits);
            serde_json::Number::from_f64((n * factor).round() / factor)
                .map(Value::Number)
                .unwrap_or(value)
        }
        _ => value,
    }
}

/// Constraints, defaults, hooks and relation of a single field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FieldSpec", into = "FieldSpec")]
pub struct FieldDefinition {
    pub types: Vec<FieldType>,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub enum_values: Option<Vec<Value>>,
    pub format: Option<StringFormat>,
    pub properties: Option<FieldMap>,
    pub items: Option<Box<FieldDefinition>>,
    pub validator: Option<Validator>,
    pub transform: Option<Transform>,
    pub relation: Option<Relation>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        FieldDefinition::any_of([field_type])
    }

    /// A field accepting any of the given type tags.
    pub fn any_of(types: impl IntoIterator<Item = FieldType>) -> Self {
        FieldDefinition {
            types: types.into_iter().collect(),
            required: false,
            default: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            enum_values: None,
            format: None,
            properties: None,
            items: None,
            validator: None,
            transform: None,
            relation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.pattern = Some(compile_pattern(pattern)?);
        Ok(self)
    }

    pub fn with_enum(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }

    pub fn with_format(mut self, format: StringFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_properties(mut self, properties: FieldMap) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_items(mut self, items: FieldDefinition) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_validator<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), Option<String>> + Send + Sync + 'static,
    {
        self.validator = Some(Validator {
            name: name.into(),
            check: Arc::new(check),
        });
        self
    }

    pub fn with_transform<F>(mut self, name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Transform {
            name: name.into(),
            apply: Arc::new(apply),
        });
        self
    }

    /// Resolve the declared default, or null when none is declared.
    pub fn default_or_null(&self) -> Value {
        self.default
            .as_ref()
            .map(DefaultValue::resolve)
            .unwrap_or(Value::Null)
    }

    pub fn type_list(&self) -> String {
        self.types
            .iter()
            .map(FieldType::as_str)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| StoreError::Schema(format!("Invalid pattern '{pattern}': {e}")))
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One type tag or a list of them
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TypeSpec {
    One(FieldType),
    Many(Vec<FieldType>),
}

/// Serialized shape of a field definition, as written in schema files
#[derive(Serialize, Deserialize)]
struct FieldSpec {
    #[serde(rename = "type")]
    field_type: TypeSpec,
    #[serde(default, skip_serializing_if = "is_false")]
    required: bool,
    #[serde(default, alias = "defaultValue", skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, alias = "minLength", skip_serializing_if = "Option::is_none")]
    min_length: Option<usize>,
    #[serde(default, alias = "maxLength", skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<StringFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Box<FieldDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation: Option<Relation>,
}

impl TryFrom<FieldSpec> for FieldDefinition {
    type Error = StoreError;

    fn try_from(raw: FieldSpec) -> Result<Self> {
        let types = match raw.field_type {
            TypeSpec::One(t) => vec![t],
            TypeSpec::Many(ts) if ts.is_empty() => {
                return Err(StoreError::Schema("Field type list must not be empty".into()));
            }
            TypeSpec::Many(ts) => ts,
        };

        let default = match (raw.default, raw.generate) {
            (Some(_), Some(name)) => {
                return Err(StoreError::Schema(format!(
                    "Field declares both a default and the '{name}' generator"
                )));
            }
            (Some(value), None) => Some(DefaultValue::Literal(value)),
            (None, Some(name)) => Some(DefaultValue::builtin(&name)?),
            (None, None) => None,
        };

        Ok(FieldDefinition {
            types,
            required: raw.required,
            default,
            min: raw.min,
            max: raw.max,
            min_length: raw.min_length,
            max_length: raw.max_length,
            pattern: raw.pattern.as_deref().map(compile_pattern).transpose()?,
            enum_values: raw.enum_values,
            format: raw.format,
            properties: raw.properties,
            items: raw.items,
            validator: None,
            transform: raw.transform.as_deref().map(Transform::builtin).transpose()?,
            relation: raw.relation,
        })
    }
}

impl From<FieldDefinition> for FieldSpec {
    fn from(def: FieldDefinition) -> Self {
        let field_type = match def.types.as_slice() {
            [single] => TypeSpec::One(*single),
            _ => TypeSpec::Many(def.types.clone()),
        };
        let (default, generate) = match def.default {
            Some(DefaultValue::Literal(value)) => (Some(value), None),
            Some(DefaultValue::Generator { name, .. }) => (None, Some(name)),
            None => (None, None),
        };

        FieldSpec {
            field_type,
            required: def.required,
            default,
            generate,
            min: def.min,
            max: def.max,
            min_length: def.min_length,
            max_length: def.max_length,
            pattern: def.pattern.map(|re| re.as_str().to_string()),
            enum_values: def.enum_values,
            format: def.format,
            transform: def.transform.map(|t| t.name),
            properties: def.properties,
            items: def.items,
            relation: def.relation,
        }
    }
}
