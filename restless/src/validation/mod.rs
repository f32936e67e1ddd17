use crate::error::{Result, StoreError};
use crate::record::{type_name, values_equal, Record};
use crate::schema::{FieldDefinition, FieldMap, SchemaDefinition, StringFormat};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

const REQUIRED_MESSAGE: &str = "Field is required";
const CUSTOM_FAILURE_MESSAGE: &str = "Custom validation failed";
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
const URI_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$";

/// One failed constraint. `field` is a path: `address.city`, `items[2].qty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        ValidationResult {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any error was reported for exactly this path.
    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// Validate a record against a schema.
///
/// With `partial` set, absent required fields are not reported; fields that
/// are present are still checked. Fields not declared in the schema are
/// ignored.
pub fn validate(record: &Record, schema: &SchemaDefinition, partial: bool) -> ValidationResult {
    let mut errors = Vec::new();

    for (field_name, field_def) in schema.fields.iter() {
        match record.get(field_name) {
            Some(value) => validate_field(value, field_def, field_name, &mut errors),
            None if field_def.required && !partial => {
                errors.push(ValidationError::new(field_name, REQUIRED_MESSAGE));
            }
            None => {}
        }
    }

    ValidationResult::from_errors(errors)
}

fn validate_field(value: &Value, field_def: &FieldDefinition, path: &str, errors: &mut Vec<ValidationError>) {
    if value.is_null() {
        if field_def.required {
            errors.push(ValidationError::new(path, REQUIRED_MESSAGE));
        }
        return;
    }

    if !field_def.types.iter().any(|t| t.accepts(value)) {
        errors.push(ValidationError::new(
            path,
            format!("Invalid type: expected {}, got {}", field_def.type_list(), type_name(value)),
        ));
    }

    match value {
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                validate_number(n, field_def, path, errors);
            }
        }
        Value::String(s) => validate_string(s, field_def, path, errors),
        _ => {}
    }

    if let Some(allowed) = &field_def.enum_values {
        if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
            let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
            errors.push(ValidationError::new(
                path,
                format!("Value must be one of: {}", listed.join(", ")),
            ));
        }
    }

    match value {
        Value::Object(object) => {
            if let Some(properties) = &field_def.properties {
                for (prop_name, prop_def) in properties.iter() {
                    let prop_path = format!("{path}.{prop_name}");
                    match object.get(prop_name) {
                        Some(prop_value) => validate_field(prop_value, prop_def, &prop_path, errors),
                        None if prop_def.required => {
                            errors.push(ValidationError::new(prop_path, REQUIRED_MESSAGE));
                        }
                        None => {}
                    }
                }
            }
        }
        Value::Array(elements) => {
            if let Some(item_def) = &field_def.items {
                for (index, element) in elements.iter().enumerate() {
                    validate_field(element, item_def, &format!("{path}[{index}]"), errors);
                }
            }
        }
        _ => {}
    }

    if let Some(validator) = &field_def.validator {
        if let Err(message) = (validator.check)(value) {
            errors.push(ValidationError::new(
                path,
                message.unwrap_or_else(|| CUSTOM_FAILURE_MESSAGE.to_string()),
            ));
        }
    }
}

fn validate_number(n: f64, field_def: &FieldDefinition, path: &str, errors: &mut Vec<ValidationError>) {
    if let Some(min) = field_def.min {
        if n < min {
            errors.push(ValidationError::new(path, format!("Value must be >= {min}")));
        }
    }
    if let Some(max) = field_def.max {
        if n > max {
            errors.push(ValidationError::new(path, format!("Value must be <= {max}")));
        }
    }
}

fn validate_string(s: &str, field_def: &FieldDefinition, path: &str, errors: &mut Vec<ValidationError>) {
    let length = s.chars().count();
    if let Some(min) = field_def.min_length {
        if length < min {
            errors.push(ValidationError::new(path, format!("Length must be >= {min}")));
        }
    }
    if let Some(max) = field_def.max_length {
        if length > max {
            errors.push(ValidationError::new(path, format!("Length must be <= {max}")));
        }
    }
    if let Some(pattern) = &field_def.pattern {
        if !pattern.is_match(s) {
            errors.push(ValidationError::new(
                path,
                format!("Value does not match pattern {}", pattern.as_str()),
            ));
        }
    }
    if let Some(format) = field_def.format {
        if !matches_format(s, format) {
            errors.push(ValidationError::new(path, format!("Invalid {format:?} format").to_lowercase()));
        }
    }
}

fn matches_format(s: &str, format: StringFormat) -> bool {
    match format {
        StringFormat::Email => {
            static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
            matches_pattern(&EMAIL, EMAIL_PATTERN, s)
        }
        StringFormat::Uri => {
            static URI: OnceLock<Option<Regex>> = OnceLock::new();
            matches_pattern(&URI, URI_PATTERN, s)
        }
        StringFormat::Date => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        StringFormat::Datetime => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
    }
}

/// Match against a built-in pattern, compiled on first use.
fn matches_pattern(cell: &'static OnceLock<Option<Regex>>, pattern: &str, s: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .map_or(false, |re| re.is_match(s))
}

/// Apply defaults, transforms and timestamps.
///
/// Defaults are only applied when `is_new` and only to fields the caller
/// omitted; generator defaults run once per field per call. Nested objects
/// are processed with their `properties`, array elements with
/// `items.properties` (or `items.transform` for scalar elements).
pub fn transform(record: &Record, schema: &SchemaDefinition, is_new: bool) -> Record {
    let mut result = record.clone();
    apply_fields(&mut result, &schema.fields, is_new);

    if schema.timestamps {
        let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        if is_new {
            result.insert(CREATED_AT.to_string(), now.clone());
        }
        result.insert(UPDATED_AT.to_string(), now);
    }

    result
}

fn apply_fields(target: &mut Record, fields: &FieldMap, is_new: bool) {
    for (field_name, field_def) in fields.iter() {
        if is_new && !target.contains_key(field_name) {
            if let Some(default) = &field_def.default {
                target.insert(field_name.to_string(), default.resolve());
            }
        }

        let Some(slot) = target.get_mut(field_name) else {
            continue;
        };

        if let Some(transform) = &field_def.transform {
            let value = std::mem::take(slot);
            *slot = (transform.apply)(value);
        }

        match slot {
            Value::Object(nested) => {
                if let Some(properties) = &field_def.properties {
                    apply_fields(nested, properties, is_new);
                }
            }
            Value::Array(elements) => {
                if let Some(item_def) = &field_def.items {
                    for element in elements.iter_mut() {
                        apply_item(element, item_def, is_new);
                    }
                }
            }
            _ => {}
        }
    }
}

fn apply_item(element: &mut Value, item_def: &FieldDefinition, is_new: bool) {
    match (element, &item_def.properties) {
        (Value::Object(nested), Some(properties)) => apply_fields(nested, properties, is_new),
        (element, _) => {
            if let Some(transform) = &item_def.transform {
                let value = std::mem::take(element);
                *element = (transform.apply)(value);
            }
        }
    }
}

/// Transform then validate. Returns the prepared record, or a
/// `StoreError::Validation` carrying every error found.
pub fn validate_and_prepare(
    record: &Record,
    schema: &SchemaDefinition,
    is_new: bool,
    partial: bool,
) -> Result<Record> {
    let prepared = transform(record, schema, is_new);
    let result = validate(&prepared, schema, partial);

    if !result.is_ok() {
        log::debug!(
            "Record rejected by schema '{}': {} error(s)",
            schema.name,
            result.errors.len()
        );
        return Err(StoreError::Validation(result.errors));
    }

    Ok(prepared)
}
