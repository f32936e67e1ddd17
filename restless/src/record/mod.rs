// Record model - JSON-like documents and the value semantics shared by
// validation, filtering and relation matching.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A single document: an insertion-ordered mapping from field name to value.
pub type Record = Map<String, Value>;

/// Every collection of a store, keyed by collection name.
pub type Collections = BTreeMap<String, Vec<Record>>;

/// Name of the identifier field every committed record carries.
pub const ID_FIELD: &str = "id";

/// The record's id, if it has a non-null one.
pub fn record_id(record: &Record) -> Option<&Value> {
    match record.get(ID_FIELD) {
        None | Some(Value::Null) => None,
        Some(id) => Some(id),
    }
}

/// Parse a textual id the way callers type them: numeric text becomes a
/// number, anything else stays a string.
pub fn parse_id(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

/// Render a value as the string used for `=`/`!=`, `like` and search.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Numbers print without a trailing `.0` when integral, so `5` and `5.0`
/// render identically.
pub fn format_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Strict equality, except that numbers compare by numeric value
/// (`1` equals `1.0`). Arrays and objects compare element-wise.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, v)| ym.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Ordering used by the relational filter operators and by sort for
/// non-string values. Returns `None` when the two values are not comparable.
pub fn loose_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => {
            let x = numeric(a)?;
            let y = numeric(b)?;
            x.partial_cmp(&y)
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Locale-style string ordering: case-insensitive first, with the raw
/// comparison as tie-breaker so the order stays total.
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| b.cmp(a))
}

/// Human readable type name used in validation messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_numbers_like_strings() {
        assert_eq!(coerce_to_string(&json!(5)), "5");
        assert_eq!(coerce_to_string(&json!(5.0)), "5");
        assert_eq!(coerce_to_string(&json!(1.5)), "1.5");
        assert_eq!(coerce_to_string(&json!("5")), "5");
        assert_eq!(coerce_to_string(&json!(true)), "true");
        assert_eq!(coerce_to_string(&Value::Null), "null");
    }

    #[test]
    fn test_values_equal_normalizes_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!([1, "a"]), &json!([1.0, "a"])));
    }

    #[test]
    fn test_loose_cmp() {
        assert_eq!(loose_cmp(&json!(2), &json!(10)), Some(Ordering::Less));
        assert_eq!(loose_cmp(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(loose_cmp(&json!("20"), &json!(3)), Some(Ordering::Greater));
        assert_eq!(loose_cmp(&json!("abc"), &json!(3)), None);
        assert_eq!(loose_cmp(&Value::Null, &json!(3)), None);
        assert_eq!(loose_cmp(&json!({"a": 1}), &json!({"a": 1})), None);
    }

    #[test]
    fn test_locale_cmp_ignores_case_first() {
        assert_eq!(locale_cmp("apple", "Banana"), Ordering::Less);
        assert_eq!(locale_cmp("Zeta", "alpha"), Ordering::Greater);
        assert_eq!(locale_cmp("a", "a"), Ordering::Equal);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), json!(42));
        assert_eq!(parse_id("abc"), json!("abc"));
        assert_eq!(parse_id("1.5"), json!(1.5));
    }
}
