use super::types::*;
use serde_json::{Number, Value};
use std::collections::HashMap;

pub const SORT_KEY: &str = "_sort";
pub const ORDER_KEY: &str = "_order";
pub const PAGE_KEY: &str = "_page";
pub const LIMIT_KEY: &str = "_limit";
pub const CURSOR_KEY: &str = "_cursor";
pub const SEARCH_KEY: &str = "_q";
pub const SEARCH_FIELDS_KEY: &str = "_fields";

const RESERVED_KEYS: [&str; 7] = [
    SORT_KEY,
    ORDER_KEY,
    PAGE_KEY,
    LIMIT_KEY,
    CURSOR_KEY,
    SEARCH_KEY,
    SEARCH_FIELDS_KEY,
];

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 10;

/// Decode request-style string parameters into query options.
///
/// `precio_gt=500` becomes `precio > 500`, `id_in=1,2` a membership test and
/// a bare `categoria=audio` an equality test. All derived conditions are
/// combined with `and`.
pub fn parse_query_params(params: &HashMap<String, String>) -> QueryOptions {
    let mut keys: Vec<&String> = params
        .keys()
        .filter(|k| !RESERVED_KEYS.contains(&k.as_str()))
        .collect();
    keys.sort();

    let conditions: Vec<Filter> = keys
        .into_iter()
        .filter_map(|key| parse_condition(key, &params[key]))
        .map(Filter::Condition)
        .collect();

    QueryOptions {
        filter: (!conditions.is_empty()).then(|| Filter::and(conditions)),
        sort: parse_sort(params),
        pagination: parse_pagination(params),
        search: params.get(SEARCH_KEY).map(|query| SearchOptions {
            query: query.clone(),
            fields: params.get(SEARCH_FIELDS_KEY).and_then(|f| non_empty(split_list(f))),
        }),
    }
}

fn parse_condition(key: &str, raw: &str) -> Option<FilterCondition> {
    let (field, operator) = match key.rsplit_once('_') {
        Some((field, suffix)) => match ComparisonOperator::from_suffix(suffix) {
            Some(op) => (field, op),
            None => (key, ComparisonOperator::Eq),
        },
        None => (key, ComparisonOperator::Eq),
    };
    if field.is_empty() {
        return None;
    }

    let value = match operator {
        ComparisonOperator::Gt | ComparisonOperator::Gte | ComparisonOperator::Lt | ComparisonOperator::Lte => {
            raw.trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number)
        }
        ComparisonOperator::In | ComparisonOperator::Nin => {
            Value::Array(split_list(raw).into_iter().map(Value::String).collect())
        }
        _ => Value::String(raw.to_string()),
    };

    Some(FilterCondition::new(field, operator, value))
}

fn parse_sort(params: &HashMap<String, String>) -> Option<Vec<SortSpec>> {
    let fields = split_list(params.get(SORT_KEY)?);
    let orders = params.get(ORDER_KEY).map(|o| split_list(o)).unwrap_or_default();

    let specs = fields
        .into_iter()
        .enumerate()
        .map(|(i, field)| SortSpec {
            field,
            direction: match orders.get(i).map(|o| o.to_lowercase()).as_deref() {
                Some("desc") => SortDirection::Desc,
                _ => SortDirection::Asc,
            },
        })
        .collect();
    non_empty(specs)
}

fn parse_pagination(params: &HashMap<String, String>) -> Option<Pagination> {
    let limit = parse_number(params.get(LIMIT_KEY), DEFAULT_LIMIT);

    if let Some(cursor) = params.get(CURSOR_KEY) {
        let cursor = (!cursor.is_empty()).then(|| cursor.clone());
        return Some(Pagination::Cursor { cursor, limit });
    }

    if params.contains_key(PAGE_KEY) || params.contains_key(LIMIT_KEY) {
        let page = parse_number(params.get(PAGE_KEY), DEFAULT_PAGE);
        return Some(Pagination::Offset { page, limit });
    }

    None
}

fn parse_number(raw: Option<&String>, default: usize) -> usize {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn conditions(options: &QueryOptions) -> Vec<FilterCondition> {
        match &options.filter {
            Some(Filter::Group(group)) => group
                .conditions
                .iter()
                .map(|c| match c {
                    Filter::Condition(c) => c.clone(),
                    Filter::Group(_) => panic!("unexpected nested group"),
                })
                .collect(),
            other => panic!("expected an and-group, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_params() {
        assert_eq!(parse_query_params(&HashMap::new()), QueryOptions::default());
    }

    #[test]
    fn test_operator_suffixes() {
        let options = parse_query_params(&params(&[
            ("precio_gte", "100.5"),
            ("nombre_like", "lap"),
            ("id_in", "1, 2,abc"),
            ("estado_ne", "baja"),
        ]));

        assert_eq!(
            conditions(&options),
            vec![
                FilterCondition::new("estado", ComparisonOperator::Ne, "baja"),
                FilterCondition::new("id", ComparisonOperator::In, json!(["1", "2", "abc"])),
                FilterCondition::new("nombre", ComparisonOperator::Like, "lap"),
                FilterCondition::new("precio", ComparisonOperator::Gte, json!(100.5)),
            ]
        );
    }

    #[test]
    fn test_bare_and_unknown_suffix_keys_are_equality() {
        let options = parse_query_params(&params(&[("categoria", "audio"), ("fecha_alta", "2024")]));

        assert_eq!(
            conditions(&options),
            vec![
                FilterCondition::new("categoria", ComparisonOperator::Eq, "audio"),
                FilterCondition::new("fecha_alta", ComparisonOperator::Eq, "2024"),
            ]
        );
    }

    #[test]
    fn test_unparsable_number_never_matches() {
        let options = parse_query_params(&params(&[("precio_gt", "mucho")]));
        assert_eq!(conditions(&options)[0].value, Value::Null);
    }

    #[test]
    fn test_reserved_keys_are_not_filters() {
        let options = parse_query_params(&params(&[("_q", "lap"), ("_sort", "precio")]));
        assert!(options.filter.is_none());
    }

    #[test]
    fn test_sort_and_order() {
        let options = parse_query_params(&params(&[("_sort", "precio,nombre,stock"), ("_order", "desc,ASC")]));
        assert_eq!(
            options.sort,
            Some(vec![SortSpec::desc("precio"), SortSpec::asc("nombre"), SortSpec::asc("stock")])
        );
    }

    #[test]
    fn test_offset_pagination_defaults() {
        let options = parse_query_params(&params(&[("_page", "3")]));
        assert_eq!(options.pagination, Some(Pagination::Offset { page: 3, limit: 10 }));

        let options = parse_query_params(&params(&[("_limit", "x")]));
        assert_eq!(options.pagination, Some(Pagination::Offset { page: 1, limit: 10 }));
    }

    #[test]
    fn test_cursor_takes_precedence() {
        let options = parse_query_params(&params(&[("_cursor", "MTA="), ("_page", "2"), ("_limit", "5")]));
        assert_eq!(
            options.pagination,
            Some(Pagination::Cursor {
                cursor: Some("MTA=".into()),
                limit: 5
            })
        );

        let options = parse_query_params(&params(&[("_cursor", "")]));
        assert_eq!(options.pagination, Some(Pagination::Cursor { cursor: None, limit: 10 }));
    }

    #[test]
    fn test_search_with_fields() {
        let options = parse_query_params(&params(&[("_q", "Lap"), ("_fields", "nombre, descripcion")]));
        assert_eq!(
            options.search,
            Some(SearchOptions {
                query: "Lap".into(),
                fields: Some(vec!["nombre".into(), "descripcion".into()]),
            })
        );
    }

    #[test]
    fn test_membership_lists_keep_text() {
        let records: Vec<_> = [json!({ "codigo": "007" }), json!({ "codigo": "123" })]
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();

        let options = parse_query_params(&params(&[("codigo_in", "007,123")]));
        assert_eq!(
            conditions(&options),
            vec![FilterCondition::new("codigo", ComparisonOperator::In, json!(["007", "123"]))]
        );
        assert_eq!(crate::query::evaluate(records.clone(), &options).unwrap().total, 2);

        let options = parse_query_params(&params(&[("codigo_nin", "007,123")]));
        assert_eq!(crate::query::evaluate(records, &options).unwrap().total, 0);
    }
}
