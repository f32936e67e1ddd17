use super::types::*;
use crate::error::{Result, StoreError};
use crate::record::{coerce_to_string, locale_cmp, loose_cmp, values_equal, Record};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::cmp::Ordering;

/// Run a query over a snapshot of records.
///
/// Steps run in a fixed order: filter, search, total, sort, paginate. The
/// reported `total` therefore counts every match, not just the returned page.
pub fn evaluate(records: Vec<Record>, options: &QueryOptions) -> Result<QueryResult> {
    let scanned = records.len();
    let mut matched: Vec<Record> = records
        .into_iter()
        .filter(|r| options.filter.as_ref().map_or(true, |f| matches_filter(r, f)))
        .filter(|r| options.search.as_ref().map_or(true, |s| matches_search(r, s)))
        .collect();

    let total = matched.len();

    if let Some(sort) = options.sort.as_deref().filter(|s| !s.is_empty()) {
        matched = sort_records(matched, sort);
    }

    let (data, pagination) = match &options.pagination {
        None => (matched, None),
        Some(Pagination::Offset { page, limit }) => {
            let (data, meta) = paginate_offset(matched, *page, *limit);
            (data, Some(meta))
        }
        Some(Pagination::Cursor { cursor, limit }) => {
            let (data, meta) = paginate_cursor(matched, cursor.as_deref(), *limit)?;
            (data, Some(meta))
        }
    };

    log::debug!(
        "Query scanned {scanned} record(s), matched {total}, returned {}",
        data.len()
    );

    Ok(QueryResult {
        data,
        total,
        pagination,
    })
}

/// Whether a record satisfies a filter tree.
pub fn matches_filter(record: &Record, filter: &Filter) -> bool {
    match filter {
        Filter::Condition(condition) => matches_condition(record, condition),
        Filter::Group(group) => {
            let mut results = group.conditions.iter().map(|child| matches_filter(record, child));
            match group.operator {
                LogicalOperator::And => results.all(|b| b),
                LogicalOperator::Or => results.any(|b| b),
                LogicalOperator::Not => !results.any(|b| b),
            }
        }
    }
}

fn matches_condition(record: &Record, condition: &FilterCondition) -> bool {
    let Some(actual) = record.get(&condition.field) else {
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        ComparisonOperator::Eq => coerce_to_string(actual) == coerce_to_string(expected),
        ComparisonOperator::Ne => coerce_to_string(actual) != coerce_to_string(expected),
        ComparisonOperator::Gt => loose_cmp(actual, expected) == Some(Ordering::Greater),
        ComparisonOperator::Gte => matches!(
            loose_cmp(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ComparisonOperator::Lt => loose_cmp(actual, expected) == Some(Ordering::Less),
        ComparisonOperator::Lte => matches!(
            loose_cmp(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ComparisonOperator::Like => coerce_to_string(actual)
            .to_lowercase()
            .contains(&coerce_to_string(expected).to_lowercase()),
        ComparisonOperator::In => match expected {
            Value::Array(candidates) => candidates.iter().any(|c| is_member(c, actual)),
            _ => false,
        },
        ComparisonOperator::Nin => match expected {
            Value::Array(candidates) => !candidates.iter().any(|c| is_member(c, actual)),
            _ => false,
        },
    }
}

/// Set membership for `in`/`nin`. Strings compare as strings; a number also
/// matches the text of that number, so `id_in=1,2` finds numeric ids.
fn is_member(candidate: &Value, actual: &Value) -> bool {
    match (candidate, actual) {
        (Value::String(text), Value::Number(n)) | (Value::Number(n), Value::String(text)) => {
            matches!((text.trim().parse::<f64>(), n.as_f64()), (Ok(x), Some(y)) if x == y)
        }
        _ => values_equal(candidate, actual),
    }
}

fn matches_search(record: &Record, search: &SearchOptions) -> bool {
    let needle = search.query.to_lowercase();
    if needle.is_empty() {
        return true;
    }

    let hit = |value: &Value| match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            coerce_to_string(value).to_lowercase().contains(&needle)
        }
        _ => false,
    };

    match &search.fields {
        Some(fields) => fields.iter().filter_map(|f| record.get(f)).any(hit),
        None => record.values().any(hit),
    }
}

/// Stable merge sort over record indices. Keys missing on either side are
/// skipped, so the comparison is not a total order and must not be handed to
/// `slice::sort_by`.
fn sort_records(records: Vec<Record>, sort: &[SortSpec]) -> Vec<Record> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    let mut buffer = order.clone();
    merge_sort(&mut order, &mut buffer, &|a, b| {
        compare_records(&records[a], &records[b], sort)
    });

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

fn merge_sort(items: &mut [usize], buffer: &mut [usize], cmp: &dyn Fn(usize, usize) -> Ordering) {
    let len = items.len();
    if len <= 1 {
        return;
    }
    let mid = len / 2;
    merge_sort(&mut items[..mid], &mut buffer[..mid], cmp);
    merge_sort(&mut items[mid..], &mut buffer[mid..], cmp);

    buffer.copy_from_slice(items);
    let (left, right) = buffer.split_at(mid);
    let (mut i, mut j) = (0, 0);
    for slot in items.iter_mut() {
        if j >= right.len() || (i < left.len() && cmp(left[i], right[j]) != Ordering::Greater) {
            *slot = left[i];
            i += 1;
        } else {
            *slot = right[j];
            j += 1;
        }
    }
}

fn compare_records(a: &Record, b: &Record, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let (Some(x), Some(y)) = (a.get(&spec.field), b.get(&spec.field)) else {
            continue;
        };
        let ordering = match (x, y) {
            (Value::String(x), Value::String(y)) => locale_cmp(x, y),
            _ => match loose_cmp(x, y) {
                Some(ordering) => ordering,
                None => continue,
            },
        };
        if ordering != Ordering::Equal {
            return match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
        }
    }
    Ordering::Equal
}

fn paginate_offset(records: Vec<Record>, page: usize, limit: usize) -> (Vec<Record>, PaginationMeta) {
    let page = page.max(1);
    let total = records.len();

    if limit == 0 {
        let meta = PaginationMeta {
            current_page: Some(page),
            page_count: Some(0),
            next_cursor: None,
            has_more: false,
        };
        return (Vec::new(), meta);
    }

    let page_count = total.div_ceil(limit);
    let start = (page - 1).saturating_mul(limit);
    let data = records.into_iter().skip(start).take(limit).collect();

    let meta = PaginationMeta {
        current_page: Some(page),
        page_count: Some(page_count),
        next_cursor: None,
        has_more: page < page_count,
    };
    (data, meta)
}

fn paginate_cursor(
    records: Vec<Record>,
    cursor: Option<&str>,
    limit: usize,
) -> Result<(Vec<Record>, PaginationMeta)> {
    let offset = decode_cursor(cursor.unwrap_or_default())?;
    let total = records.len();
    let end = offset.saturating_add(limit);

    // a zero limit never advances, so it never offers a next cursor
    let has_more = limit > 0 && end < total;
    let data = records.into_iter().skip(offset).take(limit).collect();

    let meta = PaginationMeta {
        current_page: None,
        page_count: None,
        next_cursor: has_more.then(|| encode_cursor(end)),
        has_more,
    };
    Ok((data, meta))
}

/// Encode a start offset as an opaque cursor. Not tamper-proof: any client
/// can decode it.
pub fn encode_cursor(offset: usize) -> String {
    BASE64.encode(offset.to_string())
}

/// Decode a cursor produced by [`encode_cursor`]. The empty cursor means 0.
pub fn decode_cursor(cursor: &str) -> Result<usize> {
    if cursor.is_empty() {
        return Ok(0);
    }
    let invalid = || StoreError::InvalidCursor(cursor.to_string());

    let bytes = BASE64.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.trim().parse::<usize>().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn productos() -> Vec<Record> {
        [
            json!({ "id": 1, "nombre": "Laptop", "precio": 1200, "stock": 5, "categoria": "informatica" }),
            json!({ "id": 2, "nombre": "Tablet", "precio": 350, "stock": 0, "categoria": "informatica" }),
            json!({ "id": 3, "nombre": "auriculares", "precio": 80, "categoria": "audio" }),
            json!({ "id": 4, "nombre": "Monitor", "precio": 350, "stock": 12, "categoria": "informatica" }),
            json!({ "id": 5, "nombre": "Altavoz", "precio": "95", "stock": 3, "categoria": "audio" }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    fn run(options: QueryOptions) -> QueryResult {
        evaluate(productos(), &options).unwrap()
    }

    fn cond(field: &str, op: ComparisonOperator, value: Value) -> Filter {
        Filter::condition(field, op, value)
    }

    #[test]
    fn test_no_options_returns_everything() {
        let result = run(QueryOptions::new());
        assert_eq!(result.total, 5);
        assert_eq!(ids(&result.data), vec![1, 2, 3, 4, 5]);
        assert!(result.pagination.is_none());
    }

    #[test]
    fn test_equality_coerces_to_string() {
        let result = run(QueryOptions::new().filter(cond("precio", ComparisonOperator::Eq, json!("350"))));
        assert_eq!(ids(&result.data), vec![2, 4]);

        let result = run(QueryOptions::new().filter(cond("precio", ComparisonOperator::Eq, json!(95))));
        assert_eq!(ids(&result.data), vec![5]);

        let result = run(QueryOptions::new().filter(cond("precio", ComparisonOperator::Ne, json!(350))));
        assert_eq!(ids(&result.data), vec![1, 3, 5]);
    }

    #[test]
    fn test_relational_operators() {
        let result = run(QueryOptions::new().filter(cond("precio", ComparisonOperator::Gt, json!(500))));
        assert_eq!(ids(&result.data), vec![1]);

        let result = run(QueryOptions::new().filter(cond("precio", ComparisonOperator::Lte, json!(95))));
        assert_eq!(ids(&result.data), vec![3, 5]);

        let result = run(QueryOptions::new().filter(cond("precio", ComparisonOperator::Gte, json!(350))));
        assert_eq!(ids(&result.data), vec![1, 2, 4]);
    }

    #[test]
    fn test_missing_field_never_matches() {
        let result = run(QueryOptions::new().filter(cond("stock", ComparisonOperator::Ne, json!(5))));
        assert_eq!(ids(&result.data), vec![2, 4, 5]);

        let result = run(QueryOptions::new().filter(cond("stock", ComparisonOperator::Lt, json!(100))));
        assert!(!ids(&result.data).contains(&3));
    }

    #[test]
    fn test_like_is_case_insensitive() {
        let result = run(QueryOptions::new().filter(cond("nombre", ComparisonOperator::Like, json!("TA"))));
        assert_eq!(ids(&result.data), vec![2, 5]);
    }

    #[test]
    fn test_in_and_nin() {
        let result = run(QueryOptions::new().filter(cond("id", ComparisonOperator::In, json!([1, 3, 9]))));
        assert_eq!(ids(&result.data), vec![1, 3]);

        let result = run(QueryOptions::new().filter(cond("id", ComparisonOperator::Nin, json!([1, 3]))));
        assert_eq!(ids(&result.data), vec![2, 4, 5]);

        // a scalar operand is not a set
        let result = run(QueryOptions::new().filter(cond("id", ComparisonOperator::In, json!(1))));
        assert_eq!(result.total, 0);
        let result = run(QueryOptions::new().filter(cond("id", ComparisonOperator::Nin, json!(1))));
        assert_eq!(result.total, 0);
    }

    #[test]
    fn test_in_with_text_candidates() {
        let result = run(QueryOptions::new().filter(cond("id", ComparisonOperator::In, json!(["2", "4"]))));
        assert_eq!(ids(&result.data), vec![2, 4]);

        let codigos: Vec<Record> = [json!({ "id": 1, "codigo": "007" }), json!({ "id": 2, "codigo": "123" })]
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();

        let options = QueryOptions::new().filter(cond("codigo", ComparisonOperator::In, json!(["007", "123"])));
        assert_eq!(evaluate(codigos.clone(), &options).unwrap().total, 2);

        let options = QueryOptions::new().filter(cond("codigo", ComparisonOperator::Nin, json!(["007", "123"])));
        assert_eq!(evaluate(codigos.clone(), &options).unwrap().total, 0);

        // text stays text: "7" is not "007"
        let options = QueryOptions::new().filter(cond("codigo", ComparisonOperator::In, json!(["7"])));
        assert_eq!(evaluate(codigos, &options).unwrap().total, 0);
    }

    #[test]
    fn test_and_is_intersection_or_is_union() {
        let a = cond("categoria", ComparisonOperator::Eq, json!("informatica"));
        let b = cond("precio", ComparisonOperator::Lt, json!(1000));

        let only_a = ids(&run(QueryOptions::new().filter(a.clone())).data);
        let only_b = ids(&run(QueryOptions::new().filter(b.clone())).data);

        let both = ids(&run(QueryOptions::new().filter(Filter::and(vec![a.clone(), b.clone()]))).data);
        let expected: Vec<i64> = only_a.iter().copied().filter(|id| only_b.contains(id)).collect();
        assert_eq!(both, expected);

        let either = ids(&run(QueryOptions::new().filter(Filter::or(vec![a, b]))).data);
        let mut expected: Vec<i64> = only_a.into_iter().chain(only_b).collect();
        expected.sort();
        expected.dedup();
        assert_eq!(either, expected);
    }

    #[test]
    fn test_not_is_complement_and_nor() {
        let a = cond("categoria", ComparisonOperator::Eq, json!("audio"));
        let result = run(QueryOptions::new().filter(Filter::not(vec![a.clone()])));
        assert_eq!(ids(&result.data), vec![1, 2, 4]);

        let b = cond("precio", ComparisonOperator::Gt, json!(1000));
        let result = run(QueryOptions::new().filter(Filter::not(vec![a, b])));
        assert_eq!(ids(&result.data), vec![2, 4]);
    }

    #[test]
    fn test_nested_groups() {
        let filter = Filter::and(vec![
            cond("categoria", ComparisonOperator::Eq, json!("informatica")),
            Filter::or(vec![
                cond("stock", ComparisonOperator::Eq, json!(0)),
                cond("precio", ComparisonOperator::Gt, json!(1000)),
            ]),
        ]);
        let result = run(QueryOptions::new().filter(filter));
        assert_eq!(ids(&result.data), vec![1, 2]);
    }

    #[test]
    fn test_search_all_fields_and_allowlist() {
        let result = run(QueryOptions::new().search("AUDIO", None));
        assert_eq!(ids(&result.data), vec![3, 5]);

        let result = run(QueryOptions::new().search("audio", Some(vec!["nombre".into()])));
        assert_eq!(result.total, 0);

        let result = run(QueryOptions::new().search("35", Some(vec!["precio".into()])));
        assert_eq!(ids(&result.data), vec![2, 4]);

        let result = run(QueryOptions::new().search("", None));
        assert_eq!(result.total, 5);
    }

    #[test]
    fn test_sort_is_stable_and_multi_key() {
        let result = run(QueryOptions::new().sort(SortSpec::desc("precio")));
        assert_eq!(ids(&result.data), vec![1, 2, 4, 5, 3]);

        let result = run(QueryOptions::new().sort(SortSpec::asc("precio")).sort(SortSpec::desc("nombre")));
        assert_eq!(ids(&result.data), vec![3, 5, 2, 4, 1]);
    }

    #[test]
    fn test_sort_strings_ignore_case() {
        let result = run(QueryOptions::new().sort(SortSpec::asc("nombre")));
        assert_eq!(ids(&result.data), vec![5, 3, 1, 4, 2]);
    }

    #[test]
    fn test_sort_skips_missing_fields() {
        // id 3 has no stock, so it ties with everything on that key and
        // keeps its place relative to its neighbours
        let result = run(QueryOptions::new().sort(SortSpec::asc("stock")));
        assert_eq!(result.data.len(), 5);
        let with_stock: Vec<i64> = ids(&result.data).into_iter().filter(|id| *id != 3).collect();
        assert_eq!(with_stock.first(), Some(&2));
    }

    #[test]
    fn test_offset_pagination() {
        let result = run(QueryOptions::new().page(2, 2));
        assert_eq!(ids(&result.data), vec![3, 4]);
        assert_eq!(result.total, 5);
        assert_eq!(
            result.pagination,
            Some(PaginationMeta {
                current_page: Some(2),
                page_count: Some(3),
                next_cursor: None,
                has_more: true,
            })
        );

        let last = run(QueryOptions::new().page(3, 2));
        assert_eq!(ids(&last.data), vec![5]);
        assert!(!last.pagination.unwrap().has_more);
    }

    #[test]
    fn test_offset_page_bounds() {
        for limit in 1..=6 {
            for page in 1..=6 {
                let result = run(QueryOptions::new().page(page, limit));
                let meta = result.pagination.unwrap();
                assert!(result.data.len() <= limit);
                assert_eq!(meta.page_count, Some(result.total.div_ceil(limit)));
            }
        }

        let zero = run(QueryOptions::new().page(0, 2));
        assert_eq!(zero.pagination.unwrap().current_page, Some(1));

        let empty = run(QueryOptions::new().page(1, 0));
        assert!(empty.data.is_empty());
        assert_eq!(empty.pagination.unwrap().page_count, Some(0));
    }

    #[test]
    fn test_cursor_pagination_partitions() {
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let result = run(QueryOptions::new().sort(SortSpec::asc("precio")).cursor(cursor, 2));
            seen.extend(ids(&result.data));
            let meta = result.pagination.unwrap();
            if !meta.has_more {
                assert!(meta.next_cursor.is_none());
                break;
            }
            cursor = meta.next_cursor;
        }
        assert_eq!(seen, vec![3, 5, 2, 4, 1]);
    }

    #[test]
    fn test_cursor_codec() {
        assert_eq!(encode_cursor(10), "MTA=");
        assert_eq!(decode_cursor("MTA=").unwrap(), 10);
        assert_eq!(decode_cursor("").unwrap(), 0);
        assert!(matches!(decode_cursor("%%%"), Err(StoreError::InvalidCursor(_))));
        assert!(matches!(decode_cursor(&BASE64.encode("abc")), Err(StoreError::InvalidCursor(_))));
    }

    #[test]
    fn test_total_counts_before_pagination() {
        let options = QueryOptions::new()
            .filter(cond("precio", ComparisonOperator::Gt, json!(500)))
            .sort(SortSpec::desc("precio"))
            .page(1, 1);
        let result = run(options);
        assert_eq!(result.total, 1);
        assert_eq!(result.data[0]["nombre"], json!("Laptop"));

        let options = QueryOptions::new()
            .filter(cond("categoria", ComparisonOperator::Eq, json!("informatica")))
            .page(1, 1);
        let result = run(options);
        assert_eq!(result.total, 3);
        assert_eq!(result.data.len(), 1);
    }

    #[test]
    fn test_invalid_cursor_fails_the_query() {
        let options = QueryOptions::new().cursor(Some(BASE64.encode("diez")), 2);
        assert!(matches!(evaluate(productos(), &options), Err(StoreError::InvalidCursor(_))));
    }
}
