use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a single filter condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "nin")]
    Nin,
}

impl ComparisonOperator {
    /// Operator for a query-string suffix (`eq`, `gte`, `nin`, ...).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let op = match suffix {
            "eq" => ComparisonOperator::Eq,
            "ne" => ComparisonOperator::Ne,
            "gt" => ComparisonOperator::Gt,
            "gte" => ComparisonOperator::Gte,
            "lt" => ComparisonOperator::Lt,
            "lte" => ComparisonOperator::Lte,
            "like" => ComparisonOperator::Like,
            "in" => ComparisonOperator::In,
            "nin" => ComparisonOperator::Nin,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    /// True when none of the children are true
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: Value,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        FilterCondition {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub operator: LogicalOperator,
    pub conditions: Vec<Filter>,
}

/// A filter tree node: a leaf condition or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    Group(FilterGroup),
    Condition(FilterCondition),
}

impl Filter {
    pub fn condition(field: impl Into<String>, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, operator, value))
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Filter::group(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::group(LogicalOperator::Or, children)
    }

    pub fn not(children: Vec<Filter>) -> Self {
        Filter::group(LogicalOperator::Not, children)
    }

    fn group(operator: LogicalOperator, conditions: Vec<Filter>) -> Self {
        Filter::Group(FilterGroup { operator, conditions })
    }
}

impl From<FilterCondition> for Filter {
    fn from(condition: FilterCondition) -> Self {
        Filter::Condition(condition)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pagination {
    /// 1-indexed page of `limit` records
    Offset { page: usize, limit: usize },
    /// Resume from an opaque cursor; `None` starts at the beginning
    Cursor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
        limit: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    /// Fields to search; all fields of each record when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchOptions>,
}

impl QueryOptions {
    pub fn new() -> Self {
        QueryOptions::default()
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(spec);
        self
    }

    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.pagination = Some(Pagination::Offset { page, limit });
        self
    }

    pub fn cursor(mut self, cursor: Option<String>, limit: usize) -> Self {
        self.pagination = Some(Pagination::Cursor { cursor, limit });
        self
    }

    pub fn search(mut self, query: impl Into<String>, fields: Option<Vec<String>>) -> Self {
        self.search = Some(SearchOptions {
            query: query.into(),
            fields,
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Vec<Record>,
    /// Matches after filter and search, before pagination
    pub total: usize,
    /// Absent when the query was not paginated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}
