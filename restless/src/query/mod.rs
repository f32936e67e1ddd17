pub mod engine;
pub mod params;
pub mod types;

pub use engine::{decode_cursor, encode_cursor, evaluate, matches_filter};
pub use params::parse_query_params;
pub use types::{
    ComparisonOperator, Filter, FilterCondition, FilterGroup, LogicalOperator, Pagination, PaginationMeta,
    QueryOptions, QueryResult, SearchOptions, SortDirection, SortSpec,
};
