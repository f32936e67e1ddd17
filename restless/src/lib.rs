pub mod config;
pub mod database;
pub mod error;
pub mod interchange;
pub mod query;
pub mod record;
pub mod relation;
pub mod schema;
pub mod storage;
pub mod store;
pub mod validation;

pub use config::{Backend, DatabaseConfig};
pub use database::{Database, RecordIssue};
pub use error::{Result, StoreError};
pub use interchange::ExchangeFormat;
pub use query::{QueryOptions, QueryResult};
pub use record::{Collections, Record};
pub use relation::RelationManager;
pub use schema::{SchemaDefinition, SchemaRegistry};
pub use storage::StorageAdapter;
pub use store::CollectionStore;
pub use validation::{ValidationError, ValidationResult};
