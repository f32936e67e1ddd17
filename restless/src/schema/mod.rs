pub mod parser;
pub mod registry;
pub mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use registry::SchemaRegistry;
pub use types::{
    DefaultValue, FieldDefinition, FieldMap, FieldType, ReferenceAction, Relation, RelationType,
    SchemaDefinition, StringFormat, Transform, Validator,
};
