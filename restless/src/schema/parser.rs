use super::types::{FieldMap, SchemaDefinition};
use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// On-disk shape of a schema file
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    collections: BTreeMap<String, CollectionSchema>,
}

#[derive(Debug, Deserialize)]
struct CollectionSchema {
    #[serde(default)]
    timestamps: bool,
    #[serde(default)]
    fields: FieldMap,
}

/// Parse a schema.yaml file into one SchemaDefinition per collection
pub fn parse_schema(path: &Path) -> Result<Vec<SchemaDefinition>> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into one SchemaDefinition per collection
pub fn parse_schema_str(content: &str) -> Result<Vec<SchemaDefinition>> {
    let file: SchemaFile = serde_yaml::from_str(content)?;
    Ok(file
        .collections
        .into_iter()
        .map(|(name, collection)| SchemaDefinition {
            name,
            fields: collection.fields,
            timestamps: collection.timestamps,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, ReferenceAction, RelationType};

    #[test]
    fn test_parse_collections() {
        let schemas = parse_schema_str(
            r#"
collections:
  usuarios:
    timestamps: true
    fields:
      nombre: { type: string, required: true, min_length: 3 }
      rol: { type: string, enum: [admin, usuario], default: usuario }
      pedidos:
        type: array
        relation: { type: one_to_many, collection: pedidos, field: usuarioId, on_delete: cascade }
  pedidos:
    fields:
      usuarioId: { type: number, relation: { type: many_to_one, collection: usuarios } }
      fecha: { type: string, generate: today }
"#,
        )
        .unwrap();

        assert_eq!(schemas.len(), 2);
        let usuarios = schemas.iter().find(|s| s.name == "usuarios").unwrap();
        assert!(usuarios.timestamps);
        assert_eq!(usuarios.fields.len(), 3);
        assert_eq!(usuarios.get_field("nombre").unwrap().types, vec![FieldType::String]);

        let relation = usuarios.get_field("pedidos").unwrap().relation.as_ref().unwrap();
        assert_eq!(relation.relation_type, RelationType::OneToMany);
        assert_eq!(relation.on_delete, Some(ReferenceAction::Cascade));

        let pedidos = schemas.iter().find(|s| s.name == "pedidos").unwrap();
        assert!(pedidos.get_field("fecha").unwrap().default.is_some());
    }

    #[test]
    fn test_unknown_generator_rejected() {
        let result = parse_schema_str(
            "collections:\n  things:\n    fields:\n      code: { type: string, generate: sequence }\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_file() {
        assert!(parse_schema_str("{}").unwrap().is_empty());
    }
}
