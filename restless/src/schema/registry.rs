use super::parser::parse_schema;
use super::types::SchemaDefinition;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Registered schemas, shared by the store, the validator pipeline and the
/// relation manager. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    schemas: BTreeMap<String, Arc<SchemaDefinition>>,
    generation: u64,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Register a schema, replacing any previous definition with the same
    /// name. Records already stored are not revalidated.
    pub fn register(&self, schema: SchemaDefinition) {
        let mut state = self.inner.write();
        let replaced = state
            .schemas
            .insert(schema.name.clone(), Arc::new(schema))
            .is_some();
        state.generation += 1;
        log::info!(
            "Schema registered (generation {}, replaced: {replaced})",
            state.generation
        );
    }

    pub fn register_all(&self, schemas: impl IntoIterator<Item = SchemaDefinition>) {
        for schema in schemas {
            self.register(schema);
        }
    }

    /// Load and register every collection schema in a schema.yaml file.
    /// Returns the number of schemas registered.
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let schemas = parse_schema(path)?;
        let count = schemas.len();
        self.register_all(schemas);
        Ok(count)
    }

    /// Remove a schema. Returns whether one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.inner.write();
        let removed = state.schemas.remove(name).is_some();
        if removed {
            state.generation += 1;
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<SchemaDefinition>> {
        self.inner.read().schemas.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().schemas.contains_key(name)
    }

    /// Every registered schema, ordered by collection name.
    pub fn all(&self) -> Vec<Arc<SchemaDefinition>> {
        self.inner.read().schemas.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().schemas.keys().cloned().collect()
    }

    /// Bumped on every change; derived structures compare it to detect
    /// that they must be rebuilt.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("SchemaRegistry")
            .field("schemas", &state.schemas.keys().collect::<Vec<_>>())
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType};

    #[test]
    fn test_register_and_replace() {
        let registry = SchemaRegistry::new();
        registry.register(
            SchemaDefinition::new("items").field("name", FieldDefinition::new(FieldType::String)),
        );
        assert_eq!(registry.generation(), 1);
        assert!(registry.get("items").unwrap().get_field("name").is_some());

        registry.register(
            SchemaDefinition::new("items").field("title", FieldDefinition::new(FieldType::String)),
        );
        assert_eq!(registry.generation(), 2);
        let items = registry.get("items").unwrap();
        assert!(items.get_field("name").is_none());
        assert!(items.get_field("title").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = SchemaRegistry::new();
        let handle = registry.clone();
        handle.register(SchemaDefinition::new("a"));
        assert!(registry.contains("a"));
        assert_eq!(registry.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_independent_registries() {
        let first = SchemaRegistry::new();
        let second = SchemaRegistry::new();
        first.register(SchemaDefinition::new("a"));
        assert!(!second.contains("a"));
    }

    #[test]
    fn test_load_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("schema.yaml");
        std::fs::write(
            &path,
            "collections:\n  a:\n    fields:\n      x: { type: number }\n  b: {}\n",
        )
        .unwrap();

        let registry = SchemaRegistry::new();
        assert_eq!(registry.load_file(&path).unwrap(), 2);
        assert!(registry.unregister("b"));
        assert!(!registry.unregister("b"));
        assert_eq!(registry.names(), vec!["a".to_string()]);
    }
}
