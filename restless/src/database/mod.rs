use crate::config::{Backend, DatabaseConfig};
use crate::error::{Result, StoreError};
use crate::interchange::{self, ExchangeFormat};
use crate::query::{parse_query_params, QueryOptions, QueryResult};
use crate::record::{coerce_to_string, record_id, values_equal, Collections, Record, ID_FIELD};
use crate::relation::RelationManager;
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::storage::{JsonFileAdapter, MemoryAdapter, SqliteAdapter, StorageAdapter};
use crate::store::CollectionStore;
use crate::validation::{self, ValidationError, CREATED_AT};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A stored record that no longer satisfies its collection's schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordIssue {
    pub collection: String,
    pub id: Value,
    pub errors: Vec<ValidationError>,
}

/// The main entry point: a schema registry, a collection store and the
/// relation manager wired together.
///
/// Writes to collections with a registered schema are transformed and
/// validated before they are committed; deletes and key changes are
/// propagated to related records.
pub struct Database {
    root: Option<PathBuf>,
    config: DatabaseConfig,
    registry: SchemaRegistry,
    store: CollectionStore,
    relations: RelationManager,
}

impl Database {
    /// Open a database in an existing data directory.
    /// Reads `restless.yaml`, registers the schema file if present and loads
    /// the persisted collections.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let root = data_dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StoreError::Other(format!(
                "Data directory does not exist: {}",
                root.display()
            )));
        }

        let config = DatabaseConfig::load(&root)?;
        let adapter: Arc<dyn StorageAdapter> = match config.backend {
            Backend::Sqlite => Arc::new(SqliteAdapter::open(&root.join(&config.database_file))?),
            Backend::Json => Arc::new(JsonFileAdapter::new(root.join(&config.json_dir))),
            Backend::Memory => Arc::new(MemoryAdapter::new()),
        };

        let registry = SchemaRegistry::new();
        let schema_path = root.join(&config.schema_file);
        if schema_path.exists() {
            let count = registry.load_file(&schema_path)?;
            log::info!("Loaded {count} schema(s) from {}", schema_path.display());
        }

        let store = CollectionStore::open(adapter, config.storage_key.clone(), registry.clone())?;
        let mut db = Database::from_store(store);
        db.root = Some(root);
        db.config = config;
        Ok(db)
    }

    /// A database on volatile storage with no schemas.
    pub fn in_memory() -> Self {
        Database::from_store(CollectionStore::in_memory(SchemaRegistry::new()))
    }

    /// Wrap an existing store, sharing its schema registry.
    pub fn from_store(store: CollectionStore) -> Self {
        let registry = store.registry().clone();
        let relations = RelationManager::new(registry.clone(), store.clone());
        Database {
            root: None,
            config: DatabaseConfig::default(),
            registry,
            store,
            relations,
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    pub fn relations(&self) -> &RelationManager {
        &self.relations
    }

    // ── Schemas ──────────────────────────────────────────────────────

    pub fn register_schema(&self, schema: SchemaDefinition) {
        self.registry.register(schema);
    }

    pub fn schema(&self, collection: &str) -> Option<Arc<SchemaDefinition>> {
        self.registry.get(collection)
    }

    pub fn schemas(&self) -> Vec<Arc<SchemaDefinition>> {
        self.registry.all()
    }

    // ── Collections ──────────────────────────────────────────────────

    pub fn collections(&self) -> Vec<String> {
        self.store.collections()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.store.has_collection(collection)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Look up a record, expanding its relations `expand_depth` levels deep.
    pub fn get(&self, collection: &str, id: &Value, expand_depth: usize) -> Option<Record> {
        let record = self.store.get_by_id(collection, id)?;
        Some(self.relations.expand(collection, &record, expand_depth))
    }

    pub fn list(&self, collection: &str, options: &QueryOptions) -> Result<QueryResult> {
        self.store.query(collection, options)
    }

    /// List with options decoded from request-style string parameters.
    pub fn list_params(&self, collection: &str, params: &HashMap<String, String>) -> Result<QueryResult> {
        self.list(collection, &parse_query_params(params))
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a record. Defaults, transforms and timestamps are applied and
    /// the result validated when the collection has a schema.
    pub fn create(&self, collection: &str, record: Record) -> Result<Record> {
        let prepared = match self.registry.get(collection) {
            Some(schema) => validation::validate_and_prepare(&record, &schema, true, false)?,
            None => record,
        };
        self.store.add(collection, prepared)
    }

    /// Replace a whole record. The body's id defaults to `id`; a different
    /// id renames the record and is propagated to related records.
    pub fn replace(&self, collection: &str, id: &Value, record: Record) -> Result<Option<Record>> {
        let Some(existing) = self.store.get_by_id(collection, id) else {
            return Ok(None);
        };

        let mut body = record;
        if record_id(&body).is_none() {
            body.insert(ID_FIELD.to_string(), id.clone());
        }

        let prepared = match self.registry.get(collection) {
            Some(schema) => {
                if schema.timestamps && !body.contains_key(CREATED_AT) {
                    if let Some(created) = existing.get(CREATED_AT) {
                        body.insert(CREATED_AT.to_string(), created.clone());
                    }
                }
                validation::validate_and_prepare(&body, &schema, false, false)?
            }
            None => body,
        };

        self.commit_update(collection, id, &existing, prepared)
    }

    /// Merge `patch` into a record. Only the fields present are required to
    /// be valid; changed keys are propagated to related records.
    pub fn patch(&self, collection: &str, id: &Value, patch: &Record) -> Result<Option<Record>> {
        let Some(existing) = self.store.get_by_id(collection, id) else {
            return Ok(None);
        };

        let mut merged = existing.clone();
        for (field, value) in patch {
            merged.insert(field.clone(), value.clone());
        }

        let prepared = match self.registry.get(collection) {
            Some(schema) => validation::validate_and_prepare(&merged, &schema, false, true)?,
            None => merged,
        };

        self.commit_update(collection, id, &existing, prepared)
    }

    fn commit_update(&self, collection: &str, id: &Value, existing: &Record, updated: Record) -> Result<Option<Record>> {
        if let Some(new_id) = record_id(&updated) {
            if !values_equal(new_id, id) && self.store.get_by_id(collection, new_id).is_some() {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id: coerce_to_string(new_id),
                });
            }
        }

        // restrict is checked up front; the rewrite runs after the commit so a
        // record referencing itself is rewritten too
        self.relations.check_key_changes(collection, existing, &updated)?;
        let Some(committed) = self.store.replace(collection, id, updated)? else {
            return Ok(None);
        };

        let rewritten = self.relations.cascade_key_changes(collection, existing, &committed)?;
        if rewritten == 0 {
            return Ok(Some(committed));
        }
        log::info!(
            "Key change on {collection}/{} rewrote {rewritten} related record(s)",
            coerce_to_string(id)
        );
        Ok(record_id(&committed).and_then(|new_id| self.store.get_by_id(collection, new_id)))
    }

    /// Delete a record and apply every delete policy pointing at it.
    /// A `restrict` relation still in use refuses the delete with
    /// `StoreError::ReferentialIntegrity`.
    pub fn delete(&self, collection: &str, id: &Value) -> Result<bool> {
        self.relations.delete(collection, id)
    }

    pub fn can_delete(&self, collection: &str, id: &Value) -> bool {
        self.relations.can_delete(collection, id)
    }

    // ── Integrity report ─────────────────────────────────────────────

    /// Every stored record that fails its collection's schema.
    pub fn validate_all(&self) -> Vec<RecordIssue> {
        let mut issues = Vec::new();
        for schema in self.registry.all() {
            for record in self.store.get_all(&schema.name) {
                let result = validation::validate(&record, &schema, false);
                if !result.valid {
                    issues.push(RecordIssue {
                        collection: schema.name.clone(),
                        id: record.get(ID_FIELD).cloned().unwrap_or(Value::Null),
                        errors: result.errors,
                    });
                }
            }
        }
        issues
    }

    // ── Bulk interchange ─────────────────────────────────────────────

    pub fn export(&self) -> Collections {
        self.store.export()
    }

    /// Replace every collection. Imported records are not validated; use
    /// [`Database::validate_all`] to audit them.
    pub fn import(&self, collections: Collections) -> Result<()> {
        self.store.import(collections)
    }

    /// Export every collection as text in `format`.
    pub fn export_as(&self, format: ExchangeFormat) -> Result<String> {
        interchange::export(&self.export(), format)
    }

    /// Replace every collection with the contents of a `format` export.
    pub fn import_from(&self, content: &str, format: ExchangeFormat) -> Result<()> {
        self.import(interchange::import(content, format)?)
    }

    pub fn export_json(&self) -> Result<String> {
        self.export_as(ExchangeFormat::Json)
    }

    pub fn import_json(&self, json: &str) -> Result<()> {
        self.import_from(json, ExchangeFormat::Json)
    }

    pub fn export_csv(&self) -> Result<String> {
        self.export_as(ExchangeFormat::Csv)
    }

    pub fn import_csv(&self, csv: &str) -> Result<()> {
        self.import_from(csv, ExchangeFormat::Csv)
    }
}
