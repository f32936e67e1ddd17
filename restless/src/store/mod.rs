use crate::error::{Result, StoreError};
use crate::query::{self, QueryOptions, QueryResult};
use crate::record::{coerce_to_string, record_id, values_equal, Collections, Record, ID_FIELD};
use crate::schema::SchemaRegistry;
use crate::storage::{MemoryAdapter, StorageAdapter};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Owns the named collections of one store and keeps them in sync with a
/// storage adapter.
///
/// Mutations are applied in memory first and persisted afterwards; a failed
/// save is reported to the caller but the in-memory change stays applied.
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct CollectionStore {
    collections: Arc<RwLock<Collections>>,
    adapter: Arc<dyn StorageAdapter>,
    key: String,
    registry: SchemaRegistry,
}

impl CollectionStore {
    /// Open a store, loading whatever the adapter holds under `key`.
    pub fn open(adapter: Arc<dyn StorageAdapter>, key: impl Into<String>, registry: SchemaRegistry) -> Result<Self> {
        let key = key.into();
        let collections = adapter.load(&key).map_err(into_storage_error)?.unwrap_or_default();
        log::info!(
            "Opened store '{key}' on {} storage ({} collection(s))",
            adapter.name(),
            collections.len()
        );

        Ok(CollectionStore {
            collections: Arc::new(RwLock::new(collections)),
            adapter,
            key,
            registry,
        })
    }

    /// An empty store that doesn't read from the adapter.
    pub fn new(adapter: Arc<dyn StorageAdapter>, key: impl Into<String>, registry: SchemaRegistry) -> Self {
        CollectionStore {
            collections: Arc::new(RwLock::new(Collections::new())),
            adapter,
            key: key.into(),
            registry,
        }
    }

    /// An empty store on volatile storage.
    pub fn in_memory(registry: SchemaRegistry) -> Self {
        CollectionStore::new(Arc::new(MemoryAdapter::new()), "memory", registry)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    // ── Collections ──────────────────────────────────────────────────

    pub fn collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    /// Make sure a collection exists. Returns whether it was created.
    pub fn create_collection(&self, collection: &str) -> Result<bool> {
        let created = {
            let mut collections = self.collections.write();
            if collections.contains_key(collection) {
                false
            } else {
                collections.insert(collection.to_string(), Vec::new());
                true
            }
        };
        if created {
            self.persist()?;
        }
        Ok(created)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Copy of every record in a collection, in insertion order.
    pub fn get_all(&self, collection: &str) -> Vec<Record> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_by_id(&self, collection: &str, id: &Value) -> Option<Record> {
        let collections = self.collections.read();
        collections
            .get(collection)?
            .iter()
            .find(|r| has_id(r, id))
            .cloned()
    }

    /// Records whose `field` equals `value`.
    pub fn find_by(&self, collection: &str, field: &str, value: &Value) -> Vec<Record> {
        let collections = self.collections.read();
        match collections.get(collection) {
            Some(records) => records
                .iter()
                .filter(|r| r.get(field).map_or(false, |v| values_equal(v, value)))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Run a query against a snapshot of the collection. A missing
    /// collection behaves like an empty one.
    pub fn query(&self, collection: &str, options: &QueryOptions) -> Result<QueryResult> {
        let snapshot = self.get_all(collection);
        log::debug!("Querying '{collection}' ({} record(s))", snapshot.len());
        query::evaluate(snapshot, options)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a record, creating the collection if needed. A record without
    /// an id (or with a null one) gets `1 + max(existing numeric ids)`.
    pub fn add(&self, collection: &str, record: Record) -> Result<Record> {
        let committed = {
            let mut collections = self.collections.write();
            let records = collections.entry(collection.to_string()).or_default();

            let committed = match record_id(&record) {
                Some(id) => {
                    if records.iter().any(|r| has_id(r, id)) {
                        return Err(duplicate(collection, id));
                    }
                    record
                }
                None => with_id(record, next_id(collection, records)?),
            };
            records.push(committed.clone());
            committed
        };

        log::debug!("Added {collection}/{}", display_id(&committed));
        self.persist()?;
        Ok(committed)
    }

    /// Shallow-merge `patch` into the record with `id`. Returns the merged
    /// record, or `None` if there is no such record.
    pub fn update(&self, collection: &str, id: &Value, patch: &Record) -> Result<Option<Record>> {
        self.write_record(collection, id, |existing| {
            let mut merged = existing.clone();
            for (field, value) in patch {
                merged.insert(field.clone(), value.clone());
            }
            merged
        })
    }

    /// Swap the record with `id` for `record` entirely. Returns the stored
    /// record, or `None` if there is no such record.
    pub fn replace(&self, collection: &str, id: &Value, record: Record) -> Result<Option<Record>> {
        self.write_record(collection, id, move |_| record)
    }

    fn write_record<F>(&self, collection: &str, id: &Value, build: F) -> Result<Option<Record>>
    where
        F: FnOnce(&Record) -> Record,
    {
        let updated = {
            let mut collections = self.collections.write();
            let Some(records) = collections.get_mut(collection) else {
                return Ok(None);
            };
            let Some(index) = records.iter().position(|r| has_id(r, id)) else {
                return Ok(None);
            };

            let mut updated = build(&records[index]);
            match record_id(&updated).cloned() {
                Some(new_id) if !values_equal(&new_id, id) => {
                    let taken = records
                        .iter()
                        .enumerate()
                        .any(|(i, r)| i != index && has_id(r, &new_id));
                    if taken {
                        return Err(duplicate(collection, &new_id));
                    }
                }
                Some(_) => {}
                None => updated = with_id(updated, id.clone()),
            }
            records[index] = updated.clone();
            updated
        };

        log::debug!("Updated {collection}/{}", coerce_to_string(id));
        self.persist()?;
        Ok(Some(updated))
    }

    /// Delete the record with `id`. Returns whether a record was deleted.
    pub fn remove(&self, collection: &str, id: &Value) -> Result<bool> {
        let removed = {
            let mut collections = self.collections.write();
            match collections.get_mut(collection) {
                Some(records) => match records.iter().position(|r| has_id(r, id)) {
                    Some(index) => {
                        records.remove(index);
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };

        if removed {
            log::debug!("Removed {collection}/{}", coerce_to_string(id));
            self.persist()?;
        }
        Ok(removed)
    }

    // ── Bulk interchange ─────────────────────────────────────────────

    /// Copy of the full collections map.
    pub fn export(&self) -> Collections {
        self.collections.read().clone()
    }

    /// Replace the full collections map, then persist it.
    pub fn import(&self, collections: Collections) -> Result<()> {
        for (name, records) in &collections {
            for (i, record) in records.iter().enumerate() {
                if let Some(id) = record_id(record) {
                    if records[..i].iter().any(|r| has_id(r, id)) {
                        return Err(duplicate(name, id));
                    }
                }
            }
        }

        let count = collections.len();
        *self.collections.write() = collections;
        log::info!("Imported {count} collection(s) into '{}'", self.key);
        self.persist()
    }

    /// Save the current state through the adapter.
    pub fn persist(&self) -> Result<()> {
        let snapshot = self.collections.read().clone();
        self.adapter
            .save(&self.key, &snapshot)
            .map_err(into_storage_error)
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("key", &self.key)
            .field("adapter", &self.adapter.name())
            .field("collections", &self.collections())
            .finish()
    }
}

fn has_id(record: &Record, id: &Value) -> bool {
    record_id(record).map_or(false, |rid| values_equal(rid, id))
}

/// `1 + max(integral numeric ids)`. Fails instead of wrapping when the
/// largest id is at the edge of the `i64` range.
fn next_id(collection: &str, records: &[Record]) -> Result<Value> {
    // 2^63: the first float beyond i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let exhausted = |id: &Value| {
        StoreError::Other(format!(
            "Cannot generate an id for '{collection}' after {}",
            coerce_to_string(id)
        ))
    };

    let mut max = 0_i64;
    for id in records.iter().filter_map(record_id) {
        let n = match (id.as_i64(), id.as_f64()) {
            (Some(n), _) => n,
            (None, Some(f)) if f.fract() == 0.0 => {
                if !(-LIMIT..LIMIT).contains(&f) {
                    return Err(exhausted(id));
                }
                f as i64
            }
            _ => continue,
        };
        max = max.max(n);
    }
    max.checked_add(1)
        .map(Value::from)
        .ok_or_else(|| exhausted(&Value::from(max)))
}

/// Put `id` first, dropping any null id the record carried.
fn with_id(record: Record, id: Value) -> Record {
    let mut committed = Record::new();
    committed.insert(ID_FIELD.to_string(), id);
    committed.extend(record.into_iter().filter(|(field, _)| field != ID_FIELD));
    committed
}

fn display_id(record: &Record) -> String {
    record_id(record).map(coerce_to_string).unwrap_or_default()
}

fn duplicate(collection: &str, id: &Value) -> StoreError {
    StoreError::DuplicateId {
        collection: collection.to_string(),
        id: coerce_to_string(id),
    }
}

fn into_storage_error(err: StoreError) -> StoreError {
    match err {
        StoreError::Storage(_) => err,
        other => StoreError::Storage(other.to_string()),
    }
}
