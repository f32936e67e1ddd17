use crate::error::{Result, StoreError};
use crate::record::{coerce_to_string, record_id, type_name, values_equal, Record, ID_FIELD};
use crate::schema::{ReferenceAction, Relation, RelationType, SchemaRegistry};
use crate::store::CollectionStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// A relation as declared on one field of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRef {
    pub collection: String,
    pub field: String,
    pub relation: Relation,
}

/// Records that point at another collection's records and must follow them
/// on delete or key change: `collection.field` holds the value of the
/// referenced record's `key` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependent {
    pub collection: String,
    pub field: String,
    pub key: String,
    pub on_delete: Option<ReferenceAction>,
    pub on_update: Option<ReferenceAction>,
    /// Collection whose schema declares the relation
    pub declared_in: String,
}

#[derive(Debug, Default)]
struct RelationGraph {
    forward: BTreeMap<String, Vec<RelationRef>>,
    incoming: BTreeMap<String, Vec<RelationRef>>,
    dependents: BTreeMap<String, Vec<Dependent>>,
}

impl RelationGraph {
    fn build(registry: &SchemaRegistry) -> Self {
        let mut graph = RelationGraph::default();

        for schema in registry.all() {
            let source = schema.name.as_str();
            for (field, relation) in schema.relation_fields() {
                let declared = RelationRef {
                    collection: source.to_string(),
                    field: field.to_string(),
                    relation: relation.clone(),
                };
                graph
                    .forward
                    .entry(source.to_string())
                    .or_default()
                    .push(declared.clone());
                graph
                    .incoming
                    .entry(relation.collection.clone())
                    .or_default()
                    .push(declared);

                for (referenced, dependent) in dependents_of_relation(source, field, relation) {
                    graph.dependents.entry(referenced).or_default().push(dependent);
                }
            }
        }

        graph
    }
}

/// Which records hold a value pointing at which collection, per relation kind.
fn dependents_of_relation(source: &str, field: &str, relation: &Relation) -> Vec<(String, Dependent)> {
    let dependent = |collection: &str, field: &str, key: &str| Dependent {
        collection: collection.to_string(),
        field: field.to_string(),
        key: key.to_string(),
        on_delete: relation.on_delete,
        on_update: relation.on_update,
        declared_in: source.to_string(),
    };
    let target = relation.collection.as_str();

    match relation.relation_type {
        RelationType::ManyToOne | RelationType::OneToOne => {
            vec![(target.to_string(), dependent(source, field, &relation.field))]
        }
        RelationType::OneToMany => {
            vec![(source.to_string(), dependent(target, &relation.field, ID_FIELD))]
        }
        RelationType::ManyToMany => {
            let join = relation.join_collection(source);
            let mut edges = vec![(source.to_string(), dependent(&join, &relation.field, ID_FIELD))];
            if let Some(foreign_field) = &relation.foreign_field {
                edges.push((target.to_string(), dependent(&join, foreign_field, ID_FIELD)));
            }
            edges
        }
    }
}

/// Referential integrity and eager expansion across collections.
///
/// The relation graph is derived from the registry and rebuilt whenever the
/// registry's generation changes.
#[derive(Clone)]
pub struct RelationManager {
    registry: SchemaRegistry,
    store: CollectionStore,
    graph: Arc<Mutex<Option<(u64, Arc<RelationGraph>)>>>,
}

impl RelationManager {
    pub fn new(registry: SchemaRegistry, store: CollectionStore) -> Self {
        RelationManager {
            registry,
            store,
            graph: Arc::new(Mutex::new(None)),
        }
    }

    fn graph(&self) -> Arc<RelationGraph> {
        let generation = self.registry.generation();
        let mut cached = self.graph.lock();
        match cached.as_ref() {
            Some((built_at, graph)) if *built_at == generation => graph.clone(),
            _ => {
                log::debug!("Rebuilding relation graph for schema generation {generation}");
                let graph = Arc::new(RelationGraph::build(&self.registry));
                *cached = Some((generation, graph.clone()));
                graph
            }
        }
    }

    // ── Graph ────────────────────────────────────────────────────────

    /// Relations declared by the fields of `collection`.
    pub fn relations_of(&self, collection: &str) -> Vec<RelationRef> {
        self.graph().forward.get(collection).cloned().unwrap_or_default()
    }

    /// Relations, declared anywhere, whose target is `collection`.
    pub fn references_to(&self, collection: &str) -> Vec<RelationRef> {
        self.graph().incoming.get(collection).cloned().unwrap_or_default()
    }

    /// Everything that must react when a record of `collection` is deleted
    /// or changes a key.
    pub fn dependents_of(&self, collection: &str) -> Vec<Dependent> {
        self.graph().dependents.get(collection).cloned().unwrap_or_default()
    }

    // ── Delete ───────────────────────────────────────────────────────

    /// False iff a `restrict` dependent currently points at the record.
    /// Without a stored record only dependents keyed on `id` can be checked.
    pub fn can_delete(&self, collection: &str, id: &Value) -> bool {
        let record = self.store.get_by_id(collection, id).unwrap_or_else(|| {
            let mut bare = Record::new();
            bare.insert(ID_FIELD.to_string(), id.clone());
            bare
        });
        self.restricting(collection, &record).is_none()
    }

    /// Delete a record after applying every `on_delete` policy that points
    /// at it. Returns whether the record existed.
    ///
    /// Cascaded deletes go through this same path, so they are themselves
    /// subject to restrict checks and further cascades. Steps already applied
    /// are not undone when a later one fails.
    pub fn delete(&self, collection: &str, id: &Value) -> Result<bool> {
        let mut visited = HashSet::new();
        self.delete_visiting(collection, id, &mut visited)
    }

    /// Apply the `on_delete` policies pointing at a record without removing
    /// the record itself.
    pub fn cascade_delete(&self, collection: &str, id: &Value) -> Result<()> {
        let Some(record) = self.store.get_by_id(collection, id) else {
            return Ok(());
        };
        let mut visited = HashSet::from([visit_key(collection, id)]);
        self.apply_delete_policies(collection, &record, &mut visited)
    }

    fn delete_visiting(&self, collection: &str, id: &Value, visited: &mut HashSet<String>) -> Result<bool> {
        let Some(record) = self.store.get_by_id(collection, id) else {
            return Ok(false);
        };
        if !visited.insert(visit_key(collection, id)) {
            log::warn!(
                "Skipping {collection}/{}: already visited in this cascade",
                coerce_to_string(id)
            );
            return Ok(false);
        }

        if let Some(blocker) = self.restricting(collection, &record) {
            return Err(StoreError::ReferentialIntegrity(format!(
                "Cannot delete {collection}/{}: referenced by {}.{}",
                coerce_to_string(id),
                blocker.collection,
                blocker.field
            )));
        }

        self.apply_delete_policies(collection, &record, visited)?;
        self.store.remove(collection, id)
    }

    fn restricting(&self, collection: &str, record: &Record) -> Option<Dependent> {
        self.dependents_of(collection).into_iter().find(|dep| {
            dep.on_delete == Some(ReferenceAction::Restrict)
                && linked_value(record, &dep.key)
                    .map_or(false, |value| !self.store.find_by(&dep.collection, &dep.field, value).is_empty())
        })
    }

    fn apply_delete_policies(&self, collection: &str, record: &Record, visited: &mut HashSet<String>) -> Result<()> {
        for dep in self.dependents_of(collection) {
            let Some(action) = dep.on_delete else {
                continue;
            };
            let Some(value) = linked_value(record, &dep.key) else {
                continue;
            };

            let matches = self.store.find_by(&dep.collection, &dep.field, value);
            if matches.is_empty() {
                continue;
            }
            log::debug!(
                "Applying {action:?} to {} record(s) of {} for {collection}",
                matches.len(),
                dep.collection
            );

            for referencing in &matches {
                let Some(referencing_id) = record_id(referencing) else {
                    log::warn!("Record without id in {} left untouched by cascade", dep.collection);
                    continue;
                };
                match action {
                    ReferenceAction::Cascade => {
                        self.delete_visiting(&dep.collection, referencing_id, visited)?;
                    }
                    ReferenceAction::SetNull => {
                        self.set_field(&dep, referencing_id, Value::Null)?;
                    }
                    ReferenceAction::SetDefault => {
                        let default = self.default_for(&dep);
                        self.set_field(&dep, referencing_id, default)?;
                    }
                    ReferenceAction::Restrict => {}
                }
            }
        }
        Ok(())
    }

    // ── Update ───────────────────────────────────────────────────────

    /// Propagate an id change to every dependent keyed on `id`.
    /// Returns the number of records rewritten.
    pub fn cascade_update(&self, collection: &str, old_id: &Value, new_id: &Value) -> Result<usize> {
        let deps: Vec<Dependent> = self
            .dependents_of(collection)
            .into_iter()
            .filter(|dep| dep.key == ID_FIELD)
            .collect();
        self.propagate_key_change(deps.iter().map(|dep| (dep, old_id, new_id.clone())))
    }

    /// Propagate every key change between two versions of a record: each
    /// dependent whose key field differs gets its `on_update` policy.
    /// A `restrict` dependent still pointing at the old value fails the
    /// whole call before anything is rewritten.
    pub fn cascade_key_changes(&self, collection: &str, old: &Record, new: &Record) -> Result<usize> {
        let deps = self.dependents_of(collection);
        self.propagate_key_change(key_changes(&deps, old, new))
    }

    /// The restrict half of `cascade_key_changes`: fails exactly when it
    /// would, without rewriting anything.
    pub fn check_key_changes(&self, collection: &str, old: &Record, new: &Record) -> Result<()> {
        let deps = self.dependents_of(collection);
        self.plan_key_change(key_changes(&deps, old, new))?;
        Ok(())
    }

    fn propagate_key_change<'a>(
        &self,
        changes: impl Iterator<Item = (&'a Dependent, &'a Value, Value)>,
    ) -> Result<usize> {
        let pending = self.plan_key_change(changes)?;

        let mut rewritten = 0;
        for (dep, action, new_value, matches) in pending {
            for referencing in &matches {
                let Some(referencing_id) = record_id(referencing) else {
                    continue;
                };
                let value = match action {
                    ReferenceAction::Cascade => new_value.clone(),
                    ReferenceAction::SetNull => Value::Null,
                    ReferenceAction::SetDefault => self.default_for(dep),
                    ReferenceAction::Restrict => continue,
                };
                if self.set_field(dep, referencing_id, value)? {
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }

    /// Records each dependent will rewrite, or the first restrict violation.
    fn plan_key_change<'a>(
        &self,
        changes: impl Iterator<Item = (&'a Dependent, &'a Value, Value)>,
    ) -> Result<Vec<PendingRewrite<'a>>> {
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for (dep, old_value, new_value) in changes {
            let Some(action) = dep.on_update else {
                continue;
            };
            // a relation declared from both sides yields the same dependent twice
            if !seen.insert((dep.collection.as_str(), dep.field.as_str(), dep.key.as_str())) {
                continue;
            }
            let matches = self.store.find_by(&dep.collection, &dep.field, old_value);
            if matches.is_empty() {
                continue;
            }
            if action == ReferenceAction::Restrict {
                return Err(StoreError::ReferentialIntegrity(format!(
                    "Cannot change {}: referenced by {}.{}",
                    coerce_to_string(old_value),
                    dep.collection,
                    dep.field
                )));
            }
            pending.push((dep, action, new_value, matches));
        }
        Ok(pending)
    }

    fn set_field(&self, dep: &Dependent, id: &Value, value: Value) -> Result<bool> {
        let mut patch = Record::new();
        patch.insert(dep.field.clone(), value);
        Ok(self.store.update(&dep.collection, id, &patch)?.is_some())
    }

    /// Declared default of the dependent field, evaluated fresh; null when
    /// the dependent collection has no schema or no default.
    fn default_for(&self, dep: &Dependent) -> Value {
        self.registry
            .get(&dep.collection)
            .and_then(|schema| schema.get_field(&dep.field).map(|def| def.default_or_null()))
            .unwrap_or(Value::Null)
    }

    // ── Expansion ────────────────────────────────────────────────────

    /// Replace relation fields with the related record(s). Related records
    /// are themselves expanded while `depth` allows.
    pub fn expand(&self, collection: &str, record: &Record, depth: usize) -> Record {
        if depth == 0 {
            return record.clone();
        }
        let mut expanded = record.clone();

        for RelationRef { field, relation, .. } in self.relations_of(collection) {
            let target = relation.collection.as_str();
            let nested = |related: Record| self.expand(target, &related, depth - 1);

            match relation.relation_type {
                RelationType::OneToOne | RelationType::ManyToOne => {
                    let Some(value) = linked_value(record, &field) else {
                        continue;
                    };
                    if let Some(related) = self.store.find_by(target, &relation.field, value).into_iter().next() {
                        expanded.insert(field, Value::Object(nested(related)));
                    }
                }
                RelationType::OneToMany => {
                    let Some(id) = record_id(record) else {
                        continue;
                    };
                    let related = self.store.find_by(target, &relation.field, id);
                    expanded.insert(field, to_array(related.into_iter().map(nested)));
                }
                RelationType::ManyToMany => {
                    let (Some(id), Some(foreign_field)) = (record_id(record), relation.foreign_field.as_deref()) else {
                        continue;
                    };
                    let join = relation.join_collection(collection);
                    if !self.store.has_collection(&join) {
                        log::debug!("Join collection '{join}' missing; leaving {collection}.{field} as is");
                        continue;
                    }
                    let related = self
                        .store
                        .find_by(&join, &relation.field, id)
                        .iter()
                        .filter_map(|row| linked_value(row, foreign_field))
                        .filter_map(|related_id| self.store.get_by_id(target, related_id))
                        .collect::<Vec<_>>();
                    expanded.insert(field, to_array(related.into_iter().map(nested)));
                }
            }
        }

        expanded
    }
}

type PendingRewrite<'a> = (&'a Dependent, ReferenceAction, Value, Vec<Record>);

/// Dependents whose key field differs between `old` and `new`, with the old
/// and new key values.
fn key_changes<'a>(
    deps: &'a [Dependent],
    old: &'a Record,
    new: &'a Record,
) -> impl Iterator<Item = (&'a Dependent, &'a Value, Value)> + 'a {
    deps.iter().filter_map(move |dep| {
        let old_value = linked_value(old, &dep.key)?;
        let new_value = new.get(&dep.key).cloned().unwrap_or(Value::Null);
        (!values_equal(old_value, &new_value)).then_some((dep, old_value, new_value))
    })
}

fn linked_value<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    record.get(field).filter(|v| !v.is_null())
}

fn visit_key(collection: &str, id: &Value) -> String {
    format!("{collection}/{}:{}", type_name(id), coerce_to_string(id))
}

fn to_array(records: impl Iterator<Item = Record>) -> Value {
    Value::Array(records.map(Value::Object).collect())
}
