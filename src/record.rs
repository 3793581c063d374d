//! Dynamic records.
//!
//! A record is an attribute map bound to a schema, with dirty tracking
//! against the attribute snapshot taken when the record was last loaded or
//! saved, and a tagged relation cache. Absence of a cache entry means the
//! relation has not been resolved; a present entry, even an empty one, is a
//! resolved result and is returned without touching the executor again.
//!
//! Records are shared as `RecordRef` so that a record reached through two
//! different relation paths can be the same instance, which is what makes
//! inverse-relation backfill observable as pointer identity.

use crate::error::AnchorError;
use crate::executor::AnchorExecutor;
use crate::query::cond::Cond;
use crate::query::spec::QuerySpec;
use crate::schema::{primary_key_of, AnchorSchema};
use crate::value::{key_signature, Row};
use sea_query::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Shared handle to a record.
pub type RecordRef = Arc<RwLock<Record>>;

/// Pointer identity of two record handles.
pub fn record_ptr_eq(a: &RecordRef, b: &RecordRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// An ordered collection of records, optionally indexed.
#[derive(Clone, Debug, Default)]
pub struct RecordSet {
    items: Vec<RecordRef>,
    /// Index keys aligned with `items`, present when the producing query was
    /// indexed.
    keys: Option<Vec<String>>,
}

impl RecordSet {
    pub fn new() -> Self {
        RecordSet::default()
    }

    pub fn from_items(items: Vec<RecordRef>) -> Self {
        RecordSet { items, keys: None }
    }

    pub fn push(&mut self, record: RecordRef) {
        self.items.push(record);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[RecordRef] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecordRef> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&RecordRef> {
        self.items.get(index)
    }

    /// Attach index keys produced by an indexed query. Keys must align with
    /// the item order.
    pub fn set_keys(&mut self, keys: Vec<String>) {
        self.keys = Some(keys);
    }

    /// Look a record up by its index key, when the set is indexed.
    pub fn by_key(&self, key: &str) -> Option<&RecordRef> {
        let keys = self.keys.as_ref()?;
        let position = keys.iter().position(|k| k == key)?;
        self.items.get(position)
    }

    /// Remove every record that is pointer-identical to `target`.
    pub fn remove_ptr(&mut self, target: &RecordRef) {
        let mut index = 0;
        while index < self.items.len() {
            if record_ptr_eq(&self.items[index], target) {
                self.items.remove(index);
                if let Some(keys) = &mut self.keys {
                    if index < keys.len() {
                        keys.remove(index);
                    }
                }
            } else {
                index += 1;
            }
        }
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a RecordRef;
    type IntoIter = std::slice::Iter<'a, RecordRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A resolved relation value, tagged with its cardinality.
#[derive(Clone, Debug)]
pub enum RelatedValue {
    One(Option<RecordRef>),
    Many(RecordSet),
}

impl RelatedValue {
    /// Wrap a batch of resolved records per the relation's cardinality.
    pub fn wrap(multiple: bool, records: Vec<RecordRef>) -> Self {
        if multiple {
            RelatedValue::Many(RecordSet::from_items(records))
        } else {
            RelatedValue::One(records.into_iter().next())
        }
    }

    /// Empty value of the given cardinality.
    pub fn empty(multiple: bool) -> Self {
        RelatedValue::wrap(multiple, Vec::new())
    }

    pub fn as_one(&self) -> Option<&RecordRef> {
        match self {
            RelatedValue::One(record) => record.as_ref(),
            RelatedValue::Many(set) => set.get(0),
        }
    }

    pub fn records(&self) -> Vec<RecordRef> {
        match self {
            RelatedValue::One(Some(record)) => vec![record.clone()],
            RelatedValue::One(None) => Vec::new(),
            RelatedValue::Many(set) => set.items().to_vec(),
        }
    }
}

/// A schema-bound attribute map with dirty tracking and a relation cache.
pub struct Record {
    schema: Arc<dyn AnchorSchema>,
    attributes: Row,
    /// Snapshot from the last load or save; `None` marks a new record.
    old_attributes: Option<Row>,
    related: HashMap<String, RelatedValue>,
}

impl Record {
    /// A new, unpersisted record.
    pub fn new(schema: Arc<dyn AnchorSchema>) -> Self {
        Record {
            schema,
            attributes: Row::new(),
            old_attributes: None,
            related: HashMap::new(),
        }
    }

    /// Instantiate a record from a result row. The schema's `after_find`
    /// hook fires during result population, after relations are resolved,
    /// not here.
    pub fn from_row(schema: Arc<dyn AnchorSchema>, row: &Row) -> Self {
        Record {
            schema,
            attributes: row.clone(),
            old_attributes: Some(row.clone()),
            related: HashMap::new(),
        }
    }

    /// Like [`Record::from_row`], returning a shared handle.
    pub fn shared_from_row(schema: Arc<dyn AnchorSchema>, row: &Row) -> RecordRef {
        Arc::new(RwLock::new(Record::from_row(schema, row)))
    }

    pub fn schema(&self) -> &Arc<dyn AnchorSchema> {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        self.schema.table_name()
    }

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn get_value(&self, attribute: &str) -> Option<Value> {
        self.attributes.get(attribute).cloned()
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: Value) {
        self.attributes.insert(attribute.into(), value);
    }

    pub fn is_new_record(&self) -> bool {
        self.old_attributes.is_none()
    }

    /// Whether `attrs` is exactly this record's primary key (as a set).
    pub fn is_primary_key(&self, attrs: &[String]) -> bool {
        let pk = self.schema.primary_key();
        if pk.is_empty() || pk.len() != attrs.len() {
            return false;
        }
        pk.iter().all(|name| attrs.iter().any(|a| a == name))
    }

    /// Primary key values, in declaration order.
    ///
    /// Fails with a configuration error when the schema declares no primary
    /// key, and with a call error when a key attribute is unset.
    pub fn primary_key_values(&self) -> Result<Vec<(String, Value)>, AnchorError> {
        let pk = primary_key_of(&self.schema);
        if pk.is_empty() {
            return Err(AnchorError::config(format!(
                "table `{}` has no primary key",
                self.table_name()
            )));
        }
        let mut values = Vec::with_capacity(pk.len());
        for name in pk {
            match self.attributes.get(&name) {
                Some(value) => values.push((name, value.clone())),
                None => {
                    return Err(AnchorError::call(format!(
                        "primary key attribute `{}` of `{}` is unset",
                        name,
                        self.table_name()
                    )))
                }
            }
        }
        Ok(values)
    }

    /// Deterministic signature of the primary key, used for de-duplication
    /// and identity-map keys. `None` when any key attribute is unset.
    pub fn pk_signature(&self) -> Option<String> {
        let pk = primary_key_of(&self.schema);
        if pk.is_empty() {
            return None;
        }
        if pk.iter().any(|name| !self.attributes.contains_key(name)) {
            return None;
        }
        key_signature(&self.attributes, &pk)
    }

    /// Attributes changed since the last load or save. Every set attribute
    /// counts for a new record.
    pub fn dirty_attributes(&self) -> Row {
        match &self.old_attributes {
            None => self.attributes.clone(),
            Some(old) => self
                .attributes
                .iter()
                .filter(|(name, value)| old.get(*name) != Some(*value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    fn mark_old(&mut self) {
        self.old_attributes = Some(self.attributes.clone());
    }

    fn pk_condition(&self, source: &Row) -> Result<Cond, AnchorError> {
        let pk = primary_key_of(&self.schema);
        if pk.is_empty() {
            return Err(AnchorError::config(format!(
                "table `{}` has no primary key",
                self.table_name()
            )));
        }
        let mut cond: Option<Cond> = None;
        for name in pk {
            let value = source.get(&name).cloned().ok_or_else(|| {
                AnchorError::call(format!(
                    "primary key attribute `{}` of `{}` is unset",
                    name,
                    self.table_name()
                ))
            })?;
            let eq = Cond::eq(name, value);
            cond = Some(match cond {
                Some(existing) => existing.and(eq),
                None => eq,
            });
        }
        // pk is non-empty, so cond is set.
        cond.ok_or_else(|| AnchorError::config("empty primary key condition"))
    }

    /// Insert or update through the executor. Updates write only dirty
    /// attributes and address the row by the primary key snapshot, so key
    /// changes update the right row.
    pub fn save(&mut self, executor: &dyn AnchorExecutor) -> Result<(), AnchorError> {
        if self.is_new_record() {
            let table = self.table_name().to_string();
            executor.insert(&table, &self.attributes)?;
            self.mark_old();
            return Ok(());
        }
        let dirty = self.dirty_attributes();
        if dirty.is_empty() {
            return Ok(());
        }
        let old = self
            .old_attributes
            .clone()
            .ok_or_else(|| AnchorError::call("update on a new record"))?;
        let cond = self.pk_condition(&old)?;
        let table = self.table_name().to_string();
        executor.update(&table, &dirty, &cond)?;
        self.mark_old();
        Ok(())
    }

    /// Re-read the record by primary key, discarding attribute changes and
    /// the relation cache. Returns `false` when the row no longer exists.
    pub fn refresh(&mut self, executor: &dyn AnchorExecutor) -> Result<bool, AnchorError> {
        let cond = self.pk_condition(&self.attributes.clone())?;
        let mut spec = QuerySpec::new(self.table_name());
        spec.cond = Some(cond);
        spec.limit = Some(1);
        let rows = executor.query(&spec)?;
        match rows.into_iter().next() {
            Some(row) => {
                self.attributes = row;
                self.mark_old();
                self.related.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete the row addressed by the primary key.
    pub fn delete(&mut self, executor: &dyn AnchorExecutor) -> Result<u64, AnchorError> {
        let old = self.old_attributes.clone().unwrap_or_else(|| self.attributes.clone());
        let cond = self.pk_condition(&old)?;
        let table = self.table_name().to_string();
        let affected = executor.delete(&table, &cond)?;
        self.old_attributes = None;
        Ok(affected)
    }

    /// Store a resolved relation value in the cache, overwriting any
    /// previous entry.
    pub fn populate_relation(&mut self, name: impl Into<String>, value: RelatedValue) {
        self.related.insert(name.into(), value);
    }

    /// A cached relation value; `None` means unresolved, not empty.
    pub fn related(&self, name: &str) -> Option<&RelatedValue> {
        self.related.get(name)
    }

    pub fn related_cloned(&self, name: &str) -> Option<RelatedValue> {
        self.related.get(name).cloned()
    }

    /// Drop one cached relation, forcing re-resolution on next access.
    pub fn unset_relation(&mut self, name: &str) {
        self.related.remove(name);
    }

    /// Names of all cached relations.
    pub fn related_names(&self) -> Vec<String> {
        self.related.keys().cloned().collect()
    }
}

impl fmt::Debug for Record {
    // Inverse backfill makes parent and child reference each other, so the
    // cached relation values must not be rendered; only their names are.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut related: Vec<&String> = self.related.keys().collect();
        related.sort();
        f.debug_struct("Record")
            .field("table", &self.table_name())
            .field("attributes", &self.attributes)
            .field("related", &related)
            .finish()
    }
}
