//! Result population.
//!
//! Turns raw executor rows into the query's result shape: shared records or
//! raw rows, optionally indexed by an attribute, de-duplicated when joins
//! fanned the primary table out, and with every requested relation eagerly
//! resolved before the result is returned.

use crate::error::AnchorError;
use crate::executor::AnchorExecutor;
use crate::identity_map::IdentityMap;
use crate::query::active::{ActiveQuery, IndexBy};
use crate::record::{Record, RecordRef};
use crate::relation::eager::{self, Parents};
use crate::value::{row_get, value_signature, Row};
use sea_query::Value;
use std::collections::HashSet;

/// The populated result of a query.
pub enum ResultSet {
    Records(Vec<RecordRef>),
    IndexedRecords(Vec<(String, RecordRef)>),
    Rows(Vec<Row>),
    IndexedRows(Vec<(String, Row)>),
}

impl ResultSet {
    pub fn len(&self) -> usize {
        match self {
            ResultSet::Records(items) => items.len(),
            ResultSet::IndexedRecords(items) => items.len(),
            ResultSet::Rows(items) => items.len(),
            ResultSet::IndexedRows(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records of a record-mode result; empty for array-mode results.
    pub fn records(&self) -> Vec<RecordRef> {
        match self {
            ResultSet::Records(items) => items.clone(),
            ResultSet::IndexedRecords(items) => {
                items.iter().map(|(_, record)| record.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Rows of an array-mode result; empty for record-mode results.
    pub fn rows(self) -> Vec<Row> {
        match self {
            ResultSet::Rows(items) => items,
            ResultSet::IndexedRows(items) => items.into_iter().map(|(_, row)| row).collect(),
            _ => Vec::new(),
        }
    }

    /// Index keys of an indexed result, aligned with item order.
    pub fn keys(&self) -> Vec<String> {
        match self {
            ResultSet::IndexedRecords(items) => items.iter().map(|(key, _)| key.clone()).collect(),
            ResultSet::IndexedRows(items) => items.iter().map(|(key, _)| key.clone()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Render an attribute value as an index key. Strings index by their text,
/// integers by their decimal form, everything else by its signature.
pub fn index_key(value: &Value) -> String {
    match value {
        Value::String(Some(s)) => s.clone(),
        Value::Char(Some(c)) => c.to_string(),
        Value::Bool(Some(b)) => b.to_string(),
        Value::TinyInt(Some(i)) => i.to_string(),
        Value::SmallInt(Some(i)) => i.to_string(),
        Value::Int(Some(i)) => i.to_string(),
        Value::BigInt(Some(i)) => i.to_string(),
        Value::TinyUnsigned(Some(u)) => u.to_string(),
        Value::SmallUnsigned(Some(u)) => u.to_string(),
        Value::Unsigned(Some(u)) => u.to_string(),
        Value::BigUnsigned(Some(u)) => u.to_string(),
        other => value_signature(other),
    }
}

fn key_for_row(row: &Row, index_by: &IndexBy) -> Result<String, AnchorError> {
    match index_by {
        IndexBy::Column(attribute) => match row_get(row, attribute) {
            Some(value) => Ok(index_key(value)),
            None => Err(AnchorError::Parse(format!(
                "index attribute `{}` missing from result row",
                attribute
            ))),
        },
        IndexBy::Key(key) => Ok(key(row)),
    }
}

/// Populate raw rows into the query's result shape.
pub fn populate(
    query: &ActiveQuery,
    rows: Vec<Row>,
    executor: &dyn AnchorExecutor,
) -> Result<ResultSet, AnchorError> {
    if query.as_array {
        let mut rows = rows;
        if !query.with.is_empty() {
            let mut parents = Parents::Rows(&mut rows);
            eager::eager_load(&query.schema, &mut parents, &query.with, executor)?;
        }
        return match &query.index_by {
            Some(index_by) => {
                let mut indexed = Vec::with_capacity(rows.len());
                for row in rows {
                    let key = key_for_row(&row, index_by)?;
                    indexed.push((key, row));
                }
                Ok(ResultSet::IndexedRows(indexed))
            }
            None => Ok(ResultSet::Rows(rows)),
        };
    }

    let mut records: Vec<RecordRef> = rows
        .iter()
        .map(|row| Record::shared_from_row(query.schema.clone(), row))
        .collect();

    let map = IdentityMap::global();
    if map.is_enabled() {
        for record in &records {
            map.remember(record);
        }
    }

    // Joins fan the primary table out into one row per joined match; collapse
    // back to distinct records by primary key, keeping first occurrences.
    // Indexed results collapse through their keys instead.
    if !query.joins.is_empty() && query.index_by.is_none() {
        let mut seen = HashSet::new();
        let mut distinct = Vec::with_capacity(records.len());
        for record in records {
            let signature = record
                .read()
                .map_err(|_| AnchorError::execution("record lock poisoned"))?
                .pk_signature();
            match signature {
                Some(signature) => {
                    if seen.insert(signature) {
                        distinct.push(record);
                    }
                }
                None => distinct.push(record),
            }
        }
        records = distinct;
    }

    if !query.with.is_empty() {
        let mut parents = Parents::Records(&records);
        eager::eager_load(&query.schema, &mut parents, &query.with, executor)?;
    }

    // The hook runs once per record in row order, and only after every
    // requested relation is resolved, so it can read the relation cache.
    for record in &records {
        let schema = query.schema.clone();
        let mut guard = record
            .write()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        schema.after_find(&mut guard);
    }

    match &query.index_by {
        Some(index_by) => {
            let mut indexed = Vec::with_capacity(records.len());
            for record in records {
                let key = {
                    let guard = record
                        .read()
                        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                    key_for_row(guard.attributes(), index_by)?
                };
                indexed.push((key, record));
            }
            Ok(ResultSet::IndexedRecords(indexed))
        }
        None => Ok(ResultSet::Records(records)),
    }
}
