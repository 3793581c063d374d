//! Batched eager loading.
//!
//! Uses the "select in" strategy: after the primary batch is fetched, each
//! requested relation is resolved with one additional query filtered by the
//! de-duplicated key set of the whole batch, then fanned back out to the
//! parents through bucket maps keyed by deterministic key signatures. A
//! junction relation adds one junction query ahead of the target query; a
//! relation routed through another declared relation resolves the hop
//! recursively, so the hop stays cached on the parents. An empty key set at
//! any stage short-circuits the remaining queries and assigns empty results.
//!
//! Buckets are built in fetch order and assignment is per parent, so a
//! single-valued relation that matches several rows keeps the first one and
//! every parent with no bucket entry gets an explicit empty value, never an
//! unresolved cache slot.

use crate::error::AnchorError;
use crate::executor::AnchorExecutor;
use crate::query::active::{via_junction, ActiveQuery, QueryConstraint, WithSpec};
use crate::query::cond::Cond;
use crate::query::populate::ResultSet;
use crate::query::spec::QuerySpec;
use crate::record::{RecordRef, RecordSet, RelatedValue};
use crate::relation::def::{RelationDef, Via};
use crate::schema::{resolve_relation, AnchorSchema};
use crate::value::{row_get, row_to_json, value_as_list, value_is_null, value_signature, Row};
use sea_query::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The batch being populated: shared records, or raw rows in array mode.
pub enum Parents<'a> {
    Records(&'a [RecordRef]),
    Rows(&'a mut Vec<Row>),
}

/// Signature of a composite key requiring every attribute present and
/// non-null. Bucketing must not key rows on partial keys.
fn strict_signature(row: &Row, attrs: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(attrs.len());
    for attr in attrs {
        match row_get(row, attr) {
            Some(value) if !value_is_null(value) => parts.push(value_signature(value)),
            _ => return None,
        }
    }
    Some(parts.join("|"))
}

/// De-duplicated key tuples of a batch. Rows with a missing or null key
/// attribute contribute nothing; a single-attribute list value (JSON array
/// foreign key) expands into one tuple per element.
fn key_tuples(rows: &[Row], attrs: &[String]) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut tuples = Vec::new();
    let push = |tuple: Vec<Value>, seen: &mut HashSet<String>, tuples: &mut Vec<Vec<Value>>| {
        let signature = tuple
            .iter()
            .map(value_signature)
            .collect::<Vec<_>>()
            .join("|");
        if seen.insert(signature) {
            tuples.push(tuple);
        }
    };
    for row in rows {
        if attrs.len() == 1 {
            let value = match row_get(row, &attrs[0]) {
                Some(value) if !value_is_null(value) => value,
                _ => continue,
            };
            match value_as_list(value) {
                Some(items) => {
                    for item in items {
                        if !value_is_null(&item) {
                            push(vec![item], &mut seen, &mut tuples);
                        }
                    }
                }
                None => push(vec![value.clone()], &mut seen, &mut tuples),
            }
        } else {
            let mut tuple = Vec::with_capacity(attrs.len());
            let mut complete = true;
            for attr in attrs {
                match row_get(row, attr) {
                    Some(value) if !value_is_null(value) => tuple.push(value.clone()),
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                push(tuple, &mut seen, &mut tuples);
            }
        }
    }
    tuples
}

fn in_filter(mut columns: Vec<String>, tuples: Vec<Vec<Value>>, qualify: Option<&str>) -> Cond {
    if let Some(alias) = qualify {
        columns = columns
            .into_iter()
            .map(|column| {
                if column.contains('.') {
                    column
                } else {
                    format!("{}.{}", alias, column)
                }
            })
            .collect();
    }
    Cond::In(columns, tuples)
}

/// Link filter for a batch of parents, running the junction query first for
/// `via` relations. `None` means the key set is empty at some stage and the
/// relation is known to resolve empty without querying the target.
pub(crate) fn link_filter_for_parents(
    def: &RelationDef,
    parents: &[Row],
    qualify: Option<&str>,
    executor: &dyn AnchorExecutor,
) -> Result<Option<Cond>, AnchorError> {
    match via_junction(def) {
        None => {
            let tuples = key_tuples(parents, &def.local_attrs());
            if tuples.is_empty() {
                return Ok(None);
            }
            Ok(Some(in_filter(def.foreign_attrs(), tuples, qualify)))
        }
        Some((table, via_link, via_filter)) => {
            let junction_rows =
                query_junction(&table, &via_link, via_filter, parents, executor)?;
            let junction_rows = match junction_rows {
                Some(rows) => rows,
                None => return Ok(None),
            };
            let tuples = key_tuples(&junction_rows, &def.local_attrs());
            if tuples.is_empty() {
                return Ok(None);
            }
            Ok(Some(in_filter(def.foreign_attrs(), tuples, qualify)))
        }
    }
}

/// Link filter derived from already-fetched junction rows. `None` when the
/// junction key set is empty.
pub(crate) fn link_filter_for_junction_rows(
    def: &RelationDef,
    junction_rows: &[Row],
    qualify: Option<&str>,
) -> Option<Cond> {
    let tuples = key_tuples(junction_rows, &def.local_attrs());
    if tuples.is_empty() {
        None
    } else {
        Some(in_filter(def.foreign_attrs(), tuples, qualify))
    }
}

/// Fetch junction rows matching the parents' key set. `None` when the key
/// set or the junction result is empty.
fn query_junction(
    table: &str,
    via_link: &[(String, String)],
    via_filter: Option<Cond>,
    parents: &[Row],
    executor: &dyn AnchorExecutor,
) -> Result<Option<Vec<Row>>, AnchorError> {
    let owner_attrs: Vec<String> = via_link.iter().map(|(_, owner)| owner.clone()).collect();
    let junction_cols: Vec<String> = via_link
        .iter()
        .map(|(junction, _)| junction.clone())
        .collect();
    let tuples = key_tuples(parents, &owner_attrs);
    if tuples.is_empty() {
        return Ok(None);
    }
    let mut spec = QuerySpec::new(table);
    spec.cond = Cond::merge(via_filter, Some(Cond::In(junction_cols, tuples)));
    let rows = executor.query(&spec)?;
    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(rows))
}

struct WithGroup {
    name: String,
    constrain: Option<QueryConstraint>,
    tails: Vec<WithSpec>,
}

/// Group eager-load requests by head segment, preserving request order.
/// `"orders"` and `"orders.items"` share one group so the shared prefix is
/// resolved once.
fn group_with(with: &[WithSpec]) -> Vec<WithGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, WithGroup> = HashMap::new();
    for spec in with {
        let (head, tail) = match spec.name.split_once('.') {
            Some((head, tail)) => (head.to_string(), Some(tail.to_string())),
            None => (spec.name.clone(), None),
        };
        let group = groups.entry(head.clone()).or_insert_with(|| {
            order.push(head.clone());
            WithGroup {
                name: head.clone(),
                constrain: None,
                tails: Vec::new(),
            }
        });
        match tail {
            Some(tail) => group.tails.push(WithSpec {
                name: tail,
                constrain: spec.constrain.clone(),
            }),
            None => {
                if spec.constrain.is_some() {
                    group.constrain = spec.constrain.clone();
                }
            }
        }
    }
    order
        .into_iter()
        .filter_map(|name| groups.remove(&name))
        .collect()
}

/// Resolve every requested relation for the batch, one relation at a time.
pub fn eager_load(
    schema: &Arc<dyn AnchorSchema>,
    parents: &mut Parents<'_>,
    with: &[WithSpec],
    executor: &dyn AnchorExecutor,
) -> Result<(), AnchorError> {
    let empty = match parents {
        Parents::Records(records) => records.is_empty(),
        Parents::Rows(rows) => rows.is_empty(),
    };
    if empty {
        return Ok(());
    }
    for group in group_with(with) {
        let def = resolve_relation(schema, &group.name)?;
        let mut query = ActiveQuery::from_relation(def);
        query.with.extend(group.tails);
        if let Some(constrain) = &group.constrain {
            (constrain)(&mut query);
        }
        if matches!(parents, Parents::Rows(_)) {
            query.as_array = true;
        }
        resolve_batch(&group.name, query, parents, executor)?;
    }
    Ok(())
}

fn parent_rows(parents: &Parents<'_>) -> Result<Vec<Row>, AnchorError> {
    match parents {
        Parents::Records(records) => {
            let mut rows = Vec::with_capacity(records.len());
            for record in records.iter() {
                let guard = record
                    .read()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                rows.push(guard.attributes().clone());
            }
            Ok(rows)
        }
        Parents::Rows(rows) => Ok((**rows).clone()),
    }
}

fn assign_empty(
    name: &str,
    multiple: bool,
    parents: &mut Parents<'_>,
) -> Result<(), AnchorError> {
    match parents {
        Parents::Records(records) => {
            for record in records.iter() {
                let mut guard = record
                    .write()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                guard.populate_relation(name, RelatedValue::empty(multiple));
            }
        }
        Parents::Rows(rows) => {
            let empty = if multiple {
                Value::Json(Some(Box::new(serde_json::Value::Array(Vec::new()))))
            } else {
                Value::Json(Some(Box::new(serde_json::Value::Null)))
            };
            for row in rows.iter_mut() {
                row.insert(name.to_string(), empty.clone());
            }
        }
    }
    Ok(())
}

enum RelatedItems {
    Records(Vec<RecordRef>, Option<Vec<String>>),
    Rows(Vec<Row>, Option<Vec<String>>),
}

impl RelatedItems {
    fn len(&self) -> usize {
        match self {
            RelatedItems::Records(items, _) => items.len(),
            RelatedItems::Rows(items, _) => items.len(),
        }
    }

    fn row_of(&self, index: usize) -> Result<Row, AnchorError> {
        match self {
            RelatedItems::Records(items, _) => {
                let guard = items[index]
                    .read()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                Ok(guard.attributes().clone())
            }
            RelatedItems::Rows(items, _) => Ok(items[index].clone()),
        }
    }

    fn key_of(&self, index: usize) -> Option<String> {
        let keys = match self {
            RelatedItems::Records(_, keys) => keys,
            RelatedItems::Rows(_, keys) => keys,
        };
        keys.as_ref().map(|keys| keys[index].clone())
    }
}

fn related_items(result: ResultSet) -> RelatedItems {
    match result {
        ResultSet::Records(items) => RelatedItems::Records(items, None),
        ResultSet::IndexedRecords(pairs) => {
            let (keys, items) = pairs.into_iter().unzip();
            RelatedItems::Records(items, Some(keys))
        }
        ResultSet::Rows(items) => RelatedItems::Rows(items, None),
        ResultSet::IndexedRows(pairs) => {
            let (keys, items) = pairs.into_iter().unzip();
            RelatedItems::Rows(items, Some(keys))
        }
    }
}

/// Bucket indices for one parent row, in fetch order. Single-attribute list
/// keys union their element buckets in element order.
fn parent_bucket(
    row: &Row,
    key_attrs: &[String],
    buckets: &HashMap<String, Vec<usize>>,
) -> Vec<usize> {
    let mut indices = Vec::new();
    let push_all = |signature: &str, indices: &mut Vec<usize>| {
        if let Some(found) = buckets.get(signature) {
            for index in found {
                if !indices.contains(index) {
                    indices.push(*index);
                }
            }
        }
    };
    if key_attrs.len() == 1 {
        if let Some(value) = row_get(row, &key_attrs[0]) {
            if let Some(items) = value_as_list(value) {
                for item in items {
                    push_all(&value_signature(&item), &mut indices);
                }
                return indices;
            }
        }
    }
    if let Some(signature) = strict_signature(row, key_attrs) {
        push_all(&signature, &mut indices);
    }
    indices
}

/// Two-hop bucketing inputs built from junction rows: a map from target-key
/// signature to the parent-key signatures reaching it, and the de-duplicated
/// target key tuples for the second-hop filter.
fn junction_hop(
    def: &RelationDef,
    junction_rows: &[Row],
    junction_cols: &[String],
) -> (HashMap<String, Vec<String>>, Vec<Vec<Value>>) {
    let junction_target_cols = def.local_attrs();
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for junction_row in junction_rows {
        let target_sig = strict_signature(junction_row, &junction_target_cols);
        let parent_sig = strict_signature(junction_row, junction_cols);
        if let (Some(target_sig), Some(parent_sig)) = (target_sig, parent_sig) {
            map.entry(target_sig).or_default().push(parent_sig);
        }
    }
    let tuples = key_tuples(junction_rows, &junction_target_cols);
    (map, tuples)
}

/// Inverse-relation shape for array-mode parents.
struct RowInverse {
    name: String,
    multiple: bool,
}

fn row_inverse(def: &RelationDef) -> Result<Option<RowInverse>, AnchorError> {
    match &def.inverse_of {
        Some(name) => {
            let inverse_def = resolve_relation(&def.target, name)?;
            Ok(Some(RowInverse {
                name: name.clone(),
                multiple: inverse_def.multiple,
            }))
        }
        None => Ok(None),
    }
}

/// Embed the parent row into a nested related JSON object under the inverse
/// relation's name. Plain data parents share by value, not identity, so the
/// parent is embedded as it was fetched, without its own nested relations.
fn embed_inverse(
    mut related: serde_json::Value,
    inverse: &RowInverse,
    parent: &serde_json::Value,
) -> serde_json::Value {
    if let serde_json::Value::Object(object) = &mut related {
        let value = if inverse.multiple {
            serde_json::Value::Array(vec![parent.clone()])
        } else {
            parent.clone()
        };
        object.insert(inverse.name.clone(), value);
    }
    related
}

/// Resolve one relation for the batch, assign the fan-out to the parents and
/// return the related rows in fetch order; a via-relation hop consumes the
/// returned rows as its junction input.
fn resolve_batch(
    name: &str,
    mut query: ActiveQuery,
    parents: &mut Parents<'_>,
    executor: &dyn AnchorExecutor,
) -> Result<Vec<Row>, AnchorError> {
    let def = match query.relation_def() {
        Some(def) => def.clone(),
        None => return Err(AnchorError::config("batch resolution without a relation")),
    };
    let rows = parent_rows(parents)?;

    let qualify = if query.needs_qualification() {
        Some(query.effective_alias())
    } else {
        None
    };

    // Two-hop map for junction relations: target-key signature -> parent-key
    // signatures, built from the junction rows.
    let mut via_map: Option<HashMap<String, Vec<String>>> = None;
    let mut parent_key_attrs = def.local_attrs();

    let filter = match def.via.clone() {
        Via::None => {
            let tuples = key_tuples(&rows, &parent_key_attrs);
            if tuples.is_empty() {
                assign_empty(name, def.multiple, parents)?;
                return Ok(Vec::new());
            }
            in_filter(def.foreign_attrs(), tuples, qualify.as_deref())
        }
        Via::Table {
            table,
            link: via_link,
        } => {
            parent_key_attrs = via_link.iter().map(|(_, owner)| owner.clone()).collect();
            let junction_cols: Vec<String> = via_link
                .iter()
                .map(|(junction, _)| junction.clone())
                .collect();
            let junction_rows = match query_junction(&table, &via_link, None, &rows, executor)? {
                Some(rows) => rows,
                None => {
                    assign_empty(name, def.multiple, parents)?;
                    return Ok(Vec::new());
                }
            };
            let (map, tuples) = junction_hop(&def, &junction_rows, &junction_cols);
            via_map = Some(map);
            if tuples.is_empty() {
                assign_empty(name, def.multiple, parents)?;
                return Ok(Vec::new());
            }
            in_filter(def.foreign_attrs(), tuples, qualify.as_deref())
        }
        Via::Relation {
            name: via_name,
            def: via_def,
        } => {
            // The hop is a declared relation: resolve it recursively, which
            // caches it on the parents and yields its rows for the second
            // hop. Its own filter, ordering, via and nested loads apply
            // through the recursion.
            parent_key_attrs = via_def.local_attrs();
            let junction_cols = via_def.foreign_attrs();
            let mut via_query = ActiveQuery::from_relation((*via_def).clone());
            if matches!(parents, Parents::Rows(_)) {
                via_query.as_array = true;
            }
            let junction_rows = resolve_batch(&via_name, via_query, parents, executor)?;
            if junction_rows.is_empty() {
                assign_empty(name, def.multiple, parents)?;
                return Ok(Vec::new());
            }
            let (map, tuples) = junction_hop(&def, &junction_rows, &junction_cols);
            via_map = Some(map);
            if tuples.is_empty() {
                assign_empty(name, def.multiple, parents)?;
                return Ok(Vec::new());
            }
            in_filter(def.foreign_attrs(), tuples, qualify.as_deref())
        }
    };

    // One parent expecting one record: skip bucketing and fetch at most one
    // row.
    if rows.len() == 1 && !def.multiple {
        query = query.and_filter(filter).limit(1);
        let related = related_items(query.all(executor)?);
        let mut related_rows = Vec::with_capacity(related.len());
        for index in 0..related.len() {
            related_rows.push(related.row_of(index)?);
        }
        match parents {
            Parents::Records(records) => {
                let records: &[RecordRef] = records;
                let value = match &related {
                    RelatedItems::Records(items, _) => RelatedValue::One(items.first().cloned()),
                    RelatedItems::Rows(..) => {
                        return Err(AnchorError::execution(
                            "array-mode relation resolved against record parents",
                        ))
                    }
                };
                {
                    let mut guard = records[0]
                        .write()
                        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                    guard.populate_relation(name, value);
                }
                if let Some(inverse_name) = &def.inverse_of {
                    let inverse_def = resolve_relation(&def.target, inverse_name)?;
                    populate_inverse(records, name, inverse_name, &inverse_def)?;
                }
            }
            Parents::Rows(target_rows) => {
                let inverse = row_inverse(&def)?;
                let value = match related_rows.first() {
                    Some(related_row) => {
                        let mut json = row_to_json(related_row);
                        if let Some(inverse) = &inverse {
                            json = embed_inverse(json, inverse, &row_to_json(&rows[0]));
                        }
                        Value::Json(Some(Box::new(json)))
                    }
                    None => Value::Json(Some(Box::new(serde_json::Value::Null))),
                };
                target_rows[0].insert(name.to_string(), value);
            }
        }
        return Ok(related_rows);
    }

    query = query.and_filter(filter);
    let related = related_items(query.all(executor)?);
    let mut related_rows = Vec::with_capacity(related.len());
    for index in 0..related.len() {
        related_rows.push(related.row_of(index)?);
    }

    // Bucket related items by parent-key signature, in fetch order.
    let foreign_attrs = def.foreign_attrs();
    let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, related_row) in related_rows.iter().enumerate() {
        let target_sig = match strict_signature(related_row, &foreign_attrs) {
            Some(signature) => signature,
            None => continue,
        };
        match &via_map {
            Some(map) => {
                if let Some(parent_sigs) = map.get(&target_sig) {
                    for parent_sig in parent_sigs {
                        buckets.entry(parent_sig.clone()).or_default().push(index);
                    }
                }
            }
            None => buckets.entry(target_sig).or_default().push(index),
        }
    }

    match parents {
        Parents::Records(records) => {
            let records: &[RecordRef] = records;
            let related_records = match &related {
                RelatedItems::Records(items, _) => items.clone(),
                RelatedItems::Rows(..) => {
                    return Err(AnchorError::execution(
                        "array-mode relation resolved against record parents",
                    ))
                }
            };
            for (parent_index, record) in records.iter().enumerate() {
                let indices = parent_bucket(&rows[parent_index], &parent_key_attrs, &buckets);
                let value = if def.multiple {
                    let mut set =
                        RecordSet::from_items(indices.iter().map(|i| related_records[*i].clone()).collect());
                    if indices.iter().all(|i| related.key_of(*i).is_some()) && !indices.is_empty() {
                        let keys = indices
                            .iter()
                            .filter_map(|i| related.key_of(*i))
                            .collect::<Vec<_>>();
                        set.set_keys(keys);
                    }
                    RelatedValue::Many(set)
                } else {
                    RelatedValue::One(indices.first().map(|i| related_records[*i].clone()))
                };
                let mut guard = record
                    .write()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                guard.populate_relation(name, value);
            }
            if let Some(inverse_name) = &def.inverse_of {
                let inverse_def = resolve_relation(&def.target, inverse_name)?;
                populate_inverse(records, name, inverse_name, &inverse_def)?;
            }
        }
        Parents::Rows(target_rows) => {
            let inverse = row_inverse(&def)?;
            for (parent_index, row) in target_rows.iter_mut().enumerate() {
                let indices = parent_bucket(&rows[parent_index], &parent_key_attrs, &buckets);
                let parent_json = inverse.as_ref().map(|_| row_to_json(&rows[parent_index]));
                let nested_json = |index: usize| -> serde_json::Value {
                    let json = row_to_json(&related_rows[index]);
                    match (&inverse, &parent_json) {
                        (Some(inverse), Some(parent)) => embed_inverse(json, inverse, parent),
                        _ => json,
                    }
                };
                let value = if def.multiple {
                    let mut nested = Vec::with_capacity(indices.len());
                    let mut keyed = serde_json::Map::new();
                    let indexed = indices.iter().all(|i| related.key_of(*i).is_some());
                    for index in &indices {
                        let json = nested_json(*index);
                        if indexed {
                            if let Some(key) = related.key_of(*index) {
                                keyed.insert(key, json);
                                continue;
                            }
                        }
                        nested.push(json);
                    }
                    if indexed && !indices.is_empty() {
                        Value::Json(Some(Box::new(serde_json::Value::Object(keyed))))
                    } else {
                        Value::Json(Some(Box::new(serde_json::Value::Array(nested))))
                    }
                } else {
                    match indices.first() {
                        Some(index) => Value::Json(Some(Box::new(nested_json(*index)))),
                        None => Value::Json(Some(Box::new(serde_json::Value::Null))),
                    }
                };
                row.insert(name.to_string(), value);
            }
        }
    }

    log::debug!(
        "resolved relation `{}` for {} parents ({} related)",
        name,
        rows.len(),
        related_rows.len()
    );
    Ok(related_rows)
}

/// Backfill the declared inverse relation on every freshly assigned related
/// record, reusing the parent instances already in memory. No queries run.
fn populate_inverse(
    parents: &[RecordRef],
    name: &str,
    inverse_name: &str,
    inverse_def: &RelationDef,
) -> Result<(), AnchorError> {
    let mut touched: HashSet<usize> = HashSet::new();
    for parent in parents {
        let related_records = {
            let guard = parent
                .read()
                .map_err(|_| AnchorError::execution("record lock poisoned"))?;
            match guard.related(name) {
                Some(value) => value.records(),
                None => Vec::new(),
            }
        };
        for related in related_records {
            let pointer = Arc::as_ptr(&related) as usize;
            let mut guard = related
                .write()
                .map_err(|_| AnchorError::execution("record lock poisoned"))?;
            if touched.insert(pointer) {
                guard.populate_relation(
                    inverse_name,
                    RelatedValue::wrap(inverse_def.multiple, vec![parent.clone()]),
                );
            } else if inverse_def.multiple {
                if let Some(RelatedValue::Many(mut set)) = guard.related_cloned(inverse_name) {
                    set.push(parent.clone());
                    guard.populate_relation(inverse_name, RelatedValue::Many(set));
                }
            }
            // Single-valued inverse: first assignment wins.
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_key_tuples_dedup_and_null_skip() {
        let rows = vec![
            row(&[("id", Value::Int(Some(1)))]),
            row(&[("id", Value::Int(Some(2)))]),
            row(&[("id", Value::Int(Some(2)))]),
            row(&[("id", Value::Int(None))]),
            row(&[]),
        ];
        let tuples = key_tuples(&rows, &["id".to_string()]);
        assert_eq!(
            tuples,
            vec![vec![Value::Int(Some(1))], vec![Value::Int(Some(2))]]
        );
    }

    #[test]
    fn test_key_tuples_expands_list_values() {
        let rows = vec![row(&[(
            "tag_ids",
            Value::Json(Some(Box::new(serde_json::json!([1, 2])))),
        )])];
        let tuples = key_tuples(&rows, &["tag_ids".to_string()]);
        assert_eq!(tuples.len(), 2);
    }

    #[test]
    fn test_key_tuples_composite_requires_all_attrs() {
        let rows = vec![
            row(&[("a", Value::Int(Some(1))), ("b", Value::Int(Some(2)))]),
            row(&[("a", Value::Int(Some(1)))]),
        ];
        let tuples = key_tuples(&rows, &["a".to_string(), "b".to_string()]);
        assert_eq!(tuples.len(), 1);
    }

    #[test]
    fn test_strict_signature_rejects_partial_keys() {
        let complete = row(&[("a", Value::Int(Some(1))), ("b", Value::Int(Some(2)))]);
        let partial = row(&[("a", Value::Int(Some(1)))]);
        let attrs = vec!["a".to_string(), "b".to_string()];
        assert!(strict_signature(&complete, &attrs).is_some());
        assert!(strict_signature(&partial, &attrs).is_none());
    }

    #[test]
    fn test_in_filter_qualifies_bare_columns() {
        let filter = in_filter(
            vec!["customer_id".to_string()],
            vec![vec![Value::Int(Some(1))]],
            Some("orders"),
        );
        match filter {
            Cond::In(columns, _) => assert_eq!(columns, vec!["orders.customer_id".to_string()]),
            other => panic!("unexpected filter: {:?}", other),
        }
    }

    #[test]
    fn test_group_with_merges_shared_prefix() {
        let with = vec![
            WithSpec {
                name: "orders".to_string(),
                constrain: None,
            },
            WithSpec {
                name: "orders.items".to_string(),
                constrain: None,
            },
            WithSpec {
                name: "address".to_string(),
                constrain: None,
            },
        ];
        let groups = group_with(&with);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "orders");
        assert_eq!(groups[0].tails.len(), 1);
        assert_eq!(groups[0].tails[0].name, "items");
        assert_eq!(groups[1].name, "address");
    }
}
