//! Lazy relation access and link management.
//!
//! `get_related` resolves a named relation for a single record on first
//! access and memoizes the result in the record's relation cache, so a
//! second access never reaches the executor. An enabled identity map can
//! satisfy single-valued primary-key links without any query at all.
//!
//! `link`/`unlink` mutate the underlying association: the side holding the
//! foreign key is determined from which side's link attributes form that
//! side's primary key, and junction relations insert or delete junction
//! rows instead of touching either record.

use crate::error::AnchorError;
use crate::executor::AnchorExecutor;
use crate::identity_map::IdentityMap;
use crate::query::active::{via_junction, ActiveQuery};
use crate::query::cond::Cond;
use crate::record::{RecordRef, RecordSet, RelatedValue};
use crate::relation::def::RelationDef;
use crate::schema::resolve_relation;
use crate::value::{null_value, value_as_list, value_to_json, Row};
use sea_query::Value;

/// Resolve a relation for one record, memoizing in the record's cache.
pub fn get_related(
    owner: &RecordRef,
    name: &str,
    executor: &dyn AnchorExecutor,
) -> Result<RelatedValue, AnchorError> {
    get_related_with_map(owner, name, executor, &IdentityMap::global())
}

/// Like [`get_related`], probing the given identity map instead of the
/// process-wide one.
pub fn get_related_with_map(
    owner: &RecordRef,
    name: &str,
    executor: &dyn AnchorExecutor,
    map: &IdentityMap,
) -> Result<RelatedValue, AnchorError> {
    let def = {
        let guard = owner
            .read()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        if let Some(cached) = guard.related_cloned(name) {
            return Ok(cached);
        }
        let def = resolve_relation(guard.schema(), name)?;
        if let Some((table, signature)) = map.related_key(&def, &guard) {
            if let Some(hit) = map.find(&table, &signature) {
                drop(guard);
                let value = RelatedValue::One(Some(hit));
                store(owner, name, value.clone())?;
                // Stay subscribed so forgetting or replacing the mapped
                // record drops this memoized value.
                map.watch(&table, &signature, owner, name);
                return Ok(value);
            }
        }
        def
    };

    let mut query = ActiveQuery::find_for(def.clone(), owner.clone());
    let records = query.all(executor)?.records();
    if map.is_enabled() {
        for record in &records {
            map.remember(record);
        }
    }
    let value = RelatedValue::wrap(def.multiple, records);
    store(owner, name, value.clone())?;
    Ok(value)
}

fn store(owner: &RecordRef, name: &str, value: RelatedValue) -> Result<(), AnchorError> {
    let mut guard = owner
        .write()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    guard.populate_relation(name, value);
    Ok(())
}

/// Overwrite the cached relation value without querying. Any identity-map
/// subscription for the relation is dropped; an explicitly set value is not
/// subject to map invalidation.
pub fn set_related(owner: &RecordRef, name: &str, value: RelatedValue) -> Result<(), AnchorError> {
    IdentityMap::global().unwatch(owner, name);
    store(owner, name, value)
}

fn attributes_of(record: &RecordRef) -> Result<Row, AnchorError> {
    let guard = record
        .read()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    Ok(guard.attributes().clone())
}

fn is_new(record: &RecordRef) -> Result<bool, AnchorError> {
    let guard = record
        .read()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    Ok(guard.is_new_record())
}

fn is_primary_key(record: &RecordRef, attrs: &[String]) -> Result<bool, AnchorError> {
    let guard = record
        .read()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    Ok(guard.is_primary_key(attrs))
}

fn required_value(row: &Row, attr: &str, table: &str) -> Result<Value, AnchorError> {
    row.get(attr).cloned().ok_or_else(|| {
        AnchorError::call(format!(
            "cannot link: attribute `{}` of `{}` is unset",
            attr, table
        ))
    })
}

fn table_of(record: &RecordRef) -> Result<String, AnchorError> {
    let guard = record
        .read()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    Ok(guard.table_name().to_string())
}

/// Append `target` to the owner's cached relation value, if one exists.
fn cache_link(owner: &RecordRef, name: &str, def: &RelationDef, target: &RecordRef) -> Result<(), AnchorError> {
    let mut guard = owner
        .write()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    match guard.related_cloned(name) {
        Some(RelatedValue::Many(mut set)) => {
            set.push(target.clone());
            guard.populate_relation(name, RelatedValue::Many(set));
        }
        Some(RelatedValue::One(_)) => {
            guard.populate_relation(name, RelatedValue::One(Some(target.clone())));
        }
        None => {
            if def.multiple {
                guard.populate_relation(
                    name,
                    RelatedValue::Many(RecordSet::from_items(vec![target.clone()])),
                );
            } else {
                guard.populate_relation(name, RelatedValue::One(Some(target.clone())));
            }
        }
    }
    Ok(())
}

/// Establish the association between `owner` and `target`.
///
/// Junction relations insert a junction row and require both records to be
/// persisted. Direct relations write the foreign key onto whichever side
/// does not contribute its primary key to the link, and save that side.
pub fn link(
    owner: &RecordRef,
    name: &str,
    target: &RecordRef,
    extra_columns: &Row,
    executor: &dyn AnchorExecutor,
) -> Result<(), AnchorError> {
    let def = {
        let guard = owner
            .read()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        resolve_relation(guard.schema(), name)?
    };

    if let Some((junction_table, via_link, _)) = via_junction(&def) {
        if is_new(owner)? || is_new(target)? {
            return Err(AnchorError::call(
                "cannot link through a junction: both records must be persisted",
            ));
        }
        let owner_attrs = attributes_of(owner)?;
        let target_attrs = attributes_of(target)?;
        let owner_table = table_of(owner)?;
        let target_table = table_of(target)?;
        let mut junction_row = extra_columns.clone();
        for (junction_col, owner_attr) in &via_link {
            junction_row.insert(
                junction_col.clone(),
                required_value(&owner_attrs, owner_attr, &owner_table)?,
            );
        }
        for (foreign_attr, junction_col) in &def.link {
            junction_row.insert(
                junction_col.clone(),
                required_value(&target_attrs, foreign_attr, &target_table)?,
            );
        }
        executor.insert(&junction_table, &junction_row)?;
        cache_link(owner, name, &def, target)?;
        return Ok(());
    }

    if is_new(owner)? && is_new(target)? {
        return Err(AnchorError::call(
            "cannot link two unpersisted records: save one side first",
        ));
    }

    let local_attrs = def.local_attrs();
    let foreign_attrs = def.foreign_attrs();
    if is_primary_key(owner, &local_attrs)? {
        // Foreign key lives on the target.
        let owner_attrs = attributes_of(owner)?;
        let owner_table = table_of(owner)?;
        let mut guard = target
            .write()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        for (foreign_attr, local_attr) in &def.link {
            guard.set(
                foreign_attr.clone(),
                required_value(&owner_attrs, local_attr, &owner_table)?,
            );
        }
        guard.save(executor)?;
    } else if is_primary_key(target, &foreign_attrs)? {
        // Foreign key lives on the owner.
        let target_attrs = attributes_of(target)?;
        let target_table = table_of(target)?;
        let mut guard = owner
            .write()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        for (foreign_attr, local_attr) in &def.link {
            guard.set(
                local_attr.clone(),
                required_value(&target_attrs, foreign_attr, &target_table)?,
            );
        }
        guard.save(executor)?;
    } else {
        return Err(AnchorError::call(format!(
            "cannot link via relation `{}`: neither side's link attributes form its primary key",
            name
        )));
    }

    cache_link(owner, name, &def, target)
}

/// The value an FK attribute takes after detaching one related key. A
/// list-valued attribute keeps its other ids; a scalar attribute is nulled.
fn detached(current: Option<&Value>, removed: &Value) -> Value {
    match current.and_then(value_as_list) {
        Some(items) => {
            let needle = value_to_json(removed);
            let kept: Vec<serde_json::Value> = items
                .iter()
                .filter(|item| value_to_json(item) != needle)
                .map(value_to_json)
                .collect();
            Value::Json(Some(Box::new(serde_json::Value::Array(kept))))
        }
        None => null_value(),
    }
}

fn pair_condition(
    pairs: &[(String, String)],
    source: &Row,
    source_table: &str,
) -> Result<Cond, AnchorError> {
    let mut cond: Option<Cond> = None;
    for (column, attr) in pairs {
        let value = required_value(source, attr, source_table)?;
        cond = Cond::merge(cond, Some(Cond::eq(column.clone(), value)));
    }
    cond.ok_or_else(|| AnchorError::config("relation link is empty"))
}

/// Destroy the association between `owner` and one related record.
///
/// Junction relations remove (or null out) the matching junction row. For
/// direct relations the foreign-key side is nulled and saved, or its row
/// deleted when `delete` is set.
pub fn unlink(
    owner: &RecordRef,
    name: &str,
    target: &RecordRef,
    delete: bool,
    executor: &dyn AnchorExecutor,
) -> Result<(), AnchorError> {
    let def = {
        let guard = owner
            .read()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        resolve_relation(guard.schema(), name)?
    };

    if let Some((junction_table, via_link, _)) = via_junction(&def) {
        let owner_attrs = attributes_of(owner)?;
        let target_attrs = attributes_of(target)?;
        let owner_table = table_of(owner)?;
        let target_table = table_of(target)?;
        let owner_cond = pair_condition(&via_link, &owner_attrs, &owner_table)?;
        let target_pairs: Vec<(String, String)> = def
            .link
            .iter()
            .map(|(foreign, junction)| (junction.clone(), foreign.clone()))
            .collect();
        let target_cond = pair_condition(&target_pairs, &target_attrs, &target_table)?;
        let cond = owner_cond.and(target_cond);
        if delete {
            executor.delete(&junction_table, &cond)?;
        } else {
            let mut nulls = Row::new();
            for (junction_col, _) in &via_link {
                nulls.insert(junction_col.clone(), null_value());
            }
            executor.update(&junction_table, &nulls, &cond)?;
        }
    } else {
        let local_attrs = def.local_attrs();
        let foreign_attrs = def.foreign_attrs();
        if is_primary_key(owner, &local_attrs)? {
            if delete {
                let mut guard = target
                    .write()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                guard.delete(executor)?;
            } else {
                let owner_attrs = attributes_of(owner)?;
                let mut guard = target
                    .write()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                for (foreign_attr, local_attr) in &def.link {
                    let removed = owner_attrs
                        .get(local_attr)
                        .cloned()
                        .unwrap_or_else(null_value);
                    let next = detached(guard.get(foreign_attr), &removed);
                    guard.set(foreign_attr.clone(), next);
                }
                guard.save(executor)?;
            }
        } else if is_primary_key(target, &foreign_attrs)? {
            let target_attrs = attributes_of(target)?;
            {
                let mut guard = owner
                    .write()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                for (foreign_attr, local_attr) in &def.link {
                    let removed = target_attrs
                        .get(foreign_attr)
                        .cloned()
                        .unwrap_or_else(null_value);
                    let next = detached(guard.get(local_attr), &removed);
                    guard.set(local_attr.clone(), next);
                }
                guard.save(executor)?;
            }
            if delete {
                let mut guard = target
                    .write()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                guard.delete(executor)?;
            }
        } else {
            return Err(AnchorError::call(format!(
                "cannot unlink via relation `{}`: neither side's link attributes form its primary key",
                name
            )));
        }
    }

    // Drop the target from the cached relation value.
    let mut guard = owner
        .write()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    match guard.related_cloned(name) {
        Some(RelatedValue::Many(mut set)) => {
            set.remove_ptr(target);
            guard.populate_relation(name, RelatedValue::Many(set));
        }
        Some(RelatedValue::One(_)) => {
            guard.populate_relation(name, RelatedValue::One(None));
        }
        None => {}
    }
    Ok(())
}

/// Destroy every association of the relation in one executor call, without
/// loading the related records.
pub fn unlink_all(
    owner: &RecordRef,
    name: &str,
    delete: bool,
    executor: &dyn AnchorExecutor,
) -> Result<u64, AnchorError> {
    let def = {
        let guard = owner
            .read()
            .map_err(|_| AnchorError::execution("record lock poisoned"))?;
        resolve_relation(guard.schema(), name)?
    };
    let owner_attrs = attributes_of(owner)?;
    let owner_table = table_of(owner)?;

    let affected = if let Some((junction_table, via_link, _)) = via_junction(&def) {
        let cond = pair_condition(&via_link, &owner_attrs, &owner_table)?;
        if delete {
            executor.delete(&junction_table, &cond)?
        } else {
            let mut nulls = Row::new();
            for (junction_col, _) in &via_link {
                nulls.insert(junction_col.clone(), null_value());
            }
            executor.update(&junction_table, &nulls, &cond)?
        }
    } else {
        let pairs: Vec<(String, String)> = def.link.clone();
        let cond = pair_condition(&pairs, &owner_attrs, &owner_table)?;
        let target_table = def.target.table_name().to_string();
        if delete {
            executor.delete(&target_table, &cond)?
        } else {
            let mut nulls = Row::new();
            for (foreign_attr, _) in &def.link {
                nulls.insert(foreign_attr.clone(), null_value());
            }
            executor.update(&target_table, &nulls, &cond)?
        }
    };

    let mut guard = owner
        .write()
        .map_err(|_| AnchorError::execution("record lock poisoned"))?;
    guard.unset_relation(name);
    Ok(affected)
}
