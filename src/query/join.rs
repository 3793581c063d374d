//! `join_with` expansion.
//!
//! Resolves dotted relation paths into concrete join clauses. Each path is
//! walked segment by segment against the relation registry; fully-resolved
//! prefixes are memoized across every entry, so two paths sharing a prefix
//! produce exactly one join for the shared part. Junction relations expand
//! into two joins (junction first, target second). Structurally identical
//! joins collapse to one clause, and explicit `join()` clauses always render
//! after the expanded ones.

use crate::error::AnchorError;
use crate::query::active::{ActiveQuery, JoinWithEntry, WithSpec};
use crate::query::cond::Cond;
use crate::query::spec::Join;
use crate::relation::def::RelationDef;
use crate::schema::{resolve_relation, AnchorSchema};
use sea_query::Order;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

struct Planner {
    /// Fully-resolved path prefix -> (target alias, target schema).
    memo: HashMap<String, (String, Arc<dyn AnchorSchema>)>,
    used_aliases: HashSet<String>,
    planned: Vec<Join>,
}

impl Planner {
    fn new(root_alias: String) -> Self {
        let mut used_aliases = HashSet::new();
        used_aliases.insert(root_alias);
        Planner {
            memo: HashMap::new(),
            used_aliases,
            planned: Vec::new(),
        }
    }

    fn claim_alias(&mut self, table: &str) -> String {
        let mut candidate = table.to_string();
        let mut suffix = 2;
        while !self.used_aliases.insert(candidate.clone()) {
            candidate = format!("{}_{}", table, suffix);
            suffix += 1;
        }
        candidate
    }

    /// Join one relation off `parent_alias`, returning the target alias.
    fn join_relation(
        &mut self,
        def: &RelationDef,
        parent_alias: &str,
        entry: &JoinWithEntry,
        constraint_cond: Option<Cond>,
    ) -> Result<String, AnchorError> {
        let mut link_parent_alias = parent_alias.to_string();

        if let Some((junction_table, via_link, via_filter)) =
            crate::query::active::via_junction(def)
        {
            let junction_alias = self.claim_alias(&junction_table);
            let mut on: Option<Cond> = None;
            for (junction_col, owner_attr) in &via_link {
                let pair = Cond::ColEq(
                    format!("{}.{}", junction_alias, junction_col),
                    format!("{}.{}", parent_alias, owner_attr),
                );
                on = Cond::merge(on, Some(pair));
            }
            if let Some(filter) = via_filter {
                on = Cond::merge(on, Some(filter.qualify(&junction_alias)));
            }
            self.planned.push(Join {
                join_type: entry.join_type,
                table: junction_table,
                alias: junction_alias.clone(),
                on,
            });
            link_parent_alias = junction_alias;
        }

        let target_table = def.target.table_name().to_string();
        let target_alias = self.claim_alias(&target_table);
        let mut on: Option<Cond> = None;
        for (foreign_attr, local_attr) in &def.link {
            let pair = Cond::ColEq(
                format!("{}.{}", target_alias, foreign_attr),
                format!("{}.{}", link_parent_alias, local_attr),
            );
            on = Cond::merge(on, Some(pair));
        }
        // The relation's own filter and ON condition constrain the join, as
        // does anything a constraint closure added.
        if let Some(filter) = &def.filter {
            on = Cond::merge(on, Some(filter.clone().qualify(&target_alias)));
        }
        if let Some(extra) = &def.on {
            on = Cond::merge(on, Some(extra.clone().qualify(&target_alias)));
        }
        if let Some(extra) = constraint_cond {
            on = Cond::merge(on, Some(extra.qualify(&target_alias)));
        }
        self.planned.push(Join {
            join_type: entry.join_type,
            table: target_table,
            alias: target_alias.clone(),
            on,
        });
        Ok(target_alias)
    }
}

/// Everything a constraint closure contributed beyond the relation's own
/// declared filter and ordering.
struct ConstraintFragments {
    cond: Option<Cond>,
    order_by: Vec<(String, Order)>,
    group_by: Vec<String>,
    having: Option<Cond>,
    joins: Vec<Join>,
    unions: Vec<(ActiveQuery, bool)>,
}

fn constraint_fragments(def: &RelationDef, entry: &JoinWithEntry) -> Option<ConstraintFragments> {
    let constrain = entry.constrain.as_ref()?;
    let mut scratch = ActiveQuery::from_relation(def.clone());
    (constrain)(&mut scratch);
    let cond = match (&def.filter, scratch.cond.clone()) {
        // from_relation seeded the scratch condition with the declared
        // filter; only report what the closure added on top.
        (Some(filter), Some(cond)) if &cond == filter => None,
        (_, added) => added,
    };
    // from_relation seeded the ordering too; the closure only appends.
    let seeded = def.order_by.len().min(scratch.order_by.len());
    let order_by = scratch.order_by.split_off(seeded);
    Some(ConstraintFragments {
        cond,
        order_by,
        group_by: scratch.group_by,
        having: scratch.having,
        joins: scratch.joins,
        unions: scratch.unions,
    })
}

fn qualify_column(column: String, alias: &str) -> String {
    if column.contains('.') {
        column
    } else {
        format!("{}.{}", alias, column)
    }
}

/// Expand every pending `join_with` entry into concrete joins on `query`.
pub(crate) fn apply_join_with(query: &mut ActiveQuery) -> Result<(), AnchorError> {
    let entries = mem::take(&mut query.join_with);
    if entries.is_empty() {
        return Ok(());
    }

    let root_alias = query.effective_alias();
    let mut planner = Planner::new(root_alias.clone());
    for join in &query.joins {
        planner.used_aliases.insert(join.alias.clone());
    }

    for entry in &entries {
        let mut schema = query.schema.clone();
        let mut parent_alias = root_alias.clone();
        let mut prefix = String::new();

        let segments: Vec<&str> = entry.path.split('.').collect();
        let last = segments.len().saturating_sub(1);
        for (position, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(AnchorError::config(format!(
                    "malformed relation path `{}`",
                    entry.path
                )));
            }
            prefix = if prefix.is_empty() {
                (*segment).to_string()
            } else {
                format!("{}.{}", prefix, segment)
            };

            if let Some((alias, memo_schema)) = planner.memo.get(&prefix) {
                parent_alias = alias.clone();
                schema = memo_schema.clone();
                continue;
            }

            let def = resolve_relation(&schema, segment)?;
            let fragments = if position == last {
                constraint_fragments(&def, entry)
            } else {
                None
            };
            let constraint_cond = fragments.as_ref().and_then(|f| f.cond.clone());
            let target_alias =
                planner.join_relation(&def, &parent_alias, entry, constraint_cond)?;
            // The relation's declared ordering applies to the joined query,
            // qualified by the target alias. Once per resolved prefix.
            for (column, order) in &def.order_by {
                query
                    .order_by
                    .push((qualify_column(column.clone(), &target_alias), order.clone()));
            }
            if let Some(fragments) = fragments {
                for (column, order) in fragments.order_by {
                    query
                        .order_by
                        .push((qualify_column(column, &target_alias), order));
                }
                for column in fragments.group_by {
                    query.group_by.push(qualify_column(column, &target_alias));
                }
                if let Some(having) = fragments.having {
                    query.having =
                        Cond::merge(query.having.take(), Some(having.qualify(&target_alias)));
                }
                query.joins.extend(fragments.joins);
                query.unions.extend(fragments.unions);
            }
            planner
                .memo
                .insert(prefix.clone(), (target_alias.clone(), def.target.clone()));
            parent_alias = target_alias;
            schema = def.target.clone();
        }

        if entry.eager {
            query.with.push(WithSpec {
                name: entry.path.clone(),
                constrain: entry.constrain.clone(),
            });
        }
    }

    // Expanded joins render first, explicit joins after; structurally
    // identical clauses collapse to one.
    let explicit = mem::take(&mut query.joins);
    let mut seen = HashSet::new();
    let mut joins = Vec::with_capacity(planner.planned.len() + explicit.len());
    for join in planner.planned.into_iter().chain(explicit) {
        if seen.insert(join.signature()) {
            joins.push(join);
        }
    }
    query.joins = joins;
    Ok(())
}
