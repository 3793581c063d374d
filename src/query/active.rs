//! Relation-aware query composition.
//!
//! `ActiveQuery` is the chainable builder shared by direct finders and
//! relation queries. A relation query carries its `RelationDef` and, for
//! lazy one-off resolution, the owning record; `prepare` folds all deferred
//! relation state (junction hops, link filters, `join_with` expansion) into
//! a frozen [`QuerySpec`] so the executor receives a plan with no relation
//! semantics left in it.
//!
//! `prepare` is idempotent: `join_with` entries are consumed into concrete
//! join clauses the first time, so preparing the same query again (e.g. a
//! `count` followed by `all`) yields the same plan without duplicating
//! joins.

use crate::error::AnchorError;
use crate::executor::AnchorExecutor;
use crate::query::cond::Cond;
use crate::query::join;
use crate::query::populate::{self, ResultSet};
use crate::query::spec::{Join, QuerySpec};
use crate::record::RecordRef;
use crate::relation::def::{RelationDef, Via};
use crate::relation::eager;
use crate::schema::AnchorSchema;
use crate::value::Row;
use sea_query::{JoinType, Order, Value};
use std::sync::Arc;

/// Closure applied to a relation query before it is executed, used to
/// constrain eager loads and `join_with` children.
pub type QueryConstraint = Arc<dyn Fn(&mut ActiveQuery) + Send + Sync>;

/// One eager-load request: a (possibly dotted) relation path and an optional
/// constraint applied at the deepest segment.
#[derive(Clone)]
pub struct WithSpec {
    pub name: String,
    pub constrain: Option<QueryConstraint>,
}

/// How an indexed result is keyed: by one attribute's value, or by a key
/// function over the raw row.
#[derive(Clone)]
pub enum IndexBy {
    Column(String),
    Key(Arc<dyn Fn(&Row) -> String + Send + Sync>),
}

/// One `join_with` request, expanded into concrete joins during `prepare`.
#[derive(Clone)]
pub struct JoinWithEntry {
    pub path: String,
    /// Whether the relation is also eagerly populated (via a separate
    /// batched query) in addition to being joined.
    pub eager: bool,
    pub join_type: JoinType,
    pub constrain: Option<QueryConstraint>,
}

/// Chainable, relation-aware query builder.
#[derive(Clone)]
pub struct ActiveQuery {
    pub(crate) schema: Arc<dyn AnchorSchema>,
    pub(crate) select: Vec<String>,
    pub(crate) from: Option<String>,
    pub(crate) alias: Option<String>,
    pub(crate) cond: Option<Cond>,
    pub(crate) joins: Vec<Join>,
    pub(crate) group_by: Vec<String>,
    pub(crate) having: Option<Cond>,
    pub(crate) order_by: Vec<(String, Order)>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) index_by: Option<IndexBy>,
    pub(crate) as_array: bool,
    pub(crate) with: Vec<WithSpec>,
    pub(crate) join_with: Vec<JoinWithEntry>,
    pub(crate) unions: Vec<(ActiveQuery, bool)>,
    /// Set when this query was derived from a relation definition.
    pub(crate) relation: Option<RelationDef>,
    /// Set for lazy one-off resolution against a single owning record.
    pub(crate) owner: Option<RecordRef>,
}

impl ActiveQuery {
    /// A finder over a record class.
    pub fn find(schema: Arc<dyn AnchorSchema>) -> Self {
        ActiveQuery {
            schema,
            select: Vec::new(),
            from: None,
            alias: None,
            cond: None,
            joins: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            index_by: None,
            as_array: false,
            with: Vec::new(),
            join_with: Vec::new(),
            unions: Vec::new(),
            relation: None,
            owner: None,
        }
    }

    /// A relation query: the definition's filter, ordering and nested eager
    /// loads are folded in, the link filter is deferred to resolution time.
    pub fn from_relation(def: RelationDef) -> Self {
        let mut query = ActiveQuery::find(def.target.clone());
        query.cond = def.filter.clone();
        query.order_by = def.order_by.clone();
        query.with = def
            .with
            .iter()
            .map(|name| WithSpec {
                name: name.clone(),
                constrain: None,
            })
            .collect();
        query.relation = Some(def);
        query
    }

    /// A lazy relation query bound to its owning record.
    pub fn find_for(def: RelationDef, owner: RecordRef) -> Self {
        let mut query = ActiveQuery::from_relation(def);
        query.owner = Some(owner);
        query
    }

    pub fn schema(&self) -> &Arc<dyn AnchorSchema> {
        &self.schema
    }

    pub fn relation_def(&self) -> Option<&RelationDef> {
        self.relation.as_ref()
    }

    // Chainables.

    pub fn select(mut self, columns: Vec<&str>) -> Self {
        self.select = columns.into_iter().map(str::to_string).collect();
        self
    }

    pub fn add_select(mut self, column: impl Into<String>) -> Self {
        self.select.push(column.into());
        self
    }

    /// Override the source table.
    pub fn from_table(mut self, table: impl Into<String>) -> Self {
        self.from = Some(table.into());
        self
    }

    /// Alias the source table; relation filters and default selects use it.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Replace the filter condition.
    pub fn filter(mut self, cond: Cond) -> Self {
        self.cond = Some(cond);
        self
    }

    /// AND an extra condition onto the filter.
    pub fn and_filter(mut self, cond: Cond) -> Self {
        self.cond = Cond::merge(self.cond.take(), Some(cond));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn having(mut self, cond: Cond) -> Self {
        self.having = Cond::merge(self.having.take(), Some(cond));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Add an explicit join. Explicit joins always render after joins
    /// produced by `join_with` expansion.
    pub fn join(mut self, join_type: JoinType, table: impl Into<String>, on: Option<Cond>) -> Self {
        self.joins.push(Join::new(join_type, table, on));
        self
    }

    /// Key the result by an attribute instead of positionally.
    pub fn index_by(mut self, attribute: impl Into<String>) -> Self {
        self.index_by = Some(IndexBy::Column(attribute.into()));
        self
    }

    /// Key the result by a function over the raw row.
    pub fn index_by_key(mut self, key: impl Fn(&Row) -> String + Send + Sync + 'static) -> Self {
        self.index_by = Some(IndexBy::Key(Arc::new(key)));
        self
    }

    /// Append another query's results as `UNION` (`UNION ALL` when `all`).
    pub fn union(mut self, query: ActiveQuery, all: bool) -> Self {
        self.unions.push((query, all));
        self
    }

    /// Return raw rows instead of records; eager-loaded relations nest as
    /// JSON values.
    pub fn as_array(mut self) -> Self {
        self.as_array = true;
        self
    }

    /// Eagerly load a relation path alongside the main query.
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.with.push(WithSpec {
            name: name.into(),
            constrain: None,
        });
        self
    }

    /// Eagerly load a relation path, constraining its query.
    pub fn with_constrained(mut self, name: impl Into<String>, constrain: QueryConstraint) -> Self {
        self.with.push(WithSpec {
            name: name.into(),
            constrain: Some(constrain),
        });
        self
    }

    /// Join a relation path into the main query. `eager` additionally
    /// populates the relation through its own batched query.
    pub fn join_with(mut self, path: impl Into<String>, eager: bool, join_type: JoinType) -> Self {
        self.join_with.push(JoinWithEntry {
            path: path.into(),
            eager,
            join_type,
            constrain: None,
        });
        self
    }

    pub fn inner_join_with(self, path: impl Into<String>, eager: bool) -> Self {
        self.join_with(path, eager, JoinType::InnerJoin)
    }

    pub fn join_with_constrained(
        mut self,
        path: impl Into<String>,
        eager: bool,
        join_type: JoinType,
        constrain: QueryConstraint,
    ) -> Self {
        self.join_with.push(JoinWithEntry {
            path: path.into(),
            eager,
            join_type,
            constrain: Some(constrain),
        });
        self
    }

    /// AND an extra condition onto the relation definition's `ON` clause.
    /// Only meaningful on relation queries.
    pub fn on_cond(mut self, cond: Cond) -> Self {
        if let Some(def) = &mut self.relation {
            def.on = Some(match def.on.take() {
                Some(existing) => existing.and(cond),
                None => cond,
            });
        }
        self
    }

    /// Effective source table.
    pub(crate) fn table_name(&self) -> String {
        self.from
            .clone()
            .unwrap_or_else(|| self.schema.table_name().to_string())
    }

    /// Effective alias the source table is addressed by.
    pub(crate) fn effective_alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.table_name())
    }

    /// Whether filters over this query's own columns must be alias-qualified
    /// to stay unambiguous.
    pub(crate) fn needs_qualification(&self) -> bool {
        !self.joins.is_empty() || !self.join_with.is_empty()
    }

    /// Resolve the lazy link filter for a single owning record, running the
    /// junction query first for `via` relations. `None` means the owner's
    /// key is unsatisfiable and the result is known to be empty without a
    /// query.
    ///
    /// A relation routed through another declared relation resolves that
    /// relation through the owner's cache first, so the hop is memoized on
    /// the record and its own filters and nested loads apply.
    fn lazy_link_filter(
        &self,
        def: &RelationDef,
        owner: &RecordRef,
        executor: &dyn AnchorExecutor,
    ) -> Result<Option<Cond>, AnchorError> {
        let qualify = if self.needs_qualification() {
            Some(self.effective_alias())
        } else {
            None
        };
        if let Via::Relation { name: via_name, .. } = &def.via {
            let via_value = crate::relation::lazy::get_related(owner, via_name, executor)?;
            let mut junction_rows = Vec::new();
            for record in via_value.records() {
                let guard = record
                    .read()
                    .map_err(|_| AnchorError::execution("record lock poisoned"))?;
                junction_rows.push(guard.attributes().clone());
            }
            return Ok(eager::link_filter_for_junction_rows(
                def,
                &junction_rows,
                qualify.as_deref(),
            ));
        }
        let owner_attributes: Row = {
            let guard = owner
                .read()
                .map_err(|_| AnchorError::execution("record lock poisoned"))?;
            guard.attributes().clone()
        };
        let parents = vec![owner_attributes];
        eager::link_filter_for_parents(def, &parents, qualify.as_deref(), executor)
    }

    /// Fold all deferred relation state into a frozen plan.
    pub fn prepare(&mut self, executor: &dyn AnchorExecutor) -> Result<QuerySpec, AnchorError> {
        if !self.join_with.is_empty() {
            join::apply_join_with(self)?;
        }

        let table = self.table_name();
        let alias = self.effective_alias();

        let mut cond = self.cond.clone();

        if let Some(def) = self.relation.clone() {
            // Standalone resolution treats the extra ON condition as a
            // plain filter; the join planner handles the joined case.
            if let Some(on) = &def.on {
                let on = if self.joins.is_empty() {
                    on.clone()
                } else {
                    on.clone().qualify(&alias)
                };
                cond = Cond::merge(cond, Some(on));
            }
            if let Some(owner) = self.owner.clone() {
                match self.lazy_link_filter(&def, &owner, executor)? {
                    Some(filter) => cond = Cond::merge(cond, Some(filter)),
                    // Unsatisfiable key: a plan that matches nothing.
                    None => cond = Some(Cond::In(def.foreign_attrs(), Vec::new())),
                }
            }
        }

        let select = if self.select.is_empty() && !self.joins.is_empty() {
            vec![format!("{}.*", alias)]
        } else {
            self.select.clone()
        };

        let mut spec = QuerySpec::new(table);
        spec.alias = alias;
        spec.select = select;
        spec.cond = cond;
        spec.joins = self.joins.clone();
        spec.group_by = self.group_by.clone();
        spec.having = self.having.clone();
        spec.order_by = self.order_by.clone();
        spec.limit = self.limit;
        spec.offset = self.offset;
        for (union_query, all) in self.unions.clone() {
            let mut union_query = union_query;
            spec.unions.push((all, union_query.prepare(executor)?));
        }
        Ok(spec)
    }

    /// Run the query and populate results.
    pub fn all(&mut self, executor: &dyn AnchorExecutor) -> Result<ResultSet, AnchorError> {
        let spec = self.prepare(executor)?;
        let rows = executor.query(&spec)?;
        populate::populate(self, rows, executor)
    }

    /// Run the query limited to one record. Not available in array mode.
    pub fn one(&mut self, executor: &dyn AnchorExecutor) -> Result<Option<RecordRef>, AnchorError> {
        if self.as_array {
            return Err(AnchorError::config(
                "one() is record-mode only; use limit(1).all() for rows",
            ));
        }
        let previous_limit = self.limit;
        self.limit = Some(1);
        let result = self.all(executor);
        self.limit = previous_limit;
        match result? {
            ResultSet::Records(records) => Ok(records.into_iter().next()),
            ResultSet::IndexedRecords(records) => {
                Ok(records.into_iter().next().map(|(_, record)| record))
            }
            _ => Ok(None),
        }
    }

    /// Count matching rows. Ordering, limit and offset do not affect the
    /// count.
    pub fn count(&mut self, executor: &dyn AnchorExecutor) -> Result<u64, AnchorError> {
        let mut spec = self.prepare(executor)?;
        spec.select = vec!["COUNT(*)".to_string()];
        spec.order_by.clear();
        spec.limit = None;
        spec.offset = None;
        let rows = executor.query(&spec)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AnchorError::execution("count query returned no rows"))?;
        let value = row
            .values()
            .next()
            .cloned()
            .ok_or_else(|| AnchorError::execution("count query returned an empty row"))?;
        count_from_value(&value)
    }

    /// Whether any row matches.
    pub fn exists(&mut self, executor: &dyn AnchorExecutor) -> Result<bool, AnchorError> {
        Ok(self.count(executor)? > 0)
    }
}

fn count_from_value(value: &Value) -> Result<u64, AnchorError> {
    match value {
        Value::TinyInt(Some(i)) => Ok(*i as u64),
        Value::SmallInt(Some(i)) => Ok(*i as u64),
        Value::Int(Some(i)) => Ok(*i as u64),
        Value::BigInt(Some(i)) => Ok(*i as u64),
        Value::TinyUnsigned(Some(u)) => Ok(*u as u64),
        Value::SmallUnsigned(Some(u)) => Ok(*u as u64),
        Value::Unsigned(Some(u)) => Ok(*u as u64),
        Value::BigUnsigned(Some(u)) => Ok(*u),
        other => Err(AnchorError::Parse(format!(
            "count query returned a non-integer value: {:?}",
            other
        ))),
    }
}

/// Resolve the junction description of a `via` relation: the junction table
/// name, its `(junction_column, owner_attribute)` link, and any filter the
/// junction hop itself carries.
pub(crate) fn via_junction(
    def: &RelationDef,
) -> Option<(String, Vec<(String, String)>, Option<Cond>)> {
    match &def.via {
        Via::None => None,
        Via::Table { table, link } => Some((table.clone(), link.clone(), None)),
        Via::Relation { def: via_def, .. } => Some((
            via_def.target.table_name().to_string(),
            via_def.link.clone(),
            Cond::merge(via_def.filter.clone(), via_def.on.clone()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryExecutor;

    struct OrderSchema;

    impl AnchorSchema for OrderSchema {
        fn table_name(&self) -> &str {
            "orders"
        }

        fn primary_key(&self) -> &[&str] {
            &["id"]
        }

        fn relation(&self, _name: &str) -> Option<RelationDef> {
            None
        }
    }

    fn order_row(id: i32, customer: i32) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(Some(id)));
        row.insert("customer_id".to_string(), Value::Int(Some(customer)));
        row
    }

    fn executor() -> MemoryExecutor {
        MemoryExecutor::new().with_table(
            "orders",
            vec![order_row(1, 1), order_row(2, 2), order_row(3, 2)],
        )
    }

    #[test]
    fn test_chain_and_all() {
        let executor = executor();
        let records = ActiveQuery::find(Arc::new(OrderSchema))
            .filter(Cond::eq("customer_id", Value::Int(Some(2))))
            .order_by("id", Order::Desc)
            .all(&executor)
            .unwrap()
            .records();
        assert_eq!(records.len(), 2);
        let first = records[0].read().unwrap();
        assert_eq!(first.get("id"), Some(&Value::Int(Some(3))));
    }

    #[test]
    fn test_one_restores_limit() {
        let executor = executor();
        let mut query = ActiveQuery::find(Arc::new(OrderSchema));
        let record = query.one(&executor).unwrap();
        assert!(record.is_some());
        assert_eq!(query.limit, None);
        assert_eq!(query.all(&executor).unwrap().len(), 3);
    }

    #[test]
    fn test_count_ignores_limit_and_order() {
        let executor = executor();
        let mut query = ActiveQuery::find(Arc::new(OrderSchema))
            .order_by("id", Order::Asc)
            .limit(1);
        assert_eq!(query.count(&executor).unwrap(), 3);
        assert!(query.exists(&executor).unwrap());
        let logged = executor.query_log();
        assert!(logged[0].is_count());
        assert_eq!(logged[0].limit, None);
        assert!(logged[0].order_by.is_empty());
    }

    #[test]
    fn test_union_carries_through_to_the_plan() {
        let executor = executor();
        let first_customer = ActiveQuery::find(Arc::new(OrderSchema))
            .filter(Cond::eq("customer_id", Value::Int(Some(1))));
        let mut query = ActiveQuery::find(Arc::new(OrderSchema))
            .filter(Cond::eq("customer_id", Value::Int(Some(2))))
            .union(first_customer, true);
        let spec = query.prepare(&executor).unwrap();
        assert_eq!(spec.unions.len(), 1);
        assert!(spec.unions[0].0);
        let (sql, _) = spec
            .to_statement()
            .build(sea_query::PostgresQueryBuilder);
        assert!(sql.contains("UNION ALL"), "sql was: {sql}");
    }

    #[test]
    fn test_default_select_with_joins() {
        let executor = executor();
        let mut query = ActiveQuery::find(Arc::new(OrderSchema)).join(
            JoinType::LeftJoin,
            "customers",
            Some(Cond::ColEq(
                "customers.id".to_string(),
                "orders.customer_id".to_string(),
            )),
        );
        let spec = query.prepare(&executor).unwrap();
        assert_eq!(spec.select, vec!["orders.*".to_string()]);
    }
}
