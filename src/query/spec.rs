//! Executable query plans.
//!
//! `QuerySpec` is the frozen form of a composed query: everything the
//! executor collaborator needs, with no deferred relation state left in it.
//! Executors may interpret the plan structurally (the in-memory executor
//! does) or render it to SQL through [`QuerySpec::to_statement`].

use crate::query::cond::Cond;
use sea_query::{
    Asterisk, Condition, DynIden, Expr, JoinType, Order, SelectStatement, TableName, TableRef,
    UnionType,
};

/// One join clause of a plan.
#[derive(Debug, Clone)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    /// Alias the joined table is addressed by; defaults to the table name.
    pub alias: String,
    pub on: Option<Cond>,
}

impl Join {
    pub fn new(join_type: JoinType, table: impl Into<String>, on: Option<Cond>) -> Self {
        let table = table.into();
        Join {
            join_type,
            alias: table.clone(),
            table,
            on,
        }
    }

    /// Structural signature used for de-duplication after `join_with`
    /// expansion.
    pub(crate) fn signature(&self) -> String {
        format!("{:?}", self)
    }
}

/// A frozen, executable query plan.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub table: String,
    /// Alias the base table is addressed by; defaults to the table name.
    pub alias: String,
    /// Select list; empty means all columns.
    pub select: Vec<String>,
    pub cond: Option<Cond>,
    pub joins: Vec<Join>,
    pub group_by: Vec<String>,
    pub having: Option<Cond>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// `(all, plan)` pairs appended as UNION / UNION ALL.
    pub unions: Vec<(bool, QuerySpec)>,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        QuerySpec {
            alias: table.clone(),
            table,
            select: Vec::new(),
            cond: None,
            joins: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
        }
    }

    /// Whether this plan selects `COUNT(*)`.
    pub fn is_count(&self) -> bool {
        self.select.len() == 1 && self.select[0] == "COUNT(*)"
    }

    fn table_ref(table: &str, alias: &str) -> TableRef {
        let name = TableName(None, DynIden::from(table.to_string()));
        if alias == table {
            TableRef::Table(name, None)
        } else {
            TableRef::Table(name, Some(DynIden::from(alias.to_string())))
        }
    }

    /// Render the plan as a `SelectStatement` for SQL-generating executors.
    pub fn to_statement(&self) -> SelectStatement {
        let mut query = SelectStatement::default();

        if self.select.is_empty() {
            query.column(Asterisk);
        } else {
            for item in &self.select {
                query.expr(Expr::cust(item.clone()));
            }
        }

        query.from(Self::table_ref(&self.table, &self.alias));

        for join in &self.joins {
            let on = match &join.on {
                Some(cond) => cond.to_condition(),
                None => Condition::all().add(Expr::cust("TRUE")),
            };
            query.join(
                join.join_type,
                Self::table_ref(&join.table, &join.alias),
                on,
            );
        }

        if let Some(cond) = &self.cond {
            query.cond_where(cond.to_condition());
        }

        for column in &self.group_by {
            match column.split_once('.') {
                Some((table, bare)) => {
                    query.group_by_col((
                        DynIden::from(table.to_string()),
                        DynIden::from(bare.to_string()),
                    ));
                }
                None => {
                    query.group_by_col(DynIden::from(column.clone()));
                }
            }
        }

        if let Some(having) = &self.having {
            query.cond_having(having.to_condition());
        }

        for (column, order) in &self.order_by {
            match column.split_once('.') {
                Some((table, bare)) => {
                    query.order_by(
                        (
                            DynIden::from(table.to_string()),
                            DynIden::from(bare.to_string()),
                        ),
                        order.clone(),
                    );
                }
                None => {
                    query.order_by(DynIden::from(column.clone()), order.clone());
                }
            }
        }

        if let Some(limit) = self.limit {
            query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query.offset(offset);
        }

        for (all, union_spec) in &self.unions {
            let union_type = if *all {
                UnionType::All
            } else {
                UnionType::Distinct
            };
            query.union(union_type, union_spec.to_statement());
        }

        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{PostgresQueryBuilder, Value};

    #[test]
    fn test_plain_select_renders() {
        let spec = QuerySpec::new("customers");
        let (sql, _) = spec.to_statement().build(PostgresQueryBuilder);
        assert!(sql.contains("SELECT"), "sql was: {sql}");
        assert!(sql.contains("customers"), "sql was: {sql}");
    }

    #[test]
    fn test_join_and_filter_render() {
        let mut spec = QuerySpec::new("customers");
        spec.select = vec!["customers.*".to_string()];
        spec.joins.push(Join::new(
            JoinType::LeftJoin,
            "orders",
            Some(Cond::ColEq(
                "orders.customer_id".to_string(),
                "customers.id".to_string(),
            )),
        ));
        spec.cond = Some(Cond::eq("customers.status", Value::Int(Some(1))));
        let (sql, _) = spec.to_statement().build(PostgresQueryBuilder);
        assert!(sql.contains("LEFT JOIN"), "sql was: {sql}");
        assert!(
            sql.contains("orders.customer_id = customers.id"),
            "sql was: {sql}"
        );
    }

    #[test]
    fn test_order_limit_offset_render() {
        let mut spec = QuerySpec::new("orders");
        spec.order_by.push(("orders.id".to_string(), Order::Desc));
        spec.limit = Some(10);
        spec.offset = Some(20);
        let (sql, _) = spec.to_statement().build(PostgresQueryBuilder);
        assert!(sql.contains("ORDER BY"), "sql was: {sql}");
        assert!(sql.contains("LIMIT"), "sql was: {sql}");
        assert!(sql.contains("OFFSET"), "sql was: {sql}");
    }

    #[test]
    fn test_join_signature_distinguishes_structure() {
        let a = Join::new(JoinType::InnerJoin, "orders", None);
        let b = Join::new(JoinType::LeftJoin, "orders", None);
        let c = Join::new(JoinType::InnerJoin, "orders", None);
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), c.signature());
    }

    #[test]
    fn test_count_detection() {
        let mut spec = QuerySpec::new("orders");
        spec.select = vec!["COUNT(*)".to_string()];
        assert!(spec.is_count());
    }
}
