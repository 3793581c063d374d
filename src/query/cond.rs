//! Structured query conditions.
//!
//! The engine needs to inspect and merge conditions while planning (link
//! filters, join conditions, constraint merging from child relations), so the
//! `where` clause is kept as a small AST instead of an opaque SQL fragment.
//! `Cond::to_condition` lowers the AST into a `sea_query::Condition` for
//! executors that render SQL; `Cond::matches` interprets it over a raw row,
//! which is what the in-memory executor runs on.

use crate::error::AnchorError;
use crate::value::{row_get, value_is_null, value_literal, values_equal, Row};
use sea_query::{Condition, Expr, ExprTrait, Value};

/// A structurally-inspectable condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// `column = value`. The column may carry an alias qualifier.
    Eq(String, Value),
    /// `left_column = right_column`, used for join conditions.
    ColEq(String, String),
    /// `(columns) IN (tuples)`. A single column with scalar tuples is the
    /// common batched-link filter; multiple columns express composite keys.
    In(Vec<String>, Vec<Vec<Value>>),
    /// Conjunction.
    And(Vec<Cond>),
    /// Disjunction.
    Or(Vec<Cond>),
    /// Opaque SQL fragment with positional parameters. Cannot be interpreted
    /// by the in-memory executor.
    Raw(String, Vec<Value>),
}

impl Cond {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Cond::Eq(column.into(), value)
    }

    /// Single-column `IN` over scalar values.
    pub fn in_values(column: impl Into<String>, values: Vec<Value>) -> Self {
        Cond::In(vec![column.into()], values.into_iter().map(|v| vec![v]).collect())
    }

    /// AND-combine two conditions, flattening nested conjunctions.
    pub fn and(self, other: Cond) -> Cond {
        match (self, other) {
            (Cond::And(mut a), Cond::And(b)) => {
                a.extend(b);
                Cond::And(a)
            }
            (Cond::And(mut a), b) => {
                a.push(b);
                Cond::And(a)
            }
            (a, Cond::And(mut b)) => {
                b.insert(0, a);
                Cond::And(b)
            }
            (a, b) => Cond::And(vec![a, b]),
        }
    }

    /// AND-combine two optional conditions.
    pub fn merge(left: Option<Cond>, right: Option<Cond>) -> Option<Cond> {
        match (left, right) {
            (Some(l), Some(r)) => Some(l.and(r)),
            (Some(l), None) => Some(l),
            (None, r) => r,
        }
    }

    /// Prefix unqualified column names with a table alias. Raw fragments are
    /// left untouched.
    pub fn qualify(self, alias: &str) -> Cond {
        fn qualify_col(column: String, alias: &str) -> String {
            if column.contains('.') {
                column
            } else {
                format!("{}.{}", alias, column)
            }
        }
        match self {
            Cond::Eq(column, value) => Cond::Eq(qualify_col(column, alias), value),
            Cond::ColEq(left, right) => {
                Cond::ColEq(qualify_col(left, alias), qualify_col(right, alias))
            }
            Cond::In(columns, tuples) => Cond::In(
                columns.into_iter().map(|c| qualify_col(c, alias)).collect(),
                tuples,
            ),
            Cond::And(children) => {
                Cond::And(children.into_iter().map(|c| c.qualify(alias)).collect())
            }
            Cond::Or(children) => {
                Cond::Or(children.into_iter().map(|c| c.qualify(alias)).collect())
            }
            raw @ Cond::Raw(..) => raw,
        }
    }

    /// Interpret the condition over a raw row.
    ///
    /// NULL values never compare equal, matching SQL comparison semantics.
    /// Numeric comparisons are width-insensitive, matching the signature
    /// scheme the bucket maps key on.
    pub fn matches(&self, row: &Row) -> Result<bool, AnchorError> {
        match self {
            Cond::Eq(column, value) => Ok(match row_get(row, column) {
                Some(actual) => values_equal(actual, value),
                None => false,
            }),
            Cond::ColEq(left, right) => {
                Ok(match (row_get(row, left), row_get(row, right)) {
                    (Some(a), Some(b)) => values_equal(a, b),
                    _ => false,
                })
            }
            Cond::In(columns, tuples) => {
                let mut actual = Vec::with_capacity(columns.len());
                for column in columns {
                    match row_get(row, column) {
                        Some(value) if !value_is_null(value) => actual.push(value.clone()),
                        _ => return Ok(false),
                    }
                }
                Ok(tuples.iter().any(|tuple| {
                    tuple.len() == actual.len()
                        && tuple.iter().zip(&actual).all(|(t, a)| values_equal(t, a))
                }))
            }
            Cond::And(children) => {
                for child in children {
                    if !child.matches(row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Cond::Or(children) => {
                for child in children {
                    if child.matches(row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Cond::Raw(sql, _) => Err(AnchorError::execution(format!(
                "cannot interpret raw condition fragment `{sql}` in memory"
            ))),
        }
    }

    /// Lower the condition into a `sea_query::Condition` for SQL-rendering
    /// executors.
    pub fn to_condition(&self) -> Condition {
        match self {
            Cond::Eq(column, value) => {
                Condition::all().add(Expr::cust(column.clone()).eq(Expr::val(value.clone())))
            }
            Cond::ColEq(left, right) => {
                Condition::all().add(Expr::cust(format!("{} = {}", left, right)))
            }
            Cond::In(columns, tuples) => {
                if tuples.is_empty() {
                    // An empty key set matches nothing; `IN ()` is not valid SQL.
                    Condition::all().add(Expr::cust("1 = 0"))
                } else if columns.len() == 1 {
                    let values: Vec<Value> =
                        tuples.iter().filter_map(|t| t.first().cloned()).collect();
                    Condition::all().add(Expr::cust(columns[0].clone()).is_in(values))
                } else {
                    // Composite key: one AND-equality group per tuple, OR-combined.
                    let mut any = Condition::any();
                    for tuple in tuples {
                        let mut all = Condition::all();
                        for (column, value) in columns.iter().zip(tuple.iter()) {
                            let fragment =
                                format!("{} = {}", column, value_literal(value));
                            all = all.add(Expr::cust(fragment));
                        }
                        any = any.add(all);
                    }
                    any
                }
            }
            Cond::And(children) => {
                let mut all = Condition::all();
                for child in children {
                    all = all.add(child.to_condition());
                }
                all
            }
            Cond::Or(children) => {
                let mut any = Condition::any();
                for child in children {
                    any = any.add(child.to_condition());
                }
                any
            }
            Cond::Raw(sql, params) => {
                if params.is_empty() {
                    Condition::all().add(Expr::cust(sql.clone()))
                } else {
                    Condition::all().add(Expr::cust_with_values(sql.clone(), params.clone()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{PostgresQueryBuilder, Query};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eq_matches() {
        let r = row(&[("id", Value::Int(Some(1)))]);
        assert!(Cond::eq("id", Value::Int(Some(1))).matches(&r).unwrap());
        assert!(!Cond::eq("id", Value::Int(Some(2))).matches(&r).unwrap());
        assert!(!Cond::eq("missing", Value::Int(Some(1))).matches(&r).unwrap());
    }

    #[test]
    fn test_null_never_matches() {
        let r = row(&[("parent_id", Value::Int(None))]);
        assert!(!Cond::eq("parent_id", Value::Int(None)).matches(&r).unwrap());
    }

    #[test]
    fn test_in_single_and_composite() {
        let r = row(&[
            ("customer_id", Value::Int(Some(2))),
            ("tenant_id", Value::Int(Some(10))),
        ]);
        let single = Cond::in_values(
            "customer_id",
            vec![Value::Int(Some(1)), Value::Int(Some(2))],
        );
        assert!(single.matches(&r).unwrap());

        let composite = Cond::In(
            vec!["customer_id".to_string(), "tenant_id".to_string()],
            vec![
                vec![Value::Int(Some(2)), Value::Int(Some(10))],
                vec![Value::Int(Some(3)), Value::Int(Some(10))],
            ],
        );
        assert!(composite.matches(&r).unwrap());

        let miss = Cond::In(
            vec!["customer_id".to_string(), "tenant_id".to_string()],
            vec![vec![Value::Int(Some(2)), Value::Int(Some(11))]],
        );
        assert!(!miss.matches(&r).unwrap());
    }

    #[test]
    fn test_matching_is_numeric_width_insensitive() {
        // Keys decoded from JSON arrive as BigInt; fixture columns are Int.
        let r = row(&[("item_id", Value::Int(Some(2)))]);
        assert!(Cond::eq("item_id", Value::BigInt(Some(2))).matches(&r).unwrap());
        let filter = Cond::in_values(
            "item_id",
            vec![Value::BigInt(Some(1)), Value::BigInt(Some(2))],
        );
        assert!(filter.matches(&r).unwrap());
    }

    #[test]
    fn test_and_or_merge() {
        let r = row(&[("a", Value::Int(Some(1))), ("b", Value::Int(Some(2)))]);
        let cond = Cond::eq("a", Value::Int(Some(1))).and(Cond::Or(vec![
            Cond::eq("b", Value::Int(Some(9))),
            Cond::eq("b", Value::Int(Some(2))),
        ]));
        assert!(cond.matches(&r).unwrap());

        let merged = Cond::merge(Some(Cond::eq("a", Value::Int(Some(1)))), None).unwrap();
        assert_eq!(merged, Cond::eq("a", Value::Int(Some(1))));
    }

    #[test]
    fn test_qualify_prefixes_bare_columns_only() {
        let cond = Cond::eq("status", Value::Int(Some(1)))
            .and(Cond::eq("orders.id", Value::Int(Some(2))));
        let qualified = cond.qualify("orders");
        assert_eq!(
            qualified,
            Cond::And(vec![
                Cond::eq("orders.status", Value::Int(Some(1))),
                Cond::eq("orders.id", Value::Int(Some(2))),
            ])
        );
    }

    #[test]
    fn test_raw_is_uninterpretable() {
        let r = row(&[]);
        assert!(Cond::Raw("1 = 1".to_string(), vec![]).matches(&r).is_err());
    }

    #[test]
    fn test_lowering_renders_in_clause() {
        let cond = Cond::in_values(
            "orders.customer_id",
            vec![Value::Int(Some(1)), Value::Int(Some(2))],
        );
        let mut query = Query::select();
        query.from("orders");
        query.cond_where(cond.to_condition());
        let (sql, _) = query.build(PostgresQueryBuilder);
        assert!(sql.contains("IN"), "expected IN clause in: {sql}");
    }

    #[test]
    fn test_lowering_composite_in_uses_literals() {
        let cond = Cond::In(
            vec!["items.id".to_string(), "items.tenant_id".to_string()],
            vec![vec![Value::Int(Some(5)), Value::Int(Some(10))]],
        );
        let mut query = Query::select();
        query.from("items");
        query.cond_where(cond.to_condition());
        let (sql, _) = query.build(PostgresQueryBuilder);
        assert!(sql.contains("items.id = 5"), "sql was: {sql}");
        assert!(sql.contains("items.tenant_id = 10"), "sql was: {sql}");
        assert!(!sql.contains("Some("), "sql must not carry Debug output: {sql}");
    }
}
