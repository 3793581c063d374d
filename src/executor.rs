//! Executor boundary.
//!
//! The engine never talks to a database driver directly: every read goes
//! through [`AnchorExecutor::query`] as a frozen [`QuerySpec`], every write
//! through the row-level mutation methods. SQL rendering, transport and
//! row decoding are the executor's concern.
//!
//! [`MemoryExecutor`] is the in-process implementation used by the test
//! suites: it interprets plans over fixture tables and records every plan it
//! runs, which is how query-count properties (one batched query per
//! relation, zero queries for an empty parent batch) are asserted.

use crate::error::AnchorError;
use crate::query::cond::Cond;
use crate::query::spec::QuerySpec;
use crate::value::{row_get, Row};
use sea_query::{Order, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

/// Query execution boundary.
pub trait AnchorExecutor: Send + Sync {
    /// Run a read plan and return raw rows.
    fn query(&self, spec: &QuerySpec) -> Result<Vec<Row>, AnchorError>;

    /// Insert one row. Returns the number of affected rows.
    fn insert(&self, table: &str, row: &Row) -> Result<u64, AnchorError>;

    /// Update matching rows with the given attribute values.
    fn update(&self, table: &str, values: &Row, cond: &Cond) -> Result<u64, AnchorError>;

    /// Delete matching rows.
    fn delete(&self, table: &str, cond: &Cond) -> Result<u64, AnchorError>;
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::TinyInt(Some(i)) => Some(*i as f64),
            Value::SmallInt(Some(i)) => Some(*i as f64),
            Value::Int(Some(i)) => Some(*i as f64),
            Value::BigInt(Some(i)) => Some(*i as f64),
            Value::TinyUnsigned(Some(u)) => Some(*u as f64),
            Value::SmallUnsigned(Some(u)) => Some(*u as f64),
            Value::Unsigned(Some(u)) => Some(*u as f64),
            Value::BigUnsigned(Some(u)) => Some(*u as f64),
            Value::Float(Some(f)) => Some(*f as f64),
            Value::Double(Some(d)) => Some(*d),
            _ => None,
        }
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a, b) {
            (Value::String(Some(x)), Value::String(Some(y))) => x.cmp(y),
            _ => format!("{:?}", a).cmp(&format!("{:?}", b)),
        },
    }
}

/// In-process executor over fixture tables.
///
/// Interprets the plan's condition tree via [`Cond::matches`]; plans that
/// carry joins are answered from the base table only (join-bearing plans are
/// asserted structurally in tests, or answered from canned result sets).
pub struct MemoryExecutor {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    /// Pre-staged result sets consumed ahead of table interpretation, FIFO.
    canned: Mutex<VecDeque<Vec<Row>>>,
    log: Mutex<Vec<QuerySpec>>,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutor {
    pub fn new() -> Self {
        MemoryExecutor {
            tables: RwLock::new(HashMap::new()),
            canned: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Seed a fixture table, replacing any existing rows.
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(table.into(), rows);
        }
        self
    }

    /// Stage a result set returned verbatim by the next `query` call.
    pub fn push_canned(&self, rows: Vec<Row>) {
        if let Ok(mut canned) = self.canned.lock() {
            canned.push_back(rows);
        }
    }

    /// Rows currently held by a fixture table.
    pub fn table_rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).cloned())
            .unwrap_or_default()
    }

    /// Every plan run so far, in order.
    pub fn query_log(&self) -> Vec<QuerySpec> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or(0)
    }

    pub fn clear_log(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    fn record(&self, spec: &QuerySpec) {
        log::debug!(
            "memory executor: {} on `{}` ({} joins)",
            if spec.is_count() { "count" } else { "select" },
            spec.table,
            spec.joins.len()
        );
        if let Ok(mut log) = self.log.lock() {
            log.push(spec.clone());
        }
    }
}

impl AnchorExecutor for MemoryExecutor {
    fn query(&self, spec: &QuerySpec) -> Result<Vec<Row>, AnchorError> {
        self.record(spec);

        if let Ok(mut canned) = self.canned.lock() {
            if let Some(rows) = canned.pop_front() {
                return Ok(rows);
            }
        }

        let source = self.table_rows(&spec.table);
        let mut rows = Vec::new();
        for row in source {
            let keep = match &spec.cond {
                Some(cond) => cond.matches(&row)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        for (column, order) in spec.order_by.iter().rev() {
            let descending = matches!(order, Order::Desc);
            rows.sort_by(|a, b| {
                let ordering = match (row_get(a, column), row_get(b, column)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if spec.is_count() {
            let mut row = Row::new();
            row.insert(
                "COUNT(*)".to_string(),
                Value::BigInt(Some(rows.len() as i64)),
            );
            return Ok(vec![row]);
        }

        let offset = spec.offset.unwrap_or(0) as usize;
        let mut rows: Vec<Row> = rows.into_iter().skip(offset).collect();
        if let Some(limit) = spec.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<u64, AnchorError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| AnchorError::execution("fixture table lock poisoned"))?;
        tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(1)
    }

    fn update(&self, table: &str, values: &Row, cond: &Cond) -> Result<u64, AnchorError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| AnchorError::execution("fixture table lock poisoned"))?;
        let rows = tables.entry(table.to_string()).or_default();
        let mut affected = 0;
        for row in rows.iter_mut() {
            if cond.matches(row)? {
                for (name, value) in values {
                    row.insert(name.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn delete(&self, table: &str, cond: &Cond) -> Result<u64, AnchorError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| AnchorError::execution("fixture table lock poisoned"))?;
        let rows = tables.entry(table.to_string()).or_default();
        let mut kept = Vec::with_capacity(rows.len());
        let mut affected = 0;
        for row in rows.drain(..) {
            if cond.matches(&row)? {
                affected += 1;
            } else {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(affected)
    }
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

    fn orders() -> Vec<Row> {
        vec![
            row(&[
                ("id", Value::Int(Some(1))),
                ("customer_id", Value::Int(Some(1))),
            ]),
            row(&[
                ("id", Value::Int(Some(2))),
                ("customer_id", Value::Int(Some(2))),
            ]),
            row(&[
                ("id", Value::Int(Some(3))),
                ("customer_id", Value::Int(Some(2))),
            ]),
        ]
    }

    #[test]
    fn test_filter_and_log() {
        let executor = MemoryExecutor::new().with_table("orders", orders());
        let mut spec = QuerySpec::new("orders");
        spec.cond = Some(Cond::eq("customer_id", Value::Int(Some(2))));
        let rows = executor.query(&spec).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(executor.query_count(), 1);
        assert_eq!(executor.query_log()[0].table, "orders");
    }

    #[test]
    fn test_order_limit_offset() {
        let executor = MemoryExecutor::new().with_table("orders", orders());
        let mut spec = QuerySpec::new("orders");
        spec.order_by.push(("id".to_string(), Order::Desc));
        spec.limit = Some(2);
        spec.offset = Some(1);
        let rows = executor.query(&spec).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(row_get(&rows[0], "id"), Some(&Value::Int(Some(2))));
        assert_eq!(row_get(&rows[1], "id"), Some(&Value::Int(Some(1))));
    }

    #[test]
    fn test_count_plan() {
        let executor = MemoryExecutor::new().with_table("orders", orders());
        let mut spec = QuerySpec::new("orders");
        spec.select = vec!["COUNT(*)".to_string()];
        let rows = executor.query(&spec).unwrap();
        assert_eq!(row_get(&rows[0], "COUNT(*)"), Some(&Value::BigInt(Some(3))));
    }

    #[test]
    fn test_canned_results_take_precedence() {
        let executor = MemoryExecutor::new().with_table("orders", orders());
        executor.push_canned(vec![row(&[("id", Value::Int(Some(99)))])]);
        let spec = QuerySpec::new("orders");
        let rows = executor.query(&spec).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(row_get(&rows[0], "id"), Some(&Value::Int(Some(99))));
        // Next call falls back to the fixture table.
        assert_eq!(executor.query(&spec).unwrap().len(), 3);
    }

    #[test]
    fn test_mutations() {
        let executor = MemoryExecutor::new().with_table("orders", orders());
        let updated = executor
            .update(
                "orders",
                &row(&[("customer_id", Value::Int(Some(7)))]),
                &Cond::eq("id", Value::Int(Some(1))),
            )
            .unwrap();
        assert_eq!(updated, 1);
        let deleted = executor
            .delete("orders", &Cond::eq("customer_id", Value::Int(Some(2))))
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(executor.table_rows("orders").len(), 1);
        executor
            .insert("orders", &row(&[("id", Value::Int(Some(4)))]))
            .unwrap();
        assert_eq!(executor.table_rows("orders").len(), 2);
    }
}
