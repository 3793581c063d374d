//! Row and value utilities.
//!
//! Rows arrive from the executor as flat attribute maps keyed by column name.
//! Bucketing, de-duplication and identity-map lookups all need a
//! deterministic string signature for (possibly composite) key values, so
//! structurally-equal-but-reference-distinct keys collide correctly in
//! bucket maps. Numeric values canonicalize by magnitude (a key decoded from
//! a JSON array must collide with the same key typed as `Int`); everything
//! else signs as its Debug form. Composite signatures join with `|`.

use sea_query::Value;
use std::collections::BTreeMap;

/// A raw result row: attribute name to value.
pub type Row = BTreeMap<String, Value>;

/// Look up a column in a row, tolerating alias qualification.
///
/// Relation filters prefix link attributes with the owning table alias when
/// the query carries joins (`orders.customer_id`). Executors that return
/// unqualified column names still match through the trailing path segment.
pub fn row_get<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(column) {
        return Some(value);
    }
    match column.rsplit_once('.') {
        Some((_, bare)) => row.get(bare),
        None => None,
    }
}

/// Deterministic signature of a single value, used as a bucket-map key
/// component.
///
/// Integer variants sign by magnitude so a key decoded from JSON (which
/// arrives as `BigInt`) collides with the same key stored as `Int`; floats
/// likewise. Non-numeric values sign as their Debug form.
pub fn value_signature(value: &Value) -> String {
    match value {
        Value::TinyInt(Some(i)) => format!("i{}", i),
        Value::SmallInt(Some(i)) => format!("i{}", i),
        Value::Int(Some(i)) => format!("i{}", i),
        Value::BigInt(Some(i)) => format!("i{}", i),
        Value::TinyUnsigned(Some(u)) => format!("i{}", u),
        Value::SmallUnsigned(Some(u)) => format!("i{}", u),
        Value::Unsigned(Some(u)) => format!("i{}", u),
        Value::BigUnsigned(Some(u)) => format!("i{}", u),
        Value::Float(Some(f)) => format!("f{}", f),
        Value::Double(Some(d)) => format!("f{}", d),
        other => format!("{:?}", other),
    }
}

/// Width-insensitive value equality, matching the signature scheme: numeric
/// values compare by magnitude regardless of the variant they arrived in.
/// NULLs never compare equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    !value_is_null(a) && !value_is_null(b) && value_signature(a) == value_signature(b)
}

/// Signature of a composite key: per-value signatures joined with `|`.
///
/// Returns `None` when none of the attributes are present on the row, which
/// callers treat as "this row cannot be keyed" rather than an error.
pub fn key_signature(row: &Row, attributes: &[String]) -> Option<String> {
    let mut parts = Vec::new();
    for attribute in attributes {
        if let Some(value) = row_get(row, attribute) {
            parts.push(value_signature(value));
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}

/// Whether a value is a SQL NULL.
pub fn value_is_null(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::TinyUnsigned(None)
            | Value::SmallUnsigned(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None)
            | Value::Char(None)
            | Value::Bytes(None)
            | Value::Json(None)
    )
}

/// The typed NULL used when detaching foreign keys.
pub fn null_value() -> Value {
    Value::String(None)
}

/// Render a value as a SQL literal for executors that splice composite-key
/// conditions as custom fragments.
///
/// Strings are quoted with doubled single quotes, bytes use the PostgreSQL
/// hex form, numbers and booleans render bare, NULLs render as `NULL`.
pub fn value_literal(value: &Value) -> String {
    match value {
        v if value_is_null(v) => "NULL".to_string(),

        Value::Bool(Some(b)) => {
            if *b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }

        Value::TinyInt(Some(i)) => i.to_string(),
        Value::SmallInt(Some(i)) => i.to_string(),
        Value::Int(Some(i)) => i.to_string(),
        Value::BigInt(Some(i)) => i.to_string(),
        Value::TinyUnsigned(Some(u)) => u.to_string(),
        Value::SmallUnsigned(Some(u)) => u.to_string(),
        Value::Unsigned(Some(u)) => u.to_string(),
        Value::BigUnsigned(Some(u)) => u.to_string(),

        Value::Float(Some(f)) => f.to_string(),
        Value::Double(Some(d)) => d.to_string(),

        Value::String(Some(s)) => {
            let escaped = s.replace('\'', "''");
            format!("'{}'", escaped)
        }

        Value::Char(Some(c)) => {
            if *c == '\'' {
                "''''".to_string()
            } else {
                format!("'{}'", c)
            }
        }

        Value::Bytes(Some(b)) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("'\\x{}'", hex)
        }

        Value::Json(Some(j)) => {
            let json_str = serde_json::to_string(j).unwrap_or_default();
            let escaped = json_str.replace('\'', "''");
            format!("'{}'", escaped)
        }

        other => {
            let escaped = format!("{:?}", other).replace('\'', "''");
            format!("'{}'", escaped)
        }
    }
}

/// Convert a value to its JSON representation, used when nesting related
/// data into array-mode parents.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        v if value_is_null(v) => serde_json::Value::Null,
        Value::Bool(Some(b)) => serde_json::Value::Bool(*b),
        Value::TinyInt(Some(i)) => serde_json::json!(*i),
        Value::SmallInt(Some(i)) => serde_json::json!(*i),
        Value::Int(Some(i)) => serde_json::json!(*i),
        Value::BigInt(Some(i)) => serde_json::json!(*i),
        Value::TinyUnsigned(Some(u)) => serde_json::json!(*u),
        Value::SmallUnsigned(Some(u)) => serde_json::json!(*u),
        Value::Unsigned(Some(u)) => serde_json::json!(*u),
        Value::BigUnsigned(Some(u)) => serde_json::json!(*u),
        Value::Float(Some(f)) => serde_json::json!(*f),
        Value::Double(Some(d)) => serde_json::json!(*d),
        Value::String(Some(s)) => serde_json::Value::String(s.clone()),
        Value::Char(Some(c)) => serde_json::Value::String(c.to_string()),
        Value::Json(Some(j)) => (**j).clone(),
        other => serde_json::Value::String(format!("{:?}", other)),
    }
}

/// Convert a JSON value back into a query value.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => null_value(),
        serde_json::Value::Bool(b) => Value::Bool(Some(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::BigInt(Some(i))
            } else if let Some(u) = n.as_u64() {
                Value::BigUnsigned(Some(u))
            } else {
                Value::Double(n.as_f64())
            }
        }
        serde_json::Value::String(s) => Value::String(Some(s.clone())),
        nested => Value::Json(Some(Box::new(nested.clone()))),
    }
}

/// Convert a whole row into a JSON object.
pub fn row_to_json(row: &Row) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in row {
        map.insert(name.clone(), value_to_json(value));
    }
    serde_json::Value::Object(map)
}

/// Expand a list-valued link attribute (denormalized multi-value foreign
/// key, stored as a JSON array) into its element values. Returns `None` for
/// scalar attributes.
pub fn value_as_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Json(Some(boxed)) => match boxed.as_ref() {
            serde_json::Value::Array(items) => Some(items.iter().map(json_to_value).collect()),
            _ => None,
        },
        _ => None,
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

    #[test]
    fn test_row_get_qualified() {
        let r = row(&[("customer_id", Value::Int(Some(7)))]);
        assert_eq!(
            row_get(&r, "orders.customer_id"),
            Some(&Value::Int(Some(7)))
        );
        assert_eq!(row_get(&r, "customer_id"), Some(&Value::Int(Some(7))));
        assert_eq!(row_get(&r, "orders.missing"), None);
    }

    #[test]
    fn test_value_signature_is_width_insensitive() {
        assert_eq!(
            value_signature(&Value::Int(Some(1))),
            value_signature(&Value::BigInt(Some(1)))
        );
        assert_eq!(
            value_signature(&Value::Unsigned(Some(7))),
            value_signature(&Value::SmallInt(Some(7)))
        );
        assert_ne!(
            value_signature(&Value::Int(Some(1))),
            value_signature(&Value::String(Some("1".to_string())))
        );
    }

    #[test]
    fn test_values_equal_across_widths_never_on_null() {
        assert!(values_equal(&Value::Int(Some(2)), &Value::BigInt(Some(2))));
        assert!(!values_equal(&Value::Int(Some(2)), &Value::BigInt(Some(3))));
        assert!(!values_equal(&Value::Int(None), &Value::Int(None)));
    }

    #[test]
    fn test_key_signature_composite_is_deterministic() {
        let a = row(&[
            ("id", Value::Int(Some(1))),
            ("tenant_id", Value::Int(Some(10))),
        ]);
        let b = row(&[
            ("tenant_id", Value::Int(Some(10))),
            ("id", Value::Int(Some(1))),
        ]);
        let attrs = vec!["id".to_string(), "tenant_id".to_string()];
        // Structurally equal keys collide regardless of row construction order.
        assert_eq!(key_signature(&a, &attrs), key_signature(&b, &attrs));
        assert!(key_signature(&a, &attrs).unwrap().contains('|'));
    }

    #[test]
    fn test_key_signature_missing_attributes() {
        let r = row(&[("id", Value::Int(Some(1)))]);
        assert_eq!(key_signature(&r, &["absent".to_string()]), None);
    }

    #[test]
    fn test_value_literal() {
        assert_eq!(value_literal(&Value::Int(Some(42))), "42");
        assert_eq!(value_literal(&Value::Int(None)), "NULL");
        assert_eq!(
            value_literal(&Value::String(Some("it's".to_string()))),
            "'it''s'"
        );
        assert_eq!(value_literal(&Value::Bool(Some(true))), "true");
        assert_eq!(
            value_literal(&Value::Bytes(Some(vec![0x48, 0x69]))),
            "'\\x4869'"
        );
    }

    #[test]
    fn test_json_round_trip() {
        let r = row(&[
            ("id", Value::Int(Some(3))),
            ("name", Value::String(Some("ada".to_string()))),
        ]);
        let json = row_to_json(&r);
        assert_eq!(json["id"], serde_json::json!(3));
        assert_eq!(json["name"], serde_json::json!("ada"));
        assert_eq!(
            json_to_value(&serde_json::json!("ada")),
            Value::String(Some("ada".to_string()))
        );
    }

    #[test]
    fn test_value_as_list() {
        let list = Value::Json(Some(Box::new(serde_json::json!([1, 2]))));
        let items = value_as_list(&list).unwrap();
        assert_eq!(items, vec![Value::BigInt(Some(1)), Value::BigInt(Some(2))]);
        assert_eq!(value_as_list(&Value::Int(Some(1))), None);
    }
}
