//! Table schema descriptors.
//!
//! A schema is the engine's handle on one table-backed record class: its
//! table name, primary key, and the explicit registry of named relations.
//! Relations are declared here rather than discovered by probing, so an
//! unknown relation name fails fast with a configuration error.

use crate::error::AnchorError;
use crate::record::Record;
use crate::relation::def::RelationDef;
use std::sync::Arc;

/// Descriptor for one record class.
///
/// Implementations are cheap handles (usually unit structs) shared as
/// `Arc<dyn AnchorSchema>` between queries, relation definitions and records.
pub trait AnchorSchema: Send + Sync {
    /// The backing table name.
    fn table_name(&self) -> &str;

    /// Primary key attribute names, in declaration order.
    fn primary_key(&self) -> &[&str];

    /// Look up a named relation. `None` means the relation is not declared.
    fn relation(&self, name: &str) -> Option<RelationDef>;

    /// Hook invoked on every record of a populated result, in row order,
    /// after every requested relation has been resolved.
    fn after_find(&self, _record: &mut Record) {}
}

/// Resolve a named relation or fail with a configuration error.
pub fn resolve_relation(
    schema: &Arc<dyn AnchorSchema>,
    name: &str,
) -> Result<RelationDef, AnchorError> {
    match schema.relation(name) {
        Some(def) => {
            def.validate(name)?;
            Ok(def)
        }
        None => Err(AnchorError::config(format!(
            "relation `{}` is not defined on table `{}`",
            name,
            schema.table_name()
        ))),
    }
}

/// Primary key attribute names as owned strings.
pub fn primary_key_of(schema: &Arc<dyn AnchorSchema>) -> Vec<String> {
    schema
        .primary_key()
        .iter()
        .map(|name| (*name).to_string())
        .collect()
}
