//! Relation definitions.
//!
//! A `RelationDef` is pure metadata: which table the relation targets, how
//! its attributes map onto the owner's attributes, whether it is
//! single-valued or multi-valued, and an optional junction hop. Definitions
//! carry no records and no executor state; the resolver and planner consume
//! them.

use crate::error::AnchorError;
use crate::query::cond::Cond;
use crate::schema::AnchorSchema;
use sea_query::Order;
use std::fmt;
use std::sync::Arc;

/// Junction hop for many-to-many relations.
///
/// The two shapes are mutually exclusive by construction: a relation either
/// names a raw junction table or reuses another declared relation as the
/// first hop, never both.
#[derive(Clone)]
pub enum Via {
    /// Direct relation, no junction.
    None,
    /// Raw junction table. `link` maps junction columns onto owner
    /// attributes, `(junction_column, owner_attribute)` pairs.
    Table {
        table: String,
        link: Vec<(String, String)>,
    },
    /// Reuse a declared relation as the junction hop.
    Relation {
        name: String,
        def: Box<RelationDef>,
    },
}

impl Via {
    pub fn is_none(&self) -> bool {
        matches!(self, Via::None)
    }
}

/// Metadata describing one named relation.
///
/// `link` is oriented foreign-to-local: each pair maps an attribute of the
/// target table onto an attribute of the declaring side. For `via` relations
/// the declaring side of `link` is the junction, not the owner.
#[derive(Clone)]
pub struct RelationDef {
    /// Multi-valued (`has_many`) or single-valued (`has_one`).
    pub multiple: bool,
    /// Schema of the target record class.
    pub target: Arc<dyn AnchorSchema>,
    /// `(target_attribute, local_attribute)` pairs.
    pub link: Vec<(String, String)>,
    pub via: Via,
    /// Name of the inverse relation declared on the target, if any.
    pub inverse_of: Option<String>,
    /// Extra filter applied to the relation query.
    pub filter: Option<Cond>,
    pub order_by: Vec<(String, Order)>,
    /// Nested relations eagerly loaded whenever this relation is resolved.
    pub with: Vec<String>,
    /// Extra join condition, applied as `ON` when the relation is joined and
    /// as a plain filter when it is resolved standalone.
    pub on: Option<Cond>,
}

impl RelationDef {
    fn new(multiple: bool, target: Arc<dyn AnchorSchema>, link: Vec<(&str, &str)>) -> Self {
        RelationDef {
            multiple,
            target,
            link: link
                .into_iter()
                .map(|(foreign, local)| (foreign.to_string(), local.to_string()))
                .collect(),
            via: Via::None,
            inverse_of: None,
            filter: None,
            order_by: Vec::new(),
            with: Vec::new(),
            on: None,
        }
    }

    /// Multi-valued relation: target rows whose `link` attributes match the
    /// owner.
    pub fn has_many(target: Arc<dyn AnchorSchema>, link: Vec<(&str, &str)>) -> Self {
        Self::new(true, target, link)
    }

    /// Single-valued relation; also covers the belongs-to direction, where
    /// the local side of `link` is the owner's foreign key.
    pub fn has_one(target: Arc<dyn AnchorSchema>, link: Vec<(&str, &str)>) -> Self {
        Self::new(false, target, link)
    }

    /// Route the relation through a raw junction table.
    pub fn via_table(mut self, table: impl Into<String>, link: Vec<(&str, &str)>) -> Self {
        self.via = Via::Table {
            table: table.into(),
            link: link
                .into_iter()
                .map(|(junction, local)| (junction.to_string(), local.to_string()))
                .collect(),
        };
        self
    }

    /// Route the relation through another declared relation.
    pub fn via_relation(mut self, name: impl Into<String>, def: RelationDef) -> Self {
        self.via = Via::Relation {
            name: name.into(),
            def: Box::new(def),
        };
        self
    }

    /// Declare the inverse relation on the target side.
    pub fn inverse_of(mut self, name: impl Into<String>) -> Self {
        self.inverse_of = Some(name.into());
        self
    }

    /// Add a filter condition to the relation query.
    pub fn filter(mut self, cond: Cond) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(cond),
            None => cond,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    /// Eagerly resolve a nested relation whenever this one is resolved.
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.with.push(name.into());
        self
    }

    /// Extra `ON` condition.
    pub fn on(mut self, cond: Cond) -> Self {
        self.on = Some(cond);
        self
    }

    /// Target-side attributes of `link`.
    pub fn foreign_attrs(&self) -> Vec<String> {
        self.link.iter().map(|(foreign, _)| foreign.clone()).collect()
    }

    /// Local-side attributes of `link`.
    pub fn local_attrs(&self) -> Vec<String> {
        self.link.iter().map(|(_, local)| local.clone()).collect()
    }

    /// Check structural invariants, reported against the given relation name.
    pub fn validate(&self, name: &str) -> Result<(), AnchorError> {
        if self.link.is_empty() {
            return Err(AnchorError::config(format!(
                "relation `{}` has an empty link",
                name
            )));
        }
        if let Via::Table { link, .. } = &self.via {
            if link.is_empty() {
                return Err(AnchorError::config(format!(
                    "relation `{}` has an empty junction link",
                    name
                )));
            }
        }
        if let Via::Relation { def, .. } = &self.via {
            def.validate(name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("multiple", &self.multiple)
            .field("target", &self.target.table_name())
            .field("link", &self.link)
            .field("via", &!self.via.is_none())
            .field("inverse_of", &self.inverse_of)
            .finish()
    }
}
