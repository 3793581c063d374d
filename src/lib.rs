//! # Anchor
//!
//! Relation-aware query composition and eager/lazy loading over batched
//! data-store queries.
//!
//! Relations are declared explicitly on an [`AnchorSchema`]; queries are
//! composed with [`ActiveQuery`] and frozen into executor-agnostic
//! [`QuerySpec`] plans. Eager loading resolves each requested relation with
//! one batched query per relation and fans results back out to their
//! parents; lazy access memoizes per record.

pub mod error;
#[doc(inline)]
pub use error::AnchorError;

pub mod value;
#[doc(inline)]
pub use value::Row;

pub mod schema;
#[doc(inline)]
pub use schema::AnchorSchema;

pub mod record;
#[doc(inline)]
pub use record::{Record, RecordRef, RecordSet, RelatedValue};

pub mod executor;
#[doc(inline)]
pub use executor::{AnchorExecutor, MemoryExecutor};

pub mod query;
#[doc(inline)]
pub use query::{ActiveQuery, Cond, IndexBy, QuerySpec, ResultSet};

pub mod relation;
#[doc(inline)]
pub use relation::{RelationDef, Via};

pub mod identity_map;
#[doc(inline)]
pub use identity_map::IdentityMap;
