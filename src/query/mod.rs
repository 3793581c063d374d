//! Query composition and population.
//!
//! - **Cond**: structurally-inspectable condition trees
//! - **Spec**: frozen, executable query plans
//! - **Active**: the chainable, relation-aware query builder
//! - **Join**: `join_with` relation-path expansion
//! - **Populate**: result shaping, de-duplication and eager-load dispatch

pub mod cond;
#[doc(inline)]
pub use cond::Cond;

pub mod spec;
#[doc(inline)]
pub use spec::{Join, QuerySpec};

pub mod active;
#[doc(inline)]
pub use active::{ActiveQuery, IndexBy, JoinWithEntry, QueryConstraint, WithSpec};

pub(crate) mod join;

pub mod populate;
#[doc(inline)]
pub use populate::ResultSet;
