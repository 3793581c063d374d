//! Relation definitions and resolution.
//!
//! - **Def**: relation metadata (`RelationDef`, junction hops via `Via`)
//! - **Eager**: batched "select in" resolution with bucket fan-out
//! - **Lazy**: per-record memoized access and link management

pub mod def;
#[doc(inline)]
pub use def::{RelationDef, Via};

pub mod eager;
#[doc(inline)]
pub use eager::{eager_load, Parents};

pub mod lazy;
#[doc(inline)]
pub use lazy::{get_related, get_related_with_map, link, set_related, unlink, unlink_all};
