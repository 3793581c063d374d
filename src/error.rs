//! Error types for the relation engine.
//!
//! The taxonomy separates programmer errors surfaced at definition-resolution
//! time (`Configuration`), invalid mutation preconditions (`Call`), failures
//! reported by the query executor (`Execution`) and row conversion problems
//! (`Parse`). Absence of a match is never an error: missing relations resolve
//! to `None` or an empty collection.

use std::fmt;

/// Error type shared by query composition, relation resolution and the
/// executor boundary.
#[derive(Debug)]
pub enum AnchorError {
    /// Invalid relation or query definition (missing `link`, unresolvable
    /// relation name, undefined primary key). Raised synchronously, never
    /// deferred into an execution chain.
    Configuration(String),
    /// Invalid `link`/`unlink` precondition, e.g. linking two unpersisted
    /// records across a junction.
    Call(String),
    /// Failure reported by the query executor.
    Execution(String),
    /// Row parsing/conversion error.
    Parse(String),
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorError::Configuration(s) => {
                write!(f, "Configuration error: {s}")
            }
            AnchorError::Call(s) => {
                write!(f, "Call error: {s}")
            }
            AnchorError::Execution(s) => {
                write!(f, "Execution error: {s}")
            }
            AnchorError::Parse(s) => {
                write!(f, "Parse error: {s}")
            }
        }
    }
}

impl std::error::Error for AnchorError {}

impl AnchorError {
    /// Shorthand for a `Configuration` error.
    pub fn config(msg: impl Into<String>) -> Self {
        AnchorError::Configuration(msg.into())
    }

    /// Shorthand for a `Call` error.
    pub fn call(msg: impl Into<String>) -> Self {
        AnchorError::Call(msg.into())
    }

    /// Shorthand for an `Execution` error.
    pub fn execution(msg: impl Into<String>) -> Self {
        AnchorError::Execution(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        assert_eq!(
            AnchorError::config("relation `orders` is not defined").to_string(),
            "Configuration error: relation `orders` is not defined"
        );
        assert_eq!(
            AnchorError::call("both records are unpersisted").to_string(),
            "Call error: both records are unpersisted"
        );
        assert_eq!(
            AnchorError::execution("connection reset").to_string(),
            "Execution error: connection reset"
        );
        assert_eq!(
            AnchorError::Parse("bad column".into()).to_string(),
            "Parse error: bad column"
        );
    }
}
