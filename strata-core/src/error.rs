//! Error types for Strata routing operations.
//!
//! One enum of semantic categories. Targeting errors surface to the caller;
//! refresh errors are logged and retried on the next tick; invariant
//! violations mean the in-memory routing view is unrecoverable.

use std::fmt;

/// The result type for Strata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Strata routing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Point targeting could not resolve the key to a single chunk, either
    /// because the query collation disagrees with the collection default on
    /// a collation-sensitive key or because the key does not match the
    /// shard-key pattern.
    ShardKeyNotFound {
        /// Why the key could not be targeted.
        reason: String,
    },

    /// A chunk delta disagrees with the current collection epoch, or a built
    /// routing table does not cover the full keyspace.
    ConflictingOperationInProgress {
        /// What conflicted.
        reason: String,
    },

    /// The catalogue reports the namespace is not sharded.
    NamespaceNotFound {
        /// The namespace that was not found.
        ns: String,
    },

    /// An update referenced a chunk range the routing index cannot locate.
    /// The in-memory view is unrecoverable; continuing would mean silent
    /// misrouting.
    InvariantViolation {
        /// The invariant that was violated.
        reason: String,
    },

    /// The admin command surface does not know the requested command.
    CommandNotFound {
        /// The unknown command name.
        name: String,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: String,
    },

    /// An operation against the catalogue timed out.
    Timeout {
        /// What operation timed out.
        operation: &'static str,
        /// How long we waited (in milliseconds).
        waited_ms: u64,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShardKeyNotFound { reason } => {
                write!(f, "shard key not found: {reason}")
            }
            Self::ConflictingOperationInProgress { reason } => {
                write!(f, "conflicting operation in progress: {reason}")
            }
            Self::NamespaceNotFound { ns } => {
                write!(f, "namespace not found: {ns}")
            }
            Self::InvariantViolation { reason } => {
                write!(f, "routing invariant violated: {reason}")
            }
            Self::CommandNotFound { name } => {
                write!(f, "no such command: {name}")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::Timeout {
                operation,
                waited_ms,
            } => {
                write!(f, "timeout: {operation} after {waited_ms}ms")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            operation: "load_chunks",
            waited_ms: 5_000,
        };
        assert_eq!(format!("{err}"), "timeout: load_chunks after 5000ms");
    }

    #[test]
    fn test_namespace_not_found_display() {
        let err = Error::NamespaceNotFound {
            ns: "test.orders".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("test.orders"));
    }
}
