//! Error types for the embedded engine.

use thiserror::Error;

use crate::engine::{FrameId, QueryId};

/// Errors reported by the engine API.
///
/// These cover misuse of the handle-based interface and source loading.
/// Failures of the Prolog program itself are never `EngineError`s: they are
/// exceptions pending on the query that raised them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source text could not be read.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// The frame was already discarded or never existed.
    #[error("invalid or discarded frame {0}")]
    InvalidFrame(FrameId),

    /// The query was already closed or never existed.
    #[error("invalid or closed query {0}")]
    InvalidQuery(QueryId),

    /// Only the innermost open query can be stepped.
    #[error("query {0} is not the innermost open query")]
    QueryNotInnermost(QueryId),

    /// A term reference outside the allocated range.
    #[error("term reference {0} is out of range")]
    InvalidTermRef(usize),

    /// A functor that cannot be built from the given arguments.
    #[error("cannot build functor {name}/{arity}")]
    InvalidFunctor { name: String, arity: usize },

    /// A clause or directive raised an exception while loading source text.
    #[error("loading source raised {0}")]
    Load(String),
}
