//! Error types for the call bridge.

use thiserror::Error;

use crate::types::{Oid, TypeTag};

/// Errors raised to the host by the bridge.
///
/// Every error aborts the current invocation. Foreign resources are released
/// by the session's drop, never by the code raising the error.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A value of a type outside the supported set.
    #[error("PL/SWI-Prolog functions cannot accept type {0}")]
    UnsupportedType(TypeTag),

    /// An argument mode other than input or output.
    #[error("PL/SWI-Prolog functions cannot accept argument mode '{0}'")]
    UnsupportedArgMode(char),

    /// A narrowing conversion out of range.
    #[error("value {value} is out of range for type {ty}")]
    Overflow { value: i64, ty: TypeTag },

    /// Catalog data inconsistent with the call.
    #[error("function {oid}: {message}")]
    ArityOrModeMismatch { oid: Oid, message: String },

    /// The foreign engine raised an exception while stepping.
    #[error("exception {description}")]
    ForeignException {
        description: String,
        context: String,
    },

    /// A scalar call produced no solution and no exception.
    #[error("PL/SWI-Prolog function {0} failed")]
    NoSolution(String),

    /// The goal term could not be built.
    #[error("cannot build goal {name}/{arity}")]
    CompositionFailure { name: String, arity: usize },

    /// A result term is not convertible to the requested type.
    #[error("PL/SWI-Prolog cannot convert {what} to type {ty}")]
    Conversion { what: String, ty: TypeTag },

    /// Text that cannot be represented in the target encoding.
    #[error("invalid byte sequence for encoding {0}")]
    Encoding(String),

    /// Catalog lookup failed.
    #[error("catalog lookup failed: {0}")]
    Catalog(String),

    /// The bridge was called as a trigger.
    #[error("PL/SWI-Prolog functions cannot be called as triggers")]
    TriggerNotSupported,

    /// A set-returning function called without a multi-call context.
    #[error("set-valued function called in context that cannot accept a set")]
    SetNotAllowed,

    /// The invocation already finished.
    #[error("invocation is already {0}")]
    InvocationFinished(&'static str),

    /// The boot library did not define an entry predicate.
    #[error("entry predicate {0} is not defined")]
    Bootstrap(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error reading configuration or program files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine API error.
    #[error(transparent)]
    Engine(#[from] plswipl_engine::EngineError),
}

impl BridgeError {
    /// SQLSTATE code reported to the host.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            BridgeError::UnsupportedType(_)
            | BridgeError::UnsupportedArgMode(_)
            | BridgeError::NoSolution(_)
            | BridgeError::CompositionFailure { .. }
            | BridgeError::Conversion { .. }
            | BridgeError::TriggerNotSupported
            | BridgeError::SetNotAllowed => "0A000",
            BridgeError::Overflow { .. } => "22003",
            BridgeError::Encoding(_) => "22021",
            BridgeError::ForeignException { .. } => "38000",
            BridgeError::ArityOrModeMismatch { .. } => "42P13",
            BridgeError::Config(_) => "F0000",
            BridgeError::Catalog(_)
            | BridgeError::InvocationFinished(_)
            | BridgeError::Bootstrap(_)
            | BridgeError::Io(_)
            | BridgeError::Engine(_) => "XX000",
        }
    }

    /// Diagnostic context attached to the error, if any.
    pub fn context(&self) -> Option<&str> {
        match self {
            BridgeError::ForeignException { context, .. } => Some(context),
            _ => None,
        }
    }
}
