//! Pending foreign exceptions as host errors.

use plswipl_engine::{Engine, QueryId};
use tracing::warn;

use crate::error::BridgeError;

/// Description used when the exception term cannot be rendered.
pub const UNKNOWN_EXCEPTION: &str = "*UNKNOWN*";

/// Raise the exception pending on `query`, if any, with `context` attached.
pub fn check_exception(engine: &Engine, query: QueryId, context: &str) -> Result<(), BridgeError> {
    let Some(exception) = engine.exception(query)? else {
        return Ok(());
    };
    let description = exception
        .describe()
        .unwrap_or_else(|| UNKNOWN_EXCEPTION.to_string());
    warn!(query = %query, exception = %description, context, "foreign exception");
    Err(BridgeError::ForeignException {
        description,
        context: context.to_string(),
    })
}
