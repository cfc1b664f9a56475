//! Foreign resources held by one call.
//!
//! A [`QuerySession`] owns a frame, the term references allocated in it and
//! at most one open query. Dropping the session closes the query and then
//! discards the frame, so every exit path releases the engine resources
//! exactly once.

use plswipl_engine::{Engine, FrameId, Predicate, QueryId, TermRef};
use tracing::{debug, trace, warn};

use crate::error::BridgeError;
use crate::exception;

/// Result of stepping a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Solution,
    Exhausted,
}

pub struct QuerySession {
    engine: Engine,
    frame: Option<FrameId>,
    query: Option<QueryId>,
    terms: TermRef,
    slots: usize,
}

impl QuerySession {
    /// Open a frame holding `slots` contiguous term references.
    pub fn open(engine: &Engine, slots: usize) -> Self {
        let frame = engine.open_frame();
        let terms = engine.new_term_refs(slots);
        trace!(frame = %frame, slots, "session opened");
        Self {
            engine: engine.clone(),
            frame: Some(frame),
            query: None,
            terms,
            slots,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The `i`-th term slot.
    pub fn slot(&self, i: usize) -> TermRef {
        self.terms.offset(i)
    }

    pub fn query(&self) -> Option<QueryId> {
        self.query
    }

    pub fn is_released(&self) -> bool {
        self.frame.is_none()
    }

    /// Open a query calling `predicate` on the slots starting at `first`.
    pub fn open_query(&mut self, predicate: &Predicate, first: usize) -> Result<QueryId, BridgeError> {
        if self.is_released() {
            return Err(BridgeError::InvocationFinished("released"));
        }
        self.close();
        let query = self.engine.open_query(predicate, self.slot(first))?;
        self.query = Some(query);
        Ok(query)
    }

    /// Step the open query. Without an open query there are no solutions.
    pub fn step(&mut self) -> Result<Step, BridgeError> {
        let Some(query) = self.query else {
            return Ok(Step::Exhausted);
        };
        if self.engine.next_solution(query)? {
            Ok(Step::Solution)
        } else {
            Ok(Step::Exhausted)
        }
    }

    /// Raise the exception pending on the open query, if any.
    pub fn check_exception(&self, context: &str) -> Result<(), BridgeError> {
        match self.query {
            Some(query) => exception::check_exception(&self.engine, query, context),
            None => Ok(()),
        }
    }

    /// Close the open query, undoing its bindings. Idempotent.
    pub fn close(&mut self) {
        if let Some(query) = self.query.take() {
            if let Err(e) = self.engine.close_query(query) {
                warn!(query = %query, error = %e, "failed to close query");
            }
        }
    }

    /// Close the query, then discard the frame. Idempotent.
    pub fn release(&mut self) {
        self.close();
        if let Some(frame) = self.frame.take() {
            if let Err(e) = self.engine.discard_frame(frame) {
                warn!(frame = %frame, error = %e, "failed to discard frame");
            }
            debug!(frame = %frame, "session released");
        }
    }
}

impl Drop for QuerySession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession")
            .field("frame", &self.frame)
            .field("query", &self.query)
            .field("slots", &self.slots)
            .finish()
    }
}
