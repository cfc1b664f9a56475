//! Model of the host's function-call protocol.

use tracing::debug;

use crate::invocation::{Invocation, InvocationState};
use crate::types::{Datum, Oid};

/// How the host is calling the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallContext {
    Function,
    Trigger,
}

/// Arguments of one host call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallInfo {
    pub fn_oid: Oid,
    /// Input arguments in declaration order; `None` is SQL NULL.
    pub args: Vec<Option<Datum>>,
    pub context: CallContext,
}

impl FunctionCallInfo {
    pub fn new(fn_oid: Oid, args: Vec<Option<Datum>>) -> Self {
        Self {
            fn_oid,
            args,
            context: CallContext::Function,
        }
    }
}

/// One result row: the return value plus converted output arguments by
/// position, ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub value: Datum,
    pub outputs: Vec<(usize, Datum)>,
}

/// What a handler call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    /// Result of a scalar call.
    Value(Row),
    /// Next row of a set-returning call.
    Next(Row),
    /// A set-returning call has no more rows.
    Done,
}

/// State the host keeps across the calls of one set-returning invocation.
///
/// Resetting it, or dropping it, drops the invocation and with it the
/// session's frame and query.
#[derive(Debug, Default)]
pub struct MultiCallContext {
    invocation: Option<Invocation>,
    calls: u64,
}

impl MultiCallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handler calls made with this context.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn is_first_call(&self) -> bool {
        self.calls == 0
    }

    /// State of the held invocation, if any.
    pub fn state(&self) -> Option<InvocationState> {
        self.invocation.as_ref().map(Invocation::state)
    }

    /// Drop the held invocation. Models the host tearing down the
    /// multi-call memory region.
    pub fn reset(&mut self) {
        if let Some(invocation) = self.invocation.take() {
            debug!(
                function = %invocation.descriptor().name,
                rows = invocation.rows(),
                state = %invocation.state(),
                "multi-call context reset"
            );
        }
    }

    pub(crate) fn record_call(&mut self) -> u64 {
        self.calls += 1;
        self.calls
    }

    pub(crate) fn has_invocation(&self) -> bool {
        self.invocation.is_some()
    }

    pub(crate) fn install(&mut self, invocation: Invocation) {
        self.invocation = Some(invocation);
    }

    pub(crate) fn invocation_mut(&mut self) -> Option<&mut Invocation> {
        self.invocation.as_mut()
    }
}
