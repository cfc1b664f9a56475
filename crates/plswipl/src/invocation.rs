//! Per-invocation state machine.
//!
//! An [`Invocation`] is created on the first call of a function. Scalar
//! calls step it once; set-returning calls keep it in the host's
//! [`MultiCallContext`](crate::host::MultiCallContext) and step it once per
//! host call, so the query's choice points survive between rows.

use std::fmt;
use std::sync::Arc;

use plswipl_engine::{Engine, EngineError, Predicate};
use tracing::{debug, trace};

use crate::descriptor::CallDescriptor;
use crate::encoding::ServerEncoding;
use crate::error::BridgeError;
use crate::host::Row;
use crate::marshal;
use crate::session::{QuerySession, Step};
use crate::types::{Datum, TypeTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Uninitialized,
    FirstCallRunning,
    StepReady,
    StepAdvancing,
    Done,
    Errored,
}

impl InvocationState {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationState::Uninitialized => "uninitialized",
            InvocationState::FirstCallRunning => "first_call_running",
            InvocationState::StepReady => "step_ready",
            InvocationState::StepAdvancing => "step_advancing",
            InvocationState::Done => "done",
            InvocationState::Errored => "errored",
        }
    }

    /// No further rows can be produced.
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Done | InvocationState::Errored)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical call of a function and the session it owns.
///
/// Slot layout: arguments `0..argc`, the return value at `argc`, then the
/// goal and the source text handed to the entry predicate.
#[derive(Debug)]
pub struct Invocation {
    descriptor: Arc<CallDescriptor>,
    session: QuerySession,
    state: InvocationState,
    encoding: ServerEncoding,
    rows: u64,
}

impl Invocation {
    /// Marshal the arguments, build the goal and open the query.
    ///
    /// `args` holds the input arguments only, in declaration order.
    pub fn start(
        engine: &Engine,
        entry: &Predicate,
        descriptor: Arc<CallDescriptor>,
        args: &[Option<Datum>],
        encoding: ServerEncoding,
    ) -> Result<Self, BridgeError> {
        let inputs: Vec<usize> = descriptor.inputs().collect();
        if args.len() != inputs.len() {
            return Err(BridgeError::ArityOrModeMismatch {
                oid: descriptor.oid,
                message: format!(
                    "called with {} arguments, expected {}",
                    args.len(),
                    inputs.len()
                ),
            });
        }

        let argc = descriptor.argc();
        let mut invocation = Self {
            session: QuerySession::open(engine, argc + 3),
            descriptor,
            state: InvocationState::Uninitialized,
            encoding,
            rows: 0,
        };
        invocation.transition(InvocationState::FirstCallRunning);
        match invocation.prepare(&inputs, args, entry) {
            Ok(()) => {
                invocation.transition(InvocationState::StepReady);
                Ok(invocation)
            }
            Err(e) => Err(invocation.fail(e)),
        }
    }

    fn prepare(
        &mut self,
        inputs: &[usize],
        args: &[Option<Datum>],
        entry: &Predicate,
    ) -> Result<(), BridgeError> {
        let descriptor = Arc::clone(&self.descriptor);
        let engine = self.session.engine().clone();
        let argc = descriptor.argc();

        // output slots stay unbound for the query to fill in
        for (&position, value) in inputs.iter().zip(args) {
            marshal::to_term(
                &engine,
                self.session.slot(position),
                value.as_ref(),
                &descriptor.arg_types[position],
                &self.encoding,
            )?;
        }

        let arity = descriptor.goal_arity();
        engine
            .cons_functor(
                self.session.slot(argc + 1),
                &descriptor.name,
                arity,
                self.session.slot(0),
            )
            .map_err(|e| match e {
                EngineError::InvalidFunctor { name, arity } => {
                    BridgeError::CompositionFailure { name, arity }
                }
                other => other.into(),
            })?;
        engine.put_string(self.session.slot(argc + 2), &descriptor.source)?;
        self.session.open_query(entry, argc + 1)?;
        debug!(
            function = %descriptor.name,
            oid = %descriptor.oid,
            arity,
            "invocation started"
        );
        Ok(())
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    pub fn is_released(&self) -> bool {
        self.session.is_released()
    }

    /// Advance to the next solution. `None` means the query is exhausted;
    /// the session is released at that point.
    pub fn step(&mut self) -> Result<Option<Row>, BridgeError> {
        match self.state {
            InvocationState::StepReady => {}
            InvocationState::Done => return Err(BridgeError::InvocationFinished("done")),
            InvocationState::Errored => return Err(BridgeError::InvocationFinished("errored")),
            other => {
                return Err(BridgeError::InvocationFinished(other.as_str()));
            }
        }

        self.transition(InvocationState::StepAdvancing);
        match self.session.step() {
            Ok(Step::Solution) => match self.convert() {
                Ok(row) => {
                    self.rows += 1;
                    self.transition(InvocationState::StepReady);
                    Ok(Some(row))
                }
                Err(e) => Err(self.fail(e)),
            },
            Ok(Step::Exhausted) => {
                let context = format!("while calling PLSWIPL function {}", self.descriptor.name);
                if let Err(e) = self.session.check_exception(&context) {
                    return Err(self.fail(e));
                }
                self.transition(InvocationState::Done);
                self.session.release();
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Output arguments in ascending order, then the return value.
    fn convert(&self) -> Result<Row, BridgeError> {
        let engine = self.session.engine();
        let descriptor = &self.descriptor;

        let mut outputs = Vec::new();
        for position in descriptor.outputs() {
            let datum = marshal::to_value(
                engine,
                self.session.slot(position),
                &descriptor.arg_types[position],
                &self.encoding,
                &format!("output argument {position}"),
            )?;
            outputs.push((position, datum));
        }

        let value = if descriptor.return_type == TypeTag::Void {
            Datum::Void
        } else {
            marshal::to_value(
                engine,
                self.session.slot(descriptor.argc()),
                &descriptor.return_type,
                &self.encoding,
                "output value",
            )?
        };
        Ok(Row { value, outputs })
    }

    fn transition(&mut self, next: InvocationState) {
        trace!(
            function = %self.descriptor.name,
            from = %self.state,
            to = %next,
            "invocation state"
        );
        self.state = next;
    }

    fn fail(&mut self, err: BridgeError) -> BridgeError {
        self.transition(InvocationState::Errored);
        self.session.release();
        debug!(function = %self.descriptor.name, error = %err, "invocation failed");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArgMode, Oid};
    use plswipl_engine::EngineConfig;
    use pretty_assertions::assert_eq;

    fn setup() -> (Engine, Predicate) {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.consult(crate::BOOT_LIBRARY).unwrap();
        let entry = engine.predicate("handle_function", 2);
        (engine, entry)
    }

    fn descriptor(name: &str, types: &[&str], modes: &[ArgMode], ret: &str, source: &str) -> Arc<CallDescriptor> {
        Arc::new(CallDescriptor {
            oid: Oid(1),
            name: name.into(),
            arg_modes: modes.to_vec(),
            arg_types: types.iter().map(|t| TypeTag::parse(t)).collect(),
            return_type: TypeTag::parse(ret),
            returns_set: false,
            source: source.into(),
        })
    }

    #[test]
    fn test_rows_then_done() {
        let (engine, entry) = setup();
        let d = descriptor(
            "digits",
            &["int4"],
            &[ArgMode::Input],
            "int4",
            "digits(N, D) :- between(1, N, D).",
        );
        let mut invocation =
            Invocation::start(&engine, &entry, d, &[Some(Datum::Int4(3))], ServerEncoding::Utf8)
                .unwrap();
        assert_eq!(invocation.state(), InvocationState::StepReady);

        let mut values = Vec::new();
        while let Some(row) = invocation.step().unwrap() {
            values.push(row.value);
        }
        assert_eq!(values, vec![Datum::Int4(1), Datum::Int4(2), Datum::Int4(3)]);
        assert_eq!(invocation.state(), InvocationState::Done);
        assert!(invocation.is_released());
        assert!(matches!(
            invocation.step(),
            Err(BridgeError::InvocationFinished("done"))
        ));
    }

    #[test]
    fn test_output_arguments_precede_return() {
        let (engine, entry) = setup();
        let d = descriptor(
            "divmod",
            &["int8", "int8", "int8", "int8"],
            &[ArgMode::Input, ArgMode::Input, ArgMode::Output, ArgMode::Output],
            "void",
            "divmod(A, B, Q, R) :- Q is A // B, R is A mod B.",
        );
        let mut invocation = Invocation::start(
            &engine,
            &entry,
            d,
            &[Some(Datum::Int8(17)), Some(Datum::Int8(5))],
            ServerEncoding::Utf8,
        )
        .unwrap();
        let row = invocation.step().unwrap().unwrap();
        assert_eq!(
            row,
            Row {
                value: Datum::Void,
                outputs: vec![(2, Datum::Int8(3)), (3, Datum::Int8(2))],
            }
        );
    }

    #[test]
    fn test_argument_conversion_fails_before_query() {
        let (engine, entry) = setup();
        let d = descriptor("f", &["json"], &[ArgMode::Input], "int4", "f(_, 1).");
        let before = engine.stats();
        let err = Invocation::start(
            &engine,
            &entry,
            d,
            &[Some(Datum::Int4(1))],
            ServerEncoding::Utf8,
        )
        .unwrap_err();

        assert!(matches!(err, BridgeError::UnsupportedType(_)));
        let after = engine.stats();
        assert_eq!(after.queries_opened, before.queries_opened);
        assert_eq!(after.frames_discarded, before.frames_discarded + 1);
    }

    #[test]
    fn test_wrong_argument_count() {
        let (engine, entry) = setup();
        let d = descriptor("f", &["int4", "int4"], &[ArgMode::Input; 2], "int4", "f(_, _, 1).");
        let err = Invocation::start(&engine, &entry, d, &[None], ServerEncoding::Utf8).unwrap_err();
        assert!(matches!(err, BridgeError::ArityOrModeMismatch { .. }));
    }

    #[test]
    fn test_conversion_failure_drops_row() {
        let (engine, entry) = setup();
        let d = descriptor("big", &[], &[], "int2", "big(X) :- member(X, [1, 100000]).");
        let mut invocation = Invocation::start(&engine, &entry, d, &[], ServerEncoding::Utf8).unwrap();

        assert_eq!(invocation.step().unwrap().unwrap().value, Datum::Int2(1));
        assert!(matches!(
            invocation.step(),
            Err(BridgeError::Overflow { value: 100000, .. })
        ));
        assert_eq!(invocation.state(), InvocationState::Errored);
        assert!(invocation.is_released());
    }
}
