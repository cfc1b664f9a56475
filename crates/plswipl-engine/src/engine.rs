//! Handle-based interface to the engine.
//!
//! Callers work through opaque handles: frames scope term allocations, term
//! references name slots holding terms, and queries step a goal through its
//! solutions. Handles are plain values; every operation validates them and
//! reports stale ones as errors instead of touching freed state.
//!
//! Frames and queries live on one stack. Closing a query or discarding a
//! frame that is not on top only marks it; its bindings and cells are
//! reclaimed once everything opened after it is gone too.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::database::Database;
use crate::error::EngineError;
use crate::loader::{self, LoadReport};
use crate::machine::{Context, Machine, Outcome};
use crate::parser::parse_program;
use crate::store::{Addr, Cell, Store};
use crate::term::{NIL, Term};

const PRELUDE: &str = include_str!("prelude.pl");

/// Functors wider than this are refused by `cons_functor`.
pub const MAX_ARITY: usize = 1024;

/// Resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Inferences allowed for a single `next_solution` call.
    pub max_inferences: u64,
    /// Deepest term that can be copied out of the engine.
    pub max_term_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inferences: 10_000_000,
            max_term_depth: 2_000,
        }
    }
}

/// Isolation scope for term references and the cells they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// An open query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query#{}", self.0)
    }
}

/// A term reference slot. Slots allocated together are contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermRef(usize);

impl TermRef {
    /// The `i`-th slot after this one.
    pub fn offset(self, i: usize) -> TermRef {
        TermRef(self.0 + i)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// How `get_text` converts a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMode {
    /// Atoms, strings and numbers only.
    Atomic,
    /// Any term, written in canonical syntax.
    Write,
}

/// A predicate to call, by name and arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    name: String,
    arity: usize,
}

impl Predicate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// An exception raised by a query and not caught inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingException {
    term: Option<Term>,
}

impl PendingException {
    /// The exception term, if it could be copied out of the engine.
    pub fn term(&self) -> Option<&Term> {
        self.term.as_ref()
    }

    /// The exception written as text.
    pub fn describe(&self) -> Option<String> {
        self.term.as_ref().map(Term::to_string)
    }
}

/// Lifetime counters for frames and queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_opened: u64,
    pub frames_discarded: u64,
    pub queries_opened: u64,
    pub queries_closed: u64,
    pub open_frames: usize,
    pub open_queries: usize,
}

struct FrameRecord {
    id: FrameId,
    refs: usize,
    trail: usize,
    heap: usize,
    released: bool,
}

struct QueryRecord {
    id: QueryId,
    predicate: Predicate,
    machine: Machine,
    /// Innermost live frame when the query was opened.
    owner: Option<FrameId>,
    trail: usize,
    heap: usize,
    finished: bool,
    closed: bool,
    exception: Option<PendingException>,
}

struct EngineState {
    store: Store,
    db: Database,
    refs: Vec<Addr>,
    frames: Vec<FrameRecord>,
    queries: Vec<QueryRecord>,
    next_id: u64,
    stats: EngineStats,
    config: EngineConfig,
}

impl EngineState {
    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn slot(&self, t: TermRef) -> Result<Addr, EngineError> {
        let addr = self
            .refs
            .get(t.0)
            .copied()
            .ok_or(EngineError::InvalidTermRef(t.0))?;
        if self.in_released_frame(t.0) {
            return Err(EngineError::InvalidTermRef(t.0));
        }
        Ok(addr)
    }

    /// Slots of a discarded frame stay allocated until it is reclaimed,
    /// but they are no longer usable.
    fn in_released_frame(&self, index: usize) -> bool {
        self.frames.iter().enumerate().any(|(i, frame)| {
            let end = self
                .frames
                .get(i + 1)
                .map_or(self.refs.len(), |next| next.refs);
            frame.released && (frame.refs..end).contains(&index)
        })
    }

    /// Point a slot at a new host-owned cell.
    fn put(&mut self, t: TermRef, make: impl FnOnce(&mut Store) -> Addr) -> Result<(), EngineError> {
        self.slot(t)?;
        let addr = make(&mut self.store);
        self.store.protect();
        self.refs[t.0] = addr;
        Ok(())
    }

    fn cell(&self, t: TermRef) -> Result<&Cell, EngineError> {
        let addr = self.slot(t)?;
        Ok(self.store.cell(self.store.deref(addr)))
    }

    fn context(&mut self) -> Context<'_> {
        Context {
            store: &mut self.store,
            db: &mut self.db,
            inferences: 0,
            max_inferences: self.config.max_inferences,
        }
    }

    fn live_frame(&self, frame: FrameId) -> Option<usize> {
        self.frames
            .iter()
            .position(|record| record.id == frame && !record.released)
    }

    fn live_query(&self, query: QueryId) -> Option<usize> {
        self.queries
            .iter()
            .position(|record| record.id == query && !record.closed)
    }

    fn mark_closed(&mut self, position: usize) {
        let query = &mut self.queries[position];
        query.closed = true;
        query.finished = true;
        self.stats.queries_closed += 1;
        debug!(query = %query.id, predicate = %query.predicate, "query closed");
    }

    /// Pop closed queries and released frames while the most recently
    /// opened of the two is one of them, undoing bindings and freeing cells.
    fn reclaim(&mut self) {
        loop {
            let query = self.queries.last().map(|q| (q.id.0, q.closed));
            let frame = self.frames.last().map(|f| (f.id.0, f.released));
            match (query, frame) {
                (Some((q, true)), frame) if frame.is_none_or(|(f, _)| q > f) => {
                    if let Some(record) = self.queries.pop() {
                        self.store.restore(record.trail, record.heap);
                        trace!(query = %record.id, "query reclaimed");
                    }
                }
                (query, Some((f, true))) if query.is_none_or(|(q, _)| f > q) => {
                    if let Some(record) = self.frames.pop() {
                        self.refs.truncate(record.refs);
                        if self.queries.is_empty() {
                            self.store.release(record.trail, record.heap);
                        } else {
                            // an outer query may own cells above the mark;
                            // they are freed when it closes
                            self.store.unprotect(record.heap);
                        }
                        trace!(frame = %record.id, "frame reclaimed");
                    }
                }
                _ => break,
            }
        }
        self.stats.open_frames = self.frames.iter().filter(|f| !f.released).count();
        self.stats.open_queries = self.queries.iter().filter(|q| !q.closed).count();
    }
}

/// Shared handle on one engine instance.
///
/// The engine is single-threaded; cloning the handle shares the instance.
#[derive(Clone)]
pub struct Engine {
    state: Rc<RefCell<EngineState>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine with the library prelude loaded.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let engine = Self {
            state: Rc::new(RefCell::new(EngineState {
                store: Store::new(config.max_term_depth),
                db: Database::default(),
                refs: Vec::new(),
                frames: Vec::new(),
                queries: Vec::new(),
                next_id: 0,
                stats: EngineStats::default(),
                config,
            })),
        };
        engine.consult(PRELUDE)?;
        debug!(?config, "engine initialised");
        Ok(engine)
    }

    pub fn config(&self) -> EngineConfig {
        self.state.borrow().config
    }

    pub fn stats(&self) -> EngineStats {
        self.state.borrow().stats
    }

    pub fn open_frame(&self) -> FrameId {
        let mut state = self.state.borrow_mut();
        let id = FrameId(state.fresh_id());
        let record = FrameRecord {
            id,
            refs: state.refs.len(),
            trail: state.store.trail_len(),
            heap: state.store.heap_len(),
            released: false,
        };
        state.frames.push(record);
        state.stats.frames_opened += 1;
        state.stats.open_frames += 1;
        trace!(frame = %id, "frame opened");
        id
    }

    /// Discard a frame. Queries opened inside it are closed, and its term
    /// references become invalid. Frames opened after it are untouched; its
    /// bindings and cells are freed once they are discarded as well.
    pub fn discard_frame(&self, frame: FrameId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let position = state
            .live_frame(frame)
            .ok_or(EngineError::InvalidFrame(frame))?;

        let owned: Vec<usize> = state
            .queries
            .iter()
            .enumerate()
            .filter(|(_, query)| !query.closed && query.owner == Some(frame))
            .map(|(i, _)| i)
            .collect();
        for i in owned {
            state.mark_closed(i);
        }

        state.frames[position].released = true;
        state.stats.frames_discarded += 1;
        let deferred = position + 1 < state.frames.len();
        state.reclaim();
        trace!(frame = %frame, deferred, "frame discarded");
        Ok(())
    }

    /// Allocate `n` contiguous slots, each holding a fresh variable.
    pub fn new_term_refs(&self, n: usize) -> TermRef {
        let mut state = self.state.borrow_mut();
        let start = state.refs.len();
        for _ in 0..n {
            let var = state.store.new_var();
            state.refs.push(var);
        }
        state.store.protect();
        TermRef(start)
    }

    pub fn put_variable(&self, t: TermRef) -> Result<(), EngineError> {
        self.state.borrow_mut().put(t, Store::new_var)
    }

    /// The empty list `[]`.
    pub fn put_nil(&self, t: TermRef) -> Result<(), EngineError> {
        self.state.borrow_mut().put(t, |store| store.new_atom(NIL))
    }

    /// The atom `true` or `false`.
    pub fn put_bool(&self, t: TermRef, value: bool) -> Result<(), EngineError> {
        let name = if value { "true" } else { "false" };
        self.state.borrow_mut().put(t, |store| store.new_atom(name))
    }

    pub fn put_integer(&self, t: TermRef, value: i64) -> Result<(), EngineError> {
        self.state.borrow_mut().put(t, |store| store.new_int(value))
    }

    pub fn put_float(&self, t: TermRef, value: f64) -> Result<(), EngineError> {
        self.state.borrow_mut().put(t, |store| store.new_float(value))
    }

    pub fn put_string(&self, t: TermRef, text: &str) -> Result<(), EngineError> {
        self.state.borrow_mut().put(t, |store| store.new_str(text))
    }

    pub fn put_atom(&self, t: TermRef, name: &str) -> Result<(), EngineError> {
        self.state.borrow_mut().put(t, |store| store.new_atom(name))
    }

    /// Copy an owned term into a slot.
    pub fn put_term(&self, t: TermRef, term: &Term) -> Result<(), EngineError> {
        self.state
            .borrow_mut()
            .put(t, |store| store.copy_in(term, &mut Vec::new()))
    }

    /// Build `name(A1, ..., An)` in `out` from the `arity` slots starting
    /// at `args`.
    pub fn cons_functor(
        &self,
        out: TermRef,
        name: &str,
        arity: usize,
        args: TermRef,
    ) -> Result<(), EngineError> {
        if name.is_empty() || arity > MAX_ARITY {
            return Err(EngineError::InvalidFunctor {
                name: name.to_string(),
                arity,
            });
        }
        let mut state = self.state.borrow_mut();
        let addrs = (0..arity)
            .map(|i| state.slot(args.offset(i)))
            .collect::<Result<Vec<_>, _>>()?;
        state.put(out, |store| store.new_struct(name, &addrs))
    }

    /// `true` and `false` atoms.
    pub fn get_bool(&self, t: TermRef) -> Result<Option<bool>, EngineError> {
        let state = self.state.borrow();
        Ok(match state.cell(t)? {
            Cell::Atom(atom) => match state.store.atom_name(*atom) {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub fn get_int64(&self, t: TermRef) -> Result<Option<i64>, EngineError> {
        let state = self.state.borrow();
        Ok(match state.cell(t)? {
            Cell::Int(v) => Some(*v),
            _ => None,
        })
    }

    /// Floats, and integers converted to floats.
    pub fn get_float(&self, t: TermRef) -> Result<Option<f64>, EngineError> {
        let state = self.state.borrow();
        Ok(match state.cell(t)? {
            Cell::Float(v) => Some(*v),
            Cell::Int(v) => Some(*v as f64),
            _ => None,
        })
    }

    pub fn get_text(&self, t: TermRef, mode: TextMode) -> Result<Option<String>, EngineError> {
        let state = self.state.borrow();
        let addr = state.slot(t)?;
        Ok(match mode {
            TextMode::Atomic => state.store.text_of(addr),
            TextMode::Write => state.store.copy_out(addr).ok().map(|term| term.to_string()),
        })
    }

    /// Copy a slot's term out of the engine.
    pub fn get_term(&self, t: TermRef) -> Result<Option<Term>, EngineError> {
        let state = self.state.borrow();
        let addr = state.slot(t)?;
        Ok(state.store.copy_out(addr).ok())
    }

    pub fn is_variable(&self, t: TermRef) -> Result<bool, EngineError> {
        Ok(matches!(self.state.borrow().cell(t)?, Cell::Ref(_)))
    }

    pub fn predicate(&self, name: &str, arity: usize) -> Predicate {
        Predicate {
            name: name.to_string(),
            arity,
        }
    }

    /// Whether the predicate has a definition (possibly with no clauses).
    pub fn is_defined(&self, predicate: &Predicate) -> bool {
        let mut state = self.state.borrow_mut();
        let atom = state.store.intern(&predicate.name);
        state.db.is_defined((atom, predicate.arity))
    }

    /// Open a query calling `predicate` with the slots starting at `args`.
    pub fn open_query(&self, predicate: &Predicate, args: TermRef) -> Result<QueryId, EngineError> {
        let mut state = self.state.borrow_mut();
        let addrs = (0..predicate.arity)
            .map(|i| state.slot(args.offset(i)))
            .collect::<Result<Vec<_>, _>>()?;
        let goal = state.store.new_struct(&predicate.name, &addrs);
        state.store.protect();

        let id = QueryId(state.fresh_id());
        let owner = state
            .frames
            .iter()
            .rev()
            .find(|frame| !frame.released)
            .map(|frame| frame.id);
        let record = QueryRecord {
            id,
            predicate: predicate.clone(),
            machine: Machine::new(goal),
            owner,
            trail: state.store.trail_len(),
            heap: state.store.heap_len(),
            finished: false,
            closed: false,
            exception: None,
        };
        state.queries.push(record);
        state.stats.queries_opened += 1;
        state.stats.open_queries += 1;
        debug!(query = %id, predicate = %predicate, "query opened");
        Ok(id)
    }

    /// Closed queries that are not yet reclaimed still count as opened
    /// after the queries below them.
    fn innermost(state: &mut EngineState, query: QueryId) -> Result<usize, EngineError> {
        match state.live_query(query) {
            Some(position) if position + 1 == state.queries.len() => Ok(position),
            Some(_) => Err(EngineError::QueryNotInnermost(query)),
            None => Err(EngineError::InvalidQuery(query)),
        }
    }

    /// Step the query to its next solution. `false` means no more solutions
    /// or an uncaught exception; see [`Engine::exception`].
    pub fn next_solution(&self, query: QueryId) -> Result<bool, EngineError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let position = Self::innermost(state, query)?;
        if state.queries[position].finished {
            return Ok(false);
        }

        let mut record = state.queries.swap_remove(position);
        let mut ctx = state.context();
        let outcome = record.machine.solve(&mut ctx);
        let inferences = ctx.inferences;
        let found = match outcome {
            Outcome::Solution => true,
            Outcome::Failure => {
                record.finished = true;
                false
            }
            Outcome::Error(signal) => {
                record.finished = true;
                let exception = PendingException {
                    term: signal.into_ball(),
                };
                debug!(
                    query = %query,
                    exception = exception.describe().as_deref().unwrap_or("<unprintable>"),
                    "query raised exception"
                );
                record.exception = Some(exception);
                false
            }
        };
        trace!(query = %query, found, inferences, "query stepped");
        state.queries.push(record);
        Ok(found)
    }

    /// The exception raised by the query, if any.
    pub fn exception(&self, query: QueryId) -> Result<Option<PendingException>, EngineError> {
        let state = self.state.borrow();
        state
            .live_query(query)
            .map(|position| state.queries[position].exception.clone())
            .ok_or(EngineError::InvalidQuery(query))
    }

    /// Close the query. Its bindings are undone once every query and frame
    /// opened after it is gone; queries opened after it stay usable.
    pub fn close_query(&self, query: QueryId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let position = state
            .live_query(query)
            .ok_or(EngineError::InvalidQuery(query))?;
        state.mark_closed(position);
        state.reclaim();
        Ok(())
    }

    /// Load program text. See [`LoadReport`].
    pub fn consult(&self, text: &str) -> Result<LoadReport, EngineError> {
        let mut state = self.state.borrow_mut();
        let (trail, heap) = (state.store.trail_len(), state.store.heap_len());
        let mut ctx = state.context();
        let result = loader::consult(&mut ctx, text).map_err(|err| err.into_engine_error());
        state.store.restore(trail, heap);
        result
    }

    /// Parse program text without loading it; returns the clause count.
    pub fn check_syntax(&self, text: &str) -> Result<usize, EngineError> {
        parse_program(text).map(|clauses| clauses.len())
    }
}
