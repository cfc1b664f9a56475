//! The solver.
//!
//! A `Machine` runs one goal. Its continuation is a shared linked list of
//! pending goals and its choice points capture the continuation together with
//! heap and trail marks, so a machine can be suspended after a solution and
//! resumed later for the next one.

use std::rc::Rc;

use tracing::trace;

use crate::builtins;
use crate::database::{Clause, ClauseList, Database};
use crate::iso;
use crate::loader::{self, LoadError};
use crate::store::{Addr, Cell, Store};
use crate::term::Term;

/// Mutable engine state a machine runs against.
pub(crate) struct Context<'a> {
    pub store: &'a mut Store,
    pub db: &'a mut Database,
    pub inferences: u64,
    pub max_inferences: u64,
}

/// Non-local exit from a goal.
#[derive(Debug, Clone)]
pub(crate) enum Signal {
    /// `throw/1`; can be caught by `catch/3`.
    Throw(Term),
    /// Resource exhaustion; unwinds the whole query. `None` when the ball
    /// could not be copied off the heap.
    Abort(Option<Term>),
}

impl Signal {
    pub fn into_ball(self) -> Option<Term> {
        match self {
            Signal::Throw(ball) => Some(ball),
            Signal::Abort(ball) => ball,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Solution,
    Failure,
    Error(Signal),
}

type Step = Result<bool, Signal>;

enum Goal {
    Call { goal: Addr, cut_barrier: usize },
    CutTo(usize),
    ExitCatch(Addr),
    Fail,
}

struct ContNode {
    goal: Goal,
    next: Cont,
}

type Cont = Option<Rc<ContNode>>;

fn push(goal: Goal, next: Cont) -> Cont {
    Some(Rc::new(ContNode { goal, next }))
}

enum Alternative {
    Clauses {
        goal: Addr,
        clauses: ClauseList,
        next: usize,
    },
    Resume,
    Catch {
        catcher: Addr,
        recovery: Addr,
        flag: Addr,
    },
    Between {
        var: Addr,
        next: i64,
        high: i64,
    },
}

struct ChoicePoint {
    alt: Alternative,
    trail: usize,
    heap: usize,
    cont: Cont,
}

/// Control constructs handled by the machine itself.
pub(crate) fn is_control(name: &str, arity: usize) -> bool {
    matches!(
        (name, arity),
        ("true", 0)
            | ("fail", 0)
            | ("false", 0)
            | ("!", 0)
            | (",", 2)
            | (";", 2)
            | ("->", 2)
            | ("\\+", 1)
            | ("not", 1)
            | ("catch", 3)
            | ("throw", 1)
            | ("findall", 3)
            | ("between", 3)
            | ("$consult_text", 1)
    ) || (name == "call" && (1..=8).contains(&arity))
}

pub(crate) struct Machine {
    goal: Addr,
    cont: Cont,
    choices: Vec<ChoicePoint>,
    started: bool,
    exhausted: bool,
}

impl Machine {
    pub fn new(goal: Addr) -> Self {
        Self {
            goal,
            cont: None,
            choices: Vec::new(),
            started: false,
            exhausted: false,
        }
    }

    /// Find the first or next solution.
    pub fn solve(&mut self, ctx: &mut Context<'_>) -> Outcome {
        if self.exhausted {
            return Outcome::Failure;
        }
        if self.started {
            if !self.backtrack(ctx) {
                self.exhausted = true;
                return Outcome::Failure;
            }
        } else {
            self.started = true;
            self.cont = push(
                Goal::Call {
                    goal: self.goal,
                    cut_barrier: 0,
                },
                None,
            );
        }
        let outcome = self.run(ctx);
        trace!(choices = self.choices.len(), outcome = ?outcome, "machine stopped");
        outcome
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Outcome {
        loop {
            let Some(node) = self.cont.clone() else {
                return Outcome::Solution;
            };
            self.cont = node.next.clone();
            let step = match node.goal {
                Goal::Call { goal, cut_barrier } => self.call(ctx, goal, cut_barrier),
                Goal::CutTo(height) => {
                    self.choices.truncate(height);
                    Ok(true)
                }
                Goal::ExitCatch(flag) => {
                    self.exit_catch(ctx, flag);
                    Ok(true)
                }
                Goal::Fail => Ok(false),
            };
            match step {
                Ok(true) => {}
                Ok(false) => {
                    if !self.backtrack(ctx) {
                        self.exhausted = true;
                        return Outcome::Failure;
                    }
                }
                Err(Signal::Throw(ball)) => {
                    if !self.recover(ctx, &ball) {
                        self.finish();
                        return Outcome::Error(Signal::Throw(ball));
                    }
                }
                Err(abort) => {
                    self.finish();
                    return Outcome::Error(abort);
                }
            }
        }
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.choices.clear();
        self.cont = None;
    }

    fn push_choice(&mut self, ctx: &Context<'_>, alt: Alternative, cont: Cont) {
        self.choices.push(ChoicePoint {
            alt,
            trail: ctx.store.trail_len(),
            heap: ctx.store.heap_len(),
            cont,
        });
    }

    fn backtrack(&mut self, ctx: &mut Context<'_>) -> bool {
        while let Some(choice) = self.choices.pop() {
            ctx.store.restore(choice.trail, choice.heap);
            match choice.alt {
                Alternative::Resume => {
                    self.cont = choice.cont;
                    return true;
                }
                Alternative::Catch { .. } => {}
                Alternative::Between { var, next, high } => {
                    if next < high {
                        self.choices.push(ChoicePoint {
                            alt: Alternative::Between {
                                var,
                                next: next + 1,
                                high,
                            },
                            trail: choice.trail,
                            heap: choice.heap,
                            cont: choice.cont.clone(),
                        });
                    }
                    let value = ctx.store.new_int(next);
                    ctx.store.unify(var, value);
                    self.cont = choice.cont;
                    return true;
                }
                Alternative::Clauses {
                    goal,
                    clauses,
                    next,
                } => {
                    if self.try_clauses(ctx, goal, clauses, next, choice.cont) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Unwind to the innermost active `catch/3` whose catcher unifies with
    /// the ball.
    fn recover(&mut self, ctx: &mut Context<'_>, ball: &Term) -> bool {
        while let Some(choice) = self.choices.pop() {
            let Alternative::Catch {
                catcher,
                recovery,
                flag,
            } = choice.alt
            else {
                continue;
            };
            // a bound flag means the catch goal already exited
            if !ctx.store.is_unbound(flag) {
                continue;
            }
            ctx.store.restore(choice.trail, choice.heap);
            let (trail, heap) = (ctx.store.trail_len(), ctx.store.heap_len());
            let ball_addr = ctx.store.copy_in(ball, &mut Vec::new());
            if ctx.store.unify(catcher, ball_addr) {
                trace!(ball = %ball, "exception caught");
                self.cont = push(
                    Goal::Call {
                        goal: recovery,
                        cut_barrier: self.choices.len(),
                    },
                    choice.cont,
                );
                return true;
            }
            ctx.store.restore(trail, heap);
        }
        false
    }

    fn exit_catch(&mut self, ctx: &mut Context<'_>, flag: Addr) {
        let exited = ctx.store.new_atom("exited");
        ctx.store.bind(flag, exited);
        // drop the catch frame when the goal left no choice points
        if let Some(ChoicePoint {
            alt: Alternative::Catch { flag: top, .. },
            ..
        }) = self.choices.last()
            && *top == flag
        {
            self.choices.pop();
        }
    }

    fn call(&mut self, ctx: &mut Context<'_>, goal: Addr, cut_barrier: usize) -> Step {
        ctx.inferences += 1;
        if ctx.inferences > ctx.max_inferences {
            return Err(Signal::Abort(Some(iso::resource_error("inferences"))));
        }

        let goal = ctx.store.deref(goal);
        let Some((atom, arity)) = ctx.store.functor(goal) else {
            return Err(not_callable(ctx.store, goal));
        };
        let name = ctx.store.atom_text(atom);
        let args = ctx.store.args(goal);

        match (&*name, arity) {
            ("true", 0) => Ok(true),
            ("fail", 0) | ("false", 0) => Ok(false),
            ("!", 0) => {
                self.choices.truncate(cut_barrier);
                Ok(true)
            }
            (",", 2) => {
                let rest = self.cont.take();
                self.cont = push(
                    Goal::Call {
                        goal: args[0],
                        cut_barrier,
                    },
                    push(
                        Goal::Call {
                            goal: args[1],
                            cut_barrier,
                        },
                        rest,
                    ),
                );
                Ok(true)
            }
            (";", 2) => {
                let left = ctx.store.deref(args[0]);
                if let Some((inner, 2)) = ctx.store.functor(left)
                    && ctx.store.atom_name(inner) == "->"
                {
                    let cond = left + 1;
                    let then = left + 2;
                    self.if_then_else(ctx, cond, then, Some(args[1]), cut_barrier);
                    return Ok(true);
                }
                let rest = self.cont.take();
                let alternative = push(
                    Goal::Call {
                        goal: args[1],
                        cut_barrier,
                    },
                    rest.clone(),
                );
                self.push_choice(ctx, Alternative::Resume, alternative);
                self.cont = push(
                    Goal::Call {
                        goal: args[0],
                        cut_barrier,
                    },
                    rest,
                );
                Ok(true)
            }
            ("->", 2) => {
                self.if_then_else(ctx, args[0], args[1], None, cut_barrier);
                Ok(true)
            }
            ("\\+", 1) | ("not", 1) => {
                let height = self.choices.len();
                let rest = self.cont.take();
                self.push_choice(ctx, Alternative::Resume, rest);
                self.cont = push(
                    Goal::Call {
                        goal: args[0],
                        cut_barrier: height + 1,
                    },
                    push(Goal::CutTo(height), push(Goal::Fail, None)),
                );
                Ok(true)
            }
            ("call", n) if (1..=8).contains(&n) => {
                let target = add_args(ctx.store, args[0], &args[1..])?;
                let rest = self.cont.take();
                self.cont = push(
                    Goal::Call {
                        goal: target,
                        cut_barrier: self.choices.len(),
                    },
                    rest,
                );
                Ok(true)
            }
            ("catch", 3) => {
                let flag = ctx.store.new_var();
                let height = self.choices.len();
                let rest = self.cont.take();
                self.push_choice(
                    ctx,
                    Alternative::Catch {
                        catcher: args[1],
                        recovery: args[2],
                        flag,
                    },
                    rest.clone(),
                );
                self.cont = push(
                    Goal::Call {
                        goal: args[0],
                        cut_barrier: height + 1,
                    },
                    push(Goal::ExitCatch(flag), rest),
                );
                Ok(true)
            }
            ("throw", 1) => {
                if ctx.store.is_unbound(args[0]) {
                    return Err(Signal::Throw(iso::instantiation_error()));
                }
                match ctx.store.copy_out(args[0]) {
                    Ok(ball) => Err(Signal::Throw(ball)),
                    Err(_) => Err(Signal::Abort(None)),
                }
            }
            ("findall", 3) => self.findall(ctx, args[0], args[1], args[2]),
            ("between", 3) => self.between(ctx, args[0], args[1], args[2]),
            ("$consult_text", 1) => {
                let text = builtins::text_arg(ctx.store, args[0]).map_err(Signal::Throw)?;
                loader::consult(ctx, &text).map_err(LoadError::into_signal)?;
                Ok(true)
            }
            _ => {
                if let Some(builtin) = builtins::lookup(&name, arity) {
                    return builtin(ctx, &args).map_err(Signal::Throw);
                }
                match ctx.db.lookup((atom, arity)) {
                    Some(procedure) => {
                        let clauses = Rc::clone(&procedure.clauses);
                        let rest = self.cont.take();
                        Ok(self.try_clauses(ctx, goal, clauses, 0, rest))
                    }
                    None => Err(Signal::Throw(iso::existence_error(
                        "procedure",
                        &name,
                        arity,
                    ))),
                }
            }
        }
    }

    fn if_then_else(
        &mut self,
        ctx: &Context<'_>,
        cond: Addr,
        then: Addr,
        otherwise: Option<Addr>,
        cut_barrier: usize,
    ) {
        let height = self.choices.len();
        let rest = self.cont.take();
        let mut cond_barrier = height;
        if let Some(otherwise) = otherwise {
            let alternative = push(
                Goal::Call {
                    goal: otherwise,
                    cut_barrier,
                },
                rest.clone(),
            );
            self.push_choice(ctx, Alternative::Resume, alternative);
            cond_barrier += 1;
        }
        self.cont = push(
            Goal::Call {
                goal: cond,
                cut_barrier: cond_barrier,
            },
            push(
                Goal::CutTo(height),
                push(
                    Goal::Call {
                        goal: then,
                        cut_barrier,
                    },
                    rest,
                ),
            ),
        );
    }

    /// Resolve `goal` against `clauses[start..]`.
    fn try_clauses(
        &mut self,
        ctx: &mut Context<'_>,
        goal: Addr,
        clauses: ClauseList,
        start: usize,
        rest: Cont,
    ) -> bool {
        let barrier = self.choices.len();
        let mut candidate = next_candidate(ctx.store, goal, &clauses, start);
        while let Some(index) = candidate {
            // decided before unification binds the goal's arguments
            let following = next_candidate(ctx.store, goal, &clauses, index + 1);
            let (trail, heap) = (ctx.store.trail_len(), ctx.store.heap_len());
            let clause = &clauses[index];
            let mut vars = vec![None; clause.var_count];
            let head = ctx.store.copy_in(&clause.head, &mut vars);
            if ctx.store.unify(head, goal) {
                if let Some(next) = following {
                    self.choices.push(ChoicePoint {
                        alt: Alternative::Clauses {
                            goal,
                            clauses: Rc::clone(&clauses),
                            next,
                        },
                        trail,
                        heap,
                        cont: rest.clone(),
                    });
                }
                self.cont = if is_true(&clause.body) {
                    rest
                } else {
                    let body = ctx.store.copy_in(&clause.body, &mut vars);
                    push(
                        Goal::Call {
                            goal: body,
                            cut_barrier: barrier,
                        },
                        rest,
                    )
                };
                return true;
            }
            ctx.store.restore(trail, heap);
            candidate = following;
        }
        false
    }

    fn findall(&mut self, ctx: &mut Context<'_>, template: Addr, goal: Addr, result: Addr) -> Step {
        let (trail, heap) = (ctx.store.trail_len(), ctx.store.heap_len());
        let mut inner = Machine::new(goal);
        let mut found = Vec::new();
        loop {
            match inner.solve(ctx) {
                Outcome::Solution => match ctx.store.copy_out(template) {
                    Ok(term) => found.push(term),
                    Err(_) => {
                        ctx.store.restore(trail, heap);
                        return Err(Signal::Throw(iso::resource_error("term_depth")));
                    }
                },
                Outcome::Failure => break,
                Outcome::Error(signal) => {
                    ctx.store.restore(trail, heap);
                    return Err(signal);
                }
            }
        }
        ctx.store.restore(trail, heap);

        let items: Vec<Addr> = found
            .iter()
            .map(|term| ctx.store.copy_in(term, &mut Vec::new()))
            .collect();
        let list = ctx.store.new_list(&items);
        Ok(ctx.store.unify(result, list))
    }

    fn between(&mut self, ctx: &mut Context<'_>, low: Addr, high: Addr, x: Addr) -> Step {
        let low = builtins::int_arg(ctx.store, low).map_err(Signal::Throw)?;
        let high = {
            let addr = ctx.store.deref(high);
            match ctx.store.cell(addr) {
                Cell::Atom(atom) if matches!(ctx.store.atom_name(*atom), "inf" | "infinite") => {
                    i64::MAX
                }
                _ => builtins::int_arg(ctx.store, addr).map_err(Signal::Throw)?,
            }
        };
        let x = ctx.store.deref(x);
        match ctx.store.cell(x) {
            Cell::Int(v) => Ok(low <= *v && *v <= high),
            Cell::Ref(_) => {
                if low > high {
                    return Ok(false);
                }
                if low < high {
                    let rest = self.cont.clone();
                    self.push_choice(
                        ctx,
                        Alternative::Between {
                            var: x,
                            next: low + 1,
                            high,
                        },
                        rest,
                    );
                }
                let value = ctx.store.new_int(low);
                Ok(ctx.store.unify(x, value))
            }
            _ => Err(Signal::Throw(iso::type_error(
                "integer",
                ctx.store.copy_out(x).unwrap_or(Term::Var(0)),
            ))),
        }
    }
}

fn is_true(body: &Term) -> bool {
    matches!(body, Term::Atom(name) if name == "true")
}

fn not_callable(store: &Store, goal: Addr) -> Signal {
    if store.is_unbound(goal) {
        Signal::Throw(iso::instantiation_error())
    } else {
        let culprit = store.copy_out(goal).unwrap_or(Term::Var(0));
        Signal::Throw(iso::type_error("callable", culprit))
    }
}

/// `call/N`: append extra arguments to a callable term.
fn add_args(store: &mut Store, goal: Addr, extra: &[Addr]) -> Result<Addr, Signal> {
    let goal = store.deref(goal);
    if extra.is_empty() {
        return match store.cell(goal) {
            Cell::Atom(_) | Cell::Struct(..) => Ok(goal),
            _ => Err(not_callable(store, goal)),
        };
    }
    let Some((atom, _)) = store.functor(goal) else {
        return Err(not_callable(store, goal));
    };
    let name = store.atom_text(atom);
    let mut args = store.args(goal);
    args.extend_from_slice(extra);
    Ok(store.new_struct(&name, &args))
}

/// Index of the first clause at or after `from` whose first argument could
/// match the goal's.
fn next_candidate(store: &Store, goal: Addr, clauses: &[Rc<Clause>], from: usize) -> Option<usize> {
    let first = match store.cell(goal) {
        Cell::Struct(_, _) => Some(store.deref(goal + 1)),
        _ => None,
    };
    (from..clauses.len()).find(|&i| match (first, clauses[i].first_arg()) {
        (Some(addr), Some(arg)) => may_match(store, addr, arg),
        _ => true,
    })
}

fn may_match(store: &Store, addr: Addr, arg: &Term) -> bool {
    match (store.cell(addr), arg) {
        (Cell::Ref(_), _) | (_, Term::Var(_)) => true,
        (Cell::Atom(atom), Term::Atom(name)) => store.atom_name(*atom) == name,
        (Cell::Int(a), Term::Int(b)) => a == b,
        (Cell::Float(a), Term::Float(b)) => a.to_bits() == b.to_bits(),
        (Cell::Str(a), Term::Str(b)) => **a == *b.as_str(),
        (Cell::Struct(atom, arity), Term::Compound(name, args)) => {
            *arity == args.len() && store.atom_name(*atom) == name
        }
        _ => false,
    }
}
