//! Loading program text into the database.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::{debug, warn};

use crate::builtins;
use crate::database::Clause;
use crate::error::EngineError;
use crate::iso;
use crate::machine::{Context, Machine, Outcome, Signal};
use crate::parser::{as_directive, parse_program};
use crate::term::{NIL, Term};

#[derive(Debug)]
pub(crate) enum LoadError {
    /// The text did not parse; nothing was loaded.
    Syntax(EngineError),
    /// A clause or directive raised an exception.
    Raised(Signal),
}

impl LoadError {
    pub fn into_signal(self) -> Signal {
        match self {
            LoadError::Syntax(err) => Signal::Throw(iso::syntax_error(&err.to_string())),
            LoadError::Raised(signal) => signal,
        }
    }

    pub fn into_engine_error(self) -> EngineError {
        match self {
            LoadError::Syntax(err) => err,
            LoadError::Raised(signal) => EngineError::Load(
                signal
                    .into_ball()
                    .map(|ball| ball.to_string())
                    .unwrap_or_else(|| "an uncopyable exception".to_string()),
            ),
        }
    }
}

/// Summary of a `consult`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Clauses added.
    pub clauses: usize,
    /// Procedures (re)defined.
    pub procedures: usize,
    /// The same text was loaded before and nothing was done.
    pub cached: bool,
}

pub(crate) fn digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Load program text. A procedure defined by the text replaces any earlier
/// definition; identical text is only loaded once.
pub(crate) fn consult(ctx: &mut Context<'_>, text: &str) -> Result<LoadReport, LoadError> {
    let digest = digest(text);
    if ctx.db.is_loaded(digest) {
        debug!(digest, "source already loaded");
        return Ok(LoadReport {
            cached: true,
            ..LoadReport::default()
        });
    }

    let program = parse_program(text).map_err(LoadError::Syntax)?;
    let mut defined = HashSet::new();
    let mut deferred = Vec::new();
    let mut clauses = 0;

    for read in program {
        if let Some(directive) = as_directive(&read.term) {
            match directive {
                Term::Compound(name, args) if name == "dynamic" && args.len() == 1 => {
                    declare_dynamic(ctx, &args[0]).map_err(throw)?;
                }
                Term::Compound(name, args) if name == "initialization" && args.len() == 1 => {
                    deferred.push(args[0].clone());
                }
                Term::Compound(name, args) if name == "discontiguous" && args.len() == 1 => {}
                goal => run_directive(ctx, goal)?,
            }
            continue;
        }

        let clause = Clause::new(read.term);
        let key = builtins::clause_key(ctx, &clause).map_err(throw)?;
        if defined.insert(key) {
            ctx.db.redefine(key, digest);
        }
        ctx.db.add_clause(key, clause, true);
        clauses += 1;
    }

    for goal in &deferred {
        run_directive(ctx, goal)?;
    }

    ctx.db.mark_loaded(digest);
    debug!(digest, clauses, procedures = defined.len(), "consulted source");
    Ok(LoadReport {
        clauses,
        procedures: defined.len(),
        cached: false,
    })
}

fn throw(ball: Term) -> LoadError {
    LoadError::Raised(Signal::Throw(ball))
}

fn run_directive(ctx: &mut Context<'_>, goal: &Term) -> Result<(), LoadError> {
    let (trail, heap) = (ctx.store.trail_len(), ctx.store.heap_len());
    let addr = ctx.store.copy_in(goal, &mut Vec::new());
    let outcome = Machine::new(addr).solve(ctx);
    ctx.store.restore(trail, heap);
    match outcome {
        Outcome::Solution => Ok(()),
        Outcome::Failure => {
            warn!(directive = %goal, "directive failed");
            Ok(())
        }
        Outcome::Error(signal) => Err(LoadError::Raised(signal)),
    }
}

/// `:- dynamic p/1, q/2.` and the list form.
fn declare_dynamic(ctx: &mut Context<'_>, spec: &Term) -> Result<(), Term> {
    match spec {
        Term::Compound(name, args) if name == "," && args.len() == 2 => {
            declare_dynamic(ctx, &args[0])?;
            declare_dynamic(ctx, &args[1])
        }
        Term::Atom(name) if name == NIL => Ok(()),
        Term::Compound(..) if spec.as_list().is_some() => {
            for item in spec.as_list().unwrap_or_default() {
                declare_dynamic(ctx, item)?;
            }
            Ok(())
        }
        Term::Compound(name, args) if name == "/" && args.len() == 2 => match (&args[0], &args[1]) {
            (Term::Atom(functor), Term::Int(arity)) if *arity >= 0 => {
                let arity = *arity as usize;
                if builtins::is_reserved(functor, arity) {
                    return Err(iso::permission_error(
                        "modify",
                        "static_procedure",
                        iso::indicator(functor, arity),
                    ));
                }
                let key = (ctx.store.intern(functor), arity);
                ctx.db.declare_dynamic(key);
                Ok(())
            }
            (Term::Var(_), _) | (_, Term::Var(_)) => Err(iso::instantiation_error()),
            _ => Err(iso::type_error("predicate_indicator", spec.clone())),
        },
        Term::Var(_) => Err(iso::instantiation_error()),
        other => Err(iso::type_error("predicate_indicator", other.clone())),
    }
}
