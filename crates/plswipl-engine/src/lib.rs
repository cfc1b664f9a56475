//! Embedded Prolog engine for plswipl.
//!
//! This crate provides:
//! - A reader for standard Prolog syntax with the usual operator table
//! - A solver with cut, if-then-else, negation, catch/throw and `call/N`
//! - ISO builtins for unification, arithmetic, type checks and atoms
//! - A handle-based API of frames, term references and queries

mod arith;
mod builtins;
mod database;
mod engine;
mod error;
mod iso;
mod lexer;
mod loader;
mod machine;
mod ops;
mod parser;
mod store;
mod term;

pub use engine::{
    Engine, EngineConfig, EngineStats, FrameId, MAX_ARITY, PendingException, Predicate, QueryId,
    TermRef, TextMode,
};
pub use error::EngineError;
pub use loader::LoadReport;
pub use parser::{ReadTerm, parse_program, parse_term};
pub use term::{LIST_CONS, NIL, Term, format_float};
