//! Clause database.
//!
//! Each predicate keeps its clauses in a shared vector. A running call holds
//! a snapshot of that vector, so asserting or retracting while a predicate
//! is being executed never changes the alternatives of the running call.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::parser::split_clause;
use crate::store::{Atom, Store};
use crate::term::Term;

/// A stored clause. Variables are numbered `0..var_count`.
#[derive(Debug)]
pub(crate) struct Clause {
    pub head: Term,
    pub body: Term,
    pub var_count: usize,
}

impl Clause {
    pub fn new(term: Term) -> Self {
        let (head, body) = split_clause(term);
        let var_count = head.var_count().max(body.var_count());
        Self {
            head,
            body,
            var_count,
        }
    }

    /// First argument of the head, used to skip clauses that cannot match.
    pub fn first_arg(&self) -> Option<&Term> {
        match &self.head {
            Term::Compound(_, args) => args.first(),
            _ => None,
        }
    }
}

pub(crate) type ClauseList = Rc<Vec<Rc<Clause>>>;

#[derive(Debug, Default)]
pub(crate) struct Procedure {
    pub clauses: ClauseList,
    pub dynamic: bool,
    /// Digest of the source text that defined this procedure.
    pub owner: Option<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct Database {
    procedures: HashMap<(Atom, usize), Procedure>,
    loaded: HashSet<u64>,
}

impl Database {
    pub fn lookup(&self, key: (Atom, usize)) -> Option<&Procedure> {
        self.procedures.get(&key)
    }

    pub fn is_defined(&self, key: (Atom, usize)) -> bool {
        self.procedures.contains_key(&key)
    }

    pub fn declare_dynamic(&mut self, key: (Atom, usize)) {
        self.procedures.entry(key).or_default().dynamic = true;
    }

    pub fn add_clause(&mut self, key: (Atom, usize), clause: Clause, at_end: bool) {
        let procedure = self.procedures.entry(key).or_default();
        let clauses = Rc::make_mut(&mut procedure.clauses);
        if at_end {
            clauses.push(Rc::new(clause));
        } else {
            clauses.insert(0, Rc::new(clause));
        }
    }

    /// Remove the clause at `index`.
    pub fn remove_clause(&mut self, key: (Atom, usize), index: usize) {
        if let Some(procedure) = self.procedures.get_mut(&key) {
            let clauses = Rc::make_mut(&mut procedure.clauses);
            if index < clauses.len() {
                clauses.remove(index);
            }
        }
    }

    /// Start redefining a procedure from the source identified by `owner`.
    pub fn redefine(&mut self, key: (Atom, usize), owner: u64) {
        let procedure = self.procedures.entry(key).or_default();
        procedure.clauses = Rc::new(Vec::new());
        procedure.owner = Some(owner);
    }

    pub fn is_loaded(&self, digest: u64) -> bool {
        self.loaded.contains(&digest)
    }

    pub fn mark_loaded(&mut self, digest: u64) {
        self.loaded.insert(digest);
    }

    /// Key for an owned callable term.
    pub fn key_of(store: &mut Store, term: &Term) -> Option<(Atom, usize)> {
        let (name, arity) = term.functor()?;
        Some((store.intern(name), arity))
    }
}
