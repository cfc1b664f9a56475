//! Constructors for ISO error terms.

use crate::term::Term;

pub(crate) fn instantiation_error() -> Term {
    Term::error(Term::atom("instantiation_error"))
}

pub(crate) fn type_error(kind: &str, culprit: Term) -> Term {
    Term::error(Term::compound("type_error", vec![Term::atom(kind), culprit]))
}

pub(crate) fn domain_error(domain: &str, culprit: Term) -> Term {
    Term::error(Term::compound(
        "domain_error",
        vec![Term::atom(domain), culprit],
    ))
}

pub(crate) fn existence_error(kind: &str, name: &str, arity: usize) -> Term {
    Term::error(Term::compound(
        "existence_error",
        vec![Term::atom(kind), indicator(name, arity)],
    ))
}

pub(crate) fn permission_error(action: &str, kind: &str, culprit: Term) -> Term {
    Term::error(Term::compound(
        "permission_error",
        vec![Term::atom(action), Term::atom(kind), culprit],
    ))
}

pub(crate) fn evaluation_error(what: &str) -> Term {
    Term::error(Term::compound("evaluation_error", vec![Term::atom(what)]))
}

pub(crate) fn representation_error(what: &str) -> Term {
    Term::error(Term::compound(
        "representation_error",
        vec![Term::atom(what)],
    ))
}

pub(crate) fn resource_error(what: &str) -> Term {
    Term::error(Term::compound("resource_error", vec![Term::atom(what)]))
}

pub(crate) fn syntax_error(message: &str) -> Term {
    Term::error(Term::compound("syntax_error", vec![Term::atom(message)]))
}

/// `Name/Arity`.
pub(crate) fn indicator(name: &str, arity: usize) -> Term {
    Term::compound("/", vec![Term::atom(name), Term::Int(arity as i64)])
}
