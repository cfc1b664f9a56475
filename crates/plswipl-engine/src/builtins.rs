//! Deterministic builtin predicates.
//!
//! Control constructs and the nondeterministic builtins live in the machine;
//! everything here either succeeds once, fails, or raises an error term.

use std::cmp::Ordering;

use tracing::info;

use crate::arith::{self, Number};
use crate::database::{Clause, Database};
use crate::iso;
use crate::machine::{self, Context};
use crate::parser::parse_term;
use crate::store::{Addr, Atom, Cell, Store};
use crate::term::{LIST_CONS, NIL, Term};

pub(crate) type Builtin = fn(&mut Context<'_>, &[Addr]) -> Result<bool, Term>;

type BuiltinResult = Result<bool, Term>;

pub(crate) fn lookup(name: &str, arity: usize) -> Option<Builtin> {
    let builtin: Builtin = match (name, arity) {
        ("=", 2) => |ctx, a| Ok(ctx.store.unify(a[0], a[1])),
        ("\\=", 2) => not_unifiable,
        ("==", 2) => |ctx, a| Ok(ctx.store.identical(a[0], a[1])),
        ("\\==", 2) => |ctx, a| Ok(!ctx.store.identical(a[0], a[1])),
        ("@<", 2) => |ctx, a| Ok(compare(ctx.store, a[0], a[1]) == Ordering::Less),
        ("@>", 2) => |ctx, a| Ok(compare(ctx.store, a[0], a[1]) == Ordering::Greater),
        ("@=<", 2) => |ctx, a| Ok(compare(ctx.store, a[0], a[1]) != Ordering::Greater),
        ("@>=", 2) => |ctx, a| Ok(compare(ctx.store, a[0], a[1]) != Ordering::Less),
        ("compare", 3) => compare_3,

        ("var", 1) => |ctx, a| Ok(ctx.store.is_unbound(a[0])),
        ("nonvar", 1) => |ctx, a| Ok(!ctx.store.is_unbound(a[0])),
        ("atom", 1) => |ctx, a| Ok(matches!(cell(ctx.store, a[0]), Cell::Atom(_))),
        ("number", 1) => |ctx, a| Ok(matches!(cell(ctx.store, a[0]), Cell::Int(_) | Cell::Float(_))),
        ("integer", 1) => |ctx, a| Ok(matches!(cell(ctx.store, a[0]), Cell::Int(_))),
        ("float", 1) => |ctx, a| Ok(matches!(cell(ctx.store, a[0]), Cell::Float(_))),
        ("string", 1) => |ctx, a| Ok(matches!(cell(ctx.store, a[0]), Cell::Str(_))),
        ("atomic", 1) => |ctx, a| {
            Ok(!matches!(cell(ctx.store, a[0]), Cell::Ref(_) | Cell::Struct(..)))
        },
        ("compound", 1) => |ctx, a| Ok(matches!(cell(ctx.store, a[0]), Cell::Struct(..))),
        ("callable", 1) => |ctx, a| {
            Ok(matches!(cell(ctx.store, a[0]), Cell::Atom(_) | Cell::Struct(..)))
        },
        ("is_list", 1) => |ctx, a| Ok(ctx.store.list_items(a[0]).is_some()),
        ("ground", 1) => |ctx, a| Ok(is_ground(ctx.store, a[0])),

        ("is", 2) => |ctx, a| {
            let value = arith::eval(ctx.store, a[1])?;
            unify_term(ctx, a[0], &value.to_term())
        },
        ("=:=", 2) => |ctx, a| arith_compare(ctx, a, |o| o == Ordering::Equal),
        ("=\\=", 2) => |ctx, a| arith_compare(ctx, a, |o| o != Ordering::Equal),
        ("<", 2) => |ctx, a| arith_compare(ctx, a, |o| o == Ordering::Less),
        (">", 2) => |ctx, a| arith_compare(ctx, a, |o| o == Ordering::Greater),
        ("=<", 2) => |ctx, a| arith_compare(ctx, a, |o| o != Ordering::Greater),
        (">=", 2) => |ctx, a| arith_compare(ctx, a, |o| o != Ordering::Less),
        ("succ", 2) => succ,
        ("plus", 3) => plus,

        ("functor", 3) => functor,
        ("arg", 3) => arg,
        ("=..", 2) => univ,
        ("copy_term", 2) => |ctx, a| {
            let copy = copy_out(ctx.store, a[0])?;
            unify_term(ctx, a[1], &copy)
        },

        ("length", 2) => length,
        ("msort", 2) => |ctx, a| sort(ctx, a, false),
        ("sort", 2) => |ctx, a| sort(ctx, a, true),
        ("keysort", 2) => keysort,

        ("atom_length", 2) | ("string_length", 2) => text_length,
        ("atom_string", 2) => atom_string,
        ("atom_number", 2) => atom_number,
        ("number_string", 2) => number_string,
        ("atom_concat", 3) => |ctx, a| concat(ctx, a, TextKind::Atom),
        ("string_concat", 3) => |ctx, a| concat(ctx, a, TextKind::Str),
        ("atom_chars", 2) => |ctx, a| chars(ctx, a, TextKind::Atom, false),
        ("atom_codes", 2) => |ctx, a| chars(ctx, a, TextKind::Atom, true),
        ("string_chars", 2) => |ctx, a| chars(ctx, a, TextKind::Str, false),
        ("string_codes", 2) => |ctx, a| chars(ctx, a, TextKind::Str, true),
        ("string_to_atom", 2) => string_to_atom,
        ("upcase_atom", 2) => |ctx, a| {
            let text = text_arg(ctx.store, a[0])?;
            unify_term(ctx, a[1], &Term::Atom(text.to_uppercase()))
        },
        ("atomic_list_concat", 2) => |ctx, a| atomic_list_concat(ctx, a[0], None, a[1]),
        ("atomic_list_concat", 3) => |ctx, a| atomic_list_concat(ctx, a[0], Some(a[1]), a[2]),
        ("term_string", 2) => |ctx, a| term_text(ctx, a, TextKind::Str),
        ("term_to_atom", 2) => |ctx, a| term_text(ctx, a, TextKind::Atom),

        ("assert", 1) | ("assertz", 1) => |ctx, a| assert(ctx, a[0], true),
        ("asserta", 1) => |ctx, a| assert(ctx, a[0], false),
        ("retract", 1) => retract,

        ("write", 1) | ("print", 1) | ("writeln", 1) => write_line,
        ("writeq", 1) => |ctx, a| {
            let term = copy_out(ctx.store, a[0])?;
            info!(target: "plswipl::prolog", "{}", term);
            Ok(true)
        },
        _ => return None,
    };
    Some(builtin)
}

/// Whether user code may not define `name/arity`.
pub(crate) fn is_reserved(name: &str, arity: usize) -> bool {
    machine::is_control(name, arity) || lookup(name, arity).is_some()
}

fn cell(store: &Store, addr: Addr) -> &Cell {
    store.cell(store.deref(addr))
}

fn copy_out(store: &Store, addr: Addr) -> Result<Term, Term> {
    store
        .copy_out(addr)
        .map_err(|_| iso::resource_error("term_depth"))
}

fn unify_term(ctx: &mut Context<'_>, addr: Addr, term: &Term) -> BuiltinResult {
    let value = ctx.store.copy_in(term, &mut Vec::new());
    Ok(ctx.store.unify(addr, value))
}

fn culprit(store: &Store, addr: Addr) -> Term {
    store.copy_out(addr).unwrap_or(Term::Var(0))
}

pub(crate) fn int_arg(store: &Store, addr: Addr) -> Result<i64, Term> {
    match cell(store, addr) {
        Cell::Int(v) => Ok(*v),
        Cell::Ref(_) => Err(iso::instantiation_error()),
        _ => Err(iso::type_error("integer", culprit(store, addr))),
    }
}

/// Text of an atomic argument.
pub(crate) fn text_arg(store: &Store, addr: Addr) -> Result<String, Term> {
    match cell(store, addr) {
        Cell::Ref(_) => Err(iso::instantiation_error()),
        Cell::Struct(..) => Err(iso::type_error("atomic", culprit(store, addr))),
        _ => store
            .text_of(addr)
            .ok_or_else(|| iso::type_error("atomic", culprit(store, addr))),
    }
}

fn is_ground(store: &Store, addr: Addr) -> bool {
    let mut pending = vec![addr];
    while let Some(addr) = pending.pop() {
        let addr = store.deref(addr);
        match store.cell(addr) {
            Cell::Ref(_) => return false,
            Cell::Struct(_, arity) => pending.extend((1..=*arity).map(|i| addr + i)),
            _ => {}
        }
    }
    true
}

fn not_unifiable(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let (trail, heap) = (ctx.store.trail_len(), ctx.store.heap_len());
    let unified = ctx.store.unify(a[0], a[1]);
    ctx.store.restore(trail, heap);
    Ok(!unified)
}

fn type_rank(cell: &Cell) -> u8 {
    match cell {
        Cell::Ref(_) => 0,
        Cell::Float(_) | Cell::Int(_) => 1,
        Cell::Atom(_) => 3,
        Cell::Str(_) => 4,
        Cell::Struct(..) => 5,
    }
}

/// Standard order of terms.
pub(crate) fn compare(store: &Store, a: Addr, b: Addr) -> Ordering {
    let mut pending = vec![(a, b)];
    while let Some((a, b)) = pending.pop() {
        let a = store.deref(a);
        let b = store.deref(b);
        if a == b {
            continue;
        }
        let (x, y) = (store.cell(a), store.cell(b));
        let order = type_rank(x).cmp(&type_rank(y)).then_with(|| match (x, y) {
            (Cell::Ref(_), Cell::Ref(_)) => a.cmp(&b),
            (Cell::Int(i), Cell::Int(j)) => i.cmp(j),
            (Cell::Int(i), Cell::Float(f)) => {
                // equal values order the float first
                arith::compare_numbers(Number::Int(*i), Number::Float(*f))
                    .then(Ordering::Greater)
            }
            (Cell::Float(f), Cell::Int(i)) => {
                arith::compare_numbers(Number::Float(*f), Number::Int(*i)).then(Ordering::Less)
            }
            (Cell::Float(f), Cell::Float(g)) => f.total_cmp(g),
            (Cell::Atom(p), Cell::Atom(q)) => store.atom_name(*p).cmp(store.atom_name(*q)),
            (Cell::Str(s), Cell::Str(t)) => s.cmp(t),
            (Cell::Struct(f, n), Cell::Struct(g, m)) => n
                .cmp(m)
                .then_with(|| store.atom_name(*f).cmp(store.atom_name(*g))),
            _ => Ordering::Equal,
        });
        if order != Ordering::Equal {
            return order;
        }
        // same functor: arguments left to right
        if let Cell::Struct(_, n) = x {
            pending.extend((1..=*n).rev().map(|i| (a + i, b + i)));
        }
    }
    Ordering::Equal
}

fn compare_3(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let symbol = match compare(ctx.store, a[1], a[2]) {
        Ordering::Less => "<",
        Ordering::Equal => "=",
        Ordering::Greater => ">",
    };
    unify_term(ctx, a[0], &Term::atom(symbol))
}

fn arith_compare(
    ctx: &mut Context<'_>,
    a: &[Addr],
    accept: fn(Ordering) -> bool,
) -> BuiltinResult {
    let x = arith::eval(ctx.store, a[0])?;
    let y = arith::eval(ctx.store, a[1])?;
    Ok(accept(arith::compare_numbers(x, y)))
}

fn succ(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    if !ctx.store.is_unbound(a[0]) {
        let x = int_arg(ctx.store, a[0])?;
        if x < 0 {
            return Err(iso::type_error("not_less_than_zero", Term::Int(x)));
        }
        let next = x
            .checked_add(1)
            .ok_or_else(|| iso::evaluation_error("int_overflow"))?;
        return unify_term(ctx, a[1], &Term::Int(next));
    }
    let y = int_arg(ctx.store, a[1])?;
    match y {
        y if y < 0 => Err(iso::type_error("not_less_than_zero", Term::Int(y))),
        0 => Ok(false),
        y => unify_term(ctx, a[0], &Term::Int(y - 1)),
    }
}

fn plus(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let overflow = || iso::evaluation_error("int_overflow");
    let bound: Vec<bool> = a.iter().map(|&x| !ctx.store.is_unbound(x)).collect();
    match bound.as_slice() {
        [true, true, _] => {
            let sum = int_arg(ctx.store, a[0])?
                .checked_add(int_arg(ctx.store, a[1])?)
                .ok_or_else(overflow)?;
            unify_term(ctx, a[2], &Term::Int(sum))
        }
        [true, false, true] => {
            let rest = int_arg(ctx.store, a[2])?
                .checked_sub(int_arg(ctx.store, a[0])?)
                .ok_or_else(overflow)?;
            unify_term(ctx, a[1], &Term::Int(rest))
        }
        [false, true, true] => {
            let rest = int_arg(ctx.store, a[2])?
                .checked_sub(int_arg(ctx.store, a[1])?)
                .ok_or_else(overflow)?;
            unify_term(ctx, a[0], &Term::Int(rest))
        }
        _ => Err(iso::instantiation_error()),
    }
}

fn functor(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let term = ctx.store.deref(a[0]);
    match ctx.store.cell(term) {
        Cell::Ref(_) => {
            let arity = int_arg(ctx.store, a[2])?;
            let name = ctx.store.deref(a[1]);
            if arity == 0 {
                return Ok(ctx.store.unify(term, name));
            }
            let arity = usize::try_from(arity)
                .map_err(|_| iso::domain_error("not_less_than_zero", Term::Int(arity)))?;
            let Cell::Atom(atom) = ctx.store.cell(name) else {
                return Err(match ctx.store.cell(name) {
                    Cell::Ref(_) => iso::instantiation_error(),
                    Cell::Struct(..) => iso::type_error("atomic", culprit(ctx.store, name)),
                    _ => iso::type_error("atom", culprit(ctx.store, name)),
                });
            };
            let name = ctx.store.atom_text(*atom);
            let args: Vec<Addr> = (0..arity).map(|_| ctx.store.new_var()).collect();
            let built = ctx.store.new_struct(&name, &args);
            Ok(ctx.store.unify(term, built))
        }
        Cell::Struct(atom, arity) => {
            let (name, arity) = (Term::Atom(ctx.store.atom_name(*atom).to_string()), *arity);
            Ok(unify_term(ctx, a[1], &name)? && unify_term(ctx, a[2], &Term::Int(arity as i64))?)
        }
        _ => Ok(ctx.store.unify(a[1], term) && unify_term(ctx, a[2], &Term::Int(0))?),
    }
}

fn arg(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let n = int_arg(ctx.store, a[0])?;
    let term = ctx.store.deref(a[1]);
    match ctx.store.cell(term) {
        Cell::Struct(_, arity) => {
            if n < 1 || n as usize > *arity {
                return Ok(false);
            }
            Ok(ctx.store.unify(term + n as usize, a[2]))
        }
        Cell::Ref(_) => Err(iso::instantiation_error()),
        _ => Err(iso::type_error("compound", culprit(ctx.store, term))),
    }
}

fn univ(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let term = ctx.store.deref(a[0]);
    match ctx.store.cell(term) {
        Cell::Ref(_) => {
            let Some(items) = ctx.store.list_items(a[1]) else {
                return Err(iso::instantiation_error());
            };
            let Some((&head, args)) = items.split_first() else {
                return Err(iso::domain_error("non_empty_list", Term::nil()));
            };
            if args.is_empty() {
                return Ok(ctx.store.unify(term, head));
            }
            let head = ctx.store.deref(head);
            let Cell::Atom(atom) = ctx.store.cell(head) else {
                return Err(iso::type_error("atom", culprit(ctx.store, head)));
            };
            let name = ctx.store.atom_text(*atom);
            let built = ctx.store.new_struct(&name, args);
            Ok(ctx.store.unify(term, built))
        }
        Cell::Struct(atom, _) => {
            let name = ctx.store.atom_text(*atom);
            let mut items = vec![ctx.store.new_atom(&name)];
            items.extend(ctx.store.args(term));
            let list = ctx.store.new_list(&items);
            Ok(ctx.store.unify(a[1], list))
        }
        _ => {
            let list = ctx.store.new_list(&[term]);
            Ok(ctx.store.unify(a[1], list))
        }
    }
}

fn length(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    // walk the list prefix
    let mut count: i64 = 0;
    let mut tail = ctx.store.deref(a[0]);
    loop {
        match ctx.store.cell(tail) {
            Cell::Struct(atom, 2) if ctx.store.atom_name(*atom) == LIST_CONS => {
                count += 1;
                tail = ctx.store.deref(tail + 2);
            }
            _ => break,
        }
    }
    match ctx.store.cell(tail) {
        Cell::Atom(atom) if ctx.store.atom_name(*atom) == NIL => {
            unify_term(ctx, a[1], &Term::Int(count))
        }
        Cell::Ref(_) => {
            if ctx.store.is_unbound(a[1]) {
                return Err(iso::instantiation_error());
            }
            let wanted = int_arg(ctx.store, a[1])?;
            if wanted < 0 {
                return Err(iso::domain_error("not_less_than_zero", Term::Int(wanted)));
            }
            if wanted < count {
                return Ok(false);
            }
            let fresh: Vec<Addr> = (count..wanted).map(|_| ctx.store.new_var()).collect();
            let rest = ctx.store.new_list(&fresh);
            Ok(ctx.store.unify(tail, rest))
        }
        _ => Ok(false),
    }
}

fn list_arg(store: &Store, addr: Addr) -> Result<Vec<Addr>, Term> {
    store.list_items(addr).ok_or_else(|| {
        if store.is_unbound(addr) {
            iso::instantiation_error()
        } else {
            iso::type_error("list", culprit(store, addr))
        }
    })
}

fn sort(ctx: &mut Context<'_>, a: &[Addr], dedup: bool) -> BuiltinResult {
    let mut items = list_arg(ctx.store, a[0])?;
    let store = &*ctx.store;
    items.sort_by(|x, y| compare(store, *x, *y));
    if dedup {
        items.dedup_by(|x, y| compare(store, *x, *y) == Ordering::Equal);
    }
    let list = ctx.store.new_list(&items);
    Ok(ctx.store.unify(a[1], list))
}

fn keysort(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let items = list_arg(ctx.store, a[0])?;
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let pair = ctx.store.deref(item);
        match ctx.store.cell(pair) {
            Cell::Struct(atom, 2) if ctx.store.atom_name(*atom) == "-" => keyed.push(pair),
            Cell::Ref(_) => return Err(iso::instantiation_error()),
            _ => return Err(iso::type_error("pair", culprit(ctx.store, pair))),
        }
    }
    let store = &*ctx.store;
    // stable, so equal keys keep their order
    keyed.sort_by(|x, y| compare(store, x + 1, y + 1));
    let list = ctx.store.new_list(&keyed);
    Ok(ctx.store.unify(a[1], list))
}

#[derive(Clone, Copy)]
enum TextKind {
    Atom,
    Str,
}

impl TextKind {
    fn term(self, text: String) -> Term {
        match self {
            TextKind::Atom => Term::Atom(text),
            TextKind::Str => Term::Str(text),
        }
    }
}

fn text_length(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let text = text_arg(ctx.store, a[0])?;
    unify_term(ctx, a[1], &Term::Int(text.chars().count() as i64))
}

fn atom_string(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    if !ctx.store.is_unbound(a[0]) {
        let text = text_arg(ctx.store, a[0])?;
        return unify_term(ctx, a[1], &Term::Str(text));
    }
    let text = text_arg(ctx.store, a[1])?;
    unify_term(ctx, a[0], &Term::Atom(text))
}

fn string_to_atom(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    if !ctx.store.is_unbound(a[0]) {
        let text = text_arg(ctx.store, a[0])?;
        return unify_term(ctx, a[1], &Term::Atom(text));
    }
    let text = text_arg(ctx.store, a[1])?;
    unify_term(ctx, a[0], &Term::Str(text))
}

fn parse_number(text: &str) -> Option<Term> {
    match parse_term(text.trim()).ok()?.term {
        number @ (Term::Int(_) | Term::Float(_)) => Some(number),
        _ => None,
    }
}

fn atom_number(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    if ctx.store.is_unbound(a[0]) {
        let number = match cell(ctx.store, a[1]) {
            Cell::Int(_) | Cell::Float(_) => text_arg(ctx.store, a[1])?,
            Cell::Ref(_) => return Err(iso::instantiation_error()),
            _ => return Err(iso::type_error("number", culprit(ctx.store, a[1]))),
        };
        return unify_term(ctx, a[0], &Term::Atom(number));
    }
    let text = text_arg(ctx.store, a[0])?;
    match parse_number(&text) {
        Some(number) => unify_term(ctx, a[1], &number),
        None => Ok(false),
    }
}

fn number_string(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    if !ctx.store.is_unbound(a[1]) {
        let text = text_arg(ctx.store, a[1])?;
        return match parse_number(&text) {
            Some(number) => unify_term(ctx, a[0], &number),
            None => Err(iso::syntax_error("illegal_number")),
        };
    }
    match cell(ctx.store, a[0]) {
        Cell::Int(_) | Cell::Float(_) => {
            let text = text_arg(ctx.store, a[0])?;
            unify_term(ctx, a[1], &Term::Str(text))
        }
        Cell::Ref(_) => Err(iso::instantiation_error()),
        _ => Err(iso::type_error("number", culprit(ctx.store, a[0]))),
    }
}

fn concat(ctx: &mut Context<'_>, a: &[Addr], kind: TextKind) -> BuiltinResult {
    let bound: Vec<bool> = a.iter().map(|&x| !ctx.store.is_unbound(x)).collect();
    match bound.as_slice() {
        [true, true, _] => {
            let joined = text_arg(ctx.store, a[0])? + &text_arg(ctx.store, a[1])?;
            unify_term(ctx, a[2], &kind.term(joined))
        }
        [true, false, true] => {
            let (prefix, whole) = (text_arg(ctx.store, a[0])?, text_arg(ctx.store, a[2])?);
            match whole.strip_prefix(prefix.as_str()) {
                Some(rest) => unify_term(ctx, a[1], &kind.term(rest.to_string())),
                None => Ok(false),
            }
        }
        [false, true, true] => {
            let (suffix, whole) = (text_arg(ctx.store, a[1])?, text_arg(ctx.store, a[2])?);
            match whole.strip_suffix(suffix.as_str()) {
                Some(rest) => unify_term(ctx, a[0], &kind.term(rest.to_string())),
                None => Ok(false),
            }
        }
        _ => Err(iso::instantiation_error()),
    }
}

fn chars(ctx: &mut Context<'_>, a: &[Addr], kind: TextKind, codes: bool) -> BuiltinResult {
    if !ctx.store.is_unbound(a[0]) {
        let text = text_arg(ctx.store, a[0])?;
        let items = text
            .chars()
            .map(|c| {
                if codes {
                    Term::Int(c as i64)
                } else {
                    Term::Atom(c.to_string())
                }
            })
            .collect();
        return unify_term(ctx, a[1], &Term::list(items));
    }
    let mut text = String::new();
    for item in list_arg(ctx.store, a[1])? {
        let c = match cell(ctx.store, item) {
            Cell::Int(code) => u32::try_from(*code).ok().and_then(char::from_u32),
            Cell::Atom(atom) => {
                let name = ctx.store.atom_name(*atom);
                let mut it = name.chars();
                match (it.next(), it.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            Cell::Ref(_) => return Err(iso::instantiation_error()),
            _ => None,
        };
        match c {
            Some(c) => text.push(c),
            None => return Err(iso::representation_error("character")),
        }
    }
    unify_term(ctx, a[0], &kind.term(text))
}

fn atomic_list_concat(
    ctx: &mut Context<'_>,
    list: Addr,
    separator: Option<Addr>,
    result: Addr,
) -> BuiltinResult {
    let separator = match separator {
        Some(addr) => text_arg(ctx.store, addr)?,
        None => String::new(),
    };
    let items = ctx.store.list_items(list);
    let ground = items
        .as_ref()
        .is_some_and(|items| items.iter().all(|&i| !ctx.store.is_unbound(i)));
    if let (Some(items), true) = (items, ground) {
        let parts = items
            .into_iter()
            .map(|item| text_arg(ctx.store, item))
            .collect::<Result<Vec<_>, _>>()?;
        return unify_term(ctx, result, &Term::Atom(parts.join(&separator)));
    }
    // split mode
    if separator.is_empty() || ctx.store.is_unbound(result) {
        return Err(iso::instantiation_error());
    }
    let whole = text_arg(ctx.store, result)?;
    let parts = whole
        .split(separator.as_str())
        .map(Term::atom)
        .collect();
    unify_term(ctx, list, &Term::list(parts))
}

/// `term_string/2` and `term_to_atom/2`: write when the term is bound,
/// otherwise read the text.
fn term_text(ctx: &mut Context<'_>, a: &[Addr], kind: TextKind) -> BuiltinResult {
    if ctx.store.is_unbound(a[0]) && !ctx.store.is_unbound(a[1]) {
        let text = text_arg(ctx.store, a[1])?;
        let read = parse_term(&text).map_err(|err| iso::syntax_error(&err.to_string()))?;
        return unify_term(ctx, a[0], &read.term);
    }
    let term = copy_out(ctx.store, a[0])?;
    unify_term(ctx, a[1], &kind.term(term.to_string()))
}

/// Head key of a clause term, checked for callability and permission.
pub(crate) fn clause_key(ctx: &mut Context<'_>, clause: &Clause) -> Result<(Atom, usize), Term> {
    let Some((name, arity)) = clause.head.functor() else {
        return Err(match clause.head {
            Term::Var(_) => iso::instantiation_error(),
            ref other => iso::type_error("callable", other.clone()),
        });
    };
    if is_reserved(name, arity) {
        return Err(iso::permission_error(
            "modify",
            "static_procedure",
            iso::indicator(name, arity),
        ));
    }
    Database::key_of(ctx.store, &clause.head).ok_or_else(iso::instantiation_error)
}

fn assert(ctx: &mut Context<'_>, addr: Addr, at_end: bool) -> BuiltinResult {
    let term = copy_out(ctx.store, addr)?;
    let clause = Clause::new(term);
    match clause.body {
        Term::Var(_) => return Err(iso::instantiation_error()),
        Term::Int(_) | Term::Float(_) => return Err(iso::type_error("callable", clause.body)),
        _ => {}
    }
    let key = clause_key(ctx, &clause)?;
    ctx.db.add_clause(key, clause, at_end);
    Ok(true)
}

fn retract(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let term = copy_out(ctx.store, a[0])?;
    let pattern = Clause::new(term);
    let key = clause_key(ctx, &pattern)?;
    let Some(procedure) = ctx.db.lookup(key) else {
        return Ok(false);
    };
    let clauses = std::rc::Rc::clone(&procedure.clauses);
    let target = ctx.store.deref(a[0]);
    let (head, body) = match ctx.store.cell(target) {
        Cell::Struct(atom, 2) if ctx.store.atom_name(*atom) == ":-" => (target + 1, target + 2),
        _ => (target, ctx.store.new_atom("true")),
    };
    for (index, clause) in clauses.iter().enumerate() {
        let (trail, heap) = (ctx.store.trail_len(), ctx.store.heap_len());
        let mut vars = vec![None; clause.var_count];
        let stored_head = ctx.store.copy_in(&clause.head, &mut vars);
        let stored_body = ctx.store.copy_in(&clause.body, &mut vars);
        if ctx.store.unify(head, stored_head) && ctx.store.unify(body, stored_body) {
            ctx.db.remove_clause(key, index);
            return Ok(true);
        }
        ctx.store.restore(trail, heap);
    }
    Ok(false)
}

fn write_line(ctx: &mut Context<'_>, a: &[Addr]) -> BuiltinResult {
    let text = match ctx.store.text_of(a[0]) {
        Some(text) => text,
        None => copy_out(ctx.store, a[0])?.to_string(),
    };
    info!(target: "plswipl::prolog", "{}", text);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Machine, Outcome};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    /// Run `query` once and render the binding of `Out`.
    fn run(query: &str) -> Result<Option<String>, String> {
        let mut store = Store::new(1000);
        let mut db = Database::default();
        let read = parse_term(query).unwrap();
        let mut vars = Vec::new();
        let goal = store.copy_in(&read.term, &mut vars);
        let out = read
            .variables
            .iter()
            .position(|name| name == "Out")
            .and_then(|index| vars[index]);
        let mut ctx = Context {
            store: &mut store,
            db: &mut db,
            inferences: 0,
            max_inferences: 10_000,
        };
        match Machine::new(goal).solve(&mut ctx) {
            Outcome::Solution => Ok(Some(match out {
                Some(addr) => ctx.store.copy_out(addr).unwrap().to_string(),
                None => "true".to_string(),
            })),
            Outcome::Failure => Ok(None),
            Outcome::Error(signal) => Err(signal
                .into_ball()
                .map(|ball| ball.to_string())
                .unwrap_or_default()),
        }
    }

    fn value(query: &str) -> String {
        run(query).unwrap().unwrap()
    }

    #[test_case("Out is 2 + 3 * 4", "14" ; "is")]
    #[test_case("length([a, b, c], Out)", "3" ; "length of list")]
    #[test_case("length(Out, 2)", "[_G0,_G1]" ; "length builds list")]
    #[test_case("atom_length(hello, Out)", "5" ; "atom length")]
    #[test_case("atom_string(abc, Out)", "\"abc\"" ; "atom to string")]
    #[test_case("atom_concat(foo, bar, Out)", "foobar" ; "atom concat")]
    #[test_case("atom_concat(Out, bar, foobar)", "foo" ; "atom concat prefix")]
    #[test_case("string_concat(\"a\", 1, Out)", "\"a1\"" ; "string concat number")]
    #[test_case("number_string(Out, \" 42\")", "42" ; "number from string")]
    #[test_case("atom_number('3.5', Out)", "3.5" ; "atom number")]
    #[test_case("succ(Out, 4)", "3" ; "succ backwards")]
    #[test_case("plus(2, Out, 5)", "3" ; "plus")]
    #[test_case("functor(foo(a, b), N, A), Out = N/A", "foo/2" ; "functor decompose")]
    #[test_case("functor(Out, point, 2)", "point(_G0,_G1)" ; "functor build")]
    #[test_case("arg(2, f(a, b, c), Out)", "b" ; "arg")]
    #[test_case("f(a, b) =.. Out", "[f,a,b]" ; "univ decompose")]
    #[test_case("Out =.. [g, 1]", "g(1)" ; "univ build")]
    #[test_case("msort([c, a, b, a], Out)", "[a,a,b,c]" ; "msort")]
    #[test_case("sort([c, a, b, a], Out)", "[a,b,c]" ; "sort dedups")]
    #[test_case("sort([b, 2, \"s\", f(x), 1.0, a], Out)", "[1.0,2,a,b,\"s\",f(x)]" ; "standard order")]
    #[test_case("keysort([b-1, a-2, b-0], Out)", "[a-2,b-1,b-0]" ; "keysort stable")]
    #[test_case("atom_chars(abc, Out)", "[a,b,c]" ; "atom chars")]
    #[test_case("atom_codes(Out, [104, 105])", "hi" ; "atom from codes")]
    #[test_case("atomic_list_concat([a, 1, \"b\"], Out)", "a1b" ; "atomic list concat")]
    #[test_case("atomic_list_concat(Out, ',', 'x,y')", "[x,y]" ; "atomic list split")]
    #[test_case("term_string(foo(X, \"s\"), Out)", "\"foo(_G0,\\\"s\\\")\"" ; "term to string")]
    #[test_case("term_string(Out, \"bar(1, Y)\")", "bar(1,_G0)" ; "string to term")]
    #[test_case("compare(Out, 1, 2)", "<" ; "compare")]
    #[test_case("compare(Out, f(a, 2), f(a, 1.0))", ">" ; "compare later argument")]
    #[test_case("compare(Out, f(b), g(a))", "<" ; "compare functor before arguments")]
    #[test_case("compare(Out, [1, 2, 3], [1, 2])", ">" ; "compare list lengths")]
    #[test_case("copy_term(f(X, X, Y), Out)", "f(_G0,_G0,_G1)" ; "copy term")]
    fn test_builtin_value(query: &str, expected: &str) {
        assert_eq!(value(query), expected);
    }

    #[test_case("a \\= b" ; "not unifiable")]
    #[test_case("f(X) == f(X)" ; "identical")]
    #[test_case("1 =:= 1.0" ; "arithmetic equality")]
    #[test_case("1.0 @< 1" ; "float before int")]
    #[test_case("is_list([1, 2])" ; "is list")]
    #[test_case("ground(f(a))" ; "ground")]
    #[test_case("atomic(\"s\")" ; "string is atomic")]
    fn test_builtin_succeeds(query: &str) {
        assert_eq!(run(query), Ok(Some("true".to_string())));
    }

    #[test_case("a = b" ; "unify mismatch")]
    #[test_case("X \\= b" ; "unifiable")]
    #[test_case("1 > 2" ; "comparison")]
    #[test_case("succ(_, 0)" ; "no predecessor of zero")]
    #[test_case("arg(4, f(a), _)" ; "arg out of range")]
    #[test_case("atom_concat(x, _, abc)" ; "prefix mismatch")]
    fn test_builtin_fails(query: &str) {
        assert_eq!(run(query), Ok(None));
    }

    #[test]
    fn test_is_reports_errors() {
        assert_eq!(
            run("X is foo + 1"),
            Err("error(type_error(evaluable,foo/0),_G0)".to_string())
        );
        assert_eq!(
            run("atom_length(X, _)"),
            Err("error(instantiation_error,_G0)".to_string())
        );
    }

    #[test]
    fn test_assert_and_retract() {
        let mut store = Store::new(1000);
        let mut db = Database::default();
        let mut ctx = Context {
            store: &mut store,
            db: &mut db,
            inferences: 0,
            max_inferences: 10_000,
        };
        for source in [
            "assertz(counter(1))",
            "asserta(counter(0))",
            "retract(counter(0))",
        ] {
            let term = parse_term(source).unwrap().term;
            let goal = ctx.store.copy_in(&term, &mut Vec::new());
            assert!(matches!(Machine::new(goal).solve(&mut ctx), Outcome::Solution));
        }
        let key = (ctx.store.intern("counter"), 1);
        let clauses = &ctx.db.lookup(key).unwrap().clauses;
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].head.to_string(), "counter(1)");
    }

    #[test]
    fn test_assert_builtin_is_permission_error() {
        assert_eq!(
            run("assertz(atom_length(a, 1))"),
            Err(
                "error(permission_error(modify,static_procedure,atom_length/2),_G0)".to_string()
            )
        );
    }
}
