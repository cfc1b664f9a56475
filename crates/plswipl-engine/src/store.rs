//! Heap, trail and atom table.
//!
//! Terms on the heap are cells addressed by index. A compound term is a
//! `Struct` header followed by one cell per argument. An unbound variable is
//! a `Ref` to itself; binding overwrites the cell with a `Ref` to the value
//! and records the address on the trail so backtracking can undo it.

use std::collections::HashMap;
use std::rc::Rc;

use crate::term::{LIST_CONS, NIL, Term};

pub(crate) type Addr = usize;

/// Interned atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Atom(u32);

#[derive(Debug, Clone)]
pub(crate) enum Cell {
    Ref(Addr),
    Atom(Atom),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Struct(Atom, usize),
}

/// A copy exceeded the configured depth.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TooDeep;

#[derive(Default)]
struct AtomTable {
    names: Vec<Rc<str>>,
    index: HashMap<Rc<str>, Atom>,
}

impl AtomTable {
    fn intern(&mut self, name: &str) -> Atom {
        if let Some(&atom) = self.index.get(name) {
            return atom;
        }
        let atom = Atom(self.names.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.names.push(Rc::clone(&name));
        self.index.insert(name, atom);
        atom
    }
}

pub(crate) struct Store {
    heap: Vec<Cell>,
    trail: Vec<Addr>,
    atoms: AtomTable,
    /// Cells below this index were allocated by the host and survive
    /// backtracking; only discarding their frame frees them.
    floor: usize,
    max_depth: usize,
}

impl Store {
    pub fn new(max_depth: usize) -> Self {
        Self {
            heap: Vec::new(),
            trail: Vec::new(),
            atoms: AtomTable::default(),
            floor: 0,
            max_depth,
        }
    }

    pub fn intern(&mut self, name: &str) -> Atom {
        self.atoms.intern(name)
    }

    pub fn atom_name(&self, atom: Atom) -> &str {
        &self.atoms.names[atom.0 as usize]
    }

    /// Shared handle on an atom's name, for use while the store is mutated.
    pub fn atom_text(&self, atom: Atom) -> Rc<str> {
        Rc::clone(&self.atoms.names[atom.0 as usize])
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    pub fn cell(&self, addr: Addr) -> &Cell {
        &self.heap[addr]
    }

    fn push(&mut self, cell: Cell) -> Addr {
        self.heap.push(cell);
        self.heap.len() - 1
    }

    pub fn new_var(&mut self) -> Addr {
        let addr = self.heap.len();
        self.heap.push(Cell::Ref(addr));
        addr
    }

    pub fn new_atom(&mut self, name: &str) -> Addr {
        let atom = self.intern(name);
        self.push(Cell::Atom(atom))
    }

    pub fn new_int(&mut self, value: i64) -> Addr {
        self.push(Cell::Int(value))
    }

    pub fn new_float(&mut self, value: f64) -> Addr {
        self.push(Cell::Float(value))
    }

    pub fn new_str(&mut self, text: &str) -> Addr {
        self.push(Cell::Str(Rc::from(text)))
    }

    /// Build a compound term whose arguments reference `args`.
    pub fn new_struct(&mut self, name: &str, args: &[Addr]) -> Addr {
        if args.is_empty() {
            return self.new_atom(name);
        }
        let atom = self.intern(name);
        let header = self.push(Cell::Struct(atom, args.len()));
        for &arg in args {
            self.heap.push(Cell::Ref(arg));
        }
        header
    }

    /// Build a proper list.
    pub fn new_list(&mut self, items: &[Addr]) -> Addr {
        let mut tail = self.new_atom(NIL);
        for &item in items.iter().rev() {
            tail = self.new_struct(LIST_CONS, &[item, tail]);
        }
        tail
    }

    /// Follow reference chains.
    pub fn deref(&self, mut addr: Addr) -> Addr {
        loop {
            match self.heap[addr] {
                Cell::Ref(next) if next != addr => addr = next,
                _ => return addr,
            }
        }
    }

    pub fn is_unbound(&self, addr: Addr) -> bool {
        let addr = self.deref(addr);
        matches!(self.heap[addr], Cell::Ref(_))
    }

    /// Argument addresses of a dereferenced compound.
    pub fn args(&self, addr: Addr) -> Vec<Addr> {
        match self.heap[addr] {
            Cell::Struct(_, arity) => (1..=arity).map(|i| addr + i).collect(),
            _ => Vec::new(),
        }
    }

    /// Name and arity of a dereferenced callable term.
    pub fn functor(&self, addr: Addr) -> Option<(Atom, usize)> {
        match self.heap[addr] {
            Cell::Atom(atom) => Some((atom, 0)),
            Cell::Struct(atom, arity) => Some((atom, arity)),
            _ => None,
        }
    }

    pub fn bind(&mut self, var: Addr, value: Addr) {
        self.heap[var] = Cell::Ref(value);
        self.trail.push(var);
    }

    /// Undo bindings made after `mark`.
    pub fn undo_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(var) = self.trail.pop()
                && var < self.heap.len()
            {
                self.heap[var] = Cell::Ref(var);
            }
        }
    }

    /// Mark everything allocated so far as host owned.
    pub fn protect(&mut self) {
        self.floor = self.heap.len();
    }

    /// Undo bindings and free solver cells back to a mark.
    pub fn restore(&mut self, trail_mark: usize, heap_mark: usize) {
        self.undo_to(trail_mark);
        self.heap.truncate(heap_mark.max(self.floor));
    }

    /// Undo bindings and free every cell back to a mark, host owned or not.
    pub fn release(&mut self, trail_mark: usize, heap_mark: usize) {
        self.undo_to(trail_mark);
        self.floor = self.floor.min(heap_mark);
        self.heap.truncate(heap_mark);
    }

    /// Stop protecting cells at or above a mark without freeing them.
    pub fn unprotect(&mut self, heap_mark: usize) {
        self.floor = self.floor.min(heap_mark);
    }

    pub fn unify(&mut self, a: Addr, b: Addr) -> bool {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let a = self.deref(a);
            let b = self.deref(b);
            if a == b {
                continue;
            }
            match (&self.heap[a], &self.heap[b]) {
                (Cell::Ref(_), Cell::Ref(_)) => {
                    // newer variable points at the older one
                    if a > b {
                        self.bind(a, b);
                    } else {
                        self.bind(b, a);
                    }
                }
                (Cell::Ref(_), _) => self.bind(a, b),
                (_, Cell::Ref(_)) => self.bind(b, a),
                (Cell::Atom(x), Cell::Atom(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Cell::Int(x), Cell::Int(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Cell::Float(x), Cell::Float(y)) => {
                    if x.to_bits() != y.to_bits() {
                        return false;
                    }
                }
                (Cell::Str(x), Cell::Str(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Cell::Struct(f, n), Cell::Struct(g, m)) => {
                    if f != g || n != m {
                        return false;
                    }
                    for i in 1..=*n {
                        pending.push((a + i, b + i));
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Structural identity without binding (`==/2`).
    pub fn identical(&self, a: Addr, b: Addr) -> bool {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let a = self.deref(a);
            let b = self.deref(b);
            if a == b {
                continue;
            }
            let same = match (&self.heap[a], &self.heap[b]) {
                (Cell::Atom(x), Cell::Atom(y)) => x == y,
                (Cell::Int(x), Cell::Int(y)) => x == y,
                (Cell::Float(x), Cell::Float(y)) => x.to_bits() == y.to_bits(),
                (Cell::Str(x), Cell::Str(y)) => x == y,
                (Cell::Struct(f, n), Cell::Struct(g, m)) if f == g && n == m => {
                    for i in 1..=*n {
                        pending.push((a + i, b + i));
                    }
                    true
                }
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }

    /// Copy an owned term onto the heap. `vars` maps variable numbers to
    /// heap variables and is extended as new variables are met.
    pub fn copy_in(&mut self, term: &Term, vars: &mut Vec<Option<Addr>>) -> Addr {
        enum Task<'t> {
            Visit(&'t Term),
            Build(&'t str, usize),
        }

        // arguments are built left to right before their functor cell
        let mut tasks = vec![Task::Visit(term)];
        let mut built: Vec<Addr> = Vec::new();
        while let Some(task) = tasks.pop() {
            let addr = match task {
                Task::Visit(Term::Var(n)) => {
                    if *n >= vars.len() {
                        vars.resize(n + 1, None);
                    }
                    match vars[*n] {
                        Some(addr) => addr,
                        None => {
                            let addr = self.new_var();
                            vars[*n] = Some(addr);
                            addr
                        }
                    }
                }
                Task::Visit(Term::Atom(name)) => self.new_atom(name),
                Task::Visit(Term::Int(v)) => self.new_int(*v),
                Task::Visit(Term::Float(v)) => self.new_float(*v),
                Task::Visit(Term::Str(s)) => self.new_str(s),
                Task::Visit(Term::Compound(name, args)) => {
                    tasks.push(Task::Build(name, args.len()));
                    tasks.extend(args.iter().rev().map(Task::Visit));
                    continue;
                }
                Task::Build(name, arity) => {
                    let args = built.split_off(built.len() - arity);
                    self.new_struct(name, &args)
                }
            };
            built.push(addr);
        }
        built.pop().unwrap_or_else(|| self.new_var())
    }

    /// Copy a heap term out into an owned term.
    pub fn copy_out(&self, addr: Addr) -> Result<Term, TooDeep> {
        let mut vars = HashMap::new();
        self.copy_out_with(addr, &mut vars, 0)
    }

    fn copy_out_with(
        &self,
        addr: Addr,
        vars: &mut HashMap<Addr, usize>,
        depth: usize,
    ) -> Result<Term, TooDeep> {
        if depth > self.max_depth {
            return Err(TooDeep);
        }
        let addr = self.deref(addr);
        Ok(match &self.heap[addr] {
            Cell::Ref(_) => {
                let next = vars.len();
                Term::Var(*vars.entry(addr).or_insert(next))
            }
            Cell::Atom(atom) => Term::Atom(self.atom_name(*atom).to_string()),
            Cell::Int(v) => Term::Int(*v),
            Cell::Float(v) => Term::Float(*v),
            Cell::Str(s) => Term::Str(s.to_string()),
            Cell::Struct(atom, arity) => {
                let name = self.atom_name(*atom).to_string();
                // lists are walked iteratively so long lists do not count as depth
                if name == LIST_CONS && *arity == 2 {
                    return self.copy_out_list(addr, vars, depth);
                }
                let mut args = Vec::with_capacity(*arity);
                for i in 1..=*arity {
                    args.push(self.copy_out_with(addr + i, vars, depth + 1)?);
                }
                Term::Compound(name, args)
            }
        })
    }

    fn copy_out_list(
        &self,
        mut addr: Addr,
        vars: &mut HashMap<Addr, usize>,
        depth: usize,
    ) -> Result<Term, TooDeep> {
        let mut items = Vec::new();
        loop {
            addr = self.deref(addr);
            match &self.heap[addr] {
                Cell::Struct(atom, 2) if self.atom_name(*atom) == LIST_CONS => {
                    if items.len() > self.max_depth * 1000 {
                        return Err(TooDeep);
                    }
                    items.push(self.copy_out_with(addr + 1, vars, depth + 1)?);
                    addr += 2;
                }
                _ => {
                    let tail = self.copy_out_with(addr, vars, depth + 1)?;
                    return Ok(Term::partial_list(items, tail));
                }
            }
        }
    }

    /// Items of a proper list, or `None` for partial and non-lists.
    pub fn list_items(&self, addr: Addr) -> Option<Vec<Addr>> {
        let mut items = Vec::new();
        let mut addr = self.deref(addr);
        loop {
            match &self.heap[addr] {
                Cell::Atom(atom) if self.atom_name(*atom) == NIL => return Some(items),
                Cell::Struct(atom, 2) if self.atom_name(*atom) == LIST_CONS => {
                    items.push(addr + 1);
                    addr = self.deref(addr + 2);
                }
                _ => return None,
            }
        }
    }

    /// Text of an atomic term: atom, string or number.
    pub fn text_of(&self, addr: Addr) -> Option<String> {
        let addr = self.deref(addr);
        match &self.heap[addr] {
            Cell::Atom(atom) => Some(self.atom_name(*atom).to_string()),
            Cell::Str(s) => Some(s.to_string()),
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(crate::term::format_float(*v)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify_binds_and_undoes() {
        let mut store = Store::new(100);
        let x = store.new_var();
        let a = store.new_atom("a");
        let mark = store.trail_len();

        assert!(store.unify(x, a));
        assert_eq!(store.copy_out(x).unwrap(), Term::atom("a"));

        store.undo_to(mark);
        assert!(store.is_unbound(x));
    }

    #[test]
    fn test_unify_structures() {
        let mut store = Store::new(100);
        let mut vars = Vec::new();
        let left = store.copy_in(
            &Term::compound("f", vec![Term::Var(0), Term::Int(2)]),
            &mut vars,
        );
        let mut other = Vec::new();
        let right = store.copy_in(
            &Term::compound("f", vec![Term::Int(1), Term::Var(0)]),
            &mut other,
        );

        assert!(store.unify(left, right));
        assert_eq!(
            store.copy_out(left).unwrap(),
            Term::compound("f", vec![Term::Int(1), Term::Int(2)])
        );
    }

    #[test]
    fn test_unify_mismatch() {
        let mut store = Store::new(100);
        let a = store.new_atom("a");
        let b = store.new_atom("b");
        assert!(!store.unify(a, b));

        let one = store.new_int(1);
        let float = store.new_float(1.0);
        assert!(!store.unify(one, float));
    }

    #[test]
    fn test_identical_does_not_bind() {
        let mut store = Store::new(100);
        let x = store.new_var();
        let y = store.new_var();
        assert!(!store.identical(x, y));
        assert!(store.identical(x, x));
        assert!(store.is_unbound(x));
    }

    #[test]
    fn test_restore_keeps_protected_cells() {
        let mut store = Store::new(100);
        let (trail, heap) = (store.trail_len(), store.heap_len());
        store.new_atom("solver");
        store.protect();
        let host = store.new_int(7);
        store.protect();

        store.restore(trail, heap);
        assert_eq!(store.heap_len(), 2);
        assert_eq!(store.text_of(host).as_deref(), Some("7"));

        store.release(trail, heap);
        assert_eq!(store.heap_len(), 0);
    }

    #[test]
    fn test_copy_out_depth_limit() {
        let mut store = Store::new(10);
        let mut term = Term::atom("leaf");
        for _ in 0..20 {
            term = Term::compound("s", vec![term]);
        }
        let mut vars = Vec::new();
        let addr = store.copy_in(&term, &mut vars);
        assert!(store.copy_out(addr).is_err());
    }

    #[test]
    fn test_copy_in_shares_variables_left_to_right() {
        let mut store = Store::new(100);
        let mut vars = Vec::new();
        let term = Term::compound(
            "f",
            vec![
                Term::Var(1),
                Term::compound("g", vec![Term::Var(0), Term::Var(1)]),
            ],
        );
        let addr = store.copy_in(&term, &mut vars);

        assert_eq!(vars.len(), 2);
        assert!(vars[1] < vars[0]);
        assert_eq!(
            store.copy_out(addr).unwrap().to_string(),
            "f(_G0,g(_G1,_G0))"
        );
    }

    #[test]
    fn test_copy_in_deep_term() {
        let mut store = Store::new(10);
        let mut term = Term::Int(0);
        for _ in 0..200_000 {
            term = Term::compound("+", vec![term, Term::Int(1)]);
        }
        let addr = store.copy_in(&term, &mut Vec::new());
        assert_eq!(store.functor(addr).map(|(_, arity)| arity), Some(2));
        // the owned term is torn down one level at a time
        while let Term::Compound(_, mut args) = term {
            term = args.swap_remove(0);
        }
    }

    #[test]
    fn test_cyclic_term_is_too_deep() {
        let mut store = Store::new(50);
        let x = store.new_var();
        let f = store.new_struct("f", &[x]);
        assert!(store.unify(x, f));
        assert!(store.copy_out(x).is_err());
    }

    #[test]
    fn test_list_items() {
        let mut store = Store::new(100);
        let items: Vec<Addr> = (1..=3).map(|i| store.new_int(i)).collect();
        let list = store.new_list(&items);
        assert_eq!(store.list_items(list).map(|l| l.len()), Some(3));
        assert_eq!(
            store.copy_out(list).unwrap().to_string(),
            "[1,2,3]"
        );
    }
}
