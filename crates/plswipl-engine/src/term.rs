//! Owned terms.
//!
//! A `Term` lives outside the engine's heap. Clauses are stored in this form,
//! exception balls are copied out into it, and callers use it to inspect
//! results without holding a frame open.

use std::fmt;

use crate::ops;

/// Functor name of a list cell.
pub const LIST_CONS: &str = "[|]";

/// The empty list atom.
pub const NIL: &str = "[]";

/// An owned Prolog term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Variable, numbered from zero within the enclosing term or clause.
    Var(usize),
    /// Atom.
    Atom(String),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// String object.
    Str(String),
    /// Compound term `name(args...)`.
    Compound(String, Vec<Term>),
}

impl Term {
    pub fn atom(name: &str) -> Self {
        Term::Atom(name.to_string())
    }

    pub fn string(text: &str) -> Self {
        Term::Str(text.to_string())
    }

    pub fn compound(name: &str, args: Vec<Term>) -> Self {
        Term::Compound(name.to_string(), args)
    }

    pub fn nil() -> Self {
        Term::Atom(NIL.to_string())
    }

    /// Build a proper list from items.
    pub fn list(items: Vec<Term>) -> Self {
        Self::partial_list(items, Term::nil())
    }

    /// Build a list with an explicit tail.
    pub fn partial_list(items: Vec<Term>, tail: Term) -> Self {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Term::compound(LIST_CONS, vec![item, acc]))
    }

    /// `error(Formal, _)`, the shape of every ISO error term.
    pub fn error(formal: Term) -> Self {
        Term::compound("error", vec![formal, Term::Var(0)])
    }

    /// Name and arity for callable terms.
    pub fn functor(&self) -> Option<(&str, usize)> {
        match self {
            Term::Atom(name) => Some((name, 0)),
            Term::Compound(name, args) => Some((name, args.len())),
            _ => None,
        }
    }

    /// Number of distinct variable slots used by this term.
    pub fn var_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(term) = pending.pop() {
            match term {
                Term::Var(n) => count = count.max(n + 1),
                Term::Compound(_, args) => pending.extend(args),
                _ => {}
            }
        }
        count
    }

    /// Items of a proper list.
    pub fn as_list(&self) -> Option<Vec<&Term>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Term::Atom(name) if name == NIL => return Some(items),
                Term::Compound(name, args) if name == LIST_CONS && args.len() == 2 => {
                    items.push(&args[0]);
                    current = &args[1];
                }
                _ => return None,
            }
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, max_priority: u16) -> fmt::Result {
        match self {
            Term::Var(n) => write!(f, "_G{}", n),
            Term::Atom(name) => {
                if ops::is_op(name) && max_priority < 1200 && name != NIL {
                    f.write_str("(")?;
                    write_atom(f, name)?;
                    f.write_str(")")
                } else {
                    write_atom(f, name)
                }
            }
            Term::Int(v) => write!(f, "{}", v),
            Term::Float(v) => f.write_str(&format_float(*v)),
            Term::Str(s) => write_quoted(f, s, '"'),
            Term::Compound(name, args) => {
                if name == LIST_CONS && args.len() == 2 {
                    return self.write_list(f);
                }
                if name == "{}" && args.len() == 1 {
                    f.write_str("{")?;
                    args[0].write(f, 1200)?;
                    return f.write_str("}");
                }
                if args.len() == 2
                    && let Some(op) = ops::infix(name)
                {
                    return write_infix(f, name, op, &args[0], &args[1], max_priority);
                }
                if args.len() == 1
                    && let Some(op) = ops::prefix(name)
                {
                    // -(1) must not read back as the integer -1
                    let signed_number = matches!(name.as_str(), "-" | "+")
                        && matches!(args[0], Term::Int(_) | Term::Float(_));
                    if !signed_number {
                        return write_prefix(f, name, op, &args[0], max_priority);
                    }
                }
                write_atom(f, name)?;
                f.write_str("(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    arg.write(f, 999)?;
                }
                f.write_str(")")
            }
        }
    }

    fn write_list(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let mut current = self;
        let mut first = true;
        loop {
            match current {
                Term::Compound(name, args) if name == LIST_CONS && args.len() == 2 => {
                    if !first {
                        f.write_str(",")?;
                    }
                    args[0].write(f, 999)?;
                    first = false;
                    current = &args[1];
                }
                Term::Atom(name) if name == NIL => break,
                tail => {
                    f.write_str("|")?;
                    tail.write(f, 999)?;
                    break;
                }
            }
        }
        f.write_str("]")
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 1200)
    }
}

fn write_infix(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    op: ops::OpDef,
    left: &Term,
    right: &Term,
    max_priority: u16,
) -> fmt::Result {
    let open = op.priority > max_priority;
    if open {
        f.write_str("(")?;
    }
    left.write(f, op.left_max())?;
    let right_text = render_with(right, op.right_max());
    if name == "," {
        f.write_str(",")?;
    } else if name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        write!(f, " {} ", name)?;
    } else if right_text.starts_with(|c: char| is_symbol_char(c)) {
        write!(f, "{} ", name)?;
    } else {
        f.write_str(name)?;
    }
    f.write_str(&right_text)?;
    if open {
        f.write_str(")")?;
    }
    Ok(())
}

fn write_prefix(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    op: ops::OpDef,
    arg: &Term,
    max_priority: u16,
) -> fmt::Result {
    let open = op.priority > max_priority;
    if open {
        f.write_str("(")?;
    }
    write_atom(f, name)?;
    let arg_text = render_with(arg, op.right_max());
    let alpha = name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if alpha || arg_text.starts_with(|c: char| is_symbol_char(c) || c == '(') {
        f.write_str(" ")?;
    }
    f.write_str(&arg_text)?;
    if open {
        f.write_str(")")?;
    }
    Ok(())
}

fn render_with(term: &Term, max_priority: u16) -> String {
    struct At<'a>(&'a Term, u16);
    impl fmt::Display for At<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.write(f, self.1)
        }
    }
    At(term, max_priority).to_string()
}

pub(crate) fn is_symbol_char(c: char) -> bool {
    "+-*/\\^<>=~:.?@#&$".contains(c)
}

/// Whether an atom can be written without quotes.
fn atom_is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => false,
        Some(c) if c.is_ascii_lowercase() => name.chars().all(|c| c.is_alphanumeric() || c == '_'),
        Some(_) if name.chars().all(is_symbol_char) => true,
        Some(_) => matches!(name, "[]" | "!" | ";" | "{}"),
    }
}

fn write_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if atom_is_plain(name) {
        f.write_str(name)
    } else {
        write_quoted(f, name, '\'')
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str, quote: char) -> fmt::Result {
    use fmt::Write;
    f.write_char(quote)?;
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

/// Format a float so that it reads back as a float.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let text = format!("{:?}", v);
    if text.contains('.') {
        text
    } else if let Some(pos) = text.find('e') {
        format!("{}.0{}", &text[..pos], &text[pos..])
    } else {
        format!("{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atoms() {
        assert_eq!(Term::atom("foo").to_string(), "foo");
        assert_eq!(Term::atom("Foo").to_string(), "'Foo'");
        assert_eq!(Term::atom("hello world").to_string(), "'hello world'");
        assert_eq!(Term::atom("[]").to_string(), "[]");
        assert_eq!(Term::atom("it's").to_string(), "'it\\'s'");
    }

    #[test]
    fn test_write_lists() {
        let list = Term::list(vec![Term::Int(1), Term::Int(2), Term::Int(3)]);
        assert_eq!(list.to_string(), "[1,2,3]");

        let partial = Term::partial_list(vec![Term::atom("a")], Term::Var(0));
        assert_eq!(partial.to_string(), "[a|_G0]");
    }

    #[test]
    fn test_write_operators() {
        let sum = Term::compound("+", vec![Term::Int(1), Term::Int(2)]);
        assert_eq!(sum.to_string(), "1+2");

        let nested = Term::compound(
            "*",
            vec![sum.clone(), Term::Int(3)],
        );
        assert_eq!(nested.to_string(), "(1+2)*3");

        let is = Term::compound("is", vec![Term::Var(0), sum]);
        assert_eq!(is.to_string(), "_G0 is 1+2");

        let pi = Term::compound("/", vec![Term::atom("foo"), Term::Int(2)]);
        assert_eq!(pi.to_string(), "foo/2");
    }

    #[test]
    fn test_write_error_term() {
        let err = Term::error(Term::compound(
            "existence_error",
            vec![
                Term::atom("procedure"),
                Term::compound("/", vec![Term::atom("nope"), Term::Int(1)]),
            ],
        ));
        insta::assert_snapshot!(err.to_string(), @"error(existence_error(procedure,nope/1),_G0)");
    }

    #[test]
    fn test_write_strings_and_floats() {
        assert_eq!(Term::string("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Term::Float(1.0).to_string(), "1.0");
        assert_eq!(Term::Float(2.5).to_string(), "2.5");
        assert_eq!(Term::Float(1e20).to_string(), "1.0e20");
    }

    #[test]
    fn test_negative_operand_spacing() {
        let t = Term::compound("-", vec![Term::Int(1), Term::Int(-1)]);
        assert_eq!(t.to_string(), "1- -1");
    }

    #[test]
    fn test_as_list() {
        let list = Term::list(vec![Term::atom("a"), Term::atom("b")]);
        assert_eq!(list.as_list().map(|l| l.len()), Some(2));
        assert!(Term::atom("a").as_list().is_none());
    }
}
