//! Operator precedence reader for Prolog terms and clauses.
//!
//! The chumsky grammar reads bracket structure: argument lists, lists,
//! curly terms and parentheses. Between brackets a term is a run of
//! operands and names, which [`Resolver`] folds into a tree using the
//! operator table.

use std::collections::HashMap;
use std::iter::Peekable;

use chumsky::prelude::*;
use chumsky::Stream;

use crate::error::EngineError;
use crate::lexer::{Span, Token, syntax_error, tokenize};
use crate::ops;
use crate::term::Term;

/// A term read from source, with its variable names.
#[derive(Debug, Clone)]
pub struct ReadTerm {
    pub term: Term,
    /// Names of the named variables, indexed by variable number.
    /// Anonymous variables appear as `_`.
    pub variables: Vec<String>,
}

/// Read every clause in `source`.
pub fn parse_program(source: &str) -> Result<Vec<ReadTerm>, EngineError> {
    let tokens = tokenize(source)?;
    let names = variable_names(&tokens);
    let eoi = source.chars().count();

    let clauses = reader()
        .then_ignore(just(Token::End))
        .repeated()
        .then_ignore(end())
        .parse(Stream::from_iter(eoi..eoi + 1, tokens.into_iter()))
        .map_err(|errors| syntax_error(source, errors, Token::to_string))?;

    Ok(clauses
        .into_iter()
        .map(|term| number_variables(term, &names))
        .collect())
}

/// Read a single term; the terminating `.` is optional.
pub fn parse_term(source: &str) -> Result<ReadTerm, EngineError> {
    let tokens = tokenize(source)?;
    let names = variable_names(&tokens);
    let eoi = source.chars().count();

    let term = reader()
        .then_ignore(just(Token::End).or_not())
        .then_ignore(end())
        .parse(Stream::from_iter(eoi..eoi + 1, tokens.into_iter()))
        .map_err(|errors| syntax_error(source, errors, Token::to_string))?;

    Ok(number_variables(term, &names))
}

/// One element of an operator run.
#[derive(Debug, Clone)]
enum Item {
    /// Anything that is a term without looking at operators.
    Operand(Term),
    /// A bare name, which may turn out to be an operator or an atom.
    Name(String),
}

/// A term of priority 1200. Variables come out as `Term::Var(offset)`
/// until [`number_variables`] renumbers them.
fn reader() -> impl Parser<Token, Term, Error = Simple<Token>> + Clone {
    let item = recursive(|item| {
        let arg = operator_run(item.clone(), 999);
        let full = operator_run(item.or(separator()), 1200);
        let args = arg.clone().separated_by(just(Token::Comma)).at_least(1);

        let compound = select! { Token::Name(name) => name }
            .then(
                args.clone()
                    .delimited_by(just(Token::OpenCall), just(Token::Close))
                    .labelled("argument list"),
            )
            .map(|(name, args)| Item::Operand(Term::Compound(name, args)));

        let nil = just(Token::OpenList)
            .then(just(Token::CloseList))
            .to(Item::Operand(Term::nil()));

        let list = args
            .then(just(Token::Bar).ignore_then(arg).or_not())
            .delimited_by(just(Token::OpenList), just(Token::CloseList))
            .map(|(items, tail)| {
                Item::Operand(Term::partial_list(items, tail.unwrap_or_else(Term::nil)))
            })
            .labelled("list");

        let empty_curly = just(Token::OpenCurly)
            .then(just(Token::CloseCurly))
            .to(Item::Operand(Term::atom("{}")));

        let curly = full
            .clone()
            .delimited_by(just(Token::OpenCurly), just(Token::CloseCurly))
            .map(|inner| Item::Operand(Term::compound("{}", vec![inner])));

        let parens = full
            .delimited_by(just(Token::Open), just(Token::Close))
            .map(Item::Operand);

        let literal = select! {
            Token::Int(v) => Item::Operand(Term::Int(v)),
            Token::Float(v) => Item::Operand(Term::Float(v)),
            Token::Str(s) => Item::Operand(Term::Str(s)),
        };

        let variable = select! { Token::Var(_) => () }
            .map_with_span(|_, span: Span| Item::Operand(Term::Var(span.start)));

        let name = select! { Token::Name(name) => Item::Name(name) };

        choice((
            compound,
            nil,
            list,
            empty_curly,
            curly,
            parens,
            literal,
            variable,
            name,
        ))
        .map_with_span(|item, span| (item, span))
    });

    operator_run(item.or(separator()), 1200)
}

/// `,` and `|` are infix operators only outside argument lists.
fn separator() -> impl Parser<Token, (Item, Span), Error = Simple<Token>> + Clone {
    select! {
        Token::Comma => Item::Name(",".to_string()),
        Token::Bar => Item::Name(";".to_string()),
    }
    .map_with_span(|item, span| (item, span))
}

/// A run of items read as one term of priority at most `max`.
fn operator_run<P>(item: P, max: u16) -> impl Parser<Token, Term, Error = Simple<Token>> + Clone
where
    P: Parser<Token, (Item, Span), Error = Simple<Token>> + Clone,
{
    item.repeated()
        .at_least(1)
        .try_map(move |items, span: Span| Resolver::new(items, span).read(max))
}

/// Folds an operator run into a term.
struct Resolver {
    items: Peekable<std::vec::IntoIter<(Item, Span)>>,
    run: Span,
}

impl Resolver {
    fn new(items: Vec<(Item, Span)>, run: Span) -> Self {
        Self {
            items: items.into_iter().peekable(),
            run,
        }
    }

    fn read(mut self, max: u16) -> Result<Term, Simple<Token>> {
        let term = self.parse(max)?;
        match self.items.next() {
            Some((_, span)) => Err(Simple::custom(span, "operator expected")),
            None => Ok(term),
        }
    }

    /// Parse a term whose priority is at most `max`.
    fn parse(&mut self, max: u16) -> Result<Term, Simple<Token>> {
        let (mut left, mut left_priority) = self.primary(max)?;

        while let Some((Item::Name(name), _)) = self.items.peek() {
            let Some(op) = ops::infix(name) else {
                break;
            };
            if op.priority > max || left_priority > op.left_max() {
                break;
            }
            let name = name.clone();
            self.items.next();
            let right = self.parse(op.right_max())?;
            left = Term::Compound(name, vec![left, right]);
            left_priority = op.priority;
        }

        Ok(left)
    }

    fn primary(&mut self, max: u16) -> Result<(Term, u16), Simple<Token>> {
        match self.items.next() {
            Some((Item::Operand(term), _)) => Ok((term, 0)),
            Some((Item::Name(name), span)) => self.name_term(name, span, max),
            None => Err(Simple::custom(
                self.run.end..self.run.end + 1,
                "operand expected",
            )),
        }
    }

    fn name_term(&mut self, name: String, span: Span, max: u16) -> Result<(Term, u16), Simple<Token>> {
        // Negative numeric literal
        if name == "-" && self.number_follows(&span) {
            match self.items.next() {
                Some((Item::Operand(Term::Int(v)), _)) => return Ok((Term::Int(-v), 0)),
                Some((Item::Operand(Term::Float(v)), _)) => return Ok((Term::Float(-v), 0)),
                _ => {}
            }
        }

        if let Some(op) = ops::prefix(&name)
            && self.starts_term()
        {
            let (priority, arg_max) = if op.priority > max {
                (999, 999)
            } else {
                (op.priority, op.right_max())
            };
            let arg = self.parse(arg_max)?;
            return Ok((Term::Compound(name, vec![arg]), priority));
        }

        Ok((Term::Atom(name), 0))
    }

    /// Whether a number literal follows `span` with no layout between.
    fn number_follows(&mut self, span: &Span) -> bool {
        matches!(
            self.items.peek(),
            Some((Item::Operand(Term::Int(_) | Term::Float(_)), next)) if next.start == span.end
        )
    }

    /// Whether the next item can begin an operand.
    fn starts_term(&mut self) -> bool {
        match self.items.peek() {
            Some((Item::Operand(_), _)) => true,
            // An infix operator here means the prefix operator is itself an operand
            Some((Item::Name(next), _)) => ops::infix(next).is_none() || ops::prefix(next).is_some(),
            None => false,
        }
    }
}

/// Variable names by token offset.
fn variable_names(tokens: &[(Token, Span)]) -> HashMap<usize, String> {
    tokens
        .iter()
        .filter_map(|(token, span)| match token {
            Token::Var(name) => Some((span.start, name.clone())),
            _ => None,
        })
        .collect()
}

/// Number the variables of a freshly read term by first occurrence.
/// Each `_` is a distinct variable.
fn number_variables(mut term: Term, names: &HashMap<usize, String>) -> ReadTerm {
    let mut offsets = Vec::new();
    for_each_var(&mut term, |offset| offsets.push(*offset));
    offsets.sort_unstable();

    let mut variables = Vec::new();
    let mut named: HashMap<&str, usize> = HashMap::new();
    let mut numbering = HashMap::new();
    for offset in offsets {
        let name = names.get(&offset).map_or("_", String::as_str);
        let index = match named.get(name) {
            Some(&index) => index,
            None => {
                let index = variables.len();
                variables.push(name.to_string());
                if name != "_" {
                    named.insert(name, index);
                }
                index
            }
        };
        numbering.insert(offset, index);
    }

    for_each_var(&mut term, |var| {
        if let Some(&index) = numbering.get(var) {
            *var = index;
        }
    });
    ReadTerm { term, variables }
}

fn for_each_var(term: &mut Term, mut f: impl FnMut(&mut usize)) {
    let mut pending = vec![term];
    while let Some(term) = pending.pop() {
        match term {
            Term::Var(var) => f(var),
            Term::Compound(_, args) => pending.extend(args.iter_mut()),
            _ => {}
        }
    }
}

/// Split a clause into head and body.
pub fn split_clause(term: Term) -> (Term, Term) {
    match term {
        Term::Compound(name, mut args) if name == ":-" && args.len() == 2 => {
            let body = args.pop().unwrap_or_else(|| Term::atom("true"));
            let head = args.pop().unwrap_or_else(|| Term::atom("true"));
            (head, body)
        }
        other => (other, Term::atom("true")),
    }
}

/// Whether `term` is a directive `:- Goal`.
pub fn as_directive(term: &Term) -> Option<&Term> {
    match term {
        Term::Compound(name, args) if name == ":-" && args.len() == 1 => Some(&args[0]),
        _ => None,
    }
}
