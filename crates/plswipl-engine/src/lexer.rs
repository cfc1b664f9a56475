//! Tokenizer for Prolog source text.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use chumsky::error::SimpleReason;
use chumsky::prelude::*;

use crate::error::EngineError;
use crate::term::is_symbol_char;

/// Character offsets into the source text.
pub type Span = Range<usize>;

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Name token: plain, symbolic, solo or quoted atom.
    Name(String),
    /// Variable name (including `_`).
    Var(String),
    Int(i64),
    Float(f64),
    /// Double-quoted string.
    Str(String),
    /// `(` directly following a name, i.e. functional notation.
    OpenCall,
    Open,
    Close,
    OpenList,
    CloseList,
    OpenCurly,
    CloseCurly,
    Comma,
    Bar,
    /// Clause terminating `.`.
    End,
}

// Float literals are finite and unsigned, so comparing and hashing their
// bits agrees with `==`.
impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Token::Name(s) | Token::Var(s) | Token::Str(s) => s.hash(state),
            Token::Int(v) => v.hash(state),
            Token::Float(v) => v.to_bits().hash(state),
            _ => {}
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(s) | Token::Var(s) => write!(f, "{}", s),
            Token::Int(v) => write!(f, "{}", v),
            Token::Float(v) => write!(f, "{}", v),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::OpenCall | Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
            Token::OpenList => write!(f, "["),
            Token::CloseList => write!(f, "]"),
            Token::OpenCurly => write!(f, "{{"),
            Token::CloseCurly => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Bar => write!(f, "|"),
            Token::End => write!(f, "end of clause"),
        }
    }
}

/// Tokenize `source`.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>, EngineError> {
    lexer()
        .parse(source)
        .map_err(|errors| syntax_error(source, errors, |c| format!("'{}'", c)))
}

/// Create the tokenizer.
pub fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = Simple<char>> {
    let word_char = filter(|c: &char| c.is_alphanumeric() || *c == '_');

    let variable = filter(|c: &char| *c == '_' || c.is_uppercase())
        .map(Some)
        .chain::<char, Vec<_>, _>(word_char.clone().repeated())
        .collect::<String>()
        .map(Token::Var);

    let word = filter(|c: &char| c.is_alphabetic())
        .map(Some)
        .chain::<char, Vec<_>, _>(word_char.repeated())
        .collect::<String>()
        .map(Token::Name);

    let symbol = filter(|c: &char| is_symbol_char(*c))
        .repeated()
        .at_least(1)
        .collect::<String>()
        .map(Token::Name);

    // a full stop ends a clause only before layout or the end of the text
    let end_token = just('.')
        .then(
            filter(|c: &char| c.is_whitespace() || *c == '%')
                .ignored()
                .or(end())
                .rewind(),
        )
        .to(Token::End);

    let punctuation = choice((
        just('(').to(Token::Open),
        just(')').to(Token::Close),
        just('[').to(Token::OpenList),
        just(']').to(Token::CloseList),
        just('{').to(Token::OpenCurly),
        just('}').to(Token::CloseCurly),
        just(',').to(Token::Comma),
        just("||").to(Token::Name("||".to_string())),
        just('|').to(Token::Bar),
        one_of("!;").map(|c: char| Token::Name(c.to_string())),
    ));

    let line_comment = just('%').then(none_of('\n').repeated()).ignored();
    let block_comment = just("/*")
        .then(take_until(just("*/")))
        .ignored()
        .labelled("block comment");
    let layout = filter(|c: &char| c.is_whitespace())
        .ignored()
        .or(line_comment)
        .or(block_comment)
        .repeated();

    let token = choice((
        end_token,
        number(),
        variable,
        word,
        quoted('\'').map(Token::Name),
        quoted('"').map(Token::Str),
        punctuation,
        symbol,
    ));

    layout
        .clone()
        .ignore_then(token.map_with_span(|token, span| (token, span)))
        .repeated()
        .then_ignore(layout)
        .then_ignore(end())
        .map(mark_calls)
}

/// Integers, floats, `0'c` character codes and `0x`/`0o`/`0b` literals.
fn number() -> impl Parser<char, Token, Error = Simple<char>> + Clone {
    let digits = text::digits::<char, Simple<char>>(10);

    let char_code = just("0'")
        .ignore_then(choice((
            just("''").to('\''),
            escape(),
            filter(|c: &char| *c != '\\'),
        )))
        .map(|c| Token::Int(c as i64));

    let radix = |prefix: &'static str, base: u32| {
        just(prefix)
            .ignore_then(text::digits::<char, Simple<char>>(base))
            .try_map(move |digits: String, span: Span| {
                i64::from_str_radix(&digits, base)
                    .map(Token::Int)
                    .map_err(|_| Simple::custom(span, "integer literal out of range"))
            })
    };

    let fraction = just('.').ignore_then(digits);
    let exponent = one_of("eE")
        .ignore_then(one_of("+-").or_not())
        .then(digits)
        .map(|(sign, digits): (Option<char>, String)| {
            format!("e{}{}", sign.unwrap_or('+'), digits)
        });
    let decimal = digits
        .then(fraction.or_not())
        .then(exponent.or_not())
        .try_map(|((whole, fraction), exponent), span: Span| {
            if fraction.is_none() && exponent.is_none() {
                return whole.parse::<i64>().map(Token::Int).map_err(|_| {
                    Simple::custom(span, format!("integer literal {} out of range", whole))
                });
            }
            let text = format!(
                "{}.{}{}",
                whole,
                fraction.as_deref().unwrap_or("0"),
                exponent.unwrap_or_default()
            );
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| Simple::custom(span, format!("invalid float literal {}", text)))
        });

    choice((
        char_code,
        radix("0x", 16),
        radix("0o", 8),
        radix("0b", 2),
        decimal,
    ))
}

fn escape() -> impl Parser<char, char, Error = Simple<char>> + Clone {
    just('\\')
        .ignore_then(choice((
            just('n').to('\n'),
            just('t').to('\t'),
            just('r').to('\r'),
            just('a').to('\u{7}'),
            just('b').to('\u{8}'),
            just('f').to('\u{c}'),
            just('v').to('\u{b}'),
            just('0').to('\0'),
            just('e').to('\u{1b}'),
            just('s').to(' '),
            one_of("\\'\"`"),
        )))
        .labelled("escape sequence")
}

/// Text between `quote` characters. A doubled quote stands for itself and
/// a backslash before a newline continues the line.
fn quoted(quote: char) -> impl Parser<char, String, Error = Simple<char>> + Clone {
    let item = choice((
        just(quote).then(just(quote)).to(Some(quote)),
        just("\\\n").to(None),
        escape().map(Some),
        filter(move |c: &char| *c != quote && *c != '\\').map(Some),
    ));
    item.repeated()
        .delimited_by(just(quote), just(quote))
        .map(|chars| chars.into_iter().flatten().collect())
        .labelled("quoted text")
}

/// `(` with no layout after a name opens an argument list.
fn mark_calls(mut tokens: Vec<(Token, Span)>) -> Vec<(Token, Span)> {
    for i in 1..tokens.len() {
        let call = tokens[i].0 == Token::Open
            && matches!(tokens[i - 1].0, Token::Name(_))
            && tokens[i - 1].1.end == tokens[i].1.start;
        if call {
            tokens[i].0 = Token::OpenCall;
        }
    }
    tokens
}

/// Line and column, both from 1, of a character offset.
pub(crate) fn position(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for c in source.chars().take(offset) {
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Report the first error as an [`EngineError::Syntax`].
pub(crate) fn syntax_error<I: Hash + Eq>(
    source: &str,
    errors: Vec<Simple<I>>,
    show: impl Fn(&I) -> String,
) -> EngineError {
    let Some(error) = errors.into_iter().next() else {
        return EngineError::Syntax {
            line: 1,
            column: 1,
            message: "unreadable source".to_string(),
        };
    };
    let (line, column) = position(source, error.span().start);
    let message = match (error.reason(), error.found()) {
        (SimpleReason::Custom(message), _) => message.clone(),
        (_, Some(found)) => format!("unexpected {}", show(found)),
        (_, None) => "unexpected end of input".to_string(),
    };
    let message = match error.label() {
        Some(label) => format!("{} in {}", message, label),
        None => message,
    };
    EngineError::Syntax {
        line,
        column,
        message,
    }
}
