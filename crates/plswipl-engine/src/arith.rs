//! Arithmetic evaluation for `is/2` and the comparison predicates.

use std::cmp::Ordering;

use crate::iso;
use crate::store::{Addr, Cell, Store};
use crate::term::Term;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    pub fn to_term(self) -> Term {
        match self {
            Number::Int(v) => Term::Int(v),
            Number::Float(v) => Term::Float(v),
        }
    }
}

type EvalResult = Result<Number, Term>;

fn overflow() -> Term {
    iso::evaluation_error("int_overflow")
}

fn checked(value: Option<i64>) -> EvalResult {
    value.map(Number::Int).ok_or_else(overflow)
}

fn float(value: f64) -> EvalResult {
    if value.is_nan() {
        Err(iso::evaluation_error("undefined"))
    } else if value.is_infinite() {
        Err(iso::evaluation_error("float_overflow"))
    } else {
        Ok(Number::Float(value))
    }
}

fn int_of(value: Number, culprit: &str) -> Result<i64, Term> {
    match value {
        Number::Int(v) => Ok(v),
        Number::Float(v) => Err(iso::type_error(
            "integer",
            Term::compound(culprit, vec![Term::Float(v)]),
        )),
    }
}

enum Task<'s> {
    Eval(Addr),
    Unary(&'s str),
    Binary(&'s str),
}

/// Evaluate an arithmetic expression on the heap.
///
/// Operands are evaluated left to right on an explicit stack, so long
/// operator chains do not grow the native stack.
pub(crate) fn eval(store: &Store, addr: Addr) -> EvalResult {
    let mut tasks = vec![Task::Eval(addr)];
    let mut values: Vec<Number> = Vec::new();
    while let Some(task) = tasks.pop() {
        let value = match task {
            Task::Eval(addr) => {
                let addr = store.deref(addr);
                match store.cell(addr) {
                    Cell::Struct(atom, arity) => {
                        let name = store.atom_name(*atom);
                        match arity {
                            1 => tasks.extend([Task::Unary(name), Task::Eval(addr + 1)]),
                            2 => tasks.extend([
                                Task::Binary(name),
                                Task::Eval(addr + 2),
                                Task::Eval(addr + 1),
                            ]),
                            _ => return Err(not_evaluable(name, *arity)),
                        }
                        continue;
                    }
                    cell => eval_atomic(store, cell)?,
                }
            }
            Task::Unary(name) => {
                let Some(x) = values.pop() else {
                    return Err(iso::instantiation_error());
                };
                eval_unary(name, x)?
            }
            Task::Binary(name) => {
                let (Some(y), Some(x)) = (values.pop(), values.pop()) else {
                    return Err(iso::instantiation_error());
                };
                eval_binary(name, x, y)?
            }
        };
        values.push(value);
    }
    values.pop().ok_or_else(iso::instantiation_error)
}

fn eval_atomic(store: &Store, cell: &Cell) -> EvalResult {
    match cell {
        Cell::Ref(_) => Err(iso::instantiation_error()),
        Cell::Int(v) => Ok(Number::Int(*v)),
        Cell::Float(v) => Ok(Number::Float(*v)),
        Cell::Str(s) => {
            // one-character strings evaluate to their code
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Number::Int(c as i64)),
                _ => Err(iso::type_error("evaluable", Term::Str(s.to_string()))),
            }
        }
        Cell::Atom(atom) => eval_constant(store.atom_name(*atom)),
        Cell::Struct(atom, arity) => Err(not_evaluable(store.atom_name(*atom), *arity)),
    }
}

fn not_evaluable(name: &str, arity: usize) -> Term {
    iso::type_error("evaluable", iso::indicator(name, arity))
}

fn eval_constant(name: &str) -> EvalResult {
    match name {
        "pi" => Ok(Number::Float(std::f64::consts::PI)),
        "e" => Ok(Number::Float(std::f64::consts::E)),
        "inf" | "infinite" => Ok(Number::Float(f64::INFINITY)),
        "nan" => Ok(Number::Float(f64::NAN)),
        "max_tagged_integer" => Ok(Number::Int(i64::MAX)),
        "min_tagged_integer" => Ok(Number::Int(i64::MIN)),
        "[]" => Err(iso::type_error("evaluable", Term::nil())),
        other => Err(not_evaluable(other, 0)),
    }
}

fn eval_unary(name: &str, x: Number) -> EvalResult {
    use Number::{Float, Int};
    match (name, x) {
        ("-", Int(v)) => checked(v.checked_neg()),
        ("-", Float(v)) => Ok(Float(-v)),
        ("+", x) => Ok(x),
        ("abs", Int(v)) => checked(v.checked_abs()),
        ("abs", Float(v)) => Ok(Float(v.abs())),
        ("sign", Int(v)) => Ok(Int(v.signum())),
        ("sign", Float(v)) => Ok(Float(if v == 0.0 { 0.0 } else { v.signum() })),
        ("\\", x) => Ok(Int(!int_of(x, "\\")?)),
        ("msb", x) => {
            let v = int_of(x, "msb")?;
            if v <= 0 {
                Err(iso::type_error("not_less_than_one", Term::Int(v)))
            } else {
                Ok(Int(63 - v.leading_zeros() as i64))
            }
        }
        ("float", x) => Ok(Float(x.as_f64())),
        ("integer", Int(v)) => Ok(Int(v)),
        ("integer", Float(v)) => float_to_int(v.round()),
        ("float_integer_part", x) => Ok(Float(x.as_f64().trunc())),
        ("float_fractional_part", x) => Ok(Float(x.as_f64().fract())),
        ("truncate", Int(v)) | ("round", Int(v)) | ("ceiling", Int(v)) | ("floor", Int(v)) => {
            Ok(Int(v))
        }
        ("truncate", Float(v)) => float_to_int(v.trunc()),
        ("round", Float(v)) => float_to_int(v.round()),
        ("ceiling", Float(v)) => float_to_int(v.ceil()),
        ("floor", Float(v)) => float_to_int(v.floor()),
        ("sqrt", x) if x.as_f64() < 0.0 => Err(iso::evaluation_error("undefined")),
        ("sqrt", x) => float(x.as_f64().sqrt()),
        ("sin", x) => float(x.as_f64().sin()),
        ("cos", x) => float(x.as_f64().cos()),
        ("tan", x) => float(x.as_f64().tan()),
        ("asin", x) => float(x.as_f64().asin()),
        ("acos", x) => float(x.as_f64().acos()),
        ("atan", x) => float(x.as_f64().atan()),
        ("exp", x) => float(x.as_f64().exp()),
        ("log", x) if x.as_f64() <= 0.0 => Err(iso::evaluation_error("undefined")),
        ("log", x) => float(x.as_f64().ln()),
        ("log2", x) if x.as_f64() <= 0.0 => Err(iso::evaluation_error("undefined")),
        ("log2", x) => float(x.as_f64().log2()),
        _ => Err(not_evaluable(name, 1)),
    }
}

fn float_to_int(v: f64) -> EvalResult {
    if v.is_nan() || v < i64::MIN as f64 || v >= i64::MAX as f64 {
        Err(overflow())
    } else {
        Ok(Number::Int(v as i64))
    }
}

fn eval_binary(name: &str, x: Number, y: Number) -> EvalResult {
    use Number::{Float, Int};
    match name {
        "+" => match (x, y) {
            (Int(a), Int(b)) => checked(a.checked_add(b)),
            _ => float(x.as_f64() + y.as_f64()),
        },
        "-" => match (x, y) {
            (Int(a), Int(b)) => checked(a.checked_sub(b)),
            _ => float(x.as_f64() - y.as_f64()),
        },
        "*" => match (x, y) {
            (Int(a), Int(b)) => checked(a.checked_mul(b)),
            _ => float(x.as_f64() * y.as_f64()),
        },
        "/" => match (x, y) {
            (_, Int(0)) => Err(iso::evaluation_error("zero_divisor")),
            (Int(a), Int(b)) if a.checked_rem(b) == Some(0) => checked(a.checked_div(b)),
            (_, Float(b)) if b == 0.0 => Err(iso::evaluation_error("zero_divisor")),
            _ => float(x.as_f64() / y.as_f64()),
        },
        "//" => {
            let (a, b) = (int_of(x, "//")?, int_of(y, "//")?);
            if b == 0 {
                return Err(iso::evaluation_error("zero_divisor"));
            }
            checked(a.checked_div(b))
        }
        "div" => {
            let (a, b) = (int_of(x, "div")?, int_of(y, "div")?);
            if b == 0 {
                return Err(iso::evaluation_error("zero_divisor"));
            }
            checked(a.checked_div_euclid(b).map(|q| {
                // floor division
                if b < 0 && a.rem_euclid(b) != 0 { q - 1 } else { q }
            }))
        }
        "rem" => {
            let (a, b) = (int_of(x, "rem")?, int_of(y, "rem")?);
            if b == 0 {
                return Err(iso::evaluation_error("zero_divisor"));
            }
            Ok(Int(a.checked_rem(b).unwrap_or(0)))
        }
        "mod" => {
            let (a, b) = (int_of(x, "mod")?, int_of(y, "mod")?);
            if b == 0 {
                return Err(iso::evaluation_error("zero_divisor"));
            }
            // result takes the sign of the divisor
            let r = a.checked_rem(b).unwrap_or(0);
            Ok(Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        "min" => Ok(if compare_numbers(x, y) == Ordering::Greater { y } else { x }),
        "max" => Ok(if compare_numbers(x, y) == Ordering::Less { y } else { x }),
        "**" => match (x, y) {
            (Int(a), Int(b)) if b >= 0 => int_pow(a, b),
            _ => float(x.as_f64().powf(y.as_f64())),
        },
        "^" => match (x, y) {
            (Int(a), Int(b)) => {
                if b < 0 {
                    match a {
                        1 => Ok(Int(1)),
                        -1 => Ok(Int(if b % 2 == 0 { 1 } else { -1 })),
                        0 => Err(iso::evaluation_error("zero_divisor")),
                        _ => Err(iso::type_error("float", Term::Int(a))),
                    }
                } else {
                    int_pow(a, b)
                }
            }
            _ => float(x.as_f64().powf(y.as_f64())),
        },
        "atan2" | "atan" => float(x.as_f64().atan2(y.as_f64())),
        ">>" => {
            let (a, b) = (int_of(x, ">>")?, int_of(y, ">>")?);
            Ok(Int(a >> b.clamp(0, 63)))
        }
        "<<" => {
            let (a, b) = (int_of(x, "<<")?, int_of(y, "<<")?);
            let shift = u32::try_from(b).map_err(|_| overflow())?;
            let shifted = a.checked_shl(shift).ok_or_else(overflow)?;
            if shifted >> shift != a {
                return Err(overflow());
            }
            Ok(Int(shifted))
        }
        "/\\" => Ok(Int(int_of(x, "/\\")? & int_of(y, "/\\")?)),
        "\\/" => Ok(Int(int_of(x, "\\/")? | int_of(y, "\\/")?)),
        "xor" => Ok(Int(int_of(x, "xor")? ^ int_of(y, "xor")?)),
        "gcd" => {
            let (mut a, mut b) = (int_of(x, "gcd")?, int_of(y, "gcd")?);
            while b != 0 {
                (a, b) = (b, a.checked_rem(b).unwrap_or(0));
            }
            checked(a.checked_abs())
        }
        "copysign" => Ok(Float(x.as_f64().copysign(y.as_f64()))),
        _ => Err(not_evaluable(name, 2)),
    }
}

fn int_pow(base: i64, exp: i64) -> EvalResult {
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    checked(base.checked_pow(exp))
}

/// Numeric comparison; mixed int/float compares as floats.
pub(crate) fn compare_numbers(x: Number, y: Number) -> Ordering {
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => a.cmp(&b),
        _ => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
    }
}
