//! Command-line text to host datums and result rows to JSON.

use plswipl::{CallDescriptor, Datum, Row, ServerEncoding, TypeTag};
use serde_json::{Map, Value, json};

/// Parse one command-line argument for a parameter of type `ty`.
/// `null` (any case) is SQL NULL.
pub fn parse_arg(
    text: &str,
    ty: &TypeTag,
    encoding: &ServerEncoding,
) -> Result<Option<Datum>, String> {
    if text.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    let invalid = |e: &dyn std::fmt::Display| format!("invalid input for type {ty}: \"{text}\" ({e})");
    let datum = match ty {
        TypeTag::Boolean => match text.to_ascii_lowercase().as_str() {
            "t" | "true" | "yes" | "on" | "1" => Datum::Bool(true),
            "f" | "false" | "no" | "off" | "0" => Datum::Bool(false),
            _ => return Err(invalid(&"expected a boolean")),
        },
        TypeTag::Integer16 => Datum::Int2(text.parse().map_err(|e| invalid(&e))?),
        TypeTag::Integer32 => Datum::Int4(text.parse().map_err(|e| invalid(&e))?),
        TypeTag::Integer64 => Datum::Int8(text.parse().map_err(|e| invalid(&e))?),
        TypeTag::FloatSingle => Datum::Float4(text.parse().map_err(|e| invalid(&e))?),
        TypeTag::FloatDouble => Datum::Float8(text.parse().map_err(|e| invalid(&e))?),
        TypeTag::Text => Datum::Text(encoding.encode(text).map_err(|e| invalid(&e))?),
        TypeTag::Void | TypeTag::Other(_) => {
            return Err(format!("cannot pass a command-line value as type {ty}"));
        }
    };
    Ok(Some(datum))
}

pub fn datum_json(datum: &Datum, encoding: &ServerEncoding) -> Value {
    match datum {
        Datum::Void => Value::Null,
        Datum::Bool(b) => json!(b),
        Datum::Int2(i) => json!(i),
        Datum::Int4(i) => json!(i),
        Datum::Int8(i) => json!(i),
        Datum::Float4(f) => json!(f),
        Datum::Float8(f) => json!(f),
        Datum::Text(bytes) => match encoding.decode(bytes) {
            Ok(text) => Value::String(text),
            Err(_) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        },
    }
}

/// `{"value": ..., "<position>": ...}` with output arguments keyed by
/// position.
pub fn row_json(row: &Row, descriptor: &CallDescriptor, encoding: &ServerEncoding) -> Value {
    let mut object = Map::new();
    if descriptor.return_type != TypeTag::Void {
        object.insert("value".to_string(), datum_json(&row.value, encoding));
    }
    for (position, datum) in &row.outputs {
        object.insert(position.to_string(), datum_json(datum, encoding));
    }
    Value::Object(object)
}
