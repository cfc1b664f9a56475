//! Value conversion between host datums and engine terms.

use plswipl_engine::{Engine, TermRef, TextMode};

use crate::encoding::ServerEncoding;
use crate::error::BridgeError;
use crate::types::{Datum, InputKind, OutputKind, TypeTag};

/// Write a host value into `slot`. A null value of any type becomes `[]`.
pub fn to_term(
    engine: &Engine,
    slot: TermRef,
    value: Option<&Datum>,
    ty: &TypeTag,
    encoding: &ServerEncoding,
) -> Result<(), BridgeError> {
    let Some(value) = value else {
        engine.put_nil(slot)?;
        return Ok(());
    };
    match (InputKind::try_from(ty)?, value) {
        (InputKind::Void, _) => engine.put_variable(slot)?,
        (InputKind::Boolean, Datum::Bool(v)) => engine.put_bool(slot, *v)?,
        (InputKind::Integer16, Datum::Int2(v)) => engine.put_integer(slot, (*v).into())?,
        (InputKind::Integer32, Datum::Int4(v)) => engine.put_integer(slot, (*v).into())?,
        (InputKind::Integer64, Datum::Int8(v)) => engine.put_integer(slot, *v)?,
        (InputKind::FloatSingle, Datum::Float4(v)) => engine.put_float(slot, (*v).into())?,
        (InputKind::FloatDouble, Datum::Float8(v)) => engine.put_float(slot, *v)?,
        (InputKind::Text, Datum::Text(bytes)) => {
            let text = encoding.decode(bytes)?;
            engine.put_string(slot, &text)?;
        }
        (_, value) => {
            return Err(BridgeError::Conversion {
                what: format!("{} argument", value.type_tag()),
                ty: ty.clone(),
            });
        }
    }
    Ok(())
}

/// Read `slot` back as a host value of type `ty`. `what` names the slot in
/// conversion errors.
pub fn to_value(
    engine: &Engine,
    slot: TermRef,
    ty: &TypeTag,
    encoding: &ServerEncoding,
    what: &str,
) -> Result<Datum, BridgeError> {
    let kind = OutputKind::try_from(ty)?;
    let not_convertible = || BridgeError::Conversion {
        what: what.to_string(),
        ty: ty.clone(),
    };
    let overflow = |value: i64| BridgeError::Overflow {
        value,
        ty: ty.clone(),
    };

    let datum = match kind {
        OutputKind::Void => Datum::Void,
        OutputKind::Boolean => Datum::Bool(engine.get_bool(slot)?.ok_or_else(not_convertible)?),
        OutputKind::Integer16 | OutputKind::Integer32 | OutputKind::Integer64 => {
            let value = engine.get_int64(slot)?.ok_or_else(not_convertible)?;
            match kind {
                OutputKind::Integer16 => {
                    Datum::Int2(i16::try_from(value).map_err(|_| overflow(value))?)
                }
                OutputKind::Integer32 => {
                    Datum::Int4(i32::try_from(value).map_err(|_| overflow(value))?)
                }
                _ => Datum::Int8(value),
            }
        }
        OutputKind::Text => {
            let text = engine
                .get_text(slot, TextMode::Atomic)?
                .ok_or_else(not_convertible)?;
            Datum::Text(encoding.encode(&text)?)
        }
    };
    Ok(datum)
}
