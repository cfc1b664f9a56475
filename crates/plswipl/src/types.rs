//! Host scalar types and values.
//!
//! [`TypeTag`] names every type the host can declare. The bridge only moves
//! values of a closed set of kinds across the boundary; [`InputKind`] and
//! [`OutputKind`] are those sets per direction. Floats can be passed in but
//! never come back out, and `OutputKind` has no variant for them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Catalog object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(pub u32);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A type declared by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Void,
    Boolean,
    Integer16,
    Integer32,
    Integer64,
    FloatSingle,
    FloatDouble,
    Text,
    /// A host type the bridge does not handle.
    Other(String),
}

impl TypeTag {
    /// Parse a type name, accepting the usual SQL aliases.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "void" => TypeTag::Void,
            "bool" | "boolean" => TypeTag::Boolean,
            "int2" | "smallint" => TypeTag::Integer16,
            "int4" | "int" | "integer" => TypeTag::Integer32,
            "int8" | "bigint" => TypeTag::Integer64,
            "float4" | "real" => TypeTag::FloatSingle,
            "float8" | "double precision" => TypeTag::FloatDouble,
            "text" => TypeTag::Text,
            _ => TypeTag::Other(name.trim().to_string()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Void => "void",
            TypeTag::Boolean => "boolean",
            TypeTag::Integer16 => "smallint",
            TypeTag::Integer32 => "integer",
            TypeTag::Integer64 => "bigint",
            TypeTag::FloatSingle => "real",
            TypeTag::FloatDouble => "double precision",
            TypeTag::Text => "text",
            TypeTag::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// A host value. Text is held in the server encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Void,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(Vec<u8>),
}

impl Datum {
    /// The type this value is naturally declared as.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Datum::Void => TypeTag::Void,
            Datum::Bool(_) => TypeTag::Boolean,
            Datum::Int2(_) => TypeTag::Integer16,
            Datum::Int4(_) => TypeTag::Integer32,
            Datum::Int8(_) => TypeTag::Integer64,
            Datum::Float4(_) => TypeTag::FloatSingle,
            Datum::Float8(_) => TypeTag::FloatDouble,
            Datum::Text(_) => TypeTag::Text,
        }
    }
}

/// Kinds that can be passed to the foreign engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Void,
    Boolean,
    Integer16,
    Integer32,
    Integer64,
    FloatSingle,
    FloatDouble,
    Text,
}

impl TryFrom<&TypeTag> for InputKind {
    type Error = BridgeError;

    fn try_from(tag: &TypeTag) -> Result<Self, Self::Error> {
        Ok(match tag {
            TypeTag::Void => InputKind::Void,
            TypeTag::Boolean => InputKind::Boolean,
            TypeTag::Integer16 => InputKind::Integer16,
            TypeTag::Integer32 => InputKind::Integer32,
            TypeTag::Integer64 => InputKind::Integer64,
            TypeTag::FloatSingle => InputKind::FloatSingle,
            TypeTag::FloatDouble => InputKind::FloatDouble,
            TypeTag::Text => InputKind::Text,
            TypeTag::Other(_) => return Err(BridgeError::UnsupportedType(tag.clone())),
        })
    }
}

/// Kinds that can be read back from the foreign engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Void,
    Boolean,
    Integer16,
    Integer32,
    Integer64,
    Text,
}

impl TryFrom<&TypeTag> for OutputKind {
    type Error = BridgeError;

    fn try_from(tag: &TypeTag) -> Result<Self, Self::Error> {
        Ok(match tag {
            TypeTag::Void => OutputKind::Void,
            TypeTag::Boolean => OutputKind::Boolean,
            TypeTag::Integer16 => OutputKind::Integer16,
            TypeTag::Integer32 => OutputKind::Integer32,
            TypeTag::Integer64 => OutputKind::Integer64,
            TypeTag::Text => OutputKind::Text,
            TypeTag::FloatSingle | TypeTag::FloatDouble | TypeTag::Other(_) => {
                return Err(BridgeError::UnsupportedType(tag.clone()));
            }
        })
    }
}

/// Direction of a declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgMode {
    Input,
    Output,
}

impl TryFrom<char> for ArgMode {
    type Error = BridgeError;

    /// Catalog mode characters. In/out (`b`), variadic (`v`) and table
    /// (`t`) arguments are not supported.
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'i' => Ok(ArgMode::Input),
            'o' => Ok(ArgMode::Output),
            other => Err(BridgeError::UnsupportedArgMode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("int4", TypeTag::Integer32)]
    #[test_case("INTEGER", TypeTag::Integer32)]
    #[test_case("double precision", TypeTag::FloatDouble)]
    #[test_case("bool", TypeTag::Boolean)]
    #[test_case("jsonb", TypeTag::Other("jsonb".into()))]
    fn test_parse_type(name: &str, expected: TypeTag) {
        assert_eq!(TypeTag::parse(name), expected);
    }

    #[test]
    fn test_float_is_input_only() {
        assert_eq!(
            InputKind::try_from(&TypeTag::FloatDouble).unwrap(),
            InputKind::FloatDouble
        );
        assert!(matches!(
            OutputKind::try_from(&TypeTag::FloatDouble),
            Err(BridgeError::UnsupportedType(TypeTag::FloatDouble))
        ));
    }

    #[test_case('i', Some(ArgMode::Input))]
    #[test_case('o', Some(ArgMode::Output))]
    #[test_case('b', None)]
    #[test_case('v', None)]
    fn test_arg_mode(c: char, expected: Option<ArgMode>) {
        assert_eq!(ArgMode::try_from(c).ok(), expected);
    }
}
