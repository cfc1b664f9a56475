//! Resolved per-function call metadata.

use tracing::debug;

use crate::catalog::FunctionRecord;
use crate::error::BridgeError;
use crate::types::{ArgMode, Oid, TypeTag};

/// Everything needed to call one function, checked once at resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescriptor {
    pub oid: Oid,
    /// Goal functor name.
    pub name: String,
    pub arg_modes: Vec<ArgMode>,
    pub arg_types: Vec<TypeTag>,
    pub return_type: TypeTag,
    pub returns_set: bool,
    pub source: String,
}

impl CallDescriptor {
    /// Check a catalog record and build its descriptor.
    ///
    /// A full type array, when present, replaces the declared argument count
    /// and must cover at least the input arguments. A mode array must have
    /// one entry per argument.
    pub fn resolve(record: &FunctionRecord) -> Result<Self, BridgeError> {
        let oid = record.oid;
        let mismatch = |message: String| BridgeError::ArityOrModeMismatch { oid, message };

        let declared = &record.arg_types;
        let types = match &record.all_arg_types {
            None => declared.clone(),
            Some(all) if all.len() < declared.len() => {
                return Err(mismatch(format!(
                    "all_arg_types has {} entries for {} declared arguments",
                    all.len(),
                    declared.len()
                )));
            }
            Some(all) if all.iter().any(|name| name.trim().is_empty()) => {
                return Err(mismatch("all_arg_types has missing entries".to_string()));
            }
            Some(all) => all.clone(),
        };
        let argc = types.len();

        let arg_modes = match &record.arg_modes {
            None => vec![ArgMode::Input; argc],
            Some(modes) if modes.len() != argc => {
                return Err(mismatch(format!(
                    "arg_modes has {} entries for {argc} arguments",
                    modes.len()
                )));
            }
            Some(modes) => modes
                .iter()
                .map(|&c| ArgMode::try_from(c))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let source = record
            .source
            .clone()
            .ok_or_else(|| BridgeError::Catalog(format!("null source for function {oid}")))?;

        let descriptor = Self {
            oid,
            name: record.name.clone(),
            arg_modes,
            arg_types: types.iter().map(|name| TypeTag::parse(name)).collect(),
            return_type: TypeTag::parse(&record.return_type),
            returns_set: record.returns_set,
            source,
        };
        debug!(
            oid = %oid,
            name = %descriptor.name,
            argc,
            returns_set = descriptor.returns_set,
            "call descriptor resolved"
        );
        Ok(descriptor)
    }

    pub fn argc(&self) -> usize {
        self.arg_types.len()
    }

    /// Arity of the goal: one slot per argument plus the return slot unless
    /// the function returns void.
    pub fn goal_arity(&self) -> usize {
        if self.return_type == TypeTag::Void {
            self.argc()
        } else {
            self.argc() + 1
        }
    }

    /// Positions of input arguments, ascending.
    pub fn inputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions(ArgMode::Input)
    }

    /// Positions of output arguments, ascending.
    pub fn outputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions(ArgMode::Output)
    }

    fn positions(&self, mode: ArgMode) -> impl Iterator<Item = usize> + '_ {
        self.arg_modes
            .iter()
            .enumerate()
            .filter(move |(_, m)| **m == mode)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record() -> FunctionRecord {
        FunctionRecord {
            oid: Oid(7),
            name: "add".into(),
            arg_types: vec!["int4".into(), "int4".into()],
            all_arg_types: None,
            arg_modes: None,
            return_type: "int4".into(),
            returns_set: false,
            source: Some("add(A, B, C) :- C is A + B.".into()),
        }
    }

    #[test]
    fn test_defaults_to_inputs() {
        let descriptor = CallDescriptor::resolve(&record()).unwrap();
        assert_eq!(descriptor.arg_modes, vec![ArgMode::Input, ArgMode::Input]);
        assert_eq!(descriptor.goal_arity(), 3);
        assert_eq!(descriptor.outputs().count(), 0);
    }

    #[test]
    fn test_full_type_array_redefines_argc() {
        let descriptor = CallDescriptor::resolve(&FunctionRecord {
            all_arg_types: Some(vec!["int4".into(), "int4".into(), "text".into()]),
            arg_modes: Some(vec!['i', 'i', 'o']),
            return_type: "void".into(),
            ..record()
        })
        .unwrap();
        assert_eq!(descriptor.argc(), 3);
        assert_eq!(descriptor.goal_arity(), 3);
        assert_eq!(descriptor.outputs().collect::<Vec<_>>(), vec![2]);
        assert_eq!(descriptor.inputs().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_mode_length_mismatch() {
        let err = CallDescriptor::resolve(&FunctionRecord {
            arg_modes: Some(vec!['i']),
            ..record()
        })
        .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"function 7: arg_modes has 1 entries for 2 arguments");
    }

    #[test]
    fn test_short_full_type_array() {
        let err = CallDescriptor::resolve(&FunctionRecord {
            all_arg_types: Some(vec!["int4".into()]),
            ..record()
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::ArityOrModeMismatch { .. }));
    }

    #[test]
    fn test_inout_mode_rejected() {
        let err = CallDescriptor::resolve(&FunctionRecord {
            arg_modes: Some(vec!['i', 'b']),
            ..record()
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedArgMode('b')));
    }

    #[test]
    fn test_missing_source() {
        let err = CallDescriptor::resolve(&FunctionRecord {
            source: None,
            ..record()
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::Catalog(_)));
    }
}
