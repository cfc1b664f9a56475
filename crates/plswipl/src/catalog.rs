//! Function metadata supplied by the host catalog.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BridgeError;
use crate::types::Oid;

/// A raw function record, as stored by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub oid: Oid,
    pub name: String,
    /// Types of the input arguments.
    #[serde(default)]
    pub arg_types: Vec<String>,
    /// Types of all arguments, outputs included; absent when every argument
    /// is an input.
    #[serde(default)]
    pub all_arg_types: Option<Vec<String>>,
    /// One mode character per argument; absent when every argument is an
    /// input.
    #[serde(default)]
    pub arg_modes: Option<Vec<char>>,
    #[serde(default = "default_return_type")]
    pub return_type: String,
    #[serde(default)]
    pub returns_set: bool,
    /// Program text. A record without source cannot be called.
    pub source: Option<String>,
}

fn default_return_type() -> String {
    "void".to_string()
}

/// Source of function records.
pub trait Catalog {
    /// The record for `oid`, or `None` if there is no such function.
    fn lookup(&self, oid: Oid) -> Option<FunctionRecord>;

    /// Find a function by name.
    fn find_by_name(&self, name: &str) -> Option<Oid>;

    /// Every function known to the catalog.
    fn oids(&self) -> Vec<Oid>;
}

/// Catalog held in memory, typically loaded from a TOML file of
/// `[[function]]` tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    functions: BTreeMap<Oid, FunctionRecord>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    function: Vec<FunctionRecord>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record.
    pub fn insert(&mut self, record: FunctionRecord) {
        self.functions.insert(record.oid, record);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BridgeError> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| BridgeError::Catalog(e.to_string()))?;
        let mut catalog = Self::new();
        for record in file.function {
            if catalog.functions.contains_key(&record.oid) {
                return Err(BridgeError::Catalog(format!(
                    "duplicate function oid {}",
                    record.oid
                )));
            }
            catalog.insert(record);
        }
        debug!(functions = catalog.len(), "catalog parsed");
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

impl Catalog for InMemoryCatalog {
    fn lookup(&self, oid: Oid) -> Option<FunctionRecord> {
        self.functions.get(&oid).cloned()
    }

    fn find_by_name(&self, name: &str) -> Option<Oid> {
        self.functions
            .values()
            .find(|record| record.name == name)
            .map(|record| record.oid)
    }

    fn oids(&self) -> Vec<Oid> {
        self.functions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"
[[function]]
oid = 1001
name = "add"
arg_types = ["int4", "int4"]
return_type = "int4"
source = "add(A, B, C) :- C is A + B."

[[function]]
oid = 1002
name = "divmod"
arg_types = ["int8", "int8"]
all_arg_types = ["int8", "int8", "int8", "int8"]
arg_modes = ["i", "i", "o", "o"]
source = "divmod(A, B, Q, R) :- Q is A // B, R is A mod B."
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = InMemoryCatalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.find_by_name("divmod"), Some(Oid(1002)));

        let add = catalog.lookup(Oid(1001)).unwrap();
        assert_eq!(add.return_type, "int4");
        assert!(add.arg_modes.is_none());

        let divmod = catalog.lookup(Oid(1002)).unwrap();
        assert_eq!(divmod.return_type, "void");
        assert_eq!(divmod.arg_modes, Some(vec!['i', 'i', 'o', 'o']));
    }

    #[test]
    fn test_duplicate_oid() {
        let text = format!("{CATALOG}\n[[function]]\noid = 1001\nname = \"again\"\n");
        assert!(matches!(
            InMemoryCatalog::from_toml_str(&text),
            Err(BridgeError::Catalog(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = InMemoryCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.oids(), vec![Oid(1001), Oid(1002)]);
    }
}
