//! Cache of predicate handles.

use std::sync::OnceLock;

use dashmap::DashMap;
use plswipl_engine::{Engine, Predicate};
use tracing::debug;

use crate::error::BridgeError;

/// Entry predicates defined by the boot library.
#[derive(Debug, Clone)]
pub struct EntryPredicates {
    /// `handle_function(Goal, Source)`.
    pub function: Predicate,
    /// `handle_do(Source)`.
    pub inline: Predicate,
}

/// Predicate handles keyed by name and arity, filled on first use.
///
/// Every lookup takes the `&Engine` it resolves against, so the registry
/// is only ever used from the engine's thread. `DashMap` and `OnceLock`
/// let it fill in behind `&self`.
#[derive(Debug, Default)]
pub struct PredicateRegistry {
    handles: DashMap<(String, usize), Predicate>,
    entry: OnceLock<EntryPredicates>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for `name/arity`.
    pub fn get(&self, engine: &Engine, name: &str, arity: usize) -> Predicate {
        if let Some(handle) = self.handles.get(&(name.to_string(), arity)) {
            return handle.clone();
        }
        let handle = engine.predicate(name, arity);
        debug!(predicate = %handle, "predicate handle cached");
        self.handles
            .entry((name.to_string(), arity))
            .or_insert(handle)
            .clone()
    }

    /// The entry predicates, checked to be defined on first use.
    pub fn entry(&self, engine: &Engine) -> Result<&EntryPredicates, BridgeError> {
        if let Some(entry) = self.entry.get() {
            return Ok(entry);
        }
        let resolved = EntryPredicates {
            function: self.defined(engine, "handle_function", 2)?,
            inline: self.defined(engine, "handle_do", 1)?,
        };
        Ok(self.entry.get_or_init(|| resolved))
    }

    fn defined(&self, engine: &Engine, name: &str, arity: usize) -> Result<Predicate, BridgeError> {
        let handle = self.get(engine, name, arity);
        if !engine.is_defined(&handle) {
            return Err(BridgeError::Bootstrap(handle.to_string()));
        }
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
