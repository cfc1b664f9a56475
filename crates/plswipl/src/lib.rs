//! Call bridge between a relational host and an embedded Prolog engine.
//!
//! This crate provides:
//! - Value marshalling between host datums and engine terms
//! - Call descriptors resolved from catalog records
//! - Query sessions that release their frame and query on drop
//! - The invocation state machine for scalar and set-returning calls
//! - Inline code blocks and function validation

pub mod catalog;
mod config;
mod descriptor;
mod encoding;
mod error;
pub mod exception;
pub mod host;
mod invocation;
pub mod marshal;
mod registry;
mod session;
mod types;

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use plswipl_engine::{Engine, EngineStats};
use tracing::{debug, info, warn};

pub use catalog::{Catalog, FunctionRecord, InMemoryCatalog};
pub use config::{BridgeConfig, EngineSettings};
pub use descriptor::CallDescriptor;
pub use encoding::ServerEncoding;
pub use error::BridgeError;
pub use host::{CallContext, CallResult, FunctionCallInfo, MultiCallContext, Row};
pub use invocation::{Invocation, InvocationState};
pub use registry::{EntryPredicates, PredicateRegistry};
pub use session::{QuerySession, Step};
pub use types::{ArgMode, Datum, InputKind, Oid, OutputKind, TypeTag};

/// Prolog source defining the entry predicates.
pub const BOOT_LIBRARY: &str = include_str!("boot.pl");

/// The bridge: one engine plus the caches shared by every call.
///
/// A bridge belongs to one host backend and is neither `Send` nor `Sync`:
/// the engine handle is an `Rc<RefCell<_>>`, like the single-threaded
/// engine it stands for. The caches take `&self` because calls re-enter
/// the bridge while a set-returning invocation is suspended, and
/// `DashMap` gives them interior mutability for that, not sharing across
/// threads.
///
/// ```compile_fail
/// fn shared<T: Sync>() {}
/// shared::<plswipl::Bridge>();
/// ```
///
/// ```compile_fail
/// fn sent<T: Send>() {}
/// sent::<plswipl::Bridge>();
/// ```
pub struct Bridge {
    engine: Engine,
    catalog: Box<dyn Catalog>,
    registry: PredicateRegistry,
    descriptors: DashMap<Oid, Arc<CallDescriptor>>,
    encoding: ServerEncoding,
}

impl Bridge {
    /// Create the engine, load the boot library, the configured boot file
    /// and library files, and resolve the entry predicates.
    pub fn new(config: &BridgeConfig, catalog: impl Catalog + 'static) -> Result<Self, BridgeError> {
        config.validate()?;
        let encoding = ServerEncoding::from_name(&config.server_encoding)?;
        let engine = Engine::new(config.engine.engine_config())?;

        engine.consult(BOOT_LIBRARY)?;
        if let Some(boot) = &config.engine.boot_file {
            load_file(&engine, boot)?;
        }
        for library in &config.engine.library {
            load_file(&engine, library)?;
        }

        let bridge = Self {
            engine,
            catalog: Box::new(catalog),
            registry: PredicateRegistry::new(),
            descriptors: DashMap::new(),
            encoding,
        };
        bridge.registry.entry(&bridge.engine)?;
        info!(
            encoding = %bridge.encoding,
            libraries = config.engine.library.len(),
            "bridge initialised"
        );
        Ok(bridge)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn encoding(&self) -> ServerEncoding {
        self.encoding
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// The call descriptor for `oid`, resolved once and cached.
    pub fn descriptor(&self, oid: Oid) -> Result<Arc<CallDescriptor>, BridgeError> {
        if let Some(descriptor) = self.descriptors.get(&oid) {
            return Ok(Arc::clone(descriptor.value()));
        }
        let descriptor = Arc::new(self.resolve(oid)?);
        self.descriptors.insert(oid, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Drop the cached descriptor for `oid`, e.g. after the function was
    /// redefined.
    pub fn forget(&self, oid: Oid) {
        self.descriptors.remove(&oid);
    }

    fn resolve(&self, oid: Oid) -> Result<CallDescriptor, BridgeError> {
        let record = self
            .catalog
            .lookup(oid)
            .ok_or_else(|| BridgeError::Catalog(format!("cache lookup failed for function {oid}")))?;
        CallDescriptor::resolve(&record)
    }

    /// Entry point for every host call.
    ///
    /// Scalar functions return [`CallResult::Value`]. Set-returning
    /// functions need the host's multi-call context and return one
    /// [`CallResult::Next`] per row, then [`CallResult::Done`]. On error the
    /// context is reset before the error is returned.
    pub fn handler(
        &self,
        fcinfo: &FunctionCallInfo,
        multi: Option<&mut MultiCallContext>,
    ) -> Result<CallResult, BridgeError> {
        if fcinfo.context == CallContext::Trigger {
            return Err(BridgeError::TriggerNotSupported);
        }
        let descriptor = self.descriptor(fcinfo.fn_oid)?;
        if descriptor.returns_set {
            let multi = multi.ok_or(BridgeError::SetNotAllowed)?;
            self.call_set(fcinfo, descriptor, multi)
        } else {
            self.call_scalar(fcinfo, descriptor)
        }
    }

    fn start(
        &self,
        fcinfo: &FunctionCallInfo,
        descriptor: Arc<CallDescriptor>,
    ) -> Result<Invocation, BridgeError> {
        let entry = self.registry.entry(&self.engine)?;
        Invocation::start(
            &self.engine,
            &entry.function,
            descriptor,
            &fcinfo.args,
            self.encoding,
        )
    }

    fn call_scalar(
        &self,
        fcinfo: &FunctionCallInfo,
        descriptor: Arc<CallDescriptor>,
    ) -> Result<CallResult, BridgeError> {
        let name = descriptor.name.clone();
        let mut invocation = self.start(fcinfo, descriptor)?;
        match invocation.step()? {
            Some(row) => Ok(CallResult::Value(row)),
            None => Err(BridgeError::NoSolution(name)),
        }
    }

    fn call_set(
        &self,
        fcinfo: &FunctionCallInfo,
        descriptor: Arc<CallDescriptor>,
        multi: &mut MultiCallContext,
    ) -> Result<CallResult, BridgeError> {
        let call = multi.record_call();
        if !multi.has_invocation() {
            if call > 1 {
                return Err(BridgeError::InvocationFinished("done"));
            }
            multi.install(self.start(fcinfo, descriptor)?);
        }

        let step = match multi.invocation_mut() {
            Some(invocation) => invocation.step(),
            None => Ok(None),
        };
        match step {
            Ok(Some(row)) => Ok(CallResult::Next(row)),
            Ok(None) => {
                multi.reset();
                Ok(CallResult::Done)
            }
            Err(e) => {
                multi.reset();
                Err(e)
            }
        }
    }

    /// Run an inline code block. A block that fails is only logged.
    pub fn execute_inline(&self, source: &str) -> Result<(), BridgeError> {
        let entry = self.registry.entry(&self.engine)?;
        let mut session = QuerySession::open(&self.engine, 1);
        self.engine.put_string(session.slot(0), source)?;
        session.open_query(&entry.inline, 0)?;
        match session.step()? {
            Step::Solution => {
                debug!("inline block succeeded");
            }
            Step::Exhausted => {
                session.check_exception("while executing DO with PLSWIPL")?;
                warn!("inline block failed");
            }
        }
        Ok(())
    }

    /// Check that a function's catalog record resolves and its source
    /// parses.
    pub fn validate(&self, oid: Oid) -> Result<(), BridgeError> {
        self.forget(oid);
        let descriptor = self.resolve(oid)?;
        let clauses = self.engine.check_syntax(&descriptor.source)?;
        debug!(oid = %oid, name = %descriptor.name, clauses, "function validated");
        Ok(())
    }
}

fn load_file(engine: &Engine, path: &Path) -> Result<(), BridgeError> {
    let text = std::fs::read_to_string(path)?;
    let report = engine.consult(&text)?;
    debug!(
        path = %path.display(),
        clauses = report.clauses,
        procedures = report.procedures,
        "library loaded"
    );
    Ok(())
}
