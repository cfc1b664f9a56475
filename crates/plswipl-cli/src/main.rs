//! plswipl: drive the PL/SWI-Prolog call bridge from the command line
//!
//! Subcommands:
//! - `call`: call a catalog function like the host would
//! - `do`: run an inline code block
//! - `check`: validate every function in a catalog

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use miette::Result;
use plswipl::{
    Bridge, BridgeConfig, CallResult, Catalog, FunctionCallInfo, InMemoryCatalog, MultiCallContext,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod values;

#[derive(Parser)]
#[command(name = "plswipl")]
#[command(about = "PL/SWI-Prolog call bridge", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// Bridge configuration file (TOML)
    #[arg(long, global = true, env = "PLSWIPL_CONFIG")]
    config: Option<PathBuf>,

    /// Host text encoding, overrides the configuration file
    #[arg(long, global = true, env = "PLSWIPL_SERVER_ENCODING")]
    server_encoding: Option<String>,

    /// Inferences allowed per solution, overrides the configuration file
    #[arg(long, global = true)]
    max_inferences: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a function and print each result row as JSON
    Call {
        /// Function catalog (TOML)
        #[arg(long, env = "PLSWIPL_CATALOG")]
        catalog: PathBuf,

        /// Function name
        function: String,

        /// Input arguments in declaration order; `null` passes SQL NULL
        args: Vec<String>,
    },

    /// Run an inline code block
    Do {
        /// Goal text
        source: String,
    },

    /// Validate every function in a catalog
    Check {
        /// Function catalog (TOML)
        #[arg(long, env = "PLSWIPL_CATALOG")]
        catalog: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.settings)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Call {
            catalog,
            function,
            args,
        } => run_call(&config, &catalog, &function, &args),
        Commands::Do { source } => run_do(&config, &source),
        Commands::Check { catalog } => run_check(&config, &catalog),
    }
}

fn load_config(settings: &Settings) -> Result<BridgeConfig> {
    let mut config = match &settings.config {
        Some(path) => BridgeConfig::load(path).map_err(|e| miette::miette!("{}", e))?,
        None => BridgeConfig::default(),
    };
    if let Some(encoding) = &settings.server_encoding {
        config.server_encoding = encoding.clone();
    }
    if let Some(max_inferences) = settings.max_inferences {
        config.engine.max_inferences = max_inferences;
    }
    config.validate().map_err(|e| miette::miette!("{}", e))?;
    Ok(config)
}

fn open_bridge(config: &BridgeConfig, catalog: Option<&Path>) -> Result<Bridge> {
    let catalog = match catalog {
        Some(path) => InMemoryCatalog::load(path)
            .map_err(|e| miette::miette!("failed to load catalog {}: {}", path.display(), e))?,
        None => InMemoryCatalog::new(),
    };
    Bridge::new(config, catalog).map_err(|e| miette::miette!("{}", e))
}

fn run_call(config: &BridgeConfig, catalog: &Path, function: &str, args: &[String]) -> Result<()> {
    let bridge = open_bridge(config, Some(catalog))?;
    let oid = bridge
        .catalog()
        .find_by_name(function)
        .ok_or_else(|| miette::miette!("function {} does not exist", function))?;
    let descriptor = bridge.descriptor(oid).map_err(report)?;
    let encoding = bridge.encoding();

    let inputs: Vec<usize> = descriptor.inputs().collect();
    if args.len() != inputs.len() {
        return Err(miette::miette!(
            "function {} takes {} arguments, got {}",
            function,
            inputs.len(),
            args.len()
        ));
    }
    let datums = inputs
        .iter()
        .zip(args)
        .map(|(&position, text)| {
            values::parse_arg(text, &descriptor.arg_types[position], &encoding)
                .map_err(|e| miette::miette!("{}", e))
        })
        .collect::<Result<Vec<_>>>()?;

    let fcinfo = FunctionCallInfo::new(oid, datums);
    if !descriptor.returns_set {
        if let CallResult::Value(row) = bridge.handler(&fcinfo, None).map_err(report)? {
            println!("{}", values::row_json(&row, &descriptor, &encoding));
        }
        return Ok(());
    }

    let mut multi = MultiCallContext::new();
    loop {
        match bridge.handler(&fcinfo, Some(&mut multi)).map_err(report)? {
            CallResult::Next(row) | CallResult::Value(row) => {
                println!("{}", values::row_json(&row, &descriptor, &encoding));
            }
            CallResult::Done => break,
        }
    }
    info!(function, calls = multi.calls(), "set-returning call finished");
    Ok(())
}

fn run_do(config: &BridgeConfig, source: &str) -> Result<()> {
    let bridge = open_bridge(config, None)?;
    bridge.execute_inline(source).map_err(report)
}

fn run_check(config: &BridgeConfig, catalog: &Path) -> Result<()> {
    let bridge = open_bridge(config, Some(catalog))?;
    let mut failed = 0;
    for oid in bridge.catalog().oids() {
        match bridge.validate(oid) {
            Ok(()) => println!("ok     {oid}"),
            Err(e) => {
                warn!(oid = %oid, error = %e, "function failed validation");
                println!("FAILED {oid}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(miette::miette!("{} function(s) failed validation", failed));
    }
    Ok(())
}

/// Render a bridge error the way the host would report it.
fn report(err: plswipl::BridgeError) -> miette::Report {
    match err.context() {
        Some(context) => miette::miette!("ERROR [{}]: {}\nCONTEXT: {}", err.sqlstate(), err, context),
        None => miette::miette!("ERROR [{}]: {}", err.sqlstate(), err),
    }
}
