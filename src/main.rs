//! CaseRunner CLI Entry Point
//!
//! Loads a catalog and runs its enabled test cases.
//!
//! # Usage
//!
//! ```bash
//! # Poll for test cases until Ctrl-C
//! caserunner catalog.yaml
//!
//! # Run every enabled test case once and exit
//! caserunner catalog.yaml --once
//!
//! # Keep an audit trail of every step
//! caserunner catalog.yaml --audit-log runs/records.jsonl
//!
//! # Poll every 30 seconds with at most 2 test cases at a time
//! caserunner catalog.yaml --poll-interval 30 --max-concurrent 2
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use caserunner::audit::render_summary;
use caserunner::catalog::load_catalog;
use caserunner::execution::{
    Engine, EngineConfig, LoggingHandler, DEFAULT_BACKOFF, DEFAULT_POLL_INTERVAL,
};
use caserunner::{ExecutionRecord, APP_NAME, VERSION};

/// Default catalog file used when none is specified.
const DEFAULT_CATALOG: &str = "catalog.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug, PartialEq)]
struct Config {
    catalog_path: String,
    once: bool,
    poll_interval: Duration,
    max_concurrent: Option<usize>,
    backoff: Duration,
    audit_log: Option<PathBuf>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: DEFAULT_CATALOG.to_string(),
            once: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent: Some(num_cpus::get()),
            backoff: DEFAULT_BACKOFF,
            audit_log: None,
            verbose: false,
        }
    }
}

impl Config {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: self.poll_interval,
            backoff: self.backoff,
            max_concurrent: self.max_concurrent,
            audit_log: self.audit_log.clone(),
        }
    }
}

/// Configures logging: timestamp, level, and the emitting module per line.
///
/// `RUST_LOG` overrides the level chosen by `--verbose`.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                buf.timestamp_millis(),
                record.level(),
                log_source(record.target()),
                record.args()
            )
        })
        .init();
}

/// Shortens a log target to the module path inside this crate.
fn log_source(target: &str) -> &str {
    target
        .strip_prefix("caserunner::")
        .unwrap_or(target)
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Schema-Validated Test Case Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: caserunner [OPTIONS] <CATALOG_FILE>");
    println!();
    println!("Arguments:");
    println!("  <CATALOG_FILE>          Path to catalog YAML file (default: {})", DEFAULT_CATALOG);
    println!();
    println!("Options:");
    println!("  --once                  Run enabled test cases once, then exit");
    println!(
        "  --poll-interval SECS    Seconds between polls (default: {})",
        DEFAULT_POLL_INTERVAL.as_secs()
    );
    println!("  --max-concurrent N      Test cases run at once, 0 for unbounded (default: CPU count)");
    println!(
        "  --backoff-ms MS         Delay between step attempts (default: {})",
        DEFAULT_BACKOFF.as_millis()
    );
    println!("  --audit-log PATH        Append execution records to a JSON Lines file");
    println!("  --verbose               Enable debug logging");
    println!("  --help                  Show this help message");
    println!("  --version               Show version information");
    println!();
    println!("Examples:");
    println!("  caserunner catalog.yaml --once");
    println!("  caserunner catalog.yaml --audit-log runs/records.jsonl");
    println!("  caserunner catalog.yaml --poll-interval 30 --max-concurrent 2");
}

/// Returns the value following option `args[*i]`, advancing `i`.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("{} requires a value", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--once" => {
                config.once = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--poll-interval" => {
                let value = option_value(args, &mut i, "--poll-interval")?;
                let seconds: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid poll interval: {}", value))?;
                if seconds == 0 {
                    return Err("--poll-interval must be at least 1 second".to_string());
                }
                config.poll_interval = Duration::from_secs(seconds);
            }
            "--max-concurrent" => {
                let value = option_value(args, &mut i, "--max-concurrent")?;
                let max: usize = value
                    .parse()
                    .map_err(|_| format!("Invalid max concurrent value: {}", value))?;
                config.max_concurrent = if max == 0 { None } else { Some(max) };
            }
            "--backoff-ms" => {
                let value = option_value(args, &mut i, "--backoff-ms")?;
                let millis: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid backoff value: {}", value))?;
                config.backoff = Duration::from_millis(millis);
            }
            "--audit-log" => {
                let value = option_value(args, &mut i, "--audit-log")?;
                config.audit_log = Some(PathBuf::from(value));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.catalog_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Main application entry point.
///
/// Returns true when every executed step succeeded.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Load catalog
    info!("Loading catalog: {}", config.catalog_path);
    let catalog = load_catalog(&config.catalog_path).map_err(|e| {
        error!("Failed to load catalog: {}", e);
        format!("Could not load catalog from '{}': {}", config.catalog_path, e)
    })?;

    info!(
        "Catalog loaded: {} schemas, {} step configs, {} test cases",
        catalog.schemas.len(),
        catalog.steps.len(),
        catalog.test_cases.len()
    );

    if let Some(ref path) = config.audit_log {
        info!("Audit log: {}", path.display());
    }

    let step_names: Vec<String> = catalog.steps.iter().map(|s| s.step_name.clone()).collect();

    // Create and configure engine
    let engine = Engine::from_catalog(catalog).with_config(config.engine_config());
    for name in step_names {
        engine.register_handler(name, Arc::new(LoggingHandler));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let records: Vec<ExecutionRecord> = if config.once {
        runtime.block_on(engine.run_once())?
    } else {
        info!("Press Ctrl-C to stop");
        runtime.block_on(engine.run_until(shutdown_signal()))?
    };

    println!("{}", render_summary(&records));

    Ok(records.iter().all(|r| r.is_success()))
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
