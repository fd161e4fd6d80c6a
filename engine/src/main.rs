use clap::Parser;
use std::path::PathBuf;

use wfmeta::diag::has_errors;
use wfmeta::options::ProcessOptions;
use wfmeta::report::CacheReport;
use wfmeta::validation::drain_all_deferred;
use wfmeta::walker::{cache_root_metadata, WorkflowDefinition};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Emit {
    Report,
    Errors,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "wfmeta",
    version,
    about = "Workflow metadata cache — declares, scopes and validates a workflow definition document"
)]
struct Cli {
    /// Input definition document (JSON)
    definition: PathBuf,

    /// What to print on stdout
    #[arg(long, value_enum, default_value_t = Emit::Report)]
    emit: Emit,

    /// Do not run activity constraints
    #[arg(long)]
    skip_constraints: bool,

    /// Declare private implementations without descending into them
    #[arg(long)]
    skip_private_children: bool,

    /// Process the root activity only
    #[arg(long)]
    single_level: bool,

    /// Store diagnostics on each activity and collect them after the pass
    #[arg(long)]
    defer_violations: bool,

    /// Log cache pass events to stderr (filter with RUST_LOG)
    #[arg(long)]
    verbose: bool,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wfmeta=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        init_logging();
    }

    // ── Load definition ──
    let source = match std::fs::read_to_string(&cli.definition) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("wfmeta: error: {}: {}", cli.definition.display(), e);
            std::process::exit(2);
        }
    };
    let loaded = match wfmeta::document::from_json(&source) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("wfmeta: error: {}: {}", cli.definition.display(), e);
            std::process::exit(2);
        }
    };
    let definition = match WorkflowDefinition::new(loaded.tree, loaded.root) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("wfmeta: error: {}", e);
            std::process::exit(2);
        }
    };

    // ── Cache ──
    let options = ProcessOptions {
        skip_constraints: cli.skip_constraints,
        skip_private_children: cli.skip_private_children,
        only_visit_single_level: cli.single_level,
        store_temp_violations: cli.defer_violations,
        ..ProcessOptions::full_caching()
    };
    let mut errors = match cache_root_metadata(&definition, Some(&loaded.host), &options, None) {
        Ok(errors) => errors,
        Err(e) => {
            eprintln!("wfmeta: error: {}", e);
            std::process::exit(2);
        }
    };
    if cli.defer_violations {
        drain_all_deferred(&mut definition.lock(), &mut errors);
    }

    for error in &errors {
        eprintln!("wfmeta: {}", error);
    }

    // ── Emit ──
    let report = CacheReport::new(&definition.lock(), &errors);
    match cli.emit {
        Emit::Report => print!("{}", report),
        Emit::Errors => {
            for error in &errors {
                println!("{}", error);
            }
        }
        Emit::Fingerprint => println!("{}", report.fingerprint()),
    }

    if has_errors(&errors) {
        std::process::exit(1);
    }
}
