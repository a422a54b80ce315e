//! Engine binary: load, grow to a fixed point, dump.
//!
//! `magma-grow [structure_in] structure_out`, with the theory, language
//! and sizing configured through the environment.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use magma_engine::{snapshot, Engine, EngineConfig, Router};

#[derive(Parser, Debug)]
#[command(name = "magma-grow", about = "Saturate an algebraic structure under compiled rules")]
struct Args {
    /// `[structure_in] structure_out`: an optional snapshot to resume
    /// from, and the snapshot written at the fixed point.
    #[arg(value_name = "STRUCTURE", num_args = 1..=2)]
    structures: Vec<PathBuf>,

    /// Signature declaration file: one `<arity> <name>` per line.
    #[arg(long, env = "MAGMA_SIGNATURE")]
    signature: PathBuf,
    /// Compiled rule listings.
    #[arg(long, env = "MAGMA_THEORY")]
    theory: PathBuf,
    /// Core facts assumed before growing.
    #[arg(long, env = "MAGMA_FACTS")]
    facts: Option<PathBuf>,
    /// Language weights enabling random sampling.
    #[arg(long, env = "MAGMA_LANGUAGE")]
    language: Option<PathBuf>,
    /// Carrier capacity.
    #[arg(long, env = "MAGMA_SIZE", default_value_t = 16383)]
    size: usize,
    /// Worker thread count; cleanup and diffuse categories get one thread
    /// each on top.
    #[arg(long, env = "MAGMA_THREADS", default_value_t = 1)]
    threads: usize,
    /// Log file; defaults to stderr.
    #[arg(long, env = "MAGMA_LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn run(args: &Args) -> magma_engine::Result<()> {
    let (structure_in, structure_out) = match args.structures.as_slice() {
        [out] => (None, out),
        [input, out] => (Some(input), out),
        _ => unreachable!("clap bounds the positional count"),
    };
    let config = EngineConfig {
        item_dim: args.size,
        worker_threads: args.threads.max(1),
        cleanup_threads: 1,
        diffuse_threads: 1,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config);

    engine.declare_signature(&fs::read_to_string(&args.signature)?)?;
    if let Some(path) = structure_in {
        snapshot::load(engine.signature(), path)?;
    }
    if let Some(path) = &args.language {
        engine.set_language(&fs::read_to_string(path)?)?;
    }
    engine.load_programs(&fs::read_to_string(&args.theory)?)?;
    engine.seed_nullary_functions()?;
    if let Some(path) = &args.facts {
        engine.assume_all(&fs::read_to_string(path)?)?;
    }

    engine.grow()?;
    engine.validate()?;
    info!(
        obs = engine.signature().carrier().item_count(),
        merges = engine.merge_count(),
        "saturated"
    );
    if let Some(path) = &args.language {
        log_routes(&engine, &fs::read_to_string(path)?);
    }
    snapshot::dump(engine.signature(), structure_out)?;
    Ok(())
}

/// Reports the least-cost spelling of each ob at the fixed point.
fn log_routes(engine: &Engine, language: &str) {
    let mut weights = std::collections::HashMap::new();
    for line in language.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        if let (Some(weight), Some(name)) = (
            words.next().and_then(|w| w.parse::<f32>().ok()),
            words.next(),
        ) {
            weights.insert(name.to_owned(), weight);
        }
    }
    let router = Router::new(engine.signature(), &weights);
    for (ob, route) in router.find_routes().iter().enumerate() {
        if let Some(route) = route {
            info!(ob, route = %route, "spelled");
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match &args.log_file {
        Some(path) => {
            let file = match fs::File::create(path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("failed to open log file {}: {err}", path.display());
                    return ExitCode::FAILURE;
                }
            };
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "engine failed");
            ExitCode::FAILURE
        }
    }
}
