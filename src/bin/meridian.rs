//! Meridian CLI: inspect coordinate maps, chunks, context windows and caches.
//!
//! Usage:
//!   meridian map <graph.json>
//!   meridian chunks <document.md> [--max-chars N]
//!   meridian context <document.md> [--graph graph.json] [--target #4-0] [--depth comprehensive]
//!   meridian cache <get|invalidate|clear> [--store results|documents]

use clap::{Parser, Subcommand, ValueEnum};
use meridian::cache::TwoTierCache;
use meridian::config::{CacheBackend, PipelineConfig};
use meridian::context::{ContextBuilder, ContextDepth, ProjectContext};
use meridian::coordinate::Coordinate;
use meridian::document::Chunker;
use meridian::graph::transform_value;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "meridian",
    version,
    about = "Document analysis over a coordinate-addressed knowledge graph"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a graph snapshot and print its summary
    Map {
        /// Graph snapshot (JSON)
        graph: PathBuf,
    },
    /// Split a document into analysis units
    Chunks {
        document: PathBuf,
        /// Maximum characters per unit
        #[arg(long)]
        max_chars: Option<usize>,
    },
    /// Render the context window for every unit of a document
    Context {
        document: PathBuf,
        /// Graph snapshot (JSON)
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Target coordinate
        #[arg(long)]
        target: Option<String>,
        #[arg(long, value_enum, default_value_t = DepthArg::Lightweight)]
        depth: DepthArg,
        /// Project name shown in the window
        #[arg(long, default_value = "meridian")]
        project: String,
    },
    /// Inspect or clear the persistent caches
    Cache {
        #[command(subcommand)]
        action: CacheAction,
        #[arg(long, value_enum, default_value_t = StoreArg::Results, global = true)]
        store: StoreArg,
        /// Cache directory (overrides the config file)
        #[arg(long, global = true)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the payload cached under a key
    Get { key: String },
    /// Remove one key
    Invalidate { key: String },
    /// Remove every key
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum DepthArg {
    Lightweight,
    Comprehensive,
}

impl From<DepthArg> for ContextDepth {
    fn from(d: DepthArg) -> Self {
        match d {
            DepthArg::Lightweight => ContextDepth::Lightweight,
            DepthArg::Comprehensive => ContextDepth::Comprehensive,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Results,
    Documents,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_text(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))
}

fn read_json(path: &Path) -> Result<Value, String> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_map(graph: &Path) -> Result<i32, String> {
    let map = transform_value(&read_json(graph)?);
    Ok(print_json(&serde_json::json!({
        "summary": map.summary(),
        "report": map.report(),
    })))
}

fn cmd_chunks(config: &PipelineConfig, document: &Path, max_chars: Option<usize>) -> Result<i32, String> {
    let text = read_text(document)?;
    let chunker = Chunker::new(max_chars.unwrap_or(config.chunking.max_chars));
    Ok(print_json(&chunker.chunk(&text)))
}

async fn cmd_context(
    config: &PipelineConfig,
    document: &Path,
    graph: Option<&Path>,
    target: Option<String>,
    depth: ContextDepth,
    project: String,
) -> Result<i32, String> {
    let text = read_text(document)?;
    let raw = match graph {
        Some(path) => read_json(path)?,
        None => Value::Null,
    };
    let map = Arc::new(transform_value(&raw));
    let builder = ContextBuilder::new(map, ProjectContext::new(project))
        .with_limits(config.context.clone());
    let target = target.map(Coordinate::new);

    for unit in Chunker::new(config.chunking.max_chars).chunk(&text) {
        let window = builder.build(&unit.content, target.as_ref(), depth).await;
        println!("=== unit {} ===", unit.index);
        println!("{}", window.render());
    }
    Ok(0)
}

async fn cmd_cache(
    config: &PipelineConfig,
    action: CacheAction,
    store: StoreArg,
    dir: Option<PathBuf>,
) -> Result<i32, String> {
    let mut settings = config.cache.clone();
    if dir.is_some() {
        settings.dir = dir;
    }
    if settings.backend == CacheBackend::Memory {
        return Err("the memory cache backend keeps nothing between runs".to_string());
    }
    let caches = settings
        .open_caches()
        .await
        .map_err(|e| format!("failed to open caches: {}", e))?;
    let cache: &TwoTierCache = match store {
        StoreArg::Results => &caches.results,
        StoreArg::Documents => &caches.documents,
    };

    let code = match action {
        CacheAction::Get { key } => match cache.get(&key).await {
            Some(payload) => print_json(&payload),
            None => {
                eprintln!("No entry for '{}' in {}", key, cache.name());
                1
            }
        },
        CacheAction::Invalidate { key } => {
            cache.invalidate(&key).await;
            println!("Invalidated '{}' in {}", key, cache.name());
            0
        }
        CacheAction::Clear => {
            cache.clear().await;
            println!("Cleared {}", cache.name());
            0
        }
    };
    caches
        .close()
        .await
        .map_err(|e| format!("failed to close caches: {}", e))?;
    Ok(code)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => match PipelineConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    let result = match cli.command {
        Commands::Map { graph } => cmd_map(&graph),
        Commands::Chunks { document, max_chars } => cmd_chunks(&config, &document, max_chars),
        Commands::Context {
            document,
            graph,
            target,
            depth,
            project,
        } => cmd_context(&config, &document, graph.as_deref(), target, depth.into(), project).await,
        Commands::Cache { action, store, dir } => cmd_cache(&config, action, store, dir).await,
    };

    let code = result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        1
    });
    std::process::exit(code);
}
