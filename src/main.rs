use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depgraph::{Config, GraphBuilder, TaggedToken};
use serde::Deserialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "depgraph")]
#[command(version, about = "Build an entity/relation graph from tagged dependency parses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest JSON Lines records (relations or token batches) into the graph
    Ingest {
        /// JSON Lines file to ingest
        #[arg(short, long)]
        input: PathBuf,

        /// WARNING: permanently DELETES all graph data at the store location before ingesting
        #[arg(long, conflicts_with = "keep_existing")]
        reset: bool,

        /// Keep existing graph data even if the config sets reset_existing = true
        #[arg(long)]
        keep_existing: bool,

        /// Store location (overrides graph.location and [remote])
        #[arg(long)]
        location: Option<PathBuf>,
    },
    /// Print node and edge counts per relation kind (never resets the store)
    Stats {
        /// Store location (overrides graph.location and [remote])
        #[arg(long)]
        location: Option<PathBuf>,
    },
}

/// One line of ingest input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Record {
    Relation {
        #[serde(default)]
        scope: Option<String>,
        relation: String,
        src: TaggedToken,
        dst: TaggedToken,
    },
    Tokens {
        tokens: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;

    // RUST_LOG wins over graph.log_level
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.graph.log_level.as_str()),
    )
    .init();

    match cli.command {
        Command::Ingest {
            input,
            reset,
            keep_existing,
            location,
        } => {
            apply_ingest_overrides(&mut config, reset, keep_existing, location)?;
            run_ingest(&config, &input).await
        }
        Command::Stats { location } => {
            if let Some(location) = location {
                config.graph.location = location;
                config.remote = None;
            }
            config.graph.reset_existing = false;
            run_stats(&config).await
        }
    }
}

/// Apply `ingest` flags on top of the loaded configuration.
fn apply_ingest_overrides(
    config: &mut Config,
    reset: bool,
    keep_existing: bool,
    location: Option<PathBuf>,
) -> Result<()> {
    match location {
        Some(location) => {
            config.graph.location = location;
            config.remote = None;
        }
        None if reset && config.remote.is_some() => {
            anyhow::bail!(
                "--reset cannot be applied to the [remote] store; pass --location to reset a local store"
            );
        }
        None => {}
    }

    if reset {
        config.graph.reset_existing = true;
    } else if keep_existing {
        config.graph.reset_existing = false;
    }
    Ok(())
}

async fn run_ingest(config: &Config, input: &Path) -> Result<()> {
    log::info!("Starting depgraph ingestion v{}", env!("CARGO_PKG_VERSION"));
    if config.graph.reset_existing && config.remote.is_none() {
        log::warn!(
            "reset_existing is set: all graph data at {} will be deleted",
            config.location().display()
        );
    }

    let builder = GraphBuilder::from_config(config).await?;

    let file = std::fs::File::open(input)
        .with_context(|| format!("Failed to open input: {}", input.display()))?;
    let reader = std::io::BufReader::new(file);

    let start = Instant::now();
    let mut relations: usize = 0;
    let mut skipped: usize = 0;
    let mut token_nodes: usize = 0;
    let mut errors: usize = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                errors += 1;
                log::error!("✗ line {}: invalid record: {}", idx + 1, e);
                continue;
            }
        };

        let outcome = match record {
            Record::Relation {
                scope,
                relation,
                src,
                dst,
            } => builder
                .add_relation(&src, &dst, &relation, scope.as_deref())
                .await
                .map(|added| {
                    if added {
                        relations += 1;
                    } else {
                        skipped += 1;
                        log::warn!("line {}: relation skipped (empty token)", idx + 1);
                    }
                }),
            Record::Tokens { tokens } => builder
                .add_tokens(&tokens)
                .await
                .map(|created| token_nodes += created),
        };

        if let Err(e) = outcome {
            errors += 1;
            log::error!("✗ line {}: {}", idx + 1, e);
        }
    }

    log::info!("=== Ingestion Complete ===");
    log::info!("Relations added: {}", relations);
    log::info!("Relations skipped: {}", skipped);
    log::info!("Nodes created from token batches: {}", token_nodes);
    log::info!(
        "Graph size: {} nodes, {} edges",
        builder.node_count().await?,
        builder.edge_count().await?
    );
    log::info!("Time: {:?}", start.elapsed());

    builder.terminate().await?;

    if errors > 0 {
        anyhow::bail!("{} record(s) failed to ingest; see log for details", errors);
    }
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let builder = GraphBuilder::from_config(config).await?;

    let nodes = builder.node_count().await?;
    let edges = builder.edge_count().await?;
    let kinds = builder.kind_counts().await?;

    println!("\n=== depgraph Statistics ===\n");
    println!("Nodes: {}", nodes);
    println!("Edges: {}", edges);

    if !kinds.is_empty() {
        println!("\n{:-<32}", "");
        println!("{:<20} {:>10}", "Relation", "Edges");
        println!("{:-<32}", "");
        for (kind, count) in &kinds {
            println!("{:<20} {:>10}", kind.as_str(), count);
        }
        println!("{:-<32}", "");
    }
    println!();

    builder.terminate().await?;
    Ok(())
}
