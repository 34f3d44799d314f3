//! Command-line interface for docquery.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use docquery_core::config::env_vars;
use docquery_core::expr::Expr;
use docquery_core::Error;
use docquery_mango::{translate, OperatorRegistry, QueryOptimizer};
use docquery_storage::{DocumentContainer, MemoryDocumentStore, MemoryStoreConfig};
use serde_json::{json, Value};

/// docquery - translate query expression trees into Mango queries.
#[derive(Parser, Debug)]
#[command(name = "docquery")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the Mango query for a query tree.
    Translate {
        /// Path to the query tree (JSON).
        #[arg(required = true)]
        path: PathBuf,
        /// Pretty-print the output.
        #[arg(long)]
        pretty: bool,
    },
    /// Check whether a query tree can be translated.
    Validate {
        /// Path to the query tree (JSON).
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Run a query against documents loaded into the in-memory store.
    Run {
        /// JSON array of documents.
        #[arg(long)]
        data: PathBuf,
        /// Path to the query tree (JSON).
        #[arg(long)]
        query: PathBuf,
        /// Items per page.
        #[arg(long)]
        page_size: Option<usize>,
        /// Only read documents in this partition.
        #[arg(long)]
        partition_key: Option<String>,
        /// Dotted payload field holding each document's partition key.
        #[arg(long)]
        partition_field: Option<String>,
    },
    /// List supported query operators.
    Operators,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Translate { path, pretty } => run_translate(&path, pretty),
        Command::Validate { path } => run_validate(&path),
        Command::Run {
            data,
            query,
            page_size,
            partition_key,
            partition_field,
        } => {
            run_query(
                &data,
                &query,
                page_size,
                partition_key.as_deref(),
                partition_field.as_deref(),
            )
            .await
        }
        Command::Operators => {
            for method in OperatorRegistry::supported_operators() {
                println!("{}", method);
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("docquery=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docquery=info"))
    };

    // Logs go to stderr; stdout carries command output.
    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Render an error with its client code, e.g. `[BAD_REQUEST] ...`.
fn coded(e: impl Into<Error>) -> anyhow::Error {
    let e = e.into();
    anyhow!("[{}] {}", e.code(), e)
}

fn load_query(path: &Path) -> Result<Expr> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse query tree in {}", path.display()))
}

fn run_translate(path: &Path, pretty: bool) -> Result<()> {
    let expr = load_query(path)?;
    let query = translate(&expr).map_err(coded)?;
    if pretty {
        println!("{}", query.to_pretty_string());
    } else {
        println!("{}", query);
    }
    Ok(())
}

fn run_validate(path: &Path) -> Result<()> {
    let expr = load_query(path)?;
    match translate(&expr) {
        Ok(_) => {
            println!("valid");
            Ok(())
        }
        Err(e) => {
            println!("invalid: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load a JSON array of document payloads. Each element needs a string `id`
/// or gets a positional one.
async fn load_documents(
    container: &dyn DocumentContainer,
    path: &Path,
    partition_field: Option<&str>,
) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;
    let docs: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Expected a JSON array of documents in {}", path.display()))?;

    for (index, payload) in docs.iter().enumerate() {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("doc-{}", index));
        let partition_key = partition_field.and_then(|field| {
            field
                .split('.')
                .try_fold(payload, |value, segment| value.get(segment))
                .and_then(Value::as_str)
        });
        container
            .add(&id, payload.clone(), partition_key)
            .await
            .map_err(|e| coded(e).context(format!("Failed to load document '{}'", id)))?;
    }
    Ok(docs.len())
}

async fn run_query(
    data: &Path,
    query: &Path,
    page_size: Option<usize>,
    partition_key: Option<&str>,
    partition_field: Option<&str>,
) -> Result<()> {
    let expr = load_query(query)?;
    let plan = QueryOptimizer::optimize(&expr).map_err(coded)?;

    match translate(&expr) {
        Ok(mango) => tracing::debug!(query = %mango, "Translated query"),
        Err(e) => tracing::info!(reason = %e, "Query has no Mango form; evaluating in memory"),
    }

    let store = MemoryDocumentStore::new(MemoryStoreConfig::from_env());
    let container = store.container(&plan.source);
    let loaded = load_documents(container.as_ref(), data, partition_field).await?;
    tracing::info!(container = %plan.source, documents = loaded, "Loaded documents");

    let mut feed = container
        .create_query(&expr, page_size, partition_key)
        .map_err(|e| coded(e).context("Query failed"))?;

    // An empty result still prints one empty page.
    let mut number = 0;
    loop {
        let page = feed
            .read_next(None)
            .await
            .map_err(|e| coded(e).context("Failed to read page"))?;
        number += 1;
        let items: Vec<&Value> = page.items.iter().map(|doc| &doc.payload).collect();
        println!(
            "{}",
            json!({
                "page": number,
                "count": items.len(),
                "items": items,
                "continuation": page.continuation,
            })
        );
        if !feed.has_more() {
            break;
        }
    }
    Ok(())
}
