use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use docstore::{
    index_status, CreateAllOptions, ClientConfig, IndexRegistry, OpenSearchBackend, SearchBackend,
};

#[derive(Parser)]
#[command(name = "docstore")]
#[command(about = "Index administration for the document store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Search cluster URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Application name used to derive index names
    #[arg(long, default_value = "docstore", global = true)]
    app_name: String,

    /// Derive test-suffixed index names
    #[arg(long, global = true)]
    testing: bool,

    /// Index declaration as name or name:version (repeatable)
    #[arg(long = "index", global = true)]
    indexes: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create all registered indexes
    Createall {
        /// Create only these indexes (by name or alias)
        #[arg(long)]
        only: Vec<String>,
        /// Skip these indexes (by name or alias)
        #[arg(long)]
        skip: Vec<String>,
        /// Drop existing indexes before creating them
        #[arg(short = 'D', long)]
        drop: bool,
    },
    /// Run a query against an index and print the raw response
    Query {
        /// Index name or alias
        index: String,
        /// Query body as JSON (defaults to match_all)
        #[arg(value_parser = parse_json)]
        body: Option<serde_json::Value>,
        /// Print only the list of hits
        #[arg(long)]
        hits_only: bool,
    },
    /// Report aliases, mappings, and document counts for registered indexes
    Status,
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        error!("command failed: {}", e);
        eprintln!("Error: {}", e);

        let mut source = e.source();
        while let Some(err) = source {
            eprintln!("  Caused by: {}", err);
            source = err.source();
        }

        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    let backend: Arc<dyn SearchBackend> =
        Arc::new(OpenSearchBackend::new(&config).context("building search client")?);

    match &cli.command {
        Commands::Createall { only, skip, drop } => {
            run_createall(cli, backend, only, skip, *drop).await
        }
        Commands::Query {
            index,
            body,
            hits_only,
        } => run_query(backend, index, body.clone(), *hits_only).await,
        Commands::Status => run_status(cli, backend).await,
    }
}

/// Build a registry from the command line index declarations.
fn build_registry(cli: &Cli, backend: Arc<dyn SearchBackend>) -> Result<IndexRegistry> {
    let mut registry =
        IndexRegistry::new(backend, cli.app_name.as_str()).with_testing(cli.testing);
    for declaration in &cli.indexes {
        let (name, version) = match declaration.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (declaration.as_str(), None),
        };
        registry
            .register(Some(name), version)
            .with_context(|| format!("registering index {}", declaration))?;
    }
    Ok(registry)
}

async fn run_createall(
    cli: &Cli,
    backend: Arc<dyn SearchBackend>,
    only: &[String],
    skip: &[String],
    drop: bool,
) -> Result<()> {
    let registry = build_registry(cli, backend)?;
    let options = CreateAllOptions {
        force: drop,
        only: only.to_vec(),
        skip: skip.to_vec(),
    };

    registry
        .createall(&options)
        .await
        .context("creating indexes")?;
    for index in registry.indexes() {
        info!(index = index.name(), "ready");
    }
    Ok(())
}

async fn run_query(
    backend: Arc<dyn SearchBackend>,
    index: &str,
    body: Option<serde_json::Value>,
    hits_only: bool,
) -> Result<()> {
    let body = body.unwrap_or_else(|| serde_json::json!({ "query": { "match_all": {} } }));

    let response = backend
        .search(index, body)
        .await
        .with_context(|| format!("querying {}", index))?;

    let output = if hits_only {
        response["hits"]["hits"].clone()
    } else {
        response
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_status(cli: &Cli, backend: Arc<dyn SearchBackend>) -> Result<()> {
    let registry = build_registry(cli, backend.clone())?;
    let statuses = index_status(backend.as_ref(), &registry)
        .await
        .context("fetching index status")?;
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
