//! Command-line inspector for DAP datasets.
//!
//! Opens a dataset URL or a saved response file, prints its structure and
//! attributes, and optionally fetches one variable.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use dap_client::parsers::to_dds;
use dap_client::{
    open_file, open_url, parse_index_expr, ClientConfig, Dataset, Index, Protocol, VarRef,
};

#[derive(Parser, Debug)]
#[command(name = "dap-dump")]
#[command(about = "Inspect DAP2/DAP4 datasets and fetch variables")]
struct Args {
    /// Dataset URL, or a .dods, .dap, .dmr or .dds file
    source: String,

    /// DAS file to attach when opening a DAP2 file
    #[arg(long)]
    das: Option<PathBuf>,

    /// Force the protocol instead of detecting it from the URL
    #[arg(long)]
    protocol: Option<Protocol>,

    /// Read grids without their coordinate maps
    #[arg(long)]
    no_output_grid: bool,

    /// Request timeout in seconds
    #[arg(long, env = "DAP_TIMEOUT_SECS")]
    timeout: Option<u64>,

    /// Variable to fetch, by dotted id
    #[arg(long)]
    fetch: Option<String>,

    /// Index expression applied to the fetched variable, e.g. "0, 10:14"
    #[arg(long, requires = "fetch")]
    index: Option<String>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&args)?;
    let dataset = open(&args, &config)?;
    info!(dataset = %dataset.name, variables = dataset.variables.len(), "Opened");

    match &args.fetch {
        Some(id) => {
            let index = parse_index_expr(args.index.as_deref().unwrap_or(""))
                .with_context(|| format!("invalid index expression for {}", id))?;
            fetch(&dataset, id, &index, args.json)
        }
        None => describe(&dataset, args.json),
    }
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env();
    if let Some(protocol) = args.protocol {
        config.protocol = Some(protocol);
    }
    if args.no_output_grid {
        config.output_grid = false;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    config.validate().map_err(|e| anyhow!(e))?;
    debug!(?config, "Client configuration");
    Ok(config)
}

fn open(args: &Args, config: &ClientConfig) -> Result<Dataset> {
    if args.source.contains("://") {
        if args.das.is_some() {
            bail!("--das only applies to files; remote datasets fetch their own DAS");
        }
        open_url(&args.source, config).with_context(|| format!("failed to open {}", args.source))
    } else {
        open_file(Path::new(&args.source), args.das.as_deref())
            .with_context(|| format!("failed to open {}", args.source))
    }
}

/// Print the structure and attributes of every variable.
fn describe(dataset: &Dataset, as_json: bool) -> Result<()> {
    if as_json {
        let variables: Vec<_> = dataset
            .walk()
            .iter()
            .map(|node| {
                json!({
                    "id": node.id(),
                    "kind": kind(node),
                    "shape": shape(node),
                    "attributes": node.attributes(),
                })
            })
            .collect();
        let doc = json!({
            "name": dataset.name,
            "attributes": dataset.attributes,
            "variables": variables,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", to_dds(dataset));
    if !dataset.attributes.is_empty() {
        println!();
        println!("{}", serde_json::to_string_pretty(&dataset.attributes)?);
    }
    for node in dataset.walk() {
        let attributes = node.attributes();
        if attributes.is_empty() {
            continue;
        }
        println!();
        println!("{}:", node.id());
        for (name, value) in attributes {
            println!("    {} = {}", name, serde_json::to_string(value)?);
        }
    }
    Ok(())
}

fn kind(node: &VarRef<'_>) -> &'static str {
    match node {
        VarRef::Base(_) => "base",
        VarRef::Structure(_) => "structure",
        VarRef::Sequence(_) => "sequence",
        VarRef::Grid(_) => "grid",
    }
}

fn shape(node: &VarRef<'_>) -> Vec<usize> {
    match node {
        VarRef::Base(b) => b.shape.clone(),
        VarRef::Grid(g) => g.shape().to_vec(),
        _ => Vec::new(),
    }
}

/// Fetch one variable and print its values.
fn fetch(dataset: &Dataset, id: &str, index: &[Index], as_json: bool) -> Result<()> {
    let node = dataset.var(id)?;
    let value = match node {
        VarRef::Base(base) => serde_json::to_value(base.get(index)?)?,
        VarRef::Grid(grid) => serde_json::to_value(grid.get(index)?)?,
        VarRef::Sequence(seq) => {
            let records = match (seq.proxy(), index) {
                (Some(proxy), [rows]) => proxy
                    .rows(*rows)?
                    .iter()?
                    .collect::<Result<Vec<_>, _>>()?,
                (_, []) => seq.records()?.collect::<Result<Vec<_>, _>>()?,
                _ => bail!("sequence {} takes a single row range", id),
            };
            info!(records = records.len(), "Fetched sequence");
            serde_json::to_value(records)?
        }
        VarRef::Structure(_) => bail!("{} is a structure; fetch one of its members", id),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "id": id, "data": value }))?);
    } else {
        println!("{}:", id);
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
