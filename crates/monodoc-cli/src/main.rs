//! mdoc: command line front end for the monodoc client core

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use monodoc_client::{
    ClientConfig, ConfigLoader, MemoryTransport, Session, Value, config::DEFAULT_CONFIG_PATH, expr,
};
use monodoc_common::protocol::SortDirection;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mdoc")]
#[command(about = "Compile document-store expressions and run them against an in-memory collection")]
#[command(version)]
struct Cli {
    /// Configuration file (default: mdoc.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an expression and print the result
    Parse {
        expr: String,

        /// Which grammar to compile with
        #[arg(short, long, value_enum, default_value_t = Kind::Filter)]
        kind: Kind,

        /// Print the compiled tree as JSON instead of canonical text
        #[arg(long)]
        json: bool,
    },

    /// Generate document identifiers
    Ids {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Load documents from a JSON file and print those a find selects
    Run {
        /// JSON array of documents
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long)]
        filter: Option<String>,

        /// Sort clauses, e.g. "pages desc"
        #[arg(short, long)]
        sort: Vec<String>,

        #[arg(short, long)]
        limit: Option<i64>,

        #[arg(short, long)]
        offset: Option<i64>,

        /// Placeholder value as name=value; the value is read as JSON
        /// and falls back to a plain string
        #[arg(short, long = "bind")]
        bind: Vec<String>,

        /// Collection the documents are loaded into
        #[arg(long, default_value = "data")]
        collection: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Filter,
    Sort,
    Projection,
    Group,
    Path,
}

fn get_env_filter() -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else if cfg!(debug_assertions) {
        EnvFilter::new("mdoc=debug,monodoc_client=debug")
    } else {
        EnvFilter::new("info")
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ClientConfig> {
    ConfigLoader::new()
        .with_config_arg(path)
        .load(DEFAULT_CONFIG_PATH)
        .context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    Registry::default()
        .with(get_env_filter())
        .with(stderr_layer)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    tracing::debug!(
        server_version = %config.session.server_version,
        schema = %config.session.schema,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Parse { expr, kind, json } => parse(&expr, kind, json),
        Commands::Ids { count } => {
            let identity = config.identity_source()?;
            for _ in 0..count {
                println!("{}", identity.next_id());
            }
            Ok(())
        }
        Commands::Run {
            data,
            filter,
            sort,
            limit,
            offset,
            bind,
            collection,
        } => {
            let plan = RunPlan {
                filter,
                sort,
                limit,
                offset,
                bind,
            };
            run(&config, &data, &collection, plan).await
        }
    }
}

fn parse(source: &str, kind: Kind, json: bool) -> anyhow::Result<()> {
    let rendered = match kind {
        Kind::Filter => {
            let tree = expr::parse_expr(source)?;
            render(&tree, json, tree.to_string())?
        }
        Kind::Sort => {
            let specs = expr::parse_sort(source)?;
            let text = specs
                .iter()
                .map(|spec| match spec.direction {
                    SortDirection::Asc => format!("{} ASC", spec.expr),
                    SortDirection::Desc => format!("{} DESC", spec.expr),
                })
                .collect::<Vec<_>>()
                .join(", ");
            render(&specs, json, text)?
        }
        Kind::Projection => {
            let projections = expr::parse_projection(source)?;
            let text = projections
                .iter()
                .map(|p| match &p.alias {
                    Some(alias) => format!("{} AS {alias}", p.source),
                    None => p.source.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            render(&projections, json, text)?
        }
        Kind::Group => {
            let exprs = expr::parse_expr_list(source)?;
            let text = exprs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            render(&exprs, json, text)?
        }
        Kind::Path => {
            let path = expr::parse_document_path(source)?;
            render(&path, json, path.to_string())?
        }
    };
    println!("{rendered}");
    Ok(())
}

fn render<T: serde::Serialize>(tree: &T, json: bool, text: String) -> anyhow::Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(tree)?)
    } else {
        Ok(text)
    }
}

struct RunPlan {
    filter: Option<String>,
    sort: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    bind: Vec<String>,
}

async fn run(
    config: &ClientConfig,
    data: &Path,
    collection: &str,
    plan: RunPlan,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(data)
        .with_context(|| format!("Failed to read {}", data.display()))?;
    let documents: Vec<serde_json::Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} must hold a JSON array of documents", data.display()))?;

    let transport = Arc::new(MemoryTransport::new(config.server_version()?));
    let session = Session::open(transport, config).await?;
    let collection = session.ensure_collection(collection).await?;
    if !documents.is_empty() {
        let added = collection.add_many(documents)?.execute().await?;
        tracing::debug!(
            loaded = added.affected_items,
            generated = added.generated_ids.len(),
            "Seeded collection"
        );
    }

    let mut find = match &plan.filter {
        Some(filter) => collection.find(filter)?,
        None => collection.find_all(),
    };
    if !plan.sort.is_empty() {
        find.sort(&plan.sort)?;
    }
    if let Some(limit) = plan.limit {
        find.limit(limit)?;
    }
    if let Some(offset) = plan.offset {
        find.offset(offset);
    }
    for binding in &plan.bind {
        let Some((name, raw)) = binding.split_once('=') else {
            bail!("Binding '{binding}' must be written as name=value");
        };
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw));
        find.bind(name.trim(), value);
    }

    for doc in find.execute().await? {
        let json: serde_json::Value = Value::Object(doc).into();
        println!("{json}");
    }
    Ok(())
}
