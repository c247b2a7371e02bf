//! Sift command line
//!
//! Explains or runs a collection request against the configured resources.
//!
//! Usage:
//!   sift explain --backend orm --resource Dummy 'price=12.5&page=2'
//!   sift run --backend odm --data fixtures.json --resource Dummy 'id[]=1&id[]=2'

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use sea_query::Values;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sift::config::Config;
use sift::odm::MemoryDocumentStore;
use sift::orm::{self, SqlExecutor};
use sift::pipeline::{odm_provider, orm_provider};
use sift::{CollectionResult, Context, MetadataRegistry, Pagination};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SQL or aggregation pipeline a request produces.
    Explain {
        #[arg(long, value_enum, default_value = "orm")]
        backend: BackendKind,

        /// Resource to query.
        #[arg(long)]
        resource: String,

        /// Operation name used for pagination attributes.
        #[arg(long)]
        operation: Option<String>,

        /// Request query string, e.g. `price=12&page=2`.
        query: Option<String>,
    },
    /// Run a request and print the collection as JSON.
    Run {
        #[arg(long, value_enum, default_value = "odm")]
        backend: BackendKind,

        /// Document fixtures, `{ "<collection>": [ ... ] }` (document backend).
        #[arg(long)]
        data: Option<PathBuf>,

        #[arg(long)]
        resource: String,

        #[arg(long)]
        operation: Option<String>,

        query: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    /// SQL through SeaQuery.
    Orm,
    /// Aggregation pipelines.
    Odm,
}

/// Executor for `explain`: queries are rendered, never run.
struct DryRun;

#[async_trait]
impl SqlExecutor for DryRun {
    async fn fetch_all(&self, _sql: &str, _values: Values) -> Result<Vec<serde_json::Value>> {
        bail!("explain does not execute queries")
    }

    async fn fetch_count(&self, _sql: &str, _values: Values) -> Result<u64> {
        bail!("explain does not execute queries")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let metadata = MetadataRegistry::load(&config.resources_path)
        .context("failed to load resources")?;
    let metadata = Arc::new(metadata);
    info!(
        path = %config.resources_path.display(),
        resources = metadata.resources().count(),
        "Resource metadata loaded"
    );
    let pagination = Arc::new(Pagination::new(
        config.pagination.clone(),
        Arc::clone(&metadata),
    ));

    match cli.command {
        Command::Explain {
            backend,
            resource,
            operation,
            query,
        } => {
            let mut context = Context::from_query(query.as_deref().unwrap_or_default());
            let operation = operation.as_deref();
            match backend {
                BackendKind::Orm => {
                    let provider = orm_provider(metadata, pagination, Arc::new(DryRun));
                    let builder = provider.build(&resource, operation, &mut context)?;
                    let (sql, _) = builder.build();
                    let (count_sql, _) = builder.build_count();
                    println!("-- page\n{sql}\n-- count\n{count_sql}");
                    if !builder.parameters().is_empty() {
                        println!("-- parameters");
                        for parameter in builder.parameters() {
                            println!(
                                "{} = {:?} ({})",
                                parameter.name,
                                parameter.value,
                                parameter.storage_type.as_str()
                            );
                        }
                    }
                }
                BackendKind::Odm => {
                    let provider =
                        odm_provider(metadata, pagination, Arc::new(MemoryDocumentStore::new()));
                    let builder = provider.build(&resource, operation, &mut context)?;
                    let pipeline = serde_json::Value::Array(builder.pipeline());
                    println!("{}", serde_json::to_string_pretty(&pipeline)?);
                }
            }
        }
        Command::Run {
            backend,
            data,
            resource,
            operation,
            query,
        } => {
            let mut context = Context::from_query(query.as_deref().unwrap_or_default());
            let operation = operation.as_deref();
            let result: CollectionResult = match backend {
                BackendKind::Orm => {
                    let database_url = config
                        .database_url
                        .as_deref()
                        .context("DATABASE_URL is required to run SQL collections")?;
                    let pool = orm::create_pool(database_url, config.database_max_connections)
                        .await?;
                    let provider = orm_provider(metadata, pagination, Arc::new(pool));
                    provider
                        .get_collection(&resource, operation, &mut context)
                        .await?
                }
                BackendKind::Odm => {
                    let Some(path) = data else {
                        bail!("--data is required for the document backend");
                    };
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let fixtures = serde_json::from_str(&raw)
                        .with_context(|| format!("{} is not valid JSON", path.display()))?;
                    let store = MemoryDocumentStore::from_json(fixtures)?;
                    let provider = odm_provider(metadata, pagination, Arc::new(store));
                    provider
                        .get_collection(&resource, operation, &mut context)
                        .await?
                }
            };
            info!(resource = %resource, items = result.len(), "Collection produced");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber. Logs go to stderr so stdout stays
/// machine readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sift=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
