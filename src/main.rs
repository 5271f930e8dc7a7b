use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dataspace_downloader::auth::TokenManager;
use dataspace_downloader::catalog::{ProductRecord, SearchClient};
use dataspace_downloader::config::{Config, Settings};
use dataspace_downloader::copernicus::{ODataMetadataSource, Provider};
use dataspace_downloader::http::ReqwestClient;
use dataspace_downloader::pipeline::{resolve_products, ResolutionReport};
use dataspace_downloader::query::{Collection, QueryBuilder};
use dataspace_downloader::retry::RetryingClient;
use dataspace_downloader::transfer::{RcloneTransfer, TransferPlan};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Http = Arc<RetryingClient<ReqwestClient>>;

#[derive(Parser)]
#[command(version, about = "Search the Copernicus Data Space catalogue and fetch Sentinel-2 granules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starting configuration file
    Init { path: PathBuf },
    /// List the products matching the configured filters
    Search {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the queryable parameters of a collection
    Describe {
        #[arg(long, default_value = "Sentinel2")]
        collection: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Search, resolve granule directories and write a transfer plan
    Plan(PlanArgs),
    /// Same as `plan`, then copy the granules with rclone
    Download(PlanArgs),
}

#[derive(Args)]
struct PlanArgs {
    #[arg(short, long)]
    config: PathBuf,
    #[arg(short, long)]
    out_dir: PathBuf,
    /// Where product metadata documents are read from
    #[arg(long, value_enum, default_value_t = Source::S3)]
    source: Source,
    /// Transfer plan location, defaults to `<out_dir>/transfer_plan.json`
    #[arg(long)]
    plan: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Source {
    S3,
    Odata,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn read_config(path: &Path) -> Result<Config> {
    Config::read(path).with_context(|| format!("Loading {}", path.display()))
}

fn http_client(settings: &Settings) -> Result<Http> {
    let client = ReqwestClient::new(settings.timeout(), settings.connect_timeout())
        .context("Building HTTP client")?;
    Ok(Arc::new(RetryingClient::new(client, settings.retry_policy())))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            token.cancel();
        }
    });
    cancel
}

/// Runs the configured search. Records received before a failure are kept and returned.
async fn search(
    config: &Config,
    http: Http,
    cancel: &CancellationToken,
) -> Result<Vec<ProductRecord>> {
    let built = QueryBuilder::build(&config.filters).context("Invalid search filters")?;
    let client = SearchClient::new(http, config.settings.catalog_url()?);
    let outcome = client.collect(&built.query, cancel.clone()).await;

    if let Some(err) = outcome.error {
        if outcome.records.is_empty() {
            return Err(err).context("Search failed");
        }
        eprintln!(
            "Search stopped early after {} products: {err}",
            outcome.records.len()
        );
    }
    Ok(outcome.records)
}

async fn resolve(
    config: &Config,
    http: Http,
    source: Source,
    products: Vec<ProductRecord>,
    cancel: &CancellationToken,
) -> Result<ResolutionReport> {
    let settings = &config.settings;
    let concurrency = settings.concurrency()?;
    let report = match source {
        Source::S3 => {
            let provider = Provider::from_profile(
                &settings.s3_profile,
                &settings.s3_endpoint,
                settings.timeout(),
                settings.max_attempts,
            )
            .await;
            resolve_products(&provider, products, concurrency, cancel).await
        }
        Source::Odata => {
            let tokens = TokenManager::new(http, settings.token_url()?, &settings.client_id);
            let credentials = config.credentials()?;
            tokens
                .acquire(&credentials)
                .await
                .context("Unable to authenticate")?;
            let odata = ODataMetadataSource::new(tokens, settings.odata_url()?);
            resolve_products(&odata, products, concurrency, cancel).await
        }
    };
    Ok(report)
}

async fn plan(args: &PlanArgs, config: &Config, cancel: &CancellationToken) -> Result<TransferPlan> {
    let http = http_client(&config.settings)?;
    let products = search(config, http.clone(), cancel).await?;
    println!("Found {} products", products.len());

    let report = resolve(config, http, args.source, products, cancel).await?;
    println!("{}", report.summary());

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Creating {}", args.out_dir.display()))?;
    let plan = TransferPlan::from_report(&report, &args.out_dir, config.settings.concurrency()?);
    let plan_path = args
        .plan
        .clone()
        .unwrap_or_else(|| args.out_dir.join("transfer_plan.json"));
    plan.write(&plan_path)
        .with_context(|| format!("Writing {}", plan_path.display()))?;
    info!(path = %plan_path.display(), sources = plan.sources.len(), "Transfer plan written");
    Ok(plan)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init { path } => {
            init_tracing("info");
            Config::write_template(&path)?;
            println!("Wrote {}", path.display());
        }
        Command::Search { config } => {
            let config = read_config(&config)?;
            init_tracing(&config.settings.log_level);
            let cancel = cancel_on_ctrl_c();
            let http = http_client(&config.settings)?;
            let products = search(&config, http, &cancel).await?;
            for product in &products {
                println!("{}", product.title);
            }
            println!("{} products", products.len());
        }
        Command::Describe { collection, config } => {
            let settings = match config {
                Some(path) => read_config(&path)?.settings,
                None => Settings::default(),
            };
            init_tracing(&settings.log_level);
            let collection = collection.parse::<Collection>()?;
            let client = SearchClient::new(http_client(&settings)?, settings.catalog_url()?);
            let schema = client
                .describe(collection)
                .await
                .with_context(|| format!("Describing {collection}"))?;
            println!("{schema}");
        }
        Command::Plan(args) => {
            let config = read_config(&args.config)?;
            init_tracing(&config.settings.log_level);
            let cancel = cancel_on_ctrl_c();
            plan(&args, &config, &cancel).await?;
        }
        Command::Download(args) => {
            let config = read_config(&args.config)?;
            init_tracing(&config.settings.log_level);
            let cancel = cancel_on_ctrl_c();
            let plan = plan(&args, &config, &cancel).await?;

            if cancel.is_cancelled() {
                println!("Cancelled, transfer plan kept for a later run");
                return Ok(());
            }
            if plan.sources.is_empty() {
                println!("Nothing to download");
                return Ok(());
            }
            let transfer =
                RcloneTransfer::new(&config.settings.rclone_binary, &config.settings.rclone_remote);
            plan.execute(&transfer).await.context("Transfer failed")?;
            println!("Download complete");
        }
    }

    Ok(())
}
