//! acmclusters - ACM Digital Library scraper and topic clustering
//!
//! ## Usage
//!
//! ### Scrape last month's papers
//! ```bash
//! acmclusters scrape --range last-month
//! ```
//!
//! ### Cluster every range
//! ```bash
//! acmclusters cluster --all
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! acmclusters serve --port 3000
//! ```

use acmclusters::acm::{self, AcmScraper, ScrapeOptions, ScrapeReport};
use acmclusters::cleaner::Cleaner;
use acmclusters::clusters::{load_cluster_dataset, ClusterDataset};
use acmclusters::config::{ClusteringSettings, Settings};
use acmclusters::driver::{BrowserDriver, HtmlDriver, HttpSource, WebDriverSession};
use acmclusters::error::AcmError;
use acmclusters::papers::PaperStore;
use acmclusters::pipeline;
use acmclusters::store::CsvFeatureStore;
use acmclusters::time_range::TimeRange;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// ACM Digital Library scraper and abstract topic-clustering pipeline
#[derive(Parser)]
#[command(name = "acmclusters")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Feature store directory (overrides the settings file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape ACM DL papers published in a time range into the feature store
    Scrape {
        /// Time range to scrape
        #[arg(long, value_enum, default_value = "last-month")]
        range: TimeRange,

        /// Start from this listing URL instead of the generated one
        #[arg(long)]
        search_url: Option<String>,

        /// Browser driver
        #[arg(long, value_enum, default_value = "webdriver")]
        driver: DriverKind,
    },

    /// Cluster stored papers and save clusters and keywords
    Cluster {
        /// Time range to cluster
        #[arg(long, value_enum, required_unless_present = "all", conflicts_with = "all")]
        range: Option<TimeRange>,

        /// Cluster every time range
        #[arg(long)]
        all: bool,
    },

    /// Print the date window of a time range
    Window {
        #[arg(long, value_enum)]
        range: TimeRange,

        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Run as HTTP server exposing clustered datasets
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DriverKind {
    /// Chrome through a chromedriver endpoint
    Webdriver,
    /// Plain HTTP fetches, no JavaScript
    Static,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(store) = cli.store {
        settings.store_dir = store;
    }

    match cli.command {
        Commands::Scrape {
            range,
            search_url,
            driver,
        } => run_scrape(&settings, range, search_url, driver).await,
        Commands::Cluster { range, all } => {
            let ranges = if all {
                TimeRange::ALL.to_vec()
            } else {
                range.into_iter().collect()
            };
            run_cluster(&settings, &ranges).await
        }
        Commands::Window { range, today } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let window = range.window(today)?;
            println!("{}: {} to {}", range, window.start, window.end);
            Ok(())
        }
        Commands::Serve { port, host } => run_server(&settings, host, port).await,
    }
}

// ============================================================================
// Scrape
// ============================================================================

async fn run_scrape(
    settings: &Settings,
    range: TimeRange,
    search_url: Option<String>,
    driver: DriverKind,
) -> Result<()> {
    let window = range
        .window(Local::now().date_naive())
        .context("Failed to resolve time range")?;
    let url = match search_url {
        Some(url) => url,
        None => acm::search_url(acm::DEFAULT_ACM_URL, &window)?.to_string(),
    };
    info!(range = %range, start = %window.start, end = %window.end, "Scraping ACM DL");

    let store = CsvFeatureStore::connect(&settings.store_dir)
        .context("Failed to connect to feature store")?;
    let mut sink = PaperStore::open(&store)?;
    let options = ScrapeOptions::from(&settings.scraper);

    let report = match driver {
        DriverKind::Webdriver => {
            let session = WebDriverSession::start(
                &settings.scraper.webdriver_url,
                settings.scraper.headless,
            )
            .await
            .context("Failed to start browser session")?;
            crawl(session, options, &url, &mut sink).await?
        }
        DriverKind::Static => {
            let driver = HtmlDriver::new(HttpSource::new()?);
            crawl(driver, options, &url, &mut sink).await?
        }
    };

    println!(
        "Scraped {} papers from {} pages ({} skipped)",
        report.scraped, report.pages, report.skipped
    );
    Ok(())
}

/// Run one crawl and always release the browser session.
async fn crawl<D: BrowserDriver>(
    driver: D,
    options: ScrapeOptions,
    url: &str,
    sink: &mut PaperStore<'_, CsvFeatureStore>,
) -> Result<ScrapeReport> {
    let mut scraper = AcmScraper::new(driver, options);
    let result = scraper.scrape_into(url, sink).await;

    if let Err(e) = scraper.into_driver().quit().await {
        warn!(error = %e, "Failed to close browser session");
    }
    result.context("Scrape failed")
}

// ============================================================================
// Cluster
// ============================================================================

async fn run_cluster(settings: &Settings, ranges: &[TimeRange]) -> Result<()> {
    let store = CsvFeatureStore::connect(&settings.store_dir)
        .context("Failed to connect to feature store")?;
    let cleaner = Cleaner::from_settings(&settings.cleaning)
        .await
        .context("Failed to load language resources")?;
    let today = Local::now().date_naive();
    let settings = settings.clone();
    let ranges = ranges.to_vec();

    // eigen-decomposition and t-SNE are CPU bound
    tokio::task::spawn_blocking(move || -> Result<()> {
        for range in ranges {
            let dataset = pipeline::cluster_papers(&store, &cleaner, &settings, range, today)
                .with_context(|| format!("Clustering {} failed", range))?;

            println!("{}: {} papers", range, dataset.papers.len());
            for (cluster, topics) in dataset.topics.iter().enumerate() {
                println!("  cluster {}: {}", cluster, topics);
            }
        }
        Ok(())
    })
    .await
    .context("Clustering task failed")?
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(settings: &Settings, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");

    let store = CsvFeatureStore::connect(&settings.store_dir)
        .context("Failed to connect to feature store")?;
    let app_state = Arc::new(AppState {
        store,
        clustering: settings.clustering.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/clusters/{range}", get(clusters_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

struct AppState {
    store: CsvFeatureStore,
    clustering: ClusteringSettings,
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Clustered papers and topics of one time range
async fn clusters_handler(
    State(state): State<Arc<AppState>>,
    Path(range): Path<String>,
) -> std::result::Result<Json<ClusterDataset>, (StatusCode, String)> {
    let range: TimeRange = range
        .parse()
        .map_err(|e: AcmError| (StatusCode::BAD_REQUEST, e.to_string()))?;
    info!(range = %range, "Clusters request");

    let loaded =
        tokio::task::spawn_blocking(move || load_cluster_dataset(&state.store, range, &state.clustering))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match loaded {
        Ok(dataset) => Ok(Json(dataset)),
        Err(AcmError::Store(msg)) => Err((StatusCode::NOT_FOUND, msg)),
        Err(e) => {
            error!(error = %e, range = %range, "Failed to load clusters");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
