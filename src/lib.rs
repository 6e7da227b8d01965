//! # acmclusters
//!
//! ACM Digital Library scraper and abstract topic-clustering pipeline.
//!
//! ## Modules
//!
//! - [`acm`] - Paginated crawl of ACM DL search listings
//! - [`driver`] - Browser automation (WebDriver sessions, static HTML)
//! - [`store`] - Feature store of named, keyed datasets
//! - [`papers`] - Scraped papers and the `acm_papers` dataset
//! - [`cleaner`] - Abstract de-duplication, lemmatization and filtering
//! - [`vectorizer`] - TF-IDF and PCA
//! - [`kmeans`], [`tsne`], [`keywords`] - Clustering, 2D embedding, topic keywords
//! - [`clusters`] - Clustered datasets per time range
//! - [`pipeline`] - One clustering run
//! - [`config`] - Runtime settings
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use acmclusters::{cleaner::Cleaner, config::Settings, pipeline, store::CsvFeatureStore};
//! use acmclusters::time_range::TimeRange;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::default();
//!     let store = CsvFeatureStore::connect(&settings.store_dir)?;
//!     let cleaner = Cleaner::from_settings(&settings.cleaning).await?;
//!     let today = chrono::Local::now().date_naive();
//!     let clusters = pipeline::cluster_papers(&store, &cleaner, &settings, TimeRange::LastMonth, today)?;
//!     println!("{} papers in {} clusters", clusters.papers.len(), clusters.topics.len());
//!     Ok(())
//! }
//! ```

pub mod acm;
pub mod cleaner;
pub mod clusters;
pub mod config;
pub mod driver;
pub mod error;
pub mod keywords;
pub mod kmeans;
pub mod linalg;
pub mod papers;
pub mod pipeline;
pub mod stop_words;
pub mod store;
pub mod time_range;
pub mod tsne;
pub mod vectorizer;

pub use error::{AcmError, Result};
