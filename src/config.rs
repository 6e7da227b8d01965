//! Runtime settings.
//!
//! Settings are read from an optional JSON file; any field left out keeps its
//! default, so an empty `{}` file is a valid configuration.

use crate::error::{AcmError, Result};
use crate::time_range::TimeRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// spaCy English lemma lookup table
pub const DEFAULT_LEMMA_URL: &str = "https://raw.githubusercontent.com/explosion/spacy-lookups-data/master/spacy_lookups_data/data/en_lemma_lookup.json";

/// Default chromedriver endpoint
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory backing the feature store
    pub store_dir: PathBuf,
    pub scraper: ScraperSettings,
    pub cleaning: CleaningSettings,
    pub vectorizer: VectorizerSettings,
    pub clustering: ClusteringSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("feature_store"),
            scraper: ScraperSettings::default(),
            cleaning: CleaningSettings::default(),
            vectorizer: VectorizerSettings::default(),
            clustering: ClusteringSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    ///
    /// Headless mode is forced on inside GitHub Actions.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    AcmError::Config(format!("Cannot read config {:?}: {}", path, e))
                })?;
                let settings: Settings = serde_json::from_str(&content)?;
                info!("Loaded settings from {:?}", path);
                settings
            }
            None => {
                debug!("No config file given, using defaults");
                Settings::default()
            }
        };

        if std::env::var("GITHUB_ACTIONS").as_deref() == Ok("true") {
            settings.scraper.headless = true;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let v = &self.vectorizer;
        if v.max_features == 0 {
            return Err(AcmError::Config("vectorizer.max_features must be positive".into()));
        }
        if !(v.variance_ratio > 0.0 && v.variance_ratio < 1.0) {
            return Err(AcmError::Config(
                "vectorizer.variance_ratio must lie in (0, 1)".into(),
            ));
        }

        let c = &self.clustering;
        if !(c.keyword_max_df > 0.0 && c.keyword_max_df <= 1.0) {
            return Err(AcmError::Config("clustering.keyword_max_df must lie in (0, 1]".into()));
        }
        for range in TimeRange::ALL {
            let params = c.for_range(range);
            if params.clusters == 0 {
                return Err(AcmError::Config(format!("{}: clusters must be positive", range)));
            }
            if params.perplexity <= 0.0 {
                return Err(AcmError::Config(format!("{}: perplexity must be positive", range)));
            }
            if params.top_n_keywords == 0 {
                return Err(AcmError::Config(format!(
                    "{}: top_n_keywords must be positive",
                    range
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    pub webdriver_url: String,
    pub headless: bool,
    /// Budget for each bounded wait on page content
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// The export-citation link redirects to the home page when clicked too
    /// early, so every click is preceded by this pause.
    pub pre_click_delay_ms: u64,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: false,
            wait_timeout_secs: 10,
            poll_interval_ms: 250,
            pre_click_delay_ms: 1000,
        }
    }
}

impl ScraperSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pre_click_delay(&self) -> Duration {
        Duration::from_millis(self.pre_click_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningSettings {
    /// Local copy of the lemma table; fetched from `lemma_url` when missing
    pub lemma_path: Option<PathBuf>,
    pub lemma_url: String,
    /// Added to the standard English stop words
    pub custom_stop_words: Vec<String>,
}

impl Default for CleaningSettings {
    fn default() -> Self {
        Self {
            lemma_path: None,
            lemma_url: DEFAULT_LEMMA_URL.to_string(),
            custom_stop_words: crate::stop_words::CUSTOM_STOP_WORDS
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }
}

impl CleaningSettings {
    /// `lemma_path`, or `<cache dir>/acmclusters/en_lemma_lookup.json`
    pub fn resolved_lemma_path(&self) -> PathBuf {
        if let Some(path) = &self.lemma_path {
            return path.clone();
        }
        dirs::cache_dir()
            .map(|p| p.join("acmclusters"))
            .unwrap_or_else(|| PathBuf::from(".acmclusters"))
            .join("en_lemma_lookup.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerSettings {
    /// Vocabulary cap before reduction
    pub max_features: usize,
    /// Share of variance the reduced components must explain
    pub variance_ratio: f64,
}

impl Default for VectorizerSettings {
    fn default() -> Self {
        Self {
            max_features: 4096,
            variance_ratio: 0.95,
        }
    }
}

/// Empirical constants for one time range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeParams {
    pub clusters: usize,
    pub perplexity: f64,
    pub top_n_keywords: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringSettings {
    pub random_seed: u64,
    pub kmeans_max_iter: usize,
    pub kmeans_n_init: usize,
    pub tsne_max_iter: usize,
    /// Minimum number of documents a keyword must appear in
    pub keyword_min_df: usize,
    /// Maximum share of documents a keyword may appear in
    pub keyword_max_df: f64,
    pub lda_max_iter: usize,
    pub last_month: RangeParams,
    pub last_half_year: RangeParams,
    pub last_year: RangeParams,
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            random_seed: 42,
            kmeans_max_iter: 300,
            kmeans_n_init: 1,
            tsne_max_iter: 1000,
            keyword_min_df: 5,
            keyword_max_df: 0.9,
            lda_max_iter: 10,
            last_month: RangeParams {
                clusters: 3,
                perplexity: 5.0,
                top_n_keywords: 3,
            },
            last_half_year: RangeParams {
                clusters: 6,
                perplexity: 5.0,
                top_n_keywords: 3,
            },
            last_year: RangeParams {
                clusters: 11,
                perplexity: 50.0,
                top_n_keywords: 3,
            },
        }
    }
}

impl ClusteringSettings {
    pub fn for_range(&self, range: TimeRange) -> &RangeParams {
        match range {
            TimeRange::LastMonth => &self.last_month,
            TimeRange::LastHalfYear => &self.last_half_year,
            TimeRange::LastYear => &self.last_year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_cluster_table() {
        let c = ClusteringSettings::default();
        assert_eq!(c.for_range(TimeRange::LastMonth).clusters, 3);
        assert_eq!(c.for_range(TimeRange::LastHalfYear).clusters, 6);
        assert_eq!(c.for_range(TimeRange::LastYear).clusters, 11);
        assert_eq!(c.for_range(TimeRange::LastYear).perplexity, 50.0);
        assert_eq!(c.for_range(TimeRange::LastMonth).perplexity, 5.0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{"clustering": {{"last_month": {{"clusters": 4, "perplexity": 7.5, "top_n_keywords": 2}}}}}}"#
        )?;

        let settings = Settings::load(Some(file.path()))?;
        let params = settings.clustering.for_range(TimeRange::LastMonth);
        assert_eq!(params.clusters, 4);
        assert_eq!(params.perplexity, 7.5);
        assert_eq!(settings.clustering.for_range(TimeRange::LastYear).clusters, 11);
        assert_eq!(settings.vectorizer.max_features, 4096);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_clusters() {
        let mut settings = Settings::default();
        settings.clustering.last_half_year.clusters = 0;
        assert!(matches!(settings.validate(), Err(AcmError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = Settings::load(Some(Path::new("/nonexistent/acmclusters.json")));
        assert!(matches!(result, Err(AcmError::Config(_))));
    }
}
