//! Abstract cleaning: de-duplication, artifact removal, lemmatization and
//! stop-word filtering.

use crate::config::CleaningSettings;
use crate::error::{AcmError, Result};
use crate::papers::Paper;
use crate::stop_words::ENGLISH_STOP_WORDS;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Heading text the scraper picks up in front of abstracts
pub const SCRAPING_ARTIFACT: &str = "Abstract\n";

/// A token equal to any substring of this is treated as punctuation.
const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

/// Word-to-lemma lookup table.
///
/// Words missing from the table are their own lemma.
#[derive(Debug, Clone, Default)]
pub struct Lemmatizer {
    table: HashMap<String, String>,
}

impl Lemmatizer {
    pub fn from_table(table: HashMap<String, String>) -> Self {
        Self { table }
    }

    /// Read a JSON `{ "word": "lemma" }` table.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AcmError::ResourceUnavailable(format!("Cannot read lemma table {:?}: {}", path, e))
        })?;
        let table: HashMap<String, String> = serde_json::from_str(&content).map_err(|e| {
            AcmError::ResourceUnavailable(format!("Invalid lemma table {:?}: {}", path, e))
        })?;
        info!("Loaded {} lemmas from {:?}", table.len(), path);
        Ok(Self { table })
    }

    /// Load the table at `path`, downloading it from `url` once if it is
    /// missing or unreadable. A failed download is fatal.
    pub async fn load_or_fetch(path: &Path, url: &str) -> Result<Self> {
        if path.exists() {
            match Self::load(path) {
                Ok(lemmatizer) => return Ok(lemmatizer),
                Err(e) => warn!(error = %e, "Lemma table unusable, downloading again"),
            }
        }

        info!(url, "Downloading lemma table");
        let body = fetch_resource(url).await.map_err(|e| {
            AcmError::ResourceUnavailable(format!("Cannot download lemma table from {}: {}", url, e))
        })?;
        let table: HashMap<String, String> = serde_json::from_str(&body).map_err(|e| {
            AcmError::ResourceUnavailable(format!("Invalid lemma table from {}: {}", url, e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = std::fs::write(path, &body) {
            warn!("Failed to cache lemma table at {:?}: {}", path, e);
        } else {
            info!("Lemma table cached at {:?}", path);
        }

        Ok(Self { table })
    }

    pub fn lemma(&self, word: &str) -> String {
        if let Some(lemma) = self.table.get(word) {
            return lemma.clone();
        }
        let lower = word.to_lowercase();
        self.table.get(&lower).cloned().unwrap_or(lower)
    }
}

async fn fetch_resource(url: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| AcmError::Config(format!("Failed to build HTTP client: {}", e)))?;
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AcmError::ResourceUnavailable(format!("HTTP error: {}", status)));
    }
    Ok(response.text().await?)
}

/// A paper with its cleaned token stream
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedPaper {
    /// The paper, artifact prefix removed from its abstract
    pub paper: Paper,
    /// Lemmatized, lowercased, filtered tokens joined by single spaces
    pub cleaned_abstract: String,
}

/// Drop papers whose abstract repeats an earlier one; first occurrence wins.
pub fn dedup_by_abstract(papers: Vec<Paper>) -> Vec<Paper> {
    let mut seen = HashSet::new();
    papers
        .into_iter()
        .filter(|p| seen.insert(p.abstract_text.clone()))
        .collect()
}

/// Remove leading "Abstract\n" headings.
pub fn strip_artifact(text: &str) -> &str {
    let mut text = text;
    while let Some(rest) = text.strip_prefix(SCRAPING_ARTIFACT) {
        text = rest;
    }
    text
}

pub struct Cleaner {
    lemmatizer: Lemmatizer,
    stop_words: HashSet<String>,
    token: Regex,
}

impl Cleaner {
    pub fn new(lemmatizer: Lemmatizer, custom_stop_words: &[String]) -> Result<Self> {
        let stop_words = ENGLISH_STOP_WORDS
            .iter()
            .map(|w| w.to_string())
            .chain(custom_stop_words.iter().map(|w| w.to_lowercase()))
            .collect();
        // clitics ('s, n't) and single punctuation marks are tokens of their own
        let token = Regex::new(r"[’'][A-Za-z]+|\w+|[^\w\s]")
            .map_err(|e| AcmError::Config(format!("Invalid token pattern: {}", e)))?;
        Ok(Self {
            lemmatizer,
            stop_words,
            token,
        })
    }

    /// Build a cleaner, fetching the lemma table if needed.
    pub async fn from_settings(settings: &CleaningSettings) -> Result<Self> {
        let path = settings.resolved_lemma_path();
        let lemmatizer = Lemmatizer::load_or_fetch(&path, &settings.lemma_url).await?;
        Self::new(lemmatizer, &settings.custom_stop_words)
    }

    pub fn clean_text(&self, text: &str) -> String {
        self.token
            .find_iter(text)
            .map(|m| self.lemmatizer.lemma(m.as_str()).to_lowercase().trim().to_string())
            .filter(|word| !self.stop_words.contains(word) && !PUNCTUATION.contains(word.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// De-duplicate, strip artifacts and clean every abstract, preserving order.
    pub fn clean(&self, papers: Vec<Paper>) -> Vec<CleanedPaper> {
        let total = papers.len();
        let papers = dedup_by_abstract(papers);
        info!(
            total,
            unique = papers.len(),
            "Cleaning abstracts"
        );

        papers
            .into_iter()
            .enumerate()
            .map(|(i, mut paper)| {
                paper.abstract_text = strip_artifact(&paper.abstract_text).to_string();
                let cleaned_abstract = self.clean_text(&paper.abstract_text);
                if (i + 1) % 100 == 0 {
                    debug!(done = i + 1, "Cleaned abstracts");
                }
                CleanedPaper {
                    paper,
                    cleaned_abstract,
                }
            })
            .collect()
    }
}
