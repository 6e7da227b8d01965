//! Scraped paper records and the `acm_papers` dataset.

use crate::error::Result;
use crate::store::{DatasetSpec, FeatureStore};
use crate::time_range::TimeWindow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Raw papers dataset name
pub const PAPERS_DATASET: &str = "acm_papers";

/// Raw papers dataset version
pub const PAPERS_VERSION: u32 = 1;

/// One paper as extracted from its detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_date: NaiveDate,
    /// Formatted bibliographic string; the key once persisted
    pub citation: String,
}

/// Receives the papers of each finished listing page.
pub trait PaperSink {
    fn accept(&mut self, papers: &[Paper]) -> Result<()>;
}

impl PaperSink for Vec<Paper> {
    fn accept(&mut self, papers: &[Paper]) -> Result<()> {
        self.extend_from_slice(papers);
        Ok(())
    }
}

pub fn papers_dataset_spec() -> DatasetSpec {
    DatasetSpec::new(
        PAPERS_DATASET,
        PAPERS_VERSION,
        &["abstract", "publication_date", "citation"],
    )
    .description("Papers scraped from the ACM Digital Library")
    .primary_key(&["citation"])
    .event_time("publication_date")
}

/// Handle on the raw papers dataset.
pub struct PaperStore<'a, S> {
    store: &'a S,
    dataset: DatasetSpec,
}

impl<'a, S: FeatureStore> PaperStore<'a, S> {
    pub fn open(store: &'a S) -> Result<Self> {
        let dataset = store.get_or_create_dataset(papers_dataset_spec())?;
        Ok(Self { store, dataset })
    }

    pub fn save_papers(&self, papers: &[Paper]) -> Result<()> {
        if papers.is_empty() {
            return Ok(());
        }
        info!(count = papers.len(), "Saving papers to feature store");
        let total = self.store.insert(&self.dataset, papers, false)?;
        info!(total, "Papers saved");
        Ok(())
    }

    /// Stored papers published inside `window`, in storage order.
    pub fn papers_in(&self, window: &TimeWindow) -> Result<Vec<Paper>> {
        let papers: Vec<Paper> = self.store.read(&self.dataset)?;
        Ok(papers
            .into_iter()
            .filter(|p| window.contains(p.publication_date))
            .collect())
    }
}

impl<S: FeatureStore> PaperSink for PaperStore<'_, S> {
    fn accept(&mut self, papers: &[Paper]) -> Result<()> {
        self.save_papers(papers)
    }
}

#[cfg(test)]
pub(crate) fn paper(abstract_text: &str, date: (i32, u32, u32), citation: &str) -> Paper {
    Paper {
        abstract_text: abstract_text.to_string(),
        publication_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).expect("valid date"),
        citation: citation.to_string(),
    }
}
