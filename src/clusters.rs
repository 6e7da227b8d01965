//! Clustered papers, their keyword summaries, and the per-range datasets
//! they are persisted to.

use crate::config::ClusteringSettings;
use crate::error::{AcmError, Result};
use crate::papers::Paper;
use crate::store::{DatasetSpec, FeatureStore};
use crate::time_range::TimeRange;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CLUSTERS_VERSION: u32 = 1;

/// A paper with its cluster assignment and 2D coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteredPaper {
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_date: NaiveDate,
    pub citation: String,
    /// Token stream the clustering ran on; not persisted
    #[serde(default, skip_serializing)]
    pub cleaned_abstract: String,
    pub cluster: usize,
    pub x_coord: f64,
    pub y_coord: f64,
}

impl ClusteredPaper {
    pub fn new(paper: Paper, cleaned_abstract: String, cluster: usize, coords: [f64; 2]) -> Self {
        Self {
            abstract_text: paper.abstract_text,
            publication_date: paper.publication_date,
            citation: paper.citation,
            cleaned_abstract,
            cluster,
            x_coord: coords[0],
            y_coord: coords[1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KeywordRow {
    cluster: usize,
    keywords: String,
}

/// One clustering run for one time range.
///
/// `topics[c]` is the comma-joined keyword list of cluster `c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDataset {
    pub papers: Vec<ClusteredPaper>,
    pub topics: Vec<String>,
}

impl ClusterDataset {
    pub fn new(papers: Vec<ClusteredPaper>, keywords: Vec<Vec<String>>) -> Result<Self> {
        let dataset = Self {
            papers,
            topics: keywords.into_iter().map(|k| k.join(", ")).collect(),
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn cluster_count(&self) -> usize {
        self.topics.len()
    }

    /// Every paper's cluster id must index into `topics`.
    pub fn validate(&self) -> Result<()> {
        let k = self.cluster_count();
        if let Some(p) = self.papers.iter().find(|p| p.cluster >= k) {
            return Err(AcmError::Validation(format!(
                "paper {:?} has cluster {} but only {} topics exist",
                p.citation, p.cluster, k
            )));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), and the dataset must hold exactly
    /// `clusters` topics.
    pub fn validate_clusters(&self, clusters: usize) -> Result<()> {
        if self.topics.len() != clusters {
            return Err(AcmError::Validation(format!(
                "expected {} clusters, dataset has {} topics",
                clusters,
                self.topics.len()
            )));
        }
        self.validate()
    }

    /// Papers assigned to `cluster`, in dataset order.
    pub fn papers_in_cluster(&self, cluster: usize) -> impl Iterator<Item = &ClusteredPaper> {
        self.papers.iter().filter(move |p| p.cluster == cluster)
    }
}

pub fn clustered_dataset_spec(range: TimeRange) -> DatasetSpec {
    DatasetSpec::new(
        &format!("acm_papers_clustered_{}", range.slug()),
        CLUSTERS_VERSION,
        &["abstract", "publication_date", "citation", "cluster", "x_coord", "y_coord"],
    )
    .description("Clustered papers")
    .primary_key(&["citation"])
    .event_time("publication_date")
}

pub fn keywords_dataset_spec(range: TimeRange) -> DatasetSpec {
    DatasetSpec::new(
        &format!("acm_papers_cluster_keywords_{}", range.slug()),
        CLUSTERS_VERSION,
        &["cluster", "keywords"],
    )
    .description("The keywords for each cluster")
    .primary_key(&["cluster"])
}

/// Replace both datasets of `range` with `dataset`.
///
/// The dataset must have one topic per cluster configured for `range`.
pub fn save_clusters<S: FeatureStore>(
    store: &S,
    dataset: &ClusterDataset,
    range: TimeRange,
    settings: &ClusteringSettings,
) -> Result<()> {
    dataset.validate_clusters(settings.for_range(range).clusters)?;

    let papers = store.get_or_create_dataset(clustered_dataset_spec(range))?;
    let total = store.insert(&papers, &dataset.papers, true)?;
    info!(dataset = %papers.name, rows = total, "Saved clustered papers");

    let rows: Vec<KeywordRow> = dataset
        .topics
        .iter()
        .enumerate()
        .map(|(cluster, keywords)| KeywordRow {
            cluster,
            keywords: keywords.clone(),
        })
        .collect();
    let keywords = store.get_or_create_dataset(keywords_dataset_spec(range))?;
    store.insert(&keywords, &rows, true)?;
    info!(dataset = %keywords.name, clusters = rows.len(), "Saved cluster keywords");
    Ok(())
}

/// Read back the datasets of `range`, topics ordered by cluster id.
pub fn load_cluster_dataset<S: FeatureStore>(
    store: &S,
    range: TimeRange,
    settings: &ClusteringSettings,
) -> Result<ClusterDataset> {
    let papers_spec = clustered_dataset_spec(range);
    let keywords_spec = keywords_dataset_spec(range);
    let papers_ds = store.get_dataset(&papers_spec.name, papers_spec.version)?;
    let keywords_ds = store.get_dataset(&keywords_spec.name, keywords_spec.version)?;

    let papers: Vec<ClusteredPaper> = store.read(&papers_ds)?;
    let mut rows: Vec<KeywordRow> = store.read(&keywords_ds)?;
    rows.sort_by_key(|r| r.cluster);

    let dataset = ClusterDataset {
        papers,
        topics: rows.into_iter().map(|r| r.keywords).collect(),
    };
    dataset.validate_clusters(settings.for_range(range).clusters)?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::papers::paper;
    use crate::store::CsvFeatureStore;
    use tempfile::TempDir;

    fn dataset() -> Result<ClusterDataset> {
        ClusterDataset::new(
            vec![
                ClusteredPaper::new(paper("First, with comma.", (2024, 2, 1), "A. 2024."), "first comma".into(), 1, [0.5, -1.25]),
                ClusteredPaper::new(paper("Second.", (2024, 2, 9), "B. 2024."), "second".into(), 0, [3.0, 2.0]),
                ClusteredPaper::new(paper("Third.", (2024, 2, 20), "C. 2024."), "third".into(), 1, [-0.75, 0.0]),
            ],
            vec![
                vec!["graph".into(), "network".into()],
                vec![],
            ],
        )
    }

    /// Two clusters for every range
    fn two_clusters() -> ClusteringSettings {
        let mut settings = ClusteringSettings::default();
        settings.last_month.clusters = 2;
        settings.last_half_year.clusters = 2;
        settings.last_year.clusters = 2;
        settings
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let settings = two_clusters();
        let saved = dataset()?;
        save_clusters(&store, &saved, TimeRange::LastMonth, &settings)?;

        let loaded = load_cluster_dataset(&store, TimeRange::LastMonth, &settings)?;
        assert_eq!(loaded.topics, vec!["graph, network".to_string(), String::new()]);
        assert_eq!(loaded.papers.len(), 3);
        assert_eq!(loaded.papers[0].abstract_text, "First, with comma.");
        assert_eq!(loaded.papers[0].cluster, 1);
        assert_eq!(loaded.papers[0].x_coord, 0.5);
        assert!(loaded.papers.iter().all(|p| p.cleaned_abstract.is_empty()));
        assert_eq!(loaded.papers_in_cluster(1).count(), 2);

        assert!(dir.path().join("acm_papers_clustered_last_month_1.csv").exists());
        assert!(dir.path().join("acm_papers_cluster_keywords_last_month_1.csv").exists());
        Ok(())
    }

    #[test]
    fn test_overwrite_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let settings = two_clusters();
        let data = dataset()?;

        save_clusters(&store, &data, TimeRange::LastYear, &settings)?;
        let once = load_cluster_dataset(&store, TimeRange::LastYear, &settings)?;
        save_clusters(&store, &data, TimeRange::LastYear, &settings)?;
        let twice = load_cluster_dataset(&store, TimeRange::LastYear, &settings)?;

        assert_eq!(once, twice);
        assert_eq!(twice.papers.len(), 3);
        assert_eq!(twice.topics.len(), 2);
        Ok(())
    }

    #[test]
    fn test_ranges_do_not_share_datasets() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let settings = two_clusters();
        save_clusters(&store, &dataset()?, TimeRange::LastHalfYear, &settings)?;
        assert!(load_cluster_dataset(&store, TimeRange::LastMonth, &settings).is_err());
        Ok(())
    }

    #[test]
    fn test_cluster_id_out_of_range() {
        let papers = vec![ClusteredPaper::new(paper("x", (2024, 1, 1), "c"), String::new(), 2, [0.0, 0.0])];
        let result = ClusterDataset::new(papers, vec![vec![], vec![]]);
        assert!(matches!(result, Err(AcmError::Validation(_))));
    }

    #[test]
    fn test_topic_count_must_match_configured_clusters() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let data = dataset()?;

        // the default table has 3 clusters for the last month
        let defaults = ClusteringSettings::default();
        let result = save_clusters(&store, &data, TimeRange::LastMonth, &defaults);
        assert!(matches!(result, Err(AcmError::Validation(_))));

        save_clusters(&store, &data, TimeRange::LastMonth, &two_clusters())?;
        let result = load_cluster_dataset(&store, TimeRange::LastMonth, &defaults);
        assert!(matches!(result, Err(AcmError::Validation(_))));
        Ok(())
    }
}
