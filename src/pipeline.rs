//! Clustering run for one time range: read papers, clean, vectorize,
//! cluster, embed, summarise, persist.

use crate::cleaner::Cleaner;
use crate::clusters::{save_clusters, ClusterDataset, ClusteredPaper};
use crate::config::Settings;
use crate::error::{AcmError, Result};
use crate::keywords::keywords_for_clusters;
use crate::kmeans::KMeans;
use crate::papers::PaperStore;
use crate::store::FeatureStore;
use crate::time_range::TimeRange;
use crate::tsne::Tsne;
use crate::vectorizer::vectorize_abstracts;
use chrono::NaiveDate;
use tracing::info;

/// Cluster the stored papers of `range` as of `today` and replace the
/// range's clustered datasets with the result.
pub fn cluster_papers<S: FeatureStore>(
    store: &S,
    cleaner: &Cleaner,
    settings: &Settings,
    range: TimeRange,
    today: NaiveDate,
) -> Result<ClusterDataset> {
    let window = range.window(today)?;
    let params = settings.clustering.for_range(range);
    info!(
        range = %range,
        start = %window.start,
        end = %window.end,
        clusters = params.clusters,
        "Clustering papers"
    );

    let papers = PaperStore::open(store)?.papers_in(&window)?;
    if papers.is_empty() {
        return Err(AcmError::InsufficientData(format!(
            "no stored papers between {} and {}",
            window.start, window.end
        )));
    }

    let cleaned = cleaner.clean(papers);
    let texts: Vec<String> = cleaned.iter().map(|c| c.cleaned_abstract.clone()).collect();
    let reduced = vectorize_abstracts(&texts, &settings.vectorizer)?;

    let clustering = &settings.clustering;
    let fit = KMeans::new(params.clusters, clustering.random_seed)
        .max_iter(clustering.kmeans_max_iter)
        .n_init(clustering.kmeans_n_init)
        .fit(reduced.view())?;
    info!(inertia = fit.inertia, iterations = fit.iterations, "Assigned clusters");

    let embedding = Tsne::new(params.perplexity, clustering.random_seed)
        .max_iter(clustering.tsne_max_iter)
        .fit_transform(reduced.view())?;

    let keywords = keywords_for_clusters(
        &texts,
        &fit.labels,
        params.clusters,
        params.top_n_keywords,
        clustering,
    )?;

    let papers = cleaned
        .into_iter()
        .zip(fit.labels)
        .zip(embedding)
        .map(|((c, label), coords)| ClusteredPaper::new(c.paper, c.cleaned_abstract, label, coords))
        .collect();
    let dataset = ClusterDataset::new(papers, keywords)?;
    save_clusters(store, &dataset, range, clustering)?;

    info!(range = %range, papers = dataset.papers.len(), "Clustering finished");
    Ok(dataset)
}
