//! Per-cluster keyword extraction.
//!
//! Each cluster's cleaned abstracts are counted with a document-frequency
//! filtered bag of words, a topic model is fitted on the counts, and the top
//! terms of every topic are merged into one keyword list for the cluster.

use crate::config::ClusteringSettings;
use crate::error::{AcmError, Result};
use crate::stop_words::ENGLISH_STOP_WORDS;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Sparse document-term counts over a sorted vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct DocTermMatrix {
    pub vocabulary: Vec<String>,
    /// `(term index, count)` pairs per document, term indices ascending
    pub rows: Vec<Vec<(usize, f64)>>,
}

/// Bag-of-words counter keeping terms present in at least `min_df` documents
/// and at most a `max_df` share of them.
#[derive(Debug, Clone)]
pub struct CountVectorizer {
    min_df: usize,
    max_df: f64,
    token: Regex,
    stop_words: HashSet<&'static str>,
}

impl CountVectorizer {
    pub fn new(min_df: usize, max_df: f64) -> Result<Self> {
        let token = Regex::new(r"[a-zA-Z-][a-zA-Z-]{2,}")
            .map_err(|e| AcmError::Config(format!("Invalid token pattern: {}", e)))?;
        Ok(Self {
            min_df,
            max_df,
            token,
            stop_words: ENGLISH_STOP_WORDS.iter().copied().collect(),
        })
    }

    pub fn fit_transform(&self, docs: &[&str]) -> Result<DocTermMatrix> {
        let counted: Vec<BTreeMap<String, f64>> = docs
            .iter()
            .map(|doc| {
                let lowered = doc.to_lowercase();
                let mut counts = BTreeMap::new();
                for m in self.token.find_iter(&lowered) {
                    if !self.stop_words.contains(m.as_str()) {
                        *counts.entry(m.as_str().to_string()).or_insert(0.0) += 1.0;
                    }
                }
                counts
            })
            .collect();

        let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
        for counts in &counted {
            for term in counts.keys() {
                *doc_freq.entry(term.as_str()).or_default() += 1;
            }
        }
        if doc_freq.is_empty() {
            return Err(AcmError::InsufficientData(
                "empty vocabulary; documents contain only stop words".into(),
            ));
        }

        let max_doc_count = self.max_df * docs.len() as f64;
        if max_doc_count < self.min_df as f64 {
            return Err(AcmError::InsufficientData(format!(
                "max_df allows {:.1} documents, fewer than min_df {}",
                max_doc_count, self.min_df
            )));
        }

        let vocabulary: Vec<String> = doc_freq
            .into_iter()
            .filter(|&(_, df)| df >= self.min_df && df as f64 <= max_doc_count)
            .map(|(term, _)| term.to_string())
            .collect();
        if vocabulary.is_empty() {
            return Err(AcmError::InsufficientData(
                "no terms remain after document-frequency pruning".into(),
            ));
        }

        let index: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();
        let rows = counted
            .iter()
            .map(|counts| {
                counts
                    .iter()
                    .filter_map(|(term, &c)| index.get(term.as_str()).map(|&i| (i, c)))
                    .collect()
            })
            .collect();

        Ok(DocTermMatrix { vocabulary, rows })
    }
}

/// Latent Dirichlet allocation fitted by online variational Bayes.
///
/// Priors on document-topic and topic-word distributions are both
/// `1 / n_topics`.
#[derive(Debug, Clone)]
pub struct Lda {
    n_topics: usize,
    max_iter: usize,
    batch_size: usize,
    learning_offset: f64,
    learning_decay: f64,
    mean_change_tol: f64,
    max_doc_update_iter: usize,
    seed: u64,
    components: Array2<f64>,
}

impl Lda {
    pub fn new(n_topics: usize, seed: u64) -> Self {
        Self {
            n_topics: n_topics.max(1),
            max_iter: 10,
            batch_size: 128,
            learning_offset: 10.0,
            learning_decay: 0.7,
            mean_change_tol: 1e-3,
            max_doc_update_iter: 100,
            seed,
            components: Array2::zeros((0, 0)),
        }
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Unnormalised topic-word weights, one row per topic
    pub fn components(&self) -> ArrayView2<f64> {
        self.components.view()
    }

    pub fn fit(&mut self, data: &DocTermMatrix) -> Result<()> {
        let n_docs = data.rows.len();
        let n_terms = data.vocabulary.len();
        if n_docs == 0 || n_terms == 0 {
            return Err(AcmError::InsufficientData("topic model needs documents and terms".into()));
        }

        let prior = 1.0 / self.n_topics as f64;
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.components = Array2::from_shape_fn((self.n_topics, n_terms), |_| gamma_100(&mut rng));
        let mut exp_topic_word = exp_dirichlet_expectation(&self.components);
        let mut batch_iter = 1.0;

        for _ in 0..self.max_iter {
            for batch in data.rows.chunks(self.batch_size) {
                let stats = self.e_step(batch, &exp_topic_word, prior, &mut rng);

                let weight = (self.learning_offset + batch_iter).powf(-self.learning_decay);
                let doc_ratio = n_docs as f64 / batch.len() as f64;
                let target = (&stats * &exp_topic_word).mapv(|sstat| prior + doc_ratio * sstat);
                self.components
                    .zip_mut_with(&target, |value, &t| *value = (1.0 - weight) * *value + weight * t);
                exp_topic_word = exp_dirichlet_expectation(&self.components);
                batch_iter += 1.0;
            }
        }
        debug!(topics = self.n_topics, terms = n_terms, docs = n_docs, "Fitted topic model");
        Ok(())
    }

    /// Variational update of each document's topic mix; returns the
    /// sufficient statistics for the topic-word update.
    fn e_step(
        &self,
        batch: &[Vec<(usize, f64)>],
        exp_topic_word: &Array2<f64>,
        prior: f64,
        rng: &mut StdRng,
    ) -> Array2<f64> {
        let k = self.n_topics;
        let mut stats: Array2<f64> = Array2::zeros(exp_topic_word.raw_dim());

        let initial: Vec<Vec<f64>> = batch
            .iter()
            .map(|_| (0..k).map(|_| gamma_100(rng)).collect())
            .collect();

        for (doc, init) in batch.iter().zip(initial) {
            let mut doc_topic = init;
            let mut exp_doc_topic = exp_dirichlet_expectation_row(&doc_topic);

            for _ in 0..self.max_doc_update_iter {
                let last = doc_topic.clone();
                let norm_phi = norm_phi(doc, &exp_doc_topic, exp_topic_word);
                for t in 0..k {
                    let s: f64 = doc
                        .iter()
                        .zip(&norm_phi)
                        .map(|(&(term, count), &phi)| count / phi * exp_topic_word[[t, term]])
                        .sum();
                    doc_topic[t] = exp_doc_topic[t] * s + prior;
                }
                exp_doc_topic = exp_dirichlet_expectation_row(&doc_topic);

                let change = last
                    .iter()
                    .zip(&doc_topic)
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    / k as f64;
                if change < self.mean_change_tol {
                    break;
                }
            }

            let norm_phi = norm_phi(doc, &exp_doc_topic, exp_topic_word);
            for t in 0..k {
                for (&(term, count), &phi) in doc.iter().zip(&norm_phi) {
                    stats[[t, term]] += exp_doc_topic[t] * count / phi;
                }
            }
        }
        stats
    }
}

fn norm_phi(doc: &[(usize, f64)], exp_doc_topic: &[f64], exp_topic_word: &Array2<f64>) -> Vec<f64> {
    doc.iter()
        .map(|&(term, _)| {
            exp_doc_topic
                .iter()
                .zip(exp_topic_word.column(term))
                .map(|(d, w)| d * w)
                .sum::<f64>()
                + f64::EPSILON
        })
        .collect()
}

/// Gamma(shape 100, scale 0.01) draw as a sum of exponentials
fn gamma_100(rng: &mut StdRng) -> f64 {
    let sum: f64 = (0..100)
        .map(|_| -(1.0 - rng.gen::<f64>()).ln())
        .sum();
    sum * 0.01
}

fn exp_dirichlet_expectation_row(alpha: &[f64]) -> Vec<f64> {
    let total = digamma(alpha.iter().sum());
    alpha.iter().map(|&a| (digamma(a) - total).exp()).collect()
}

/// Row-wise `exp(E[log X])` for Dirichlet parameters in each row
fn exp_dirichlet_expectation(matrix: &Array2<f64>) -> Array2<f64> {
    let totals: Array1<f64> = matrix.sum_axis(Axis(1)).mapv(digamma);
    let mut out = matrix.mapv(digamma);
    for (mut row, &total) in out.rows_mut().into_iter().zip(totals.iter()) {
        row.mapv_inplace(|v| (v - total).exp());
    }
    out
}

/// Digamma by upward recurrence and the asymptotic series
pub(crate) fn digamma(x: f64) -> f64 {
    let mut x = x;
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln() - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}

/// Top `top_n` terms of every topic, de-duplicated across topics (first
/// occurrence keeps its weight), heaviest first.
pub fn selected_topics(components: ArrayView2<f64>, vocabulary: &[String], top_n: usize) -> Vec<String> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut keywords: Vec<(usize, f64)> = Vec::new();

    for topic in components.rows() {
        let mut order: Vec<usize> = (0..topic.len()).collect();
        order.sort_by(|&a, &b| topic[b].total_cmp(&topic[a]));
        for &term in order.iter().take(top_n) {
            if seen.insert(term) {
                keywords.push((term, topic[term]));
            }
        }
    }

    keywords.sort_by(|a, b| a.1.total_cmp(&b.1));
    keywords.reverse();
    keywords
        .into_iter()
        .filter_map(|(term, _)| vocabulary.get(term).cloned())
        .collect()
}

/// Keyword list for every cluster id in `0..k`.
///
/// A cluster whose abstracts cannot support the bag of words gets an empty
/// list; the run carries on.
pub fn keywords_for_clusters(
    cleaned: &[String],
    labels: &[usize],
    k: usize,
    top_n: usize,
    settings: &ClusteringSettings,
) -> Result<Vec<Vec<String>>> {
    let counter = CountVectorizer::new(settings.keyword_min_df, settings.keyword_max_df)?;
    let mut all = Vec::with_capacity(k);

    for cluster in 0..k {
        let docs: Vec<&str> = cleaned
            .iter()
            .zip(labels)
            .filter(|&(_, &l)| l == cluster)
            .map(|(d, _)| d.as_str())
            .collect();

        let counts = match counter.fit_transform(&docs) {
            Ok(counts) => counts,
            Err(e) => {
                warn!(cluster, docs = docs.len(), error = %e, "Not enough instances in cluster");
                all.push(Vec::new());
                continue;
            }
        };

        let mut lda = Lda::new(k, settings.random_seed).max_iter(settings.lda_max_iter);
        lda.fit(&counts)?;
        let keywords = selected_topics(lda.components(), &counts.vocabulary, top_n);
        info!(cluster, keywords = ?keywords, "Cluster topics");
        all.push(keywords);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn corpus() -> Vec<String> {
        let mut docs = Vec::new();
        for i in 0..6 {
            docs.push(format!("graph neural network embedding node-level {}", "graph ".repeat(i % 3)));
            docs.push(format!("protein folding structure prediction {}", "protein ".repeat(i % 2)));
        }
        docs
    }

    #[test]
    fn test_digamma_known_values() {
        // psi(1) = -euler_gamma, psi(0.5) = -euler_gamma - 2 ln 2
        let euler = 0.577_215_664_901_532_9;
        assert!((digamma(1.0) + euler).abs() < 1e-10);
        assert!((digamma(0.5) + euler + 2.0 * 2.0_f64.ln()).abs() < 1e-10);
        assert!((digamma(10.0) - 2.251_752_589_066_721).abs() < 1e-10);
    }

    #[test]
    fn test_count_vectorizer_filters_by_document_frequency() -> Result<()> {
        let docs = corpus();
        let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
        let counts = CountVectorizer::new(5, 0.9)?.fit_transform(&refs)?;

        // every term is in exactly 6 of 12 documents
        assert_eq!(
            counts.vocabulary,
            vec![
                "embedding", "folding", "graph", "network", "neural", "node-level", "prediction",
                "protein", "structure"
            ]
        );
        assert_eq!(counts.rows.len(), 12);
        let graph = 2;
        let first: HashMap<usize, f64> = counts.rows[0].iter().copied().collect();
        assert_eq!(first.get(&graph), Some(&1.0));
        let fifth: HashMap<usize, f64> = counts.rows[4].iter().copied().collect();
        assert_eq!(fifth.get(&graph), Some(&3.0));
        Ok(())
    }

    #[test]
    fn test_count_vectorizer_rejects_small_clusters() -> Result<()> {
        let counter = CountVectorizer::new(5, 0.9)?;
        assert!(matches!(
            counter.fit_transform(&["graph network", "graph model", "graph data"]),
            Err(AcmError::InsufficientData(_))
        ));
        assert!(matches!(
            counter.fit_transform(&["the of and"; 10]),
            Err(AcmError::InsufficientData(_))
        ));
        Ok(())
    }

    #[test]
    fn test_selected_topics_dedupes_and_orders() {
        let vocabulary: Vec<String> = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let components = array![[5.0, 4.0, 1.0, 0.5], [0.1, 9.0, 3.0, 2.0]];
        let keywords = selected_topics(components.view(), &vocabulary, 2);
        // beta keeps its first-seen weight (4.0)
        assert_eq!(keywords, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_lda_is_seeded() -> Result<()> {
        let docs = corpus();
        let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
        let counts = CountVectorizer::new(2, 1.0)?.fit_transform(&refs)?;

        let mut a = Lda::new(2, 42);
        a.fit(&counts)?;
        let mut b = Lda::new(2, 42);
        b.fit(&counts)?;
        assert_eq!(a.components(), b.components());
        assert_eq!(a.components().dim(), (2, counts.vocabulary.len()));
        assert!(a.components().iter().all(|w| *w > 0.0 && w.is_finite()));
        Ok(())
    }

    #[test]
    fn test_keywords_for_every_cluster() -> Result<()> {
        let mut docs = corpus();
        docs.push("tiny".to_string());
        let mut labels: Vec<usize> = vec![0; 12];
        labels.push(1);

        let settings = ClusteringSettings::default();
        let keywords = keywords_for_clusters(&docs, &labels, 2, 3, &settings)?;
        assert_eq!(keywords.len(), 2);
        assert!(!keywords[0].is_empty() && keywords[0].len() <= 6);
        let unique: HashSet<&String> = keywords[0].iter().collect();
        assert_eq!(unique.len(), keywords[0].len());
        assert!(keywords[1].is_empty());
        Ok(())
    }
}
