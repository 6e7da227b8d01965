//! TF-IDF vectorization and PCA reduction of cleaned abstracts.

use crate::config::VectorizerSettings;
use crate::error::{AcmError, Result};
use crate::linalg::symmetric_eigen;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Term-frequency / inverse-document-frequency vectorizer.
///
/// Tokens are runs of two or more word characters in lowercased text. The
/// vocabulary keeps the `max_features` most frequent terms across the corpus
/// and is ordered alphabetically. IDF is smoothed (`ln((1 + n) / (1 + df)) + 1`)
/// and every row is scaled to unit L2 norm.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    max_features: usize,
    token: Regex,
    vocabulary: Vec<String>,
    idf: Array1<f64>,
}

impl TfidfVectorizer {
    pub fn new(max_features: usize) -> Result<Self> {
        let token = Regex::new(r"\b\w\w+\b")
            .map_err(|e| AcmError::Config(format!("Invalid token pattern: {}", e)))?;
        Ok(Self {
            max_features,
            token,
            vocabulary: Vec::new(),
            idf: Array1::zeros(0),
        })
    }

    /// Terms of the fitted vocabulary, in column order
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    fn tokens<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.token.find_iter(text).map(|m| m.as_str()).collect()
    }

    /// Fit the vocabulary on `docs` and return their TF-IDF matrix, one row
    /// per document.
    pub fn fit_transform(&mut self, docs: &[String]) -> Result<Array2<f64>> {
        let lowered: Vec<String> = docs.iter().map(|d| d.to_lowercase()).collect();

        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &lowered {
            let mut seen: Vec<&str> = Vec::new();
            for token in self.tokens(doc) {
                *term_counts.entry(token).or_default() += 1;
                if !seen.contains(&token) {
                    seen.push(token);
                }
            }
            for token in seen {
                *doc_freq.entry(token).or_default() += 1;
            }
        }

        if term_counts.is_empty() {
            return Err(AcmError::InsufficientData(
                "empty vocabulary; abstracts contain no terms".into(),
            ));
        }

        let mut ranked: Vec<(&str, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.max_features);
        let mut vocabulary: Vec<String> = ranked.into_iter().map(|(t, _)| t.to_string()).collect();
        vocabulary.sort();

        let n = docs.len() as f64;
        self.idf = vocabulary
            .iter()
            .map(|t| {
                let df = doc_freq.get(t.as_str()).copied().unwrap_or(0) as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        self.vocabulary = vocabulary;
        debug!(terms = self.vocabulary.len(), "Fitted TF-IDF vocabulary");

        let index: HashMap<&str, usize> = self
            .vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let mut matrix: Array2<f64> = Array2::zeros((lowered.len(), self.vocabulary.len()));
        for (row, doc) in lowered.iter().enumerate() {
            for token in self.tokens(doc) {
                if let Some(&col) = index.get(token) {
                    matrix[[row, col]] += 1.0;
                }
            }
        }
        matrix *= &self.idf;
        for mut row in matrix.rows_mut() {
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|x| x / norm);
            }
        }
        Ok(matrix)
    }
}

/// How many principal components to keep
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Components {
    /// Smallest count whose cumulative explained variance exceeds the ratio
    VarianceRatio(f64),
    Fixed(usize),
}

/// Principal component analysis by eigen-decomposition.
///
/// Decomposes the Gram matrix when there are no more samples than features
/// and the scatter matrix otherwise. Component signs are fixed so that the
/// largest-magnitude score of each component is positive.
#[derive(Debug, Clone)]
pub struct Pca {
    components: Components,
    explained_variance_ratio: Vec<f64>,
}

impl Pca {
    pub fn new(components: Components) -> Self {
        Self {
            components,
            explained_variance_ratio: Vec::new(),
        }
    }

    /// Explained variance ratio of each kept component after fitting
    pub fn explained_variance_ratio(&self) -> &[f64] {
        &self.explained_variance_ratio
    }

    /// Project `rows` onto the kept components; one row per sample.
    pub fn fit_transform(&mut self, rows: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (n, d) = rows.dim();
        if n < 2 {
            return Err(AcmError::InsufficientData(format!(
                "PCA needs at least 2 samples, got {}",
                n
            )));
        }

        let means = rows
            .mean_axis(Axis(0))
            .ok_or_else(|| AcmError::InsufficientData("PCA input is empty".into()))?;
        let centered = &rows - &means;

        // eigenvalues are sums of squares; column c of `scores` holds every
        // sample's coordinate on component c
        let (values, scores) = if n <= d {
            let eig = symmetric_eigen(centered.dot(&centered.t()).view())?;
            let scale = eig.values.mapv(|l| l.max(0.0).sqrt());
            let scores = &eig.vectors * &scale;
            (eig.values, scores)
        } else {
            let eig = symmetric_eigen(centered.t().dot(&centered).view())?;
            let scores = centered.dot(&eig.vectors);
            (eig.values, scores)
        };

        let variances = values.mapv(|l| l.max(0.0) / (n - 1) as f64);
        let total = variances.sum();
        if total <= f64::EPSILON {
            return Err(AcmError::InsufficientData(
                "PCA input has zero variance".into(),
            ));
        }
        let ratios: Vec<f64> = variances.iter().map(|v| v / total).collect();
        let available = n.min(d);

        let keep = match self.components {
            Components::Fixed(k) => {
                if k == 0 || k > available {
                    return Err(AcmError::InsufficientData(format!(
                        "cannot keep {} components from {} samples of {} features",
                        k, n, d
                    )));
                }
                k
            }
            Components::VarianceRatio(target) => {
                let mut cumulative = 0.0;
                let below = ratios
                    .iter()
                    .take_while(|r| {
                        cumulative += *r;
                        cumulative <= target
                    })
                    .count();
                (below + 1).min(available)
            }
        };

        let mut kept = scores.slice(s![.., ..keep]).to_owned();
        for mut component in kept.columns_mut() {
            let pivot = component
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                component.mapv_inplace(|x| -x);
            }
        }
        self.explained_variance_ratio = ratios[..keep].to_vec();
        Ok(kept)
    }
}

/// TF-IDF followed by variance-retaining PCA; one row per abstract, in order.
pub fn vectorize_abstracts(
    cleaned: &[String],
    settings: &VectorizerSettings,
) -> Result<Array2<f64>> {
    let mut tfidf = TfidfVectorizer::new(settings.max_features)?;
    let vectors = tfidf.fit_transform(cleaned)?;

    let mut pca = Pca::new(Components::VarianceRatio(settings.variance_ratio));
    let reduced = pca.fit_transform(vectors.view())?;
    let retained: f64 = pca.explained_variance_ratio().iter().sum();
    info!(
        docs = cleaned.len(),
        terms = tfidf.vocabulary().len(),
        components = reduced.ncols(),
        retained = format!("{:.3}", retained),
        "Vectorized abstracts"
    );
    Ok(reduced)
}
