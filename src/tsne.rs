//! Exact t-SNE embedding into two dimensions.
//!
//! Joint probabilities come from a per-point binary search on the Gaussian
//! bandwidth matching the requested perplexity. The embedding starts from the
//! first two principal components scaled to a standard deviation of 1e-4 and
//! is optimised by gradient descent with momentum and per-coordinate gains,
//! exaggerating P for the first 250 iterations.

use crate::error::{AcmError, Result};
use crate::linalg::pairwise_squared_distances;
use crate::vectorizer::{Components, Pca};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

const EXPLORATION_ITER: usize = 250;
const EARLY_EXAGGERATION: f64 = 12.0;
const MIN_GAIN: f64 = 0.01;
const MIN_GRAD_NORM: f64 = 1e-7;
const PERPLEXITY_TOL: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;

#[derive(Debug, Clone)]
pub struct Tsne {
    perplexity: f64,
    max_iter: usize,
    seed: u64,
}

impl Tsne {
    pub fn new(perplexity: f64, seed: u64) -> Self {
        Self {
            perplexity,
            max_iter: 1000,
            seed,
        }
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(EXPLORATION_ITER + 1);
        self
    }

    /// Embed `rows` into 2D; one `[x, y]` per row, in order.
    pub fn fit_transform(&self, rows: ArrayView2<f64>) -> Result<Vec<[f64; 2]>> {
        let n = rows.nrows();
        if self.perplexity <= 0.0 {
            return Err(AcmError::Validation("perplexity must be positive".into()));
        }
        if self.perplexity >= n as f64 {
            return Err(AcmError::InsufficientData(format!(
                "perplexity {} must be less than the {} samples",
                self.perplexity, n
            )));
        }

        let p = self.joint_probabilities(rows);
        let mut y = self.initial_embedding(rows);
        let learning_rate = (n as f64 / EARLY_EXAGGERATION / 4.0).max(50.0);

        let mut update: Array2<f64> = Array2::zeros((n, 2));
        let mut gains: Array2<f64> = Array2::ones((n, 2));
        let mut iterations = 0;

        for iteration in 0..self.max_iter {
            iterations = iteration + 1;
            let (exaggeration, momentum) = if iteration < EXPLORATION_ITER {
                (EARLY_EXAGGERATION, 0.5)
            } else {
                (1.0, 0.8)
            };

            let grad = gradient(p.view(), y.view(), exaggeration);
            for ((gain, step), &g) in gains.iter_mut().zip(update.iter_mut()).zip(grad.iter()) {
                if *step * g < 0.0 {
                    *gain += 0.2;
                } else {
                    *gain *= 0.8;
                }
                *gain = gain.max(MIN_GAIN);
                *step = momentum * *step - learning_rate * *gain * g;
            }
            y += &update;

            let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if iteration % 50 == 49 {
                debug!(iteration = iteration + 1, grad_norm, "t-SNE progress");
            }
            if grad_norm < MIN_GRAD_NORM {
                debug!(iteration = iteration + 1, "t-SNE gradient vanished");
                break;
            }
        }

        info!(
            samples = n,
            perplexity = self.perplexity,
            iterations,
            kl = kl_divergence(p.view(), y.view()),
            "Computed 2D embedding"
        );
        Ok(y.rows().into_iter().map(|r| [r[0], r[1]]).collect())
    }

    /// Symmetrised, normalised P matrix
    fn joint_probabilities(&self, rows: ArrayView2<f64>) -> Array2<f64> {
        let n = rows.nrows();
        let distances = pairwise_squared_distances(rows);
        let target_entropy = self.perplexity.ln();

        let mut conditional: Array2<f64> = Array2::zeros((n, n));
        for i in 0..n {
            let row = Array1::from(conditional_row(distances.row(i), i, target_entropy));
            conditional.row_mut(i).assign(&row);
        }

        let mut p = &conditional + &conditional.t();
        let total = p.sum();
        p.mapv_inplace(|v| (v / total).max(f64::EPSILON));
        p
    }

    fn initial_embedding(&self, rows: ArrayView2<f64>) -> Array2<f64> {
        match Pca::new(Components::Fixed(2)).fit_transform(rows) {
            Ok(scores) => {
                let std = scores.column(0).std(0.0);
                let scale = if std > 0.0 { 1e-4 / std } else { 1.0 };
                scores * scale
            }
            Err(e) => {
                warn!(error = %e, "PCA initialisation unavailable, using random start");
                let mut rng = StdRng::seed_from_u64(self.seed);
                Array2::from_shape_fn((rows.nrows(), 2), |_| gaussian(&mut rng) * 1e-4)
            }
        }
    }
}

/// Conditional probabilities p(j|i) whose entropy matches `target_entropy`.
fn conditional_row(distances: ArrayView1<f64>, i: usize, target_entropy: f64) -> Vec<f64> {
    let n = distances.len();
    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut row = vec![0.0; n];

    for _ in 0..PERPLEXITY_STEPS {
        let mut sum = 0.0;
        for j in 0..n {
            row[j] = if j == i { 0.0 } else { (-distances[j] * beta).exp() };
            sum += row[j];
        }
        if sum == 0.0 {
            sum = f64::EPSILON;
        }

        let mut weighted = 0.0;
        for j in 0..n {
            row[j] /= sum;
            weighted += distances[j] * row[j];
        }
        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - target_entropy;
        if diff.abs() <= PERPLEXITY_TOL {
            break;
        }

        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
        }
    }
    row
}

/// Student-t kernel `1 / (1 + |y_i - y_j|^2)` with a zero diagonal
fn student_kernel(y: ArrayView2<f64>) -> Array2<f64> {
    let mut num = pairwise_squared_distances(y).mapv(|d| 1.0 / (1.0 + d));
    num.diag_mut().fill(0.0);
    num
}

/// KL gradient with Student-t similarities in the embedding
fn gradient(p: ArrayView2<f64>, y: ArrayView2<f64>, exaggeration: f64) -> Array2<f64> {
    let num = student_kernel(y);
    let sum = num.sum();

    let mut weights: Array2<f64> = Array2::zeros(num.raw_dim());
    Zip::from(&mut weights)
        .and(&p)
        .and(&num)
        .for_each(|w, &pij, &nij| {
            let q = (nij / sum).max(f64::EPSILON);
            *w = (exaggeration * pij - q) * nij;
        });
    weights.diag_mut().fill(0.0);

    // sum_j w_ij (y_i - y_j) = (sum_j w_ij) y_i - (W y)_i
    let row_sums = weights.sum_axis(Axis(1)).insert_axis(Axis(1));
    (&y * &row_sums - weights.dot(&y)) * 4.0
}

fn kl_divergence(p: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
    let num = student_kernel(y);
    let sum = num.sum();
    let mut kl = 0.0;
    for ((i, j), &pij) in p.indexed_iter() {
        if i != j {
            let q = (num[[i, j]] / sum).max(f64::EPSILON);
            kl += pij * (pij / q).ln();
        }
    }
    kl
}

/// Standard normal draw (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::squared_distance;
    use ndarray::array;

    fn two_groups() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..8 {
            let t = i as f64 * 0.05;
            rows.push([t, 0.1 * t, 0.0]);
            rows.push([5.0 + t, 5.0, 5.0 - t]);
        }
        Array2::from(rows)
    }

    fn mean(points: &[[f64; 2]]) -> [f64; 2] {
        let n = points.len() as f64;
        [
            points.iter().map(|p| p[0]).sum::<f64>() / n,
            points.iter().map(|p| p[1]).sum::<f64>() / n,
        ]
    }

    fn distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
        squared_distance(ArrayView1::from(&a[..]), ArrayView1::from(&b[..])).sqrt()
    }

    #[test]
    fn test_conditional_row_matches_perplexity() {
        let distances = array![0.0, 1.0, 2.0, 4.0, 8.0, 16.0];
        let row = conditional_row(distances.view(), 0, 3.0_f64.ln());
        assert_eq!(row[0], 0.0);
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let entropy: f64 = -row.iter().filter(|&&p| p > 0.0).map(|p| p * p.ln()).sum::<f64>();
        assert!((entropy.exp() - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_gradient_matches_pairwise_sum() {
        let y = array![[0.0, 0.0], [1.0, 0.5], [-0.5, 2.0]];
        let p = array![[0.0, 0.2, 0.3], [0.2, 0.0, 0.0], [0.3, 0.0, 0.0]];
        let grad = gradient(p.view(), y.view(), 1.0);

        let num = student_kernel(y.view());
        let sum = num.sum();
        for i in 0..3 {
            let mut expected = [0.0; 2];
            for j in 0..3 {
                if i != j {
                    let w = (p[[i, j]] - num[[i, j]] / sum) * num[[i, j]];
                    expected[0] += 4.0 * w * (y[[i, 0]] - y[[j, 0]]);
                    expected[1] += 4.0 * w * (y[[i, 1]] - y[[j, 1]]);
                }
            }
            assert!((grad[[i, 0]] - expected[0]).abs() < 1e-12);
            assert!((grad[[i, 1]] - expected[1]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_groups_stay_apart() -> Result<()> {
        let rows = two_groups();
        let embedding = Tsne::new(4.0, 42).max_iter(500).fit_transform(rows.view())?;
        assert_eq!(embedding.len(), 16);
        assert!(embedding.iter().all(|p| p[0].is_finite() && p[1].is_finite()));

        let first: Vec<[f64; 2]> = embedding.iter().step_by(2).copied().collect();
        let second: Vec<[f64; 2]> = embedding.iter().skip(1).step_by(2).copied().collect();
        let (a, b) = (mean(&first), mean(&second));
        let spread = first.iter().map(|p| distance(p, &a)).fold(0.0, f64::max);
        assert!(distance(&a, &b) > spread);
        Ok(())
    }

    #[test]
    fn test_deterministic() -> Result<()> {
        let rows = two_groups();
        let a = Tsne::new(4.0, 42).max_iter(300).fit_transform(rows.view())?;
        let b = Tsne::new(4.0, 42).max_iter(300).fit_transform(rows.view())?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_perplexity_must_be_below_sample_count() {
        let rows = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
        assert!(matches!(
            Tsne::new(5.0, 0).fit_transform(rows.view()),
            Err(AcmError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_one_dimensional_input_uses_random_start() -> Result<()> {
        let rows = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let embedding = Tsne::new(2.0, 1).max_iter(300).fit_transform(rows.view())?;
        assert_eq!(embedding.len(), 6);
        assert!(embedding.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
        Ok(())
    }
}
