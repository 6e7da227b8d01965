//! Seeded k-means clustering (greedy k-means++ seeding, Lloyd iterations).

use crate::error::{AcmError, Result};
use crate::linalg::squared_distance;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    max_iter: usize,
    n_init: usize,
    seed: u64,
}

/// Result of a k-means fit
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// Cluster id of each input row, in `0..k`
    pub labels: Vec<usize>,
    /// One centre per row
    pub centroids: Array2<f64>,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
    pub iterations: usize,
}

impl KMeans {
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            max_iter: 300,
            n_init: 1,
            seed,
        }
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Number of seeded restarts; the lowest-inertia run wins.
    pub fn n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn fit(&self, rows: ArrayView2<f64>) -> Result<KMeansFit> {
        if self.k == 0 {
            return Err(AcmError::Validation("k-means needs at least one cluster".into()));
        }
        if rows.nrows() < self.k {
            return Err(AcmError::InsufficientData(format!(
                "{} samples cannot form {} clusters",
                rows.nrows(),
                self.k
            )));
        }

        let tol = 1e-4 * mean_variance(rows);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<KMeansFit> = None;

        for run in 0..self.n_init {
            let centroids = self.init_centroids(rows, &mut rng);
            let fit = self.lloyd(rows, centroids, tol);
            debug!(run, inertia = fit.inertia, iterations = fit.iterations, "k-means run");
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }

        best.ok_or_else(|| AcmError::Validation("k-means produced no run".into()))
    }

    /// Greedy k-means++: each new centre is the best of several candidates
    /// drawn proportionally to squared distance.
    fn init_centroids(&self, rows: ArrayView2<f64>, rng: &mut StdRng) -> Array2<f64> {
        let n = rows.nrows();
        let trials = 2 + (self.k as f64).ln() as usize;

        let first = rng.gen_range(0..n);
        let mut chosen = vec![first];
        let mut closest: Vec<f64> = rows
            .rows()
            .into_iter()
            .map(|r| squared_distance(r, rows.row(first)))
            .collect();
        let mut potential: f64 = closest.iter().sum();

        while chosen.len() < self.k {
            let mut best: Option<(usize, Vec<f64>, f64)> = None;
            for _ in 0..trials {
                let candidate = sample_weighted(&closest, potential, rng);
                let distances: Vec<f64> = rows
                    .rows()
                    .into_iter()
                    .zip(&closest)
                    .map(|(r, &c)| c.min(squared_distance(r, rows.row(candidate))))
                    .collect();
                let candidate_potential: f64 = distances.iter().sum();
                if best.as_ref().map_or(true, |b| candidate_potential < b.2) {
                    best = Some((candidate, distances, candidate_potential));
                }
            }
            if let Some((index, distances, candidate_potential)) = best {
                chosen.push(index);
                closest = distances;
                potential = candidate_potential;
            }
        }
        rows.select(Axis(0), &chosen)
    }

    fn lloyd(&self, rows: ArrayView2<f64>, mut centroids: Array2<f64>, tol: f64) -> KMeansFit {
        let mut labels = assign(rows, centroids.view());
        let mut iterations = 0;

        for iteration in 1..=self.max_iter {
            iterations = iteration;
            let mut sums: Array2<f64> = Array2::zeros(centroids.raw_dim());
            let mut counts = vec![0usize; self.k];
            for (row, &label) in rows.rows().into_iter().zip(&labels) {
                counts[label] += 1;
                let mut sum = sums.row_mut(label);
                sum += &row;
            }

            let divisors: Array1<f64> = counts.iter().map(|&c| c.max(1) as f64).collect();
            let mut updated = sums / &divisors.insert_axis(Axis(1));
            relocate_empty(rows, &labels, centroids.view(), &counts, &mut updated);

            let shift: f64 = centroids
                .rows()
                .into_iter()
                .zip(updated.rows())
                .map(|(a, b)| squared_distance(a, b))
                .sum();
            centroids = updated;
            let next = assign(rows, centroids.view());
            let unchanged = next == labels;
            labels = next;

            if unchanged || shift <= tol {
                break;
            }
        }

        let inertia = rows
            .rows()
            .into_iter()
            .zip(&labels)
            .map(|(r, &l)| squared_distance(r, centroids.row(l)))
            .sum();
        KMeansFit {
            labels,
            centroids,
            inertia,
            iterations,
        }
    }
}

/// Nearest centroid of every row; ties go to the lower id.
fn assign(rows: ArrayView2<f64>, centroids: ArrayView2<f64>) -> Vec<usize> {
    rows.rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (i, c) in centroids.rows().into_iter().enumerate() {
                let d = squared_distance(row, c);
                if d < best_distance {
                    best = i;
                    best_distance = d;
                }
            }
            best
        })
        .collect()
}

/// Move each empty cluster's centre onto the row farthest from its current
/// centre, never reusing a row.
fn relocate_empty(
    rows: ArrayView2<f64>,
    labels: &[usize],
    old: ArrayView2<f64>,
    counts: &[usize],
    updated: &mut Array2<f64>,
) {
    let empty: Vec<usize> = (0..counts.len()).filter(|&c| counts[c] == 0).collect();
    if empty.is_empty() {
        return;
    }

    let mut far: Vec<(usize, f64)> = rows
        .rows()
        .into_iter()
        .zip(labels)
        .enumerate()
        .map(|(i, (r, &l))| (i, squared_distance(r, old.row(l))))
        .collect();
    far.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    for (cluster, (row, _)) in empty.into_iter().zip(far) {
        debug!(cluster, row, "Relocating empty cluster");
        updated.row_mut(cluster).assign(&rows.row(row));
    }
}

fn sample_weighted(weights: &[f64], total: f64, rng: &mut StdRng) -> usize {
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }
    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if cumulative > target {
            return i;
        }
    }
    weights.len() - 1
}

/// Mean over columns of the per-column variance
fn mean_variance(rows: ArrayView2<f64>) -> f64 {
    if rows.ncols() == 0 {
        return 0.0;
    }
    rows.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 10.0), (-10.0, 10.0)] {
            for (dx, dy) in [(0.1, 0.0), (-0.1, 0.0), (0.0, 0.1), (0.0, -0.1)] {
                rows.push([cx + dx, cy + dy]);
            }
        }
        Array2::from(rows)
    }

    #[test]
    fn test_separates_blobs() -> Result<()> {
        let rows = blobs();
        let fit = KMeans::new(3, 42).fit(rows.view())?;

        assert_eq!(fit.labels.len(), 12);
        assert!(fit.labels.iter().all(|&l| l < 3));
        for group in fit.labels.chunks(4) {
            assert!(group.iter().all(|&l| l == group[0]));
        }
        let mut distinct: Vec<usize> = fit.labels.chunks(4).map(|g| g[0]).collect();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
        assert_eq!(fit.centroids.dim(), (3, 2));
        assert!(fit.inertia < 0.5);
        Ok(())
    }

    #[test]
    fn test_same_seed_same_labels() -> Result<()> {
        let rows = Array2::from_shape_fn((40, 3), |(i, j)| {
            let t = i as f64;
            match j {
                0 => (t * 0.37).sin() * 5.0,
                1 => (t * 0.11).cos() * 3.0,
                _ => t % 7.0,
            }
        });
        let a = KMeans::new(4, 7).n_init(3).fit(rows.view())?;
        let b = KMeans::new(4, 7).n_init(3).fit(rows.view())?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_too_few_samples() {
        let rows = array![[0.0], [1.0]];
        assert!(matches!(
            KMeans::new(3, 0).fit(rows.view()),
            Err(AcmError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_duplicate_points_fill_every_cluster_id_range() -> Result<()> {
        let rows = Array2::from_elem((5, 2), 1.0);
        let fit = KMeans::new(2, 1).fit(rows.view())?;
        assert!(fit.labels.iter().all(|&l| l < 2));
        assert_eq!(fit.inertia, 0.0);
        Ok(())
    }

    #[test]
    fn test_relocate_empty_uses_farthest_row() {
        let rows = array![[0.0], [1.0], [9.0]];
        let old = array![[0.0], [100.0]];
        let mut updated = array![[3.0], [100.0]];
        relocate_empty(rows.view(), &[0, 0, 0], old.view(), &[3, 0], &mut updated);
        assert_eq!(updated.row(1), array![9.0]);
    }
}
