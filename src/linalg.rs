//! Dense symmetric eigen-decomposition and distance helpers over `ndarray`.

use crate::error::{AcmError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Eigen-decomposition of a real symmetric matrix
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    /// Eigenvalues, largest first
    pub values: Array1<f64>,
    /// Column `j` is the unit eigenvector for `values[j]`
    pub vectors: Array2<f64>,
}

/// Decompose a symmetric matrix by Householder tridiagonalisation followed
/// by implicit QL iterations.
pub fn symmetric_eigen(matrix: ArrayView2<f64>) -> Result<SymmetricEigen> {
    let (n, cols) = matrix.dim();
    if n != cols {
        return Err(AcmError::Validation(format!(
            "eigen-decomposition needs a square matrix, got {}x{}",
            n, cols
        )));
    }
    if n == 0 {
        return Ok(SymmetricEigen {
            values: Array1::zeros(0),
            vectors: Array2::zeros((0, 0)),
        });
    }

    let mut v = matrix.to_owned();
    let mut d = Array1::zeros(n);
    let mut e = Array1::zeros(n);
    tridiagonalize(&mut v, &mut d, &mut e);
    ql_implicit(&mut v, &mut d, &mut e)?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| d[b].total_cmp(&d[a]));

    Ok(SymmetricEigen {
        values: order.iter().map(|&j| d[j]).collect(),
        vectors: Array2::from_shape_fn((n, n), |(i, c)| v[[i, order[c]]]),
    })
}

/// Householder reduction to tridiagonal form (EISPACK tred2).
fn tridiagonalize(v: &mut Array2<f64>, d: &mut Array1<f64>, e: &mut Array1<f64>) {
    let n = d.len();
    for j in 0..n {
        d[j] = v[[n - 1, j]];
    }

    for i in (1..n).rev() {
        let mut h: f64 = 0.0;
        let scale: f64 = (0..i).map(|k| d[k].abs()).sum();

        if scale == 0.0 {
            e[i] = d[i - 1];
            for j in 0..i {
                d[j] = v[[i - 1, j]];
                v[[i, j]] = 0.0;
                v[[j, i]] = 0.0;
            }
        } else {
            for k in 0..i {
                d[k] /= scale;
                h += d[k] * d[k];
            }
            let mut f = d[i - 1];
            let mut g = h.sqrt();
            if f > 0.0 {
                g = -g;
            }
            e[i] = scale * g;
            h -= f * g;
            d[i - 1] = f - g;
            for j in 0..i {
                e[j] = 0.0;
            }

            for j in 0..i {
                f = d[j];
                v[[j, i]] = f;
                g = e[j] + v[[j, j]] * f;
                for k in (j + 1)..i {
                    g += v[[k, j]] * d[k];
                    e[k] += v[[k, j]] * f;
                }
                e[j] = g;
            }

            f = 0.0;
            for j in 0..i {
                e[j] /= h;
                f += e[j] * d[j];
            }
            let hh = f / (h + h);
            for j in 0..i {
                e[j] -= hh * d[j];
            }
            for j in 0..i {
                f = d[j];
                g = e[j];
                for k in j..i {
                    v[[k, j]] -= f * e[k] + g * d[k];
                }
                d[j] = v[[i - 1, j]];
                v[[i, j]] = 0.0;
            }
        }
        d[i] = h;
    }

    // accumulate transformations
    for i in 0..n.saturating_sub(1) {
        v[[n - 1, i]] = v[[i, i]];
        v[[i, i]] = 1.0;
        let h = d[i + 1];
        if h != 0.0 {
            for k in 0..=i {
                d[k] = v[[k, i + 1]] / h;
            }
            for j in 0..=i {
                let mut g = 0.0;
                for k in 0..=i {
                    g += v[[k, i + 1]] * v[[k, j]];
                }
                for k in 0..=i {
                    v[[k, j]] -= g * d[k];
                }
            }
        }
        for k in 0..=i {
            v[[k, i + 1]] = 0.0;
        }
    }
    for j in 0..n {
        d[j] = v[[n - 1, j]];
        v[[n - 1, j]] = 0.0;
    }
    v[[n - 1, n - 1]] = 1.0;
    e[0] = 0.0;
}

/// Implicit QL iterations on the tridiagonal form (EISPACK tql2).
fn ql_implicit(v: &mut Array2<f64>, d: &mut Array1<f64>, e: &mut Array1<f64>) -> Result<()> {
    let n = d.len();
    for i in 1..n {
        e[i - 1] = e[i];
    }
    e[n - 1] = 0.0;

    let mut f = 0.0;
    let mut tst1: f64 = 0.0;
    let eps = f64::EPSILON;
    let max_iter = 30 * n.max(1);

    for l in 0..n {
        tst1 = tst1.max(d[l].abs() + e[l].abs());
        let mut m = l;
        while m < n {
            if e[m].abs() <= eps * tst1 {
                break;
            }
            m += 1;
        }

        if m > l {
            let mut iter = 0;
            loop {
                iter += 1;
                if iter > max_iter {
                    return Err(AcmError::Validation(
                        "eigen-decomposition did not converge".into(),
                    ));
                }

                let mut g = d[l];
                let mut p = (d[l + 1] - g) / (2.0 * e[l]);
                let mut r = p.hypot(1.0);
                if p < 0.0 {
                    r = -r;
                }
                d[l] = e[l] / (p + r);
                d[l + 1] = e[l] * (p + r);
                let dl1 = d[l + 1];
                let mut h = g - d[l];
                for di in d.iter_mut().skip(l + 2) {
                    *di -= h;
                }
                f += h;

                p = d[m];
                let mut c = 1.0;
                let mut c2 = c;
                let mut c3 = c;
                let el1 = e[l + 1];
                let mut s = 0.0;
                let mut s2 = 0.0;
                for i in (l..m).rev() {
                    c3 = c2;
                    c2 = c;
                    s2 = s;
                    g = c * e[i];
                    h = c * p;
                    r = p.hypot(e[i]);
                    e[i + 1] = s * r;
                    s = e[i] / r;
                    c = p / r;
                    p = c * d[i] - s * g;
                    d[i + 1] = h + s * (c * g + s * d[i]);
                    for mut row in v.rows_mut() {
                        h = row[i + 1];
                        row[i + 1] = s * row[i] + c * h;
                        row[i] = c * row[i] - s * h;
                    }
                }
                p = -s * s2 * c3 * el1 * e[l] / dl1;
                e[l] = s * p;
                d[l] = c * p;

                if e[l].abs() <= eps * tst1 {
                    break;
                }
            }
        }
        d[l] += f;
        e[l] = 0.0;
    }
    Ok(())
}

pub fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Squared euclidean distance between every pair of rows
pub fn pairwise_squared_distances(rows: ArrayView2<f64>) -> Array2<f64> {
    let n = rows.nrows();
    let mut distances = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = squared_distance(rows.row(i), rows.row(j));
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }
    distances
}
