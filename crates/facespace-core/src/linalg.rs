//! Linear-algebra helpers: observation matrices, PCA and distances.
//!
//! Matrices are stored and multiplied with `ndarray`; the symmetric
//! eigen-decomposition at the heart of PCA is delegated to `nalgebra`.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::cmp::Ordering;
use thiserror::Error;

/// Eigenvalues at or below this fraction of the largest one are treated
/// as zero variance.
const VANISHING_VARIANCE: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum LinalgError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("no observations")]
    Empty,
}

/// Result of a principal-component analysis over row observations.
#[derive(Debug, Clone)]
pub struct Pca {
    /// Mean observation, length D.
    pub mean: Array1<f64>,
    /// Variance along each retained direction, descending, length k.
    pub eigenvalues: Array1<f64>,
    /// Retained directions as columns, D×k.
    pub eigenvectors: Array2<f64>,
}

/// Stack equally sized pixel buffers into an n×D matrix, one observation per row.
pub fn row_matrix<S: AsRef<[u8]>>(samples: &[S]) -> Result<Array2<f64>, LinalgError> {
    let first = samples.first().ok_or(LinalgError::Empty)?;
    let d = first.as_ref().len();

    let mut data = Array2::<f64>::zeros((samples.len(), d));
    for (mut row, sample) in data.axis_iter_mut(Axis(0)).zip(samples) {
        let pixels = sample.as_ref();
        if pixels.len() != d {
            return Err(LinalgError::DimensionMismatch {
                expected: d,
                got: pixels.len(),
            });
        }
        for (dst, &src) in row.iter_mut().zip(pixels) {
            *dst = src as f64;
        }
    }
    Ok(data)
}

/// Flatten a single pixel buffer into a float vector.
pub fn to_vector(pixels: &[u8]) -> Array1<f64> {
    pixels.iter().map(|&p| p as f64).collect()
}

/// Principal-component analysis of `data` (rows = observations), keeping
/// the `k` directions of largest variance.
///
/// `k` is capped at `min(n, D)`; zero means "all". The covariance is scaled
/// by `1/n`. When there are fewer observations than dimensions the n×n Gram
/// matrix is decomposed and its eigenvectors lifted back into pixel space;
/// lifted directions without variance come back as zero columns.
pub fn pca(data: &Array2<f64>, k: usize) -> Result<Pca, LinalgError> {
    let (n, d) = data.dim();
    if n == 0 || d == 0 {
        return Err(LinalgError::Empty);
    }
    let max_k = n.min(d);
    let k = if k == 0 || k > max_k { max_k } else { k };

    let mean = data.mean_axis(Axis(0)).ok_or(LinalgError::Empty)?;
    let centered = data - &mean;
    let scale = 1.0 / n as f64;

    let mut eigenvalues = Array1::<f64>::zeros(k);
    let mut eigenvectors = Array2::<f64>::zeros((d, k));

    if d > n {
        let gram = centered.dot(&centered.t()) * scale;
        let (values, vectors) = symmetric_eigen(&gram);
        let order = descending_order(&values);
        let largest = values[order[0]].max(0.0);

        for (j, &idx) in order.iter().take(k).enumerate() {
            let lambda = values[idx].max(0.0);
            eigenvalues[j] = lambda;
            if largest <= 0.0 || lambda <= largest * VANISHING_VARIANCE {
                continue;
            }
            let v: Array1<f64> = (0..n).map(|i| vectors[(i, idx)]).collect();
            let lifted = centered.t().dot(&v);
            let norm = lifted.dot(&lifted).sqrt();
            if norm > 0.0 {
                eigenvectors.column_mut(j).assign(&(lifted / norm));
            }
        }
    } else {
        let cov = centered.t().dot(&centered) * scale;
        let (values, vectors) = symmetric_eigen(&cov);
        let order = descending_order(&values);

        for (j, &idx) in order.iter().take(k).enumerate() {
            eigenvalues[j] = values[idx].max(0.0);
            for i in 0..d {
                eigenvectors[[i, j]] = vectors[(i, idx)];
            }
        }
    }

    tracing::debug!(
        samples = n,
        dimension = d,
        components = k,
        leading_eigenvalue = eigenvalues.first().copied().unwrap_or(0.0),
        "PCA computed"
    );

    Ok(Pca {
        mean,
        eigenvalues,
        eigenvectors,
    })
}

/// Euclidean distance between two vectors of equal length.
pub fn l2_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn symmetric_eigen(m: &Array2<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let (rows, cols) = m.dim();
    let dm = DMatrix::from_fn(rows, cols, |i, j| m[[i, j]]);
    let eig = dm.symmetric_eigen();
    (eig.eigenvalues.iter().copied().collect(), eig.eigenvectors)
}

/// Indices sorting `values` largest first; equal values keep decomposition order.
fn descending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));
    order
}
