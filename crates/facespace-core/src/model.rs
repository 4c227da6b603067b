//! Eigenspace model: mean face, eigenface basis and training projections.
//!
//! Built in one shot from a full snapshot of the sample store and never
//! mutated afterwards. Classification is a nearest-neighbor scan over the
//! projections precomputed at build time.

use crate::imaging::FaceImage;
use crate::linalg::{self, LinalgError};
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{samples} samples but {labels} labels")]
    LabelCountMismatch { samples: usize, labels: usize },
    #[error("model has no training samples")]
    EmptyModel,
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<LinalgError> for ModelError {
    fn from(err: LinalgError) -> Self {
        match err {
            LinalgError::DimensionMismatch { expected, got } => {
                ModelError::DimensionMismatch { expected, got }
            }
            LinalgError::Empty => ModelError::EmptyModel,
        }
    }
}

/// Nearest training sample for a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// L2 distance between the probe and the nearest projection.
    pub distance: f64,
}

/// Number of components actually retained for `requested` over `n` samples.
///
/// Zero or anything above `n` means "all `n`".
pub fn clamp_components(requested: usize, n: usize) -> usize {
    if requested == 0 || requested > n {
        n
    } else {
        requested
    }
}

/// Eigenface subspace derived from a set of labeled training faces.
#[derive(Debug, Clone)]
pub struct EigenModel {
    mean: Array1<f64>,
    eigenvalues: Array1<f64>,
    /// D×k, one eigenface per column.
    basis: Array2<f64>,
    /// n×k, row i is the projection of training sample i.
    projections: Array2<f64>,
    labels: Vec<String>,
}

impl EigenModel {
    /// Build the model from training faces and their index-aligned labels.
    pub fn compute(
        samples: &[FaceImage],
        labels: &[String],
        components: usize,
    ) -> Result<Self, ModelError> {
        let pixels: Vec<&[u8]> = samples.iter().map(|s| s.pixels.as_slice()).collect();
        Self::compute_raw(&pixels, labels, components)
    }

    /// Same as [`compute`](Self::compute), over bare pixel buffers.
    pub fn compute_raw<S: AsRef<[u8]>>(
        samples: &[S],
        labels: &[String],
        components: usize,
    ) -> Result<Self, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        let data = linalg::row_matrix(samples)?;
        let n = data.nrows();
        if labels.len() != n {
            return Err(ModelError::LabelCountMismatch {
                samples: n,
                labels: labels.len(),
            });
        }

        let k = clamp_components(components, n);
        let pca = linalg::pca(&data, k)?;

        let mut model = Self {
            mean: pca.mean,
            eigenvalues: pca.eigenvalues,
            basis: pca.eigenvectors,
            projections: Array2::zeros((0, 0)),
            labels: labels.to_vec(),
        };

        let k = model.basis.ncols();
        let mut projections = Array2::<f64>::zeros((n, k));
        for (i, row) in data.outer_iter().enumerate() {
            let y = model.project_vector(row)?;
            projections.row_mut(i).assign(&y);
        }
        model.projections = projections;

        tracing::info!(
            samples = n,
            dimension = model.dimension(),
            components = k,
            "eigenspace model built"
        );

        Ok(model)
    }

    /// Coordinates of a flattened face in the subspace: `(x - mean) · basis`.
    pub fn project(&self, pixels: &[u8]) -> Result<Array1<f64>, ModelError> {
        let x = linalg::to_vector(pixels);
        self.project_vector(x.view())
    }

    /// Like [`project`](Self::project) but for an already-float vector.
    pub fn project_vector(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, ModelError> {
        if x.len() != self.dimension() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dimension(),
                got: x.len(),
            });
        }
        let centered = &x - &self.mean;
        Ok(centered.dot(&self.basis))
    }

    /// Approximate face for subspace coordinates: `basis · y + mean`.
    pub fn reconstruct(&self, coords: ArrayView1<f64>) -> Result<Array1<f64>, ModelError> {
        if coords.len() != self.components() {
            return Err(ModelError::DimensionMismatch {
                expected: self.components(),
                got: coords.len(),
            });
        }
        Ok(self.basis.dot(&coords) + &self.mean)
    }

    /// L2 distance between a face and its reconstruction from the subspace.
    pub fn reconstruction_error(&self, pixels: &[u8]) -> Result<f64, ModelError> {
        let x = linalg::to_vector(pixels);
        let y = self.project_vector(x.view())?;
        let r = self.reconstruct(y.view())?;
        Ok(linalg::l2_distance(x.view(), r.view()))
    }

    /// Nearest training sample to `pixels` in the subspace.
    pub fn predict(&self, pixels: &[u8]) -> Result<Prediction, ModelError> {
        let x = linalg::to_vector(pixels);
        self.predict_vector(x.view())
    }

    /// Nearest training sample to a float vector. The first minimum wins.
    pub fn predict_vector(&self, x: ArrayView1<f64>) -> Result<Prediction, ModelError> {
        if self.labels.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        let q = self.project_vector(x)?;

        let mut best_dist = f64::INFINITY;
        let mut best_idx: Option<usize> = None;
        for (i, p) in self.projections.outer_iter().enumerate() {
            let dist = linalg::l2_distance(p, q.view());
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let idx = best_idx.ok_or(ModelError::EmptyModel)?;
        Ok(Prediction {
            label: self.labels[idx].clone(),
            distance: best_dist,
        })
    }

    /// Nearest-neighbor distance of the mean face, used to calibrate the
    /// recognition threshold.
    pub fn self_distance(&self) -> Result<f64, ModelError> {
        Ok(self.predict_vector(self.mean.view())?.distance)
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    pub fn basis(&self) -> &Array2<f64> {
        &self.basis
    }

    pub fn projections(&self) -> &Array2<f64> {
        &self.projections
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Retained component count k.
    pub fn components(&self) -> usize {
        self.basis.ncols()
    }

    /// Flattened face dimension D.
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }
}
