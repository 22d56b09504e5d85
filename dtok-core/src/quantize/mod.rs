//! Nearest-centroid vector quantization against a fixed codebook.
//!
//! ## Distance
//!
//! For a frame `f` and center `c`:
//!
//! ```text
//! d²(f, c) = ‖f‖² − 2·f·c + ‖c‖²
//! ```
//!
//! `‖c‖²` is computed once when the codebook is built. `d²` is clamped at zero
//! (the expansion can go slightly negative in f32) and the reported distance is
//! `sqrt(d²)`, which orders centers exactly like `d²`.
//!
//! Every frame is quantized on its own, so a frame's codes never depend on
//! which other frames (or padding) shared its batch.

pub mod merge;

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::Deserialize;
use tracing::info;

use crate::error::{Result, TokenizerError};

/// Batch-norm epsilon used by `feature_normalize`.
const NORM_EPS: f32 = 1e-5;

/// K cluster centers of dimension D. Read-only after construction.
#[derive(Debug, Clone)]
pub struct Codebook {
    centers: Array2<f32>,
    sq_norms: Array1<f32>,
}

#[derive(Deserialize)]
struct CodebookFile {
    centers: Vec<Vec<f32>>,
}

impl Codebook {
    /// Build from a `(K × D)` matrix of centers.
    pub fn new(centers: Array2<f32>) -> Result<Self> {
        if centers.nrows() == 0 || centers.ncols() == 0 {
            return Err(TokenizerError::Codebook(format!(
                "codebook must be non-empty, got {:?}",
                centers.dim()
            )));
        }
        if centers.iter().any(|v| !v.is_finite()) {
            return Err(TokenizerError::Codebook(
                "codebook contains non-finite values".into(),
            ));
        }
        let sq_norms = centers.map_axis(Axis(1), |c| c.dot(&c));
        Ok(Self { centers, sq_norms })
    }

    /// Build from equally sized rows.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let k = rows.len();
        let d = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != d) {
            return Err(TokenizerError::Codebook(format!(
                "row {i} has {} values, expected {d}",
                row.len()
            )));
        }
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let centers = Array2::from_shape_vec((k, d), flat)
            .map_err(|e| TokenizerError::Codebook(e.to_string()))?;
        Self::new(centers)
    }

    /// Load `{"centers": [[...], ...]}` from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TokenizerError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let file: CodebookFile = serde_json::from_str(&raw)?;
        let codebook = Self::from_rows(file.centers)?;
        info!(
            path = %path.display(),
            size = codebook.size(),
            dim = codebook.dim(),
            "codebook loaded"
        );
        Ok(codebook)
    }

    /// Number of centers (K).
    pub fn size(&self) -> usize {
        self.centers.nrows()
    }

    /// Center dimension (D).
    pub fn dim(&self) -> usize {
        self.centers.ncols()
    }

    pub fn centers(&self) -> ArrayView2<'_, f32> {
        self.centers.view()
    }

    pub fn center(&self, index: usize) -> ArrayView1<'_, f32> {
        self.centers.row(index)
    }

    /// Squared distance from `frame` to every center.
    fn squared_distances(&self, frame: ArrayView1<'_, f32>) -> Array1<f32> {
        let f_sq = frame.dot(&frame);
        let cross = self.centers.dot(&frame);
        let mut d = &self.sq_norms - &(cross * 2.0);
        d.mapv_inplace(|v| (v + f_sq).max(0.0));
        d
    }
}

/// Top-k neighbours of every frame in one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCodes {
    /// `(frames × k)` center indices, nearest first.
    pub indices: Array2<usize>,
    /// `(frames × k)` Euclidean distances matching `indices`.
    pub distances: Array2<f32>,
    /// `(frames × K)` distance to every center; only with `keep_all_distances`.
    pub all_distances: Option<Array2<f32>>,
}

impl FrameCodes {
    pub fn frame_count(&self) -> usize {
        self.indices.nrows()
    }

    /// The nearest center of every frame: the raw, unmerged code stream.
    pub fn nearest(&self) -> Vec<usize> {
        if self.indices.ncols() == 0 {
            return Vec::new();
        }
        self.indices.column(0).to_vec()
    }
}

/// Per-dimension zero-mean / unit-variance normalization over a chunk's
/// frames (biased variance). Fewer than two frames are returned unchanged.
pub fn normalize_features(frames: ArrayView2<'_, f32>) -> Array2<f32> {
    if frames.nrows() < 2 {
        return frames.to_owned();
    }
    let Some(mean) = frames.mean_axis(Axis(0)) else {
        return frames.to_owned();
    };
    let var = frames.var_axis(Axis(0), 0.0);
    let denom = var.mapv(|v| (v + NORM_EPS).sqrt());
    (&frames - &mean) / &denom
}

/// Quantize each frame of `frames` (`frames × D`) against `codebook`.
///
/// Returns the `top_k` nearest centers per frame, ascending by distance, ties
/// broken by the lower center index. `top_k` is clamped to the codebook size.
pub fn quantize(
    frames: ArrayView2<'_, f32>,
    codebook: &Codebook,
    top_k: usize,
    normalize: bool,
    keep_all_distances: bool,
) -> Result<FrameCodes> {
    if top_k == 0 {
        return Err(TokenizerError::InvalidInput("top_k must be at least 1".into()));
    }
    if frames.ncols() != codebook.dim() && frames.nrows() > 0 {
        return Err(TokenizerError::Codebook(format!(
            "frame dimension {} does not match codebook dimension {}",
            frames.ncols(),
            codebook.dim()
        )));
    }

    let k = top_k.min(codebook.size());
    let n = frames.nrows();
    let normalized;
    let frames = if normalize {
        normalized = normalize_features(frames);
        normalized.view()
    } else {
        frames
    };

    let mut indices = Array2::<usize>::zeros((n, k));
    let mut distances = Array2::<f32>::zeros((n, k));
    let mut all = keep_all_distances.then(|| Array2::<f32>::zeros((n, codebook.size())));
    let mut order: Vec<usize> = Vec::with_capacity(codebook.size());

    for (row, frame) in frames.outer_iter().enumerate() {
        let sq = codebook.squared_distances(frame);

        order.clear();
        order.extend(0..codebook.size());
        order.sort_by(|&a, &b| sq[a].total_cmp(&sq[b]).then(a.cmp(&b)));

        for (slot, &center) in order.iter().take(k).enumerate() {
            indices[[row, slot]] = center;
            distances[[row, slot]] = sq[center].sqrt();
        }
        if let Some(all) = all.as_mut() {
            all.row_mut(row).assign(&sq.mapv(f32::sqrt));
        }
    }

    Ok(FrameCodes {
        indices,
        distances,
        all_distances: all,
    })
}
