//! Feature-extractor abstraction and the batch adapter around it.
//!
//! The `FeatureExtractor` trait decouples the pipeline from any specific
//! backend (stub, ONNX HuBERT, ...). `&mut self` on `forward` expresses that
//! sessions own scratch buffers; all calls are serialised through
//! `ExtractorHandle`'s `parking_lot::Mutex`.

pub mod probe;
pub mod stub;
pub mod vocoder;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxExtractor, OnnxExtractorConfig, OnnxVocoder};

use std::sync::Arc;

use ndarray::{s, Array2, Array3, ArrayView2};
use parking_lot::Mutex;
use tracing::debug;

use crate::batching::Batch;
use crate::error::{Result, TokenizerError};

/// Contract for acoustic embedding backends.
pub trait FeatureExtractor: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference. Called once when
    /// the tokenizer is constructed.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Run a dense zero-padded batch `(batch × samples)` and return per-frame
    /// embeddings `(batch × frames × dim)` at the configured layer.
    ///
    /// # Errors
    /// Out-of-memory conditions must be reported as
    /// `TokenizerError::ResourceExhausted` so capacity probing can tell them
    /// apart from malformed calls.
    fn forward(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array3<f32>>;

    /// Release scratch state (e.g. after capacity probing).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `FeatureExtractor` implementor.
#[derive(Clone)]
pub struct ExtractorHandle(pub Arc<Mutex<dyn FeatureExtractor>>);

impl ExtractorHandle {
    /// Wrap any `FeatureExtractor` in an `ExtractorHandle`.
    pub fn new<E: FeatureExtractor>(extractor: E) -> Self {
        Self(Arc::new(Mutex::new(extractor)))
    }
}

impl std::fmt::Debug for ExtractorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorHandle").finish_non_exhaustive()
    }
}

/// Number of embedding frames that cover `true_len` of `padded_len` samples
/// when the padded row produced `padded_frames` frames.
pub fn valid_frame_count(padded_frames: usize, true_len: usize, padded_len: usize) -> usize {
    if padded_len == 0 {
        return 0;
    }
    let ratio = true_len as f64 / padded_len as f64;
    ((padded_frames as f64 * ratio).round() as usize).min(padded_frames)
}

/// Run one batch through the extractor and return each row's embeddings with
/// the padded tail frames removed.
pub fn extract(extractor: &ExtractorHandle, batch: &Batch) -> Result<Vec<Array2<f32>>> {
    let hidden = extractor.0.lock().forward(batch.samples.view())?;
    let (rows, padded_frames, dim) = hidden.dim();
    if rows != batch.len() {
        return Err(TokenizerError::Extraction(format!(
            "extractor returned {rows} rows for a batch of {}",
            batch.len()
        )));
    }
    debug!(
        rows,
        padded_frames,
        dim,
        padded_len = batch.padded_len(),
        "batch extracted"
    );

    Ok(batch
        .lengths
        .iter()
        .enumerate()
        .map(|(row, &len)| {
            let keep = valid_frame_count(padded_frames, len, batch.padded_len());
            hidden.slice(s![row, ..keep, ..]).to_owned()
        })
        .collect())
}
