//! `StubExtractor`: deterministic stand-in for a neural feature extractor.
//!
//! Each embedding frame covers `hop` samples and every dimension holds the
//! frame's mean sample value, so piecewise-constant audio maps to predictable
//! codebook entries. An optional row limit simulates accelerator memory
//! exhaustion for capacity probing.

use ndarray::{Array3, ArrayView2};
use tracing::debug;

use crate::error::{Result, TokenizerError};
use crate::inference::FeatureExtractor;

pub struct StubExtractor {
    hop: usize,
    dim: usize,
    max_rows: Option<usize>,
    forward_calls: usize,
}

impl StubExtractor {
    /// `hop` samples per frame (320 = 20 ms at 16 kHz), `dim` values per frame.
    pub fn new(hop: usize, dim: usize) -> Self {
        Self {
            hop: hop.max(1),
            dim: dim.max(1),
            max_rows: None,
            forward_calls: 0,
        }
    }

    /// Fail with `ResourceExhausted` for batches larger than `max_rows`.
    pub fn with_row_limit(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls
    }
}

impl FeatureExtractor for StubExtractor {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubExtractor::warm_up: no-op");
        Ok(())
    }

    fn forward(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        self.forward_calls += 1;
        let (rows, len) = batch.dim();
        if let Some(limit) = self.max_rows {
            if rows > limit {
                return Err(TokenizerError::ResourceExhausted(format!(
                    "stub limit {limit} rows, got {rows}"
                )));
            }
        }

        let frames = if len == 0 { 0 } else { (len / self.hop).max(1) };
        let mut out = Array3::<f32>::zeros((rows, frames, self.dim));
        for (row, samples) in batch.outer_iter().enumerate() {
            for frame in 0..frames {
                let start = frame * self.hop;
                let end = ((frame + 1) * self.hop).min(len);
                let window = samples.slice(ndarray::s![start..end]);
                let mean = window.sum() / window.len().max(1) as f32;
                out.slice_mut(ndarray::s![row, frame, ..]).fill(mean);
            }
        }
        Ok(out)
    }

    fn reset(&mut self) {
        debug!("StubExtractor::reset");
    }
}
