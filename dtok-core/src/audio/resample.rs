//! Whole-signal sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Feature extractors are trained on a fixed rate (16 kHz for the HuBERT
//! family). `RateConverter` converts a complete item in one call: full blocks
//! go through `process_into_buffer`, the remainder through
//! `process_partial_into_buffer`, and the resampler is then flushed until the
//! delay-compensated output reaches `round(len × to / from)` samples.
//!
//! When source rate == target rate, `RateConverter` is a passthrough; no
//! rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::info;

use crate::error::{Result, TokenizerError};

/// Input frames per rubato call.
pub const DEFAULT_BLOCK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    from_rate: u32,
    to_rate: u32,
    /// How many input samples rubato expects per process call.
    block: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `TokenizerError::Audio` if rubato fails to initialise or a rate
    /// is zero.
    pub fn new(from_rate: u32, to_rate: u32, block: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(TokenizerError::Audio(format!(
                "sample rates must be non-zero (from={from_rate}, to={to_rate})"
            )));
        }
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                from_rate,
                to_rate,
                block,
                output_buf: Vec::new(),
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            block,
            1, // mono
        )
        .map_err(|e| TokenizerError::Audio(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        info!(from_rate, to_rate, block, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            from_rate,
            to_rate,
            block,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Convert a complete signal. The converter is reset first, so calls are
    /// independent of each other.
    pub fn convert(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };
        resampler.reset();

        let expected = (samples.len() as f64 * self.to_rate as f64 / self.from_rate as f64)
            .round() as usize;
        let delay = resampler.output_delay();
        let mut out = Vec::with_capacity(expected + delay + self.output_buf[0].len());

        let mut blocks = samples.chunks_exact(self.block);
        for block in &mut blocks {
            let (_, produced) = resampler
                .process_into_buffer(&[block], &mut self.output_buf, None)
                .map_err(|e| TokenizerError::Audio(format!("resample: {e}")))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        let tail = blocks.remainder();
        if !tail.is_empty() {
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(&[tail]), &mut self.output_buf, None)
                .map_err(|e| TokenizerError::Audio(format!("resample tail: {e}")))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        // Flush the filter delay with silence.
        while out.len() < expected + delay {
            let (_, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
                .map_err(|e| TokenizerError::Audio(format!("resample flush: {e}")))?;
            if produced == 0 {
                break;
            }
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        out.drain(..delay.min(out.len()));
        out.resize(expected, 0.0);
        Ok(out)
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
