//! Batch-capacity calibration.
//!
//! ## Algorithm
//!
//! 1. Run a uniform-random batch of `size` chunks (starting at 1).
//! 2. On success, remember `size` and grow it by `step`.
//! 3. On `ResourceExhausted`, stop and return
//!    `max(1, floor(headroom × last_successful))`.
//! 4. Reaching `max_batch` without a failure returns the last successful size
//!    as is.
//!
//! A resource failure at size 1 means the model cannot run on this device at
//! all (`FatalResource`). Any other error is propagated unchanged.

use ndarray::Array2;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Result, TokenizerError};
use crate::inference::ExtractorHandle;

/// Tunables for `CapacityProbe::probe`.
#[derive(Debug, Clone, Copy)]
pub struct CapacityProbe {
    /// Batch-size increment between attempts. Default: 2.
    pub step: usize,
    /// Fraction of the last successful size kept as margin. Default: 0.95.
    pub headroom: f32,
    /// Upper bound on attempted sizes. Default: 64.
    pub max_batch: usize,
}

impl Default for CapacityProbe {
    fn default() -> Self {
        Self {
            step: 2,
            headroom: 0.95,
            max_batch: 64,
        }
    }
}

impl CapacityProbe {
    /// Find the largest batch of `chunk_length`-sample rows the extractor can run.
    pub fn probe(&self, extractor: &ExtractorHandle, chunk_length: usize) -> Result<usize> {
        let step = self.step.max(1);
        let mut rng = rand::thread_rng();
        let mut last_ok: Option<usize> = None;
        let mut size = 1usize;
        let mut exhausted = false;

        let mut model = extractor.0.lock();
        while size <= self.max_batch.max(1) {
            let batch = Array2::from_shape_simple_fn((size, chunk_length), || rng.gen::<f32>());
            match model.forward(batch.view()) {
                Ok(_) => {
                    debug!(size, "capacity probe attempt succeeded");
                    last_ok = Some(size);
                    size += step;
                }
                Err(e) if e.is_resource_exhaustion() => {
                    debug!(size, error = %e, "capacity probe attempt exhausted resources");
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    model.reset();
                    return Err(e);
                }
            }
        }
        model.reset();

        let Some(last_ok) = last_ok else {
            warn!(chunk_length, "extractor cannot run a single chunk");
            return Err(TokenizerError::FatalResource(format!(
                "batch size 1 with {chunk_length} samples does not fit"
            )));
        };

        let capacity = if exhausted {
            ((last_ok as f32 * self.headroom).floor() as usize).max(1)
        } else {
            last_ok
        };
        info!(
            capacity,
            last_ok, exhausted, chunk_length, "batch capacity calibrated"
        );
        Ok(capacity)
    }
}
