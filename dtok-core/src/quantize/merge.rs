//! Code merging: run-length collapse and beam-search smoothing.
//!
//! ## Beam search
//!
//! Single-frame flicker between neighbouring centers inflates the merged
//! sequence. The beam search scores every candidate extension with
//!
//! ```text
//! (frames / collapsed_len_after_append) × (var(top_k distances) / chosen_distance)
//! ```
//!
//! The first factor favours short collapsed sequences; the second favours
//! centers that are close relative to the spread of that frame's
//! alternatives. Scores accumulate from 1.0; the best `beam_size` candidates
//! survive each frame.

use ndarray::ArrayView2;

use crate::error::{Result, TokenizerError};

/// Neutral confidence weight for frames whose top-k distances are all equal.
const NEUTRAL_CONFIDENCE: f64 = 1.0;

/// Collapse consecutive equal codes to one occurrence.
pub fn run_length_merge(codes: &[usize]) -> Vec<usize> {
    let mut merged = codes.to_vec();
    merged.dedup();
    merged
}

/// Output of `beam_search_merge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeamOutput {
    /// One code per frame.
    pub codes: Vec<usize>,
    /// Run-length collapse of `codes`.
    pub merged: Vec<usize>,
}

#[derive(Debug, Clone)]
struct BeamCandidate {
    tokens: Vec<usize>,
    collapsed_len: usize,
    score: f64,
}

/// Extension of a surviving candidate, materialized only if it survives.
struct Extension {
    parent: usize,
    code: usize,
    collapsed_len: usize,
    score: f64,
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

/// Beam-search refinement over each frame's top-k centers.
///
/// `indices` and `distances` are `(frames × k)`, nearest first.
pub fn beam_search_merge(
    indices: ArrayView2<'_, usize>,
    distances: ArrayView2<'_, f32>,
    beam_size: usize,
) -> Result<BeamOutput> {
    if beam_size == 0 {
        return Err(TokenizerError::InvalidInput("beam_size must be at least 1".into()));
    }
    if indices.dim() != distances.dim() {
        return Err(TokenizerError::InvalidInput(format!(
            "top-k indices {:?} and distances {:?} disagree",
            indices.dim(),
            distances.dim()
        )));
    }

    let frame_count = indices.nrows() as f64;
    let mut beams = vec![BeamCandidate {
        tokens: Vec::with_capacity(indices.nrows()),
        collapsed_len: 0,
        score: 1.0,
    }];
    let mut row_dist: Vec<f64> = Vec::with_capacity(indices.ncols());
    let mut extensions: Vec<Extension> = Vec::new();

    for (row_idx, row_dist_view) in indices.outer_iter().zip(distances.outer_iter()) {
        row_dist.clear();
        row_dist.extend(row_dist_view.iter().map(|&d| d as f64));
        let variance = population_variance(&row_dist);

        extensions.clear();
        for (parent, beam) in beams.iter().enumerate() {
            let last = beam.tokens.last().copied();
            for (&code, &dist) in row_idx.iter().zip(&row_dist) {
                let collapsed_len = beam.collapsed_len + usize::from(last != Some(code));
                let len_rate = frame_count / collapsed_len as f64;
                let dist_rate = if variance > 0.0 {
                    variance / dist.max(f32::EPSILON as f64)
                } else {
                    NEUTRAL_CONFIDENCE
                };
                extensions.push(Extension {
                    parent,
                    code,
                    collapsed_len,
                    score: beam.score + len_rate * dist_rate,
                });
            }
        }

        // Stable: equal scores keep insertion order.
        extensions.sort_by(|a, b| b.score.total_cmp(&a.score));
        beams = extensions
            .iter()
            .take(beam_size)
            .map(|ext| {
                let parent = &beams[ext.parent];
                let mut tokens = Vec::with_capacity(parent.tokens.len() + 1);
                tokens.extend_from_slice(&parent.tokens);
                tokens.push(ext.code);
                BeamCandidate {
                    tokens,
                    collapsed_len: ext.collapsed_len,
                    score: ext.score,
                }
            })
            .collect();
    }

    let codes = beams
        .into_iter()
        .next()
        .map(|best| best.tokens)
        .unwrap_or_default();
    let merged = run_length_merge(&codes);
    Ok(BeamOutput { codes, merged })
}
