//! Blocking encode pipeline.
//!
//! ## Pipeline stages (per call)
//!
//! ```text
//! 1. Condition items: resample to the tokenizer rate, optional normalization
//! 2. Split every item into tagged chunks (tail merge below min_tail)
//! 3. Collate chunks into padded batches of at most max_batch_size
//! 4. Per batch:
//!    a. Extract embeddings (blocking, serialised on the extractor mutex)
//!    b. Trim padded frames by length ratio
//!    c. Quantize + merge every chunk on the worker pool
//! 5. Reassemble chunk results per item, in submission order
//! ```

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use tracing::{debug, info, info_span, warn};

use crate::{
    audio::{
        normalize_waveform,
        resample::{RateConverter, DEFAULT_BLOCK},
        AudioItem,
    },
    batching::{
        chunk::{split, ChunkTag},
        collate,
    },
    codes::ItemCodes,
    engine::{reassemble::reassemble, EncodeOptions, TokenizerConfig},
    error::{Result, TokenizerError},
    inference::{extract, ExtractorHandle},
    quantize::{
        merge::{beam_search_merge, run_length_merge},
        normalize_features, quantize, Codebook,
    },
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub items_in: AtomicUsize,
    pub chunks_built: AtomicUsize,
    pub batches_run: AtomicUsize,
    pub frames_quantized: AtomicUsize,
    pub beam_searches: AtomicUsize,
    pub extraction_errors: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.items_in.store(0, Ordering::Relaxed);
        self.chunks_built.store(0, Ordering::Relaxed);
        self.batches_run.store(0, Ordering::Relaxed);
        self.frames_quantized.store(0, Ordering::Relaxed);
        self.beam_searches.store(0, Ordering::Relaxed);
        self.extraction_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            items_in: self.items_in.load(Ordering::Relaxed),
            chunks_built: self.chunks_built.load(Ordering::Relaxed),
            batches_run: self.batches_run.load(Ordering::Relaxed),
            frames_quantized: self.frames_quantized.load(Ordering::Relaxed),
            beam_searches: self.beam_searches.load(Ordering::Relaxed),
            extraction_errors: self.extraction_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub items_in: usize,
    pub chunks_built: usize,
    pub batches_run: usize,
    pub frames_quantized: usize,
    pub beam_searches: usize,
    pub extraction_errors: usize,
}

/// All context the pipeline needs, passed as one struct.
pub struct PipelineContext {
    pub config: TokenizerConfig,
    pub codebook: Arc<Codebook>,
    pub extractor: ExtractorHandle,
    pub max_batch_size: usize,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Encode `items` into one `ItemCodes` per item, in item order.
pub fn run(ctx: &PipelineContext, items: &[AudioItem], options: &EncodeOptions) -> Result<Vec<ItemCodes>> {
    if items.is_empty() {
        return Err(TokenizerError::InvalidInput("no audio items supplied".into()));
    }
    let span = info_span!("encode", items = items.len(), batch = ctx.max_batch_size);
    let _enter = span.enter();

    ctx.diagnostics
        .items_in
        .fetch_add(items.len(), Ordering::Relaxed);

    // ── 1. Condition items ───────────────────────────────────────────────
    let prepared = items
        .iter()
        .enumerate()
        .map(|(item_id, item)| condition_item(&ctx.config, item_id, item))
        .collect::<Result<Vec<_>>>()?;

    // ── 2. Chunk ─────────────────────────────────────────────────────────
    let chunk_length = ctx.config.chunk_length();
    let min_tail = ctx.config.min_tail();
    let chunks: Vec<_> = prepared
        .iter()
        .enumerate()
        .flat_map(|(item_id, samples)| split(item_id, samples, chunk_length, min_tail))
        .collect();
    ctx.diagnostics
        .chunks_built
        .fetch_add(chunks.len(), Ordering::Relaxed);

    // ── 3. Collate ───────────────────────────────────────────────────────
    let batches = collate(&chunks, ctx.max_batch_size);
    debug!(
        chunks = chunks.len(),
        batches = batches.len(),
        chunk_length,
        "chunks collated"
    );

    // ── 4. Extract, quantize, merge ──────────────────────────────────────
    let mut results: Vec<(ChunkTag, ItemCodes)> = Vec::with_capacity(chunks.len());
    for batch in &batches {
        let embeddings = match extract(&ctx.extractor, batch) {
            Ok(e) => e,
            Err(e) => {
                ctx.diagnostics
                    .extraction_errors
                    .fetch_add(1, Ordering::Relaxed);
                if e.is_resource_exhaustion() {
                    warn!(
                        rows = batch.len(),
                        padded_len = batch.padded_len(),
                        "extraction ran out of resources"
                    );
                }
                return Err(e);
            }
        };
        ctx.diagnostics.batches_run.fetch_add(1, Ordering::Relaxed);

        let frames: usize = embeddings.iter().map(Array2::nrows).sum();
        ctx.diagnostics
            .frames_quantized
            .fetch_add(frames, Ordering::Relaxed);
        if options.use_beam {
            ctx.diagnostics
                .beam_searches
                .fetch_add(embeddings.len(), Ordering::Relaxed);
        }

        let codes = post_process(
            embeddings,
            &ctx.codebook,
            options,
            ctx.config.workers,
        )?;
        results.extend(batch.tags.iter().copied().zip(codes));
    }

    // ── 5. Reassemble ────────────────────────────────────────────────────
    let items = reassemble(results, prepared.len())?;
    info!(
        items = items.len(),
        chunks = chunks.len(),
        batches = batches.len(),
        "encode complete"
    );
    Ok(items)
}

fn condition_item<'a>(config: &TokenizerConfig, item_id: usize, item: &'a AudioItem) -> Result<Cow<'a, [f32]>> {
    if item.is_empty() {
        return Err(TokenizerError::InvalidInput(format!(
            "audio item {item_id} contains no samples"
        )));
    }

    let mut samples = if item.sample_rate == config.sampling_rate {
        Cow::Borrowed(item.samples.as_slice())
    } else {
        debug!(
            item_id,
            from = item.sample_rate,
            to = config.sampling_rate,
            "resampling item"
        );
        let mut rc = RateConverter::new(item.sample_rate, config.sampling_rate, DEFAULT_BLOCK)?;
        Cow::Owned(rc.convert(&item.samples)?)
    };

    if config.normalize_waveform {
        normalize_waveform(samples.to_mut());
    }
    Ok(samples)
}

/// Quantize and merge one chunk's frames.
pub fn process_chunk(frames: ArrayView2<'_, f32>, codebook: &Codebook, options: &EncodeOptions) -> Result<ItemCodes> {
    let normalized;
    let frames = if options.feature_normalize {
        normalized = normalize_features(frames);
        normalized.view()
    } else {
        frames
    };

    let codes = quantize(frames, codebook, options.top_k, false, options.return_diff)?;
    let code = codes.nearest();
    let merged_code = run_length_merge(&code);

    let mut out = ItemCodes {
        code,
        merged_code,
        ..ItemCodes::default()
    };

    if options.use_beam {
        let beam = beam_search_merge(codes.indices.view(), codes.distances.view(), options.beam_size)?;
        out.beam_code = Some(beam.codes);
        out.beam_merged_code = Some(beam.merged);
    }

    if options.return_diff {
        out.distance = codes
            .all_distances
            .as_ref()
            .map(|all| all.outer_iter().map(|row| row.to_vec()).collect());
        out.center_diff = Some(
            frames
                .outer_iter()
                .zip(&out.code)
                .map(|(frame, &nearest)| (&frame - &codebook.center(nearest)).to_vec())
                .collect(),
        );
    }

    Ok(out)
}

/// Run `process_chunk` over every chunk of a batch, in parallel when
/// `workers > 1`. Output order matches input order.
fn post_process(
    embeddings: Vec<Array2<f32>>,
    codebook: &Codebook,
    options: &EncodeOptions,
    workers: usize,
) -> Result<Vec<ItemCodes>> {
    let n = embeddings.len();
    if workers <= 1 || n <= 1 {
        return embeddings
            .iter()
            .map(|frames| process_chunk(frames.view(), codebook, options))
            .collect();
    }

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, Array2<f32>)>();
    let (res_tx, res_rx) = crossbeam_channel::unbounded::<(usize, Result<ItemCodes>)>();
    for job in embeddings.into_iter().enumerate() {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers.min(n) {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            scope.spawn(move || {
                for (slot, frames) in job_rx.iter() {
                    let codes = process_chunk(frames.view(), codebook, options);
                    if res_tx.send((slot, codes)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(res_tx);

    let mut slots: Vec<Option<ItemCodes>> = vec![None; n];
    for (slot, codes) in res_rx.iter() {
        slots[slot] = Some(codes?);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(slot, codes)| {
            codes.ok_or_else(|| {
                TokenizerError::Other(anyhow::anyhow!("worker dropped chunk {slot}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line_codebook() -> Codebook {
        Codebook::from_rows(vec![vec![0.0], vec![10.0], vec![20.0]]).unwrap()
    }

    #[test]
    fn process_chunk_reports_raw_and_merged() {
        let frames = array![[0.1f32], [0.2], [9.8], [21.0], [20.9]];
        let out = process_chunk(frames.view(), &line_codebook(), &EncodeOptions::default()).unwrap();
        assert_eq!(out.code, vec![0, 0, 1, 2, 2]);
        assert_eq!(out.merged_code, vec![0, 1, 2]);
        assert!(out.beam_code.is_none());
        assert!(out.distance.is_none());
    }

    #[test]
    fn return_diff_reports_residuals() {
        let frames = array![[1.5f32], [18.0]];
        let options = EncodeOptions {
            return_diff: true,
            ..EncodeOptions::default()
        };
        let out = process_chunk(frames.view(), &line_codebook(), &options).unwrap();
        assert_eq!(out.center_diff, Some(vec![vec![1.5], vec![-2.0]]));
        let distance = out.distance.unwrap();
        assert_eq!(distance.len(), 2);
        assert_eq!(distance[0].len(), 3);
        assert!((distance[1][2] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn worker_pool_matches_sequential_order() {
        let codebook = line_codebook();
        let options = EncodeOptions {
            use_beam: true,
            ..EncodeOptions::default()
        };
        let embeddings: Vec<Array2<f32>> = (0..9)
            .map(|i| Array2::from_shape_fn((6 + i, 1), |(f, _)| ((f + i) % 3) as f32 * 10.0))
            .collect();

        let sequential = post_process(embeddings.clone(), &codebook, &options, 1).unwrap();
        let parallel = post_process(embeddings, &codebook, &options, 4).unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(sequential[1].code[0], 1);
    }

    #[test]
    fn worker_errors_propagate() {
        let codebook = line_codebook();
        let options = EncodeOptions {
            top_k: 0,
            ..EncodeOptions::default()
        };
        let embeddings = vec![Array2::<f32>::zeros((3, 1)); 4];
        assert!(post_process(embeddings, &codebook, &options, 3).is_err());
    }
}
