//! `SpeechTokenizer`: the explicit context object behind encode/decode.
//!
//! ## Lifecycle
//!
//! ```text
//! SpeechTokenizer::new(config, codebook, extractor)
//!     ├─► extractor.warm_up()
//!     └─► batch size = config.batch_size or CapacityProbe::probe()
//!         └─► encode(...) / decode(...)   any number of times
//! ```
//!
//! The tokenizer owns the shared read-only codebook, the extractor handle,
//! an optional vocoder and the calibrated batch size. Nothing lives in
//! process-wide state.

pub mod pipeline;
pub mod reassemble;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    audio::AudioItem,
    codes::{Encoded, ItemCodes},
    error::{Result, TokenizerError},
    inference::{probe::CapacityProbe, vocoder::CodeToSpeech, ExtractorHandle},
    quantize::Codebook,
};

/// Configuration for `SpeechTokenizer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct TokenizerConfig {
    /// Rate the extractor expects (Hz). Items at other rates are resampled.
    /// Default: 16000.
    pub sampling_rate: u32,
    /// Chunk duration in seconds. Default: 10.
    pub chunk_secs: f32,
    /// A final chunk shorter than this merges into its predecessor.
    /// Default: 1.0.
    pub tail_merge_secs: f32,
    /// Hidden-state layer read from the extractor. Default: 6.
    pub feature_layer: usize,
    /// Explicit batch size; `None` runs the capacity probe.
    pub batch_size: Option<usize>,
    /// Post-processing threads per batch. Default: available cores, max 8.
    pub workers: usize,
    /// Capacity probe increment. Default: 2.
    pub probe_step: usize,
    /// Capacity probe safety factor. Default: 0.95.
    pub probe_headroom: f32,
    /// Capacity probe ceiling. Default: 64.
    pub max_probe_batch: usize,
    /// Zero-mean / unit-variance each item before chunking. Default: false.
    pub normalize_waveform: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 16_000,
            chunk_secs: 10.0,
            tail_merge_secs: 1.0,
            feature_layer: 6,
            batch_size: None,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(1, 8),
            probe_step: 2,
            probe_headroom: 0.95,
            max_probe_batch: 64,
            normalize_waveform: false,
        }
    }
}

impl TokenizerConfig {
    pub fn normalize(&mut self) {
        self.sampling_rate = self.sampling_rate.max(1);
        self.chunk_secs = self.chunk_secs.clamp(0.1, 600.0);
        self.tail_merge_secs = self.tail_merge_secs.clamp(0.0, self.chunk_secs);
        self.batch_size = self.batch_size.map(|b| b.max(1));
        self.workers = self.workers.clamp(1, 64);
        self.probe_step = self.probe_step.max(1);
        self.probe_headroom = self.probe_headroom.clamp(0.1, 1.0);
        self.max_probe_batch = self.max_probe_batch.max(1);
    }

    /// Load a JSON config file; missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.normalize();
        Ok(config)
    }

    /// Chunk length in samples.
    pub fn chunk_length(&self) -> usize {
        ((self.chunk_secs * self.sampling_rate as f32).round() as usize).max(1)
    }

    /// Minimum standalone tail length in samples.
    pub fn min_tail(&self) -> usize {
        (self.tail_merge_secs * self.sampling_rate as f32).round() as usize
    }

    pub fn capacity_probe(&self) -> CapacityProbe {
        CapacityProbe {
            step: self.probe_step,
            headroom: self.probe_headroom,
            max_batch: self.max_probe_batch,
        }
    }
}

/// Per-call encode knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EncodeOptions {
    /// Nearest centers kept per frame. Default: 5.
    pub top_k: usize,
    /// Also compute the beam-search merge. Default: false.
    pub use_beam: bool,
    /// Default: 5.
    pub beam_size: usize,
    /// Normalize each chunk's embeddings per dimension. Default: false.
    pub feature_normalize: bool,
    /// Report all distances and residuals per frame. Default: false.
    pub return_diff: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            use_beam: false,
            beam_size: 5,
            feature_normalize: false,
            return_diff: false,
        }
    }
}

impl EncodeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(TokenizerError::InvalidInput("top_k must be at least 1".into()));
        }
        if self.use_beam && self.beam_size == 0 {
            return Err(TokenizerError::InvalidInput(
                "beam_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Audio to encode: files and/or in-memory items.
///
/// Files are loaded first, then in-memory items follow; result order matches.
#[derive(Debug, Clone, Default)]
pub struct EncodeInput {
    pub files: Vec<PathBuf>,
    pub items: Vec<AudioItem>,
}

impl EncodeInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn with_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_item(mut self, item: AudioItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(self) -> Result<Vec<AudioItem>> {
        let mut items = self
            .files
            .iter()
            .map(AudioItem::from_wav)
            .collect::<Result<Vec<_>>>()?;
        items.extend(self.items);
        Ok(items)
    }
}

impl From<AudioItem> for EncodeInput {
    fn from(item: AudioItem) -> Self {
        Self::new().with_item(item)
    }
}

impl From<Vec<AudioItem>> for EncodeInput {
    fn from(items: Vec<AudioItem>) -> Self {
        Self {
            files: Vec::new(),
            items,
        }
    }
}

/// The tokenizer context.
pub struct SpeechTokenizer {
    config: TokenizerConfig,
    codebook: Arc<Codebook>,
    extractor: ExtractorHandle,
    vocoder: Option<Mutex<CodeToSpeech>>,
    max_batch_size: usize,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl SpeechTokenizer {
    /// Warm up the extractor and size batches.
    ///
    /// # Errors
    /// - `TokenizerError::FatalResource` if a single chunk does not fit.
    /// - Any warm-up error from the extractor.
    pub fn new(mut config: TokenizerConfig, codebook: Codebook, extractor: ExtractorHandle) -> Result<Self> {
        config.normalize();
        info!(
            codebook_size = codebook.size(),
            dim = codebook.dim(),
            layer = config.feature_layer,
            "warming up feature extractor"
        );
        extractor.0.lock().warm_up()?;

        let max_batch_size = match config.batch_size {
            Some(explicit) => {
                info!(batch_size = explicit, "explicit batch size; capacity probe skipped");
                explicit
            }
            None => config
                .capacity_probe()
                .probe(&extractor, config.chunk_length())?,
        };

        Ok(Self {
            config,
            codebook: Arc::new(codebook),
            extractor,
            vocoder: None,
            max_batch_size,
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        })
    }

    /// Attach a vocoder so `decode` becomes available.
    pub fn with_vocoder(mut self, vocoder: CodeToSpeech) -> Self {
        self.vocoder = Some(Mutex::new(vocoder));
        self
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn codebook(&self) -> &Arc<Codebook> {
        &self.codebook
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Encode audio. A single submitted item yields `Encoded::Single`,
    /// anything else `Encoded::Many` in submission order.
    ///
    /// # Errors
    /// - `TokenizerError::InvalidInput` when nothing was supplied.
    /// - `TokenizerError::ResourceExhausted` when a batch does not fit; retry
    ///   with a smaller explicit `batch_size`.
    pub fn encode(&self, input: impl Into<EncodeInput>, options: &EncodeOptions) -> Result<Encoded> {
        let input = input.into();
        if input.is_empty() {
            return Err(TokenizerError::InvalidInput(
                "neither audio files nor in-memory audio supplied".into(),
            ));
        }
        options.validate()?;

        let single = input.len() == 1;
        let items = input.load()?;
        let results = pipeline::run(&self.pipeline_context(), &items, options)?;
        Ok(reassemble::shape_output(results, single))
    }

    /// Encode many items and always return a list.
    pub fn batch_encode(&self, items: Vec<AudioItem>, options: &EncodeOptions) -> Result<Vec<ItemCodes>> {
        if items.is_empty() {
            return Err(TokenizerError::InvalidInput("no audio items supplied".into()));
        }
        options.validate()?;
        pipeline::run(&self.pipeline_context(), &items, options)
    }

    /// Raw per-frame codes of one WAV file.
    pub fn encode_file(&self, path: impl AsRef<Path>) -> Result<Vec<usize>> {
        let input = EncodeInput::new().with_file(path.as_ref());
        let encoded = self.encode(input, &EncodeOptions::default())?;
        Ok(encoded
            .into_vec()
            .into_iter()
            .next()
            .map(|item| item.code)
            .unwrap_or_default())
    }

    /// Synthesize a waveform from codes.
    ///
    /// # Errors
    /// `TokenizerError::UnsupportedOperation` when no vocoder is attached.
    pub fn decode(&self, codes: &[usize]) -> Result<Vec<f32>> {
        let Some(vocoder) = self.vocoder.as_ref() else {
            return Err(TokenizerError::UnsupportedOperation(
                "no vocoder is configured for this tokenizer".into(),
            ));
        };
        vocoder.lock().synthesize(codes)
    }

    pub fn batch_decode(&self, codes: &[Vec<usize>]) -> Result<Vec<Vec<f32>>> {
        codes.iter().map(|c| self.decode(c)).collect()
    }

    /// Output rate of `decode`, if a vocoder is attached.
    pub fn decode_sample_rate(&self) -> Option<u32> {
        self.vocoder.as_ref().map(|v| v.lock().sample_rate())
    }

    /// Snapshot of pipeline counters for observability.
    pub fn pipeline_diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn pipeline_context(&self) -> pipeline::PipelineContext {
        pipeline::PipelineContext {
            config: self.config.clone(),
            codebook: Arc::clone(&self.codebook),
            extractor: self.extractor.clone(),
            max_batch_size: self.max_batch_size,
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }
}

impl std::fmt::Debug for SpeechTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechTokenizer")
            .field("config", &self.config)
            .field("codebook_size", &self.codebook.size())
            .field("max_batch_size", &self.max_batch_size)
            .field("has_vocoder", &self.vocoder.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_geometry() {
        let config = TokenizerConfig::default();
        assert_eq!(config.chunk_length(), 160_000);
        assert_eq!(config.min_tail(), 16_000);
    }

    #[test]
    fn config_json_uses_defaults_for_missing_keys() {
        let config: TokenizerConfig =
            serde_json::from_str(r#"{"chunkSecs": 5, "batchSize": 3}"#).unwrap();
        assert_eq!(config.chunk_length(), 80_000);
        assert_eq!(config.batch_size, Some(3));
        assert_eq!(config.sampling_rate, 16_000);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut config = TokenizerConfig {
            chunk_secs: 0.0,
            tail_merge_secs: 99.0,
            batch_size: Some(0),
            workers: 0,
            probe_headroom: 3.0,
            ..TokenizerConfig::default()
        };
        config.normalize();
        assert_eq!(config.chunk_secs, 0.1);
        assert_eq!(config.tail_merge_secs, 0.1);
        assert_eq!(config.batch_size, Some(1));
        assert_eq!(config.workers, 1);
        assert_eq!(config.probe_headroom, 1.0);
    }

    #[test]
    fn options_validation() {
        assert!(EncodeOptions::default().validate().is_ok());
        let zero_k = EncodeOptions {
            top_k: 0,
            ..EncodeOptions::default()
        };
        assert!(zero_k.validate().is_err());
        let zero_beam = EncodeOptions {
            use_beam: true,
            beam_size: 0,
            ..EncodeOptions::default()
        };
        assert!(zero_beam.validate().is_err());
    }

    #[test]
    fn encode_input_counts_files_and_items() {
        let input = EncodeInput::new()
            .with_files(["a.wav", "b.wav"])
            .with_item(AudioItem::new(vec![0.0; 4], 16_000));
        assert_eq!(input.len(), 3);
        assert!(EncodeInput::new().is_empty());
    }
}
