//! ONNX backends via the `ort` crate.
//!
//! Targets a self-supervised speech encoder exported with its intermediate
//! hidden states as graph outputs:
//! - input `input_values` `[batch, samples]` (f32, zero padded)
//! - output `hidden_states.{layer}` / `hidden_state_{layer}` `[batch, frames, dim]`
//!   (falls back to `last_hidden_state` when the export only has one output)
//!
//! and a unit vocoder taking `code` `[1, n]` (i64) to a mono waveform.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView2};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, TokenizerError},
    inference::{vocoder::Vocoder, FeatureExtractor},
};

fn create_session(model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        return Err(TokenizerError::ModelNotFound {
            path: model_path.to_path_buf(),
        });
    }
    let intra_threads = std::env::var("DTOK_ORT_INTRA_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
        .clamp(1, 32);
    let inter_threads = std::env::var("DTOK_ORT_INTER_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, 8);

    let session = SessionBuilder::new()
        .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?
        .with_inter_threads(inter_threads)
        .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?;
    info!(
        path = %model_path.display(),
        intra_threads,
        inter_threads,
        "ONNX session created"
    );
    Ok(session)
}

fn resolve_name(candidates: &[String], preferred: &[String]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

/// Map an ort run failure, separating allocation failures from the rest.
fn run_error(e: ort::Error) -> TokenizerError {
    classify_run_failure(e.to_string())
}

fn classify_run_failure(msg: String) -> TokenizerError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("out of memory")
        || lower.contains("bad_alloc")
        || lower.contains("failed to allocate")
    {
        TokenizerError::ResourceExhausted(msg)
    } else {
        TokenizerError::OnnxSession(msg)
    }
}

// ── OnnxExtractor ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OnnxExtractorConfig {
    pub model_path: PathBuf,
    /// Hidden-state layer to read.
    pub layer: usize,
    /// Exact output name; overrides the layer-based lookup.
    pub output_name: Option<String>,
    /// Input rate in Hz; sizes the warm-up pass. Default: 16000.
    pub sampling_rate: u32,
}

impl OnnxExtractorConfig {
    pub fn new(model_path: impl Into<PathBuf>, layer: usize) -> Self {
        Self {
            model_path: model_path.into(),
            layer,
            output_name: None,
            sampling_rate: 16_000,
        }
    }

    pub fn with_sampling_rate(mut self, sampling_rate: u32) -> Self {
        self.sampling_rate = sampling_rate.max(1);
        self
    }
}

pub struct OnnxExtractor {
    config: OnnxExtractorConfig,
    session: Option<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxExtractor {
    pub fn new(config: OnnxExtractorConfig) -> Self {
        Self {
            config,
            session: None,
            input_name: "input_values".into(),
            output_name: String::new(),
        }
    }

    fn bind_names(&mut self, session: &Session) -> Result<()> {
        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        debug!(?input_names, ?output_names, "extractor graph io");

        self.input_name = resolve_name(
            &input_names,
            &["input_values".into(), "waveform".into(), "input".into()],
        )
        .or_else(|| input_names.first().cloned())
        .ok_or_else(|| TokenizerError::OnnxSession("extractor model has no inputs".into()))?;

        let layer = self.config.layer;
        let preferred = match &self.config.output_name {
            Some(explicit) => vec![explicit.clone()],
            None => vec![
                format!("hidden_states.{layer}"),
                format!("hidden_state_{layer}"),
                format!("layer_{layer}"),
            ],
        };
        self.output_name = match resolve_name(&output_names, &preferred) {
            Some(name) => name,
            None if self.config.output_name.is_none() => {
                let fallback = resolve_name(&output_names, &["last_hidden_state".into()])
                    .ok_or_else(|| {
                        TokenizerError::OnnxSession(format!(
                            "no output for layer {layer}; graph outputs: {output_names:?}"
                        ))
                    })?;
                warn!(layer, output = %fallback, "layer output missing; using final hidden state");
                fallback
            }
            None => {
                return Err(TokenizerError::OnnxSession(format!(
                    "output {:?} not found; graph outputs: {output_names:?}",
                    preferred[0]
                )))
            }
        };
        Ok(())
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn warm_up(&mut self) -> Result<()> {
        let session = create_session(&self.config.model_path)?;
        self.bind_names(&session)?;
        self.session = Some(session);
        info!(
            input = %self.input_name,
            output = %self.output_name,
            "extractor ready"
        );

        // Dummy one-second forward pass.
        let dummy = Array2::<f32>::zeros((1, self.config.sampling_rate.max(1) as usize));
        self.forward(dummy.view())?;
        Ok(())
    }

    fn forward(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TokenizerError::OnnxSession("model not loaded, call warm_up()".into()))?;

        let input_val = Value::from_array(batch.to_owned())
            .map_err(|e: ort::Error| TokenizerError::OnnxSession(e.to_string()))?;
        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        let outputs = session.run(inputs).map_err(run_error)?;
        let hidden = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            TokenizerError::OnnxSession(format!("output {} missing from run", self.output_name))
        })?;
        let (shape, data) = hidden
            .try_extract_tensor::<f32>()
            .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?;
        if shape.len() != 3 {
            return Err(TokenizerError::Extraction(format!(
                "expected [batch, frames, dim] hidden states, got shape {shape:?}"
            )));
        }
        let dims = (shape[0] as usize, shape[1] as usize, shape[2] as usize);
        Array3::from_shape_vec(dims, data.to_vec())
            .map_err(|e| TokenizerError::Extraction(e.to_string()))
    }

    fn reset(&mut self) {
        // The session keeps no per-call state; arena memory is reclaimed by ort.
    }
}

// ── OnnxVocoder ──────────────────────────────────────────────────────────────

pub struct OnnxVocoder {
    session: Session,
    input_name: String,
    dur_name: Option<String>,
    sample_rate: u32,
}

impl OnnxVocoder {
    pub fn load(model_path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let session = create_session(model_path.as_ref())?;
        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let input_name = resolve_name(&input_names, &["code".into(), "units".into()])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| TokenizerError::OnnxSession("vocoder model has no inputs".into()))?;
        let dur_name = resolve_name(&input_names, &["dur_prediction".into()]);
        info!(input = %input_name, has_dur = dur_name.is_some(), sample_rate, "vocoder ready");
        Ok(Self {
            session,
            input_name,
            dur_name,
            sample_rate,
        })
    }
}

impl Vocoder for OnnxVocoder {
    fn synthesize(&mut self, codes: &[i64], dur_prediction: bool) -> Result<Vec<f32>> {
        let code_arr = Array2::<i64>::from_shape_vec((1, codes.len()), codes.to_vec())
            .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?;
        let code_val = Value::from_array(code_arr)
            .map_err(|e: ort::Error| TokenizerError::OnnxSession(e.to_string()))?;
        let mut inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), code_val.into())];

        if let Some(dur_name) = &self.dur_name {
            let flag = ndarray::Array1::<bool>::from_elem(1, dur_prediction);
            let flag_val = Value::from_array(flag)
                .map_err(|e: ort::Error| TokenizerError::OnnxSession(e.to_string()))?;
            inputs.push((dur_name.clone(), flag_val.into()));
        } else if dur_prediction {
            debug!("vocoder graph has no duration input; ignoring dur_prediction");
        }

        let outputs = self.session.run(inputs).map_err(run_error)?;
        let (_, wav) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| TokenizerError::OnnxSession(e.to_string()))?;
        Ok(wav.to_vec())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
