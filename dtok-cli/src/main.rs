mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use dtok_core::inference::stub::StubExtractor;
use dtok_core::presets::{find_preset, preset_catalog};
use dtok_core::{
    CodeToSpeech, Codebook, EncodeInput, EncodeOptions, Encoded, ExtractorHandle, OnnxExtractor,
    OnnxExtractorConfig, OnnxVocoder, SpeechTokenizer, TokenizerConfig,
};

use cli::{Cli, Commands, DecodeArgs, EncodeArgs};

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dtok=info,dtok_core=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode(args) => cmd_encode(args),
        Commands::Decode(args) => cmd_decode(args),
        Commands::Presets => cmd_presets(),
    }
}

fn tokenizer_config(args: &EncodeArgs) -> Result<TokenizerConfig> {
    let mut config = match (&args.config, &args.preset) {
        (Some(path), _) => TokenizerConfig::from_json_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        (None, Some(name)) => find_preset(name)?.tokenizer_config(),
        (None, None) => TokenizerConfig::default(),
    };
    if let (Some(_), Some(name)) = (&args.config, &args.preset) {
        config.feature_layer = find_preset(name)?.layer;
    }
    if let Some(layer) = args.layer {
        config.feature_layer = layer;
    }
    if args.batch_size.is_some() {
        config.batch_size = args.batch_size;
    }
    Ok(config)
}

fn encode_options(args: &EncodeArgs) -> EncodeOptions {
    let defaults = EncodeOptions::default();
    EncodeOptions {
        top_k: args.top_k.unwrap_or(defaults.top_k),
        use_beam: args.beam,
        beam_size: args.beam_size.unwrap_or(defaults.beam_size),
        feature_normalize: args.feature_normalize,
        return_diff: args.return_diff,
    }
}

fn cmd_encode(args: EncodeArgs) -> Result<()> {
    let config = tokenizer_config(&args)?;
    let codebook = Codebook::from_json_file(&args.codebook)
        .with_context(|| format!("load codebook {}", args.codebook.display()))?;

    let extractor = if args.stub {
        info!(hop = args.stub_hop, dim = codebook.dim(), "using stub extractor");
        ExtractorHandle::new(StubExtractor::new(args.stub_hop, codebook.dim()))
    } else {
        let model = args
            .model
            .clone()
            .context("--model is required unless --stub is given")?;
        let mut onnx = OnnxExtractorConfig::new(model, config.feature_layer)
            .with_sampling_rate(config.sampling_rate);
        onnx.output_name = args.output_name.clone();
        ExtractorHandle::new(OnnxExtractor::new(onnx))
    };

    let tokenizer = SpeechTokenizer::new(config, codebook, extractor)?;
    let options = encode_options(&args);
    let input = EncodeInput::new().with_files(args.inputs.iter().cloned());
    let encoded = tokenizer.encode(input, &options)?;

    let stats = tokenizer.pipeline_diagnostics_snapshot();
    info!(
        items = stats.items_in,
        chunks = stats.chunks_built,
        batches = stats.batches_run,
        frames = stats.frames_quantized,
        batch_size = tokenizer.max_batch_size(),
        "encode finished"
    );

    let json = serde_json::to_string_pretty(&encoded)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
            info!(path = %path.display(), "codes written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Codes accepted by `decode`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CodesFile {
    Raw(Vec<usize>),
    Encoded(Encoded),
}

impl CodesFile {
    fn into_sequences(self) -> Vec<Vec<usize>> {
        match self {
            CodesFile::Raw(codes) => vec![codes],
            CodesFile::Encoded(encoded) => encoded
                .into_vec()
                .into_iter()
                .map(|item| item.preferred_merged().to_vec())
                .collect(),
        }
    }
}

fn numbered_output(base: &Path, index: usize, count: usize) -> PathBuf {
    if count == 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "decoded".into());
    base.with_file_name(format!("{stem}_{index}.wav"))
}

fn cmd_decode(args: DecodeArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.codes)
        .with_context(|| format!("read {}", args.codes.display()))?;
    let sequences = serde_json::from_str::<CodesFile>(&raw)
        .context("codes must be an array of ints or an encode result")?
        .into_sequences();

    let vocoder = OnnxVocoder::load(&args.vocoder, args.sample_rate)?;
    let mut c2s = CodeToSpeech::new(vocoder)
        .with_code_begin_pad(args.code_begin_pad)
        .with_end_token(args.end_token);
    c2s.dur_prediction = !args.no_dur_prediction;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: c2s.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    for (index, codes) in sequences.iter().enumerate() {
        let wav = c2s.synthesize(codes)?;
        let path = numbered_output(&args.output, index, sequences.len());
        let mut writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("create {}", path.display()))?;
        for sample in &wav {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
        info!(path = %path.display(), codes = codes.len(), samples = wav.len(), "waveform written");
    }
    Ok(())
}

fn cmd_presets() -> Result<()> {
    let catalog = preset_catalog();
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}
