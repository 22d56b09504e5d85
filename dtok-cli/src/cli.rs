use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dtok", about = "Discrete speech tokenizer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode WAV files into codebook indices (JSON on stdout or --output)
    Encode(EncodeArgs),

    /// Synthesize a WAV file from codes with an ONNX unit vocoder
    Decode(DecodeArgs),

    /// List the known extractor/codebook presets
    Presets,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// WAV files to encode, in output order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Codebook JSON (`{"centers": [[...], ...]}`)
    #[arg(short, long)]
    pub codebook: PathBuf,

    /// ONNX feature extractor exporting hidden states
    #[arg(short, long, required_unless_present = "stub")]
    pub model: Option<PathBuf>,

    /// Preset name; sets the feature layer
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Tokenizer config JSON; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hidden-state layer (overrides preset and config)
    #[arg(long)]
    pub layer: Option<usize>,

    /// Exact extractor output name
    #[arg(long)]
    pub output_name: Option<String>,

    /// Fixed batch size; skips the capacity probe
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub top_k: Option<usize>,

    /// Also run the beam-search merge
    #[arg(long)]
    pub beam: bool,

    #[arg(long)]
    pub beam_size: Option<usize>,

    /// Normalize embeddings per dimension before quantizing
    #[arg(long)]
    pub feature_normalize: bool,

    /// Include per-frame distances and residuals
    #[arg(long)]
    pub return_diff: bool,

    /// Use the deterministic stub extractor instead of a model (dry run)
    #[arg(long)]
    pub stub: bool,

    /// Samples per frame for the stub extractor
    #[arg(long, default_value_t = 320)]
    pub stub_hop: usize,

    /// Write JSON here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// ONNX unit vocoder
    #[arg(short, long)]
    pub vocoder: PathBuf,

    /// JSON codes: an array of ints, or an encode result
    #[arg(short, long)]
    pub codes: PathBuf,

    /// Output WAV file
    #[arg(short, long, default_value = "decoded.wav")]
    pub output: PathBuf,

    /// Vocoder output rate
    #[arg(long, default_value_t = 16_000)]
    pub sample_rate: u32,

    /// Offset added to every code
    #[arg(long, default_value_t = 0)]
    pub code_begin_pad: i64,

    /// Token appended when missing
    #[arg(long)]
    pub end_token: Option<i64>,

    /// Emit one hop per code instead of predicting durations
    #[arg(long)]
    pub no_dur_prediction: bool,
}
