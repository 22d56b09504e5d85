//! Named tokenizer presets: which extractor, which layer, which codebook.
//!
//! Presets only describe where the pre-trained artifacts come from; fetching
//! and converting them (e.g. exporting the extractor to ONNX and the k-means
//! centers to JSON) is left to the caller.

use serde::Serialize;

use crate::engine::TokenizerConfig;
use crate::error::{Result, TokenizerError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VocoderSource {
    pub checkpoint_url: String,
    pub config_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    /// Upstream feature-extractor model id.
    pub extractor_model: String,
    /// Hidden-state layer the codebook was trained on.
    pub layer: usize,
    /// Number of centers (K).
    pub codebook_size: usize,
    pub codebook_url: String,
    pub vocoder: Option<VocoderSource>,
}

impl Preset {
    /// Tokenizer configuration matching this preset.
    pub fn tokenizer_config(&self) -> TokenizerConfig {
        TokenizerConfig {
            feature_layer: self.layer,
            ..TokenizerConfig::default()
        }
    }
}

const HUBERT_BASE: &str = "facebook/hubert-base-ls960";

fn preset(name: &str, extractor: &str, layer: usize, k: usize, url: &str) -> Preset {
    Preset {
        name: name.into(),
        extractor_model: extractor.into(),
        layer,
        codebook_size: k,
        codebook_url: url.into(),
        vocoder: None,
    }
}

pub fn preset_catalog() -> Vec<Preset> {
    vec![
        preset(
            "hubert_layer6_code50",
            HUBERT_BASE,
            6,
            50,
            "https://dl.fbaipublicfiles.com/textless_nlp/gslm/hubert/km50/km.bin",
        ),
        Preset {
            vocoder: Some(VocoderSource {
                checkpoint_url: "https://dl.fbaipublicfiles.com/fairseq/speech_to_speech/vocoder/code_hifigan/hubert_base_100_lj/g_00500000".into(),
                config_url: "https://dl.fbaipublicfiles.com/fairseq/speech_to_speech/vocoder/code_hifigan/hubert_base_100_lj/config.json".into(),
            }),
            ..preset(
                "hubert_layer6_code100",
                HUBERT_BASE,
                6,
                100,
                "https://dl.fbaipublicfiles.com/textless_nlp/gslm/hubert/km100/km.bin",
            )
        },
        preset(
            "hubert_layer6_code200",
            HUBERT_BASE,
            6,
            200,
            "https://dl.fbaipublicfiles.com/textless_nlp/gslm/hubert/km200/km.bin",
        ),
        preset(
            "hubert_layer9_code500",
            HUBERT_BASE,
            9,
            500,
            "https://dl.fbaipublicfiles.com/hubert/hubert_base_ls960_L9_km500.bin",
        ),
        preset(
            "zh_hubert_layer20_code2000",
            "TencentGameMate/chinese-hubert-large",
            20,
            2000,
            "https://huggingface.co/anthony-wss/extract-ssl-bpe/resolve/main/km_2000.mdl",
        ),
    ]
}

/// Look up a preset by exact name.
pub fn find_preset(name: &str) -> Result<Preset> {
    let catalog = preset_catalog();
    let known: Vec<String> = catalog.iter().map(|p| p.name.clone()).collect();
    catalog
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| {
            TokenizerError::InvalidInput(format!(
                "preset {name:?} not found; known presets: {}",
                known.join(", ")
            ))
        })
}
