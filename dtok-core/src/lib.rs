//! # dtok-core
//!
//! Discrete speech tokenization: waveforms in, codebook indices out.
//!
//! ## Architecture
//!
//! ```text
//! AudioItem[] → resample/normalize → Chunker → Collator(max batch)
//!                                                   │
//!                                      FeatureExtractor::forward
//!                                                   │
//!                                trim padded frames per row
//!                                                   │
//!                      worker pool: quantize → run-length / beam merge
//!                                                   │
//!                                    Reassembler → Encoded
//! ```
//!
//! The batch size is calibrated once per tokenizer by the capacity probe,
//! unless the caller pins it in `TokenizerConfig::batch_size`.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod batching;
pub mod codes;
pub mod engine;
pub mod error;
pub mod inference;
pub mod presets;
pub mod quantize;

// Convenience re-exports for downstream crates
pub use audio::AudioItem;
pub use codes::{Encoded, ItemCodes};
pub use engine::{EncodeInput, EncodeOptions, SpeechTokenizer, TokenizerConfig};
pub use error::TokenizerError;
pub use inference::vocoder::{CodeToSpeech, Vocoder};
pub use inference::{ExtractorHandle, FeatureExtractor};
pub use quantize::Codebook;

#[cfg(feature = "onnx")]
pub use inference::{OnnxExtractor, OnnxExtractorConfig, OnnxVocoder};
