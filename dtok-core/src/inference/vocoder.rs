//! Code-to-waveform synthesis.
//!
//! The vocoder itself is external; `CodeToSpeech` only prepares its input the
//! way unit vocoders expect it: every code shifted by `code_begin_pad`, and an
//! `end_token` appended when configured and not already present.

use tracing::debug;

use crate::error::{Result, TokenizerError};

/// Contract for unit-to-waveform backends.
pub trait Vocoder: Send + 'static {
    /// Synthesize a mono waveform from prepared codes.
    ///
    /// `dur_prediction` asks the model to predict per-unit durations instead
    /// of emitting one hop per code.
    fn synthesize(&mut self, codes: &[i64], dur_prediction: bool) -> Result<Vec<f32>>;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;
}

/// Input preparation around a `Vocoder`.
pub struct CodeToSpeech {
    vocoder: Box<dyn Vocoder>,
    /// Added to every code before synthesis. Default: 0.
    pub code_begin_pad: i64,
    /// Appended unless the (shifted) sequence already ends with it.
    pub end_token: Option<i64>,
    /// Default: true.
    pub dur_prediction: bool,
}

impl CodeToSpeech {
    pub fn new<V: Vocoder>(vocoder: V) -> Self {
        Self {
            vocoder: Box::new(vocoder),
            code_begin_pad: 0,
            end_token: None,
            dur_prediction: true,
        }
    }

    pub fn with_code_begin_pad(mut self, pad: i64) -> Self {
        self.code_begin_pad = pad;
        self
    }

    pub fn with_end_token(mut self, end_token: Option<i64>) -> Self {
        self.end_token = end_token;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.vocoder.sample_rate()
    }

    /// Shift and terminate `codes` for the vocoder.
    pub fn prepare(&self, codes: &[usize]) -> Vec<i64> {
        let mut prepared: Vec<i64> = codes
            .iter()
            .map(|&c| c as i64 + self.code_begin_pad)
            .collect();
        if let Some(end) = self.end_token {
            if prepared.last() != Some(&end) {
                prepared.push(end);
            }
        }
        prepared
    }

    pub fn synthesize(&mut self, codes: &[usize]) -> Result<Vec<f32>> {
        if codes.is_empty() {
            return Err(TokenizerError::InvalidInput(
                "cannot synthesize an empty code sequence".into(),
            ));
        }
        let prepared = self.prepare(codes);
        debug!(codes = prepared.len(), "synthesizing waveform");
        self.vocoder.synthesize(&prepared, self.dur_prediction)
    }
}

impl std::fmt::Debug for CodeToSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeToSpeech")
            .field("code_begin_pad", &self.code_begin_pad)
            .field("end_token", &self.end_token)
            .field("dur_prediction", &self.dur_prediction)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Vocoder for Echo {
        fn synthesize(&mut self, codes: &[i64], _dur_prediction: bool) -> Result<Vec<f32>> {
            Ok(codes.iter().map(|&c| c as f32).collect())
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }
    }

    #[test]
    fn pads_codes_and_appends_end_token() {
        let cs = CodeToSpeech::new(Echo)
            .with_code_begin_pad(4)
            .with_end_token(Some(2));
        assert_eq!(cs.prepare(&[0, 1, 7]), vec![4, 5, 11, 2]);
    }

    #[test]
    fn end_token_not_duplicated() {
        let cs = CodeToSpeech::new(Echo).with_end_token(Some(9));
        assert_eq!(cs.prepare(&[3, 9]), vec![3, 9]);
    }

    #[test]
    fn empty_codes_rejected() {
        let mut cs = CodeToSpeech::new(Echo);
        assert!(matches!(
            cs.synthesize(&[]),
            Err(TokenizerError::InvalidInput(_))
        ));
        assert_eq!(cs.synthesize(&[1, 2]).unwrap(), vec![1.0, 2.0]);
    }
}
