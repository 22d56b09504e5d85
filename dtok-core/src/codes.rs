//! Code sequences returned to callers.
//!
//! Field names follow the JSON keys downstream unit-LM tooling reads
//! (`code`, `merged_code`, `beam_code`, ...), so the types serialise as-is.

use serde::{Deserialize, Serialize};

/// Quantization result for one chunk, or for one item after reassembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemCodes {
    /// Nearest center per embedding frame.
    pub code: Vec<usize>,
    /// Run-length collapse of `code` (per chunk, then concatenated).
    pub merged_code: Vec<usize>,
    /// Beam-search code per frame, when beam search was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam_code: Option<Vec<usize>>,
    /// Run-length collapse of `beam_code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam_merged_code: Option<Vec<usize>>,
    /// Distance from every frame to every center (`return_diff`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<Vec<Vec<f32>>>,
    /// `frame − nearest_center` per frame (`return_diff`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_diff: Option<Vec<Vec<f32>>>,
}

fn extend_opt<T>(dst: &mut Option<Vec<T>>, src: Option<Vec<T>>) {
    if let Some(src) = src {
        dst.get_or_insert_with(Vec::new).extend(src);
    }
}

impl ItemCodes {
    /// Append the next chunk's codes.
    pub fn extend(&mut self, next: ItemCodes) {
        self.code.extend(next.code);
        self.merged_code.extend(next.merged_code);
        extend_opt(&mut self.beam_code, next.beam_code);
        extend_opt(&mut self.beam_merged_code, next.beam_merged_code);
        extend_opt(&mut self.distance, next.distance);
        extend_opt(&mut self.center_diff, next.center_diff);
    }

    /// The sequence a caller usually wants: beam-merged when available,
    /// plain merged otherwise.
    pub fn preferred_merged(&self) -> &[usize] {
        self.beam_merged_code
            .as_deref()
            .unwrap_or(&self.merged_code)
    }
}

/// Encode output: one result for a single submitted item, a list otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Encoded {
    Single(ItemCodes),
    Many(Vec<ItemCodes>),
}

impl Encoded {
    pub fn is_single(&self) -> bool {
        matches!(self, Encoded::Single(_))
    }

    /// Flatten into a list regardless of shape.
    pub fn into_vec(self) -> Vec<ItemCodes> {
        match self {
            Encoded::Single(item) => vec![item],
            Encoded::Many(items) => items,
        }
    }
}
