//! Chunk batching for the feature extractor.
//!
//! Chunks from any number of items are grouped greedily, in order, into
//! batches of at most `max_batch_size`. Each batch is a dense zero-padded
//! `(batch × padded_len)` matrix plus the true lengths and a validity mask
//! derived from those lengths.

pub mod chunk;

use ndarray::{s, Array2};

use chunk::{Chunk, ChunkTag};

/// One extractor round: padded samples, true lengths and validity mask.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Origin of every row, in row order.
    pub tags: Vec<ChunkTag>,
    /// `(batch × padded_len)`, zero beyond each row's true length.
    pub samples: Array2<f32>,
    /// True (unpadded) length of every row.
    pub lengths: Vec<usize>,
    /// `true` where a sample is real audio, `false` where it is padding.
    pub mask: Array2<bool>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Length every row was padded to (the batch's longest chunk).
    pub fn padded_len(&self) -> usize {
        self.samples.ncols()
    }
}

/// Group `chunks` into padded batches of at most `max_batch_size`.
///
/// Deterministic: the same chunks and capacity always yield the same batch
/// membership and padding.
pub fn collate(chunks: &[Chunk<'_>], max_batch_size: usize) -> Vec<Batch> {
    chunks
        .chunks(max_batch_size.max(1))
        .map(pad_batch)
        .collect()
}

fn pad_batch(group: &[Chunk<'_>]) -> Batch {
    let padded_len = group.iter().map(Chunk::len).max().unwrap_or(0);
    let mut samples = Array2::<f32>::zeros((group.len(), padded_len));
    let mut mask = Array2::<bool>::from_elem((group.len(), padded_len), false);

    for (row, chunk) in group.iter().enumerate() {
        let n = chunk.len();
        samples
            .slice_mut(s![row, ..n])
            .assign(&ndarray::ArrayView1::from(chunk.samples));
        mask.slice_mut(s![row, ..n]).fill(true);
    }

    Batch {
        tags: group.iter().map(|c| c.tag).collect(),
        samples,
        lengths: group.iter().map(Chunk::len).collect(),
        mask,
    }
}
