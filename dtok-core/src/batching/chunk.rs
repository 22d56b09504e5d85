//! Fixed-duration chunks cut from one audio item.

/// Origin of a chunk: which item it came from and where it sits in that item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkTag {
    pub item_id: usize,
    pub chunk_index: usize,
}

/// A contiguous slice of one item's samples.
///
/// Borrowed from the item (or its resampled copy) for the duration of one
/// encode call.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub tag: ChunkTag,
    pub samples: &'a [f32],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Split `samples` into blocks of `chunk_length`, merging a final block shorter
/// than `min_tail` into its predecessor.
///
/// A lone block is kept even when short. Concatenating the returned chunks
/// always reproduces `samples`.
pub fn split(item_id: usize, samples: &[f32], chunk_length: usize, min_tail: usize) -> Vec<Chunk<'_>> {
    debug_assert!(chunk_length > 0);

    let mut bounds: Vec<(usize, usize)> = (0..samples.len())
        .step_by(chunk_length.max(1))
        .map(|start| (start, (start + chunk_length).min(samples.len())))
        .collect();

    if bounds.is_empty() {
        bounds.push((0, 0));
    }

    if bounds.len() >= 2 {
        let (tail_start, tail_end) = bounds[bounds.len() - 1];
        if tail_end - tail_start < min_tail {
            bounds.pop();
            if let Some(prev) = bounds.last_mut() {
                prev.1 = tail_end;
            }
        }
    }

    bounds
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (start, end))| Chunk {
            tag: ChunkTag {
                item_id,
                chunk_index,
            },
            samples: &samples[start..end],
        })
        .collect()
}
