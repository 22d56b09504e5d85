//! Regroup per-chunk results into one result per submitted item.
//!
//! Chunk results may arrive in any order (batch grouping, worker completion).
//! A stable sort on the `(item_id, chunk_index)` tag followed by a linear
//! group-by makes the output depend only on the tags.

use crate::batching::chunk::ChunkTag;
use crate::codes::{Encoded, ItemCodes};
use crate::error::{Result, TokenizerError};

/// Concatenate chunk results per item, items in id order `0..item_count`.
pub fn reassemble(mut results: Vec<(ChunkTag, ItemCodes)>, item_count: usize) -> Result<Vec<ItemCodes>> {
    results.sort_by_key(|(tag, _)| *tag);

    let mut items: Vec<Option<ItemCodes>> = vec![None; item_count];
    for (tag, codes) in results {
        let slot = items.get_mut(tag.item_id).ok_or_else(|| {
            TokenizerError::Extraction(format!(
                "chunk result for item {} but only {item_count} items submitted",
                tag.item_id
            ))
        })?;
        match slot {
            Some(acc) => acc.extend(codes),
            None => *slot = Some(codes),
        }
    }

    items
        .into_iter()
        .enumerate()
        .map(|(item_id, codes)| {
            codes.ok_or_else(|| {
                TokenizerError::Extraction(format!("no chunk results for item {item_id}"))
            })
        })
        .collect()
}

/// Shape the reassembled items: a single submission yields a single result.
pub fn shape_output(mut items: Vec<ItemCodes>, single_input: bool) -> Encoded {
    if single_input && items.len() == 1 {
        if let Some(item) = items.pop() {
            return Encoded::Single(item);
        }
    }
    Encoded::Many(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(item_id: usize, chunk_index: usize, code: Vec<usize>) -> (ChunkTag, ItemCodes) {
        (
            ChunkTag {
                item_id,
                chunk_index,
            },
            ItemCodes {
                merged_code: code.clone(),
                code,
                ..ItemCodes::default()
            },
        )
    }

    #[test]
    fn preserves_submission_order_for_any_arrival_order() {
        let arrivals = vec![
            tagged(2, 0, vec![20]),
            tagged(0, 1, vec![1]),
            tagged(1, 0, vec![10]),
            tagged(0, 0, vec![0]),
            tagged(2, 1, vec![21]),
        ];
        let mut reversed = arrivals.clone();
        reversed.reverse();

        for results in [arrivals, reversed] {
            let items = reassemble(results, 3).unwrap();
            assert_eq!(items[0].code, vec![0, 1]);
            assert_eq!(items[1].code, vec![10]);
            assert_eq!(items[2].code, vec![20, 21]);
        }
    }

    #[test]
    fn missing_item_is_an_error() {
        let err = reassemble(vec![tagged(0, 0, vec![1])], 2).unwrap_err();
        assert!(matches!(err, TokenizerError::Extraction(_)));
    }

    #[test]
    fn unknown_item_is_an_error() {
        assert!(reassemble(vec![tagged(5, 0, vec![1])], 1).is_err());
    }

    #[test]
    fn single_input_returns_single_result() {
        let items = reassemble(vec![tagged(0, 0, vec![7])], 1).unwrap();
        match shape_output(items, true) {
            Encoded::Single(item) => assert_eq!(item.code, vec![7]),
            Encoded::Many(_) => panic!("expected a single result"),
        }

        let items = reassemble(vec![tagged(0, 0, vec![7]), tagged(1, 0, vec![8])], 2).unwrap();
        match shape_output(items, false) {
            Encoded::Many(list) => assert_eq!(list.len(), 2),
            Encoded::Single(_) => panic!("expected a list"),
        }
    }
}
