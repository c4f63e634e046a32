//! Block locator construction.
//!
//! A locator starts at a given header and walks back toward genesis. The first
//! ten entries are consecutive; after that the step doubles with each entry.
//! Genesis is always the final entry, so a peer sharing nothing else with us
//! can still answer from the root.

use crate::chain::index::HeaderIndex;
use crate::network::constants::MAX_LOCATOR_SZ;
use crate::types::BlockHash;

/// Heights a locator starting at `start_height` visits, genesis last.
pub fn locator_heights(start_height: u32) -> Vec<u32> {
    let mut heights = Vec::new();
    let mut height = start_height;
    let mut step = 1u32;
    loop {
        heights.push(height);
        if height == 0 || heights.len() >= MAX_LOCATOR_SZ - 1 {
            break;
        }
        if heights.len() >= 10 {
            step = step.saturating_mul(2);
        }
        height = height.saturating_sub(step);
    }
    if heights.last() != Some(&0) {
        heights.push(0);
    }
    heights
}

/// Build a locator for the branch ending at `from`.
///
/// Returns only the genesis hash when `from` is not indexed.
pub fn build_block_locator(index: &HeaderIndex, from: &BlockHash) -> Vec<BlockHash> {
    let Some(start) = index.get(from) else {
        return vec![index.genesis_hash()];
    };
    locator_heights(start.height)
        .into_iter()
        .filter_map(|height| index.ancestor(from, height).map(|record| record.hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_chain_is_dense() {
        assert_eq!(locator_heights(5), vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_genesis_only() {
        assert_eq!(locator_heights(0), vec![0]);
    }

    #[test]
    fn test_step_doubles_after_ten_entries() {
        let heights = locator_heights(1000);
        assert_eq!(&heights[..10], &[1000, 999, 998, 997, 996, 995, 994, 993, 992, 991]);
        assert_eq!(heights[10], 989);
        assert_eq!(heights[11], 985);
        assert_eq!(heights[12], 977);
        assert_eq!(*heights.last().unwrap(), 0);
    }

    #[test]
    fn test_locator_is_bounded_and_ends_at_genesis() {
        for start in [0u32, 1, 11, 2_000, 1_000_000, u32::MAX] {
            let heights = locator_heights(start);
            assert!(heights.len() <= MAX_LOCATOR_SZ);
            assert_eq!(*heights.last().unwrap(), 0);
            assert!(heights.windows(2).all(|w| w[0] > w[1]));
        }
    }
}
