//! Block allocation plan: how the matrix is tiled into block-columns and
//! which device owns each block.
//!
//! The plan is a pure input data structure. It is computed up front (by
//! the caller or by the [`BlockPlan::round_robin`] helper), validated on
//! construction, and never mutated by the scheduler; replanning after an
//! out-of-memory failure means building a new plan.

use serde::{Deserialize, Serialize};

use crate::error::{CholForgeError, CholResult};
use crate::registry::DeviceId;

/// One contiguous block of matrix rows/columns assigned to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAlloc {
    /// First index covered by this block (inclusive).
    pub start: usize,
    /// One past the last index covered (exclusive).
    pub end: usize,
    /// Block extent, always `end - start`.
    pub size: usize,
    /// Owning device.
    pub device_id: DeviceId,
    /// Unique allocation id within the plan.
    pub alloc_id: usize,
}

/// Ordered, validated tiling of `[0, n)` into block-columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPlan {
    blocks: Vec<BlockAlloc>,
    n: usize,
}

impl BlockPlan {
    /// Validate and adopt an externally computed block allocation.
    ///
    /// Invariants checked: blocks are ordered, contiguous, non-empty, and
    /// together cover exactly `[0, n)`; `size` matches the range; alloc
    /// ids are unique.
    pub fn new(blocks: Vec<BlockAlloc>, n: usize) -> CholResult<Self> {
        if n == 0 {
            return Err(CholForgeError::InvalidArgument(
                "matrix dimension must be positive".into(),
            ));
        }
        if blocks.is_empty() {
            return Err(CholForgeError::InvalidArgument(
                "block plan is empty".into(),
            ));
        }
        let mut cursor = 0usize;
        let mut seen_ids = std::collections::HashSet::new();
        for block in &blocks {
            if block.start != cursor {
                return Err(CholForgeError::InvalidArgument(format!(
                    "block {} starts at {} but {} expected: ranges must be \
                     contiguous and non-overlapping",
                    block.alloc_id, block.start, cursor
                )));
            }
            if block.end <= block.start {
                return Err(CholForgeError::InvalidArgument(format!(
                    "block {} has empty range [{}, {})",
                    block.alloc_id, block.start, block.end
                )));
            }
            if block.size != block.end - block.start {
                return Err(CholForgeError::InvalidArgument(format!(
                    "block {} size {} does not match range [{}, {})",
                    block.alloc_id, block.size, block.start, block.end
                )));
            }
            if !seen_ids.insert(block.alloc_id) {
                return Err(CholForgeError::InvalidArgument(format!(
                    "duplicate allocation id {}",
                    block.alloc_id
                )));
            }
            cursor = block.end;
        }
        if cursor != n {
            return Err(CholForgeError::InvalidArgument(format!(
                "blocks cover [0, {cursor}) but the matrix dimension is {n}"
            )));
        }
        Ok(BlockPlan { blocks, n })
    }

    /// Build a plan that splits `[0, n)` into roughly equal blocks and
    /// assigns them to `num_devices` devices round-robin (device ids
    /// `0..num_devices`), aiming for `multiplier` blocks per device but
    /// never exceeding `max_block_size` rows per block.
    pub fn round_robin(
        n: usize,
        num_devices: usize,
        multiplier: usize,
        max_block_size: usize,
    ) -> CholResult<Self> {
        if num_devices == 0 || multiplier == 0 {
            return Err(CholForgeError::InvalidArgument(
                "need at least one device and one block per device".into(),
            ));
        }
        if max_block_size == 0 {
            return Err(CholForgeError::InvalidArgument(
                "maximum block size must be positive".into(),
            ));
        }
        let sizes = calc_block_sizes(n, num_devices, multiplier, max_block_size)?;
        let mut blocks = Vec::with_capacity(sizes.len());
        let mut cursor = 0usize;
        for (i, bs) in sizes.into_iter().enumerate() {
            blocks.push(BlockAlloc {
                start: cursor,
                end: cursor + bs,
                size: bs,
                device_id: DeviceId((i % num_devices) as i32),
                alloc_id: i,
            });
            cursor += bs;
        }
        BlockPlan::new(blocks, n)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[BlockAlloc] {
        &self.blocks
    }

    pub fn block(&self, k: usize) -> &BlockAlloc {
        &self.blocks[k]
    }

    pub fn owner(&self, k: usize) -> DeviceId {
        self.blocks[k].device_id
    }

    /// Largest block extent in the plan.
    pub fn max_block_size(&self) -> usize {
        self.blocks.iter().map(|b| b.size).max().unwrap_or(0)
    }
}

/// Largest block size (in rows) whose out-of-core working set (two whole
/// block-columns plus one tile) fits in `avail_elems` matrix elements:
/// `bs^2 * (2 n / bs + 1) <= avail`, i.e. `bs = (sqrt(4n^2 + 4R) - 2n) / 2`.
pub fn max_block_size(n: usize, avail_elems: usize) -> CholResult<usize> {
    if n == 0 {
        return Err(CholForgeError::InvalidArgument(
            "matrix dimension must be positive".into(),
        ));
    }
    let nf = n as f64;
    let r = avail_elems as f64;
    let bs = ((4.0 * nf * nf + 4.0 * r).sqrt() - 2.0 * nf) / 2.0;
    let bs = bs.floor() as usize;
    if bs < 1 {
        return Err(CholForgeError::InvalidArgument(format!(
            "available memory ({avail_elems} elements) is too small for any \
             out-of-core block of a {n}x{n} matrix"
        )));
    }
    Ok(bs.min(n))
}

/// Split `n` into block sizes: `num_devices * multiplier` roughly equal
/// blocks, refined upward until every block fits `max_block_size`.
fn calc_block_sizes(
    n: usize,
    num_devices: usize,
    multiplier: usize,
    max_block_size: usize,
) -> CholResult<Vec<usize>> {
    if n == 0 {
        return Err(CholForgeError::InvalidArgument(
            "matrix dimension must be positive".into(),
        ));
    }
    let preferred = num_devices * multiplier;
    let needed = n.div_ceil(max_block_size);
    let num_blocks = preferred.max(needed).min(n);
    let base = n / num_blocks;
    let extra = n % num_blocks;
    // The first `extra` blocks take one extra row.
    let sizes: Vec<usize> = (0..num_blocks)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect();
    debug_assert_eq!(sizes.iter().sum::<usize>(), n);
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(start: usize, end: usize, dev: i32, id: usize) -> BlockAlloc {
        BlockAlloc {
            start,
            end,
            size: end - start,
            device_id: DeviceId(dev),
            alloc_id: id,
        }
    }

    #[test]
    fn accepts_contiguous_cover() {
        let plan = BlockPlan::new(vec![alloc(0, 3, 0, 0), alloc(3, 8, 1, 1)], 8).unwrap();
        assert_eq!(plan.num_blocks(), 2);
        assert_eq!(plan.owner(1), DeviceId(1));
        assert_eq!(plan.max_block_size(), 5);
    }

    #[test]
    fn rejects_gap() {
        let err = BlockPlan::new(vec![alloc(0, 3, 0, 0), alloc(4, 8, 0, 1)], 8).unwrap_err();
        assert!(matches!(err, CholForgeError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_overlap() {
        assert!(BlockPlan::new(vec![alloc(0, 5, 0, 0), alloc(4, 8, 0, 1)], 8).is_err());
    }

    #[test]
    fn rejects_wrong_total() {
        assert!(BlockPlan::new(vec![alloc(0, 4, 0, 0)], 8).is_err());
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut bad = alloc(0, 8, 0, 0);
        bad.size = 7;
        assert!(BlockPlan::new(vec![bad], 8).is_err());
    }

    #[test]
    fn rejects_duplicate_alloc_ids() {
        assert!(BlockPlan::new(vec![alloc(0, 4, 0, 7), alloc(4, 8, 0, 7)], 8).is_err());
    }

    #[test]
    fn round_robin_covers_and_cycles() {
        let plan = BlockPlan::round_robin(100, 3, 2, 100).unwrap();
        assert_eq!(plan.num_blocks(), 6);
        assert_eq!(plan.blocks().iter().map(|b| b.size).sum::<usize>(), 100);
        for (i, b) in plan.blocks().iter().enumerate() {
            assert_eq!(b.device_id, DeviceId((i % 3) as i32));
        }
    }

    #[test]
    fn round_robin_respects_max_block_size() {
        let plan = BlockPlan::round_robin(100, 1, 1, 16).unwrap();
        assert!(plan.num_blocks() >= 7);
        assert!(plan.blocks().iter().all(|b| b.size <= 16));
    }

    #[test]
    fn round_robin_small_matrix_caps_block_count() {
        // Cannot make more blocks than rows.
        let plan = BlockPlan::round_robin(3, 2, 4, 3).unwrap();
        assert_eq!(plan.num_blocks(), 3);
        assert!(plan.blocks().iter().all(|b| b.size == 1));
    }

    #[test]
    fn max_block_size_honors_working_set_bound() {
        let n = 1000usize;
        let avail = 500_000usize;
        let bs = max_block_size(n, avail).unwrap();
        // Two block-columns plus one tile must fit.
        assert!(bs * (2 * n + bs) <= avail);
        // And the next size up must not.
        assert!((bs + 1) * (2 * n + bs + 1) > avail);
    }

    #[test]
    fn max_block_size_rejects_tiny_memory() {
        assert!(max_block_size(10_000, 8).is_err());
    }

    #[test]
    fn plan_serde_round_trip() {
        let plan = BlockPlan::round_robin(16, 2, 2, 8).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        let back: BlockPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_blocks(), plan.num_blocks());
        assert_eq!(back.owner(3), plan.owner(3));
    }
}
