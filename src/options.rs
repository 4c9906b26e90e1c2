//! Tuning knobs for the out-of-core factorization.

use serde::{Deserialize, Serialize};

/// Bytes held back from every device's reported free memory before the
/// usable budget is computed. Driver allocations and solver workspaces
/// live in this reserve.
pub const DEVICE_MEM_RESERVE: usize = 300 * (1 << 20);

/// Options controlling block planning and scheduling.
///
/// All fields have conservative defaults; construct with
/// `CholeskyOptions::default()` and override through the `with_*` builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CholeskyOptions {
    /// Target number of block-columns per participating device. More
    /// blocks improve load balance at the cost of more transfers.
    pub block_multiplier: usize,
    /// How many future block-columns the prefetcher may stage while the
    /// current column's compute is in flight.
    pub lookahead: usize,
    /// Skip the single-device in-core shortcut even when the whole matrix
    /// fits on one device.
    pub force_out_of_core: bool,
    /// Fraction of a device's post-reserve free memory the scheduler may
    /// actually budget. Guards against free-memory reports going stale
    /// between the query and the allocations.
    pub mem_slack: f64,
}

impl Default for CholeskyOptions {
    fn default() -> Self {
        CholeskyOptions {
            block_multiplier: 2,
            lookahead: 1,
            force_out_of_core: false,
            mem_slack: 0.95,
        }
    }
}

impl CholeskyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_multiplier(mut self, block_multiplier: usize) -> Self {
        self.block_multiplier = block_multiplier;
        self
    }

    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_force_out_of_core(mut self, force: bool) -> Self {
        self.force_out_of_core = force;
        self
    }

    pub fn with_mem_slack(mut self, mem_slack: f64) -> Self {
        self.mem_slack = mem_slack;
        self
    }

    /// Usable byte budget for a device reporting `free_memory` bytes.
    pub fn usable_budget(&self, free_memory: usize) -> usize {
        let after_reserve = free_memory.saturating_sub(DEVICE_MEM_RESERVE);
        (after_reserve as f64 * self.mem_slack) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = CholeskyOptions::default();
        assert_eq!(opts.block_multiplier, 2);
        assert_eq!(opts.lookahead, 1);
        assert!(!opts.force_out_of_core);
        assert!(opts.mem_slack > 0.0 && opts.mem_slack <= 1.0);
    }

    #[test]
    fn builder_chain() {
        let opts = CholeskyOptions::new()
            .with_block_multiplier(4)
            .with_lookahead(2)
            .with_force_out_of_core(true)
            .with_mem_slack(0.8);
        assert_eq!(opts.block_multiplier, 4);
        assert_eq!(opts.lookahead, 2);
        assert!(opts.force_out_of_core);
        assert!((opts.mem_slack - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn usable_budget_applies_reserve_and_slack() {
        let opts = CholeskyOptions::default();
        // Below the reserve the budget collapses to zero.
        assert_eq!(opts.usable_budget(DEVICE_MEM_RESERVE / 2), 0);
        let free = DEVICE_MEM_RESERVE + 1000;
        assert_eq!(opts.usable_budget(free), 950);
    }

    #[test]
    fn options_round_trip_serde() {
        let opts = CholeskyOptions::new().with_block_multiplier(3);
        let json = serde_json::to_string(&opts).unwrap();
        let back: CholeskyOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.block_multiplier, 3);
    }
}
