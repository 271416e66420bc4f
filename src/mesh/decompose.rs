use std::ops::Range;

use datasize::DataSize;
use thiserror::Error;

/// Error produced when the input to a decomposition is malformed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecomposeError {
    #[error("decomposition requires at least one worker")]
    NoWorkers,
    #[error("block {gid} is out of range for {count} blocks")]
    InvalidGid { gid: usize, count: usize },
    #[error("block {0} appears more than once")]
    DuplicateGid(usize),
    #[error("block {gid} has invalid cost {cost}, costs must be finite and positive")]
    InvalidCost { gid: usize, cost: f64 },
}

/// Partition of blocks into contiguous, cost balanced ranges of the canonical
/// traversal order, one range per worker.
///
/// The partition is a pure function of the `(gid, cost)` sequence and the worker
/// count, so every worker derives an identical copy.
#[derive(Clone, Debug, PartialEq)]
pub struct Decomposition {
    /// Worker owning each block, indexed by gid.
    ranks: Vec<usize>,
    /// Gids in traversal order.
    order: Vec<usize>,
    /// Range of `order` owned by each worker.
    ranges: Vec<Range<usize>>,
    /// Summed cost of each worker.
    costs: Vec<f64>,
}

impl Decomposition {
    /// Distributes blocks over `workers` by a single forward scan. A new range is
    /// started whenever adding the next block would push the running cost past the
    /// next multiple of `total / workers`. Every worker receives at least one block
    /// as long as there are enough blocks to go around.
    pub fn new(
        blocks: impl IntoIterator<Item = (usize, f64)>,
        workers: usize,
    ) -> Result<Self, DecomposeError> {
        if workers == 0 {
            return Err(DecomposeError::NoWorkers);
        }

        let blocks: Vec<(usize, f64)> = blocks.into_iter().collect();
        let count = blocks.len();

        let mut seen = vec![false; count];
        for &(gid, cost) in blocks.iter() {
            if gid >= count {
                return Err(DecomposeError::InvalidGid { gid, count });
            }

            if seen[gid] {
                return Err(DecomposeError::DuplicateGid(gid));
            }

            seen[gid] = true;

            if !cost.is_finite() || cost <= 0.0 {
                return Err(DecomposeError::InvalidCost { gid, cost });
            }
        }

        if count < workers {
            log::warn!(
                "Decomposing {count} blocks over {workers} workers, {} workers are left without blocks",
                workers - count
            );
        }

        let total: f64 = blocks.iter().map(|&(_, cost)| cost).sum();
        let threshold = |k: usize| total * k as f64 / workers as f64;

        let mut ranks = vec![0; count];
        let mut order = Vec::with_capacity(count);
        let mut ranges = vec![0..0; workers];
        let mut costs = vec![0.0; workers];

        let mut rank = 0;
        let mut prefix = 0.0;

        for (index, &(gid, cost)) in blocks.iter().enumerate() {
            let remaining = count - index;
            let to_fill = workers - 1 - rank;

            let occupied = !ranges[rank].is_empty();
            let over = prefix + cost > threshold(rank + 1);

            if occupied && to_fill > 0 && (over || remaining <= to_fill) {
                rank += 1;
                ranges[rank] = index..index;
            }

            ranks[gid] = rank;
            order.push(gid);
            ranges[rank].end = index + 1;
            costs[rank] += cost;
            prefix += cost;
        }

        // Trailing empty workers start where the last occupied range ends.
        for empty in rank + 1..workers {
            ranges[empty] = count..count;
        }

        let result = Self {
            ranks,
            order,
            ranges,
            costs,
        };

        log::debug!(
            "Decomposed {count} blocks over {workers} workers, load imbalance {:.3}",
            result.imbalance()
        );

        Ok(result)
    }

    /// Decomposes blocks numbered in traversal order, all with the same cost.
    pub fn uniform(count: usize, workers: usize) -> Result<Self, DecomposeError> {
        Self::new((0..count).map(|gid| (gid, 1.0)), workers)
    }

    pub fn num_workers(&self) -> usize {
        self.ranges.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.ranks.len()
    }

    /// Worker owning the given block.
    pub fn rank_of(&self, gid: usize) -> usize {
        self.ranks[gid]
    }

    /// Map from gid to worker.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Blocks owned by a worker, in traversal order.
    pub fn blocks_of(&self, rank: usize) -> &[usize] {
        &self.order[self.ranges[rank].clone()]
    }

    /// Range of the traversal order owned by a worker.
    pub fn range_of(&self, rank: usize) -> Range<usize> {
        self.ranges[rank].clone()
    }

    /// Summed cost of the blocks owned by a worker.
    pub fn cost_of(&self, rank: usize) -> f64 {
        self.costs[rank]
    }

    /// Ratio of the most expensive worker's cost to the mean cost.
    pub fn imbalance(&self) -> f64 {
        let total: f64 = self.costs.iter().sum();

        if total <= 0.0 {
            return 1.0;
        }

        let max = self.costs.iter().copied().fold(0.0, f64::max);
        max * self.costs.len() as f64 / total
    }
}

impl DataSize for Decomposition {
    const IS_DYNAMIC: bool = true;
    const STATIC_HEAP_SIZE: usize = 0;

    fn estimate_heap_size(&self) -> usize {
        self.ranks.estimate_heap_size()
            + self.order.estimate_heap_size()
            + self.ranges.capacity() * std::mem::size_of::<Range<usize>>()
            + self.costs.estimate_heap_size()
    }
}
